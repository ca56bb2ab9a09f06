//! Search query normalization and SQL building.
//!
//! Terms of three or more characters go through the trigram `MATCH`; shorter
//! terms fall back to `LIKE` over the same two columns, since the trigram
//! tokenizer cannot match anything shorter than one trigram.

use crate::catalog::KIND_UNSORTED;
use crate::error::Result;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeSet;

/// Minimum term length, in characters, the trigram tokenizer can match.
const TRIGRAM_MIN_CHARS: usize = 3;

/// Restriction on entry kinds.
///
/// `Any` and an empty `Only` set are different: the first applies no
/// restriction, the second matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum KindFilter {
    #[default]
    Any,
    Only(BTreeSet<String>),
}

impl KindFilter {
    /// Filter to the given kinds. Blank kinds mean "Unsorted".
    pub fn only<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        KindFilter::Only(
            kinds
                .into_iter()
                .map(|k| crate::catalog::kind_label(Some(k.as_ref())).to_string())
                .collect(),
        )
    }

    /// True for an empty selection.
    pub fn matches_nothing(&self) -> bool {
        matches!(self, KindFilter::Only(kinds) if kinds.is_empty())
    }
}

/// A normalized search request; also the result cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    /// Sorted, deduplicated, non-empty terms.
    pub terms: Vec<String>,
    pub kinds: KindFilter,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new<I, S>(terms: I, kinds: KindFilter, limit: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        // order-independent key
        terms.sort();
        terms.dedup();

        Self {
            terms,
            kinds,
            limit,
        }
    }

    /// Split free text on whitespace.
    pub fn parse(text: &str, kinds: KindFilter, limit: usize) -> Self {
        Self::new(text.split_whitespace(), kinds, limit)
    }

    pub fn has_text(&self) -> bool {
        !self.terms.is_empty()
    }
}

/// Quote a term as an FTS5 string, doubling embedded quotes.
///
/// Always quoted: trigram terms are raw substrings and may contain any
/// FTS5 operator character.
pub fn escape_fts5_term(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Build the `MATCH` expression for the long terms of `terms`.
///
/// - `["blue", "hair"]` → `{name title} : "blue" AND {name title} : "hair"`
/// - `["ab"]` → `None`
pub fn build_match_expression(terms: &[String]) -> Option<String> {
    let parts: Vec<String> = terms
        .iter()
        .filter(|t| t.chars().count() >= TRIGRAM_MIN_CHARS)
        .map(|t| format!("{{name title}} : {}", escape_fts5_term(t)))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" AND "))
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Run `query` and return matching entry ids in result order.
pub(crate) fn run(conn: &Connection, query: &SearchQuery) -> Result<Vec<i64>> {
    if query.kinds.matches_nothing() || query.limit == 0 {
        return Ok(Vec::new());
    }

    let mut sql = String::from("SELECT l.id FROM lora_fts JOIN lora l ON l.id = lora_fts.rowid");
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    let match_expr = build_match_expression(&query.terms);
    if let Some(expr) = &match_expr {
        clauses.push("lora_fts MATCH ?".to_string());
        values.push(Value::Text(expr.clone()));
    }

    for term in query
        .terms
        .iter()
        .filter(|t| t.chars().count() < TRIGRAM_MIN_CHARS)
    {
        clauses.push(
            "(lora_fts.name LIKE ? ESCAPE '\\' OR lora_fts.title LIKE ? ESCAPE '\\')".to_string(),
        );
        let pattern = like_pattern(term);
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }

    if let KindFilter::Only(kinds) = &query.kinds {
        let placeholders = vec!["?"; kinds.len()].join(", ");
        clauses.push(format!(
            "COALESCE(NULLIF(TRIM(l.kind), ''), '{}') IN ({})",
            KIND_UNSORTED, placeholders
        ));
        values.extend(kinds.iter().cloned().map(Value::Text));
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if match_expr.is_some() {
        sql.push_str(" ORDER BY bm25(lora_fts), l.id");
    } else {
        sql.push_str(" ORDER BY l.mtime DESC, l.id DESC");
    }

    sql.push_str(" LIMIT ?");
    values.push(Value::Integer(
        i64::try_from(query.limit).unwrap_or(i64::MAX),
    ));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}
