//! Built-in catalog migrations.
//!
//! Append only. Each step is written against the schema of the version before
//! it, so the SQL here is frozen: later schema changes get a new step rather
//! than an edit to an old one.

use super::Migration;
use crate::catalog::kind_from_parent_dir;
use crate::catalog::schema::column_exists;
use crate::error::Result;
use rusqlite::{params, Connection};
use std::path::Path;

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "fill_kind_from_directory",
        up: fill_kind_from_directory,
    },
    Migration {
        version: 2,
        name: "trigram_search_index",
        up: trigram_search_index,
    },
    Migration {
        version: 3,
        name: "prompt_presets",
        up: prompt_presets,
    },
    Migration {
        version: 4,
        name: "header_json_and_kind_index",
        up: header_json_and_kind_index,
    },
];

fn fill_kind_from_directory(conn: &Connection) -> Result<()> {
    let rows: Vec<(i64, String)> = {
        let mut stmt =
            conn.prepare("SELECT id, path FROM lora WHERE kind IS NULL OR TRIM(kind) = ''")?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        mapped.collect::<rusqlite::Result<_>>()?
    };

    let mut update = conn.prepare("UPDATE lora SET kind = ?1 WHERE id = ?2")?;
    for (id, path) in rows {
        update.execute(params![kind_from_parent_dir(Path::new(&path)), id])?;
    }
    Ok(())
}

fn trigram_search_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS lora_fts;

        CREATE VIRTUAL TABLE lora_fts USING fts5(
            name, trigger, notes, tags_text, title,
            tokenize = 'trigram'
        );

        INSERT INTO lora_fts(rowid, name, trigger, notes, tags_text, title)
        SELECT
            l.id,
            COALESCE(l.name, ''),
            COALESCE(l.trigger, ''),
            COALESCE(l.notes, ''),
            COALESCE((
                SELECT group_concat(tag_name, ' ') FROM (
                    SELECT t.name AS tag_name
                    FROM lora_tag lt JOIN tag t ON t.id = lt.tag_id
                    WHERE lt.lora_id = l.id
                    ORDER BY t.name
                )
            ), ''),
            COALESCE(l.title, '')
        FROM lora l;
        "#,
    )?;
    Ok(())
}

fn prompt_presets(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS body_preset (
            id INTEGER PRIMARY KEY,
            lora_id INTEGER NOT NULL REFERENCES lora(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            prompt TEXT NOT NULL DEFAULT '',
            UNIQUE(lora_id, name)
        );

        CREATE TABLE IF NOT EXISTS outfit_preset (
            id INTEGER PRIMARY KEY,
            lora_id INTEGER NOT NULL REFERENCES lora(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            prompt TEXT NOT NULL DEFAULT '',
            UNIQUE(lora_id, name)
        );

        CREATE INDEX IF NOT EXISTS idx_body_preset_lora ON body_preset(lora_id);
        CREATE INDEX IF NOT EXISTS idx_outfit_preset_lora ON outfit_preset(lora_id);
        "#,
    )?;
    Ok(())
}

fn header_json_and_kind_index(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "lora", "header_json")? {
        conn.execute_batch("ALTER TABLE lora ADD COLUMN header_json TEXT;")?;
    }
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_lora_kind ON lora(kind);")?;
    Ok(())
}
