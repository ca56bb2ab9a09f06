//! Versioned schema migrations.
//!
//! The applied version lives in `schema_meta` under `schema_version`. Each
//! step runs in its own immediate transaction together with the version
//! bump, so a catalog is always at exactly one known version: a crash or a
//! failing step leaves it at the last step that committed.

mod steps;

use crate::catalog::schema::table_exists;
use crate::error::{CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

const VERSION_KEY: &str = "schema_version";

/// One schema step: bring a catalog from `version - 1` to `version`.
#[derive(Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: fn(&Connection) -> Result<()>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

/// Outcome of [`Migrator::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    /// Versions applied in this run, ascending.
    pub applied: Vec<u32>,
}

/// An ordered list of migration steps.
#[derive(Debug, Clone)]
pub struct Migrator {
    steps: Vec<Migration>,
}

impl Migrator {
    /// Build a migrator from custom steps. Versions must be positive and
    /// strictly ascending.
    pub fn new(steps: Vec<Migration>) -> Result<Self> {
        let mut previous = 0;
        for step in &steps {
            if step.version <= previous {
                return Err(CatalogError::MigrationOrder {
                    version: step.version,
                });
            }
            previous = step.version;
        }
        Ok(Self { steps })
    }

    /// The catalog's own migrations.
    pub fn builtin() -> Self {
        Self {
            steps: steps::MIGRATIONS.to_vec(),
        }
    }

    pub fn latest_version(&self) -> u32 {
        self.steps.last().map(|s| s.version).unwrap_or(0)
    }

    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    /// Apply every pending step.
    pub fn apply(&self, conn: &mut Connection) -> Result<MigrationReport> {
        self.apply_up_to(conn, self.latest_version())
    }

    /// Apply pending steps with `version <= target`.
    pub fn apply_up_to(&self, conn: &mut Connection, target: u32) -> Result<MigrationReport> {
        ensure_meta_table(conn)?;

        let from = current_version(conn)?;
        let latest = self.latest_version();
        if from > latest {
            return Err(CatalogError::SchemaTooNew {
                found: from,
                supported: latest,
            });
        }

        let mut report = MigrationReport {
            from,
            to: from,
            applied: Vec::new(),
        };

        for step in self
            .steps
            .iter()
            .filter(|s| s.version > from && s.version <= target)
        {
            apply_step(conn, step)?;
            info!("Applied migration V{} ({})", step.version, step.name);
            report.to = step.version;
            report.applied.push(step.version);
        }

        if report.applied.is_empty() {
            debug!("Catalog schema already at V{}", from);
        }
        Ok(report)
    }
}

fn apply_step(conn: &mut Connection, step: &Migration) -> Result<()> {
    let failed = |err: CatalogError| CatalogError::Migration {
        version: step.version,
        name: step.name,
        message: err.to_string(),
    };

    // dropping the transaction on any error path rolls the step back
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| failed(e.into()))?;
    (step.up)(&tx).map_err(failed)?;
    set_version(&tx, step.version).map_err(failed)?;
    tx.commit().map_err(|e| failed(e.into()))?;
    Ok(())
}

fn ensure_meta_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Applied schema version; 0 for a catalog that never recorded one.
pub fn current_version(conn: &Connection) -> Result<u32> {
    if !table_exists(conn, "schema_meta")? {
        return Ok(0);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = ?1",
            params![VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v.trim().parse().map_err(|_| CatalogError::Database {
            message: format!("Invalid schema version in schema_meta: {:?}", v),
            source: None,
        }),
    }
}

fn set_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_meta(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![VERSION_KEY, version.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{column_exists, configure_connection, ensure_base_schema};
    use crate::index::fts5;
    use tempfile::TempDir;

    fn v0_catalog(dir: &TempDir) -> Connection {
        let conn = Connection::open(dir.path().join("catalog.sqlite")).unwrap();
        configure_connection(&conn).unwrap();
        ensure_base_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO lora(id, name, path, trigger, title, mtime)
                VALUES (1, 'miku', '/loras/char/miku.safetensors', 'miku', 'Miku', 10);
            INSERT INTO lora(id, name, path, kind, trigger, mtime)
                VALUES (2, 'ink', '/loras/style/ink.safetensors', 'style', 'ink wash', 20);
            INSERT INTO tag(id, name, title) VALUES (1, 'vocaloid', 'vocaloid'), (2, 'anime', 'anime');
            INSERT INTO lora_tag(lora_id, tag_id) VALUES (1, 1), (1, 2);
            "#,
        )
        .unwrap();
        conn
    }

    fn snapshot(conn: &Connection) -> Vec<String> {
        let mut out = vec![current_version(conn).unwrap().to_string()];
        let mut stmt = conn
            .prepare("SELECT id, name, COALESCE(kind, ''), COALESCE(header_json, '') FROM lora ORDER BY id")
            .unwrap();
        let rows = stmt
            .query_map([], |r| {
                Ok(format!(
                    "{}|{}|{}|{}",
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?
                ))
            })
            .unwrap();
        out.extend(rows.map(|r| r.unwrap()));
        for id in [1, 2] {
            out.push(format!("{:?}", fts5::stored_row(conn, id).unwrap()));
        }
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'index') ORDER BY name")
            .unwrap();
        let names = stmt.query_map([], |r| r.get::<_, String>(0)).unwrap();
        out.extend(names.map(|r| r.unwrap()));
        out
    }

    #[test]
    fn test_builtin_steps_are_ordered() {
        let migrator = Migrator::builtin();
        assert!(Migrator::new(migrator.steps().to_vec()).is_ok());
        assert_eq!(migrator.latest_version(), 4);
    }

    #[test]
    fn test_apply_from_v0() {
        let temp = TempDir::new().unwrap();
        let mut conn = v0_catalog(&temp);

        let report = Migrator::builtin().apply(&mut conn).unwrap();
        assert_eq!(report.from, 0);
        assert_eq!(report.to, 4);
        assert_eq!(report.applied, vec![1, 2, 3, 4]);

        let kind: String = conn
            .query_row("SELECT kind FROM lora WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kind, "char");
        assert!(column_exists(&conn, "lora", "header_json").unwrap());
        assert!(table_exists(&conn, "body_preset").unwrap());
        assert_eq!(fts5::stats(&conn).unwrap().tokenizer.as_deref(), Some("trigram"));

        let row = fts5::stored_row(&conn, 1).unwrap().unwrap();
        assert_eq!(row.tags_text, "anime vocaloid");
        assert_eq!(Some(row), fts5::derive_row(&conn, 1).unwrap());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut conn = v0_catalog(&temp);
        let migrator = Migrator::builtin();

        migrator.apply(&mut conn).unwrap();
        let before = snapshot(&conn);
        let report = migrator.apply(&mut conn).unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.from, 4);
        assert_eq!(snapshot(&conn), before);
    }

    #[test]
    fn test_split_sessions_match_single_session() {
        let migrator = Migrator::builtin();

        let single_dir = TempDir::new().unwrap();
        let mut single = v0_catalog(&single_dir);
        migrator.apply(&mut single).unwrap();
        let expected = snapshot(&single);

        for split in 1..migrator.latest_version() {
            let dir = TempDir::new().unwrap();
            let mut conn = v0_catalog(&dir);
            let first = migrator.apply_up_to(&mut conn, split).unwrap();
            assert_eq!(first.to, split);
            drop(conn);

            let mut reopened = Connection::open(dir.path().join("catalog.sqlite")).unwrap();
            configure_connection(&reopened).unwrap();
            let second = migrator.apply(&mut reopened).unwrap();
            assert_eq!(second.from, split);
            assert_eq!(snapshot(&reopened), expected, "split at V{split}");
        }
    }

    fn create_scratch(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE TABLE scratch (x INTEGER);")?;
        Ok(())
    }

    fn broken_step(conn: &Connection) -> Result<()> {
        conn.execute_batch("CREATE TABLE half_done (x INTEGER);")?;
        conn.execute_batch("INSERT INTO no_such_table VALUES (1);")?;
        Ok(())
    }

    #[test]
    fn test_failed_step_rolls_back() {
        let temp = TempDir::new().unwrap();
        let mut conn = v0_catalog(&temp);
        let migrator = Migrator::new(vec![
            Migration {
                version: 1,
                name: "scratch",
                up: create_scratch,
            },
            Migration {
                version: 2,
                name: "broken",
                up: broken_step,
            },
        ])
        .unwrap();

        let err = migrator.apply(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Migration {
                version: 2,
                name: "broken",
                ..
            }
        ));
        assert!(err.is_fatal());

        assert_eq!(current_version(&conn).unwrap(), 1);
        assert!(table_exists(&conn, "scratch").unwrap());
        assert!(!table_exists(&conn, "half_done").unwrap());
    }

    #[test]
    fn test_rejects_unordered_steps() {
        let step = Migration {
            version: 2,
            name: "scratch",
            up: create_scratch,
        };
        let err = Migrator::new(vec![step, step]).unwrap_err();
        assert!(matches!(err, CatalogError::MigrationOrder { version: 2 }));
    }

    #[test]
    fn test_refuses_newer_schema() {
        let temp = TempDir::new().unwrap();
        let mut conn = v0_catalog(&temp);
        set_version(&conn, 99).unwrap();

        let err = Migrator::builtin().apply(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::SchemaTooNew {
                found: 99,
                supported: 4
            }
        ));
    }
}
