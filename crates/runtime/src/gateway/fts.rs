//! FTS5 companion index.
//!
//! Every row the gateway stores also lands here for keyword search. The
//! gateway process holds the only writable connection; other readers may
//! open the database read-only (SQLite readers are concurrency-safe when
//! the writer is single).

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::gateway::GatewayError;

pub struct FtsIndex {
    conn: Mutex<Connection>,
    path: PathBuf,
}

fn sql_err(e: rusqlite::Error) -> GatewayError {
    GatewayError::Storage(format!("sqlite: {e}"))
}

impl FtsIndex {
    /// Open (or create) the writable index. WAL mode keeps read-only
    /// openers happy while the gateway writes.
    pub fn open(path: &Path) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::Storage(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sql_err)?;
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
                id UNINDEXED,
                collection UNINDEXED,
                text
            );",
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Read-only handle for out-of-process keyword search.
    pub fn open_read_only(path: &Path) -> Result<Self, GatewayError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub async fn upsert(
        &self,
        collection: &str,
        id: &str,
        text: &str,
    ) -> Result<(), GatewayError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM memory_fts WHERE id = ?1", params![id])
            .map_err(sql_err)?;
        conn.execute(
            "INSERT INTO memory_fts (id, collection, text) VALUES (?1, ?2, ?3)",
            params![id, collection, text],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), GatewayError> {
        let conn = self.conn.lock().await;
        for id in ids {
            conn.execute("DELETE FROM memory_fts WHERE id = ?1", params![id])
                .map_err(sql_err)?;
        }
        Ok(())
    }

    /// Keyword search within one collection, best rank first.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>, GatewayError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, text FROM memory_fts
                 WHERE memory_fts MATCH ?1 AND collection = ?2
                 ORDER BY bm25(memory_fts)
                 LIMIT ?3",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![fts_escape(query), collection, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(sql_err)?;
        let mut hits = Vec::new();
        for row in rows {
            hits.push(row.map_err(sql_err)?);
        }
        Ok(hits)
    }

    pub async fn count(&self) -> Result<usize, GatewayError> {
        let conn = self.conn.lock().await;
        let count: Option<i64> = conn
            .query_row("SELECT COUNT(*) FROM memory_fts", [], |row| row.get(0))
            .optional()
            .map_err(sql_err)?;
        Ok(count.unwrap_or(0) as usize)
    }

    /// Consistent snapshot via `VACUUM INTO` (safe while the writer is
    /// live, since we are the writer).
    pub async fn backup_to(&self, destination: &Path) -> Result<(), GatewayError> {
        if destination.exists() {
            std::fs::remove_file(destination)
                .map_err(|e| GatewayError::Storage(format!("backup cleanup: {e}")))?;
        }
        let conn = self.conn.lock().await;
        let dest = destination.to_string_lossy().replace('\'', "''");
        conn.execute_batch(&format!("VACUUM INTO '{dest}'"))
            .map_err(sql_err)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Quote the user query so FTS5 operators in arbitrary text can't break
/// the MATCH expression; each term becomes a quoted token.
fn fts_escape(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upsert_search_round_trip() {
        let tmp = TempDir::new().unwrap();
        let index = FtsIndex::open(&tmp.path().join("fts.sqlite3")).unwrap();
        index
            .upsert("knowledge", "a", "the borrow checker rejects aliased mutation")
            .await
            .unwrap();
        index
            .upsert("knowledge", "b", "css grid layout recipes")
            .await
            .unwrap();

        let hits = index.search("knowledge", "borrow checker", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a");
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let tmp = TempDir::new().unwrap();
        let index = FtsIndex::open(&tmp.path().join("fts.sqlite3")).unwrap();
        index.upsert("knowledge", "a", "timeout fix").await.unwrap();
        index
            .upsert("observations", "b", "timeout observed")
            .await
            .unwrap();

        let hits = index.search("observations", "timeout", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b");
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let tmp = TempDir::new().unwrap();
        let index = FtsIndex::open(&tmp.path().join("fts.sqlite3")).unwrap();
        index.upsert("knowledge", "a", "first text").await.unwrap();
        index.upsert("knowledge", "a", "second text").await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        assert!(index.search("knowledge", "first", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hostile_query_operators_are_quoted() {
        let tmp = TempDir::new().unwrap();
        let index = FtsIndex::open(&tmp.path().join("fts.sqlite3")).unwrap();
        index.upsert("knowledge", "a", "plain text row").await.unwrap();
        // Would be a syntax error unquoted.
        let result = index.search("knowledge", "NEAR( OR", 10).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn read_only_handle_sees_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fts.sqlite3");
        let writer = FtsIndex::open(&path).unwrap();
        writer.upsert("knowledge", "a", "shared row").await.unwrap();

        let reader = FtsIndex::open_read_only(&path).unwrap();
        let hits = reader.search("knowledge", "shared", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn backup_produces_a_readable_copy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fts.sqlite3");
        let index = FtsIndex::open(&path).unwrap();
        index.upsert("knowledge", "a", "backed up row").await.unwrap();

        let backup = tmp.path().join("backup.sqlite3");
        index.backup_to(&backup).await.unwrap();

        let restored = FtsIndex::open_read_only(&backup).unwrap();
        assert_eq!(restored.count().await.unwrap(), 1);
    }
}
