use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS medias (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash TEXT UNIQUE NOT NULL,
    kind TEXT NOT NULL,
    mime TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    dominant_colour TEXT NOT NULL,
    perceptual_hash TEXT NOT NULL,
    blurhash TEXT NOT NULL DEFAULT '',
    processed BOOLEAN NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_medias_timestamp ON medias(timestamp);
CREATE INDEX IF NOT EXISTS idx_medias_kind ON medias(kind);

CREATE TABLE IF NOT EXISTS dir_infos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id INTEGER NOT NULL REFERENCES medias(id) ON DELETE CASCADE,
    directory_alias TEXT NOT NULL,
    file_name TEXT NOT NULL,
    UNIQUE (directory_alias, file_name)
);

CREATE INDEX IF NOT EXISTS idx_dir_infos_media ON dir_infos(media_id);

CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id INTEGER NOT NULL REFERENCES medias(id) ON DELETE CASCADE,
    idx INTEGER NOT NULL,
    min_x INTEGER NOT NULL,
    min_y INTEGER NOT NULL,
    max_x INTEGER NOT NULL,
    max_y INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_media ON blocks(media_id);

CREATE VIRTUAL TABLE IF NOT EXISTS blocks_fts USING fts5(
    body,
    media_id UNINDEXED,
    tokenize = 'trigram'
);

CREATE TABLE IF NOT EXISTS thumbnails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id INTEGER UNIQUE NOT NULL REFERENCES medias(id) ON DELETE CASCADE,
    mime TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    data BLOB NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["medias", "dir_infos", "blocks", "blocks_fts", "thumbnails"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_migration_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("test.db")).unwrap();
        run_migrations(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap(); // should not error
    }
}
