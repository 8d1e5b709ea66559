use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS generations (
            id INTEGER PRIMARY KEY,
            created INTEGER NOT NULL,
            commit_sha TEXT
        );

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            generation INTEGER NOT NULL,
            path TEXT NOT NULL,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            change_count INTEGER NOT NULL DEFAULT 0 CHECK (change_count >= 0),
            churn REAL NOT NULL DEFAULT 0 CHECK (churn >= 0),
            UNIQUE(generation, path),
            FOREIGN KEY(generation) REFERENCES generations(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS symbols (
            id INTEGER PRIMARY KEY,
            generation INTEGER NOT NULL,
            file_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            qualname TEXT NOT NULL,
            parent_qualname TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            start_byte INTEGER NOT NULL,
            end_byte INTEGER NOT NULL,
            signature TEXT,
            docstring TEXT,
            complexity INTEGER NOT NULL CHECK (complexity >= 0),
            UNIQUE(generation, qualname),
            FOREIGN KEY(generation) REFERENCES generations(id) ON DELETE CASCADE,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(generation, name);
        CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);

        CREATE TABLE IF NOT EXISTS call_edges (
            id INTEGER PRIMARY KEY,
            generation INTEGER NOT NULL,
            caller_id INTEGER NOT NULL,
            callee_id INTEGER,
            unresolved_name TEXT,
            line INTEGER NOT NULL,
            resolution TEXT,
            origin TEXT NOT NULL DEFAULT 'static',
            confirmed INTEGER NOT NULL DEFAULT 0,
            CHECK ((callee_id IS NULL) <> (unresolved_name IS NULL)),
            FOREIGN KEY(generation) REFERENCES generations(id) ON DELETE CASCADE,
            FOREIGN KEY(caller_id) REFERENCES symbols(id) ON DELETE CASCADE,
            FOREIGN KEY(callee_id) REFERENCES symbols(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_call_edges_caller ON call_edges(caller_id);
        CREATE INDEX IF NOT EXISTS idx_call_edges_callee ON call_edges(callee_id);

        CREATE TABLE IF NOT EXISTS search_terms (
            symbol_id INTEGER PRIMARY KEY,
            generation INTEGER NOT NULL,
            name_terms TEXT NOT NULL,
            qual_terms TEXT NOT NULL,
            doc_terms TEXT NOT NULL,
            qualname_folded TEXT NOT NULL,
            FOREIGN KEY(symbol_id) REFERENCES symbols(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS extract_cache (
            path TEXT NOT NULL,
            hash TEXT NOT NULL,
            extractor_version INTEGER NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY(path, hash)
        );
        COMMIT;
        ",
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                row.get::<_, String>(0)
                    .map(|v| v.parse::<i64>().unwrap_or(0))
            },
        )
        .optional()?;

    if existing.unwrap_or(0) < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(|row| row.unwrap())
            .collect();
        columns.iter().any(|name| name == column)
    }

    #[test]
    fn migrate_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert!(has_column(&conn, "call_edges", "origin"));
        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn edge_state_must_be_exactly_one_of_resolved_or_unresolved() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO generations (id, created) VALUES (1, 0);
             INSERT INTO files (id, generation, path, hash, size) VALUES (1, 1, 'a.py', 'h', 0);
             INSERT INTO symbols (id, generation, file_id, kind, name, qualname, start_line,
                                  end_line, start_byte, end_byte, complexity)
             VALUES (1, 1, 1, 'function', 'f', 'a.f', 1, 2, 0, 10, 1);",
        )
        .unwrap();
        let both = conn.execute(
            "INSERT INTO call_edges (generation, caller_id, callee_id, unresolved_name, line)
             VALUES (1, 1, 1, 'f', 2)",
            [],
        );
        assert!(both.is_err());
        let neither = conn.execute(
            "INSERT INTO call_edges (generation, caller_id, line) VALUES (1, 1, 2)",
            [],
        );
        assert!(neither.is_err());
    }

    #[test]
    fn fresh_schema_defaults_edges_to_static_origin() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO generations (id, created) VALUES (1, 0);
             INSERT INTO files (id, generation, path, hash, size) VALUES (1, 1, 'a.py', 'h', 0);
             INSERT INTO symbols (id, generation, file_id, kind, name, qualname, start_line,
                                  end_line, start_byte, end_byte, complexity)
             VALUES (1, 1, 1, 'function', 'f', 'a.f', 1, 2, 0, 10, 1);
             INSERT INTO call_edges (generation, caller_id, unresolved_name, line)
             VALUES (1, 1, 'g', 2);",
        )
        .unwrap();
        let origin: String = conn
            .query_row("SELECT origin FROM call_edges", [], |row| row.get(0))
            .unwrap();
        assert_eq!(origin, "static");
    }
}
