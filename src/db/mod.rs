use crate::config::Config;
use crate::error::{Error, Result};
use crate::indexer::extract::{EXTRACTOR_VERSION, ExtractedFile, SymbolInput, SymbolKind};
use crate::model::{
    CalleeEntry, CallerEntry, EdgeOrigin, Hotspot, IndexDigest, RepoOverview, Resolution, Symbol,
};
use crate::search::{self, SearchDoc};
use blake3::Hasher;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod migrations;

const PUBLISHED_KEY: &str = "published_generation";
const LAST_INDEXED_KEY: &str = "last_indexed";

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// One file of a generation being built.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub path: String,
    pub hash: String,
    pub size: i64,
    pub change_count: i64,
    pub churn: f64,
    pub symbols: Vec<SymbolInput>,
    /// Serialized extraction to cache; `None` when it came from the cache.
    pub cache_payload: Option<String>,
}

/// One call edge of a generation being built, keyed by qualified names.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSnapshot {
    pub caller: String,
    pub callee: Option<String>,
    pub unresolved_name: Option<String>,
    pub line: i64,
    pub resolution: Option<Resolution>,
    pub origin: EdgeOrigin,
    pub confirmed: bool,
}

/// Everything an index pass publishes, in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub commit_sha: Option<String>,
    pub files: Vec<FileSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

/// Trace evidence of the published generation, keyed by qualified names so it
/// can be carried into the next one.
#[derive(Debug, Clone, Default)]
pub struct TraceCarryOver {
    /// `(caller, callee qualname or raw callee text)` of confirmed static edges.
    pub confirmed: HashSet<(String, String)>,
    /// `(caller, callee, line)` of edges only a trace produced.
    pub trace_edges: Vec<(String, String, i64)>,
}

/// Span of a symbol for mapping runtime code locations.
#[derive(Debug, Clone)]
pub struct SymbolSpan {
    pub id: i64,
    pub qualname: String,
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// A runtime call mapped onto symbol ids of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservedCall {
    pub caller_id: i64,
    pub callee_id: i64,
    pub line: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub confirmed: usize,
    pub added: usize,
}

pub struct Db {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Db {
    pub fn new(db_path: &Path) -> Result<Self> {
        crate::util::ensure_parent_dir(db_path)?;

        let config = Config::get();
        tracing::debug!(
            "initializing connection pool (size: {}, min_idle: {})",
            config.pool_size,
            config.pool_min_idle
        );

        // Open write connection first and run migrations
        let write_conn = Connection::open(db_path)?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&write_conn)?;

        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.read_pool.get()?)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.write_conn.lock().unwrap()
    }

    /// Run `f` against the published generation inside one read transaction,
    /// so every query in `f` sees the same generation.
    fn with_published<T>(&self, f: impl FnOnce(&Connection, i64) -> Result<T>) -> Result<T> {
        let mut conn = self.read_conn()?;
        let tx = conn.transaction()?;
        let generation = published_generation(&tx)?.ok_or(Error::NotIndexed)?;
        f(&tx, generation)
    }

    pub fn published_generation(&self) -> Result<Option<i64>> {
        let conn = self.read_conn()?;
        published_generation(&conn)
    }

    /// Cached extractions for `(path, hash)` pairs produced by the current extractor.
    pub fn load_cached_extractions(
        &self,
        keys: &[(String, String)],
    ) -> Result<HashMap<(String, String), ExtractedFile>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM extract_cache
             WHERE path = ? AND hash = ? AND extractor_version = ?",
        )?;
        let mut out = HashMap::new();
        for (path, hash) in keys {
            let payload: Option<String> = stmt
                .query_row(params![path, hash, EXTRACTOR_VERSION], |row| row.get(0))
                .optional()?;
            let Some(payload) = payload else { continue };
            match serde_json::from_str::<ExtractedFile>(&payload) {
                Ok(file) => {
                    out.insert((path.clone(), hash.clone()), file);
                }
                Err(err) => tracing::debug!("discarding cached extraction for {path}: {err}"),
            }
        }
        Ok(out)
    }

    /// Confirmation state of the published generation, if any.
    pub fn trace_carry_over(&self) -> Result<TraceCarryOver> {
        let conn = self.read_conn()?;
        let Some(generation) = published_generation(&conn)? else {
            return Ok(TraceCarryOver::default());
        };
        let mut stmt = conn.prepare(
            "SELECT caller.qualname, callee.qualname, e.unresolved_name, e.line, e.origin
             FROM call_edges e
             JOIN symbols caller ON caller.id = e.caller_id
             LEFT JOIN symbols callee ON callee.id = e.callee_id
             WHERE e.generation = ? AND e.confirmed = 1",
        )?;
        let rows = stmt.query_map(params![generation], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut carry = TraceCarryOver::default();
        for row in rows {
            let (caller, callee, unresolved, line, origin) = row?;
            match (origin.as_str(), callee, unresolved) {
                ("trace", Some(callee), _) => carry.trace_edges.push((caller, callee, line)),
                (_, Some(callee), _) => {
                    carry.confirmed.insert((caller, callee));
                }
                (_, None, Some(raw)) => {
                    carry.confirmed.insert((caller, raw));
                }
                (_, None, None) => {}
            }
        }
        Ok(carry)
    }

    /// Write `snapshot` as a new generation and publish it. Any invariant
    /// breach rolls the whole pass back and leaves the previous generation.
    pub fn publish(&self, snapshot: &Snapshot) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = crate::util::unix_now();

        tx.execute(
            "INSERT INTO generations (created, commit_sha) VALUES (?, ?)",
            params![now, snapshot.commit_sha],
        )?;
        let generation = tx.last_insert_rowid();

        let mut symbol_ids: HashMap<&str, i64> = HashMap::new();
        {
            let mut insert_file = tx.prepare(
                "INSERT INTO files (generation, path, hash, size, change_count, churn)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            let mut insert_symbol = tx.prepare(
                "INSERT INTO symbols (generation, file_id, kind, name, qualname, parent_qualname,
                                      start_line, end_line, start_byte, end_byte, signature,
                                      docstring, complexity)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            let mut insert_terms = tx.prepare(
                "INSERT INTO search_terms (symbol_id, generation, name_terms, qual_terms,
                                           doc_terms, qualname_folded)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            let mut insert_cache = tx.prepare(
                "INSERT INTO extract_cache (path, hash, extractor_version, payload)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(path, hash) DO UPDATE SET
                    extractor_version = excluded.extractor_version,
                    payload = excluded.payload",
            )?;

            for file in &snapshot.files {
                if file.churn < 0.0 || file.change_count < 0 {
                    return Err(Error::Consistency(format!(
                        "negative churn for {}",
                        file.path
                    )));
                }
                insert_file.execute(params![
                    generation,
                    file.path,
                    file.hash,
                    file.size,
                    file.change_count,
                    file.churn
                ])?;
                let file_id = tx.last_insert_rowid();

                for symbol in &file.symbols {
                    if symbol.complexity < 0 {
                        return Err(Error::Consistency(format!(
                            "negative complexity for {}",
                            symbol.qualname
                        )));
                    }
                    if symbol_ids.contains_key(symbol.qualname.as_str()) {
                        return Err(Error::Consistency(format!(
                            "duplicate qualified name {}",
                            symbol.qualname
                        )));
                    }
                    insert_symbol.execute(params![
                        generation,
                        file_id,
                        symbol.kind.as_str(),
                        symbol.name,
                        symbol.qualname,
                        symbol.parent,
                        symbol.start_line,
                        symbol.end_line,
                        symbol.start_byte,
                        symbol.end_byte,
                        symbol.signature,
                        symbol.docstring,
                        symbol.complexity
                    ])?;
                    let symbol_id = tx.last_insert_rowid();
                    symbol_ids.insert(symbol.qualname.as_str(), symbol_id);

                    insert_terms.execute(params![
                        symbol_id,
                        generation,
                        join_terms(&search::tokenize(&symbol.name)),
                        join_terms(&search::tokenize(&symbol.qualname)),
                        join_terms(&symbol.docstring.as_deref().map(search::tokenize).unwrap_or_default()),
                        symbol.qualname.to_lowercase()
                    ])?;
                }

                if let Some(payload) = &file.cache_payload {
                    insert_cache.execute(params![file.path, file.hash, EXTRACTOR_VERSION, payload])?;
                }
            }

            let mut insert_edge = tx.prepare(
                "INSERT INTO call_edges (generation, caller_id, callee_id, unresolved_name, line,
                                         resolution, origin, confirmed)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for edge in &snapshot.edges {
                let caller_id = *symbol_ids.get(edge.caller.as_str()).ok_or_else(|| {
                    Error::Consistency(format!("edge caller {} is not a symbol", edge.caller))
                })?;
                let callee_id = match &edge.callee {
                    Some(callee) => Some(*symbol_ids.get(callee.as_str()).ok_or_else(|| {
                        Error::Consistency(format!("edge callee {callee} is not a symbol"))
                    })?),
                    None => None,
                };
                if callee_id.is_some() == edge.unresolved_name.is_some() {
                    return Err(Error::Consistency(format!(
                        "edge from {} at line {} must be either resolved or unresolved",
                        edge.caller, edge.line
                    )));
                }
                insert_edge.execute(params![
                    generation,
                    caller_id,
                    callee_id,
                    edge.unresolved_name,
                    edge.line,
                    edge.resolution.map(Resolution::as_str),
                    edge.origin.as_str(),
                    edge.confirmed as i64
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![PUBLISHED_KEY, generation.to_string()],
        )?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_INDEXED_KEY, now.to_string()],
        )?;
        tx.execute("DELETE FROM generations WHERE id <> ?", params![generation])?;
        tx.execute(
            "DELETE FROM extract_cache
             WHERE extractor_version <> ?
                OR NOT EXISTS (
                    SELECT 1 FROM files f
                    WHERE f.generation = ? AND f.path = extract_cache.path
                      AND f.hash = extract_cache.hash
                )",
            params![EXTRACTOR_VERSION, generation],
        )?;
        tx.commit()?;
        Ok(generation)
    }

    /// Function and method rows with persisted complexity and churn; unscored.
    pub fn hotspot_candidates(&self) -> Result<Vec<Hotspot>> {
        self.with_published(|conn, generation| {
            let mut stmt = conn.prepare(
                "SELECT s.qualname, f.path, s.start_line, s.complexity, f.churn
                 FROM symbols s
                 JOIN files f ON f.id = s.file_id
                 WHERE s.generation = ? AND s.kind IN ('function', 'method')
                 ORDER BY s.qualname",
            )?;
            let rows = stmt.query_map(params![generation], |row| {
                Ok(Hotspot {
                    qualified_name: row.get(0)?,
                    file: row.get(1)?,
                    line: row.get(2)?,
                    complexity: row.get(3)?,
                    churn: row.get(4)?,
                    score: 0.0,
                })
            })?;
            collect_rows(rows)
        })
    }

    /// Exact qualified name, then unique simple name, then unique dotted suffix.
    pub fn resolve_symbol(&self, query: &str) -> Result<Option<i64>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        self.with_published(|conn, generation| {
            let exact: Option<i64> = conn
                .query_row(
                    "SELECT id FROM symbols WHERE generation = ? AND qualname = ?",
                    params![generation, query],
                    |row| row.get(0),
                )
                .optional()?;
            if exact.is_some() {
                return Ok(exact);
            }

            let mut by_name = conn.prepare(
                "SELECT id, qualname FROM symbols
                 WHERE generation = ? AND name = ?
                 ORDER BY qualname",
            )?;
            let named: Vec<(i64, String)> = collect_rows(
                by_name.query_map(params![generation, query], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?,
            )?;
            if let Some(id) = unique_match(query, &named)? {
                return Ok(Some(id));
            }

            let last = query.rsplit('.').next().unwrap_or(query);
            let suffix = format!(".{query}");
            let suffixed: Vec<(i64, String)> = collect_rows(
                by_name.query_map(params![generation, last], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?,
            )?
            .into_iter()
            .filter(|(_, qualname)| qualname.ends_with(&suffix))
            .collect();
            unique_match(query, &suffixed)
        })
    }

    pub fn symbol(&self, id: i64) -> Result<Symbol> {
        self.with_published(|conn, generation| {
            conn.query_row(
                "SELECT s.id, f.path, s.kind, s.name, s.qualname, s.parent_qualname,
                        s.start_line, s.end_line, s.start_byte, s.end_byte, s.signature,
                        s.docstring, s.complexity, s.generation
                 FROM symbols s
                 JOIN files f ON f.id = s.file_id
                 WHERE s.id = ? AND s.generation = ?",
                params![id, generation],
                symbol_from_row,
            )
            .optional()?
            .ok_or(Error::UnknownSymbol(id))
        })
    }

    /// Distinct callers of `id`, sorted by qualified name.
    pub fn callers(&self, id: i64) -> Result<Vec<CallerEntry>> {
        self.with_published(|conn, generation| {
            ensure_symbol(conn, generation, id)?;
            let mut stmt = conn.prepare(
                "SELECT DISTINCT s.qualname, f.path
                 FROM call_edges e
                 JOIN symbols s ON s.id = e.caller_id
                 JOIN files f ON f.id = s.file_id
                 WHERE e.generation = ? AND e.callee_id = ?
                 ORDER BY s.qualname, f.path",
            )?;
            let rows = stmt.query_map(params![generation, id], |row| {
                Ok(CallerEntry {
                    qualified_name: row.get(0)?,
                    file: row.get(1)?,
                })
            })?;
            collect_rows(rows)
        })
    }

    /// Callees of `id` in call-site order, one entry per distinct target.
    pub fn callees(&self, id: i64) -> Result<Vec<CalleeEntry>> {
        self.with_published(|conn, generation| {
            ensure_symbol(conn, generation, id)?;
            let mut stmt = conn.prepare(
                "SELECT c.qualname, f.path, e.unresolved_name, e.confirmed, e.resolution
                 FROM call_edges e
                 LEFT JOIN symbols c ON c.id = e.callee_id
                 LEFT JOIN files f ON f.id = c.file_id
                 WHERE e.generation = ? AND e.caller_id = ?
                 ORDER BY e.line, e.id",
            )?;
            let rows = stmt.query_map(params![generation, id], |row| {
                let qualname: Option<String> = row.get(0)?;
                let file: Option<String> = row.get(1)?;
                let unresolved: Option<String> = row.get(2)?;
                let confirmed: i64 = row.get(3)?;
                let resolution: Option<String> = row.get(4)?;
                Ok((qualname, file, unresolved, confirmed != 0, resolution))
            })?;

            let mut entries: Vec<CalleeEntry> = Vec::new();
            for row in rows {
                let (qualname, file, unresolved, confirmed, resolution) = row?;
                let is_unresolved = qualname.is_none();
                let name = qualname.or(unresolved).unwrap_or_default();
                let resolution = resolution.as_deref().and_then(Resolution::parse);
                if let Some(existing) = entries
                    .iter_mut()
                    .find(|e| e.name == name && e.unresolved == is_unresolved)
                {
                    existing.confirmed |= confirmed;
                    if existing.resolution.is_none() {
                        existing.resolution = resolution;
                    }
                    continue;
                }
                entries.push(CalleeEntry {
                    name,
                    file,
                    unresolved: is_unresolved,
                    confirmed,
                    resolution,
                });
            }
            Ok(entries)
        })
    }

    pub fn search_docs(&self) -> Result<Vec<SearchDoc>> {
        self.with_published(|conn, generation| {
            let mut stmt = conn.prepare(
                "SELECT s.qualname, f.path, s.start_line, t.name_terms, t.qual_terms,
                        t.doc_terms, t.qualname_folded
                 FROM search_terms t
                 JOIN symbols s ON s.id = t.symbol_id
                 JOIN files f ON f.id = s.file_id
                 WHERE t.generation = ?
                 ORDER BY s.qualname",
            )?;
            let rows = stmt.query_map(params![generation], |row| {
                Ok(SearchDoc {
                    qualname: row.get(0)?,
                    file: row.get(1)?,
                    line: row.get(2)?,
                    name_terms: split_terms(&row.get::<_, String>(3)?),
                    qual_terms: split_terms(&row.get::<_, String>(4)?),
                    doc_terms: split_terms(&row.get::<_, String>(5)?),
                    qualname_folded: row.get(6)?,
                })
            })?;
            collect_rows(rows)
        })
    }

    /// Spans of every symbol in the published generation.
    pub fn symbol_spans(&self) -> Result<(i64, Vec<SymbolSpan>)> {
        self.with_published(|conn, generation| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.qualname, f.path, s.start_line, s.end_line
                 FROM symbols s
                 JOIN files f ON f.id = s.file_id
                 WHERE s.generation = ?
                 ORDER BY f.path, s.start_line, s.end_line DESC",
            )?;
            let rows = stmt.query_map(params![generation], |row| {
                Ok(SymbolSpan {
                    id: row.get(0)?,
                    qualname: row.get(1)?,
                    file: row.get(2)?,
                    start_line: row.get(3)?,
                    end_line: row.get(4)?,
                })
            })?;
            Ok((generation, collect_rows(rows)?))
        })
    }

    /// Mark static edges witnessed by `calls` as confirmed and add trace edges
    /// for calls no static edge explains. Never removes or downgrades an edge.
    pub fn reconcile_trace(
        &self,
        generation: i64,
        calls: &[ObservedCall],
    ) -> Result<ReconcileCounts> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if published_generation(&tx)? != Some(generation) {
            return Err(Error::Consistency(
                "index was republished while the trace ran".to_string(),
            ));
        }

        let mut counts = ReconcileCounts::default();
        let mut seen = HashSet::new();
        {
            let mut candidates = tx.prepare(
                "SELECT id, callee_id, unresolved_name, confirmed
                 FROM call_edges
                 WHERE generation = ? AND caller_id = ?",
            )?;
            let mut confirm = tx.prepare("UPDATE call_edges SET confirmed = 1 WHERE id = ?")?;
            let mut insert = tx.prepare(
                "INSERT INTO call_edges (generation, caller_id, callee_id, line, resolution,
                                         origin, confirmed)
                 VALUES (?, ?, ?, ?, ?, ?, 1)",
            )?;

            for call in calls {
                if !seen.insert((call.caller_id, call.callee_id)) {
                    continue;
                }
                let callee = callee_profile(&tx, generation, call.callee_id)?;
                let edges: Vec<(i64, Option<i64>, Option<String>, bool)> =
                    collect_rows(candidates.query_map(params![generation, call.caller_id], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get::<_, i64>(3)? != 0,
                        ))
                    })?)?;

                let mut matched = false;
                for (edge_id, callee_id, unresolved, confirmed) in edges {
                    if !callee.matches(callee_id, unresolved.as_deref()) {
                        continue;
                    }
                    matched = true;
                    if !confirmed {
                        confirm.execute(params![edge_id])?;
                        counts.confirmed += 1;
                    }
                }
                if !matched {
                    insert.execute(params![
                        generation,
                        call.caller_id,
                        call.callee_id,
                        call.line,
                        Resolution::Trace.as_str(),
                        EdgeOrigin::Trace.as_str()
                    ])?;
                    counts.added += 1;
                }
            }
        }
        tx.commit()?;
        Ok(counts)
    }

    pub fn overview(&self) -> Result<RepoOverview> {
        self.with_published(|conn, generation| {
            let count = |sql: &str| -> Result<i64> {
                Ok(conn.query_row(sql, params![generation], |row| row.get(0))?)
            };
            let commit_sha: Option<String> = conn
                .query_row(
                    "SELECT commit_sha FROM generations WHERE id = ?",
                    params![generation],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            Ok(RepoOverview {
                generation,
                commit_sha,
                indexed_at: get_meta_i64(conn, LAST_INDEXED_KEY)?.unwrap_or(0),
                files: count("SELECT COUNT(*) FROM files WHERE generation = ?")?,
                symbols: count("SELECT COUNT(*) FROM symbols WHERE generation = ?")?,
                edges: count("SELECT COUNT(*) FROM call_edges WHERE generation = ?")?,
                unresolved_edges: count(
                    "SELECT COUNT(*) FROM call_edges WHERE generation = ? AND callee_id IS NULL",
                )?,
                confirmed_edges: count(
                    "SELECT COUNT(*) FROM call_edges WHERE generation = ? AND confirmed = 1",
                )?,
            })
        })
    }

    /// Content digest of the published symbol and edge sets. Row ids and the
    /// generation number are excluded, so two passes over the same tree agree.
    pub fn digest(&self) -> Result<IndexDigest> {
        self.with_published(|conn, generation| {
            let mut symbols = conn.prepare(
                "SELECT f.path, s.kind, s.name, s.qualname, s.parent_qualname, s.start_line,
                        s.end_line, s.start_byte, s.end_byte, s.signature, s.docstring,
                        s.complexity
                 FROM symbols s
                 JOIN files f ON f.id = s.file_id
                 WHERE s.generation = ?
                 ORDER BY s.qualname",
            )?;
            let symbol_rows = symbols.query_map(params![generation], |row| {
                Ok(json!([
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, i64>(11)?,
                ])
                .to_string())
            })?;
            let symbols_hash = digest_rows(symbol_rows)?;

            let mut edges = conn.prepare(
                "SELECT caller.qualname, callee.qualname, e.unresolved_name, e.line,
                        e.resolution, e.origin, e.confirmed
                 FROM call_edges e
                 JOIN symbols caller ON caller.id = e.caller_id
                 LEFT JOIN symbols callee ON callee.id = e.callee_id
                 WHERE e.generation = ?
                 ORDER BY caller.qualname, e.line, callee.qualname, e.unresolved_name, e.origin",
            )?;
            let edge_rows = edges.query_map(params![generation], |row| {
                Ok(json!([
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ])
                .to_string())
            })?;
            let edges_hash = digest_rows(edge_rows)?;

            Ok(IndexDigest {
                symbols: symbols_hash,
                edges: edges_hash,
            })
        })
    }
}

/// What an observed callee may appear as on an existing edge.
struct CalleeProfile {
    id: i64,
    name: String,
    /// Class whose constructor the callee is (`__init__`/`__new__`).
    constructed_class: Option<(i64, String)>,
}

impl CalleeProfile {
    fn matches(&self, callee_id: Option<i64>, unresolved: Option<&str>) -> bool {
        match (callee_id, unresolved) {
            (Some(id), _) => {
                id == self.id || self.constructed_class.as_ref().map(|(cid, _)| *cid) == Some(id)
            }
            (None, Some(raw)) => {
                let last = raw.rsplit('.').next().unwrap_or(raw);
                last == self.name
                    || self
                        .constructed_class
                        .as_ref()
                        .map(|(_, name)| name == last)
                        .unwrap_or(false)
            }
            (None, None) => false,
        }
    }
}

fn callee_profile(conn: &Connection, generation: i64, id: i64) -> Result<CalleeProfile> {
    let (name, kind, parent): (String, String, Option<String>) = conn
        .query_row(
            "SELECT name, kind, parent_qualname FROM symbols WHERE id = ? AND generation = ?",
            params![id, generation],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .ok_or(Error::UnknownSymbol(id))?;

    let is_constructor = SymbolKind::parse(&kind) == Some(SymbolKind::Method)
        && (name == "__init__" || name == "__new__");
    let constructed_class = match (is_constructor, parent) {
        (true, Some(parent)) => conn
            .query_row(
                "SELECT id, name FROM symbols WHERE generation = ? AND qualname = ?",
                params![generation, parent],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?,
        _ => None,
    };
    Ok(CalleeProfile {
        id,
        name,
        constructed_class,
    })
}

fn published_generation(conn: &Connection) -> Result<Option<i64>> {
    get_meta_i64(conn, PUBLISHED_KEY)
}

fn get_meta_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse::<i64>().ok()))
}

fn ensure_symbol(conn: &Connection, generation: i64, id: i64) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM symbols WHERE id = ? AND generation = ?",
            params![id, generation],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(Error::UnknownSymbol(id)),
    }
}

fn unique_match(query: &str, matches: &[(i64, String)]) -> Result<Option<i64>> {
    match matches {
        [] => Ok(None),
        [(id, _)] => Ok(Some(*id)),
        _ => Err(Error::AmbiguousSymbol {
            name: query.to_string(),
            candidates: matches.iter().map(|(_, qualname)| qualname.clone()).collect(),
        }),
    }
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    Ok(Symbol {
        id: row.get(0)?,
        file_path: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        qualname: row.get(4)?,
        parent_qualname: row.get(5)?,
        start_line: row.get(6)?,
        end_line: row.get(7)?,
        start_byte: row.get(8)?,
        end_byte: row.get(9)?,
        signature: row.get(10)?,
        docstring: row.get(11)?,
        complexity: row.get(12)?,
        generation: row.get(13)?,
    })
}

fn collect_rows<T, I>(rows: I) -> Result<Vec<T>>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn join_terms(terms: &BTreeSet<String>) -> String {
    terms.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn split_terms(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn digest_rows<I>(rows: I) -> Result<String>
where
    I: Iterator<Item = rusqlite::Result<String>>,
{
    let mut hasher = Hasher::new();
    for row in rows {
        let row = row?;
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(qualname: &str, start_line: i64, end_line: i64) -> SymbolInput {
        SymbolInput {
            kind: SymbolKind::Function,
            name: qualname.rsplit('.').next().unwrap().to_string(),
            qualname: qualname.to_string(),
            parent: None,
            start_line,
            end_line,
            start_byte: 0,
            end_byte: 0,
            signature: Some("()".to_string()),
            docstring: None,
            bases: Vec::new(),
            complexity: 1,
        }
    }

    fn file(path: &str, symbols: Vec<SymbolInput>) -> FileSnapshot {
        FileSnapshot {
            path: path.to_string(),
            hash: format!("hash-{path}"),
            size: 10,
            change_count: 4,
            churn: 2.0,
            symbols,
            cache_payload: None,
        }
    }

    fn edge(caller: &str, callee: Option<&str>, raw: Option<&str>, line: i64) -> EdgeSnapshot {
        EdgeSnapshot {
            caller: caller.to_string(),
            callee: callee.map(str::to_string),
            unresolved_name: raw.map(str::to_string),
            line,
            resolution: callee.map(|_| Resolution::Import),
            origin: EdgeOrigin::Static,
            confirmed: false,
        }
    }

    fn sample() -> Snapshot {
        Snapshot {
            commit_sha: None,
            files: vec![
                file("a.py", vec![symbol("a.f", 1, 3)]),
                file("b.py", vec![symbol("b.g", 1, 2)]),
            ],
            edges: vec![
                edge("a.f", Some("b.g"), None, 2),
                edge("a.f", None, Some("h"), 3),
            ],
        }
    }

    fn open() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::new(&dir.path().join("index.sqlite")).unwrap();
        (dir, db)
    }

    #[test]
    fn queries_before_publish_are_not_indexed() {
        let (_dir, db) = open();
        assert!(matches!(db.resolve_symbol("f"), Err(Error::NotIndexed)));
        assert!(matches!(db.hotspot_candidates(), Err(Error::NotIndexed)));
        assert_eq!(db.published_generation().unwrap(), None);
    }

    #[test]
    fn publish_swaps_generation_and_drops_old_rows() {
        let (_dir, db) = open();
        let first = db.publish(&sample()).unwrap();
        let second = db.publish(&sample()).unwrap();
        assert!(second > first);
        assert_eq!(db.published_generation().unwrap(), Some(second));

        let conn = db.read_conn().unwrap();
        let stale: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM symbols WHERE generation = ?",
                params![first],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);
        let overview = db.overview().unwrap();
        assert_eq!(overview.symbols, 2);
        assert_eq!(overview.edges, 2);
        assert_eq!(overview.unresolved_edges, 1);
    }

    #[test]
    fn dangling_edge_rolls_back_the_pass() {
        let (_dir, db) = open();
        let published = db.publish(&sample()).unwrap();
        let before = db.digest().unwrap();

        let mut broken = sample();
        broken.edges.push(edge("a.f", Some("c.missing"), None, 3));
        assert!(matches!(db.publish(&broken), Err(Error::Consistency(_))));

        assert_eq!(db.published_generation().unwrap(), Some(published));
        assert_eq!(db.digest().unwrap(), before);
    }

    #[test]
    fn duplicate_qualnames_are_rejected() {
        let (_dir, db) = open();
        let mut broken = sample();
        broken.files.push(file("c.py", vec![symbol("a.f", 1, 1)]));
        assert!(matches!(db.publish(&broken), Err(Error::Consistency(_))));
        assert_eq!(db.published_generation().unwrap(), None);
    }

    #[test]
    fn resolve_symbol_prefers_exact_then_name_then_suffix() {
        let (_dir, db) = open();
        let mut snapshot = sample();
        snapshot
            .files
            .push(file("c.py", vec![symbol("c.g", 1, 1), symbol("c.only", 2, 2)]));
        snapshot.files.push(file(
            "d.py",
            vec![symbol("d.Box.run", 1, 2), symbol("d.Crate.run", 3, 4)],
        ));
        db.publish(&snapshot).unwrap();

        let exact = db.resolve_symbol("b.g").unwrap().unwrap();
        assert_eq!(db.symbol(exact).unwrap().qualname, "b.g");
        let by_name = db.resolve_symbol("only").unwrap().unwrap();
        assert_eq!(db.symbol(by_name).unwrap().qualname, "c.only");
        match db.resolve_symbol("g") {
            Err(Error::AmbiguousSymbol { candidates, .. }) => {
                assert_eq!(candidates, vec!["b.g".to_string(), "c.g".to_string()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        let suffixed = db.resolve_symbol("Box.run").unwrap().unwrap();
        assert_eq!(db.symbol(suffixed).unwrap().qualname, "d.Box.run");
        assert!(matches!(
            db.resolve_symbol("run"),
            Err(Error::AmbiguousSymbol { .. })
        ));
        assert_eq!(db.resolve_symbol("nothing").unwrap(), None);
    }

    #[test]
    fn reconcile_confirms_matching_edges_and_adds_missing_ones() {
        let (_dir, db) = open();
        let mut snapshot = sample();
        snapshot.files[0].symbols.push(symbol("a.h", 5, 6));
        db.publish(&snapshot).unwrap();
        let (generation, spans) = db.symbol_spans().unwrap();
        let id = |name: &str| spans.iter().find(|s| s.qualname == name).unwrap().id;

        let calls = [
            ObservedCall { caller_id: id("a.f"), callee_id: id("b.g"), line: 2 },
            ObservedCall { caller_id: id("a.f"), callee_id: id("a.h"), line: 3 },
            ObservedCall { caller_id: id("b.g"), callee_id: id("a.h"), line: 2 },
        ];
        let counts = db.reconcile_trace(generation, &calls).unwrap();
        assert_eq!(counts, ReconcileCounts { confirmed: 2, added: 1 });

        let callees = db.callees(id("a.f")).unwrap();
        assert!(callees.iter().all(|c| c.confirmed));
        let added = db.callees(id("b.g")).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].resolution, Some(Resolution::Trace));

        let again = db.reconcile_trace(generation, &calls).unwrap();
        assert_eq!(again, ReconcileCounts { confirmed: 0, added: 0 });

        let carry = db.trace_carry_over().unwrap();
        assert!(carry.confirmed.contains(&("a.f".to_string(), "b.g".to_string())));
        assert!(carry.confirmed.contains(&("a.f".to_string(), "h".to_string())));
        assert_eq!(carry.trace_edges, vec![("b.g".to_string(), "a.h".to_string(), 2)]);
    }

    #[test]
    fn unknown_ids_are_typed_errors() {
        let (_dir, db) = open();
        db.publish(&sample()).unwrap();
        assert!(matches!(db.callers(9999), Err(Error::UnknownSymbol(9999))));
        assert!(matches!(db.symbol(9999), Err(Error::UnknownSymbol(9999))));
    }
}
