use crate::db::Db;
use crate::error::Result;
use crate::hotspots;
use crate::indexer::Indexer;
use crate::model::{
    Answer, CalleeEntry, CallerEntry, Hotspot, IndexDigest, IndexReport, RepoOverview, Symbol,
    TraceReport,
};
use crate::search;
use crate::tracer::{self, EntryPoint, PythonRunner, TraceRunner};
use std::path::{Path, PathBuf};

pub fn default_db_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".ttmm").join("index.sqlite")
}

/// The surface consumers of an index use: one repository, one store.
pub struct Engine {
    indexer: Indexer,
}

impl Engine {
    /// Open the index for `repo_root`, stored under `<repo>/.ttmm/`.
    pub fn open(repo_root: &Path) -> Result<Self> {
        let root = crate::util::canonical_repo_root(repo_root)?;
        let db_path = default_db_path(&root);
        Self::open_with_db(&root, &db_path)
    }

    pub fn open_with_db(repo_root: &Path, db_path: &Path) -> Result<Self> {
        Ok(Self {
            indexer: Indexer::new(repo_root, db_path)?,
        })
    }

    pub fn repo_root(&self) -> &Path {
        self.indexer.repo_root()
    }

    pub fn db(&self) -> &Db {
        self.indexer.db()
    }

    pub fn index(&self) -> Result<IndexReport> {
        self.indexer.reindex()
    }

    pub fn hotspots(&self, top_k: usize) -> Result<Vec<Hotspot>> {
        let candidates = self.db().hotspot_candidates()?;
        Ok(hotspots::rank(candidates, top_k))
    }

    pub fn resolve_symbol(&self, name: &str) -> Result<Option<i64>> {
        self.db().resolve_symbol(name)
    }

    pub fn symbol(&self, id: i64) -> Result<Symbol> {
        self.db().symbol(id)
    }

    pub fn callers(&self, id: i64) -> Result<Vec<CallerEntry>> {
        self.db().callers(id)
    }

    pub fn callees(&self, id: i64) -> Result<Vec<CalleeEntry>> {
        self.db().callees(id)
    }

    pub fn answer(&self, query: &str, top_k: usize) -> Result<Vec<Answer>> {
        let docs = self.db().search_docs()?;
        Ok(search::rank(query, docs, top_k))
    }

    /// Trace `entry` with the configured Python interpreter.
    pub fn trace(&self, entry: &EntryPoint, args: &[String]) -> Result<TraceReport> {
        self.trace_with(&PythonRunner::from_config(), entry, args)
    }

    pub fn trace_with(
        &self,
        runner: &dyn TraceRunner,
        entry: &EntryPoint,
        args: &[String],
    ) -> Result<TraceReport> {
        tracer::run_trace(self.db(), self.repo_root(), runner, entry, args)
    }

    pub fn overview(&self) -> Result<RepoOverview> {
        self.db().overview()
    }

    pub fn digest(&self) -> Result<IndexDigest> {
        self.db().digest()
    }
}
