use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Repository root is missing, not a directory, or unreadable.
    #[error("repository root {path:?} is not usable: {reason}")]
    RepoRoot { path: PathBuf, reason: String },

    /// A query ran before any index pass was published.
    #[error("repository has not been indexed yet")]
    NotIndexed,

    #[error("symbol '{name}' is ambiguous: {}", .candidates.join(", "))]
    AmbiguousSymbol {
        name: String,
        candidates: Vec<String>,
    },

    #[error("symbol id {0} does not exist in the published index")]
    UnknownSymbol(i64),

    /// An index pass tried to publish data that breaks a store invariant.
    /// The pass is rolled back; the previous generation stays published.
    #[error("store consistency violation: {0}")]
    Consistency(String),

    #[error("invalid entry point '{0}'")]
    InvalidEntryPoint(String),

    #[error("could not launch trace interpreter '{program}': {source}")]
    TraceLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git history unavailable: {0}")]
    Git(String),

    #[error("sqlite error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parser setup failed: {0}")]
    Parser(#[from] tree_sitter::LanguageError),
}
