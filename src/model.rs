use serde::{Deserialize, Serialize};

/// Which resolver rule produced a resolved edge, or `Trace` for edges only
/// a runtime observation witnessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Scope,
    Import,
    Receiver,
    Trace,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Scope => "scope",
            Resolution::Import => "import",
            Resolution::Receiver => "receiver",
            Resolution::Trace => "trace",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scope" => Some(Resolution::Scope),
            "import" => Some(Resolution::Import),
            "receiver" => Some(Resolution::Receiver),
            "trace" => Some(Resolution::Trace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeOrigin {
    Static,
    Trace,
}

impl EdgeOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeOrigin::Static => "static",
            EdgeOrigin::Trace => "trace",
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Symbol {
    pub id: i64,
    pub file_path: String,
    pub kind: String,
    pub name: String,
    pub qualname: String,
    pub parent_qualname: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub complexity: i64,
    pub generation: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct IndexWarning {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct IndexReport {
    pub files_indexed: usize,
    /// Files whose extraction was served from the content-hash cache.
    pub files_reused: usize,
    pub symbols_indexed: usize,
    pub edges: usize,
    pub unresolved_edges: usize,
    pub generation: i64,
    pub duration_ms: u128,
    pub warnings: Vec<IndexWarning>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Hotspot {
    pub qualified_name: String,
    pub file: String,
    pub line: i64,
    pub complexity: i64,
    pub churn: f64,
    pub score: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CallerEntry {
    pub qualified_name: String,
    pub file: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CalleeEntry {
    /// Qualified name of the resolved callee, or the raw callee text.
    pub name: String,
    pub file: Option<String>,
    pub unresolved: bool,
    pub confirmed: bool,
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Answer {
    pub qualified_name: String,
    pub file: String,
    pub line: i64,
    pub score: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq, Hash)]
pub struct TraceObservation {
    pub caller: String,
    pub callee: String,
    /// File of the call site.
    pub file: String,
    pub call_line: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TraceFailure {
    pub exc_type: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct TraceReport {
    pub edges_confirmed: usize,
    pub edges_added: usize,
    pub observations: Vec<TraceObservation>,
    /// Call events whose caller or callee location maps to no indexed symbol.
    pub unmapped_calls: usize,
    pub failure: Option<TraceFailure>,
}

#[derive(Debug, Serialize, Clone)]
pub struct RepoOverview {
    pub generation: i64,
    pub commit_sha: Option<String>,
    pub indexed_at: i64,
    pub files: i64,
    pub symbols: i64,
    pub edges: i64,
    pub unresolved_edges: i64,
    pub confirmed_edges: i64,
}

/// Generation-independent digest of the published symbol and edge sets.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct IndexDigest {
    pub symbols: String,
    pub edges: String,
}
