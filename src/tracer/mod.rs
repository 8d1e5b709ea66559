//! Runtime tracing: run an entry point under instrumentation, map the
//! observed calls onto indexed symbols and reconcile them with the static
//! call graph.

use crate::db::{Db, ObservedCall, SymbolSpan};
use crate::error::{Error, Result};
use crate::model::{TraceFailure, TraceObservation, TraceReport};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub mod python;

pub use python::PythonRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    /// Absolute, or relative to the repository root.
    pub path: PathBuf,
    pub line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A function was entered. `callee.line` is the first line of its definition.
    Call {
        caller: CodeLocation,
        callee: CodeLocation,
        callee_name: String,
    },
    /// The traced program raised or exited non-zero. Terminal.
    Failure(TraceFailure),
}

pub trait TraceObserver {
    fn on_event(&mut self, event: TraceEvent);
}

/// Executes an entry point and reports what happened as events. Implementations
/// return `Err` only when the program could not be run at all.
pub trait TraceRunner {
    fn run(
        &self,
        repo_root: &Path,
        entry: &EntryPoint,
        args: &[String],
        observer: &mut dyn TraceObserver,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// `pkg.module:function`, called with the string arguments.
    Function { module: String, function: String },
    /// `pkg.module`, run as `__main__`.
    Module { module: String },
    /// A script path, run as `__main__`.
    Script { path: PathBuf },
}

impl EntryPoint {
    /// Parse `pkg.module:function` or `pkg.module`.
    pub fn parse_target(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = || Error::InvalidEntryPoint(raw.to_string());
        let valid_path = |path: &str| {
            !path.is_empty()
                && path.split('.').all(|part| {
                    let mut chars = part.chars();
                    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
                        && chars.all(|c| c.is_alphanumeric() || c == '_')
                })
        };
        match raw.split_once(':') {
            Some((module, function)) => {
                if !valid_path(module) || !valid_path(function) {
                    return Err(invalid());
                }
                Ok(EntryPoint::Function {
                    module: module.to_string(),
                    function: function.to_string(),
                })
            }
            None if valid_path(raw) => Ok(EntryPoint::Module {
                module: raw.to_string(),
            }),
            None => Err(invalid()),
        }
    }

    pub fn script(path: impl Into<PathBuf>) -> Self {
        EntryPoint::Script { path: path.into() }
    }

    /// Runner mode and target as passed to the interpreter bootstrap.
    pub fn mode_and_target(&self) -> (&'static str, String) {
        match self {
            EntryPoint::Function { module, function } => {
                ("function", format!("{module}:{function}"))
            }
            EntryPoint::Module { module } => ("module", module.clone()),
            EntryPoint::Script { path } => ("script", path.to_string_lossy().to_string()),
        }
    }
}

/// Maps code locations onto symbol spans of one generation.
pub struct SymbolLocator {
    repo_root: PathBuf,
    by_file: HashMap<String, Vec<SymbolSpan>>,
}

impl SymbolLocator {
    pub fn new(repo_root: &Path, spans: Vec<SymbolSpan>) -> Self {
        let mut by_file: HashMap<String, Vec<SymbolSpan>> = HashMap::new();
        for span in spans {
            by_file.entry(span.file.clone()).or_default().push(span);
        }
        Self {
            repo_root: repo_root.to_path_buf(),
            by_file,
        }
    }

    fn rel_path(&self, path: &Path) -> Option<String> {
        if path.is_absolute() {
            crate::util::normalize_rel_path(&self.repo_root, path)
        } else {
            Some(crate::util::normalize_path(path))
        }
    }

    /// Innermost symbol whose span contains `location`.
    pub fn enclosing(&self, location: &CodeLocation) -> Option<&SymbolSpan> {
        let spans = self.by_file.get(&self.rel_path(&location.path)?)?;
        spans
            .iter()
            .filter(|s| s.start_line <= location.line && location.line <= s.end_line)
            .min_by_key(|s| (s.end_line - s.start_line, std::cmp::Reverse(s.start_line)))
    }

    /// Symbol defined at `location`: one starting on that line, else the
    /// innermost one containing it.
    pub fn defined_at(&self, location: &CodeLocation) -> Option<&SymbolSpan> {
        let spans = self.by_file.get(&self.rel_path(&location.path)?)?;
        spans
            .iter()
            .filter(|s| s.start_line == location.line)
            .min_by_key(|s| s.end_line - s.start_line)
            .or_else(|| self.enclosing(location))
    }
}

/// Observer that maps events onto symbols as they arrive.
pub struct TraceCollector {
    locator: SymbolLocator,
    calls: Vec<ObservedCall>,
    seen: HashSet<TraceObservation>,
    observations: Vec<TraceObservation>,
    unmapped_calls: usize,
    failure: Option<TraceFailure>,
}

impl TraceCollector {
    pub fn new(locator: SymbolLocator) -> Self {
        Self {
            locator,
            calls: Vec::new(),
            seen: HashSet::new(),
            observations: Vec::new(),
            unmapped_calls: 0,
            failure: None,
        }
    }
}

impl TraceObserver for TraceCollector {
    fn on_event(&mut self, event: TraceEvent) {
        match event {
            TraceEvent::Call { caller, callee, .. } => {
                let mapped = self
                    .locator
                    .enclosing(&caller)
                    .zip(self.locator.defined_at(&callee));
                let Some((caller_span, callee_span)) = mapped else {
                    self.unmapped_calls += 1;
                    return;
                };
                let observation = TraceObservation {
                    caller: caller_span.qualname.clone(),
                    callee: callee_span.qualname.clone(),
                    file: caller_span.file.clone(),
                    call_line: caller.line,
                };
                self.calls.push(ObservedCall {
                    caller_id: caller_span.id,
                    callee_id: callee_span.id,
                    line: caller.line,
                });
                if self.seen.insert(observation.clone()) {
                    self.observations.push(observation);
                }
            }
            TraceEvent::Failure(failure) => {
                if self.failure.is_none() {
                    self.failure = Some(failure);
                }
            }
        }
    }
}

/// Run `entry` with `runner`, then commit what was observed. Calls observed
/// before a failure in the traced program are committed too.
pub fn run_trace(
    db: &Db,
    repo_root: &Path,
    runner: &dyn TraceRunner,
    entry: &EntryPoint,
    args: &[String],
) -> Result<TraceReport> {
    let (generation, spans) = db.symbol_spans()?;
    let mut collector = TraceCollector::new(SymbolLocator::new(repo_root, spans));

    tracing::info!("tracing {:?}", entry);
    let outcome = runner.run(repo_root, entry, args, &mut collector);
    let counts = db.reconcile_trace(generation, &collector.calls)?;
    outcome?;

    if let Some(failure) = &collector.failure {
        tracing::warn!("traced program failed: {}: {}", failure.exc_type, failure.message);
    }
    tracing::info!(
        "trace observed {} calls ({} unmapped), confirmed {} edges, added {}",
        collector.calls.len(),
        collector.unmapped_calls,
        counts.confirmed,
        counts.added
    );

    Ok(TraceReport {
        edges_confirmed: counts.confirmed,
        edges_added: counts.added,
        observations: collector.observations,
        unmapped_calls: collector.unmapped_calls,
        failure: collector.failure,
    })
}
