use crate::config::Config;
use crate::db::{Db, EdgeSnapshot, FileSnapshot, Snapshot, TraceCarryOver};
use crate::error::Result;
use crate::git_mining;
use crate::indexer::extract::{ExtractedFile, LanguageExtractor};
use crate::indexer::python::PythonExtractor;
use crate::indexer::resolve::{ResolvedEdge, Resolver};
use crate::indexer::scan::ScannedFile;
use crate::metrics;
use crate::model::{EdgeOrigin, IndexReport, IndexWarning, Resolution};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub mod extract;
pub mod python;
pub mod resolve;
pub mod scan;

/// Extraction of one scanned file, fresh or from the cache.
struct Extraction {
    file: ScannedFile,
    extracted: ExtractedFile,
    from_cache: bool,
}

pub struct Indexer {
    repo_root: PathBuf,
    db: Db,
}

impl Indexer {
    pub fn new(repo_root: &Path, db_path: &Path) -> Result<Self> {
        let repo_root = crate::util::canonical_repo_root(repo_root)?;
        let db = Db::new(db_path)?;
        Ok(Self { repo_root, db })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// One full index pass: scan, extract, resolve, measure, publish.
    /// Nothing becomes visible to readers until the final publish commits.
    pub fn reindex(&self) -> Result<IndexReport> {
        let started = Instant::now();
        let config = Config::get();
        crate::util::canonical_repo_root(&self.repo_root)?;

        let scan::ScanOutcome {
            files: scanned,
            skipped,
        } = scan::scan_repo(&self.repo_root)?;
        tracing::debug!(
            "scanned {} python files, {} unreadable",
            scanned.len(),
            skipped.len()
        );
        let mut warnings = skipped;

        let extractions = self.extract_all(scanned, config, &mut warnings)?;
        let extractions = drop_colliding_files(extractions, &mut warnings);

        let change_counts = match git_mining::mine_change_counts(
            &self.repo_root,
            config.churn_max_commits,
            config.churn_since_days,
        ) {
            Ok(counts) => counts,
            Err(err) => {
                warnings.push(IndexWarning {
                    path: ".".to_string(),
                    message: format!("churn unavailable, using zero: {err}"),
                });
                HashMap::new()
            }
        };

        let (files, extracted): (Vec<(ScannedFile, bool)>, Vec<ExtractedFile>) = extractions
            .into_iter()
            .map(|e| ((e.file, e.from_cache), e.extracted))
            .unzip();

        let resolver = Resolver::new(&extracted);
        let resolved = resolver.resolve_all(&extracted);
        let module_level_calls: usize = extracted.iter().map(|f| f.module_level_calls).sum();
        tracing::debug!("{module_level_calls} module-level call sites are not graph edges");

        let carry = self.db.trace_carry_over()?;
        let qualnames: HashSet<&str> = extracted
            .iter()
            .flat_map(|f| f.symbols.iter().map(|s| s.qualname.as_str()))
            .collect();
        let edges = carry_trace_evidence(resolved, &carry, &qualnames);

        let mut snapshot = Snapshot {
            commit_sha: crate::util::git_head_sha(&self.repo_root),
            files: Vec::with_capacity(files.len()),
            edges,
        };
        let mut files_reused = 0;
        for ((file, from_cache), extracted) in files.into_iter().zip(extracted) {
            if from_cache {
                files_reused += 1;
            }
            let change_count = change_counts.get(&file.rel_path).copied().unwrap_or(0);
            let cache_payload = if from_cache {
                None
            } else {
                Some(serde_json::to_string(&extracted)?)
            };
            snapshot.files.push(FileSnapshot {
                path: file.rel_path,
                hash: file.hash,
                size: file.size,
                change_count,
                churn: metrics::churn_score(change_count),
                symbols: extracted.symbols,
                cache_payload,
            });
        }

        let generation = self.db.publish(&snapshot)?;

        for warning in &warnings {
            tracing::warn!("{}: {}", warning.path, warning.message);
        }
        let report = IndexReport {
            files_indexed: snapshot.files.len(),
            files_reused,
            symbols_indexed: snapshot.files.iter().map(|f| f.symbols.len()).sum(),
            edges: snapshot.edges.len(),
            unresolved_edges: snapshot.edges.iter().filter(|e| e.callee.is_none()).count(),
            generation,
            duration_ms: started.elapsed().as_millis(),
            warnings,
        };
        tracing::info!(
            "indexed {} files ({} reused), {} symbols, {} edges ({} unresolved) in {}ms",
            report.files_indexed,
            report.files_reused,
            report.symbols_indexed,
            report.edges,
            report.unresolved_edges,
            report.duration_ms
        );
        Ok(report)
    }

    /// Serve unchanged files from the cache and parse the rest in parallel.
    /// Returns extractions in scan order; failures become warnings.
    fn extract_all(
        &self,
        scanned: Vec<ScannedFile>,
        config: &Config,
        warnings: &mut Vec<IndexWarning>,
    ) -> Result<Vec<Extraction>> {
        let keys: Vec<(String, String)> = scanned
            .iter()
            .map(|f| (f.rel_path.clone(), f.hash.clone()))
            .collect();
        let mut cached = self.db.load_cached_extractions(&keys)?;
        let max_bytes = config.max_file_mb.saturating_mul(1024 * 1024) as i64;

        let mut to_parse = Vec::new();
        let mut slots: Vec<Option<Extraction>> = Vec::with_capacity(scanned.len());
        for file in scanned {
            if let Some(extracted) = cached.remove(&(file.rel_path.clone(), file.hash.clone())) {
                slots.push(Some(Extraction {
                    file,
                    extracted,
                    from_cache: true,
                }));
                continue;
            }
            if file.size > max_bytes {
                warnings.push(IndexWarning {
                    path: file.rel_path.clone(),
                    message: format!("skipped: larger than {} MB", config.max_file_mb),
                });
                continue;
            }
            to_parse.push((slots.len(), file));
            slots.push(None);
        }

        let parsed = extract_parallel(&to_parse, config.index_threads);
        for ((slot, file), outcome) in to_parse.into_iter().zip(parsed) {
            match outcome {
                Ok(extracted) => {
                    tracing::debug!(
                        "extracted {}: {} symbols, {} calls",
                        file.rel_path,
                        extracted.symbols.len(),
                        extracted.calls.len()
                    );
                    slots[slot] = Some(Extraction {
                        file,
                        extracted,
                        from_cache: false,
                    });
                }
                Err(message) => warnings.push(IndexWarning {
                    path: file.rel_path,
                    message: format!("skipped: {message}"),
                }),
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Parse files on a rayon pool; each worker owns one parser.
fn extract_parallel(
    files: &[(usize, ScannedFile)],
    threads: usize,
) -> Vec<std::result::Result<ExtractedFile, String>> {
    let work = || {
        files
            .par_iter()
            .map_init(
                || PythonExtractor::new().ok(),
                |extractor, (_, file)| extract_file(extractor.as_mut(), file),
            )
            .collect::<Vec<_>>()
    };
    if threads > 0 {
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => return pool.install(work),
            Err(err) => tracing::warn!("falling back to the global thread pool: {err}"),
        }
    }
    work()
}

fn extract_file(
    extractor: Option<&mut PythonExtractor>,
    file: &ScannedFile,
) -> std::result::Result<ExtractedFile, String> {
    let extractor = extractor.ok_or_else(|| "python parser unavailable".to_string())?;
    let bytes = fs::read(&file.abs_path).map_err(|err| err.to_string())?;
    let source = String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?;
    let module = extractor.module_info(&file.rel_path);
    extractor
        .extract(&source, &module)
        .map_err(|failure| failure.message)
}

/// Qualified names are unique per generation: a file defining a name an
/// earlier file (in path order) already defines is skipped whole.
fn drop_colliding_files(
    extractions: Vec<Extraction>,
    warnings: &mut Vec<IndexWarning>,
) -> Vec<Extraction> {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut kept = Vec::with_capacity(extractions.len());
    for extraction in extractions {
        let clash = extraction
            .extracted
            .symbols
            .iter()
            .find_map(|s| owners.get(&s.qualname).map(|owner| (s.qualname.clone(), owner.clone())));
        if let Some((qualname, owner)) = clash {
            warnings.push(IndexWarning {
                path: extraction.file.rel_path.clone(),
                message: format!("skipped: {qualname} is already defined in {owner}"),
            });
            continue;
        }
        for symbol in &extraction.extracted.symbols {
            owners.insert(symbol.qualname.clone(), extraction.file.rel_path.clone());
        }
        kept.push(extraction);
    }
    kept
}

/// Static edges plus the previous generation's trace evidence: confirmations
/// carry over by (caller, callee) and trace-only edges are kept while both
/// endpoints still exist and no static edge now explains them.
fn carry_trace_evidence(
    resolved: Vec<ResolvedEdge>,
    carry: &TraceCarryOver,
    qualnames: &HashSet<&str>,
) -> Vec<EdgeSnapshot> {
    let mut edges: Vec<EdgeSnapshot> = resolved
        .into_iter()
        .map(|edge| {
            let target = edge
                .callee
                .clone()
                .or_else(|| edge.unresolved_name.clone())
                .unwrap_or_default();
            let confirmed = carry.confirmed.contains(&(edge.caller.clone(), target));
            EdgeSnapshot {
                caller: edge.caller,
                callee: edge.callee,
                unresolved_name: edge.unresolved_name,
                line: edge.line,
                resolution: edge.resolution,
                origin: EdgeOrigin::Static,
                confirmed,
            }
        })
        .collect();

    let explained: HashSet<(String, String)> = edges
        .iter()
        .filter_map(|e| e.callee.clone().map(|callee| (e.caller.clone(), callee)))
        .collect();
    for (caller, callee, line) in &carry.trace_edges {
        if !qualnames.contains(caller.as_str()) || !qualnames.contains(callee.as_str()) {
            continue;
        }
        if explained.contains(&(caller.clone(), callee.clone())) {
            continue;
        }
        edges.push(EdgeSnapshot {
            caller: caller.clone(),
            callee: Some(callee.clone()),
            unresolved_name: None,
            line: *line,
            resolution: Some(Resolution::Trace),
            origin: EdgeOrigin::Trace,
            confirmed: true,
        });
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(caller: &str, callee: Option<&str>, raw: Option<&str>) -> ResolvedEdge {
        ResolvedEdge {
            caller: caller.to_string(),
            callee: callee.map(str::to_string),
            unresolved_name: raw.map(str::to_string),
            line: 2,
            resolution: callee.map(|_| Resolution::Scope),
        }
    }

    #[test]
    fn trace_evidence_survives_when_endpoints_persist() {
        let mut carry = TraceCarryOver::default();
        carry.confirmed.insert(("a.f".into(), "a.g".into()));
        carry.confirmed.insert(("a.f".into(), "h".into()));
        carry.trace_edges.push(("a.f".into(), "a.k".into(), 4));
        carry.trace_edges.push(("a.f".into(), "a.gone".into(), 5));
        carry.trace_edges.push(("a.f".into(), "a.g".into(), 6));

        let qualnames: HashSet<&str> = ["a.f", "a.g", "a.k"].into_iter().collect();
        let edges = carry_trace_evidence(
            vec![
                resolved("a.f", Some("a.g"), None),
                resolved("a.f", None, Some("h")),
                resolved("a.f", None, Some("other")),
            ],
            &carry,
            &qualnames,
        );

        let confirmed: Vec<bool> = edges.iter().map(|e| e.confirmed).collect();
        assert_eq!(confirmed, vec![true, true, false, true]);
        assert_eq!(edges.len(), 4);
        assert_eq!(edges[3].callee.as_deref(), Some("a.k"));
        assert_eq!(edges[3].origin, EdgeOrigin::Trace);
    }
}
