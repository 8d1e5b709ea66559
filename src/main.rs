use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use ttmm::cli::{self, Command, RepoArgs};
use ttmm::tracer::EntryPoint;
use ttmm::{Engine, logging};

fn open_engine(repo: &RepoArgs) -> Result<Engine> {
    let engine = match &repo.db {
        Some(db_path) => Engine::open_with_db(&repo.repo, db_path),
        None => Engine::open(&repo.repo),
    };
    engine.with_context(|| format!("failed to open index for {}", repo.repo.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve a user-supplied symbol name; prints `not found` and returns `None`
/// when nothing matches.
fn lookup(engine: &Engine, name: &str) -> Result<Option<i64>> {
    let id = engine.resolve_symbol(name)?;
    if id.is_none() {
        println!("not found: {name}");
    }
    Ok(id)
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    logging::init(args.verbose);

    match args.command {
        Command::Index { repo } => {
            let engine = open_engine(&repo)?;
            let report = engine.index()?;
            for warning in &report.warnings {
                tracing::warn!("{}: {}", warning.path, warning.message);
            }
            if repo.json {
                return print_json(&report);
            }
            println!(
                "generation {}: {} files ({} reused), {} symbols, {} edges ({} unresolved) in {} ms",
                report.generation,
                report.files_indexed,
                report.files_reused,
                report.symbols_indexed,
                report.edges,
                report.unresolved_edges,
                report.duration_ms,
            );
            Ok(())
        }
        Command::Hotspots { repo, limit } => {
            let engine = open_engine(&repo)?;
            let hotspots = engine.hotspots(limit)?;
            if repo.json {
                return print_json(&hotspots);
            }
            for hotspot in hotspots {
                println!(
                    "{} ({}:{}) complexity={} churn={:.2} score={:.2}",
                    hotspot.qualified_name,
                    hotspot.file,
                    hotspot.line,
                    hotspot.complexity,
                    hotspot.churn,
                    hotspot.score,
                );
            }
            Ok(())
        }
        Command::Callers { repo, symbol } => {
            let engine = open_engine(&repo)?;
            let Some(id) = lookup(&engine, &symbol)? else {
                return Ok(());
            };
            let callers = engine.callers(id)?;
            if repo.json {
                return print_json(&callers);
            }
            for caller in callers {
                println!("{} ({})", caller.qualified_name, caller.file);
            }
            Ok(())
        }
        Command::Callees { repo, symbol } => {
            let engine = open_engine(&repo)?;
            let Some(id) = lookup(&engine, &symbol)? else {
                return Ok(());
            };
            let callees = engine.callees(id)?;
            if repo.json {
                return print_json(&callees);
            }
            for callee in callees {
                let location = callee.file.as_deref().unwrap_or("?");
                let mut tags = Vec::new();
                if callee.unresolved {
                    tags.push("unresolved".to_string());
                }
                if let Some(resolution) = callee.resolution {
                    tags.push(resolution.as_str().to_string());
                }
                if callee.confirmed {
                    tags.push("confirmed".to_string());
                }
                println!("{} ({}) [{}]", callee.name, location, tags.join(", "));
            }
            Ok(())
        }
        Command::Answer {
            repo,
            question,
            limit,
        } => {
            let engine = open_engine(&repo)?;
            let answers = engine.answer(&question, limit)?;
            if repo.json {
                return print_json(&answers);
            }
            for answer in answers {
                println!(
                    "{} ({}:{}) score={:.1}",
                    answer.qualified_name, answer.file, answer.line, answer.score
                );
            }
            Ok(())
        }
        Command::Trace {
            repo,
            module,
            script,
            args,
        } => {
            let entry = match (module, script) {
                (Some(target), _) => EntryPoint::parse_target(&target)?,
                (None, Some(path)) => EntryPoint::script(path),
                (None, None) => anyhow::bail!("trace needs --module or --script"),
            };
            let engine = open_engine(&repo)?;
            let report = engine.trace(&entry, &args)?;
            if repo.json {
                return print_json(&report);
            }
            println!(
                "{} edges confirmed, {} edges added, {} distinct calls observed, {} unmapped",
                report.edges_confirmed,
                report.edges_added,
                report.observations.len(),
                report.unmapped_calls,
            );
            if let Some(failure) = &report.failure {
                println!("program failed: {}: {}", failure.exc_type, failure.message);
                if let Some(traceback) = &failure.traceback {
                    println!("{traceback}");
                }
            }
            Ok(())
        }
        Command::Overview { repo } => {
            let engine = open_engine(&repo)?;
            let overview = engine.overview()?;
            if repo.json {
                return print_json(&overview);
            }
            println!(
                "generation {} (commit {})",
                overview.generation,
                overview.commit_sha.as_deref().unwrap_or("none")
            );
            println!(
                "{} files, {} symbols, {} edges ({} unresolved, {} confirmed)",
                overview.files,
                overview.symbols,
                overview.edges,
                overview.unresolved_edges,
                overview.confirmed_edges,
            );
            Ok(())
        }
    }
}
