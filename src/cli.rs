use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ttmm",
    version,
    about = "Time to mental model: call graph, hotspots and traces for Python repositories",
    after_help = r#"Examples:
  ttmm index --repo .
  ttmm hotspots --limit 20
  ttmm callers app.models.User.save
  ttmm callees handle_request --json
  ttmm answer "where is the config loaded"
  ttmm trace --module app.cli:main -- --dry-run
  ttmm trace --script scripts/seed.py
"#
)]
pub struct Args {
    /// Log at debug level.
    #[arg(long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Clone)]
pub struct RepoArgs {
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Print pretty JSON instead of text lines.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Index the repository and publish a new generation.
    Index {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Rank functions and methods by complexity and churn.
    Hotspots {
        #[command(flatten)]
        repo: RepoArgs,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List the callers of a symbol.
    Callers {
        #[command(flatten)]
        repo: RepoArgs,
        /// Qualified name, simple name or dotted suffix.
        symbol: String,
    },
    /// List the callees of a symbol, resolved and unresolved.
    Callees {
        #[command(flatten)]
        repo: RepoArgs,
        /// Qualified name, simple name or dotted suffix.
        symbol: String,
    },
    /// Keyword search over symbol names and docstrings.
    Answer {
        #[command(flatten)]
        repo: RepoArgs,
        question: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Run an entry point under the tracer and reconcile the call graph.
    Trace {
        #[command(flatten)]
        repo: RepoArgs,
        /// `pkg.module:function`, or `pkg.module` to run it as `__main__`.
        #[arg(long, conflicts_with = "script", required_unless_present = "script")]
        module: Option<String>,
        /// Script path, relative to the repository root.
        #[arg(long)]
        script: Option<PathBuf>,
        /// Arguments passed to the entry point.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Print counts for the published generation.
    Overview {
        #[command(flatten)]
        repo: RepoArgs,
    },
}
