//! Logging initialization for the ttmm binary.
//!
//! Logs go to STDERR so that command output on STDOUT stays clean for
//! piping (`--json`). `RUST_LOG` overrides the default `info` level;
//! `--verbose` forces `debug`.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
