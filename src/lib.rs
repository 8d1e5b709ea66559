pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod git_mining;
pub mod hotspots;
pub mod indexer;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod search;
pub mod tracer;
pub mod util;

pub use engine::Engine;
pub use error::{Error, Result};
