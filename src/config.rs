// Configuration module for ttmm
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database read pool size (TTMM_POOL_SIZE)
    pub pool_size: u32,

    /// Database read pool minimum idle connections (TTMM_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Interpreter used to run traced programs (TTMM_PYTHON)
    pub python: String,

    /// Maximum number of commits inspected for churn (TTMM_CHURN_MAX_COMMITS)
    pub churn_max_commits: usize,

    /// Optional history window in days (TTMM_CHURN_SINCE_DAYS); unset means all history
    pub churn_since_days: Option<u32>,

    /// Extraction worker threads (TTMM_INDEX_THREADS); 0 uses the rayon default
    pub index_threads: usize,

    /// Files larger than this are skipped with a warning (TTMM_MAX_FILE_MB)
    pub max_file_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_min_idle: 2,
            python: "python3".to_string(),
            churn_max_commits: 10_000,
            churn_since_days: None,
            index_threads: 0,
            max_file_mb: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        read_var("TTMM_POOL_SIZE", &mut config.pool_size);
        read_var("TTMM_POOL_MIN_IDLE", &mut config.pool_min_idle);
        read_var("TTMM_CHURN_MAX_COMMITS", &mut config.churn_max_commits);
        read_var("TTMM_INDEX_THREADS", &mut config.index_threads);
        read_var("TTMM_MAX_FILE_MB", &mut config.max_file_mb);

        if let Ok(val) = env::var("TTMM_PYTHON") {
            if val.trim().is_empty() {
                warn!("empty TTMM_PYTHON, using default: {}", config.python);
            } else {
                config.python = val;
            }
        }

        if let Ok(val) = env::var("TTMM_CHURN_SINCE_DAYS") {
            match val.parse() {
                Ok(days) => config.churn_since_days = Some(days),
                Err(_) => warn!("invalid TTMM_CHURN_SINCE_DAYS value: {val}, using all history"),
            }
        }

        if config.pool_min_idle > config.pool_size {
            config.pool_min_idle = config.pool_size;
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}

fn read_var<T: FromStr + std::fmt::Display>(name: &str, slot: &mut T) {
    let Ok(val) = env::var(name) else {
        return;
    };
    match val.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("invalid {name} value: {val}, using default: {slot}"),
    }
}
