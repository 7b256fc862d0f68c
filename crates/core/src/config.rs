use std::env;

use serde::{Deserialize, Serialize};

/// Loader configuration, typically parsed from TOML or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Maximum number of worker threads. 0 = available parallelism.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

fn default_max_threads() -> usize {
    0
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
        }
    }
}

impl LoaderConfig {
    /// Read configuration from the environment (`GANTRY_MAX_THREADS`).
    pub fn from_env() -> Self {
        Self {
            max_threads: env_usize("GANTRY_MAX_THREADS", default_max_threads()),
        }
    }

    /// Resolve the worker thread cap (0 means use available parallelism).
    pub fn resolved_max_threads(&self) -> usize {
        if self.max_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_threads
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
