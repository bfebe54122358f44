//! Filesystem layout.
//!
//! Every directory can be overridden through an environment variable, which
//! is how deployments relocate state without touching the config file.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Resolved directory layout for one process.
#[derive(Debug, Clone)]
pub struct Dirs {
    /// Job log files (`job-<name>.log`)
    pub logs: PathBuf,
    /// Database file and scheduler state
    pub data: PathBuf,
    /// JSONL-gzip post snapshots
    pub backup: PathBuf,
    /// Search-result cache blobs
    pub cache: PathBuf,
    /// `config.toml`
    pub config: PathBuf,
}

impl Dirs {
    /// Resolve directories from `UCTI_*` environment variables, falling back
    /// to subdirectories of `base`. All directories are created.
    pub fn resolve(base: &Path) -> Result<Self> {
        let dirs = Self {
            logs: Self::from_env("UCTI_LOG_DIR", base, "logs"),
            data: Self::from_env("UCTI_DATA_DIR", base, "data"),
            backup: Self::from_env("UCTI_BACKUP_DIR", base, "backup"),
            cache: Self::from_env("UCTI_CACHE_DIR", base, "cache"),
            config: Self::from_env("UCTI_CONFIG_DIR", base, "config"),
        };
        for dir in [
            &dirs.logs,
            &dirs.data,
            &dirs.backup,
            &dirs.cache,
            &dirs.config,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }

    fn from_env(var: &str, base: &Path, default: &str) -> PathBuf {
        env::var_os(var)
            .map(PathBuf::from)
            .unwrap_or_else(|| base.join(default))
    }

    /// Path of the configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Path of the SQLite database file.
    pub fn database_file(&self) -> PathBuf {
        self.data.join("ucti.sqlite")
    }

    /// Path of the scheduler's last-run map.
    pub fn jobber_state_file(&self) -> PathBuf {
        self.data.join("jobber.json")
    }
}
