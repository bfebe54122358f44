//! The job supervisor.
//!
//! A static job table maps names to run intervals. Every 60 seconds each job
//! is evaluated: when the interval has elapsed since its recorded last run
//! and the job is not already running, the supervisor stamps `last_run`,
//! marks it running and launches it as a subprocess (see [`super::runner`]).
//! The last-run map is a JSON file in the data directory, so restarts keep
//! the schedule. A failed job never blocks its own rescheduling, but its
//! exit code is folded into the supervisor's aggregate, returned on
//! shutdown.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use ucti::Dirs;

/// Job name -> interval in seconds.
pub const JOBS: [(&str, u64); 5] = [
    ("cache-expire", 3600),
    ("data-export", 86400),
    ("filter-tags", 86400),
    ("ingest", 3600),
    ("tag", 86400),
];

const TICK_SECONDS: u64 = 60;

/// Durable `last_run` map, one JSON document on disk.
pub struct LastRunMap {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, i64>>,
}

impl LastRunMap {
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, job: &str) -> i64 {
        *self.entries.lock().unwrap().get(job).unwrap_or(&0)
    }

    pub fn set(&self, job: &str, timestamp: i64) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(job.to_string(), timestamp);
            entries.clone()
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("cannot write {}", self.path.display()))?;
        Ok(())
    }
}

/// Which jobs are due at `now`, given the table, the last-run map and the
/// currently running set.
pub fn due_jobs(
    table: &[(&'static str, u64)],
    last_run: &LastRunMap,
    running: &HashSet<String>,
    now: i64,
) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(job, interval)| {
            now - last_run.get(job) >= *interval as i64 && !running.contains(*job)
        })
        .map(|(job, _)| *job)
        .collect()
}

/// Run the supervisor until interrupted. Returns the aggregate exit code:
/// 0 when every launched job succeeded, 1 otherwise.
pub async fn run(dirs: &Dirs) -> Result<i32> {
    let last_run = Arc::new(LastRunMap::load(&dirs.jobber_state_file())?);
    let running: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let any_failed = Arc::new(AtomicBool::new(false));
    tracing::info!("job supervisor started");

    loop {
        let now = Utc::now().timestamp();
        let due = {
            let running = running.lock().unwrap();
            due_jobs(&JOBS, &last_run, &running, now)
        };

        for job in due {
            last_run.set(job, now)?;
            running.lock().unwrap().insert(job.to_string());

            let logs_dir = dirs.logs.clone();
            let last_run = Arc::clone(&last_run);
            let running = Arc::clone(&running);
            let any_failed = Arc::clone(&any_failed);
            tokio::spawn(async move {
                let code = match super::runner::run_job_process(job, &logs_dir).await {
                    Ok(code) => code,
                    Err(error) => {
                        tracing::error!(job, %error, "job launch failed");
                        1
                    }
                };
                if code != 0 {
                    any_failed.store(true, Ordering::Relaxed);
                }
                if let Err(error) = last_run.set(job, Utc::now().timestamp()) {
                    tracing::error!(job, %error, "cannot persist last run");
                }
                running.lock().unwrap().remove(job);
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(TICK_SECONDS)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("supervisor interrupted, shutting down");
                return Ok(if any_failed.load(Ordering::Relaxed) { 1 } else { 0 });
            }
        }
    }
}
