//! Subprocess runner with log capture.
//!
//! A job runs as this same executable with `job <name>`. Its stdout is read
//! in 8 KiB chunks, split on newlines, and every line is written to
//! `logs/job-<name>.log` prefixed with the UTC timestamp and the job name,
//! mirrored to the supervisor's stdout. Stderr is appended after exit with
//! an `[ERROR]` prefix. A line that grows past 1 MiB without a newline is
//! force-flushed so a misbehaving job cannot balloon the buffer.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 8192;
const MAX_BUFFER: usize = 1024 * 1024;

/// Spawn `ucti job <name>`, stream its output, return its exit code.
pub async fn run_job_process(job_name: &str, logs_dir: &Path) -> Result<i32> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let mut child = tokio::process::Command::new(exe)
        .arg("job")
        .arg(job_name)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("cannot spawn job {job_name}"))?;

    let log_path = logs_dir.join(format!("job-{job_name}.log"));
    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open {}", log_path.display()))?;

    emit_line(&mut log, job_name, format!("Starting job {job_name}").as_bytes())?;

    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let read = stdout.read(&mut chunk).await?;
        if read == 0 {
            if !buffer.is_empty() {
                emit_line(&mut log, job_name, &buffer)?;
            }
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let rest = buffer.split_off(newline + 1);
            buffer.pop();
            emit_line(&mut log, job_name, &buffer)?;
            buffer = rest;
        }

        if buffer.len() > MAX_BUFFER {
            emit_line(&mut log, job_name, &buffer)?;
            buffer.clear();
        }
    }

    let mut stderr_output = Vec::new();
    if let Some(mut stderr) = child.stderr.take() {
        stderr.read_to_end(&mut stderr_output).await?;
    }
    let status = child.wait().await?;
    let code = status.code().unwrap_or(-1);

    if !stderr_output.is_empty() {
        log.write_all(b"[ERROR] ")?;
        log.write_all(&stderr_output)?;
        log.flush()?;
    }
    emit_line(
        &mut log,
        job_name,
        format!("Job {job_name} finished with code {code}").as_bytes(),
    )?;

    Ok(code)
}

/// Prefix one captured line, append it to the log and mirror it to stdout.
fn emit_line(log: &mut std::fs::File, job_name: &str, line: &[u8]) -> Result<()> {
    let prefixed = format!(
        "[{}] [{}] {}",
        Utc::now().to_rfc3339(),
        job_name,
        String::from_utf8_lossy(line).trim_end()
    );
    log.write_all(prefixed.as_bytes())?;
    log.write_all(b"\n")?;
    log.flush()?;
    println!("{prefixed}");
    Ok(())
}
