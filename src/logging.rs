use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{prelude::*, EnvFilter};

pub const LOG_ENV: &str = "NICKEL_LOG";
pub const LOG_FILE: &str = "nl.log";
const MAX_LOG_BYTES: u64 = 200 * 1024;
const MAX_BACKUPS: usize = 15;

/// Installs the global file subscriber. The filter comes from `NICKEL_LOG`,
/// then `configured`, then `debug`.
pub fn init(logs_dir: &Path, configured: Option<&str>) -> Result<PathBuf> {
    fs::create_dir_all(logs_dir).context("create logs dir")?;
    let path = logs_dir.join(LOG_FILE);
    rotate(&path, MAX_LOG_BYTES, MAX_BACKUPS).context("rotate log")?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context("open log file")?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or("debug")))
        .unwrap_or_else(|_| EnvFilter::new("debug"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(path)
}

/// Shifts `nl.log` to `nl.1.log` (and older backups up by one) once it
/// outgrows `max_bytes`, dropping anything past `backups`.
pub fn rotate(path: &Path, max_bytes: u64, backups: usize) -> Result<()> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(()),
    };
    if size <= max_bytes || backups == 0 {
        return Ok(());
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        fs::remove_file(&oldest).context("drop oldest log")?;
    }
    for index in (1..backups).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            fs::rename(&from, backup_path(path, index + 1)).context("shift log backup")?;
        }
    }
    fs::rename(path, backup_path(path, 1)).context("move current log")?;
    Ok(())
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}.{index}.log"))
}
