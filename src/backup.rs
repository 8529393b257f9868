//! Backups of previous builds.
//!
//! Before a book is written, an existing file at the target path is moved
//! aside to `<stem>_<YYYY-MM-DD>_<HH-MM>_<NNNN><.ext>` next to it.

use crate::error::{Error, Result};
use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;

/// How many random tokens are tried before giving up on a free name.
const MAX_ATTEMPTS: usize = 16;

/// Builds the backup path for `path` at time `now` with a 4-digit `token`.
pub fn backup_file_name(path: &Path, now: NaiveDateTime, token: u16) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let name = format!(
        "{}_{}_{}_{:04}{}",
        stem,
        now.format("%Y-%m-%d"),
        now.format("%H-%M"),
        token % 10_000,
        ext
    );
    path.with_file_name(name)
}

/// Moves an existing file at `path` aside and returns where it went.
///
/// Returns `Ok(None)` when there is nothing to back up.
pub async fn backup_existing(path: &Path) -> Result<Option<PathBuf>> {
    if fs::metadata(path).await.is_err() {
        return Ok(None);
    }

    let now = Local::now().naive_local();

    for _ in 0..MAX_ATTEMPTS {
        let token = rand::rng().random_range(0..10_000);
        let candidate = backup_file_name(path, now, token);
        if fs::metadata(&candidate).await.is_ok() {
            warn!("Backup name {} already taken, drawing again", candidate.display());
            continue;
        }

        fs::rename(path, &candidate)
            .await
            .map_err(|e| Error::io(path, e))?;
        info!("Backed up {} to {}", path.display(), candidate.display());
        return Ok(Some(candidate));
    }

    Err(Error::io(
        path,
        std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "no free backup file name",
        ),
    ))
}
