use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tokio::io::BufReader;
use tracing::{debug, warn};

use super::codec::read_scan_header;
use super::entry::{CacheEntryInfo, unix_seconds};
use super::{ENTRY_NAME_LEN, is_entry_name};

/// In-progress writes older than this are considered abandoned.
pub const TEMP_FILE_MAX_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub entries: Vec<CacheEntryInfo>,
    pub total_bytes: u64,
    pub corrupt_removed: u64,
    pub temp_removed: u64,
}

enum Scanned {
    Valid(Box<CacheEntryInfo>),
    Corrupt,
    Vanished,
}

/// Enumerates the cache directory. Entry names are exactly 40 lowercase
/// hex characters; longer names are in-progress temporaries, deleted only
/// once older than [`TEMP_FILE_MAX_AGE`]. Corrupt entries are deleted and
/// excluded without aborting the pass.
pub async fn scan_cache_dir(dir: &Path, now: SystemTime) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    let mut dir_entries = async_fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read cache dir {}", dir.display()))?;

    while let Some(dirent) = dir_entries.next_entry().await? {
        let file_type = match dirent.file_type().await {
            Ok(file_type) => file_type,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        if !file_type.is_file() {
            continue;
        }
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if is_entry_name(name) {
            let path = dirent.path();
            match scan_entry(&path, name).await? {
                Scanned::Valid(info) => {
                    outcome.total_bytes = outcome.total_bytes.saturating_add(info.size_on_disk);
                    outcome.entries.push(*info);
                }
                Scanned::Corrupt => {
                    // Corrupted entries are unrecoverable; remove on sight.
                    warn!(path = %path.display(), "removing corrupt cache entry");
                    match async_fs::remove_file(&path).await {
                        Ok(()) => outcome.corrupt_removed += 1,
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => {
                            warn!(error = %err, path = %path.display(), "failed to remove corrupt entry");
                        }
                    }
                }
                Scanned::Vanished => {}
            }
        } else if name.len() > ENTRY_NAME_LEN {
            remove_abandoned_temp(&dirent, now, &mut outcome).await;
        }
        // Shorter or non-hex names (the command socket among them) are not ours.
    }

    Ok(outcome)
}

async fn scan_entry(path: &Path, name: &str) -> Result<Scanned> {
    let file = match async_fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Scanned::Vanished),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Scanned::Vanished),
        Err(err) => return Err(err.into()),
    };
    let last_used = match metadata.modified() {
        Ok(mtime) => unix_seconds(mtime),
        Err(_) => 0,
    };

    let mut reader = BufReader::new(file);
    let Some((header, url)) = read_scan_header(&mut reader, name).await? else {
        return Ok(Scanned::Corrupt);
    };

    Ok(Scanned::Valid(Box::new(CacheEntryInfo {
        name: name.to_string(),
        header,
        url,
        last_used,
        size_on_disk: metadata.len(),
    })))
}

async fn remove_abandoned_temp(
    dirent: &async_fs::DirEntry,
    now: SystemTime,
    outcome: &mut ScanOutcome,
) {
    let path = dirent.path();
    let metadata = match dirent.metadata().await {
        Ok(metadata) => metadata,
        Err(_) => return,
    };
    let Ok(mtime) = metadata.modified() else {
        return;
    };
    let age = now.duration_since(mtime).unwrap_or(Duration::ZERO);
    if age < TEMP_FILE_MAX_AGE {
        // Another process may still be writing it.
        return;
    }
    debug!(path = %path.display(), "removing abandoned temporary file");
    match async_fs::remove_file(&path).await {
        Ok(()) => outcome.temp_removed += 1,
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            warn!(error = %err, path = %path.display(), "failed to remove temporary file");
        }
    }
}
