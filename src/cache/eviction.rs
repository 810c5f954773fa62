use std::io::ErrorKind;
use std::path::Path;
use std::time::{Instant, SystemTime};

use anyhow::Result;
use tokio::fs as async_fs;
use tracing::{trace, warn};

use super::entry::{sort_for_eviction, unix_seconds};
use super::scanner::scan_cache_dir;
use crate::logging::{PassSummary, log_pass};
use crate::metrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassStats {
    pub scanned: usize,
    pub total_bytes: u64,
    pub remaining_bytes: u64,
    pub evicted: u64,
    pub bytes_reclaimed: u64,
    pub corrupt_removed: u64,
    pub temp_removed: u64,
}

/// One maintenance pass: scan, then evict least-useful entries until the
/// directory fits the budget. Individual delete failures are skipped; the
/// entry's size stays counted and the pass moves on.
pub async fn run_pass(cache_dir: &Path, budget: u64, now: SystemTime) -> Result<PassStats> {
    let started = Instant::now();
    let outcome = scan_cache_dir(cache_dir, now).await?;
    metrics::record_scan(
        outcome.entries.len(),
        outcome.total_bytes,
        outcome.corrupt_removed,
        outcome.temp_removed,
    );

    let mut stats = PassStats {
        scanned: outcome.entries.len(),
        total_bytes: outcome.total_bytes,
        remaining_bytes: outcome.total_bytes,
        corrupt_removed: outcome.corrupt_removed,
        temp_removed: outcome.temp_removed,
        ..PassStats::default()
    };

    if stats.remaining_bytes > budget {
        let mut entries = outcome.entries;
        sort_for_eviction(&mut entries, unix_seconds(now));
        for entry in &entries {
            if stats.remaining_bytes <= budget {
                break;
            }
            let path = cache_dir.join(&entry.name);
            match async_fs::remove_file(&path).await {
                Ok(()) => {
                    trace!(path = %path.display(), "evicted cache entry");
                    stats.remaining_bytes = stats.remaining_bytes.saturating_sub(entry.size_on_disk);
                    stats.evicted += 1;
                    stats.bytes_reclaimed =
                        stats.bytes_reclaimed.saturating_add(entry.size_on_disk);
                    metrics::record_eviction(entry.size_on_disk);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    // Vanished out from under us; nothing was reclaimed.
                    trace!(path = %path.display(), "entry already gone");
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "failed to evict cache entry; skipping");
                }
            }
        }
    }

    log_pass(&PassSummary {
        scanned: stats.scanned,
        total_bytes: stats.total_bytes,
        budget_bytes: budget,
        remaining_bytes: stats.remaining_bytes,
        evicted: stats.evicted,
        bytes_reclaimed: stats.bytes_reclaimed,
        corrupt_removed: stats.corrupt_removed,
        temp_removed: stats.temp_removed,
        elapsed: started.elapsed(),
    });

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::CacheFileHeader;
    use crate::cache::filename_for_url;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes an entry whose on-disk size is exactly `size` bytes; the
    /// body is padded until header + text section + body hit the target.
    fn write_sized_entry(dir: &Path, tag: usize, use_count: i32, size: u64) -> (String, u64) {
        let url = format!("http://example.com/entry-{tag:02}");
        let name = filename_for_url(&url);
        let header = CacheFileHeader {
            compression: 0,
            use_count,
            served_date: 1_700_000_000,
            last_modified_date: 1_700_000_000,
            expire_date: 1_800_000_000,
            bytes_cached: 0,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(url.as_bytes());
        bytes.extend_from_slice(b"\netag\ntext/plain\n\n");
        assert!(bytes.len() as u64 <= size, "size target too small");
        bytes.resize(size as usize, b'.');
        fs::write(dir.join(&name), bytes).unwrap();
        (name, size)
    }

    fn future_now() -> SystemTime {
        // Far enough out that every entry's elapsed time is ~1000s, so
        // usefulness reduces to use_count / 1000 without boundary jitter.
        SystemTime::now() + Duration::from_secs(1_000)
    }

    #[tokio::test]
    async fn within_budget_pass_evicts_nothing() {
        let dir = TempDir::new().unwrap();
        write_sized_entry(dir.path(), 0, 1_000_000, 100);

        let stats = run_pass(dir.path(), 1_000, future_now()).await.unwrap();
        assert_eq!(stats.evicted, 0);
        assert_eq!(stats.remaining_bytes, 100);
    }

    #[tokio::test]
    async fn evicts_least_useful_first_and_stops_at_budget() {
        let dir = TempDir::new().unwrap();
        // Five 100-byte entries, distinct usefulness, 100 bytes over a
        // 400-byte budget: exactly one entry (the least useful) must go.
        let mut names = Vec::new();
        for (tag, use_count) in [(0, 1_000_000), (1, 2_000_000), (2, 3_000_000), (3, 4_000_000), (4, 5_000_000)]
        {
            let (name, _) = write_sized_entry(dir.path(), tag, use_count, 100);
            names.push(name);
        }

        let stats = run_pass(dir.path(), 400, future_now()).await.unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.remaining_bytes, 400);
        assert!(!dir.path().join(&names[0]).exists(), "least useful must go");
        for name in &names[1..] {
            assert!(dir.path().join(name).exists(), "{name} should survive");
        }
    }

    #[tokio::test]
    async fn evicts_in_ascending_usefulness_until_budget() {
        let dir = TempDir::new().unwrap();
        let mut names = Vec::new();
        for (tag, use_count) in [(0, 1_000_000), (1, 2_000_000), (2, 3_000_000), (3, 4_000_000), (4, 5_000_000)]
        {
            let (name, _) = write_sized_entry(dir.path(), tag, use_count, 100);
            names.push(name);
        }

        // 500 bytes on disk, 200-byte budget: the three least useful go.
        let stats = run_pass(dir.path(), 200, future_now()).await.unwrap();
        assert_eq!(stats.evicted, 3);
        assert_eq!(stats.remaining_bytes, 200);
        for name in &names[..3] {
            assert!(!dir.path().join(name).exists());
        }
        for name in &names[3..] {
            assert!(dir.path().join(name).exists());
        }
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for (tag, use_count) in [(0, 1_000_000), (1, 2_000_000), (2, 3_000_000)] {
            write_sized_entry(dir.path(), tag, use_count, 100);
        }

        let first = run_pass(dir.path(), 250, future_now()).await.unwrap();
        assert_eq!(first.evicted, 1);

        let second = run_pass(dir.path(), 250, future_now()).await.unwrap();
        assert_eq!(second.evicted, 0);
        assert_eq!(second.remaining_bytes, first.remaining_bytes);
    }
}
