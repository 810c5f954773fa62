use std::time::SystemTime;

use super::codec::CacheFileHeader;

/// One entry as observed by a scan pass. Rebuilt from disk on every pass,
/// never persisted.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub name: String,
    pub header: CacheFileHeader,
    pub url: String,
    /// File modification time, the best available record of last use.
    pub last_used: i64,
    pub size_on_disk: u64,
}

impl CacheEntryInfo {
    /// Recency/frequency score; lower scores are evicted first. An entry
    /// used just now counts a full unit of elapsed time so the division
    /// is always defined.
    pub fn usefulness(&self, now: i64) -> i64 {
        let elapsed = (now - self.last_used).max(1);
        i64::from(self.header.use_count) / elapsed
    }
}

/// Orders eviction candidates: least useful first. The sort is stable, so
/// entries with equal truncated scores keep their scan order.
pub fn sort_for_eviction(entries: &mut [CacheEntryInfo], now: i64) {
    entries.sort_by_key(|entry| entry.usefulness(now));
}

pub fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(offset) => offset.as_secs().min(i64::MAX as u64) as i64,
        Err(_) => 0,
    }
}
