use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use cachewarden::cache::codec::{CacheFileHeader, HEADER_LEN};
use cachewarden::cache::filename_for_url;
use cachewarden::cli::LogFormat;
use cachewarden::service::run_daemon;
use cachewarden::settings::Settings;

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings tuned for tests: every dispatched command triggers a pass and
/// the idle timer stays out of the way.
pub fn test_settings(cache_dir: &Path, max_cache_size: u64) -> Settings {
    Settings {
        cache_dir: cache_dir.to_path_buf(),
        max_cache_size,
        eviction_command_interval: 1,
        maintenance_interval: 3600,
        log: LogFormat::Text,
        metrics_listen: None,
    }
}

pub fn header_for_body(use_count: i32, body_len: usize) -> CacheFileHeader {
    CacheFileHeader {
        compression: 0,
        use_count,
        served_date: 1_700_000_000,
        last_modified_date: 1_700_000_000,
        expire_date: 1_800_000_000,
        bytes_cached: body_len as i32,
    }
}

/// Writes a complete cache entry the way a client process would and
/// returns its base name.
pub fn write_entry(cache_dir: &Path, url: &str, use_count: i32, body: &[u8]) -> String {
    let name = filename_for_url(url);
    let header = header_for_body(use_count, body.len());
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(url.as_bytes());
    bytes.extend_from_slice(b"\n\"etag\"\ntext/plain\nContent-Type: text/plain\n\n");
    bytes.extend_from_slice(body);
    fs::write(cache_dir.join(&name), bytes).unwrap();
    name
}

pub fn read_use_count(path: &Path) -> Result<i32> {
    let bytes = fs::read(path)?;
    let header = CacheFileHeader::parse(&bytes[..HEADER_LEN.min(bytes.len())])
        .ok_or_else(|| anyhow!("entry at {} has a corrupt header", path.display()))?;
    Ok(header.use_count)
}

pub fn spawn_daemon(settings: Settings) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { run_daemon(settings).await })
}

/// Polls until something is accepting on the socket path.
pub async fn wait_for_socket(path: &PathBuf) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if UnixStream::connect(path).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for socket {}", path.display()));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Polls until `condition` holds or the wait times out.
pub async fn wait_until<F>(mut condition: F, what: &str) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if condition() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for {what}"));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
