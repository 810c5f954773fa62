use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow, ensure};
use tokio::fs as async_fs;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::cache::codec::read_entry_details;
use crate::cache::eviction::run_pass;
use crate::cache::is_entry_name;
use crate::metrics;
use crate::server;
use crate::settings::Settings;

/// Shared daemon state. Holds the explicit counters the maintenance
/// cadence runs on; no process-wide globals.
pub struct ServiceState {
    pub settings: Arc<Settings>,
    commands_dispatched: AtomicU64,
    scan_stale: AtomicBool,
    maintenance: Notify,
}

impl ServiceState {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            commands_dispatched: AtomicU64::new(0),
            // The directory has never been scanned, so it is stale.
            scan_stale: AtomicBool::new(true),
            maintenance: Notify::new(),
        })
    }

    /// Counts one dispatched command and wakes the maintenance task once
    /// the configured interval is reached.
    pub fn note_command(&self) {
        let count = self.commands_dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        if count % u64::from(self.settings.eviction_command_interval) == 0 {
            self.maintenance.notify_one();
        }
    }

    pub fn mark_scan_stale(&self) {
        self.scan_stale.store(true, Ordering::Relaxed);
    }

    fn take_scan_stale(&self) -> bool {
        self.scan_stale.swap(false, Ordering::Relaxed)
    }
}

pub enum SocketClaim {
    Acquired(UnixListener),
    AlreadyRunning,
}

/// Single-instance enforcement: the bound socket path is the registration
/// name. A live peer on the other end means another cleaner owns the
/// directory; a dead socket file is removed and rebound.
pub async fn claim_socket(path: &Path) -> Result<SocketClaim> {
    match UnixStream::connect(path).await {
        Ok(_) => return Ok(SocketClaim::AlreadyRunning),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(_) => {
            debug!(path = %path.display(), "removing stale command socket");
            match async_fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to remove stale socket {}", path.display())
                    });
                }
            }
        }
    }
    match UnixListener::bind(path) {
        Ok(listener) => Ok(SocketClaim::Acquired(listener)),
        // Lost a startup race; the winner owns the directory.
        Err(err) if err.kind() == ErrorKind::AddrInUse => Ok(SocketClaim::AlreadyRunning),
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind socket {}", path.display()))
        }
    }
}

/// Deletes remnants of the obsolete layout that sharded entries into
/// single-character directories. Runs once at startup.
pub async fn migrate_legacy_layout(dir: &Path) -> Result<()> {
    let mut dir_entries = async_fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read cache dir {}", dir.display()))?;
    let mut removed = 0usize;
    while let Some(dirent) = dir_entries.next_entry().await? {
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.len() != 1 {
            continue;
        }
        let path = dirent.path();
        let file_type = match dirent.file_type().await {
            Ok(file_type) => file_type,
            Err(_) => continue,
        };
        let result = if file_type.is_dir() {
            async_fs::remove_dir_all(&path).await
        } else {
            async_fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to remove legacy cache remnant");
            }
        }
    }
    if removed > 0 {
        info!(removed, "removed legacy cache layout remnants");
    }
    Ok(())
}

/// Long-lived daemon entry point.
pub async fn run_daemon(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);

    if !settings.cache_dir.is_dir() {
        info!(
            path = %settings.cache_dir.display(),
            "cache directory does not exist; nothing to clean"
        );
        return Ok(());
    }

    if let Some(addr) = settings.metrics_listen {
        tokio::spawn(async move {
            info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = metrics::serve(addr, "/metrics".to_string()).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let socket_path = settings.socket_path();
    let listener = match claim_socket(&socket_path).await? {
        SocketClaim::Acquired(listener) => listener,
        SocketClaim::AlreadyRunning => {
            debug!(path = %socket_path.display(), "another instance is already running");
            return Ok(());
        }
    };

    migrate_legacy_layout(&settings.cache_dir).await?;

    let state = ServiceState::new(settings);
    // Queue an immediate startup pass.
    state.maintenance.notify_one();

    let maintenance_state = state.clone();
    tokio::spawn(async move {
        maintenance_loop(maintenance_state).await;
    });

    server::serve(listener, state).await
}

/// Runs maintenance passes: immediately when the command counter fires,
/// and on the idle timer whenever the directory may have changed since
/// the last pass or the last pass could not get under budget.
async fn maintenance_loop(state: Arc<ServiceState>) {
    let mut ticker = tokio::time::interval(state.settings.maintenance_interval());
    ticker.tick().await;
    loop {
        let due = tokio::select! {
            _ = state.maintenance.notified() => true,
            _ = ticker.tick() => state.take_scan_stale(),
        };
        if !due {
            continue;
        }
        state.take_scan_stale();
        let budget = state.settings.max_cache_size;
        match run_pass(&state.settings.cache_dir, budget, SystemTime::now()).await {
            Ok(stats) => {
                if stats.remaining_bytes > budget {
                    // Deletes failed; retry on the next timer tick.
                    state.mark_scan_stale();
                }
            }
            Err(err) => {
                warn!(error = %err, "maintenance pass failed");
                state.mark_scan_stale();
            }
        }
    }
}

/// `--clear-all`: delete every cache entry, then exit. Refuses to pull
/// files out from under a live daemon. In-progress temporaries are left
/// for their writers; the next daemon pass ages them out.
pub async fn clear_all(settings: &Settings) -> Result<()> {
    if UnixStream::connect(settings.socket_path()).await.is_ok() {
        info!("a cleaner instance is already running; leaving its entries alone");
        return Ok(());
    }

    let mut dir_entries = match async_fs::read_dir(&settings.cache_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(
                path = %settings.cache_dir.display(),
                "cache directory does not exist; nothing to clear"
            );
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read cache dir {}", settings.cache_dir.display())
            });
        }
    };

    let mut removed = 0u64;
    while let Some(dirent) = dir_entries.next_entry().await? {
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_entry_name(name) {
            continue;
        }
        match async_fs::remove_file(dirent.path()).await {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(error = %err, path = %dirent.path().display(), "failed to remove cache file");
            }
        }
    }
    info!(removed, "cleared cache entries");
    Ok(())
}

/// `--file-info <name>`: decode one entry and print its metadata. Reads
/// only; a corrupt entry is reported, never deleted here.
pub async fn print_file_info(settings: &Settings, name: &str) -> Result<()> {
    ensure!(
        is_entry_name(name),
        "'{name}' is not a cache entry name (40 lowercase hex characters)"
    );
    let path = settings.cache_dir.join(name);
    let file = async_fs::File::open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let size_on_disk = file.metadata().await?.len();
    let mut reader = BufReader::new(file);
    let details = read_entry_details(&mut reader, name)
        .await?
        .ok_or_else(|| anyhow!("cache entry {name} is corrupt"))?;

    println!("URL:           {}", details.url);
    println!("ETag:          {}", details.etag);
    println!("MIME type:     {}", details.mime_type);
    println!("Use count:     {}", details.header.use_count);
    println!("Served:        {}", details.header.served_date);
    println!("Last modified: {}", details.header.last_modified_date);
    println!("Expires:       {}", details.header.expire_date);
    println!("Body bytes:    {}", details.header.bytes_cached);
    println!("Size on disk:  {size_on_disk}");
    println!("Response headers:");
    for line in &details.response_headers {
        println!("  {line}");
    }
    Ok(())
}
