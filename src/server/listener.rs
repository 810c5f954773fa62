use std::io::{ErrorKind, SeekFrom};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::command::{CommandKind, CommandRecord, RECORD_LEN};
use crate::cache::codec::{CacheFileHeader, HEADER_LEN, USE_COUNT_OFFSET};
use crate::cache::is_entry_name;
use crate::metrics;
use crate::service::ServiceState;

pub async fn serve(listener: UnixListener, state: Arc<ServiceState>) -> Result<()> {
    info!(path = %state.settings.socket_path().display(), "command listener started");

    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "failed to accept client connection");
                continue;
            }
        };
        debug!("accepted client connection");
        metrics::record_connection();
        let connection_state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, connection_state).await {
                debug!(error = %err, "client connection closed with error");
            }
        });
    }
}

/// Buffers bytes per connection and dispatches whole records. A failed or
/// zero-length read ends the connection; trailing partial bytes are
/// discarded with it.
async fn handle_connection(mut stream: UnixStream, state: Arc<ServiceState>) -> Result<()> {
    let mut pending = Vec::with_capacity(RECORD_LEN * 4);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&chunk[..n]);
        while pending.len() >= RECORD_LEN {
            let mut raw = [0u8; RECORD_LEN];
            raw.copy_from_slice(&pending[..RECORD_LEN]);
            dispatch(&raw, &state).await;
            pending.drain(..RECORD_LEN);
        }
    }
}

async fn dispatch(raw: &[u8; RECORD_LEN], state: &ServiceState) {
    let Some(record) = CommandRecord::decode(raw) else {
        warn!("ignoring malformed command record");
        metrics::record_command("malformed");
        return;
    };
    match record.kind {
        CommandKind::CreateFile => {
            metrics::record_command("create_file");
            debug!(name = %record.name, "client reported a new cache entry");
            state.mark_scan_stale();
        }
        CommandKind::UpdateFile => {
            metrics::record_command("update_file");
            if let Err(err) = apply_update(state, &record).await {
                warn!(error = %err, name = %record.name, "failed to update cache entry");
            }
        }
        CommandKind::Unknown(kind) => {
            metrics::record_command("unknown");
            warn!(kind, "ignoring unknown command kind");
        }
    }
    state.note_command();
}

/// Increments the on-disk use count by one. The command's header mirror
/// must still describe the file (matching `bytes_cached`), otherwise the
/// entry was replaced since the client read it and the update is stale.
/// Missing files are an expected race with eviction, not an error.
async fn apply_update(state: &ServiceState, record: &CommandRecord) -> Result<()> {
    if !is_entry_name(&record.name) {
        warn!(name = %record.name, "rejecting update for invalid entry name");
        return Ok(());
    }
    let path = state.settings.cache_dir.join(&record.name);
    let mut file = match OpenOptions::new().read(true).write(true).open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(name = %record.name, "dropping update for evicted entry");
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };

    let mut raw = [0u8; HEADER_LEN];
    match file.read_exact(&mut raw).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
            debug!(name = %record.name, "dropping update for truncated entry");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }
    let Some(on_disk) = CacheFileHeader::parse(&raw) else {
        debug!(name = %record.name, "dropping update for corrupt entry");
        return Ok(());
    };
    if on_disk.bytes_cached != record.header.bytes_cached {
        debug!(
            name = %record.name,
            on_disk = on_disk.bytes_cached,
            command = record.header.bytes_cached,
            "dropping stale update: cached size changed"
        );
        return Ok(());
    }

    // Increment relative to the on-disk value so concurrent client
    // reporters cannot lose updates; only the use-count field is written.
    let new_count = on_disk.use_count.saturating_add(1);
    file.seek(SeekFrom::Start(USE_COUNT_OFFSET)).await?;
    file.write_all(&new_count.to_ne_bytes()).await?;
    Ok(())
}
