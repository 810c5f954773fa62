use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    time::timeout,
};

const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);
const METRICS_MAX_REQUEST_BYTES: usize = 8 * 1024;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static SCAN_RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_scan_runs_total", "Completed maintenance passes").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_scan_runs_total");
    counter
});

static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_entries", "Entries seen by the last scan")
        .expect("create cache_entries");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_entries");
    gauge
});

static CACHE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("cache_bytes", "Total entry bytes seen by the last scan")
        .expect("create cache_bytes");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register cache_bytes");
    gauge
});

static EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_evictions_total", "Entries evicted over budget")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static EVICTION_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("cache_eviction_bytes_total", "Bytes reclaimed by eviction")
        .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_eviction_bytes_total");
    counter
});

static CORRUPT_REMOVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_corrupt_removed_total",
        "Corrupt entries deleted during scans",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_corrupt_removed_total");
    counter
});

static TEMP_REMOVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_temp_removed_total",
        "Abandoned temporary files deleted during scans",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_temp_removed_total");
    counter
});

static COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("commands_total", "Dispatched command records by kind");
    let vec = IntCounterVec::new(opts, &["kind"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register commands_total");
    vec
});

static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new("connections_total", "Accepted client connections")
        .expect("create connections_total");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register connections_total");
    counter
});

pub fn record_scan(entries: usize, total_bytes: u64, corrupt_removed: u64, temp_removed: u64) {
    SCAN_RUNS_TOTAL.inc();
    CACHE_ENTRIES.set(entries as i64);
    CACHE_BYTES.set(total_bytes.min(i64::MAX as u64) as i64);
    CORRUPT_REMOVED_TOTAL.inc_by(corrupt_removed);
    TEMP_REMOVED_TOTAL.inc_by(temp_removed);
}

pub fn record_eviction(bytes: u64) {
    EVICTIONS_TOTAL.inc();
    EVICTION_BYTES_TOTAL.inc_by(bytes);
}

pub fn record_command(kind: &str) {
    COMMANDS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_connection() {
    CONNECTIONS_TOTAL.inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}

pub async fn serve(addr: SocketAddr, path: String) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let path = if path.is_empty() {
        "/metrics".to_string()
    } else {
        path
    };
    loop {
        let (stream, _) = listener.accept().await?;
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, &path).await {
                tracing::debug!(error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(stream: S, path: &str) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    let mut total_bytes = 0usize;
    let bytes = read_request_line(&mut reader, &mut request_line, &mut total_bytes).await?;
    if bytes == 0 {
        return Ok(());
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let uri = parts.next().unwrap_or_default();

    // Consume and ignore headers until empty line.
    loop {
        let mut line = String::new();
        let n = read_request_line(&mut reader, &mut line, &mut total_bytes).await?;
        if n == 0 || line == "\r\n" {
            break;
        }
    }

    let response = if method == "GET" && uri == path {
        let body = gather();
        build_response(200, TextEncoder::new().format_type(), body)
    } else {
        build_response(404, "text/plain", b"not found".to_vec())
    };

    reader.get_mut().write_all(&response).await?;
    reader.get_mut().shutdown().await?;
    Ok(())
}

async fn read_request_line<S>(
    reader: &mut BufReader<S>,
    line: &mut String,
    total_bytes: &mut usize,
) -> Result<usize>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let n = timeout(METRICS_READ_TIMEOUT, reader.read_line(line))
        .await
        .map_err(|_| anyhow!("timed out reading metrics request"))??;
    *total_bytes += n;
    if *total_bytes > METRICS_MAX_REQUEST_BYTES {
        return Err(anyhow!("metrics request exceeds {METRICS_MAX_REQUEST_BYTES} bytes"));
    }
    Ok(n)
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}
