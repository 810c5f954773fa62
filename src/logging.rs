use std::time::Duration;

use anyhow::{Result, anyhow};
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// One completed maintenance pass, logged whether or not anything was evicted.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub scanned: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
    pub remaining_bytes: u64,
    pub evicted: u64,
    pub bytes_reclaimed: u64,
    pub corrupt_removed: u64,
    pub temp_removed: u64,
    pub elapsed: Duration,
}

pub fn log_pass(summary: &PassSummary) {
    let now = OffsetDateTime::now_utc();
    let (year, month, day) = now.to_calendar_date();
    let (hour, minute, second) = now.to_hms();
    let millisecond = now.millisecond();
    let month_number: u8 = month.into();
    let ts = format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millisecond:03}Z",
        month = month_number
    );

    tracing::info!(
        target = "maintenance_log",
        ts,
        scanned = summary.scanned,
        total_bytes = summary.total_bytes,
        budget_bytes = summary.budget_bytes,
        remaining_bytes = summary.remaining_bytes,
        evicted = summary.evicted,
        bytes_reclaimed = summary.bytes_reclaimed,
        corrupt_removed = summary.corrupt_removed,
        temp_removed = summary.temp_removed,
        elapsed_ms = summary.elapsed.as_millis() as u64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn pass_summary_includes_eviction_fields() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = BufferWriter {
            buf: buffer.clone(),
        };
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_target(false)
            .without_time()
            .with_ansi(false)
            .compact()
            .finish();

        let summary = PassSummary {
            scanned: 12,
            total_bytes: 4096,
            budget_bytes: 1024,
            remaining_bytes: 1000,
            evicted: 7,
            bytes_reclaimed: 3096,
            corrupt_removed: 1,
            temp_removed: 2,
            elapsed: Duration::from_millis(5),
        };

        tracing::subscriber::with_default(subscriber, || {
            log_pass(&summary);
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            output.contains("evicted=7"),
            "missing evicted in output: {output}"
        );
        assert!(
            output.contains("bytes_reclaimed=3096"),
            "missing bytes_reclaimed in output: {output}"
        );
        assert!(
            output.contains("corrupt_removed=1"),
            "missing corrupt_removed in output: {output}"
        );
    }
}
