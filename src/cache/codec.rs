//! On-disk cache entry format.
//!
//! Every entry starts with a fixed 36-byte binary header written by the
//! HTTP client that produced it, followed by a newline-terminated text
//! section (URL, then etag, MIME type and response headers up to a blank
//! line) and the cached body. Integers are native-endian: producer and
//! cleaner always share one machine.

use std::io::ErrorKind;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::warn;

use super::filename_for_url;

pub const HEADER_LEN: usize = 36;
/// Format tag at offset 0. Entries carrying anything else are corrupt.
pub const VERSION_TAG: [u8; 2] = *b"A\n";
/// Byte offset of the use-count field, the only region the cleaner rewrites.
pub const USE_COUNT_OFFSET: u64 = 4;
/// A text-section line longer than this invalidates the whole entry.
pub const MAX_LINE_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheFileHeader {
    pub compression: u8,
    pub use_count: i32,
    pub served_date: i64,
    pub last_modified_date: i64,
    pub expire_date: i64,
    pub bytes_cached: i32,
}

impl CacheFileHeader {
    /// Decodes the fixed header. `None` on short input, a mismatched
    /// version tag, or a timestamp that does not fit the platform's time
    /// representation.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        if bytes[0..2] != VERSION_TAG {
            return None;
        }
        let header = Self {
            compression: bytes[2],
            use_count: i32::from_ne_bytes(bytes[4..8].try_into().ok()?),
            served_date: i64::from_ne_bytes(bytes[8..16].try_into().ok()?),
            last_modified_date: i64::from_ne_bytes(bytes[16..24].try_into().ok()?),
            expire_date: i64::from_ne_bytes(bytes[24..32].try_into().ok()?),
            bytes_cached: i32::from_ne_bytes(bytes[32..36].try_into().ok()?),
        };
        if !timestamp_in_range(header.served_date)
            || !timestamp_in_range(header.last_modified_date)
            || !timestamp_in_range(header.expire_date)
        {
            return None;
        }
        Some(header)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&VERSION_TAG);
        out[2] = self.compression;
        out[4..8].copy_from_slice(&self.use_count.to_ne_bytes());
        out[8..16].copy_from_slice(&self.served_date.to_ne_bytes());
        out[16..24].copy_from_slice(&self.last_modified_date.to_ne_bytes());
        out[24..32].copy_from_slice(&self.expire_date.to_ne_bytes());
        out[32..36].copy_from_slice(&self.bytes_cached.to_ne_bytes());
        out
    }
}

/// Unix timestamps must convert to a `SystemTime` offset from the epoch.
fn timestamp_in_range(value: i64) -> bool {
    value >= 0
}

/// Full text-section decode, used by `--file-info`.
#[derive(Debug, Clone)]
pub struct EntryDetails {
    pub header: CacheFileHeader,
    pub url: String,
    pub etag: String,
    pub mime_type: String,
    pub response_headers: Vec<String>,
}

/// Reads the binary header and URL line, verifying that the URL hashes to
/// `expected_name`. `Ok(None)` marks the entry corrupt; IO failures other
/// than a short file surface as `Err`.
pub async fn read_scan_header<R>(
    reader: &mut R,
    expected_name: &str,
) -> Result<Option<(CacheFileHeader, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    match reader.read_exact(&mut raw).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let Some(header) = CacheFileHeader::parse(&raw) else {
        return Ok(None);
    };
    let Some(url) = read_line_capped(reader).await? else {
        return Ok(None);
    };
    if filename_for_url(&url) != expected_name {
        // Either the file was renamed or two URLs collided; trust neither.
        warn!(name = expected_name, "entry URL does not match its file name");
        return Ok(None);
    }
    Ok(Some((header, url)))
}

/// Reads the header plus the full text section: etag, MIME type, and
/// response-header lines up to the blank terminator.
pub async fn read_entry_details<R>(
    reader: &mut R,
    expected_name: &str,
) -> Result<Option<EntryDetails>>
where
    R: AsyncBufRead + Unpin,
{
    let Some((header, url)) = read_scan_header(reader, expected_name).await? else {
        return Ok(None);
    };
    let Some(etag) = read_line_capped(reader).await? else {
        return Ok(None);
    };
    let Some(mime_type) = read_line_capped(reader).await? else {
        return Ok(None);
    };
    let mut response_headers = Vec::new();
    loop {
        let Some(line) = read_line_capped(reader).await? else {
            return Ok(None);
        };
        if line.is_empty() {
            break;
        }
        response_headers.push(line);
    }
    Ok(Some(EntryDetails {
        header,
        url,
        etag,
        mime_type,
        response_headers,
    }))
}

/// Reads one newline-terminated line of at most `MAX_LINE_LEN` bytes.
/// `Ok(None)` on EOF, a missing terminator, an over-long line, or invalid
/// UTF-8. The newline is stripped.
async fn read_line_capped<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let mut limited = (&mut *reader).take((MAX_LINE_LEN + 1) as u64);
    let n = limited.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Ok(None);
    }
    buf.pop();
    match String::from_utf8(buf) {
        Ok(line) => Ok(Some(line)),
        Err(_) => Ok(None),
    }
}
