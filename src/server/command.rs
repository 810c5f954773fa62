//! Wire format for client commands.
//!
//! Every message is exactly [`RECORD_LEN`] bytes: a mirror of the 36-byte
//! cache file header, a 4-byte command kind, and the target entry's base
//! name as 40 ASCII characters, zero-padded. The stream carries no length
//! prefix; framing is the fixed size alone.

use crate::cache::codec::{CacheFileHeader, HEADER_LEN};

pub const RECORD_LEN: usize = 80;
pub const NAME_LEN: usize = 40;

const KIND_OFFSET: usize = HEADER_LEN;
const NAME_OFFSET: usize = HEADER_LEN + 4;

pub const KIND_CREATE_FILE: u32 = 1;
pub const KIND_UPDATE_FILE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// A client finished writing a new entry. Advisory; the next scan
    /// discovers the file either way.
    CreateFile,
    /// Increment the on-disk use count of an existing entry.
    UpdateFile,
    /// Anything else on the wire. Logged and ignored, never fatal.
    Unknown(u32),
}

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub header: CacheFileHeader,
    pub kind: CommandKind,
    pub name: String,
}

impl CommandRecord {
    /// Decodes one record. `None` when the embedded header mirror itself
    /// is malformed or the name bytes are not valid UTF-8.
    pub fn decode(bytes: &[u8; RECORD_LEN]) -> Option<Self> {
        let header = CacheFileHeader::parse(&bytes[..HEADER_LEN])?;
        let raw_kind = u32::from_ne_bytes(bytes[KIND_OFFSET..NAME_OFFSET].try_into().ok()?);
        let kind = match raw_kind {
            KIND_CREATE_FILE => CommandKind::CreateFile,
            KIND_UPDATE_FILE => CommandKind::UpdateFile,
            other => CommandKind::Unknown(other),
        };
        let raw_name = &bytes[NAME_OFFSET..];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = std::str::from_utf8(&raw_name[..end]).ok()?.to_string();
        Some(Self { header, kind, name })
    }

    /// Encodes a record the way client processes frame them. Names longer
    /// than [`NAME_LEN`] are truncated, shorter ones zero-padded.
    pub fn encode(header: &CacheFileHeader, kind: u32, name: &str) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        out[KIND_OFFSET..NAME_OFFSET].copy_from_slice(&kind.to_ne_bytes());
        let name_bytes = name.as_bytes();
        let len = name_bytes.len().min(NAME_LEN);
        out[NAME_OFFSET..NAME_OFFSET + len].copy_from_slice(&name_bytes[..len]);
        out
    }
}
