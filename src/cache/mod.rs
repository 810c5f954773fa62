pub mod codec;
pub mod entry;
pub mod eviction;
pub mod scanner;

use sha1::{Digest, Sha1};

/// Length of a cache entry base name: a 160-bit URL digest in lowercase hex.
pub const ENTRY_NAME_LEN: usize = 40;

/// Base name a cache entry for `url` must carry on disk.
pub fn filename_for_url(url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True for names that are exactly 40 lowercase hex characters. Longer
/// names are in-progress temporaries; anything else is not ours.
pub fn is_entry_name(name: &str) -> bool {
    name.len() == ENTRY_NAME_LEN
        && name
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_is_deterministic_and_40_lowercase_hex() {
        let first = filename_for_url("http://example.com/index.html");
        let second = filename_for_url("http://example.com/index.html");
        assert_eq!(first, second);
        assert_eq!(first.len(), ENTRY_NAME_LEN);
        assert!(is_entry_name(&first));
    }

    #[test]
    fn distinct_urls_hash_to_distinct_names() {
        assert_ne!(
            filename_for_url("http://example.com/a"),
            filename_for_url("http://example.com/b")
        );
    }

    #[test]
    fn entry_name_rejects_uppercase_and_wrong_length() {
        assert!(!is_entry_name("ABCDEF0123456789abcdef0123456789abcdef01"));
        assert!(!is_entry_name("abcdef"));
        assert!(!is_entry_name(&"a".repeat(41)));
        assert!(!is_entry_name("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
        assert!(is_entry_name(&"a0".repeat(20)));
    }
}
