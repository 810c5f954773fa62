#![no_main]

use libfuzzer_sys::fuzz_target;

use cachewarden::cache::codec::CacheFileHeader;

fuzz_target!(|data: &[u8]| {
    if let Some(header) = CacheFileHeader::parse(data) {
        let bytes = header.to_bytes();
        assert_eq!(CacheFileHeader::parse(&bytes), Some(header));
    }
});
