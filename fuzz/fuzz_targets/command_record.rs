#![no_main]

use libfuzzer_sys::fuzz_target;

use cachewarden::server::command::{CommandRecord, RECORD_LEN};

fuzz_target!(|data: &[u8]| {
    if data.len() >= RECORD_LEN {
        let mut raw = [0u8; RECORD_LEN];
        raw.copy_from_slice(&data[..RECORD_LEN]);
        let _ = CommandRecord::decode(&raw);
    }
});
