//! Fuzz target for SessionId::from_hex.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pars_identity::SessionId;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(id) = SessionId::from_hex(s) {
            // 66 hex digits, prefix first.
            let hex = id.to_hex();
            assert_eq!(hex.len(), 66);
            assert_eq!(SessionId::from_hex(&hex).unwrap(), id);
            assert_eq!(SessionId::from_bytes(&id.to_bytes()).unwrap(), id);
        }
    }
});
