//! Fuzz target for EnvelopeCodec::decode.
//!
//! Arbitrary bytes must either decode or fail with an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pars_protocol::EnvelopeCodec;

fuzz_target!(|data: &[u8]| {
    let codec = EnvelopeCodec::default();
    if let Ok(envelope) = codec.decode(data) {
        // Anything that decodes re-encodes to the same bytes.
        let bytes = codec.encode(&envelope).unwrap();
        assert_eq!(bytes, data);
        assert!(envelope.ttl() >= 0);
    }
});
