//! Fuzz target for STUN message decoding
//!
//! The decoder and the address accessors must return `Ok` or `Err` for any
//! input, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nat1_stun::StunMessage;

fuzz_target!(|data: &[u8]| {
    let _ = StunMessage::payload_len(data);

    if let Ok(message) = StunMessage::decode(data) {
        let _ = message.class();
        let _ = message.mapped_address();
        let _ = message.other_address();

        // Re-encoding a decoded message must decode again
        let reencoded = message.encode();
        let _ = StunMessage::decode(&reencoded);
    }
});
