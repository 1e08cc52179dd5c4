//! Fuzz target for structured binding responses
//!
//! Builds responses from arbitrary attributes so the address parsers see
//! well-framed but hostile values.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nat1_stun::message::BIND_RESPONSE;
use nat1_stun::{StunAttribute, StunMessage, TransactionId};

#[derive(Debug, Arbitrary)]
struct Input {
    transaction_id: [u8; 16],
    attributes: Vec<(u16, Vec<u8>)>,
}

fuzz_target!(|input: Input| {
    let mut message = StunMessage::new(BIND_RESPONSE, TransactionId::from_bytes(input.transaction_id));
    for (attr_type, mut value) in input.attributes.into_iter().take(16) {
        value.truncate(64);
        message.add_attribute(StunAttribute::new(attr_type, value));
    }

    let encoded = message.encode();
    let decoded = StunMessage::decode(&encoded).expect("encoded message must decode");
    assert_eq!(decoded, message);
    let _ = decoded.mapped_address();
    let _ = decoded.other_address();
});
