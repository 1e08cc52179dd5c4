//! STUN codec benchmarks
//!
//! Benchmarks binding request encoding and response decoding.
//!
//! Run with: `cargo bench --bench stun_codec`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nat1_stun::message::xor_mask;
use nat1_stun::{ChangeRequest, StunAttribute, StunMessage, TransactionId};
use std::net::{Ipv4Addr, SocketAddrV4};

fn response(extra_attrs: usize) -> Vec<u8> {
    let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 41000);
    let mut message = StunMessage::binding_response(TransactionId::random());
    for i in 0..extra_attrs {
        message.add_attribute(StunAttribute::new(0x8000 | i as u16, vec![0xAA; 12]));
    }
    message.add_attribute(StunAttribute::xor_mapped_address(mapped));
    message.add_attribute(StunAttribute::other_address(SocketAddrV4::new(
        Ipv4Addr::new(198, 51, 100, 2),
        3479,
    )));
    message.encode()
}

/// Benchmark binding request encoding
fn bench_encode_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_request");

    for (name, change) in [
        ("plain", ChangeRequest::NONE),
        ("change_port", ChangeRequest::PORT),
        ("change_ip_and_port", ChangeRequest::IP_AND_PORT),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(StunMessage::binding_request(black_box(change)).encode()));
        });
    }

    group.finish();
}

/// Benchmark response decoding with growing attribute lists
fn bench_decode_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_response");

    for extra in [0, 4, 16] {
        let bytes = response(extra);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(extra), &bytes, |b, bytes| {
            b.iter(|| {
                let message = StunMessage::decode(black_box(bytes)).unwrap();
                black_box(message.mapped_address().unwrap());
                black_box(message.other_address().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark XOR address masking
fn bench_xor_mask(c: &mut Criterion) {
    let addr = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 41000);
    c.bench_function("xor_mask", |b| b.iter(|| black_box(xor_mask(black_box(addr)))));
}

criterion_group!(benches, bench_encode_request, bench_decode_response, bench_xor_mask);
criterion_main!(benches);
