use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dnswarden::dns::{Answer, DnsClass, DnsHeader, DnsQr, DnsQuestion, DnsType, RData};
use dnswarden::DecodedPacket;
use std::net::Ipv4Addr;

fn sample_query() -> Vec<u8> {
    DecodedPacket {
        header: DnsHeader { id: 0x1234, qr: DnsQr::Query, rd: true, qdcount: 1, ..DnsHeader::default() },
        questions: vec![DnsQuestion {
            name: "www.example.com".to_string(),
            qtype: DnsType::A,
            qclass: DnsClass::IN,
        }],
        answers: vec![],
        authorities: vec![],
        additionals: vec![],
    }
    .encode()
}

fn sample_response() -> Vec<u8> {
    DecodedPacket {
        header: DnsHeader {
            id: 0x1234,
            qr: DnsQr::Response,
            rd: true,
            ra: true,
            qdcount: 1,
            ancount: 1,
            ..DnsHeader::default()
        },
        questions: vec![DnsQuestion {
            name: "www.example.com".to_string(),
            qtype: DnsType::A,
            qclass: DnsClass::IN,
        }],
        answers: vec![Answer {
            name: "www.example.com".to_string(),
            rtype: DnsType::A,
            rclass: DnsClass::IN,
            ttl: Some(300),
            data: RData::A(Ipv4Addr::new(93, 184, 216, 34)),
        }],
        authorities: vec![],
        additionals: vec![],
    }
    .encode()
}

fn bench_decode_query(c: &mut Criterion) {
    let query = sample_query();
    c.bench_function("decode query packet", |b| {
        b.iter(|| black_box(DecodedPacket::decode(black_box(&query)).unwrap()));
    });
}

fn bench_decode_response(c: &mut Criterion) {
    let response = sample_response();
    c.bench_function("decode response packet", |b| {
        b.iter(|| black_box(DecodedPacket::decode(black_box(&response)).unwrap()));
    });
}

fn bench_encode_response(c: &mut Criterion) {
    let decoded = DecodedPacket::decode(&sample_response()).unwrap();
    c.bench_function("encode response packet", |b| {
        b.iter(|| black_box(decoded.clone().encode()));
    });
}

fn bench_cache_key(c: &mut Criterion) {
    let question = DnsQuestion { name: "www.example.com".to_string(), qtype: DnsType::A, qclass: DnsClass::IN };
    c.bench_function("derive cache key", |b| {
        b.iter(|| black_box(dnswarden::dns::cache_key(black_box(&question))));
    });
}

criterion_group!(benches, bench_decode_query, bench_decode_response, bench_encode_response, bench_cache_key);
criterion_main!(benches);
