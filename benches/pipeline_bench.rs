//! Benchmarks for the per-packet hot path: tag + analyse
//!
//! Run with: cargo bench

use chrono::Local;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use guardwatch::capture::DecodedPacket;
use guardwatch::directory::{Relay, RelaySnapshot};
use guardwatch::membership::NetworkMembership;
use guardwatch::reputation::{ReputationEngine, ReputationPolicy};
use guardwatch::tagger::PacketTagger;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn tagger() -> PacketTagger {
    PacketTagger::new(NetworkMembership::new(vec!["192.168.1.20/24"
        .parse()
        .unwrap()]))
}

/// Directory the size of a real guard listing (a few thousand relays).
fn large_snapshot(relays: u32) -> Arc<RelaySnapshot> {
    let relays = (0..relays)
        .map(|i| {
            let ip = Ipv4Addr::from(0x0a00_0000 + i);
            Relay::new(format!("relay{}", i), vec![format!("{}:9001", ip)])
        })
        .collect();
    Arc::new(RelaySnapshot::new(Local::now(), relays))
}

fn bench_tag(c: &mut Criterion) {
    let tagger = tagger();
    let packet = DecodedPacket::tcp(
        IpAddr::from([192, 168, 1, 20]),
        IpAddr::from([198, 51, 100, 7]),
    );
    let now = Local::now();

    c.bench_function("tag_outbound_tcp", |b| {
        b.iter(|| tagger.tag(black_box(&packet), now))
    });
}

fn bench_analyse_known_partner(c: &mut Criterion) {
    let tagger = tagger();
    let mut engine = ReputationEngine::new(large_snapshot(4000), ReputationPolicy::default());
    let tagged = tagger.tag(
        &DecodedPacket::tcp(IpAddr::from([192, 168, 1, 20]), IpAddr::from([10, 0, 0, 7])),
        Local::now(),
    );
    engine.analyze(tagged.clone());

    c.bench_function("analyse_known_partner", |b| {
        b.iter(|| engine.analyze(black_box(tagged.clone())))
    });
}

fn bench_analyse_new_partner(c: &mut Criterion) {
    let tagger = tagger();
    let snapshot = large_snapshot(4000);
    let mut next = 0u32;

    // Worst case: every packet is a first sighting and walks the directory
    c.bench_function("analyse_new_partner_4000_relays", |b| {
        let mut engine = ReputationEngine::new(snapshot.clone(), ReputationPolicy::default());
        b.iter(|| {
            next = next.wrapping_add(1);
            let partner = IpAddr::from(Ipv4Addr::from(0xcb00_0000 + next));
            let tagged = tagger.tag(
                &DecodedPacket::tcp(IpAddr::from([192, 168, 1, 20]), partner),
                Local::now(),
            );
            engine.analyze(black_box(tagged))
        })
    });
}

criterion_group!(
    benches,
    bench_tag,
    bench_analyse_known_partner,
    bench_analyse_new_partner
);
criterion_main!(benches);
