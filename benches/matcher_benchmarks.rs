use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use indrajala::event::{has_wildcards, topic_matches};

fn bench_exact(c: &mut Criterion) {
    c.bench_function("topic_matches exact", |b| {
        b.iter(|| {
            topic_matches(
                black_box("$event/measurement/temperature/living"),
                black_box("$event/measurement/temperature/living"),
            )
        })
    });
}

fn bench_plus(c: &mut Criterion) {
    c.bench_function("topic_matches plus", |b| {
        b.iter(|| {
            topic_matches(
                black_box("$event/measurement/temperature/living"),
                black_box("$event/+/temperature/+"),
            )
        })
    });
}

fn bench_hash(c: &mut Criterion) {
    c.bench_function("topic_matches hash", |b| {
        b.iter(|| {
            topic_matches(
                black_box("$event/measurement/temperature/living"),
                black_box("$event/#"),
            )
        })
    });
}

fn bench_miss(c: &mut Criterion) {
    c.bench_function("topic_matches miss", |b| {
        b.iter(|| {
            topic_matches(
                black_box("$event/measurement/temperature/living"),
                black_box("$sys/+/msgpersec"),
            )
        })
    });
}

fn bench_has_wildcards(c: &mut Criterion) {
    c.bench_function("has_wildcards", |b| {
        b.iter(|| has_wildcards(black_box("$event/measurement/+/living")))
    });
}

criterion_group!(
    benches,
    bench_exact,
    bench_plus,
    bench_hash,
    bench_miss,
    bench_has_wildcards
);
criterion_main!(benches);
