use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use ttl_cache_rs::{encode_key, key_source, Lookup, ResultCache, TtlCache, TtlCacheConfig};

fn ttl_cache() -> TtlCache<String, u64> {
    let cache = TtlCache::new(TtlCacheConfig {
        ttl: Duration::from_secs(300),
        initial_len: 1024,
    });
    for i in 0..1_000u64 {
        cache.put(format!("key{i}"), i);
    }
    cache
}

fn bench_ttl_ops(c: &mut Criterion) {
    let cache = ttl_cache();
    let hit = "key500".to_string();
    let miss = "missing".to_string();

    c.bench_function("ttl_get_hit", |b| {
        b.iter(|| cache.get(black_box(&hit)))
    });
    c.bench_function("ttl_get_miss", |b| {
        b.iter(|| cache.get(black_box(&miss)))
    });
    c.bench_function("ttl_has", |b| {
        b.iter(|| cache.has(black_box(&hit)))
    });
    c.bench_function("ttl_set_overwrite", |b| {
        b.iter(|| cache.set(black_box(hit.clone()), black_box(1)))
    });
}

fn bench_key_encoding(c: &mut Criterion) {
    c.bench_function("encode_key_int", |b| {
        b.iter(|| encode_key("id", &[black_box(&42u64)]))
    });
    c.bench_function("encode_key_mixed", |b| {
        b.iter(|| {
            encode_key(
                "user",
                &[black_box(&42u64), &"alice@example.com", &true],
            )
        })
    });
}

#[derive(Clone)]
struct Row {
    id: u64,
    name: String,
}

key_source!(Row { id, name });

fn bench_result_load(c: &mut Criterion) {
    let cache: ResultCache<Row, String> = ResultCache::new(
        vec![Lookup::new("id"), Lookup::new("name")],
        Row::clone,
        None,
    );
    cache
        .store(
            Row {
                id: 7,
                name: "alice".into(),
            },
            || Ok(()),
        )
        .unwrap();

    c.bench_function("result_load_hit", |b| {
        b.iter(|| {
            cache
                .load("id", || Err("unreachable".to_string()), &[black_box(&7u64)])
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_ttl_ops, bench_key_encoding, bench_result_load);
criterion_main!(benches);
