//! History store benchmark suite
//!
//! - Ingest into memory and file backends as history grows
//! - Decoding and encoding of the persisted script
//! - Render projection over long suites

use bench_history::codec::{self, DEFAULT_VARIABLE};
use bench_history::render;
use bench_history::{
    BenchmarkRun, CommitRecord, Entry, FileBackend, HistoryDocument, HistoryStore, MemoryBackend, Person,
    StoreConfig,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::Map;
use tempfile::TempDir;

const REPO: &str = "https://github.com/aws/shim-loggers-for-containerd";

fn entry(i: u64) -> Entry {
    let commit = CommitRecord {
        author: Person::new("Bench Author", "author@example.invalid"),
        committer: Person::new("GitHub", "noreply@github.com"),
        distinct: true,
        id: format!("{i:040x}"),
        message: "bench commit".to_string(),
        timestamp: "2023-09-29T15:15:33-07:00".to_string(),
        tree_id: format!("{:040x}", i + 1),
        url: format!("{REPO}/commit/{i:040x}"),
        unknown: Map::new(),
    };
    let extra = "1 times\n2 procs";
    Entry::new(
        commit,
        1_696_025_833_179 + i,
        "go",
        vec![
            BenchmarkRun::new("BenchmarkFluentd - ns/op", (9_327_039_149 + i).into(), "ns/op").with_extra(extra),
            BenchmarkRun::new("BenchmarkFluentd - B/op", 40_993_112u64.into(), "B/op").with_extra(extra),
            BenchmarkRun::new("BenchmarkFluentd - allocs/op", 73_526u64.into(), "allocs/op").with_extra(extra),
        ],
    )
}

fn history(len: u64) -> HistoryDocument {
    let mut doc = HistoryDocument::new(REPO);
    for i in 0..len {
        doc.append("Benchmark for fluentd", entry(i));
    }
    doc
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.sample_size(20);

    for len in [10u64, 100, 1_000] {
        let seed = codec::encode(&history(len), DEFAULT_VARIABLE).unwrap();

        group.bench_with_input(BenchmarkId::new("memory", len), &len, |bencher, &len| {
            bencher.iter_with_setup(
                || HistoryStore::new(MemoryBackend::with_contents(seed.clone()), StoreConfig::default()).unwrap(),
                |store| black_box(store.ingest("Benchmark for fluentd", entry(len)).unwrap()),
            )
        });

        group.bench_with_input(BenchmarkId::new("file", len), &len, |bencher, &len| {
            bencher.iter_with_setup(
                || {
                    let dir = TempDir::new().unwrap();
                    let path = dir.path().join("data.js");
                    std::fs::write(&path, &seed).unwrap();
                    let store = HistoryStore::new(FileBackend::new(path), StoreConfig::default()).unwrap();
                    (dir, store)
                },
                |(_dir, store)| black_box(store.ingest("Benchmark for fluentd", entry(len)).unwrap()),
            )
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for len in [10u64, 1_000] {
        let doc = history(len);
        let bytes = codec::encode(&doc, DEFAULT_VARIABLE).unwrap();

        group.bench_with_input(BenchmarkId::new("decode", len), &bytes, |bencher, bytes| {
            bencher.iter(|| black_box(codec::decode(black_box(bytes), DEFAULT_VARIABLE).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("encode", len), &doc, |bencher, doc| {
            bencher.iter(|| black_box(codec::encode(black_box(doc), DEFAULT_VARIABLE).unwrap()))
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let doc = history(1_000);

    c.bench_function("render_1000", |bencher| {
        bencher.iter(|| black_box(render::render(black_box(&doc), "Benchmark for fluentd")))
    });
    c.bench_function("series_1000", |bencher| {
        let points = render::render(&doc, "Benchmark for fluentd");
        bencher.iter(|| black_box(render::series(black_box(&points))))
    });
}

criterion_group!(benches, bench_ingest, bench_codec, bench_render);
criterion_main!(benches);
