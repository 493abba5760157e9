//! Benchmarks for graph store primitives and a full fallback run.

use std::path::Path;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use brick_agent::agent::{FallbackProposer, LoopConfig, LoopController};
use brick_agent::graph::{BrickStore, StoreConfig};

fn building() -> BrickStore {
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures");
    let store = BrickStore::in_memory(StoreConfig::default()).unwrap();
    store.load_turtle_file(&fixtures.join("building.ttl")).unwrap();
    store.ingest_timeseries_csv(&fixtures.join("fcu.csv")).unwrap();
    store
}

fn bench_search(c: &mut Criterion) {
    let store = building();
    c.bench_function("search_room_temperature", |bench| {
        bench.iter(|| black_box(store.search("room temperature").unwrap()))
    });
}

fn bench_execute(c: &mut Criterion) {
    let store = building();
    let query = "SELECT ?timestamp ?value WHERE { bldg:RM_TEMP ref:hasObservation ?obs . \
                 ?obs ref:hasTimestamp ?timestamp . ?obs ref:hasValue ?value } \
                 ORDER BY DESC(?timestamp) LIMIT 10";
    c.bench_function("execute_observation_query", |bench| {
        bench.iter(|| black_box(store.execute(query)))
    });
}

fn bench_fallback_run(c: &mut Criterion) {
    let store = Arc::new(building());
    c.bench_function("fallback_run_happy_path", |bench| {
        bench.iter(|| {
            let mut controller = LoopController::new(
                store.clone(),
                Box::new(FallbackProposer::new()),
                LoopConfig::default(),
            );
            black_box(controller.run("What is the room temperature?").unwrap())
        })
    });
}

criterion_group!(benches, bench_search, bench_execute, bench_fallback_run);
criterion_main!(benches);
