use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use kestrel::{
    EvalId, EvaluationRecord, EvaluationStore, InputPoint, RequestCode, RequestSpec, Response,
};

const STORE_SIZE: u64 = 10_000;

fn make_store() -> EvaluationStore {
    let mut store = EvaluationStore::new();
    for i in 0..STORE_SIZE {
        let x = i as f64 * 0.001;
        let spec = RequestSpec::uniform(3, RequestCode::VALUE);
        let mut resp = Response::new(spec);
        for j in 0..3 {
            resp.set_value(j, x + j as f64).unwrap();
        }
        let record = EvaluationRecord::new(
            "sim1",
            EvalId::RunLocal(i + 1),
            InputPoint::new(vec![x, -x, 1.0]),
            resp,
        )
        .unwrap();
        store.insert(record);
    }
    store
}

fn bench_lookup_hit(c: &mut Criterion) {
    let store = make_store();
    let query = RequestSpec::uniform(3, RequestCode::VALUE);
    // Rebuild the point exactly as the seeder did so the bits match.
    let x = 5000_f64 * 0.001;
    let point = InputPoint::new(vec![x, -x, 1.0]);

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));
    group.bench_function("lookup_hit", |b| {
        b.iter(|| {
            let hit = store.lookup("sim1", &point, &query);
            assert!(hit.is_some());
        });
    });
    group.finish();
}

fn bench_lookup_miss(c: &mut Criterion) {
    let store = make_store();
    let query = RequestSpec::uniform(3, RequestCode::VALUE);
    let point = InputPoint::new(vec![123.456, 0.0, 0.0]);

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));
    group.bench_function("lookup_miss", |b| {
        b.iter(|| {
            let hit = store.lookup("sim1", &point, &query);
            assert!(hit.is_none());
        });
    });
    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(STORE_SIZE));
    group.bench_function("insert_10k", |b| {
        b.iter(make_store);
    });
    group.finish();
}

criterion_group!(benches, bench_lookup_hit, bench_lookup_miss, bench_insert);
criterion_main!(benches);
