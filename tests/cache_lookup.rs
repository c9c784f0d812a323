use kestrel::{
    EvalId, EvaluationRecord, EvaluationStore, InputPoint, RequestCode, RequestSpec, Response,
};

fn record_with(
    producer: &str,
    coords: Vec<f64>,
    spec: RequestSpec,
    id: u64,
    value: f64,
) -> EvaluationRecord {
    let mut resp = Response::new(spec);
    for i in 0..resp.len() {
        if resp.active().code(i).wants_value() {
            resp.set_value(i, value).unwrap();
        }
        if resp.active().code(i).wants_gradient() {
            let dims = resp.active().deriv_vars().len();
            resp.set_gradient(i, vec![0.5; dims]).unwrap();
        }
    }
    EvaluationRecord::new(producer, EvalId::RunLocal(id), InputPoint::new(coords), resp).unwrap()
}

fn vg() -> RequestCode {
    RequestCode::VALUE | RequestCode::GRADIENT
}

#[test]
fn value_record_misses_until_gradient_record_lands() {
    // Insert a {VALUE} record for ("sim1", [1.0, 2.0]); a {VALUE, GRADIENT}
    // lookup must miss. Adding a richer record for the same pair makes it
    // hit while the original value-only lookup still succeeds.
    let mut store = EvaluationStore::new();
    let point = InputPoint::new(vec![1.0, 2.0]);

    store.insert(record_with(
        "sim1",
        vec![1.0, 2.0],
        RequestSpec::uniform(1, RequestCode::VALUE),
        1,
        3.0,
    ));

    let value_query = RequestSpec::uniform(1, RequestCode::VALUE);
    let rich_query = RequestSpec::with_deriv_vars(vec![vg()], vec![0, 1]);

    assert!(store.lookup("sim1", &point, &value_query).is_some());
    assert!(store.lookup("sim1", &point, &rich_query).is_none());

    store.insert(record_with(
        "sim1",
        vec![1.0, 2.0],
        RequestSpec::with_deriv_vars(vec![vg()], vec![0, 1]),
        2,
        3.0,
    ));

    let rich_hit = store.lookup("sim1", &point, &rich_query).unwrap();
    assert!(rich_hit.satisfied().contains(&rich_query));

    // Either stored record is a valid answer for the value-only query.
    let value_hit = store.lookup("sim1", &point, &value_query).unwrap();
    assert!(value_hit.satisfied().contains(&value_query));
}

#[test]
fn containment_is_monotone() {
    // For any q1 ⊆ q2: if lookup succeeds for q2 it must succeed for q1,
    // and the returned record must satisfy q1.
    let mut store = EvaluationStore::new();
    let point = InputPoint::new(vec![0.25, -1.5]);
    store.insert(record_with(
        "sim1",
        vec![0.25, -1.5],
        RequestSpec::with_deriv_vars(vec![vg(), RequestCode::VALUE], vec![0, 1]),
        1,
        2.0,
    ));

    let q2 = RequestSpec::with_deriv_vars(vec![vg(), RequestCode::VALUE], vec![0, 1]);
    let subsets = [
        RequestSpec::with_deriv_vars(vec![vg(), RequestCode::NONE], vec![0]),
        RequestSpec::with_deriv_vars(vec![RequestCode::GRADIENT, RequestCode::VALUE], vec![1]),
        RequestSpec::new(vec![RequestCode::VALUE, RequestCode::VALUE]),
        RequestSpec::empty(2),
    ];

    assert!(store.lookup("sim1", &point, &q2).is_some());
    for q1 in &subsets {
        assert!(q2.contains(q1), "test premise: q1 must be a subset of q2");
        let hit = store
            .lookup("sim1", &point, q1)
            .expect("subset query must hit when the superset query hits");
        assert!(hit.satisfied().contains(q1));
    }
}

#[test]
fn equality_is_bitwise_not_tolerance_based() {
    let mut store = EvaluationStore::new();
    store.insert(record_with(
        "sim1",
        vec![0.1 + 0.2],
        RequestSpec::uniform(1, RequestCode::VALUE),
        1,
        1.0,
    ));

    let query = RequestSpec::uniform(1, RequestCode::VALUE);
    // 0.3 != 0.1 + 0.2 in IEEE 754 bits.
    assert!(store
        .lookup("sim1", &InputPoint::new(vec![0.3]), &query)
        .is_none());
    // The secondary linear scan recovers the match under a tolerance.
    assert!(store
        .lookup_approx("sim1", &InputPoint::new(vec![0.3]), 1e-12, &query)
        .is_some());
}

#[test]
fn producer_identity_partitions_the_cache() {
    let mut store = EvaluationStore::new();
    let spec = RequestSpec::uniform(1, RequestCode::VALUE);
    store.insert(record_with("sim1", vec![1.0], spec.clone(), 1, 1.0));
    store.insert(record_with("sim2", vec![1.0], spec.clone(), 2, 2.0));

    let point = InputPoint::new(vec![1.0]);
    let hit1 = store.lookup("sim1", &point, &spec).unwrap();
    let hit2 = store.lookup("sim2", &point, &spec).unwrap();
    assert_eq!(hit1.producer_id(), "sim1");
    assert_eq!(hit2.producer_id(), "sim2");
    assert_eq!(hit1.response().value(0), Some(1.0));
    assert_eq!(hit2.response().value(0), Some(2.0));
}

#[test]
fn temporal_replay_per_producer() {
    let mut store = EvaluationStore::new();
    let spec = RequestSpec::uniform(1, RequestCode::VALUE);
    store.insert(record_with("sim1", vec![1.0], spec.clone(), 1, 0.0));
    store.insert(record_with("sim2", vec![2.0], spec.clone(), 2, 0.0));
    store.insert(record_with("sim1", vec![3.0], spec.clone(), 3, 0.0));
    store.insert(record_with("sim1", vec![1.0], spec, 4, 0.0));

    let replay: Vec<u64> = store
        .records_for_producer("sim1")
        .filter_map(|r| r.eval_id().run_local())
        .collect();
    assert_eq!(replay, vec![1, 3, 4]);
}

#[test]
fn seeded_records_serve_lookups() {
    let mut store = EvaluationStore::new();
    let spec = RequestSpec::uniform(1, RequestCode::VALUE);
    store.seed_restored(vec![record_with("sim1", vec![1.0], spec.clone(), 7, 42.0)]);

    let hit = store
        .lookup("sim1", &InputPoint::new(vec![1.0]), &spec)
        .unwrap();
    assert_eq!(hit.eval_id(), EvalId::Restored(-7));
    assert_eq!(hit.response().value(0), Some(42.0));
}
