use kestrel::surrogate::{ApproxData, BuildState, FidelityKey, SurrogatePoint};
use kestrel::{ConsistencyError, InputPoint};

fn key(tag: &str) -> FidelityKey {
    FidelityKey::new(tag)
}

fn sample(x: f64, tag: &str) -> SurrogatePoint {
    SurrogatePoint::new(InputPoint::new(vec![x]), 2.0 * x, key(tag))
}

fn active_values(store: &ApproxData) -> Vec<f64> {
    store.active_points().iter().map(|p| p.value()).collect()
}

#[test]
fn append_twice_pop_once_equals_single_append() {
    // Idempotent append: two identical appends then one pop leave the store
    // exactly as after one append.
    let mut reference = ApproxData::new(key("lofi"));
    let batch = vec![sample(1.0, "lofi"), sample(2.0, "lofi")];
    reference.append(batch.clone());

    let mut store = ApproxData::new(key("lofi"));
    store.append(batch.clone());
    store.append(batch);
    store.pop().unwrap();

    assert_eq!(active_values(&store), active_values(&reference));
}

#[test]
fn push_of_pop_is_identity() {
    // Pop/push inverse law over an arbitrary append sequence.
    let mut store = ApproxData::new(key("lofi"));
    store.append(vec![sample(1.0, "lofi")]);
    store.append(vec![sample(2.0, "lofi"), sample(3.0, "lofi")]);
    store.append(vec![sample(4.0, "lofi")]);

    let points_before = active_values(&store);
    let depth_before = store.popped_depth();

    store.pop().unwrap();
    store.push().unwrap();

    assert_eq!(active_values(&store), points_before);
    assert_eq!(store.popped_depth(), depth_before);
}

#[test]
fn speculative_trial_and_rollback() {
    // The trust-region pattern: append trial data, build, reject, pop back,
    // then push forward again when the step is re-accepted.
    let mut store = ApproxData::new(key("lofi"));
    store.replace_anchor(sample(0.0, "lofi"));
    store.append(vec![sample(1.0, "lofi")]);
    store.build();
    assert_eq!(store.state(), BuildState::Built { appends: 1 });

    // Trial batch.
    store.append(vec![sample(2.0, "lofi")]);
    assert_eq!(store.state(), BuildState::Building { appends: 2 });
    assert_eq!(active_values(&store), vec![0.0, 2.0, 4.0]);

    // Rejected: roll back. The anchor is a hard constraint and survives.
    store.pop().unwrap();
    assert_eq!(active_values(&store), vec![0.0, 2.0]);
    assert!(store.anchor().is_some());

    // Re-accepted: the popped batch comes back, most recent first.
    store.push().unwrap();
    assert_eq!(active_values(&store), vec![0.0, 2.0, 4.0]);
}

#[test]
fn push_on_empty_undo_stack_errors() {
    let mut store = ApproxData::new(key("lofi"));
    store.append(vec![sample(1.0, "lofi")]);
    assert!(matches!(
        store.push().unwrap_err(),
        ConsistencyError::UndoStackEmpty
    ));
}

#[test]
fn combined_key_promotion_is_two_phase() {
    let mut store = ApproxData::new(key("truth"));
    store.append(vec![sample(1.0, "truth")]);
    store.set_active_key(key("discrepancy"));
    store.append(vec![sample(10.0, "discrepancy")]);

    store.combine(&key("truth"), key("combined")).unwrap();
    // Until promote, the active representation is untouched.
    assert_eq!(store.active_key(), &key("discrepancy"));
    assert_eq!(active_values(&store), vec![20.0]);

    store.promote().unwrap();
    assert_eq!(store.active_key(), &key("combined"));
    assert_eq!(active_values(&store), vec![20.0, 2.0]);

    store.clear_combined();
    assert!(matches!(
        store.promote().unwrap_err(),
        ConsistencyError::NothingCombined
    ));
}

#[test]
fn finalize_makes_rollback_permanent() {
    let mut store = ApproxData::new(key("lofi"));
    let keep = store.append(vec![sample(1.0, "lofi")]);
    store.append(vec![sample(2.0, "lofi")]);
    store.pop().unwrap();

    store.finalize();

    // The popped batch is physically gone; the kept one is untouched.
    assert!(matches!(
        store.push().unwrap_err(),
        ConsistencyError::UndoStackEmpty
    ));
    assert_eq!(active_values(&store), vec![2.0]);
    store.pop_batch(keep).unwrap();
    assert!(active_values(&store).is_empty());
}

#[test]
fn targeted_pop_by_token() {
    let mut store = ApproxData::new(key("lofi"));
    let first = store.append(vec![sample(1.0, "lofi")]);
    store.append(vec![sample(2.0, "lofi")]);

    store.pop_batch(first).unwrap();
    assert_eq!(active_values(&store), vec![4.0]);

    // LIFO restore brings back the targeted batch, appended at the end.
    store.push().unwrap();
    assert_eq!(active_values(&store), vec![4.0, 2.0]);
}
