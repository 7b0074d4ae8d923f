//! Convergence tests for the replicated record store.
//!
//! These exercise pairs and triples of stores under concurrent edits,
//! deletions, shuffled and duplicated delivery, change compression and
//! reloads from pre-existing change sets. After full exchange, every
//! replica must report the same data.

use cvrs_core::{compress_changes, Change, RecordStore};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use ulid::Ulid;

fn uid() -> String {
    Ulid::new().to_string()
}

fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn field_of(store: &RecordStore<String, String>, id: &str, col: &str) -> Option<String> {
    store
        .get_record(&id.to_string())
        .and_then(|r| r.fields.get(col).cloned())
}

// ============================================================================
// Concurrent Edits
// ============================================================================

#[test]
fn test_concurrent_insert_resolves_by_node_id() {
    let mut n1: RecordStore<String, String> = RecordStore::new(1);
    let mut n2: RecordStore<String, String> = RecordStore::new(2);

    let record_id = uid();
    let changes1 = n1.insert_or_update(record_id.clone(), fields(&[("tag", "n1-tag")]));
    let changes2 = n2.insert_or_update(record_id.clone(), fields(&[("tag", "n2-tag")]));

    n1.merge_changes(&changes2, false);
    n2.merge_changes(&changes1, false);

    assert_eq!(n1.get_data(), n2.get_data());
    // Same col_version and db_version on both sides, so the higher node id wins
    assert_eq!(field_of(&n1, &record_id, "tag").as_deref(), Some("n2-tag"));
}

#[test]
fn test_concurrent_updates_same_column() {
    let mut n1: RecordStore<String, String> = RecordStore::new(1);
    let mut n2: RecordStore<String, String> = RecordStore::new(2);

    let record_id = uid();
    let init = fields(&[("id", record_id.as_str()), ("tag", "initial")]);
    let changes1 = n1.insert_or_update(record_id.clone(), init.clone());
    let changes2 = n2.insert_or_update(record_id.clone(), init);
    n1.merge_changes(&changes2, false);
    n2.merge_changes(&changes1, false);

    let update1 = n1.insert_or_update(record_id.clone(), fields(&[("tag", "from-n1")]));
    let update2 = n2.insert_or_update(record_id.clone(), fields(&[("tag", "from-n2")]));
    n1.merge_changes(&update2, false);
    n2.merge_changes(&update1, false);

    assert_eq!(n1.get_data(), n2.get_data());
    assert_eq!(field_of(&n1, &record_id, "tag").as_deref(), Some("from-n2"));
}

#[test]
fn test_higher_update_count_beats_node_id() {
    let mut n1: RecordStore<String, String> = RecordStore::new(1);
    let mut n2: RecordStore<String, String> = RecordStore::new(2);

    let record_id = uid();
    let init = fields(&[("tag", "initial")]);
    let changes1 = n1.insert_or_update(record_id.clone(), init.clone());
    let changes2 = n2.insert_or_update(record_id.clone(), init);
    n1.merge_changes(&changes2, false);
    n2.merge_changes(&changes1, false);

    // n1 edits twice while offline, n2 only once
    n1.insert_or_update(record_id.clone(), fields(&[("tag", "n1-first")]));
    n1.insert_or_update(record_id.clone(), fields(&[("tag", "n1-second")]));
    n2.insert_or_update(record_id.clone(), fields(&[("tag", "n2-only")]));

    n2.merge_changes(&n1.get_changes_since(0), false);
    n1.merge_changes(&n2.get_changes_since(0), false);

    // Two updates mean a higher col_version; node id never gets a say
    assert_eq!(field_of(&n1, &record_id, "tag").as_deref(), Some("n1-second"));
    assert_eq!(n1.get_data(), n2.get_data());
}

#[test]
fn test_offline_divergence_full_exchange() {
    let mut n1: RecordStore<String, String> = RecordStore::new(1);
    let mut n2: RecordStore<String, String> = RecordStore::new(2);

    let r1 = uid();
    let r2 = uid();
    n1.insert_or_update(r1.clone(), fields(&[("tag", "node1-record")]));
    n2.insert_or_update(r2.clone(), fields(&[("tag", "node2-record")]));

    n2.merge_changes(&n1.get_changes_since(0), false);
    n1.merge_changes(&n2.get_changes_since(0), false);

    assert!(n1.contains_record(&r1) && n1.contains_record(&r2));
    assert!(n2.contains_record(&r1) && n2.contains_record(&r2));
    assert_eq!(n1.get_data(), n2.get_data());
}

#[test]
fn test_three_replica_exchange_and_clock_progress() {
    let mut nodes: Vec<RecordStore<String, String>> =
        (1..=3).map(RecordStore::new).collect();

    for (i, node) in nodes.iter_mut().enumerate() {
        let record_id = uid();
        node.insert_or_update(record_id, fields(&[("origin", &format!("node-{}", i + 1))]));
    }

    // Two full gossip rounds
    for _ in 0..2 {
        for i in 0..nodes.len() {
            for j in 0..nodes.len() {
                if i != j {
                    let changes = nodes[i].get_changes_since(0);
                    nodes[j].merge_changes(&changes, false);
                }
            }
        }
    }

    assert_eq!(nodes[0].get_data(), nodes[1].get_data());
    assert_eq!(nodes[1].get_data(), nodes[2].get_data());
    for node in &nodes {
        assert!(node.clock().current_time() >= 3);
    }
}

// ============================================================================
// Deletion & Tombstones
// ============================================================================

#[test]
fn test_delete_propagates_and_blocks_reinsert() {
    let mut n1: RecordStore<String, String> = RecordStore::new(1);
    let mut n2: RecordStore<String, String> = RecordStore::new(2);

    let record_id = uid();
    let reinsert = fields(&[("tag", "resurrect")]);
    n1.insert_or_update(record_id.clone(), fields(&[("tag", "short-lived")]));
    n1.delete_record(&record_id);

    n2.merge_changes(&n1.get_changes_since(0), false);

    // The tombstone travelled; a fresh insert on the other side must bounce
    assert!(n2.is_tombstoned(&record_id));
    let rejected = n2.insert_or_update(record_id.clone(), reinsert);
    assert!(rejected.is_empty());

    n1.merge_changes(&n2.get_changes_since(0), false);
    for node in [&n1, &n2] {
        let record = node.get_record(&record_id).unwrap();
        assert!(record.fields.is_empty());
        assert!(record.is_tombstoned());
    }
    assert_eq!(n1.get_data(), n2.get_data());
}

#[test]
fn test_concurrent_update_loses_against_deletion() {
    let mut n1: RecordStore<String, String> = RecordStore::new(1);
    let mut n2: RecordStore<String, String> = RecordStore::new(2);

    let record_id = uid();
    n1.insert_or_update(record_id.clone(), fields(&[("tag", "initial")]));
    n2.merge_changes(&n1.get_changes_since(0), false);

    let mark = n1.clock().current_time();
    n1.delete_record(&record_id);
    n2.insert_or_update(record_id.clone(), fields(&[("tag", "offline-edit")]));

    n2.merge_changes(&n1.get_changes_since(mark), false);
    n1.merge_changes(&n2.get_changes_since(mark), false);

    for node in [&n1, &n2] {
        assert!(node.is_tombstoned(&record_id));
        assert!(node.get_record(&record_id).unwrap().fields.is_empty());
    }
    assert_eq!(n1.get_data(), n2.get_data());
}

// ============================================================================
// Delivery Order, Duplication, Idempotence
// ============================================================================

#[test]
fn test_convergence_under_shuffled_and_duplicated_delivery() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7_101_317);

    // Build a history with overwrites, a deletion and a column clear
    let mut source: RecordStore<String, String> = RecordStore::new(1);
    let keep = uid();
    let gone = uid();
    let mut history: Vec<Change<String, String>> = Vec::new();
    history.extend(source.insert_or_update(keep.clone(), fields(&[("a", "1"), ("b", "2")])));
    history.extend(source.insert_or_update(gone.clone(), fields(&[("x", "9")])));
    history.extend(source.insert_or_update(keep.clone(), fields(&[("a", "3")])));
    history.extend(source.delete_record(&gone));
    history.push(Change::clear(keep.clone(), "b", 2, source.clock().current_time() + 1, 1));

    // Duplicate a few entries to simulate at-least-once delivery
    let dupes: Vec<_> = history.iter().step_by(2).cloned().collect();
    history.extend(dupes);

    let mut baseline: Option<_> = None;
    for _ in 0..8 {
        let mut shuffled = history.clone();
        shuffled.shuffle(&mut rng);

        let mut replica: RecordStore<String, String> = RecordStore::new(2);
        replica.merge_changes(&shuffled, false);

        let data = replica.get_data();
        match &baseline {
            None => baseline = Some(data),
            Some(expected) => assert_eq!(&data, expected),
        }
    }

    let final_state = baseline.unwrap();
    let keep_record = final_state.get(&keep).unwrap();
    assert_eq!(keep_record.fields.get("a"), Some(&"3".to_string()));
    assert!(keep_record.fields.get("b").is_none());
    assert!(final_state.get(&gone).unwrap().is_tombstoned());
}

#[test]
fn test_merge_twice_equals_merge_once() {
    let mut source: RecordStore<String, String> = RecordStore::new(1);
    let record_id = uid();
    source.insert_or_update(record_id.clone(), fields(&[("a", "1"), ("b", "2")]));
    source.delete_record(&record_id);
    let changes = source.get_changes_since(0);

    let mut target: RecordStore<String, String> = RecordStore::new(2);
    target.merge_changes(&changes, false);
    let once = target.get_data();
    target.merge_changes(&changes, false);
    target.merge_changes(&changes, false);

    assert_eq!(target.get_data(), once);
}

// ============================================================================
// Compression Soundness
// ============================================================================

#[test]
fn test_compressed_history_produces_identical_state() {
    let mut source: RecordStore<String, String> = RecordStore::new(1);
    let r1 = uid();
    let r2 = uid();

    let mut history: Vec<Change<String, String>> = Vec::new();
    history.extend(source.insert_or_update(r1.clone(), fields(&[("a", "1"), ("b", "2")])));
    history.extend(source.insert_or_update(r1.clone(), fields(&[("a", "3")])));
    history.extend(source.insert_or_update(r2.clone(), fields(&[("x", "once")])));
    history.extend(source.insert_or_update(r1.clone(), fields(&[("a", "4"), ("b", "5")])));
    history.extend(source.delete_record(&r2));

    let mut compressed = history.clone();
    compress_changes(&mut compressed);
    assert!(compressed.len() < history.len());

    let mut via_history: RecordStore<String, String> = RecordStore::new(2);
    let mut via_compressed: RecordStore<String, String> = RecordStore::new(2);
    via_history.merge_changes(&history, false);
    via_compressed.merge_changes(&compressed, false);

    assert_eq!(via_history.get_data(), via_compressed.get_data());
    assert_eq!(via_history.get_data(), source.get_data());
}

// ============================================================================
// Delta Extraction
// ============================================================================

#[test]
fn test_delta_rebuilds_an_empty_peer() {
    let mut source: RecordStore<String, String> = RecordStore::new(1);
    let r1 = uid();
    let r2 = uid();
    source.insert_or_update(r1.clone(), fields(&[("name", "first"), ("rank", "1")]));
    source.insert_or_update(r2.clone(), fields(&[("name", "second")]));
    source.insert_or_update(r1.clone(), fields(&[("rank", "2")]));

    let mut peer: RecordStore<String, String> = RecordStore::new(1);
    peer.merge_changes(&source.get_changes_since(0), false);
    assert_eq!(peer.get_data(), source.get_data());

    // Incremental catch-up from a mid-history cursor
    let mark = source.clock().current_time();
    source.insert_or_update(r2.clone(), fields(&[("name", "renamed")]));
    source.delete_record(&r1);

    peer.merge_changes(&source.get_changes_since(mark), false);
    assert_eq!(peer.get_data(), source.get_data());
}

#[test]
fn test_reload_then_merge_keeps_cursor_semantics() {
    // First session: one record, persisted as its change set
    let record_id = uid();
    let mut first: RecordStore<String, String> = RecordStore::new(1);
    first.insert_or_update(record_id.clone(), fields(&[("field1", "value1")]));
    let persisted = first.get_changes_since(0);
    let top = first.clock().current_time();

    // Second session: reload, merge a remote change, write a new column
    let mut reloaded: RecordStore<String, String> = RecordStore::from_changes(1, persisted);
    let remote = Change::set(record_id.clone(), "field2", "value2".to_string(), 1, top + 1, 2);
    reloaded.merge_changes(&[remote], false);
    let mark = reloaded.clock().current_time();
    reloaded.insert_or_update(record_id.clone(), fields(&[("field3", "value3")]));

    let delta = reloaded.get_changes_since(mark);
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].col_name.as_deref(), Some("field3"));
}

// ============================================================================
// Wire Shape
// ============================================================================

#[test]
fn test_change_batch_survives_json_round_trip() {
    let mut source: RecordStore<String, String> = RecordStore::new(3);
    let record_id = uid();
    source.insert_or_update(record_id.clone(), fields(&[("a", "1")]));
    source.delete_record(&record_id);
    let batch = source.get_changes_since(0);

    let encoded = serde_json::to_string(&batch).unwrap();
    let decoded: Vec<Change<String, String>> = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, batch);

    let mut target: RecordStore<String, String> = RecordStore::new(4);
    target.merge_changes(&decoded, false);
    assert_eq!(target.get_data(), source.get_data());
}
