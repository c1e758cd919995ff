//! End-to-end set lifecycle, mutation and replay scenarios.
//!
//! Every test runs the full stack: executor classification, the invariant
//! writer, two-tier state staging, atomic block commit and, where a mutant
//! is involved, the rollback-and-replay engine.

use crate::harness::{deploy_candidate, invoke_candidate, query_candidate, TestNode};
use shared_types::{ErrorKind, InBlockTransaction, TxSetIndexEntry, TxSetStateValue};

/// A three-member set on chaincode `demo`; member `i` writes `active=t<i>`.
fn demo_set(txid: &str, default_index: u64) -> InBlockTransaction {
    InBlockTransaction::new_set(
        txid,
        vec![
            invoke_candidate("demo", "active=t0"),
            invoke_candidate("demo", "active=t1"),
            invoke_candidate("demo", "active=t2"),
        ],
        default_index,
    )
}

fn demo_extension(txid: &str) -> InBlockTransaction {
    InBlockTransaction::new_extension(
        txid,
        vec![
            invoke_candidate("demo", "active=t3"),
            invoke_candidate("demo", "active=t4"),
        ],
    )
}

// =============================================================================
// Set lifecycle
// =============================================================================

#[test]
fn test_introduction_tracks_state_and_runs_default() {
    let mut node = TestNode::new();
    let outcome = node.commit_batch(vec![demo_set("set-a", 1)]);
    assert!(outcome.tx_errors[0].is_none());

    let value = node.committed_set_state("set-a").unwrap();
    assert_eq!(
        value,
        TxSetStateValue {
            nonce: 1,
            intro_block: 1,
            last_modified_at_block: 1,
            index: 1,
            tx_number: 3,
            index_at_block: vec![TxSetIndexEntry::new(1, 2)],
        }
    );

    // Only the default member reached the VM.
    assert_eq!(node.executed_count(), 1);
    assert_eq!(node.committed_state("demo", "active"), Some(b"t1".to_vec()));
}

#[test]
fn test_extension_appends_without_execution() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    let executed_before = node.executed_count();

    let outcome = node.commit_batch(vec![demo_extension("set-a")]);
    assert!(outcome.tx_errors[0].is_none());

    let value = node.committed_set_state("set-a").unwrap();
    assert_eq!(value.nonce, 2);
    assert_eq!(value.intro_block, 1);
    assert_eq!(value.last_modified_at_block, 2);
    assert_eq!(value.index, 1);
    assert_eq!(value.tx_number, 5);
    assert_eq!(
        value.index_at_block,
        vec![TxSetIndexEntry::new(1, 2), TxSetIndexEntry::new(2, 4)]
    );

    // Extensions never dispatch to the VM.
    assert_eq!(node.executed_count(), executed_before);
    assert_eq!(node.committed_state("demo", "active"), Some(b"t1".to_vec()));
}

#[test]
fn test_extension_of_nonexistent_set_rejected() {
    let mut node = TestNode::new();
    let outcome = node.commit_batch(vec![InBlockTransaction::new_extension(
        "set-z",
        vec![invoke_candidate("demo", "active=zz")],
    )]);

    let err = outcome.tx_errors[0].as_ref().unwrap();
    assert!(err
        .to_string()
        .contains("cannot extend a non existent transactions set"));
    assert!(node.committed_set_state("set-z").is_none());
    assert_eq!(node.executed_count(), 0);
}

#[test]
fn test_single_candidate_set_is_untracked() {
    let mut node = TestNode::new();
    let tx = InBlockTransaction::new_set(
        "solo",
        vec![invoke_candidate("demo", "solo=ran")],
        0,
    );
    let outcome = node.commit_batch(vec![tx]);
    assert!(outcome.tx_errors[0].is_none());

    // The candidate executed, but no set state was created.
    assert_eq!(node.committed_state("demo", "solo"), Some(b"ran".to_vec()));
    assert!(node.committed_set_state("solo").is_none());
}

#[test]
fn test_current_default_resolved_by_id() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    node.commit_batch(vec![demo_extension("set-a")]);

    // The active member still lives in the introduction block.
    let spec = node
        .ledger()
        .get_current_default_by_id(&"set-a".into())
        .unwrap();
    assert_eq!(spec.payload, b"active=t1".to_vec());

    node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 4)]);

    // After the mutation the active member comes from the extension block.
    let spec = node
        .ledger()
        .get_current_default_by_id(&"set-a".into())
        .unwrap();
    assert_eq!(spec.payload, b"active=t4".to_vec());
}

#[test]
fn test_empty_set_rejected() {
    let mut node = TestNode::new();
    let outcome = node.commit_batch(vec![InBlockTransaction::new_set("empty", Vec::new(), 0)]);
    let err = outcome.tx_errors[0].as_ref().unwrap();
    assert!(err
        .to_string()
        .contains("at least a transaction to execute should be provided"));
}

#[test]
fn test_set_state_query_returns_serialized_value() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);

    let query = InBlockTransaction::new_query("q-1", "set-a");
    let output = node.executor.execute(&query).unwrap();
    let value = TxSetStateValue::from_bytes(&output.payload).unwrap();
    assert_eq!(value.index, 1);
    assert_eq!(value.tx_number, 3);

    // Querying an unknown set reports the missing resource.
    let missing = InBlockTransaction::new_query("q-2", "ghost");
    let err = node.executor.execute(&missing).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
}

// =============================================================================
// Mutation
// =============================================================================

#[test]
fn test_mutation_repoints_default_and_replays() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    node.commit_batch(vec![demo_extension("set-a")]);
    assert_eq!(node.committed_state("demo", "active"), Some(b"t1".to_vec()));

    let outcome = node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 0)]);
    assert!(outcome.tx_errors[0].is_none());

    let value = node.committed_set_state("set-a").unwrap();
    assert_eq!(value.nonce, 3);
    assert_eq!(value.index, 0);
    assert_eq!(value.last_modified_at_block, 3);
    // Mutation leaves the membership record untouched.
    assert_eq!(
        value.index_at_block,
        vec![TxSetIndexEntry::new(1, 2), TxSetIndexEntry::new(2, 4)]
    );

    // The replay re-executed the introduction with member 0 active.
    assert_eq!(node.committed_state("demo", "active"), Some(b"t0".to_vec()));
}

#[test]
fn test_mutation_into_extension_member() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    node.commit_batch(vec![demo_extension("set-a")]);

    // Index 3 is the first member contributed by the extension block.
    let outcome = node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 3)]);
    assert!(outcome.tx_errors[0].is_none());

    assert_eq!(node.committed_state("demo", "active"), Some(b"t3".to_vec()));
}

#[test]
fn test_replay_matches_chain_built_with_final_index() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    node.commit_batch(vec![demo_extension("set-a")]);
    node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 0)]);

    // A chain that used index 0 from the introduction onward must reach the
    // same world state the replay produced.
    let mut reference = TestNode::new();
    reference.commit_batch(vec![demo_set("set-a", 0)]);
    reference.commit_batch(vec![demo_extension("set-a")]);

    let replayed = node.executor.ledger_mut().temp_state_hash().unwrap();
    let rebuilt = reference.executor.ledger_mut().temp_state_hash().unwrap();
    assert_eq!(replayed, rebuilt);
}

#[test]
fn test_tx_set_state_already_final_when_replay_starts() {
    // The replay engine does not re-write tx-set state; that is sound only
    // because the mutants persist their target before the replay runs.
    // After the mutant block commits, a chain rebuilt from the stored
    // blocks observes the mutated value at every replayed height.
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 2)]);
    node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 1)]);

    let value = node.committed_set_state("set-a").unwrap();
    assert_eq!((value.nonce, value.index), (2, 1));
    assert_eq!(node.committed_state("demo", "active"), Some(b"t1".to_vec()));
}

#[test]
fn test_invalid_mutation_out_of_bounds_rejected() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    node.commit_batch(vec![demo_extension("set-a")]);

    let outcome = node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 9)]);
    let err = outcome.tx_errors[0].as_ref().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.to_string().contains("out of bound new index"));

    // State unchanged.
    let value = node.committed_set_state("set-a").unwrap();
    assert_eq!((value.nonce, value.index), (2, 1));
    assert_eq!(node.committed_state("demo", "active"), Some(b"t1".to_vec()));
}

#[test]
fn test_mutation_to_same_index_rejected() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);

    let outcome = node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 1)]);
    let err = outcome.tx_errors[0].as_ref().unwrap();
    assert!(err.to_string().contains("nothing to mutate"));
}

#[test]
fn test_mutant_for_unknown_set_rejected() {
    let mut node = TestNode::new();
    let outcome = node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "ghost", 1)]);
    let err = outcome.tx_errors[0].as_ref().unwrap();
    assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
}

#[test]
fn test_second_mutation_in_block_silently_skipped() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);

    let outcome = node.commit_batch(vec![
        InBlockTransaction::new_mutant("mut-1", "set-a", 2),
        InBlockTransaction::new_mutant("mut-2", "set-a", 0),
    ]);
    // Neither mutant reports an error; the second write was skipped.
    assert!(outcome.tx_errors[0].is_none());
    assert!(outcome.tx_errors[1].is_none());

    let value = node.committed_set_state("set-a").unwrap();
    assert_eq!(value.index, 2);
    assert_eq!(node.committed_state("demo", "active"), Some(b"t2".to_vec()));
}

#[test]
fn test_nonce_increases_by_one_per_change() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 1)]);
    assert_eq!(node.committed_set_state("set-a").unwrap().nonce, 1);

    node.commit_batch(vec![demo_extension("set-a")]);
    assert_eq!(node.committed_set_state("set-a").unwrap().nonce, 2);

    node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "set-a", 0)]);
    assert_eq!(node.committed_set_state("set-a").unwrap().nonce, 3);
}

// =============================================================================
// Replay interaction with deployed chaincodes
// =============================================================================

#[test]
fn test_replay_stops_previously_deployed_container() {
    let mut node = TestNode::new();
    let deploy_set = InBlockTransaction::new_set(
        "deployer",
        vec![deploy_candidate("cc-alpha"), deploy_candidate("cc-beta")],
        0,
    );
    node.commit_batch(vec![deploy_set]);
    assert_eq!(node.deployed_chaincodes(), vec!["cc-alpha".to_string()]);

    node.commit_batch(vec![InBlockTransaction::new_mutant("mut-1", "deployer", 1)]);

    // The container of the pre-mutation default was stopped and the new
    // default deployed during the replay.
    assert!(node.stopped_containers().contains(&"cc-alpha".to_string()));
    assert!(node.deployed_chaincodes().contains(&"cc-beta".to_string()));
}

// =============================================================================
// Batch behavior around failures
// =============================================================================

#[test]
fn test_failed_transaction_does_not_block_neighbors() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 0)]);

    let outcome = node.commit_batch(vec![
        InBlockTransaction::new_mutant("mut-bad", "ghost", 1),
        InBlockTransaction::new_set("set-b", vec![
            invoke_candidate("demo", "b=ran"),
            invoke_candidate("demo", "b=other"),
        ], 0),
    ]);

    assert!(outcome.tx_errors[0].is_some());
    assert!(outcome.tx_errors[1].is_none());
    assert_eq!(outcome.succeeded.len(), 1);
    assert_eq!(node.committed_state("demo", "b"), Some(b"ran".to_vec()));
}

#[test]
fn test_vm_failure_rolls_back_transaction_state() {
    let mut node = TestNode::new();
    let failing = InBlockTransaction::new_set(
        "set-f",
        vec![
            invoke_candidate("demo", "fail loudly"),
            invoke_candidate("demo", "unused=1"),
        ],
        0,
    );
    let outcome = node.commit_batch(vec![failing]);

    let err = outcome.tx_errors[0].as_ref().unwrap();
    assert!(err.to_string().contains("failure"));
    // The candidate never wrote state, but the set-state bookkeeping of the
    // introduction is kept: membership exists even when the default failed.
    assert!(node.committed_set_state("set-f").is_some());
    assert_eq!(node.committed_state("demo", "fail"), None);
}

#[test]
fn test_query_candidates_leave_no_state() {
    let mut node = TestNode::new();
    node.commit_batch(vec![demo_set("set-a", 0)]);

    let query_set = InBlockTransaction::new_set(
        "reader",
        vec![
            query_candidate("demo", "active"),
            query_candidate("demo", "missing"),
        ],
        0,
    );
    let outcome = node.commit_batch(vec![query_set]);
    assert!(outcome.tx_errors[0].is_none());

    // Two tracked sets, no extra world-state keys.
    assert_eq!(node.committed_state("demo", "missing"), None);
}
