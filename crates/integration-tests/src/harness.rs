//! In-memory node harness: a ledger over the in-memory store driven by the
//! executor and the mock VM, with consensus replaced by a direct
//! batch-commit loop.

use mc_01_kv_store::{InMemoryKvStore, KvStore};
use mc_04_ledger::{Ledger, LedgerConfig};
use mc_05_executor::{BatchOutcome, Executor, MockVm, VmLog};
use parking_lot::Mutex;
use shared_types::{
    ChaincodeAction, InBlockTransaction, TransactionResult, TxSetStateValue, TxSpec,
};
use std::sync::Arc;

/// A single-node ledger with a genesis block already committed, so user
/// transactions land in block 1 onward (intro-block zero stays the
/// "not introduced" sentinel).
pub struct TestNode {
    pub executor: Executor,
    vm_log: Arc<Mutex<VmLog>>,
    next_batch_id: u64,
}

impl TestNode {
    pub fn new() -> Self {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let ledger = Ledger::new(store, LedgerConfig::default()).expect("ledger init");
        let vm = MockVm::new();
        let vm_log = vm.log_handle();
        let executor = Executor::new(ledger, Box::new(vm));
        let mut node = Self {
            executor,
            vm_log,
            next_batch_id: 0,
        };
        node.commit_batch(Vec::new()); // genesis
        node
    }

    pub fn ledger(&self) -> &Ledger {
        self.executor.ledger()
    }

    /// Execute and commit one ordered batch, the way the consensus worker
    /// drives the ledger. Panics on commit failure; per-transaction errors
    /// surface through the returned outcome.
    pub fn commit_batch(&mut self, transactions: Vec<InBlockTransaction>) -> BatchOutcome {
        let id = self.next_batch_id;
        self.next_batch_id += 1;

        self.executor
            .ledger_mut()
            .begin_tx_batch(id)
            .expect("begin batch");
        let outcome = self.executor.execute_batch(&transactions).expect("batch");
        let results: Vec<TransactionResult> = transactions
            .iter()
            .enumerate()
            .map(|(i, tx)| match &outcome.tx_errors[i] {
                Some(err) => TransactionResult::failure(tx.txid.clone(), err.to_string()),
                None => TransactionResult::success(
                    tx.txid.clone(),
                    Vec::new(),
                    outcome.chaincode_events[i].clone(),
                ),
            })
            .collect();
        self.executor
            .ledger_mut()
            .commit_tx_batch(id, transactions, &results, Vec::new())
            .expect("commit batch");
        outcome
    }

    /// State value of a set as committed on disk.
    pub fn committed_set_state(&self, id: &str) -> Option<TxSetStateValue> {
        self.ledger()
            .get_tx_set_state(&id.into(), true)
            .expect("state read")
    }

    /// Committed chaincode world-state value.
    pub fn committed_state(&self, chaincode_id: &str, key: &str) -> Option<Vec<u8>> {
        self.ledger()
            .get_state(chaincode_id, key, true)
            .expect("state read")
    }

    /// Number of VM invocations recorded so far.
    pub fn executed_count(&self) -> usize {
        self.vm_log.lock().executed.len()
    }

    /// Chaincode names whose containers were stopped.
    pub fn stopped_containers(&self) -> Vec<String> {
        self.vm_log.lock().stopped.clone()
    }

    /// Chaincode names deployed so far.
    pub fn deployed_chaincodes(&self) -> Vec<String> {
        self.vm_log.lock().deployed.clone()
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidate payload invoking `chaincode_id` with a `key=value` script.
pub fn invoke_candidate(chaincode_id: &str, script: &str) -> Vec<u8> {
    TxSpec::new(
        ChaincodeAction::Invoke,
        chaincode_id,
        script.as_bytes().to_vec(),
    )
    .to_bytes()
}

/// Candidate payload deploying `chaincode_id`.
pub fn deploy_candidate(chaincode_id: &str) -> Vec<u8> {
    TxSpec::new(ChaincodeAction::Deploy, chaincode_id, Vec::new()).to_bytes()
}

/// Candidate payload querying one key of `chaincode_id`.
pub fn query_candidate(chaincode_id: &str, key: &str) -> Vec<u8> {
    TxSpec::new(ChaincodeAction::Query, chaincode_id, key.as_bytes().to_vec()).to_bytes()
}
