//! # Transaction Executor
//!
//! Classifies each in-block transaction and drives it through state updates
//! and the chaincode VM. Batch execution runs mutants first, lets the replay
//! engine restore consistency, then executes the remaining transactions.

use crate::vm::{CancelToken, ChaincodeVm, VmMessage, VmResponse};
use mc_04_ledger::Ledger;
use shared_types::{
    ChaincodeAction, ChaincodeEvent, Hash, InBlockTransaction, LedgerError, MutantTransaction,
    SetStateQuery, TransactionSet, TransactionVariant, TxSetId, TxSetIndexEntry, TxSetStateValue,
    TxSpec,
};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-call chaincode timeout.
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Payload and event produced by one executed transaction.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub payload: Vec<u8>,
    pub event: Option<ChaincodeEvent>,
}

/// Result of executing one ordered batch. `tx_errors` and
/// `chaincode_events` are parallel-indexed with the batch so successful
/// transactions commit even when neighbors failed.
#[derive(Debug)]
pub struct BatchOutcome {
    pub succeeded: Vec<InBlockTransaction>,
    pub state_hash: Hash,
    pub chaincode_events: Vec<Option<ChaincodeEvent>>,
    pub tx_errors: Vec<Option<LedgerError>>,
}

pub struct Executor {
    ledger: Ledger,
    vm: Box<dyn ChaincodeVm>,
    config: ExecutorConfig,
    cancel: CancelToken,
}

impl Executor {
    pub fn new(ledger: Ledger, vm: Box<dyn ChaincodeVm>) -> Self {
        Self {
            ledger,
            vm,
            config: ExecutorConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// Token cancelling in-flight chaincode calls; a cancelled transaction
    /// is marked failed and its state changes roll back.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn stop_container(&mut self, spec: &TxSpec) -> Result<(), crate::vm::VmError> {
        self.vm.stop(spec)
    }

    /// Execute one transaction: a set introduction/extension (running the
    /// active candidate), a mutant (updating set state only), or a
    /// read-only state query.
    pub fn execute(&mut self, tx: &InBlockTransaction) -> Result<ExecutionOutput, LedgerError> {
        match &tx.variant {
            TransactionVariant::Set(set) => self.execute_transaction_set(tx, set),
            TransactionVariant::Mutant(mutant) => self.execute_mutant(tx, mutant),
            TransactionVariant::Query(query) => self.execute_query(query),
        }
    }

    fn execute_transaction_set(
        &mut self,
        tx: &InBlockTransaction,
        set: &TransactionSet,
    ) -> Result<ExecutionOutput, LedgerError> {
        if set.transactions.is_empty() {
            return Err(LedgerError::invalid_argument(
                "at least a transaction to execute should be provided",
            ));
        }

        let next_block = self.ledger.current_block_ex();
        let state_value = self.ledger.get_tx_set_state(&tx.txid, false)?;
        let existed_already = state_value.is_some();

        // Set state is tracked for multi-candidate sets and for extensions
        // of already tracked sets; a replay never re-writes it.
        if !self.ledger.is_resetting() && (existed_already || set.transactions.len() > 1) {
            if !existed_already && set.extend {
                return Err(LedgerError::invalid_argument(
                    "cannot extend a non existent transactions set",
                ));
            }
            let mut updated = match state_value {
                Some(value) => value,
                None => TxSetStateValue {
                    intro_block: next_block,
                    index: set.default_index,
                    ..Default::default()
                },
            };
            updated.nonce += 1;
            updated.tx_number += set.transactions.len() as u64;
            updated
                .index_at_block
                .push(TxSetIndexEntry::new(next_block, updated.tx_number - 1));
            updated.last_modified_at_block = next_block;
            let intro_block = updated.intro_block;

            self.ledger.set_tx_begin(&tx.txid);
            if let Err(err) = self.ledger.set_tx_set_state(&tx.txid, updated) {
                self.ledger.set_tx_finished(&tx.txid, false);
                return Err(LedgerError::invalid_argument(format!(
                    "unable to create the state for the new set: {}",
                    err
                )));
            }
            self.ledger.set_tx_finished(&tx.txid, true);

            if intro_block != next_block {
                // The set's side effect already ran in its introducing
                // block; an extension only records new members.
                return Ok(ExecutionOutput::default());
            }
        }

        if set.extend {
            return Ok(ExecutionOutput::default());
        }

        let spec = self.ledger.get_current_default(tx, false)?;
        self.dispatch(&tx.txid, &spec)
    }

    /// Run the active candidate on the VM.
    fn dispatch(&mut self, txid: &TxSetId, spec: &TxSpec) -> Result<ExecutionOutput, LedgerError> {
        match spec.action {
            ChaincodeAction::Deploy => {
                self.vm
                    .deploy(spec)
                    .map_err(|e| LedgerError::invalid_argument(e.to_string()))?;
                self.ledger.chain_tx_begin(txid);
                if let Err(err) = self.vm.launch(spec) {
                    self.ledger.chain_tx_finished(txid, false);
                    return Err(LedgerError::invalid_argument(err.to_string()));
                }
                self.ledger.chain_tx_finished(txid, true);
                Ok(ExecutionOutput::default())
            }
            ChaincodeAction::Invoke | ChaincodeAction::Query => {
                let is_query = spec.action == ChaincodeAction::Query;
                self.vm
                    .launch(spec)
                    .map_err(|e| LedgerError::invalid_argument(e.to_string()))?;

                let message = VmMessage {
                    txid: txid.clone(),
                    payload: spec.payload.clone(),
                    is_query,
                };
                if !is_query {
                    self.ledger.chain_tx_begin(txid);
                }
                let response = self.vm.execute(
                    &mut self.ledger,
                    &spec.chaincode_name,
                    message,
                    self.config.call_timeout,
                    &self.cancel,
                );
                match response {
                    Ok(VmResponse::Completed { payload, event }) => {
                        if !is_query {
                            self.ledger.chain_tx_finished(txid, true);
                        }
                        let event = event.map(|mut event| {
                            event.chaincode_id = spec.chaincode_name.clone();
                            event.tx_id = txid.to_string();
                            event
                        });
                        Ok(ExecutionOutput { payload, event })
                    }
                    Ok(VmResponse::Failed { message, .. }) => {
                        if !is_query {
                            self.ledger.chain_tx_finished(txid, false);
                        }
                        Err(LedgerError::invalid_argument(format!(
                            "transaction or query returned with failure: {}",
                            message
                        )))
                    }
                    Ok(VmResponse::Cancelled) => {
                        if !is_query {
                            self.ledger.chain_tx_finished(txid, false);
                        }
                        Err(LedgerError::invalid_argument(
                            "chaincode call cancelled; transaction rolled back",
                        ))
                    }
                    Err(err) => {
                        if !is_query {
                            self.ledger.chain_tx_finished(txid, false);
                        }
                        Err(LedgerError::invalid_argument(format!(
                            "failed to execute transaction or query: {}",
                            err
                        )))
                    }
                }
            }
        }
    }

    fn execute_mutant(
        &mut self,
        tx: &InBlockTransaction,
        mutant: &MutantTransaction,
    ) -> Result<ExecutionOutput, LedgerError> {
        if self.ledger.is_resetting() {
            // Mutants never re-execute in the past.
            return Ok(ExecutionOutput::default());
        }
        let next_block = self.ledger.current_block_ex();
        self.ledger.set_tx_begin(&tx.txid);

        let state_value = match self.ledger.get_tx_set_state(&mutant.tx_set_id, true) {
            Ok(value) => value,
            Err(err) => {
                self.ledger.set_tx_finished(&tx.txid, false);
                return Err(err);
            }
        };
        let Some(mut updated) = state_value else {
            self.ledger.set_tx_finished(&tx.txid, false);
            return Err(LedgerError::resource_not_found(
                "issuing a mutant transaction for a non-existing tx set id",
            ));
        };
        if updated.index == mutant.tx_set_index {
            self.ledger.set_tx_finished(&tx.txid, false);
            return Err(LedgerError::invalid_argument(
                "nothing to mutate, the default index of the transactions set did not change",
            ));
        }
        updated.nonce += 1;
        updated.index = mutant.tx_set_index;
        updated.last_modified_at_block = next_block;

        if let Err(err) = self.ledger.set_tx_set_state(&mutant.tx_set_id, updated) {
            self.ledger.set_tx_finished(&tx.txid, false);
            return Err(err);
        }
        self.ledger.set_tx_finished(&tx.txid, true);
        Ok(ExecutionOutput::default())
    }

    fn execute_query(&mut self, query: &SetStateQuery) -> Result<ExecutionOutput, LedgerError> {
        let state_value = self
            .ledger
            .get_tx_set_state(&query.tx_set_id, true)?
            .ok_or_else(|| {
                LedgerError::resource_not_found(format!(
                    "the state queried does not exist; tx set id: [{}]",
                    query.tx_set_id
                ))
            })?;
        Ok(ExecutionOutput {
            payload: state_value.to_bytes(),
            event: None,
        })
    }

    /// Execute an ordered batch: all mutants first, then the mutation
    /// replay, then the remaining transactions. Per-transaction errors are
    /// reported in an array parallel to the batch; only a fatal replay
    /// failure aborts the whole batch.
    pub fn execute_batch(
        &mut self,
        transactions: &[InBlockTransaction],
    ) -> Result<BatchOutcome, LedgerError> {
        let mut tx_errors: Vec<Option<LedgerError>> = vec![None; transactions.len()];
        let mut chaincode_events: Vec<Option<ChaincodeEvent>> = vec![None; transactions.len()];
        let mut succeeded = Vec::new();
        let mut set_indexes = Vec::new();

        for (i, tx) in transactions.iter().enumerate() {
            if tx.mutant().is_some() {
                match self.execute(tx) {
                    Ok(output) => {
                        chaincode_events[i] = output.event;
                        succeeded.push(tx.clone());
                    }
                    Err(err) => {
                        self.ledger
                            .event_sink()
                            .transaction_rejected(tx, &err.to_string());
                        tx_errors[i] = Some(err);
                    }
                }
            } else {
                set_indexes.push(i);
            }
        }

        if let Err(err) = self.apply_mutations() {
            if matches!(err, LedgerError::Fatal(_)) {
                return Err(err);
            }
            error!("unable to apply state mutations: {}", err);
        }

        for i in set_indexes {
            let tx = &transactions[i];
            match self.execute(tx) {
                Ok(output) => {
                    chaincode_events[i] = output.event;
                    succeeded.push(tx.clone());
                }
                Err(err) => {
                    debug!("transaction [{}] failed: {}", tx.txid, err);
                    self.ledger
                        .event_sink()
                        .transaction_rejected(tx, &err.to_string());
                    tx_errors[i] = Some(err);
                }
            }
        }

        let state_hash = self.ledger.temp_state_hash()?;
        Ok(BatchOutcome {
            succeeded,
            state_hash,
            chaincode_events,
            tx_errors,
        })
    }
}
