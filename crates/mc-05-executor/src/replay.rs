//! # Mutation Replay Engine
//!
//! When a mutant changes which member of an earlier block's set is active,
//! the world state computed since that block is stale. The engine rolls
//! chaincode state back to the block before the earliest affected
//! introduction and re-executes the chain forward.
//!
//! Transaction-set state is not re-written during the replay: the mutants
//! already persisted their target values before the engine starts, so the
//! re-executed transactions resolve their active candidates against the
//! post-mutation state.

use crate::executor::Executor;
use shared_types::{ChaincodeAction, LedgerError, TxSetId, TxSpec};
use tracing::{debug, error, info};

impl Executor {
    /// Rewind and re-execute after the mutants of the current batch have
    /// been applied. No-op when nothing mutant-bearing was staged.
    ///
    /// A failure while rewinding triggers a recovery attempt back to the
    /// head block; a failure during that recovery is fatal.
    pub fn apply_mutations(&mut self) -> Result<(), LedgerError> {
        debug!("starting a state mutation");
        let last_block_to_reexecute = self.ledger().blockchain_size();
        let Some(restart_block) = self.ledger().older_mutated_block() else {
            debug!("nothing to reset");
            return Ok(());
        };

        if let Err(err) = self.ledger_mut().reset_to_block(restart_block - 1) {
            error!("unable to reset to base block: {}", err);
            let _ = self.ledger_mut().conclude_reset();
            self.recover_to_head(&err)?;
            return Err(LedgerError::invalid_argument(format!(
                "unable to apply the mutant transactions changes: {}",
                err
            )));
        }

        debug!(
            "re-executing transactions from block {} to block {}",
            restart_block, last_block_to_reexecute
        );
        let replay_result = self.replay_blocks(restart_block, last_block_to_reexecute);
        let conclude_result = self.ledger_mut().conclude_reset();
        replay_result?;
        conclude_result
    }

    fn replay_blocks(&mut self, from_block: u64, to_block: u64) -> Result<(), LedgerError> {
        for block_number in from_block..to_block {
            let block = self.ledger().get_block_by_number(block_number)?;
            for tx in &block.transactions {
                if tx.mutant().is_some() {
                    continue;
                }
                // A container may still run the candidate that was active
                // before the mutation; stop it before re-executing.
                match self.previous_default(&tx.txid) {
                    Ok(Some(spec)) if spec.action == ChaincodeAction::Deploy => {
                        if let Err(err) = self.stop_container(&spec) {
                            error!("unable to stop previous default container: {}", err);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        return Err(LedgerError::invalid_argument(format!(
                            "unable to verify the previous default transaction for set [{}]: {}",
                            tx.txid, err
                        )));
                    }
                }
                if let Err(err) = self.execute(tx) {
                    // A replayed transaction that fails does not invalidate
                    // its block; the chain already accepted it.
                    error!(
                        "error while re-executing transaction [{}] at block {}: {}",
                        tx.txid, block_number, err
                    );
                }
            }
            self.ledger_mut().commit_reset_tx_batch().map_err(|err| {
                LedgerError::invalid_argument(format!(
                    "failed to commit re-executed block {} to the ledger: {}",
                    block_number, err
                ))
            })?;
            info!("block {} reexecuted", block_number);
        }
        Ok(())
    }

    /// The committed default of a set, or `None` when the id never tracked
    /// set state.
    fn previous_default(&self, tx_set_id: &TxSetId) -> Result<Option<TxSpec>, LedgerError> {
        let state_value = self.ledger().get_tx_set_state(tx_set_id, true)?;
        if state_value.is_none() {
            return Ok(None);
        }
        let carrier = self.ledger().get_transaction_by_id(tx_set_id)?;
        self.ledger().get_current_default(&carrier, true).map(Some)
    }

    fn recover_to_head(&mut self, original: &LedgerError) -> Result<(), LedgerError> {
        let head = self.ledger().blockchain_size();
        if head == 0 {
            return Err(LedgerError::fatal(format!(
                "state mutation failed on an empty chain: {}",
                original
            )));
        }
        self.ledger_mut()
            .reset_to_block(head - 1)
            .map_err(|recovery_err| {
                LedgerError::fatal(format!(
                    "error recovering the state after a failed mutation; \
                     recovery error: ({}); initial error: ({})",
                    recovery_err, original
                ))
            })?;
        self.ledger_mut().conclude_reset().map_err(|recovery_err| {
            LedgerError::fatal(format!(
                "error recovering the state after a failed mutation; \
                 recovery error: ({}); initial error: ({})",
                recovery_err, original
            ))
        })
    }
}
