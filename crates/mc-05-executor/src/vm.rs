//! # Chaincode VM Port
//!
//! The executor's view of the chaincode execution environment. The VM is a
//! collaborator: containers, shims and transport belong to it; the core only
//! owns the call sites, the per-call timeout and the cancellation token.
//!
//! Chaincode calls back into ledger state through [`VmStateAccess`], which
//! the ledger implements; staged writes follow the executing transaction's
//! begin/finish scope.

use mc_04_ledger::Ledger;
use shared_types::{ChaincodeEvent, LedgerError, TxSetId, TxSpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("failed to deploy chaincode: {0}")]
    Deploy(String),

    #[error("failed to launch chaincode: {0}")]
    Launch(String),

    #[error("chaincode execution failed: {0}")]
    Execution(String),

    #[error("chaincode call timed out")]
    Timeout,

    #[error("failed to stop chaincode container: {0}")]
    Stop(String),
}

/// Cancellation token handed to every VM call. Cancelling marks the
/// transaction failed and rolls its staged state back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A message dispatched to a running chaincode.
#[derive(Debug, Clone)]
pub struct VmMessage {
    pub txid: TxSetId,
    pub payload: Vec<u8>,
    pub is_query: bool,
}

/// Outcome of a chaincode call.
#[derive(Debug, Clone)]
pub enum VmResponse {
    Completed {
        payload: Vec<u8>,
        event: Option<ChaincodeEvent>,
    },
    Failed {
        message: String,
        event: Option<ChaincodeEvent>,
    },
    Cancelled,
}

/// Ledger state surface exposed to executing chaincode.
pub trait VmStateAccess {
    fn get_state(&self, chaincode_id: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;
    fn set_state(&mut self, chaincode_id: &str, key: &str, value: Vec<u8>)
        -> Result<(), LedgerError>;
    fn delete_state(&mut self, chaincode_id: &str, key: &str) -> Result<(), LedgerError>;
}

impl VmStateAccess for Ledger {
    fn get_state(&self, chaincode_id: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ledger::get_state(self, chaincode_id, key, false)
    }

    fn set_state(
        &mut self,
        chaincode_id: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError> {
        Ledger::set_state(self, chaincode_id, key, value)
    }

    fn delete_state(&mut self, chaincode_id: &str, key: &str) -> Result<(), LedgerError> {
        Ledger::delete_state(self, chaincode_id, key)
    }
}

/// The chaincode execution environment.
pub trait ChaincodeVm: Send {
    /// Register a chaincode deployment.
    fn deploy(&mut self, spec: &TxSpec) -> Result<(), VmError>;

    /// Launch the chaincode container and wait until it is ready.
    fn launch(&mut self, spec: &TxSpec) -> Result<(), VmError>;

    /// Run one invocation or query against a launched chaincode.
    fn execute(
        &mut self,
        state: &mut dyn VmStateAccess,
        chaincode_name: &str,
        message: VmMessage,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<VmResponse, VmError>;

    /// Stop the container of a deployed chaincode.
    fn stop(&mut self, spec: &TxSpec) -> Result<(), VmError>;
}

// =============================================================================
// ADAPTER IMPLEMENTATIONS
// Production VMs live with the container runtime; the mock below drives
// unit and integration tests.
// =============================================================================

/// Call log shared between a [`MockVm`] and the test observing it.
#[derive(Debug, Default)]
pub struct VmLog {
    pub deployed: Vec<String>,
    pub launched: Vec<String>,
    pub executed: Vec<(String, Vec<u8>)>,
    pub stopped: Vec<String>,
}

/// Scriptable in-process VM.
///
/// Invocation payloads are interpreted as whitespace-separated `key=value`
/// assignments written to the invoked chaincode's state; query payloads name
/// a single key to read. A payload starting with `fail` reports a failed
/// execution, `hang` simulates a timeout, which exercises the executor's
/// rollback paths.
pub struct MockVm {
    log: Arc<parking_lot::Mutex<VmLog>>,
}

impl MockVm {
    pub fn new() -> Self {
        Self {
            log: Arc::new(parking_lot::Mutex::new(VmLog::default())),
        }
    }

    /// Handle for inspecting recorded calls.
    pub fn log_handle(&self) -> Arc<parking_lot::Mutex<VmLog>> {
        self.log.clone()
    }
}

impl Default for MockVm {
    fn default() -> Self {
        Self::new()
    }
}

impl ChaincodeVm for MockVm {
    fn deploy(&mut self, spec: &TxSpec) -> Result<(), VmError> {
        self.log.lock().deployed.push(spec.chaincode_name.clone());
        Ok(())
    }

    fn launch(&mut self, spec: &TxSpec) -> Result<(), VmError> {
        self.log.lock().launched.push(spec.chaincode_name.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        state: &mut dyn VmStateAccess,
        chaincode_name: &str,
        message: VmMessage,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<VmResponse, VmError> {
        self.log
            .lock()
            .executed
            .push((chaincode_name.to_string(), message.payload.clone()));

        if cancel.is_cancelled() {
            return Ok(VmResponse::Cancelled);
        }
        let script = String::from_utf8_lossy(&message.payload).into_owned();
        if script.starts_with("fail") {
            return Ok(VmResponse::Failed {
                message: script,
                event: None,
            });
        }
        if script.starts_with("hang") {
            return Err(VmError::Timeout);
        }

        if message.is_query {
            let value = state
                .get_state(chaincode_name, script.trim())
                .map_err(|e| VmError::Execution(e.to_string()))?
                .unwrap_or_default();
            return Ok(VmResponse::Completed {
                payload: value,
                event: None,
            });
        }

        for assignment in script.split_whitespace() {
            if let Some((key, value)) = assignment.split_once('=') {
                state
                    .set_state(chaincode_name, key, value.as_bytes().to_vec())
                    .map_err(|e| VmError::Execution(e.to_string()))?;
            }
        }
        Ok(VmResponse::Completed {
            payload: message.payload,
            event: None,
        })
    }

    fn stop(&mut self, spec: &TxSpec) -> Result<(), VmError> {
        self.log.lock().stopped.push(spec.chaincode_name.clone());
        Ok(())
    }
}
