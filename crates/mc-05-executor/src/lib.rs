//! # mc-05-executor
//!
//! Transaction execution for the mutachain ledger.
//!
//! ## Role in System
//!
//! - **Classification**: dispatches every in-block transaction as a set
//!   introduction/extension, a mutant, or a set-state query
//! - **VM Boundary**: drives the chaincode VM through the [`ChaincodeVm`]
//!   port with a per-call timeout and cancellation
//! - **Mutation Replay**: when a mutant changes an earlier block's active
//!   selection, rolls world state back and re-executes the chain forward
//!
//! The executor owns the ledger context; batches arrive already ordered by
//! consensus and execute on a single writer.

pub mod executor;
pub mod replay;
pub mod vm;

pub use executor::{BatchOutcome, ExecutionOutput, Executor, ExecutorConfig};
pub use vm::{CancelToken, ChaincodeVm, MockVm, VmError, VmLog, VmMessage, VmResponse, VmStateAccess};
