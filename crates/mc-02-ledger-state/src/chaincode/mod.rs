//! Chaincode world state: delta primitives and the two-tier store.

mod delta;
mod state;

pub use delta::{ChaincodeStateDelta, UpdatedKv};
pub use state::ChaincodeState;
