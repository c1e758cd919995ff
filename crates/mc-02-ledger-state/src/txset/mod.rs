//! Transaction-set state: delta primitives, the two-tier store and its
//! pluggable persistent backing.

mod backing;
mod delta;
mod state;

pub use backing::{new_tx_set_backing, HashableTxSetState, RawTxSetStore, RAW_STATE_HASH};
pub use delta::{TxSetStateDelta, UpdatedValue};
pub use state::TxSetState;
