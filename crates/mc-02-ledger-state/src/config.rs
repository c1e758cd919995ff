//! State store configuration.

/// Tuning for both state stores.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Name of the transaction-set state backing. `"raw"` is the only
    /// implementation currently shipped.
    pub tx_set_backing: String,
    /// How many blocks of serialized deltas stay queryable before the
    /// sliding window drops them.
    pub delta_history_size: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            tx_set_backing: "raw".to_string(),
            delta_history_size: 500,
        }
    }
}
