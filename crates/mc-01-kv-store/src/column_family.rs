//! The nine column families of the ledger database.

/// Column families used by the ledger. The on-disk names are part of the
/// persisted layout and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Block number → block bytes.
    Blockchain,
    /// Chaincode world state.
    State,
    /// Block number → serialized chaincode state delta.
    StateDelta,
    /// Block number → cumulative chaincode delta from genesis.
    BlockState,
    /// Transaction-set id → marshaled state value.
    TxSetState,
    /// Block number → serialized transaction-set state delta.
    TxSetStateDelta,
    /// Block number → nonce bundle.
    Nonces,
    /// Transaction id → per-block in-block index table.
    Indexes,
    /// Consensus-layer blob storage.
    Persist,
}

impl ColumnFamily {
    /// Every family, in the fixed open order.
    pub const ALL: [ColumnFamily; 9] = [
        ColumnFamily::Blockchain,
        ColumnFamily::State,
        ColumnFamily::StateDelta,
        ColumnFamily::BlockState,
        ColumnFamily::TxSetState,
        ColumnFamily::TxSetStateDelta,
        ColumnFamily::Nonces,
        ColumnFamily::Indexes,
        ColumnFamily::Persist,
    ];

    /// On-disk column family name.
    pub fn name(self) -> &'static str {
        match self {
            ColumnFamily::Blockchain => "blockchainCF",
            ColumnFamily::State => "stateCF",
            ColumnFamily::StateDelta => "stateDeltaCF",
            ColumnFamily::BlockState => "blockStateCF",
            ColumnFamily::TxSetState => "txSetStateCF",
            ColumnFamily::TxSetStateDelta => "txSetStateDeltaCF",
            ColumnFamily::Nonces => "noncesCF",
            ColumnFamily::Indexes => "indexesCF",
            ColumnFamily::Persist => "persistCF",
        }
    }
}

impl std::fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
