//! Point-in-time state snapshots handed out for state transfer.

/// Raw key-value entries of one state column family, frozen at the given
/// block height. Entries are in ascending key order.
#[derive(Debug)]
pub struct StateSnapshot {
    block_number: u64,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl StateSnapshot {
    pub fn new(block_number: u64, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            block_number,
            entries,
        }
    }

    /// Block height this snapshot corresponds to.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn entries(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for StateSnapshot {
    type Item = (Vec<u8>, Vec<u8>);
    type IntoIter = std::vec::IntoIter<(Vec<u8>, Vec<u8>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
