//! # Transaction-Set State Entities
//!
//! The versioned descriptor tracked for every transaction set, plus the
//! identifier type used to key it.
//!
//! A [`TxSetStateValue`] records which member of a set is currently active
//! (`index`), where the set's members were committed (`index_at_block`) and
//! how often the value has changed (`nonce`). Mutant transactions rewrite
//! `index`; extensions append to `index_at_block`.

use crate::errors::LedgerError;
use crate::wire::{WireReader, WireWriter};
use crate::BlockNumber;
use std::fmt;

/// Opaque identifier shared by all members of a transaction set.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxSetId(Vec<u8>);

impl TxSetId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        TxSetId(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for TxSetId {
    fn from(s: &str) -> Self {
        TxSetId(s.as_bytes().to_vec())
    }
}

impl From<String> for TxSetId {
    fn from(s: String) -> Self {
        TxSetId(s.into_bytes())
    }
}

impl fmt::Display for TxSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for TxSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSetId({})", self)
    }
}

/// One entry of the block/index ledger inside a [`TxSetStateValue`].
///
/// Entry *i* records that block `block_nr` contributed set members up to and
/// including the logical index `in_block_index`.
///
/// Wire fields: `1 blockNr`, `2 inBlockIndex`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSetIndexEntry {
    pub block_nr: BlockNumber,
    pub in_block_index: u64,
}

impl TxSetIndexEntry {
    pub fn new(block_nr: BlockNumber, in_block_index: u64) -> Self {
        Self {
            block_nr,
            in_block_index,
        }
    }

    fn encode(&self) -> WireWriter {
        let mut w = WireWriter::new();
        w.uint(1, self.block_nr);
        w.uint(2, self.in_block_index);
        w
    }

    fn decode(buf: &[u8]) -> Result<Self, LedgerError> {
        let mut entry = TxSetIndexEntry::default();
        let mut r = WireReader::new(buf);
        while let Some((field, value)) = r.next_field()? {
            match field {
                1 => entry.block_nr = value.as_uint(1)?,
                2 => entry.in_block_index = value.as_uint(2)?,
                _ => {}
            }
        }
        Ok(entry)
    }
}

/// The versioned state descriptor of one transaction set.
///
/// Wire fields: `1 nonce`, `2 introBlock`, `3 lastModifiedAtBlock`,
/// `4 index`, `5 txNumber`, `6 indexAtBlock[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxSetStateValue {
    /// Monotonic counter, incremented on every change of this value.
    pub nonce: u64,
    /// Block where the set first appeared; zero means not yet introduced.
    pub intro_block: BlockNumber,
    /// Block of the most recent mutation or extension.
    pub last_modified_at_block: BlockNumber,
    /// Zero-based index of the currently active member.
    pub index: u64,
    /// Total member count across all contributing blocks.
    pub tx_number: u64,
    /// Ordered record of which block contributed members up to which index.
    pub index_at_block: Vec<TxSetIndexEntry>,
}

impl TxSetStateValue {
    /// Validate `next` as a block-wise extension (or introduction) of `self`.
    ///
    /// Extensions may only append index entries and must keep the active
    /// index unchanged once the set has been introduced.
    pub fn is_valid_block_extension(&self, next: &TxSetStateValue) -> Result<(), LedgerError> {
        if self.tx_number > next.tx_number {
            return Err(LedgerError::invalid_argument(format!(
                "the next state for this transactions set contains less transactions; \
                 current: {}, next: {}",
                self.tx_number, next.tx_number
            )));
        }
        if next.tx_number == 0 {
            return Err(LedgerError::invalid_argument(
                "the next state for this transactions set contains no transactions",
            ));
        }
        let last = next.index_at_block.last().ok_or_else(|| {
            LedgerError::invalid_argument("the next state carries no block index information")
        })?;
        if last.in_block_index != next.tx_number - 1 {
            return Err(LedgerError::invalid_argument(format!(
                "the index of the new set is not correct; expected: [{}], actual: [{}]",
                next.tx_number - 1,
                last.in_block_index
            )));
        }
        if last.block_nr != next.last_modified_at_block {
            return Err(LedgerError::invalid_argument(format!(
                "the block of the new set is not correct; expected: [{}], actual: [{}]",
                next.last_modified_at_block, last.block_nr
            )));
        }
        for (i, prev_entry) in self.index_at_block.iter().enumerate() {
            match next.index_at_block.get(i) {
                Some(entry) if entry == prev_entry => {}
                _ => {
                    return Err(LedgerError::invalid_argument(format!(
                        "the next state carries conflicting index information at entry [{}]",
                        i
                    )));
                }
            }
        }
        if self.intro_block != 0 && next.index != self.index {
            return Err(LedgerError::invalid_argument(
                "it is not possible to modify the index in a set extension",
            ));
        }
        Ok(())
    }

    /// Validate `next` as a mutation of `self`: only the active index may
    /// change, and only forward in chain time.
    pub fn is_valid_mutation(&self, next: &TxSetStateValue) -> Result<(), LedgerError> {
        if self.last_modified_at_block >= next.last_modified_at_block {
            return Err(LedgerError::invalid_argument(format!(
                "cannot modify a transactions set before the last time it was modified; \
                 last modified at block: [{}], modifying block: [{}]",
                self.last_modified_at_block, next.last_modified_at_block
            )));
        }
        if self.tx_number != next.tx_number {
            return Err(LedgerError::invalid_argument(
                "a mutant transaction cannot extend a set",
            ));
        }
        if self.index == next.index {
            return Err(LedgerError::invalid_argument(
                "mutating, but the active index did not change",
            ));
        }
        if next.index >= next.tx_number {
            return Err(LedgerError::invalid_argument(format!(
                "out of bound new index; transactions in the set: [{}], provided new index: [{}]",
                next.tx_number, next.index
            )));
        }
        if self.index_at_block != next.index_at_block {
            return Err(LedgerError::invalid_argument(
                "a mutant transaction cannot change the block index information of a set",
            ));
        }
        Ok(())
    }

    /// Binary search for the entry covering the given logical index:
    /// the smallest `i` with `index <= index_at_block[i].in_block_index`.
    pub fn position_for_index(&self, index: u64) -> Result<usize, LedgerError> {
        let i = self
            .index_at_block
            .partition_point(|entry| entry.in_block_index < index);
        if i < self.index_at_block.len() {
            Ok(i)
        } else {
            Err(LedgerError::invalid_argument(format!(
                "block for index [{}] not found",
                index
            )))
        }
    }

    /// Resolve a logical member index to `(block_nr, index_within_block)`.
    ///
    /// The in-block position is the offset past the previous entry's last
    /// logical index; for the first entry it is the logical index itself.
    pub fn block_for_index(&self, index: u64) -> Result<(BlockNumber, u64), LedgerError> {
        let i = self.position_for_index(index)?;
        let start = if i == 0 {
            0
        } else {
            self.index_at_block[i - 1].in_block_index + 1
        };
        Ok((self.index_at_block[i].block_nr, index - start))
    }

    /// Encode to the persisted wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.uint(1, self.nonce);
        w.uint(2, self.intro_block);
        w.uint(3, self.last_modified_at_block);
        w.uint(4, self.index);
        w.uint(5, self.tx_number);
        for entry in &self.index_at_block {
            w.message(6, &entry.encode());
        }
        w.into_bytes()
    }

    /// Decode from the persisted wire form.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, LedgerError> {
        let mut value = TxSetStateValue::default();
        let mut r = WireReader::new(buf);
        while let Some((field, fv)) = r.next_field()? {
            match field {
                1 => value.nonce = fv.as_uint(1)?,
                2 => value.intro_block = fv.as_uint(2)?,
                3 => value.last_modified_at_block = fv.as_uint(3)?,
                4 => value.index = fv.as_uint(4)?,
                5 => value.tx_number = fv.as_uint(5)?,
                6 => value
                    .index_at_block
                    .push(TxSetIndexEntry::decode(fv.as_bytes(6)?)?),
                _ => {}
            }
        }
        Ok(value)
    }
}

impl fmt::Display for TxSetStateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nonce: {}", self.nonce)?;
        writeln!(f, "Introduced at block number: {}", self.intro_block)?;
        writeln!(
            f,
            "Last modified at block number: {}",
            self.last_modified_at_block
        )?;
        writeln!(f, "Active transaction index: {}", self.index)?;
        writeln!(f, "Number of transactions in the set: {}", self.tx_number)?;
        writeln!(f, "Members contributed per block:")?;
        writeln!(f, "Block\t\tLast Index")?;
        for entry in &self.index_at_block {
            writeln!(f, "{}\t\t{}", entry.block_nr, entry.in_block_index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after_intro() -> TxSetStateValue {
        TxSetStateValue {
            nonce: 1,
            intro_block: 3,
            last_modified_at_block: 3,
            index: 1,
            tx_number: 3,
            index_at_block: vec![TxSetIndexEntry::new(3, 2)],
        }
    }

    fn value_after_extension() -> TxSetStateValue {
        TxSetStateValue {
            nonce: 2,
            intro_block: 3,
            last_modified_at_block: 5,
            index: 1,
            tx_number: 5,
            index_at_block: vec![TxSetIndexEntry::new(3, 2), TxSetIndexEntry::new(5, 4)],
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        let value = value_after_extension();
        let decoded = TxSetStateValue::from_bytes(&value.to_bytes()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_wire_roundtrip_default() {
        let value = TxSetStateValue::default();
        assert!(value.to_bytes().is_empty());
        assert_eq!(TxSetStateValue::from_bytes(&[]).unwrap(), value);
    }

    #[test]
    fn test_extension_accepts_appended_entries() {
        let prev = value_after_intro();
        let next = value_after_extension();
        assert!(prev.is_valid_block_extension(&next).is_ok());
    }

    #[test]
    fn test_extension_rejects_shrinking_set() {
        let prev = value_after_extension();
        let mut next = value_after_intro();
        next.nonce = 3;
        let err = prev.is_valid_block_extension(&next).unwrap_err();
        assert!(err.to_string().contains("less transactions"));
    }

    #[test]
    fn test_extension_rejects_rewritten_history() {
        let prev = value_after_intro();
        let mut next = value_after_extension();
        next.index_at_block[0] = TxSetIndexEntry::new(4, 2);
        let err = prev.is_valid_block_extension(&next).unwrap_err();
        assert!(err.to_string().contains("conflicting index information"));
    }

    #[test]
    fn test_extension_rejects_index_change() {
        let prev = value_after_intro();
        let mut next = value_after_extension();
        next.index = 0;
        let err = prev.is_valid_block_extension(&next).unwrap_err();
        assert!(err.to_string().contains("set extension"));
    }

    #[test]
    fn test_extension_rejects_wrong_last_entry() {
        let prev = value_after_intro();
        let mut next = value_after_extension();
        next.index_at_block[1].in_block_index = 3;
        let err = prev.is_valid_block_extension(&next).unwrap_err();
        assert!(err.to_string().contains("index of the new set"));
    }

    #[test]
    fn test_mutation_valid() {
        let prev = value_after_extension();
        let mut next = prev.clone();
        next.nonce = 3;
        next.index = 0;
        next.last_modified_at_block = 7;
        assert!(prev.is_valid_mutation(&next).is_ok());
    }

    #[test]
    fn test_mutation_rejects_out_of_bound_index() {
        let prev = value_after_extension();
        let mut next = prev.clone();
        next.nonce = 3;
        next.index = 9;
        next.last_modified_at_block = 7;
        let err = prev.is_valid_mutation(&next).unwrap_err();
        assert!(err.to_string().contains("out of bound new index"));
    }

    #[test]
    fn test_mutation_rejects_same_index() {
        let prev = value_after_extension();
        let mut next = prev.clone();
        next.nonce = 3;
        next.last_modified_at_block = 7;
        let err = prev.is_valid_mutation(&next).unwrap_err();
        assert!(err.to_string().contains("did not change"));
    }

    #[test]
    fn test_mutation_rejects_backwards_block() {
        let prev = value_after_extension();
        let mut next = prev.clone();
        next.nonce = 3;
        next.index = 0;
        next.last_modified_at_block = 5;
        assert!(prev.is_valid_mutation(&next).is_err());
    }

    #[test]
    fn test_mutation_rejects_extension_attempt() {
        let prev = value_after_extension();
        let mut next = prev.clone();
        next.nonce = 3;
        next.index = 0;
        next.tx_number = 6;
        next.last_modified_at_block = 7;
        let err = prev.is_valid_mutation(&next).unwrap_err();
        assert!(err.to_string().contains("cannot extend"));
    }

    #[test]
    fn test_position_for_index() {
        let value = value_after_extension();
        assert_eq!(value.position_for_index(0).unwrap(), 0);
        assert_eq!(value.position_for_index(2).unwrap(), 0);
        assert_eq!(value.position_for_index(3).unwrap(), 1);
        assert_eq!(value.position_for_index(4).unwrap(), 1);
        assert!(value.position_for_index(5).is_err());
    }

    #[test]
    fn test_block_for_index_local_offsets() {
        let value = value_after_extension();
        // First entry: local position equals the logical index.
        assert_eq!(value.block_for_index(1).unwrap(), (3, 1));
        // Second entry starts after logical index 2.
        assert_eq!(value.block_for_index(3).unwrap(), (5, 0));
        assert_eq!(value.block_for_index(4).unwrap(), (5, 1));
    }
}
