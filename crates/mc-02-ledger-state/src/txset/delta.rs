//! # Transaction-Set State Delta
//!
//! Pending per-set updates carrying both the previous and the new value.
//! Deltas are the unit that flows through the two-tier store: a transaction
//! stages one, a block accumulates them, and the serialized form is kept per
//! block for state transfer.

use crate::errors::StateError;
use shared_types::wire::{read_varint, write_varint};
use shared_types::{Hash, TxSetId, TxSetStateValue};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;

/// Serialized delta format version.
const DELTA_FORMAT_VERSION: u64 = 1;

/// One recorded update: previous and new value of a set, plus whether the
/// update came from a mutant transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatedValue {
    pub previous: Option<TxSetStateValue>,
    pub value: Option<TxSetStateValue>,
    /// True when the update changed the active index of an existing set
    /// without changing its membership.
    pub is_mutant: bool,
}

impl UpdatedValue {
    pub fn value(&self) -> Option<&TxSetStateValue> {
        self.value.as_ref()
    }

    pub fn previous(&self) -> Option<&TxSetStateValue> {
        self.previous.as_ref()
    }
}

/// A map of pending per-set updates.
///
/// Keys iterate in ascending order, which keeps [`Self::compute_crypto_hash`]
/// and [`Self::marshal`] canonical across implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxSetStateDelta {
    updates: BTreeMap<TxSetId, UpdatedValue>,
}

impl TxSetStateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an updated value. The update is mutant-bearing when the set
    /// already existed, kept its member count and changed its active index.
    pub fn set(
        &mut self,
        id: TxSetId,
        value: TxSetStateValue,
        previous: Option<TxSetStateValue>,
    ) {
        let is_mutant = previous
            .as_ref()
            .is_some_and(|prev| value.tx_number == prev.tx_number && value.index != prev.index);
        self.updates.insert(
            id,
            UpdatedValue {
                previous,
                value: Some(value),
                is_mutant,
            },
        );
    }

    /// Record a deletion (a tombstone carrying only the previous value).
    pub fn delete(&mut self, id: TxSetId, previous: Option<TxSetStateValue>) {
        self.updates.insert(
            id,
            UpdatedValue {
                previous,
                value: None,
                is_mutant: false,
            },
        );
    }

    pub fn get(&self, id: &TxSetId) -> Option<&UpdatedValue> {
        self.updates.get(id)
    }

    /// True when an update for `id` has already been recorded. Used to
    /// refuse a second write to the same set within one block.
    pub fn is_updated_value_set(&self, id: &TxSetId) -> bool {
        self.updates.contains_key(id)
    }

    /// Merge `other` into this delta; `other`'s updates win for keys present
    /// in both, but the oldest previous value is kept so the merged update
    /// still spans the full change.
    pub fn apply_changes(&mut self, other: TxSetStateDelta) {
        for (id, mut update) in other.updates {
            if let Some(existing) = self.updates.get(&id) {
                if update.previous.is_none() {
                    update.previous = existing.previous.clone();
                }
            }
            self.updates.insert(id, update);
        }
    }

    /// Updated set ids in ascending order.
    pub fn updated_tx_set_ids(&self) -> impl Iterator<Item = &TxSetId> {
        self.updates.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TxSetId, &UpdatedValue)> {
        self.updates.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Deterministic hash of the delta: for every key in ascending order,
    /// absorb the key, the marshaled new value and the marshaled previous
    /// value.
    pub fn compute_crypto_hash(&self) -> Hash {
        let mut hasher = Sha3_256::new();
        for (id, update) in &self.updates {
            hasher.update(id.as_bytes());
            if let Some(value) = &update.value {
                hasher.update(value.to_bytes());
            }
            if let Some(previous) = &update.previous {
                hasher.update(previous.to_bytes());
            }
        }
        hasher.finalize().into()
    }

    /// Versioned, length-prefixed serialization; exact round-trip through
    /// [`Self::unmarshal`].
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, DELTA_FORMAT_VERSION);
        write_varint(&mut buf, self.updates.len() as u64);
        for (id, update) in &self.updates {
            write_bytes(&mut buf, id.as_bytes());
            write_optional_value(&mut buf, update.value.as_ref());
            write_optional_value(&mut buf, update.previous.as_ref());
            buf.push(u8::from(update.is_mutant));
        }
        buf
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self, StateError> {
        let mut pos = 0;
        let version = read_next_varint(buf, &mut pos)?;
        if version != DELTA_FORMAT_VERSION {
            return Err(StateError::serialization(format!(
                "unknown delta format version [{}]",
                version
            )));
        }
        let count = read_next_varint(buf, &mut pos)?;
        let mut delta = TxSetStateDelta::new();
        for _ in 0..count {
            let id = TxSetId::new(read_bytes(buf, &mut pos)?);
            let value = read_optional_value(buf, &mut pos)?;
            let previous = read_optional_value(buf, &mut pos)?;
            let is_mutant = *buf
                .get(pos)
                .ok_or_else(|| StateError::serialization("truncated delta entry"))?
                != 0;
            pos += 1;
            delta.updates.insert(
                id,
                UpdatedValue {
                    previous,
                    value,
                    is_mutant,
                },
            );
        }
        Ok(delta)
    }
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn write_optional_value(buf: &mut Vec<u8>, value: Option<&TxSetStateValue>) {
    match value {
        Some(value) => {
            buf.push(1);
            write_bytes(buf, &value.to_bytes());
        }
        None => buf.push(0),
    }
}

fn read_next_varint(buf: &[u8], pos: &mut usize) -> Result<u64, StateError> {
    let (value, consumed) =
        read_varint(&buf[*pos..]).map_err(|e| StateError::serialization(e.to_string()))?;
    *pos += consumed;
    Ok(value)
}

fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, StateError> {
    let len = read_next_varint(buf, pos)? as usize;
    if buf.len() - *pos < len {
        return Err(StateError::serialization("truncated delta entry"));
    }
    let data = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(data)
}

fn read_optional_value(buf: &[u8], pos: &mut usize) -> Result<Option<TxSetStateValue>, StateError> {
    let present = *buf
        .get(*pos)
        .ok_or_else(|| StateError::serialization("truncated delta entry"))?;
    *pos += 1;
    if present == 0 {
        return Ok(None);
    }
    let bytes = read_bytes(buf, pos)?;
    TxSetStateValue::from_bytes(&bytes)
        .map(Some)
        .map_err(|e| StateError::serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::TxSetIndexEntry;

    fn intro_value(intro_block: u64) -> TxSetStateValue {
        TxSetStateValue {
            nonce: 1,
            intro_block,
            last_modified_at_block: intro_block,
            index: 0,
            tx_number: 2,
            index_at_block: vec![TxSetIndexEntry::new(intro_block, 1)],
        }
    }

    fn mutated_value(base: &TxSetStateValue, new_index: u64, at_block: u64) -> TxSetStateValue {
        TxSetStateValue {
            nonce: base.nonce + 1,
            index: new_index,
            last_modified_at_block: at_block,
            ..base.clone()
        }
    }

    #[test]
    fn test_set_detects_mutant() {
        let mut delta = TxSetStateDelta::new();
        let prev = intro_value(3);
        let mutated = mutated_value(&prev, 1, 7);
        delta.set("set-a".into(), mutated, Some(prev));
        assert!(delta.get(&"set-a".into()).unwrap().is_mutant);
    }

    #[test]
    fn test_set_extension_is_not_mutant() {
        let mut delta = TxSetStateDelta::new();
        let prev = intro_value(3);
        let mut extended = prev.clone();
        extended.nonce += 1;
        extended.tx_number += 2;
        extended.index_at_block.push(TxSetIndexEntry::new(5, 3));
        extended.last_modified_at_block = 5;
        delta.set("set-a".into(), extended, Some(prev));
        assert!(!delta.get(&"set-a".into()).unwrap().is_mutant);
    }

    #[test]
    fn test_introduction_is_not_mutant() {
        let mut delta = TxSetStateDelta::new();
        delta.set("set-a".into(), intro_value(3), None);
        assert!(!delta.get(&"set-a".into()).unwrap().is_mutant);
    }

    #[test]
    fn test_apply_changes_later_write_wins() {
        let mut committed = TxSetStateDelta::new();
        let prev = intro_value(3);
        committed.set("set-a".into(), prev.clone(), None);

        let mut current = TxSetStateDelta::new();
        current.set("set-b".into(), intro_value(4), None);
        current.set("set-a".into(), mutated_value(&prev, 1, 7), Some(prev.clone()));

        committed.apply_changes(current);
        assert_eq!(committed.len(), 2);
        assert_eq!(
            committed.get(&"set-a".into()).unwrap().value().unwrap().index,
            1
        );
    }

    #[test]
    fn test_marshal_roundtrip() {
        let mut delta = TxSetStateDelta::new();
        let prev = intro_value(3);
        delta.set("set-a".into(), mutated_value(&prev, 1, 7), Some(prev));
        delta.set("set-b".into(), intro_value(4), None);
        delta.delete("set-c".into(), Some(intro_value(2)));

        let decoded = TxSetStateDelta::unmarshal(&delta.marshal()).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn test_marshal_roundtrip_empty() {
        let delta = TxSetStateDelta::new();
        let decoded = TxSetStateDelta::unmarshal(&delta.marshal()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_unmarshal_rejects_unknown_version() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 9);
        write_varint(&mut buf, 0);
        assert!(TxSetStateDelta::unmarshal(&buf).is_err());
    }

    #[test]
    fn test_hash_is_order_independent() {
        let prev = intro_value(3);
        let mut a = TxSetStateDelta::new();
        a.set("set-a".into(), intro_value(3), None);
        a.set("set-b".into(), mutated_value(&prev, 1, 7), Some(prev.clone()));

        let mut b = TxSetStateDelta::new();
        b.set("set-b".into(), mutated_value(&prev, 1, 7), Some(prev));
        b.set("set-a".into(), intro_value(3), None);

        assert_eq!(a.compute_crypto_hash(), b.compute_crypto_hash());
    }

    #[test]
    fn test_hash_distinguishes_previous_value() {
        let mut a = TxSetStateDelta::new();
        a.set("set-a".into(), intro_value(3), None);

        let mut b = TxSetStateDelta::new();
        b.set("set-a".into(), intro_value(3), Some(intro_value(2)));

        assert_ne!(a.compute_crypto_hash(), b.compute_crypto_hash());
    }
}
