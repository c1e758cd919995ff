//! # Chaincode State Delta
//!
//! Pending world-state updates keyed by chaincode id and key. Same shape as
//! the transaction-set delta: previous and new value per key, canonical
//! ordering, versioned serialization.

use crate::errors::StateError;
use shared_types::wire::{read_varint, write_varint};
use shared_types::Hash;
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;

const DELTA_FORMAT_VERSION: u64 = 1;

/// One pending world-state update. `value == None` marks a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatedKv {
    pub previous: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

impl UpdatedKv {
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }
}

/// Pending world-state updates of one block (or one transaction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaincodeStateDelta {
    updates: BTreeMap<String, BTreeMap<String, UpdatedKv>>,
}

impl ChaincodeStateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        chaincode_id: &str,
        key: &str,
        value: Vec<u8>,
        previous: Option<Vec<u8>>,
    ) {
        self.updates
            .entry(chaincode_id.to_string())
            .or_default()
            .insert(
                key.to_string(),
                UpdatedKv {
                    previous,
                    value: Some(value),
                },
            );
    }

    pub fn delete(&mut self, chaincode_id: &str, key: &str, previous: Option<Vec<u8>>) {
        self.updates
            .entry(chaincode_id.to_string())
            .or_default()
            .insert(
                key.to_string(),
                UpdatedKv {
                    previous,
                    value: None,
                },
            );
    }

    pub fn get(&self, chaincode_id: &str, key: &str) -> Option<&UpdatedKv> {
        self.updates.get(chaincode_id)?.get(key)
    }

    pub fn is_updated(&self, chaincode_id: &str, key: &str) -> bool {
        self.get(chaincode_id, key).is_some()
    }

    /// Merge `other` into this delta; `other`'s updates win, but an existing
    /// previous value is kept when the newer update lacks one, so the merged
    /// update spans the full change.
    pub fn apply_changes(&mut self, other: ChaincodeStateDelta) {
        for (chaincode_id, keys) in other.updates {
            let family = self.updates.entry(chaincode_id).or_default();
            for (key, mut update) in keys {
                if let Some(existing) = family.get(&key) {
                    if update.previous.is_none() {
                        update.previous = existing.previous.clone();
                    }
                }
                family.insert(key, update);
            }
        }
    }

    /// Chaincode ids with pending updates, ascending.
    pub fn updated_chaincode_ids(&self) -> impl Iterator<Item = &str> {
        self.updates.keys().map(String::as_str)
    }

    /// Pending updates of one chaincode, ascending by key.
    pub fn updates_for(&self, chaincode_id: &str) -> Option<&BTreeMap<String, UpdatedKv>> {
        self.updates.get(chaincode_id)
    }

    /// Flattened iteration over `(chaincode_id, key, update)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &UpdatedKv)> {
        self.updates.iter().flat_map(|(cc, keys)| {
            keys.iter()
                .map(move |(key, update)| (cc.as_str(), key.as_str(), update))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Deterministic hash over all updates in canonical order.
    pub fn compute_crypto_hash(&self) -> Hash {
        let mut hasher = Sha3_256::new();
        for (chaincode_id, key, update) in self.iter() {
            hasher.update(chaincode_id.as_bytes());
            hasher.update([0x00]);
            hasher.update(key.as_bytes());
            if let Some(value) = &update.value {
                hasher.update(value);
            }
            if let Some(previous) = &update.previous {
                hasher.update(previous);
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
        for (chaincode_id, keys) in &self.updates {
            write_bytes(&mut buf, chaincode_id.as_bytes());
            write_varint(&mut buf, keys.len() as u64);
            for (key, update) in keys {
                write_bytes(&mut buf, key.as_bytes());
                write_optional(&mut buf, update.value.as_deref());
                write_optional(&mut buf, update.previous.as_deref());
            }
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
        let chaincode_count = read_next_varint(buf, &mut pos)?;
        let mut delta = ChaincodeStateDelta::new();
        for _ in 0..chaincode_count {
            let chaincode_id = read_string(buf, &mut pos)?;
            let key_count = read_next_varint(buf, &mut pos)?;
            let family = delta.updates.entry(chaincode_id).or_default();
            for _ in 0..key_count {
                let key = read_string(buf, &mut pos)?;
                let value = read_optional(buf, &mut pos)?;
                let previous = read_optional(buf, &mut pos)?;
                family.insert(key, UpdatedKv { previous, value });
            }
        }
        Ok(delta)
    }
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

fn write_optional(buf: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(value) => {
            buf.push(1);
            write_bytes(buf, value);
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

fn read_raw_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, StateError> {
    let len = read_next_varint(buf, pos)? as usize;
    if buf.len() - *pos < len {
        return Err(StateError::serialization("truncated delta entry"));
    }
    let data = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(data)
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, StateError> {
    String::from_utf8(read_raw_bytes(buf, pos)?).map_err(StateError::serialization)
}

fn read_optional(buf: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, StateError> {
    let present = *buf
        .get(*pos)
        .ok_or_else(|| StateError::serialization("truncated delta entry"))?;
    *pos += 1;
    if present == 0 {
        return Ok(None);
    }
    read_raw_bytes(buf, pos).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let mut delta = ChaincodeStateDelta::new();
        delta.set("cc1", "k1", b"v1".to_vec(), None);
        delta.delete("cc1", "k2", Some(b"old".to_vec()));

        assert_eq!(
            delta.get("cc1", "k1").unwrap().value.as_deref(),
            Some(&b"v1"[..])
        );
        assert!(delta.get("cc1", "k2").unwrap().is_deleted());
        assert!(delta.get("cc2", "k1").is_none());
    }

    #[test]
    fn test_apply_changes_keeps_oldest_previous() {
        let mut committed = ChaincodeStateDelta::new();
        committed.set("cc1", "k", b"v1".to_vec(), Some(b"v0".to_vec()));

        let mut current = ChaincodeStateDelta::new();
        current.set("cc1", "k", b"v2".to_vec(), None);
        committed.apply_changes(current);

        let update = committed.get("cc1", "k").unwrap();
        assert_eq!(update.value.as_deref(), Some(&b"v2"[..]));
        assert_eq!(update.previous.as_deref(), Some(&b"v0"[..]));
    }

    #[test]
    fn test_marshal_roundtrip() {
        let mut delta = ChaincodeStateDelta::new();
        delta.set("cc1", "k1", b"v1".to_vec(), Some(b"v0".to_vec()));
        delta.set("cc2", "k2", b"v2".to_vec(), None);
        delta.delete("cc2", "k3", Some(b"dead".to_vec()));

        let decoded = ChaincodeStateDelta::unmarshal(&delta.marshal()).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn test_hash_depends_on_values() {
        let mut a = ChaincodeStateDelta::new();
        a.set("cc1", "k", b"v1".to_vec(), None);
        let mut b = ChaincodeStateDelta::new();
        b.set("cc1", "k", b"v2".to_vec(), None);
        assert_ne!(a.compute_crypto_hash(), b.compute_crypto_hash());
    }
}
