//! # Blocks
//!
//! Block layout and hashing. The block hash covers the wire encoding minus
//! the non-hashed side channel (chaincode events), so replaying a chain and
//! re-attaching events never changes block identity.

use crate::errors::LedgerError;
use crate::transaction::{ChaincodeEvent, InBlockTransaction};
use crate::wire::{WireReader, WireWriter};
use crate::Hash;
use sha3::{Digest, Sha3_256};

/// Side-channel data excluded from the block hash.
///
/// Wire fields: `1 chaincodeEvents[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonHashData {
    pub chaincode_events: Vec<ChaincodeEvent>,
}

/// A committed (or about-to-be-committed) block.
///
/// Wire fields: `1 transactions[]`, `2 previousBlockHash`, `3 stateHash`,
/// `4 txSetStateHash`, `5 metadata`, `6 nonHashData`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub transactions: Vec<InBlockTransaction>,
    pub previous_block_hash: Vec<u8>,
    pub state_hash: Vec<u8>,
    pub tx_set_state_hash: Vec<u8>,
    pub metadata: Vec<u8>,
    pub non_hash_data: Option<NonHashData>,
}

impl Block {
    /// A block carrying `transactions`; hashes are stamped at commit time.
    pub fn new(transactions: Vec<InBlockTransaction>, metadata: Vec<u8>) -> Self {
        Self {
            transactions,
            metadata,
            ..Default::default()
        }
    }

    fn encode(&self, include_non_hash_data: bool) -> WireWriter {
        let mut w = WireWriter::new();
        for tx in &self.transactions {
            w.bytes(1, &tx.to_bytes());
        }
        w.bytes(2, &self.previous_block_hash);
        w.bytes(3, &self.state_hash);
        w.bytes(4, &self.tx_set_state_hash);
        w.bytes(5, &self.metadata);
        if include_non_hash_data {
            if let Some(nhd) = &self.non_hash_data {
                let mut body = WireWriter::new();
                for event in &nhd.chaincode_events {
                    body.message(1, &event.encode());
                }
                w.message(6, &body);
            }
        }
        w
    }

    /// SHA3-256 over the encoding without the non-hashed side channel.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha3_256::new();
        hasher.update(self.encode(false).into_bytes());
        hasher.finalize().into()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode(true).into_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, LedgerError> {
        let mut block = Block::default();
        let mut r = WireReader::new(buf);
        while let Some((field, fv)) = r.next_field()? {
            match field {
                1 => block
                    .transactions
                    .push(InBlockTransaction::from_bytes(fv.as_bytes(1)?)?),
                2 => block.previous_block_hash = fv.as_bytes(2)?.to_vec(),
                3 => block.state_hash = fv.as_bytes(3)?.to_vec(),
                4 => block.tx_set_state_hash = fv.as_bytes(4)?.to_vec(),
                5 => block.metadata = fv.as_bytes(5)?.to_vec(),
                6 => {
                    let mut nhd = NonHashData::default();
                    let mut br = WireReader::new(fv.as_bytes(6)?);
                    while let Some((bf, bv)) = br.next_field()? {
                        if bf == 1 {
                            nhd.chaincode_events
                                .push(ChaincodeEvent::decode(bv.as_bytes(1)?)?);
                        }
                    }
                    block.non_hash_data = Some(nhd);
                }
                _ => {}
            }
        }
        Ok(block)
    }
}

/// Height and head hashes of the chain, as reported to operators and
/// used for commit previews.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockchainInfo {
    pub height: u64,
    pub current_block_hash: Vec<u8>,
    pub previous_block_hash: Vec<u8>,
}
