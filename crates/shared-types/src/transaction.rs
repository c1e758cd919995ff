//! # In-Block Transactions
//!
//! The three transaction shapes that can appear inside a block: a
//! transaction set (optionally extending an existing one), a mutant that
//! repoints a set's active index, and a read-only set-state query.
//!
//! Classification is a tagged sum so the executor's dispatch is exhaustive
//! at compile time.

use crate::entities::TxSetId;
use crate::errors::LedgerError;
use crate::wire::{WireReader, WireWriter};

/// Whether candidate payloads are stored encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfidentialityLevel {
    #[default]
    Public,
    Confidential,
}

/// What the active candidate of a set asks the chaincode VM to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaincodeAction {
    Deploy,
    Invoke,
    Query,
}

impl ChaincodeAction {
    fn to_wire(self) -> u64 {
        match self {
            ChaincodeAction::Deploy => 1,
            ChaincodeAction::Invoke => 2,
            ChaincodeAction::Query => 3,
        }
    }

    fn from_wire(value: u64) -> Result<Self, LedgerError> {
        match value {
            1 => Ok(ChaincodeAction::Deploy),
            2 => Ok(ChaincodeAction::Invoke),
            3 => Ok(ChaincodeAction::Query),
            other => Err(LedgerError::serialization(format!(
                "unknown chaincode action [{}]",
                other
            ))),
        }
    }
}

/// A single candidate transaction carried inside a set.
///
/// Wire fields: `1 action`, `2 chaincodeName`, `3 payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSpec {
    pub action: ChaincodeAction,
    pub chaincode_name: String,
    pub payload: Vec<u8>,
}

impl TxSpec {
    pub fn new(action: ChaincodeAction, chaincode_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            action,
            chaincode_name: chaincode_name.into(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.uint(1, self.action.to_wire());
        w.bytes(2, self.chaincode_name.as_bytes());
        w.bytes(3, &self.payload);
        w.into_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, LedgerError> {
        let mut action = None;
        let mut chaincode_name = String::new();
        let mut payload = Vec::new();
        let mut r = WireReader::new(buf);
        while let Some((field, fv)) = r.next_field()? {
            match field {
                1 => action = Some(ChaincodeAction::from_wire(fv.as_uint(1)?)?),
                2 => {
                    chaincode_name = String::from_utf8(fv.as_bytes(2)?.to_vec())
                        .map_err(|e| LedgerError::serialization(e.to_string()))?
                }
                3 => payload = fv.as_bytes(3)?.to_vec(),
                _ => {}
            }
        }
        let action = action
            .ok_or_else(|| LedgerError::serialization("candidate transaction carries no action"))?;
        Ok(Self {
            action,
            chaincode_name,
            payload,
        })
    }
}

/// An ordered family of candidate payloads sharing the enclosing txid.
///
/// Wire fields: `1 transactions[]`, `2 defaultIndex`, `3 extend`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSet {
    /// Encoded (and possibly encrypted) candidate payloads.
    pub transactions: Vec<Vec<u8>>,
    /// Index active at introduction time.
    pub default_index: u64,
    /// True when this set appends members to an already introduced set.
    pub extend: bool,
}

/// Repoints the active index of an existing set. Has no other effect.
///
/// Wire fields: `1 txSetId`, `2 txSetIndex`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutantTransaction {
    pub tx_set_id: TxSetId,
    pub tx_set_index: u64,
}

/// Read-only query of a set's stored state value.
///
/// Wire fields: `1 txSetId`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetStateQuery {
    pub tx_set_id: TxSetId,
}

/// The three in-block transaction shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionVariant {
    Set(TransactionSet),
    Mutant(MutantTransaction),
    Query(SetStateQuery),
}

/// A transaction as committed inside a block.
///
/// Wire fields: `1 txid`, `2 confidentialityLevel`, `3 nonce`, then exactly
/// one of `4 set`, `5 mutant`, `6 query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InBlockTransaction {
    pub txid: TxSetId,
    pub confidentiality_level: ConfidentialityLevel,
    /// Key-derivation nonce for confidential candidate payloads.
    pub nonce: Vec<u8>,
    pub variant: TransactionVariant,
}

impl InBlockTransaction {
    /// A set introduction carrying `candidates` with the given default.
    pub fn new_set(txid: impl Into<TxSetId>, candidates: Vec<Vec<u8>>, default_index: u64) -> Self {
        Self {
            txid: txid.into(),
            confidentiality_level: ConfidentialityLevel::Public,
            nonce: Vec::new(),
            variant: TransactionVariant::Set(TransactionSet {
                transactions: candidates,
                default_index,
                extend: false,
            }),
        }
    }

    /// An extension appending `candidates` to the set named by `txid`.
    pub fn new_extension(txid: impl Into<TxSetId>, candidates: Vec<Vec<u8>>) -> Self {
        Self {
            txid: txid.into(),
            confidentiality_level: ConfidentialityLevel::Public,
            nonce: Vec::new(),
            variant: TransactionVariant::Set(TransactionSet {
                transactions: candidates,
                default_index: 0,
                extend: true,
            }),
        }
    }

    /// A mutant repointing `tx_set_id` to `new_index`.
    pub fn new_mutant(
        txid: impl Into<TxSetId>,
        tx_set_id: impl Into<TxSetId>,
        new_index: u64,
    ) -> Self {
        Self {
            txid: txid.into(),
            confidentiality_level: ConfidentialityLevel::Public,
            nonce: Vec::new(),
            variant: TransactionVariant::Mutant(MutantTransaction {
                tx_set_id: tx_set_id.into(),
                tx_set_index: new_index,
            }),
        }
    }

    /// A read-only state query for `tx_set_id`.
    pub fn new_query(txid: impl Into<TxSetId>, tx_set_id: impl Into<TxSetId>) -> Self {
        Self {
            txid: txid.into(),
            confidentiality_level: ConfidentialityLevel::Public,
            nonce: Vec::new(),
            variant: TransactionVariant::Query(SetStateQuery {
                tx_set_id: tx_set_id.into(),
            }),
        }
    }

    pub fn transaction_set(&self) -> Option<&TransactionSet> {
        match &self.variant {
            TransactionVariant::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn mutant(&self) -> Option<&MutantTransaction> {
        match &self.variant {
            TransactionVariant::Mutant(mutant) => Some(mutant),
            _ => None,
        }
    }

    pub fn set_state_query(&self) -> Option<&SetStateQuery> {
        match &self.variant {
            TransactionVariant::Query(query) => Some(query),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.bytes(1, self.txid.as_bytes());
        w.uint(
            2,
            match self.confidentiality_level {
                ConfidentialityLevel::Public => 0,
                ConfidentialityLevel::Confidential => 1,
            },
        );
        w.bytes(3, &self.nonce);
        match &self.variant {
            TransactionVariant::Set(set) => {
                let mut body = WireWriter::new();
                for candidate in &set.transactions {
                    body.bytes(1, candidate);
                }
                body.uint(2, set.default_index);
                body.boolean(3, set.extend);
                w.message(4, &body);
            }
            TransactionVariant::Mutant(mutant) => {
                let mut body = WireWriter::new();
                body.bytes(1, mutant.tx_set_id.as_bytes());
                body.uint(2, mutant.tx_set_index);
                w.message(5, &body);
            }
            TransactionVariant::Query(query) => {
                let mut body = WireWriter::new();
                body.bytes(1, query.tx_set_id.as_bytes());
                w.message(6, &body);
            }
        }
        w.into_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, LedgerError> {
        let mut txid = TxSetId::default();
        let mut confidentiality_level = ConfidentialityLevel::Public;
        let mut nonce = Vec::new();
        let mut variant = None;
        let mut r = WireReader::new(buf);
        while let Some((field, fv)) = r.next_field()? {
            match field {
                1 => txid = TxSetId::new(fv.as_bytes(1)?),
                2 => {
                    confidentiality_level = match fv.as_uint(2)? {
                        0 => ConfidentialityLevel::Public,
                        1 => ConfidentialityLevel::Confidential,
                        other => {
                            return Err(LedgerError::serialization(format!(
                                "unknown confidentiality level [{}]",
                                other
                            )))
                        }
                    }
                }
                3 => nonce = fv.as_bytes(3)?.to_vec(),
                4 => {
                    let mut set = TransactionSet::default();
                    let mut br = WireReader::new(fv.as_bytes(4)?);
                    while let Some((bf, bv)) = br.next_field()? {
                        match bf {
                            1 => set.transactions.push(bv.as_bytes(1)?.to_vec()),
                            2 => set.default_index = bv.as_uint(2)?,
                            3 => set.extend = bv.as_bool(3)?,
                            _ => {}
                        }
                    }
                    variant = Some(TransactionVariant::Set(set));
                }
                5 => {
                    let mut mutant = MutantTransaction::default();
                    let mut br = WireReader::new(fv.as_bytes(5)?);
                    while let Some((bf, bv)) = br.next_field()? {
                        match bf {
                            1 => mutant.tx_set_id = TxSetId::new(bv.as_bytes(1)?),
                            2 => mutant.tx_set_index = bv.as_uint(2)?,
                            _ => {}
                        }
                    }
                    variant = Some(TransactionVariant::Mutant(mutant));
                }
                6 => {
                    let mut query = SetStateQuery::default();
                    let mut br = WireReader::new(fv.as_bytes(6)?);
                    while let Some((bf, bv)) = br.next_field()? {
                        if bf == 1 {
                            query.tx_set_id = TxSetId::new(bv.as_bytes(1)?);
                        }
                    }
                    variant = Some(TransactionVariant::Query(query));
                }
                _ => {}
            }
        }
        let variant = variant
            .ok_or_else(|| LedgerError::serialization("in-block transaction carries no variant"))?;
        Ok(Self {
            txid,
            confidentiality_level,
            nonce,
            variant,
        })
    }
}

/// Chaincode event emitted by an executed transaction.
///
/// Wire fields: `1 chaincodeId`, `2 txId`, `3 eventName`, `4 payload`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub tx_id: String,
    pub event_name: String,
    pub payload: Vec<u8>,
}

impl ChaincodeEvent {
    pub fn is_empty(&self) -> bool {
        self.chaincode_id.is_empty()
            && self.tx_id.is_empty()
            && self.event_name.is_empty()
            && self.payload.is_empty()
    }

    pub(crate) fn encode(&self) -> WireWriter {
        let mut w = WireWriter::new();
        w.bytes(1, self.chaincode_id.as_bytes());
        w.bytes(2, self.tx_id.as_bytes());
        w.bytes(3, self.event_name.as_bytes());
        w.bytes(4, &self.payload);
        w
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, LedgerError> {
        let mut event = ChaincodeEvent::default();
        let mut r = WireReader::new(buf);
        while let Some((field, fv)) = r.next_field()? {
            match field {
                1 => {
                    event.chaincode_id = String::from_utf8(fv.as_bytes(1)?.to_vec())
                        .map_err(|e| LedgerError::serialization(e.to_string()))?
                }
                2 => {
                    event.tx_id = String::from_utf8(fv.as_bytes(2)?.to_vec())
                        .map_err(|e| LedgerError::serialization(e.to_string()))?
                }
                3 => {
                    event.event_name = String::from_utf8(fv.as_bytes(3)?.to_vec())
                        .map_err(|e| LedgerError::serialization(e.to_string()))?
                }
                4 => event.payload = fv.as_bytes(4)?.to_vec(),
                _ => {}
            }
        }
        Ok(event)
    }
}

/// Outcome of one transaction inside a committed batch, parallel-indexed
/// with the batch itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionResult {
    pub txid: TxSetId,
    pub result: Vec<u8>,
    pub error_code: u32,
    pub error: String,
    pub chaincode_event: Option<ChaincodeEvent>,
}

impl TransactionResult {
    pub fn success(txid: TxSetId, result: Vec<u8>, event: Option<ChaincodeEvent>) -> Self {
        Self {
            txid,
            result,
            error_code: 0,
            error: String::new(),
            chaincode_event: event,
        }
    }

    pub fn failure(txid: TxSetId, error: impl Into<String>) -> Self {
        Self {
            txid,
            result: Vec::new(),
            error_code: 1,
            error: error.into(),
            chaincode_event: None,
        }
    }

    pub fn is_erroneous(&self) -> bool {
        self.error_code != 0
    }
}
