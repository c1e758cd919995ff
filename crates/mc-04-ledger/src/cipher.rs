//! Confidential-payload decryption seam.
//!
//! Confidential transaction sets store their candidate payloads encrypted;
//! the active index feeds key derivation so each member decrypts under its
//! own key. Actual cryptography is a collaborator concern; the ledger only
//! owns the call site.

use shared_types::LedgerError;

pub trait TxSetCipher: Send + Sync {
    /// Decrypt one candidate payload of a confidential set.
    fn decrypt_candidate(
        &self,
        nonce: &[u8],
        payload: &[u8],
        active_index: u64,
    ) -> Result<Vec<u8>, LedgerError>;
}

/// Pass-through cipher for deployments without confidentiality.
#[derive(Default)]
pub struct NoopTxSetCipher;

impl TxSetCipher for NoopTxSetCipher {
    fn decrypt_candidate(
        &self,
        _nonce: &[u8],
        payload: &[u8],
        _active_index: u64,
    ) -> Result<Vec<u8>, LedgerError> {
        Ok(payload.to_vec())
    }
}
