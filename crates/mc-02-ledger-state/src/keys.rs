//! Key layout helpers shared by both state stores.

/// Big-endian block-number key; preserves numeric order under the store's
/// lexicographic iteration.
pub fn block_number_key(block_number: u64) -> [u8; 8] {
    block_number.to_be_bytes()
}

/// Composite `chaincode_id ++ 0x00 ++ key` world-state key.
pub fn composite_key(chaincode_id: &str, key: &str) -> Vec<u8> {
    let mut composite = Vec::with_capacity(chaincode_id.len() + 1 + key.len());
    composite.extend_from_slice(chaincode_id.as_bytes());
    composite.push(0x00);
    composite.extend_from_slice(key.as_bytes());
    composite
}

/// Split a composite key back into `(chaincode_id, key)`.
pub fn split_composite_key(composite: &[u8]) -> Option<(String, String)> {
    let sep = composite.iter().position(|b| *b == 0x00)?;
    Some((
        String::from_utf8_lossy(&composite[..sep]).into_owned(),
        String::from_utf8_lossy(&composite[sep + 1..]).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_number_key_order() {
        assert!(block_number_key(1) < block_number_key(2));
        assert!(block_number_key(255) < block_number_key(256));
    }

    #[test]
    fn test_composite_key_roundtrip() {
        let composite = composite_key("asset-transfer", "balance:alice");
        let (cc, key) = split_composite_key(&composite).unwrap();
        assert_eq!(cc, "asset-transfer");
        assert_eq!(key, "balance:alice");
    }
}
