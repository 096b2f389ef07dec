//! Identifier generation
//!
//! Account numbers and transaction ids are random hex strings drawn from the
//! operating system CSPRNG. Uniqueness is enforced by the store's unique
//! constraints; callers retry with a fresh value on collision.

use rand::rngs::OsRng;
use rand::RngCore;

/// Length of an account number in hex characters.
pub const ACCOUNT_NUMBER_LEN: usize = 12;

/// Length of a transaction id in hex characters.
pub const TRANSACTION_ID_LEN: usize = 32;

/// 12 hex chars taken from 8 random bytes.
pub fn new_account_number() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);

    let mut number = hex::encode(bytes);
    number.truncate(ACCOUNT_NUMBER_LEN);
    number
}

/// 32 hex chars from 16 random bytes.
pub fn new_transaction_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Check that a caller-supplied transaction id has the generated shape.
pub fn is_valid_transaction_id(candidate: &str) -> bool {
    candidate.len() == TRANSACTION_ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Source of account numbers and transaction ids.
pub trait IdGenerator: Send + Sync {
    fn new_account_number(&self) -> String;
    fn new_transaction_id(&self) -> String;
}

/// Default generator backed by the OS random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn new_account_number(&self) -> String {
        new_account_number()
    }

    fn new_transaction_id(&self) -> String {
        new_transaction_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_account_number_shape() {
        let number = new_account_number();
        assert_eq!(number.len(), ACCOUNT_NUMBER_LEN);
        assert!(number.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_transaction_id_shape() {
        let id = new_transaction_id();
        assert_eq!(id.len(), TRANSACTION_ID_LEN);
        assert!(is_valid_transaction_id(&id));
    }

    #[test]
    fn test_generated_ids_differ() {
        let ids: HashSet<String> = (0..1000).map(|_| new_transaction_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_transaction_id_validation() {
        assert!(!is_valid_transaction_id(""));
        assert!(!is_valid_transaction_id("abc"));
        // uppercase is not what the generator produces
        assert!(!is_valid_transaction_id(&"A".repeat(32)));
        assert!(!is_valid_transaction_id(&"g".repeat(32)));
        assert!(is_valid_transaction_id(&"0f".repeat(16)));
    }
}
