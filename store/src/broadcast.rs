//! Persisted request to relay a transaction.

use chainwatch_types::{DecodeError, Transaction};
use serde::{Deserialize, Serialize};

/// A record in the broadcast-request feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Canonical encoding of the transaction to relay.
    pub raw_transaction: Vec<u8>,
}

impl BroadcastRequest {
    pub fn new(tx: &Transaction) -> Self {
        Self {
            raw_transaction: tx.to_bytes(),
        }
    }

    pub fn decode(&self) -> Result<Transaction, DecodeError> {
        Transaction::from_bytes(&self.raw_transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_returns_the_original_transaction() {
        let tx = Transaction {
            version: 2,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 9,
        };
        let request = BroadcastRequest::new(&tx);
        assert_eq!(request.decode().expect("decodes").hash(), tx.hash());
    }

    #[test]
    fn decode_fails_on_garbage() {
        let request = BroadcastRequest {
            raw_transaction: vec![0xde, 0xad],
        };
        assert!(request.decode().is_err());
    }
}
