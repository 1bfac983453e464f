//! Transactions as seen on the wire and in broadcast requests.

use serde::{Deserialize, Serialize};

use crate::{blake2b_256, DecodeError, TxHash};

/// Reference to an output of a previous transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxHash,
    pub vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Blake2b-256 of the canonical encoding.
    pub fn hash(&self) -> TxHash {
        TxHash::new(blake2b_256(&self.to_bytes()))
    }

    /// Canonical byte encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Plain data with no maps or custom impls; bincode cannot fail here.
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decode a transaction from its canonical encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(bincode::deserialize(bytes)?)
    }

    /// Sum of all output values.
    pub fn total_output(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.value))
    }
}
