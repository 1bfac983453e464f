//! Wallet watch rules and the balance changes they select.

use serde::{Deserialize, Serialize};

use crate::TxHash;

/// A watch rule: outputs paying to `script_pubkey` belong to `wallet_id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletRule {
    pub wallet_id: String,
    pub script_pubkey: Vec<u8>,
}

/// The part of one transaction that concerns one wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalanceChange {
    pub wallet_id: String,
    pub transaction: TxHash,
    /// Indexes of the outputs paying to the wallet.
    pub outputs: Vec<u32>,
    pub received: u64,
}

impl WalletBalanceChange {
    /// Changes are stored grouped under the owning wallet.
    pub fn partition_key(&self) -> &str {
        &self.wallet_id
    }
}
