//! The indexing pipeline driven by the listener.

use chainwatch_chain::HeaderChain;
use chainwatch_types::{Block, Transaction, TxHash, WalletBalanceChange, WalletRule};

use crate::StoreError;

/// Writes chain data into the index.
///
/// Calls are synchronous and may block on storage. They can arrive
/// concurrently from several tasks, except that everything touching the
/// header chain is issued from one task at a time.
pub trait Indexer: Send + Sync {
    /// Bring the indexed header chain up to date with `chain`.
    fn index_chain(&self, chain: &HeaderChain) -> Result<(), StoreError>;

    /// Index an unconfirmed transaction entry.
    fn index_transaction(&self, hash: &TxHash, tx: &Transaction) -> Result<(), StoreError>;

    /// Index the balance view of an unconfirmed transaction.
    fn index_ordered_balance(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// Index a full block.
    fn index_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Index every transaction of a block confirmed at `height`.
    fn index_transactions(&self, height: u64, block: &Block) -> Result<(), StoreError>;

    /// Index the balance deltas of a block confirmed at `height`.
    fn index_block_ordered_balance(&self, height: u64, block: &Block) -> Result<(), StoreError>;

    /// Index the balance deltas of a block at `height` that match `rules`.
    fn index_wallet_ordered_balance(
        &self,
        height: u64,
        block: &Block,
        rules: &[WalletRule],
    ) -> Result<(), StoreError>;

    /// Index one partition worth of wallet balance changes.
    fn index_wallet_balances(
        &self,
        partition_key: &str,
        changes: &[WalletBalanceChange],
    ) -> Result<(), StoreError>;

    /// Every wallet rule currently stored.
    fn wallet_rules(&self) -> Result<Vec<WalletRule>, StoreError>;
}
