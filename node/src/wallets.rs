//! Wallet watch rules and balance extraction.

use std::collections::BTreeMap;

use chainwatch_types::{Transaction, TxHash, WalletBalanceChange, WalletRule};
use parking_lot::RwLock;

/// Append-only set of watch rules.
///
/// Appends come from the ordered lane only; indexing work reads a snapshot.
#[derive(Default)]
pub struct WalletRuleSet {
    rules: RwLock<Vec<WalletRule>>,
}

impl WalletRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Returns false if an identical rule is already present.
    pub fn append(&self, rule: WalletRule) -> bool {
        let mut rules = self.rules.write();
        if rules.contains(&rule) {
            return false;
        }
        rules.push(rule);
        true
    }

    /// Append every rule in `rules`, skipping duplicates. Returns the number
    /// added.
    pub fn extend(&self, rules: impl IntoIterator<Item = WalletRule>) -> usize {
        rules.into_iter().filter(|r| self.append(r.clone())).count()
    }

    pub fn snapshot(&self) -> Vec<WalletRule> {
        self.rules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

/// Balance changes `tx` causes for the wallets in `rules`, grouped by
/// partition key.
///
/// An output belongs to a rule when its script equals the rule's script.
/// Transactions that touch no watched wallet yield an empty map.
pub fn extract_balances(
    rules: &[WalletRule],
    hash: &TxHash,
    tx: &Transaction,
) -> BTreeMap<String, Vec<WalletBalanceChange>> {
    let mut groups: BTreeMap<String, Vec<WalletBalanceChange>> = BTreeMap::new();
    for rule in rules {
        let mut outputs = Vec::new();
        let mut received = 0u64;
        for (index, output) in tx.outputs.iter().enumerate() {
            if output.script_pubkey == rule.script_pubkey {
                outputs.push(index as u32);
                received = received.saturating_add(output.value);
            }
        }
        if outputs.is_empty() {
            continue;
        }
        let change = WalletBalanceChange {
            wallet_id: rule.wallet_id.clone(),
            transaction: *hash,
            outputs,
            received,
        };
        groups
            .entry(change.partition_key().to_string())
            .or_default()
            .push(change);
    }
    groups
}
