//! Notification seam for broadcast outcomes.

use chainwatch_types::TxHash;

/// Told when the relay peer refuses a tracked transaction for a reason
/// other than already knowing it.
pub trait BroadcastStatusHook: Send + Sync {
    /// `status` is the reject code name, e.g. `"INSUFFICIENTFEE"`.
    fn broadcast_rejected(&self, hash: &TxHash, status: &str);
}

/// Hook that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStatusHook;

impl BroadcastStatusHook for NoopStatusHook {
    fn broadcast_rejected(&self, hash: &TxHash, status: &str) {
        tracing::trace!(tx = %hash, status, "broadcast rejected");
    }
}
