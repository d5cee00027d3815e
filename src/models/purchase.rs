use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::common::{ProviderPurchaseState, PurchaseState};

/// A purchase as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    /// Provider-assigned, unique; the idempotency key for verify and acknowledge
    pub purchase_token: String,
    pub product_id: String,
    pub state: ProviderPurchaseState,
    pub acknowledged: bool,
}

/// Ledger entry for one purchase token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub product_id: String,
    pub state: PurchaseState,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Where a purchase entered the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOrigin {
    /// Provider purchase-update event following a buy
    Live,
    /// Restore pass over existing purchases
    Restore,
}

/// Result of driving a single purchase through verification and acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Acknowledged,
    /// Verified, but the provider rejected the acknowledgment
    AcknowledgeFailed,
    VerificationFailed,
    /// Another pass already owns this token
    InFlight,
}

/// Outcome of `initiate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched,
    NotReady,
}

/// Totals for one restore pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub examined: usize,
    pub acknowledged: usize,
    pub acknowledge_failed: usize,
    pub verification_failed: usize,
    pub skipped: usize,
    pub canceled: usize,
}

impl RestoreSummary {
    pub fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Acknowledged => self.acknowledged += 1,
            ProcessOutcome::AcknowledgeFailed => self.acknowledge_failed += 1,
            ProcessOutcome::VerificationFailed => self.verification_failed += 1,
            ProcessOutcome::InFlight => self.skipped += 1,
        }
    }
}
