use futures::future::join_all;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{BillingError, Result},
    models::{
        catalog::PlanId,
        common::{
            BillingResult, ConnectionState, ProviderPurchaseState, PurchaseState, ResponseCode,
            UserMessage,
        },
        purchase::{
            LaunchOutcome, ProcessOutcome, Purchase, PurchaseOrigin, PurchaseRecord,
            RestoreSummary,
        },
    },
    provider::BillingProvider,
    services::{EntitlementVerifier, ProductCatalog, UiHandle},
    utils::fingerprint,
};

/// Outcome of a token's pipeline run, published when it finishes
type OutcomeReceiver = watch::Receiver<Option<ProcessOutcome>>;

#[derive(Default)]
struct Ledger {
    records: HashMap<String, PurchaseRecord>,
    /// Tokens whose acknowledgment the provider has confirmed
    acknowledged: HashSet<String>,
}

/// Drives purchases from launch through verification and acknowledgment.
///
/// Work is serialized per purchase token. A restore pass skips a token that is
/// already moving through the pipeline; a live event waits for that run and
/// reports its outcome to the user. Once acknowledged, a purchase never moves
/// to another state.
pub struct PurchaseCoordinator {
    provider: Arc<dyn BillingProvider>,
    catalog: Arc<ProductCatalog>,
    verifier: Arc<EntitlementVerifier>,
    ui: UiHandle,
    connection: watch::Receiver<ConnectionState>,
    ledger: Mutex<Ledger>,
    in_flight: Mutex<HashMap<String, OutcomeReceiver>>,
}

/// A token's pipeline slot. Publishes the outcome and frees the slot when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, OutcomeReceiver>>,
    token: String,
    outcome: watch::Sender<Option<ProcessOutcome>>,
}

impl InFlightGuard<'_> {
    fn finish(self, outcome: ProcessOutcome) -> ProcessOutcome {
        self.outcome.send_replace(Some(outcome));
        outcome
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.token);
    }
}

enum Claim<'a> {
    Acquired(InFlightGuard<'a>),
    Busy(OutcomeReceiver),
}

impl PurchaseCoordinator {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        catalog: Arc<ProductCatalog>,
        verifier: Arc<EntitlementVerifier>,
        ui: UiHandle,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            provider,
            catalog,
            verifier,
            ui,
            connection,
            ledger: Mutex::new(Ledger::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Launch the provider purchase flow for a plan.
    ///
    /// Returns once the flow is handed to the provider; the purchase result
    /// arrives later through [`PurchaseCoordinator::on_purchases_updated`].
    #[instrument(skip(self), fields(plan = %plan_id))]
    pub async fn initiate(&self, plan_id: &PlanId) -> Result<LaunchOutcome> {
        let Some(offer) = self.catalog.find_offer(plan_id) else {
            warn!("No cached offer for plan, refreshing catalog");
            self.ui.notify(UserMessage::ProductDetailsNotLoaded);
            self.catalog.spawn_refresh();
            return Ok(LaunchOutcome::NotReady);
        };

        if let Err(BillingError::Connection(reason)) = self.ensure_connected() {
            self.ui.notify(UserMessage::BillingNotReady(reason));
            return Ok(LaunchOutcome::NotReady);
        }

        let result = self.provider.launch_billing_flow(&offer).await;
        if !result.is_ok() {
            self.ui.notify(UserMessage::PurchaseError(result.reason()));
            return Err(BillingError::Purchase {
                code: result.code,
                message: result.reason(),
            });
        }

        info!(product_id = %offer.product_id, "Purchase flow launched");
        Ok(LaunchOutcome::Launched)
    }

    /// Handle a purchase-update event from the provider
    #[instrument(skip_all, fields(code = %result.code.as_str(), purchases = purchases.len()))]
    pub async fn on_purchases_updated(&self, result: BillingResult, purchases: Vec<Purchase>) {
        match result.code {
            ResponseCode::Ok => {
                let mut verifications = Vec::new();
                for purchase in purchases {
                    match purchase.state {
                        ProviderPurchaseState::Purchased => {
                            verifications.push(self.process_purchase(purchase, PurchaseOrigin::Live))
                        }
                        ProviderPurchaseState::Pending => {
                            if self.transition(&purchase.purchase_token, &purchase.product_id, PurchaseState::Pending) {
                                self.ui.notify(UserMessage::PaymentPending);
                            }
                        }
                        ProviderPurchaseState::Unspecified => {
                            debug!(token = %fingerprint(&purchase.purchase_token), "Ignoring purchase in unspecified state")
                        }
                    }
                }
                join_all(verifications).await;
            }
            ResponseCode::UserCanceled => {
                self.ui.notify(UserMessage::PurchaseCanceled);
            }
            ResponseCode::ItemAlreadyOwned => {
                for purchase in &purchases {
                    self.transition(
                        &purchase.purchase_token,
                        &purchase.product_id,
                        PurchaseState::AlreadyOwned,
                    );
                }
                info!("Item already owned, restoring entitlements");
                if let Err(e) = self.restore().await {
                    warn!("Restore after already-owned failed: {}", e);
                }
            }
            _ => {
                self.ui.notify(UserMessage::PurchaseError(result.reason()));
            }
        }
    }

    /// Re-verify and acknowledge every purchase the provider currently recognizes.
    ///
    /// This is the only path that resumes an interrupted verification or
    /// acknowledgment. Safe to run repeatedly and alongside live events.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let purchases = self.provider.query_purchases().await.map_err(|result| {
            warn!("Purchase query failed: {:?}", result);
            BillingError::Purchase {
                code: result.code,
                message: result.reason(),
            }
        })?;

        let mut summary = RestoreSummary::default();

        let reported: HashSet<&str> = purchases
            .iter()
            .map(|p| p.purchase_token.as_str())
            .collect();
        summary.canceled = self.cancel_abandoned_pending(&reported);

        let mut verifications = Vec::new();
        for purchase in &purchases {
            match purchase.state {
                ProviderPurchaseState::Purchased => {
                    verifications.push(self.process_purchase(purchase.clone(), PurchaseOrigin::Restore))
                }
                ProviderPurchaseState::Pending => {
                    self.transition(&purchase.purchase_token, &purchase.product_id, PurchaseState::Pending);
                }
                ProviderPurchaseState::Unspecified => {}
            }
        }
        summary.examined = verifications.len();

        for outcome in join_all(verifications).await {
            summary.record(outcome);
        }

        info!(?summary, "Restore pass finished");
        Ok(summary)
    }

    /// Verify one purchased item with the backend, then acknowledge it.
    ///
    /// A live event for a token already in the pipeline waits for that run and
    /// reports its outcome; a restore pass skips the token.
    pub async fn process_purchase(&self, purchase: Purchase, origin: PurchaseOrigin) -> ProcessOutcome {
        let token = purchase.purchase_token.as_str();
        self.record_seen(token, &purchase.product_id);

        let slot = match self.claim(token) {
            Claim::Acquired(slot) => slot,
            Claim::Busy(_) if origin == PurchaseOrigin::Restore => {
                debug!(token = %fingerprint(token), "Purchase already in pipeline, skipping");
                return ProcessOutcome::InFlight;
            }
            Claim::Busy(outcome) => {
                debug!(token = %fingerprint(token), "Purchase already in pipeline, waiting for it");
                let outcome = wait_for_outcome(outcome).await;
                self.notify_outcome(outcome);
                return outcome;
            }
        };

        let outcome = slot.finish(self.verify_and_acknowledge(&purchase).await);
        if origin == PurchaseOrigin::Live {
            self.notify_outcome(outcome);
        }
        outcome
    }

    async fn verify_and_acknowledge(&self, purchase: &Purchase) -> ProcessOutcome {
        let token = purchase.purchase_token.as_str();
        self.transition(token, &purchase.product_id, PurchaseState::VerificationInFlight);

        if !self.verifier.verify(token, &purchase.product_id).await {
            self.transition(token, &purchase.product_id, PurchaseState::VerificationFailed);
            return ProcessOutcome::VerificationFailed;
        }

        self.transition(token, &purchase.product_id, PurchaseState::Verified);

        match self.acknowledge_if_needed(purchase).await {
            Ok(()) => ProcessOutcome::Acknowledged,
            Err(e) => {
                warn!(token = %fingerprint(token), "{}", e);
                ProcessOutcome::AcknowledgeFailed
            }
        }
    }

    /// User-visible result of a live purchase
    fn notify_outcome(&self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Acknowledged | ProcessOutcome::AcknowledgeFailed => {
                self.ui.notify(UserMessage::SubscriptionActivated)
            }
            ProcessOutcome::VerificationFailed => self.ui.notify(UserMessage::VerificationFailed),
            ProcessOutcome::InFlight => {}
        }
    }

    /// Acknowledge a verified purchase unless that already happened
    async fn acknowledge_if_needed(&self, purchase: &Purchase) -> Result<()> {
        let token = purchase.purchase_token.as_str();

        if purchase.acknowledged || self.is_acknowledged(token) {
            self.mark_acknowledged(token, &purchase.product_id);
            debug!(token = %fingerprint(token), "Already acknowledged");
            return Ok(());
        }

        let result = self.provider.acknowledge_purchase(token).await;
        if !result.is_ok() {
            self.ui.notify(UserMessage::AcknowledgeFailed(result.reason()));
            return Err(BillingError::Acknowledgment(result.reason()));
        }

        self.mark_acknowledged(token, &purchase.product_id);
        info!(token = %fingerprint(token), "Purchase acknowledged");
        Ok(())
    }

    fn claim(&self, token: &str) -> Claim<'_> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(outcome) = in_flight.get(token) {
            return Claim::Busy(outcome.clone());
        }

        let (outcome, receiver) = watch::channel(None);
        in_flight.insert(token.to_string(), receiver);
        Claim::Acquired(InFlightGuard {
            in_flight: &self.in_flight,
            token: token.to_string(),
            outcome,
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        match &*self.connection.borrow() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Failed(reason) => Err(BillingError::Connection(reason.clone())),
            other => Err(BillingError::Connection(format!("{:?}", other))),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move a purchase to `state`. Returns `false` when the purchase is
    /// already acknowledged, which is terminal.
    fn transition(&self, token: &str, product_id: &str, state: PurchaseState) -> bool {
        let now = OffsetDateTime::now_utc();
        let mut ledger = self.ledger();
        if state != PurchaseState::Acknowledged && ledger.acknowledged.contains(token) {
            debug!(token = %fingerprint(token), ?state, "Purchase already acknowledged, keeping state");
            return false;
        }
        ledger
            .records
            .entry(token.to_string())
            .and_modify(|record| {
                record.state = state;
                record.updated_at = now;
            })
            .or_insert_with(|| PurchaseRecord {
                product_id: product_id.to_string(),
                state,
                updated_at: now,
            });
        debug!(token = %fingerprint(token), ?state, "Purchase state changed");
        true
    }

    /// First sighting of a purchased token the provider reports
    fn record_seen(&self, token: &str, product_id: &str) {
        self.ledger()
            .records
            .entry(token.to_string())
            .or_insert_with(|| PurchaseRecord {
                product_id: product_id.to_string(),
                state: PurchaseState::Purchased,
                updated_at: OffsetDateTime::now_utc(),
            });
    }

    fn is_acknowledged(&self, token: &str) -> bool {
        self.ledger().acknowledged.contains(token)
    }

    fn mark_acknowledged(&self, token: &str, product_id: &str) {
        self.ledger().acknowledged.insert(token.to_string());
        self.transition(token, product_id, PurchaseState::Acknowledged);
    }

    /// Pending payments the provider no longer reports were declined or abandoned
    fn cancel_abandoned_pending(&self, reported: &HashSet<&str>) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut ledger = self.ledger();
        let mut canceled = 0;
        for (token, record) in ledger.records.iter_mut() {
            if record.state == PurchaseState::Pending && !reported.contains(token.as_str()) {
                record.state = PurchaseState::Canceled;
                record.updated_at = now;
                canceled += 1;
            }
        }
        canceled
    }

    pub fn purchase_state(&self, purchase_token: &str) -> Option<PurchaseState> {
        self.ledger()
            .records
            .get(purchase_token)
            .map(|record| record.state)
    }

    /// Snapshot of every tracked purchase
    pub fn purchases(&self) -> HashMap<String, PurchaseRecord> {
        self.ledger().records.clone()
    }
}

/// Outcome of the run holding a token; `InFlight` if that run was abandoned
async fn wait_for_outcome(mut outcome: OutcomeReceiver) -> ProcessOutcome {
    match outcome.wait_for(Option::is_some).await {
        Ok(published) => published.unwrap_or(ProcessOutcome::InFlight),
        Err(_) => ProcessOutcome::InFlight,
    }
}
