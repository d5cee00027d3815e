//! In-process billing provider.
//!
//! Serves a fixed catalog from configuration and completes purchase flows
//! immediately. Used by the development binary and the test suite; outcomes
//! of the next purchase, catalog queries and acknowledgments can be scripted.

use async_trait::async_trait;
use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tracing::{debug, info};

use super::{BillingProvider, ProviderEvent, ProviderEventSender};
use crate::{
    config::SandboxConfig,
    models::{
        catalog::{Offer, ProductDetails, SubscriptionOfferDetails},
        common::{BillingResult, ProviderPurchaseState, ResponseCode},
        purchase::Purchase,
    },
};

/// What the next launched purchase flow resolves to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PurchaseScript {
    #[default]
    Complete,
    Pending,
    Cancel,
    AlreadyOwned,
    Fail(BillingResult),
}

/// Call counters, for assertions
#[derive(Debug, Clone, Default)]
pub struct SandboxStats {
    pub connections: usize,
    pub catalog_queries: usize,
    pub purchase_queries: usize,
    pub launches: Vec<Offer>,
    pub acknowledge_attempts: Vec<String>,
}

struct SandboxState {
    products: Vec<ProductDetails>,
    purchases: Vec<Purchase>,
    events: Option<ProviderEventSender>,
    setup_result: BillingResult,
    catalog_failure: Option<BillingResult>,
    purchases_failure: Option<BillingResult>,
    acknowledge_failure: Option<BillingResult>,
    next_purchase: PurchaseScript,
    stats: SandboxStats,
}

pub struct SandboxProvider {
    state: Mutex<SandboxState>,
    setup_delay: Duration,
}

impl SandboxProvider {
    pub fn new(products: Vec<ProductDetails>) -> Self {
        Self {
            state: Mutex::new(SandboxState {
                products,
                purchases: Vec::new(),
                events: None,
                setup_result: BillingResult::ok(),
                catalog_failure: None,
                purchases_failure: None,
                acknowledge_failure: None,
                next_purchase: PurchaseScript::default(),
                stats: SandboxStats::default(),
            }),
            setup_delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        let products = config
            .products
            .iter()
            .map(|product| ProductDetails {
                product_id: product.product_id.clone(),
                title: product.title.clone(),
                subscription_offers: product
                    .offers
                    .iter()
                    .map(|offer| SubscriptionOfferDetails {
                        base_plan_id: offer.base_plan_id.clone(),
                        offer_token: offer.offer_token.clone(),
                        billing_period: offer.billing_period.clone(),
                        price_amount_micros: offer.price_micros,
                        formatted_price: offer.formatted_price.clone(),
                    })
                    .collect(),
            })
            .collect();

        Self::new(products).with_setup_delay(Duration::from_millis(config.setup_delay_ms))
    }

    pub fn with_setup_delay(mut self, delay: Duration) -> Self {
        self.setup_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        // A panicked holder leaves counters and lists intact, keep serving
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_setup_result(&self, result: BillingResult) {
        self.lock().setup_result = result;
    }

    pub fn set_products(&self, products: Vec<ProductDetails>) {
        self.lock().products = products;
    }

    pub fn fail_catalog_queries(&self, failure: Option<BillingResult>) {
        self.lock().catalog_failure = failure;
    }

    pub fn fail_purchase_queries(&self, failure: Option<BillingResult>) {
        self.lock().purchases_failure = failure;
    }

    pub fn fail_acknowledgments(&self, failure: Option<BillingResult>) {
        self.lock().acknowledge_failure = failure;
    }

    pub fn script_next_purchase(&self, script: PurchaseScript) {
        self.lock().next_purchase = script;
    }

    /// Seed a purchase made outside this process (another device, a previous install)
    pub fn insert_purchase(&self, purchase: Purchase) {
        self.lock().purchases.push(purchase);
    }

    pub fn purchases(&self) -> Vec<Purchase> {
        self.lock().purchases.clone()
    }

    pub fn stats(&self) -> SandboxStats {
        self.lock().stats.clone()
    }

    /// Settle a pending payment and notify the listener
    pub fn complete_pending(&self, purchase_token: &str) -> bool {
        let mut state = self.lock();
        let Some(purchase) = state
            .purchases
            .iter_mut()
            .find(|p| p.purchase_token == purchase_token && p.state == ProviderPurchaseState::Pending)
        else {
            return false;
        };
        purchase.state = ProviderPurchaseState::Purchased;
        let updated = purchase.clone();
        state.emit(ProviderEvent::PurchasesUpdated(BillingResult::ok(), vec![updated]));
        true
    }

    /// Simulate the provider service going away
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.emit(ProviderEvent::ServiceDisconnected);
    }

    /// Replay an arbitrary purchase update to the listener
    pub fn emit(&self, event: ProviderEvent) {
        self.lock().emit(event);
    }
}

impl SandboxState {
    fn emit(&mut self, event: ProviderEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Sandbox listener gone, dropping event");
                self.events = None;
            }
        }
    }

    fn new_purchase(&mut self, product_id: &str, state: ProviderPurchaseState) -> Purchase {
        let purchase = Purchase {
            purchase_token: format!("sandbox-{}", uuid::Uuid::new_v4()),
            product_id: product_id.to_string(),
            state,
            acknowledged: false,
        };
        self.purchases.push(purchase.clone());
        purchase
    }
}

#[async_trait]
impl BillingProvider for SandboxProvider {
    fn start_connection(&self, events: ProviderEventSender) {
        let result = {
            let mut state = self.lock();
            state.stats.connections += 1;
            state.events = Some(events.clone());
            state.setup_result.clone()
        };

        info!("Sandbox billing provider connecting");

        if self.setup_delay.is_zero() {
            let _ = events.send(ProviderEvent::SetupFinished(result));
        } else {
            let delay = self.setup_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ProviderEvent::SetupFinished(result));
            });
        }
    }

    fn end_connection(&self) {
        self.lock().events = None;
    }

    async fn query_product_details(
        &self,
        product_ids: &[String],
    ) -> Result<Vec<ProductDetails>, BillingResult> {
        let mut state = self.lock();
        state.stats.catalog_queries += 1;
        if let Some(failure) = &state.catalog_failure {
            return Err(failure.clone());
        }
        Ok(state
            .products
            .iter()
            .filter(|p| product_ids.contains(&p.product_id))
            .cloned()
            .collect())
    }

    async fn launch_billing_flow(&self, offer: &Offer) -> BillingResult {
        let mut state = self.lock();
        if state.events.is_none() {
            return BillingResult::new(ResponseCode::ServiceDisconnected, "Not connected");
        }
        if !state.products.iter().any(|p| p.product_id == offer.product_id) {
            return BillingResult::new(ResponseCode::ItemUnavailable, "Unknown product");
        }
        state.stats.launches.push(offer.clone());

        let event = match std::mem::take(&mut state.next_purchase) {
            PurchaseScript::Complete => {
                let purchase = state.new_purchase(&offer.product_id, ProviderPurchaseState::Purchased);
                ProviderEvent::PurchasesUpdated(BillingResult::ok(), vec![purchase])
            }
            PurchaseScript::Pending => {
                let purchase = state.new_purchase(&offer.product_id, ProviderPurchaseState::Pending);
                ProviderEvent::PurchasesUpdated(BillingResult::ok(), vec![purchase])
            }
            PurchaseScript::Cancel => ProviderEvent::PurchasesUpdated(
                BillingResult::new(ResponseCode::UserCanceled, "User canceled"),
                Vec::new(),
            ),
            PurchaseScript::AlreadyOwned => ProviderEvent::PurchasesUpdated(
                BillingResult::new(ResponseCode::ItemAlreadyOwned, "Item already owned"),
                Vec::new(),
            ),
            PurchaseScript::Fail(result) => ProviderEvent::PurchasesUpdated(result, Vec::new()),
        };
        state.emit(event);

        BillingResult::ok()
    }

    async fn query_purchases(&self) -> Result<Vec<Purchase>, BillingResult> {
        let mut state = self.lock();
        state.stats.purchase_queries += 1;
        if let Some(failure) = &state.purchases_failure {
            return Err(failure.clone());
        }
        Ok(state.purchases.clone())
    }

    async fn acknowledge_purchase(&self, purchase_token: &str) -> BillingResult {
        let mut state = self.lock();
        state.stats.acknowledge_attempts.push(purchase_token.to_string());
        if let Some(failure) = &state.acknowledge_failure {
            return failure.clone();
        }
        match state
            .purchases
            .iter_mut()
            .find(|p| p.purchase_token == purchase_token)
        {
            Some(purchase) => {
                purchase.acknowledged = true;
                BillingResult::ok()
            }
            None => BillingResult::new(ResponseCode::ItemNotOwned, "Unknown purchase token"),
        }
    }
}
