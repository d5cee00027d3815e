use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock},
};
use tracing::{info, instrument, warn};

use crate::{
    error::{BillingError, Result},
    models::{
        catalog::{derive_plans, Offer, Plan, PlanId},
        common::UserMessage,
    },
    provider::BillingProvider,
    services::UiHandle,
};

/// Offer set as of the last successful refresh
#[derive(Debug, Default)]
struct CatalogSnapshot {
    offers: Vec<Offer>,
    /// Product ids that resolved to at least one usable offer
    covered: BTreeSet<String>,
}

/// Resolves configured products against the provider catalog and derives plans.
pub struct ProductCatalog {
    provider: Arc<dyn BillingProvider>,
    product_ids: BTreeSet<String>,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
    refresh_lock: tokio::sync::Mutex<()>,
    ui: UiHandle,
}

impl ProductCatalog {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        product_ids: BTreeSet<String>,
        ui: UiHandle,
    ) -> Self {
        Self {
            provider,
            product_ids,
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
            ui,
        }
    }

    fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Refresh the configured products
    pub async fn refresh_configured(&self) -> Result<usize> {
        self.refresh(&self.product_ids).await
    }

    /// Kick off a refresh without waiting for it
    pub fn spawn_refresh(self: &Arc<Self>) {
        let catalog = self.clone();
        tokio::spawn(async move {
            if let Err(e) = catalog.refresh_configured().await {
                warn!("Background catalog refresh failed: {}", e);
            }
        });
    }

    /// Query the provider for `product_ids` in one batch and swap the offer set.
    ///
    /// On failure, or when the answer is missing products the current set
    /// already covers, the current set is kept. Returns the number of offers
    /// now cached.
    #[instrument(skip(self))]
    pub async fn refresh(&self, product_ids: &BTreeSet<String>) -> Result<usize> {
        let _guard = self.refresh_lock.lock().await;

        let ids: Vec<String> = product_ids.iter().cloned().collect();
        let details = match self.provider.query_product_details(&ids).await {
            Ok(details) => details,
            Err(result) => {
                warn!("Catalog query failed: {:?}", result);
                self.ui.notify(UserMessage::CatalogLoadFailed(result.reason()));
                return Err(BillingError::Catalog(result.reason()));
            }
        };

        let mut offers = Vec::new();
        let mut covered = BTreeSet::new();
        for product in details {
            if !product_ids.contains(&product.product_id) {
                continue;
            }
            let before = offers.len();
            for offer_details in &product.subscription_offers {
                match Offer::from_details(&product.product_id, offer_details) {
                    Some(offer) => offers.push(offer),
                    None => warn!(
                        product_id = %product.product_id,
                        base_plan = %offer_details.base_plan_id,
                        period = %offer_details.billing_period,
                        "Skipping offer that cannot be listed"
                    ),
                }
            }
            if offers.len() > before {
                covered.insert(product.product_id);
            }
        }

        let missing: Vec<String> = product_ids
            .iter()
            .filter(|id| !covered.contains(*id))
            .cloned()
            .collect();

        let previous = self.snapshot();
        let previous_complete =
            !previous.offers.is_empty() && product_ids.is_subset(&previous.covered);
        if !missing.is_empty() && previous_complete {
            warn!(?missing, "Incomplete catalog response, keeping previous offers");
            return Err(BillingError::Catalog(format!(
                "incomplete catalog response, missing: {}",
                missing.join(", ")
            )));
        }

        for product_id in missing {
            self.ui.notify(UserMessage::ProductNotFound(product_id));
        }

        let count = offers.len();
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *snapshot = Arc::new(CatalogSnapshot { offers, covered });

        info!("Catalog refreshed: {} offers", count);
        Ok(count)
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().offers.is_empty()
    }

    pub fn find_offer(&self, plan_id: &PlanId) -> Option<Offer> {
        self.snapshot()
            .offers
            .iter()
            .find(|offer| offer.matches(plan_id))
            .cloned()
    }

    /// Plans derived from the current offer set
    pub fn list_plans(&self) -> Vec<Plan> {
        derive_plans(&self.snapshot().offers)
    }
}
