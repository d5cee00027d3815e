use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::{
    error::BridgeError,
    models::{
        bridge::{AuthRequest, BuyRequest, PlanView},
        catalog::PlanId,
    },
    services::{ProductCatalog, TokenStore, UiHandle},
};

/// The only surface hosted content can reach.
///
/// Exposes three verbs: list plans, buy a plan, set the session credential.
/// Arguments are validated before anything else happens, and errors carry no
/// engine internals.
pub struct BridgeGateway {
    catalog: Arc<ProductCatalog>,
    tokens: Arc<TokenStore>,
    ui: UiHandle,
}

impl BridgeGateway {
    pub fn new(catalog: Arc<ProductCatalog>, tokens: Arc<TokenStore>, ui: UiHandle) -> Self {
        Self {
            catalog,
            tokens,
            ui,
        }
    }

    /// Current plans, loading the catalog first if nothing is cached
    #[instrument(skip(self))]
    pub async fn get_plans(&self) -> Vec<PlanView> {
        if self.catalog.is_empty() {
            if let Err(e) = self.catalog.refresh_configured().await {
                warn!("Catalog unavailable for bridge: {}", e);
            }
        }

        self.catalog
            .list_plans()
            .iter()
            .map(PlanView::from)
            .collect()
    }

    /// Queue a purchase launch on the UI context. Fire-and-forget.
    pub fn buy(&self, plan_id: &str) -> Result<(), BridgeError> {
        let request = BuyRequest {
            plan_id: plan_id.to_string(),
        };
        request
            .validate()
            .map_err(|_| BridgeError::InvalidArgument("planId is malformed".to_string()))?;

        let plan_id: PlanId = request
            .plan_id
            .parse()
            .map_err(|_| BridgeError::InvalidArgument("planId is malformed".to_string()))?;

        info!(plan = %plan_id, "Bridge buy");
        self.ui.launch_purchase(plan_id)
    }

    /// Replace the bearer credential used for verification
    pub fn set_auth(&self, token: &str) -> Result<(), BridgeError> {
        let request = AuthRequest {
            token: token.to_string(),
        };
        request
            .validate()
            .map_err(|_| BridgeError::InvalidArgument("token is malformed".to_string()))?;

        self.tokens.set(&request.token);
        Ok(())
    }
}
