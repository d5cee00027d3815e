use crate::{
    config::Config,
    models::common::ConnectionState,
    provider::BillingProvider,
    services::{
        ui_dispatcher, BillingConnection, BridgeGateway, EntitlementVerifier, ProductCatalog,
        PurchaseCoordinator, TokenStore, UiHandle,
    },
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenStore>,
    pub catalog: Arc<ProductCatalog>,
    pub verifier: Arc<EntitlementVerifier>,
    pub coordinator: Arc<PurchaseCoordinator>,
    pub connection: Arc<BillingConnection>,
    pub bridge: Arc<BridgeGateway>,
    pub ui: UiHandle,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the engine around a provider. Must run inside a Tokio runtime:
    /// the UI dispatcher task is spawned here.
    pub fn new(config: Config, provider: Arc<dyn BillingProvider>) -> Result<Self, anyhow::Error> {
        let (ui, dispatcher) = ui_dispatcher::channel();

        let tokens = Arc::new(TokenStore::new());
        let verifier = Arc::new(EntitlementVerifier::new(
            &config.verification,
            &config.billing.package_name,
            tokens.clone(),
        )?);
        let catalog = Arc::new(ProductCatalog::new(
            provider.clone(),
            config.billing.product_ids.clone(),
            ui.clone(),
        ));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let coordinator = Arc::new(PurchaseCoordinator::new(
            provider.clone(),
            catalog.clone(),
            verifier.clone(),
            ui.clone(),
            state_rx,
        ));
        let connection = Arc::new(BillingConnection::new(
            provider,
            catalog.clone(),
            coordinator.clone(),
            ui.clone(),
            state_tx,
            config.billing.restore_interval_secs.map(Duration::from_secs),
        ));
        let bridge = Arc::new(BridgeGateway::new(catalog.clone(), tokens.clone(), ui.clone()));

        dispatcher.spawn(coordinator.clone());

        Ok(Self {
            tokens,
            catalog,
            verifier,
            coordinator,
            connection,
            bridge,
            ui,
            config: Arc::new(config),
        })
    }
}
