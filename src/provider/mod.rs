//! Platform billing provider interface
//!
//! The engine consumes the provider through [`BillingProvider`]. Connection
//! outcomes and purchase updates arrive asynchronously as [`ProviderEvent`]s
//! on the channel handed to [`BillingProvider::start_connection`].

pub mod sandbox;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{
    catalog::{Offer, ProductDetails},
    common::BillingResult,
    purchase::Purchase,
};

pub use sandbox::SandboxProvider;

/// Asynchronous callbacks from the provider
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Terminal outcome of `start_connection`
    SetupFinished(BillingResult),
    /// The provider dropped the connection on its own
    ServiceDisconnected,
    /// Result of a purchase flow, or an out-of-band purchase change
    PurchasesUpdated(BillingResult, Vec<Purchase>),
}

pub type ProviderEventSender = mpsc::UnboundedSender<ProviderEvent>;

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Begin setup. Exactly one `SetupFinished` follows on `events`, and all
    /// later purchase updates are delivered to the same sender.
    fn start_connection(&self, events: ProviderEventSender);

    /// Release provider resources
    fn end_connection(&self);

    /// Batched catalog query for subscription products
    async fn query_product_details(
        &self,
        product_ids: &[String],
    ) -> Result<Vec<ProductDetails>, BillingResult>;

    /// Launch the provider-driven purchase UI. The returned result only covers
    /// the launch; the purchase itself arrives as `PurchasesUpdated`.
    async fn launch_billing_flow(&self, offer: &Offer) -> BillingResult;

    /// All purchases the provider currently recognizes for this user
    async fn query_purchases(&self) -> Result<Vec<Purchase>, BillingResult>;

    async fn acknowledge_purchase(&self, purchase_token: &str) -> BillingResult;
}
