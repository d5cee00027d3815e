// Service modules
pub mod bridge_service;
pub mod catalog_service;
pub mod connection_service;
pub mod purchase_service;
pub mod token_store;
pub mod ui_dispatcher;
pub mod verification_service;

pub use bridge_service::BridgeGateway;
pub use catalog_service::ProductCatalog;
pub use connection_service::BillingConnection;
pub use purchase_service::PurchaseCoordinator;
pub use token_store::TokenStore;
pub use ui_dispatcher::{UiDispatcher, UiHandle};
pub use verification_service::{EntitlementVerifier, VerificationHandle};
