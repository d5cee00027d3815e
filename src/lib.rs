// Library exports for the shell and tests
pub mod app_state;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod routes;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app_state::AppState;
pub use config::Config;
pub use error::{BillingError, BridgeError, Result};
