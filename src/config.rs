use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub billing: BillingConfig,
    pub verification: VerificationConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin of the hosted web content allowed to call the bridge
    pub content_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Subscription product identifiers resolved against the provider catalog
    pub product_ids: BTreeSet<String>,
    /// Application package identifier sent with every verification request
    pub package_name: String,
    /// Periodic restore pass while connected; disabled when absent
    #[serde(default)]
    pub restore_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    15_000
}

/// In-process billing provider used for local development
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub setup_delay_ms: u64,
    #[serde(default)]
    pub products: Vec<SandboxProductConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxProductConfig {
    pub product_id: String,
    pub title: String,
    pub offers: Vec<SandboxOfferConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxOfferConfig {
    pub base_plan_id: String,
    pub offer_token: String,
    /// ISO-8601 period, e.g. "P1M" or "P1Y"
    pub billing_period: String,
    pub price_micros: i64,
    pub formatted_price: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(true))
            // Allow environment variables to override config file
            .add_source(
                config::Environment::with_prefix("FLOWQR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
