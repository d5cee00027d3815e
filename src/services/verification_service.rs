use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::VerificationConfig,
    error::{BillingError, Result},
    models::verification::{VerificationRequest, VerificationResult},
    services::TokenStore,
    utils::fingerprint,
};

/// Pending backend answer; every clone resolves to the same result
pub type VerificationHandle = Shared<BoxFuture<'static, VerificationResult>>;

type InFlight = Arc<Mutex<HashMap<String, VerificationHandle>>>;

/// Submits purchase evidence to the backend and interprets the answer.
///
/// Requests run on spawned tasks and are never cancelled once sent. At most
/// one request per purchase token is outstanding; concurrent callers for the
/// same token share it.
pub struct EntitlementVerifier {
    http_client: reqwest::Client,
    url: String,
    package_name: String,
    tokens: Arc<TokenStore>,
    in_flight: InFlight,
}

impl EntitlementVerifier {
    pub fn new(
        config: &VerificationConfig,
        package_name: &str,
        tokens: Arc<TokenStore>,
    ) -> Result<Self> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let read_timeout = Duration::from_millis(config.read_timeout_ms);
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            // Upper bound for the whole exchange
            .timeout(connect_timeout + read_timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            url: config.url.clone(),
            package_name: package_name.to_string(),
            tokens,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Start (or join) verification of a purchase token
    pub fn submit(&self, purchase_token: &str, product_id: &str) -> VerificationHandle {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handle) = in_flight.get(purchase_token) {
            debug!(
                token = %fingerprint(purchase_token),
                "Verification already in flight, joining"
            );
            return handle.clone();
        }

        let request = VerificationRequest {
            product_id: product_id.to_string(),
            purchase_token: purchase_token.to_string(),
            package_name: self.package_name.clone(),
        };
        let bearer = self.tokens.get();
        let client = self.http_client.clone();
        let url = self.url.clone();
        let registry = self.in_flight.clone();
        let token = purchase_token.to_string();

        let task = tokio::spawn(async move {
            let result = match send_verification(&client, &url, &request, bearer.as_deref()).await {
                Ok(()) => VerificationResult::accepted(),
                Err(e) => VerificationResult::rejected(e.to_string()),
            };
            registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&token);
            result
        });

        let handle = async move {
            task.await.unwrap_or_else(|e| {
                VerificationResult::rejected(format!("verification task failed: {}", e))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(purchase_token.to_string(), handle.clone());
        handle
    }

    /// Verify a purchase with the backend. Any failure resolves to `false`.
    #[instrument(skip_all, fields(token = %fingerprint(purchase_token), product_id = %product_id))]
    pub async fn verify(&self, purchase_token: &str, product_id: &str) -> bool {
        let result = self.submit(purchase_token, product_id).await;
        match &result.message {
            None => info!("Purchase verified by backend"),
            Some(message) => warn!("Purchase rejected: {}", message),
        }
        result.accepted
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

async fn send_verification(
    client: &reqwest::Client,
    url: &str,
    request: &VerificationRequest,
    bearer: Option<&str>,
) -> Result<()> {
    let mut builder = client.post(url).json(request);
    if let Some(bearer) = bearer {
        builder = builder.header(reqwest::header::AUTHORIZATION, bearer);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| BillingError::Verification(format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BillingError::Verification(format!(
            "backend returned {}",
            status
        )));
    }

    // Body content is not part of the contract, but it must arrive in full
    response
        .bytes()
        .await
        .map_err(|e| BillingError::Verification(format!("failed to read response: {}", e)))?;

    Ok(())
}
