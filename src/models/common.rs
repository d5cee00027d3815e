use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    UserCanceled,
    ItemAlreadyOwned,
    ServiceUnavailable,
    ServiceDisconnected,
    BillingUnavailable,
    ItemUnavailable,
    ItemNotOwned,
    DeveloperError,
    FeatureNotSupported,
    NetworkError,
    Error,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::UserCanceled => "USER_CANCELED",
            Self::ItemAlreadyOwned => "ITEM_ALREADY_OWNED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ServiceDisconnected => "SERVICE_DISCONNECTED",
            Self::BillingUnavailable => "BILLING_UNAVAILABLE",
            Self::ItemUnavailable => "ITEM_UNAVAILABLE",
            Self::ItemNotOwned => "ITEM_NOT_OWNED",
            Self::DeveloperError => "DEVELOPER_ERROR",
            Self::FeatureNotSupported => "FEATURE_NOT_SUPPORTED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Error => "ERROR",
        }
    }
}

/// Outcome of a provider call: response code plus the provider's debug text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingResult {
    pub code: ResponseCode,
    pub debug_message: String,
}

impl BillingResult {
    pub fn ok() -> Self {
        Self {
            code: ResponseCode::Ok,
            debug_message: String::new(),
        }
    }

    pub fn new(code: ResponseCode, debug_message: impl Into<String>) -> Self {
        Self {
            code,
            debug_message: debug_message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }

    /// Debug message, falling back to the response code when the provider sent none
    pub fn reason(&self) -> String {
        if self.debug_message.is_empty() {
            self.code.as_str().to_string()
        } else {
            self.debug_message.clone()
        }
    }
}

/// Lifecycle of the provider connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Purchase state as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPurchaseState {
    Pending,
    Purchased,
    Unspecified,
}

/// Reconciliation state tracked per purchase token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Pending,
    Purchased,
    VerificationInFlight,
    Verified,
    VerificationFailed,
    Acknowledged,
    Canceled,
    AlreadyOwned,
}

/// User-visible signals raised by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserMessage {
    SubscriptionActivated,
    VerificationFailed,
    PaymentPending,
    PurchaseCanceled,
    PurchaseError(String),
    AcknowledgeFailed(String),
    BillingNotReady(String),
    ProductNotFound(String),
    CatalogLoadFailed(String),
    ProductDetailsNotLoaded,
}

impl fmt::Display for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubscriptionActivated => write!(f, "Subscription activated"),
            Self::VerificationFailed => write!(f, "Verification failed"),
            Self::PaymentPending => {
                write!(f, "Payment pending. You'll get access after it completes.")
            }
            Self::PurchaseCanceled => write!(f, "Purchase canceled"),
            Self::PurchaseError(msg) => write!(f, "Purchase error: {}", msg),
            Self::AcknowledgeFailed(msg) => write!(f, "Acknowledge failed: {}", msg),
            Self::BillingNotReady(msg) => write!(f, "Billing not ready: {}", msg),
            Self::ProductNotFound(id) => write!(f, "Product not found: {}", id),
            Self::CatalogLoadFailed(msg) => write!(f, "Failed to load product: {}", msg),
            Self::ProductDetailsNotLoaded => write!(f, "Product details not loaded"),
        }
    }
}
