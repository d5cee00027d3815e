use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::common::ResponseCode;

/// Failures raised inside the reconciliation engine.
///
/// None of these cross the bridge: they are converted into user messages or
/// ledger transitions at the component boundary.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Billing connection error: {0}")]
    Connection(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Purchase error ({code:?}): {message}")]
    Purchase { code: ResponseCode, message: String },

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Acknowledgment error: {0}")]
    Acknowledgment(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors reported to hosted content.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bridge unavailable")]
    Unavailable,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            BridgeError::InvalidArgument(ref msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", msg.clone())
            }
            BridgeError::Unavailable => {
                tracing::error!("Bridge call rejected: engine unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "Billing is temporarily unavailable".to_string(),
                )
            }
        };

        let body = json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, BillingError>;
