use serde::Serialize;

/// Body posted to the backend verification endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub product_id: String,
    pub purchase_token: String,
    pub package_name: String,
}

/// Interpreted backend answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub accepted: bool,
    /// Diagnostic detail for logs; never shown to hosted content
    pub message: Option<String>,
}

impl VerificationResult {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: Some(message.into()),
        }
    }
}
