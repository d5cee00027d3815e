use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::catalog::{Plan, PlanId};

pub const MAX_PLAN_ID_LEN: u64 = 512;
pub const MAX_AUTH_TOKEN_LEN: u64 = 8192;

/// Plan as exposed to hosted content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub id: String,
    pub title: String,
    pub price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings_text: Option<String>,
}

impl From<&Plan> for PlanView {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.plan_id.to_string(),
            title: plan.title.clone(),
            price: plan.formatted_price.clone(),
            badge: plan.is_best_value.then(|| "Best value".to_string()),
            savings_text: plan.savings_percent.map(|p| format!("Save {}%", p)),
        }
    }
}

/// `buy` argument
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    #[validate(
        length(min = 1, max = MAX_PLAN_ID_LEN),
        custom(function = "validate_plan_id")
    )]
    pub plan_id: String,
}

/// `setAuth` argument
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[validate(
        length(min = 1, max = MAX_AUTH_TOKEN_LEN),
        custom(function = "validate_auth_token")
    )]
    pub token: String,
}

fn validate_plan_id(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<PlanId>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("plan_id_format"))
}

/// Must be usable verbatim as an HTTP header value
fn validate_auth_token(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("auth_token_blank"));
    }
    if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(ValidationError::new("auth_token_charset"));
    }
    Ok(())
}
