use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Separator used by the opaque plan id handed to hosted content
pub const PLAN_ID_SEPARATOR: char = '|';

/// Upper bound on savings advertised for any plan
pub const MAX_SAVINGS_PERCENT: u8 = 90;

/// Product details as returned by the provider catalog query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    pub product_id: String,
    pub title: String,
    pub subscription_offers: Vec<SubscriptionOfferDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOfferDetails {
    pub base_plan_id: String,
    pub offer_token: String,
    /// ISO-8601 duration of one renewal period
    pub billing_period: String,
    pub price_amount_micros: i64,
    pub formatted_price: String,
}

/// A purchasable subscription offer, immutable once fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub product_id: String,
    pub offer_token: String,
    pub base_plan_tag: String,
    pub billing_period_months: u32,
    pub price_micros: i64,
    pub formatted_price: String,
}

impl Offer {
    /// Build an offer from provider details.
    ///
    /// Returns `None` for offers that cannot be priced per month (week or day
    /// periods), carry a negative price, or whose identifiers would not
    /// survive the plan id encoding.
    pub fn from_details(product_id: &str, details: &SubscriptionOfferDetails) -> Option<Self> {
        let months = parse_billing_period_months(&details.billing_period)?;
        if details.price_amount_micros < 0 {
            return None;
        }
        let plan_id = PlanId::new(product_id, &details.offer_token, &details.base_plan_id).ok()?;

        Some(Self {
            product_id: plan_id.product_id,
            offer_token: plan_id.offer_token,
            base_plan_tag: plan_id.base_plan_tag,
            billing_period_months: months,
            price_micros: details.price_amount_micros,
            formatted_price: details.formatted_price.clone(),
        })
    }

    pub fn plan_id(&self) -> PlanId {
        PlanId {
            product_id: self.product_id.clone(),
            offer_token: self.offer_token.clone(),
            base_plan_tag: self.base_plan_tag.clone(),
        }
    }

    pub fn matches(&self, plan_id: &PlanId) -> bool {
        self.product_id == plan_id.product_id
            && self.offer_token == plan_id.offer_token
            && self.base_plan_tag == plan_id.base_plan_tag
    }

    /// Effective price per month, rounded half-up to a whole micro-unit
    pub fn per_month_micros(&self) -> i64 {
        let months = i128::from(self.billing_period_months.max(1));
        let rounded = (i128::from(self.price_micros) + months / 2) / months;
        i64::try_from(rounded).unwrap_or(i64::MAX)
    }
}

/// Parse an ISO-8601 period such as `P1M`, `P1Y` or `P1Y6M` into months.
///
/// Periods with a week or day component are not month-denominated and yield `None`.
pub fn parse_billing_period_months(period: &str) -> Option<u32> {
    let rest = period.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let mut months: u32 = 0;
    let mut digits = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: u32 = digits.parse().ok()?;
        digits.clear();
        match ch {
            'Y' => months = months.checked_add(value.checked_mul(12)?)?,
            'M' => months = months.checked_add(value)?,
            'W' | 'D' if value == 0 => {}
            _ => return None,
        }
    }

    if !digits.is_empty() || months == 0 {
        return None;
    }
    Some(months)
}

/// Malformed plan identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed plan id: {0}")]
pub struct PlanIdError(pub &'static str);

/// Identifies one offer: product, offer token and base plan.
///
/// Serialized as `productId|offerToken|basePlanTag` only when crossing the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanId {
    pub product_id: String,
    pub offer_token: String,
    pub base_plan_tag: String,
}

impl PlanId {
    pub fn new(
        product_id: &str,
        offer_token: &str,
        base_plan_tag: &str,
    ) -> Result<Self, PlanIdError> {
        for segment in [product_id, offer_token, base_plan_tag] {
            validate_segment(segment)?;
        }
        Ok(Self {
            product_id: product_id.to_string(),
            offer_token: offer_token.to_string(),
            base_plan_tag: base_plan_tag.to_string(),
        })
    }
}

fn validate_segment(segment: &str) -> Result<(), PlanIdError> {
    if segment.is_empty() {
        return Err(PlanIdError("empty segment"));
    }
    if segment.contains(PLAN_ID_SEPARATOR) {
        return Err(PlanIdError("separator inside segment"));
    }
    if segment.chars().any(char::is_control) {
        return Err(PlanIdError("control character"));
    }
    Ok(())
}

impl FromStr for PlanId {
    type Err = PlanIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PlanIdError("empty"));
        }
        let mut parts = s.split(PLAN_ID_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(product), Some(token), Some(base_plan), None) => {
                PlanId::new(product, token, base_plan)
            }
            _ => Err(PlanIdError("expected three segments")),
        }
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.product_id,
            self.offer_token,
            self.base_plan_tag,
            sep = PLAN_ID_SEPARATOR
        )
    }
}

/// Display-facing plan derived from the offer set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub plan_id: PlanId,
    pub title: String,
    pub formatted_price: String,
    pub billing_period_months: u32,
    pub per_month_micros: i64,
    pub is_best_value: bool,
    pub savings_percent: Option<u8>,
}

/// Derive the ranked plan list from a set of offers.
///
/// Pure: the same offers always produce the same plans.
pub fn derive_plans(offers: &[Offer]) -> Vec<Plan> {
    let Some(baseline_months) = offers.iter().map(|o| o.billing_period_months).min() else {
        return Vec::new();
    };

    let per_month: Vec<i64> = offers.iter().map(Offer::per_month_micros).collect();

    let baseline_per_month = offers
        .iter()
        .zip(&per_month)
        .filter(|(offer, _)| offer.billing_period_months == baseline_months)
        .map(|(_, price)| *price)
        .min();

    // Ties go to the first offer in fetch order
    let best_index = per_month
        .iter()
        .enumerate()
        .min_by_key(|(index, price)| (**price, *index))
        .map(|(index, _)| index);

    let mut plans: Vec<Plan> = offers
        .iter()
        .enumerate()
        .map(|(index, offer)| {
            let savings_percent = if offer.billing_period_months > baseline_months {
                baseline_per_month.and_then(|baseline| savings_percent(per_month[index], baseline))
            } else {
                None
            };

            Plan {
                plan_id: offer.plan_id(),
                title: period_title(offer.billing_period_months),
                formatted_price: offer.formatted_price.clone(),
                billing_period_months: offer.billing_period_months,
                per_month_micros: per_month[index],
                is_best_value: Some(index) == best_index,
                savings_percent,
            }
        })
        .collect();

    plans.sort_by_key(|plan| plan.billing_period_months);
    plans
}

/// Savings relative to the baseline monthly price, clamped to `[0, 90]`.
///
/// `None` when there is no usable baseline or nothing is saved.
pub fn savings_percent(per_month_micros: i64, baseline_per_month_micros: i64) -> Option<u8> {
    if baseline_per_month_micros <= 0 {
        return None;
    }
    let ratio = per_month_micros as f64 / baseline_per_month_micros as f64;
    let percent = (100.0 * (1.0 - ratio)).round();
    if percent <= 0.0 {
        return None;
    }
    Some(percent.min(f64::from(MAX_SAVINGS_PERCENT)) as u8)
}

fn period_title(months: u32) -> String {
    match months {
        1 => "Monthly".to_string(),
        3 => "Quarterly".to_string(),
        6 => "Semi-annual".to_string(),
        12 => "Yearly".to_string(),
        n => format!("{} months", n),
    }
}
