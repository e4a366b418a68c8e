//! Payload types for the portal's internal usage endpoint.
//!
//! The extraction core treats the captured document as opaque: the portal
//! owns the schema and changes it freely. [`UsagePayload`] is the opaque
//! success value; the typed views below exist for callers (the CLI) that
//! want the currently-known shape, with every field optional.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Opaque usage document captured from the portal's internal API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsagePayload(JsonValue);

impl UsagePayload {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }
}

impl From<JsonValue> for UsagePayload {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

/// Typed view of the usage document.
///
/// The portal also uses this envelope to report logical errors, so a
/// response can carry `error` instead of (or alongside) usage months.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageReport {
    pub error: Option<String>,
    pub account_number: Option<String>,
    pub courtesy_used: Option<f64>,
    pub courtesy_remaining: Option<f64>,
    pub courtesy_allowed: Option<f64>,
    pub in_paid_overage: Option<bool>,
    pub display_usage: Option<bool>,
    pub usage_months: Vec<UsageMonth>,
}

impl UsageReport {
    pub fn from_payload(payload: &UsagePayload) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.as_value().clone())
    }

    /// The current billing month; the portal appends months in order.
    pub fn latest_month(&self) -> Option<&UsageMonth> {
        self.usage_months.last()
    }
}

/// One billing month of the usage document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageMonth {
    pub policy_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub home_usage: Option<f64>,
    pub wifi_usage: Option<f64>,
    pub total_usage: Option<f64>,
    pub allowable_usage: Option<f64>,
    pub unit_of_measure: Option<String>,
    pub display_usage: Option<bool>,
    pub devices: Vec<DeviceUsage>,
    pub additional_blocks_used: Option<f64>,
    pub additional_cost_per_block: Option<f64>,
    pub additional_units_per_block: Option<f64>,
    pub additional_included: Option<f64>,
    pub additional_used: Option<f64>,
    pub additional_percent_used: Option<f64>,
    pub additional_remaining: Option<f64>,
    pub billable_overage: Option<f64>,
    pub overage_charges: Option<f64>,
    pub overage_used: Option<f64>,
    pub current_credit_amount: Option<f64>,
    pub max_credit_amount: Option<f64>,
    pub policy: Option<String>,
}

impl UsageMonth {
    /// Gigabytes left in the month's allowance, when both sides are known.
    pub fn remaining(&self) -> Option<f64> {
        match (self.allowable_usage, self.total_usage) {
            (Some(allowed), Some(used)) => Some(allowed - used),
            _ => None,
        }
    }
}

/// Per-device usage attribution within a month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceUsage {
    pub id: Option<String>,
    pub usage: Option<f64>,
    pub policy_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_view_parses_usage_months() {
        let payload = UsagePayload::new(json!({
            "usageMonths": [
                { "totalUsage": 90, "allowableUsage": 1024 },
                { "totalUsage": 120, "allowableUsage": 1024, "unitOfMeasure": "GB" }
            ]
        }));

        let report = UsageReport::from_payload(&payload).expect("report parses");
        assert_eq!(report.usage_months.len(), 2);

        let latest = report.latest_month().expect("latest month");
        assert_eq!(latest.total_usage, Some(120.0));
        assert_eq!(latest.allowable_usage, Some(1024.0));
        assert_eq!(latest.unit_of_measure.as_deref(), Some("GB"));
        assert_eq!(latest.remaining(), Some(904.0));
    }

    #[test]
    fn unknown_fields_are_ignored_and_known_fields_optional() {
        let payload = UsagePayload::new(json!({
            "accountNumber": "0123456789",
            "somethingNewFromThePortal": { "nested": true },
            "usageMonths": []
        }));

        let report = UsageReport::from_payload(&payload).expect("report parses");
        assert_eq!(report.account_number.as_deref(), Some("0123456789"));
        assert!(report.latest_month().is_none());
    }

    #[test]
    fn error_envelope_is_exposed() {
        let payload = UsagePayload::new(json!({ "error": "account not eligible" }));
        let report = UsageReport::from_payload(&payload).expect("report parses");
        assert_eq!(report.error.as_deref(), Some("account not eligible"));
        assert!(report.usage_months.is_empty());
    }

    #[test]
    fn payload_round_trips_arbitrary_documents() {
        let value = json!({ "deep": { "nested": [1, "two", false] } });
        let payload = UsagePayload::from(value.clone());
        assert_eq!(payload.as_value(), &value);
        assert_eq!(payload.into_value(), value);
    }
}
