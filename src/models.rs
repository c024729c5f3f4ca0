use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One graduated price range, in binary gigabytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceTier {
    pub begin_gb: f64,
    #[serde(with = "tier_end")]
    pub end_gb: f64,
    pub price_per_unit_usd: f64,
}

impl PriceTier {
    pub fn new(begin_gb: f64, end_gb: f64, price_per_unit_usd: f64) -> Self {
        Self {
            begin_gb,
            end_gb,
            price_per_unit_usd,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_gb == f64::INFINITY
    }
}

/// Unbounded tier ends are written as `"Inf"`, the way provider price lists spell them.
mod tier_end {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            serializer.serialize_str("Inf")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => super::parse_range_bound(&s).map_err(serde::de::Error::custom),
        }
    }
}

pub fn parse_range_bound(raw: &str) -> Result<f64, String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("inf") {
        return Ok(f64::INFINITY);
    }
    trimmed
        .parse::<f64>()
        .map_err(|e| format!("invalid range bound '{raw}': {e}"))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A single metrics stream: its label set and what was observed in the query step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSample {
    pub labels: HashMap<String, String>,
    pub values: Vec<Observation>,
}

impl UsageSample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Workload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Categories that share a tier table and a cumulative baseline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BillingGroup {
    InterZone,
    Internet,
}

impl BillingGroup {
    pub fn as_label(self) -> &'static str {
        match self {
            BillingGroup::InterZone => "inter-zone",
            BillingGroup::Internet => "internet",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "inter-zone" | "interzone" => Some(BillingGroup::InterZone),
            "internet" => Some(BillingGroup::Internet),
            _ => None,
        }
    }

    pub fn categories(self) -> &'static [CostCategory] {
        match self {
            BillingGroup::InterZone => &[CostCategory::InterZoneIngress, CostCategory::InterZoneEgress],
            BillingGroup::Internet => &[CostCategory::InternetEgress],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CostCategory {
    InterZoneIngress,
    InterZoneEgress,
    InternetEgress,
}

impl CostCategory {
    /// Processing order within a window. Ingress runs before egress so egress
    /// sees the baseline ingress left behind.
    pub const ALL: [CostCategory; 3] = [
        CostCategory::InterZoneIngress,
        CostCategory::InterZoneEgress,
        CostCategory::InternetEgress,
    ];

    pub fn resource_name(self) -> &'static str {
        match self {
            CostCategory::InterZoneIngress => "Ingress Inter Zone",
            CostCategory::InterZoneEgress => "Egress Inter Zone",
            CostCategory::InternetEgress => "Internet Egress",
        }
    }

    pub fn group(self) -> BillingGroup {
        match self {
            CostCategory::InterZoneIngress | CostCategory::InterZoneEgress => {
                BillingGroup::InterZone
            }
            CostCategory::InternetEgress => BillingGroup::Internet,
        }
    }
}

/// Cost attributed to one workload for one resource within a window.
///
/// Amounts are single precision to stay comparable with reports produced by
/// earlier versions; treat them as already rounded to currency precision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BilledLineItem {
    pub id: Uuid,
    pub workload: Workload,
    pub resource_name: String,
    pub resource_type: String,
    pub charge_category: String,
    pub description: String,
    pub billed_cost_usd: f32,
    pub usage_quantity_gb: f32,
}

impl BilledLineItem {
    pub fn new(
        workload: Workload,
        resource_name: &str,
        billed_cost_usd: f32,
        usage_quantity_gb: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workload,
            resource_name: resource_name.to_string(),
            resource_type: "Network".into(),
            charge_category: "Usage".into(),
            description: format!("{resource_name} Network Data Transfer"),
            billed_cost_usd,
            usage_quantity_gb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowCosts {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cost_source: String,
    pub currency: String,
    pub costs: Vec<BilledLineItem>,
    pub errors: Vec<String>,
}

impl WindowCosts {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            cost_source: "network".into(),
            currency: "USD".into(),
            costs: vec![],
            errors: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostRequest {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Duration,
    pub region: String,
}
