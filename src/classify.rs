use crate::models::{CostCategory, UsageSample, Workload};
use tracing::warn;

pub const LABEL_SRC_ZONE: &str = "SrcK8S_Zone";
pub const LABEL_DST_ZONE: &str = "DstK8S_Zone";
pub const LABEL_SRC_OWNER_NAME: &str = "SrcK8S_OwnerName";
pub const LABEL_SRC_OWNER_TYPE: &str = "SrcK8S_OwnerType";

/// The workload a billable sample is attributed to, or `None` when the
/// sample does not count toward `category`.
pub fn classify(category: CostCategory, sample: &UsageSample) -> Option<Workload> {
    is_billable(category, sample).then(|| workload_of(sample))
}

/// Streams missing a zone label cannot be judged and are dropped without
/// logging; only a confirmed zone change is billed as cross-zone.
pub fn is_billable(category: CostCategory, sample: &UsageSample) -> bool {
    match category {
        CostCategory::InterZoneIngress | CostCategory::InterZoneEgress => {
            let (Some(src), Some(dst)) = (sample.label(LABEL_SRC_ZONE), sample.label(LABEL_DST_ZONE))
            else {
                return false;
            };
            src != dst
        }
        CostCategory::InternetEgress => true,
    }
}

pub fn workload_of(sample: &UsageSample) -> Workload {
    Workload {
        name: owner_label(sample, LABEL_SRC_OWNER_NAME),
        kind: owner_label(sample, LABEL_SRC_OWNER_TYPE),
    }
}

fn owner_label(sample: &UsageSample, name: &str) -> String {
    match sample.label(name) {
        Some(value) => value.to_string(),
        None => {
            warn!(label = name, "usage sample is missing workload label");
            String::new()
        }
    }
}

/// Bytes carried by the first observation of a stream. Queries are shaped to
/// return one point per step; anything after the first is logged and ignored.
pub fn observed_bytes(sample: &UsageSample) -> Option<i64> {
    let mut values = sample.values.iter();
    let first = values.next()?;
    for extra in values {
        warn!(
            timestamp = %extra.timestamp,
            value = extra.value,
            "metrics query returned data for an additional step when only 1 was expected"
        );
    }
    Some(to_whole_bytes(first.value))
}

/// Sum of every observation of every billable stream, used to total
/// historical usage since the billing period started.
pub fn billable_bytes_total(category: CostCategory, samples: &[UsageSample]) -> i64 {
    samples
        .iter()
        .filter(|s| is_billable(category, s))
        .flat_map(|s| s.values.iter())
        .map(|o| to_whole_bytes(o.value))
        .sum()
}

fn to_whole_bytes(value: f64) -> i64 {
    if value.is_finite() && value > 0.0 {
        value as i64
    } else {
        0
    }
}
