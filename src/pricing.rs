use crate::config::TierOverride;
use crate::error::CostError;
use crate::models::{parse_range_bound, BillingGroup, PriceTier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const RANGE_TOLERANCE_GB: f64 = 1e-9;

/// Checks that a table is non-empty, sorted, contiguous and ends in exactly
/// one unbounded tier.
pub fn validate_tiers(tiers: &[PriceTier]) -> Result<(), CostError> {
    let malformed = |msg: String| Err(CostError::MalformedTierTable(msg));

    let Some(last) = tiers.last() else {
        return malformed("tier table is empty".into());
    };

    for (i, tier) in tiers.iter().enumerate() {
        if !tier.begin_gb.is_finite() || tier.begin_gb < 0.0 {
            return malformed(format!("tier {i} has invalid begin {}", tier.begin_gb));
        }
        if !tier.price_per_unit_usd.is_finite() || tier.price_per_unit_usd < 0.0 {
            return malformed(format!(
                "tier {i} has invalid price {}",
                tier.price_per_unit_usd
            ));
        }
        if tier.end_gb.is_nan() || tier.end_gb <= tier.begin_gb {
            return malformed(format!(
                "tier {i} ends at {} which is not after its begin {}",
                tier.end_gb, tier.begin_gb
            ));
        }
    }

    for (i, pair) in tiers.windows(2).enumerate() {
        let (current, next) = (&pair[0], &pair[1]);
        if current.is_unbounded() {
            return malformed(format!("tier {i} is unbounded but is not the last tier"));
        }
        if (next.begin_gb - current.end_gb).abs() > RANGE_TOLERANCE_GB {
            return malformed(format!(
                "tier {} begins at {} but tier {i} ends at {}",
                i + 1,
                next.begin_gb,
                current.end_gb
            ));
        }
    }

    if !last.is_unbounded() {
        return malformed(format!(
            "last tier ends at {} instead of being unbounded",
            last.end_gb
        ));
    }

    Ok(())
}

/// Tiers configured for `(provider, group)`, if any.
pub fn resolve_override(
    provider: &str,
    group: BillingGroup,
    overrides: &[TierOverride],
) -> Option<Vec<PriceTier>> {
    overrides
        .iter()
        .find(|ov| ov.provider.eq_ignore_ascii_case(provider) && ov.group == group)
        .map(|ov| ov.tiers.clone())
}

/// One graduated range as published in a provider price list. Bounds and
/// prices are decimal strings; an open end is spelled `"Inf"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceDimension {
    #[serde(rename = "beginRange")]
    pub begin_range: String,
    #[serde(rename = "endRange")]
    pub end_range: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "pricePerUnit")]
    pub price_per_unit: HashMap<String, String>,
}

/// Converts price-list dimensions into a tier table sorted by begin range.
pub fn tiers_from_dimensions(dimensions: &[PriceDimension]) -> Result<Vec<PriceTier>, String> {
    let mut tiers = dimensions
        .iter()
        .map(|dim| {
            let price = dim
                .price_per_unit
                .get("USD")
                .ok_or_else(|| format!("price dimension '{}' has no USD price", dim.description))?;
            Ok(PriceTier {
                begin_gb: parse_range_bound(&dim.begin_range)?,
                end_gb: parse_range_bound(&dim.end_range)?,
                price_per_unit_usd: price
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| format!("invalid price per unit '{price}': {e}"))?,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    tiers.sort_by(|a, b| a.begin_gb.total_cmp(&b.begin_gb));
    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimension(begin: &str, end: &str, usd: &str) -> PriceDimension {
        PriceDimension {
            begin_range: begin.into(),
            end_range: end.into(),
            unit: "GB".into(),
            description: format!("{begin}-{end}"),
            price_per_unit: HashMap::from([("USD".to_string(), usd.to_string())]),
        }
    }

    #[test]
    fn valid_table_passes() {
        let tiers = vec![
            PriceTier::new(0.0, 1.0, 0.0),
            PriceTier::new(1.0, 10240.0, 0.15),
            PriceTier::new(10240.0, f64::INFINITY, 0.09),
        ];
        assert!(validate_tiers(&tiers).is_ok());
    }

    #[test]
    fn single_unbounded_tier_is_valid() {
        assert!(validate_tiers(&[PriceTier::new(0.0, f64::INFINITY, 0.01)]).is_ok());
    }

    #[test]
    fn gaps_overlaps_and_early_infinity_are_rejected() {
        let gap = vec![
            PriceTier::new(0.0, 1.0, 0.0),
            PriceTier::new(2.0, f64::INFINITY, 0.1),
        ];
        let overlap = vec![
            PriceTier::new(0.0, 2.0, 0.0),
            PriceTier::new(1.0, f64::INFINITY, 0.1),
        ];
        let early_infinity = vec![
            PriceTier::new(0.0, f64::INFINITY, 0.0),
            PriceTier::new(1.0, f64::INFINITY, 0.1),
        ];
        for table in [gap, overlap, early_infinity] {
            let err = validate_tiers(&table).expect_err("table should be rejected");
            assert!(matches!(err, CostError::MalformedTierTable(_)));
        }
    }

    #[test]
    fn empty_and_bounded_tables_are_rejected() {
        let err = validate_tiers(&[]).expect_err("empty");
        assert!(err.to_string().contains("empty"));
        let err = validate_tiers(&[PriceTier::new(0.0, 5.0, 0.1)]).expect_err("bounded");
        assert!(err.to_string().contains("unbounded"));
    }

    #[test]
    fn negative_price_is_rejected() {
        assert!(validate_tiers(&[PriceTier::new(0.0, f64::INFINITY, -0.1)]).is_err());
    }

    #[test]
    fn dimensions_are_parsed_and_sorted() {
        let dims = vec![
            dimension("10240", "Inf", "0.09"),
            dimension("0", "1", "0.0000000000"),
            dimension("1", "10240", "0.15"),
        ];
        let tiers = tiers_from_dimensions(&dims).expect("parse dimensions");
        assert_eq!(
            tiers,
            vec![
                PriceTier::new(0.0, 1.0, 0.0),
                PriceTier::new(1.0, 10240.0, 0.15),
                PriceTier::new(10240.0, f64::INFINITY, 0.09),
            ]
        );
        assert!(validate_tiers(&tiers).is_ok());
    }

    #[test]
    fn dimension_without_usd_price_fails() {
        let mut dim = dimension("0", "Inf", "0.01");
        dim.price_per_unit.clear();
        let err = tiers_from_dimensions(&[dim]).expect_err("missing usd");
        assert!(err.contains("no USD price"));
    }

    #[test]
    fn overrides_match_provider_and_group() {
        let overrides = vec![TierOverride {
            provider: "aws".into(),
            group: BillingGroup::Internet,
            tiers: vec![PriceTier::new(0.0, f64::INFINITY, 0.09)],
        }];
        assert!(resolve_override("AWS", BillingGroup::Internet, &overrides).is_some());
        assert!(resolve_override("aws", BillingGroup::InterZone, &overrides).is_none());
        assert!(resolve_override("gcp", BillingGroup::Internet, &overrides).is_none());
    }
}
