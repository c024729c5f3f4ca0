//! Graduated-tier allocation of new usage on top of what the billing period
//! has already consumed.
//!
//! All comparisons happen in binary gigabytes as `f64`. Amounts billed at a
//! tier are converted back to whole bytes before they are added to the
//! baseline, so repeated calls never accumulate fractional-byte drift.

use crate::error::CostError;
use crate::models::PriceTier;
use crate::pricing::validate_tiers;
use crate::units::{bytes_to_gb, gb_to_bytes};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TierCharge {
    pub tier_index: usize,
    pub billed_gb: f32,
    pub billed_cost_usd: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Allocation {
    pub charges: Vec<TierCharge>,
    pub updated_baseline: i64,
}

/// Bills `pending_bytes` across `tiers`, starting where `baseline_bytes` left
/// off.
///
/// Tiers already exhausted by the baseline are skipped without a charge.
/// `tiers` must be sorted, contiguous and end in an unbounded tier, otherwise
/// [`CostError::MalformedTierTable`] is returned.
pub fn allocate(
    baseline_bytes: i64,
    pending_bytes: i64,
    tiers: &[PriceTier],
) -> Result<Allocation, CostError> {
    validate_tiers(tiers)?;

    let mut baseline = baseline_bytes;
    let mut pending = pending_bytes;
    let mut cumulative_gb = bytes_to_gb(baseline);
    let mut charges = Vec::new();

    for (tier_index, tier) in tiers.iter().enumerate() {
        if pending <= 0 {
            break;
        }
        if cumulative_gb >= tier.end_gb {
            continue;
        }

        let capacity_gb = tier.end_gb - cumulative_gb;
        let billed_gb = bytes_to_gb(pending).min(capacity_gb);

        charges.push(TierCharge {
            tier_index,
            billed_gb: billed_gb as f32,
            billed_cost_usd: (billed_gb * tier.price_per_unit_usd) as f32,
        });

        let billed_bytes = gb_to_bytes(billed_gb);
        baseline += billed_bytes;
        cumulative_gb = bytes_to_gb(baseline);
        pending -= billed_bytes;
    }

    Ok(Allocation {
        charges,
        updated_baseline: baseline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: i64 = 1 << 30;

    fn two_tiers() -> Vec<PriceTier> {
        vec![
            PriceTier::new(0.0, 1.0, 0.0),
            PriceTier::new(1.0, f64::INFINITY, 0.15),
        ]
    }

    fn three_tiers() -> Vec<PriceTier> {
        vec![
            PriceTier::new(0.0, 1.0, 0.0),
            PriceTier::new(1.0, 10240.0, 0.15),
            PriceTier::new(10240.0, f64::INFINITY, 0.09),
        ]
    }

    fn billed_bytes(allocation: &Allocation) -> i64 {
        allocation
            .charges
            .iter()
            .map(|c| gb_to_bytes(c.billed_gb as f64))
            .sum()
    }

    #[test]
    fn crossing_free_tier_splits_the_charge() {
        let allocation = allocate(0, 2 * GIB, &two_tiers()).expect("allocate");
        assert_eq!(allocation.charges.len(), 2);

        let free = allocation.charges[0];
        assert_eq!((free.tier_index, free.billed_gb), (0, 1.0));
        assert_eq!(free.billed_cost_usd, 0.0);

        let paid = allocation.charges[1];
        assert_eq!((paid.tier_index, paid.billed_gb), (1, 1.0));
        assert!((paid.billed_cost_usd - 0.15).abs() < 1e-6);

        assert_eq!(allocation.updated_baseline, 2 * GIB);
    }

    #[test]
    fn position_follows_whole_bytes_billed() {
        // The first tier is narrower than one byte: it is charged but moves
        // neither the baseline nor the pending amount.
        let tiers = vec![
            PriceTier::new(0.0, 1e-10, 0.0),
            PriceTier::new(1e-10, f64::INFINITY, 0.15),
        ];
        let allocation = allocate(0, GIB, &tiers).expect("allocate");
        assert_eq!(allocation.charges.len(), 2);

        let terminal = allocation.charges[1];
        assert_eq!(terminal.tier_index, 1);
        assert_eq!(terminal.billed_gb, 1.0);
        assert_eq!(allocation.updated_baseline, GIB);
    }

    #[test]
    fn baseline_past_finite_tiers_bills_only_terminal_tier() {
        let allocation = allocate(10240 * GIB, 500 * GIB, &three_tiers()).expect("allocate");
        assert_eq!(allocation.charges.len(), 1);
        let charge = allocation.charges[0];
        assert_eq!(charge.tier_index, 2);
        assert_eq!(charge.billed_gb, 500.0);
        assert!((charge.billed_cost_usd - 45.0).abs() < 1e-4);
        assert_eq!(allocation.updated_baseline, 10740 * GIB);
    }

    #[test]
    fn zero_pending_leaves_baseline_untouched() {
        let allocation = allocate(42, 0, &three_tiers()).expect("allocate");
        assert!(allocation.charges.is_empty());
        assert_eq!(allocation.updated_baseline, 42);
    }

    #[test]
    fn baseline_inside_a_tier_uses_its_remaining_capacity() {
        // Half a GiB already billed; the free tier only has half a GiB left.
        let allocation = allocate(GIB / 2, GIB, &two_tiers()).expect("allocate");
        assert_eq!(allocation.charges.len(), 2);
        assert_eq!(allocation.charges[0].billed_gb, 0.5);
        assert_eq!(allocation.charges[1].billed_gb, 0.5);
        assert!((allocation.charges[1].billed_cost_usd - 0.075).abs() < 1e-6);
    }

    #[test]
    fn conservation_holds_across_tier_tables() {
        let tables = [two_tiers(), three_tiers(), vec![PriceTier::new(0.0, f64::INFINITY, 0.02)]];
        let baselines = [0_i64, 1, GIB - 1, GIB, 3 * GIB + 17, 10240 * GIB - 5, 20000 * GIB];
        let pendings = [0_i64, 1, 999, GIB, GIB + 1, 7 * GIB + 123_456, 12000 * GIB];

        for tiers in &tables {
            for &baseline in &baselines {
                for &pending in &pendings {
                    let allocation = allocate(baseline, pending, tiers).expect("allocate");
                    assert!(allocation.charges.len() <= tiers.len());
                    assert!(
                        (allocation.updated_baseline - (baseline + pending)).abs() <= 1,
                        "baseline {baseline} + pending {pending} became {}",
                        allocation.updated_baseline
                    );
                    if pending == 0 {
                        assert!(allocation.charges.is_empty());
                    }
                    // billed_gb is f32; allow its representation error on top of
                    // the byte rounding.
                    let drift = (billed_bytes(&allocation) - pending).abs() as f64;
                    assert!(drift <= 1.0 + pending as f64 * 1e-6);
                }
            }
        }
    }

    #[test]
    fn successive_calls_carry_the_baseline_forward() {
        let tiers = two_tiers();
        let first = allocate(0, GIB / 2, &tiers).expect("first");
        assert_eq!(first.charges.len(), 1);
        assert_eq!(first.charges[0].billed_cost_usd, 0.0);

        let second = allocate(first.updated_baseline, GIB, &tiers).expect("second");
        assert_eq!(second.charges.len(), 2);
        assert_eq!(second.charges[0].billed_gb, 0.5);
        assert_eq!(second.charges[1].tier_index, 1);
        assert_eq!(second.updated_baseline, GIB + GIB / 2);
    }

    #[test]
    fn malformed_tables_are_rejected() {
        assert!(matches!(
            allocate(0, GIB, &[]),
            Err(CostError::MalformedTierTable(_))
        ));
        let bounded = vec![PriceTier::new(0.0, 1.0, 0.0)];
        assert!(matches!(
            allocate(0, GIB, &bounded),
            Err(CostError::MalformedTierTable(_))
        ));
        let unsorted = vec![
            PriceTier::new(1.0, f64::INFINITY, 0.15),
            PriceTier::new(0.0, 1.0, 0.0),
        ];
        assert!(matches!(
            allocate(0, GIB, &unsorted),
            Err(CostError::MalformedTierTable(_))
        ));
    }
}
