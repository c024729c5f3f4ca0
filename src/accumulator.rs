use crate::models::{BilledLineItem, Workload};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostTotals {
    pub billed_cost_usd: f32,
    pub usage_quantity_gb: f32,
}

/// Running per-(workload, resource) totals for one window.
#[derive(Debug, Default)]
pub struct WorkloadCosts {
    entries: HashMap<(Workload, String), CostTotals>,
}

impl WorkloadCosts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(
        &mut self,
        workload: &Workload,
        resource_name: &str,
        billed_gb: f32,
        billed_cost_usd: f32,
    ) {
        let totals = self
            .entries
            .entry((workload.clone(), resource_name.to_string()))
            .or_default();
        totals.billed_cost_usd += billed_cost_usd;
        totals.usage_quantity_gb += billed_gb;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Flattens into line items. Order is unspecified.
    pub fn into_line_items(self) -> Vec<BilledLineItem> {
        self.entries
            .into_iter()
            .map(|((workload, resource_name), totals)| {
                BilledLineItem::new(
                    workload,
                    &resource_name,
                    totals.billed_cost_usd,
                    totals.usage_quantity_gb,
                )
            })
            .collect()
    }
}

#[cfg(test)]
impl WorkloadCosts {
    fn get(&self, workload: &Workload, resource_name: &str) -> Option<CostTotals> {
        self.entries
            .get(&(workload.clone(), resource_name.to_string()))
            .copied()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(name: &str) -> Workload {
        Workload {
            name: name.into(),
            kind: "Deployment".into(),
        }
    }

    #[test]
    fn repeated_upserts_sum_cost_and_usage() {
        let mut costs = WorkloadCosts::new();
        costs.upsert(&workload("api"), "Ingress Inter Zone", 1.0, 0.0);
        costs.upsert(&workload("api"), "Ingress Inter Zone", 2.0, 0.3);

        assert_eq!(costs.len(), 1);
        let totals = costs
            .get(&workload("api"), "Ingress Inter Zone")
            .expect("entry exists");
        assert_eq!(totals.usage_quantity_gb, 3.0);
        assert!((totals.billed_cost_usd - 0.3).abs() < 1e-6);
    }

    #[test]
    fn new_pairs_create_independent_entries() {
        let mut costs = WorkloadCosts::new();
        costs.upsert(&workload("api"), "Ingress Inter Zone", 1.0, 0.1);
        costs.upsert(&workload("api"), "Egress Inter Zone", 1.0, 0.2);
        costs.upsert(&workload("db"), "Ingress Inter Zone", 1.0, 0.4);
        assert_eq!(costs.len(), 3);

        let mut items = costs.into_line_items();
        items.sort_by(|a, b| a.billed_cost_usd.total_cmp(&b.billed_cost_usd));
        assert_eq!(items[0].resource_name, "Ingress Inter Zone");
        assert_eq!(items[1].resource_name, "Egress Inter Zone");
        assert_eq!(items[2].workload.name, "db");
    }

    #[test]
    fn empty_accumulator_flattens_to_nothing() {
        let costs = WorkloadCosts::new();
        assert!(costs.is_empty());
        assert!(costs.into_line_items().is_empty());
    }
}
