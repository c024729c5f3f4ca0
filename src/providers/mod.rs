use crate::accumulator::WorkloadCosts;
use crate::allocator::allocate;
use crate::classify::{classify, observed_bytes};
use crate::config::{normalize_provider_name, AppConfig, ProviderSettings, TierOverride};
use crate::error::{AppError, CostError};
use crate::models::{BilledLineItem, BillingGroup, CostCategory, PriceTier, UsageSample};
use crate::pricing::validate_tiers;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use tracing::debug;

pub mod aws;

#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub client: Client,
    pub settings: ProviderSettings,
    pub overrides: Vec<TierOverride>,
}

/// A cloud vendor whose graduated transfer pricing we can bill against.
#[async_trait]
pub trait CostProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn init(&mut self, ctx: ProviderContext) -> Result<(), AppError>;

    /// Tier table shared by every category in `group`, sorted by begin range.
    /// An empty table means the vendor has no price for this region.
    async fn price_tiers(
        &self,
        group: BillingGroup,
        region: &str,
    ) -> Result<Vec<PriceTier>, AppError>;

    /// Bills one category's samples against `tiers`, advancing `baseline`
    /// sample by sample.
    fn compute_costs(
        &self,
        category: CostCategory,
        samples: &[UsageSample],
        tiers: &[PriceTier],
        baseline: &mut i64,
    ) -> Result<Vec<BilledLineItem>, CostError> {
        validate_tiers(tiers)?;

        let resource_name = category.resource_name();
        let mut costs = WorkloadCosts::new();

        for sample in samples {
            let Some(workload) = classify(category, sample) else {
                continue;
            };
            let Some(pending) = observed_bytes(sample) else {
                continue;
            };

            let allocation = allocate(*baseline, pending, tiers)?;
            *baseline = allocation.updated_baseline;

            for charge in &allocation.charges {
                costs.upsert(
                    &workload,
                    resource_name,
                    charge.billed_gb,
                    charge.billed_cost_usd,
                );
            }
        }

        debug!(
            category = resource_name,
            samples = samples.len(),
            entries = costs.len(),
            baseline = *baseline,
            "allocated category usage"
        );
        Ok(costs.into_line_items())
    }
}

type ProviderFactory = fn() -> Box<dyn CostProvider>;

/// Provider constructors keyed by identifier.
pub struct ProviderRegistry {
    factories: BTreeMap<&'static str, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("aws", || Box::new(aws::AwsProvider::default()));
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: ProviderFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn CostProvider>, AppError> {
        let normalized = normalize_provider_name(name);
        self.factories
            .get(normalized.as_str())
            .map(|factory| factory())
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Unsupported provider '{normalized}'. Known providers: {}",
                    self.names().join(", ")
                ))
            })
    }

    /// Creates the configured provider and hands it its settings and overrides.
    pub async fn create_from_config(
        &self,
        cfg: &AppConfig,
        client: Client,
    ) -> Result<Box<dyn CostProvider>, AppError> {
        let mut provider = self.create(&cfg.provider)?;
        let settings = cfg
            .provider_settings
            .get(provider.name())
            .cloned()
            .unwrap_or_default();
        provider
            .init(ProviderContext {
                client,
                settings,
                overrides: cfg.tier_overrides.clone(),
            })
            .await?;
        Ok(provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
