use crate::error::AppError;
use crate::models::{BillingGroup, PriceTier};
use crate::pricing::{resolve_override, tiers_from_dimensions, PriceDimension};
use crate::providers::{CostProvider, ProviderContext};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

const DEFAULT_PRICING_URL: &str = "https://pricing.us-east-1.amazonaws.com";
const DEFAULT_SERVICE_CODE: &str = "AWSDataTransfer";

#[derive(Default)]
pub struct AwsProvider {
    ctx: Option<ProviderContext>,
    /// Parsed offer files by URL. One regional file prices every group.
    offers: Mutex<HashMap<String, Arc<OfferFile>>>,
}

#[derive(Debug, Deserialize)]
struct OfferFile {
    #[serde(default)]
    products: BTreeMap<String, Product>,
    #[serde(default)]
    terms: OfferTerms,
}

#[derive(Debug, Deserialize)]
struct Product {
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct OfferTerms {
    #[serde(rename = "OnDemand", default)]
    on_demand: HashMap<String, BTreeMap<String, OnDemandTerm>>,
}

#[derive(Debug, Deserialize)]
struct OnDemandTerm {
    #[serde(rename = "priceDimensions", default)]
    price_dimensions: BTreeMap<String, PriceDimension>,
}

impl AwsProvider {
    /// Usage-type prefix AWS uses for a region's line items.
    fn region_prefix(region: &str) -> &'static str {
        match region {
            "us-east-1" => "",
            "us-west-1" => "USW1-",
            "us-west-2" => "USW2-",
            "us-gov-west-1" => "UGW1-",
            "sa-east-1" => "SAE1-",
            "eu-west-1" => "EU-",
            "eu-central-1" => "EUC1-",
            "ap-northeast-1" => "APN1-",
            "ap-northeast-2" => "APN2-",
            "ap-southeast-1" => "APS1-",
            "ap-southeast-2" => "APS2-",
            _ => "",
        }
    }

    pub fn usage_type(group: BillingGroup, region: &str) -> String {
        let suffix = match group {
            BillingGroup::InterZone => "DataTransfer-Regional-Bytes",
            BillingGroup::Internet => "DataTransfer-Out-Bytes",
        };
        format!("{}{suffix}", Self::region_prefix(region))
    }

    fn offer_url(ctx: &ProviderContext, region: &str) -> String {
        let base = ctx
            .settings
            .pricing_url
            .as_deref()
            .unwrap_or(DEFAULT_PRICING_URL)
            .trim_end_matches('/');
        let service = ctx
            .settings
            .service_code
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_CODE);
        format!("{base}/offers/v1.0/aws/{service}/current/{region}/index.json")
    }

    async fn offer(&self, ctx: &ProviderContext, region: &str) -> Result<Arc<OfferFile>, AppError> {
        let url = Self::offer_url(ctx, region);
        let cached = self
            .offers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&url)
            .cloned();
        if let Some(offer) = cached {
            return Ok(offer);
        }

        debug!(%url, "fetching aws price list");
        let offer: Arc<OfferFile> = Arc::new(
            ctx.client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?,
        );
        self.offers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, offer.clone());
        Ok(offer)
    }

    fn tiers_for_usage_type(offer: &OfferFile, usage_type: &str) -> Result<Vec<PriceTier>, AppError> {
        let mut matching = offer.products.iter().filter(|(_, product)| {
            product.attributes.get("usagetype").map(String::as_str) == Some(usage_type)
        });

        let Some((sku, _)) = matching.next() else {
            return Ok(vec![]);
        };
        for (extra, _) in matching {
            warn!(sku = %extra, usage_type, "additional product matched usage type; skipping");
        }

        let Some(terms) = offer.terms.on_demand.get(sku) else {
            return Ok(vec![]);
        };

        let mut terms = terms.iter();
        let Some((_, term)) = terms.next() else {
            return Ok(vec![]);
        };
        for (code, _) in terms {
            warn!(term = %code, usage_type, "unexpected pricing term found; skipping");
        }

        let dimensions: Vec<PriceDimension> = term.price_dimensions.values().cloned().collect();
        tiers_from_dimensions(&dimensions).map_err(AppError::Pricing)
    }
}

#[async_trait]
impl CostProvider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn init(&mut self, ctx: ProviderContext) -> Result<(), AppError> {
        if let Some(raw) = ctx.settings.pricing_url.as_deref() {
            url::Url::parse(raw)?;
        }
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn price_tiers(
        &self,
        group: BillingGroup,
        region: &str,
    ) -> Result<Vec<PriceTier>, AppError> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| AppError::Config("aws provider used before init".into()))?;

        if let Some(tiers) = resolve_override(self.name(), group, &ctx.overrides) {
            debug!(group = group.as_label(), "using configured tier override");
            return Ok(tiers);
        }

        let usage_type = Self::usage_type(group, region);
        let offer = self.offer(ctx, region).await?;
        debug!(%usage_type, "resolving aws price tiers");
        Self::tiers_for_usage_type(&offer, &usage_type)
    }
}
