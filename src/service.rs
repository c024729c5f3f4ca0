use crate::config::AppConfig;
use crate::error::{AppError, CostError};
use crate::metrics::{MetricsSource, PrometheusSource};
use crate::models::{
    BilledLineItem, BillingGroup, CostCategory, CostRequest, PriceTier, Window, WindowCosts,
};
use crate::pricing::validate_tiers;
use crate::providers::{CostProvider, ProviderRegistry};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, error, info};

/// Receives each finished window.
pub trait LineItemSink {
    fn emit(&mut self, window: WindowCosts);
}

impl LineItemSink for Vec<WindowCosts> {
    fn emit(&mut self, window: WindowCosts) {
        self.push(window);
    }
}

/// Tier tables fetched so far in one request. Failures are kept too, so a
/// broken price list is reported per category without being refetched.
type TierCache = HashMap<BillingGroup, Result<Vec<PriceTier>, String>>;

pub struct CostService {
    provider: Box<dyn CostProvider>,
    metrics: Box<dyn MetricsSource>,
    billing_period_start_day: u32,
    fetch_timeout: std::time::Duration,
}

impl CostService {
    pub fn new(
        provider: Box<dyn CostProvider>,
        metrics: Box<dyn MetricsSource>,
        billing_period_start_day: u32,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        Self {
            provider,
            metrics,
            billing_period_start_day,
            fetch_timeout,
        }
    }

    pub async fn from_config(
        cfg: &AppConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, AppError> {
        let fetch_timeout = std::time::Duration::from_secs(cfg.prometheus.timeout_seconds);
        let client = http_client(fetch_timeout)?;
        let provider = registry.create_from_config(cfg, client.clone()).await?;

        let metrics = PrometheusSource::new(
            client,
            &cfg.prometheus.url,
            cfg.prometheus.queries.clone(),
        )?;

        Ok(Self::new(
            provider,
            Box::new(metrics),
            cfg.billing_period_start_day,
            fetch_timeout,
        ))
    }

    /// Computes every elapsed window of `request` and hands each to `sink`.
    ///
    /// Windows starting after `now` are skipped. Failures stay attached to the
    /// window and category they happened in; nothing here aborts the request.
    pub async fn compute(
        &self,
        request: &CostRequest,
        now: DateTime<Utc>,
        sink: &mut dyn LineItemSink,
    ) {
        let windows = match expand_windows(request.start, request.end, request.resolution) {
            Ok(windows) => windows,
            Err(e) => {
                let msg = format!("failed to create windows from request parameters: {e}");
                error!("{msg}");
                let mut response = WindowCosts::new(request.start, request.end);
                response.errors.push(msg);
                sink.emit(response);
                return;
            }
        };

        info!(
            provider = self.provider.name(),
            region = %request.region,
            windows = windows.len(),
            "computing network costs"
        );

        let mut tier_cache = TierCache::new();
        for window in windows {
            if window.start > now {
                debug!(start = %window.start, end = %window.end, "skipping future window");
                continue;
            }
            let response = self
                .compute_window(&window, request, &mut tier_cache)
                .await;
            sink.emit(response);
        }
    }

    async fn compute_window(
        &self,
        window: &Window,
        request: &CostRequest,
        tier_cache: &mut TierCache,
    ) -> WindowCosts {
        let mut response = WindowCosts::new(window.start, window.end);
        let period_start = billing_period_start(window.start, self.billing_period_start_day);
        let mut baselines: HashMap<BillingGroup, i64> = HashMap::new();

        for category in CostCategory::ALL {
            let result = self
                .compute_category(
                    category,
                    window,
                    request,
                    period_start,
                    tier_cache,
                    &mut baselines,
                )
                .await;
            match result {
                Ok(items) => response.costs.extend(items),
                Err(e) => {
                    error!(
                        category = category.resource_name(),
                        start = %window.start,
                        "error calculating network costs: {e}"
                    );
                    response.errors.push(e.to_string());
                }
            }
        }

        response
    }

    async fn compute_category(
        &self,
        category: CostCategory,
        window: &Window,
        request: &CostRequest,
        period_start: DateTime<Utc>,
        tier_cache: &mut TierCache,
        baselines: &mut HashMap<BillingGroup, i64>,
    ) -> Result<Vec<BilledLineItem>, CostError> {
        let group = category.group();
        let tiers = self
            .tiers_for(category, &request.region, tier_cache)
            .await?;

        let mut baseline = match baselines.get(&group) {
            Some(baseline) => *baseline,
            None => {
                let seeded = self
                    .group_baseline(category, period_start, window.start)
                    .await?;
                debug!(
                    group = group.as_label(),
                    %period_start,
                    bytes = seeded,
                    "seeded billing baseline"
                );
                seeded
            }
        };

        let samples = self
            .timed(self.metrics.samples(
                category,
                window.start,
                window.end,
                window.duration(),
            ))
            .await
            .map_err(|reason| CostError::MetricsQueryFailed {
                category: category.resource_name().into(),
                reason,
            })?;

        let items = self
            .provider
            .compute_costs(category, &samples, &tiers, &mut baseline)?;
        baselines.insert(group, baseline);

        Ok(items)
    }

    async fn tiers_for(
        &self,
        category: CostCategory,
        region: &str,
        tier_cache: &mut TierCache,
    ) -> Result<Vec<PriceTier>, CostError> {
        let group = category.group();
        if !tier_cache.contains_key(&group) {
            let fetched = self.timed(self.provider.price_tiers(group, region)).await;
            tier_cache.insert(group, fetched);
        }

        let cached = tier_cache.get(&group).cloned().unwrap_or_else(|| Ok(vec![]));
        let tiers = cached.map_err(|reason| CostError::PricingQueryFailed {
            category: category.resource_name().into(),
            reason,
        })?;

        if tiers.is_empty() {
            return Err(CostError::NoPricingData {
                category: category.resource_name().into(),
                region: region.to_string(),
            });
        }
        validate_tiers(&tiers)?;
        Ok(tiers)
    }

    /// Usage already billed this period by every category sharing the group.
    async fn group_baseline(
        &self,
        category: CostCategory,
        period_start: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<i64, CostError> {
        let mut total = 0;
        for member in category.group().categories() {
            total += self
                .timed(self.metrics.baseline_usage(*member, period_start, window_start))
                .await
                .map_err(|reason| CostError::MetricsQueryFailed {
                    category: category.resource_name().into(),
                    reason: format!(
                        "{} usage since start of billing period: {reason}",
                        member.resource_name()
                    ),
                })?;
        }
        Ok(total)
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.fetch_timeout)),
        }
    }
}

pub fn http_client(timeout: std::time::Duration) -> Result<Client, AppError> {
    Ok(Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .timeout(timeout)
        .build()?)
}

/// Splits `[start, end)` into consecutive windows of `resolution`; the last
/// one is cut short at `end`.
pub fn expand_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resolution: Duration,
) -> Result<Vec<Window>, AppError> {
    if resolution <= Duration::zero() {
        return Err(AppError::Config("resolution must be positive".into()));
    }
    if end <= start {
        return Err(AppError::Config(format!(
            "end {end} must be after start {start}"
        )));
    }

    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + resolution).min(end);
        windows.push(Window {
            start: cursor,
            end: next,
        });
        cursor = next;
    }
    Ok(windows)
}

/// Midnight (UTC) of the day the billing period containing `window_start`
/// began, for a period that restarts on `billing_day` of every month.
pub fn billing_period_start(window_start: DateTime<Utc>, billing_day: u32) -> DateTime<Utc> {
    let date = window_start.date_naive();
    let current_day = date.day();

    let period_date = if billing_day <= current_day {
        date.with_day(billing_day)
    } else {
        let (year, month) = if date.month() == 1 {
            (date.year() - 1, 12)
        } else {
            (date.year(), date.month() - 1)
        };
        NaiveDate::from_ymd_opt(year, month, billing_day.min(days_in_month(year, month)))
    };

    period_date
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or(window_start)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
