use crate::classify::billable_bytes_total;
use crate::config::QueryTemplates;
use crate::error::AppError;
use crate::models::{CostCategory, Observation, UsageSample};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;

/// Source of per-flow byte counters.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Streams observed for `category` in `(start, end]`. Each point carries
    /// the bytes of the `step` ending at its timestamp; points fall on
    /// `start + step, start + 2 * step, ..., end`.
    async fn samples(
        &self,
        category: CostCategory,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<UsageSample>, AppError>;

    /// Billable bytes recorded for `category` in `(period_start, window_start]`.
    async fn baseline_usage(
        &self,
        category: CostCategory,
        period_start: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        if period_start >= window_start {
            return Ok(0);
        }
        let samples = self
            .samples(category, period_start, window_start, window_start - period_start)
            .await?;
        Ok(billable_bytes_total(category, &samples))
    }
}

pub fn format_step(step: Duration) -> String {
    format!("{}s", step.num_seconds().max(1))
}

pub struct PrometheusSource {
    client: Client,
    base_url: Url,
    queries: QueryTemplates,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<MatrixStream>,
}

#[derive(Debug, Deserialize)]
struct MatrixStream {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusSource {
    pub fn new(client: Client, url: &str, queries: QueryTemplates) -> Result<Self, AppError> {
        let mut base_url = Url::parse(url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            queries,
        })
    }

    pub fn render_query(&self, category: CostCategory, step: Duration) -> String {
        self.queries
            .for_category(category)
            .replace("{step}", &format_step(step))
    }

    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<UsageSample>, AppError> {
        let url = self.base_url.join("api/v1/query_range")?;
        debug!(%query, %start, %end, "querying prometheus");

        let body: QueryResponse = self
            .client
            .get(url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("step", format_step(step)),
            ])
            .send()
            .await?
            .json()
            .await?;

        for warning in &body.warnings {
            warn!(%query, %warning, "non-critical error while querying prometheus");
        }

        if body.status != "success" {
            return Err(AppError::Metrics(format!(
                "{}: {}",
                body.error_type.unwrap_or_else(|| body.status.clone()),
                body.error.unwrap_or_default()
            )));
        }

        let data = body
            .data
            .ok_or_else(|| AppError::Metrics("response carried no data".into()))?;
        if data.result_type != "matrix" {
            return Err(AppError::Metrics(format!(
                "expected a matrix result, got '{}'",
                data.result_type
            )));
        }

        data.result.into_iter().map(to_sample).collect()
    }
}

fn to_sample(stream: MatrixStream) -> Result<UsageSample, AppError> {
    let values = stream
        .values
        .into_iter()
        .map(|(ts, raw)| {
            let value = raw
                .parse::<f64>()
                .map_err(|e| AppError::Metrics(format!("invalid sample value '{raw}': {e}")))?;
            let secs = ts.trunc() as i64;
            let nanos = (ts.fract() * 1e9) as u32;
            let timestamp = Utc
                .timestamp_opt(secs, nanos)
                .single()
                .ok_or_else(|| AppError::Metrics(format!("invalid sample timestamp {ts}")))?;
            Ok(Observation { timestamp, value })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(UsageSample {
        labels: stream.metric,
        values,
    })
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn samples(
        &self,
        category: CostCategory,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<UsageSample>, AppError> {
        // A range query also evaluates at `start`, which would cover the step
        // before the interval.
        let first_point = (start + step).min(end);
        let query = self.render_query(category, step);
        self.query_range(&query, first_point, end, step).await
    }
}

/// A `query_range` endpoint that evaluates like Prometheus: one point at every
/// `start + k * step` up to `end`, each holding the traffic in `(t - step, t]`.
#[cfg(test)]
pub(crate) struct RangeEvaluator {
    pub labels: serde_json::Value,
    pub traffic: Vec<(i64, f64)>,
}

#[cfg(test)]
impl wiremock::Respond for RangeEvaluator {
    fn respond(&self, request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let params: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let seconds = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.trim_end_matches('s').parse::<i64>().ok())
        };
        let (Some(start), Some(end), Some(step)) = (seconds("start"), seconds("end"), seconds("step"))
        else {
            return wiremock::ResponseTemplate::new(400);
        };
        if step <= 0 {
            return wiremock::ResponseTemplate::new(400);
        }

        let mut values = Vec::new();
        let mut t = start;
        while t <= end {
            let bytes: f64 = self
                .traffic
                .iter()
                .filter(|(at, _)| *at > t - step && *at <= t)
                .map(|(_, b)| b)
                .sum();
            values.push(serde_json::json!([t, bytes.to_string()]));
            t += step;
        }

        wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{ "metric": self.labels, "values": values }]
            }
        }))
    }
}
