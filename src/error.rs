use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("metrics query error: {0}")]
    Metrics(String),

    #[error("pricing error: {0}")]
    Pricing(String),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Cost(#[from] CostError),
}

/// Failures scoped to a single billing category within one window.
///
/// These never abort a request; the orchestrator records them on the
/// window they occurred in and moves on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CostError {
    #[error("received no pricing information for {category} in region {region}")]
    NoPricingData { category: String, region: String },

    #[error("failed to query {category} usage: {reason}")]
    MetricsQueryFailed { category: String, reason: String },

    #[error("failed to fetch {category} pricing: {reason}")]
    PricingQueryFailed { category: String, reason: String },

    #[error("malformed tier table: {0}")]
    MalformedTierTable(String),
}
