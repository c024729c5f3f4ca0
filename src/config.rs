use crate::error::AppError;
use crate::models::{BillingGroup, CostCategory, PriceTier};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "netcost";

pub fn normalize_provider_name(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("NETCOST_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("io", "netcost", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".netcost"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: String,
    pub region: String,
    pub billing_period_start_day: u32,
    pub prometheus: PrometheusSettings,
    pub provider_settings: HashMap<String, ProviderSettings>,
    pub tier_overrides: Vec<TierOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusSettings {
    pub url: String,
    pub timeout_seconds: u64,
    pub queries: QueryTemplates,
}

/// PromQL per category. `{step}` is replaced by the query step, e.g. `86400s`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryTemplates {
    pub inter_zone_ingress: String,
    pub inter_zone_egress: String,
    pub internet_egress: String,
}

impl QueryTemplates {
    pub fn for_category(&self, category: CostCategory) -> &str {
        match category {
            CostCategory::InterZoneIngress => &self.inter_zone_ingress,
            CostCategory::InterZoneEgress => &self.inter_zone_egress,
            CostCategory::InternetEgress => &self.internet_egress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    pub pricing_url: Option<String>,
    pub service_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierOverride {
    pub provider: String,
    pub group: BillingGroup,
    pub tiers: Vec<PriceTier>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: "aws".into(),
            region: "us-east-1".into(),
            billing_period_start_day: 1,
            prometheus: PrometheusSettings::default(),
            provider_settings: HashMap::new(),
            tier_overrides: vec![],
        }
    }
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".into(),
            timeout_seconds: 30,
            queries: QueryTemplates::default(),
        }
    }
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self {
            inter_zone_ingress: "increase(netobserv_workload_ingress_bytes_total[{step}])".into(),
            inter_zone_egress: "increase(netobserv_workload_egress_bytes_total[{step}])".into(),
            internet_egress: "increase(netobserv_workload_internet_egress_bytes_total[{step}])"
                .into(),
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    let provider = normalize_provider_name(&config.provider);
    if provider != config.provider {
        config.provider = provider;
        changed = true;
    }

    let region = config.region.trim().to_ascii_lowercase();
    if region != config.region {
        config.region = region;
        changed = true;
    }

    let mut normalized_settings: HashMap<String, ProviderSettings> = HashMap::new();
    for (provider, settings) in std::mem::take(&mut config.provider_settings) {
        let normalized = normalize_provider_name(&provider);
        if normalized != provider {
            changed = true;
        }
        normalized_settings.insert(normalized, settings);
    }
    config.provider_settings = normalized_settings;

    for override_row in &mut config.tier_overrides {
        let normalized = normalize_provider_name(&override_row.provider);
        if normalized != override_row.provider {
            override_row.provider = normalized;
            changed = true;
        }
    }

    changed
}

pub fn validate_config(config: &AppConfig) -> Result<(), AppError> {
    if !(1..=31).contains(&config.billing_period_start_day) {
        return Err(AppError::Config(format!(
            "billing_period_start_day must be between 1 and 31, got {}",
            config.billing_period_start_day
        )));
    }
    if config.prometheus.timeout_seconds == 0 {
        return Err(AppError::Config(
            "prometheus.timeout_seconds must be greater than zero".into(),
        ));
    }
    url::Url::parse(&config.prometheus.url)?;
    Ok(())
}

pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let raw = fs::read_to_string(path)?;
    let mut parsed: AppConfig = toml::from_str(&raw)?;
    normalize_config(&mut parsed);
    validate_config(&parsed)?;
    Ok(parsed)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
