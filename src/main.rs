mod accumulator;
mod allocator;
mod classify;
mod config;
mod error;
mod metrics;
mod models;
mod pricing;
mod providers;
mod service;
mod units;

use allocator::allocate;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use config::{ensure_initialized, load_config};
use error::AppError;
use models::{BillingGroup, CostRequest, WindowCosts};
use providers::ProviderRegistry;
use service::{http_client, CostService};
use tracing_subscriber::EnvFilter;
use units::gb_to_bytes;

#[derive(Debug, Parser)]
#[command(name = "netcost")]
#[command(about = "Per-workload network data transfer cost allocation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    /// Compute per-workload network costs for a time range.
    Costs {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "1d")]
        resolution: String,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Allocate usage across the configured provider's tiers.
    Allocate {
        #[arg(long)]
        group: String,
        #[arg(long, default_value_t = 0.0)]
        baseline_gb: f64,
        #[arg(long)]
        pending_gb: f64,
        #[arg(long)]
        region: Option<String>,
    },
    Providers,
}

fn parse_resolution(input: &str) -> Result<Duration, AppError> {
    let unsupported = || {
        AppError::Config(format!(
            "Unsupported resolution '{input}'. Use <n>m, <n>h, or <n>d."
        ))
    };

    let trimmed = input.trim();
    let Some(unit) = trimmed.chars().last() else {
        return Err(unsupported());
    };
    let count: i64 = trimmed[..trimmed.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| unsupported())?;
    if count <= 0 {
        return Err(unsupported());
    }

    let resolution = match unit {
        'm' => Duration::try_minutes(count),
        'h' => Duration::try_hours(count),
        'd' => Duration::try_days(count),
        _ => None,
    };
    resolution.ok_or_else(unsupported)
}

fn parse_timestamp(flag: &str, input: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Config(format!("invalid --{flag} '{input}': {e}")))
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn print_csv(windows: &[WindowCosts]) {
    println!("start,end,workload,workload_type,resource_name,billed_cost,usage_quantity_gb,currency");
    for w in windows {
        for c in &w.costs {
            println!(
                "{},{},{},{},{},{:.8},{:.6},{}",
                csv_field(&w.start.to_rfc3339()),
                csv_field(&w.end.to_rfc3339()),
                csv_field(&c.workload.name),
                csv_field(&c.workload.kind),
                csv_field(&c.resource_name),
                c.billed_cost_usd,
                c.usage_quantity_gb,
                csv_field(&w.currency),
            );
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netcost=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_tracing();
    let cli = Cli::parse();
    let registry = ProviderRegistry::with_builtin();

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized netcost config.");
        }
        Commands::Costs {
            start,
            end,
            resolution,
            region,
            format,
        } => {
            let format = format.to_ascii_lowercase();
            if format != "json" && format != "csv" {
                return Err(AppError::Config(
                    "Unsupported output format. Use json or csv".into(),
                ));
            }

            ensure_initialized()?;
            let cfg = load_config()?;
            let request = CostRequest {
                start: parse_timestamp("start", &start)?,
                end: parse_timestamp("end", &end)?,
                resolution: parse_resolution(&resolution)?,
                region: region.unwrap_or_else(|| cfg.region.clone()),
            };

            let svc = CostService::from_config(&cfg, &registry).await?;
            let mut windows: Vec<WindowCosts> = Vec::new();
            svc.compute(&request, Utc::now(), &mut windows).await;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&windows)?);
            } else {
                print_csv(&windows);
            }
        }
        Commands::Allocate {
            group,
            baseline_gb,
            pending_gb,
            region,
        } => {
            let group = BillingGroup::parse(&group).ok_or_else(|| {
                AppError::Config(format!(
                    "Unsupported group '{group}'. Use inter-zone or internet."
                ))
            })?;
            if baseline_gb < 0.0 || pending_gb < 0.0 {
                return Err(AppError::Config(
                    "--baseline-gb and --pending-gb must not be negative".into(),
                ));
            }

            ensure_initialized()?;
            let cfg = load_config()?;
            let region = region.unwrap_or_else(|| cfg.region.clone());

            let client = http_client(std::time::Duration::from_secs(
                cfg.prometheus.timeout_seconds,
            ))?;
            let provider = registry.create_from_config(&cfg, client).await?;

            let tiers = provider.price_tiers(group, &region).await?;
            if tiers.is_empty() {
                return Err(AppError::Pricing(format!(
                    "no {} tiers for region {region}",
                    group.as_label()
                )));
            }
            let allocation = allocate(gb_to_bytes(baseline_gb), gb_to_bytes(pending_gb), &tiers)?;
            println!("{}", serde_json::to_string_pretty(&allocation)?);
        }
        Commands::Providers => {
            for name in registry.names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}
