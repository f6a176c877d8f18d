//! River monitor CLI
//!
//! Operates on a local store snapshot: register sensors, ingest NDJSON
//! readings, review alerts, and query or simulate sensor risk.

mod commands;
mod output;
mod state;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::{alerts, ingest, risk, sensors};
use monitor_lib::Metric;

/// River water-quality monitor CLI
#[derive(Parser)]
#[command(name = "rivermon")]
#[command(author, version, about = "CLI for the river water-quality monitor", long_about = None)]
pub struct Cli {
    /// Store snapshot to read and update
    #[arg(long, env = "RIVERMON_STATE", default_value = "rivermon-state.json")]
    pub state: PathBuf,

    /// Monitor thresholds file (TOML, YAML or JSON)
    #[arg(long, env = "RIVERMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Log pipeline activity to stderr
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the sensor registry
    #[command(subcommand)]
    Sensors(SensorCommands),

    /// Ingest NDJSON readings from a file (`-` for stdin)
    Ingest {
        /// Readings file
        input: String,
    },

    /// Review and resolve alerts
    #[command(subcommand)]
    Alerts(AlertCommands),

    /// Show the current risk of a sensor
    Risk {
        /// Sensor ID
        sensor: String,

        /// Forecast horizon in hours
        #[arg(long)]
        horizon: Option<u32>,
    },

    /// Compare current risk with risk under a hypothetical intervention
    Simulate {
        /// Sensor ID
        sensor: String,

        /// Forecast horizon in hours
        #[arg(long)]
        horizon: Option<u32>,

        /// Reduce a metric by a percentage, e.g. `ammonia=30`
        #[arg(long, value_parser = parse_adjustment)]
        reduce: Vec<(Metric, f64)>,

        /// Shift a metric by a constant, e.g. `dissolved_oxygen=1.5`
        #[arg(long, value_parser = parse_adjustment, allow_hyphen_values = true)]
        offset: Vec<(Metric, f64)>,

        /// Reduce every pollutant-load metric by this percentage
        #[arg(long)]
        policy_reduction: Option<f64>,
    },
}

#[derive(Subcommand)]
pub enum SensorCommands {
    /// Register or replace a sensor
    Add {
        /// Sensor ID
        id: String,

        /// Display name
        #[arg(long)]
        name: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Probe type
        #[arg(long = "type", default_value = "water")]
        sensor_type: String,
    },

    /// List registered sensors
    List,

    /// Record a maintenance visit
    Service {
        /// Sensor ID
        id: String,

        /// Visit time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// List alerts, newest first
    List {
        /// Include resolved alerts
        #[arg(long)]
        all: bool,
    },

    /// Mark an alert resolved
    Resolve {
        /// Alert ID
        id: u64,
    },
}

/// Parse `metric=value`
fn parse_adjustment(raw: &str) -> Result<(Metric, f64), String> {
    let (metric, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected METRIC=VALUE, got '{raw}'"))?;
    let metric = metric.parse::<Metric>().map_err(|e| e.to_string())?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid number '{value}'"))?;
    if !value.is_finite() {
        return Err(format!("invalid number '{value}'"));
    }
    Ok((metric, value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .compact()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    }

    let workspace = state::Workspace::open(&cli.state, cli.config.as_deref())?;

    // Execute command
    match cli.command {
        Commands::Sensors(sensor_cmd) => match sensor_cmd {
            SensorCommands::Add {
                id,
                name,
                lat,
                lon,
                sensor_type,
            } => {
                sensors::add_sensor(&workspace, &id, &name, lat, lon, &sensor_type, cli.format)?;
            }
            SensorCommands::List => {
                sensors::list_sensors(&workspace, cli.format)?;
            }
            SensorCommands::Service { id, at } => {
                sensors::record_service(&workspace, &id, at.unwrap_or_else(Utc::now), cli.format)?;
            }
        },
        Commands::Ingest { input } => {
            ingest::ingest_readings(&workspace, &input, cli.format).await?;
        }
        Commands::Alerts(alert_cmd) => match alert_cmd {
            AlertCommands::List { all } => {
                alerts::list_alerts(&workspace, all, cli.format)?;
            }
            AlertCommands::Resolve { id } => {
                alerts::resolve_alert(&workspace, id, cli.format)?;
            }
        },
        Commands::Risk { sensor, horizon } => {
            risk::show_risk(&workspace, &sensor, horizon, cli.format).await?;
        }
        Commands::Simulate {
            sensor,
            horizon,
            reduce,
            offset,
            policy_reduction,
        } => {
            let intervention = risk::build_intervention(policy_reduction, &reduce, &offset);
            risk::simulate(&workspace, &sensor, horizon, &intervention, cli.format).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_adjustment() {
        assert_eq!(parse_adjustment("ammonia=30").unwrap(), (Metric::Ammonia, 30.0));
        assert_eq!(parse_adjustment("DO=-1.5").unwrap(), (Metric::DissolvedOxygen, -1.5));
        assert!(parse_adjustment("ammonia").is_err());
        assert!(parse_adjustment("salinity=3").is_err());
        assert!(parse_adjustment("bod=lots").is_err());
        assert!(parse_adjustment("bod=NaN").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
