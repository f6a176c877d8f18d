//! Risk query and what-if simulation commands

use anyhow::Result;
use monitor_lib::risk::{Intervention, RiskScore};
use monitor_lib::Metric;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{
    color_severity, format_delta, format_optional_time, format_score, format_time, print_info,
    print_json, print_table, print_warning, OutputFormat,
};
use crate::state::Workspace;

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Hour")]
    at: String,
    #[tabled(rename = "Pollution Index")]
    index: String,
}

#[derive(Tabled)]
struct ComparisonRow {
    #[tabled(rename = "")]
    label: &'static str,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Projected")]
    projected: String,
}

/// Baseline and counterfactual risk side by side
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub intervention: Intervention,
    pub baseline: RiskScore,
    pub projected: RiskScore,
    /// `projected.score - baseline.score`
    pub delta: f64,
}

/// Combine the command-line adjustments; the policy reduction goes first
pub fn build_intervention(
    policy_reduction: Option<f64>,
    reduce: &[(Metric, f64)],
    offset: &[(Metric, f64)],
) -> Intervention {
    let mut intervention = policy_reduction
        .map(Intervention::pollutant_reduction)
        .unwrap_or_else(Intervention::none);
    for &(metric, pct) in reduce {
        intervention = intervention.reduce(metric, pct);
    }
    for &(metric, delta) in offset {
        intervention = intervention.offset(metric, delta);
    }
    intervention
}

pub async fn show_risk(
    workspace: &Workspace,
    sensor: &str,
    horizon: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let sensor_id = workspace.require_sensor(sensor)?;
    let horizon = horizon.unwrap_or(workspace.config.risk.default_horizon_hours);

    let risk = workspace.pipeline().compute_risk(&sensor_id, horizon).await?;

    match format {
        OutputFormat::Json => print_json(&risk)?,
        OutputFormat::Table => print_risk(&risk),
    }
    Ok(())
}

pub async fn simulate(
    workspace: &Workspace,
    sensor: &str,
    horizon: Option<u32>,
    intervention: &Intervention,
    format: OutputFormat,
) -> Result<()> {
    let sensor_id = workspace.require_sensor(sensor)?;
    let horizon = horizon.unwrap_or(workspace.config.risk.default_horizon_hours);

    let pipeline = workspace.pipeline();
    let baseline = pipeline.compute_risk(&sensor_id, horizon).await?;
    let projected = pipeline
        .simulate_risk(&sensor_id, horizon, intervention)
        .await?;

    let report = SimulationReport {
        intervention: intervention.clone(),
        delta: projected.score - baseline.score,
        baseline,
        projected,
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_comparison(&report),
    }
    Ok(())
}

fn print_risk(risk: &RiskScore) {
    println!(
        "Sensor {}: risk {} ({}) over the next {}h",
        risk.sensor_id,
        format_score(risk.score),
        color_severity(risk.level),
        risk.horizon_hours
    );
    println!(
        "Based on {} readings up to {}",
        risk.readings_considered,
        format_optional_time(risk.as_of)
    );

    if risk.readings_considered == 0 {
        print_warning("No readings stored for this sensor");
        return;
    }

    let mut rows = vec![
        ComponentRow {
            name: "Anomalous readings",
            value: format_score(risk.components.anomaly_fraction),
        },
        ComponentRow {
            name: "Alert pressure",
            value: format_score(risk.components.alert_pressure),
        },
        ComponentRow {
            name: "Trend",
            value: format_score(risk.components.trend),
        },
    ];
    if let Some(index) = risk.pollution_index {
        rows.push(ComponentRow {
            name: "Pollution index",
            value: format!("{:.2}", index),
        });
    }
    println!();
    print_table(rows);

    for factor in &risk.factors {
        print_info(&factor.to_string());
    }

    if !risk.forecast.is_empty() {
        let rows: Vec<ForecastRow> = risk
            .forecast
            .iter()
            .map(|p| ForecastRow {
                at: format_time(p.at),
                index: format!("{:.2}", p.pollution_index),
            })
            .collect();
        println!();
        print_table(rows);
    }
}

fn print_comparison(report: &SimulationReport) {
    let SimulationReport {
        intervention,
        baseline,
        projected,
        ..
    } = report;

    println!("Sensor {}: {}", baseline.sensor_id, intervention);
    if intervention.is_noop() {
        print_warning("Intervention changes nothing; projected risk equals baseline");
    }

    let index = |risk: &RiskScore| {
        risk.pollution_index
            .map(|i| format!("{:.2}", i))
            .unwrap_or_else(|| "-".to_string())
    };

    let rows = vec![
        ComparisonRow {
            label: "Risk",
            baseline: format_score(baseline.score),
            projected: format_score(projected.score),
        },
        ComparisonRow {
            label: "Level",
            baseline: color_severity(baseline.level),
            projected: color_severity(projected.level),
        },
        ComparisonRow {
            label: "Anomalous readings",
            baseline: format_score(baseline.components.anomaly_fraction),
            projected: format_score(projected.components.anomaly_fraction),
        },
        ComparisonRow {
            label: "Trend",
            baseline: format_score(baseline.components.trend),
            projected: format_score(projected.components.trend),
        },
        ComparisonRow {
            label: "Pollution index",
            baseline: index(baseline),
            projected: index(projected),
        },
    ];
    println!();
    print_table(rows);
    println!("\nChange: {}", format_delta(baseline.score, projected.score));
}
