//! Batch ingestion of NDJSON readings

use anyhow::{Context, Result};
use monitor_lib::{BatchReport, RawReading, Reading};
use serde::Serialize;
use tabled::Tabled;
use tokio::io::AsyncReadExt;

use crate::output::{
    color_severity, format_score, format_time, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};
use crate::state::Workspace;

/// A line that could not be turned into a reading
#[derive(Debug, Serialize)]
pub struct MalformedLine {
    pub line: usize,
    pub error: String,
}

#[derive(Serialize)]
struct IngestReport<'a> {
    malformed: &'a [MalformedLine],
    #[serde(flatten)]
    report: &'a BatchReport,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Seen")]
    seen: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled)]
struct RiskRow {
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Risk")]
    score: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Readings")]
    readings: usize,
}

/// Parse NDJSON into readings; blank lines are skipped
///
/// Every line must carry its own timestamp. A file is a replay, so there is
/// no arrival time to fall back on.
pub fn parse_readings(content: &str) -> (Vec<Reading>, Vec<MalformedLine>) {
    let mut readings = Vec::new();
    let mut malformed = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<RawReading>(line)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                let timestamp = raw
                    .timestamp
                    .ok_or_else(|| "missing timestamp".to_string())?;
                raw.into_reading(timestamp)
                    .ok_or_else(|| "missing sensor id".to_string())
            });
        match parsed {
            Ok(reading) => readings.push(reading),
            Err(error) => malformed.push(MalformedLine {
                line: idx + 1,
                error,
            }),
        }
    }

    (readings, malformed)
}

async fn read_input(input: &str) -> Result<String> {
    let mut content = String::new();
    if input == "-" {
        tokio::io::stdin()
            .read_to_string(&mut content)
            .await
            .context("Failed to read readings from stdin")?;
    } else {
        content = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read readings file {input}"))?;
    }
    Ok(content)
}

pub async fn ingest_readings(workspace: &Workspace, input: &str, format: OutputFormat) -> Result<()> {
    let content = read_input(input).await?;
    let (readings, malformed) = parse_readings(&content);

    let report = workspace.pipeline().ingest_batch(readings).await;
    workspace.save()?;

    match format {
        OutputFormat::Json => print_json(&IngestReport {
            malformed: &malformed,
            report: &report,
        })?,
        OutputFormat::Table => print_summary(&report, &malformed),
    }

    if report.accepted() == 0 && !(report.failures.is_empty() && malformed.is_empty()) {
        anyhow::bail!("No readings were ingested");
    }
    Ok(())
}

fn print_summary(report: &BatchReport, malformed: &[MalformedLine]) {
    print_success(&format!(
        "Ingested {} readings ({} duplicates skipped, {} anomalies)",
        report.accepted(),
        report.duplicates(),
        report.verdict_count()
    ));

    for line in malformed {
        print_warning(&format!("Line {}: {}", line.line, line.error));
    }
    for failure in &report.failures {
        print_warning(&format!(
            "{} @ {}: {}",
            failure.sensor_id,
            failure.timestamp.to_rfc3339(),
            failure.error
        ));
    }
    for outcome in &report.outcomes {
        for rejected in &outcome.rejected {
            print_warning(&format!(
                "{} @ {}: dropped {} = {} ({})",
                outcome.sensor_id,
                outcome.timestamp.to_rfc3339(),
                rejected.metric,
                rejected.value,
                rejected.reason
            ));
        }
    }

    let alerts: Vec<AlertRow> = report
        .outcomes
        .iter()
        .flat_map(|o| o.alerts.iter())
        .filter_map(|outcome| outcome.alert())
        .map(|alert| AlertRow {
            sensor: alert.sensor_id.to_string(),
            metric: alert.metric.label().to_string(),
            severity: color_severity(alert.severity),
            seen: format_time(alert.last_seen_at),
            message: alert.message.clone(),
        })
        .collect();

    if alerts.is_empty() {
        print_info("No alerts raised");
    } else {
        println!();
        print_table(alerts);
    }

    if !report.risks.is_empty() {
        let rows: Vec<RiskRow> = report
            .risks
            .iter()
            .map(|r| RiskRow {
                sensor: r.sensor_id.to_string(),
                score: format_score(r.score),
                level: color_severity(r.level),
                readings: r.readings_considered,
            })
            .collect();
        println!();
        print_table(rows);
    }
}
