//! Alert review commands

use anyhow::Result;
use chrono::Utc;
use monitor_lib::AlertId;
use tabled::Tabled;

use crate::output::{
    color_severity, format_optional_time, format_time, print_json, print_success, print_table,
    print_warning, OutputFormat,
};
use crate::state::Workspace;

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Count")]
    occurrences: u32,
    #[tabled(rename = "Opened")]
    created_at: String,
    #[tabled(rename = "Last Seen")]
    last_seen_at: String,
    #[tabled(rename = "Resolved")]
    resolved_at: String,
}

pub fn list_alerts(workspace: &Workspace, all: bool, format: OutputFormat) -> Result<()> {
    let alerts = workspace.store.alerts(!all);

    match format {
        OutputFormat::Json => print_json(&alerts)?,
        OutputFormat::Table => {
            if alerts.is_empty() {
                print_warning(if all { "No alerts" } else { "No open alerts" });
                return Ok(());
            }

            let rows: Vec<AlertRow> = alerts
                .iter()
                .map(|a| AlertRow {
                    id: a.id.map(|id| id.to_string()).unwrap_or_default(),
                    sensor: a.sensor_id.to_string(),
                    metric: a.metric.label().to_string(),
                    severity: color_severity(a.severity),
                    occurrences: a.occurrences,
                    created_at: format_time(a.created_at),
                    last_seen_at: format_time(a.last_seen_at),
                    resolved_at: format_optional_time(a.resolved_at),
                })
                .collect();

            print_table(rows);
            println!("\nTotal: {} alerts", alerts.len());
        }
    }
    Ok(())
}

pub fn resolve_alert(workspace: &Workspace, id: u64, format: OutputFormat) -> Result<()> {
    let alert = workspace.store.resolve_alert(AlertId(id), Utc::now())?;
    workspace.save()?;

    match format {
        OutputFormat::Json => print_json(&alert)?,
        OutputFormat::Table => print_success(&format!(
            "Resolved alert {} ({} {} on {})",
            id,
            alert.severity,
            alert.metric.label(),
            alert.sensor_id
        )),
    }
    Ok(())
}
