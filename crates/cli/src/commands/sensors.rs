//! Sensor registry commands

use anyhow::Result;
use chrono::{DateTime, Utc};
use monitor_lib::Sensor;
use tabled::Tabled;

use crate::output::{
    format_optional_time, print_json, print_success, print_table, print_warning, OutputFormat,
};
use crate::state::Workspace;

#[derive(Tabled)]
struct SensorRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    sensor_type: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Readings")]
    readings: usize,
    #[tabled(rename = "Last Service")]
    last_service: String,
}

pub fn add_sensor(
    workspace: &Workspace,
    id: &str,
    name: &str,
    lat: f64,
    lon: f64,
    sensor_type: &str,
    format: OutputFormat,
) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        anyhow::bail!("Coordinates out of range: lat {lat}, lon {lon}");
    }

    let mut sensor = Sensor::new(id, name, lat, lon);
    sensor.sensor_type = sensor_type.to_string();
    workspace.store.register_sensor(sensor.clone());
    workspace.save()?;

    match format {
        OutputFormat::Json => print_json(&sensor)?,
        OutputFormat::Table => print_success(&format!("Registered sensor {} ({})", id, name)),
    }
    Ok(())
}

pub fn list_sensors(workspace: &Workspace, format: OutputFormat) -> Result<()> {
    let sensors = workspace.store.sensors();

    match format {
        OutputFormat::Json => print_json(&sensors)?,
        OutputFormat::Table => {
            if sensors.is_empty() {
                print_warning("No sensors registered");
                return Ok(());
            }

            let rows: Vec<SensorRow> = sensors
                .iter()
                .map(|s| SensorRow {
                    id: s.id.to_string(),
                    name: s.name.clone(),
                    sensor_type: s.sensor_type.clone(),
                    location: format!("{:.4}, {:.4}", s.lat, s.lon),
                    readings: workspace.store.reading_count(&s.id),
                    last_service: format_optional_time(s.last_service),
                })
                .collect();

            print_table(rows);
            println!("\nTotal: {} sensors", sensors.len());
        }
    }
    Ok(())
}

pub fn record_service(
    workspace: &Workspace,
    id: &str,
    at: DateTime<Utc>,
    format: OutputFormat,
) -> Result<()> {
    let sensor_id = workspace.require_sensor(id)?;
    workspace.store.record_service(&sensor_id, at)?;
    workspace.save()?;

    match format {
        OutputFormat::Json => {
            let sensor = workspace.store.sensors().into_iter().find(|s| s.id == sensor_id);
            print_json(&sensor)?;
        }
        OutputFormat::Table => {
            print_success(&format!("Recorded service visit for {} at {}", id, at.to_rfc3339()))
        }
    }
    Ok(())
}
