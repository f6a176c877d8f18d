//! Reading and sensor sources for the agent
//!
//! Readings arrive as newline-delimited JSON in the legacy wire format
//! ([`RawReading`]), either from a file or from standard input.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use monitor_lib::{RawReading, Reading, Sensor};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Counters for one pass over a source
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SourceStats {
    pub lines: u64,
    pub forwarded: u64,
    pub malformed: u64,
}

/// Load the sensor registry file (a JSON array of sensors)
pub fn load_sensors(path: &Path) -> Result<Vec<Sensor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sensors file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid sensors file {}", path.display()))
}

/// Parse one NDJSON line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<Reading>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let raw: RawReading = serde_json::from_str(line).context("Malformed reading")?;
    match raw.into_reading(Utc::now()) {
        Some(reading) => Ok(Some(reading)),
        None => anyhow::bail!("Reading without sensor id"),
    }
}

/// Stream readings from `path` (or stdin for `-`) into the ingestion channel
pub async fn stream_readings(
    path: String,
    tx: mpsc::Sender<Reading>,
    shutdown: broadcast::Receiver<()>,
) -> Result<SourceStats> {
    if path == "-" {
        info!("Reading NDJSON readings from stdin");
        let reader = BufReader::new(tokio::io::stdin());
        forward_lines(reader, tx, shutdown).await
    } else {
        info!(path = %path, "Reading NDJSON readings from file");
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open readings file {path}"))?;
        forward_lines(BufReader::new(file), tx, shutdown).await
    }
}

/// Forward parsed lines until EOF, shutdown, or the receiver going away
pub async fn forward_lines<R>(
    reader: R,
    tx: mpsc::Sender<Reading>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<SourceStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = SourceStats::default();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read readings source")?,
            _ = shutdown.recv() => {
                debug!("Reading source stopped by shutdown");
                break;
            }
        };
        let Some(line) = line else { break };
        stats.lines += 1;

        match parse_line(&line) {
            Ok(Some(reading)) => {
                if tx.send(reading).await.is_err() {
                    warn!("Ingestion channel closed, stopping reading source");
                    break;
                }
                stats.forwarded += 1;
            }
            Ok(None) => {}
            Err(e) => {
                stats.malformed += 1;
                warn!(line = stats.lines, error = %e, "Skipping malformed reading");
            }
        }
    }

    info!(
        lines = stats.lines,
        forwarded = stats.forwarded,
        malformed = stats.malformed,
        "Reading source finished"
    );
    Ok(stats)
}
