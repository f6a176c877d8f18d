//! Short-horizon pollution risk scoring and what-if simulation
//!
//! Scores combine three signals over a trailing window of readings:
//! - fraction of readings with a metric outside its safe range
//! - severity-weighted pressure of the sensor's open alerts
//! - adverse trend of the most volatile metric
//!
//! Simulation scores the same window after applying an [`Intervention`]
//! to copied readings.

mod forecast;
mod scorer;
mod simulation;
mod trend;

pub use forecast::ForecastPoint;
pub use scorer::{risk_level, RiskComponents, RiskConfig, RiskEngine, RiskFactor, RiskScore};
pub use simulation::{Adjustment, Intervention, MetricAdjustment, POLLUTANT_METRICS};
pub use trend::TrendEstimate;
