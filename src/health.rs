// Health classification from restart counters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a health evaluation, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => write!(f, "ok"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// High-water marks for a supervisor's restart counters
///
/// A check is tripped when the observed value is strictly greater than its
/// threshold. `None` disables the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    #[serde(default)]
    pub restarts_warn_over: Option<u64>,
    #[serde(default)]
    pub restarts_crit_over: Option<u64>,
    #[serde(default = "default_rpm_warn_over")]
    pub rpm_warn_over: Option<u64>,
    #[serde(default = "default_rpm_crit_over")]
    pub rpm_crit_over: Option<u64>,
}

fn default_rpm_warn_over() -> Option<u64> {
    Some(0)
}

fn default_rpm_crit_over() -> Option<u64> {
    Some(2)
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            restarts_warn_over: None,
            restarts_crit_over: None,
            rpm_warn_over: default_rpm_warn_over(),
            rpm_crit_over: default_rpm_crit_over(),
        }
    }
}

impl HealthThresholds {
    /// Classify cumulative `restarts` and restarts-per-minute `rpm`
    pub fn evaluate(&self, restarts: u64, rpm: u64) -> HealthStatus {
        let over = |value: u64, threshold: Option<u64>| threshold.map_or(false, |t| value > t);

        if over(restarts, self.restarts_crit_over) || over(rpm, self.rpm_crit_over) {
            HealthStatus::Critical
        } else if over(restarts, self.restarts_warn_over) || over(rpm, self.rpm_warn_over) {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        }
    }
}
