//! Health signal derived from the time since the last successful cycle.
//!
//! Status is computed on every query, never stored:
//! `elapsed <= healthy` is Healthy, `elapsed <= degraded` is Degraded,
//! anything older is Unhealthy.

use crate::clock::{self, SharedClock};
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_HEALTHY_FACTOR: f64 = 1.25;
pub const DEFAULT_DEGRADED_FACTOR: f64 = 2.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    healthy: Duration,
    degraded: Duration,
}

impl HealthThresholds {
    pub fn new(healthy: Duration, degraded: Duration) -> Result<Self> {
        if healthy > degraded {
            return Err(BackupError::Config(format!(
                "healthy threshold ({}s) must be less than or equal to degraded threshold ({}s)",
                healthy.as_secs_f64(),
                degraded.as_secs_f64()
            )));
        }
        Ok(Self { healthy, degraded })
    }

    /// Fill in unset (or zero) thresholds from the backup interval.
    pub fn resolve(
        healthy: Option<Duration>,
        degraded: Option<Duration>,
        backup_interval: Duration,
    ) -> Result<Self> {
        let pick = |value: Option<Duration>, factor: f64| match value {
            Some(d) if !d.is_zero() => d,
            _ => backup_interval.mul_f64(factor),
        };
        Self::new(
            pick(healthy, DEFAULT_HEALTHY_FACTOR),
            pick(degraded, DEFAULT_DEGRADED_FACTOR),
        )
    }

    pub fn healthy(&self) -> Duration {
        self.healthy
    }

    pub fn degraded(&self) -> Duration {
        self.degraded
    }

    pub fn classify(&self, elapsed: Duration) -> HealthStatus {
        if elapsed <= self.healthy {
            HealthStatus::Healthy
        } else if elapsed <= self.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Snapshot of the health state handed to monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: Option<String>,
    pub error: Option<String>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub time_since_last_success_secs: Option<u64>,
    pub healthy_threshold_secs: u64,
    pub degraded_threshold_secs: u64,
}

#[derive(Debug, Default)]
struct Facts {
    last_success_time: Option<DateTime<Utc>>,
    last_message: Option<String>,
    last_error: Option<String>,
    update_received: bool,
}

/// Shared between the scheduler (writer) and the health endpoint (reader).
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    check_interval: Duration,
    started_at: DateTime<Utc>,
    clock: SharedClock,
    facts: RwLock<Facts>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds, check_interval: Duration) -> Self {
        Self::with_clock(thresholds, check_interval, clock::system())
    }

    pub fn with_clock(thresholds: HealthThresholds, check_interval: Duration, clock: SharedClock) -> Self {
        Self {
            thresholds,
            check_interval,
            started_at: clock.now(),
            clock,
            facts: RwLock::new(Facts::default()),
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// Record the outcome of one cycle.
    pub fn update(&self, success: bool, message: impl Into<String>, error: Option<String>) {
        let message = message.into();
        let now = self.clock.now();
        {
            let mut facts = self.facts.write();
            facts.update_received = true;
            facts.last_message = Some(message.clone());
            facts.last_error = error;
            if success {
                facts.last_success_time = Some(now);
            }
        }
        debug!(state = if success { "OK" } else { "ERROR" }, message = %message, "Health check updated");
    }

    pub fn check(&self) -> HealthReport {
        let now = self.clock.now();
        let facts = self.facts.read();

        let base = HealthReport {
            status: HealthStatus::Degraded,
            message: facts.last_message.clone(),
            error: facts.last_error.clone(),
            last_success_time: facts.last_success_time,
            time_since_last_success_secs: None,
            healthy_threshold_secs: self.thresholds.healthy.as_secs(),
            degraded_threshold_secs: self.thresholds.degraded.as_secs(),
        };

        if !facts.update_received && elapsed_between(self.started_at, now) < self.check_interval {
            return HealthReport {
                message: Some(format!(
                    "Backup check was not performed yet, try again in {}s.",
                    self.check_interval.as_secs()
                )),
                ..base
            };
        }

        match facts.last_success_time {
            Some(last) => {
                let elapsed = elapsed_between(last, now);
                HealthReport {
                    status: self.thresholds.classify(elapsed),
                    time_since_last_success_secs: Some(elapsed.as_secs()),
                    ..base
                }
            }
            None => HealthReport {
                status: HealthStatus::Unhealthy,
                ..base
            },
        }
    }
}

fn elapsed_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
