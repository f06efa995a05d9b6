//! Stream configuration snapshots and liveness schedules.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// External task identifier.
pub type TaskId = i64;

/// Default liveness probe cadence.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// One stream to ingest. Immutable once built; changes arrive as a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: TaskId,
    pub url: String,
    /// Display name (usually the streamer's name).
    #[serde(default)]
    pub name: String,
    /// Room number as shown by the platform, if known up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_display_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Liveness schedule: `@every <duration>` or a cron expression.
    /// Defaults to every 15 minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl StreamConfig {
    pub fn new(id: TaskId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            name: String::new(),
            room_display_id: None,
            enabled: true,
            schedule: None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_schedule(mut self, expr: impl Into<String>) -> Self {
        self.schedule = Some(expr.into());
        self
    }

    /// Parse the liveness schedule, falling back to the default cadence.
    pub fn probe_schedule(&self) -> Result<Schedule, ConfigError> {
        match self.schedule.as_deref().map(str::trim) {
            None | Some("") => Ok(Schedule::default()),
            Some(expr) => expr.parse(),
        }
    }

    /// Cheap structural validation; platform-specific checks happen when the
    /// adapter is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::MalformedUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::MalformedUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        self.probe_schedule().map(|_| ())
    }
}

/// When to run liveness probes.
#[derive(Clone)]
pub enum Schedule {
    /// Fixed interval.
    Every(Duration),
    /// Cron expression (6 or 7 fields, seconds first), evaluated in UTC.
    Cron {
        expr: String,
        schedule: Box<cron::Schedule>,
    },
}

impl Schedule {
    /// Time to wait from now until the next probe.
    pub fn next_delay(&self) -> Duration {
        match self {
            Self::Every(d) => *d,
            Self::Cron { schedule, .. } => {
                let now = chrono::Utc::now();
                schedule
                    .after(&now)
                    .next()
                    .and_then(|at| (at - now).to_std().ok())
                    .unwrap_or(DEFAULT_PROBE_INTERVAL)
            }
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Every(DEFAULT_PROBE_INTERVAL)
    }
}

impl FromStr for Schedule {
    type Err = ConfigError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        if let Some(every) = expr.strip_prefix("@every") {
            let d = humantime::parse_duration(every.trim()).map_err(|e| invalid(e.to_string()))?;
            if d.is_zero() {
                return Err(invalid("interval must be positive".into()));
            }
            return Ok(Self::Every(d));
        }

        cron::Schedule::from_str(expr)
            .map(|s| Self::Cron {
                expr: expr.to_string(),
                schedule: Box::new(s),
            })
            .map_err(|e| invalid(e.to_string()))
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(d) => write!(f, "Every({})", humantime::format_duration(*d)),
            Self::Cron { expr, .. } => write!(f, "Cron({expr})"),
        }
    }
}
