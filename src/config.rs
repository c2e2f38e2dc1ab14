//! Engine configuration.
//!
//! [`MergeOptions`] is the runtime form (it carries trait objects). [`MergeConfig`] is the subset
//! that can be read from a JSON file and turned into options.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MergeResult;
use crate::observability::{MergeObserver, Severity};

/// What staging does with a row that does not fit the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadRowPolicy {
    /// Fail the whole load on the first bad row.
    #[default]
    Abort,
    /// Leave the row out and keep loading.
    Skip,
}

/// Precision of expiration boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationGranularity {
    /// Expire at the run's exact timestamp.
    #[default]
    Timestamp,
    /// Expire at midnight of the run's day, for datasets refreshed at most daily.
    Day,
}

impl ExpirationGranularity {
    /// The expiration boundary for a run started at `now`.
    pub fn boundary(self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Timestamp => now,
            Self::Day => now.date().and_time(NaiveTime::MIN),
        }
    }
}

/// Source of "now" for a run.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A clock pinned to one instant, for backfills and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Options controlling the merge engine.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct MergeOptions {
    /// Policy for rows that fail to parse during staging.
    pub bad_rows: BadRowPolicy,
    /// Precision of `end_date` on expired versions.
    pub expiration: ExpirationGranularity,
    /// Rows examined when inferring a new table's schema. `None` reads the whole extract.
    pub inference_sample_rows: Option<usize>,
    /// Optional observer for run outcomes.
    pub observer: Option<Arc<dyn MergeObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: Severity,
    /// Source of the run timestamp.
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOptions")
            .field("bad_rows", &self.bad_rows)
            .field("expiration", &self.expiration)
            .field("inference_sample_rows", &self.inference_sample_rows)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            bad_rows: BadRowPolicy::default(),
            expiration: ExpirationGranularity::default(),
            inference_sample_rows: None,
            observer: None,
            alert_at_or_above: Severity::Critical,
            clock: Arc::new(SystemClock),
        }
    }
}

/// File form of [`MergeOptions`].
///
/// ```
/// use rust_data_history::config::{ExpirationGranularity, MergeConfig};
///
/// let cfg = MergeConfig::from_json_str(r#"{ "expiration": "day", "bad_rows": "skip" }"#).unwrap();
/// assert_eq!(cfg.expiration, ExpirationGranularity::Day);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    pub bad_rows: BadRowPolicy,
    pub expiration: ExpirationGranularity,
    pub inference_sample_rows: Option<usize>,
    pub alert_at_or_above: Severity,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            bad_rows: BadRowPolicy::default(),
            expiration: ExpirationGranularity::default(),
            inference_sample_rows: None,
            alert_at_or_above: Severity::Critical,
        }
    }
}

impl MergeConfig {
    pub fn from_json_str(s: &str) -> MergeResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> MergeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Runtime options with no observer and the system clock.
    pub fn into_options(self) -> MergeOptions {
        MergeOptions {
            bad_rows: self.bad_rows,
            expiration: self.expiration,
            inference_sample_rows: self.inference_sample_rows,
            alert_at_or_above: self.alert_at_or_above,
            ..MergeOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{BadRowPolicy, ExpirationGranularity, MergeConfig};
    use crate::observability::Severity;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(MergeConfig::from_json_str("{}").unwrap(), MergeConfig::default());
    }

    #[test]
    fn config_fields_decode() {
        let cfg = MergeConfig::from_json_str(
            r#"{"bad_rows":"skip","expiration":"day","inference_sample_rows":500,"alert_at_or_above":"error"}"#,
        )
        .unwrap();
        let opts = cfg.into_options();
        assert_eq!(opts.bad_rows, BadRowPolicy::Skip);
        assert_eq!(opts.expiration, ExpirationGranularity::Day);
        assert_eq!(opts.inference_sample_rows, Some(500));
        assert_eq!(opts.alert_at_or_above, Severity::Error);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(MergeConfig::from_json_str(r#"{"expire":"day"}"#).is_err());
    }

    #[test]
    fn day_granularity_truncates_to_midnight() {
        let now = NaiveDate::from_ymd_opt(2014, 3, 9)
            .unwrap()
            .and_hms_opt(17, 45, 12)
            .unwrap();
        assert_eq!(ExpirationGranularity::Timestamp.boundary(now), now);
        assert_eq!(
            ExpirationGranularity::Day.boundary(now),
            NaiveDate::from_ymd_opt(2014, 3, 9).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
    }
}
