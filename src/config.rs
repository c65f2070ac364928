//! Measurement configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! include_density = true
//! allred_min_percentage_positive = 1.0
//! precision_warning_interval = 1000
//! large_value_threshold = 60000.0
//! ```
//!
//! Every key is optional.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{LoggingHook, DEFAULT_REPORT_INTERVAL};
use crate::error::{Error, Result};
use crate::stats::RunningStatistics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Offer density measurements (counts per unit area).
    #[serde(default = "default_include_density")]
    pub include_density: bool,
    /// H-score and Allred scores are 0 below this positive percentage.
    #[serde(default)]
    pub allred_min_percentage_positive: f64,
    /// Log every n-th precision-risk event.
    #[serde(default = "default_precision_warning_interval")]
    pub precision_warning_interval: u64,
    /// Report samples above this value, if set.
    #[serde(default)]
    pub large_value_threshold: Option<f64>,
}

fn default_include_density() -> bool {
    true
}

fn default_precision_warning_interval() -> u64 {
    DEFAULT_REPORT_INTERVAL
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            include_density: default_include_density(),
            allred_min_percentage_positive: 0.0,
            precision_warning_interval: default_precision_warning_interval(),
            large_value_threshold: None,
        }
    }
}

impl MeasurementConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded measurement config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_min_percentage(self.allred_min_percentage_positive)?;
        if self.precision_warning_interval == 0 {
            return Err(Error::invalid_config(
                "precision_warning_interval must be at least 1",
            ));
        }
        if let Some(threshold) = self.large_value_threshold {
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "large_value_threshold must be finite and positive, got {threshold}"
                )));
            }
        }
        Ok(())
    }

    /// Logging hook honouring the configured interval and threshold.
    pub fn diagnostic_hook(&self) -> Arc<LoggingHook> {
        let hook = LoggingHook::new(self.precision_warning_interval);
        Arc::new(match self.large_value_threshold {
            Some(threshold) => hook.with_large_sample_threshold(threshold),
            None => hook,
        })
    }

    /// An empty accumulator wired to [`diagnostic_hook`](Self::diagnostic_hook).
    pub fn running_statistics(&self) -> RunningStatistics {
        RunningStatistics::with_hook(self.diagnostic_hook())
    }
}

fn check_min_percentage(min: f64) -> Result<f64> {
    if min.is_finite() && (0.0..=100.0).contains(&min) {
        Ok(min)
    } else {
        Err(Error::invalid_config(format!(
            "allred_min_percentage_positive must be within 0..=100, got {min}"
        )))
    }
}

/// Source of the minimum positive percentage used by H-score and Allred
/// scores. Read at every evaluation, so changes apply without rebuilding
/// the measurement catalog.
pub trait ThresholdSource: Send + Sync {
    fn min_positive_percentage(&self) -> f64;
}

impl ThresholdSource for f64 {
    fn min_positive_percentage(&self) -> f64 {
        *self
    }
}

impl ThresholdSource for MeasurementConfig {
    fn min_positive_percentage(&self) -> f64 {
        self.allred_min_percentage_positive
    }
}

/// Threshold that can be changed after the manager is built.
///
/// Clones share the same value. Values outside `0..=100`, and NaN, are
/// rejected the same way [`MeasurementConfig::validate`] rejects them.
///
/// # Examples
/// ```
/// use u_measure::config::{SharedThreshold, ThresholdSource};
/// let threshold = SharedThreshold::new(0.0).unwrap();
/// let handle = threshold.clone();
/// handle.set(5.0).unwrap();
/// assert_eq!(threshold.min_positive_percentage(), 5.0);
/// assert!(handle.set(f64::NAN).is_err());
/// assert_eq!(threshold.min_positive_percentage(), 5.0);
/// ```
#[derive(Debug, Clone)]
pub struct SharedThreshold(Arc<AtomicU64>);

impl SharedThreshold {
    pub fn new(value: f64) -> Result<Self> {
        let value = check_min_percentage(value)?;
        Ok(Self(Arc::new(AtomicU64::new(value.to_bits()))))
    }

    /// Replaces the value; an invalid value leaves the current one in place.
    pub fn set(&self, value: f64) -> Result<()> {
        let value = check_min_percentage(value)?;
        self.0.store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

impl Default for SharedThreshold {
    fn default() -> Self {
        Self(Arc::new(AtomicU64::new(0.0_f64.to_bits())))
    }
}

impl ThresholdSource for SharedThreshold {
    fn min_positive_percentage(&self) -> f64 {
        self.get()
    }
}
