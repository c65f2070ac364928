//! Advisory telemetry for running statistics.
//!
//! Two kinds of event are reported, neither of which alters a computed value:
//!
//! - **Precision risk**: an accumulated sum (or sum of squared deviations)
//!   has grown past [`MAX_EXACT_INTEGER`], the largest integer an `f64`
//!   represents exactly, so further additions may silently lose low-order
//!   bits.
//! - **Large sample**: a single value above a caller-chosen threshold was
//!   added. Only checked when a hook opts in via
//!   [`DiagnosticHook::large_sample_threshold`].
//!
//! Reporting goes through [`DiagnosticHook`]. The default [`LoggingHook`]
//! forwards events to `tracing` and rate-limits them, so the hot path stays
//! O(1) even when every sample trips a threshold.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Largest integer exactly representable in an `f64` (2⁵³ − 1).
pub const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Default number of events between two logged occurrences.
pub const DEFAULT_REPORT_INTERVAL: u64 = 1000;

/// Which accumulated quantity crossed [`MAX_EXACT_INTEGER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionQuantity {
    /// The running sum of samples.
    Sum,
    /// The running sum of squared deviations from the mean.
    SumSquaredDeviations,
}

impl fmt::Display for PrecisionQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrecisionQuantity::Sum => f.write_str("sum"),
            PrecisionQuantity::SumSquaredDeviations => f.write_str("sum of squared deviations"),
        }
    }
}

/// A precision-risk event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionWarning {
    pub quantity: PrecisionQuantity,
    pub value: f64,
}

impl PrecisionWarning {
    /// Returns a warning if `value` exceeds [`MAX_EXACT_INTEGER`] in magnitude.
    pub fn check(quantity: PrecisionQuantity, value: f64) -> Option<Self> {
        if value.abs() > MAX_EXACT_INTEGER {
            Some(Self { quantity, value })
        } else {
            None
        }
    }
}

/// Receiver for accumulator telemetry.
///
/// Implementations must not panic; they are called from getters that
/// promise to return a value unconditionally.
pub trait DiagnosticHook: Send + Sync + fmt::Debug {
    /// Called when an accumulated quantity exceeds [`MAX_EXACT_INTEGER`].
    fn precision_risk(&self, warning: &PrecisionWarning);

    /// Samples strictly above this value are passed to [`large_sample`].
    ///
    /// Queried once when the hook is attached.
    ///
    /// [`large_sample`]: DiagnosticHook::large_sample
    fn large_sample_threshold(&self) -> Option<f64> {
        None
    }

    /// Called for each sample above [`large_sample_threshold`].
    ///
    /// [`large_sample_threshold`]: DiagnosticHook::large_sample_threshold
    fn large_sample(&self, _value: f64) {}
}

/// Admits the first event and then every `interval`-th one.
#[derive(Debug)]
pub struct RateLimit {
    interval: u64,
    seen: AtomicU64,
}

impl RateLimit {
    pub const fn new(interval: u64) -> Self {
        Self {
            interval: if interval == 0 { 1 } else { interval },
            seen: AtomicU64::new(0),
        }
    }

    /// Records one occurrence. Returns the running occurrence count if this
    /// occurrence should be reported.
    pub fn admit(&self) -> Option<u64> {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if (n - 1) % self.interval == 0 {
            Some(n)
        } else {
            None
        }
    }

    /// Total occurrences recorded, reported or not.
    pub fn occurrences(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

/// Hook that logs through `tracing` at `warn` level, rate-limited.
#[derive(Debug)]
pub struct LoggingHook {
    precision: RateLimit,
    large: RateLimit,
    large_threshold: Option<f64>,
}

impl LoggingHook {
    pub const fn new(interval: u64) -> Self {
        Self {
            precision: RateLimit::new(interval),
            large: RateLimit::new(interval),
            large_threshold: None,
        }
    }

    /// Also report single samples above `threshold`.
    pub fn with_large_sample_threshold(mut self, threshold: f64) -> Self {
        self.large_threshold = Some(threshold);
        self
    }

    /// Number of precision-risk events seen, including unlogged ones.
    pub fn precision_events(&self) -> u64 {
        self.precision.occurrences()
    }

    /// Number of large samples seen, including unlogged ones.
    pub fn large_sample_events(&self) -> u64 {
        self.large.occurrences()
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}

impl DiagnosticHook for LoggingHook {
    fn precision_risk(&self, warning: &PrecisionWarning) {
        if let Some(n) = self.precision.admit() {
            tracing::warn!(
                quantity = %warning.quantity,
                value = warning.value,
                occurrences = n,
                "running {} is particularly large, beware imprecision",
                warning.quantity
            );
        }
    }

    fn large_sample_threshold(&self) -> Option<f64> {
        self.large_threshold
    }

    fn large_sample(&self, value: f64) {
        if let Some(n) = self.large.admit() {
            tracing::warn!(
                value,
                threshold = self.large_threshold,
                occurrences = n,
                "large sample added to running statistics"
            );
        }
    }
}

static DEFAULT_HOOK: LoggingHook = LoggingHook::new(DEFAULT_REPORT_INTERVAL);

/// The process-wide hook used by accumulators with no hook attached.
pub fn default_hook() -> &'static LoggingHook {
    &DEFAULT_HOOK
}

/// Shared handle to a hook.
pub type SharedHook = Arc<dyn DiagnosticHook>;
