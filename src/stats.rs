//! Streaming descriptive statistics with numerical stability guarantees.
//!
//! [`RunningStatistics`] accumulates count, sum, extrema, mean and sample
//! variance over a stream of `f64` samples in a single pass with O(1)
//! memory. NaN samples are tolerated: they are counted separately and
//! otherwise ignored.
//!
//! # Algorithms
//!
//! - **Sum / Mean**: plain running sum; `mean = sum / count`, identical to the
//!   two-pass reference.
//! - **Variance/StdDev**: Welford's online algorithm.
//!   Reference: Welford (1962), "Note on a Method for Calculating
//!   Corrected Sums of Squares and Products", *Technometrics* 4(3).
//! - **Merge**: Chan, Golub & LeVeque (1979), "Updating Formulae and a
//!   Pairwise Algorithm for Computing Sample Variances".
//!
//! # Precision
//!
//! The running sum is held in an `f64`. Once its magnitude passes 2⁵³ − 1,
//! low-order bits of further samples are lost. Getters report this through
//! the attached [`DiagnosticHook`](crate::diagnostics::DiagnosticHook) but
//! still return the computed value.

use std::fmt;

use crate::diagnostics::{default_hook, DiagnosticHook, PrecisionQuantity, PrecisionWarning, SharedHook};

// ---------------------------------------------------------------------------
// Running accumulator
// ---------------------------------------------------------------------------

/// Online accumulator of count, sum, min, max, mean and sample variance.
///
/// Not thread-safe by contract: callers serialize [`add_value`]. Use
/// [`merge`] to combine per-thread accumulators.
///
/// # Examples
/// ```
/// use u_measure::stats::RunningStatistics;
/// let mut stats = RunningStatistics::new();
/// stats.add_value(1.0);
/// stats.add_value(f64::NAN);
/// stats.add_value(3.0);
/// assert_eq!(stats.count(), 2);
/// assert_eq!(stats.nan_count(), 1);
/// assert_eq!(stats.mean(), 2.0);
/// assert_eq!(stats.range(), 2.0);
/// ```
///
/// [`add_value`]: RunningStatistics::add_value
/// [`merge`]: RunningStatistics::merge
#[derive(Debug, Clone)]
pub struct RunningStatistics {
    count: u64,
    nan_count: u64,
    sum: f64,
    min: f64,
    max: f64,
    mean_acc: f64,
    m2: f64,
    hook: Option<SharedHook>,
    large_sample_threshold: f64,
}

impl RunningStatistics {
    /// Creates an empty accumulator reporting to the process-wide logging hook.
    pub fn new() -> Self {
        Self {
            count: 0,
            nan_count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean_acc: 0.0,
            m2: 0.0,
            hook: None,
            large_sample_threshold: f64::INFINITY,
        }
    }

    /// Creates an empty accumulator reporting to `hook`.
    pub fn with_hook(hook: SharedHook) -> Self {
        let mut stats = Self::new();
        stats.set_hook(hook);
        stats
    }

    /// Replaces the diagnostic hook. Accumulated state is untouched.
    pub fn set_hook(&mut self, hook: SharedHook) {
        self.large_sample_threshold = hook.large_sample_threshold().unwrap_or(f64::INFINITY);
        self.hook = Some(hook);
    }

    fn hook(&self) -> &dyn DiagnosticHook {
        match &self.hook {
            Some(hook) => hook.as_ref(),
            None => default_hook(),
        }
    }

    /// Feeds a new sample into the accumulator.
    ///
    /// NaN increments [`nan_count`](Self::nan_count) and leaves every other
    /// accumulator unchanged.
    ///
    /// # Algorithm
    /// ```text
    /// delta = x − mean
    /// mean += delta / count
    /// M₂   += delta × (x − mean)
    /// ```
    pub fn add_value(&mut self, value: f64) {
        if value > self.large_sample_threshold {
            self.hook().large_sample(value);
        }
        if value.is_nan() {
            self.nan_count += 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        if self.count == 1 {
            self.mean_acc = value;
            return;
        }
        let delta = value - self.mean_acc;
        self.mean_acc += delta / self.count as f64;
        self.m2 += delta * (value - self.mean_acc);
    }

    /// Number of non-NaN samples added.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of NaN samples added.
    pub fn nan_count(&self) -> u64 {
        self.nan_count
    }

    /// Sum of all non-NaN samples.
    pub fn sum(&self) -> f64 {
        if let Some(warning) = PrecisionWarning::check(PrecisionQuantity::Sum, self.sum) {
            self.hook().precision_risk(&warning);
        }
        self.sum
    }

    /// `sum / count`, or NaN if no samples have been added.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum() / self.count as f64
        }
    }

    /// Sample variance (n − 1 denominator), or NaN if fewer than 2 samples
    /// have been added.
    pub fn variance(&self) -> f64 {
        if let Some(warning) =
            PrecisionWarning::check(PrecisionQuantity::SumSquaredDeviations, self.m2)
        {
            self.hook().precision_risk(&warning);
        }
        if self.count <= 1 {
            f64::NAN
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Sample standard deviation; NaN whenever [`variance`](Self::variance) is.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest non-NaN sample, or NaN if none.
    pub fn min(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.min
        }
    }

    /// Largest non-NaN sample, or NaN if none.
    pub fn max(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.max
        }
    }

    /// `max − min`, or NaN if no samples have been added.
    pub fn range(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.max - self.min
        }
    }

    /// Merges another accumulator into this one (parallel-friendly).
    ///
    /// The hook of `self` is kept. Variance terms combine with Chan's
    /// pairwise update, so the result matches feeding both streams into one
    /// accumulator up to rounding.
    pub fn merge(&mut self, other: &RunningStatistics) {
        self.nan_count += other.nan_count;
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.count = other.count;
            self.sum = other.sum;
            self.min = other.min;
            self.max = other.max;
            self.mean_acc = other.mean_acc;
            self.m2 = other.m2;
            return;
        }
        let na = self.count as f64;
        let nb = other.count as f64;
        let total = self.count + other.count;
        let n = total as f64;
        let delta = other.mean_acc - self.mean_acc;

        self.mean_acc += delta * (nb / n);
        self.m2 += other.m2 + delta * delta * na * nb / n;
        self.count = total;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl Default for RunningStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<f64> for RunningStatistics {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for value in iter {
            self.add_value(value);
        }
    }
}

impl FromIterator<f64> for RunningStatistics {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::new();
        stats.extend(iter);
        stats
    }
}

impl fmt::Display for RunningStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RunningStatistics Mean: {:.2}, Std.dev: {:.2}, Min: {:.2}, Max: {:.2}",
            self.mean(),
            self.std_dev(),
            self.min(),
            self.max()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::PrecisionWarning;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct RecordingHook {
        warnings: Mutex<Vec<PrecisionWarning>>,
        large: Mutex<Vec<f64>>,
        threshold: Option<f64>,
    }

    impl DiagnosticHook for RecordingHook {
        fn precision_risk(&self, warning: &PrecisionWarning) {
            self.warnings.lock().push(*warning);
        }

        fn large_sample_threshold(&self) -> Option<f64> {
            self.threshold
        }

        fn large_sample(&self, value: f64) {
            self.large.lock().push(value);
        }
    }

    // --- empty / single ---

    #[test]
    fn test_empty() {
        let stats = RunningStatistics::new();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.nan_count(), 0);
        assert_eq!(stats.sum(), 0.0);
        assert!(stats.mean().is_nan());
        assert!(stats.variance().is_nan());
        assert!(stats.std_dev().is_nan());
        assert!(stats.min().is_nan());
        assert!(stats.max().is_nan());
        assert!(stats.range().is_nan());
    }

    #[test]
    fn test_single_value() {
        let mut stats = RunningStatistics::new();
        stats.add_value(5.0);
        assert_eq!(stats.mean(), 5.0);
        assert!(stats.variance().is_nan());
        assert!(stats.std_dev().is_nan());
        assert_eq!(stats.min(), 5.0);
        assert_eq!(stats.max(), 5.0);
        assert_eq!(stats.range(), 0.0);
    }

    // --- NaN handling ---

    #[test]
    fn test_nan_is_counted_not_accumulated() {
        let mut stats = RunningStatistics::new();
        stats.add_value(1.0);
        stats.add_value(f64::NAN);
        stats.add_value(3.0);
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.nan_count(), 1);
        assert_eq!(stats.mean(), 2.0);
        assert_eq!(stats.min(), 1.0);
        assert_eq!(stats.max(), 3.0);
        assert!((stats.variance() - 2.0).abs() < 1e-15);
    }

    #[test]
    fn test_only_nans() {
        let stats: RunningStatistics = [f64::NAN, f64::NAN].into_iter().collect();
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.nan_count(), 2);
        assert!(stats.mean().is_nan());
    }

    // --- known values ---

    #[test]
    fn test_known_variance() {
        let stats: RunningStatistics =
            [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().collect();
        assert_eq!(stats.mean(), 5.0);
        assert!((stats.variance() - 4.571428571428571).abs() < 1e-10);
        assert!((stats.std_dev() - 2.138089935299395).abs() < 1e-10);
        assert_eq!(stats.range(), 7.0);
    }

    #[test]
    fn test_negative_values_extrema() {
        let stats: RunningStatistics = [-3.0, -7.5, -1.0].into_iter().collect();
        assert_eq!(stats.min(), -7.5);
        assert_eq!(stats.max(), -1.0);
        assert_eq!(stats.range(), 6.5);
    }

    #[test]
    fn test_variance_large_offset() {
        // Naive E[X²] − E[X]² would cancel catastrophically here.
        let stats: RunningStatistics = (1..=5).map(|i| 1e9 + i as f64).collect();
        assert!(
            (stats.variance() - 2.5).abs() < 1e-5,
            "got {}",
            stats.variance()
        );
    }

    #[test]
    fn test_display() {
        let stats: RunningStatistics = [1.0, 3.0].into_iter().collect();
        assert_eq!(
            stats.to_string(),
            "RunningStatistics Mean: 2.00, Std.dev: 1.41, Min: 1.00, Max: 3.00"
        );
    }

    // --- merge ---

    #[test]
    fn test_merge_matches_sequential() {
        let a = [1.0, 2.0, f64::NAN, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut left: RunningStatistics = a.into_iter().collect();
        let right: RunningStatistics = b.into_iter().collect();
        let all: RunningStatistics = a.into_iter().chain(b).collect();
        left.merge(&right);
        assert_eq!(left.count(), all.count());
        assert_eq!(left.nan_count(), 1);
        assert_eq!(left.sum(), all.sum());
        assert_eq!(left.min(), 1.0);
        assert_eq!(left.max(), 8.0);
        assert!((left.variance() - all.variance()).abs() < 1e-12);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut empty = RunningStatistics::new();
        let other: RunningStatistics = [4.0, 6.0].into_iter().collect();
        empty.merge(&other);
        assert_eq!(empty.mean(), 5.0);
        assert_eq!(empty.variance(), 2.0);
    }

    // --- diagnostics ---

    #[test]
    fn test_precision_warning_does_not_alter_sum() {
        let hook = Arc::new(RecordingHook::default());
        let mut stats = RunningStatistics::with_hook(hook.clone());
        stats.add_value(1e16);
        stats.add_value(1e16);
        assert_eq!(stats.sum(), 2e16);
        assert_eq!(stats.mean(), 1e16);
        let warnings = hook.warnings.lock();
        assert_eq!(warnings.len(), 2);
        assert!(warnings
            .iter()
            .all(|w| w.quantity == PrecisionQuantity::Sum && w.value == 2e16));
    }

    #[test]
    fn test_precision_warning_on_squared_deviations() {
        let hook = Arc::new(RecordingHook::default());
        let mut stats = RunningStatistics::with_hook(hook.clone());
        stats.add_value(0.0);
        stats.add_value(1e9);
        let var = stats.variance();
        assert_eq!(var, 5e17);
        assert!(hook
            .warnings
            .lock()
            .iter()
            .any(|w| w.quantity == PrecisionQuantity::SumSquaredDeviations));
    }

    #[test]
    fn test_large_sample_hook_opt_in() {
        let hook = Arc::new(RecordingHook {
            threshold: Some(60000.0),
            ..Default::default()
        });
        let mut stats = RunningStatistics::with_hook(hook.clone());
        stats.extend([10.0, 70000.0, f64::NAN, 60000.0, 1e6]);
        assert_eq!(*hook.large.lock(), vec![70000.0, 1e6]);
        assert_eq!(stats.count(), 4);
    }

    #[test]
    fn test_no_large_sample_reports_without_threshold() {
        let hook = Arc::new(RecordingHook::default());
        let mut stats = RunningStatistics::with_hook(hook.clone());
        stats.add_value(1e12);
        assert!(hook.large.lock().is_empty());
    }
}
