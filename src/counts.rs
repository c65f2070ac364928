//! Per-object classification counts and the scores derived from them.
//!
//! A [`ClassCounts`] snapshot records how many detections below one object
//! carry each exact classification. Ancestor-inclusive counts are derived
//! from those direct counts on query, so
//! `ancestor_inclusive_count(C) == direct_count(C) + Σ direct_count(D)` over
//! every `D` derived from `C` holds by construction.
//!
//! # Scores
//!
//! All score functions take one or more *base* classifications and consider
//! detections whose classification is a direct child of any of them, such
//! as `Tumor: Positive` or `Tumor: 2+` for `Tumor`:
//!
//! - **Positive %**: `100 × pos / (pos + neg)`, where `pos` counts
//!   `Positive`, `1+`, `2+` and `3+`.
//! - **H-score**: `100 × (n₁ + 2n₂ + 3n₃) / (n₁ + n₂ + n₃ + neg)`, range 0–300.
//! - **Allred proportion** (0–5), **intensity** (0–3) and their sum (0–8).
//!   Reference: Allred et al. (1998), "Prognostic and predictive factors in
//!   breast cancer by immunohistochemical analysis", *Mod Pathol* 11(2).
//!
//! Every score is NaN when no positive or negative detections exist. H-score
//! and Allred scores are forced to 0 when the positive percentage is below
//! the configured minimum.

use std::collections::HashMap;

use crate::classification::Classification;
use crate::hierarchy::PathObject;

/// Immutable snapshot of detection counts per classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts {
    counts: HashMap<Classification, u64>,
    total: u64,
}

impl ClassCounts {
    /// Tallies one detection per item.
    pub fn from_classifications<I>(classifications: I) -> Self
    where
        I: IntoIterator<Item = Classification>,
    {
        let mut snapshot = Self::default();
        for classification in classifications {
            *snapshot.counts.entry(classification).or_insert(0) += 1;
            snapshot.total += 1;
        }
        snapshot
    }

    /// Number of detections counted.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Detections with exactly `classification`.
    pub fn direct_count(&self, classification: &Classification) -> u64 {
        self.counts.get(classification).copied().unwrap_or(0)
    }

    /// Detections with `classification` or any classification derived from it.
    ///
    /// For the sentinel this counts unclassified detections and all
    /// top-level classifications, i.e. everything with no parent.
    pub fn ancestor_inclusive_count(&self, classification: &Classification) -> u64 {
        self.count_under(std::slice::from_ref(classification), |_| true)
    }

    /// Classifications present in the snapshot, in sorted order.
    pub fn classifications(&self) -> Vec<Classification> {
        let mut classes: Vec<Classification> = self.counts.keys().cloned().collect();
        classes.sort();
        classes
    }

    fn count_under<P>(&self, bases: &[Classification], predicate: P) -> u64
    where
        P: Fn(&Classification) -> bool,
    {
        self.counts
            .iter()
            .filter(|(class, _)| predicate(class) && bases.iter().any(|b| is_under(b, class)))
            .map(|(_, n)| *n)
            .sum()
    }

    /// Negative / positive / graded tallies whose parent is one of `bases`.
    ///
    /// Only direct children count: `Tumor: Sub: Positive` is tallied for
    /// `Tumor: Sub`, not for `Tumor`.
    pub fn intensity_counts(&self, bases: &[Classification]) -> IntensityCounts {
        let mut tally = IntensityCounts::default();
        for (class, &n) in &self.counts {
            if !bases.iter().any(|b| is_tallied_under(b, class)) {
                continue;
            }
            match class.intensity_grade() {
                Some(1) => tally.one_plus += n,
                Some(2) => tally.two_plus += n,
                Some(3) => tally.three_plus += n,
                _ if class.is_positive() => tally.positive += n,
                _ if class.is_negative() => tally.negative += n,
                _ => {}
            }
        }
        tally
    }

    pub fn positive_percentage(&self, bases: &[Classification]) -> f64 {
        self.intensity_counts(bases).positive_percentage()
    }

    pub fn h_score(&self, min_positive_percentage: f64, bases: &[Classification]) -> f64 {
        self.intensity_counts(bases).h_score(min_positive_percentage)
    }

    pub fn allred_proportion(&self, min_positive_percentage: f64, bases: &[Classification]) -> f64 {
        self.intensity_counts(bases)
            .allred_proportion(min_positive_percentage)
    }

    pub fn allred_intensity(&self, min_positive_percentage: f64, bases: &[Classification]) -> f64 {
        self.intensity_counts(bases)
            .allred_intensity(min_positive_percentage)
    }

    pub fn allred_score(&self, min_positive_percentage: f64, bases: &[Classification]) -> f64 {
        self.intensity_counts(bases).allred_score(min_positive_percentage)
    }
}

/// `class` is counted under `base`. The sentinel base stands for
/// "no parent", so it covers unclassified and top-level classifications.
fn is_under(base: &Classification, class: &Classification) -> bool {
    if base.is_none() {
        class.depth() <= 1
    } else {
        base.is_ancestor_of(class)
    }
}

/// `class` is a direct child of `base`; top-level classes for the sentinel.
fn is_tallied_under(base: &Classification, class: &Classification) -> bool {
    !class.is_none() && class.parent() == *base
}

/// Tallies feeding the positive %, H-score and Allred formulas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntensityCounts {
    pub negative: u64,
    /// Plain `Positive`, i.e. positive without a grade.
    pub positive: u64,
    pub one_plus: u64,
    pub two_plus: u64,
    pub three_plus: u64,
}

impl IntensityCounts {
    pub fn graded(&self) -> u64 {
        self.one_plus + self.two_plus + self.three_plus
    }

    /// Plain and graded positives.
    pub fn all_positive(&self) -> u64 {
        self.positive + self.graded()
    }

    /// Fraction of positives among positives + negatives; NaN if both are 0.
    pub fn positive_fraction(&self) -> f64 {
        let denominator = self.all_positive() + self.negative;
        if denominator == 0 {
            return f64::NAN;
        }
        self.all_positive() as f64 / denominator as f64
    }

    pub fn positive_percentage(&self) -> f64 {
        self.positive_fraction() * 100.0
    }

    pub fn h_score(&self, min_positive_percentage: f64) -> f64 {
        let graded = self.graded();
        let denominator = graded + self.negative;
        if denominator == 0 {
            return f64::NAN;
        }
        let denominator = denominator as f64;
        if graded as f64 * 100.0 / denominator < min_positive_percentage {
            return 0.0;
        }
        let weighted = self.one_plus + 2 * self.two_plus + 3 * self.three_plus;
        weighted as f64 * 100.0 / denominator
    }

    /// Allred proportion score:
    ///
    /// | positive fraction | score |
    /// |-------------------|-------|
    /// | 0                 | 0     |
    /// | (0, 1/100)        | 1     |
    /// | [1/100, 1/10)     | 2     |
    /// | [1/10, 1/3)       | 3     |
    /// | [1/3, 2/3)        | 4     |
    /// | ≥ 2/3             | 5     |
    pub fn allred_proportion(&self, min_positive_percentage: f64) -> f64 {
        let p = self.positive_fraction();
        if p.is_nan() {
            return f64::NAN;
        }
        if p * 100.0 < min_positive_percentage {
            return 0.0;
        }
        let score = if p >= 2.0 / 3.0 {
            5
        } else if p >= 1.0 / 3.0 {
            4
        } else if p >= 0.1 {
            3
        } else if p >= 0.01 {
            2
        } else if p > 0.0 {
            1
        } else {
            0
        };
        score as f64
    }

    /// Allred intensity score from the mean grade of graded positives:
    /// 1 up to 5/3, 2 up to 7/3, 3 above. 0 when the proportion score is 0
    /// or no graded detections exist.
    pub fn allred_intensity(&self, min_positive_percentage: f64) -> f64 {
        let proportion = self.allred_proportion(min_positive_percentage);
        if proportion.is_nan() {
            return f64::NAN;
        }
        let graded = self.graded();
        if proportion == 0.0 || graded == 0 {
            return 0.0;
        }
        let mean_grade =
            (self.one_plus + 2 * self.two_plus + 3 * self.three_plus) as f64 / graded as f64;
        if mean_grade > 7.0 / 3.0 {
            3.0
        } else if mean_grade > 5.0 / 3.0 {
            2.0
        } else {
            1.0
        }
    }

    pub fn allred_score(&self, min_positive_percentage: f64) -> f64 {
        self.allred_proportion(min_positive_percentage)
            + self.allred_intensity(min_positive_percentage)
    }
}

// ---------------------------------------------------------------------------
// Counting
// ---------------------------------------------------------------------------

/// Produces the counts snapshot for one object.
pub trait ClassCounter: Send + Sync {
    fn count(&self, object: &PathObject) -> ClassCounts;
}

/// Counts every detection descending from the object (not the object
/// itself).
#[derive(Debug, Clone, Copy, Default)]
pub struct DescendantCounter;

impl ClassCounter for DescendantCounter {
    fn count(&self, object: &PathObject) -> ClassCounts {
        let mut classes = Vec::new();
        object.for_each_descendant(&mut |child: &std::sync::Arc<PathObject>| {
            if child.is_detection() {
                classes.push(child.classification());
            }
        });
        ClassCounts::from_classifications(classes)
    }
}

impl<F> ClassCounter for F
where
    F: Fn(&PathObject) -> ClassCounts + Send + Sync,
{
    fn count(&self, object: &PathObject) -> ClassCounts {
        self(object)
    }
}
