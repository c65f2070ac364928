//! # u-measure
//!
//! Derived measurements over classified object hierarchies.
//!
//! This crate turns a hierarchy of annotations, TMA cores and classified
//! detections into per-object measurements: class counts, positive
//! percentages, H-scores, Allred scores and densities. It also provides a
//! streaming accumulator for descriptive statistics.
//!
//! ## Modules
//!
//! - [`stats`]: Welford running statistics, NaN-tolerant
//! - [`diagnostics`]: Rate-limited precision and large-sample reporting
//! - [`classification`]: Hierarchical classification labels
//! - [`geometry`]: Regions, image extent and pixel calibration
//! - [`hierarchy`]: Object tree and its version counter
//! - [`counts`]: Classification-count snapshots and scoring formulas
//! - [`measurements`]: Measurement catalog and cached evaluation
//! - [`config`]: TOML configuration and threshold sources
//! - [`labels`]: Display state for object lists
//!
//! ## Design Philosophy
//!
//! - **NaN, not errors**: inapplicable measurements evaluate to NaN
//! - **Version-gated caching**: snapshots are dropped wholesale when the
//!   hierarchy changes
//! - **Property-based testing**: formula ranges and count invariants
//!   verified via proptest

pub mod classification;
pub mod config;
pub mod counts;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod hierarchy;
pub mod labels;
pub mod measurements;
pub mod stats;

pub use classification::Classification;
pub use config::{MeasurementConfig, SharedThreshold, ThresholdSource};
pub use counts::{ClassCounter, ClassCounts, DescendantCounter};
pub use error::{Error, Result};
pub use hierarchy::{Hierarchy, ObjectHierarchy, ObjectKind, PathObject};
pub use measurements::{DerivedMeasurementManager, MeasurementBuilder, MeasurementKind};
pub use stats::RunningStatistics;
