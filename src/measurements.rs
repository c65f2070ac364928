//! Derived measurements over classified detections.
//!
//! [`DerivedMeasurementManager`] builds a catalog of [`MeasurementBuilder`]s
//! from the classifications present among detections (counts, positive %,
//! H-score, Allred scores, densities) and evaluates them per object against
//! a cached [`ClassCounts`] snapshot.
//!
//! # Caching
//!
//! Snapshots are keyed by object identity and hold only a weak reference to
//! the object. The whole cache is dropped as soon as the hierarchy version
//! is seen to advance; entries never expire individually. The version
//! check, clear and insert happen under one lock, so no caller can observe
//! a snapshot from before a version advance another caller has already
//! seen. Formulas run on the returned `Arc` after the lock is released.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::classification::Classification;
use crate::config::{MeasurementConfig, ThresholdSource};
use crate::counts::{ClassCounter, ClassCounts, DescendantCounter};
use crate::geometry::ImageGeometry;
use crate::hierarchy::{Hierarchy, ObjectKind, PathObject};

/// What a builder measures, with the classification(s) it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeasurementKind {
    /// Detections with exactly this classification.
    ExactCount(Classification),
    /// Detections with this classification or one derived from it.
    BaseCount(Classification),
    PositivePercentage(Vec<Classification>),
    HScore(Vec<Classification>),
    AllredProportion(Vec<Classification>),
    AllredIntensity(Vec<Classification>),
    AllredScore(Vec<Classification>),
    /// Base-inclusive count per unit area of the governing region.
    Density(Classification),
}

impl MeasurementKind {
    pub fn is_density(&self) -> bool {
        matches!(self, MeasurementKind::Density(_))
    }

    /// The governing classification(s).
    pub fn classifications(&self) -> &[Classification] {
        match self {
            MeasurementKind::ExactCount(c)
            | MeasurementKind::BaseCount(c)
            | MeasurementKind::Density(c) => std::slice::from_ref(c),
            MeasurementKind::PositivePercentage(cs)
            | MeasurementKind::HScore(cs)
            | MeasurementKind::AllredProportion(cs)
            | MeasurementKind::AllredIntensity(cs)
            | MeasurementKind::AllredScore(cs) => cs,
        }
    }
}

/// Shared by every builder of one catalog.
struct MeasurementContext {
    geometry: ImageGeometry,
    threshold: Arc<dyn ThresholdSource>,
}

impl MeasurementContext {
    fn min_positive_percentage(&self) -> f64 {
        self.threshold.min_positive_percentage()
    }
}

impl fmt::Debug for MeasurementContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementContext")
            .field("geometry", &self.geometry)
            .field("min_positive_percentage", &self.min_positive_percentage())
            .finish()
    }
}

/// A named, side-effect-free measurement.
///
/// Names and help text read the current threshold, so they follow a
/// [`SharedThreshold`](crate::config::SharedThreshold) without a rebuild.
#[derive(Debug, Clone)]
pub struct MeasurementBuilder {
    kind: MeasurementKind,
    context: Arc<MeasurementContext>,
}

impl MeasurementBuilder {
    pub fn kind(&self) -> &MeasurementKind {
        &self.kind
    }

    pub fn name(&self) -> String {
        let min = self.context.min_positive_percentage();
        match &self.kind {
            MeasurementKind::ExactCount(c) => format!("Num {c}"),
            MeasurementKind::BaseCount(c) => format!("Num {c} (base)"),
            MeasurementKind::PositivePercentage(cs) => name_for_classes("Positive %", cs),
            MeasurementKind::HScore(cs) => name_for_classes("H-score", cs),
            MeasurementKind::AllredProportion(cs) => {
                name_for_classes(&with_min("Allred proportion", min), cs)
            }
            MeasurementKind::AllredIntensity(cs) => {
                name_for_classes(&with_min("Allred intensity", min), cs)
            }
            MeasurementKind::AllredScore(cs) => name_for_classes(&with_min("Allred score", min), cs),
            MeasurementKind::Density(c) => {
                format!("Num {c} per {}", self.context.geometry.area_unit().symbol())
            }
        }
    }

    pub fn help_text(&self) -> String {
        let min = self.context.min_positive_percentage();
        let min_note = if min > 0.0 {
            format!("\nSet to 0 if less than {min}% cells positive")
        } else {
            String::new()
        };
        match &self.kind {
            MeasurementKind::ExactCount(c) if c.is_none() => {
                "Number of detection objects with no classification".to_string()
            }
            MeasurementKind::ExactCount(c) => {
                format!("Number of detection objects with the exact classification '{c}'")
            }
            MeasurementKind::BaseCount(c) if c.is_none() => {
                "Number of detection objects with no base classification".to_string()
            }
            MeasurementKind::BaseCount(c) => format!(
                "Number of detection objects with the base classification '{c}' (including all sub-classifications)"
            ),
            MeasurementKind::PositivePercentage(cs) => match parent_label(cs).as_str() {
                "" => "Number of detections classified as 'Positive' / ('Positive' + 'Negative') * 100%"
                    .to_string(),
                pc => format!(
                    "Number of detections classified as '{pc}: Positive' / ('{pc}: Positive' + '{pc}: Negative') * 100%"
                ),
            },
            MeasurementKind::HScore(cs) => format!(
                "H-score calculated from {}Negative, 1+, 2+ and 3+ classified detections (range 0-300){min_note}",
                parent_prefix(cs)
            ),
            MeasurementKind::AllredProportion(cs) => format!(
                "Allred proportion score calculated from {}Negative, 1+, 2+ and 3+ classified detections (range 0-5){min_note}",
                parent_prefix(cs)
            ),
            MeasurementKind::AllredIntensity(cs) => format!(
                "Allred intensity score calculated from {}Negative, 1+, 2+ and 3+ classified detections (range 0-3){min_note}",
                parent_prefix(cs)
            ),
            MeasurementKind::AllredScore(_) => {
                format!("Sum of Allred proportion and intensity scores (range 0-8){min_note}")
            }
            MeasurementKind::Density(c) => format!(
                "Density of detections with classification '{c}' inside the selected objects (per {})",
                self.context.geometry.area_unit().symbol()
            ),
        }
    }

    /// Evaluates the formula for `object` given its snapshot.
    ///
    /// For densities `object` must already be the governing object (an
    /// annotation or the root); anything else, or a governing area that is
    /// not positive, yields NaN.
    pub fn compute(&self, object: &PathObject, counts: &ClassCounts) -> f64 {
        let min = self.context.min_positive_percentage();
        match &self.kind {
            MeasurementKind::ExactCount(c) => counts.direct_count(c) as f64,
            MeasurementKind::BaseCount(c) => counts.ancestor_inclusive_count(c) as f64,
            MeasurementKind::PositivePercentage(cs) => counts.positive_percentage(cs),
            MeasurementKind::HScore(cs) => counts.h_score(min, cs),
            MeasurementKind::AllredProportion(cs) => counts.allred_proportion(min, cs),
            MeasurementKind::AllredIntensity(cs) => counts.allred_intensity(min, cs),
            MeasurementKind::AllredScore(cs) => counts.allred_score(min, cs),
            MeasurementKind::Density(c) => {
                let area = self.governing_area(object);
                if area.is_nan() || area <= 0.0 {
                    return f64::NAN;
                }
                counts.ancestor_inclusive_count(c) as f64 / area
            }
        }
    }

    fn governing_area(&self, object: &PathObject) -> f64 {
        let geometry = &self.context.geometry;
        match object.kind() {
            ObjectKind::Annotation => match object.region() {
                Some(region) if region.is_area() => geometry.calibrated_area(region),
                _ => f64::NAN,
            },
            ObjectKind::Root if geometry.is_single_plane() => {
                geometry.calibrated_area(&geometry.full_extent())
            }
            _ => f64::NAN,
        }
    }
}

impl fmt::Display for MeasurementBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn with_min(name: &str, min: f64) -> String {
    if min > 0.0 {
        format!("{name} (min {min:.1}%)")
    } else {
        name.to_string()
    }
}

/// `"Tumor"`, `"(Stroma|Tumor)"`, or `""` for none / the sentinel alone.
fn parent_label(classes: &[Classification]) -> String {
    match classes {
        [] => String::new(),
        [only] => only.to_string(),
        many => {
            let parts: Vec<String> = many
                .iter()
                .map(|c| {
                    if c.is_none() {
                        "<Unclassified>".to_string()
                    } else {
                        c.to_string()
                    }
                })
                .collect();
            format!("({})", parts.join("|"))
        }
    }
}

fn parent_prefix(classes: &[Classification]) -> String {
    match parent_label(classes) {
        label if label.is_empty() => String::new(),
        label => format!("{label}: "),
    }
}

/// `"Tumor: H-score"`, `"Stroma + Tumor: Positive %"`, or the bare name for
/// the sentinel alone.
fn name_for_classes(measurement: &str, classes: &[Classification]) -> String {
    match classes {
        [] => measurement.to_string(),
        [only] if only.is_none() => measurement.to_string(),
        [only] => format!("{only}: {measurement}"),
        many => {
            let mut sorted = many.to_vec();
            sorted.sort();
            let names: Vec<String> = sorted
                .iter()
                .map(|c| {
                    if c.is_none() {
                        "Unclassified".to_string()
                    } else {
                        c.to_string()
                    }
                })
                .collect();
            format!("{}: {measurement}", names.join(" + "))
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    object: Weak<PathObject>,
    counts: Arc<ClassCounts>,
}

/// Object-identity keyed snapshots, valid for `last_version`.
///
/// Each entry's `Weak` keeps the allocation (and so the key address) from
/// being reused while the entry exists.
struct SnapshotCache {
    last_version: u64,
    entries: HashMap<usize, CacheEntry>,
    purge_at: usize,
}

const MIN_PURGE_AT: usize = 64;

impl SnapshotCache {
    fn new(version: u64) -> Self {
        Self {
            last_version: version,
            entries: HashMap::new(),
            purge_at: MIN_PURGE_AT,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.purge_at = MIN_PURGE_AT;
    }

    fn get(&self, object: &Arc<PathObject>) -> Option<Arc<ClassCounts>> {
        let entry = self.entries.get(&key(object))?;
        let cached = entry.object.upgrade()?;
        Arc::ptr_eq(&cached, object).then(|| entry.counts.clone())
    }

    fn insert(&mut self, object: &Arc<PathObject>, counts: Arc<ClassCounts>) {
        if self.entries.len() >= self.purge_at {
            self.entries.retain(|_, e| e.object.strong_count() > 0);
            self.purge_at = (self.entries.len() * 2).max(MIN_PURGE_AT);
        }
        self.entries.insert(
            key(object),
            CacheEntry {
                object: Arc::downgrade(object),
                counts,
            },
        );
    }

    fn live_entries(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.object.strong_count() > 0)
            .count()
    }
}

fn key(object: &Arc<PathObject>) -> usize {
    Arc::as_ptr(object) as usize
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Whether the catalog reflects the current taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    Built,
    /// A rebuild was requested, e.g. because classifications changed.
    Stale,
}

/// Catalog of derived measurements plus the snapshot cache behind them.
///
/// Evaluation (`value`, `values`, `counts`) takes `&self` and is safe from
/// several threads at once. Rebuilding the catalog takes `&mut self`.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use u_measure::config::MeasurementConfig;
/// use u_measure::geometry::{ImageGeometry, Region};
/// use u_measure::hierarchy::{Hierarchy, ObjectHierarchy, PathObject};
/// use u_measure::measurements::DerivedMeasurementManager;
///
/// let hierarchy = Arc::new(ObjectHierarchy::new());
/// let annotation = hierarchy.add_object(
///     &hierarchy.root(),
///     PathObject::annotation(Region::rectangle(0.0, 0.0, 100.0, 100.0)),
/// );
/// for _ in 0..3 {
///     hierarchy.add_object(&annotation, PathObject::detection("Tumor: Positive"));
/// }
/// hierarchy.add_object(&annotation, PathObject::detection("Tumor: Negative"));
///
/// let manager = DerivedMeasurementManager::new(
///     hierarchy.clone(),
///     ImageGeometry::new(1000, 1000),
///     &MeasurementConfig::default(),
/// );
/// let positive = manager.builder_named("Tumor: Positive %").unwrap();
/// assert_eq!(manager.value(positive, &annotation), 75.0);
/// ```
pub struct DerivedMeasurementManager {
    hierarchy: Arc<dyn Hierarchy>,
    counter: Arc<dyn ClassCounter>,
    context: Arc<MeasurementContext>,
    include_density: bool,
    builders: Vec<MeasurementBuilder>,
    state: CatalogState,
    cache: Mutex<SnapshotCache>,
}

impl DerivedMeasurementManager {
    /// Creates a manager counting descendants and reading the threshold
    /// from `config`, then builds the catalog from the hierarchy.
    pub fn new(
        hierarchy: Arc<dyn Hierarchy>,
        geometry: ImageGeometry,
        config: &MeasurementConfig,
    ) -> Self {
        Self::with_sources(
            hierarchy,
            geometry,
            Arc::new(config.clone()),
            Arc::new(DescendantCounter),
            config.include_density,
        )
    }

    /// Creates a manager with explicit collaborators, then builds the
    /// catalog from the hierarchy.
    pub fn with_sources(
        hierarchy: Arc<dyn Hierarchy>,
        geometry: ImageGeometry,
        threshold: Arc<dyn ThresholdSource>,
        counter: Arc<dyn ClassCounter>,
        include_density: bool,
    ) -> Self {
        let version = hierarchy.version();
        let mut manager = Self {
            hierarchy,
            counter,
            context: Arc::new(MeasurementContext {
                geometry,
                threshold,
            }),
            include_density,
            builders: Vec::new(),
            state: CatalogState::Stale,
            cache: Mutex::new(SnapshotCache::new(version)),
        };
        manager.refresh();
        manager
    }

    pub fn state(&self) -> CatalogState {
        self.state
    }

    /// Flags the catalog for rebuilding. Evaluation keeps working with the
    /// existing builders until [`refresh`](Self::refresh) or
    /// [`rebuild_catalog`](Self::rebuild_catalog) runs.
    pub fn mark_stale(&mut self) {
        self.state = CatalogState::Stale;
    }

    /// Rebuilds from the classifications currently found on detections.
    pub fn refresh(&mut self) {
        let taxonomy = self
            .hierarchy
            .represented_classifications(ObjectKind::Detection);
        let include_density = self.include_density;
        self.rebuild_catalog(taxonomy, include_density);
    }

    /// Clears the cache and rebuilds the catalog from `taxonomy`.
    ///
    /// Catalog order:
    /// 1. positive % per positive/negative parent, then combined;
    /// 2. exact and base-inclusive counts per classification;
    /// 3. H-score and Allred scores per intensity parent, then combined;
    /// 4. densities for top-level `Positive` classifications.
    pub fn rebuild_catalog<I>(&mut self, taxonomy: I, include_density: bool)
    where
        I: IntoIterator<Item = Classification>,
    {
        self.cache.lock().clear();
        self.builders.clear();
        self.include_density = include_density;

        let classes: BTreeSet<Classification> =
            taxonomy.into_iter().filter(|c| !c.is_none()).collect();

        let mut intensity_parents = BTreeSet::new();
        let mut positive_negative_parents = BTreeSet::new();
        for class in &classes {
            if class.is_graded_intensity() {
                intensity_parents.insert(class.parent());
                positive_negative_parents.insert(class.parent());
            } else if class.is_positive() || class.is_negative() {
                positive_negative_parents.insert(class.parent());
            }
        }

        for parent in &positive_negative_parents {
            self.push(MeasurementKind::PositivePercentage(vec![parent.clone()]));
        }
        if positive_negative_parents.len() > 1 {
            let all: Vec<Classification> = positive_negative_parents.iter().cloned().collect();
            self.push(MeasurementKind::PositivePercentage(all));
        }

        for class in &classes {
            self.push(MeasurementKind::ExactCount(class.clone()));
            self.push(MeasurementKind::BaseCount(class.clone()));
        }

        for parent in &intensity_parents {
            self.push_intensity_scores(vec![parent.clone()]);
        }
        if intensity_parents.len() > 1 {
            self.push_intensity_scores(intensity_parents.iter().cloned().collect());
        }

        if include_density {
            for class in &classes {
                if class.is_positive() && class.base() == *class {
                    self.push(MeasurementKind::Density(class.clone()));
                }
            }
        }

        self.state = CatalogState::Built;
        tracing::debug!(
            builders = self.builders.len(),
            classifications = classes.len(),
            "rebuilt derived measurement catalog"
        );
    }

    fn push(&mut self, kind: MeasurementKind) {
        self.builders.push(MeasurementBuilder {
            kind,
            context: self.context.clone(),
        });
    }

    fn push_intensity_scores(&mut self, parents: Vec<Classification>) {
        self.push(MeasurementKind::HScore(parents.clone()));
        self.push(MeasurementKind::AllredProportion(parents.clone()));
        self.push(MeasurementKind::AllredIntensity(parents.clone()));
        self.push(MeasurementKind::AllredScore(parents));
    }

    /// The catalog, in display order.
    pub fn measurement_builders(&self) -> &[MeasurementBuilder] {
        &self.builders
    }

    pub fn builder_named(&self, name: &str) -> Option<&MeasurementBuilder> {
        self.builders.iter().find(|b| b.name() == name)
    }

    /// The snapshot for `object`, computed on first use per hierarchy
    /// version.
    pub fn counts(&self, object: &Arc<PathObject>) -> Arc<ClassCounts> {
        let mut cache = self.cache.lock();
        let version = self.hierarchy.version();
        if version > cache.last_version {
            tracing::debug!(
                previous = cache.last_version,
                current = version,
                evicted = cache.entries.len(),
                "clearing cached measurements"
            );
            cache.clear();
            cache.last_version = version;
        }
        if let Some(counts) = cache.get(object) {
            return counts;
        }
        let counts = Arc::new(self.counter.count(object));
        cache.insert(object, counts.clone());
        counts
    }

    /// Evaluates `builder` for `object`; NaN when not applicable.
    ///
    /// Densities resolve the governing object first: a TMA core with
    /// exactly one child defers to that child, any other TMA core is NaN,
    /// and only annotations and the root have an area.
    pub fn value(&self, builder: &MeasurementBuilder, object: &Arc<PathObject>) -> f64 {
        if !builder.kind().is_density() {
            return builder.compute(object, &self.counts(object));
        }
        match governing_object(object) {
            Some(target) => builder.compute(&target, &self.counts(&target)),
            None => f64::NAN,
        }
    }

    /// Every catalog measurement for `object`, in catalog order.
    pub fn values<'a>(&'a self, object: &Arc<PathObject>) -> Vec<(&'a MeasurementBuilder, f64)> {
        self.builders
            .iter()
            .map(|b| (b, self.value(b, object)))
            .collect()
    }

    /// Snapshots currently cached for live objects.
    pub fn cached_snapshot_count(&self) -> usize {
        self.cache.lock().live_entries()
    }
}

/// The object whose area a density is measured over, if any.
fn governing_object(object: &Arc<PathObject>) -> Option<Arc<PathObject>> {
    let mut target = object.clone();
    while target.is_tma_core() {
        let mut children = target.children();
        if children.len() != 1 {
            return None;
        }
        target = children.pop()?;
    }
    (target.is_annotation() || target.is_root()).then_some(target)
}

impl fmt::Debug for DerivedMeasurementManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedMeasurementManager")
            .field("state", &self.state)
            .field("builders", &self.builders.len())
            .field("include_density", &self.include_density)
            .field("context", &self.context)
            .finish()
    }
}
