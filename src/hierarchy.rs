//! Object hierarchy seen by the measurement layer.
//!
//! [`Hierarchy`] is the narrow interface the measurement manager consumes:
//! a monotonically non-decreasing version counter, a root object, and the
//! set of classifications in use. [`ObjectHierarchy`] is an in-memory
//! implementation whose mutators advance the version on every structural or
//! classification change.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::classification::Classification;
use crate::geometry::Region;

/// What an object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Root,
    Annotation,
    Detection,
    TmaCore,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Root => "Image",
            ObjectKind::Annotation => "Annotation",
            ObjectKind::Detection => "Detection",
            ObjectKind::TmaCore => "TMA core",
        };
        f.write_str(s)
    }
}

/// A node in the object hierarchy.
///
/// Objects are shared as `Arc<PathObject>`; identity is the allocation, not
/// the content. Classification and children are changed through
/// [`ObjectHierarchy`] so the version counter stays in step.
pub struct PathObject {
    kind: ObjectKind,
    region: Option<Region>,
    name: RwLock<Option<String>>,
    description: RwLock<Option<String>>,
    locked: AtomicBool,
    metadata: RwLock<BTreeMap<String, String>>,
    classification: RwLock<Classification>,
    children: RwLock<Vec<Arc<PathObject>>>,
}

impl PathObject {
    pub fn new(kind: ObjectKind) -> Self {
        Self {
            kind,
            region: None,
            name: RwLock::new(None),
            description: RwLock::new(None),
            locked: AtomicBool::new(false),
            metadata: RwLock::new(BTreeMap::new()),
            classification: RwLock::new(Classification::none()),
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn annotation(region: Region) -> Self {
        Self::new(ObjectKind::Annotation).with_region(region)
    }

    pub fn detection(classification: impl Into<Classification>) -> Self {
        Self::new(ObjectKind::Detection).with_classification(classification)
    }

    pub fn tma_core(region: Region) -> Self {
        Self::new(ObjectKind::TmaCore).with_region(region)
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_classification(self, classification: impl Into<Classification>) -> Self {
        *self.classification.write() = classification.into();
        self
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        *self.name.write() = Some(name.into());
        self
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn is_root(&self) -> bool {
        self.kind == ObjectKind::Root
    }

    pub fn is_annotation(&self) -> bool {
        self.kind == ObjectKind::Annotation
    }

    pub fn is_detection(&self) -> bool {
        self.kind == ObjectKind::Detection
    }

    pub fn is_tma_core(&self) -> bool {
        self.kind == ObjectKind::TmaCore
    }

    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    pub fn classification(&self) -> Classification {
        self.classification.read().clone()
    }

    /// Snapshot of the direct children.
    pub fn children(&self) -> Vec<Arc<PathObject>> {
        self.children.read().clone()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Visits every descendant depth-first, parents before children.
    pub fn for_each_descendant<F>(&self, f: &mut F)
    where
        F: FnMut(&Arc<PathObject>),
    {
        for child in self.children() {
            f(&child);
            child.for_each_descendant(f);
        }
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        *self.name.write() = name;
    }

    pub fn description(&self) -> Option<String> {
        self.description.read().clone()
    }

    pub fn set_description(&self, description: Option<String>) {
        *self.description.write() = description;
    }

    /// Free-form key/value metadata, e.g. a TMA core's `Note`.
    pub fn metadata_value(&self, key: &str) -> Option<String> {
        self.metadata.read().get(key).cloned()
    }

    /// Sets or, with `None`, removes a metadata entry.
    pub fn set_metadata(&self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        let mut metadata = self.metadata.write();
        match value {
            Some(value) => {
                metadata.insert(key, value);
            }
            None => {
                metadata.remove(&key);
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Relaxed);
    }
}

impl fmt::Display for PathObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.read().as_deref() {
            Some(name) => f.write_str(name)?,
            None => write!(f, "{}", self.kind)?,
        }
        let classification = self.classification.read();
        if !classification.is_none() {
            write!(f, " ({classification})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PathObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathObject")
            .field("kind", &self.kind)
            .field("classification", &*self.classification.read())
            .field("children", &self.child_count())
            .finish()
    }
}

/// The object hierarchy as consumed by the measurement layer.
pub trait Hierarchy: Send + Sync {
    /// Counter advanced on every structural or classification change.
    fn version(&self) -> u64;

    fn root(&self) -> Arc<PathObject>;

    /// Distinct classifications among objects of `kind`, the sentinel
    /// included when any such object is unclassified.
    fn represented_classifications(&self, kind: ObjectKind) -> BTreeSet<Classification> {
        let root = self.root();
        let mut classes = BTreeSet::new();
        if root.kind() == kind {
            classes.insert(root.classification());
        }
        root.for_each_descendant(&mut |object: &Arc<PathObject>| {
            if object.kind() == kind {
                classes.insert(object.classification());
            }
        });
        classes
    }
}

/// In-memory hierarchy rooted at a [`ObjectKind::Root`] object.
///
/// # Examples
/// ```
/// use u_measure::hierarchy::{Hierarchy, ObjectHierarchy, PathObject};
/// use u_measure::geometry::Region;
///
/// let hierarchy = ObjectHierarchy::new();
/// let v0 = hierarchy.version();
/// let annotation = hierarchy.add_object(
///     &hierarchy.root(),
///     PathObject::annotation(Region::rectangle(0.0, 0.0, 100.0, 100.0)),
/// );
/// hierarchy.add_object(&annotation, PathObject::detection("Tumor: Positive"));
/// assert!(hierarchy.version() > v0);
/// ```
pub struct ObjectHierarchy {
    root: Arc<PathObject>,
    version: AtomicU64,
}

impl ObjectHierarchy {
    pub fn new() -> Self {
        Self {
            root: Arc::new(PathObject::new(ObjectKind::Root)),
            version: AtomicU64::new(0),
        }
    }

    /// Records a change; returns the new version.
    pub fn touch(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Appends `child` under `parent` and returns the shared handle.
    pub fn add_object(
        &self,
        parent: &Arc<PathObject>,
        child: impl Into<Arc<PathObject>>,
    ) -> Arc<PathObject> {
        let child = child.into();
        parent.children.write().push(child.clone());
        self.touch();
        child
    }

    /// Removes `child` (by identity) from `parent`'s children.
    pub fn remove_object(&self, parent: &Arc<PathObject>, child: &Arc<PathObject>) -> bool {
        let removed = {
            let mut children = parent.children.write();
            let before = children.len();
            children.retain(|c| !Arc::ptr_eq(c, child));
            children.len() != before
        };
        if removed {
            self.touch();
        }
        removed
    }

    pub fn set_classification(&self, object: &PathObject, classification: impl Into<Classification>) {
        let classification = classification.into();
        let changed = {
            let mut current = object.classification.write();
            if *current == classification {
                false
            } else {
                *current = classification;
                true
            }
        };
        if changed {
            self.touch();
        }
    }
}

impl Default for ObjectHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHierarchy")
            .field("version", &self.version())
            .field("root_children", &self.root.child_count())
            .finish()
    }
}

impl Hierarchy for ObjectHierarchy {
    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn root(&self) -> Arc<PathObject> {
        self.root.clone()
    }
}
