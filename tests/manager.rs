use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use u_measure::config::{MeasurementConfig, SharedThreshold};
use u_measure::counts::{ClassCounter, DescendantCounter};
use u_measure::geometry::{ImageGeometry, PixelSize, Region};
use u_measure::hierarchy::{Hierarchy, ObjectHierarchy, PathObject};
use u_measure::measurements::{CatalogState, DerivedMeasurementManager};

fn square(side: f64) -> Region {
    Region::rectangle(0.0, 0.0, side, side)
}

fn add_detections(
    hierarchy: &ObjectHierarchy,
    parent: &Arc<PathObject>,
    classification: &str,
    n: usize,
) {
    for _ in 0..n {
        hierarchy.add_object(parent, PathObject::detection(classification));
    }
}

fn value(manager: &DerivedMeasurementManager, name: &str, object: &Arc<PathObject>) -> f64 {
    let builder = manager
        .builder_named(name)
        .unwrap_or_else(|| panic!("no builder named {name:?}"));
    manager.value(builder, object)
}

#[test]
fn test_end_to_end_scores() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let annotation = hierarchy.add_object(&hierarchy.root(), PathObject::annotation(square(100.0)));
    add_detections(&hierarchy, &annotation, "Tumor: Negative", 10);
    add_detections(&hierarchy, &annotation, "Tumor: 1+", 10);
    add_detections(&hierarchy, &annotation, "Tumor: 2+", 10);
    add_detections(&hierarchy, &annotation, "Tumor: 3+", 10);
    add_detections(&hierarchy, &annotation, "Stroma", 5);

    let manager = DerivedMeasurementManager::new(
        hierarchy.clone(),
        ImageGeometry::new(1000, 1000),
        &MeasurementConfig::default(),
    );
    assert_eq!(manager.state(), CatalogState::Built);

    assert_eq!(value(&manager, "Num Tumor: 1+", &annotation), 10.0);
    assert_eq!(value(&manager, "Num Stroma (base)", &annotation), 5.0);
    assert_eq!(value(&manager, "Tumor: Positive %", &annotation), 75.0);
    // (10 + 20 + 30) * 100 / 40
    assert_eq!(value(&manager, "Tumor: H-score", &annotation), 150.0);
    assert_eq!(value(&manager, "Tumor: Allred proportion", &annotation), 5.0);
    assert_eq!(value(&manager, "Tumor: Allred intensity", &annotation), 2.0);
    assert_eq!(value(&manager, "Tumor: Allred score", &annotation), 7.0);

    // Root sees the same detections.
    let root = hierarchy.root();
    assert_eq!(value(&manager, "Tumor: Positive %", &root), 75.0);

    let values = manager.values(&annotation);
    assert_eq!(values.len(), manager.measurement_builders().len());
}

#[test]
fn test_positive_percentage_example() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    add_detections(&hierarchy, &root, "Positive", 30);
    add_detections(&hierarchy, &root, "Negative", 10);

    let manager = DerivedMeasurementManager::new(
        hierarchy.clone(),
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    assert_eq!(value(&manager, "Positive %", &root), 75.0);
    // 30 positives over the 100 x 100 image.
    assert_eq!(value(&manager, "Num Positive per px^2", &root), 30.0 / 10_000.0);
}

#[test]
fn test_empty_denominators_are_nan() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    let scored = hierarchy.add_object(&root, PathObject::annotation(square(10.0)));
    add_detections(&hierarchy, &scored, "Tumor: 1+", 1);
    let empty = hierarchy.add_object(&root, PathObject::annotation(square(10.0)));

    let manager = DerivedMeasurementManager::new(
        hierarchy.clone(),
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    for name in [
        "Tumor: Positive %",
        "Tumor: H-score",
        "Tumor: Allred proportion",
        "Tumor: Allred intensity",
        "Tumor: Allred score",
    ] {
        assert!(value(&manager, name, &empty).is_nan(), "{name}");
    }
    assert_eq!(value(&manager, "Num Tumor: 1+", &empty), 0.0);
}

#[test]
fn test_cache_recomputes_after_version_advance() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    let annotation = hierarchy.add_object(&root, PathObject::annotation(square(10.0)));
    add_detections(&hierarchy, &annotation, "Tumor: Positive", 3);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = {
        let calls = calls.clone();
        move |object: &PathObject| {
            calls.fetch_add(1, Ordering::SeqCst);
            DescendantCounter.count(object)
        }
    };
    let manager = DerivedMeasurementManager::with_sources(
        hierarchy.clone(),
        ImageGeometry::new(100, 100),
        Arc::new(0.0_f64),
        Arc::new(counter),
        false,
    );

    let first = manager.counts(&annotation);
    let again = manager.counts(&annotation);
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.cached_snapshot_count(), 1);

    // A change elsewhere still invalidates the annotation's snapshot.
    hierarchy.add_object(&root, PathObject::detection("Stroma"));
    let fresh = manager.counts(&annotation);
    assert!(!Arc::ptr_eq(&first, &fresh));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fresh.total(), 3);

    // Reclassification inside the annotation shows up in the values.
    let detection = annotation.children()[0].clone();
    hierarchy.set_classification(&detection, "Tumor: Negative");
    let builder = manager.builder_named("Tumor: Positive %").unwrap();
    let pct = manager.value(builder, &annotation);
    assert!((pct - 200.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_dropped_objects_leave_the_cache() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let manager = DerivedMeasurementManager::new(
        hierarchy,
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    let detached = Arc::new(PathObject::annotation(square(5.0)));
    manager.counts(&detached);
    assert_eq!(manager.cached_snapshot_count(), 1);
    drop(detached);
    assert_eq!(manager.cached_snapshot_count(), 0);
}

#[test]
fn test_tma_core_density() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    let core = hierarchy.add_object(&root, PathObject::tma_core(square(50.0)));
    let inner = hierarchy.add_object(&core, PathObject::annotation(square(20.0)));
    add_detections(&hierarchy, &inner, "Positive", 8);
    add_detections(&hierarchy, &inner, "Negative", 2);

    let mut manager = DerivedMeasurementManager::new(
        hierarchy.clone(),
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    let density = "Num Positive per px^2";
    let expected = 8.0 / 400.0;
    assert_eq!(value(&manager, density, &inner), expected);
    assert_eq!(value(&manager, density, &core), value(&manager, density, &inner));

    hierarchy.add_object(&core, PathObject::annotation(square(10.0)));
    manager.refresh();
    assert!(value(&manager, density, &core).is_nan());
    assert_eq!(value(&manager, density, &inner), expected);

    let detection = inner.children()[0].clone();
    assert!(value(&manager, density, &detection).is_nan());
}

#[test]
fn test_root_density_needs_single_plane() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    add_detections(&hierarchy, &root, "Positive", 5);

    let calibrated = ImageGeometry::new(2000, 1000).with_pixel_size(PixelSize::square(0.5));
    let manager = DerivedMeasurementManager::new(
        hierarchy.clone(),
        calibrated.clone(),
        &MeasurementConfig::default(),
    );
    // 1 mm x 0.5 mm
    let density = value(&manager, "Num Positive per mm^2", &root);
    assert!((density - 10.0).abs() < 1e-9);

    let stack = DerivedMeasurementManager::new(
        hierarchy,
        calibrated.with_planes(4, 1),
        &MeasurementConfig::default(),
    );
    assert!(value(&stack, "Num Positive per mm^2", &root).is_nan());
}

#[test]
fn test_line_annotation_has_no_density() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let line = hierarchy.add_object(
        &hierarchy.root(),
        PathObject::annotation(Region::Line {
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        }),
    );
    add_detections(&hierarchy, &line, "Positive", 2);
    let manager = DerivedMeasurementManager::new(
        hierarchy,
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    assert!(value(&manager, "Num Positive per px^2", &line).is_nan());
}

#[test]
fn test_shared_threshold_applies_without_rebuild() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let annotation = hierarchy.add_object(&hierarchy.root(), PathObject::annotation(square(10.0)));
    add_detections(&hierarchy, &annotation, "Tumor: 1+", 1);
    add_detections(&hierarchy, &annotation, "Tumor: Negative", 99);

    let threshold = SharedThreshold::new(0.0).unwrap();
    let manager = DerivedMeasurementManager::with_sources(
        hierarchy,
        ImageGeometry::new(100, 100),
        Arc::new(threshold.clone()),
        Arc::new(DescendantCounter),
        false,
    );
    assert_eq!(value(&manager, "Tumor: Allred proportion", &annotation), 2.0);
    assert_eq!(value(&manager, "Tumor: H-score", &annotation), 1.0);

    threshold.set(5.0).unwrap();
    assert_eq!(value(&manager, "Tumor: Allred proportion (min 5.0%)", &annotation), 0.0);
    assert_eq!(value(&manager, "Tumor: Allred score (min 5.0%)", &annotation), 0.0);
    assert_eq!(value(&manager, "Tumor: H-score", &annotation), 0.0);
}

#[test]
fn test_refresh_picks_up_new_classifications() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    add_detections(&hierarchy, &root, "Tumor", 1);

    let mut manager = DerivedMeasurementManager::new(
        hierarchy.clone(),
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    assert_eq!(manager.measurement_builders().len(), 2);

    add_detections(&hierarchy, &root, "Tumor: Positive", 1);
    manager.mark_stale();
    assert_eq!(manager.state(), CatalogState::Stale);
    manager.refresh();
    assert_eq!(manager.state(), CatalogState::Built);
    assert!(manager.builder_named("Tumor: Positive %").is_some());
    assert_eq!(value(&manager, "Num Tumor (base)", &root), 2.0);
}

#[test]
fn test_nested_parents_have_separate_percentages() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let annotation = hierarchy.add_object(&hierarchy.root(), PathObject::annotation(square(10.0)));
    add_detections(&hierarchy, &annotation, "Tumor: Positive", 1);
    add_detections(&hierarchy, &annotation, "Tumor: Negative", 1);
    add_detections(&hierarchy, &annotation, "Tumor: Sub: Positive", 8);
    add_detections(&hierarchy, &annotation, "Tumor: Sub: Negative", 2);

    let manager = DerivedMeasurementManager::new(
        hierarchy,
        ImageGeometry::new(100, 100),
        &MeasurementConfig::default(),
    );
    assert_eq!(value(&manager, "Tumor: Positive %", &annotation), 50.0);
    assert_eq!(value(&manager, "Tumor: Sub: Positive %", &annotation), 80.0);
    assert_eq!(value(&manager, "Tumor + Tumor: Sub: Positive %", &annotation), 75.0);
}

#[test]
fn test_degenerate_regions_have_no_density() {
    let hierarchy = Arc::new(ObjectHierarchy::new());
    let root = hierarchy.root();
    let flat = hierarchy.add_object(&root, PathObject::annotation(Region::rectangle(5.0, 5.0, 0.0, 10.0)));
    add_detections(&hierarchy, &flat, "Positive", 3);
    let sliver = hierarchy.add_object(
        &root,
        PathObject::annotation(Region::polygon([(0.0, 0.0), (4.0, 4.0)])),
    );
    add_detections(&hierarchy, &sliver, "Positive", 3);
    let empty_image = DerivedMeasurementManager::new(
        hierarchy.clone(),
        ImageGeometry::new(0, 0),
        &MeasurementConfig::default(),
    );
    for object in [&flat, &sliver, &root] {
        assert!(value(&empty_image, "Num Positive per px^2", object).is_nan());
    }
}
