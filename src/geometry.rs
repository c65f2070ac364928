//! Regions, image extent and pixel calibration.
//!
//! Only what density measurements need: whether a region encloses an area,
//! and that area in pixels or in calibrated units.

use serde::{Deserialize, Serialize};

/// Region of interest attached to an object, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Region {
    Rectangle { x: f64, y: f64, width: f64, height: f64 },
    /// Axis-aligned ellipse inscribed in the given bounding box.
    Ellipse { x: f64, y: f64, width: f64, height: f64 },
    /// Closed polygon; the last vertex connects back to the first.
    Polygon { vertices: Vec<(f64, f64)> },
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    Points { points: Vec<(f64, f64)> },
}

impl Region {
    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Region::Rectangle { x, y, width, height }
    }

    pub fn polygon(vertices: impl Into<Vec<(f64, f64)>>) -> Self {
        Region::Polygon {
            vertices: vertices.into(),
        }
    }

    /// `true` for shapes that enclose an area.
    pub fn is_area(&self) -> bool {
        matches!(
            self,
            Region::Rectangle { .. } | Region::Ellipse { .. } | Region::Polygon { .. }
        )
    }

    /// Area in pixels², or NaN for lines and points.
    pub fn area(&self) -> f64 {
        self.scaled_area(1.0, 1.0)
    }

    /// Area with each pixel measuring `pixel_width × pixel_height` units.
    pub fn scaled_area(&self, pixel_width: f64, pixel_height: f64) -> f64 {
        let scale = pixel_width * pixel_height;
        match self {
            Region::Rectangle { width, height, .. } => width.abs() * height.abs() * scale,
            Region::Ellipse { width, height, .. } => {
                std::f64::consts::PI * 0.25 * width.abs() * height.abs() * scale
            }
            Region::Polygon { vertices } => shoelace_area(vertices) * scale,
            Region::Line { .. } | Region::Points { .. } => f64::NAN,
        }
    }
}

/// Unsigned polygon area via the shoelace formula.
fn shoelace_area(vertices: &[(f64, f64)]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for (i, &(x0, y0)) in vertices.iter().enumerate() {
        let (x1, y1) = vertices[(i + 1) % vertices.len()];
        twice_area += x0 * y1 - x1 * y0;
    }
    twice_area.abs() * 0.5
}

/// Physical pixel size in micrometres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width_microns: f64,
    pub height_microns: f64,
}

impl PixelSize {
    pub fn square(microns: f64) -> Self {
        Self {
            width_microns: microns,
            height_microns: microns,
        }
    }
}

/// Unit in which densities are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaUnit {
    SquareMillimetres,
    SquarePixels,
}

impl AreaUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            AreaUnit::SquareMillimetres => "mm^2",
            AreaUnit::SquarePixels => "px^2",
        }
    }
}

/// Image dimensions and calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_plane_count")]
    pub size_z: u32,
    #[serde(default = "default_plane_count")]
    pub size_t: u32,
    #[serde(default)]
    pub pixel_size: Option<PixelSize>,
}

fn default_plane_count() -> u32 {
    1
}

impl ImageGeometry {
    /// A single-plane, uncalibrated image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            size_z: 1,
            size_t: 1,
            pixel_size: None,
        }
    }

    pub fn with_pixel_size(mut self, pixel_size: PixelSize) -> Self {
        self.pixel_size = Some(pixel_size);
        self
    }

    pub fn with_planes(mut self, size_z: u32, size_t: u32) -> Self {
        self.size_z = size_z;
        self.size_t = size_t;
        self
    }

    /// `true` for a single z-slice at a single time-point.
    pub fn is_single_plane(&self) -> bool {
        self.size_z == 1 && self.size_t == 1
    }

    /// The whole image as a rectangle.
    pub fn full_extent(&self) -> Region {
        Region::rectangle(0.0, 0.0, self.width as f64, self.height as f64)
    }

    pub fn area_unit(&self) -> AreaUnit {
        if self.pixel_size.is_some() {
            AreaUnit::SquareMillimetres
        } else {
            AreaUnit::SquarePixels
        }
    }

    /// Area of `region` in [`area_unit`](Self::area_unit).
    pub fn calibrated_area(&self, region: &Region) -> f64 {
        match self.pixel_size {
            Some(size) => {
                region.scaled_area(size.width_microns / 1000.0, size.height_microns / 1000.0)
            }
            None => region.area(),
        }
    }
}
