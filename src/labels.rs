//! Display state for object lists and trees.
//!
//! Nothing here renders. [`ObjectLabel`] collects what a list or tree cell
//! shows for one object: its text, whether to draw a region icon, a
//! tooltip, and the badges drawn next to it, in order.

use std::fmt;

use crate::hierarchy::{ObjectKind, PathObject};

/// Tooltip used when an object has no (non-blank) description.
pub const NO_DESCRIPTION: &str = "No description";

/// Metadata key holding a TMA core's note, shown as its description.
pub const TMA_NOTE_KEY: &str = "Note";

/// Small icon shown beside an object's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Badge {
    /// The object carries a description.
    Description,
    Locked,
    /// Only shown when explicitly requested.
    Unlocked,
}

impl Badge {
    pub fn tooltip(&self) -> &'static str {
        match self {
            Badge::Description => "Has description",
            Badge::Locked => "Locked",
            Badge::Unlocked => "Unlocked",
        }
    }
}

/// Display preferences shared by every cell of a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelOptions {
    /// Badge unlocked objects as well as locked ones.
    pub show_unlocked: bool,
    /// Draw region icons for detections, not only for other objects.
    pub detection_icons: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLabel {
    text: String,
    region_icon: bool,
    description: Option<String>,
    badges: Vec<Badge>,
}

impl ObjectLabel {
    /// Label using the object's `Display` text.
    ///
    /// # Examples
    /// ```
    /// use u_measure::hierarchy::PathObject;
    /// use u_measure::labels::{Badge, LabelOptions, ObjectLabel};
    ///
    /// let object = PathObject::detection("Tumor").with_name("Cell 1");
    /// object.set_locked(true);
    /// let label = ObjectLabel::for_object(&object, LabelOptions::default());
    /// assert_eq!(label.text(), "Cell 1 (Tumor)");
    /// assert_eq!(label.badges(), [Badge::Locked]);
    /// assert_eq!(label.tooltip(), "No description");
    /// ```
    pub fn for_object(object: &PathObject, options: LabelOptions) -> Self {
        Self::with_text(object, options, |o: &PathObject| o.to_string())
    }

    /// Label with caller-provided text.
    pub fn with_text<F>(object: &PathObject, options: LabelOptions, text: F) -> Self
    where
        F: FnOnce(&PathObject) -> String,
    {
        let description = description_of(object).filter(|d| !d.trim().is_empty());

        let mut badges = Vec::with_capacity(2);
        if description.is_some() {
            badges.push(Badge::Description);
        }
        if object.is_locked() {
            badges.push(Badge::Locked);
        } else if options.show_unlocked {
            badges.push(Badge::Unlocked);
        }

        Self {
            text: text(object),
            region_icon: shows_region_icon(object, options),
            description,
            badges,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the cell draws an icon of the object's region.
    pub fn shows_region_icon(&self) -> bool {
        self.region_icon
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tooltip(&self) -> &str {
        self.description.as_deref().unwrap_or(NO_DESCRIPTION)
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }
}

/// Annotations carry a description and TMA cores a note; nothing else does.
fn description_of(object: &PathObject) -> Option<String> {
    match object.kind() {
        ObjectKind::Annotation => object.description(),
        ObjectKind::TmaCore => object.metadata_value(TMA_NOTE_KEY),
        ObjectKind::Root | ObjectKind::Detection => None,
    }
}

fn shows_region_icon(object: &PathObject, options: LabelOptions) -> bool {
    object.region().is_some() && (!object.is_detection() || options.detection_icons)
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
