//! Hierarchical object classifications.
//!
//! A [`Classification`] is a path of name components, e.g. `"Tumor: 2+"` is
//! `["Tumor", "2+"]` with parent `"Tumor"`. The empty path is the
//! "no classification" sentinel ([`Classification::none`]).
//!
//! Scoring relies on a handful of reserved component names: `Positive`,
//! `Negative`, and the graded intensities `1+`, `2+`, `3+`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Separator between components in the textual form.
pub const SEPARATOR: &str = ": ";

pub const POSITIVE: &str = "Positive";
pub const NEGATIVE: &str = "Negative";
pub const ONE_PLUS: &str = "1+";
pub const TWO_PLUS: &str = "2+";
pub const THREE_PLUS: &str = "3+";

/// Immutable hierarchical label.
///
/// Ordering is lexicographic over components, so the sentinel sorts first
/// and a classification sorts directly before the ones derived from it.
///
/// # Examples
/// ```
/// use u_measure::classification::Classification;
/// let c: Classification = "Tumor: 2+".parse().unwrap();
/// assert_eq!(c.parent(), Classification::new(["Tumor"]));
/// assert!(c.is_graded_intensity());
/// assert!(c.base().is_ancestor_of(&c));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Classification(Arc<[String]>);

impl Classification {
    /// Builds a classification from its components, root first.
    ///
    /// Blank components are dropped.
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = components
            .into_iter()
            .map(|s| s.into().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self(parts.into())
    }

    /// The "no classification" sentinel.
    pub fn none() -> Self {
        Self(Arc::from(Vec::<String>::new()))
    }

    /// `true` for the "no classification" sentinel.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new classification with `name` appended.
    pub fn derive(&self, name: impl Into<String>) -> Self {
        Self::new(self.0.iter().cloned().chain(std::iter::once(name.into())))
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// Number of components; 0 for the sentinel.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The last component, or `""` for the sentinel.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    /// The classification this one was derived from; the sentinel for
    /// top-level classifications and for the sentinel itself.
    pub fn parent(&self) -> Self {
        match self.0.len() {
            0 | 1 => Self::none(),
            n => Self(self.0[..n - 1].to_vec().into()),
        }
    }

    /// The root ancestor (the classification itself when top-level).
    pub fn base(&self) -> Self {
        match self.0.first() {
            Some(first) if self.0.len() > 1 => Self::new([first.clone()]),
            _ => self.clone(),
        }
    }

    /// `true` if `other` equals `self` or is derived from it.
    ///
    /// The sentinel is not treated as an ancestor of everything; it is only
    /// an ancestor of itself.
    pub fn is_ancestor_of(&self, other: &Classification) -> bool {
        if self.is_none() {
            return other.is_none();
        }
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// `1+`, `2+` or `3+`.
    pub fn is_graded_intensity(&self) -> bool {
        self.intensity_grade().is_some()
    }

    /// The grade (1–3) of a graded-intensity classification.
    pub fn intensity_grade(&self) -> Option<u8> {
        match self.name() {
            ONE_PLUS => Some(1),
            TWO_PLUS => Some(2),
            THREE_PLUS => Some(3),
            _ => None,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.name() == POSITIVE
    }

    pub fn is_negative(&self) -> bool {
        self.name() == NEGATIVE
    }

    pub fn is_positive_or_graded(&self) -> bool {
        self.is_positive() || self.is_graded_intensity()
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(SEPARATOR))
    }
}

impl fmt::Debug for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("Classification(<none>)")
        } else {
            write!(f, "Classification({self})")
        }
    }
}

impl FromStr for Classification {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.split(SEPARATOR.trim_end())))
    }
}

impl From<&str> for Classification {
    fn from(s: &str) -> Self {
        Self::new(s.split(SEPARATOR.trim_end()))
    }
}

impl From<String> for Classification {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Classification> for String {
    fn from(c: Classification) -> Self {
        c.to_string()
    }
}

impl From<Option<Classification>> for Classification {
    fn from(c: Option<Classification>) -> Self {
        c.unwrap_or_default()
    }
}
