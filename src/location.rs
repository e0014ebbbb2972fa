//! Path values addressing the hierarchical store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Separator between segments in rendered paths.
pub const SEPARATOR: char = '/';

/// An immutable path into the store: an ordered list of segments.
///
/// Equality and hashing consider the segments only. A rooted location is
/// anchored at the store root; only rooted locations may be written through a
/// transaction.
#[derive(Clone, Serialize, Deserialize)]
pub struct Location {
    segments: Vec<String>,
    rooted: bool,
}

impl Location {
    /// The store root.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
            rooted: true,
        }
    }

    /// A location that is not anchored at the root (e.g. a key path built in
    /// isolation, later joined onto a rooted location).
    ///
    /// # Panics
    ///
    /// If a segment is not [valid](is_valid_segment).
    pub fn relative<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: checked_segments(segments),
            rooted: false,
        }
    }

    /// Rooted location made of the given segments.
    ///
    /// # Panics
    ///
    /// If a segment is not [valid](is_valid_segment).
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: checked_segments(segments),
            rooted: true,
        }
    }

    /// Parse a path such as `/users/42`.
    ///
    /// A leading separator makes the result rooted. Empty segments are
    /// skipped, so `"/a//b/"` equals `"/a/b"`.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: split_path(path).map(str::to_string).collect(),
            rooted: path.starts_with(SEPARATOR),
        }
    }

    /// # Panics
    ///
    /// If `segment` is not [valid](is_valid_segment).
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        assert_valid_segment(&segment);
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self {
            segments,
            rooted: self.rooted,
        }
    }

    /// Append a relative path (`"a/b"`) to this location.
    pub fn join(&self, relative: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(split_path(relative).map(str::to_string));
        Self {
            segments,
            rooted: self.rooted,
        }
    }

    /// Parent location, `None` for an empty location.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            rooted: self.rooted,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment (the key), `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.rooted && self.segments.is_empty()
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    /// True if `self`'s segments are a strict prefix of `other`'s.
    pub fn is_ancestor(&self, of: &Location) -> bool {
        self.segments.len() < of.segments.len() && of.segments.starts_with(&self.segments)
    }

    /// Segments of `self` that follow `ancestor`, or `None` if `ancestor` is
    /// not a strict ancestor.
    pub fn segments_after(&self, ancestor: &Location) -> Option<&[String]> {
        if ancestor.is_ancestor(self) {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }

    /// Path of `self` relative to `ancestor`, e.g. `"b/c"` for `/a/b/c`
    /// relative to `/a`.
    pub fn relative_path(&self, ancestor: &Location) -> Option<String> {
        self.segments_after(ancestor)
            .map(|rest| rest.join(&SEPARATOR.to_string()))
    }

    /// Absolute rendering, `/` for the root.
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push(SEPARATOR);
            path.push_str(segment);
        }
        if path.is_empty() {
            path.push(SEPARATOR);
        }
        path
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty())
}

/// A segment must be non-empty and free of [`SEPARATOR`], so that rendering a
/// location and parsing it back yields the same segments.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(SEPARATOR)
}

fn assert_valid_segment(segment: &str) {
    assert!(
        is_valid_segment(segment),
        "Invalid location segment {segment:?}: segments must be non-empty and must not contain '{SEPARATOR}'"
    );
}

fn checked_segments<I, S>(segments: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    segments
        .into_iter()
        .map(|segment| {
            let segment = segment.into();
            assert_valid_segment(&segment);
            segment
        })
        .collect()
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.path())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

impl From<&str> for Location {
    fn from(path: &str) -> Self {
        Location::parse(path)
    }
}
