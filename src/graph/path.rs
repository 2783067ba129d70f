//! Hierarchical paths
//!
//! A `Path` is an immutable sequence of named segments. Absolute paths address
//! nodes from the root of a tree; relative paths are used for rule exceptions
//! and for re-rooting one path under another. Segment names are NFC-normalized
//! so that equal names always compare and hash equally.

use crate::error::GraphError;
use crate::graph::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// One path segment: a name plus a 1-based same-name-sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    name: Name,
    index: u32,
}

impl Segment {
    pub fn new(name: impl Into<Name>) -> Self {
        Self::with_index(name, 1)
    }

    pub fn with_index(name: impl Into<Name>, index: u32) -> Self {
        Segment {
            name: name.into(),
            index: index.max(1),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    fn parse(text: &str) -> Result<Self, GraphError> {
        let (raw_name, index) = match text.strip_suffix(']') {
            Some(body) => {
                let open = body.rfind('[').ok_or_else(|| {
                    GraphError::InvalidPath(format!("unbalanced index in segment '{}'", text))
                })?;
                let index: u32 = body[open + 1..].parse().map_err(|_| {
                    GraphError::InvalidPath(format!("invalid index in segment '{}'", text))
                })?;
                if index == 0 {
                    return Err(GraphError::InvalidPath(format!(
                        "segment indexes start at 1: '{}'",
                        text
                    )));
                }
                (&body[..open], index)
            }
            None => (text, 1),
        };
        if raw_name.is_empty() || raw_name.contains('[') || raw_name.contains(']') {
            return Err(GraphError::InvalidPath(format!(
                "invalid segment name '{}'",
                text
            )));
        }
        Ok(Segment::with_index(normalize_name(raw_name), index))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 1 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.index)
        }
    }
}

/// Normalize a segment name to Unicode NFC
pub fn normalize_name(name: &str) -> String {
    name.nfc().collect()
}

/// Immutable hierarchical path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    absolute: bool,
    segments: Vec<Segment>,
}

impl Path {
    /// The root path `/`
    pub fn root() -> Self {
        Path {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// Parse a path from its textual form
    ///
    /// Leading `/` makes the path absolute. `.` segments are dropped and `..`
    /// removes the preceding segment; climbing above the root is an error.
    /// A segment may carry a same-name-sibling index, as in `/a/b[2]`.
    pub fn parse(text: &str) -> Result<Self, GraphError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GraphError::InvalidPath("path is empty".to_string()));
        }
        let absolute = trimmed.starts_with('/');
        let mut segments: Vec<Segment> = Vec::new();
        for part in trimmed.split('/').filter(|p| !p.is_empty()) {
            match part {
                "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(GraphError::InvalidPath(format!(
                            "path '{}' climbs above its root",
                            text
                        )));
                    }
                }
                _ => segments.push(Segment::parse(part)?),
            }
        }
        Ok(Path { absolute, segments })
    }

    /// Build a relative path from segments
    pub fn relative(segments: Vec<Segment>) -> Self {
        Path {
            absolute: false,
            segments,
        }
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Parent path, or `None` for the root and for empty relative paths
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Path {
            absolute: self.absolute,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, name: impl Into<Name>) -> Path {
        self.child_segment(Segment::new(name))
    }

    pub fn child_segment(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Path {
            absolute: self.absolute,
            segments,
        }
    }

    /// Append a relative path below this one
    pub fn join(&self, relative: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Path {
            absolute: self.absolute,
            segments,
        }
    }

    /// Ancestor with the given number of segments
    pub fn ancestor_of_len(&self, len: usize) -> Option<Path> {
        if len > self.segments.len() {
            return None;
        }
        Some(Path {
            absolute: self.absolute,
            segments: self.segments[..len].to_vec(),
        })
    }

    /// True when `self` is a proper ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.absolute == other.absolute
            && self.segments.len() < other.segments.len()
            && other.segments.starts_with(&self.segments)
    }

    pub fn is_descendant_of(&self, other: &Path) -> bool {
        other.is_ancestor_of(self)
    }

    pub fn is_at_or_above(&self, other: &Path) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    pub fn is_at_or_below(&self, other: &Path) -> bool {
        self == other || other.is_ancestor_of(self)
    }

    /// Path of `self` relative to `ancestor`
    ///
    /// Returns `None` unless `ancestor` is at or above `self`.
    pub fn relative_to(&self, ancestor: &Path) -> Option<Path> {
        if !ancestor.is_at_or_above(self) {
            return None;
        }
        Some(Path::relative(
            self.segments[ancestor.segments.len()..].to_vec(),
        ))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str(if self.absolute { "/" } else { "." });
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if self.absolute || i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}
