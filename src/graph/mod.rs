//! Graph model
//!
//! Immutable addressing (paths, locations) and node content (names, values,
//! properties) shared by every other module.

pub mod cache;
pub mod location;
pub mod path;
pub mod property;

pub use cache::{CacheInfo, CachePolicy};
pub use location::{Location, NodeId};
pub use path::{Path, Segment};
pub use property::{lexicon, properties_from, Name, Properties, Property, Value};
