//! Contributions
//!
//! One source's answer for one federated path, captured at load time. A
//! contribution is immutable once built; expired contributions are replaced,
//! never refreshed in place.

use crate::graph::{Location, Path, Properties, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    /// Content read from the source
    Node,
    /// Children implied by projections mounted below the federated path
    Placeholder,
    /// The source has nothing at the path
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    source_name: String,
    workspace: String,
    kind: ContributionKind,
    locations_in_source: Vec<Location>,
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Location>,
    /// Identity-property value of each child, parallel to `children`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    child_identities: Vec<Option<Value>>,
}

impl Contribution {
    /// Content of one source node
    ///
    /// Children keep their source-local locations; only their names and
    /// identifiers are used when merging.
    pub fn node(
        source_name: impl Into<String>,
        workspace: impl Into<String>,
        location_in_source: Location,
        expires_at: Option<DateTime<Utc>>,
        properties: Properties,
        children: Vec<Location>,
    ) -> Self {
        Contribution {
            source_name: source_name.into(),
            workspace: workspace.into(),
            kind: ContributionKind::Node,
            locations_in_source: vec![location_in_source],
            expires_at,
            properties,
            children,
            child_identities: Vec::new(),
        }
    }

    /// Children standing in for the projection's top-level paths
    pub fn placeholder(
        source_name: impl Into<String>,
        workspace: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        children: Vec<Location>,
    ) -> Self {
        Contribution {
            source_name: source_name.into(),
            workspace: workspace.into(),
            kind: ContributionKind::Placeholder,
            locations_in_source: Vec::new(),
            expires_at,
            properties: Properties::new(),
            children,
            child_identities: Vec::new(),
        }
    }

    pub fn empty(
        source_name: impl Into<String>,
        workspace: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Contribution {
            source_name: source_name.into(),
            workspace: workspace.into(),
            kind: ContributionKind::Empty,
            locations_in_source: Vec::new(),
            expires_at,
            properties: Properties::new(),
            children: Vec::new(),
            child_identities: Vec::new(),
        }
    }

    /// Attach the identity-property value of each child, in child order
    pub fn with_child_identities(mut self, identities: Vec<Option<Value>>) -> Self {
        self.child_identities = identities;
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn kind(&self) -> ContributionKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ContributionKind::Empty
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == ContributionKind::Placeholder
    }

    pub fn locations_in_source(&self) -> &[Location] {
        &self.locations_in_source
    }

    pub fn paths_in_source(&self) -> impl Iterator<Item = &Path> {
        self.locations_in_source.iter().filter_map(|l| l.path())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Contributions without an expiration never expire
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn children(&self) -> &[Location] {
        &self.children
    }

    /// Identity-property value of the child at `index`, if it was read
    pub fn child_identity(&self, index: usize) -> Option<&Value> {
        self.child_identities.get(index)?.as_ref()
    }

    /// The same contribution without its content
    pub fn provenance(&self) -> Contribution {
        Contribution {
            source_name: self.source_name.clone(),
            workspace: self.workspace.clone(),
            kind: self.kind,
            locations_in_source: self.locations_in_source.clone(),
            expires_at: self.expires_at,
            properties: Properties::new(),
            children: Vec::new(),
            child_identities: Vec::new(),
        }
    }
}

impl fmt::Display for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from '{}'", self.kind_name(), self.source_name)?;
        for location in &self.locations_in_source {
            write!(f, " {}", location)?;
        }
        write!(
            f,
            " ({} properties, {} children",
            self.properties.len(),
            self.children.len()
        )?;
        if let Some(at) = self.expires_at {
            write!(f, ", expires {}", at.to_rfc3339())?;
        }
        f.write_str(")")
    }
}

impl Contribution {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            ContributionKind::Node => "node",
            ContributionKind::Placeholder => "placeholder",
            ContributionKind::Empty => "empty",
        }
    }
}
