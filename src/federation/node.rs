//! Merged node view

use crate::federation::merge::{MergeConflict, MergePlan};
use crate::graph::{lexicon, CachePolicy, Location, Name, NodeId, Path, Properties, Property};
use crate::request::NodeData;

/// The client-visible result of merging contributions for one federated path
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedNode {
    path: Path,
    id: NodeId,
    properties: Properties,
    children: Vec<Location>,
    cache_policy: Option<CachePolicy>,
    merge_plan: Option<MergePlan>,
    conflicts: Vec<MergeConflict>,
}

impl FederatedNode {
    pub fn new(path: Path, id: NodeId) -> Self {
        FederatedNode {
            path,
            id,
            properties: Properties::new(),
            children: Vec::new(),
            cache_policy: None,
            merge_plan: None,
            conflicts: Vec::new(),
        }
    }

    /// Rebuild a node from content stored in the cache
    pub fn from_cached(data: NodeData, id: NodeId, plan: MergePlan) -> Option<Self> {
        let path = data.location.path()?.clone();
        let mut properties = data.properties;
        properties.remove(&Name::from(lexicon::MERGE_PLAN));
        Some(FederatedNode {
            path,
            id,
            properties,
            children: data.children,
            cache_policy: None,
            conflicts: plan.conflicts().to_vec(),
            merge_plan: Some(plan),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn location(&self) -> Location {
        Location::new(self.path.clone(), self.id)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn set_property(&mut self, property: Property) {
        self.properties.insert(property.name().clone(), property);
    }

    pub fn children(&self) -> &[Location] {
        &self.children
    }

    pub fn set_children(&mut self, children: Vec<Location>) {
        self.children = children;
    }

    pub fn cache_policy(&self) -> Option<CachePolicy> {
        self.cache_policy
    }

    pub fn set_cache_policy(&mut self, policy: Option<CachePolicy>) {
        self.cache_policy = policy;
    }

    pub fn merge_plan(&self) -> Option<&MergePlan> {
        self.merge_plan.as_ref()
    }

    pub fn set_merge_plan(&mut self, plan: MergePlan) {
        self.merge_plan = Some(plan);
    }

    /// Disagreements found while merging
    pub fn conflicts(&self) -> &[MergeConflict] {
        &self.conflicts
    }

    pub fn add_conflict(&mut self, conflict: MergeConflict) {
        self.conflicts.push(conflict);
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn to_node_data(&self) -> NodeData {
        NodeData {
            location: self.location(),
            properties: self.properties.clone(),
            children: self.children.clone(),
        }
    }
}
