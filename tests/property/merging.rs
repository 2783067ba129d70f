//! Merge properties that hold for any set of contributions

use chrono::Utc;
use graft::federation::{
    Contribution, FederatedNode, MergeContext, MergeStrategy, StandardMergeStrategy,
};
use graft::graph::{lexicon, Location, Name, NodeId, Path, Properties, Property};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Property values and distinct child names of one source node
#[derive(Debug, Clone)]
struct SourceNode {
    properties: Vec<(String, String)>,
    children: BTreeSet<String>,
}

fn source_node() -> impl Strategy<Value = SourceNode> {
    (
        prop::collection::vec(("[a-e]", "[a-z]{1,4}"), 0..5),
        prop::collection::btree_set("[a-h]", 0..6),
    )
        .prop_map(|(properties, children)| SourceNode {
            properties,
            children,
        })
}

fn contributions(nodes: &[SourceNode]) -> Vec<Contribution> {
    let parent = Path::parse("/docs").unwrap();
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let properties: Properties = node
                .properties
                .iter()
                .map(|(name, value)| (Name::from(name.as_str()), Property::single(name.as_str(), value.as_str())))
                .collect();
            let children = node
                .children
                .iter()
                .map(|name| Location::from_path(parent.child(name.as_str())))
                .collect();
            Contribution::node(
                format!("s{}", i),
                "default",
                Location::from_path(parent.clone()),
                None,
                properties,
                children,
            )
        })
        .collect()
}

fn merge(contributions: &[Contribution], id: NodeId) -> FederatedNode {
    let mut node = FederatedNode::new(Path::parse("/docs").unwrap(), id);
    let context = MergeContext::new(lexicon::IDENTITY, Utc::now());
    StandardMergeStrategy.merge(&mut node, contributions, &context);
    node
}

fn child_names(node: &FederatedNode) -> Vec<String> {
    node.children()
        .iter()
        .map(|c| c.path().unwrap().last_segment().unwrap().name().to_string())
        .collect()
}

proptest! {
    #[test]
    fn merging_is_deterministic(nodes in prop::collection::vec(source_node(), 1..4)) {
        let contributions = contributions(&nodes);
        let id = NodeId::new();
        let first = merge(&contributions, id);
        let second = merge(&contributions, id);
        prop_assert_eq!(first.properties(), second.properties());
        prop_assert_eq!(first.children(), second.children());
    }

    #[test]
    fn children_are_the_union_without_duplicates(
        nodes in prop::collection::vec(source_node(), 1..4),
    ) {
        let node = merge(&contributions(&nodes), NodeId::new());
        let names = child_names(&node);
        let expected: BTreeSet<String> = nodes.iter().flat_map(|n| n.children.iter().cloned()).collect();
        let unique: BTreeSet<String> = names.iter().cloned().collect();
        prop_assert_eq!(names.len(), unique.len());
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn last_contribution_wins_each_property(
        nodes in prop::collection::vec(source_node(), 1..4),
    ) {
        let node = merge(&contributions(&nodes), NodeId::new());
        let mut expected = std::collections::BTreeMap::new();
        for source in &nodes {
            // later entries of one node replace earlier ones, as in a map
            for (name, value) in &source.properties {
                expected.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in &expected {
            let merged = node
                .properties()
                .get(&Name::from(name.as_str()))
                .and_then(|p| p.first_value())
                .and_then(|v| v.as_str().map(str::to_string));
            prop_assert_eq!(merged.as_ref(), Some(value));
        }
        // the merged identity is the only property not contributed
        prop_assert_eq!(node.properties().len(), expected.len() + 1);
    }

    #[test]
    fn plan_records_every_contribution(nodes in prop::collection::vec(source_node(), 1..4)) {
        let contributions = contributions(&nodes);
        let node = merge(&contributions, NodeId::new());
        let plan = node.merge_plan().unwrap();
        prop_assert_eq!(plan.contribution_count(), contributions.len());
        prop_assert!(!node.has_conflicts());
    }
}
