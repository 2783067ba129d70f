//! Merge engine
//!
//! A `MergeStrategy` folds the contributions for one federated path into a
//! `FederatedNode`. Merging is a pure function of the contributions and the
//! `MergeContext`; the same inputs always yield the same node content.

use crate::error::GraphError;
use crate::federation::contribution::Contribution;
use crate::federation::node::FederatedNode;
use crate::federation::projection::Projection;
use crate::graph::{lexicon, CachePolicy, Location, Name, NodeId, Property, Segment, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Inputs shared by every merge of one executor
#[derive(Debug, Clone)]
pub struct MergeContext {
    identity_property: Name,
    now: DateTime<Utc>,
}

impl MergeContext {
    pub fn new(identity_property: impl Into<Name>, now: DateTime<Utc>) -> Self {
        MergeContext {
            identity_property: identity_property.into(),
            now,
        }
    }

    pub fn identity_property(&self) -> &Name {
        &self.identity_property
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Child identifiers only identify logical children when the identity
    /// property is the node identifier itself.
    fn compares_child_ids(&self) -> bool {
        self.identity_property.as_str() == lexicon::UUID
    }

    /// Key under which the child at `index` of `contribution` is one logical
    /// node across sources
    fn child_identity(&self, contribution: &Contribution, index: usize) -> Option<String> {
        if self.compares_child_ids() {
            return contribution.children().get(index)?.id().map(|id| id.to_string());
        }
        contribution.child_identity(index).map(Value::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeConflictKind {
    /// Contributions disagree on the identity of the merged node
    NodeIdentity,
    /// One child identifier appears under different names
    ChildIdentity,
}

/// Diagnostic recorded on a merged node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    kind: MergeConflictKind,
    subject: String,
    /// (source, observed value) pairs in contribution order
    observed: Vec<(String, String)>,
}

impl MergeConflict {
    pub fn new(
        kind: MergeConflictKind,
        subject: impl Into<String>,
        observed: Vec<(String, String)>,
    ) -> Self {
        MergeConflict {
            kind,
            subject: subject.into(),
            observed,
        }
    }

    pub fn kind(&self) -> MergeConflictKind {
        self.kind
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn observed(&self) -> &[(String, String)] {
        &self.observed
    }
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            MergeConflictKind::NodeIdentity => "conflicting node identity",
            MergeConflictKind::ChildIdentity => "conflicting child identity",
        };
        write!(f, "{} for {}:", what, self.subject)?;
        for (i, (source, value)) in self.observed.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}={}", sep, source, value)?;
        }
        Ok(())
    }
}

/// Provenance and expiration behind one merged node
///
/// Stored in the cache under `graft:mergePlan`. Only the provenance of each
/// contribution is kept; content lives in the cached node itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    contributions: Vec<Contribution>,
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<MergeConflict>,
}

impl MergePlan {
    pub fn new(contributions: &[Contribution], conflicts: Vec<MergeConflict>) -> Self {
        let expires_at = contributions.iter().filter_map(|c| c.expires_at()).min();
        MergePlan {
            contributions: contributions.iter().map(Contribution::provenance).collect(),
            expires_at,
            conflicts,
        }
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn contribution_count(&self) -> usize {
        self.contributions.len()
    }

    pub fn contribution_from(&self, source_name: &str) -> Option<&Contribution> {
        self.contributions
            .iter()
            .find(|c| c.source_name() == source_name)
    }

    /// Earliest expiration of any contribution
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn conflicts(&self) -> &[MergeConflict] {
        &self.conflicts
    }

    pub fn source_names(&self) -> BTreeSet<String> {
        self.contributions
            .iter()
            .map(|c| c.source_name().to_string())
            .collect()
    }

    /// Sources in the plan that are not configured any more
    pub fn unknown_sources(&self, configured: &BTreeSet<String>) -> BTreeSet<String> {
        self.source_names()
            .into_iter()
            .filter(|s| !configured.contains(s))
            .collect()
    }

    /// Configured sources that did not contribute to the plan
    pub fn missing_sources(&self, configured: &BTreeSet<String>) -> BTreeSet<String> {
        let present = self.source_names();
        configured
            .iter()
            .filter(|s| !present.contains(*s))
            .cloned()
            .collect()
    }

    /// Unexpired and contributed to by exactly the configured sources
    pub fn is_valid(&self, now: DateTime<Utc>, configured: &BTreeSet<String>) -> bool {
        !self.is_expired(now)
            && self.unknown_sources(configured).is_empty()
            && self.missing_sources(configured).is_empty()
    }

    pub fn to_property(&self) -> Result<Property, GraphError> {
        let json = serde_json::to_string(self).map_err(|e| {
            GraphError::InvalidRequest(format!("failed to serialize merge plan: {}", e))
        })?;
        Ok(Property::single(lexicon::MERGE_PLAN, Value::String(json)))
    }

    /// Read a plan back from its cache property
    ///
    /// Returns `None` when the property does not hold a readable plan.
    pub fn from_property(property: &Property) -> Option<MergePlan> {
        let json = property.first_value()?.as_str()?;
        serde_json::from_str(json).ok()
    }
}

pub trait MergeStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Populate `target` from `contributions`, in contribution order
    fn merge(&self, target: &mut FederatedNode, contributions: &[Contribution], context: &MergeContext);
}

/// Strategy for a federation that reduces to one simple projection
///
/// Copies the single non-empty contribution verbatim. Falls back to the
/// standard strategy when handed anything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneContributionMergeStrategy;

impl MergeStrategy for OneContributionMergeStrategy {
    fn name(&self) -> &'static str {
        "one-contribution"
    }

    fn merge(&self, target: &mut FederatedNode, contributions: &[Contribution], context: &MergeContext) {
        let mut non_empty = contributions.iter().filter(|c| !c.is_empty());
        let (Some(only), None) = (non_empty.next(), non_empty.next()) else {
            return StandardMergeStrategy.merge(target, contributions, context);
        };

        for property in only.properties().values() {
            if !is_reserved(property.name()) {
                target.set_property(property.clone());
            }
        }
        let parent = target.path().clone();
        let children = only
            .children()
            .iter()
            .filter_map(|child| {
                let segment = child.path()?.last_segment()?.clone();
                let path = parent.child_segment(segment);
                Some(match child.id() {
                    Some(id) => Location::new(path, id),
                    None => Location::from_path(path),
                })
            })
            .collect();
        target.set_children(children);
        finish(target, contributions, Vec::new(), context);
    }
}

/// Strategy for paths that several sources or rules may contribute to
///
/// Properties are merged last-contribution-wins per name. Children are the
/// union of every contribution's children in contribution order. A child
/// whose identity-property value was already seen from another source
/// collapses into that child; otherwise a child seen again under the same
/// name collapses into the first one unless identities say otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardMergeStrategy;

struct MergedChild {
    name: Name,
    id: Option<NodeId>,
    identity: Option<String>,
    /// Occurrence of the name within the contribution that introduced it
    occurrence: usize,
    /// (source, name) pairs of every child collapsed into this one
    seen: Vec<(String, Name)>,
}

impl StandardMergeStrategy {
    fn merge_properties(
        target: &mut FederatedNode,
        contributions: &[Contribution],
        context: &MergeContext,
    ) -> Option<MergeConflict> {
        let mut observed: Vec<(String, Value)> = Vec::new();
        for contribution in contributions {
            for (name, property) in contribution.properties() {
                if is_reserved(name) {
                    continue;
                }
                if name == context.identity_property() {
                    if let Some(value) = property.first_value() {
                        observed.push((contribution.source_name().to_string(), value.clone()));
                    }
                }
                target.set_property(property.clone());
            }
        }
        let distinct: BTreeSet<String> = observed.iter().map(|(_, v)| v.to_string()).collect();
        if distinct.len() < 2 {
            return None;
        }
        Some(MergeConflict::new(
            MergeConflictKind::NodeIdentity,
            target.path().to_string(),
            observed
                .into_iter()
                .map(|(source, value)| (source, value.to_string()))
                .collect(),
        ))
    }

    fn merge_children(
        target: &mut FederatedNode,
        contributions: &[Contribution],
        context: &MergeContext,
    ) -> Vec<MergeConflict> {
        let compare_ids = context.compares_child_ids();
        let mut merged: Vec<MergedChild> = Vec::new();

        for contribution in contributions {
            let source = contribution.source_name();
            let mut occurrences: HashMap<&Name, usize> = HashMap::new();
            for (index, child) in contribution.children().iter().enumerate() {
                let Some(segment) = child.path().and_then(|p| p.last_segment()) else {
                    continue;
                };
                let name = segment.name();
                let occurrence = {
                    let count = occurrences.entry(name).or_insert(0);
                    *count += 1;
                    *count
                };
                let id = if compare_ids { child.id() } else { None };
                let identity = context.child_identity(contribution, index);
                let from_other_source = |m: &MergedChild| !m.seen.iter().any(|(s, _)| s == source);

                let by_identity = identity.as_ref().and_then(|key| {
                    merged
                        .iter()
                        .position(|m| m.identity.as_ref() == Some(key) && from_other_source(m))
                });
                let by_name = || {
                    merged.iter().position(|m| {
                        m.name == *name
                            && m.occurrence == occurrence
                            && (m.identity.is_none() || identity.is_none() || m.identity == identity)
                            && from_other_source(m)
                    })
                };
                match by_identity.or_else(by_name) {
                    Some(position) => {
                        let existing = &mut merged[position];
                        if existing.id.is_none() {
                            existing.id = id;
                        }
                        if existing.identity.is_none() {
                            existing.identity = identity;
                        }
                        existing.seen.push((source.to_string(), name.clone()));
                    }
                    None => merged.push(MergedChild {
                        name: name.clone(),
                        id,
                        identity,
                        occurrence,
                        seen: vec![(source.to_string(), name.clone())],
                    }),
                }
            }
        }

        let conflicts = merged
            .iter()
            .filter(|m| m.seen.iter().any(|(_, n)| *n != m.name))
            .map(|m| {
                let subject = match &m.identity {
                    Some(identity) => format!("child {} of {}", identity, target.path()),
                    None => format!("child {} of {}", m.name, target.path()),
                };
                MergeConflict::new(
                    MergeConflictKind::ChildIdentity,
                    subject,
                    m.seen
                        .iter()
                        .map(|(s, n)| (s.clone(), n.to_string()))
                        .collect(),
                )
            })
            .collect();

        let parent = target.path().clone();
        let mut indexes: HashMap<Name, u32> = HashMap::new();
        let children = merged
            .into_iter()
            .map(|m| {
                let index = indexes.entry(m.name.clone()).or_insert(0);
                *index += 1;
                let path = parent.child_segment(Segment::with_index(m.name, *index));
                match m.id {
                    Some(id) => Location::new(path, id),
                    None => Location::from_path(path),
                }
            })
            .collect();
        target.set_children(children);
        conflicts
    }
}

impl MergeStrategy for StandardMergeStrategy {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn merge(&self, target: &mut FederatedNode, contributions: &[Contribution], context: &MergeContext) {
        let mut conflicts = Vec::new();
        conflicts.extend(Self::merge_properties(target, contributions, context));
        conflicts.extend(Self::merge_children(target, contributions, context));
        finish(target, contributions, conflicts, context);
    }
}

fn is_reserved(name: &Name) -> bool {
    name.as_str() == lexicon::UUID || name.as_str() == lexicon::MERGE_PLAN
}

/// Identity, conflicts, cache policy and plan shared by every strategy
fn finish(
    target: &mut FederatedNode,
    contributions: &[Contribution],
    conflicts: Vec<MergeConflict>,
    context: &MergeContext,
) {
    target.set_property(Property::single(lexicon::UUID, Value::Reference(target.id())));
    for conflict in &conflicts {
        target.add_conflict(conflict.clone());
    }
    let plan = MergePlan::new(contributions, conflicts);
    let policy = plan.expires_at().map(|at| {
        let remaining = (at - context.now()).num_milliseconds().max(0);
        CachePolicy::from_millis(u64::try_from(remaining).unwrap_or(0))
    });
    target.set_cache_policy(policy);
    target.set_merge_plan(plan);
}

/// Pick the strategy for a set of projections
///
/// One simple projection never needs more than a verbatim copy.
pub fn select_strategy(projections: &[Projection]) -> Arc<dyn MergeStrategy> {
    match projections {
        [only] if only.is_simple() => Arc::new(OneContributionMergeStrategy),
        _ => Arc::new(StandardMergeStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{properties_from, Path};
    use chrono::Duration;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn node_contribution(source: &str, props: Vec<Property>, children: &[&str]) -> Contribution {
        Contribution::node(
            source,
            "default",
            Location::from_path(p("/")),
            None,
            properties_from(props),
            children.iter().map(|c| Location::from_path(p(c))).collect(),
        )
    }

    fn merge_with(
        strategy: &dyn MergeStrategy,
        contributions: &[Contribution],
        identity: &str,
    ) -> FederatedNode {
        let mut node = FederatedNode::new(p("/"), NodeId::new());
        strategy.merge(&mut node, contributions, &MergeContext::new(identity, Utc::now()));
        node
    }

    fn child_paths(node: &FederatedNode) -> Vec<String> {
        node.children()
            .iter()
            .map(|c| c.path().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_last_contribution_wins_and_children_union() {
        let a = node_contribution("A", vec![Property::single("name", "a")], &["/c1"]);
        let b = node_contribution("B", vec![Property::single("name", "b")], &["/c2"]);
        let node = merge_with(&StandardMergeStrategy, &[a, b], lexicon::IDENTITY);
        assert_eq!(
            node.properties().get(&Name::from("name")).unwrap().first_value(),
            Some(&Value::from("b"))
        );
        assert_eq!(child_paths(&node), vec!["/c1", "/c2"]);
        assert!(!node.has_conflicts());
    }

    #[test]
    fn test_same_named_children_collapse() {
        let a = node_contribution("A", vec![], &["/docs", "/a"]);
        let b = node_contribution("B", vec![], &["/docs", "/b"]);
        let node = merge_with(&StandardMergeStrategy, &[a, b], lexicon::IDENTITY);
        assert_eq!(child_paths(&node), vec!["/docs", "/a", "/b"]);
    }

    #[test]
    fn test_same_name_siblings_within_one_source_stay_distinct() {
        let a = node_contribution("A", vec![], &["/x", "/x[2]"]);
        let b = node_contribution("B", vec![], &["/x"]);
        let node = merge_with(&StandardMergeStrategy, &[a, b], lexicon::IDENTITY);
        assert_eq!(child_paths(&node), vec!["/x", "/x[2]"]);
    }

    #[test]
    fn test_identity_conflict_is_reported() {
        let a = node_contribution("A", vec![Property::single(lexicon::IDENTITY, "one")], &[]);
        let b = node_contribution("B", vec![Property::single(lexicon::IDENTITY, "two")], &[]);
        let node = merge_with(&StandardMergeStrategy, &[a, b], lexicon::IDENTITY);
        assert_eq!(node.conflicts().len(), 1);
        let conflict = &node.conflicts()[0];
        assert_eq!(conflict.kind(), MergeConflictKind::NodeIdentity);
        assert_eq!(
            conflict.observed(),
            &[
                ("A".to_string(), "one".to_string()),
                ("B".to_string(), "two".to_string())
            ]
        );
        assert_eq!(node.merge_plan().unwrap().conflicts().len(), 1);
    }

    #[test]
    fn test_children_collapse_by_identifier() {
        let shared = NodeId::new();
        let a = Contribution::node(
            "A",
            "default",
            Location::root(),
            None,
            Default::default(),
            vec![Location::new(p("/left"), shared)],
        );
        let b = Contribution::node(
            "B",
            "default",
            Location::root(),
            None,
            Default::default(),
            vec![
                Location::new(p("/right"), shared),
                Location::new(p("/left"), NodeId::new()),
            ],
        );
        let node = merge_with(&StandardMergeStrategy, &[a, b], lexicon::UUID);
        assert_eq!(child_paths(&node), vec!["/left", "/left[2]"]);
        assert_eq!(node.children()[0].id(), Some(shared));
        assert_eq!(node.conflicts().len(), 1);
        assert_eq!(node.conflicts()[0].kind(), MergeConflictKind::ChildIdentity);
    }

    #[test]
    fn test_children_collapse_by_identity_property_value() {
        let a = node_contribution("A", vec![], &["/x", "/z"])
            .with_child_identities(vec![Some(Value::from("1")), None]);
        let b = node_contribution("B", vec![], &["/y", "/x"])
            .with_child_identities(vec![Some(Value::from("1")), Some(Value::from("2"))]);
        let node = merge_with(&StandardMergeStrategy, &[a, b], "myid");

        // b's /x carries another identity, so it is a second child named x
        assert_eq!(child_paths(&node), vec!["/x", "/z", "/x[2]"]);
        assert_eq!(node.conflicts().len(), 1);
        let conflict = &node.conflicts()[0];
        assert_eq!(conflict.kind(), MergeConflictKind::ChildIdentity);
        assert_eq!(
            conflict.observed(),
            &[
                ("A".to_string(), "x".to_string()),
                ("B".to_string(), "y".to_string())
            ]
        );
    }

    #[test]
    fn test_children_without_identity_values_collapse_by_name() {
        let a = node_contribution("A", vec![], &["/x"])
            .with_child_identities(vec![Some(Value::from("1"))]);
        let b = node_contribution("B", vec![], &["/x"]);
        let node = merge_with(&StandardMergeStrategy, &[a, b], "myid");
        assert_eq!(child_paths(&node), vec!["/x"]);
        assert!(!node.has_conflicts());
    }

    #[test]
    fn test_node_identity_is_the_federated_id() {
        let id = NodeId::new();
        let a = node_contribution(
            "A",
            vec![Property::single(lexicon::UUID, Value::Reference(NodeId::new()))],
            &[],
        );
        let mut node = FederatedNode::new(p("/"), id);
        OneContributionMergeStrategy.merge(
            &mut node,
            &[a],
            &MergeContext::new(lexicon::IDENTITY, Utc::now()),
        );
        assert_eq!(
            node.properties().get(&Name::from(lexicon::UUID)).unwrap().first_value(),
            Some(&Value::Reference(id))
        );
    }

    #[test]
    fn test_one_contribution_copies_verbatim() {
        let a = node_contribution("A", vec![Property::single("k", 1i64)], &["/x[2]", "/y"]);
        let empty = Contribution::empty("B", "default", None);
        let node = merge_with(&OneContributionMergeStrategy, &[empty, a], lexicon::IDENTITY);
        assert_eq!(child_paths(&node), vec!["/x[2]", "/y"]);
        assert_eq!(node.properties().len(), 2);
    }

    #[test]
    fn test_plan_tracks_earliest_expiration() {
        let now = Utc::now();
        let soon = Contribution::empty("A", "default", Some(now + Duration::seconds(5)));
        let later = Contribution::empty("B", "default", Some(now + Duration::seconds(50)));
        let plan = MergePlan::new(&[later, soon], vec![]);
        assert_eq!(plan.expires_at(), Some(now + Duration::seconds(5)));
        assert!(!plan.is_expired(now));
        assert!(plan.is_expired(now + Duration::seconds(5)));

        let configured: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        assert!(plan.is_valid(now, &configured));
        let shrunk: BTreeSet<String> = ["A"].iter().map(|s| s.to_string()).collect();
        assert_eq!(plan.unknown_sources(&shrunk), BTreeSet::from(["B".to_string()]));
        assert!(!plan.is_valid(now, &shrunk));
    }

    #[test]
    fn test_plan_property_round_trip() {
        let plan = MergePlan::new(&[Contribution::empty("A", "default", None)], vec![]);
        let property = plan.to_property().unwrap();
        assert_eq!(property.name().as_str(), lexicon::MERGE_PLAN);
        assert_eq!(MergePlan::from_property(&property), Some(plan));
        assert_eq!(
            MergePlan::from_property(&Property::single(lexicon::MERGE_PLAN, "garbage")),
            None
        );
    }

    #[test]
    fn test_strategy_selection() {
        let simple = Projection::parse("s1", "default", &["/ => /"], false).unwrap();
        let other = Projection::parse("s2", "default", &["/x => /"], false).unwrap();
        assert_eq!(select_strategy(&[simple.clone()]).name(), "one-contribution");
        assert_eq!(select_strategy(&[simple, other]).name(), "standard");
    }
}
