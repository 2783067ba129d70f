//! Net-change computation
//!
//! Reduces one `Changes` batch to at most one `NetChange` per node and
//! workspace. Property events within a batch collapse (added then changed is
//! still added, added then removed is nothing). Deleting a node discards every
//! earlier event recorded for it and its descendants and leaves a single
//! `NodeRemoved`, even when the node was created in the same batch.

use crate::graph::{Location, Name, Path, Property};
use crate::observe::{Changes, Observer};
use crate::request::{Operation, Request};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeEvent {
    NodeAdded,
    NodeMoved,
    NodeRemoved,
    PropertyAdded,
    PropertyRemoved,
    PropertyChanged,
}

impl ChangeEvent {
    const ALL: [ChangeEvent; 6] = [
        ChangeEvent::NodeAdded,
        ChangeEvent::NodeMoved,
        ChangeEvent::NodeRemoved,
        ChangeEvent::PropertyAdded,
        ChangeEvent::PropertyRemoved,
        ChangeEvent::PropertyChanged,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeEvent::NodeAdded => "NODE_ADDED",
            ChangeEvent::NodeMoved => "NODE_MOVED",
            ChangeEvent::NodeRemoved => "NODE_REMOVED",
            ChangeEvent::PropertyAdded => "PROPERTY_ADDED",
            ChangeEvent::PropertyRemoved => "PROPERTY_REMOVED",
            ChangeEvent::PropertyChanged => "PROPERTY_CHANGED",
        };
        f.write_str(name)
    }
}

/// Set of change events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeEvents(u8);

impl ChangeEvents {
    pub fn insert(&mut self, event: ChangeEvent) {
        self.0 |= event.bit();
    }

    pub fn remove(&mut self, event: ChangeEvent) {
        self.0 &= !event.bit();
    }

    pub fn contains(&self, event: ChangeEvent) -> bool {
        self.0 & event.bit() != 0
    }

    /// True if any of `events` is present
    pub fn includes(&self, events: &[ChangeEvent]) -> bool {
        events.iter().any(|e| self.contains(*e))
    }

    pub fn includes_all(&self, events: &[ChangeEvent]) -> bool {
        events.iter().all(|e| self.contains(*e))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = ChangeEvent> + '_ {
        ChangeEvent::ALL.into_iter().filter(move |e| self.contains(*e))
    }
}

impl FromIterator<ChangeEvent> for ChangeEvents {
    fn from_iter<I: IntoIterator<Item = ChangeEvent>>(iter: I) -> Self {
        let mut events = ChangeEvents::default();
        for event in iter {
            events.insert(event);
        }
        events
    }
}

/// Net effect of one batch on one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetChange {
    pub workspace: String,
    pub location: Location,
    pub events: ChangeEvents,
    pub added_properties: BTreeMap<Name, Property>,
    pub modified_properties: BTreeMap<Name, Property>,
    pub removed_properties: BTreeSet<Name>,
    /// Location before the node was moved or renamed
    pub moved_from: Option<Location>,
}

impl NetChange {
    pub fn path(&self) -> Option<&Path> {
        self.location.path()
    }

    pub fn includes(&self, events: &[ChangeEvent]) -> bool {
        self.events.includes(events)
    }

    pub fn is_same_node(&self, other: &NetChange) -> bool {
        self.workspace == other.workspace && self.location.is_same(&other.location)
    }
}

impl fmt::Display for NetChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=>{} [", self.workspace, self.location)?;
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", event)?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone)]
struct Details {
    location: Location,
    node_events: ChangeEvents,
    added: BTreeMap<Name, Property>,
    modified: BTreeMap<Name, Property>,
    removed: BTreeSet<Name>,
    moved_from: Option<Location>,
}

impl Details {
    fn new(location: Location) -> Self {
        Details {
            location,
            node_events: ChangeEvents::default(),
            added: BTreeMap::new(),
            modified: BTreeMap::new(),
            removed: BTreeSet::new(),
            moved_from: None,
        }
    }

    fn removed_at(location: Location) -> Self {
        let mut details = Details::new(location);
        details.node_events.insert(ChangeEvent::NodeRemoved);
        details
    }

    fn refine_location(&mut self, location: &Location) {
        if location.has_id() || !self.location.has_id() {
            self.location = location.clone();
        }
    }

    fn add_property(&mut self, property: Property) {
        let name = property.name().clone();
        if self.removed.remove(&name) {
            // removed then re-added within the batch reads as a change
            self.modified.insert(name, property);
        } else {
            self.added.insert(name, property);
        }
    }

    fn change_property(&mut self, property: Property) {
        let name = property.name().clone();
        match self.added.get_mut(&name) {
            Some(added) => *added = property,
            None => {
                self.modified.insert(name, property);
            }
        }
    }

    fn remove_property(&mut self, name: &Name) {
        if self.added.remove(name).is_some() {
            return;
        }
        self.modified.remove(name);
        self.removed.insert(name.clone());
    }

    fn events(&self) -> ChangeEvents {
        let mut events = self.node_events;
        if !self.added.is_empty() {
            events.insert(ChangeEvent::PropertyAdded);
        }
        if !self.modified.is_empty() {
            events.insert(ChangeEvent::PropertyChanged);
        }
        if !self.removed.is_empty() {
            events.insert(ChangeEvent::PropertyRemoved);
        }
        events
    }

    fn into_net_change(self, workspace: &str) -> Option<NetChange> {
        let events = self.events();
        if events.is_empty() {
            return None;
        }
        Some(NetChange {
            workspace: workspace.to_string(),
            location: self.location,
            events,
            added_properties: self.added,
            modified_properties: self.modified,
            removed_properties: self.removed,
            moved_from: self.moved_from,
        })
    }
}

/// Change details of one batch, per workspace and node path
///
/// A path can hold several generations of details when a node is moved onto
/// a path whose previous node was removed in the same batch.
#[derive(Default)]
struct ChangeContext {
    by_workspace: BTreeMap<String, BTreeMap<Path, Vec<Details>>>,
}

impl ChangeContext {
    fn details_for(&mut self, workspace: &str, location: &Location, path: &Path) -> &mut Details {
        let generations = self
            .by_workspace
            .entry(workspace.to_string())
            .or_default()
            .entry(path.clone())
            .or_default();
        if generations.is_empty() {
            generations.push(Details::new(location.clone()));
        }
        let latest = generations.len() - 1;
        let details = &mut generations[latest];
        details.refine_location(location);
        details
    }

    fn delete(&mut self, workspace: &str, location: &Location, path: &Path) {
        let by_path = self.by_workspace.entry(workspace.to_string()).or_default();
        by_path.retain(|p, _| !p.is_descendant_of(path));
        let generations = by_path.entry(path.clone()).or_default();
        let location = generations
            .last()
            .map(|d| {
                let mut latest = d.location.clone();
                if !latest.has_id() {
                    latest = location.clone();
                }
                latest
            })
            .unwrap_or_else(|| location.clone());
        generations.pop();
        generations.push(Details::removed_at(location));
    }

    fn move_node(&mut self, workspace: &str, from: &Location, to: &Location) {
        let (Some(from_path), Some(to_path)) = (from.path(), to.path()) else {
            warn!(from = %from, to = %to, "Skipping move without paths in net-change computation");
            return;
        };
        if from_path == to_path {
            return;
        }
        let by_path = self.by_workspace.entry(workspace.to_string()).or_default();

        let moved = by_path
            .remove(from_path)
            .and_then(|mut generations| generations.pop());
        let mut details = moved.unwrap_or_else(|| Details::new(from.clone()));
        details.location = to.clone();
        if !details.node_events.contains(ChangeEvent::NodeAdded) {
            details.node_events.insert(ChangeEvent::NodeMoved);
            if details.moved_from.is_none() {
                details.moved_from = Some(from.clone());
            }
        }

        // descendants travel with the node
        let descendants: Vec<Path> = by_path
            .keys()
            .filter(|p| p.is_descendant_of(from_path))
            .cloned()
            .collect();
        for old in descendants {
            if let (Some(generations), Some(relative)) =
                (by_path.remove(&old), old.relative_to(from_path))
            {
                let new_path = to_path.join(&relative);
                let generations = generations
                    .into_iter()
                    .map(|mut d| {
                        d.location = d.location.with_path(new_path.clone());
                        d
                    })
                    .collect();
                by_path.insert(new_path, generations);
            }
        }

        by_path.entry(to_path.clone()).or_default().push(details);
    }

    fn into_net_changes(self) -> Vec<NetChange> {
        let mut net = Vec::new();
        for (workspace, by_path) in self.by_workspace {
            for (_, generations) in by_path {
                net.extend(
                    generations
                        .into_iter()
                        .filter_map(|d| d.into_net_change(&workspace)),
                );
            }
        }
        net
    }
}

fn path_of(location: &Location) -> Option<&Path> {
    let path = location.path();
    if path.is_none() {
        warn!(location = %location, "Skipping change without a path in net-change computation");
    }
    path
}

/// Reduce one batch to its net changes, ordered by workspace and then path
pub fn compute_net_changes(changes: &Changes) -> Vec<NetChange> {
    let mut context = ChangeContext::default();
    for change in changes.requests() {
        let workspace = change.workspace().to_string();
        match change {
            Request::CreateNode(create) => {
                let Some(location) = create.result() else { continue };
                let Some(path) = path_of(location) else { continue };
                let details = context.details_for(&workspace, location, path);
                details.node_events.insert(ChangeEvent::NodeAdded);
                for property in create.properties() {
                    details.add_property(property.clone());
                }
            }
            Request::UpdateProperties(update) => {
                let Some(data) = update.result() else { continue };
                let Some(path) = path_of(&data.location) else { continue };
                let details = context.details_for(&workspace, &data.location, path);
                for (name, property) in update.properties() {
                    match property {
                        Some(p) if data.created.contains(name) => details.add_property(p.clone()),
                        Some(p) => details.change_property(p.clone()),
                        None => details.remove_property(name),
                    }
                }
            }
            Request::SetProperty(set) => {
                let Some(data) = set.result() else { continue };
                let Some(path) = path_of(&data.location) else { continue };
                let details = context.details_for(&workspace, &data.location, path);
                if data.is_new {
                    details.add_property(set.property().clone());
                } else {
                    details.change_property(set.property().clone());
                }
            }
            Request::RemoveProperty(remove) => {
                let Some(location) = remove.result() else { continue };
                let Some(path) = path_of(location) else { continue };
                context
                    .details_for(&workspace, location, path)
                    .remove_property(remove.name());
            }
            Request::DeleteBranch(delete) => {
                let Some(location) = delete.result() else { continue };
                let Some(path) = path_of(location) else { continue };
                context.delete(&workspace, location, path);
            }
            Request::DeleteChildren(delete) => {
                let Some(data) = delete.result() else { continue };
                for child in &data.deleted {
                    if let Some(path) = path_of(child) {
                        context.delete(&workspace, child, path);
                    }
                }
            }
            Request::CopyBranch(copy) => {
                let Some(data) = copy.result() else { continue };
                let Some(path) = path_of(&data.copy) else { continue };
                context
                    .details_for(&workspace, &data.copy, path)
                    .node_events
                    .insert(ChangeEvent::NodeAdded);
            }
            Request::MoveBranch(mv) => {
                if let Some(data) = mv.result() {
                    context.move_node(&workspace, &data.before, &data.after);
                }
            }
            Request::RenameNode(rename) => {
                if let Some(data) = rename.result() {
                    context.move_node(&workspace, &data.before, &data.after);
                }
            }
            _ => {}
        }
    }
    context.into_net_changes()
}

/// Receiver of computed net changes
pub trait NetChangeListener: Send + Sync {
    fn notify_net_changes(&self, changes: &Changes, net_changes: &[NetChange]);
}

impl<F> NetChangeListener for F
where
    F: Fn(&Changes, &[NetChange]) + Send + Sync,
{
    fn notify_net_changes(&self, changes: &Changes, net_changes: &[NetChange]) {
        self(changes, net_changes)
    }
}

/// Observer that reduces each batch before handing it to a listener
///
/// Batches whose net effect is empty are not forwarded.
pub struct NetChangeObserver<L> {
    listener: L,
}

impl<L: NetChangeListener> NetChangeObserver<L> {
    pub fn new(listener: L) -> Self {
        NetChangeObserver { listener }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }
}

impl<L: NetChangeListener> Observer for NetChangeObserver<L> {
    fn notify(&self, changes: &Changes) {
        let net_changes = compute_net_changes(changes);
        if !net_changes.is_empty() {
            self.listener.notify_net_changes(changes, &net_changes);
        }
    }
}
