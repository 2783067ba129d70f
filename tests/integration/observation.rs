//! Change batches published by federated units of work

use super::test_utils::*;
use graft::config::GraftConfig;
use graft::graph::{Name, Property};
use graft::observe::{ChangeEvent, ChangeHistory, Changes, NetChange, NetChangeObserver, Observer};
use graft::request::{
    CompositeRequest, CreateNodeRequest, DeleteBranchRequest, ReadNodeRequest,
    UpdatePropertiesRequest,
};
use parking_lot::Mutex;
use std::sync::Arc;

fn mounted() -> GraftConfig {
    federated_config(vec![
        projection("a", &["/a => /"]),
        projection("b", &["/b => /docs"]),
    ])
}

type Collected = Arc<Mutex<Vec<NetChange>>>;

fn net_change_observer() -> (Arc<dyn Observer>, Collected) {
    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let observer = NetChangeObserver::new(move |_: &Changes, net: &[NetChange]| {
        sink.lock().extend(net.iter().cloned());
    });
    (Arc::new(observer), collected)
}

#[test]
fn test_committed_change_is_published_once() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x", &[]);
    let history = Arc::new(ChangeHistory::new(chrono::Duration::hours(1), 100));
    let (observer, collected) = net_change_observer();
    assert!(fx.repository.register_observer(history.clone()));
    assert!(fx.repository.register_observer(observer));

    read_node(&fx.repository, "/a/x").unwrap();
    assert!(history.is_empty());

    execute(
        &fx.repository,
        CreateNodeRequest::new(loc("/a"), "new").with_property(Property::single("k", "v")),
    );
    assert_eq!(history.len(), 1);

    let timeline = history.timeline_since(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    let batch = &timeline.changes()[0];
    assert_eq!(batch.source_name(), "test");
    assert_eq!(batch.user(), "tester");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.sequence(), 1);

    let net = collected.lock();
    assert_eq!(net.len(), 1);
    assert_eq!(net[0].path(), Some(&path("/a/new")));
    assert!(net[0].events.includes_all(&[ChangeEvent::NodeAdded, ChangeEvent::PropertyAdded]));
    assert!(net[0].added_properties.contains_key(&Name::from("k")));
}

#[test]
fn test_failed_change_is_not_published() {
    let fx = Federated::new(mounted());
    let history = Arc::new(ChangeHistory::new(chrono::Duration::hours(1), 100));
    fx.repository.register_observer(history.clone());

    execute(&fx.repository, CreateNodeRequest::new(loc("/"), "nowhere"));
    execute(&fx.repository, DeleteBranchRequest::new(loc("/a/missing")));
    assert!(history.is_empty());
}

#[test]
fn test_batch_reduces_to_net_changes() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x", &[("k", "old")]);
    let (observer, collected) = net_change_observer();
    fx.repository.register_observer(observer);

    execute(
        &fx.repository,
        CompositeRequest::new(vec![
            CreateNodeRequest::new(loc("/a"), "tmp").into(),
            UpdatePropertiesRequest::new(loc("/a/x"))
                .set(Property::single("k", "new"))
                .into(),
            DeleteBranchRequest::new(loc("/a/tmp")).into(),
            ReadNodeRequest::new(loc("/a/x")).into(),
        ]),
    );

    let net = collected.lock();
    assert_eq!(net.len(), 2);
    let tmp = net.iter().find(|n| n.path() == Some(&path("/a/tmp"))).unwrap();
    assert!(tmp.includes(&[ChangeEvent::NodeRemoved]));
    assert!(!tmp.includes(&[ChangeEvent::NodeAdded]));
    let x = net.iter().find(|n| n.path() == Some(&path("/a/x"))).unwrap();
    assert_eq!(x.events.len(), 1);
    assert!(x.modified_properties.contains_key(&Name::from("k")));
}

#[test]
fn test_sources_report_their_own_paths() {
    let fx = Federated::new(mounted());
    let source_history = Arc::new(ChangeHistory::new(chrono::Duration::hours(1), 100));
    fx.a.set_observer(Some(source_history.clone()));
    let (observer, collected) = net_change_observer();
    fx.repository.register_observer(observer);

    execute(&fx.repository, CreateNodeRequest::new(loc("/a"), "new"));

    let timeline = source_history.timeline_since(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    let source_batch = &timeline.changes()[0];
    assert_eq!(source_batch.source_name(), "a");
    let source_net = graft::observe::compute_net_changes(source_batch);
    assert_eq!(source_net[0].path(), Some(&path("/new")));
    assert_eq!(collected.lock()[0].path(), Some(&path("/a/new")));
}

#[test]
fn test_unregistered_and_shut_down_observers_stop_receiving() {
    let fx = Federated::new(mounted());
    let history = Arc::new(ChangeHistory::new(chrono::Duration::hours(1), 100));
    let observer: Arc<dyn Observer> = history.clone();
    assert!(fx.repository.register_observer(observer.clone()));
    assert!(!fx.repository.register_observer(observer.clone()));

    execute(&fx.repository, CreateNodeRequest::new(loc("/a"), "one"));
    assert!(fx.repository.unregister_observer(&observer));
    execute(&fx.repository, CreateNodeRequest::new(loc("/a"), "two"));
    assert_eq!(history.len(), 1);

    fx.repository.bus().shutdown();
    assert!(!fx.repository.register_observer(observer));
}
