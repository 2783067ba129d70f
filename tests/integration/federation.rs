//! Federated reads, merging, caching and writes over in-memory sources

use super::test_utils::*;
use graft::config::{FanOutFailurePolicy, GraftConfig};
use graft::connector::InMemorySource;
use graft::execution::ExecutionContext;
use graft::federation::MergeConflictKind;
use graft::graph::{lexicon, Location, Name, Property, Value};
use graft::request::{
    CreateNodeRequest, DeleteBranchRequest, Operation, ReadNodeRequest, Request,
    UpdatePropertiesRequest,
};
use graft::GraphError;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

fn overlaid() -> GraftConfig {
    federated_config(vec![projection("a", &["/ => /"]), projection("b", &["/ => /"])])
}

fn mounted() -> GraftConfig {
    let mut config = federated_config(vec![
        projection("a", &["/a => /"]),
        projection("b", &["/b => /docs"]),
    ]);
    config.federation.projections[1].read_only = true;
    config
}

#[test]
fn test_overlaid_sources_merge_children_and_properties() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[("title", "from a"), ("owner", "ann")]);
    seed(&fx.a, "/only-a", &[]);
    seed(&fx.b, "/docs", &[("title", "from b")]);
    seed(&fx.b, "/only-b", &[]);

    assert_eq!(
        child_names(&fx.repository, "/"),
        vec!["docs", "only-a", "only-b"]
    );

    let docs = read_node(&fx.repository, "/docs").unwrap();
    assert_eq!(string_property(&docs, "title").as_deref(), Some("from b"));
    assert_eq!(string_property(&docs, "owner").as_deref(), Some("ann"));
    let uuid = docs
        .properties
        .get(&Name::from(lexicon::UUID))
        .and_then(|p| p.first_value())
        .and_then(Value::as_reference);
    assert_eq!(uuid, docs.location.id());
    assert!(!docs.properties.contains_key(&Name::from(lexicon::MERGE_PLAN)));
}

#[test]
fn test_merged_node_is_cached_with_its_plan() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[("title", "from a")]);
    seed(&fx.b, "/docs", &[("title", "from b")]);

    read_node(&fx.repository, "/docs").unwrap();

    let cached = read_direct(&fx.cache, "/docs").unwrap();
    assert_eq!(string_property(&cached, "title").as_deref(), Some("from b"));
    assert!(cached
        .properties
        .contains_key(&Name::from(lexicon::MERGE_PLAN)));
}

#[test]
fn test_valid_plan_serves_node_without_sources() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[("title", "from a")]);
    seed(&fx.b, "/docs", &[("title", "from b")]);
    let first = read_node(&fx.repository, "/docs").unwrap();

    fx.a.set_available(false);
    fx.b.set_available(false);
    let attempts = (fx.a.connect_attempts(), fx.b.connect_attempts());

    let second = read_node(&fx.repository, "/docs").unwrap();
    assert_eq!(second.location, first.location);
    assert_eq!(string_property(&second, "title").as_deref(), Some("from b"));
    assert_eq!((fx.a.connect_attempts(), fx.b.connect_attempts()), attempts);
}

#[test]
fn test_expired_plan_reloads_node() {
    let mut config = overlaid();
    config.federation.default_cache_ttl_ms = Some(1);
    let fx = Federated::new(config);
    seed(&fx.a, "/docs", &[("title", "from a")]);
    seed(&fx.b, "/docs", &[("title", "from b")]);
    let first = read_node(&fx.repository, "/docs").unwrap();

    seed(&fx.b, "/docs", &[("title", "newer")]);
    thread::sleep(Duration::from_millis(20));

    let second = read_node(&fx.repository, "/docs").unwrap();
    assert_eq!(string_property(&second, "title").as_deref(), Some("newer"));
    // the federated identity survives the reload
    assert_eq!(second.location.id(), first.location.id());
}

#[test]
fn test_plan_missing_a_configured_source_reloads_node() {
    let a = InMemorySource::new("a");
    let b = InMemorySource::new("b");
    let cache = InMemorySource::new("cache");
    seed(&a, "/docs", &[("title", "from a")]);
    seed(&b, "/docs", &[("title", "from b")]);

    let only_a = federated_config(vec![projection("a", &["/ => /", "/mirror => /docs"])]);
    let before = Federated::with_sources(only_a, a.clone(), b.clone(), cache.clone());
    let docs = read_node(&before.repository, "/docs").unwrap();
    assert_eq!(string_property(&docs, "title").as_deref(), Some("from a"));

    let after = Federated::with_sources(overlaid(), a, b, cache);
    let docs = read_node(&after.repository, "/docs").unwrap();
    assert_eq!(string_property(&docs, "title").as_deref(), Some("from b"));
}

#[test]
fn test_mounted_projections_appear_under_their_paths() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x", &[("k", "1")]);
    seed(&fx.b, "/docs/y", &[("k", "2")]);
    seed(&fx.b, "/elsewhere", &[]);

    assert_eq!(child_names(&fx.repository, "/"), vec!["a", "b"]);
    assert_eq!(child_names(&fx.repository, "/b"), vec!["y"]);

    let y = read_node(&fx.repository, "/b/y").unwrap();
    assert_eq!(y.location.path(), Some(&path("/b/y")));
    assert_eq!(string_property(&y, "k").as_deref(), Some("2"));
}

#[test]
fn test_unmapped_path_is_not_found() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x", &[]);

    match read_node(&fx.repository, "/c/d") {
        Err(GraphError::PathNotFound { location, .. }) => {
            assert_eq!(location.path(), Some(&path("/c/d")))
        }
        other => panic!("expected a missing path, got {:?}", other),
    }
}

#[test]
fn test_deep_read_caches_missing_ancestors() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs/deep/leaf", &[("k", "v")]);

    let leaf = read_node(&fx.repository, "/docs/deep/leaf").unwrap();
    assert_eq!(string_property(&leaf, "k").as_deref(), Some("v"));

    for ancestor in ["/docs", "/docs/deep", "/docs/deep/leaf"] {
        let cached = read_direct(&fx.cache, ancestor).unwrap();
        assert!(
            cached
                .properties
                .contains_key(&Name::from(lexicon::MERGE_PLAN)),
            "{} was not merged into the cache",
            ancestor
        );
    }
}

#[test]
fn test_read_by_identifier() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[("title", "from a")]);
    let docs = read_node(&fx.repository, "/docs").unwrap();
    let id = docs.location.id().unwrap();

    match execute(&fx.repository, ReadNodeRequest::new(Location::from_id(id))) {
        Request::ReadNode(read) => {
            let data = read.result().unwrap();
            assert_eq!(data.location.path(), Some(&path("/docs")));
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_failed_source_is_omitted_by_default() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[("title", "from a")]);
    seed(&fx.b, "/docs", &[("title", "from b")]);
    fx.b.set_available(false);

    let docs = read_node(&fx.repository, "/docs").unwrap();
    assert_eq!(string_property(&docs, "title").as_deref(), Some("from a"));

    // the plan lacks b, so the next read asks b again
    fx.b.set_available(true);
    let docs = read_node(&fx.repository, "/docs").unwrap();
    assert_eq!(string_property(&docs, "title").as_deref(), Some("from b"));
}

#[test]
fn test_failed_source_fails_read_when_configured() {
    let mut config = overlaid();
    config.federation.fan_out_failure = FanOutFailurePolicy::Fail;
    let fx = Federated::new(config);
    seed(&fx.a, "/docs", &[("title", "from a")]);
    fx.b.set_available(false);

    let err = read_node(&fx.repository, "/docs").unwrap_err();
    assert!(err.is_retryable(), "unexpected error {:?}", err);
    match err {
        GraphError::Source { source_name, .. } => assert_eq!(source_name, "b"),
        other => panic!("expected a failure of source b, got {:?}", other),
    }
}

#[test]
fn test_every_source_failing_reports_the_failure() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[]);
    fx.a.set_available(false);
    fx.b.set_available(false);

    let err = read_node(&fx.repository, "/docs").unwrap_err();
    assert!(!err.is_path_not_found(), "unexpected error {:?}", err);
}

#[test]
fn test_conflicting_identities_are_reported() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[(lexicon::IDENTITY, "one")]);
    seed(&fx.b, "/docs", &[(lexicon::IDENTITY, "two")]);

    let node = fx
        .repository
        .get_node(ExecutionContext::new(), &loc("/docs"))
        .unwrap();
    assert!(node.has_conflicts());
    assert_eq!(node.conflicts()[0].kind(), MergeConflictKind::NodeIdentity);
    assert_eq!(node.merge_plan().unwrap().contribution_count(), 2);
}

#[test]
fn test_children_with_equal_identity_values_collapse() {
    let mut config = overlaid();
    config.federation.identity_property = "myid".to_string();
    let fx = Federated::new(config);
    seed(&fx.a, "/x", &[("myid", "1")]);
    seed(&fx.b, "/y", &[("myid", "1")]);
    seed(&fx.b, "/z", &[("myid", "2")]);

    assert_eq!(child_names(&fx.repository, "/"), vec!["x", "z"]);

    let root = fx
        .repository
        .get_node(ExecutionContext::new(), &loc("/"))
        .unwrap();
    assert_eq!(root.conflicts().len(), 1);
    assert_eq!(root.conflicts()[0].kind(), MergeConflictKind::ChildIdentity);
}

#[test]
fn test_other_workspaces_are_rejected() {
    let fx = Federated::new(overlaid());
    match execute(
        &fx.repository,
        ReadNodeRequest::new(loc("/")).in_workspace("elsewhere"),
    ) {
        Request::ReadNode(read) => {
            assert!(matches!(read.error(), Some(GraphError::InvalidRequest(_))))
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_create_goes_to_the_writable_projection() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x", &[]);
    assert_eq!(child_names(&fx.repository, "/a"), vec!["x"]);

    let created = execute(
        &fx.repository,
        CreateNodeRequest::new(loc("/a"), "new").with_property(Property::single("k", "v")),
    );
    let Request::CreateNode(created) = created else {
        unreachable!()
    };
    assert_eq!(created.result().unwrap().path(), Some(&path("/a/new")));

    let stored = read_direct(&fx.a, "/new").unwrap();
    assert_eq!(string_property(&stored, "k").as_deref(), Some("v"));
    assert_eq!(child_names(&fx.repository, "/a"), vec!["x", "new"]);
}

#[test]
fn test_update_invalidates_the_cached_node() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x", &[("k", "old")]);
    read_node(&fx.repository, "/a/x").unwrap();

    let updated = execute(
        &fx.repository,
        UpdatePropertiesRequest::new(loc("/a/x")).set(Property::single("k", "new")),
    );
    assert!(updated.is_completed(), "{:?}", updated.error());

    let x = read_node(&fx.repository, "/a/x").unwrap();
    assert_eq!(string_property(&x, "k").as_deref(), Some("new"));
}

#[test]
fn test_writes_need_exactly_one_writable_projection() {
    let fx = Federated::new(mounted());
    seed(&fx.b, "/docs/y", &[]);

    let read_only = execute(&fx.repository, CreateNodeRequest::new(loc("/b"), "z"));
    assert!(matches!(
        read_only.error(),
        Some(GraphError::InvalidRequest(_))
    ));

    let uncovered = execute(&fx.repository, CreateNodeRequest::new(loc("/"), "z"));
    assert!(matches!(
        uncovered.error(),
        Some(GraphError::InvalidRequest(_))
    ));

    let overlapping = Federated::new(overlaid());
    let ambiguous = execute(
        &overlapping.repository,
        CreateNodeRequest::new(loc("/"), "z"),
    );
    assert!(matches!(
        ambiguous.error(),
        Some(GraphError::InvalidRequest(_))
    ));
}

#[test]
fn test_delete_removes_branch_from_source_and_cache() {
    let fx = Federated::new(mounted());
    seed(&fx.a, "/x/inner", &[]);
    seed(&fx.a, "/keep", &[]);
    assert_eq!(child_names(&fx.repository, "/a"), vec!["x", "keep"]);
    read_node(&fx.repository, "/a/x/inner").unwrap();

    let deleted = execute(&fx.repository, DeleteBranchRequest::new(loc("/a/x")));
    assert!(deleted.is_completed(), "{:?}", deleted.error());

    assert!(read_direct(&fx.a, "/x").unwrap_err().is_path_not_found());
    assert!(read_direct(&fx.cache, "/a/x").unwrap_err().is_path_not_found());
    assert!(read_node(&fx.repository, "/a/x/inner")
        .unwrap_err()
        .is_path_not_found());
    assert_eq!(child_names(&fx.repository, "/a"), vec!["keep"]);
}

#[test]
fn test_root_cannot_be_deleted() {
    let fx = Federated::new(mounted());
    let deleted = execute(&fx.repository, DeleteBranchRequest::new(loc("/")));
    assert!(matches!(
        deleted.error(),
        Some(GraphError::InvalidRequest(_))
    ));
}

#[test]
fn test_concurrent_reads_share_the_cache() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs", &[("title", "from a")]);
    let first = read_node(&fx.repository, "/docs").unwrap();

    let repository = &fx.repository;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| read_node(repository, "/docs").unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().location, first.location);
        }
    });
}

#[test]
fn test_concurrent_cold_reads_cache_each_node_once() {
    let fx = Federated::new(overlaid());
    seed(&fx.a, "/docs/guide", &[("title", "from a")]);
    seed(&fx.b, "/docs/notes", &[]);

    let repository = &fx.repository;
    let start = Barrier::new(8);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                start.wait();
                let guide = read_node(repository, "/docs/guide").unwrap();
                assert_eq!(string_property(&guide, "title").as_deref(), Some("from a"));
            });
        }
    });

    assert_eq!(child_names(&fx.repository, "/"), vec!["docs"]);
    assert_eq!(child_names(&fx.repository, "/docs"), vec!["guide", "notes"]);
    assert_eq!(read_direct(&fx.cache, "/").unwrap().children.len(), 1);
    assert_eq!(read_direct(&fx.cache, "/docs").unwrap().children.len(), 2);
}
