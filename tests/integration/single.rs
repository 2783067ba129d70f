//! One source mounted by one rule: requests are rewritten, never merged

use super::test_utils::*;
use graft::config::GraftConfig;
use graft::execution::ExecutionContext;
use graft::graph::Property;
use graft::request::{
    CopyBranchRequest, CreateNodeRequest, DeleteBranchRequest, MoveBranchRequest, Operation,
    ReadNodeRequest, Request, UpdatePropertiesRequest,
};
use graft::GraphError;

fn mounted_docs() -> GraftConfig {
    let mut config = federated_config(vec![projection("a", &["/content => /docs"])]);
    config.federation.cache = None;
    config
}

#[test]
fn test_ancestors_of_the_mount_lead_to_it() {
    let fx = Federated::new(mounted_docs());
    seed(&fx.a, "/docs/page", &[]);

    assert_eq!(child_names(&fx.repository, "/"), vec!["content"]);
    let root = read_node(&fx.repository, "/").unwrap();
    assert!(root.properties.is_empty());
}

#[test]
fn test_reads_are_translated_both_ways() {
    let fx = Federated::new(mounted_docs());
    let stored = seed(&fx.a, "/docs/page", &[("title", "home")]);
    seed(&fx.a, "/docs/page/section", &[]);

    let page = read_node(&fx.repository, "/content/page").unwrap();
    assert_eq!(page.location.path(), Some(&path("/content/page")));
    assert_eq!(page.location.id(), stored.id());
    assert_eq!(string_property(&page, "title").as_deref(), Some("home"));
    assert_eq!(
        page.children[0].path(),
        Some(&path("/content/page/section"))
    );
}

#[test]
fn test_missing_and_unmapped_paths() {
    let fx = Federated::new(mounted_docs());
    seed(&fx.a, "/docs/page", &[]);

    match read_node(&fx.repository, "/content/page/missing") {
        Err(GraphError::PathNotFound {
            location,
            lowest_existing,
        }) => {
            assert_eq!(location.path(), Some(&path("/content/page/missing")));
            assert_eq!(lowest_existing, Some(path("/content/page")));
        }
        other => panic!("expected a missing path, got {:?}", other),
    }
    assert!(read_node(&fx.repository, "/other")
        .unwrap_err()
        .is_path_not_found());
}

#[test]
fn test_changes_reach_the_source() {
    let fx = Federated::new(mounted_docs());
    seed(&fx.a, "/docs/page", &[]);
    seed(&fx.a, "/docs/archive", &[]);

    let Request::CreateNode(created) = execute(
        &fx.repository,
        CreateNodeRequest::new(loc("/content/page"), "note")
            .with_property(Property::single("k", "v")),
    ) else {
        unreachable!()
    };
    assert_eq!(
        created.result().unwrap().path(),
        Some(&path("/content/page/note"))
    );
    let note = read_direct(&fx.a, "/docs/page/note").unwrap();
    assert_eq!(string_property(&note, "k").as_deref(), Some("v"));

    let updated = execute(
        &fx.repository,
        UpdatePropertiesRequest::new(loc("/content/page/note")).remove("k"),
    );
    assert!(updated.is_completed());

    let Request::CopyBranch(copied) = execute(
        &fx.repository,
        CopyBranchRequest::new(loc("/content/page"), loc("/content/archive")),
    ) else {
        unreachable!()
    };
    assert_eq!(
        copied.result().unwrap().copy.path(),
        Some(&path("/content/archive/page"))
    );

    let Request::MoveBranch(moved) = execute(
        &fx.repository,
        MoveBranchRequest::new(loc("/content/page/note"), loc("/content/archive")),
    ) else {
        unreachable!()
    };
    assert_eq!(
        moved.result().unwrap().after.path(),
        Some(&path("/content/archive/note"))
    );

    let deleted = execute(&fx.repository, DeleteBranchRequest::new(loc("/content/archive")));
    assert!(deleted.is_completed());
    assert!(read_direct(&fx.a, "/docs/archive")
        .unwrap_err()
        .is_path_not_found());
}

#[test]
fn test_read_only_mount_rejects_changes() {
    let mut config = mounted_docs();
    config.federation.projections[0].read_only = true;
    let fx = Federated::new(config);
    seed(&fx.a, "/docs/page", &[]);

    let created = execute(
        &fx.repository,
        CreateNodeRequest::new(loc("/content"), "note"),
    );
    assert!(matches!(
        created.error(),
        Some(GraphError::InvalidRequest(_))
    ));
    assert!(read_node(&fx.repository, "/content/page").is_ok());
}

#[test]
fn test_other_workspace_is_rejected() {
    let fx = Federated::new(mounted_docs());
    seed(&fx.a, "/docs/page", &[]);
    let read = execute(
        &fx.repository,
        ReadNodeRequest::new(loc("/content/page")).in_workspace("drafts"),
    );
    assert!(matches!(read.error(), Some(GraphError::InvalidRequest(_))));
}

#[test]
fn test_merged_view_is_unsupported() {
    let fx = Federated::new(mounted_docs());
    let result = fx
        .repository
        .get_node(ExecutionContext::new(), &loc("/content"));
    assert!(matches!(result, Err(GraphError::UnsupportedRequest(_))));
}
