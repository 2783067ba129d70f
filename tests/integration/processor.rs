//! Default decompositions and composite handling, driven through a source connection

use super::test_utils::*;
use graft::connector::{InMemorySource, RepositorySource};
use graft::execution::ExecutionContext;
use graft::graph::{Name, Property};
use graft::request::{
    CompositeRequest, DeleteBranchRequest, DeleteChildrenRequest, MoveBranchRequest, Operation,
    ReadBlockOfChildrenRequest, ReadBranchRequest, ReadNextBlockOfChildrenRequest,
    ReadNodeRequest, ReadPropertyRequest, RemovePropertyRequest, RenameNodeRequest, Request,
    SetPropertyRequest, VerifyNodeExistsRequest,
};
use graft::GraphError;

fn run(source: &InMemorySource, request: impl Into<Request>) -> Request {
    let mut request = request.into();
    let mut connection = source.connect().unwrap();
    connection
        .execute(&ExecutionContext::new(), &mut request)
        .unwrap();
    connection.close().unwrap();
    request
}

fn names(children: &[graft::graph::Location]) -> Vec<String> {
    children
        .iter()
        .map(|c| c.path().unwrap().last_segment().unwrap().to_string())
        .collect()
}

fn library() -> InMemorySource {
    let source = InMemorySource::new("library");
    for child in ["a", "b", "c", "d", "e"] {
        seed(&source, &format!("/shelf/{}", child), &[("title", child)]);
    }
    seed(&source, "/shelf/a/page", &[]);
    source
}

#[test]
fn test_read_branch_stops_at_max_depth() {
    let source = library();
    let Request::ReadBranch(branch) = run(&source, ReadBranchRequest::with_depth(loc("/shelf"), 2))
    else {
        unreachable!()
    };
    let data = branch.result().unwrap();
    assert_eq!(data.location.path(), Some(&path("/shelf")));
    // the shelf and its five books, but not the page below a
    assert_eq!(data.nodes.len(), 6);
    assert!(data.node(&loc("/shelf/a")).is_some());
    assert!(data.node(&loc("/shelf/a/page")).is_none());
}

#[test]
fn test_block_of_children_windows() {
    let source = library();
    let Request::ReadBlockOfChildren(block) =
        run(&source, ReadBlockOfChildrenRequest::new(loc("/shelf"), 1, 2))
    else {
        unreachable!()
    };
    assert_eq!(names(&block.result().unwrap().children), vec!["b", "c"]);

    let Request::ReadBlockOfChildren(past_end) =
        run(&source, ReadBlockOfChildrenRequest::new(loc("/shelf"), 10, 2))
    else {
        unreachable!()
    };
    assert!(past_end.result().unwrap().children.is_empty());
}

#[test]
fn test_next_block_follows_a_sibling() {
    let source = library();
    let Request::ReadNextBlockOfChildren(next) =
        run(&source, ReadNextBlockOfChildrenRequest::new(loc("/shelf/c"), 5))
    else {
        unreachable!()
    };
    let data = next.result().unwrap();
    assert_eq!(data.starting_after.path(), Some(&path("/shelf/c")));
    assert_eq!(names(&data.children), vec!["d", "e"]);

    let root_siblings = run(&source, ReadNextBlockOfChildrenRequest::new(loc("/"), 5));
    assert!(matches!(
        root_siblings.error(),
        Some(GraphError::InvalidRequest(_))
    ));
}

#[test]
fn test_read_property_and_verify() {
    let source = library();
    let Request::ReadProperty(read) = run(&source, ReadPropertyRequest::new(loc("/shelf/b"), "title"))
    else {
        unreachable!()
    };
    let property = read.result().unwrap().property.clone().unwrap();
    assert_eq!(property.first_value().and_then(|v| v.as_str()), Some("b"));

    let Request::ReadProperty(missing) =
        run(&source, ReadPropertyRequest::new(loc("/shelf/b"), "author"))
    else {
        unreachable!()
    };
    assert!(missing.result().unwrap().property.is_none());

    let Request::VerifyNodeExists(verify) = run(&source, VerifyNodeExistsRequest::new(loc("/shelf/e")))
    else {
        unreachable!()
    };
    assert!(verify.result().unwrap().has_id());

    let absent = run(&source, VerifyNodeExistsRequest::new(loc("/shelf/z")));
    assert!(absent.error().unwrap().is_path_not_found());
}

#[test]
fn test_set_and_remove_property() {
    let source = library();
    let Request::SetProperty(set) = run(
        &source,
        SetPropertyRequest::new(loc("/shelf/a"), Property::single("author", "ann")),
    ) else {
        unreachable!()
    };
    assert!(set.result().unwrap().is_new);

    let Request::SetProperty(again) = run(
        &source,
        SetPropertyRequest::new(loc("/shelf/a"), Property::single("author", "bob")),
    ) else {
        unreachable!()
    };
    assert!(!again.result().unwrap().is_new);

    let removed = run(&source, RemovePropertyRequest::new(loc("/shelf/a"), "author"));
    assert!(removed.is_completed());
    let node = read_direct(&source, "/shelf/a").unwrap();
    assert!(!node.properties.contains_key(&Name::from("author")));
}

#[test]
fn test_delete_children_keeps_the_parent() {
    let source = library();
    let Request::DeleteChildren(deleted) = run(&source, DeleteChildrenRequest::new(loc("/shelf")))
    else {
        unreachable!()
    };
    assert_eq!(deleted.result().unwrap().deleted.len(), 5);
    let shelf = read_direct(&source, "/shelf").unwrap();
    assert!(shelf.children.is_empty());
}

#[test]
fn test_rename_keeps_identity() {
    let source = library();
    let before = read_direct(&source, "/shelf/b").unwrap();
    let Request::RenameNode(renamed) = run(&source, RenameNodeRequest::new(loc("/shelf/b"), "bee"))
    else {
        unreachable!()
    };
    let after = &renamed.result().unwrap().after;
    assert_eq!(after.path(), Some(&path("/shelf/bee")));
    assert_eq!(after.id(), before.location.id());
}

#[test]
fn test_move_appends_under_new_parent() {
    let source = library();
    seed(&source, "/archive/old", &[]);
    let Request::MoveBranch(moved) = run(&source, MoveBranchRequest::new(loc("/shelf/a"), loc("/archive")))
    else {
        unreachable!()
    };
    assert_eq!(moved.result().unwrap().after.path(), Some(&path("/archive/a")));
    assert!(read_direct(&source, "/archive/a/page").is_ok());
    let archive = read_direct(&source, "/archive").unwrap();
    assert_eq!(names(&archive.children), vec!["old", "a"]);
}

#[test]
fn test_composite_runs_everything_and_hoists_a_single_failure() {
    let source = library();
    let composite = CompositeRequest::new(vec![
        ReadNodeRequest::new(loc("/shelf/a")).into(),
        ReadNodeRequest::new(loc("/shelf/missing")).into(),
        SetPropertyRequest::new(loc("/shelf/c"), Property::single("k", "v")).into(),
    ]);
    let Request::Composite(composite) = run(&source, composite) else {
        unreachable!()
    };
    assert!(composite.error().unwrap().is_path_not_found());
    assert!(composite.requests()[0].is_completed());
    assert!(composite.requests()[2].is_completed());
}

#[test]
fn test_composite_summarizes_several_failures() {
    let source = library();
    let composite = CompositeRequest::new(vec![
        ReadNodeRequest::new(loc("/nowhere")).into(),
        ReadNodeRequest::new(loc("/shelf")).into(),
        DeleteBranchRequest::new(loc("/elsewhere")).into(),
    ]);
    let Request::Composite(composite) = run(&source, composite) else {
        unreachable!()
    };
    match composite.error() {
        Some(GraphError::MultipleFailures { failed, total, .. }) => {
            assert_eq!((*failed, *total), (2, 3));
        }
        other => panic!("expected a summary of failures, got {:?}", other),
    }
}

#[test]
fn test_cancelled_request_is_left_untouched() {
    let source = library();
    let read = ReadNodeRequest::new(loc("/shelf"));
    read.cancel();
    let request = run(&source, read);
    assert!(request.is_cancelled());
    assert!(request.is_pending());
}
