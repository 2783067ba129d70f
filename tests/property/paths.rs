//! Path text and rule translation properties

use graft::federation::PathRule;
use graft::graph::{Path, Segment};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = Segment> {
    ("[a-z][a-z0-9_-]{0,8}", prop_oneof![Just(1u32), 2u32..5]).prop_map(|(name, index)| {
        Segment::with_index(name, index)
    })
}

fn absolute_path(max_len: usize) -> impl Strategy<Value = Path> {
    prop::collection::vec(segment(), 0..max_len).prop_map(|segments| {
        segments
            .into_iter()
            .fold(Path::root(), |path, segment| path.child_segment(segment))
    })
}

proptest! {
    #[test]
    fn path_text_round_trips(path in absolute_path(6)) {
        let text = path.to_string();
        let parsed = Path::parse(&text).unwrap();
        prop_assert_eq!(&parsed, &path);
        prop_assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn parent_and_child_are_inverse(path in absolute_path(5), last in segment()) {
        let child = path.child_segment(last.clone());
        prop_assert_eq!(child.parent(), Some(path.clone()));
        prop_assert_eq!(child.last_segment(), Some(&last));
        prop_assert!(path.is_ancestor_of(&child));
        prop_assert!(child.is_descendant_of(&path));
    }

    #[test]
    fn relative_then_join_restores_the_path(base in absolute_path(3), tail in absolute_path(4)) {
        let full = base.join(&Path::relative(tail.segments().to_vec()));
        let relative = full.relative_to(&base).unwrap();
        prop_assert_eq!(base.join(&relative), full);
    }

    #[test]
    fn rule_translation_is_invertible(
        mount in absolute_path(3),
        region in absolute_path(3),
        tail in absolute_path(4),
    ) {
        let rule = PathRule::new(mount.clone(), region, Vec::new()).unwrap();
        let federated = mount.join(&Path::relative(tail.segments().to_vec()));
        prop_assert!(rule.includes(&federated));
        let in_source = rule.path_in_source(&federated).unwrap();
        prop_assert_eq!(rule.path_in_repository(&in_source), Some(federated));
    }

    #[test]
    fn parsed_rule_renders_back(mount in absolute_path(3), region in absolute_path(3)) {
        let rule = PathRule::new(mount, region, Vec::new()).unwrap();
        let reparsed = PathRule::parse(&rule.to_string()).unwrap();
        prop_assert_eq!(reparsed, rule);
    }
}
