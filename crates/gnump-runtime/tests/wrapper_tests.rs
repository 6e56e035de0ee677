//! Wrapper equality and class views

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use gnump_runtime::numeric::{FLOAT, VOID_PTR};
use gnump_runtime::{compare, get_class, get_pointer};
use std::collections::HashSet;

#[test]
fn test_views_of_one_pointer_are_equal_but_distinct() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    let view = bridge.cast_object(&x, VOID_PTR);

    assert_eq!(x, view);
    assert!(compare(&x, &view));
    assert!(!x.same_instance(&view));
    assert_eq!(get_pointer(&view), get_pointer(&x));
    assert_eq!(get_class(&view), VOID_PTR);
    assert!(bridge.cast_object(&x, VOID_PTR).same_instance(&view));
}

#[test]
fn test_wrappers_hash_by_pointer() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    let y = bridge.float(1.0).unwrap();

    let set: HashSet<_> = [x.clone(), bridge.cast_object(&x, VOID_PTR), y.clone()]
        .into_iter()
        .collect();
    assert_eq!(set.len(), 2);
    assert_ne!(x, y);
}

#[test]
fn test_destroy_flags_only_the_destroyed_view() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    let view = bridge.cast_object(&x, VOID_PTR);

    bridge.destroy(&view).unwrap();
    assert!(view.is_destroyed());
    assert!(!x.is_destroyed());
    assert!(bridge.cached(VOID_PTR, x.pointer()).is_none());
    assert!(bridge.cached(FLOAT, x.pointer()).is_some());
}

#[test]
fn test_display_names_class_and_address() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    insta::assert_snapshot!(x.to_string(), @"Float@0x00000010");
    insta::assert_snapshot!(bridge.null().to_string(), @"WrapperObject@0x00000000");
}
