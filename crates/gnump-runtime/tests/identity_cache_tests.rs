//! Identity cache behaviour through the bridge

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use gnump_runtime::numeric::FLOAT;
use gnump_runtime::{args, BindError, ClassDescriptor, ClassTag, ForeignPtr, RawValue};

const HANDLE: ClassTag = ClassTag::new("Handle");

static HANDLE_CLASS: ClassDescriptor = ClassDescriptor {
    finalizer: Some("Handle_destroy"),
    ..ClassDescriptor::opaque(HANDLE)
};

#[test]
fn test_constructed_wrapper_is_cached() {
    let (bridge, _) = reference_bridge();
    let x = bridge.construct(FLOAT, &args![128]).unwrap();

    let again = bridge.wrap_pointer(x.pointer(), FLOAT);
    assert!(x.same_instance(&again));
    assert_eq!(bridge.cache_len(Some(FLOAT)), 1);
}

#[test]
fn test_returned_pointer_resolves_to_cached_instance() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(1.5).unwrap();
    let y = bridge
        .call(&x, "clone", &[])
        .unwrap()
        .into_object()
        .unwrap();

    assert!(!x.same_instance(&y));
    assert_ne!(x.pointer(), y.pointer());
    assert!(bridge.wrap_pointer(y.pointer(), FLOAT).same_instance(&y));
    assert_eq!(number(&bridge, &y), 1.5);
}

#[test]
fn test_destroy_evicts_and_flags_the_handle() {
    let (bridge, engine) = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    let ptr = x.pointer();

    bridge.destroy(&x).unwrap();
    assert!(x.is_destroyed());
    assert!(bridge.cached(FLOAT, ptr).is_none());
    assert_eq!(engine.call_count("Float_destroy"), 1);

    assert_eq!(
        bridge.destroy(&x),
        Err(BindError::DoubleDestroy { class: FLOAT, ptr })
    );
    assert_eq!(
        bridge.call(&x, "to_number", &[]),
        Err(BindError::UseAfterDestroy { class: FLOAT, ptr })
    );
    assert_eq!(engine.call_count("Float_destroy"), 1);
}

#[test]
fn test_reused_address_gets_a_fresh_wrapper() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(1.0).unwrap();
    let ptr = x.pointer();
    bridge.destroy(&x).unwrap();

    let y = bridge.float(2.0).unwrap();
    assert_eq!(y.pointer(), ptr);
    assert!(!y.same_instance(&x));
    assert!(!y.is_destroyed());
    assert_eq!(number(&bridge, &y), 2.0);
}

#[test]
fn test_null_wrapper_is_canonical() {
    let (bridge, _) = reference_bridge();
    let null = bridge.null();

    assert!(null.same_instance(&bridge.null()));
    assert!(null.is_null());
    assert_eq!(null.class(), ClassTag::WRAPPER_OBJECT);
    assert!(bridge
        .cached(ClassTag::WRAPPER_OBJECT, ForeignPtr::NULL)
        .unwrap()
        .same_instance(&null));
}

#[test]
fn test_null_wrapper_survives_destroy_attempts() {
    let (bridge, _) = reference_bridge();
    let null = bridge.null();

    assert_eq!(
        bridge.destroy(&null),
        Err(BindError::UndestroyableObject {
            class: ClassTag::WRAPPER_OBJECT
        })
    );
    assert!(!null.is_destroyed());
    assert_eq!(bridge.cache_len(Some(ClassTag::WRAPPER_OBJECT)), 1);
}

#[test]
fn test_chained_calls_add_no_cache_entries() {
    let (bridge, _) = reference_bridge();
    let x = bridge.float(4.0).unwrap();
    let before = bridge.cache_len(None);

    for _ in 0..10 {
        bridge.call(&x, "sqrt", &[]).unwrap();
    }
    assert_eq!(bridge.cache_len(None), before);
}

#[test]
fn test_destroying_a_null_view_evicts_it() {
    let (bridge, engine) = reference_bridge();
    engine.define("Handle_destroy", 1, |_, _, _| Ok(RawValue::Void));
    bridge.register_class(&HANDLE_CLASS).unwrap();

    let view = bridge.cast_object(&bridge.null(), HANDLE);
    bridge.destroy(&view).unwrap();

    assert!(bridge.cached(HANDLE, ForeignPtr::NULL).is_none());
    let fresh = bridge.cast_object(&bridge.null(), HANDLE);
    assert!(!fresh.same_instance(&view));
    assert!(!fresh.is_destroyed());
    let null = bridge.wrap_pointer(ForeignPtr::NULL, ClassTag::WRAPPER_OBJECT);
    assert!(null.same_instance(&bridge.null()));
}
