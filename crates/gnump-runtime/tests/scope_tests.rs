//! Scoped construction and cleanup

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use gnump_runtime::numeric::{FLOAT, TANH_SINH, VOID_PTR};
use gnump_runtime::{args, BindError, BindResult, ClassTag, ForeignPtr};
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, PartialEq)]
enum AppError {
    Bind(BindError),
    Rejected,
}

impl From<BindError> for AppError {
    fn from(e: BindError) -> Self {
        AppError::Bind(e)
    }
}

#[test]
fn test_scope_destroys_what_it_created() {
    let (bridge, engine) = reference_bridge();

    let ptr = bridge
        .float_scope(|f| -> BindResult<ForeignPtr> {
            let x = f.create(&args![128])?;
            bridge.call(&x, "set", &args![3])?;
            Ok(x.pointer())
        })
        .unwrap();

    assert_eq!(engine.call_count("Float_destroy"), 1);
    assert_eq!(engine.call_count("Float_free_cache"), 1);
    assert!(bridge.cached(FLOAT, ptr).is_none());
}

#[test]
fn test_scope_returns_the_callback_value() {
    let (bridge, _) = reference_bridge();

    let value = bridge
        .float_scope(|f| {
            let x = f.create(&args![128, 2.0])?;
            let y = f.create(&args![128, 3.0])?;
            bridge.call(&x, "mul", &args![&y])?;
            Ok::<_, BindError>(number(&bridge, &x))
        })
        .unwrap();
    assert_eq!(value, 6.0);
}

#[test]
fn test_callback_error_propagates_after_cleanup() {
    let (bridge, engine) = reference_bridge();

    let result: Result<(), AppError> = bridge.float_scope(|f| {
        f.create(&args![64])?;
        f.create(&args![64])?;
        Err(AppError::Rejected)
    });

    assert_eq!(result, Err(AppError::Rejected));
    assert_eq!(engine.call_count("Float_destroy"), 2);
    assert_eq!(bridge.cache_len(Some(FLOAT)), 0);
}

#[test]
fn test_construction_error_inside_scope() {
    let (bridge, engine) = reference_bridge();

    let result = bridge.float_scope(|f| f.create(&args![1, 2.0, 3]));
    assert!(matches!(result, Err(BindError::NoOverload { .. })));
    assert_eq!(engine.call_count("Float_destroy"), 0);
}

#[test]
fn test_panic_still_releases() {
    let (bridge, engine) = reference_bridge();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        bridge.float_scope(|f| -> BindResult<()> {
            f.create(&args![64])?;
            panic!("callback failed");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(engine.call_count("Float_destroy"), 1);
    assert_eq!(bridge.cache_len(Some(FLOAT)), 0);
}

#[test]
fn test_already_destroyed_instances_are_skipped() {
    let (bridge, engine) = reference_bridge();

    bridge
        .float_scope(|f| {
            let x = f.create(&args![64])?;
            bridge.destroy(&x)?;
            Ok::<_, BindError>(())
        })
        .unwrap();
    assert_eq!(engine.call_count("Float_destroy"), 1);
}

#[test]
fn test_scope_over_other_classes() {
    let (bridge, engine) = reference_bridge();

    bridge
        .with_scope(TANH_SINH, |s| {
            assert_eq!(s.class(), TANH_SINH);
            s.create(&args![53])?;
            s.create(&args![53, 100])?;
            assert_eq!(s.tracked().len(), 2);
            Ok::<_, BindError>(())
        })
        .unwrap();
    assert_eq!(engine.call_count("TanhSinh_destroy"), 2);

    let result = bridge.with_scope(VOID_PTR, |s| s.create(&[]));
    assert_eq!(result.unwrap_err(), BindError::Construction { class: VOID_PTR });
}

#[test]
fn test_unknown_class_never_runs_the_callback() {
    let (bridge, _) = reference_bridge();
    let missing = ClassTag::new("Missing");

    let mut ran = false;
    let result = bridge.with_scope(missing, |_| {
        ran = true;
        Ok::<_, BindError>(())
    });
    assert_eq!(result, Err(BindError::UnknownClass(missing)));
    assert!(!ran);
}

#[test]
fn test_nested_scopes_release_innermost_first() {
    let (bridge, engine) = reference_bridge();

    bridge
        .float_scope(|outer| {
            let keep = outer.create(&args![64, 1.0])?;
            bridge.float_scope(|inner| {
                inner.create(&args![64])?;
                Ok::<_, BindError>(())
            })?;
            assert_eq!(engine.call_count("Float_destroy"), 1);
            assert!(!keep.is_destroyed());
            Ok::<_, BindError>(())
        })
        .unwrap();
    assert_eq!(engine.call_count("Float_destroy"), 2);
}
