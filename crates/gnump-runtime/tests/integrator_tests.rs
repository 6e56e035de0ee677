//! Host callbacks driven by the engine's integrator

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use gnump_runtime::engine::{EngineError, ForeignEngine, HostCallbacks};
use gnump_runtime::numeric::{FLOAT, INTEGRAND, TANH_SINH};
use gnump_runtime::{
    args, BindError, BindResult, Bridge, ClassDescriptor, ClassTag, MethodDescriptor, ParamKind,
    RawValue, ReturnKind, Value, Wrapper,
};
use std::cell::Cell;
use std::rc::Rc;

fn value_of(bridge: &Bridge, x: &Wrapper) -> BindResult<f64> {
    bridge
        .call(x, "to_number", &[])?
        .as_number()
        .ok_or_else(|| BindError::Callback("to_number gave no number".to_string()))
}

fn integrator(bridge: &Bridge, integrand: &Wrapper, a: f64, b: f64, args: &[gnump_runtime::Arg]) -> Wrapper {
    let ts = bridge.construct(TANH_SINH, args).unwrap();
    let lower = bridge.float(a).unwrap();
    let upper = bridge.float(b).unwrap();
    bridge.call(&ts, "set_integrand", &args![integrand]).unwrap();
    bridge
        .call(&ts, "set_bounds", &args![&lower, &upper])
        .unwrap();
    bridge.call(&ts, "compile", &[]).unwrap();
    ts
}

#[test]
fn test_integrates_x_squared() {
    let (bridge, _) = reference_bridge();
    let seen = Rc::new(Cell::new(0));
    let counter = seen.clone();
    let f = bridge
        .integrand(move |bridge, x| {
            counter.set(counter.get() + 1);
            let v = value_of(bridge, x)?;
            Ok(v * v)
        })
        .unwrap();

    let ts = integrator(&bridge, &f, 0.0, 1.0, &args![53]);
    bridge.call(&ts, "integrate", &[]).unwrap();

    let integral = bridge
        .call(&ts, "get_integral_approx", &[])
        .unwrap()
        .into_object()
        .unwrap();
    assert_eq!(integral.class(), FLOAT);
    assert!((number(&bridge, &integral) - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(
        bridge.call(&ts, "is_convergent_error", &[]).unwrap(),
        Value::Bool(false)
    );
    assert_eq!(
        bridge.call(&ts, "get_integrand_call_count", &[]).unwrap(),
        Value::Int(seen.get())
    );
    assert_eq!(bridge.marshal_depth(), 0);
}

#[test]
fn test_integrate_requires_compile() {
    let (bridge, engine) = reference_bridge();
    let f = bridge.integrand(|_, _| Ok(1.0)).unwrap();
    let ts = bridge.construct(TANH_SINH, &args![53]).unwrap();
    let (lower, upper) = (bridge.float(0.0).unwrap(), bridge.float(2.0).unwrap());
    bridge.call(&ts, "set_integrand", &args![&f]).unwrap();
    bridge
        .call(&ts, "set_bounds", &args![&lower, &upper])
        .unwrap();

    assert!(matches!(
        bridge.call(&ts, "integrate", &[]),
        Err(BindError::Engine(EngineError::Trap(_)))
    ));

    assert_eq!(bridge.call(&ts, "compile", &[]).unwrap(), Value::Void);
    assert_eq!(engine.call_count("TanhSinh_compile"), 1);
    bridge.call(&ts, "integrate", &[]).unwrap();
    let integral = bridge
        .call(&ts, "get_integral_approx", &[])
        .unwrap()
        .into_object()
        .unwrap();
    assert!((number(&bridge, &integral) - 2.0).abs() < 1e-12);
}

#[test]
fn test_bounds_are_readable() {
    let (bridge, _) = reference_bridge();
    let f = bridge.integrand(|_, _| Ok(1.0)).unwrap();
    let ts = integrator(&bridge, &f, -1.0, 2.0, &args![53]);

    let lower = bridge
        .call(&ts, "get_lower_bound", &[])
        .unwrap()
        .into_object()
        .unwrap();
    assert_eq!(number(&bridge, &lower), -1.0);

    bridge.call(&ts, "integrate", &[]).unwrap();
    let integral = bridge
        .call(&ts, "get_integral_approx", &[])
        .unwrap()
        .into_object()
        .unwrap();
    assert!((number(&bridge, &integral) - 3.0).abs() < 1e-12);
}

#[test]
fn test_point_budget_marks_error_unconverged() {
    let (bridge, _) = reference_bridge();
    let f = bridge
        .integrand(|bridge, x| Ok(value_of(bridge, x)?.exp()))
        .unwrap();
    let ts = integrator(&bridge, &f, 0.0, 1.0, &args![53, 10]);

    bridge.call(&ts, "integrate", &[]).unwrap();
    assert_eq!(
        bridge.call(&ts, "is_convergent_error", &[]).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        bridge.call(&ts, "get_integrand_call_count", &[]).unwrap(),
        Value::Int(7)
    );
}

#[test]
fn test_callback_error_fails_the_foreign_call() {
    let (bridge, engine) = reference_bridge();
    let f = bridge
        .integrand(|_, _| Err(BindError::Callback("no value here".to_string())))
        .unwrap();
    let ts = integrator(&bridge, &f, 0.0, 1.0, &args![53]);
    let live = engine.live_allocations();

    let err = bridge.call(&ts, "integrate", &[]).unwrap_err();
    assert_eq!(
        err,
        BindError::Engine(EngineError::HostCallback(
            "Callback failed: no value here".to_string()
        ))
    );
    assert_eq!(engine.live_allocations(), live);
}

#[test]
fn test_destroyed_callable_is_unreachable() {
    let (bridge, engine) = reference_bridge();
    let f = bridge.integrand(|_, _| Ok(0.0)).unwrap();
    let slot = f.pointer();
    let ts = integrator(&bridge, &f, 0.0, 1.0, &args![53]);

    bridge.destroy(&f).unwrap();
    assert_eq!(engine.call_count("Integrand_destroy"), 1);
    assert_eq!(
        bridge.call(&ts, "integrate", &[]).unwrap_err(),
        BindError::Engine(EngineError::UnknownCallback(slot.addr()))
    );
}

#[test]
fn test_only_callable_classes_wrap_host_functions() {
    let (bridge, _) = reference_bridge();
    assert!(matches!(
        bridge.callable(FLOAT, |_, _| Ok(Value::Void)),
        Err(BindError::NotCallable { class: FLOAT })
    ));
}

// ===== Re-entrant marshalling =====

const PROBE: ClassTag = ClassTag::new("Probe");

static PROBE_CLASS: ClassDescriptor = ClassDescriptor {
    methods: &[MethodDescriptor::static_fn(
        "apply",
        "Probe_apply",
        &[ParamKind::Object(INTEGRAND), ParamKind::Str],
        ReturnKind::Double,
    )],
    ..ClassDescriptor::opaque(PROBE)
};

#[test]
fn test_nested_marshalling_keeps_outer_arguments() {
    let (bridge, engine) = reference_bridge();
    bridge.register_class(&PROBE_CLASS).unwrap();

    // Reads its string, runs the callback, then checks the string again
    engine.define("Probe_apply", 2, |e, args, host| {
        let callback = args[0].as_ptr().unwrap_or_default();
        let text = args[1].as_ptr().unwrap_or_default();
        let before = e.read_c_string(text)?;
        let x = e.call("Float_new_2", &[RawValue::I32(53), RawValue::F64(0.0)], host)?;
        let result = host.invoke(callback, &[x])?;
        e.call("Float_destroy", &[x], host)?;
        if e.read_c_string(text)? != before {
            return Err(EngineError::Trap("outer argument clobbered".to_string()));
        }
        Ok(result)
    });

    let depth_inside = Rc::new(Cell::new(0));
    let observed = depth_inside.clone();
    let f = bridge
        .integrand(move |bridge, x| {
            observed.set(bridge.marshal_depth());
            bridge.call(x, "set_string", &args!["12345678901234567890", 10])?;
            value_of(bridge, x)
        })
        .unwrap();

    let result = bridge
        .call_static(PROBE, "apply", &args![&f, "outer text"])
        .unwrap();
    assert_eq!(result, Value::Number(12345678901234567890.0));
    assert_eq!(depth_inside.get(), 1);
    assert_eq!(bridge.marshal_depth(), 0);
}
