//! Shared helpers for bridge integration tests

#![allow(dead_code)]

use gnump_config::BridgeConfig;
use gnump_runtime::engine::{reference, LinearEngine};
use gnump_runtime::{Bridge, Value, Wrapper};
use std::rc::Rc;

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// A bridge over the reference engine with the numeric classes registered
///
/// The engine is returned alongside so tests can inspect call counts and
/// live allocations.
pub fn reference_bridge() -> (Bridge, Rc<LinearEngine>) {
    reference_bridge_with(&BridgeConfig::default())
}

pub fn reference_bridge_with(config: &BridgeConfig) -> (Bridge, Rc<LinearEngine>) {
    let engine = reference::engine(config).expect("reference engine");
    let bridge = Bridge::new(engine.clone(), config)
        .expect("bridge config is valid")
        .with_numeric_classes()
        .expect("numeric classes register");
    (bridge, engine)
}

/// Read a float's value through the bridge
pub fn number(bridge: &Bridge, float: &Wrapper) -> f64 {
    match bridge.call(float, "to_number", &[]) {
        Ok(Value::Number(n)) => n,
        other => panic!("Expected Number, got {:?}", other),
    }
}
