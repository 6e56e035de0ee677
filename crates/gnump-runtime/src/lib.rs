//! gnump runtime - host bindings for an arbitrary-precision engine
//!
//! This library drives a numeric engine that lives in its own linear memory:
//! - Identity-preserving wrappers over foreign pointers
//! - Stack-disciplined marshalling of strings and typed arrays
//! - Class bindings generated from declarative descriptors
//! - Host callbacks re-entered from foreign calls
//! - Scoped construction with guaranteed cleanup

/// gnump runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod adapter;
pub mod bridge;
pub mod cache;
pub mod class;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod numeric;
pub mod scope;
pub mod value;
pub mod wrapper;

pub use adapter::{ClassBinding, ClassRegistry, ResultLowering};
pub use bridge::{Bridge, HostFn};
pub use cache::IdentityCache;
pub use class::{
    CallSignature, ClassDescriptor, ClassTag, ConstructorDescriptor, MethodDescriptor, ParamKind,
    ReturnKind,
};
pub use engine::{EngineError, ForeignEngine, HostCallbacks, LinearEngine};
pub use error::{BindError, BindResult};
pub use marshal::{MarshalError, MarshalRegion, MarshalStack};
pub use numeric::Rounding;
pub use scope::Scope;
pub use value::{Arg, ArrayKind, ForeignPtr, NativeArray, RawValue, Value};
pub use wrapper::{compare, get_class, get_pointer, Wrapper};

/// Build an argument array, converting each element with [`Arg::from`]
///
/// ```rust
/// use gnump_runtime::{args, Arg};
///
/// let list = args![128, 2.5, "ff"];
/// assert!(matches!(list[2], Arg::Str(_)));
/// assert_eq!(args![].len(), 0);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        [] as [$crate::value::Arg; 0]
    };
    ($($arg:expr),+ $(,)?) => {
        [$($crate::value::Arg::from($arg)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_args_macro_converts() {
        let list = args![1, 2.0, true];
        assert!(matches!(list[0], Arg::Raw(RawValue::I32(1))));
        assert!(matches!(list[1], Arg::Raw(RawValue::F64(_))));
        assert!(matches!(list[2], Arg::Raw(RawValue::I32(1))));
    }
}
