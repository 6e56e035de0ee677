//! Bridge errors

use crate::class::ClassTag;
use crate::engine::EngineError;
use crate::marshal::MarshalError;
use crate::value::ForeignPtr;
use thiserror::Error;

/// Errors surfaced by bridge operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("{class} has no foreign constructor")]
    Construction { class: ClassTag },

    #[error("{class} has no finalizer and cannot be destroyed")]
    UndestroyableObject { class: ClassTag },

    #[error("{class} at {ptr} was already destroyed")]
    DoubleDestroy { class: ClassTag, ptr: ForeignPtr },

    #[error("{class} at {ptr} used after destroy")]
    UseAfterDestroy { class: ClassTag, ptr: ForeignPtr },

    #[error("Foreign allocator returned null while {context}")]
    AllocationExhaustion { context: String },

    #[error("Class {0} is not registered")]
    UnknownClass(ClassTag),

    #[error("{class} has no method '{method}'")]
    UnknownMethod { class: ClassTag, method: String },

    #[error("{class}.{method} is static and takes no receiver")]
    NotInstance { class: ClassTag, method: String },

    #[error("{class}.{method} is not static")]
    NotStatic { class: ClassTag, method: String },

    #[error("{class} has no constructor taking {arity} arguments")]
    NoOverload { class: ClassTag, arity: usize },

    #[error("{callee}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        got: usize,
    },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Number {value} out of range for {target}")]
    NumberOutOfRange { value: f64, target: &'static str },

    #[error("Invalid descriptor for {class}: {reason}")]
    InvalidDescriptor { class: ClassTag, reason: String },

    #[error("{class} is not callable")]
    NotCallable { class: ClassTag },

    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    #[error("Callback failed: {0}")]
    Callback(String),

    #[error(transparent)]
    Marshal(MarshalError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl BindError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BindError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<MarshalError> for BindError {
    fn from(e: MarshalError) -> Self {
        match e {
            MarshalError::Exhausted { requested } => BindError::AllocationExhaustion {
                context: format!("marshalling {} bytes", requested),
            },
            MarshalError::Engine(inner) => BindError::Engine(inner),
            other => BindError::Marshal(other),
        }
    }
}

/// Result type for bridge operations
pub type BindResult<T> = Result<T, BindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_exhaustion_maps_to_allocation_exhaustion() {
        let err = BindError::from(MarshalError::Exhausted { requested: 64 });
        assert_eq!(
            err,
            BindError::AllocationExhaustion {
                context: "marshalling 64 bytes".to_string()
            }
        );
    }

    #[test]
    fn test_engine_errors_unwrap_from_marshal() {
        let err = BindError::from(MarshalError::Engine(EngineError::InvalidPointer(8)));
        assert_eq!(err, BindError::Engine(EngineError::InvalidPointer(8)));
    }

    #[test]
    fn test_messages_name_the_class() {
        let err = BindError::Construction {
            class: ClassTag::new("VoidPtr"),
        };
        assert_eq!(err.to_string(), "VoidPtr has no foreign constructor");
    }

    #[test]
    fn test_invalid_config_message() {
        let err = BindError::InvalidConfig("bad rounding".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid bridge configuration: bad rounding"
        );
    }
}
