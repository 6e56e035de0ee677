//! Class descriptors
//!
//! Every bound class is one [`ClassDescriptor`]: its constructors, finalizer,
//! method table and optional call signature. Descriptors are plain `static`
//! data; the adapter layer compiles them into bindings.

use crate::value::ArrayKind;
use std::fmt;

/// Identifies a bound class family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassTag(&'static str);

impl ClassTag {
    /// The untyped opaque base class; owns the canonical null wrapper
    pub const WRAPPER_OBJECT: ClassTag = ClassTag::new("WrapperObject");

    pub const fn new(name: &'static str) -> Self {
        ClassTag(name)
    }

    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ClassTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Declared type of a foreign parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    Double,
    /// Integer-coded boolean
    Bool,
    /// Pointer to an instance of the class
    Object(ClassTag),
    /// NUL-terminated string, marshalled
    Str,
    /// Numeric array, marshalled
    Array(ArrayKind),
}

impl ParamKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::Long => "long",
            ParamKind::Double => "double",
            ParamKind::Bool => "bool",
            ParamKind::Object(class) => class.name(),
            ParamKind::Str => "string",
            ParamKind::Array(kind) => kind.name(),
        }
    }

    /// Whether lowering this parameter needs scratch memory
    pub fn is_marshalled(&self) -> bool {
        matches!(self, ParamKind::Str | ParamKind::Array(_))
    }
}

/// Declared return type of a foreign entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Int,
    Long,
    Double,
    Bool,
    /// Pointer to an engine-owned NUL-terminated string
    Str,
    /// Pointer to an instance of the class
    Object(ClassTag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstructorDescriptor {
    pub symbol: &'static str,
    pub params: &'static [ParamKind],
}

/// One entry of a class's method table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Host-side method name
    pub name: &'static str,
    /// Foreign entry point
    pub symbol: &'static str,
    /// Parameters after the receiver
    pub params: &'static [ParamKind],
    pub ret: ReturnKind,
    /// The call yields the receiver itself instead of a fresh result
    pub returns_receiver: bool,
    /// No receiver is passed
    pub is_static: bool,
}

impl MethodDescriptor {
    /// Instance method
    pub const fn method(
        name: &'static str,
        symbol: &'static str,
        params: &'static [ParamKind],
        ret: ReturnKind,
    ) -> Self {
        Self {
            name,
            symbol,
            params,
            ret,
            returns_receiver: false,
            is_static: false,
        }
    }

    /// In-place mutator that yields its receiver, for chaining
    pub const fn chain(name: &'static str, symbol: &'static str, params: &'static [ParamKind]) -> Self {
        Self {
            name,
            symbol,
            params,
            ret: ReturnKind::Void,
            returns_receiver: true,
            is_static: false,
        }
    }

    pub const fn static_fn(
        name: &'static str,
        symbol: &'static str,
        params: &'static [ParamKind],
        ret: ReturnKind,
    ) -> Self {
        Self {
            name,
            symbol,
            params,
            ret,
            returns_receiver: false,
            is_static: true,
        }
    }
}

/// Signature of a callable wrapper as seen from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSignature {
    pub params: &'static [ParamKind],
    pub ret: ReturnKind,
}

/// Per-class binding description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub tag: ClassTag,
    /// Overloads, selected by argument count
    pub constructors: &'static [ConstructorDescriptor],
    pub finalizer: Option<&'static str>,
    pub methods: &'static [MethodDescriptor],
    /// Present when host closures can be handed to the engine as this class
    pub callable: Option<CallSignature>,
    /// Entry point releasing the class's internal free lists
    pub release_cache: Option<&'static str>,
}

impl ClassDescriptor {
    /// A class with no constructor, finalizer or methods
    pub const fn opaque(tag: ClassTag) -> Self {
        Self {
            tag,
            constructors: &[],
            finalizer: None,
            methods: &[],
            callable: None,
            release_cache: None,
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn constructor_for(&self, arity: usize) -> Option<&ConstructorDescriptor> {
        self.constructors.iter().find(|c| c.params.len() == arity)
    }

    pub fn is_constructible(&self) -> bool {
        !self.constructors.is_empty()
    }
}

/// Descriptor of the opaque base class
pub static WRAPPER_OBJECT: ClassDescriptor = ClassDescriptor::opaque(ClassTag::WRAPPER_OBJECT);
