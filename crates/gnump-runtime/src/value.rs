//! Values crossing the bridge
//!
//! - [`ForeignPtr`]: an address in the engine's 32-bit linear memory
//! - [`RawValue`]: what an engine entry point takes and returns
//! - [`Arg`]: a host argument, discriminated before lowering
//! - [`Value`]: a host-side result

use crate::wrapper::Wrapper;
use std::fmt;

/// Opaque address into the foreign engine's linear memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ForeignPtr(pub u32);

impl ForeignPtr {
    /// The canonical null pointer
    pub const NULL: ForeignPtr = ForeignPtr(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn addr(self) -> u32 {
        self.0
    }

    /// Pointer `bytes` past this one
    pub const fn offset(self, bytes: u32) -> ForeignPtr {
        ForeignPtr(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for ForeignPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<ForeignPtr> for RawValue {
    fn from(ptr: ForeignPtr) -> Self {
        RawValue::I32(ptr.0 as i32)
    }
}

/// A value at the engine call boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Void,
    I32(i32),
    I64(i64),
    F64(f64),
}

impl RawValue {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            RawValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::I32(v) => Some(*v as i64),
            RawValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Reinterpret an i32 as an address
    pub fn as_ptr(&self) -> Option<ForeignPtr> {
        self.as_i32().map(|v| ForeignPtr(v as u32))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Void => "void",
            RawValue::I32(_) => "i32",
            RawValue::I64(_) => "i64",
            RawValue::F64(_) => "f64",
        }
    }
}

impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        RawValue::I32(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::I64(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::F64(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::I32(v as i32)
    }
}

/// Element type of a marshalled numeric array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl ArrayKind {
    /// Element width in bytes
    pub fn width(self) -> u32 {
        match self {
            ArrayKind::I8 => 1,
            ArrayKind::I16 => 2,
            ArrayKind::I32 | ArrayKind::F32 => 4,
            ArrayKind::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ArrayKind::I8 => "i8[]",
            ArrayKind::I16 => "i16[]",
            ArrayKind::I32 => "i32[]",
            ArrayKind::F32 => "f32[]",
            ArrayKind::F64 => "f64[]",
        }
    }
}

/// Host-native numeric array awaiting marshalling
#[derive(Debug, Clone, PartialEq)]
pub enum NativeArray {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl NativeArray {
    pub fn kind(&self) -> ArrayKind {
        match self {
            NativeArray::I8(_) => ArrayKind::I8,
            NativeArray::I16(_) => ArrayKind::I16,
            NativeArray::I32(_) => ArrayKind::I32,
            NativeArray::F32(_) => ArrayKind::F32,
            NativeArray::F64(_) => ArrayKind::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NativeArray::I8(v) => v.len(),
            NativeArray::I16(v) => v.len(),
            NativeArray::I32(v) => v.len(),
            NativeArray::F32(v) => v.len(),
            NativeArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Argument to a bound method
///
/// Wrappers and raw values are told apart by variant, never by inspecting
/// the value's shape.
#[derive(Debug, Clone)]
pub enum Arg {
    Raw(RawValue),
    Handle(Wrapper),
    Str(String),
    Array(NativeArray),
}

impl Arg {
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Raw(raw) => raw.type_name(),
            Arg::Handle(_) => "object",
            Arg::Str(_) => "string",
            Arg::Array(array) => array.kind().name(),
        }
    }
}

impl From<RawValue> for Arg {
    fn from(v: RawValue) -> Self {
        Arg::Raw(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Raw(RawValue::F64(v))
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Raw(RawValue::I32(v))
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Raw(RawValue::I64(v))
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Raw(RawValue::from(v))
    }
}

impl From<ForeignPtr> for Arg {
    fn from(ptr: ForeignPtr) -> Self {
        Arg::Raw(RawValue::from(ptr))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<Wrapper> for Arg {
    fn from(w: Wrapper) -> Self {
        Arg::Handle(w)
    }
}

impl From<&Wrapper> for Arg {
    fn from(w: &Wrapper) -> Self {
        Arg::Handle(w.clone())
    }
}

impl From<NativeArray> for Arg {
    fn from(v: NativeArray) -> Self {
        Arg::Array(v)
    }
}

impl From<Vec<f64>> for Arg {
    fn from(v: Vec<f64>) -> Self {
        Arg::Array(NativeArray::F64(v))
    }
}

impl From<Vec<i32>> for Arg {
    fn from(v: Vec<i32>) -> Self {
        Arg::Array(NativeArray::I32(v))
    }
}

/// A host-side value produced by a call or handed to a callback
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    Number(f64),
    Str(String),
    Object(Wrapper),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of ints and numbers
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Wrapper> {
        match self {
            Value::Object(w) => Some(w),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<Wrapper> {
        match self {
            Value::Object(w) => Some(w),
            _ => None,
        }
    }
}

impl From<Wrapper> for Value {
    fn from(w: Wrapper) -> Self {
        Value::Object(w)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(w) => write!(f, "{}", w),
        }
    }
}
