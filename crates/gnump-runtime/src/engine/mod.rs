//! Foreign engine interface
//!
//! The bridge talks to the arbitrary-precision engine only through
//! [`ForeignEngine`]: allocation, raw memory views at widths {1,2,4,8}, and
//! synchronous entry-point calls. During a call the engine may re-enter the
//! host through [`HostCallbacks`].
//!
//! # Modules
//!
//! - `linear`: in-process linear memory with a native symbol table
//! - `reference`: f64-backed numeric entry points installed on a [`LinearEngine`]

pub mod linear;
pub mod reference;

pub use linear::{LinearEngine, NativeEntry, NativeEntryBuilder, HEAP_BASE, PAGE_SIZE};

use crate::value::{ForeignPtr, RawValue};
use thiserror::Error;

/// Engine-level errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("{symbol}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        symbol: String,
        expected: usize,
        got: usize,
    },

    #[error("{symbol}: argument {index} must be {expected}")]
    BadArgument {
        symbol: String,
        index: usize,
        expected: &'static str,
    },

    #[error("Access of {len} bytes at 0x{addr:08x} outside linear memory of {size} bytes")]
    OutOfBounds { addr: u32, len: u32, size: u32 },

    #[error("Linear memory of {pages} pages exceeds the limit of {max_pages}")]
    OutOfMemory { pages: u32, max_pages: u32 },

    #[error("Invalid pointer: 0x{0:08x}")]
    InvalidPointer(u32),

    #[error("No host callback registered at 0x{0:08x}")]
    UnknownCallback(u32),

    #[error("Host callback failed: {0}")]
    HostCallback(String),

    #[error("Native entry '{0}' has no implementation")]
    MissingImplementation(String),

    #[error("Trap: {0}")]
    Trap(String),
}

/// Memory access width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    W1 = 1,
    W2 = 2,
    W4 = 4,
    W8 = 8,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        self as u32
    }

    pub fn from_bytes(bytes: u32) -> Option<Width> {
        match bytes {
            1 => Some(Width::W1),
            2 => Some(Width::W2),
            4 => Some(Width::W4),
            8 => Some(Width::W8),
            _ => None,
        }
    }
}

/// A scalar with a fixed little-endian layout in linear memory
pub trait Element: Copy {
    const WIDTH: Width;

    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! int_element {
    ($($ty:ty => $width:ident via $unsigned:ty),* $(,)?) => {
        $(
            impl Element for $ty {
                const WIDTH: Width = Width::$width;

                fn to_bits(self) -> u64 {
                    self as $unsigned as u64
                }

                fn from_bits(bits: u64) -> Self {
                    bits as $unsigned as $ty
                }
            }
        )*
    };
}

int_element! {
    i8 => W1 via u8,
    u8 => W1 via u8,
    i16 => W2 via u16,
    u16 => W2 via u16,
    i32 => W4 via u32,
    u32 => W4 via u32,
    i64 => W8 via u64,
    u64 => W8 via u64,
}

impl Element for f32 {
    const WIDTH: Width = Width::W4;

    fn to_bits(self) -> u64 {
        f32::to_bits(self) as u64
    }

    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl Element for f64 {
    const WIDTH: Width = Width::W8;

    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// Entry points the engine may call back into while a foreign call runs
pub trait HostCallbacks {
    fn invoke(&self, callback: ForeignPtr, args: &[RawValue]) -> Result<RawValue, EngineError>;
}

/// Host with no callbacks registered
pub struct NoCallbacks;

impl HostCallbacks for NoCallbacks {
    fn invoke(&self, callback: ForeignPtr, _args: &[RawValue]) -> Result<RawValue, EngineError> {
        Err(EngineError::UnknownCallback(callback.0))
    }
}

/// A foreign engine living in its own linear memory
///
/// Methods take `&self`: an engine call may re-enter the host, which may in
/// turn allocate or call again on the same engine.
pub trait ForeignEngine {
    /// Allocate `size` bytes; [`ForeignPtr::NULL`] when memory is exhausted
    fn allocate(&self, size: u32) -> Result<ForeignPtr, EngineError>;

    /// Release an allocation; releasing NULL is a no-op
    fn release(&self, ptr: ForeignPtr) -> Result<(), EngineError>;

    fn store(&self, addr: u32, width: Width, bits: u64) -> Result<(), EngineError>;

    fn load(&self, addr: u32, width: Width) -> Result<u64, EngineError>;

    /// Invoke an exported entry point synchronously
    fn call(
        &self,
        symbol: &str,
        args: &[RawValue],
        host: &dyn HostCallbacks,
    ) -> Result<RawValue, EngineError>;

    fn has_symbol(&self, symbol: &str) -> bool;

    /// Current linear memory size in bytes
    fn memory_size(&self) -> u32;

    /// Read a NUL-terminated UTF-8 string
    fn read_c_string(&self, ptr: ForeignPtr) -> Result<String, EngineError> {
        if ptr.is_null() {
            return Err(EngineError::InvalidPointer(0));
        }
        let mut bytes = Vec::new();
        let mut addr = ptr.0;
        loop {
            let byte = self.load(addr, Width::W1)? as u8;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            addr = addr
                .checked_add(1)
                .ok_or(EngineError::InvalidPointer(ptr.0))?;
        }
        String::from_utf8(bytes).map_err(|e| EngineError::Trap(format!("invalid UTF-8: {}", e)))
    }
}

/// Typed load
pub fn load<T: Element, E: ForeignEngine + ?Sized>(engine: &E, addr: u32) -> Result<T, EngineError> {
    engine.load(addr, T::WIDTH).map(T::from_bits)
}

/// Typed store
pub fn store<T: Element, E: ForeignEngine + ?Sized>(
    engine: &E,
    addr: u32,
    value: T,
) -> Result<(), EngineError> {
    engine.store(addr, T::WIDTH, value.to_bits())
}
