//! Temporary marshalling allocator
//!
//! Host strings and numeric arrays are copied into scratch space inside
//! foreign memory for the duration of one call. A [`MarshalRegion`] is a
//! bump allocator over one foreign buffer:
//!
//! - `prepare` starts a cycle, applying growth requested during the last one
//! - `alloc` bumps the cursor, or falls back to a standalone overflow buffer
//!   and records the shortfall as growth for the next `prepare`
//!
//! Growth therefore lags demand by one cycle. Addresses handed out are valid
//! until the next `prepare` of the same region.
//!
//! A [`MarshalStack`] keeps one region per call depth so that a host
//! callback running inside a foreign call cannot recycle the scratch space
//! the outer call is still reading.

use crate::engine::{store, Element, EngineError, ForeignEngine, Width};
use crate::value::{ForeignPtr, NativeArray};
use thiserror::Error;
use tracing::debug;

const ALIGN: u32 = 8;

/// Marshalling errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("Marshalled allocation of zero bytes")]
    ZeroLength,

    #[error("Invalid string: {0}")]
    InvalidString(String),

    #[error("Foreign allocator returned null for {requested} bytes")]
    Exhausted { requested: u32 },

    #[error("Marshalled size overflows the foreign address space")]
    SizeOverflow,

    #[error("No marshalling depth is active")]
    NoActiveDepth,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Scratch region for one call depth
#[derive(Debug)]
pub struct MarshalRegion {
    base: ForeignPtr,
    capacity: u32,
    cursor: u32,
    pending_growth: u32,
    overflow: Vec<ForeignPtr>,
    growth_increment: u32,
}

impl MarshalRegion {
    pub fn new(growth_increment: u32) -> Self {
        Self {
            base: ForeignPtr::NULL,
            capacity: 0,
            cursor: 0,
            pending_growth: 0,
            overflow: Vec::new(),
            growth_increment,
        }
    }

    pub fn base(&self) -> ForeignPtr {
        self.base
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn pending_growth(&self) -> u32 {
        self.pending_growth
    }

    /// Overflow buffers allocated during the current cycle
    pub fn overflow_count(&self) -> usize {
        self.overflow.len()
    }

    /// Start an allocation cycle
    pub fn prepare<E: ForeignEngine + ?Sized>(&mut self, engine: &E) -> Result<(), MarshalError> {
        if self.pending_growth > 0 {
            for ptr in self.overflow.drain(..) {
                engine.release(ptr)?;
            }
            engine.release(self.base)?;
            self.base = ForeignPtr::NULL;
            self.capacity = self
                .capacity
                .checked_add(self.pending_growth)
                .ok_or(MarshalError::SizeOverflow)?;
            self.pending_growth = 0;
        }

        if self.base.is_null() {
            let capacity = self
                .capacity
                .checked_add(self.growth_increment)
                .ok_or(MarshalError::SizeOverflow)?;
            let base = engine.allocate(capacity)?;
            if base.is_null() {
                return Err(MarshalError::Exhausted {
                    requested: capacity,
                });
            }
            debug!(capacity, %base, "marshal region allocated");
            self.base = base;
            self.capacity = capacity;
        }

        self.cursor = 0;
        Ok(())
    }

    /// Reserve space for `count` elements of `width` bytes
    ///
    /// Returns the absolute foreign address of the space.
    pub fn alloc<E: ForeignEngine + ?Sized>(
        &mut self,
        engine: &E,
        count: u32,
        width: Width,
    ) -> Result<ForeignPtr, MarshalError> {
        let bytes = count
            .checked_mul(width.bytes())
            .ok_or(MarshalError::SizeOverflow)?;
        if bytes == 0 {
            return Err(MarshalError::ZeroLength);
        }
        let len = bytes
            .checked_add(ALIGN - 1)
            .ok_or(MarshalError::SizeOverflow)?
            & !(ALIGN - 1);

        let fits = self
            .cursor
            .checked_add(len)
            .map_or(false, |end| end <= self.capacity);
        if !fits {
            self.pending_growth = self
                .pending_growth
                .checked_add(len)
                .ok_or(MarshalError::SizeOverflow)?;
            let ptr = engine.allocate(len)?;
            if ptr.is_null() {
                return Err(MarshalError::Exhausted { requested: len });
            }
            debug!(len, pending = self.pending_growth, "marshal overflow allocation");
            self.overflow.push(ptr);
            return Ok(ptr);
        }

        let ptr = self.base.offset(self.cursor);
        self.cursor += len;
        Ok(ptr)
    }

    /// Copy a string plus its NUL terminator into scratch space
    pub fn write_str<E: ForeignEngine + ?Sized>(
        &mut self,
        engine: &E,
        text: &str,
    ) -> Result<ForeignPtr, MarshalError> {
        if text.contains('\0') {
            return Err(MarshalError::InvalidString(
                "string contains a NUL byte".to_string(),
            ));
        }
        let bytes = text.as_bytes();
        let len = u32::try_from(bytes.len() + 1).map_err(|_| MarshalError::SizeOverflow)?;
        let ptr = self.alloc(engine, len, Width::W1)?;
        copy(engine, bytes, ptr)?;
        store(engine, ptr.0 + len - 1, 0u8)?;
        Ok(ptr)
    }

    /// Copy a numeric array into scratch space
    ///
    /// An empty array still reserves one element so that the address is usable.
    pub fn write_array<E: ForeignEngine + ?Sized>(
        &mut self,
        engine: &E,
        array: &NativeArray,
    ) -> Result<ForeignPtr, MarshalError> {
        match array {
            NativeArray::I8(values) => self.write_elements(engine, values),
            NativeArray::I16(values) => self.write_elements(engine, values),
            NativeArray::I32(values) => self.write_elements(engine, values),
            NativeArray::F32(values) => self.write_elements(engine, values),
            NativeArray::F64(values) => self.write_elements(engine, values),
        }
    }

    pub fn write_elements<T: Element, E: ForeignEngine + ?Sized>(
        &mut self,
        engine: &E,
        values: &[T],
    ) -> Result<ForeignPtr, MarshalError> {
        let count = u32::try_from(values.len().max(1)).map_err(|_| MarshalError::SizeOverflow)?;
        let ptr = self.alloc(engine, count, T::WIDTH)?;
        copy(engine, values, ptr)?;
        Ok(ptr)
    }

    /// Release the region and any overflow buffers
    pub fn teardown<E: ForeignEngine + ?Sized>(&mut self, engine: &E) -> Result<(), MarshalError> {
        for ptr in self.overflow.drain(..) {
            engine.release(ptr)?;
        }
        engine.release(self.base)?;
        self.base = ForeignPtr::NULL;
        self.capacity = 0;
        self.cursor = 0;
        self.pending_growth = 0;
        Ok(())
    }
}

/// Store `values` element-wise starting at `addr`
///
/// `addr` is taken as an element index (`addr / width`) scaled back by the
/// element width, so it should be aligned to the element width.
pub fn copy<T: Element, E: ForeignEngine + ?Sized>(
    engine: &E,
    values: &[T],
    addr: ForeignPtr,
) -> Result<(), EngineError> {
    let width = T::WIDTH.bytes();
    let index = addr.0 / width;
    for (i, value) in values.iter().enumerate() {
        store(engine, (index + i as u32) * width, *value)?;
    }
    Ok(())
}

/// One marshal region per foreign call depth
#[derive(Debug)]
pub struct MarshalStack {
    regions: Vec<MarshalRegion>,
    depth: usize,
    growth_increment: u32,
}

impl MarshalStack {
    pub fn new(growth_increment: u32) -> Self {
        Self {
            regions: Vec::new(),
            depth: 0,
            growth_increment,
        }
    }

    /// Number of active depths
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Enter a new depth, starting a cycle on its region
    pub fn enter<E: ForeignEngine + ?Sized>(&mut self, engine: &E) -> Result<usize, MarshalError> {
        if self.regions.len() == self.depth {
            self.regions.push(MarshalRegion::new(self.growth_increment));
        }
        self.regions[self.depth].prepare(engine)?;
        self.depth += 1;
        Ok(self.depth)
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Region of the innermost active depth
    pub fn current(&mut self) -> Result<&mut MarshalRegion, MarshalError> {
        match self.depth {
            0 => Err(MarshalError::NoActiveDepth),
            depth => Ok(&mut self.regions[depth - 1]),
        }
    }

    /// Region persisted for `level` (0 is the outermost)
    pub fn region(&self, level: usize) -> Option<&MarshalRegion> {
        self.regions.get(level)
    }

    /// Release every region
    pub fn teardown<E: ForeignEngine + ?Sized>(&mut self, engine: &E) -> Result<(), MarshalError> {
        for region in &mut self.regions {
            region.teardown(engine)?;
        }
        self.regions.clear();
        self.depth = 0;
        Ok(())
    }
}
