//! In-process linear memory engine
//!
//! A byte vector standing in for the engine's sandboxed address space, a
//! first-fit allocator over it, and a table of native entry points.
//!
//! # Examples
//!
//! ```rust
//! use gnump_runtime::engine::{ForeignEngine, LinearEngine, NativeEntryBuilder, NoCallbacks};
//! use gnump_runtime::value::RawValue;
//!
//! let engine = LinearEngine::new(1, 4).unwrap();
//! engine.register(
//!     NativeEntryBuilder::new("twice")
//!         .with_arity(1)
//!         .with_implementation(|_, args, _| match args[0] {
//!             RawValue::F64(x) => Ok(RawValue::F64(2.0 * x)),
//!             _ => Ok(RawValue::Void),
//!         })
//!         .build()
//!         .unwrap(),
//! );
//! let result = engine.call("twice", &[RawValue::F64(1.5)], &NoCallbacks).unwrap();
//! assert_eq!(result, RawValue::F64(3.0));
//! ```

use super::{EngineError, ForeignEngine, HostCallbacks, Width};
use crate::value::{ForeignPtr, RawValue};
use gnump_config::bridge::PAGE_LIMIT;
use gnump_config::BridgeConfig;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, trace};

/// Size of one linear memory page
pub const PAGE_SIZE: u32 = 65_536;

/// First address the allocator hands out; everything below is reserved so
/// that no allocation can alias NULL
pub const HEAP_BASE: u32 = 16;

const ALIGN: u32 = 8;

/// Implementation of a native entry point
pub type NativeImpl =
    Box<dyn Fn(&LinearEngine, &[RawValue], &dyn HostCallbacks) -> Result<RawValue, EngineError>>;

/// A registered native entry point
pub struct NativeEntry {
    name: String,
    arity: Option<usize>,
    implementation: NativeImpl,
}

impl NativeEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed argument count, or `None` for variadic entries
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    fn invoke(
        &self,
        engine: &LinearEngine,
        args: &[RawValue],
        host: &dyn HostCallbacks,
    ) -> Result<RawValue, EngineError> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(EngineError::ArityMismatch {
                    symbol: self.name.clone(),
                    expected,
                    got: args.len(),
                });
            }
        }
        (self.implementation)(engine, args, host)
    }
}

impl std::fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Builder for native entry points with arity validation
///
/// Fixed-arity entries reject calls with a different argument count before
/// the implementation runs; variadic entries validate their own arguments.
pub struct NativeEntryBuilder {
    name: String,
    arity: Option<usize>,
    implementation: Option<NativeImpl>,
}

impl NativeEntryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: None,
            implementation: None,
        }
    }

    /// Require exactly `arity` arguments
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    /// Accept any number of arguments
    pub fn variadic(mut self) -> Self {
        self.arity = None;
        self
    }

    pub fn with_implementation<F>(mut self, implementation: F) -> Self
    where
        F: Fn(&LinearEngine, &[RawValue], &dyn HostCallbacks) -> Result<RawValue, EngineError>
            + 'static,
    {
        self.implementation = Some(Box::new(implementation));
        self
    }

    /// Build the entry
    ///
    /// # Errors
    ///
    /// `MissingImplementation` if no implementation was provided.
    pub fn build(self) -> Result<NativeEntry, EngineError> {
        let implementation = self
            .implementation
            .ok_or_else(|| EngineError::MissingImplementation(self.name.clone()))?;
        Ok(NativeEntry {
            name: self.name,
            arity: self.arity,
            implementation,
        })
    }
}

/// First-fit allocator state
#[derive(Debug)]
struct Heap {
    /// Free blocks by address
    free: BTreeMap<u32, u32>,
    /// Live blocks by address
    live: HashMap<u32, u32>,
    /// End of the highest block ever handed out
    top: u32,
}

/// Linear memory engine
pub struct LinearEngine {
    memory: RefCell<Vec<u8>>,
    max_pages: u32,
    heap: RefCell<Heap>,
    natives: RefCell<HashMap<String, Rc<NativeEntry>>>,
    calls: RefCell<HashMap<String, u64>>,
}

impl LinearEngine {
    /// Create an engine with `initial_pages` of memory, growable to `max_pages`
    pub fn new(initial_pages: u32, max_pages: u32) -> Result<Self, EngineError> {
        if initial_pages > max_pages || max_pages > PAGE_LIMIT {
            return Err(EngineError::OutOfMemory {
                pages: initial_pages.max(max_pages),
                max_pages: max_pages.min(PAGE_LIMIT),
            });
        }
        Ok(Self {
            memory: RefCell::new(vec![0; (initial_pages as usize) * PAGE_SIZE as usize]),
            max_pages,
            heap: RefCell::new(Heap {
                free: BTreeMap::new(),
                live: HashMap::new(),
                top: HEAP_BASE,
            }),
            natives: RefCell::new(HashMap::new()),
            calls: RefCell::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self, EngineError> {
        Self::new(config.initial_pages(), config.max_pages())
    }

    /// Register a native entry point, replacing any entry with the same name
    pub fn register(&self, entry: NativeEntry) {
        self.natives
            .borrow_mut()
            .insert(entry.name.clone(), Rc::new(entry));
    }

    /// Register a fixed-arity native entry point
    pub fn define<F>(&self, name: &str, arity: usize, implementation: F)
    where
        F: Fn(&LinearEngine, &[RawValue], &dyn HostCallbacks) -> Result<RawValue, EngineError>
            + 'static,
    {
        self.register(NativeEntry {
            name: name.to_string(),
            arity: Some(arity),
            implementation: Box::new(implementation),
        });
    }

    /// How many times `symbol` has been called
    pub fn call_count(&self, symbol: &str) -> u64 {
        self.calls.borrow().get(symbol).copied().unwrap_or(0)
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.heap.borrow().live.len()
    }

    /// Size of a live allocation
    pub fn allocation_size(&self, ptr: ForeignPtr) -> Option<u32> {
        self.heap.borrow().live.get(&ptr.0).copied()
    }

    pub fn pages(&self) -> u32 {
        (self.memory.borrow().len() / PAGE_SIZE as usize) as u32
    }

    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<Vec<u8>, EngineError> {
        let memory = self.memory.borrow();
        let range = Self::checked_range(&memory, addr, len)?;
        Ok(memory[range].to_vec())
    }

    pub fn write_bytes(&self, addr: u32, bytes: &[u8]) -> Result<(), EngineError> {
        let mut memory = self.memory.borrow_mut();
        let range = Self::checked_range(&memory, addr, bytes.len() as u32)?;
        memory[range].copy_from_slice(bytes);
        Ok(())
    }

    fn checked_range(
        memory: &[u8],
        addr: u32,
        len: u32,
    ) -> Result<std::ops::Range<usize>, EngineError> {
        let start = addr as usize;
        let end = start + len as usize;
        if end > memory.len() {
            return Err(EngineError::OutOfBounds {
                addr,
                len,
                size: memory.len() as u32,
            });
        }
        Ok(start..end)
    }

    /// Grow memory so that `end` is addressable; false when the page limit forbids it
    fn ensure_capacity(&self, end: u32) -> bool {
        let mut memory = self.memory.borrow_mut();
        if end as usize <= memory.len() {
            return true;
        }
        let pages = ((end as u64 + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64) as u32;
        if pages > self.max_pages {
            return false;
        }
        debug!(from = memory.len() / PAGE_SIZE as usize, to = pages, "growing linear memory");
        memory.resize(pages as usize * PAGE_SIZE as usize, 0);
        true
    }
}

impl ForeignEngine for LinearEngine {
    fn allocate(&self, size: u32) -> Result<ForeignPtr, EngineError> {
        let len = match size.max(1).checked_add(ALIGN - 1) {
            Some(padded) => padded & !(ALIGN - 1),
            None => return Ok(ForeignPtr::NULL),
        };

        let mut heap = self.heap.borrow_mut();

        let fit = heap
            .free
            .iter()
            .find(|(_, block)| **block >= len)
            .map(|(&addr, &block)| (addr, block));
        if let Some((addr, block)) = fit {
            heap.free.remove(&addr);
            if block > len {
                heap.free.insert(addr + len, block - len);
            }
            heap.live.insert(addr, len);
            return Ok(ForeignPtr(addr));
        }

        let addr = heap.top;
        let end = match addr.checked_add(len) {
            Some(end) => end,
            None => return Ok(ForeignPtr::NULL),
        };
        if !self.ensure_capacity(end) {
            trace!(size, "linear memory exhausted");
            return Ok(ForeignPtr::NULL);
        }
        heap.top = end;
        heap.live.insert(addr, len);
        Ok(ForeignPtr(addr))
    }

    fn release(&self, ptr: ForeignPtr) -> Result<(), EngineError> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut heap = self.heap.borrow_mut();
        let mut len = heap
            .live
            .remove(&ptr.0)
            .ok_or(EngineError::InvalidPointer(ptr.0))?;
        let mut addr = ptr.0;

        if let Some(next) = heap.free.remove(&(addr + len)) {
            len += next;
        }
        let prev = heap
            .free
            .range(..addr)
            .next_back()
            .map(|(&a, &l)| (a, l));
        if let Some((prev_addr, prev_len)) = prev {
            if prev_addr + prev_len == addr {
                heap.free.remove(&prev_addr);
                addr = prev_addr;
                len += prev_len;
            }
        }

        if addr + len == heap.top {
            heap.top = addr;
        } else {
            heap.free.insert(addr, len);
        }
        Ok(())
    }

    fn store(&self, addr: u32, width: Width, bits: u64) -> Result<(), EngineError> {
        let bytes = bits.to_le_bytes();
        self.write_bytes(addr, &bytes[..width.bytes() as usize])
    }

    fn load(&self, addr: u32, width: Width) -> Result<u64, EngineError> {
        let memory = self.memory.borrow();
        let range = Self::checked_range(&memory, addr, width.bytes())?;
        let mut bytes = [0u8; 8];
        bytes[..width.bytes() as usize].copy_from_slice(&memory[range]);
        Ok(u64::from_le_bytes(bytes))
    }

    fn call(
        &self,
        symbol: &str,
        args: &[RawValue],
        host: &dyn HostCallbacks,
    ) -> Result<RawValue, EngineError> {
        let entry = self
            .natives
            .borrow()
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))?;
        *self
            .calls
            .borrow_mut()
            .entry(symbol.to_string())
            .or_insert(0) += 1;
        trace!(symbol, args = args.len(), "foreign call");
        entry.invoke(self, args, host)
    }

    fn has_symbol(&self, symbol: &str) -> bool {
        self.natives.borrow().contains_key(symbol)
    }

    fn memory_size(&self) -> u32 {
        self.memory.borrow().len() as u32
    }
}

impl std::fmt::Debug for LinearEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearEngine")
            .field("pages", &self.pages())
            .field("max_pages", &self.max_pages)
            .field("live_allocations", &self.live_allocations())
            .field("natives", &self.natives.borrow().len())
            .finish()
    }
}
