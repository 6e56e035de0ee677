//! The bridge context
//!
//! One [`Bridge`] per loaded engine instance. It owns the identity cache,
//! the marshal stack, the generated class bindings and the table of host
//! callbacks, so several engines can be driven side by side without sharing
//! any state.
//!
//! All calls are synchronous and single-threaded. The bridge is handed to
//! the engine as its [`HostCallbacks`], so a foreign call may re-enter it;
//! each re-entry that marshals gets its own marshal depth.

use crate::adapter::{
    lift_param, lift_result, lower_argument, lower_callback_result, ClassBinding, ClassRegistry,
    ObjectSpace, ScratchSpace,
};
use crate::cache::IdentityCache;
use crate::class::{CallSignature, ClassDescriptor, ClassTag, ParamKind, WRAPPER_OBJECT};
use crate::engine::{EngineError, ForeignEngine, HostCallbacks};
use crate::error::{BindError, BindResult};
use crate::marshal::{MarshalError, MarshalStack};
use crate::numeric::Rounding;
use crate::value::{Arg, ForeignPtr, NativeArray, RawValue, Value};
use crate::wrapper::Wrapper;
use gnump_config::BridgeConfig;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Host closure behind a callable wrapper
pub type HostFn = Rc<dyn Fn(&Bridge, &[Value]) -> BindResult<Value>>;

/// Size of the foreign slot that gives a callable wrapper its address
const CALLBACK_SLOT_SIZE: u32 = 8;

struct CallbackEntry {
    class: ClassTag,
    signature: CallSignature,
    function: HostFn,
}

/// Binding runtime for one foreign engine
pub struct Bridge {
    engine: Rc<dyn ForeignEngine>,
    cache: RefCell<IdentityCache>,
    marshal: RefCell<MarshalStack>,
    registry: RefCell<ClassRegistry>,
    callbacks: RefCell<HashMap<ForeignPtr, CallbackEntry>>,
    default_precision: u32,
    default_rounding: Rounding,
}

impl Bridge {
    /// Create a bridge with only the opaque base class registered
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` fails validation.
    pub fn new(engine: Rc<dyn ForeignEngine>, config: &BridgeConfig) -> BindResult<Self> {
        config
            .validate()
            .map_err(|e| BindError::InvalidConfig(e.to_string()))?;
        let default_rounding = Rounding::from_name(config.default_rounding()).ok_or_else(|| {
            BindError::InvalidConfig(format!(
                "unknown rounding mode '{}'",
                config.default_rounding()
            ))
        })?;

        let mut registry = ClassRegistry::new();
        registry.register(&WRAPPER_OBJECT)?;
        Ok(Self {
            engine,
            cache: RefCell::new(IdentityCache::new()),
            marshal: RefCell::new(MarshalStack::new(config.growth_increment())),
            registry: RefCell::new(registry),
            callbacks: RefCell::new(HashMap::new()),
            default_precision: config.default_precision(),
            default_rounding,
        })
    }

    pub fn engine(&self) -> &dyn ForeignEngine {
        self.engine.as_ref()
    }

    pub fn default_precision(&self) -> u32 {
        self.default_precision
    }

    pub fn default_rounding(&self) -> Rounding {
        self.default_rounding
    }

    /// Generate and register the binding for a class
    pub fn register_class(&self, descriptor: &'static ClassDescriptor) -> BindResult<()> {
        self.registry.borrow_mut().register(descriptor)?;
        debug!(class = %descriptor.tag, "class registered");
        Ok(())
    }

    pub fn is_registered(&self, class: ClassTag) -> bool {
        self.registry.borrow().contains(class)
    }

    pub fn binding(&self, class: ClassTag) -> BindResult<Rc<ClassBinding>> {
        self.registry
            .borrow()
            .get(class)
            .ok_or(BindError::UnknownClass(class))
    }

    /// Construct an instance, choosing the constructor by argument count
    ///
    /// # Errors
    ///
    /// `Construction` if the class has no constructor at all,
    /// `AllocationExhaustion` if the engine hands back a null pointer.
    pub fn construct(&self, class: ClassTag, args: &[Arg]) -> BindResult<Wrapper> {
        let binding = self.binding(class)?;
        if !binding.is_constructible() {
            return Err(BindError::Construction { class });
        }
        let ctor = binding.constructor(args.len()).ok_or(BindError::NoOverload {
            class,
            arity: args.len(),
        })?;

        let raw = self.call_entry(ctor.symbol, ctor.params, ctor.marshals, None, args)?;
        let ptr = raw
            .as_ptr()
            .ok_or_else(|| BindError::type_mismatch("pointer", raw.type_name()))?;
        if ptr.is_null() {
            return Err(BindError::AllocationExhaustion {
                context: format!("constructing {}", class),
            });
        }
        Ok(self.cache.borrow_mut().wrap(ptr, class))
    }

    /// Call an instance method
    pub fn call(&self, receiver: &Wrapper, method: &str, args: &[Arg]) -> BindResult<Value> {
        let class = receiver.class();
        if receiver.is_destroyed() {
            return Err(BindError::UseAfterDestroy {
                class,
                ptr: receiver.pointer(),
            });
        }
        let binding = self.binding(class)?;
        let adapter = binding.method(method).ok_or_else(|| BindError::UnknownMethod {
            class,
            method: method.to_string(),
        })?;
        if adapter.is_static {
            return Err(BindError::NotInstance {
                class,
                method: method.to_string(),
            });
        }

        let raw = self.call_entry(
            adapter.symbol,
            adapter.params,
            adapter.marshals,
            Some(receiver.pointer()),
            args,
        )?;
        lift_result(&adapter.lowering, raw, Some(receiver), self)
    }

    /// Call a static method
    pub fn call_static(&self, class: ClassTag, method: &str, args: &[Arg]) -> BindResult<Value> {
        let binding = self.binding(class)?;
        let adapter = binding.method(method).ok_or_else(|| BindError::UnknownMethod {
            class,
            method: method.to_string(),
        })?;
        if !adapter.is_static {
            return Err(BindError::NotStatic {
                class,
                method: method.to_string(),
            });
        }

        let raw = self.call_entry(adapter.symbol, adapter.params, adapter.marshals, None, args)?;
        lift_result(&adapter.lowering, raw, None, self)
    }

    fn call_entry(
        &self,
        symbol: &str,
        params: &[ParamKind],
        marshals: bool,
        receiver: Option<ForeignPtr>,
        args: &[Arg],
    ) -> BindResult<RawValue> {
        if args.len() != params.len() {
            return Err(BindError::ArityMismatch {
                callee: symbol.to_string(),
                expected: params.len(),
                got: args.len(),
            });
        }

        let _depth = if marshals {
            Some(DepthGuard::enter(self)?)
        } else {
            None
        };

        let mut raw = Vec::with_capacity(params.len() + 1);
        raw.extend(receiver.map(RawValue::from));
        let mut scratch = BridgeScratch { bridge: self };
        for (kind, arg) in params.iter().zip(args) {
            raw.push(lower_argument(kind, arg, &mut scratch)?);
        }

        trace!(symbol, args = raw.len(), "invoking");
        Ok(self.engine.call(symbol, &raw, self)?)
    }

    /// Run the finalizer and evict the wrapper from the cache
    ///
    /// # Errors
    ///
    /// `DoubleDestroy` if this handle was already destroyed,
    /// `UndestroyableObject` if the class has no finalizer.
    pub fn destroy(&self, wrapper: &Wrapper) -> BindResult<()> {
        let class = wrapper.class();
        let ptr = wrapper.pointer();
        if wrapper.is_destroyed() {
            return Err(BindError::DoubleDestroy { class, ptr });
        }
        let finalizer = self
            .registry
            .borrow()
            .get(class)
            .and_then(|binding| binding.finalizer())
            .ok_or(BindError::UndestroyableObject { class })?;

        self.engine.call(finalizer, &[RawValue::from(ptr)], self)?;
        wrapper.mark_destroyed();
        self.cache.borrow_mut().evict(class, ptr);
        if self.callbacks.borrow_mut().remove(&ptr).is_some() {
            trace!(%ptr, "callback unregistered");
        }
        debug!(%class, %ptr, "destroyed");
        Ok(())
    }

    /// Wrap a raw pointer as an instance of `class`
    pub fn wrap_pointer(&self, ptr: ForeignPtr, class: ClassTag) -> Wrapper {
        self.cache.borrow_mut().wrap(ptr, class)
    }

    /// View the same pointer as an instance of another class
    pub fn cast_object(&self, wrapper: &Wrapper, class: ClassTag) -> Wrapper {
        self.wrap_pointer(wrapper.pointer(), class)
    }

    /// The canonical null wrapper
    pub fn null(&self) -> Wrapper {
        self.cache.borrow().null()
    }

    /// The live cached wrapper for `(class, ptr)`, if any
    pub fn cached(&self, class: ClassTag, ptr: ForeignPtr) -> Option<Wrapper> {
        self.cache.borrow().lookup(class, ptr)
    }

    /// Number of cached wrappers, optionally for one class
    pub fn cache_len(&self, class: Option<ClassTag>) -> usize {
        let cache = self.cache.borrow();
        match class {
            Some(class) => cache.len_for(class),
            None => cache.len(),
        }
    }

    /// Current marshal depth
    pub fn marshal_depth(&self) -> usize {
        self.marshal.borrow().depth()
    }

    /// Hand a host closure to the engine as an instance of a callable class
    pub fn callable<F>(&self, class: ClassTag, function: F) -> BindResult<Wrapper>
    where
        F: Fn(&Bridge, &[Value]) -> BindResult<Value> + 'static,
    {
        let binding = self.binding(class)?;
        let signature = binding.callable().ok_or(BindError::NotCallable { class })?;
        let slot = self.engine.allocate(CALLBACK_SLOT_SIZE)?;
        if slot.is_null() {
            return Err(BindError::AllocationExhaustion {
                context: format!("creating a callable {}", class),
            });
        }
        self.callbacks.borrow_mut().insert(
            slot,
            CallbackEntry {
                class,
                signature,
                function: Rc::new(function),
            },
        );
        debug!(%class, %slot, "callable registered");
        Ok(self.wrap_pointer(slot, class))
    }

    /// Ask the engine to drop the class's internal free lists
    pub fn release_cache(&self, class: ClassTag) -> BindResult<()> {
        let binding = self.binding(class)?;
        if let Some(symbol) = binding.release_cache() {
            self.engine.call(symbol, &[], self)?;
        }
        Ok(())
    }

    /// Release all marshalling memory
    ///
    /// The bridge stays usable; the next marshalling call allocates afresh.
    pub fn shutdown(&self) -> BindResult<()> {
        self.marshal.borrow_mut().teardown(self.engine.as_ref())?;
        Ok(())
    }
}

impl HostCallbacks for Bridge {
    fn invoke(&self, callback: ForeignPtr, args: &[RawValue]) -> Result<RawValue, EngineError> {
        let (class, signature, function) = {
            let callbacks = self.callbacks.borrow();
            let entry = callbacks
                .get(&callback)
                .ok_or(EngineError::UnknownCallback(callback.0))?;
            (entry.class, entry.signature, entry.function.clone())
        };
        trace!(%class, %callback, "host callback");

        let run = || -> BindResult<RawValue> {
            if args.len() != signature.params.len() {
                return Err(BindError::ArityMismatch {
                    callee: class.to_string(),
                    expected: signature.params.len(),
                    got: args.len(),
                });
            }
            let values = signature
                .params
                .iter()
                .zip(args)
                .map(|(kind, raw)| lift_param(kind, *raw, self))
                .collect::<BindResult<Vec<_>>>()?;
            let result = (*function)(self, &values)?;
            lower_callback_result(&signature.ret, &result)
        };
        run().map_err(|e| EngineError::HostCallback(e.to_string()))
    }
}

impl ObjectSpace for Bridge {
    fn wrap(&self, ptr: ForeignPtr, class: ClassTag) -> Wrapper {
        self.wrap_pointer(ptr, class)
    }

    fn read_str(&self, ptr: ForeignPtr) -> Result<String, EngineError> {
        self.engine.read_c_string(ptr)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let engine = self.engine.clone();
        if let Err(e) = self.marshal.get_mut().teardown(engine.as_ref()) {
            warn!(error = %e, "failed to release marshalling memory");
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("classes", &self.registry.borrow().len())
            .field("cached", &self.cache.borrow().len())
            .field("callbacks", &self.callbacks.borrow().len())
            .field("marshal_depth", &self.marshal.borrow().depth())
            .finish()
    }
}

/// Keeps one marshal depth entered for the duration of a call
struct DepthGuard<'a> {
    marshal: &'a RefCell<MarshalStack>,
}

impl<'a> DepthGuard<'a> {
    fn enter(bridge: &'a Bridge) -> BindResult<Self> {
        bridge.marshal.borrow_mut().enter(bridge.engine.as_ref())?;
        Ok(Self {
            marshal: &bridge.marshal,
        })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.marshal.borrow_mut().leave();
    }
}

struct BridgeScratch<'a> {
    bridge: &'a Bridge,
}

impl ScratchSpace for BridgeScratch<'_> {
    fn write_str(&mut self, text: &str) -> Result<ForeignPtr, MarshalError> {
        self.bridge
            .marshal
            .borrow_mut()
            .current()?
            .write_str(self.bridge.engine.as_ref(), text)
    }

    fn write_array(&mut self, array: &NativeArray) -> Result<ForeignPtr, MarshalError> {
        self.bridge
            .marshal
            .borrow_mut()
            .current()?
            .write_array(self.bridge.engine.as_ref(), array)
    }
}
