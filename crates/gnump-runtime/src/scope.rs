//! Scoped batch helper
//!
//! [`Bridge::with_scope`] hands the callback a [`Scope`] whose `create`
//! constructs instances of one class and tracks them. When the callback
//! returns, normally or with an error, every tracked instance is destroyed
//! and the class's free lists are released. A panic unwinding through the
//! callback still releases them through `Drop`.

use crate::bridge::Bridge;
use crate::class::ClassTag;
use crate::error::{BindError, BindResult};
use crate::numeric::FLOAT;
use crate::value::Arg;
use crate::wrapper::Wrapper;
use tracing::{debug, warn};

/// Tracked factory for one class
pub struct Scope<'b> {
    bridge: &'b Bridge,
    class: ClassTag,
    tracked: Vec<Wrapper>,
    finished: bool,
}

impl<'b> Scope<'b> {
    fn new(bridge: &'b Bridge, class: ClassTag) -> Self {
        Self {
            bridge,
            class,
            tracked: Vec::new(),
            finished: false,
        }
    }

    /// Construct an instance and track it for release at scope exit
    pub fn create(&mut self, args: &[Arg]) -> BindResult<Wrapper> {
        let wrapper = self.bridge.construct(self.class, args)?;
        self.tracked.push(wrapper.clone());
        Ok(wrapper)
    }

    pub fn bridge(&self) -> &'b Bridge {
        self.bridge
    }

    pub fn class(&self) -> ClassTag {
        self.class
    }

    pub fn tracked(&self) -> &[Wrapper] {
        &self.tracked
    }

    /// Destroy everything tracked, then release the class's free lists
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    fn release(&mut self) -> BindResult<()> {
        self.finished = true;
        let mut first_error = None;
        let mut destroyed = 0usize;

        for wrapper in self.tracked.drain(..) {
            if wrapper.is_destroyed() {
                continue;
            }
            match self.bridge.destroy(&wrapper) {
                Ok(()) => destroyed += 1,
                Err(e) => {
                    warn!(%wrapper, error = %e, "scope failed to destroy");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.bridge.release_cache(self.class) {
            warn!(class = %self.class, error = %e, "scope failed to release cache");
            first_error.get_or_insert(e);
        }

        debug!(class = %self.class, destroyed, "scope released");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.release() {
                warn!(error = %e, "scope cleanup failed during unwind");
            }
        }
    }
}

impl Bridge {
    /// Run `callback` with a tracked factory for `class`
    ///
    /// Cleanup always runs before returning. An error from the callback is
    /// returned unchanged; a cleanup error is returned only when the
    /// callback succeeded.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use gnump_runtime::{args, Bridge};
    /// use gnump_runtime::engine::reference;
    /// use gnump_config::BridgeConfig;
    ///
    /// let config = BridgeConfig::default();
    /// let bridge = Bridge::new(reference::engine(&config).unwrap(), &config)
    ///     .unwrap()
    ///     .with_numeric_classes()
    ///     .unwrap();
    ///
    /// let value = bridge
    ///     .float_scope(|f| {
    ///         let x = f.create(&args![128])?;
    ///         let bridge = f.bridge();
    ///         bridge.call(&x, "set", &args![2.0])?;
    ///         bridge.call(&x, "sqrt", &[])?;
    ///         bridge.call(&x, "to_number", &[])
    ///     })
    ///     .unwrap();
    /// assert!((value.as_number().unwrap() - 2f64.sqrt()).abs() < 1e-15);
    /// ```
    pub fn with_scope<T, E, F>(&self, class: ClassTag, callback: F) -> Result<T, E>
    where
        E: From<BindError>,
        F: FnOnce(&mut Scope<'_>) -> Result<T, E>,
    {
        self.binding(class).map_err(E::from)?;

        let mut scope = Scope::new(self, class);
        let result = callback(&mut scope);
        let cleanup = scope.release();

        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(E::from(e)),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_error)) => {
                warn!(error = %cleanup_error, "scope cleanup failed while an error was propagating");
                Err(e)
            }
        }
    }

    /// [`with_scope`](Bridge::with_scope) over the arbitrary-precision float class
    pub fn float_scope<T, E, F>(&self, callback: F) -> Result<T, E>
    where
        E: From<BindError>,
        F: FnOnce(&mut Scope<'_>) -> Result<T, E>,
    {
        self.with_scope(FLOAT, callback)
    }
}
