//! Wrapper base protocol
//!
//! A [`Wrapper`] stands in for one foreign pointer of one class. Clones
//! share the same instance; the identity cache hands out at most one
//! instance per `(class, pointer)`.
//!
//! Equality compares the pointer value only: two wrappers of different
//! classes over the same pointer are equal while remaining distinct
//! instances (see [`Wrapper::same_instance`]).

use crate::class::ClassTag;
use crate::value::ForeignPtr;
use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

struct WrapperInner {
    ptr: ForeignPtr,
    class: ClassTag,
    destroyed: Cell<bool>,
}

/// Host proxy for a foreign pointer
#[derive(Clone)]
pub struct Wrapper(Rc<WrapperInner>);

impl Wrapper {
    pub(crate) fn new(ptr: ForeignPtr, class: ClassTag) -> Self {
        Wrapper(Rc::new(WrapperInner {
            ptr,
            class,
            destroyed: Cell::new(false),
        }))
    }

    pub fn pointer(&self) -> ForeignPtr {
        self.0.ptr
    }

    pub fn class(&self) -> ClassTag {
        self.0.class
    }

    pub fn is_null(&self) -> bool {
        self.0.ptr.is_null()
    }

    /// Whether the finalizer already ran through this handle
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub(crate) fn mark_destroyed(&self) {
        self.0.destroyed.set(true);
    }

    /// Pointer equality
    pub fn equals(&self, other: &Wrapper) -> bool {
        self.pointer() == other.pointer()
    }

    /// Host identity: both handles are clones of one instance
    pub fn same_instance(&self, other: &Wrapper) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Wrapper {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Wrapper {}

impl Hash for Wrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pointer().hash(state);
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("class", &self.class())
            .field("ptr", &self.pointer())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl fmt::Display for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class(), self.pointer())
    }
}

/// Pointer equality of two wrappers
pub fn compare(a: &Wrapper, b: &Wrapper) -> bool {
    a.equals(b)
}

pub fn get_pointer(wrapper: &Wrapper) -> ForeignPtr {
    wrapper.pointer()
}

pub fn get_class(wrapper: &Wrapper) -> ClassTag {
    wrapper.class()
}
