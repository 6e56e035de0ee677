//! Object identity cache
//!
//! One map per class from foreign pointer to its live wrapper. Lookup
//! always precedes creation, so a pointer is never wrapped twice for the
//! same class.

use crate::class::ClassTag;
use crate::value::ForeignPtr;
use crate::wrapper::Wrapper;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug)]
pub struct IdentityCache {
    classes: HashMap<ClassTag, HashMap<ForeignPtr, Wrapper>>,
    null: Wrapper,
}

impl IdentityCache {
    /// Create a cache holding only the canonical null wrapper
    pub fn new() -> Self {
        let null = Wrapper::new(ForeignPtr::NULL, ClassTag::WRAPPER_OBJECT);
        let mut classes = HashMap::new();
        classes.insert(
            ClassTag::WRAPPER_OBJECT,
            HashMap::from([(ForeignPtr::NULL, null.clone())]),
        );
        Self { classes, null }
    }

    /// The cached wrapper for `(class, ptr)`, created on first use
    pub fn wrap(&mut self, ptr: ForeignPtr, class: ClassTag) -> Wrapper {
        let entries = self.classes.entry(class).or_default();
        if let Some(existing) = entries.get(&ptr) {
            trace!(%class, %ptr, "cache hit");
            return existing.clone();
        }
        trace!(%class, %ptr, "cache miss");
        let wrapper = Wrapper::new(ptr, class);
        entries.insert(ptr, wrapper.clone());
        wrapper
    }

    pub fn lookup(&self, class: ClassTag, ptr: ForeignPtr) -> Option<Wrapper> {
        self.classes.get(&class)?.get(&ptr).cloned()
    }

    pub fn contains(&self, class: ClassTag, ptr: ForeignPtr) -> bool {
        self.classes
            .get(&class)
            .is_some_and(|entries| entries.contains_key(&ptr))
    }

    /// Remove the entry for `(class, ptr)`
    ///
    /// Absent entries are ignored. The canonical null wrapper is never
    /// evicted; null views under other classes are.
    pub fn evict(&mut self, class: ClassTag, ptr: ForeignPtr) -> Option<Wrapper> {
        if ptr.is_null() && class == ClassTag::WRAPPER_OBJECT {
            return None;
        }
        self.classes.get_mut(&class)?.remove(&ptr)
    }

    /// The canonical null wrapper
    pub fn null(&self) -> Wrapper {
        self.null.clone()
    }

    /// Number of cached wrappers across all classes
    pub fn len(&self) -> usize {
        self.classes.values().map(HashMap::len).sum()
    }

    pub fn len_for(&self, class: ClassTag) -> usize {
        self.classes.get(&class).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}
