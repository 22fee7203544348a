//! # Memoizing Object Cache
//!
//! [`Cache`] maps a signature to a lazily constructed, shared native object.
//! It is the building block of the shader and pipeline caches.
//!
//! ## Concurrency
//!
//! The cache keeps one `OnceCell` slot per distinct signature:
//!
//! * **hit path**: a shared read lock on the map and a clone of the handle;
//! * **miss path**: the map write lock is held only long enough to insert an
//!   empty slot; construction then runs inside that slot's `OnceCell`.
//!
//! Racing lookups of the *same* signature therefore block on the slot and
//! observe a single construction, while lookups of *different* signatures
//! construct in parallel.
//!
//! ## Failure
//!
//! If the factory fails, the error is returned to the caller and nothing is
//! committed; a later lookup constructs again. The empty slot is dropped from
//! the map unless another lookup is already waiting on it.
//!
//! ## Lifetime
//!
//! Entries are never evicted. They are released when the cache is dropped or
//! explicitly [`purge`](Cache::purge)d, i.e. with the owning context.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::engine::error::{GpuError, GpuResult};
use crate::engine::types::Handle;


/// Constructs cache entries from signatures.

pub trait Factory: Send + Sync {
    /// Signature type used as the cache key.
    type Descriptor: Clone + Eq + Hash + Send + Sync;
    /// Native object produced for a signature.
    type Object: Send + Sync;

    /// Short name used in diagnostics.
    const NAME: &'static str;

    /// Builds the object for `descriptor`.
    fn create(&self, descriptor: &Self::Descriptor) -> GpuResult<Self::Object>;
}

type Slot<T> = Arc<OnceCell<Handle<T>>>;

/// Thread-safe memoizing cache over a [`Factory`].

pub struct Cache<F: Factory> {
    factory: F,
    entries: RwLock<HashMap<F::Descriptor, Slot<F::Object>>>,
}

impl<F: Factory> Cache<F> {
    /// Creates an empty cache around `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the object for `descriptor`, constructing it on first request.
    ///
    /// ## Semantics
    /// * Identical descriptors always yield the same [`Handle`].
    /// * Concurrent first requests for one descriptor construct it once.
    ///
    /// ## Errors
    /// Whatever the factory returns. The failed construction is not cached.

    pub fn retrieve(&self, descriptor: &F::Descriptor) -> GpuResult<Handle<F::Object>> {
        let slot = self.slot(descriptor);

        let handle = slot.get_or_try_init(|| {
            let _span = tracing::debug_span!("cache_construct", cache = F::NAME).entered();
            let object = self.factory.create(descriptor).inspect_err(|e| {
                tracing::warn!(cache = F::NAME, error = %e, "cache construction failed");
            })?;
            tracing::debug!(cache = F::NAME, "constructed cache entry");
            Ok::<_, GpuError>(Handle::new(object))
        });

        match handle {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                self.discard_empty(descriptor, &slot);
                Err(e)
            }
        }
    }

    /// Returns the cached object for `descriptor` without constructing it.
    pub fn get(&self, descriptor: &F::Descriptor) -> Option<Handle<F::Object>> {
        self.entries
            .read()
            .get(descriptor)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of constructed entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    /// Returns `true` if nothing has been constructed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    ///
    /// Handles already given out stay valid; later lookups construct anew.
    pub fn purge(&self) {
        self.entries.write().clear();
    }

    /// The factory this cache constructs with.
    #[inline]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn slot(&self, descriptor: &F::Descriptor) -> Slot<F::Object> {
        if let Some(slot) = self.entries.read().get(descriptor) {
            return Arc::clone(slot);
        }

        let mut entries = self.entries.write();
        Arc::clone(entries.entry(descriptor.clone()).or_default())
    }

    // Clones of a slot are only taken under the map lock, so with the write
    // lock held a count of two means the map and `slot` are the only owners.
    fn discard_empty(&self, descriptor: &F::Descriptor, slot: &Slot<F::Object>) {
        let mut entries = self.entries.write();
        let unused = entries.get(descriptor).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && current.get().is_none() && Arc::strong_count(current) == 2
        });
        if unused {
            entries.remove(descriptor);
        }
    }

    /// Number of signature slots in the map, constructed or not.
    pub fn slots(&self) -> usize {
        self.entries.read().len()
    }
}

impl<F: Factory> std::fmt::Debug for Cache<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &F::NAME)
            .field("len", &self.len())
            .finish()
    }
}
