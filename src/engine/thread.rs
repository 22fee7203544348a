//! # Per-Thread Pool Registry
//!
//! Every thread that touches a context gets its own [`ThreadContext`]: one
//! resource pool, one descriptor pool and one command pool. Pools are never
//! shared between threads, so objects allocated on thread `T` are only ever
//! recorded and submitted from `T`.
//!
//! ## Lookup
//!
//! * **Fast path**: the calling thread finds its `ThreadContext` in
//!   thread-local storage, keyed by the registry id. No shared lock is taken.
//! * **Registration**: on first use the thread creates its pools and records
//!   a weak reference in the registry under the registry mutex.
//! * **Purge-all**: [`ThreadRegistry::live`] snapshots every live thread's
//!   pools under the registry mutex so `flush()` can purge them.
//!
//! ## Ownership
//!
//! The registry holds the long-lived strong reference to each thread's pools.
//! Thread-local storage keeps a weak pointer plus a weak link back to the
//! registry:
//!
//! * when a thread exits, its local entry unregisters the thread and the pools
//!   are dropped with it;
//! * when the context is dropped, every thread's pools go with the registry;
//!   stale local entries are pruned on the next registration.
//!
//! ## Locking
//!
//! Each pool sits behind its own mutex. The owning thread is the only regular
//! user, so the lock is uncontended except while `flush()` purges it. Never
//! hold two guards of the *same* pool kind; dispatch takes the command guard
//! then the descriptor guard, and `flush()` never nests guards.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::engine::backend::Backend;
use crate::engine::command::CommandPool;
use crate::engine::descriptor::DescriptorPool;
use crate::engine::error::GpuResult;
use crate::engine::resource::ResourcePool;


/// Owned lock on one of the calling thread's pools.
pub type PoolGuard<T> = ArcMutexGuard<RawMutex, T>;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

type ThreadMap<B> = Mutex<HashMap<ThreadId, Arc<ThreadContext<B>>>>;

trait Unregister: Send + Sync {
    fn unregister(&self, thread: ThreadId);
}

impl<B: Backend> Unregister for ThreadMap<B> {
    fn unregister(&self, thread: ThreadId) {
        // Drop the pools after the map lock is released.
        let pools = self.lock().remove(&thread);
        drop(pools);
    }
}

struct LocalEntry {
    thread: ThreadId,
    pools: Weak<dyn Any + Send + Sync>,
    owner: Weak<dyn Unregister>,
}

impl LocalEntry {
    fn is_stale(&self) -> bool {
        self.owner.strong_count() == 0 || self.pools.strong_count() == 0
    }
}

impl Drop for LocalEntry {
    fn drop(&mut self) {
        if self.pools.strong_count() == 0 {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.unregister(self.thread);
        }
    }
}

thread_local! {
    static LOCAL_POOLS: RefCell<HashMap<u64, LocalEntry>> = RefCell::new(HashMap::new());
}

/// The three pools owned by one thread.

pub struct ThreadContext<B: Backend> {
    thread: ThreadId,
    resource: Arc<Mutex<ResourcePool<B>>>,
    descriptor: Arc<Mutex<DescriptorPool<B>>>,
    command: Arc<Mutex<CommandPool<B>>>,
}

impl<B: Backend> ThreadContext<B> {
    fn new(device: &Arc<B>, descriptor_capacity: u32) -> Self {
        Self {
            thread: thread::current().id(),
            resource: Arc::new(Mutex::new(ResourcePool::new(Arc::clone(device)))),
            descriptor: Arc::new(Mutex::new(DescriptorPool::new(
                Arc::clone(device),
                descriptor_capacity,
            ))),
            command: Arc::new(Mutex::new(CommandPool::new(Arc::clone(device)))),
        }
    }

    /// Thread owning these pools.
    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Locks the resource pool.
    pub fn resource(&self) -> PoolGuard<ResourcePool<B>> {
        Mutex::lock_arc(&self.resource)
    }

    /// Locks the descriptor pool.
    pub fn descriptor(&self) -> PoolGuard<DescriptorPool<B>> {
        Mutex::lock_arc(&self.descriptor)
    }

    /// Locks the command pool.
    pub fn command(&self) -> PoolGuard<CommandPool<B>> {
        Mutex::lock_arc(&self.command)
    }

    /// Returns `true` while a [`command`](Self::command) guard is held.
    ///
    /// `Context::submit`, `dispatch`, `flush` and `wait` lock the command pool
    /// themselves and deadlock if the caller still holds it.
    pub fn command_is_locked(&self) -> bool {
        self.command.is_locked()
    }

    /// Purges all three pools, one lock at a time.
    ///
    /// Returns the number of unsubmitted commands discarded. The command pool
    /// is purged even when the descriptor pool reset fails.
    pub(crate) fn purge(&self) -> GpuResult<usize> {
        self.resource.lock().purge();
        let descriptor = self.descriptor.lock().purge();
        let discarded = self.command.lock().purge();
        descriptor.map(|()| discarded)
    }
}

/// Registry mapping threads to their pools for one context.

pub struct ThreadRegistry<B: Backend> {
    id: u64,
    device: Arc<B>,
    descriptor_capacity: u32,
    threads: Arc<ThreadMap<B>>,
}

impl<B: Backend> ThreadRegistry<B> {
    /// Creates an empty registry whose pools allocate on `device`.
    pub fn new(device: Arc<B>, descriptor_capacity: u32) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            device,
            descriptor_capacity,
            threads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pools of the calling thread, created on first use.
    pub fn current(&self) -> Arc<ThreadContext<B>> {
        let cached = LOCAL_POOLS.with(|local| {
            local.borrow().get(&self.id).and_then(|entry| entry.pools.upgrade())
        });

        if let Some(any) = cached {
            if let Ok(pools) = any.downcast::<ThreadContext<B>>() {
                return pools;
            }
        }

        self.register()
    }

    /// Snapshot of every live thread's pools.
    pub fn live(&self) -> Vec<Arc<ThreadContext<B>>> {
        self.threads.lock().values().cloned().collect()
    }

    /// Number of threads with pools in this registry.
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// Returns `true` if no live thread has pools in this registry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every thread's pools. Threads re-register on next use.
    pub(crate) fn clear(&self) -> usize {
        let pools = std::mem::take(&mut *self.threads.lock());
        pools.len()
    }

    fn register(&self) -> Arc<ThreadContext<B>> {
        let pools = Arc::new(ThreadContext::new(&self.device, self.descriptor_capacity));
        let thread = pools.thread();

        let weak_pools: Weak<dyn Any + Send + Sync> = Arc::<ThreadContext<B>>::downgrade(&pools);
        let owner: Weak<dyn Unregister> = Arc::<ThreadMap<B>>::downgrade(&self.threads);

        let registered = {
            let mut threads = self.threads.lock();
            threads.insert(thread, Arc::clone(&pools));
            threads.len()
        };

        // Replaced and stale entries are dropped outside the `RefCell` borrow.
        let (replaced, stale) = LOCAL_POOLS.with(|local| {
            let mut local = local.borrow_mut();
            let stale: Vec<u64> = local
                .iter()
                .filter(|(id, entry)| **id != self.id && entry.is_stale())
                .map(|(id, _)| *id)
                .collect();
            let stale: Vec<LocalEntry> = stale.iter().filter_map(|id| local.remove(id)).collect();
            let replaced = local.insert(
                self.id,
                LocalEntry { thread, pools: weak_pools, owner },
            );
            (replaced, stale)
        });
        // The replaced entry pointed at pools that are already gone; keep it
        // from unregistering the fresh ones.
        if let Some(mut entry) = replaced {
            entry.owner = Weak::<ThreadMap<B>>::new();
        }
        drop(stale);

        tracing::debug!(
            thread = ?thread::current().name(),
            threads = registered,
            "registered thread pools"
        );
        pools
    }
}
