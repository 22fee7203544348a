//! # Descriptor Sets and the Per-Thread Descriptor Pool
//!
//! A [`DescriptorSet`] binds concrete buffers and images to the slots of a
//! [`ShaderLayout`]. Sets are allocated from the calling thread's
//! [`DescriptorPool`], filled by the caller, then recorded into a command
//! stream.
//!
//! ## Pool growth
//!
//! The pool is a list of native descriptor pools of fixed capacity. When the
//! current native pool is full the next one is used, creating it on demand.
//! [`DescriptorPool::purge`] resets every native pool and rewinds to the first,
//! so steady-state workloads stop creating native pools after warm-up.
//!
//! ## Epochs
//!
//! Each purge advances the pool's epoch. A set remembers the epoch it was
//! allocated in and reports itself stale once the pool has moved on; the
//! dispatch epilogue refuses to record stale sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::backend::Backend;
use crate::engine::error::{BindingError, GpuError, GpuResult};
use crate::engine::shader::ShaderLayout;
use crate::engine::types::Handle;


/// Default number of descriptor sets per native descriptor pool.
pub const DEFAULT_DESCRIPTOR_POOL_CAPACITY: u32 = 1024;

/// A resource bound into one descriptor slot.
pub enum Binding<B: Backend> {
    /// A buffer range. `size: None` binds to the end of the buffer.
    Buffer {
        /// Bound buffer.
        buffer: Handle<B::Buffer>,
        /// Byte offset.
        offset: u64,
        /// Byte size, or the rest of the buffer.
        size: Option<u64>,
    },
    /// An image view.
    Image(Handle<B::ImageView>),
}

impl<B: Backend> Clone for Binding<B> {
    fn clone(&self) -> Self {
        match self {
            Binding::Buffer { buffer, offset, size } => Binding::Buffer {
                buffer: buffer.clone(),
                offset: *offset,
                size: *size,
            },
            Binding::Image(view) => Binding::Image(view.clone()),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Binding<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Buffer { buffer, offset, size } => f
                .debug_struct("Buffer")
                .field("buffer", buffer)
                .field("offset", offset)
                .field("size", size)
                .finish(),
            Binding::Image(view) => f.debug_tuple("Image").field(view).finish(),
        }
    }
}

/// Pool epoch captured at allocation time.
#[derive(Debug, Clone)]
struct Epoch {
    current: Arc<AtomicU64>,
    allocated: u64,
}

impl Epoch {
    #[inline]
    fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.allocated
    }
}

/// A set of resource bindings for one [`ShaderLayout`].
///
/// ## Lifetime
/// Valid until the next purge of the pool it was allocated from. Binding
/// calls do not check validity; recording a stale set is rejected by
/// [`dispatch_epilogue`](crate::dispatch_epilogue).

pub struct DescriptorSet<B: Backend> {
    layout: Handle<ShaderLayout<B>>,
    handle: B::DescriptorSet,
    bindings: Vec<Option<Binding<B>>>,
    epoch: Epoch,
}

impl<B: Backend> DescriptorSet<B> {
    /// Binds all of `buffer` to `slot`.
    pub fn bind_buffer(&mut self, slot: u32, buffer: &Handle<B::Buffer>) -> GpuResult<&mut Self> {
        self.bind_buffer_range(slot, buffer, 0, None)
    }

    /// Binds `size` bytes of `buffer` starting at `offset` to `slot`.
    ///
    /// ## Errors
    /// * [`BindingError::SlotOutOfRange`] if the layout has no such slot,
    /// * [`BindingError::TypeMismatch`] if the slot expects an image.

    pub fn bind_buffer_range(
        &mut self,
        slot: u32,
        buffer: &Handle<B::Buffer>,
        offset: u64,
        size: Option<u64>,
    ) -> GpuResult<&mut Self> {
        self.check_slot(slot, true)?;
        self.bindings[slot as usize] = Some(Binding::Buffer {
            buffer: buffer.clone(),
            offset,
            size,
        });
        Ok(self)
    }

    /// Binds an image view to `slot`.
    pub fn bind_image(&mut self, slot: u32, view: &Handle<B::ImageView>) -> GpuResult<&mut Self> {
        self.check_slot(slot, false)?;
        self.bindings[slot as usize] = Some(Binding::Image(view.clone()));
        Ok(self)
    }

    /// Layout this set was allocated for.
    #[inline]
    pub fn layout(&self) -> &Handle<ShaderLayout<B>> {
        &self.layout
    }

    /// Native descriptor-set object.
    #[inline]
    pub fn handle(&self) -> &B::DescriptorSet {
        &self.handle
    }

    /// Current bindings in slot order; `None` marks an unbound slot.
    #[inline]
    pub fn bindings(&self) -> &[Option<Binding<B>>] {
        &self.bindings
    }

    /// Binding at `slot`, if bound.
    #[inline]
    pub fn binding(&self, slot: u32) -> Option<&Binding<B>> {
        self.bindings.get(slot as usize).and_then(Option::as_ref)
    }

    /// Returns `true` once every slot is bound.
    pub fn is_complete(&self) -> bool {
        self.bindings.iter().all(Option::is_some)
    }

    /// Returns `true` while the owning pool has not been purged.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.epoch.is_current()
    }

    /// Pool epoch this set was allocated in.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.allocated
    }

    /// Errors with [`GpuError::StaleDescriptorSet`](crate::GpuError::StaleDescriptorSet)
    /// if the pool was purged since allocation.
    pub(crate) fn ensure_valid(&self) -> GpuResult<()> {
        let current = self.epoch.current.load(Ordering::Acquire);
        if current != self.epoch.allocated {
            return Err(GpuError::StaleDescriptorSet {
                allocated: self.epoch.allocated,
                current,
            });
        }
        Ok(())
    }

    fn check_slot(&self, slot: u32, buffer: bool) -> Result<(), BindingError> {
        let signature = self.layout.signature();
        let expected = signature.get(slot).ok_or(BindingError::SlotOutOfRange {
            slot,
            len: signature.len(),
        })?;

        if expected.is_buffer() != buffer {
            return Err(BindingError::TypeMismatch {
                slot,
                expected,
                found: if buffer { "buffer" } else { "image" },
            });
        }
        Ok(())
    }
}

impl<B: Backend> std::fmt::Debug for DescriptorSet<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("layout", &self.layout)
            .field("bindings", &self.bindings)
            .field("epoch", &self.epoch.allocated)
            .finish()
    }
}

/// Thread-owned allocator of descriptor sets.

pub struct DescriptorPool<B: Backend> {
    device: Arc<B>,
    capacity: u32,
    pools: Vec<B::DescriptorPool>,
    current: usize,
    used_in_current: u32,
    allocated: usize,
    epoch: Arc<AtomicU64>,
}

impl<B: Backend> DescriptorPool<B> {
    /// Creates an empty pool; native pools hold `capacity` sets each.
    pub fn new(device: Arc<B>, capacity: u32) -> Self {
        Self {
            device,
            capacity: capacity.max(1),
            pools: Vec::new(),
            current: 0,
            used_in_current: 0,
            allocated: 0,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Allocates an unbound set for `layout`.
    ///
    /// ## Errors
    /// [`GpuError::Native`](crate::GpuError::Native) if a native pool cannot be
    /// created or the allocation fails.

    pub fn allocate(&mut self, layout: &Handle<ShaderLayout<B>>) -> GpuResult<DescriptorSet<B>> {
        if self.used_in_current == self.capacity {
            self.current += 1;
            self.used_in_current = 0;
        }

        if self.current == self.pools.len() {
            let pool = self.device.create_descriptor_pool(self.capacity)?;
            tracing::debug!(
                native_pools = self.pools.len() + 1,
                capacity = self.capacity,
                "created native descriptor pool"
            );
            self.pools.push(pool);
        }

        let handle = self
            .device
            .allocate_descriptor_set(&mut self.pools[self.current], layout.handle())?;
        self.used_in_current += 1;
        self.allocated += 1;

        Ok(DescriptorSet {
            layout: layout.clone(),
            handle,
            bindings: vec![None; layout.signature().len()],
            epoch: Epoch {
                current: Arc::clone(&self.epoch),
                allocated: self.epoch.load(Ordering::Acquire),
            },
        })
    }

    /// Sets allocated since the last purge.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Returns `true` if no set has been allocated since the last purge.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocated == 0
    }

    /// Native pools created so far.
    #[inline]
    pub fn native_pools(&self) -> usize {
        self.pools.len()
    }

    /// Sets per native pool.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current epoch; advanced by every purge.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidates every set allocated from this pool and resets the native
    /// pools for reuse.
    ///
    /// ## Errors
    /// The first native reset failure. Every used native pool is still
    /// visited; pools that failed to reset are dropped rather than reused, and
    /// the counters and epoch advance either way.
    pub fn purge(&mut self) -> GpuResult<()> {
        let used = if self.allocated == 0 { 0 } else { self.current + 1 };
        let mut first_error = None;
        let mut kept = Vec::with_capacity(self.pools.len());

        for (index, mut pool) in std::mem::take(&mut self.pools).into_iter().enumerate() {
            if index >= used {
                kept.push(pool);
                continue;
            }
            match self.device.reset_descriptor_pool(&mut pool) {
                Ok(()) => kept.push(pool),
                Err(e) => {
                    tracing::warn!(native_pool = index, error = %e, "dropping descriptor pool that failed to reset");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.pools = kept;

        if self.allocated > 0 {
            tracing::debug!(sets = self.allocated, "purged descriptor pool");
        }
        self.current = 0;
        self.used_in_current = 0;
        self.allocated = 0;
        self.epoch.fetch_add(1, Ordering::AcqRel);

        first_error.map_or(Ok(()), Err)
    }
}
