//! # Per-Thread Resource Pool
//!
//! Scratch device memory used while recording commands: parameter blocks,
//! staging buffers, intermediates that only live until the next flush.
//!
//! ## Semantics
//! * One pool per thread (see [`crate::engine::thread`]); allocation never
//!   waits on another thread's pool.
//! * Every allocation is retained by the pool so the buffer outlives any
//!   command stream referencing it.
//! * [`ResourcePool::purge`] releases all of them at once. Callers must not
//!   keep using a buffer from the pool after the owning context was flushed.

use std::borrow::Cow;
use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::Pod;

use crate::engine::backend::Backend;
use crate::engine::error::GpuResult;
use crate::engine::types::Handle;


bitflags! {
    /// How a buffer will be used.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage : u32 {
        /// Bindable as a storage buffer.
        const STORAGE   = 0x01;
        /// Bindable as a uniform buffer.
        const UNIFORM   = 0x02;
        /// Source of a copy.
        const COPY_SRC  = 0x04;
        /// Destination of a copy.
        const COPY_DST  = 0x08;
        /// Mappable for host reads.
        const MAP_READ  = 0x10;
        /// Mappable for host writes.
        const MAP_WRITE = 0x20;
    }
}

/// Parameters of a buffer allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Debug label.
    pub label: Option<Cow<'static, str>>,
    /// Size in bytes.
    pub size: u64,
    /// Intended usage.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Unlabelled buffer of `size` bytes.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self { label: None, size, usage }
    }

    /// Sets the debug label.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Thread-owned allocator of scratch buffers.

pub struct ResourcePool<B: Backend> {
    device: Arc<B>,
    buffers: Vec<Handle<B::Buffer>>,
    purges: u64,
}

impl<B: Backend> ResourcePool<B> {
    /// Creates an empty pool allocating on `device`.
    pub fn new(device: Arc<B>) -> Self {
        Self {
            device,
            buffers: Vec::new(),
            purges: 0,
        }
    }

    /// Allocates an uninitialized buffer.
    ///
    /// ## Errors
    /// [`GpuError::Native`](crate::GpuError::Native) if the backend cannot
    /// create the buffer.

    pub fn allocate(&mut self, descriptor: &BufferDescriptor) -> GpuResult<Handle<B::Buffer>> {
        let buffer = Handle::new(self.device.create_buffer(descriptor, None)?);
        self.buffers.push(buffer.clone());
        Ok(buffer)
    }

    /// Allocates a buffer initialized with `data`.
    ///
    /// The buffer is exactly `size_of_val(data)` bytes.

    pub fn allocate_init<T: Pod>(
        &mut self,
        label: Option<Cow<'static, str>>,
        usage: BufferUsage,
        data: &[T],
    ) -> GpuResult<Handle<B::Buffer>> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let descriptor = BufferDescriptor {
            label,
            size: bytes.len() as u64,
            usage,
        };
        let buffer = Handle::new(self.device.create_buffer(&descriptor, Some(bytes))?);
        self.buffers.push(buffer.clone());
        Ok(buffer)
    }

    /// Number of live allocations.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns `true` if nothing is allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Number of purges performed so far.
    #[inline]
    pub fn purges(&self) -> u64 {
        self.purges
    }

    /// Releases every buffer allocated from this pool.
    pub fn purge(&mut self) {
        if !self.buffers.is_empty() {
            tracing::debug!(buffers = self.buffers.len(), "purging resource pool");
        }
        self.buffers.clear();
        self.purges += 1;
    }
}
