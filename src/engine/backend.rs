//! # Native Backend Seam and Collaborator Contracts
//!
//! The execution context is written against the [`Backend`] trait rather than
//! a concrete GPU API. A backend supplies the native object types (layouts,
//! shader modules, pipelines, buffers, descriptor pools) and the handful of
//! native calls the context needs to create, submit and wait.
//!
//! The remaining traits describe the **external collaborators** of the context:
//!
//! * [`Runtime`] / [`Adapter`]: hand out the device and lease the queue,
//! * [`DeviceData`] / [`HostFuture`]: data handles that may live on the device
//!   and can be made host-visible.
//!
//! The `gpu` feature provides a wgpu implementation of all of them except
//! [`DeviceData`]; tests substitute counting mocks.
//!
//! ## Threading
//! Shared native objects (everything a cache returns) must be `Send + Sync`.
//! Native descriptor pools only need `Send`: they live inside one thread's
//! descriptor pool and are only touched under its lock.

use std::sync::Arc;

use crate::engine::command::{Command, CommandStream};
use crate::engine::error::GpuResult;
use crate::engine::resource::BufferDescriptor;
use crate::engine::types::{LayoutSignature, ShaderDescriptor, WorkGroup};


/// Native GPU API used by a [`Context`](crate::Context).
///
/// ## Contract
/// * Creation calls are expensive and are only invoked by the caches (once per
///   distinct signature) or by the per-thread pools.
/// * Any error returned is final for the operation; the caller never retries.
/// * `submit` receives the commands of one stream in recording order and must
///   preserve that order on the device.

pub trait Backend: Send + Sync + Sized + 'static {
    /// Instance handle owned by the runtime.
    type Instance: Send + Sync;
    /// Compute-capable queue handle.
    type Queue: Send + Sync;
    /// Descriptor-set layout object.
    type DescriptorSetLayout: Send + Sync;
    /// Compiled shader module.
    type ShaderModule: Send + Sync;
    /// Pipeline layout object.
    type PipelineLayout: Send + Sync;
    /// Executable compute pipeline.
    type Pipeline: Send + Sync;
    /// Device buffer.
    type Buffer: Send + Sync;
    /// Image view bindable to an image slot.
    type ImageView: Send + Sync;
    /// Native descriptor pool backing a thread's descriptor allocations.
    type DescriptorPool: Send;
    /// Native descriptor-set object allocated from a descriptor pool.
    type DescriptorSet: Send + Sync;

    /// Creates the descriptor-set layout for `signature`.
    fn create_descriptor_set_layout(
        &self,
        signature: &LayoutSignature,
    ) -> GpuResult<Self::DescriptorSetLayout>;

    /// Compiles `descriptor` into a shader module.
    fn create_shader_module(&self, descriptor: &ShaderDescriptor) -> GpuResult<Self::ShaderModule>;

    /// Creates a pipeline layout with `set_layout` as its only descriptor set.
    fn create_pipeline_layout(
        &self,
        set_layout: &Self::DescriptorSetLayout,
    ) -> GpuResult<Self::PipelineLayout>;

    /// Links a compute pipeline with the given local work-group size.
    fn create_compute_pipeline(
        &self,
        layout: &Self::PipelineLayout,
        shader: &Self::ShaderModule,
        entry_point: &str,
        local_work_group: WorkGroup,
    ) -> GpuResult<Self::Pipeline>;

    /// Creates a buffer, optionally initialized with `contents`.
    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        contents: Option<&[u8]>,
    ) -> GpuResult<Self::Buffer>;

    /// Creates a native descriptor pool able to hold `capacity` sets.
    fn create_descriptor_pool(&self, capacity: u32) -> GpuResult<Self::DescriptorPool>;

    /// Allocates one descriptor set for `layout` from `pool`.
    fn allocate_descriptor_set(
        &self,
        pool: &mut Self::DescriptorPool,
        layout: &Self::DescriptorSetLayout,
    ) -> GpuResult<Self::DescriptorSet>;

    /// Frees every set allocated from `pool`, keeping the pool for reuse.
    fn reset_descriptor_pool(&self, pool: &mut Self::DescriptorPool) -> GpuResult<()>;

    /// Encodes `commands` in order and submits them to `queue`.
    fn submit(&self, queue: &Self::Queue, commands: &[Command<Self>]) -> GpuResult<()>;

    /// Blocks until every submission on `queue` has completed.
    fn wait_idle(&self, queue: &Self::Queue) -> GpuResult<()>;
}

/// Adapter and instance provider the context is built from.
///
/// The runtime owns device and queue handles; a context only borrows them.

pub trait Runtime<B: Backend>: Send + Sync {
    /// Native instance the adapters belong to.
    fn instance(&self) -> &B::Instance;

    /// Index of the adapter a context should use when none is configured.
    fn default_adapter_index(&self) -> usize;

    /// Adapter with the given index.
    fn adapter(&self, index: usize) -> GpuResult<Arc<dyn Adapter<B>>>;
}

/// One selectable physical GPU.
///
/// `request_queue` / `return_queue` form a lease: a context returns exactly the
/// queue it was given, exactly once, when it is dropped.

pub trait Adapter<B: Backend>: Send + Sync {
    /// Logical device of this adapter.
    fn device(&self) -> GpuResult<Arc<B>>;

    /// Leases the adapter's compute queue.
    fn request_queue(&self) -> GpuResult<B::Queue>;

    /// Ends a lease started by [`request_queue`](Adapter::request_queue).
    fn return_queue(&self, queue: B::Queue);
}

/// Where a data handle's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Host memory; always observable without synchronization.
    Cpu,
    /// Device memory owned by this backend.
    Gpu,
}

/// A data handle (tensor, array) that [`Context::wait`](crate::Context::wait)
/// can synchronize with.
pub trait DeviceData<B: Backend> {
    /// Future resolving once a read-only host view is available.
    type Future: HostFuture;

    /// Storage location of the data.
    fn device_type(&self) -> DeviceType;

    /// Records whatever is needed to make the data host-visible into `stream`
    /// and returns a future for the read-only host view.
    fn host(&self, stream: &mut CommandStream<B>) -> GpuResult<Self::Future>;
}

/// Blocking future returned by [`DeviceData::host`].
pub trait HostFuture {
    /// Blocks the calling thread until the host view is ready.
    ///
    /// Resolves immediately if the data is already in sync.
    fn wait(&self) -> GpuResult<()>;
}
