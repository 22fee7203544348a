//! # Execution Context
//!
//! [`Context`] is the top-level owner of GPU compute state:
//!
//! * the device (borrowed from the runtime's adapter) and a leased queue,
//! * the process-wide [`ShaderCache`] and [`PipelineCache`],
//! * the per-thread resource, descriptor and command pools.
//!
//! ## Synchronization points
//!
//! * [`Context::flush`]: submit the caller's open stream, wait for the queue
//!   to go idle, then purge **every** thread's pools.
//! * [`Context::wait`]: make one device-resident value host-visible and block
//!   until it is. A no-op for host-resident values.
//!
//! Both block the calling thread; waiting is the normal cost of the host
//! catching up with the device, not an error.
//!
//! ## Flush discipline
//!
//! `flush()` purges pools other threads may be using. Call it only after those
//! threads have finished recording (a quiescence point). Descriptor sets that
//! were prepared but not yet recorded when the flush happened are detected
//! through the pool epoch and rejected by the dispatch epilogue; unsubmitted
//! commands of other threads are discarded and logged.
//!
//! ## Teardown
//!
//! Dropping the context returns the queue to the adapter and drops the pools
//! of every thread, including threads that are still running. It does **not**
//! flush: unsubmitted commands are discarded and nothing waits on the queue.
//!
//! ## Reentrancy
//!
//! [`Context::submit`], [`Context::dispatch`], [`Context::flush`] and
//! [`Context::wait`] lock the calling thread's command pool. The pool mutex is
//! not reentrant: drop any guard from [`Context::command`] before calling them.

use std::borrow::Cow;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::engine::backend::{Adapter, Backend, DeviceData, DeviceType, HostFuture, Runtime};
use crate::engine::command::CommandPool;
use crate::engine::descriptor::{DescriptorPool, DescriptorSet, DEFAULT_DESCRIPTOR_POOL_CAPACITY};
use crate::engine::dispatch::{dispatch_epilogue, dispatch_prologue};
use crate::engine::error::{GpuResult, InitError};
use crate::engine::pipeline::PipelineCache;
use crate::engine::resource::ResourcePool;
use crate::engine::shader::ShaderCache;
use crate::engine::thread::{PoolGuard, ThreadRegistry};
use crate::engine::types::{LayoutSignature, ShaderDescriptor, WorkGroup};


/// Context construction parameters.
///
/// ### Example
/// ```
/// use compute_context::ContextConfig;
///
/// let config = ContextConfig::new()
///     .adapter_index(0)
///     .descriptor_pool_capacity(256)
///     .label("inference");
/// assert_eq!(config.adapter_index, Some(0));
/// ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Adapter to use; `None` picks the runtime's default adapter.
    pub adapter_index: Option<usize>,
    /// Descriptor sets per native descriptor pool.
    pub descriptor_pool_capacity: u32,
    /// Name used in log records.
    pub label: Cow<'static, str>,
}

impl ContextConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self {
            adapter_index: None,
            descriptor_pool_capacity: DEFAULT_DESCRIPTOR_POOL_CAPACITY,
            label: Cow::Borrowed("compute"),
        }
    }

    /// Selects an adapter explicitly.
    pub fn adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = Some(index);
        self
    }

    /// Sets the number of descriptor sets per native descriptor pool.
    pub fn descriptor_pool_capacity(mut self, capacity: u32) -> Self {
        self.descriptor_pool_capacity = capacity;
        self
    }

    /// Sets the log label.
    pub fn label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A queue leased from an adapter, returned on drop.
struct QueueLease<B: Backend> {
    adapter: Arc<dyn Adapter<B>>,
    queue: ManuallyDrop<B::Queue>,
}

impl<B: Backend> Drop for QueueLease<B> {
    fn drop(&mut self) {
        // SAFETY: `queue` is never touched again after this point.
        let queue = unsafe { ManuallyDrop::take(&mut self.queue) };
        self.adapter.return_queue(queue);
    }
}

/// GPU compute execution context.

pub struct Context<B: Backend> {
    label: Cow<'static, str>,
    runtime: Arc<dyn Runtime<B>>,
    adapter_index: usize,
    device: Arc<B>,
    shader: ShaderCache<B>,
    pipeline: PipelineCache<B>,
    threads: ThreadRegistry<B>,
    queue: QueueLease<B>,
}

impl<B: Backend> Context<B> {
    /// Creates a context on adapter `adapter_index` of `runtime`.
    ///
    /// ## Errors
    /// [`GpuError::Init`](crate::GpuError::Init) if the adapter does not exist,
    /// its device cannot be created or its queue cannot be leased.

    pub fn new(runtime: Arc<dyn Runtime<B>>, adapter_index: usize) -> GpuResult<Self> {
        Self::with_config(runtime, ContextConfig::new().adapter_index(adapter_index))
    }

    /// Creates a context as described by `config`.
    pub fn with_config(runtime: Arc<dyn Runtime<B>>, config: ContextConfig) -> GpuResult<Self> {
        let adapter_index = config
            .adapter_index
            .unwrap_or_else(|| runtime.default_adapter_index());

        let adapter = runtime.adapter(adapter_index)?;
        let device = adapter.device()?;
        let queue = adapter.request_queue().map_err(|e| {
            tracing::warn!(adapter = adapter_index, error = %e, "queue lease refused");
            InitError::QueueUnavailable { adapter: adapter_index }
        })?;

        tracing::info!(
            context = %config.label,
            adapter = adapter_index,
            descriptor_pool_capacity = config.descriptor_pool_capacity,
            "created compute context"
        );

        Ok(Self {
            label: config.label,
            runtime,
            adapter_index,
            shader: ShaderCache::new(Arc::clone(&device)),
            pipeline: PipelineCache::new(Arc::clone(&device)),
            threads: ThreadRegistry::new(Arc::clone(&device), config.descriptor_pool_capacity),
            device,
            queue: QueueLease {
                adapter,
                queue: ManuallyDrop::new(queue),
            },
        })
    }

    /// Native instance of the runtime.
    #[inline]
    pub fn instance(&self) -> &B::Instance {
        self.runtime.instance()
    }

    /// Adapter this context runs on.
    #[inline]
    pub fn adapter_index(&self) -> usize {
        self.adapter_index
    }

    /// Logical device.
    #[inline]
    pub fn device(&self) -> &Arc<B> {
        &self.device
    }

    /// Leased compute queue.
    #[inline]
    pub fn queue(&self) -> &B::Queue {
        &self.queue.queue
    }

    /// Shader-layer caches.
    #[inline]
    pub fn shader(&self) -> &ShaderCache<B> {
        &self.shader
    }

    /// Pipeline-layer caches.
    #[inline]
    pub fn pipeline(&self) -> &PipelineCache<B> {
        &self.pipeline
    }

    /// Per-thread pool registry.
    #[inline]
    pub fn threads(&self) -> &ThreadRegistry<B> {
        &self.threads
    }

    /// The calling thread's resource pool.
    pub fn resource(&self) -> PoolGuard<ResourcePool<B>> {
        self.threads.current().resource()
    }

    /// The calling thread's descriptor pool.
    pub fn descriptor(&self) -> PoolGuard<DescriptorPool<B>> {
        self.threads.current().descriptor()
    }

    /// The calling thread's command pool.
    pub fn command(&self) -> PoolGuard<CommandPool<B>> {
        self.threads.current().command()
    }

    /// Submits the calling thread's open command stream.
    ///
    /// Returns `false` if there was nothing to submit.
    ///
    /// Deadlocks if the calling thread holds its [`command`](Self::command) guard.
    pub fn submit(&self) -> GpuResult<bool> {
        self.command().submit(self.queue())
    }

    /// Records one dispatch on the calling thread's stream.
    ///
    /// Runs [`dispatch_prologue`], lets `bind` fill the descriptor set, then
    /// runs [`dispatch_epilogue`] with `global_work_group`. `bind` runs with
    /// the command pool locked and must not call back into it.
    ///
    /// Deadlocks if the calling thread holds its [`command`](Self::command) guard.

    pub fn dispatch<F>(
        &self,
        layout_signature: &LayoutSignature,
        shader_descriptor: &ShaderDescriptor,
        local_work_group: WorkGroup,
        global_work_group: WorkGroup,
        bind: F,
    ) -> GpuResult<()>
    where
        F: FnOnce(&mut DescriptorSet<B>) -> GpuResult<()>,
    {
        let mut command = self.command();
        let stream = command.stream();

        let mut prepared = dispatch_prologue(
            self,
            stream,
            layout_signature,
            shader_descriptor,
            local_work_group,
        )?;
        bind(&mut *prepared)?;
        dispatch_epilogue(stream, prepared, global_work_group)
    }

    /// Waits for the queue to go idle, then purges every thread's pools.
    ///
    /// ## Semantics
    /// 1. The calling thread's open stream is submitted.
    /// 2. The call blocks until all submitted work has completed.
    /// 3. Resource, descriptor and command pools of all live threads are purged.
    ///
    /// Descriptor sets and scratch buffers obtained before the flush must not
    /// be used afterwards. Deadlocks if the calling thread holds its
    /// [`command`](Self::command) guard.
    ///
    /// ## Errors
    /// Submission, idle-wait or descriptor-pool reset failures. A failing
    /// thread does not stop the purge; the first error is returned once every
    /// thread has been purged.

    pub fn flush(&self) -> GpuResult<()> {
        let _span = tracing::debug_span!("flush", context = %self.label).entered();

        self.submit()?;
        self.device.wait_idle(self.queue())?;

        let threads = self.threads.live();
        let mut discarded = 0;
        let mut first_error = None;
        for pools in &threads {
            match pools.purge() {
                Ok(n) => discarded += n,
                Err(e) => {
                    tracing::error!(thread = ?pools.thread(), error = %e, "pool purge failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::debug!(threads = threads.len(), discarded, "flushed context");
        first_error.map_or(Ok(()), Err)
    }

    /// Blocks until `data` is visible to the host.
    ///
    /// ## Semantics
    /// * Host-resident data: returns immediately, touching no pool or queue.
    /// * Device-resident data: asks `data` for a host future on the calling
    ///   thread's current stream, submits that stream, then waits on the
    ///   future.
    ///
    /// Deadlocks if the calling thread holds its [`command`](Self::command) guard.

    pub fn wait<D: DeviceData<B>>(&self, data: &D) -> GpuResult<()> {
        if data.device_type() != DeviceType::Gpu {
            return Ok(());
        }

        let future = {
            let mut command = self.command();
            let future = data.host(command.stream())?;
            command.submit(self.queue())?;
            future
        };

        future.wait()
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        let threads = self.threads.clear();
        tracing::info!(
            context = %self.label,
            adapter = self.adapter_index,
            threads,
            "released compute context"
        );
    }
}

impl<B: Backend> std::fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("label", &self.label)
            .field("adapter_index", &self.adapter_index)
            .field("threads", &self.threads.len())
            .finish()
    }
}
