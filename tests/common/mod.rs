//! Counting mock backend shared by the integration tests and benches.
//!
//! `MockDevice` records every native call in atomic counters so tests can
//! assert how often the caches and pools reached the "driver". Submissions
//! complete lazily: `submit` only enqueues, `wait_idle` completes everything.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use compute_context::{
    Adapter,
    Backend,
    BindingType,
    BufferDescriptor,
    Command,
    CommandStream,
    Context,
    ContextConfig,
    DeviceData,
    DeviceType,
    GpuError,
    GpuResult,
    Handle,
    HostFuture,
    InitError,
    LayoutSignature,
    Runtime,
    ShaderDescriptor,
    WorkGroup,
};

// ─────────────────────────────────────────────────────────────────────────────
// Native objects
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockInstance {
    pub name: &'static str,
}

#[derive(Debug)]
pub struct MockQueue {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockLayout {
    pub id: u64,
    pub signature: LayoutSignature,
}

#[derive(Debug)]
pub struct MockModule {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockPipeline {
    pub id: u64,
    pub local: WorkGroup,
}

#[derive(Debug)]
pub struct MockBuffer {
    pub id: u64,
    pub size: u64,
    pub contents: Vec<u8>,
}

#[derive(Debug)]
pub struct MockImage {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockPool {
    pub id: u64,
    pub capacity: u32,
    pub used: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSet {
    pub pool: u64,
    pub index: u32,
}

/// What `submit` saw, per command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    BindPipeline { pipeline: u64, local: WorkGroup },
    BindSet { set: MockSet, bound: usize, slots: usize },
    Dispatch(WorkGroup),
    Copy { source: u64, destination: u64, size: u64 },
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Counters {
    pub set_layouts: AtomicUsize,
    pub shader_modules: AtomicUsize,
    pub pipeline_layouts: AtomicUsize,
    pub pipelines: AtomicUsize,
    pub buffers: AtomicUsize,
    pub descriptor_pools: AtomicUsize,
    pub descriptor_sets: AtomicUsize,
    pub pool_resets: AtomicUsize,
    pub submissions: AtomicUsize,
    pub idle_waits: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MockDevice {
    pub counters: Counters,
    pub fail_pipelines: AtomicBool,
    pub fail_shaders: AtomicBool,
    pub fail_submit: AtomicBool,
    /// Fail the n-th descriptor pool reset (1-based, 0 never).
    pub fail_reset_at: AtomicUsize,
    /// Skip keeping per-submission recordings (long benchmark runs).
    pub discard_recordings: AtomicBool,
    /// Milliseconds every cache construction sleeps, to widen race windows.
    pub construction_delay_ms: AtomicU64,
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub recorded: Mutex<Vec<Vec<Recorded>>>,
    next_id: AtomicU64,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn pipelines(&self) -> usize {
        Self::count(&self.counters.pipelines)
    }

    pub fn submissions(&self) -> usize {
        Self::count(&self.counters.submissions)
    }

    pub fn idle_waits(&self) -> usize {
        Self::count(&self.counters.idle_waits)
    }

    pub fn pending(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst) - self.completed.load(Ordering::SeqCst)
    }

    /// Commands of every submission so far, in order.
    pub fn recorded(&self) -> Vec<Vec<Recorded>> {
        self.recorded.lock().unwrap().clone()
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn construct(&self, counter: &AtomicUsize) -> u64 {
        let delay = self.construction_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        counter.fetch_add(1, Ordering::SeqCst);
        self.id()
    }
}

impl Backend for MockDevice {
    type Instance = MockInstance;
    type Queue = MockQueue;
    type DescriptorSetLayout = MockLayout;
    type ShaderModule = MockModule;
    type PipelineLayout = u64;
    type Pipeline = MockPipeline;
    type Buffer = MockBuffer;
    type ImageView = MockImage;
    type DescriptorPool = MockPool;
    type DescriptorSet = MockSet;

    fn create_descriptor_set_layout(&self, signature: &LayoutSignature) -> GpuResult<MockLayout> {
        Ok(MockLayout {
            id: self.construct(&self.counters.set_layouts),
            signature: signature.clone(),
        })
    }

    fn create_shader_module(&self, _descriptor: &ShaderDescriptor) -> GpuResult<MockModule> {
        if self.fail_shaders.load(Ordering::SeqCst) {
            return Err(GpuError::native("create_shader_module", "mock compile error"));
        }
        Ok(MockModule {
            id: self.construct(&self.counters.shader_modules),
        })
    }

    fn create_pipeline_layout(&self, _set_layout: &MockLayout) -> GpuResult<u64> {
        Ok(self.construct(&self.counters.pipeline_layouts))
    }

    fn create_compute_pipeline(
        &self,
        _layout: &u64,
        _shader: &MockModule,
        _entry_point: &str,
        local_work_group: WorkGroup,
    ) -> GpuResult<MockPipeline> {
        if self.fail_pipelines.load(Ordering::SeqCst) {
            return Err(GpuError::native("create_compute_pipeline", "mock link error"));
        }
        Ok(MockPipeline {
            id: self.construct(&self.counters.pipelines),
            local: local_work_group,
        })
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        contents: Option<&[u8]>,
    ) -> GpuResult<MockBuffer> {
        self.counters.buffers.fetch_add(1, Ordering::SeqCst);
        Ok(MockBuffer {
            id: self.id(),
            size: descriptor.size,
            contents: contents.map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    fn create_descriptor_pool(&self, capacity: u32) -> GpuResult<MockPool> {
        self.counters.descriptor_pools.fetch_add(1, Ordering::SeqCst);
        Ok(MockPool {
            id: self.id(),
            capacity,
            used: 0,
        })
    }

    fn allocate_descriptor_set(&self, pool: &mut MockPool, _layout: &MockLayout) -> GpuResult<MockSet> {
        if pool.used == pool.capacity {
            return Err(GpuError::native("allocate_descriptor_set", "mock pool exhausted"));
        }
        self.counters.descriptor_sets.fetch_add(1, Ordering::SeqCst);
        pool.used += 1;
        Ok(MockSet {
            pool: pool.id,
            index: pool.used - 1,
        })
    }

    fn reset_descriptor_pool(&self, pool: &mut MockPool) -> GpuResult<()> {
        let n = self.counters.pool_resets.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_reset_at.load(Ordering::SeqCst) {
            return Err(GpuError::native("reset_descriptor_pool", "mock reset failure"));
        }
        pool.used = 0;
        Ok(())
    }

    fn submit(&self, _queue: &MockQueue, commands: &[Command<Self>]) -> GpuResult<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(GpuError::native("submit", "mock device lost"));
        }

        let recorded = commands
            .iter()
            .map(|command| match command {
                Command::BindPipeline(pipeline) => Recorded::BindPipeline {
                    pipeline: pipeline.handle().id,
                    local: pipeline.handle().local,
                },
                Command::BindDescriptorSet(set) => Recorded::BindSet {
                    set: *set.handle(),
                    bound: set.bindings().iter().filter(|b| b.is_some()).count(),
                    slots: set.bindings().len(),
                },
                Command::Dispatch(groups) => Recorded::Dispatch(*groups),
                Command::CopyBuffer { source, destination, size, .. } => Recorded::Copy {
                    source: source.id,
                    destination: destination.id,
                    size: *size,
                },
            })
            .collect();

        if !self.discard_recordings.load(Ordering::SeqCst) {
            self.recorded.lock().unwrap().push(recorded);
        }
        self.counters.submissions.fetch_add(1, Ordering::SeqCst);
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_idle(&self, _queue: &MockQueue) -> GpuResult<()> {
        self.counters.idle_waits.fetch_add(1, Ordering::SeqCst);
        self.completed
            .store(self.submitted.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime and adapters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockAdapter {
    pub index: usize,
    /// `None` makes device creation fail.
    pub device: Option<Arc<MockDevice>>,
    pub leased: AtomicBool,
    pub leases: AtomicUsize,
    pub returns: AtomicUsize,
    pub returned_ids: Mutex<Vec<u64>>,
    queue_id: u64,
}

impl MockAdapter {
    pub fn new(index: usize, device: Option<Arc<MockDevice>>) -> Arc<Self> {
        Arc::new(Self {
            index,
            device,
            leased: AtomicBool::new(false),
            leases: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
            returned_ids: Mutex::new(Vec::new()),
            queue_id: 100 + index as u64,
        })
    }

    pub fn queue_id(&self) -> u64 {
        self.queue_id
    }
}

impl Adapter<MockDevice> for MockAdapter {
    fn device(&self) -> GpuResult<Arc<MockDevice>> {
        self.device.clone().ok_or_else(|| {
            InitError::DeviceCreationFailed {
                adapter: self.index,
                message: "mock device unavailable".into(),
            }
            .into()
        })
    }

    fn request_queue(&self) -> GpuResult<MockQueue> {
        if self.leased.swap(true, Ordering::SeqCst) {
            return Err(InitError::QueueUnavailable { adapter: self.index }.into());
        }
        self.leases.fetch_add(1, Ordering::SeqCst);
        Ok(MockQueue { id: self.queue_id })
    }

    fn return_queue(&self, queue: MockQueue) {
        self.returned_ids.lock().unwrap().push(queue.id);
        self.returns.fetch_add(1, Ordering::SeqCst);
        self.leased.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockRuntime {
    pub instance: MockInstance,
    pub adapters: Vec<Arc<MockAdapter>>,
}

impl MockRuntime {
    /// One working adapter around `device`.
    pub fn with_device(device: Arc<MockDevice>) -> Arc<Self> {
        Arc::new(Self {
            instance: MockInstance { name: "mock" },
            adapters: vec![MockAdapter::new(0, Some(device))],
        })
    }

    /// One adapter whose device cannot be created.
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            instance: MockInstance { name: "broken" },
            adapters: vec![MockAdapter::new(0, None)],
        })
    }

    pub fn adapter0(&self) -> &Arc<MockAdapter> {
        &self.adapters[0]
    }
}

impl Runtime<MockDevice> for MockRuntime {
    fn instance(&self) -> &MockInstance {
        &self.instance
    }

    fn default_adapter_index(&self) -> usize {
        0
    }

    fn adapter(&self, index: usize) -> GpuResult<Arc<dyn Adapter<MockDevice>>> {
        match self.adapters.get(index) {
            Some(adapter) => Ok(Arc::clone(adapter) as Arc<dyn Adapter<MockDevice>>),
            None => Err(InitError::AdapterNotFound {
                index,
                available: self.adapters.len(),
            }
            .into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Data handle
// ─────────────────────────────────────────────────────────────────────────────

/// Tensor-like data handle; device-resident tensors stage through a copy.
pub struct MockTensor {
    pub device_type: DeviceType,
    pub buffer: Option<Handle<MockBuffer>>,
    pub staging: Option<Handle<MockBuffer>>,
    /// Submission count after which the data is final.
    pub ready_after: AtomicU64,
    pub host_calls: AtomicUsize,
    pub blocked: Arc<AtomicUsize>,
    device: Option<Arc<MockDevice>>,
}

impl MockTensor {
    pub fn cpu() -> Self {
        Self {
            device_type: DeviceType::Cpu,
            buffer: None,
            staging: None,
            ready_after: AtomicU64::new(0),
            host_calls: AtomicUsize::new(0),
            blocked: Arc::new(AtomicUsize::new(0)),
            device: None,
        }
    }

    pub fn gpu(context: &Context<MockDevice>, bytes: u64) -> Self {
        let mut resource = context.resource();
        let usage = compute_context::BufferUsage::STORAGE | compute_context::BufferUsage::COPY_SRC;
        let buffer = resource
            .allocate(&BufferDescriptor::new(bytes, usage).label("tensor"))
            .unwrap();
        let staging = resource
            .allocate(&BufferDescriptor::new(
                bytes,
                compute_context::BufferUsage::COPY_DST | compute_context::BufferUsage::MAP_READ,
            ))
            .unwrap();

        Self {
            device_type: DeviceType::Gpu,
            buffer: Some(buffer),
            staging: Some(staging),
            ready_after: AtomicU64::new(0),
            host_calls: AtomicUsize::new(0),
            blocked: Arc::new(AtomicUsize::new(0)),
            device: Some(Arc::clone(context.device())),
        }
    }

    pub fn host_calls(&self) -> usize {
        self.host_calls.load(Ordering::SeqCst)
    }

    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }
}

pub struct MockFuture {
    device: Arc<MockDevice>,
    target: u64,
    blocked: Arc<AtomicUsize>,
}

impl HostFuture for MockFuture {
    fn wait(&self) -> GpuResult<()> {
        if self.device.completed.load(Ordering::SeqCst) < self.target {
            // Stand-in for blocking on a fence.
            self.blocked.fetch_add(1, Ordering::SeqCst);
            self.device.completed.fetch_max(self.target, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl DeviceData<MockDevice> for MockTensor {
    type Future = MockFuture;

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn host(&self, stream: &mut CommandStream<MockDevice>) -> GpuResult<MockFuture> {
        self.host_calls.fetch_add(1, Ordering::SeqCst);

        let (Some(device), Some(buffer), Some(staging)) = (&self.device, &self.buffer, &self.staging)
        else {
            return Err(GpuError::native("host", "tensor has no device storage"));
        };
        stream.copy_buffer(buffer, 0, staging, 0, buffer.size);

        Ok(MockFuture {
            device: Arc::clone(device),
            target: self.ready_after.load(Ordering::SeqCst),
            blocked: Arc::clone(&self.blocked),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

pub struct Fixture {
    pub device: Arc<MockDevice>,
    pub runtime: Arc<MockRuntime>,
    pub context: Context<MockDevice>,
}

pub fn fixture() -> Fixture {
    fixture_with(ContextConfig::new().label("test"))
}

pub fn fixture_with(config: ContextConfig) -> Fixture {
    let device = MockDevice::new();
    let runtime = MockRuntime::with_device(Arc::clone(&device));
    let context = Context::with_config(Arc::clone(&runtime) as Arc<dyn Runtime<MockDevice>>, config).unwrap();
    Fixture { device, runtime, context }
}

/// `in: storage(read) / out: storage / params: uniform`
pub fn unary_signature() -> LayoutSignature {
    LayoutSignature::new([
        BindingType::ReadOnlyStorageBuffer,
        BindingType::StorageBuffer,
        BindingType::UniformBuffer,
    ])
}

pub fn binary_signature() -> LayoutSignature {
    LayoutSignature::new([
        BindingType::ReadOnlyStorageBuffer,
        BindingType::ReadOnlyStorageBuffer,
        BindingType::StorageBuffer,
    ])
}

pub fn kernel(entry_point: &'static str) -> ShaderDescriptor {
    ShaderDescriptor::wgsl(
        "@compute @workgroup_size(64) fn main() {}",
        entry_point,
    )
}

pub fn storage_buffer(context: &Context<MockDevice>, bytes: u64) -> Handle<MockBuffer> {
    context
        .resource()
        .allocate(&BufferDescriptor::new(bytes, compute_context::BufferUsage::STORAGE))
        .unwrap()
}
