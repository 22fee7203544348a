//! # wgpu Device Backend
//!
//! [`WgpuDevice`] implements [`Backend`] on top of a `wgpu::Device`.
//!
//! ## Mapping
//!
//! | Context object        | wgpu object                          |
//! |-----------------------|--------------------------------------|
//! | descriptor-set layout | `BindGroupLayout`                    |
//! | shader module         | `ShaderModule`                       |
//! | pipeline layout       | `PipelineLayout` (one bind group)    |
//! | pipeline              | `ComputePipeline`                    |
//! | descriptor set        | bind group built at submission       |
//! | command stream        | one `CommandEncoder` per submission  |
//!
//! wgpu bind groups are immutable and need their resources up front, so a
//! descriptor set only reserves a slot in its native pool while the caller
//! binds; the bind group is created when the stream is submitted.
//!
//! ## Local work-group size
//!
//! WGSL kernels receive the local size through pipeline-overridable
//! constants:
//!
//! ```wgsl
//! override local_size_x: u32 = 64;
//! override local_size_y: u32 = 1;
//! override local_size_z: u32 = 1;
//!
//! @compute @workgroup_size(local_size_x, local_size_y, local_size_z)
//! fn main(@builtin(global_invocation_id) id: vec3<u32>) { /* ... */ }
//! ```
//!
//! Modules are parsed with naga up front. A kernel that declares all three
//! overrides takes any local size; one that does not keeps the size written in
//! the shader, and pipelines requesting a different size are refused.
//!
//! ## Validation
//!
//! wgpu reports creation failures through error scopes rather than return
//! values. Every creation runs inside a validation scope that is popped before
//! returning, so a rejected object surfaces as [`GpuError::Native`] and never
//! reaches a cache.

use std::num::NonZeroU64;

use wgpu::naga;
use wgpu::util::DeviceExt;

use crate::engine::backend::Backend;
use crate::engine::command::Command;
use crate::engine::descriptor::{Binding, DescriptorSet};
use crate::engine::error::{BindingError, GpuError, GpuResult};
use crate::engine::resource::{BufferDescriptor, BufferUsage};
use crate::engine::types::{
    BindingType,
    ImageFormat,
    LayoutSignature,
    ShaderDescriptor,
    ShaderSource,
    WorkGroup,
};


const LOCAL_SIZE_CONSTANTS: [&str; 3] = ["local_size_x", "local_size_y", "local_size_z"];

/// A compiled shader module.
#[derive(Debug)]
pub struct WgpuShaderModule {
    module: wgpu::ShaderModule,
    overrides_local_size: bool,
    workgroup_sizes: Vec<(String, WorkGroup)>,
}

impl WgpuShaderModule {
    /// Native module.
    pub fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }

    /// Returns `true` if the kernel takes its local size from pipeline
    /// constants.
    pub fn overrides_local_size(&self) -> bool {
        self.overrides_local_size
    }

    /// Work-group size the shader declares for `entry_point`.
    ///
    /// `None` when the size depends on override expressions.
    pub fn declared_work_group(&self, entry_point: &str) -> Option<WorkGroup> {
        self.workgroup_sizes
            .iter()
            .find(|(name, _)| name == entry_point)
            .map(|(_, size)| *size)
            .filter(|size| !size.is_empty())
    }
}

fn parse_module(source: &ShaderSource) -> GpuResult<naga::Module> {
    match source {
        ShaderSource::Wgsl(text) => naga::front::wgsl::parse_str(text)
            .map_err(|e| GpuError::native("create_shader_module", e.emit_to_string(text))),
        ShaderSource::SpirV(words) => naga::front::spv::parse_u8_slice(
            bytemuck::cast_slice(words),
            &naga::front::spv::Options::default(),
        )
        .map_err(|e| GpuError::native("create_shader_module", e)),
    }
}

/// Native descriptor pool: bind groups are created at submission, so the pool
/// only tracks how many sets it has handed out.
#[derive(Debug, Default)]
pub struct WgpuDescriptorPool {
    capacity: u32,
    allocated: u32,
}

/// A `wgpu::Device` driven as a compute [`Backend`].

#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    info: wgpu::AdapterInfo,
}

impl WgpuDevice {
    pub(crate) fn new(device: wgpu::Device, info: wgpu::AdapterInfo) -> Self {
        Self { device, info }
    }

    /// Native device.
    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Adapter the device was created on.
    #[inline]
    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Runs `create` inside a validation error scope.
    fn validated<T>(&self, operation: &'static str, create: impl FnOnce() -> T) -> GpuResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let object = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => {
                tracing::error!(operation, %error, "wgpu rejected object creation");
                Err(GpuError::native(operation, error))
            }
            None => Ok(object),
        }
    }

    fn bind_group(&self, set: &DescriptorSet<Self>) -> GpuResult<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(set.bindings().len());

        for (slot, binding) in set.bindings().iter().enumerate() {
            let slot = slot as u32;
            let resource = match binding {
                None => return Err(BindingError::Unbound { slot }.into()),
                Some(Binding::Buffer { buffer, offset, size }) => {
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: *offset,
                        size: (*size).and_then(NonZeroU64::new),
                    })
                }
                Some(Binding::Image(view)) => wgpu::BindingResource::TextureView(view),
            };
            entries.push(wgpu::BindGroupEntry { binding: slot, resource });
        }

        self.validated("create_bind_group", || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("compute_context_bind_group"),
                layout: set.layout().handle(),
                entries: &entries,
            })
        })
    }
}

fn layout_entry(slot: u32, binding: BindingType) -> wgpu::BindGroupLayoutEntry {
    let ty = match binding {
        BindingType::StorageBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::ReadOnlyStorageBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::StorageImage(format) => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: texture_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        BindingType::SampledImage => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
    };

    wgpu::BindGroupLayoutEntry {
        binding: slot,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ImageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ImageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        ImageFormat::R32Float => wgpu::TextureFormat::R32Float,
        ImageFormat::R32Uint => wgpu::TextureFormat::R32Uint,
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        out |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        out |= wgpu::BufferUsages::MAP_READ;
    }
    if usage.contains(BufferUsage::MAP_WRITE) {
        out |= wgpu::BufferUsages::MAP_WRITE;
    }
    out
}

impl Backend for WgpuDevice {
    type Instance = wgpu::Instance;
    type Queue = wgpu::Queue;
    type DescriptorSetLayout = wgpu::BindGroupLayout;
    type ShaderModule = WgpuShaderModule;
    type PipelineLayout = wgpu::PipelineLayout;
    type Pipeline = wgpu::ComputePipeline;
    type Buffer = wgpu::Buffer;
    type ImageView = wgpu::TextureView;
    type DescriptorPool = WgpuDescriptorPool;
    type DescriptorSet = u32;

    fn create_descriptor_set_layout(
        &self,
        signature: &LayoutSignature,
    ) -> GpuResult<wgpu::BindGroupLayout> {
        let entries: Vec<_> = signature
            .bindings()
            .iter()
            .enumerate()
            .map(|(slot, &binding)| layout_entry(slot as u32, binding))
            .collect();

        self.validated("create_descriptor_set_layout", || {
            self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("compute_context_set_layout"),
                entries: &entries,
            })
        })
    }

    fn create_shader_module(&self, descriptor: &ShaderDescriptor) -> GpuResult<WgpuShaderModule> {
        let parsed = parse_module(&descriptor.source)?;
        let overrides_local_size = LOCAL_SIZE_CONSTANTS.iter().all(|constant| {
            parsed
                .overrides
                .iter()
                .any(|(_, o)| o.name.as_deref() == Some(*constant))
        });
        let workgroup_sizes = parsed
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| {
                let [x, y, z] = ep.workgroup_size;
                (ep.name.clone(), WorkGroup::new(x, y, z))
            })
            .collect();

        let source = match &descriptor.source {
            ShaderSource::Wgsl(text) => wgpu::ShaderSource::Wgsl(text.clone()),
            ShaderSource::SpirV(words) => wgpu::ShaderSource::SpirV(words.clone()),
        };
        let module = self.validated("create_shader_module", || {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(descriptor.entry_point.as_ref()),
                source,
            })
        })?;

        Ok(WgpuShaderModule {
            module,
            overrides_local_size,
            workgroup_sizes,
        })
    }

    fn create_pipeline_layout(
        &self,
        set_layout: &wgpu::BindGroupLayout,
    ) -> GpuResult<wgpu::PipelineLayout> {
        self.validated("create_pipeline_layout", || {
            self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("compute_context_pipeline_layout"),
                bind_group_layouts: &[set_layout],
                push_constant_ranges: &[],
            })
        })
    }

    fn create_compute_pipeline(
        &self,
        layout: &wgpu::PipelineLayout,
        shader: &WgpuShaderModule,
        entry_point: &str,
        local_work_group: WorkGroup,
    ) -> GpuResult<wgpu::ComputePipeline> {
        let constants = [
            (LOCAL_SIZE_CONSTANTS[0], local_work_group.x as f64),
            (LOCAL_SIZE_CONSTANTS[1], local_work_group.y as f64),
            (LOCAL_SIZE_CONSTANTS[2], local_work_group.z as f64),
        ];
        let constants: &[(&str, f64)] = if shader.overrides_local_size {
            &constants
        } else {
            match shader.declared_work_group(entry_point) {
                Some(declared) if declared != local_work_group => {
                    return Err(GpuError::native(
                        "create_compute_pipeline",
                        format!(
                            "local work group {local_work_group:?} is not overridable; \
                             `{entry_point}` declares {declared:?}"
                        ),
                    ));
                }
                _ => &[],
            }
        };

        self.validated("create_compute_pipeline", || {
            self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(layout),
                module: &shader.module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants,
                    ..Default::default()
                },
                cache: None,
            })
        })
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
        contents: Option<&[u8]>,
    ) -> GpuResult<wgpu::Buffer> {
        let label = descriptor.label.as_deref();
        let usage = buffer_usages(descriptor.usage);

        self.validated("create_buffer", || match contents {
            Some(contents) => self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label,
                contents,
                usage,
            }),
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label,
                size: descriptor.size,
                usage,
                mapped_at_creation: false,
            }),
        })
    }

    fn create_descriptor_pool(&self, capacity: u32) -> GpuResult<WgpuDescriptorPool> {
        Ok(WgpuDescriptorPool { capacity, allocated: 0 })
    }

    fn allocate_descriptor_set(
        &self,
        pool: &mut WgpuDescriptorPool,
        _layout: &wgpu::BindGroupLayout,
    ) -> GpuResult<u32> {
        if pool.allocated == pool.capacity {
            return Err(GpuError::native(
                "allocate_descriptor_set",
                format!("descriptor pool exhausted ({} sets)", pool.capacity),
            ));
        }
        let index = pool.allocated;
        pool.allocated += 1;
        Ok(index)
    }

    fn reset_descriptor_pool(&self, pool: &mut WgpuDescriptorPool) -> GpuResult<()> {
        pool.allocated = 0;
        Ok(())
    }

    fn submit(&self, queue: &wgpu::Queue, commands: &[Command<Self>]) -> GpuResult<()> {
        // Bind groups first: any unbound slot fails the whole submission.
        let bind_groups = commands
            .iter()
            .map(|command| match command {
                Command::BindDescriptorSet(set) => self.bind_group(set).map(Some),
                _ => Ok(None),
            })
            .collect::<GpuResult<Vec<_>>>()?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compute_context_encoder"),
        });

        let mut pass: Option<wgpu::ComputePass<'static>> = None;
        let mut pipeline: Option<&wgpu::ComputePipeline> = None;
        let mut bind_group: Option<&wgpu::BindGroup> = None;

        for (command, group) in commands.iter().zip(&bind_groups) {
            match command {
                Command::BindPipeline(bound) => {
                    pipeline = Some(bound.handle());
                    if let Some(pass) = pass.as_mut() {
                        pass.set_pipeline(bound.handle());
                    }
                }
                Command::BindDescriptorSet(_) => {
                    bind_group = group.as_ref();
                    if let (Some(pass), Some(group)) = (pass.as_mut(), bind_group) {
                        pass.set_bind_group(0, group, &[]);
                    }
                }
                Command::Dispatch(groups) => {
                    let Some(current) = pipeline else {
                        return Err(GpuError::native("submit", "dispatch without a bound pipeline"));
                    };
                    let pass = pass.get_or_insert_with(|| {
                        let mut pass = encoder
                            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                                label: Some("compute_context_pass"),
                                timestamp_writes: None,
                            })
                            .forget_lifetime();
                        pass.set_pipeline(current);
                        if let Some(group) = bind_group {
                            pass.set_bind_group(0, group, &[]);
                        }
                        pass
                    });
                    pass.dispatch_workgroups(groups.x, groups.y, groups.z);
                }
                Command::CopyBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => {
                    // Copies are encoder commands; end the open pass first.
                    pass = None;
                    encoder.copy_buffer_to_buffer(
                        source,
                        *source_offset,
                        destination,
                        *destination_offset,
                        *size,
                    );
                }
            }
        }
        drop(pass);

        queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn wait_idle(&self, _queue: &wgpu::Queue) -> GpuResult<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| GpuError::native("wait_idle", format!("{e:?}")))
    }
}
