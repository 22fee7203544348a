//! # Compute Pipeline Caches
//!
//! This module caches the two objects derived from shader-layer results:
//!
//! * [`PipelineLayout`]: keyed by the [`ShaderLayout`] handle it wraps,
//! * [`Pipeline`]: keyed by a [`PipelineDescriptor`]
//!   `{ pipeline layout, shader module, local work group }`.
//!
//! ## Key discipline
//!
//! Pipeline-layer keys hold [`Handle`]s produced by the shader layer. Handles
//! compare by address, which is sound because the shader layer constructs at
//! most one object per signature: equal signatures give the same handle, so
//! equal pipeline descriptors give the same pipeline.
//!
//! Callers must therefore resolve the shader layer **before** building a
//! [`PipelineDescriptor`]; [`dispatch_prologue`](crate::dispatch_prologue)
//! does exactly that.
//!
//! ## Invariants
//! * A pipeline is created for compute only and exactly one descriptor set.
//! * The local work group is baked into the pipeline; two local sizes never
//!   share a pipeline.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::engine::backend::Backend;
use crate::engine::cache::{Cache, Factory};
use crate::engine::error::GpuResult;
use crate::engine::shader::{ShaderLayout, ShaderModule};
use crate::engine::types::{Handle, WorkGroup};


/// A pipeline layout and the descriptor-set layout it was derived from.
pub struct PipelineLayout<B: Backend> {
    handle: B::PipelineLayout,
    set_layout: Handle<ShaderLayout<B>>,
}

impl<B: Backend> PipelineLayout<B> {
    /// Native pipeline layout object.
    #[inline]
    pub fn handle(&self) -> &B::PipelineLayout {
        &self.handle
    }

    /// Descriptor-set layout at set index 0.
    #[inline]
    pub fn set_layout(&self) -> &Handle<ShaderLayout<B>> {
        &self.set_layout
    }
}

/// Signature fully determining a compute pipeline.

pub struct PipelineDescriptor<B: Backend> {
    /// Resolved pipeline layout.
    pub layout: Handle<PipelineLayout<B>>,
    /// Resolved shader module.
    pub shader: Handle<ShaderModule<B>>,
    /// Local work-group size baked into the pipeline.
    pub local_work_group: WorkGroup,
}

// Manual impls: deriving would demand `B: Clone + Eq + Hash`.
impl<B: Backend> Clone for PipelineDescriptor<B> {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            shader: self.shader.clone(),
            local_work_group: self.local_work_group,
        }
    }
}

impl<B: Backend> PartialEq for PipelineDescriptor<B> {
    fn eq(&self, other: &Self) -> bool {
        self.layout == other.layout
            && self.shader == other.shader
            && self.local_work_group == other.local_work_group
    }
}

impl<B: Backend> Eq for PipelineDescriptor<B> {}

impl<B: Backend> Hash for PipelineDescriptor<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.layout.hash(state);
        self.shader.hash(state);
        self.local_work_group.hash(state);
    }
}

impl<B: Backend> std::fmt::Debug for PipelineDescriptor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDescriptor")
            .field("layout", &self.layout)
            .field("shader", &self.shader)
            .field("local_work_group", &self.local_work_group)
            .finish()
    }
}

/// An executable compute pipeline.
pub struct Pipeline<B: Backend> {
    handle: B::Pipeline,
    layout: Handle<PipelineLayout<B>>,
    local_work_group: WorkGroup,
}

impl<B: Backend> Pipeline<B> {
    /// Native pipeline object.
    #[inline]
    pub fn handle(&self) -> &B::Pipeline {
        &self.handle
    }

    /// Layout the pipeline was linked against.
    #[inline]
    pub fn layout(&self) -> &Handle<PipelineLayout<B>> {
        &self.layout
    }

    /// Descriptor-set layout expected at set index 0.
    #[inline]
    pub fn set_layout(&self) -> &Handle<ShaderLayout<B>> {
        self.layout.set_layout()
    }

    /// Local work-group size.
    #[inline]
    pub fn local_work_group(&self) -> WorkGroup {
        self.local_work_group
    }
}

/// Builds pipeline layouts.
pub struct PipelineLayoutFactory<B: Backend> {
    device: Arc<B>,
}

impl<B: Backend> Factory for PipelineLayoutFactory<B> {
    type Descriptor = Handle<ShaderLayout<B>>;
    type Object = PipelineLayout<B>;

    const NAME: &'static str = "pipeline_layout";

    fn create(&self, set_layout: &Handle<ShaderLayout<B>>) -> GpuResult<PipelineLayout<B>> {
        let handle = self.device.create_pipeline_layout(set_layout.handle())?;
        Ok(PipelineLayout {
            handle,
            set_layout: set_layout.clone(),
        })
    }
}

/// Links compute pipelines.
pub struct ComputePipelineFactory<B: Backend> {
    device: Arc<B>,
}

impl<B: Backend> Factory for ComputePipelineFactory<B> {
    type Descriptor = PipelineDescriptor<B>;
    type Object = Pipeline<B>;

    const NAME: &'static str = "compute_pipeline";

    fn create(&self, descriptor: &PipelineDescriptor<B>) -> GpuResult<Pipeline<B>> {
        debug_assert!(
            !descriptor.local_work_group.is_empty(),
            "local work group must be non-empty"
        );

        let handle = self.device.create_compute_pipeline(
            descriptor.layout.handle(),
            descriptor.shader.handle(),
            descriptor.shader.entry_point(),
            descriptor.local_work_group,
        )?;

        Ok(Pipeline {
            handle,
            layout: descriptor.layout.clone(),
            local_work_group: descriptor.local_work_group,
        })
    }
}

/// Process-wide pipeline-layer caches.
///
/// ## Fields
/// * `layout`: `ShaderLayout handle → PipelineLayout`
/// * `pipeline`: `PipelineDescriptor → Pipeline`

pub struct PipelineCache<B: Backend> {
    /// Pipeline layout cache.
    pub layout: Cache<PipelineLayoutFactory<B>>,
    /// Compute pipeline cache.
    pub pipeline: Cache<ComputePipelineFactory<B>>,
}

impl<B: Backend> PipelineCache<B> {
    /// Creates empty caches constructing on `device`.
    pub fn new(device: Arc<B>) -> Self {
        Self {
            layout: Cache::new(PipelineLayoutFactory { device: Arc::clone(&device) }),
            pipeline: Cache::new(ComputePipelineFactory { device }),
        }
    }

    /// Resolves the pipeline for `set_layout`, `shader` and `local_work_group`,
    /// constructing the pipeline layout and pipeline as needed.
    pub fn retrieve(
        &self,
        set_layout: &Handle<ShaderLayout<B>>,
        shader: &Handle<ShaderModule<B>>,
        local_work_group: WorkGroup,
    ) -> GpuResult<Handle<Pipeline<B>>> {
        let layout = self.layout.retrieve(set_layout)?;
        self.pipeline.retrieve(&PipelineDescriptor {
            layout,
            shader: shader.clone(),
            local_work_group,
        })
    }

    /// Drops every cached pipeline and pipeline layout.
    pub fn purge(&self) {
        self.pipeline.purge();
        self.layout.purge();
    }
}
