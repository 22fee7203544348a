//! # Two-Phase Dispatch
//!
//! Recording a dispatch is split so the caller can bind per-call resources
//! between cacheable setup and command emission:
//!
//! ```text
//! dispatch_prologue ──▶ PreparedDispatch ──bind──▶ dispatch_epilogue
//!   (resolve caches,      (descriptor set            (bind set,
//!    bind pipeline)        ready to fill)             record dispatch)
//! ```
//!
//! [`PreparedDispatch`] can only be obtained from the prologue and is consumed
//! by the epilogue, so a dispatch cannot be recorded without a resolved
//! pipeline and an allocated descriptor set.
//!
//! ## Failure
//! Any construction or allocation failure aborts the dispatch. Nothing
//! partially built is cached; the pipeline bind may already be in the stream,
//! which is harmless because no dispatch follows it.
//!
//! ## Example
//! ```ignore
//! let local = WorkGroup::linear(64);
//! let mut command = context.command();
//! let stream = command.stream();
//!
//! let mut prepared = dispatch_prologue(&context, stream, &signature, &shader, local)?;
//! prepared.bind_buffer(0, &input)?.bind_buffer(1, &output)?;
//! dispatch_epilogue(stream, prepared, local.groups_to_cover(WorkGroup::linear(n)))?;
//!
//! // Release the pool guard before anything that locks it again.
//! drop(command);
//! context.submit()?;
//! ```

use std::ops::{Deref, DerefMut};

use crate::engine::backend::Backend;
use crate::engine::command::CommandStream;
use crate::engine::context::Context;
use crate::engine::descriptor::DescriptorSet;
use crate::engine::error::GpuResult;
use crate::engine::pipeline::Pipeline;
use crate::engine::types::{Handle, LayoutSignature, ShaderDescriptor, WorkGroup};


/// A dispatch between prologue and epilogue.
///
/// Dereferences to its [`DescriptorSet`] for binding.

#[must_use = "a prepared dispatch records nothing until passed to dispatch_epilogue"]
pub struct PreparedDispatch<B: Backend> {
    pipeline: Handle<Pipeline<B>>,
    descriptor_set: DescriptorSet<B>,
}

impl<B: Backend> PreparedDispatch<B> {
    /// Pipeline bound by the prologue.
    #[inline]
    pub fn pipeline(&self) -> &Handle<Pipeline<B>> {
        &self.pipeline
    }

    /// Local work-group size of the bound pipeline.
    #[inline]
    pub fn local_work_group(&self) -> WorkGroup {
        self.pipeline.local_work_group()
    }

    /// Descriptor set to fill before the epilogue.
    #[inline]
    pub fn descriptor_set(&mut self) -> &mut DescriptorSet<B> {
        &mut self.descriptor_set
    }
}

impl<B: Backend> Deref for PreparedDispatch<B> {
    type Target = DescriptorSet<B>;

    fn deref(&self) -> &DescriptorSet<B> {
        &self.descriptor_set
    }
}

impl<B: Backend> DerefMut for PreparedDispatch<B> {
    fn deref_mut(&mut self) -> &mut DescriptorSet<B> {
        &mut self.descriptor_set
    }
}

impl<B: Backend> std::fmt::Debug for PreparedDispatch<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedDispatch")
            .field("local_work_group", &self.local_work_group())
            .field("descriptor_set", &self.descriptor_set)
            .finish()
    }
}

/// Resolves the pipeline for a kernel, binds it into `stream` and allocates a
/// descriptor set for the caller to fill.
///
/// ## Steps
/// 1. Descriptor-set layout for `layout_signature` (shader layout cache).
/// 2. Shader module for `shader_descriptor` (shader module cache).
/// 3. Pipeline layout, then pipeline for `{layout, module, local_work_group}`.
/// 4. Pipeline bind recorded into `stream`.
/// 5. Descriptor set allocated from the calling thread's descriptor pool.
///
/// ## Errors
/// Any construction or allocation failure.

pub fn dispatch_prologue<B: Backend>(
    context: &Context<B>,
    stream: &mut CommandStream<B>,
    layout_signature: &LayoutSignature,
    shader_descriptor: &ShaderDescriptor,
    local_work_group: WorkGroup,
) -> GpuResult<PreparedDispatch<B>> {
    let shader_layout = context.shader().layout.retrieve(layout_signature)?;
    let shader_module = context.shader().module.retrieve(shader_descriptor)?;
    let pipeline = context
        .pipeline()
        .retrieve(&shader_layout, &shader_module, local_work_group)?;

    stream.bind_pipeline(&pipeline);

    let descriptor_set = context.descriptor().allocate(&shader_layout)?;

    tracing::trace!(
        entry_point = %shader_descriptor.entry_point,
        bindings = layout_signature.len(),
        local = %local_work_group,
        "dispatch prepared"
    );

    Ok(PreparedDispatch {
        pipeline,
        descriptor_set,
    })
}

/// Binds the filled descriptor set and records the dispatch.
///
/// Binding completeness is the caller's responsibility and is not checked
/// here; backends reject unbound slots at submission.
///
/// ## Errors
/// [`GpuError::StaleDescriptorSet`](crate::GpuError::StaleDescriptorSet) if
/// the context was flushed after the prologue. Nothing is recorded.

pub fn dispatch_epilogue<B: Backend>(
    stream: &mut CommandStream<B>,
    prepared: PreparedDispatch<B>,
    global_work_group: WorkGroup,
) -> GpuResult<()> {
    prepared.descriptor_set.ensure_valid()?;

    stream.bind_descriptor_set(prepared.descriptor_set);
    stream.dispatch(global_work_group);

    tracing::trace!(global = %global_work_group, "dispatch recorded");
    Ok(())
}
