//! # Compute Context
//!
//! Execution core for GPU compute kernels: one process-wide context owning the
//! device, a leased queue, shader and pipeline caches, and per-thread pools of
//! scratch buffers, descriptor sets and command streams.
//!
//! ## Design Goals
//! - Expensive native objects (layouts, shader modules, pipelines) are built
//!   at most once per signature, even under concurrent first use
//! - Per-thread allocation without cross-thread locking
//! - A two-phase dispatch that separates cacheable setup from per-call binding
//! - Explicit synchronization: `flush()` and `wait()` are the only blocking
//!   points
//!
//! ## Backends
//! The core is written against [`Backend`]. The `gpu` feature adds a `wgpu`
//! implementation and a process-wide context in [`gpu`]; tests use mocks.
//!
//! ## Dispatch at a glance
//! ```ignore
//! use compute_context::prelude::*;
//!
//! let context = compute_context::gpu::context()?;
//! let signature = LayoutSignature::new([BindingType::ReadOnlyStorageBuffer, BindingType::StorageBuffer]);
//! let shader = ShaderDescriptor::wgsl(SOURCE, "main");
//!
//! context.dispatch(&signature, &shader, WorkGroup::linear(64), WorkGroup::linear(16), |set| {
//!     set.bind_buffer(0, &input)?.bind_buffer(1, &output)?;
//!     Ok(())
//! })?;
//! context.flush()?;
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

#[cfg(feature = "gpu")]
pub mod gpu;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Context and dispatch

pub use engine::context::{
    Context,
    ContextConfig,
};

pub use engine::provider::ContextProvider;

pub use engine::dispatch::{
    PreparedDispatch,
    dispatch_prologue,
    dispatch_epilogue,
};

// Caches

pub use engine::cache::{Cache, Factory};
pub use engine::shader::{ShaderCache, ShaderLayout, ShaderModule};
pub use engine::pipeline::{
    Pipeline,
    PipelineCache,
    PipelineDescriptor,
    PipelineLayout,
};

// Per-thread pools

pub use engine::resource::{
    BufferDescriptor,
    BufferUsage,
    ResourcePool,
};

pub use engine::descriptor::{
    Binding,
    DescriptorPool,
    DescriptorSet,
    DEFAULT_DESCRIPTOR_POOL_CAPACITY,
};

pub use engine::command::{
    Command,
    CommandPool,
    CommandStream,
};

pub use engine::thread::{
    PoolGuard,
    ThreadContext,
    ThreadRegistry,
};

// Collaborators

pub use engine::backend::{
    Adapter,
    Backend,
    DeviceData,
    DeviceType,
    HostFuture,
    Runtime,
};

pub use engine::error::{
    GpuResult,
    GpuError,
    InitError,
    BindingError,
};

pub use engine::types::{
    BindingType,
    Handle,
    ImageFormat,
    LayoutSignature,
    ShaderDescriptor,
    ShaderSource,
    WorkGroup,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use compute_context::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Backend,
        BindingType,
        BufferDescriptor,
        BufferUsage,
        Context,
        ContextConfig,
        ContextProvider,
        DescriptorSet,
        GpuError,
        GpuResult,
        Handle,
        LayoutSignature,
        ShaderDescriptor,
        WorkGroup,
        dispatch_epilogue,
        dispatch_prologue,
    };
}
