//! # wgpu Backend and Process-Wide Context
//!
//! This module is compiled with `feature = "gpu"`. It provides:
//!
//! * [`WgpuDevice`]: [`Backend`](crate::Backend) over `wgpu`,
//! * [`WgpuRuntime`] / [`WgpuAdapter`]: instance, adapter selection and the
//!   queue lease,
//! * [`available`] / [`context`]: the lazily built, process-wide context.
//!
//! ## Global context
//!
//! The first call to [`context`] or [`available`] builds a context on the
//! default adapter. A construction failure is cached: the GPU subsystem stays
//! unavailable for the rest of the process and every call to [`context`]
//! returns [`GpuError::ContextUnavailable`](crate::GpuError::ContextUnavailable).
//!
//! The global context lives in a `static` and is never dropped, so it keeps
//! its queue lease until the process exits. Code that needs a context with a
//! bounded lifetime builds one with [`Context::new`] on its own runtime.
//!
//! ## Example
//! ```no_run
//! if compute_context::gpu::available() {
//!     let context = compute_context::gpu::context().unwrap();
//!     context.flush().unwrap();
//! }
//! ```

mod device;
mod runtime;

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::engine::context::{Context, ContextConfig};
use crate::engine::error::GpuResult;
use crate::engine::provider::ContextProvider;

pub use device::{WgpuDescriptorPool, WgpuDevice, WgpuShaderModule};
pub use runtime::{WgpuAdapter, WgpuRuntime};


static PROVIDER: Lazy<ContextProvider<WgpuDevice>> = Lazy::new(|| {
    ContextProvider::new(|| {
        let runtime = Arc::new(WgpuRuntime::new());
        Context::with_config(runtime, ContextConfig::new().label("gpu"))
    })
});

/// Returns `true` if the process-wide GPU context exists or can be built.
pub fn available() -> bool {
    PROVIDER.available()
}

/// The process-wide GPU context, built on first use.
///
/// ## Errors
/// [`GpuError::ContextUnavailable`](crate::GpuError::ContextUnavailable) if
/// construction failed, now or on an earlier call.

pub fn context() -> GpuResult<&'static Context<WgpuDevice>> {
    PROVIDER.context()
}
