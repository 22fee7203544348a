//! # Context Provider
//!
//! One execution context per process, created on first use.
//!
//! [`ContextProvider`] wraps a construction closure and a `OnceLock`. The
//! first call to [`context`](ContextProvider::context) or
//! [`available`](ContextProvider::available) runs the closure; its outcome,
//! success or failure, is kept for the provider's lifetime. A failed
//! construction is never retried: every call reports the same failure as
//! [`GpuError::ContextUnavailable`].
//!
//! The provider is an ordinary value, so tests build their own around a mock
//! runtime while production code keeps one in a `static` (see the `gpu`
//! module).

use std::sync::{Arc, OnceLock};

use crate::engine::backend::{Backend, Runtime};
use crate::engine::context::{Context, ContextConfig};
use crate::engine::error::{GpuError, GpuResult};


type Constructor<B> = Box<dyn Fn() -> GpuResult<Context<B>> + Send + Sync>;

/// Lazily constructed, process-wide [`Context`].

pub struct ContextProvider<B: Backend> {
    constructor: Constructor<B>,
    context: OnceLock<GpuResult<Context<B>>>,
}

impl<B: Backend> ContextProvider<B> {
    /// Provider running `constructor` on first use.
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn() -> GpuResult<Context<B>> + Send + Sync + 'static,
    {
        Self {
            constructor: Box::new(constructor),
            context: OnceLock::new(),
        }
    }

    /// Provider building a context from `runtime` with `config`.
    pub fn from_runtime(runtime: Arc<dyn Runtime<B>>, config: ContextConfig) -> Self {
        Self::new(move || Context::with_config(Arc::clone(&runtime), config.clone()))
    }

    /// Returns `true` if a context exists or could be constructed.
    ///
    /// Triggers construction on first call.
    pub fn available(&self) -> bool {
        self.context().is_ok()
    }

    /// The process-wide context.
    ///
    /// ## Errors
    /// [`GpuError::ContextUnavailable`] carrying the construction failure, on
    /// the call that attempted construction and on every later one.

    pub fn context(&self) -> GpuResult<&Context<B>> {
        let outcome = self.context.get_or_init(|| {
            (self.constructor)().inspect_err(|e| {
                tracing::error!(error = %e, "compute context construction failed");
            })
        });

        outcome.as_ref().map_err(|e| GpuError::ContextUnavailable {
            message: e.to_string().into(),
        })
    }

    /// Returns `true` once construction has been attempted.
    pub fn is_initialized(&self) -> bool {
        self.context.get().is_some()
    }
}

impl<B: Backend> std::fmt::Debug for ContextProvider<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProvider")
            .field("context", &self.context.get())
            .finish_non_exhaustive()
    }
}
