//! Error types for context construction, caching, pooling and dispatch.
//!
//! This module declares the crate-wide [`GpuError`] together with two focused
//! sub-errors:
//!
//! * [`InitError`]: the context could not acquire its adapter, device or queue,
//! * [`BindingError`]: a resource was bound to a slot that cannot take it.
//!
//! ## Taxonomy
//! * **Construction failure** ([`GpuError::Init`]): fatal for the context. A
//!   [`ContextProvider`](crate::ContextProvider) caches the failure and reports
//!   [`GpuError::ContextUnavailable`] on every later access.
//! * **Native failure** ([`GpuError::Native`]): the backend rejected a
//!   creation, allocation, submission or wait. Fatal for the in-flight
//!   operation; caches never commit a partially constructed entry.
//! * **Misuse that would corrupt GPU state** ([`GpuError::Binding`],
//!   [`GpuError::StaleDescriptorSet`]): always checked, cheap.
//!
//! Programmer errors on hot paths (zero-sized local work groups and the like)
//! are `debug_assert!`ed instead.
//!
//! All errors are `Clone` so a cached construction failure can be handed to
//! every caller.
//!
//! ## Propagation
//! Errors surface synchronously to the caller of the failing operation. Nothing
//! in this crate retries.

use std::borrow::Cow;

use thiserror::Error;

use crate::engine::types::BindingType;


/// Result alias used throughout the crate.
pub type GpuResult<T> = Result<T, GpuError>;

/// Failure to build a context from the runtime collaborator.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    /// The runtime has no adapter with this index.
    #[error("adapter {index} not found ({available} adapters available)")]
    AdapterNotFound {
        /// Requested adapter index.
        index: usize,
        /// Number of adapters the runtime exposes.
        available: usize,
    },

    /// The adapter could not produce a logical device.
    #[error("failed to create a device on adapter {adapter}: {message}")]
    DeviceCreationFailed {
        /// Adapter index.
        adapter: usize,
        /// Backend diagnostic.
        message: Cow<'static, str>,
    },

    /// The adapter's compute queue is missing or already leased.
    #[error("no compute queue available on adapter {adapter}")]
    QueueUnavailable {
        /// Adapter index.
        adapter: usize,
    },
}

/// A resource was bound to a descriptor slot that cannot accept it.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The slot does not exist in the descriptor-set layout.
    #[error("binding slot {slot} out of range (layout has {len} slots)")]
    SlotOutOfRange {
        /// Offending slot.
        slot: u32,
        /// Number of slots in the layout.
        len: usize,
    },

    /// The slot exists but expects another kind of resource.
    #[error("binding slot {slot} expects a {expected}, got a {found}")]
    TypeMismatch {
        /// Offending slot.
        slot: u32,
        /// Binding type declared by the layout.
        expected: BindingType,
        /// Kind of resource supplied (`"buffer"` or `"image"`).
        found: &'static str,
    },

    /// The backend found an empty slot while encoding the set.
    #[error("binding slot {slot} was never bound")]
    Unbound {
        /// Offending slot.
        slot: u32,
    },
}

/// Crate-wide error type.

#[derive(Debug, Clone, Error)]
pub enum GpuError {
    /// Context construction failed.
    #[error("context initialization failed: {0}")]
    Init(#[from] InitError),

    /// The process-wide context failed to initialize earlier; the failure is
    /// permanent for the provider.
    #[error("GPU context unavailable: {message}")]
    ContextUnavailable {
        /// Description of the first construction failure.
        message: Cow<'static, str>,
    },

    /// A native API call failed.
    #[error("{operation} failed: {message}")]
    Native {
        /// Name of the native operation, e.g. `"create_compute_pipeline"`.
        operation: &'static str,
        /// Backend diagnostic.
        message: Cow<'static, str>,
    },

    /// Invalid descriptor binding.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A descriptor set outlived a purge of the pool it came from.
    #[error("descriptor set from pool epoch {allocated} used after purge (pool is at epoch {current})")]
    StaleDescriptorSet {
        /// Epoch the set was allocated in.
        allocated: u64,
        /// Current epoch of the pool.
        current: u64,
    },
}

impl GpuError {
    /// Builds a [`GpuError::Native`] from an operation name and any diagnostic.
    #[inline]
    pub fn native(operation: &'static str, detail: impl std::fmt::Display) -> Self {
        GpuError::Native {
            operation,
            message: detail.to_string().into(),
        }
    }

    /// Returns `true` for failures of context construction.
    #[inline]
    pub fn is_init(&self) -> bool {
        matches!(self, GpuError::Init(_) | GpuError::ContextUnavailable { .. })
    }
}
