//! # wgpu Runtime and Adapters
//!
//! [`WgpuRuntime`] owns the `wgpu::Instance` and the adapters a context can be
//! built on. Each [`WgpuAdapter`] creates its logical device and queue on first
//! use and leases the queue to at most one context at a time.
//!
//! ## Device configuration
//! * no optional features,
//! * default limits,
//! * tracing and experimental features disabled.
//!
//! ## Blocking behavior
//! Adapter and device requests are resolved synchronously with
//! `pollster::block_on`. This happens once, when the context is created.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::engine::backend::{Adapter, Runtime};
use crate::engine::error::{GpuResult, InitError};
use crate::gpu::device::WgpuDevice;


/// A physical GPU and, once opened, its device and queue.

pub struct WgpuAdapter {
    index: usize,
    adapter: wgpu::Adapter,
    opened: OnceCell<(Arc<WgpuDevice>, wgpu::Queue)>,
    leased: AtomicBool,
}

impl WgpuAdapter {
    fn new(index: usize, adapter: wgpu::Adapter) -> Self {
        Self {
            index,
            adapter,
            opened: OnceCell::new(),
            leased: AtomicBool::new(false),
        }
    }

    /// Native adapter.
    #[inline]
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Returns `true` while a context holds this adapter's queue.
    pub fn is_leased(&self) -> bool {
        self.leased.load(Ordering::Acquire)
    }

    fn open(&self) -> GpuResult<&(Arc<WgpuDevice>, wgpu::Queue)> {
        self.opened.get_or_try_init(|| {
            let info = self.adapter.get_info();

            let (device, queue) = pollster::block_on(self.adapter.request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("compute_context_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::default(),
                    trace: wgpu::Trace::Off,
                },
            ))
            .map_err(|e| InitError::DeviceCreationFailed {
                adapter: self.index,
                message: format!("{e:?}").into(),
            })?;

            tracing::info!(
                adapter = self.index,
                name = %info.name,
                backend = ?info.backend,
                "opened wgpu device"
            );
            Ok((Arc::new(WgpuDevice::new(device, info)), queue))
        })
    }
}

impl Adapter<WgpuDevice> for WgpuAdapter {
    fn device(&self) -> GpuResult<Arc<WgpuDevice>> {
        let (device, _) = self.open()?;
        Ok(Arc::clone(device))
    }

    fn request_queue(&self) -> GpuResult<wgpu::Queue> {
        let (_, queue) = self.open()?;

        if self
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InitError::QueueUnavailable { adapter: self.index }.into());
        }
        Ok(queue.clone())
    }

    fn return_queue(&self, queue: wgpu::Queue) {
        drop(queue);
        self.leased.store(false, Ordering::Release);
        tracing::debug!(adapter = self.index, "queue returned");
    }
}

impl std::fmt::Debug for WgpuAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuAdapter")
            .field("index", &self.index)
            .field("info", &self.adapter.get_info())
            .field("opened", &self.opened.get().is_some())
            .field("leased", &self.is_leased())
            .finish()
    }
}

/// Instance plus the adapters contexts may select by index.

#[derive(Debug)]
pub struct WgpuRuntime {
    instance: wgpu::Instance,
    adapters: Vec<Arc<WgpuAdapter>>,
}

impl WgpuRuntime {
    /// Default instance with its high-performance adapter, if any.
    ///
    /// A machine without a usable adapter yields a runtime with no adapters;
    /// building a context on it fails with [`InitError::AdapterNotFound`].

    pub fn new() -> Self {
        let instance = wgpu::Instance::default();

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }));

        let adapters = match adapter {
            Ok(adapter) => vec![adapter],
            Err(e) => {
                tracing::warn!(error = ?e, "no wgpu adapter available");
                Vec::new()
            }
        };

        Self::from_adapters(instance, adapters)
    }

    /// Runtime over caller-selected adapters, indexed in the given order.
    pub fn from_adapters(instance: wgpu::Instance, adapters: Vec<wgpu::Adapter>) -> Self {
        let adapters = adapters
            .into_iter()
            .enumerate()
            .map(|(index, adapter)| Arc::new(WgpuAdapter::new(index, adapter)))
            .collect();

        Self { instance, adapters }
    }

    /// Number of selectable adapters.
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }
}

impl Default for WgpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime<WgpuDevice> for WgpuRuntime {
    fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    fn default_adapter_index(&self) -> usize {
        0
    }

    fn adapter(&self, index: usize) -> GpuResult<Arc<dyn Adapter<WgpuDevice>>> {
        match self.adapters.get(index) {
            Some(adapter) => Ok(Arc::clone(adapter) as Arc<dyn Adapter<WgpuDevice>>),
            None => Err(InitError::AdapterNotFound {
                index,
                available: self.adapters.len(),
            }
            .into()),
        }
    }
}
