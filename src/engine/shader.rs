//! # Shader Layer Caches
//!
//! The shader layer memoizes the two objects derived directly from what a
//! kernel declares:
//!
//! * [`ShaderLayout`]: the descriptor-set layout for a [`LayoutSignature`],
//! * [`ShaderModule`]: the compiled module for a [`ShaderDescriptor`].
//!
//! Both are shared process-wide through [`ShaderCache`], owned by the context.
//! The pipeline layer ([`crate::engine::pipeline`]) is keyed by the handles
//! returned here, so shader-layer lookups must happen first.

use std::borrow::Cow;
use std::sync::Arc;

use crate::engine::backend::Backend;
use crate::engine::cache::{Cache, Factory};
use crate::engine::error::GpuResult;
use crate::engine::types::{LayoutSignature, ShaderDescriptor};


/// A descriptor-set layout plus the signature it was built from.
pub struct ShaderLayout<B: Backend> {
    handle: B::DescriptorSetLayout,
    signature: LayoutSignature,
}

impl<B: Backend> ShaderLayout<B> {
    /// Native layout object.
    #[inline]
    pub fn handle(&self) -> &B::DescriptorSetLayout {
        &self.handle
    }

    /// Binding types in slot order.
    #[inline]
    pub fn signature(&self) -> &LayoutSignature {
        &self.signature
    }
}

/// A compiled shader module and the entry point pipelines use.
pub struct ShaderModule<B: Backend> {
    handle: B::ShaderModule,
    entry_point: Cow<'static, str>,
}

impl<B: Backend> ShaderModule<B> {
    /// Native module object.
    #[inline]
    pub fn handle(&self) -> &B::ShaderModule {
        &self.handle
    }

    /// Compute entry point.
    #[inline]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// Builds descriptor-set layouts.
pub struct ShaderLayoutFactory<B: Backend> {
    device: Arc<B>,
}

impl<B: Backend> Factory for ShaderLayoutFactory<B> {
    type Descriptor = LayoutSignature;
    type Object = ShaderLayout<B>;

    const NAME: &'static str = "shader_layout";

    fn create(&self, signature: &LayoutSignature) -> GpuResult<ShaderLayout<B>> {
        let handle = self.device.create_descriptor_set_layout(signature)?;
        Ok(ShaderLayout {
            handle,
            signature: signature.clone(),
        })
    }
}

/// Compiles shader modules.
pub struct ShaderModuleFactory<B: Backend> {
    device: Arc<B>,
}

impl<B: Backend> Factory for ShaderModuleFactory<B> {
    type Descriptor = ShaderDescriptor;
    type Object = ShaderModule<B>;

    const NAME: &'static str = "shader_module";

    fn create(&self, descriptor: &ShaderDescriptor) -> GpuResult<ShaderModule<B>> {
        let handle = self.device.create_shader_module(descriptor)?;
        Ok(ShaderModule {
            handle,
            entry_point: descriptor.entry_point.clone(),
        })
    }
}

/// Process-wide shader-layer caches.
///
/// ## Fields
/// * `layout`: `LayoutSignature → ShaderLayout`
/// * `module`: `ShaderDescriptor → ShaderModule`

pub struct ShaderCache<B: Backend> {
    /// Descriptor-set layout cache.
    pub layout: Cache<ShaderLayoutFactory<B>>,
    /// Shader module cache.
    pub module: Cache<ShaderModuleFactory<B>>,
}

impl<B: Backend> ShaderCache<B> {
    /// Creates empty caches constructing on `device`.
    pub fn new(device: Arc<B>) -> Self {
        Self {
            layout: Cache::new(ShaderLayoutFactory { device: Arc::clone(&device) }),
            module: Cache::new(ShaderModuleFactory { device }),
        }
    }

    /// Drops every cached layout and module.
    pub fn purge(&self) {
        self.module.purge();
        self.layout.purge();
    }
}
