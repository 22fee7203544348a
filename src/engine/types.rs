//! Signature and Handle Types
//!
//! This module defines the **immutable value keys** used by the shader and
//! pipeline caches, plus the [`Handle`] wrapper through which cached and pooled
//! native objects are shared.
//!
//! ## Signatures
//!
//! A signature is a plain value with **structural** equality and hashing:
//!
//! - [`LayoutSignature`]: ordered binding types, fully determines a
//!   descriptor-set layout,
//! - [`ShaderDescriptor`]: shader source plus entry point,
//! - [`WorkGroup`]: a 3-D work-group shape or work-group count.
//!
//! Two signatures with identical content are interchangeable: the caches will
//! hand back the same native object for both.
//!
//! ## Handles
//!
//! [`Handle`] compares and hashes by **address**, not by content. Because the
//! caches construct at most one object per distinct signature, address identity
//! of a cached handle is equivalent to structural identity of its signature.
//! This lets pipeline-layer keys be built from shader-layer handles cheaply.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};


/// Texel format of a storage image binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// 4 × 8-bit unsigned normalized.
    Rgba8Unorm,
    /// 4 × 16-bit float.
    Rgba16Float,
    /// 4 × 32-bit float.
    Rgba32Float,
    /// 1 × 32-bit float.
    R32Float,
    /// 1 × 32-bit unsigned integer.
    R32Uint,
}

/// Kind of resource a shader expects in one descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Read-write storage buffer.
    StorageBuffer,
    /// Read-only storage buffer.
    ReadOnlyStorageBuffer,
    /// Uniform buffer.
    UniformBuffer,
    /// Write-only storage image of the given format.
    StorageImage(ImageFormat),
    /// Sampled (read-only) image.
    SampledImage,
}

impl BindingType {
    /// Returns `true` for the buffer-backed binding kinds.
    #[inline]
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            BindingType::StorageBuffer
                | BindingType::ReadOnlyStorageBuffer
                | BindingType::UniformBuffer
        )
    }

    /// Returns `true` for the image-backed binding kinds.
    #[inline]
    pub fn is_image(self) -> bool {
        !self.is_buffer()
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingType::StorageBuffer => f.write_str("storage buffer"),
            BindingType::ReadOnlyStorageBuffer => f.write_str("read-only storage buffer"),
            BindingType::UniformBuffer => f.write_str("uniform buffer"),
            BindingType::StorageImage(format) => write!(f, "storage image ({format:?})"),
            BindingType::SampledImage => f.write_str("sampled image"),
        }
    }
}

/// Ordered sequence of binding types describing one descriptor-set layout.
///
/// Slot `i` of the layout is `bindings()[i]`.
///
/// ### Example
/// ```
/// use compute_context::{BindingType, LayoutSignature};
///
/// let a = LayoutSignature::new([BindingType::StorageBuffer, BindingType::UniformBuffer]);
/// let b: LayoutSignature = vec![BindingType::StorageBuffer, BindingType::UniformBuffer].into();
/// assert_eq!(a, b);
/// ```

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LayoutSignature {
    bindings: Vec<BindingType>,
}

impl LayoutSignature {
    /// Creates a signature from the binding types in slot order.
    pub fn new(bindings: impl IntoIterator<Item = BindingType>) -> Self {
        Self { bindings: bindings.into_iter().collect() }
    }

    /// Binding types in slot order.
    #[inline]
    pub fn bindings(&self) -> &[BindingType] {
        &self.bindings
    }

    /// Binding type of `slot`, if the slot exists.
    #[inline]
    pub fn get(&self, slot: u32) -> Option<BindingType> {
        self.bindings.get(slot as usize).copied()
    }

    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if the layout has no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl From<Vec<BindingType>> for LayoutSignature {
    fn from(bindings: Vec<BindingType>) -> Self {
        Self { bindings }
    }
}

impl FromIterator<BindingType> for LayoutSignature {
    fn from_iter<I: IntoIterator<Item = BindingType>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// A 3-D work-group shape (local size) or work-group count (global size).
///
/// `#[repr(C)]` and `Pod` so it can be written straight into a uniform block.

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct WorkGroup {
    /// Extent along x.
    pub x: u32,
    /// Extent along y.
    pub y: u32,
    /// Extent along z.
    pub z: u32,
}

impl WorkGroup {
    /// Creates a work group from its three extents.
    #[inline]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// One-dimensional work group `(x, 1, 1)`.
    #[inline]
    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    /// Total number of invocations (or groups) described.
    #[inline]
    pub fn volume(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Returns `true` if any extent is zero.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    /// Number of work groups of shape `self` needed to cover `extent`.
    ///
    /// Rounds up on every axis; a zero local extent is treated as 1.
    pub fn groups_to_cover(self, extent: WorkGroup) -> WorkGroup {
        WorkGroup {
            x: extent.x.div_ceil(self.x.max(1)),
            y: extent.y.div_ceil(self.y.max(1)),
            z: extent.z.div_ceil(self.z.max(1)),
        }
    }
}

impl Default for WorkGroup {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<[u32; 3]> for WorkGroup {
    fn from([x, y, z]: [u32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<(u32, u32, u32)> for WorkGroup {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for WorkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Shader program text or bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    /// WGSL source text.
    Wgsl(Cow<'static, str>),
    /// SPIR-V words.
    SpirV(Cow<'static, [u32]>),
}

/// Identifies one compiled compute shader: its source and entry point.
///
/// Equality is by content, so two descriptors built from the same source and
/// entry point resolve to the same cached shader module.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDescriptor {
    /// Program source.
    pub source: ShaderSource,
    /// Compute entry point name.
    pub entry_point: Cow<'static, str>,
}

impl ShaderDescriptor {
    /// WGSL shader with the given entry point.
    pub fn wgsl(source: impl Into<Cow<'static, str>>, entry_point: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: ShaderSource::Wgsl(source.into()),
            entry_point: entry_point.into(),
        }
    }

    /// SPIR-V shader with the given entry point.
    pub fn spirv(words: impl Into<Cow<'static, [u32]>>, entry_point: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: ShaderSource::SpirV(words.into()),
            entry_point: entry_point.into(),
        }
    }
}

/// Shared, address-compared reference to a native object.
///
/// ## Role
/// Every object handed out by a cache or pool is wrapped in a `Handle`. Cloning
/// is a reference-count bump; equality and hashing use the address of the
/// shared allocation, so `a == b` means "the same native object".
///
/// ## Notes
/// `Handle` is the cache key of the nested layer caches (e.g. pipeline layouts
/// are keyed by the descriptor-set layout handle they were derived from).

pub struct Handle<T: ?Sized>(Arc<T>);

impl<T> Handle<T> {
    /// Wraps a freshly created native object.
    #[inline]
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: ?Sized> Handle<T> {
    /// Returns `true` if both handles refer to the same object.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Address of the shared object, for diagnostics.
    #[inline]
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Number of live handles to this object.
    #[inline]
    pub fn ref_count(this: &Self) -> usize {
        Arc::strong_count(&this.0)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for Handle<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Handle::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for Handle<T> {}

impl<T: ?Sized> Hash for Handle<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.addr())
    }
}
