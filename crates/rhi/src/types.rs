//! Backend-facing data types for resource binding.
//!
//! This module defines the vocabulary shared by the binder and the
//! execution backends:
//! - [`SetSchema`] / [`BindingDesc`] describe an immutable binding layout
//! - [`ResourceBinding`] is a tagged reference to one concrete resource
//! - [`SetWrite`] / [`WritePayload`] carry queued binding updates to the
//!   backend's single batched-write call
//!
//! # Example
//!
//! ```
//! use prism_rhi::{BindingDesc, SetSchema, ShaderStages};
//!
//! let schema = SetSchema::new()
//!     .with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX))
//!     .with(BindingDesc::combined_image_sampler(1, ShaderStages::FRAGMENT).with_count(16));
//!
//! assert!(schema.validate(0).is_ok());
//! ```

use std::fmt;

use bitflags::bitflags;

use crate::backend::GpuBackend;
use crate::error::ConfigError;

bitflags! {
    /// Shader stages that may access a binding.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const RAYGEN = 1 << 3;
        const MISS = 1 << 4;
        const CLOSEST_HIT = 1 << 5;
    }
}

impl ShaderStages {
    /// Convenience mask for graphics work.
    pub const VERTEX_FRAGMENT: ShaderStages =
        ShaderStages::VERTEX.union(ShaderStages::FRAGMENT);
}

/// The kind of resource a binding accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Uniform (constant) buffer.
    UniformBuffer,
    /// Read/write storage buffer.
    StorageBuffer,
    /// Read-only sampled image.
    SampledImage,
    /// Read/write storage image.
    StorageImage,
    /// Image paired with its sampler.
    CombinedImageSampler,
    /// Standalone sampler.
    Sampler,
    /// Ray-tracing acceleration structure.
    AccelerationStructure,
}

/// Where recorded work consumes a bound set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindPoint {
    Graphics,
    Compute,
    RayTracing,
}

/// One binding slot in a set schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingDesc {
    /// Binding index within the set.
    pub binding: u32,
    /// Resource kind this binding accepts.
    pub kind: BindingKind,
    /// Number of array elements (1 for a scalar binding).
    pub count: u32,
    /// Shader stages that may access the binding.
    pub stages: ShaderStages,
}

impl BindingDesc {
    fn new(binding: u32, kind: BindingKind, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind,
            count: 1,
            stages,
        }
    }

    /// Creates a uniform buffer binding.
    pub fn uniform_buffer(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::UniformBuffer, stages)
    }

    /// Creates a storage buffer binding.
    pub fn storage_buffer(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::StorageBuffer, stages)
    }

    /// Creates a sampled image binding.
    pub fn sampled_image(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::SampledImage, stages)
    }

    /// Creates a storage image binding.
    pub fn storage_image(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::StorageImage, stages)
    }

    /// Creates a combined image sampler binding.
    pub fn combined_image_sampler(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::CombinedImageSampler, stages)
    }

    /// Creates a standalone sampler binding.
    pub fn sampler(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::Sampler, stages)
    }

    /// Creates an acceleration structure binding.
    pub fn acceleration_structure(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, BindingKind::AccelerationStructure, stages)
    }

    /// Sets the array element count.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

/// An immutable binding schema for one logical set.
///
/// Built once at setup and never mutated afterward. Validation rejects
/// empty schemas and duplicate binding indices before the backend sees
/// anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetSchema {
    bindings: Vec<BindingDesc>,
}

impl SetSchema {
    /// Creates an empty schema. At least one binding must be added before
    /// the schema can be declared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding to the schema.
    pub fn with(mut self, desc: BindingDesc) -> Self {
        self.bindings.push(desc);
        self
    }

    /// Returns all bindings in declaration order.
    #[inline]
    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }

    /// Looks up a binding by index.
    pub fn find(&self, binding: u32) -> Option<&BindingDesc> {
        self.bindings.iter().find(|d| d.binding == binding)
    }

    /// Checks the schema for structural errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is empty or declares the same
    /// binding index more than once.
    pub fn validate(&self, set: u32) -> Result<(), ConfigError> {
        if self.bindings.is_empty() {
            return Err(ConfigError::EmptySchema { set });
        }
        for (i, desc) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|d| d.binding == desc.binding) {
                return Err(ConfigError::DuplicateBinding {
                    set,
                    binding: desc.binding,
                });
            }
        }
        Ok(())
    }
}

/// A tagged reference to one concrete resource being attached to a binding.
///
/// The variant determines the [`BindingKind`] the write is checked against.
pub enum ResourceBinding<B: GpuBackend> {
    /// A uniform buffer range.
    UniformBuffer {
        buffer: B::Buffer,
        offset: u64,
        range: u64,
    },
    /// A storage buffer range.
    StorageBuffer {
        buffer: B::Buffer,
        offset: u64,
        range: u64,
    },
    /// A sampled image.
    SampledImage { image: B::Image },
    /// A storage image.
    StorageImage { image: B::Image },
    /// An image paired with a sampler.
    CombinedImageSampler {
        image: B::Image,
        sampler: B::Sampler,
    },
    /// A standalone sampler.
    Sampler { sampler: B::Sampler },
    /// An acceleration structure.
    AccelerationStructure { accel: B::AccelStruct },
}

impl<B: GpuBackend> ResourceBinding<B> {
    /// Returns the binding kind this resource satisfies.
    pub fn kind(&self) -> BindingKind {
        match self {
            ResourceBinding::UniformBuffer { .. } => BindingKind::UniformBuffer,
            ResourceBinding::StorageBuffer { .. } => BindingKind::StorageBuffer,
            ResourceBinding::SampledImage { .. } => BindingKind::SampledImage,
            ResourceBinding::StorageImage { .. } => BindingKind::StorageImage,
            ResourceBinding::CombinedImageSampler { .. } => BindingKind::CombinedImageSampler,
            ResourceBinding::Sampler { .. } => BindingKind::Sampler,
            ResourceBinding::AccelerationStructure { .. } => BindingKind::AccelerationStructure,
        }
    }
}

impl<B: GpuBackend> Clone for ResourceBinding<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: GpuBackend> Copy for ResourceBinding<B> {}

impl<B: GpuBackend> fmt::Debug for ResourceBinding<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceBinding::UniformBuffer {
                buffer,
                offset,
                range,
            } => f
                .debug_struct("UniformBuffer")
                .field("buffer", buffer)
                .field("offset", offset)
                .field("range", range)
                .finish(),
            ResourceBinding::StorageBuffer {
                buffer,
                offset,
                range,
            } => f
                .debug_struct("StorageBuffer")
                .field("buffer", buffer)
                .field("offset", offset)
                .field("range", range)
                .finish(),
            ResourceBinding::SampledImage { image } => {
                f.debug_struct("SampledImage").field("image", image).finish()
            }
            ResourceBinding::StorageImage { image } => {
                f.debug_struct("StorageImage").field("image", image).finish()
            }
            ResourceBinding::CombinedImageSampler { image, sampler } => f
                .debug_struct("CombinedImageSampler")
                .field("image", image)
                .field("sampler", sampler)
                .finish(),
            ResourceBinding::Sampler { sampler } => {
                f.debug_struct("Sampler").field("sampler", sampler).finish()
            }
            ResourceBinding::AccelerationStructure { accel } => f
                .debug_struct("AccelerationStructure")
                .field("accel", accel)
                .finish(),
        }
    }
}

/// A buffer attachment inside a [`WritePayload`].
pub struct BufferBinding<B: GpuBackend> {
    pub buffer: B::Buffer,
    pub offset: u64,
    pub range: u64,
}

/// An image attachment inside a [`WritePayload`], with its sampler when
/// the binding is a combined image sampler.
pub struct ImageBinding<B: GpuBackend> {
    pub image: B::Image,
    pub sampler: Option<B::Sampler>,
}

/// The resource data carried by one queued write, grouped by category.
///
/// Each variant is a contiguous run of array elements, so an array bind
/// flushes as one ranged update instead of one update per element.
pub enum WritePayload<B: GpuBackend> {
    Buffers(Vec<BufferBinding<B>>),
    Images(Vec<ImageBinding<B>>),
    Samplers(Vec<B::Sampler>),
    AccelStructs(Vec<B::AccelStruct>),
}

impl<B: GpuBackend> WritePayload<B> {
    /// Builds a payload from resources that all satisfy `kind`.
    ///
    /// Callers must have validated the resources against the schema;
    /// entries of a different kind are dropped.
    pub fn from_resources(kind: BindingKind, resources: &[ResourceBinding<B>]) -> Self {
        debug_assert!(resources.iter().all(|r| r.kind() == kind));
        match kind {
            BindingKind::UniformBuffer | BindingKind::StorageBuffer => WritePayload::Buffers(
                resources
                    .iter()
                    .filter_map(|r| match *r {
                        ResourceBinding::UniformBuffer {
                            buffer,
                            offset,
                            range,
                        }
                        | ResourceBinding::StorageBuffer {
                            buffer,
                            offset,
                            range,
                        } => Some(BufferBinding {
                            buffer,
                            offset,
                            range,
                        }),
                        _ => None,
                    })
                    .collect(),
            ),
            BindingKind::SampledImage
            | BindingKind::StorageImage
            | BindingKind::CombinedImageSampler => WritePayload::Images(
                resources
                    .iter()
                    .filter_map(|r| match *r {
                        ResourceBinding::SampledImage { image }
                        | ResourceBinding::StorageImage { image } => Some(ImageBinding {
                            image,
                            sampler: None,
                        }),
                        ResourceBinding::CombinedImageSampler { image, sampler } => {
                            Some(ImageBinding {
                                image,
                                sampler: Some(sampler),
                            })
                        }
                        _ => None,
                    })
                    .collect(),
            ),
            BindingKind::Sampler => WritePayload::Samplers(
                resources
                    .iter()
                    .filter_map(|r| match *r {
                        ResourceBinding::Sampler { sampler } => Some(sampler),
                        _ => None,
                    })
                    .collect(),
            ),
            BindingKind::AccelerationStructure => WritePayload::AccelStructs(
                resources
                    .iter()
                    .filter_map(|r| match *r {
                        ResourceBinding::AccelerationStructure { accel } => Some(accel),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }

    /// Number of array elements this payload covers.
    pub fn element_count(&self) -> usize {
        match self {
            WritePayload::Buffers(v) => v.len(),
            WritePayload::Images(v) => v.len(),
            WritePayload::Samplers(v) => v.len(),
            WritePayload::AccelStructs(v) => v.len(),
        }
    }
}

/// One queued binding update, ready for the backend's batched-write call.
///
/// Created by the binder's `bind`/`bind_array`, consumed by the next
/// flush, then discarded; it never persists past one flush.
pub struct SetWrite<B: GpuBackend> {
    /// The set instance being written.
    pub set: B::BindingSet,
    /// Binding index within the set.
    pub binding: u32,
    /// First array element the payload covers.
    pub array_start: u32,
    /// Declared kind of the target binding.
    pub kind: BindingKind,
    /// The resources to attach.
    pub payload: WritePayload<B>,
}
