//! Batched resource binding.
//!
//! This module provides the [`ResourceBinder`]: immutable binding-schema
//! declarations ("logical sets"), a fixed-capacity pool of set instances,
//! and a deferred write queue that attaches concrete resources to
//! instances in batches.
//!
//! # Overview
//!
//! Binding is split into a declare/allocate/bind/flush/use sequence:
//!
//! 1. `declare_layout` builds an immutable schema per set index
//! 2. `allocate` creates concrete set instances from one pool sized from
//!    the union of all declared layouts
//! 3. `bind` / `bind_array` queue writes after fail-fast validation,
//!    touching no backend state
//! 4. `flush` applies every queued write as **one** batched backend call
//! 5. `use_at` records which flushed instance later draws/dispatches read
//!
//! The batching is the point: K small binding updates cost one driver
//! round-trip, and an array bind updates a whole element range in a
//! single entry.
//!
//! # Ordering contract
//!
//! A set instance moves `Unbound -> PartiallyBound` on `bind` and
//! `PartiallyBound -> Bound` on `flush`. `use_at` must only see `Bound`
//! instances and never flushes implicitly; recording a set with writes
//! still queued produces stale bindings on the GPU, not an error. This is
//! a deliberate trade against per-call bookkeeping overhead.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use prism_core::EngineConfig;
//! use prism_frame::ResourceBinder;
//! use prism_rhi::null::NullBackend;
//! use prism_rhi::{BindPoint, BindingDesc, GpuBackend, ResourceBinding, SetSchema, ShaderStages};
//!
//! # fn main() -> Result<(), prism_rhi::RhiError> {
//! let backend = Arc::new(NullBackend::new());
//! let config = EngineConfig::default();
//! let mut binder = ResourceBinder::new(Arc::clone(&backend), BindPoint::Graphics, &config);
//!
//! binder.declare_layout(
//!     0,
//!     SetSchema::new().with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX_FRAGMENT)),
//! )?;
//! binder.allocate(0, 2, "per-frame")?;
//!
//! let ubo = backend.create_uniform_buffer(256, "camera")?;
//! binder.bind(0, 0, 0, ResourceBinding::UniformBuffer { buffer: ubo, offset: 0, range: 256 })?;
//! binder.flush()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use prism_core::{BindingFlagsConfig, EngineConfig};
use prism_rhi::{
    BindPoint, BindingDesc, BindingKind, ConfigError, GpuBackend, ResourceBinding, RhiResult,
    SetSchema, SetWrite, WritePayload,
};

/// An immutable binding schema plus the arena of instances allocated
/// from it. Instances are referenced by index; the logical set owns them
/// one-directionally.
struct LogicalSet<B: GpuBackend> {
    schema: SetSchema,
    layout: B::SetLayout,
    instances: Vec<B::BindingSet>,
}

/// Declares binding schemas, allocates set instances, and batches
/// binding writes.
///
/// # Thread Safety
///
/// Single-writer: all mutation happens from the recording thread. A
/// multi-threaded recording model would need disjoint binders per thread
/// or external synchronization of `flush`.
pub struct ResourceBinder<B: GpuBackend> {
    backend: Arc<B>,
    bind_point: BindPoint,
    binding_flags: BindingFlagsConfig,
    instance_capacity: u32,
    sets: BTreeMap<u32, LogicalSet<B>>,
    pool: Option<B::BindingPool>,
    pipeline_layout: Option<B::PipelineLayout>,
    pending: Vec<SetWrite<B>>,
}

impl<B: GpuBackend> ResourceBinder<B> {
    /// Creates an empty binder.
    ///
    /// `bind_point` selects where recorded work consumes the sets;
    /// capacity and binding flags come from the immutable configuration.
    pub fn new(backend: Arc<B>, bind_point: BindPoint, config: &EngineConfig) -> Self {
        Self {
            backend,
            bind_point,
            binding_flags: config.binding_flags,
            instance_capacity: config.set_instance_capacity,
            sets: BTreeMap::new(),
            pool: None,
            pipeline_layout: None,
            pending: Vec::new(),
        }
    }

    /// Declares the immutable schema for a set index.
    ///
    /// Must precede any `allocate`/`bind` referencing that index.
    ///
    /// # Errors
    ///
    /// Fails fast on an empty or conflicting schema, a redeclared index,
    /// or a declaration after allocation has begun.
    pub fn declare_layout(&mut self, set_index: u32, schema: SetSchema) -> RhiResult<()> {
        if self.pool.is_some() {
            return Err(ConfigError::DeclareAfterAllocate { set: set_index }.into());
        }
        if self.sets.contains_key(&set_index) {
            return Err(ConfigError::LayoutRedeclared { set: set_index }.into());
        }
        schema.validate(set_index)?;

        let layout = self.backend.create_set_layout(&schema, self.binding_flags)?;
        debug!(
            "Declared set {} with {} binding(s)",
            set_index,
            schema.bindings().len()
        );
        self.sets.insert(
            set_index,
            LogicalSet {
                schema,
                layout,
                instances: Vec::new(),
            },
        );
        Ok(())
    }

    /// Allocates `count` instances of a declared set.
    ///
    /// The first allocation freezes the declarations: it creates the
    /// backing pool, sized from the union of all declared layouts and the
    /// configured instance capacity, plus the layout object recording
    /// consumes sets through.
    ///
    /// # Errors
    ///
    /// Pool exhaustion is a fatal configuration error, never retried.
    pub fn allocate(&mut self, set_index: u32, count: u32, label: &str) -> RhiResult<()> {
        if !self.sets.contains_key(&set_index) {
            return Err(ConfigError::UnknownSet { set: set_index }.into());
        }

        let pool = self.ensure_backing()?;

        let Some(logical) = self.sets.get_mut(&set_index) else {
            return Err(ConfigError::UnknownSet { set: set_index }.into());
        };
        for i in logical.instances.len()..logical.instances.len() + count as usize {
            let set = self
                .backend
                .allocate_binding_set(pool, logical.layout, &format!("{label} {i}"))?;
            logical.instances.push(set);
        }

        debug!("Allocated {} instance(s) of set {}", count, set_index);
        Ok(())
    }

    /// Queues one binding write for the next flush.
    ///
    /// Validation happens here, before any backend call: the set must be
    /// declared, the instance allocated, the binding present in the
    /// schema, and the resource's kind must match the declaration. A
    /// failed bind leaves no trace.
    pub fn bind(
        &mut self,
        set_index: u32,
        binding: u32,
        instance_index: u32,
        resource: ResourceBinding<B>,
    ) -> RhiResult<()> {
        let (set, desc) = self.lookup(set_index, binding, instance_index)?;
        let kind = resource.kind();
        if kind != desc.kind {
            return Err(ConfigError::KindMismatch {
                set: set_index,
                binding,
                expected: desc.kind,
                actual: kind,
            }
            .into());
        }

        let resources = [resource];
        self.pending.push(SetWrite {
            set,
            binding,
            array_start: 0,
            kind,
            payload: WritePayload::from_resources(kind, &resources),
        });
        Ok(())
    }

    /// Queues a contiguous array-element range as a single write.
    ///
    /// All elements are validated together and later flushed as one
    /// batched range update - one entry covering the whole range instead
    /// of one call per element.
    ///
    /// # Errors
    ///
    /// Same contract as [`bind`](Self::bind), plus a bounds check of
    /// `start_element + resources.len()` against the declared element
    /// count.
    pub fn bind_array(
        &mut self,
        set_index: u32,
        binding: u32,
        instance_index: u32,
        resources: &[ResourceBinding<B>],
        start_element: u32,
    ) -> RhiResult<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let (set, desc) = self.lookup(set_index, binding, instance_index)?;
        for resource in resources {
            let kind = resource.kind();
            if kind != desc.kind {
                return Err(ConfigError::KindMismatch {
                    set: set_index,
                    binding,
                    expected: desc.kind,
                    actual: kind,
                }
                .into());
            }
        }

        let count = resources.len() as u32;
        if start_element + count > desc.count {
            return Err(ConfigError::ArrayOutOfBounds {
                set: set_index,
                binding,
                start: start_element,
                count,
                declared: desc.count,
            }
            .into());
        }

        self.pending.push(SetWrite {
            set,
            binding,
            array_start: start_element,
            kind: desc.kind,
            payload: WritePayload::from_resources(desc.kind, resources),
        });
        Ok(())
    }

    /// Applies every queued write in one batched backend call, then
    /// clears the queue. A no-op when nothing is pending.
    pub fn flush(&mut self) -> RhiResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.backend.update_binding_sets(&self.pending)?;
        debug!("Flushed {} binding write(s)", self.pending.len());
        self.pending.clear();
        Ok(())
    }

    /// Records into `list` which previously-flushed instance subsequent
    /// draws/dispatches read.
    ///
    /// Performs no GPU-visible update and never flushes implicitly; see
    /// the module-level ordering contract.
    pub fn use_at(
        &self,
        list: B::CommandList,
        set_index: u32,
        instance_index: u32,
    ) -> RhiResult<()> {
        let Some(pipeline_layout) = self.pipeline_layout else {
            return Err(ConfigError::NoAllocations.into());
        };
        let Some(logical) = self.sets.get(&set_index) else {
            return Err(ConfigError::UnknownSet { set: set_index }.into());
        };
        let Some(&set) = logical.instances.get(instance_index as usize) else {
            return Err(ConfigError::InstanceNotAllocated {
                set: set_index,
                instance: instance_index,
            }
            .into());
        };

        self.backend
            .cmd_use_binding_set(list, pipeline_layout, self.bind_point, set_index, set);
        Ok(())
    }

    /// Number of writes queued for the next flush.
    #[inline]
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Number of instances allocated for a set, or 0 if undeclared.
    pub fn instance_count(&self, set_index: u32) -> u32 {
        self.sets
            .get(&set_index)
            .map(|l| l.instances.len() as u32)
            .unwrap_or(0)
    }

    /// The declared schema for a set index.
    pub fn schema(&self, set_index: u32) -> Option<&SetSchema> {
        self.sets.get(&set_index).map(|l| &l.schema)
    }

    /// Creates the pool and pipeline layout on first allocation.
    fn ensure_backing(&mut self) -> RhiResult<B::BindingPool> {
        if let Some(pool) = self.pool {
            return Ok(pool);
        }

        let mut capacities: Vec<(BindingKind, u32)> = Vec::new();
        for logical in self.sets.values() {
            for desc in logical.schema.bindings() {
                let amount = desc.count.saturating_mul(self.instance_capacity);
                match capacities.iter_mut().find(|(kind, _)| *kind == desc.kind) {
                    Some((_, total)) => *total = total.saturating_add(amount),
                    None => capacities.push((desc.kind, amount)),
                }
            }
        }

        let pool = self
            .backend
            .create_binding_pool(&capacities, self.instance_capacity)?;
        self.pool = Some(pool);

        // BTreeMap iteration gives ascending set-index order, which is
        // the order the pipeline layout spans.
        let layouts: Vec<B::SetLayout> = self.sets.values().map(|l| l.layout).collect();
        let pipeline_layout = self.backend.create_pipeline_layout(&layouts)?;
        self.pipeline_layout = Some(pipeline_layout);

        info!(
            "Binding pool created: {} declared set(s), capacity {}",
            self.sets.len(),
            self.instance_capacity
        );
        Ok(pool)
    }

    /// Fail-fast validation shared by `bind` and `bind_array`.
    fn lookup(
        &self,
        set_index: u32,
        binding: u32,
        instance_index: u32,
    ) -> Result<(B::BindingSet, BindingDesc), ConfigError> {
        let Some(logical) = self.sets.get(&set_index) else {
            return Err(ConfigError::UnknownSet { set: set_index });
        };
        let Some(desc) = logical.schema.find(binding) else {
            return Err(ConfigError::UnknownBinding {
                set: set_index,
                binding,
            });
        };
        let Some(&set) = logical.instances.get(instance_index as usize) else {
            return Err(ConfigError::InstanceNotAllocated {
                set: set_index,
                instance: instance_index,
            });
        };
        Ok((set, *desc))
    }
}

impl<B: GpuBackend> Drop for ResourceBinder<B> {
    fn drop(&mut self) {
        if let Some(pipeline_layout) = self.pipeline_layout.take() {
            self.backend.destroy_pipeline_layout(pipeline_layout);
        }
        // Destroying the pool releases every instance allocated from it.
        if let Some(pool) = self.pool.take() {
            self.backend.destroy_binding_pool(pool);
        }
        for (_, logical) in std::mem::take(&mut self.sets) {
            self.backend.destroy_set_layout(logical.layout);
        }
        debug!("Resource binder destroyed");
    }
}
