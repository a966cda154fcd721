//! The execution-backend abstraction.
//!
//! [`GpuBackend`] is the narrow surface the submission and binding core
//! requires from a GPU driver: command-list lifecycle, completion
//! signals, queue submission, set-instance allocation, one batched
//! binding-write call, and persistently-mapped uniform buffers.
//!
//! Two implementations ship with this crate:
//! - [`crate::vulkan::VulkanBackend`] — the production backend over `ash`
//! - [`crate::null::NullBackend`] — a headless backend for tests, CI, and
//!   renderer-less tools
//!
//! Everything above this trait is backend-agnostic; nothing in the
//! managers touches a driver API directly.

use std::fmt::Debug;
use std::hash::Hash;

use prism_core::BindingFlagsConfig;

use crate::error::{DeviceError, RhiError};
use crate::types::{BindPoint, BindingKind, SetSchema, SetWrite};

/// The minimal driver surface required by the frame-pipelining core.
///
/// Handle types are small `Copy` values (driver handles or pool indices);
/// the backend owns the underlying objects and destroys them through the
/// matching `destroy_*` call.
///
/// # Thread Safety
///
/// Backends are shared behind `Arc` and must be callable from any thread.
/// The managers themselves follow a single-writer model; the only
/// cross-thread traffic a backend must support is fence signaling and
/// waiting.
pub trait GpuBackend: Send + Sync + 'static {
    /// A recordable, replayable sequence of GPU operations.
    type CommandList: Copy + Eq + Hash + Debug + Send + Sync;
    /// A completion signal set when a submitted list finishes on the GPU.
    type Fence: Copy + Eq + Hash + Debug + Send + Sync;
    /// An execution queue.
    type Queue: Copy + Debug + Send + Sync;
    /// An immutable set-layout object built from a [`SetSchema`].
    type SetLayout: Copy + Eq + Debug + Send + Sync;
    /// A fixed-capacity pool set instances are allocated from.
    type BindingPool: Copy + Eq + Debug + Send + Sync;
    /// A concrete, allocated instance of a set layout.
    type BindingSet: Copy + Eq + Hash + Debug + Send + Sync;
    /// The layout object recording consumes sets through.
    type PipelineLayout: Copy + Eq + Debug + Send + Sync;
    /// A buffer resource.
    type Buffer: Copy + Eq + Hash + Debug + Send + Sync;
    /// An image (view) resource.
    type Image: Copy + Eq + Hash + Debug + Send + Sync;
    /// A sampler resource.
    type Sampler: Copy + Eq + Hash + Debug + Send + Sync;
    /// A ray-tracing acceleration structure.
    type AccelStruct: Copy + Eq + Hash + Debug + Send + Sync;

    // --- Command lists ---

    /// Creates a command list in the initial (recordable) state.
    fn create_command_list(&self) -> Result<Self::CommandList, DeviceError>;

    /// Destroys a command list. Must not be in flight.
    fn destroy_command_list(&self, list: Self::CommandList);

    /// Resets a command list back to the initial state, releasing its
    /// recorded commands.
    fn reset_command_list(&self, list: Self::CommandList) -> Result<(), DeviceError>;

    /// Begins recording into a reset command list.
    fn begin_command_list(&self, list: Self::CommandList) -> Result<(), DeviceError>;

    /// Ends recording, making the list submittable.
    fn end_command_list(&self, list: Self::CommandList) -> Result<(), DeviceError>;

    // --- Completion signals ---

    /// Creates a fence, optionally in the signaled state.
    fn create_fence(&self, signaled: bool) -> Result<Self::Fence, DeviceError>;

    /// Destroys a fence. Must not be associated with pending work.
    fn destroy_fence(&self, fence: Self::Fence);

    /// Resets a fence to the unsignaled state.
    fn reset_fence(&self, fence: Self::Fence) -> Result<(), DeviceError>;

    /// Blocks until the fence signals or the timeout expires.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::WaitTimeout`] on expiry; a timeout is
    /// treated as device loss by the callers.
    fn wait_fence(&self, fence: Self::Fence, timeout_ns: u64) -> Result<(), DeviceError>;

    /// Non-blocking check of a fence's state.
    fn fence_status(&self, fence: Self::Fence) -> bool;

    // --- Submission ---

    /// Submits a recorded list to `queue`; `fence` signals on completion.
    ///
    /// # Errors
    ///
    /// A rejected submission is fatal for the session and is never
    /// retried by the callers.
    fn submit(
        &self,
        list: Self::CommandList,
        queue: Self::Queue,
        fence: Self::Fence,
    ) -> Result<(), DeviceError>;

    // --- Binding sets ---

    /// Builds an immutable set layout from a validated schema.
    fn create_set_layout(
        &self,
        schema: &SetSchema,
        flags: BindingFlagsConfig,
    ) -> Result<Self::SetLayout, DeviceError>;

    /// Destroys a set layout.
    fn destroy_set_layout(&self, layout: Self::SetLayout);

    /// Creates the fixed-capacity pool set instances are allocated from.
    ///
    /// `capacities` lists, per binding kind, how many descriptors of that
    /// kind the pool must hold; `max_sets` caps the total instance count.
    fn create_binding_pool(
        &self,
        capacities: &[(BindingKind, u32)],
        max_sets: u32,
    ) -> Result<Self::BindingPool, DeviceError>;

    /// Destroys a pool and every set instance allocated from it.
    fn destroy_binding_pool(&self, pool: Self::BindingPool);

    /// Allocates one set instance from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::PoolExhausted`] when the pool is out
    /// of space — a fatal configuration error, never retried.
    fn allocate_binding_set(
        &self,
        pool: Self::BindingPool,
        layout: Self::SetLayout,
        label: &str,
    ) -> Result<Self::BindingSet, RhiError>;

    /// Builds the layout object recording consumes sets through, spanning
    /// the given set layouts in set-index order.
    fn create_pipeline_layout(
        &self,
        layouts: &[Self::SetLayout],
    ) -> Result<Self::PipelineLayout, DeviceError>;

    /// Destroys a pipeline layout.
    fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout);

    /// Applies every queued write in one backend call.
    ///
    /// This is the batching contract the binder is built around: K queued
    /// writes cost one driver round-trip, not K.
    fn update_binding_sets(&self, writes: &[SetWrite<Self>]) -> Result<(), DeviceError>
    where
        Self: Sized;

    /// Records into `list` which flushed set instance subsequent
    /// draws/dispatches read. Performs no GPU-visible update itself.
    fn cmd_use_binding_set(
        &self,
        list: Self::CommandList,
        layout: Self::PipelineLayout,
        bind_point: BindPoint,
        set_index: u32,
        set: Self::BindingSet,
    );

    // --- Buffers ---

    /// Creates a persistently-mapped uniform buffer of `size` bytes.
    fn create_uniform_buffer(&self, size: u64, label: &str) -> Result<Self::Buffer, DeviceError>;

    /// Destroys a buffer. Callers route buffers the GPU may still read
    /// through deferred disposal instead of calling this directly.
    fn destroy_buffer(&self, buffer: Self::Buffer);

    /// Writes `data` into the buffer at `offset` through its persistent
    /// mapping.
    fn write_buffer(
        &self,
        buffer: Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DeviceError>;
}
