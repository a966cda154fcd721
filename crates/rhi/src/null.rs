//! Headless execution backend.
//!
//! [`NullBackend`] implements [`GpuBackend`] without a GPU. Command lists,
//! fences, and set instances are bookkeeping entries; fences are real
//! blocking primitives that another thread can signal. Every submission
//! and every batched binding write is recorded so callers can observe
//! exactly what would have reached the driver.
//!
//! This is the backend the test suites run against, and it doubles as a
//! renderer-less mode for tools and CI.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use prism_rhi::null::NullBackend;
//! use prism_rhi::GpuBackend;
//!
//! let backend = Arc::new(NullBackend::new());
//! let fence = backend.create_fence(false).unwrap();
//!
//! // Another thread (the "GPU") signals the fence.
//! let injector = Arc::clone(&backend);
//! std::thread::spawn(move || injector.signal_fence(fence));
//!
//! backend.wait_fence(fence, u64::MAX).unwrap();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use prism_core::BindingFlagsConfig;
use tracing::debug;

use crate::backend::GpuBackend;
use crate::error::{ConfigError, DeviceError, RhiError};
use crate::types::{BindPoint, BindingKind, SetSchema, SetWrite};

macro_rules! null_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

null_handle!(
    /// A recorded command list (bookkeeping only).
    NullCommandList
);
null_handle!(
    /// A blocking completion signal.
    NullFence
);
null_handle!(
    /// An execution queue.
    NullQueue
);
null_handle!(
    /// A set layout.
    NullSetLayout
);
null_handle!(
    /// A set-instance allocation pool.
    NullBindingPool
);
null_handle!(
    /// A set instance.
    NullBindingSet
);
null_handle!(
    /// A pipeline layout.
    NullPipelineLayout
);
null_handle!(
    /// A CPU-side buffer block.
    NullBuffer
);
null_handle!(
    /// An image resource fabricated with [`NullBackend::make_image`].
    NullImage
);
null_handle!(
    /// A sampler resource fabricated with [`NullBackend::make_sampler`].
    NullSampler
);
null_handle!(
    /// An acceleration structure fabricated with
    /// [`NullBackend::make_accel_struct`].
    NullAccelStruct
);

/// One recorded batched-write call.
#[derive(Clone, Debug)]
pub struct WriteBatch {
    /// The entries the call carried, in queue order.
    pub entries: Vec<WriteRecord>,
}

/// One entry of a recorded batched write.
#[derive(Clone, Debug)]
pub struct WriteRecord {
    pub set: NullBindingSet,
    pub binding: u32,
    pub array_start: u32,
    pub kind: BindingKind,
    pub element_count: usize,
}

/// One recorded queue submission.
#[derive(Clone, Copy, Debug)]
pub struct SubmissionRecord {
    pub list: NullCommandList,
    pub queue: NullQueue,
    pub fence: NullFence,
}

/// One recorded `cmd_use_binding_set` call.
#[derive(Clone, Copy, Debug)]
pub struct UseRecord {
    pub list: NullCommandList,
    pub set_index: u32,
    pub set: NullBindingSet,
}

struct PoolState {
    capacity: u32,
    remaining: u32,
}

#[derive(Default)]
struct NullState {
    next_id: u64,
    lists: HashSet<u64>,
    fences: HashMap<u64, bool>,
    buffers: HashMap<u64, Vec<u8>>,
    layouts: HashMap<u64, SetSchema>,
    pools: HashMap<u64, PoolState>,
    sets: HashSet<u64>,
    pipeline_layouts: HashSet<u64>,
    write_batches: Vec<WriteBatch>,
    submissions: Vec<SubmissionRecord>,
    uses: Vec<UseRecord>,
    fail_next_submit: bool,
}

impl NullState {
    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Headless [`GpuBackend`] implementation.
///
/// # Thread Safety
///
/// All state sits behind one mutex; fences use a condvar so waits block
/// without spinning and signals can come from any thread.
pub struct NullBackend {
    state: Mutex<NullState>,
    fence_cv: Condvar,
    immediate_completion: bool,
}

impl NullBackend {
    /// Creates a backend whose fences only signal when told to via
    /// [`signal_fence`](Self::signal_fence).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullState::default()),
            fence_cv: Condvar::new(),
            immediate_completion: false,
        }
    }

    /// Creates a backend that signals a submission's fence at submit
    /// time, as if the GPU finished instantly.
    pub fn with_immediate_completion() -> Self {
        Self {
            immediate_completion: true,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, NullState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns an execution queue handle.
    pub fn queue(&self) -> NullQueue {
        NullQueue(0)
    }

    /// Signals a fence, waking any thread blocked on it.
    pub fn signal_fence(&self, fence: NullFence) {
        let mut st = self.lock();
        if let Some(signaled) = st.fences.get_mut(&fence.0) {
            *signaled = true;
        }
        drop(st);
        self.fence_cv.notify_all();
        debug!("Signaled fence {:?}", fence);
    }

    /// Makes the next submission fail, to exercise the fatal-error path.
    pub fn fail_next_submit(&self) {
        self.lock().fail_next_submit = true;
    }

    /// Fabricates an image handle (image creation is external to the
    /// core, so tests mint handles here).
    pub fn make_image(&self) -> NullImage {
        NullImage(self.lock().mint())
    }

    /// Fabricates a sampler handle.
    pub fn make_sampler(&self) -> NullSampler {
        NullSampler(self.lock().mint())
    }

    /// Fabricates an acceleration structure handle.
    pub fn make_accel_struct(&self) -> NullAccelStruct {
        NullAccelStruct(self.lock().mint())
    }

    /// Returns every batched-write call recorded so far.
    pub fn write_batches(&self) -> Vec<WriteBatch> {
        self.lock().write_batches.clone()
    }

    /// Returns every queue submission recorded so far.
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.lock().submissions.clone()
    }

    /// Returns every recorded `cmd_use_binding_set` call.
    pub fn used_sets(&self) -> Vec<UseRecord> {
        self.lock().uses.clone()
    }

    /// Returns a copy of a buffer's contents, if the buffer is live.
    pub fn buffer_contents(&self, buffer: NullBuffer) -> Option<Vec<u8>> {
        self.lock().buffers.get(&buffer.0).cloned()
    }

    /// Whether a buffer has not been destroyed yet.
    pub fn buffer_is_live(&self, buffer: NullBuffer) -> bool {
        self.lock().buffers.contains_key(&buffer.0)
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for NullBackend {
    type CommandList = NullCommandList;
    type Fence = NullFence;
    type Queue = NullQueue;
    type SetLayout = NullSetLayout;
    type BindingPool = NullBindingPool;
    type BindingSet = NullBindingSet;
    type PipelineLayout = NullPipelineLayout;
    type Buffer = NullBuffer;
    type Image = NullImage;
    type Sampler = NullSampler;
    type AccelStruct = NullAccelStruct;

    fn create_command_list(&self) -> Result<NullCommandList, DeviceError> {
        let mut st = self.lock();
        let id = st.mint();
        st.lists.insert(id);
        Ok(NullCommandList(id))
    }

    fn destroy_command_list(&self, list: NullCommandList) {
        self.lock().lists.remove(&list.0);
    }

    fn reset_command_list(&self, list: NullCommandList) -> Result<(), DeviceError> {
        self.known_list(list)
    }

    fn begin_command_list(&self, list: NullCommandList) -> Result<(), DeviceError> {
        self.known_list(list)
    }

    fn end_command_list(&self, list: NullCommandList) -> Result<(), DeviceError> {
        self.known_list(list)
    }

    fn create_fence(&self, signaled: bool) -> Result<NullFence, DeviceError> {
        let mut st = self.lock();
        let id = st.mint();
        st.fences.insert(id, signaled);
        Ok(NullFence(id))
    }

    fn destroy_fence(&self, fence: NullFence) {
        self.lock().fences.remove(&fence.0);
    }

    fn reset_fence(&self, fence: NullFence) -> Result<(), DeviceError> {
        let mut st = self.lock();
        match st.fences.get_mut(&fence.0) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(DeviceError::Backend(format!("unknown fence {fence:?}"))),
        }
    }

    fn wait_fence(&self, fence: NullFence, timeout_ns: u64) -> Result<(), DeviceError> {
        let start = Instant::now();
        let timeout = Duration::from_nanos(timeout_ns);
        let mut st = self.lock();
        loop {
            match st.fences.get(&fence.0) {
                Some(true) => return Ok(()),
                Some(false) => {}
                None => {
                    return Err(DeviceError::Backend(format!("unknown fence {fence:?}")));
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DeviceError::WaitTimeout { timeout_ns });
            }
            let (guard, _) = self
                .fence_cv
                .wait_timeout(st, timeout - elapsed)
                .unwrap_or_else(|e| e.into_inner());
            st = guard;
        }
    }

    fn fence_status(&self, fence: NullFence) -> bool {
        matches!(self.lock().fences.get(&fence.0), Some(true))
    }

    fn submit(
        &self,
        list: NullCommandList,
        queue: NullQueue,
        fence: NullFence,
    ) -> Result<(), DeviceError> {
        let mut st = self.lock();
        if !st.lists.contains(&list.0) {
            return Err(DeviceError::Backend(format!("unknown command list {list:?}")));
        }
        if st.fail_next_submit {
            st.fail_next_submit = false;
            return Err(DeviceError::SubmissionRejected(
                "injected submission failure".to_string(),
            ));
        }
        st.submissions.push(SubmissionRecord { list, queue, fence });
        if self.immediate_completion {
            if let Some(signaled) = st.fences.get_mut(&fence.0) {
                *signaled = true;
            }
            drop(st);
            self.fence_cv.notify_all();
        }
        Ok(())
    }

    fn create_set_layout(
        &self,
        schema: &SetSchema,
        _flags: BindingFlagsConfig,
    ) -> Result<NullSetLayout, DeviceError> {
        let mut st = self.lock();
        let id = st.mint();
        st.layouts.insert(id, schema.clone());
        Ok(NullSetLayout(id))
    }

    fn destroy_set_layout(&self, layout: NullSetLayout) {
        self.lock().layouts.remove(&layout.0);
    }

    fn create_binding_pool(
        &self,
        _capacities: &[(BindingKind, u32)],
        max_sets: u32,
    ) -> Result<NullBindingPool, DeviceError> {
        let mut st = self.lock();
        let id = st.mint();
        st.pools.insert(
            id,
            PoolState {
                capacity: max_sets,
                remaining: max_sets,
            },
        );
        debug!("Created binding pool: max_sets={}", max_sets);
        Ok(NullBindingPool(id))
    }

    fn destroy_binding_pool(&self, pool: NullBindingPool) {
        self.lock().pools.remove(&pool.0);
    }

    fn allocate_binding_set(
        &self,
        pool: NullBindingPool,
        layout: NullSetLayout,
        _label: &str,
    ) -> Result<NullBindingSet, RhiError> {
        let mut st = self.lock();
        if !st.layouts.contains_key(&layout.0) {
            return Err(DeviceError::Backend(format!("unknown set layout {layout:?}")).into());
        }
        let pool_state = match st.pools.get_mut(&pool.0) {
            Some(p) => p,
            None => {
                return Err(DeviceError::Backend(format!("unknown pool {pool:?}")).into());
            }
        };
        if pool_state.remaining == 0 {
            let capacity = pool_state.capacity;
            return Err(ConfigError::PoolExhausted { capacity }.into());
        }
        pool_state.remaining -= 1;
        let id = st.mint();
        st.sets.insert(id);
        Ok(NullBindingSet(id))
    }

    fn create_pipeline_layout(
        &self,
        _layouts: &[NullSetLayout],
    ) -> Result<NullPipelineLayout, DeviceError> {
        let mut st = self.lock();
        let id = st.mint();
        st.pipeline_layouts.insert(id);
        Ok(NullPipelineLayout(id))
    }

    fn destroy_pipeline_layout(&self, layout: NullPipelineLayout) {
        self.lock().pipeline_layouts.remove(&layout.0);
    }

    fn update_binding_sets(&self, writes: &[SetWrite<Self>]) -> Result<(), DeviceError> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut st = self.lock();
        let mut entries = Vec::with_capacity(writes.len());
        for write in writes {
            if !st.sets.contains(&write.set.0) {
                return Err(DeviceError::Backend(format!(
                    "write targets unknown set instance {:?}",
                    write.set
                )));
            }
            entries.push(WriteRecord {
                set: write.set,
                binding: write.binding,
                array_start: write.array_start,
                kind: write.kind,
                element_count: write.payload.element_count(),
            });
        }
        debug!("Recorded batched write with {} entr(ies)", entries.len());
        st.write_batches.push(WriteBatch { entries });
        Ok(())
    }

    fn cmd_use_binding_set(
        &self,
        list: NullCommandList,
        _layout: NullPipelineLayout,
        _bind_point: BindPoint,
        set_index: u32,
        set: NullBindingSet,
    ) {
        self.lock().uses.push(UseRecord {
            list,
            set_index,
            set,
        });
    }

    fn create_uniform_buffer(&self, size: u64, _label: &str) -> Result<NullBuffer, DeviceError> {
        if size == 0 {
            return Err(DeviceError::Backend(
                "buffer size must be greater than 0".to_string(),
            ));
        }
        let mut st = self.lock();
        let id = st.mint();
        st.buffers.insert(id, vec![0u8; size as usize]);
        Ok(NullBuffer(id))
    }

    fn destroy_buffer(&self, buffer: NullBuffer) {
        self.lock().buffers.remove(&buffer.0);
        debug!("Destroyed buffer {:?}", buffer);
    }

    fn write_buffer(&self, buffer: NullBuffer, offset: u64, data: &[u8]) -> Result<(), DeviceError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut st = self.lock();
        let block = st
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| DeviceError::Backend(format!("unknown buffer {buffer:?}")))?;
        let offset = offset as usize;
        let end = offset + data.len();
        if end > block.len() {
            return Err(DeviceError::Backend(format!(
                "write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                block.len()
            )));
        }
        block[offset..end].copy_from_slice(data);
        Ok(())
    }
}

impl NullBackend {
    fn known_list(&self, list: NullCommandList) -> Result<(), DeviceError> {
        if self.lock().lists.contains(&list.0) {
            Ok(())
        } else {
            Err(DeviceError::Backend(format!("unknown command list {list:?}")))
        }
    }
}
