//! Command submission ring.
//!
//! This module provides the [`SubmissionRing`], a fixed ring of
//! recordable command-list slots that defines how many frames may be in
//! flight at once. It handles:
//!
//! - Per-slot command lists and completion signals
//! - Blocking slot recycling (the CPU never overwrites a list the GPU is
//!   still executing)
//! - Deferred disposal of resources the GPU may still read
//!
//! # Overview
//!
//! The ring implements a "frames in flight" pattern:
//!
//! 1. While the GPU executes slot K, the CPU records into slot K+1
//! 2. Each slot owns its command list and completion fence
//! 3. Acquiring a slot blocks until its previous use has completed
//!
//! Work in one slot executes in recording order on the GPU; across slots
//! there is no ordering guarantee, which is exactly why per-frame
//! resources must be rotated as deeply as the ring.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use prism_core::EngineConfig;
//! use prism_frame::SubmissionRing;
//! use prism_rhi::null::NullBackend;
//!
//! # fn main() -> Result<(), prism_rhi::RhiError> {
//! let backend = Arc::new(NullBackend::with_immediate_completion());
//! let config = EngineConfig::default();
//! let mut ring = SubmissionRing::new(Arc::clone(&backend), &config)?;
//!
//! for _ in 0..3 {
//!     let slot = ring.acquire_slot()?;
//!     // ... record commands into ring.command_list(slot) ...
//!     ring.finish_recording(slot)?;
//!     ring.submit(slot, backend.queue())?;
//!     ring.advance();
//! }
//!
//! ring.wait_idle()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use prism_core::EngineConfig;
use prism_rhi::{ConfigError, GpuBackend, RhiResult};

/// A resource whose destruction is deferred until a slot's completion
/// signal fires.
///
/// Mirrors the two ways work-in-flight owns things: a backend buffer, or
/// an arbitrary deallocator closure for everything else.
pub enum Disposal<B: GpuBackend> {
    /// A backend buffer, destroyed through the backend.
    Buffer(B::Buffer),
    /// An arbitrary deallocator, run when the slot completes.
    Deallocator(Box<dyn FnOnce() + Send>),
}

fn run_disposal<B: GpuBackend>(backend: &B, disposal: Disposal<B>) {
    match disposal {
        Disposal::Buffer(buffer) => backend.destroy_buffer(buffer),
        Disposal::Deallocator(f) => f(),
    }
}

/// Identifies one acquisition of a ring slot.
///
/// A token stays valid until the same slot is acquired again; the
/// generation ties it to one specific acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotToken {
    index: usize,
    generation: u64,
}

impl SlotToken {
    /// Ring index of the slot.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Acquisition generation of the slot.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    /// Safe to record; nothing pending on the fence.
    Free,
    /// Acquired and recording.
    Recording,
    /// Recording ended, not yet submitted.
    Recorded,
    /// Submitted; the fence signals when the GPU finishes.
    Submitted,
}

struct FrameSlot<B: GpuBackend> {
    list: B::CommandList,
    fence: B::Fence,
    generation: u64,
    state: SlotState,
    disposals: Vec<Disposal<B>>,
}

/// Fixed ring of recordable command-list slots.
///
/// Slots are created once at construction, reused forever, and destroyed
/// when the ring drops. The ring size is the number of frames that may be
/// in flight concurrently.
///
/// # Thread Safety
///
/// The ring follows the single-writer model: one thread records and
/// submits. The backend may signal fences from other threads.
///
/// # Contract
///
/// Token misuse (a stale generation, skipping `advance`) is not detected
/// at runtime in release builds; it manifests as rendering corruption.
/// Debug builds assert on stale tokens.
pub struct SubmissionRing<B: GpuBackend> {
    backend: Arc<B>,
    slots: Vec<FrameSlot<B>>,
    cursor: usize,
    timeout_ns: u64,
}

impl<B: GpuBackend> std::fmt::Debug for SubmissionRing<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionRing")
            .field("slots", &self.slots.len())
            .field("cursor", &self.cursor)
            .field("timeout_ns", &self.timeout_ns)
            .finish()
    }
}

impl<B: GpuBackend> SubmissionRing<B> {
    /// Creates a ring with `config.frames_in_flight` slots.
    ///
    /// Each slot gets a command list and a fence created signaled, so the
    /// first pass through the ring never blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured slot count is zero or any
    /// backend object creation fails.
    pub fn new(backend: Arc<B>, config: &EngineConfig) -> RhiResult<Self> {
        let count = config.frames_in_flight;
        if count == 0 {
            return Err(ConfigError::InvalidFramesInFlight(count).into());
        }

        let mut slots = Vec::with_capacity(count as usize);
        for i in 0..count {
            let list = backend.create_command_list()?;
            let fence = backend.create_fence(true)?;
            debug!("Created frame slot {}", i);
            slots.push(FrameSlot {
                list,
                fence,
                generation: 0,
                state: SlotState::Free,
                disposals: Vec::new(),
            });
        }

        info!("Submission ring created with {} slot(s) in flight", count);

        Ok(Self {
            backend,
            slots,
            cursor: 0,
            timeout_ns: config.fence_timeout_ns,
        })
    }

    /// Acquires the slot at the current cursor for recording.
    ///
    /// Blocks on the slot's completion signal if its previous use has not
    /// finished, then runs the slot's deferred disposals and resets and
    /// begins its command list. The returned list is guaranteed safe to
    /// re-record.
    ///
    /// # Errors
    ///
    /// A timed-out wait is fatal (treated as device loss) and is not
    /// retried.
    pub fn acquire_slot(&mut self) -> RhiResult<SlotToken> {
        let index = self.cursor;

        if self.slots[index].state != SlotState::Free {
            self.backend
                .wait_fence(self.slots[index].fence, self.timeout_ns)?;
        }

        let slot = &mut self.slots[index];
        for disposal in slot.disposals.drain(..) {
            run_disposal(&*self.backend, disposal);
        }

        self.backend.reset_fence(slot.fence)?;
        self.backend.reset_command_list(slot.list)?;
        self.backend.begin_command_list(slot.list)?;

        slot.generation += 1;
        slot.state = SlotState::Recording;

        Ok(SlotToken {
            index,
            generation: slot.generation,
        })
    }

    /// Marks recording complete for the slot.
    pub fn finish_recording(&mut self, token: SlotToken) -> RhiResult<()> {
        self.check_token(token);
        let slot = &mut self.slots[token.index];
        self.backend.end_command_list(slot.list)?;
        slot.state = SlotState::Recorded;
        Ok(())
    }

    /// Submits the slot's recorded list to `queue`.
    ///
    /// The slot's fence becomes the submission's completion signal; any
    /// deferred disposals attached to the slot now live until that fence
    /// fires.
    ///
    /// # Errors
    ///
    /// A rejected submission is fatal for the session and is not retried.
    pub fn submit(&mut self, token: SlotToken, queue: B::Queue) -> RhiResult<()> {
        self.check_token(token);
        let slot = &mut self.slots[token.index];
        self.backend.submit(slot.list, queue, slot.fence)?;
        slot.state = SlotState::Submitted;
        debug!(
            "Submitted slot {} (generation {})",
            token.index, token.generation
        );
        Ok(())
    }

    /// Transfers ownership of a resource to the slot; it is destroyed
    /// only after the slot's completion signal fires.
    pub fn defer_disposal(&mut self, token: SlotToken, disposal: Disposal<B>) {
        self.check_token(token);
        self.slots[token.index].disposals.push(disposal);
    }

    /// Defers destruction of a backend buffer.
    pub fn defer_destroy_buffer(&mut self, token: SlotToken, buffer: B::Buffer) {
        self.defer_disposal(token, Disposal::Buffer(buffer));
    }

    /// Defers an arbitrary deallocator.
    pub fn defer_deallocator(
        &mut self,
        token: SlotToken,
        deallocator: impl FnOnce() + Send + 'static,
    ) {
        self.defer_disposal(token, Disposal::Deallocator(Box::new(deallocator)));
    }

    /// Moves the cursor to the next slot index, modulo the ring size.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Blocks until every submitted slot's completion signal has fired,
    /// then runs all deferred disposals. Used at shutdown.
    ///
    /// # Errors
    ///
    /// A timed-out wait is fatal and is not retried.
    pub fn wait_idle(&mut self) -> RhiResult<()> {
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted {
                self.backend.wait_fence(slot.fence, self.timeout_ns)?;
                slot.state = SlotState::Free;
            }
        }
        for slot in &mut self.slots {
            for disposal in slot.disposals.drain(..) {
                run_disposal(&*self.backend, disposal);
            }
        }
        debug!("Submission ring idle");
        Ok(())
    }

    /// Returns the command list of an acquired slot.
    #[inline]
    pub fn command_list(&self, token: SlotToken) -> B::CommandList {
        self.check_token(token);
        self.slots[token.index].list
    }

    /// Returns the completion fence of the slot at `index`.
    #[inline]
    pub fn fence(&self, index: usize) -> B::Fence {
        self.slots[index].fence
    }

    /// Returns the current cursor position.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.cursor
    }

    /// Returns the number of slots in the ring.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the acquisition generation of the slot at `index`.
    #[inline]
    pub fn generation(&self, index: usize) -> u64 {
        self.slots[index].generation
    }

    #[inline]
    fn check_token(&self, token: SlotToken) {
        debug_assert!(token.index < self.slots.len(), "slot index out of range");
        debug_assert_eq!(
            token.generation, self.slots[token.index].generation,
            "stale slot token: the slot has been re-acquired"
        );
    }
}

impl<B: GpuBackend> Drop for SubmissionRing<B> {
    fn drop(&mut self) {
        // Callers wait_idle() before dropping; anything still deferred is
        // released now.
        for slot in &mut self.slots {
            for disposal in slot.disposals.drain(..) {
                run_disposal(&*self.backend, disposal);
            }
        }
        for slot in &self.slots {
            self.backend.destroy_fence(slot.fence);
            self.backend.destroy_command_list(slot.list);
        }
        debug!("Submission ring destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::null::NullBackend;

    fn ring_with(frames: u32) -> (Arc<NullBackend>, SubmissionRing<NullBackend>) {
        let backend = Arc::new(NullBackend::with_immediate_completion());
        let config = EngineConfig::default().with_frames_in_flight(frames);
        let ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();
        (backend, ring)
    }

    #[test]
    fn test_zero_slots_is_a_config_error() {
        let backend = Arc::new(NullBackend::new());
        let config = EngineConfig::default().with_frames_in_flight(0);
        let err = SubmissionRing::new(backend, &config).unwrap_err();
        assert!(matches!(
            err,
            prism_rhi::RhiError::Config(ConfigError::InvalidFramesInFlight(0))
        ));
    }

    #[test]
    fn test_ring_cycles_through_all_slots() {
        let (backend, mut ring) = ring_with(3);
        assert_eq!(ring.slot_count(), 3);

        for frame in 0..9 {
            assert_eq!(ring.current_index(), frame % 3);
            let slot = ring.acquire_slot().unwrap();
            assert_eq!(slot.index(), frame % 3);
            ring.finish_recording(slot).unwrap();
            ring.submit(slot, backend.queue()).unwrap();
            ring.advance();
        }

        assert_eq!(backend.submissions().len(), 9);
    }

    #[test]
    fn test_generation_increments_per_acquisition() {
        let (backend, mut ring) = ring_with(2);

        let first = ring.acquire_slot().unwrap();
        ring.finish_recording(first).unwrap();
        ring.submit(first, backend.queue()).unwrap();
        ring.advance();
        ring.advance(); // back to slot 0

        let second = ring.acquire_slot().unwrap();
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), first.generation() + 1);
    }

    #[test]
    fn test_wait_idle_completes_after_submissions() {
        let (backend, mut ring) = ring_with(2);

        for _ in 0..2 {
            let slot = ring.acquire_slot().unwrap();
            ring.finish_recording(slot).unwrap();
            ring.submit(slot, backend.queue()).unwrap();
            ring.advance();
        }

        ring.wait_idle().unwrap();
    }

    #[test]
    fn test_ring_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SubmissionRing<NullBackend>>();
    }
}
