//! Frame-pipelined command submission and resource binding.
//!
//! This crate holds the three managers that coordinate CPU recording
//! with asynchronous GPU execution, all generic over
//! [`prism_rhi::GpuBackend`]:
//!
//! - [`SubmissionRing`] - recycles command-recording slots across frames
//!   in flight and defers resource destruction until GPU completion
//! - [`ResourceBinder`] - declares binding schemas, allocates set
//!   instances from a fixed pool, and batches binding writes into single
//!   backend calls
//! - [`RotatingUniformBuffer`] - rotates per-frame mutable buffers so CPU
//!   writes never alias GPU reads
//!
//! # Per-frame control flow
//!
//! ```text
//! 1. ring.acquire_slot()            (blocks until the slot's GPU work is done)
//! 2. uniforms.write_current(&data)  (fill this frame's block)
//! 3. binder.bind(...) / bind_array(...)
//! 4. binder.flush()                 (one batched backend call)
//! 5. binder.use_at(list, ...)       (record set usage)
//! 6. ... record draws/dispatches (external) ...
//! 7. ring.finish_recording(slot); ring.submit(slot, queue)
//! 8. ring.advance(); uniforms.advance()
//! ```

pub mod binder;
pub mod ring;
pub mod rotating;

pub use binder::ResourceBinder;
pub use ring::{Disposal, SlotToken, SubmissionRing};
pub use rotating::{RotatingSlots, RotatingUniformBuffer};
