//! Integration tests for the frame-pipelined submission and binding core.
//!
//! Everything runs GPU-free against the headless backend, which records
//! submissions and batched writes and exposes manually-triggered fences.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};

use prism_core::EngineConfig;
use prism_frame::{ResourceBinder, RotatingUniformBuffer, SubmissionRing};
use prism_rhi::null::NullBackend;
use prism_rhi::{
    BindPoint, BindingDesc, ConfigError, DeviceError, GpuBackend, ResourceBinding, RhiError,
    SetSchema, ShaderStages,
};

fn manual_backend() -> Arc<NullBackend> {
    Arc::new(NullBackend::new())
}

fn instant_backend() -> Arc<NullBackend> {
    Arc::new(NullBackend::with_immediate_completion())
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct FrameUniforms {
    tint: [f32; 4],
    time: f32,
    _padding: [f32; 3],
}

/// Scenario A: one uniform binding, three instances, two bound with
/// different buffers, one flush -> exactly one batched call with two
/// entries.
#[test]
fn two_binds_flush_as_one_batched_call() {
    let backend = manual_backend();
    let config = EngineConfig::default();
    let mut binder = ResourceBinder::new(Arc::clone(&backend), BindPoint::Graphics, &config);

    binder
        .declare_layout(
            0,
            SetSchema::new().with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX_FRAGMENT)),
        )
        .unwrap();
    binder.allocate(0, 3, "per-frame").unwrap();
    assert_eq!(binder.instance_count(0), 3);

    let buffer_a = backend.create_uniform_buffer(64, "a").unwrap();
    let buffer_b = backend.create_uniform_buffer(64, "b").unwrap();

    binder
        .bind(
            0,
            0,
            0,
            ResourceBinding::UniformBuffer {
                buffer: buffer_a,
                offset: 0,
                range: 64,
            },
        )
        .unwrap();
    binder
        .bind(
            0,
            0,
            1,
            ResourceBinding::UniformBuffer {
                buffer: buffer_b,
                offset: 0,
                range: 64,
            },
        )
        .unwrap();
    binder.flush().unwrap();

    let batches = backend.write_batches();
    assert_eq!(batches.len(), 1, "one flush must issue one backend call");
    assert_eq!(batches[0].entries.len(), 2);

    // The queue is cleared; a second flush is a no-op.
    binder.flush().unwrap();
    assert_eq!(backend.write_batches().len(), 1);
}

/// Scenario B: acquiring N+1 slots with no submissions in between blocks
/// until a completion signal is injected from outside.
#[test]
fn extra_acquire_blocks_until_signal_injected() {
    let backend = manual_backend();
    let config = EngineConfig::default().with_frames_in_flight(2);
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();

    // First pass through the ring: every slot starts free.
    let first = ring.acquire_slot().unwrap();
    ring.advance();
    ring.acquire_slot().unwrap();
    ring.advance();

    // Cursor is back at slot 0, which is still unfinished. Inject its
    // signal from another thread after a delay.
    let fence = ring.fence(first.index());
    let injector = Arc::clone(&backend);
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        injector.signal_fence(fence);
    });

    let started = Instant::now();
    let reacquired = ring.acquire_slot().unwrap();
    let waited = started.elapsed();

    handle.join().unwrap();
    assert_eq!(reacquired.index(), first.index());
    assert!(
        waited >= Duration::from_millis(40),
        "acquire returned after {waited:?} without blocking on the signal"
    );
}

/// Scenario C: an array bind flushes as one write covering all elements.
#[test]
fn array_bind_flushes_as_single_ranged_write() {
    let backend = manual_backend();
    let config = EngineConfig::default();
    let mut binder = ResourceBinder::new(Arc::clone(&backend), BindPoint::Graphics, &config);

    binder
        .declare_layout(
            0,
            SetSchema::new().with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX)),
        )
        .unwrap();
    binder
        .declare_layout(
            1,
            SetSchema::new()
                .with(BindingDesc::sampled_image(0, ShaderStages::FRAGMENT).with_count(8)),
        )
        .unwrap();
    binder.allocate(1, 1, "materials").unwrap();

    let images: Vec<ResourceBinding<NullBackend>> = (0..3)
        .map(|_| ResourceBinding::SampledImage {
            image: backend.make_image(),
        })
        .collect();
    binder.bind_array(1, 0, 0, &images, 0).unwrap();
    binder.flush().unwrap();

    let batches = backend.write_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].entries.len(), 1, "one entry for the whole range");
    assert_eq!(batches[0].entries[0].element_count, 3);
    assert_eq!(batches[0].entries[0].array_start, 0);
}

/// Scenario D: after writing X/Y/Z with an advance after each, the write
/// target aliases the block that held X.
#[test]
fn rotation_returns_to_the_first_block() {
    let backend = manual_backend();
    let mut uniforms =
        RotatingUniformBuffer::new(Arc::clone(&backend), 3, 1, "letters").unwrap();

    let first_block = uniforms.write_target();

    for letter in [b'X', b'Y', b'Z'] {
        uniforms.write_current_bytes(&[letter]).unwrap();
        uniforms.advance();
    }

    assert_eq!(uniforms.write_target(), first_block);
    assert_eq!(backend.buffer_contents(first_block).unwrap(), vec![b'X']);
}

/// Periodicity: n advances return the cursor to the original block, for
/// several ring depths.
#[test]
fn rotation_period_matches_ring_size() {
    let backend = manual_backend();
    for n in 1..5u32 {
        let mut uniforms =
            RotatingUniformBuffer::new(Arc::clone(&backend), n, 16, "ring").unwrap();
        let original = uniforms.write_target();
        for _ in 0..n {
            uniforms.advance();
        }
        assert_eq!(uniforms.write_target(), original);
    }
}

/// No two concurrently in-flight slots ever share a ring index, across
/// more interleaved acquire/submit rounds than the ring has slots.
#[test]
fn in_flight_slots_never_share_an_index() {
    let backend = manual_backend();
    let config = EngineConfig::default().with_frames_in_flight(3);
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();

    let mut in_flight: Vec<prism_frame::SlotToken> = Vec::new();

    for round in 0..10 {
        // Retire the oldest submission once every slot is occupied, the
        // way a GPU would complete work in order.
        if in_flight.len() == ring.slot_count() {
            let oldest = in_flight.remove(0);
            backend.signal_fence(ring.fence(oldest.index()));
        }

        let token = ring.acquire_slot().unwrap();
        assert!(
            in_flight.iter().all(|t| t.index() != token.index()),
            "round {round}: slot {} was still in flight",
            token.index()
        );

        ring.finish_recording(token).unwrap();
        ring.submit(token, backend.queue()).unwrap();
        ring.advance();
        in_flight.push(token);
    }
}

/// Deferred disposal never runs before the owning slot's signal fires.
#[test]
fn deferred_disposal_waits_for_completion_signal() {
    let backend = manual_backend();
    let config = EngineConfig::default().with_frames_in_flight(2);
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();

    let staging = backend.create_uniform_buffer(128, "staging").unwrap();
    let dropped = Arc::new(AtomicBool::new(false));

    let token = ring.acquire_slot().unwrap();
    ring.finish_recording(token).unwrap();
    ring.submit(token, backend.queue()).unwrap();
    ring.defer_destroy_buffer(token, staging);
    let flag = Arc::clone(&dropped);
    ring.defer_deallocator(token, move || flag.store(true, Ordering::SeqCst));
    ring.advance();

    // A full trip around the ring, with the deferred slot still pending.
    let other = ring.acquire_slot().unwrap();
    ring.finish_recording(other).unwrap();
    ring.submit(other, backend.queue()).unwrap();
    ring.advance();

    assert!(backend.buffer_is_live(staging), "buffer died before the signal");
    assert!(!dropped.load(Ordering::SeqCst));

    // Signal completion; the next acquisition of that slot recycles it.
    backend.signal_fence(ring.fence(token.index()));
    ring.acquire_slot().unwrap();

    assert!(!backend.buffer_is_live(staging));
    assert!(dropped.load(Ordering::SeqCst));
}

/// wait_idle releases every deferred resource once all signals fired.
#[test]
fn wait_idle_runs_all_deferred_disposals() {
    let backend = instant_backend();
    let config = EngineConfig::default().with_frames_in_flight(2);
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();

    let mut buffers = Vec::new();
    for _ in 0..2 {
        let token = ring.acquire_slot().unwrap();
        let scratch = backend.create_uniform_buffer(32, "scratch").unwrap();
        ring.finish_recording(token).unwrap();
        ring.submit(token, backend.queue()).unwrap();
        ring.defer_destroy_buffer(token, scratch);
        ring.advance();
        buffers.push(scratch);
    }

    ring.wait_idle().unwrap();
    for buffer in buffers {
        assert!(!backend.buffer_is_live(buffer));
    }
}

/// K bind/bind_array calls followed by one flush produce exactly one
/// batched call carrying K entries.
#[test]
fn mixed_binds_batch_into_one_call() {
    let backend = manual_backend();
    let config = EngineConfig::default();
    let mut binder = ResourceBinder::new(Arc::clone(&backend), BindPoint::Graphics, &config);

    binder
        .declare_layout(
            0,
            SetSchema::new()
                .with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX))
                .with(BindingDesc::storage_buffer(1, ShaderStages::COMPUTE))
                .with(BindingDesc::combined_image_sampler(2, ShaderStages::FRAGMENT).with_count(4)),
        )
        .unwrap();
    binder.allocate(0, 1, "scene").unwrap();

    let ubo = backend.create_uniform_buffer(64, "ubo").unwrap();
    let ssbo = backend.create_uniform_buffer(256, "ssbo").unwrap();
    binder
        .bind(
            0,
            0,
            0,
            ResourceBinding::UniformBuffer {
                buffer: ubo,
                offset: 0,
                range: 64,
            },
        )
        .unwrap();
    binder
        .bind(
            0,
            1,
            0,
            ResourceBinding::StorageBuffer {
                buffer: ssbo,
                offset: 0,
                range: 256,
            },
        )
        .unwrap();

    let sampler = backend.make_sampler();
    let textures: Vec<ResourceBinding<NullBackend>> = (0..4)
        .map(|_| ResourceBinding::CombinedImageSampler {
            image: backend.make_image(),
            sampler,
        })
        .collect();
    binder.bind_array(0, 2, 0, &textures, 0).unwrap();

    assert_eq!(binder.pending_writes(), 3);
    binder.flush().unwrap();

    let batches = backend.write_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].entries.len(), 3);
    assert_eq!(batches[0].entries[2].element_count, 4);
}

/// A rejected submission surfaces as a fatal device error.
#[test]
fn rejected_submission_is_fatal() {
    let backend = manual_backend();
    let config = EngineConfig::default().with_frames_in_flight(2);
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();

    let token = ring.acquire_slot().unwrap();
    ring.finish_recording(token).unwrap();

    backend.fail_next_submit();
    let err = ring.submit(token, backend.queue()).unwrap_err();
    assert!(matches!(
        err,
        RhiError::Device(DeviceError::SubmissionRejected(_))
    ));
}

/// A timed-out slot wait surfaces as a fatal device error.
#[test]
fn acquire_timeout_is_fatal() {
    let backend = manual_backend();
    let config = EngineConfig::default()
        .with_frames_in_flight(1)
        .with_fence_timeout_ns(10_000_000); // 10 ms
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();

    ring.acquire_slot().unwrap();
    ring.advance();

    // The only slot is still recording and its fence never signals.
    let err = ring.acquire_slot().unwrap_err();
    assert!(matches!(
        err,
        RhiError::Device(DeviceError::WaitTimeout { .. })
    ));
}

/// A kind-mismatched bind fails before any backend call and leaves the
/// queue untouched.
#[test]
fn kind_mismatch_has_zero_side_effects() {
    let backend = manual_backend();
    let config = EngineConfig::default();
    let mut binder = ResourceBinder::new(Arc::clone(&backend), BindPoint::Graphics, &config);

    binder
        .declare_layout(
            0,
            SetSchema::new().with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX)),
        )
        .unwrap();
    binder.allocate(0, 1, "scene").unwrap();

    let err = binder
        .bind(
            0,
            0,
            0,
            ResourceBinding::SampledImage {
                image: backend.make_image(),
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RhiError::Config(ConfigError::KindMismatch { .. })
    ));

    assert_eq!(binder.pending_writes(), 0);
    binder.flush().unwrap();
    assert!(backend.write_batches().is_empty());
}

/// Full per-frame control flow over several frames: acquire, write
/// uniforms, bind, flush, use, submit, advance.
#[test]
fn full_frame_loop() {
    let backend = instant_backend();
    let config = EngineConfig::default().with_frames_in_flight(2);
    let mut ring = SubmissionRing::new(Arc::clone(&backend), &config).unwrap();
    let mut uniforms = RotatingUniformBuffer::new(
        Arc::clone(&backend),
        config.frames_in_flight,
        std::mem::size_of::<FrameUniforms>() as u64,
        "frame uniforms",
    )
    .unwrap();
    let mut binder = ResourceBinder::new(Arc::clone(&backend), BindPoint::Graphics, &config);

    binder
        .declare_layout(
            0,
            SetSchema::new().with(BindingDesc::uniform_buffer(0, ShaderStages::VERTEX_FRAGMENT)),
        )
        .unwrap();
    binder.allocate(0, 2, "per-frame").unwrap();

    // Each per-frame instance points at its own rotating block once.
    for instance in 0..2u32 {
        binder
            .bind(
                0,
                0,
                instance,
                ResourceBinding::UniformBuffer {
                    buffer: uniforms.buffer(instance as usize),
                    offset: 0,
                    range: uniforms.element_size(),
                },
            )
            .unwrap();
    }
    binder.flush().unwrap();

    for frame in 0..6u32 {
        let token = ring.acquire_slot().unwrap();

        let data = FrameUniforms {
            tint: [1.0, 0.5, 0.25, 1.0],
            time: frame as f32,
            _padding: [0.0; 3],
        };
        uniforms.write_current(&data).unwrap();

        let instance = frame % config.frames_in_flight;
        binder
            .use_at(ring.command_list(token), 0, instance)
            .unwrap();

        ring.finish_recording(token).unwrap();
        ring.submit(token, backend.queue()).unwrap();
        ring.advance();
        uniforms.advance();
    }

    ring.wait_idle().unwrap();

    assert_eq!(backend.submissions().len(), 6);
    assert_eq!(backend.used_sets().len(), 6);
    assert_eq!(backend.write_batches().len(), 1);
}
