//! Rotating per-frame buffers.
//!
//! Per-frame mutable data needs one backing block per frame in flight so
//! CPU writes never alias a block the GPU is still reading. This module
//! provides:
//!
//! - [`RotatingSlots`] - the bare N-blocks-plus-cursor primitive
//! - [`RotatingUniformBuffer`] - N backend uniform buffers rotated by the
//!   same discipline, with typed writes
//!
//! The cursor advances exactly once per logical frame, through
//! [`advance`](RotatingUniformBuffer::advance), after the frame's copy
//! has been issued. The block written this frame is the same block that
//! work recorded this frame reads; blocks written in earlier frames stay
//! untouched until the cursor wraps. With n blocks that leaves n-1 frames
//! of slack between the block being written and the block last consumed
//! by the GPU.
//!
//! Misuse - advancing twice in one frame, or writing without recording a
//! matching read - is not detected at runtime; it shows up as rendering
//! corruption. That is a documented caller contract, chosen over
//! per-frame bookkeeping.

use std::sync::Arc;

use bytemuck::Pod;
use tracing::info;

use prism_rhi::{ConfigError, GpuBackend, RhiResult};

/// N blocks and one cursor.
///
/// The bare rotation primitive, usable with any per-frame payload.
#[derive(Debug)]
pub struct RotatingSlots<T> {
    blocks: Vec<T>,
    cursor: usize,
}

impl<T> RotatingSlots<T> {
    /// Wraps existing blocks. Fails on an empty block list.
    pub fn from_blocks(blocks: Vec<T>) -> Result<Self, ConfigError> {
        if blocks.is_empty() {
            return Err(ConfigError::InvalidRingSize(0));
        }
        Ok(Self { blocks, cursor: 0 })
    }

    /// Number of blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; construction rejects empty block lists.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Current cursor position.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The block at the cursor.
    #[inline]
    pub fn current(&self) -> &T {
        &self.blocks[self.cursor]
    }

    /// Mutable access to the block at the cursor.
    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.blocks[self.cursor]
    }

    /// The block at an explicit index.
    #[inline]
    pub fn get(&self, index: usize) -> &T {
        &self.blocks[index]
    }

    /// Moves the cursor forward by one, modulo the block count.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.blocks.len();
    }

    fn into_blocks(self) -> Vec<T> {
        self.blocks
    }
}

/// N backend uniform buffers for one piece of per-frame mutable data.
pub struct RotatingUniformBuffer<B: GpuBackend> {
    backend: Arc<B>,
    slots: RotatingSlots<B::Buffer>,
    element_size: u64,
}

impl<B: GpuBackend> RotatingUniformBuffer<B> {
    /// Allocates `ring_size` backing blocks of `element_size` bytes each.
    ///
    /// `ring_size` typically matches the number of frames in flight; see
    /// [`prism_core::EngineConfig::frames_in_flight`].
    ///
    /// # Errors
    ///
    /// Fails on a zero ring size or element size, or if buffer creation
    /// fails.
    pub fn new(
        backend: Arc<B>,
        ring_size: u32,
        element_size: u64,
        label: &str,
    ) -> RhiResult<Self> {
        if ring_size == 0 {
            return Err(ConfigError::InvalidRingSize(0).into());
        }
        if element_size == 0 {
            return Err(ConfigError::InvalidElementSize.into());
        }

        let blocks = (0..ring_size)
            .map(|i| backend.create_uniform_buffer(element_size, &format!("{label} {i}")))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Rotating uniform buffer '{}': {} block(s) of {} bytes",
            label, ring_size, element_size
        );

        Ok(Self {
            backend,
            slots: RotatingSlots::from_blocks(blocks)?,
            element_size,
        })
    }

    /// The block CPU writes target this frame.
    #[inline]
    pub fn write_target(&self) -> B::Buffer {
        *self.slots.current()
    }

    /// The block work recorded this frame reads - the same block as
    /// [`write_target`](Self::write_target) by design.
    #[inline]
    pub fn read_target(&self) -> B::Buffer {
        *self.slots.current()
    }

    /// The block at an explicit ring index.
    #[inline]
    pub fn buffer(&self, index: usize) -> B::Buffer {
        *self.slots.get(index)
    }

    /// Writes a plain-old-data value into the current block.
    ///
    /// # Errors
    ///
    /// Fails if the value is larger than the block.
    pub fn write_current<T: Pod>(&self, value: &T) -> RhiResult<()> {
        self.write_current_bytes(bytemuck::bytes_of(value))
    }

    /// Writes raw bytes into the current block at offset 0.
    pub fn write_current_bytes(&self, data: &[u8]) -> RhiResult<()> {
        if data.len() as u64 > self.element_size {
            return Err(ConfigError::WriteTooLarge {
                size: data.len() as u64,
                capacity: self.element_size,
            }
            .into());
        }
        self.backend
            .write_buffer(*self.slots.current(), 0, data)?;
        Ok(())
    }

    /// Moves the cursor forward by one, modulo the ring size.
    ///
    /// Call exactly once per completed frame, after the frame's copy has
    /// been issued.
    pub fn advance(&mut self) {
        self.slots.advance();
    }

    /// Number of backing blocks.
    #[inline]
    pub fn ring_size(&self) -> usize {
        self.slots.len()
    }

    /// Size of each backing block in bytes.
    #[inline]
    pub fn element_size(&self) -> u64 {
        self.element_size
    }
}

impl<B: GpuBackend> Drop for RotatingUniformBuffer<B> {
    fn drop(&mut self) {
        let slots = std::mem::replace(
            &mut self.slots,
            RotatingSlots {
                blocks: Vec::new(),
                cursor: 0,
            },
        );
        for buffer in slots.into_blocks() {
            self.backend.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_rhi::null::NullBackend;

    #[test]
    fn test_rotating_slots_periodicity() {
        let mut slots = RotatingSlots::from_blocks(vec!["a", "b", "c"]).unwrap();
        let original = *slots.current();

        for _ in 0..3 {
            slots.advance();
        }
        assert_eq!(*slots.current(), original);
    }

    #[test]
    fn test_rotating_slots_rejects_empty() {
        let err = RotatingSlots::<u32>::from_blocks(Vec::new()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidRingSize(0));
    }

    #[test]
    fn test_write_and_read_target_alias() {
        let backend = Arc::new(NullBackend::new());
        let ring = RotatingUniformBuffer::new(backend, 2, 64, "camera").unwrap();
        assert_eq!(ring.write_target(), ring.read_target());
    }

    #[test]
    fn test_zero_sizes_are_config_errors() {
        let backend = Arc::new(NullBackend::new());
        assert!(RotatingUniformBuffer::new(Arc::clone(&backend), 0, 64, "x").is_err());
        assert!(RotatingUniformBuffer::new(Arc::clone(&backend), 2, 0, "x").is_err());
    }

    #[test]
    fn test_oversized_write_fails() {
        let backend = Arc::new(NullBackend::new());
        let ring = RotatingUniformBuffer::new(backend, 2, 4, "small").unwrap();
        let err = ring.write_current_bytes(&[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            prism_rhi::RhiError::Config(ConfigError::WriteTooLarge {
                size: 8,
                capacity: 4,
            })
        ));
    }

    #[test]
    fn test_blocks_destroyed_on_drop() {
        let backend = Arc::new(NullBackend::new());
        let ring = RotatingUniformBuffer::new(Arc::clone(&backend), 3, 16, "tmp").unwrap();
        let blocks: Vec<_> = (0..3).map(|i| ring.buffer(i)).collect();
        drop(ring);

        for block in blocks {
            assert!(!backend.buffer_is_live(block));
        }
    }
}
