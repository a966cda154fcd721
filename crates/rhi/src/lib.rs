//! Execution-backend abstraction (Render Hardware Interface).
//!
//! This crate defines the narrow driver surface the frame-pipelining core
//! depends on, plus two implementations:
//! - [`GpuBackend`] - the backend trait (command lists, completion
//!   signals, submission, binding sets, batched writes, uniform buffers)
//! - [`vulkan::VulkanBackend`] - the production backend over `ash`
//! - [`null::NullBackend`] - a headless backend for tests and CI

mod backend;
mod error;
mod types;

pub mod null;
pub mod vulkan;

pub use backend::GpuBackend;
pub use error::{ConfigError, DeviceError, RhiError, RhiResult};
pub use types::{
    BindPoint, BindingDesc, BindingKind, BufferBinding, ImageBinding, ResourceBinding, SetSchema,
    SetWrite, ShaderStages, WritePayload,
};

// Re-export ash types that Vulkan-backend users might need
pub use ash::vk;
