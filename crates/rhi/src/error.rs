//! RHI-specific error types.
//!
//! Failures fall into two categories with different blast radii:
//!
//! - [`ConfigError`] — a mistake in how the core was set up or driven
//!   (schema mismatch, pool exhaustion, declare/allocate misuse). These
//!   fail fast at the call site and are never retried.
//! - [`DeviceError`] — the GPU session itself is broken (rejected
//!   submission, timed-out wait). These are fatal for the whole session;
//!   the owning context decides whether to tear down and rebuild.

use thiserror::Error;

use crate::types::BindingKind;

/// Configuration and misuse errors. Fail-fast, non-recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The submission ring must hold at least one slot.
    #[error("invalid frames-in-flight count: {0}")]
    InvalidFramesInFlight(u32),

    /// A rotating buffer must hold at least one block.
    #[error("invalid ring size: {0}")]
    InvalidRingSize(u32),

    /// Backing blocks cannot be zero-sized.
    #[error("element size must be greater than 0")]
    InvalidElementSize,

    /// A write larger than the backing block was requested.
    #[error("write of {size} bytes exceeds block capacity of {capacity} bytes")]
    WriteTooLarge { size: u64, capacity: u64 },

    /// A set was declared with no bindings.
    #[error("set {set} has an empty binding schema")]
    EmptySchema { set: u32 },

    /// A schema declares the same binding index twice.
    #[error("set {set} declares binding {binding} more than once")]
    DuplicateBinding { set: u32, binding: u32 },

    /// A set index was declared twice.
    #[error("layout for set {set} was already declared")]
    LayoutRedeclared { set: u32 },

    /// Layouts are immutable once allocation has begun.
    #[error("cannot declare set {set}: instances have already been allocated")]
    DeclareAfterAllocate { set: u32 },

    /// The referenced set index has no declared layout.
    #[error("set {set} has not been declared")]
    UnknownSet { set: u32 },

    /// The referenced binding does not exist in the set's schema.
    #[error("binding {binding} does not exist in set {set}")]
    UnknownBinding { set: u32, binding: u32 },

    /// The referenced instance was never allocated.
    #[error("instance {instance} of set {set} has not been allocated")]
    InstanceNotAllocated { set: u32, instance: u32 },

    /// The bound resource's kind does not match the declared schema.
    #[error(
        "resource kind {actual:?} does not match {expected:?} declared for \
         binding {binding} of set {set}"
    )]
    KindMismatch {
        set: u32,
        binding: u32,
        expected: BindingKind,
        actual: BindingKind,
    },

    /// An array bind reaches past the binding's declared element count.
    #[error(
        "array write of {count} element(s) at offset {start} exceeds the \
         {declared} declared for binding {binding} of set {set}"
    )]
    ArrayOutOfBounds {
        set: u32,
        binding: u32,
        start: u32,
        count: u32,
        declared: u32,
    },

    /// The fixed-capacity set-instance pool is out of space.
    #[error("set instance pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: u32 },

    /// A set instance was used before any allocation happened.
    #[error("no set instances have been allocated")]
    NoAllocations,
}

/// Device-level errors. Fatal for the whole GPU session.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The execution queue rejected a submission.
    #[error("queue submission rejected: {0}")]
    SubmissionRejected(String),

    /// A completion-signal wait exceeded the engine-wide timeout.
    #[error("completion wait timed out after {timeout_ns} ns")]
    WaitTimeout { timeout_ns: u64 },

    /// The device was lost.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Combined RHI error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Configuration or misuse error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Fatal device error.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::KindMismatch {
            set: 0,
            binding: 2,
            expected: BindingKind::UniformBuffer,
            actual: BindingKind::SampledImage,
        };
        let msg = err.to_string();
        assert!(msg.contains("binding 2"));
        assert!(msg.contains("set 0"));
    }

    #[test]
    fn test_array_bounds_display_reports_range() {
        let err = ConfigError::ArrayOutOfBounds {
            set: 1,
            binding: 0,
            start: 2,
            count: 3,
            declared: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 element(s)"));
        assert!(msg.contains("offset 2"));
    }

    #[test]
    fn test_device_error_wraps_into_rhi_error() {
        let err: RhiError = DeviceError::WaitTimeout { timeout_ns: 100 }.into();
        assert!(matches!(
            err,
            RhiError::Device(DeviceError::WaitTimeout { timeout_ns: 100 })
        ));
    }
}
