//! Engine configuration.
//!
//! All capability toggles live in one immutable [`EngineConfig`] value that
//! is passed to each component at construction. There is no process-global
//! mutable state.

/// Descriptor binding flags applied to every declared set layout.
///
/// Driver support for these flags differs between platforms (desktop
/// drivers generally support both, some mobile drivers support neither),
/// so they are plain configuration rather than a compile-time choice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingFlagsConfig {
    /// Allow set instances to be used while some declared bindings hold
    /// no resource.
    pub partially_bound: bool,
    /// Allow updating bindings that are not consumed by pending command
    /// lists.
    pub update_while_pending: bool,
}

impl Default for BindingFlagsConfig {
    fn default() -> Self {
        Self {
            partially_bound: true,
            update_while_pending: true,
        }
    }
}

/// Immutable engine configuration, fixed for the lifetime of a GPU session.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Number of frames that may be in flight concurrently. Sizes the
    /// submission ring; per-frame buffers are typically rotated with the
    /// same depth.
    pub frames_in_flight: u32,
    /// Engine-wide timeout for completion-signal waits, in nanoseconds.
    /// A timed-out wait is treated as device loss.
    pub fence_timeout_ns: u64,
    /// Total number of set instances the binder's allocation pool can
    /// hold across all declared layouts. Exhaustion is a configuration
    /// error, not a recoverable condition.
    pub set_instance_capacity: u32,
    /// Binding flags applied to declared set layouts.
    pub binding_flags: BindingFlagsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ns: 5_000_000_000,
            set_instance_capacity: 4096,
            binding_flags: BindingFlagsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Returns the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Sets the completion-signal wait timeout in nanoseconds.
    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Sets the set-instance pool capacity.
    pub fn with_set_instance_capacity(mut self, capacity: u32) -> Self {
        self.set_instance_capacity = capacity;
        self
    }

    /// Sets the descriptor binding flags.
    pub fn with_binding_flags(mut self, flags: BindingFlagsConfig) -> Self {
        self.binding_flags = flags;
        self
    }
}
