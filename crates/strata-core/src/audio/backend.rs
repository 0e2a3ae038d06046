//! Audio backend trait: the driver-facing boundary
//!
//! The native driver connection (JACK, CoreAudio, a plugin host's
//! process call) lives outside this crate. Whatever it is, it owns the
//! hard-real-time callback and drives the engine the same way: once
//! per block it assembles an [`EnginePorts`] view over its port
//! buffers and calls [`Engine::process`]. Nothing else crosses the
//! boundary.
//!
//! [`EnginePorts`]: crate::engine::EnginePorts
//! [`Engine::process`]: crate::engine::Engine::process

use super::error::AudioResult;

/// Connection to a platform audio driver
///
/// Implementations are expected to call `Engine::process(frames,
/// &mut ports)` from their realtime callback after `activate`
/// succeeds, and to stop doing so once `deactivate` returns. All
/// errors are startup-fatal ([`crate::audio::AudioError`]).
pub trait AudioBackend {
    /// Sample rate the driver runs at
    fn sample_rate(&self) -> u32;

    /// Largest block the callback will ever deliver
    fn max_block_frames(&self) -> usize;

    /// Connect and start the realtime callback
    fn activate(&mut self) -> AudioResult<()>;

    /// Stop the callback and release the device
    fn deactivate(&mut self);
}
