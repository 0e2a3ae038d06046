//! Audio driver boundary error types

use thiserror::Error;

/// Errors from the audio-driver boundary
///
/// All of these are fatal at startup: the engine reports them to the
/// caller as initialization failure and does not attempt recovery
/// mid-session.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Could not connect to or open the audio device
    #[error("cannot open audio device: {0}")]
    DeviceOpen(String),

    /// The driver rejected the process callback registration
    #[error("cannot register process callback: {0}")]
    CallbackRegistration(String),

    /// Creating an input/output port for a voice failed
    #[error("cannot create port '{0}'")]
    PortCreation(String),

    /// The driver reported an unusable configuration
    #[error("unsupported audio configuration: {0}")]
    BadConfig(String),
}

/// Result type for audio boundary operations
pub type AudioResult<T> = Result<T, AudioError>;
