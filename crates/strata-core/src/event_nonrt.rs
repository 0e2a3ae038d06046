//! Non-real-time events
//!
//! Heavier operations (session and loop-file I/O, voice add/remove,
//! parameter queries) go through a separate queue drained by the
//! engine's own service loop, which is allowed to block and allocate.
//! Each request that produces an answer carries a crossbeam reply
//! sender; the caller decides whether to wait on it.

use std::path::PathBuf;

use crossbeam::channel::Sender;

use crate::engine::SessionError;
use crate::looper::ControlId;

/// Result type used for non-RT replies
pub type NonRtResult = Result<(), SessionError>;

/// Events processed outside the audio thread
pub enum EventNonRT {
    /// Add a new voice with `secs` seconds of loop memory
    AddLoop {
        secs: f32,
        reply: Option<Sender<NonRtResult>>,
    },
    /// Remove the voice at `index`
    RemoveLoop {
        index: usize,
        reply: Option<Sender<NonRtResult>>,
    },
    /// Load a WAV file into a voice's loop
    LoadLoop {
        voice: usize,
        path: PathBuf,
        reply: Option<Sender<NonRtResult>>,
    },
    /// Save a voice's current loop to a WAV file
    SaveLoop {
        voice: usize,
        path: PathBuf,
        reply: Option<Sender<NonRtResult>>,
    },
    /// Ask for a control value (answered from the lock-free snapshot)
    GetParam {
        voice: i32,
        control: ControlId,
        reply: Sender<f32>,
    },
    /// Serialize the session to a file
    SaveSession {
        path: PathBuf,
        reply: Option<Sender<NonRtResult>>,
    },
    /// Restore a previously saved session
    LoadSession {
        path: PathBuf,
        reply: Option<Sender<NonRtResult>>,
    },
    /// Register for push notifications; the hub's receiver comes back
    /// on the reply channel
    Register {
        reply: Sender<crossbeam::channel::Receiver<crate::engine::Notification>>,
    },
    /// Liveness check: replies with the current voice count
    Ping { reply: Sender<usize> },
    /// Stop the service loop
    Quit,
}
