//! Strata: a real-time audio looping engine
//!
//! Strata records, overdubs, multiplies, inserts, reverses and
//! otherwise transforms live audio into independently controlled loop
//! *voices*, sample-accurately and without audible glitches, while
//! staying synchronizable to an external clock and controllable from
//! any number of asynchronous producers (network, MIDI, GUI).
//!
//! ## Architecture
//!
//! - [`ring::SampleRing`]: power-of-two circular sample storage, one
//!   per voice.
//! - [`chunk::ChunkArena`]: fixed pool of loop versions forming each
//!   voice's undo/redo history, addressed by generation-tagged ids.
//! - [`looper::Looper`]: one voice, the full record/overdub/multiply/
//!   insert/replace/substitute/mute/scratch/delay state machine with
//!   fractional-position playback, crossfaded transitions and lazy
//!   frontfill/backfill.
//! - [`event`]: fixed-size RT events, resolved to in-block sample
//!   offsets, delivered through a wait-free SPSC queue.
//! - [`engine::Engine`]: drives all voices from the audio callback,
//!   applying events at their exact frame positions; its non-RT
//!   sibling [`engine::EngineService`] handles session and file work.
//!
//! The audio-processing path never blocks, never allocates, and never
//! takes a lock a non-audio thread can hold indefinitely: cross-thread
//! handoff into the callback is a single-producer/single-consumer ring
//! buffer, shared state is read through atomics, and the one mutex on
//! the path is only ever try-locked.

pub mod audio;
pub mod chunk;
pub mod command_map;
pub mod engine;
pub mod event;
pub mod event_nonrt;
pub mod looper;
pub mod ring;
pub mod types;

pub use command_map::CommandMap;
pub use engine::{
    Engine, EngineConfig, EngineHandle, EnginePorts, EngineService, EngineSetup, Notification,
    SessionError, SessionSnapshot, VoicePorts,
};
pub use event::{Command, Event, EventKind, EventTime};
pub use event_nonrt::EventNonRT;
pub use looper::{ControlId, Looper, RunContext, VoiceAtomics, VoiceIo};
pub use ring::SampleRing;
pub use types::{LooperState, QuantizeMode, Sample, SyncSource, VoiceTarget};
