//! Real-time events and the lock-free queue feeding the audio thread
//!
//! Producers (network, MIDI, GUI, all outside this crate) construct
//! small fixed-size [`Event`] records and push them into an `rtrb`
//! ring buffer. The audio thread drains the queue once per block and
//! applies each event to its target voice at an exact frame offset.
//!
//! Events carry either an already-resolved in-block frame position
//! (when pushed from inside the audio path) or a wall-clock timestamp
//! that the [`EventGenerator`] maps to a frame offset using the ratio
//! of samples processed to wall-clock duration of the previous block.
//!
//! # Real-Time Safety
//!
//! The `rtrb` ringbuffer is wait-free on both ends and allocated once
//! at startup. A push into a full queue fails and returns the event to
//! the caller; it is counted and dropped, never retried (a retry could
//! reorder commands).

use std::time::Instant;

use crate::looper::ControlId;
use crate::types::VoiceTarget;

/// Capacity of the RT event queue
///
/// Command bursts from scripted control surfaces can be large; 1024
/// gives ample headroom while the queue stays a few tens of KB.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// What an event means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Command button pressed
    CommandDown,
    /// Command button released
    CommandUp,
    /// Momentary command (press and release in one event)
    CommandHit,
    /// Set a per-voice control value
    ControlSet,
    /// Ask the engine to republish a control value
    ControlRequest,
    /// Set an engine-global control value
    GlobalControlSet,
    /// External sync pulse (e.g. MIDI clock tick)
    SyncTick,
}

/// The command vocabulary of the loop state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Undo = 0,
    Redo,
    Replace,
    Reverse,
    Scratch,
    Record,
    Overdub,
    Multiply,
    Insert,
    Mute,
    Delay,
    RedoToggle,
    QuantizeToggle,
    RoundToggle,
    OneShot,
    Trigger,
    Substitute,
}

impl Command {
    pub fn from_index(idx: u8) -> Option<Self> {
        use Command::*;
        Some(match idx {
            0 => Undo,
            1 => Redo,
            2 => Replace,
            3 => Reverse,
            4 => Scratch,
            5 => Record,
            6 => Overdub,
            7 => Multiply,
            8 => Insert,
            9 => Mute,
            10 => Delay,
            11 => RedoToggle,
            12 => QuantizeToggle,
            13 => RoundToggle,
            14 => OneShot,
            15 => Trigger,
            16 => Substitute,
            _ => return None,
        })
    }

    /// Canonical command name used by external binding layers
    pub fn name(&self) -> &'static str {
        use Command::*;
        match self {
            Undo => "undo",
            Redo => "redo",
            Replace => "replace",
            Reverse => "reverse",
            Scratch => "scratch",
            Record => "record",
            Overdub => "overdub",
            Multiply => "multiply",
            Insert => "insert",
            Mute => "mute",
            Delay => "delay",
            RedoToggle => "redo_toggle",
            QuantizeToggle => "quantize_toggle",
            RoundToggle => "round_toggle",
            OneShot => "oneshot",
            Trigger => "trigger",
            Substitute => "substitute",
        }
    }
}

/// When inside the current block an event takes effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventTime {
    /// Wall-clock seconds since the engine clock's epoch; resolved to
    /// a frame offset by the [`EventGenerator`] at drain time
    Timestamp(f64),
    /// Already-resolved offset within the block being processed
    Frame(u32),
}

/// A command or control-change message for the audio thread
///
/// Fixed-size and `Copy` so it can travel through the lock-free queue
/// without touching the allocator.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub command: Option<Command>,
    pub control: Option<ControlId>,
    pub value: f32,
    pub target: VoiceTarget,
    pub time: EventTime,
    /// Opaque producer tag echoed in notifications so a producer can
    /// suppress notifying itself of its own change
    pub source_tag: u32,
}

impl Event {
    pub fn command(kind: EventKind, command: Command, target: VoiceTarget, time: EventTime) -> Self {
        Self {
            kind,
            command: Some(command),
            control: None,
            value: 0.0,
            target,
            time,
            source_tag: 0,
        }
    }

    pub fn control(
        kind: EventKind,
        control: ControlId,
        value: f32,
        target: VoiceTarget,
        time: EventTime,
        source_tag: u32,
    ) -> Self {
        Self {
            kind,
            command: None,
            control: Some(control),
            value,
            target,
            time,
            source_tag,
        }
    }
}

/// Shared wall-clock used by producers and the audio thread
///
/// Both sides stamp times as seconds since the same epoch, so the
/// generator can map producer timestamps onto block positions.
#[derive(Debug, Clone, Copy)]
pub struct TimeSource {
    epoch: Instant,
}

impl TimeSource {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Seconds since the engine clock epoch
    #[inline]
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps event timestamps to positions inside the current audio block
///
/// `update_fragment_time` must be called once at the top of every
/// block; it closes the previous fragment's `[begin, end)` wall-clock
/// window and derives the samples-per-second ratio used to resolve
/// timestamps that fall inside it.
pub struct EventGenerator {
    clock: TimeSource,
    begin: f64,
    end: f64,
    sample_ratio: f64,
    samples_processed: u32,
}

impl EventGenerator {
    pub fn new(clock: TimeSource) -> Self {
        let now = clock.now();
        Self {
            clock,
            begin: now,
            end: now,
            sample_ratio: 0.0,
            samples_processed: 0,
        }
    }

    pub fn clock(&self) -> TimeSource {
        self.clock
    }

    /// Start a new fragment of `frames` samples
    pub fn update_fragment_time(&mut self, frames: u32) {
        self.begin = self.end;
        self.end = self.clock.now();
        let duration = self.end - self.begin;
        self.sample_ratio = if duration > 0.0 {
            self.samples_processed as f64 / duration
        } else {
            0.0
        };
        self.samples_processed = frames;
    }

    /// Resolve an event to a frame offset in the current block
    ///
    /// May return a negative or past-the-end offset for timestamps
    /// outside the fragment window; the engine rejects those.
    pub fn resolve(&self, event: &Event) -> i64 {
        match event.time {
            EventTime::Frame(f) => f as i64,
            EventTime::Timestamp(t) => ((t - self.begin) * self.sample_ratio) as i64,
        }
    }
}

/// Create the RT event channel (producer/consumer pair)
///
/// The producer side belongs to [`crate::engine::EngineHandle`]; the
/// consumer side is owned by the audio thread.
pub fn event_channel() -> (rtrb::Producer<Event>, rtrb::Consumer<Event>) {
    event_channel_with_capacity(EVENT_QUEUE_CAPACITY)
}

/// Create an RT event channel with an explicit capacity
pub fn event_channel_with_capacity(
    capacity: usize,
) -> (rtrb::Producer<Event>, rtrb::Consumer<Event>) {
    rtrb::RingBuffer::new(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_index_round_trip() {
        for idx in 0..=16u8 {
            let cmd = Command::from_index(idx).unwrap();
            assert_eq!(cmd as u8, idx);
        }
        assert!(Command::from_index(17).is_none());
    }

    #[test]
    fn test_event_is_small_and_copy() {
        // keep the queue payload well inside a cache line
        assert!(std::mem::size_of::<Event>() <= 48);
        let ev = Event::command(
            EventKind::CommandHit,
            Command::Record,
            VoiceTarget::Voice(0),
            EventTime::Frame(3),
        );
        let copy = ev;
        assert_eq!(copy.command, Some(Command::Record));
    }

    #[test]
    fn test_frame_events_resolve_verbatim() {
        let mut generator = EventGenerator::new(TimeSource::new());
        generator.update_fragment_time(256);
        let ev = Event::command(
            EventKind::CommandHit,
            Command::Record,
            VoiceTarget::All,
            EventTime::Frame(17),
        );
        assert_eq!(generator.resolve(&ev), 17);
    }

    #[test]
    fn test_timestamp_resolution_uses_fragment_ratio() {
        let clock = TimeSource::new();
        let mut generator = EventGenerator::new(clock);
        // first call establishes the window, second derives the ratio
        generator.update_fragment_time(256);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let stamp = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        generator.update_fragment_time(256);

        let ev = Event::command(
            EventKind::CommandHit,
            Command::Record,
            VoiceTarget::All,
            EventTime::Timestamp(stamp),
        );
        let pos = generator.resolve(&ev);
        assert!(pos >= 0, "timestamp inside the window resolves non-negative");
        assert!(pos <= 256, "resolution is bounded by the fragment length");
    }

    #[test]
    fn test_overflow_keeps_first_events_in_arrival_order() {
        let (mut tx, mut rx) = event_channel();
        let mut accepted = 0usize;
        for i in 0..10_000u32 {
            let ev = Event::control(
                EventKind::ControlSet,
                ControlId::Feedback,
                i as f32,
                VoiceTarget::Voice(0),
                EventTime::Frame(0),
                0,
            );
            if tx.push(ev).is_ok() {
                accepted += 1;
            }
        }
        // exactly the queue capacity is retained, the rest dropped
        assert_eq!(accepted, EVENT_QUEUE_CAPACITY);

        let mut next = 0u32;
        while let Ok(ev) = rx.pop() {
            assert_eq!(ev.value, next as f32, "retained events must not reorder");
            next += 1;
        }
        assert_eq!(next as usize, EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_channel_drops_when_full() {
        let (mut tx, mut rx) = event_channel_with_capacity(4);
        let ev = Event::command(
            EventKind::CommandHit,
            Command::Record,
            VoiceTarget::All,
            EventTime::Frame(0),
        );
        for _ in 0..4 {
            assert!(tx.push(ev).is_ok());
        }
        assert!(tx.push(ev).is_err());
        for _ in 0..4 {
            assert!(rx.pop().is_ok());
        }
        assert!(rx.pop().is_err());
    }
}
