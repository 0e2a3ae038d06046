//! Common types for Strata
//!
//! Fundamental types shared by the loop voices and the engine: the
//! sample type, voice addressing, and the mode enums that gate when a
//! requested state transition actually takes effect.

/// Audio sample type (32-bit float throughout the processing path)
pub type Sample = f32;

/// Default sample rate assumed until the driver reports the real one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default loop memory per voice, in seconds
pub const DEFAULT_LOOP_SECS: f32 = 40.0;

/// Default crossfade length in samples for state transitions
pub const DEFAULT_XFADE_SAMPLES: f32 = 512.0;

/// Largest audio block the engine pre-allocates for
///
/// Covers all common driver configurations (64..4096 frames).
/// Pre-allocating to this size eliminates allocations in the audio
/// callback.
pub const MAX_BLOCK_SIZE: usize = 8192;

/// The state a loop voice is in
///
/// The voice cycles between these states for its whole lifetime; there
/// is no terminal state. `TriggerPlay` never persists across a sample:
/// it is only used as a transition *target* meaning "restart playback
/// from the loop start".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LooperState {
    Off = 0,
    TriggerStart,
    Record,
    TriggerStop,
    Play,
    Overdub,
    Multiply,
    Insert,
    Replace,
    Substitute,
    Delay,
    Mute,
    Scratch,
    OneShot,
    TriggerPlay,
}

impl LooperState {
    /// Convert from the wire/atomic representation
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Off),
            1 => Some(Self::TriggerStart),
            2 => Some(Self::Record),
            3 => Some(Self::TriggerStop),
            4 => Some(Self::Play),
            5 => Some(Self::Overdub),
            6 => Some(Self::Multiply),
            7 => Some(Self::Insert),
            8 => Some(Self::Replace),
            9 => Some(Self::Substitute),
            10 => Some(Self::Delay),
            11 => Some(Self::Mute),
            12 => Some(Self::Scratch),
            13 => Some(Self::OneShot),
            14 => Some(Self::TriggerPlay),
            _ => None,
        }
    }

    /// Whether this state writes new audio into the ring
    pub fn is_writing(&self) -> bool {
        matches!(
            self,
            Self::Record
                | Self::TriggerStop
                | Self::Overdub
                | Self::Multiply
                | Self::Insert
                | Self::Replace
                | Self::Substitute
                | Self::Delay
        )
    }
}

/// Quantize policy: which boundary a pending transition waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QuantizeMode {
    /// Transitions happen on the sample the command arrives
    #[default]
    Off = 0,
    /// Defer to the next cycle boundary
    Cycle,
    /// Defer to the next eighth-note boundary (derived from tempo)
    Eighth,
    /// Defer to the next loop start
    Loop,
}

impl QuantizeMode {
    pub fn from_value(v: f32) -> Self {
        match v as i32 {
            1 => Self::Cycle,
            2 => Self::Eighth,
            3 => Self::Loop,
            _ => Self::Off,
        }
    }

    pub fn as_value(&self) -> f32 {
        *self as u8 as f32
    }
}

/// Where the engine takes its sync pulses from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncSource {
    /// No sync; quantize boundaries are derived per voice
    #[default]
    None,
    /// Engine-generated pulse train from the global tempo
    Internal,
    /// Pulses supplied by the driver's sync input port
    External,
    /// Chase the sync output of another voice
    Voice(usize),
}

impl SyncSource {
    /// Decode from a control value: 0 none, -1 internal, -2 external,
    /// n > 0 selects voice n-1.
    pub fn from_value(v: f32) -> Self {
        let v = v as i32;
        match v {
            -1 => Self::Internal,
            -2 => Self::External,
            n if n > 0 => Self::Voice((n - 1) as usize),
            _ => Self::None,
        }
    }

    pub fn as_value(&self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::Internal => -1.0,
            Self::External => -2.0,
            Self::Voice(n) => (*n + 1) as f32,
        }
    }
}

/// Which voice(s) an event addresses
///
/// The wire encoding matches the control protocol: a non-negative
/// index picks one voice, -1 is all voices, -2 the engine globals,
/// -3 the currently selected voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTarget {
    Voice(usize),
    All,
    Global,
    Selected,
}

impl VoiceTarget {
    pub fn from_index(idx: i32) -> Self {
        match idx {
            -1 => Self::All,
            -2 => Self::Global,
            -3 => Self::Selected,
            n if n >= 0 => Self::Voice(n as usize),
            _ => Self::All,
        }
    }

    pub fn as_index(&self) -> i32 {
        match self {
            Self::Voice(n) => *n as i32,
            Self::All => -1,
            Self::Global => -2,
            Self::Selected => -3,
        }
    }
}
