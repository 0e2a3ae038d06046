//! Control identifiers and per-voice control storage
//!
//! Controls are the float-valued knobs a voice (or the engine) exposes
//! to producers. Settable controls are only ever written through the
//! event queue; read-only controls are published through the voice's
//! atomic cell block after every run span.

use crate::types::DEFAULT_XFADE_SAMPLES;

/// Identifier of a control value
///
/// The first group is per-voice and settable, the second per-voice and
/// read-only, the last global to the engine. The discriminants are the
/// wire encoding used by external control layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlId {
    // ── per-voice, settable ─────────────────────────────────────────
    TriggerThreshold = 0,
    DryLevel,
    WetLevel,
    Feedback,
    Rate,
    ScratchPosition,
    Quantize,
    Round,
    RedoTap,
    SyncMode,
    UseRate,
    FadeSamples,
    RelativeSync,

    // ── per-voice, read-only ────────────────────────────────────────
    State,
    LoopLength,
    LoopPosition,
    CycleLength,
    FreeTime,
    TotalTime,
    Waiting,
    TrueRate,
    NextState,

    // ── global ──────────────────────────────────────────────────────
    Tempo,
    SyncSource,
    EighthsPerCycle,
    SelectedLoopNum,
}

/// Number of settable per-voice controls (the storage array size)
pub const SETTABLE_CONTROLS: usize = ControlId::RelativeSync as usize + 1;

impl ControlId {
    pub fn from_index(idx: u8) -> Option<Self> {
        use ControlId::*;
        Some(match idx {
            0 => TriggerThreshold,
            1 => DryLevel,
            2 => WetLevel,
            3 => Feedback,
            4 => Rate,
            5 => ScratchPosition,
            6 => Quantize,
            7 => Round,
            8 => RedoTap,
            9 => SyncMode,
            10 => UseRate,
            11 => FadeSamples,
            12 => RelativeSync,
            13 => State,
            14 => LoopLength,
            15 => LoopPosition,
            16 => CycleLength,
            17 => FreeTime,
            18 => TotalTime,
            19 => Waiting,
            20 => TrueRate,
            21 => NextState,
            22 => Tempo,
            23 => SyncSource,
            24 => EighthsPerCycle,
            25 => SelectedLoopNum,
            _ => return None,
        })
    }

    pub fn is_settable(&self) -> bool {
        (*self as u8) < ControlId::State as u8
    }

    pub fn is_read_only(&self) -> bool {
        (*self as u8) >= ControlId::State as u8 && (*self as u8) < ControlId::Tempo as u8
    }

    pub fn is_global(&self) -> bool {
        (*self as u8) >= ControlId::Tempo as u8
    }

    /// Canonical control name used by external binding layers
    pub fn name(&self) -> &'static str {
        use ControlId::*;
        match self {
            TriggerThreshold => "rec_thresh",
            DryLevel => "dry",
            WetLevel => "wet",
            Feedback => "feedback",
            Rate => "rate",
            ScratchPosition => "scratch_pos",
            Quantize => "quantize",
            Round => "round",
            RedoTap => "redo_is_tap",
            SyncMode => "sync",
            UseRate => "use_rate",
            FadeSamples => "fade_samples",
            RelativeSync => "relative_sync",
            State => "state",
            LoopLength => "loop_len",
            LoopPosition => "loop_pos",
            CycleLength => "cycle_len",
            FreeTime => "free_time",
            TotalTime => "total_time",
            Waiting => "waiting",
            TrueRate => "true_rate",
            NextState => "next_state",
            Tempo => "tempo",
            SyncSource => "sync_source",
            EighthsPerCycle => "eighth_per_cycle",
            SelectedLoopNum => "selected_loop_num",
        }
    }
}

/// Per-voice settable control values
#[derive(Debug, Clone)]
pub struct Controls {
    values: [f32; SETTABLE_CONTROLS],
}

impl Default for Controls {
    fn default() -> Self {
        let mut values = [0.0; SETTABLE_CONTROLS];
        values[ControlId::DryLevel as usize] = 1.0;
        values[ControlId::WetLevel as usize] = 1.0;
        values[ControlId::Feedback as usize] = 1.0;
        values[ControlId::Rate as usize] = 1.0;
        values[ControlId::FadeSamples as usize] = DEFAULT_XFADE_SAMPLES;
        Self { values }
    }
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a settable control (0.0 for non-settable ids)
    #[inline]
    pub fn get(&self, id: ControlId) -> f32 {
        if id.is_settable() {
            self.values[id as usize]
        } else {
            0.0
        }
    }

    /// Set a settable control; returns false for read-only/global ids
    pub fn set(&mut self, id: ControlId, value: f32) -> bool {
        if id.is_settable() {
            self.values[id as usize] = value;
            true
        } else {
            false
        }
    }
}
