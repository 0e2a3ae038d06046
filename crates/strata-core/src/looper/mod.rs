//! Loop voice: the per-voice audio state machine
//!
//! A [`Looper`] is one independent loop voice. It owns a
//! [`SampleRing`] of recorded audio, a fixed [`ChunkArena`] of loop
//! versions forming the undo/redo history, and the state machine that
//! cycles between record/overdub/multiply/insert/replace/substitute/
//! mute/scratch/delay/one-shot states.
//!
//! The engine drives a voice from the audio callback in *spans*: the
//! samples between two queued events. [`Looper::run`] processes one
//! span; [`Looper::do_event`] applies a command or control change at
//! the exact frame the engine resolved for it. Nothing on this path
//! allocates or blocks; chunk storage comes from the pre-allocated
//! arena and failure means falling back to Play, never corrupting the
//! existing loop.

mod atomics;
mod commands;
mod controls;
mod fade;
mod fill;
mod process;
mod transitions;

pub use atomics::VoiceAtomics;
pub use controls::{ControlId, Controls, SETTABLE_CONTROLS};
pub use fade::{FadeRamp, Smoothed};

use std::sync::Arc;

use crate::chunk::{ChunkArena, ChunkId, DEFAULT_POOL_CHUNKS};
use crate::event::{Event, EventKind};
use crate::ring::SampleRing;
use crate::types::{LooperState, QuantizeMode, Sample};

/// Gain applied to the feedback path while new input is mixed in
///
/// Keeps repeated overdub passes from summing past full scale.
pub(crate) const SAFETY_FEEDBACK: Sample = 0.96;

/// Scratch-rate settle window in samples: position updates further
/// apart than this stop being interpreted as scratch gestures
pub(crate) const SCRATCH_SETTLE_SAMPLES: u64 = 14000;

/// Audio and sync buffers for one voice over one span
pub struct VoiceIo<'a> {
    pub input: &'a [Sample],
    pub output: &'a mut [Sample],
    pub sync_in: &'a [Sample],
    pub sync_out: &'a mut [Sample],
}

impl<'a> VoiceIo<'a> {
    #[inline]
    pub fn frames(&self) -> usize {
        self.input.len()
    }
}

/// Engine-side context a voice needs while processing a span
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    /// Global tempo in BPM (for eighth-note quantize boundaries)
    pub tempo: f32,
    /// Samples elapsed since the last sync pulse, at the span start
    pub samples_since_sync: u64,
}

/// One independent loop voice
pub struct Looper {
    index: usize,
    sample_rate: f32,
    ring: SampleRing,
    chunks: ChunkArena,
    controls: Controls,

    state: LooperState,
    next_state: Option<LooperState>,
    waiting_for_sync: bool,

    /// Current playback/record rate (negative = reverse)
    rate: f32,
    /// Rate change waiting for the next quantize boundary / sync pulse
    next_rate: Option<f32>,

    // block-interpolated control values
    wet: Smoothed,
    dry: Smoothed,
    feedback: Smoothed,
    scratch_pos: Smoothed,

    // crossfade coefficients (see fade.rs)
    loop_fade: FadeRamp,
    play_fade: FadeRamp,
    feed_fade: FadeRamp,

    // scratch tracking
    last_scratch_val: f32,
    scratch_samples: u64,
    scratch_rate: f32,

    // tap-delay tracking
    tap_samples: u64,
    hold_mode: bool,

    /// Samples between the last sync pulse and the start of the most
    /// recent recording (relative-offset sync)
    rel_sync_offset: f64,

    atomics: Arc<VoiceAtomics>,
}

impl Looper {
    /// Create a voice with `secs` seconds of loop memory
    pub fn new(index: usize, sample_rate: u32, secs: f32) -> Self {
        let ring = SampleRing::with_seconds(sample_rate, secs);
        let total_secs = ring.seconds(sample_rate);
        Self {
            index,
            sample_rate: sample_rate as f32,
            ring,
            chunks: ChunkArena::new(DEFAULT_POOL_CHUNKS),
            controls: Controls::new(),
            state: LooperState::Play,
            next_state: None,
            waiting_for_sync: false,
            rate: 1.0,
            next_rate: None,
            wet: Smoothed::new(1.0),
            dry: Smoothed::new(1.0),
            feedback: Smoothed::new(1.0),
            scratch_pos: Smoothed::new(0.0),
            loop_fade: FadeRamp::hold(1.0),
            play_fade: FadeRamp::hold(1.0),
            feed_fade: FadeRamp::hold(1.0),
            last_scratch_val: 0.0,
            scratch_samples: 0,
            scratch_rate: 0.0,
            tap_samples: 0,
            hold_mode: false,
            rel_sync_offset: 0.0,
            atomics: Arc::new(VoiceAtomics::new(total_secs)),
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn state(&self) -> LooperState {
        self.state
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Whether a deferred transition is pending a sync/quantize gate
    #[inline]
    pub fn waiting(&self) -> bool {
        self.waiting_for_sync
    }

    /// Lock-free readback block shared with control surfaces
    pub fn atomics(&self) -> Arc<VoiceAtomics> {
        Arc::clone(&self.atomics)
    }

    #[inline]
    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    /// Length of the active loop in samples (0 when empty)
    pub fn loop_length(&self) -> u64 {
        self.chunks
            .head()
            .and_then(|id| self.chunks.get(id))
            .map_or(0, |c| c.length)
    }

    /// Cycle length of the active loop in samples
    pub fn cycle_length(&self) -> u64 {
        self.chunks
            .head()
            .and_then(|id| self.chunks.get(id))
            .map_or(0, |c| c.cycle_length)
    }

    /// Cycle count of the active loop
    pub fn cycles(&self) -> u64 {
        self.chunks
            .head()
            .and_then(|id| self.chunks.get(id))
            .map_or(0, |c| c.cycles)
    }

    /// Fractional playback position of the active loop
    pub fn position(&self) -> f64 {
        self.chunks
            .head()
            .and_then(|id| self.chunks.get(id))
            .map_or(0.0, |c| c.pos)
    }

    /// Number of loop versions reachable by Undo
    pub fn history_len(&self) -> usize {
        self.chunks.history_len()
    }

    /// Apply a resolved event to this voice
    ///
    /// Called from the audio thread at the event's frame position.
    pub fn do_event(&mut self, ev: &Event) {
        match ev.kind {
            EventKind::CommandDown | EventKind::CommandHit => {
                if let Some(cmd) = ev.command {
                    self.apply_command(cmd);
                }
            }
            EventKind::CommandUp => {
                // momentary (sustain) command handling lives in the
                // binding layers; a bare release changes nothing here
            }
            EventKind::ControlSet => {
                if let Some(ctrl) = ev.control {
                    self.set_control(ctrl, ev.value);
                }
            }
            EventKind::ControlRequest => self.publish_outputs(),
            _ => {}
        }
    }

    /// Set a per-voice control, routing rate changes through the
    /// quantize gate
    pub fn set_control(&mut self, ctrl: ControlId, value: f32) {
        if !ctrl.is_settable() {
            return;
        }
        self.controls.set(ctrl, value);
        if ctrl == ControlId::Rate && self.controls.get(ControlId::UseRate) != 0.0 {
            // a pending rate is committed only at the next boundary
            if self.quantize() == QuantizeMode::Off && !self.sync_enabled() {
                self.rate = value;
            } else {
                self.next_rate = Some(value);
            }
        }
    }

    /// Copy up to `out.len()` samples of the active loop starting at
    /// `offset`, returning how many were copied
    ///
    /// Non-RT export path: the caller holds the engine's voice lock,
    /// the audio thread skips the block instead of contending.
    pub fn read_loop_audio(&self, offset: u64, out: &mut [Sample]) -> usize {
        let Some(chunk) = self.chunks.head().and_then(|id| self.chunks.get(id)) else {
            return 0;
        };
        if offset >= chunk.length {
            return 0;
        }
        let n = ((chunk.length - offset) as usize).min(out.len());
        self.ring.read(chunk.start + offset, &mut out[..n]);
        n
    }

    /// Install a fully-formed loop (non-RT path, e.g. WAV import)
    ///
    /// Returns false if the audio does not fit the ring.
    pub fn load_loop_audio(&mut self, samples: &[Sample]) -> bool {
        let len = samples.len() as u64;
        if len == 0 || len > self.ring.capacity() {
            return false;
        }
        let Some(id) = self.chunks.push_chunk(len, self.ring.capacity()) else {
            return false;
        };
        let start = self.chunks.get(id).map(|c| c.start).unwrap_or(0);
        for (i, s) in samples.iter().enumerate() {
            self.ring.set(start + i as u64, *s);
        }
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.length = len;
            chunk.cycle_length = len;
            chunk.cycles = 1;
            chunk.pos = 0.0;
        }
        self.state = LooperState::Play;
        self.next_state = None;
        self.waiting_for_sync = false;
        self.publish_outputs();
        true
    }

    // ── mode helpers ────────────────────────────────────────────────

    pub(crate) fn quantize(&self) -> QuantizeMode {
        QuantizeMode::from_value(self.controls.get(ControlId::Quantize))
    }

    pub(crate) fn round_mode(&self) -> bool {
        self.controls.get(ControlId::Round) != 0.0
    }

    pub(crate) fn sync_enabled(&self) -> bool {
        self.controls.get(ControlId::SyncMode) != 0.0
    }

    pub(crate) fn relative_sync(&self) -> bool {
        self.controls.get(ControlId::RelativeSync) != 0.0
    }

    pub(crate) fn use_rate(&self) -> bool {
        self.controls.get(ControlId::UseRate) != 0.0
    }

    pub(crate) fn xfade_samples(&self) -> u32 {
        self.controls.get(ControlId::FadeSamples).max(0.0) as u32
    }

    /// Eighth-note length in samples for the given tempo
    pub(crate) fn eighth_len(&self, tempo: f32) -> u64 {
        if tempo > 0.0 {
            (self.sample_rate * 30.0 / tempo) as u64
        } else {
            0
        }
    }

    /// Whether a deferred transition may fire at this sample
    ///
    /// With a sync source active only a pulse qualifies; otherwise the
    /// quantize mode picks the boundary (Off resolves immediately).
    pub(crate) fn wait_gate(
        &self,
        sync_sample: Sample,
        pos_wrapped: u64,
        cycle_len: u64,
        tempo: f32,
    ) -> bool {
        if self.sync_enabled() {
            return sync_sample != 0.0;
        }
        match self.quantize() {
            QuantizeMode::Off => true,
            QuantizeMode::Cycle => cycle_len > 0 && pos_wrapped % cycle_len == 0,
            QuantizeMode::Loop => pos_wrapped == 0,
            QuantizeMode::Eighth => {
                let e = self.eighth_len(tempo);
                e > 0 && pos_wrapped % e == 0
            }
        }
    }

    /// Whether a newly requested operation must defer to a boundary
    pub(crate) fn gated_entry(&self) -> bool {
        self.sync_enabled() || self.quantize() != QuantizeMode::Off
    }

    /// Publish readable outputs to the atomic cell block
    pub(crate) fn publish_outputs(&self) {
        let sr = self.sample_rate.max(1.0);
        self.atomics
            .publish_state(self.state, self.next_state, self.waiting_for_sync);
        let total = self.ring.capacity() as f32 / sr;
        match self.chunks.head().and_then(|id| self.chunks.get(id)) {
            Some(chunk) => {
                let live = self
                    .chunks
                    .tail()
                    .and_then(|t| self.chunks.get(t))
                    .map_or(0, |t| self.chunks.write_end().saturating_sub(t.start));
                let free = self.ring.capacity().saturating_sub(live) as f32 / sr;
                self.atomics.publish_loop(
                    chunk.length as f32 / sr,
                    chunk.pos as f32 / sr,
                    chunk.cycle_length as f32 / sr,
                    free,
                );
            }
            None => self.atomics.publish_loop(0.0, 0.0, 0.0, total),
        }
        self.atomics.publish_rate(self.rate);
    }

    #[cfg(test)]
    pub(crate) fn head_chunk(&self) -> Option<&crate::chunk::LoopChunk> {
        self.chunks.head().and_then(|id| self.chunks.get(id))
    }

    pub(crate) fn head_id(&self) -> Option<ChunkId> {
        self.chunks.head()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Command;

    const SR: u32 = 48000;

    fn looper() -> Looper {
        let mut l = Looper::new(0, SR, 2.0);
        // most tests want exact values, not crossfaded ones
        l.set_control(ControlId::FadeSamples, 0.0);
        l
    }

    fn ctx() -> RunContext {
        RunContext {
            tempo: 120.0,
            samples_since_sync: 0,
        }
    }

    fn run_input(l: &mut Looper, input: &[Sample], context: &RunContext) -> Vec<Sample> {
        run_with_sync(l, input, &vec![0.0; input.len()], context)
    }

    fn run_with_sync(
        l: &mut Looper,
        input: &[Sample],
        sync_in: &[Sample],
        context: &RunContext,
    ) -> Vec<Sample> {
        let mut output = vec![0.0; input.len()];
        let mut sync_out = vec![0.0; input.len()];
        let mut io = VoiceIo {
            input,
            output: &mut output,
            sync_in,
            sync_out: &mut sync_out,
        };
        l.run(&mut io, context);
        output
    }

    fn hit(l: &mut Looper, cmd: Command) {
        l.apply_command(cmd);
    }

    /// Record a loop of `len` samples of `value` and leave the voice
    /// playing at position 0
    fn record_loop(l: &mut Looper, len: usize, value: Sample) {
        hit(l, Command::Record);
        // arms first; with threshold 0 recording starts on sample one
        assert_eq!(l.state(), LooperState::TriggerStart);
        run_input(l, &vec![value; len], &ctx());
        assert_eq!(l.state(), LooperState::Record);
        hit(l, Command::Record);
        assert_eq!(l.state(), LooperState::Play);
        // run one full lap so the position recenters on 0
        run_input(l, &vec![0.0; len], &ctx());
        assert_eq!(l.position(), 0.0);
    }

    #[test]
    fn test_empty_voice_passes_dry_through() {
        let mut l = looper();
        let out = run_input(&mut l, &[0.5, -0.25, 1.0], &ctx());
        assert_eq!(out, vec![0.5, -0.25, 1.0]);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.loop_length(), 0);
    }

    #[test]
    fn test_record_then_record_fixes_length_and_cycle() {
        let mut l = looper();
        hit(&mut l, Command::Record);
        assert_eq!(l.state(), LooperState::TriggerStart);
        run_input(&mut l, &vec![0.5; 1000], &ctx());
        assert_eq!(l.state(), LooperState::Record);
        hit(&mut l, Command::Record);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.loop_length(), 1000);
        assert_eq!(l.cycle_length(), 1000);
        assert_eq!(l.cycles(), 1);
        assert_eq!(l.history_len(), 1);
    }

    #[test]
    fn test_playback_repeats_recorded_audio() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        let out = run_input(&mut l, &vec![0.0; 200], &ctx());
        for (i, s) in out.iter().enumerate() {
            assert!((s - 0.5).abs() < 1e-6, "sample {i} was {s}");
        }
    }

    #[test]
    fn test_multiply_one_lap_gives_two_cycles() {
        let mut l = looper();
        record_loop(&mut l, 1000, 0.25);
        hit(&mut l, Command::Multiply);
        assert_eq!(l.state(), LooperState::Multiply);
        run_input(&mut l, &vec![0.1; 1000], &ctx());
        hit(&mut l, Command::Multiply);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.cycles(), 2);
        assert_eq!(l.loop_length(), 2000);
        assert_eq!(l.cycle_length(), 1000);
    }

    #[test]
    fn test_quantized_multiply_end_lands_on_cycle_boundary() {
        let mut l = looper();
        record_loop(&mut l, 1000, 0.25);
        l.set_control(ControlId::Quantize, QuantizeMode::Cycle.as_value());

        // request multiply mid-cycle: deferred to the cycle boundary
        run_input(&mut l, &vec![0.0; 300], &ctx());
        hit(&mut l, Command::Multiply);
        assert_eq!(l.state(), LooperState::Play);
        assert!(l.waiting());
        run_input(&mut l, &vec![0.0; 800], &ctx());
        assert_eq!(l.state(), LooperState::Multiply);
        // the multiply chunk started at the boundary, position 0
        assert_eq!(l.position().rem_euclid(1000.0), l.position() % 1000.0);

        // end request at an arbitrary sample inside a cycle
        run_input(&mut l, &vec![0.0; 437], &ctx());
        hit(&mut l, Command::Multiply);
        assert!(l.waiting());
        run_input(&mut l, &vec![0.0; 2000], &ctx());
        assert_eq!(l.state(), LooperState::Play);
        // never cut at an arbitrary k: always whole cycles
        assert_eq!(l.loop_length() % 1000, 0);
        assert!(l.loop_length() >= 1000);
    }

    #[test]
    fn test_overdub_mixes_input_over_loop() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        hit(&mut l, Command::Overdub);
        assert_eq!(l.state(), LooperState::Overdub);
        run_input(&mut l, &vec![0.25; 100], &ctx());
        hit(&mut l, Command::Overdub);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.history_len(), 2);

        let out = run_input(&mut l, &vec![0.0; 100], &ctx());
        // overdubbed content is input + safety * feedback * old
        let expected = 0.25 + SAFETY_FEEDBACK * 0.5;
        for s in &out {
            assert!((s - expected).abs() < 1e-3, "got {s}, want {expected}");
        }
    }

    #[test]
    fn test_replace_overwrites_loop_content() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        hit(&mut l, Command::Replace);
        assert_eq!(l.state(), LooperState::Replace);
        run_input(&mut l, &vec![-0.125; 100], &ctx());
        hit(&mut l, Command::Replace);
        assert_eq!(l.state(), LooperState::Play);

        let out = run_input(&mut l, &vec![0.0; 100], &ctx());
        for s in &out {
            assert!((s - (-0.125)).abs() < 1e-6, "got {s}");
        }
    }

    #[test]
    fn test_undo_redo_round_trip_restores_exact_chunk() {
        let mut l = looper();
        record_loop(&mut l, 500, 0.5);
        hit(&mut l, Command::Overdub);
        run_input(&mut l, &vec![0.1; 500], &ctx());
        hit(&mut l, Command::Overdub);
        hit(&mut l, Command::Multiply);
        run_input(&mut l, &vec![0.2; 500], &ctx());
        hit(&mut l, Command::Multiply);

        let before = *l.head_chunk().unwrap();
        assert_eq!(l.history_len(), 3);

        hit(&mut l, Command::Undo);
        hit(&mut l, Command::Undo);
        assert_eq!(l.history_len(), 1);
        hit(&mut l, Command::Redo);
        hit(&mut l, Command::Redo);

        let after = l.head_chunk().unwrap();
        assert_eq!(after.start, before.start);
        assert_eq!(after.length, before.length);
        assert_eq!(after.cycle_length, before.cycle_length);
        assert_eq!(after.cycles, before.cycles);
    }

    #[test]
    fn test_undo_with_empty_history_is_noop() {
        let mut l = looper();
        hit(&mut l, Command::Undo);
        assert_eq!(l.loop_length(), 0);
        let out = run_input(&mut l, &[0.5, 0.5], &ctx());
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_redo_above_top_is_noop() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        hit(&mut l, Command::Redo);
        assert_eq!(l.history_len(), 1);
        assert_eq!(l.loop_length(), 100);
    }

    #[test]
    fn test_reverse_flips_rate_immediately_without_quantize() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        hit(&mut l, Command::Reverse);
        assert_eq!(l.rate(), -1.0);
        // playback still yields the loop content (constant signal)
        let out = run_input(&mut l, &vec![0.0; 50], &ctx());
        for s in &out {
            assert!((s - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reverse_defers_to_boundary_with_quantize() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        l.set_control(ControlId::Quantize, QuantizeMode::Cycle.as_value());
        hit(&mut l, Command::Reverse);
        // still forward until the loop wraps
        assert_eq!(l.rate(), 1.0);
        run_input(&mut l, &vec![0.0; 150], &ctx());
        assert_eq!(l.rate(), -1.0);
    }

    #[test]
    fn test_reverse_during_record_ends_it_playing_backwards() {
        let mut l = looper();
        hit(&mut l, Command::Record);
        run_input(&mut l, &vec![0.5; 300], &ctx());
        hit(&mut l, Command::Reverse);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.rate(), -1.0);
        assert_eq!(l.loop_length(), 300);
    }

    #[test]
    fn test_mute_fades_to_silence_and_back() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        l.set_control(ControlId::FadeSamples, 10.0);
        hit(&mut l, Command::Mute);
        assert_eq!(l.state(), LooperState::Mute);
        let out = run_input(&mut l, &vec![0.0; 100], &ctx());
        // after the 10-sample ramp the loop is inaudible
        for s in &out[10..] {
            assert_eq!(*s, 0.0);
        }
        hit(&mut l, Command::Mute);
        assert_eq!(l.state(), LooperState::Play);
        let out = run_input(&mut l, &vec![0.0; 100], &ctx());
        assert!((out[99] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_insert_grows_loop_by_whole_cycles() {
        let mut l = looper();
        record_loop(&mut l, 400, 0.5);
        hit(&mut l, Command::Insert);
        assert_eq!(l.state(), LooperState::Insert);
        // insert opened at position 0: one extra cycle pending
        assert_eq!(l.cycles(), 2);
        hit(&mut l, Command::Insert);
        // ending parks the finish at the inserted-cycle end
        run_input(&mut l, &vec![0.9; 800], &ctx());
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.loop_length() % l.cycle_length(), 0);
        assert_eq!(l.cycle_length(), 400);
    }

    #[test]
    fn test_record_during_multiply_recuts_loop() {
        let mut l = looper();
        record_loop(&mut l, 1000, 0.5);
        hit(&mut l, Command::Multiply);
        run_input(&mut l, &vec![0.1; 700], &ctx());
        hit(&mut l, Command::Record);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.loop_length(), 700);
        assert_eq!(l.cycle_length(), 700);
        assert_eq!(l.cycles(), 1);
    }

    #[test]
    fn test_ring_exhaustion_falls_back_to_play() {
        // tiny ring: 0.01s at 48k rounds up to 512 samples
        let mut l = Looper::new(0, SR, 0.01);
        l.set_control(ControlId::FadeSamples, 0.0);
        hit(&mut l, Command::Record);
        run_input(&mut l, &vec![0.5; 2000], &ctx());
        assert_eq!(l.state(), LooperState::Play);
        // the loop kept everything that fit, nothing corrupted
        assert_eq!(l.loop_length(), 512);
        let out = run_input(&mut l, &vec![0.0; 512], &ctx());
        for s in &out {
            assert!((s - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_trigger_restarts_loop_from_zero() {
        let mut l = looper();
        record_loop(&mut l, 1000, 0.5);
        run_input(&mut l, &vec![0.0; 400], &ctx());
        assert_eq!(l.position(), 400.0);
        hit(&mut l, Command::Trigger);
        assert_eq!(l.state(), LooperState::Play);
        assert_eq!(l.position(), 0.0);
    }

    #[test]
    fn test_relative_sync_retrigger_realigns_to_pulse_offset() {
        let mut l = looper();
        l.set_control(ControlId::SyncMode, 1.0);
        l.set_control(ControlId::RelativeSync, 1.0);

        // recording began 250 samples after the last pulse
        hit(&mut l, Command::Record);
        assert_eq!(l.state(), LooperState::TriggerStart);
        let mut pulse = vec![0.0; 1000];
        pulse[0] = 1.0;
        let context = RunContext {
            tempo: 120.0,
            samples_since_sync: 250,
        };
        run_with_sync(&mut l, &vec![0.5; 1000], &pulse, &context);
        assert_eq!(l.state(), LooperState::Record);

        hit(&mut l, Command::Record);
        assert_eq!(l.state(), LooperState::TriggerStop);
        let mut pulse_end = vec![0.0; 1];
        pulse_end[0] = 1.0;
        run_with_sync(&mut l, &[0.0], &pulse_end, &ctx());
        assert_eq!(l.state(), LooperState::Play);
        let len = l.loop_length();
        assert_eq!(len, 1000);

        // a trigger on a later pulse re-aligns so that position 0
        // recurs exactly 250 samples after the pulse
        hit(&mut l, Command::Trigger);
        assert!(l.waiting());
        let mut pulse_again = vec![0.0; 250];
        pulse_again[0] = 1.0;
        run_with_sync(&mut l, &vec![0.0; 250], &pulse_again, &ctx());
        assert_eq!(l.position(), 0.0);
    }

    #[test]
    fn test_oneshot_plays_once_then_mutes() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        hit(&mut l, Command::OneShot);
        assert_eq!(l.state(), LooperState::OneShot);
        run_input(&mut l, &vec![0.0; 150], &ctx());
        assert_eq!(l.state(), LooperState::Mute);
    }

    #[test]
    fn test_delay_tap_sets_delay_length() {
        let mut l = looper();
        hit(&mut l, Command::Delay);
        assert_eq!(l.state(), LooperState::Delay);
        run_input(&mut l, &vec![0.0; 600], &ctx());
        hit(&mut l, Command::Delay);
        assert_eq!(l.loop_length(), 600);
        assert_eq!(l.state(), LooperState::Delay);
    }

    #[test]
    fn test_mute_remaps_reverse_to_round_toggle() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        hit(&mut l, Command::Mute);
        assert_eq!(l.controls().get(ControlId::Round), 0.0);
        hit(&mut l, Command::Reverse);
        assert_eq!(l.controls().get(ControlId::Round), 1.0);
        // rate untouched: the command was a toggle, not a reverse
        assert_eq!(l.rate(), 1.0);
    }

    #[test]
    fn test_scratch_toggles_from_play() {
        let mut l = looper();
        record_loop(&mut l, 100, 0.5);
        // run a lap so fills are complete before scratching
        run_input(&mut l, &vec![0.0; 100], &ctx());
        hit(&mut l, Command::Scratch);
        assert_eq!(l.state(), LooperState::Scratch);
        hit(&mut l, Command::Scratch);
        assert_eq!(l.state(), LooperState::Play);
    }

    #[test]
    fn test_eighth_quantize_defers_to_tempo_grid() {
        let mut l = looper();
        // at 120 BPM and 48kHz an eighth note is 12000 samples
        record_loop(&mut l, 24000, 0.5);
        l.set_control(ControlId::Quantize, QuantizeMode::Eighth.as_value());

        run_input(&mut l, &vec![0.0; 5000], &ctx());
        hit(&mut l, Command::Multiply);
        assert!(l.waiting());
        run_input(&mut l, &vec![0.0; 6999], &ctx());
        assert!(l.waiting(), "no eighth boundary passed yet");
        run_input(&mut l, &vec![0.0; 100], &ctx());
        assert_eq!(l.state(), LooperState::Multiply);
    }

    #[test]
    fn test_deferred_request_last_wins() {
        let mut l = looper();
        record_loop(&mut l, 1000, 0.5);
        l.set_control(ControlId::Quantize, QuantizeMode::Loop.as_value());
        run_input(&mut l, &vec![0.0; 100], &ctx());
        hit(&mut l, Command::Multiply);
        assert!(l.waiting());
        hit(&mut l, Command::Insert);
        assert!(l.waiting());
        // resolve at the loop boundary: the later request wins
        run_input(&mut l, &vec![0.0; 1000], &ctx());
        assert_eq!(l.state(), LooperState::Insert);
    }
}
