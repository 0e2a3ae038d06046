//! Engine: multi-voice coordination and lock-free command dispatch
//!
//! The engine owns a set of [`Looper`] voices and two ingestion
//! points: a wait-free `rtrb` queue of RT [`Event`]s drained by the
//! audio callback, and a crossbeam channel of [`EventNonRT`]s drained
//! by the engine's own service loop (see [`EngineService`]).
//!
//! Per audio block the engine resolves every queued event to a frame
//! offset, sorts by (position, arrival), and runs all voices for the
//! spans between event positions so each event lands on its exact
//! sample. The voice vector sits behind a mutex that the audio thread
//! only ever *try*-locks: when a non-RT operation (session load, WAV
//! import) holds it, the block outputs silence instead of stalling.
//!
//! # Why Lock-Free?
//!
//! A producer holding a mutex for a millisecond is an audible dropout
//! at audio block rates. Pushing an event costs a timestamp plus one
//! wait-free ringbuffer write; a full queue drops the event and counts
//! it rather than blocking or retrying (a retry could reorder).

mod notify;
mod service;
mod session;
mod sync;

pub use notify::{Notification, NotificationHub};
pub use service::EngineService;
pub use session::{SessionError, SessionSnapshot, VoiceSnapshot};
pub use sync::SyncTracker;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::event::{
    event_channel, Event, EventGenerator, EventKind, EventTime, TimeSource,
};
use crate::event::Command;
use crate::event_nonrt::EventNonRT;
use crate::looper::{ControlId, Controls, Looper, RunContext, VoiceAtomics, VoiceIo};
use crate::types::{
    LooperState, Sample, SyncSource, VoiceTarget, DEFAULT_LOOP_SECS, DEFAULT_SAMPLE_RATE,
    MAX_BLOCK_SIZE,
};

/// Hard cap on simultaneous voices (sync scratch buffers are
/// pre-allocated for this many)
pub const MAX_VOICES: usize = 16;

/// Default global tempo in BPM
pub const DEFAULT_TEMPO: f32 = 120.0;

/// Default number of eighth notes per loop cycle
pub const DEFAULT_EIGHTHS_PER_CYCLE: f32 = 8.0;

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Loop memory per voice, in seconds
    pub loop_secs: f32,
    /// Voices created at startup
    pub initial_voices: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            loop_secs: DEFAULT_LOOP_SECS,
            initial_voices: 1,
        }
    }
}

/// Counters the audio thread bumps instead of logging
///
/// Non-RT code reads and reports these; the audio path never formats
/// or prints.
#[derive(Default)]
pub struct EngineCounters {
    /// Events dropped because the RT queue was full
    dropped_events: AtomicUsize,
    /// Events rejected for resolving outside their block, or for
    /// addressing a voice that does not exist
    rejected_events: AtomicUsize,
    /// Blocks that output silence because the voice lock was contended
    contended_blocks: AtomicUsize,
}

impl EngineCounters {
    pub fn dropped_events(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn rejected_events(&self) -> usize {
        self.rejected_events.load(Ordering::Relaxed)
    }

    pub fn contended_blocks(&self) -> usize {
        self.contended_blocks.load(Ordering::Relaxed)
    }
}

/// Lock-free snapshot of the engine-global controls
pub struct GlobalAtomics {
    tempo: AtomicU32,
    sync_source: AtomicU32,
    eighths_per_cycle: AtomicU32,
    selected_voice: AtomicU32,
}

impl GlobalAtomics {
    fn new() -> Self {
        Self {
            tempo: AtomicU32::new(DEFAULT_TEMPO.to_bits()),
            sync_source: AtomicU32::new(0f32.to_bits()),
            eighths_per_cycle: AtomicU32::new(DEFAULT_EIGHTHS_PER_CYCLE.to_bits()),
            selected_voice: AtomicU32::new(0f32.to_bits()),
        }
    }

    #[inline]
    pub fn tempo(&self) -> f32 {
        f32::from_bits(self.tempo.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn sync_source(&self) -> SyncSource {
        SyncSource::from_value(f32::from_bits(self.sync_source.load(Ordering::Relaxed)))
    }

    #[inline]
    pub fn eighths_per_cycle(&self) -> f32 {
        f32::from_bits(self.eighths_per_cycle.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn selected_voice(&self) -> usize {
        f32::from_bits(self.selected_voice.load(Ordering::Relaxed)).max(0.0) as usize
    }

    /// Read a global control by id (0.0 for non-global ids)
    pub fn get(&self, ctrl: ControlId) -> f32 {
        match ctrl {
            ControlId::Tempo => self.tempo(),
            ControlId::SyncSource => self.sync_source().as_value(),
            ControlId::EighthsPerCycle => self.eighths_per_cycle(),
            ControlId::SelectedLoopNum => self.selected_voice() as f32,
            _ => 0.0,
        }
    }

    fn set(&self, ctrl: ControlId, value: f32) {
        let bits = value.to_bits();
        match ctrl {
            ControlId::Tempo => self.tempo.store(bits, Ordering::Relaxed),
            ControlId::SyncSource => self.sync_source.store(bits, Ordering::Relaxed),
            ControlId::EighthsPerCycle => self.eighths_per_cycle.store(bits, Ordering::Relaxed),
            ControlId::SelectedLoopNum => self.selected_voice.store(bits, Ordering::Relaxed),
            _ => {}
        }
    }
}

/// Audio-thread copy of the global state (authoritative)
struct GlobalState {
    tempo: f32,
    sync_source: SyncSource,
    eighths_per_cycle: f32,
    selected_voice: usize,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            sync_source: SyncSource::None,
            eighths_per_cycle: DEFAULT_EIGHTHS_PER_CYCLE,
            selected_voice: 0,
        }
    }
}

/// Per-voice I/O buffers supplied by the driver for one block
pub struct VoicePorts<'a> {
    pub input: &'a [Sample],
    pub output: &'a mut [Sample],
}

/// All driver-side buffers for one block
pub struct EnginePorts<'v, 'a> {
    pub voices: &'v mut [VoicePorts<'a>],
    pub sync_in: &'v [Sample],
    pub sync_out: &'v mut [Sample],
}

/// The audio-thread half of the engine
///
/// Owned and driven exclusively by the audio callback via
/// [`Engine::process`].
pub struct Engine {
    sample_rate: u32,
    voices: Arc<Mutex<Vec<Looper>>>,
    consumer: rtrb::Consumer<Event>,
    generator: EventGenerator,
    /// Drained events for one block: (resolved position, arrival seq,
    /// event). Pre-allocated to the queue capacity.
    pending: Vec<(i64, usize, Event)>,
    globals: GlobalState,
    global_atomics: Arc<GlobalAtomics>,
    sync: SyncTracker,
    /// The sync bus all voices read this block
    sync_bus: Vec<Sample>,
    /// Per-voice sync output scratch for the current block
    voice_sync: Vec<Vec<Sample>>,
    /// Previous block's sync output per voice (voice-chase source)
    voice_sync_prev: Vec<Vec<Sample>>,
    counters: Arc<EngineCounters>,
}

/// Everything `Engine::create` hands back
pub struct EngineSetup {
    /// Give this to the audio callback
    pub engine: Engine,
    /// Clone this for every producer (network, MIDI, GUI)
    pub handle: EngineHandle,
    /// Run this on a dedicated non-RT thread
    pub service: EngineService,
}

impl Engine {
    /// Build an engine plus its producer handle and non-RT service
    pub fn create(config: EngineConfig) -> EngineSetup {
        let (producer, consumer) = event_channel();
        let (nonrt_tx, nonrt_rx): (Sender<EventNonRT>, Receiver<EventNonRT>) = unbounded();
        let clock = TimeSource::new();
        let counters = Arc::new(EngineCounters::default());
        let global_atomics = Arc::new(GlobalAtomics::new());
        let notify = Arc::new(NotificationHub::new());

        let mut voices = Vec::with_capacity(config.initial_voices);
        let mut atomics = Vec::with_capacity(config.initial_voices);
        let mut mirror = Vec::with_capacity(config.initial_voices);
        for i in 0..config.initial_voices.min(MAX_VOICES) {
            let looper = Looper::new(i, config.sample_rate, config.loop_secs);
            atomics.push(looper.atomics());
            mirror.push(Controls::new());
            voices.push(looper);
        }
        let voices = Arc::new(Mutex::new(voices));
        let voice_atomics = Arc::new(Mutex::new(atomics));
        let mirror = Arc::new(Mutex::new(mirror));

        let handle = EngineHandle {
            shared: Arc::new(HandleShared {
                producer: Mutex::new(producer),
                clock,
                counters: Arc::clone(&counters),
                voice_atomics: Arc::clone(&voice_atomics),
                global_atomics: Arc::clone(&global_atomics),
                mirror: Arc::clone(&mirror),
                global_mirror: Mutex::new([
                    DEFAULT_TEMPO,
                    0.0,
                    DEFAULT_EIGHTHS_PER_CYCLE,
                    0.0,
                ]),
                nonrt_tx,
                notify: Arc::clone(&notify),
            }),
        };

        let service = EngineService::new(
            nonrt_rx,
            Arc::clone(&voices),
            Arc::clone(&voice_atomics),
            Arc::clone(&mirror),
            Arc::clone(&notify),
            handle.clone(),
            config.sample_rate,
            config.loop_secs,
        );

        let engine = Engine {
            sample_rate: config.sample_rate,
            voices,
            consumer,
            generator: EventGenerator::new(clock),
            pending: Vec::with_capacity(crate::event::EVENT_QUEUE_CAPACITY),
            globals: GlobalState::default(),
            global_atomics,
            sync: SyncTracker::new(config.sample_rate),
            sync_bus: vec![0.0; MAX_BLOCK_SIZE],
            voice_sync: (0..MAX_VOICES).map(|_| vec![0.0; MAX_BLOCK_SIZE]).collect(),
            voice_sync_prev: (0..MAX_VOICES).map(|_| vec![0.0; MAX_BLOCK_SIZE]).collect(),
            counters,
        };

        EngineSetup {
            engine,
            handle,
            service,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn counters(&self) -> Arc<EngineCounters> {
        Arc::clone(&self.counters)
    }

    /// Process one audio block
    ///
    /// Called from the audio callback. Drains the RT event queue,
    /// applies each event to its target voice(s) at its resolved frame
    /// offset, and runs every voice over the spans in between. Never
    /// blocks, never allocates.
    pub fn process(&mut self, frames: usize, ports: &mut EnginePorts<'_, '_>) {
        let frames = frames.min(MAX_BLOCK_SIZE);
        if frames == 0 {
            return;
        }
        debug_assert!(ports.sync_in.len() >= frames);
        debug_assert!(ports.sync_out.len() >= frames);

        self.generator.update_fragment_time(frames as u32);

        // drain and resolve all currently queued events
        self.pending.clear();
        let mut seq = 0usize;
        while let Ok(ev) = self.consumer.pop() {
            let pos = self.generator.resolve(&ev);
            if pos < 0 || pos >= frames as i64 {
                // resolved outside this block: rejecting beats
                // misapplying it at a wrong sample
                self.counters.rejected_events.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.pending.push((pos, seq, ev));
            seq += 1;
            if self.pending.len() == self.pending.capacity() {
                break;
            }
        }
        // within a block: strictly by position, ties by arrival order
        self.pending.sort_unstable_by_key(|(pos, seq, _)| (*pos, *seq));

        self.fill_sync_bus(frames, ports.sync_in);
        for (pos, _, ev) in &self.pending {
            if ev.kind == EventKind::SyncTick {
                self.sync_bus[*pos as usize] = 1.0;
            }
        }

        // the audio thread only try-locks: a contended block goes out
        // silent rather than stalling the callback
        let voices_arc = Arc::clone(&self.voices);
        let Ok(mut voices) = voices_arc.try_lock() else {
            self.counters.contended_blocks.fetch_add(1, Ordering::Relaxed);
            for vp in ports.voices.iter_mut() {
                vp.output[..frames].fill(0.0);
            }
            ports.sync_out[..frames].fill(0.0);
            return;
        };

        let mut used = 0usize;
        for k in 0..self.pending.len() {
            let (pos, _, ev) = self.pending[k];
            if ev.kind == EventKind::SyncTick {
                continue; // already merged into the sync bus
            }
            let pos = pos as usize;
            let span = pos - used;
            if span > 0 {
                self.run_voices(&mut voices[..], ports, used, span);
                used = pos;
            }
            self.apply_event(&mut voices[..], &ev);
        }
        if used < frames {
            self.run_voices(&mut voices[..], ports, used, frames - used);
        }

        ports.sync_out[..frames].copy_from_slice(&self.sync_bus[..frames]);
        if let SyncSource::Voice(n) = self.globals.sync_source {
            if n < MAX_VOICES {
                let (prev, cur) = (&mut self.voice_sync_prev[n], &self.voice_sync[n]);
                prev[..frames].copy_from_slice(&cur[..frames]);
            }
        }
    }

    /// Run every voice for `span` samples starting at `offset`
    fn run_voices(
        &mut self,
        voices: &mut [Looper],
        ports: &mut EnginePorts<'_, '_>,
        offset: usize,
        span: usize,
    ) {
        let ctx = RunContext {
            tempo: self.globals.tempo,
            samples_since_sync: self.sync.samples_since_pulse(),
        };
        for (v, looper) in voices.iter_mut().enumerate() {
            if v >= MAX_VOICES {
                break;
            }
            let Some(vp) = ports.voices.get_mut(v) else {
                break;
            };
            let mut io = VoiceIo {
                input: &vp.input[offset..offset + span],
                output: &mut vp.output[offset..offset + span],
                sync_in: &self.sync_bus[offset..offset + span],
                sync_out: &mut self.voice_sync[v][offset..offset + span],
            };
            looper.run(&mut io, &ctx);
        }
        self.sync.advance(&self.sync_bus[offset..offset + span]);
    }

    /// Apply one resolved event to its target(s)
    fn apply_event(&mut self, voices: &mut [Looper], ev: &Event) {
        match ev.kind {
            EventKind::GlobalControlSet => self.apply_global(voices, ev),
            EventKind::SyncTick => {}
            _ => match ev.target {
                VoiceTarget::Global => self.apply_global(voices, ev),
                VoiceTarget::All => {
                    for looper in voices.iter_mut() {
                        looper.do_event(ev);
                    }
                }
                VoiceTarget::Selected => {
                    let idx = self.globals.selected_voice;
                    if let Some(looper) = voices.get_mut(idx) {
                        looper.do_event(ev);
                    }
                }
                VoiceTarget::Voice(n) => match voices.get_mut(n) {
                    Some(looper) => looper.do_event(ev),
                    None => {
                        self.counters.rejected_events.fetch_add(1, Ordering::Relaxed);
                    }
                },
            },
        }
    }

    /// Apply a global control change
    fn apply_global(&mut self, voices: &mut [Looper], ev: &Event) {
        let Some(ctrl) = ev.control else {
            // a command aimed at the globals is meaningless
            self.counters.rejected_events.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match ctrl {
            ControlId::Tempo => {
                self.globals.tempo = ev.value.clamp(0.0, 400.0);
                self.global_atomics.set(ctrl, self.globals.tempo);
            }
            ControlId::SyncSource => {
                let source = SyncSource::from_value(ev.value);
                if source != self.globals.sync_source {
                    self.globals.sync_source = source;
                    self.sync.reset();
                }
                self.global_atomics.set(ctrl, source.as_value());
            }
            ControlId::EighthsPerCycle => {
                self.globals.eighths_per_cycle = ev.value.max(1.0);
                self.global_atomics.set(ctrl, self.globals.eighths_per_cycle);
            }
            ControlId::SelectedLoopNum => {
                self.globals.selected_voice = ev.value.max(0.0) as usize;
                self.global_atomics.set(ctrl, self.globals.selected_voice as f32);
            }
            other if other.is_settable() => {
                // per-voice control addressed globally: broadcast
                for looper in voices.iter_mut() {
                    looper.set_control(other, ev.value);
                }
            }
            _ => {
                self.counters.rejected_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Fill the engine sync bus for this block from the chosen source
    fn fill_sync_bus(&mut self, frames: usize, external: &[Sample]) {
        match self.globals.sync_source {
            SyncSource::None => self.sync_bus[..frames].fill(0.0),
            SyncSource::External => {
                self.sync_bus[..frames].copy_from_slice(&external[..frames]);
            }
            SyncSource::Internal => {
                let tempo = self.globals.tempo;
                self.sync.fill_internal(&mut self.sync_bus[..frames], tempo);
            }
            SyncSource::Voice(n) => {
                if n < MAX_VOICES {
                    let src = &self.voice_sync_prev[n];
                    self.sync_bus[..frames].copy_from_slice(&src[..frames]);
                } else {
                    self.sync_bus[..frames].fill(0.0);
                }
            }
        }
    }
}

struct HandleShared {
    producer: Mutex<rtrb::Producer<Event>>,
    clock: TimeSource,
    counters: Arc<EngineCounters>,
    voice_atomics: Arc<Mutex<Vec<Arc<VoiceAtomics>>>>,
    global_atomics: Arc<GlobalAtomics>,
    /// Last value pushed per voice control (readback + change dedup)
    mirror: Arc<Mutex<Vec<Controls>>>,
    /// Last pushed [tempo, sync_source, eighths, selected]
    global_mirror: Mutex<[f32; 4]>,
    nonrt_tx: Sender<EventNonRT>,
    notify: Arc<NotificationHub>,
}

/// Producer-side handle to the engine
///
/// Cloneable; every control surface gets one. Pushes are non-blocking
/// from the audio thread's point of view: producers serialize among
/// themselves on a mutex the audio thread never touches, and the
/// queue write itself is wait-free.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<HandleShared>,
}

impl EngineHandle {
    /// Queue a command for `voice` (-1 all, -3 selected)
    ///
    /// Returns false if the RT queue was full and the event dropped.
    pub fn push_command_event(&self, kind: EventKind, cmd: Command, voice: i32) -> bool {
        let ev = Event::command(
            kind,
            cmd,
            VoiceTarget::from_index(voice),
            EventTime::Timestamp(self.shared.clock.now()),
        );
        self.push(ev)
    }

    /// Queue a command with an already-resolved in-block position
    /// (for producers running inside the audio path)
    pub fn push_command_event_at(
        &self,
        kind: EventKind,
        cmd: Command,
        voice: i32,
        frame: u32,
    ) -> bool {
        let ev = Event::command(kind, cmd, VoiceTarget::from_index(voice), EventTime::Frame(frame));
        self.push(ev)
    }

    /// Queue a control change; fires a de-duplicated `ParamChanged`
    /// notification tagged with `source_tag`
    pub fn push_control_event(
        &self,
        kind: EventKind,
        ctrl: ControlId,
        value: f32,
        voice: i32,
        source_tag: u32,
    ) -> bool {
        let kind = if ctrl.is_global() {
            EventKind::GlobalControlSet
        } else {
            kind
        };
        let ev = Event::control(
            kind,
            ctrl,
            value,
            VoiceTarget::from_index(voice),
            EventTime::Timestamp(self.shared.clock.now()),
            source_tag,
        );
        if !self.push(ev) {
            return false;
        }
        if self.note_control_change(ctrl, value, voice) {
            self.shared.notify.broadcast(Notification::ParamChanged {
                control: ctrl,
                voice,
                value,
                source_tag,
            });
        }
        true
    }

    /// Queue an external sync pulse (e.g. a MIDI clock tick)
    pub fn push_sync_tick(&self) -> bool {
        let ev = Event {
            kind: EventKind::SyncTick,
            command: None,
            control: None,
            value: 0.0,
            target: VoiceTarget::Global,
            time: EventTime::Timestamp(self.shared.clock.now()),
            source_tag: 0,
        };
        self.push(ev)
    }

    /// Hand a heavier operation to the non-RT service loop
    pub fn push_nonrt_event(&self, ev: EventNonRT) -> bool {
        self.shared.nonrt_tx.send(ev).is_ok()
    }

    /// Instantaneous control value snapshot (lock-free w.r.t. audio)
    ///
    /// `voice` -1 averages across voices, -2 reads globals, -3 the
    /// selected voice.
    pub fn get_control_value(&self, ctrl: ControlId, voice: i32) -> f32 {
        if ctrl.is_global() || voice == -2 {
            return self.shared.global_atomics.get(ctrl);
        }
        if voice == -1 {
            let count = self.shared.voice_atomics.lock().expect("atomics lock").len();
            if count == 0 {
                return 0.0;
            }
            let sum: f32 = (0..count).map(|i| self.read_voice_control(ctrl, i)).sum();
            return sum / count as f32;
        }
        let idx = if voice == -3 {
            self.shared.global_atomics.selected_voice()
        } else {
            voice.max(0) as usize
        };
        self.read_voice_control(ctrl, idx)
    }

    /// Register for push notifications
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.shared.notify.subscribe()
    }

    /// Number of events dropped because the RT queue was full
    pub fn dropped_events(&self) -> usize {
        self.shared.counters.dropped_events()
    }

    /// Number of events rejected (bad position or unknown voice)
    pub fn rejected_events(&self) -> usize {
        self.shared.counters.rejected_events()
    }

    fn push(&self, ev: Event) -> bool {
        let mut producer = self.shared.producer.lock().expect("producer lock");
        match producer.push(ev) {
            Ok(()) => true,
            Err(_) => {
                // full queue: drop and count, never retry
                self.shared
                    .counters
                    .dropped_events
                    .fetch_add(1, Ordering::Relaxed);
                log::warn!("rt event queue full, dropping event");
                false
            }
        }
    }

    /// Update the mirror; true when the value actually changed
    fn note_control_change(&self, ctrl: ControlId, value: f32, voice: i32) -> bool {
        if ctrl.is_global() {
            let slot = match ctrl {
                ControlId::Tempo => 0,
                ControlId::SyncSource => 1,
                ControlId::EighthsPerCycle => 2,
                _ => 3,
            };
            let mut globals = self.shared.global_mirror.lock().expect("mirror lock");
            if globals[slot] == value {
                return false;
            }
            globals[slot] = value;
            return true;
        }
        if !ctrl.is_settable() {
            return false;
        }
        let mut mirror = self.shared.mirror.lock().expect("mirror lock");
        match voice {
            -1 => {
                let mut changed = false;
                for c in mirror.iter_mut() {
                    if c.get(ctrl) != value {
                        c.set(ctrl, value);
                        changed = true;
                    }
                }
                changed
            }
            v => {
                let idx = if v == -3 {
                    self.shared.global_atomics.selected_voice()
                } else {
                    v.max(0) as usize
                };
                match mirror.get_mut(idx) {
                    Some(c) if c.get(ctrl) != value => {
                        c.set(ctrl, value);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    fn read_voice_control(&self, ctrl: ControlId, idx: usize) -> f32 {
        if ctrl.is_settable() {
            let mirror = self.shared.mirror.lock().expect("mirror lock");
            return mirror.get(idx).map_or(0.0, |c| c.get(ctrl));
        }
        let list = self.shared.voice_atomics.lock().expect("atomics lock");
        let Some(a) = list.get(idx) else { return 0.0 };
        match ctrl {
            ControlId::State => a.state() as u8 as f32,
            ControlId::NextState => a
                .next_state()
                .map_or(LooperState::Off as u8 as f32, |s| s as u8 as f32),
            ControlId::LoopLength => a.loop_length(),
            ControlId::LoopPosition => a.loop_position(),
            ControlId::CycleLength => a.cycle_length(),
            ControlId::FreeTime => a.free_time(),
            ControlId::TotalTime => a.total_time(),
            ControlId::Waiting => {
                if a.waiting() {
                    1.0
                } else {
                    0.0
                }
            }
            ControlId::TrueRate => a.true_rate(),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_nonrt::EventNonRT;

    const SR: u32 = 48000;

    fn setup(voices: usize) -> EngineSetup {
        Engine::create(EngineConfig {
            sample_rate: SR,
            loop_secs: 2.0,
            initial_voices: voices,
        })
    }

    fn process_two(
        engine: &mut Engine,
        frames: usize,
        in0: &[Sample],
        in1: &[Sample],
    ) -> (Vec<Sample>, Vec<Sample>) {
        let mut out0 = vec![0.0; frames];
        let mut out1 = vec![0.0; frames];
        let sync_in = vec![0.0; frames];
        let mut sync_out = vec![0.0; frames];
        {
            let mut vports = [
                VoicePorts {
                    input: in0,
                    output: &mut out0,
                },
                VoicePorts {
                    input: in1,
                    output: &mut out1,
                },
            ];
            let mut ports = EnginePorts {
                voices: &mut vports,
                sync_in: &sync_in,
                sync_out: &mut sync_out,
            };
            engine.process(frames, &mut ports);
        }
        (out0, out1)
    }

    #[test]
    fn test_events_land_on_their_resolved_frames() {
        let mut setup = setup(1);
        // zero the crossfade so lengths come out exact
        setup.handle.push_control_event(
            EventKind::ControlSet,
            ControlId::FadeSamples,
            0.0,
            0,
            0,
        );
        let (_o0, _o1) = process_two(&mut setup.engine, 64, &[0.1; 64], &[0.0; 64]);

        // record from frame 100 to frame 600 of one block
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, 0, 100);
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, 0, 600);
        let input = vec![0.5; 1000];
        process_two(&mut setup.engine, 1000, &input, &vec![0.0; 1000]);

        let len_secs = setup
            .handle
            .get_control_value(ControlId::LoopLength, 0);
        let len_samples = (len_secs * SR as f32).round() as u64;
        assert_eq!(len_samples, 500, "loop spans exactly frames 100..600");
    }

    #[test]
    fn test_in_block_events_sorted_by_position_ties_by_arrival() {
        let mut setup = setup(1);
        // pushed out of positional order: the engine must sort them
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, 0, 400);
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, 0, 100);
        process_two(&mut setup.engine, 512, &[0.25; 512], &[0.0; 512]);

        // record started at 100 and ended at 400: 300 samples
        let len_secs = setup.handle.get_control_value(ControlId::LoopLength, 0);
        assert_eq!((len_secs * SR as f32).round() as u64, 300);
    }

    #[test]
    fn test_broadcast_target_reaches_all_voices() {
        let mut setup = setup(2);
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, -1, 0);
        process_two(&mut setup.engine, 256, &[0.5; 256], &[0.25; 256]);
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, -1, 0);
        process_two(&mut setup.engine, 64, &[0.0; 64], &[0.0; 64]);

        for v in 0..2 {
            let state = setup.handle.get_control_value(ControlId::State, v);
            assert_eq!(state as u8, LooperState::Play as u8, "voice {v}");
            let len = setup.handle.get_control_value(ControlId::LoopLength, v);
            assert_eq!((len * SR as f32).round() as u64, 256, "voice {v}");
        }
    }

    #[test]
    fn test_selected_target_follows_selected_voice() {
        let mut setup = setup(2);
        setup.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::SelectedLoopNum,
            1.0,
            -2,
            0,
        );
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, -3, 0);
        process_two(&mut setup.engine, 128, &[0.1; 128], &[0.5; 128]);

        let s0 = setup.handle.get_control_value(ControlId::State, 0) as u8;
        let s1 = setup.handle.get_control_value(ControlId::State, 1) as u8;
        assert_eq!(s0, LooperState::Play as u8);
        assert_eq!(s1, LooperState::Record as u8);
    }

    #[test]
    fn test_global_controls_readable_after_apply() {
        let mut setup = setup(1);
        setup.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::Tempo,
            97.0,
            -2,
            7,
        );
        process_two(&mut setup.engine, 64, &[0.0; 64], &[0.0; 64]);
        assert_eq!(
            setup.handle.get_control_value(ControlId::Tempo, -2),
            97.0
        );
    }

    #[test]
    fn test_unknown_voice_event_is_counted_not_applied() {
        let mut setup = setup(1);
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, 9, 0);
        process_two(&mut setup.engine, 64, &[0.0; 64], &[0.0; 64]);
        assert_eq!(setup.handle.rejected_events(), 1);
        let state = setup.handle.get_control_value(ControlId::State, 0) as u8;
        assert_eq!(state, LooperState::Play as u8);
    }

    #[test]
    fn test_out_of_block_position_is_rejected() {
        let mut setup = setup(1);
        setup
            .handle
            .push_command_event_at(EventKind::CommandHit, Command::Record, 0, 5000);
        process_two(&mut setup.engine, 64, &[0.0; 64], &[0.0; 64]);
        assert_eq!(setup.handle.rejected_events(), 1);
        let state = setup.handle.get_control_value(ControlId::State, 0) as u8;
        assert_eq!(state, LooperState::Play as u8);
    }

    #[test]
    fn test_queue_overflow_drops_and_counts() {
        let setup = setup(1);
        let mut pushed = 0usize;
        for _ in 0..10_000 {
            if setup.handle.push_command_event_at(
                EventKind::CommandHit,
                Command::Mute,
                0,
                0,
            ) {
                pushed += 1;
            }
        }
        assert_eq!(pushed, crate::event::EVENT_QUEUE_CAPACITY);
        assert_eq!(setup.handle.dropped_events(), 10_000 - pushed);
    }

    #[test]
    fn test_param_change_notifications_deduplicate() {
        let setup = setup(1);
        let rx = setup.handle.subscribe();
        setup
            .handle
            .push_control_event(EventKind::ControlSet, ControlId::Feedback, 0.5, 0, 42);
        setup
            .handle
            .push_control_event(EventKind::ControlSet, ControlId::Feedback, 0.5, 0, 42);
        setup
            .handle
            .push_control_event(EventKind::ControlSet, ControlId::Feedback, 0.7, 0, 42);

        let first = rx.try_recv().unwrap();
        assert_eq!(
            first,
            Notification::ParamChanged {
                control: ControlId::Feedback,
                voice: 0,
                value: 0.5,
                source_tag: 42,
            }
        );
        let second = rx.try_recv().unwrap();
        assert!(matches!(
            second,
            Notification::ParamChanged { value, .. } if value == 0.7
        ));
        assert!(rx.try_recv().is_err(), "duplicate set must not notify");
    }

    #[test]
    fn test_sync_tick_events_pulse_the_bus() {
        let mut setup = setup(1);
        // external sync keeps voices chasing the bus; a tick event
        // must appear on the sync output at its resolved frame
        setup.handle.push_control_event(
            EventKind::GlobalControlSet,
            ControlId::SyncSource,
            SyncSource::External.as_value(),
            -2,
            0,
        );
        process_two(&mut setup.engine, 64, &[0.0; 64], &[0.0; 64]);

        let ev = Event {
            kind: EventKind::SyncTick,
            command: None,
            control: None,
            value: 0.0,
            target: VoiceTarget::Global,
            time: EventTime::Frame(33),
            source_tag: 0,
        };
        {
            let mut producer = setup.handle.shared.producer.lock().unwrap();
            producer.push(ev).unwrap();
        }

        let frames = 64;
        let mut out0 = vec![0.0; frames];
        let sync_in = vec![0.0; frames];
        let mut sync_out = vec![0.0; frames];
        let mut vports = [VoicePorts {
            input: &[0.0; 64],
            output: &mut out0,
        }];
        let mut ports = EnginePorts {
            voices: &mut vports,
            sync_in: &sync_in,
            sync_out: &mut sync_out,
        };
        setup.engine.process(frames, &mut ports);
        assert_eq!(sync_out[33], 1.0);
        assert_eq!(sync_out[32], 0.0);
    }

    #[test]
    fn test_service_add_and_remove_loops() {
        let mut setup = setup(1);
        let rx = setup.handle.subscribe();

        assert!(setup
            .service
            .handle_event(EventNonRT::AddLoop {
                secs: 1.0,
                reply: None,
            }));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::LoopAdded { index: 1 }
        );

        // both voices are processable
        process_two(&mut setup.engine, 64, &[0.1; 64], &[0.2; 64]);

        assert!(setup
            .service
            .handle_event(EventNonRT::RemoveLoop {
                index: 1,
                reply: None,
            }));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::LoopRemoved { index: 1 }
        );
        assert!(!setup.service.handle_event(EventNonRT::Quit));
    }
}
