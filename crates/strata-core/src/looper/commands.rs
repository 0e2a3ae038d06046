//! Command dispatch: what each command does in each state
//!
//! This is the current-state × command table of the loop state
//! machine. It is irregular on purpose (Reverse during Record ends
//! the recording and plays backwards, Record during Multiply re-cuts
//! the loop immediately, Insert while Muted fires a one-shot), and the
//! irregularities are the behavior, so every arm is explicit.
//!
//! While Muted, three commands are remapped to mode toggles (Redo ⇒
//! redo-tap toggle, Replace ⇒ quantize toggle, Reverse ⇒ round
//! toggle), and when the redo-tap control is set Redo acts as a delay
//! tap. Deferred (sync-gated) requests overwrite each other: the last
//! request wins.

use crate::chunk::NO_MARK;
use crate::event::Command;
use crate::types::{LooperState, QuantizeMode};

use super::{ControlId, Looper};

impl Looper {
    /// Apply one command at the current sample position
    pub(crate) fn apply_command(&mut self, cmd: Command) {
        use Command::*;

        // mute-mode remaps
        let cmd = if self.state == LooperState::Mute {
            match cmd {
                Redo => RedoToggle,
                Replace => QuantizeToggle,
                Reverse => RoundToggle,
                other => other,
            }
        } else {
            cmd
        };
        // redo doubles as a delay tap when the control says so
        let cmd = if cmd == Redo && self.controls.get(ControlId::RedoTap) != 0.0 {
            Delay
        } else {
            cmd
        };

        match cmd {
            Record => self.cmd_record(),
            Overdub => self.cmd_overdub(),
            Multiply => self.cmd_multiply(),
            Insert => self.cmd_insert(),
            Replace => self.cmd_replace(),
            Substitute => self.cmd_substitute(),
            Mute => self.cmd_mute(),
            Delay => self.cmd_delay(),
            Scratch => self.cmd_scratch(),
            Reverse => self.cmd_reverse(),
            Undo => self.cmd_undo(),
            Redo => self.cmd_redo(),
            OneShot => self.cmd_oneshot(),
            Trigger => self.cmd_trigger(),
            RedoToggle => self.toggle_control(ControlId::RedoTap),
            QuantizeToggle => {
                let now = self.quantize();
                let next = if now == QuantizeMode::Off {
                    QuantizeMode::Cycle
                } else {
                    QuantizeMode::Off
                };
                self.controls.set(ControlId::Quantize, next.as_value());
            }
            RoundToggle => self.toggle_control(ControlId::Round),
        }
    }

    fn toggle_control(&mut self, ctrl: ControlId) {
        let v = self.controls.get(ctrl);
        self.controls.set(ctrl, if v == 0.0 { 1.0 } else { 0.0 });
    }

    fn cmd_record(&mut self) {
        match self.state {
            LooperState::Record => {
                let thresh = self.controls.get(ControlId::TriggerThreshold);
                if !self.sync_enabled() && thresh == 0.0 {
                    // skip trig stop, the loop ends right here
                    self.finish_record();
                    self.state = LooperState::Play;
                } else {
                    self.state = LooperState::TriggerStop;
                    self.next_state = Some(LooperState::Play);
                }
            }
            LooperState::Multiply => {
                // special ending: the loop ends immediately, the cycle
                // length changes and the cycle count becomes 1
                if let Some(id) = self.head_id() {
                    if let Some(c) = self.chunks.get_mut(id) {
                        c.backfill = false;
                        let len = (c.pos - c.start_adj as f64).max(0.0) as u64;
                        c.length = len;
                        c.cycle_length = len;
                        c.cycles = 1;
                    }
                    self.state = LooperState::Play;
                    self.waiting_for_sync = false;
                    self.next_state = None;
                }
            }
            LooperState::Insert => {
                // special ending: cut at the current point, keeping the
                // remainder that was pending when the insert opened
                if let Some(id) = self.head_id() {
                    if let Some(c) = self.chunks.get_mut(id) {
                        c.end_adj = c.rem_len;
                        let len = (c.pos.max(0.0) as u64) + c.rem_len;
                        c.length = len;
                        c.backfill = true;
                        c.mark_end_lo = c.pos.max(0.0) as u64;
                        c.mark_end_hi = len.saturating_sub(1);
                        c.cycle_length = len;
                        c.cycles = 1;
                    }
                    self.state = LooperState::Play;
                    self.waiting_for_sync = false;
                    self.next_state = None;
                }
            }
            LooperState::Delay => {
                // drop the delay chunk and re-arm a fresh recording
                if self.head_id().is_some() {
                    self.undo_loop();
                }
                self.state = LooperState::TriggerStart;
            }
            _ => {
                self.state = LooperState::TriggerStart;
            }
        }
    }

    fn cmd_overdub(&mut self) {
        match self.state {
            LooperState::Overdub => {
                // overdub toggles out unsynced
                self.state = LooperState::Play;
            }
            LooperState::Multiply => self.end_multiply(LooperState::Overdub),
            LooperState::Insert => self.end_insert(LooperState::Overdub),
            LooperState::Delay => {
                if self.head_id().is_some() {
                    self.undo_loop();
                }
                self.begin_overdub();
            }
            _ => self.begin_overdub(),
        }
    }

    fn cmd_multiply(&mut self) {
        match self.state {
            LooperState::Multiply => {
                if !self.gated_entry() {
                    self.end_multiply(LooperState::Play);
                } else {
                    self.next_state = Some(LooperState::Play);
                    self.waiting_for_sync = true;
                }
            }
            LooperState::Insert => self.end_insert(LooperState::Multiply),
            LooperState::Delay => {
                if self.head_id().is_some() {
                    self.undo_loop();
                }
                self.request_or_begin(LooperState::Multiply);
            }
            _ => self.request_or_begin(LooperState::Multiply),
        }
    }

    fn cmd_insert(&mut self) {
        match self.state {
            LooperState::Insert => self.end_insert(LooperState::Play),
            LooperState::Mute | LooperState::OneShot => {
                // insert while muted fires the loop once
                self.transition_to_next(Some(LooperState::OneShot));
            }
            LooperState::Multiply => self.end_multiply(LooperState::Insert),
            LooperState::Delay => {
                if self.head_id().is_some() {
                    self.undo_loop();
                }
                self.request_or_begin(LooperState::Insert);
            }
            _ => self.request_or_begin(LooperState::Insert),
        }
    }

    fn cmd_replace(&mut self) {
        match self.state {
            LooperState::Replace => {
                if !self.gated_entry() {
                    self.finish_write_toggle();
                } else {
                    self.next_state = Some(LooperState::Play);
                    self.waiting_for_sync = true;
                }
            }
            LooperState::Multiply => self.end_multiply(LooperState::Replace),
            LooperState::Insert => self.end_insert(LooperState::Replace),
            LooperState::Delay => {
                // replace toggles hold mode while delaying
                self.hold_mode = !self.hold_mode;
            }
            _ => self.request_or_begin(LooperState::Replace),
        }
    }

    fn cmd_substitute(&mut self) {
        match self.state {
            LooperState::Substitute => {
                if !self.gated_entry() {
                    self.finish_write_toggle();
                } else {
                    self.next_state = Some(LooperState::Play);
                    self.waiting_for_sync = true;
                }
            }
            LooperState::Multiply => self.end_multiply(LooperState::Substitute),
            LooperState::Insert => self.end_insert(LooperState::Substitute),
            LooperState::Delay => {}
            _ => self.request_or_begin(LooperState::Substitute),
        }
    }

    fn cmd_mute(&mut self) {
        let xf = self.xfade_samples();
        match self.state {
            LooperState::Mute | LooperState::OneShot => {
                // back to play from the continuous position
                self.state = LooperState::Play;
                self.play_fade.ramp_to(1.0, xf);
            }
            LooperState::Multiply => self.end_multiply(LooperState::Mute),
            LooperState::Insert => self.end_insert(LooperState::Mute),
            LooperState::Delay => {
                if self.head_id().is_some() {
                    self.undo_loop();
                }
                self.state = LooperState::Mute;
                self.play_fade.ramp_to(0.0, xf);
            }
            _ => {
                self.state = LooperState::Mute;
                self.play_fade.ramp_to(0.0, xf);
            }
        }
    }

    fn cmd_delay(&mut self) {
        match self.state {
            LooperState::Delay => {
                // second tap fixes the delay length
                let tap = self.tap_samples;
                let cap = self.ring.capacity();
                if let Some(id) = self.head_id() {
                    let fits = self.chunks.ensure_space(id, tap, cap);
                    if let Some(c) = self.chunks.get_mut(id) {
                        if fits && tap > 0 {
                            c.length = tap;
                            c.cycle_length = tap;
                            c.pos = 0.0;
                            // the whole buffer is stale until written once
                            c.backfill = true;
                            c.mark_end_lo = 0;
                            c.mark_end_hi = tap - 1;
                        } else {
                            // too-long tap: ignore it, treat as first
                            c.length = 0;
                            c.cycle_length = 0;
                        }
                    }
                }
                self.tap_samples = 0;
            }
            LooperState::Replace
            | LooperState::Substitute
            | LooperState::Record
            | LooperState::Insert
            | LooperState::Overdub
            | LooperState::Multiply => {}
            _ => {
                // first tap arms an empty delay chunk
                if let Some(id) = self.chunks.push_chunk(0, self.ring.capacity()) {
                    self.state = LooperState::Delay;
                    if let Some(c) = self.chunks.get_mut(id) {
                        c.source = None;
                        c.length = 0;
                        c.cycle_length = 0;
                        c.mark_end_lo = NO_MARK;
                        c.mark_end_hi = NO_MARK;
                    }
                    self.hold_mode = false;
                    self.tap_samples = 0;
                }
            }
        }
    }

    fn cmd_scratch(&mut self) {
        let xf = self.xfade_samples();
        match self.state {
            LooperState::Scratch => {
                self.state = LooperState::Play;
            }
            LooperState::Mute | LooperState::OneShot => {
                // restart from the top
                self.state = LooperState::Play;
                self.play_fade.ramp_to(1.0, xf);
                if let Some(id) = self.head_id() {
                    if let Some(c) = self.chunks.get_mut(id) {
                        c.pos = 0.0;
                    }
                }
            }
            LooperState::Play => {
                // refuse while a fill is pending; scratching would skip
                // regions that must be copied exactly once
                let clean = self
                    .head_id()
                    .and_then(|id| self.chunks.get(id))
                    .map(|c| !c.frontfill && !c.backfill)
                    .unwrap_or(false);
                if clean {
                    self.state = LooperState::Scratch;
                    self.scratch_samples = 0;
                    self.scratch_rate = 0.0;
                }
            }
            LooperState::Record | LooperState::TriggerStop => {
                // reverse and play the fresh recording once
                self.finish_record();
                self.rate = -1.0;
                self.state = LooperState::OneShot;
                self.retrigger();
            }
            LooperState::Overdub
            | LooperState::Multiply
            | LooperState::Replace
            | LooperState::Substitute
            | LooperState::Insert
            | LooperState::Delay => {}
            _ => {
                self.state = LooperState::Scratch;
            }
        }
    }

    fn cmd_reverse(&mut self) {
        match self.state {
            LooperState::Record | LooperState::TriggerStop => {
                // ends the record NOW and plays in reverse
                self.finish_record();
                self.rate = -self.rate;
                self.state = LooperState::Play;
            }
            LooperState::Multiply | LooperState::Insert | LooperState::Scratch => {}
            _ => {
                if self.quantize() != QuantizeMode::Off {
                    self.next_rate = Some(-self.rate);
                } else {
                    self.rate = -self.rate;
                }
            }
        }
    }

    fn cmd_undo(&mut self) {
        match self.state {
            LooperState::Mute => {
                // undo everything; redo can still climb back in
                self.chunks.undo_all();
            }
            LooperState::Play
            | LooperState::Record
            | LooperState::Overdub
            | LooperState::Multiply
            | LooperState::Insert
            | LooperState::TriggerStart
            | LooperState::TriggerStop
            | LooperState::Replace
            | LooperState::Substitute
            | LooperState::Delay => {
                if self.head_id().is_none() {
                    // empty history: nothing to do
                    return;
                }
                self.undo_loop();
                // cancel whatever was pending, back to play
                self.state = LooperState::Play;
                self.next_state = None;
                self.waiting_for_sync = false;
            }
            _ => {}
        }
    }

    fn cmd_redo(&mut self) {
        match self.state {
            LooperState::Play
            | LooperState::Record
            | LooperState::TriggerStart
            | LooperState::TriggerStop
            | LooperState::Overdub
            | LooperState::Multiply
            | LooperState::Insert
            | LooperState::Replace
            | LooperState::Substitute => {
                self.redo_loop();
                self.state = LooperState::Play;
                self.next_state = None;
                self.waiting_for_sync = false;
            }
            _ => {}
        }
    }

    fn cmd_oneshot(&mut self) {
        match self.state {
            LooperState::Multiply => self.end_multiply(LooperState::OneShot),
            LooperState::Insert => self.end_insert(LooperState::OneShot),
            _ => {
                if !self.sync_enabled() {
                    self.transition_to_next(Some(LooperState::OneShot));
                } else {
                    self.next_state = Some(LooperState::OneShot);
                    self.waiting_for_sync = true;
                }
            }
        }
    }

    fn cmd_trigger(&mut self) {
        match self.state {
            LooperState::Multiply => self.end_multiply(LooperState::Play),
            LooperState::Insert => self.end_insert(LooperState::Play),
            _ => {
                if !self.sync_enabled() {
                    self.transition_to_next(Some(LooperState::TriggerPlay));
                } else {
                    self.next_state = Some(LooperState::TriggerPlay);
                    self.waiting_for_sync = true;
                }
            }
        }
    }

    /// Request an operation, deferring it when sync/quantize gate it
    fn request_or_begin(&mut self, op: LooperState) {
        if !self.gated_entry() {
            self.transition_to_next(Some(op));
        } else {
            if self.state == LooperState::Record {
                self.state = LooperState::TriggerStop;
            }
            // last request wins: a newer deferred request replaces an
            // older one still waiting
            self.next_state = Some(op);
            self.waiting_for_sync = true;
        }
    }

    /// End Replace/Substitute back into Play (un-gated path)
    pub(crate) fn finish_write_toggle(&mut self) {
        let xf = self.xfade_samples();
        self.state = LooperState::Play;
        self.waiting_for_sync = false;
        self.next_state = None;
        self.feed_fade.ramp_to(1.0, xf);
    }

    /// Freeze the recording chunk's geometry at the current position
    pub(crate) fn finish_record(&mut self) {
        let xf = self.xfade_samples();
        if let Some(id) = self.head_id() {
            if let Some(c) = self.chunks.get_mut(id) {
                let len = c.pos.max(0.0) as u64;
                c.length = len;
                c.cycle_length = len;
                c.cycles = 1;
            }
        }
        self.next_state = None;
        self.waiting_for_sync = false;
        self.loop_fade.set(0.0);
        self.loop_fade.ramp_to(1.0, xf);
    }
}
