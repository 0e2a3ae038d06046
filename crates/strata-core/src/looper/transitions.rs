//! State transition helpers: beginning and ending loop operations
//!
//! Each operation that records new audio allocates the *next* chunk
//! from the arena and chains it off the current head; finished chunks
//! are never mutated. All of these run on the audio thread and fail
//! soft: when the arena or ring cannot hold the new chunk the voice
//! falls back to Play with the previous loop intact, crossfaded like
//! any other transition.

use crate::chunk::NO_MARK;
use crate::types::{LooperState, QuantizeMode};

use super::Looper;

impl Looper {
    /// Enter the requested state, creating chunks where needed
    ///
    /// `None` falls back to Play (mirrors an unset deferred state).
    pub(crate) fn transition_to_next(&mut self, next: Option<LooperState>) {
        let next = next.unwrap_or(LooperState::Play);
        self.next_state = None;
        match next {
            LooperState::Overdub => self.begin_overdub(),
            LooperState::Replace => self.begin_replace(),
            LooperState::Substitute => self.begin_substitute(),
            LooperState::Multiply => self.begin_multiply(),
            LooperState::Insert => self.begin_insert(),
            LooperState::TriggerPlay => {
                self.state = LooperState::Play;
                self.retrigger();
            }
            LooperState::OneShot => {
                self.state = LooperState::OneShot;
                self.retrigger();
            }
            LooperState::Mute => {
                self.state = LooperState::Mute;
                let xf = self.xfade_samples();
                self.play_fade.ramp_to(0.0, xf);
            }
            other => {
                if self.state == LooperState::Mute {
                    // leaving mute: ramp playback back in
                    let xf = self.xfade_samples();
                    self.play_fade.ramp_to(1.0, xf);
                }
                self.state = other;
            }
        }
    }

    /// Restart playback from the loop start (or the relative sync
    /// offset, so differently-sized voices stay phase-locked)
    pub(crate) fn retrigger(&mut self) {
        let rate = self.rate;
        let relative = self.relative_sync();
        let offset = self.rel_sync_offset;
        let Some(id) = self.head_id() else { return };
        let Some(chunk) = self.chunks.get_mut(id) else {
            return;
        };
        if chunk.length == 0 {
            chunk.pos = 0.0;
            return;
        }
        let len = chunk.length as f64;
        chunk.pos = if relative {
            // the loop was recorded `offset` samples after a pulse;
            // re-align so position 0 recurs `offset` samples from now
            (len - offset.rem_euclid(len)).rem_euclid(len)
        } else if rate > 0.0 {
            0.0
        } else {
            len - 1.0
        };
    }

    /// Start recording into a fresh chunk (from TriggerStart)
    ///
    /// Returns false when the arena has no chunk to give; the voice is
    /// already back in Play when that happens.
    pub(crate) fn begin_record(&mut self, samples_since_sync: u64) -> bool {
        let feedback = self.feedback.value();
        match self.chunks.push_chunk(0, self.ring.capacity()) {
            Some(id) => {
                self.state = LooperState::Record;
                self.rate = 1.0;
                self.next_state = None;
                if let Some(chunk) = self.chunks.get_mut(id) {
                    chunk.orig_feedback = feedback.clamp(0.0, 1.0);
                }
                if self.sync_enabled() && self.relative_sync() {
                    self.rel_sync_offset = samples_since_sync as f64;
                }
                true
            }
            None => {
                self.state = LooperState::Play;
                self.abort_fade_in();
                false
            }
        }
    }

    /// Begin overdubbing: a same-length chunk chained off the head
    pub(crate) fn begin_overdub(&mut self) {
        self.begin_copy_op(LooperState::Overdub);
    }

    /// Begin replacing: like overdub but the write excludes the old
    /// content (which fades out over the crossfade length)
    pub(crate) fn begin_replace(&mut self) {
        if self.begin_copy_op(LooperState::Replace) {
            let xf = self.xfade_samples();
            self.feed_fade.set(1.0);
            self.feed_fade.ramp_to(0.0, xf);
        }
    }

    /// Begin substituting: replace while the source stays audible
    pub(crate) fn begin_substitute(&mut self) {
        if self.begin_copy_op(LooperState::Substitute) {
            let xf = self.xfade_samples();
            self.feed_fade.set(1.0);
            self.feed_fade.ramp_to(0.0, xf);
        }
    }

    /// Common body of overdub/replace/substitute: new chunk with the
    /// source's geometry and fill marks around the entry position
    fn begin_copy_op(&mut self, state: LooperState) -> bool {
        let Some(src_id) = self.head_id() else {
            return false;
        };
        let Some(src) = self.chunks.get(src_id).copied() else {
            return false;
        };
        if src.length == 0 {
            return false;
        }
        let Some(id) = self.chunks.push_chunk(src.length, self.ring.capacity()) else {
            self.abort_to_play();
            return false;
        };
        self.state = state;
        self.next_state = None;
        let feedback = self.feedback.value().clamp(0.0, 1.0);
        let rate_forward = self.rate >= 0.0;
        self.rate = if rate_forward { 1.0 } else { -1.0 };

        let src_pos = src.pos.rem_euclid(src.length as f64);
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.source = Some(src_id);
            chunk.cycle_length = src.cycle_length;
            chunk.length = src.length;
            chunk.cycles = src.cycles;
            chunk.pos = src_pos;
            chunk.start_adj = 0;
            chunk.end_adj = 0;
            chunk.orig_feedback = feedback;
            let cur = src_pos as u64;
            if rate_forward {
                if cur > 0 {
                    chunk.frontfill = true;
                    chunk.mark_lo = 0;
                    chunk.mark_hi = cur - 1;
                }
                chunk.backfill = true;
                chunk.mark_end_lo = cur;
                chunk.mark_end_hi = chunk.length - 1;
            } else {
                // reverse: the regions swap around the entry point
                chunk.frontfill = true;
                chunk.mark_lo = cur + 1;
                chunk.mark_hi = chunk.length - 1;
                chunk.backfill = true;
                chunk.mark_end_lo = 0;
                chunk.mark_end_hi = cur;
            }
        }
        true
    }

    /// Begin multiplying: the chunk grows cycle by cycle from one
    /// cycle of the source
    pub(crate) fn begin_multiply(&mut self) {
        let Some(src_id) = self.head_id() else { return };
        let Some(src) = self.chunks.get(src_id).copied() else {
            return;
        };
        if src.cycle_length == 0 {
            return;
        }
        let Some(id) = self.chunks.push_chunk(src.cycle_length, self.ring.capacity()) else {
            self.abort_to_play();
            return;
        };
        self.state = LooperState::Multiply;
        self.next_state = None;
        self.rate = 1.0;
        let feedback = self.feedback.value().clamp(0.0, 1.0);
        let quantized = self.quantize() != QuantizeMode::Off;

        let src_pos = if src.length > 0 {
            src.pos.rem_euclid(src.length as f64)
        } else {
            0.0
        };
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.source = Some(src_id);
            chunk.length = src.cycle_length;
            chunk.cycle_length = src.cycle_length;
            chunk.cycles = 1;
            chunk.pos = src_pos;
            chunk.first_cycle = true;
            chunk.orig_feedback = feedback;

            if quantized && src.cycles > 1 {
                // skip the cycles already played; recording starts at
                // the next cycle boundary of the source
                let skipped =
                    ((src_pos / src.cycle_length as f64).floor() as u64 + 1) * src.cycle_length;
                chunk.start_adj = skipped;
                chunk.pos -= skipped as f64;
                chunk.cycles = 1;
                chunk.frontfill = false;
            } else if chunk.pos > 0.0 {
                chunk.frontfill = true;
                chunk.mark_lo = 0;
                chunk.mark_hi = src_pos as u64 - 1;
            }
            chunk.mark_end_lo = NO_MARK;
            chunk.mark_end_hi = NO_MARK;
        }
    }

    /// End a multiply into `next`
    ///
    /// In round mode the voice keeps recording to the end of the loop
    /// (the transition is parked in `next_state`); otherwise the loop
    /// is cut to a whole number of cycles immediately.
    pub(crate) fn end_multiply(&mut self, next: LooperState) {
        let Some(id) = self.head_id() else { return };
        let Some(chunk) = self.chunks.get(id).copied() else {
            return;
        };
        let src_cycles = chunk
            .source
            .and_then(|s| self.chunks.get(s))
            .map_or(1, |s| s.cycles);
        let quantized = self.quantize() != QuantizeMode::Off;

        if quantized && src_cycles > 1 && chunk.cycles < 1 {
            // ended before a single cycle accumulated
            if let Some(c) = self.chunks.get_mut(id) {
                c.backfill = false;
                c.length = 0;
            }
            self.state = next;
            return;
        }

        if !self.round_mode() {
            if let Some(c) = self.chunks.get_mut(id) {
                c.length = c.cycles * c.cycle_length;
                c.backfill = true;
                c.mark_end_lo = c.pos as u64;
                c.mark_end_hi = c.length.saturating_sub(1);
            }
            self.transition_to_next(Some(next));
        } else {
            // round mode: wait it out, keep recording to the loop end
            if let Some(c) = self.chunks.get_mut(id) {
                c.mark_end_lo = c.pos as u64;
                c.mark_end_hi = c.length.saturating_sub(1);
            }
            self.next_state = Some(next);
        }
    }

    /// Begin inserting: the source is split open at the insert point
    /// and new cycles are recorded into the gap
    pub(crate) fn begin_insert(&mut self) {
        let Some(src_id) = self.head_id() else { return };
        let Some(src) = self.chunks.get(src_id).copied() else {
            return;
        };
        if src.cycle_length == 0 {
            return;
        }
        let want = src.length + src.cycle_length;
        let Some(id) = self.chunks.push_chunk(want, self.ring.capacity()) else {
            self.abort_to_play();
            return;
        };
        self.state = LooperState::Insert;
        self.next_state = None;
        self.rate = 1.0;
        let feedback = self.feedback.value().clamp(0.0, 1.0);
        let quantized = self.quantize() != QuantizeMode::Off;
        let rounded = self.round_mode();

        let src_pos = if src.length > 0 {
            src.pos.rem_euclid(src.length as f64)
        } else {
            0.0
        };
        if let Some(chunk) = self.chunks.get_mut(id) {
            chunk.source = Some(src_id);
            chunk.length = src.length + src.cycle_length;
            chunk.cycle_length = src.cycle_length;
            chunk.cycles = src.cycles + 1;
            chunk.pos = src_pos;
            chunk.first_cycle = true;
            chunk.orig_feedback = feedback;

            chunk.ins_pos = if quantized {
                // open the gap at the next cycle boundary
                ((src_pos / src.cycle_length as f64).floor() as u64 + 1) * src.cycle_length
            } else {
                src_pos as u64
            };
            chunk.rem_len = if rounded {
                src.length.saturating_sub(chunk.ins_pos)
            } else {
                src.length.saturating_sub(src_pos as u64)
            };

            let cur = src_pos as u64;
            if cur > 0 {
                chunk.frontfill = true;
                chunk.mark_lo = 0;
                chunk.mark_hi = cur - 1;
            }
            chunk.mark_end_lo = NO_MARK;
            chunk.mark_end_hi = NO_MARK;
        }
    }

    /// End an insert into `next`
    ///
    /// Inserts always round out the cycle being inserted; the
    /// processing loop finishes when the position reaches the parked
    /// end marker.
    pub(crate) fn end_insert(&mut self, next: LooperState) {
        let Some(id) = self.head_id() else { return };
        let src_len = self
            .chunks
            .get(id)
            .and_then(|c| c.source)
            .and_then(|s| self.chunks.get(s))
            .map_or(0, |s| s.length);
        if let Some(c) = self.chunks.get_mut(id) {
            c.end_adj = c.length.saturating_sub(src_len);
            c.mark_end_lo = c.pos as u64;
            c.mark_end_hi = c.length.saturating_sub(c.rem_len);
        }
        self.next_state = Some(next);
    }

    /// Fall back to Play after a failed operation, crossfading so the
    /// previous loop returns without a click
    pub(crate) fn abort_to_play(&mut self) {
        self.state = LooperState::Play;
        self.next_state = None;
        self.waiting_for_sync = false;
        self.abort_fade_in();
    }

    pub(crate) fn abort_fade_in(&mut self) {
        let xf = self.xfade_samples();
        self.loop_fade.set(0.0);
        self.loop_fade.ramp_to(1.0, xf);
        self.feed_fade.set(1.0);
        self.play_fade.ramp_to(1.0, xf);
    }

    /// Pop the head chunk (Undo command body)
    pub(crate) fn undo_loop(&mut self) {
        self.chunks.undo();
        let xf = self.xfade_samples();
        self.loop_fade.set(0.0);
        self.loop_fade.ramp_to(1.0, xf);
    }

    /// Restore the next chunk (Redo command body)
    pub(crate) fn redo_loop(&mut self) {
        self.chunks.redo();
        let xf = self.xfade_samples();
        self.loop_fade.set(0.0);
        self.loop_fade.ramp_to(1.0, xf);
    }
}
