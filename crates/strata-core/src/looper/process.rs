//! Per-state sample processing
//!
//! [`Looper::run`] advances the voice over one span of samples. The
//! outer loop dispatches on the current state; each state handler
//! consumes samples until the span ends or a transition fires, then
//! the outer loop re-dispatches so the remainder of the span runs in
//! the new state. Transitions triggered by events land between spans
//! (the engine splits the block at every event position), so command
//! timing is sample-accurate.
//!
//! Everything here runs on the audio thread: no allocation, no locks,
//! no panics on missing chunks (a voice without a loop passes the dry
//! signal through).

use crate::chunk::NO_MARK;
use crate::types::{LooperState, QuantizeMode};

use super::fill::fill_chain;
use super::{ControlId, Looper, RunContext, VoiceIo, SAFETY_FEEDBACK, SCRATCH_SETTLE_SAMPLES};

impl Looper {
    /// Process one span of samples
    ///
    /// All four buffers in `io` must have the same length. The engine
    /// calls this once per event-free span within each audio block.
    pub fn run(&mut self, io: &mut VoiceIo<'_>, ctx: &RunContext) {
        let frames = io.frames();
        debug_assert_eq!(io.output.len(), frames);
        debug_assert_eq!(io.sync_in.len(), frames);
        debug_assert_eq!(io.sync_out.len(), frames);
        if frames == 0 {
            return;
        }

        self.wet
            .span(self.controls.get(ControlId::WetLevel).clamp(0.0, 1.0), frames);
        self.dry
            .span(self.controls.get(ControlId::DryLevel).clamp(0.0, 1.0), frames);
        self.feedback
            .span(self.controls.get(ControlId::Feedback).clamp(0.0, 1.0), frames);
        self.scratch_pos.span(
            self.controls
                .get(ControlId::ScratchPosition)
                .clamp(0.0, 1.0),
            frames,
        );

        let mut i = 0usize;
        while i < frames {
            match self.state {
                LooperState::TriggerStart => self.run_trigger_start(io, ctx, &mut i),
                LooperState::Record => self.run_record(io, &mut i),
                LooperState::TriggerStop => self.run_trigger_stop(io, &mut i),
                LooperState::Overdub | LooperState::Replace | LooperState::Substitute => {
                    self.run_write_over(io, ctx, &mut i)
                }
                LooperState::Multiply => self.run_multiply(io, ctx, &mut i),
                LooperState::Insert => self.run_insert(io, ctx, &mut i),
                LooperState::Delay => self.run_delay(io, &mut i),
                LooperState::Off
                | LooperState::Play
                | LooperState::Mute
                | LooperState::Scratch
                | LooperState::OneShot
                | LooperState::TriggerPlay => self.run_play(io, ctx, &mut i),
            }
        }

        self.wet.finish();
        self.dry.finish();
        self.feedback.finish();
        self.scratch_pos.finish();

        self.scratch_samples = self.scratch_samples.saturating_add(frames as u64);
        self.tap_samples = self.tap_samples.saturating_add(frames as u64);
        self.publish_outputs();
    }

    /// Dry passthrough for the rest of the span (no loop to play)
    fn run_passthrough_rest(&mut self, io: &mut VoiceIo<'_>, i: &mut usize) {
        let frames = io.frames();
        while *i < frames {
            self.wet.next();
            let dry = self.dry.next();
            self.feedback.next();
            self.scratch_pos.next();
            io.output[*i] = dry * io.input[*i];
            *i += 1;
        }
    }

    /// Armed: waiting for the input threshold (or a sync pulse) to
    /// actually start recording
    fn run_trigger_start(&mut self, io: &mut VoiceIo<'_>, ctx: &RunContext, i: &mut usize) {
        let frames = io.frames();
        let thresh = self.controls.get(ControlId::TriggerThreshold);
        let sync = self.sync_enabled();
        while *i < frames {
            self.wet.next();
            let dry = self.dry.next();
            self.feedback.next();
            self.scratch_pos.next();
            let input = io.input[*i];
            let triggered = if sync {
                io.sync_in[*i] != 0.0
            } else {
                input > thresh || thresh == 0.0
            };
            if triggered {
                // recording starts on this very sample
                self.begin_record(ctx.samples_since_sync + *i as u64);
                return;
            }
            io.output[*i] = dry * input;
            *i += 1;
        }
    }

    /// Recording a brand new loop
    fn run_record(&mut self, io: &mut VoiceIo<'_>, i: &mut usize) {
        let frames = io.frames();
        let Some(id) = self.chunks.head() else {
            self.state = LooperState::Play;
            return;
        };
        let cap = self.ring.capacity();

        // claim ring space for the rest of this span up front; older
        // chunks overwritten by the claim are invalidated here
        let pos_now = self.chunks.get(id).map_or(0.0, |c| c.pos).max(0.0) as u64;
        let want = (pos_now + (frames - *i) as u64).min(cap);
        self.chunks.ensure_space(id, want, cap);

        let mut exhausted = false;
        while *i < frames {
            self.wet.next();
            let dry = self.dry.next();
            self.feedback.next();
            self.scratch_pos.next();
            let Some(c) = self.chunks.get_mut(id) else {
                self.state = LooperState::Play;
                return;
            };
            let cur = c.pos.max(0.0) as u64;
            if cur >= cap {
                exhausted = true;
                break;
            }
            if cur == 0 {
                io.sync_out[*i] = 1.0;
            }
            let start = c.start;
            c.pos += self.rate as f64;
            let input = io.input[*i];
            self.ring.set(start + cur, input);
            io.output[*i] = dry * input;
            *i += 1;
        }

        // keep the geometry current so an event arriving between spans
        // sees the loop as recorded so far
        if let Some(c) = self.chunks.get_mut(id) {
            let len = c.pos.max(0.0) as u64;
            c.length = len;
            c.cycle_length = len;
            c.cycles = 1;
        }
        if exhausted {
            // ring is full: the loop ends here with its audio intact
            self.state = LooperState::Play;
            let xf = self.xfade_samples();
            self.loop_fade.set(0.0);
            self.loop_fade.ramp_to(1.0, xf);
        }
    }

    /// Recording, waiting for the threshold/pulse that ends it
    fn run_trigger_stop(&mut self, io: &mut VoiceIo<'_>, i: &mut usize) {
        let frames = io.frames();
        let Some(id) = self.chunks.head() else {
            self.state = LooperState::Play;
            return;
        };
        let cap = self.ring.capacity();
        let thresh = self.controls.get(ControlId::TriggerThreshold);
        let sync = self.sync_enabled();

        let pos_now = self.chunks.get(id).map_or(0.0, |c| c.pos).max(0.0) as u64;
        let want = (pos_now + (frames - *i) as u64).min(cap);
        self.chunks.ensure_space(id, want, cap);

        while *i < frames {
            self.wet.next();
            let dry = self.dry.next();
            self.feedback.next();
            self.scratch_pos.next();
            let input = io.input[*i];
            let triggered = if sync {
                io.sync_in[*i] != 0.0
            } else {
                input > thresh || thresh == 0.0
            };
            if triggered {
                let next = self.next_state.take();
                self.finish_record();
                self.transition_to_next(next.or(Some(LooperState::Play)));
                return;
            }

            let mut stop = false;
            if let Some(c) = self.chunks.get_mut(id) {
                let cur = c.pos.max(0.0) as u64;
                if cur >= cap {
                    // out of space: freeze the loop at its recorded
                    // extent and give up on the trigger
                    c.length = cur;
                    c.cycle_length = cur;
                    c.cycles = 1;
                    c.pos = 0.0;
                    stop = true;
                } else {
                    let start = c.start;
                    c.pos += self.rate as f64;
                    self.ring.set(start + cur, input);
                }
            }
            if stop {
                self.next_state = None;
                self.waiting_for_sync = false;
                self.state = LooperState::Play;
                let xf = self.xfade_samples();
                self.loop_fade.set(0.0);
                self.loop_fade.ramp_to(1.0, xf);
                return;
            }
            io.output[*i] = dry * input;
            *i += 1;
        }

        if let Some(c) = self.chunks.get_mut(id) {
            let len = c.pos.max(0.0) as u64;
            c.length = len;
            c.cycle_length = len;
            c.cycles = 1;
        }
    }

    /// Overdub / Replace / Substitute: write into a same-length chunk
    fn run_write_over(&mut self, io: &mut VoiceIo<'_>, ctx: &RunContext, i: &mut usize) {
        let frames = io.frames();
        let Some(id) = self.chunks.head() else {
            self.run_passthrough_rest(io, i);
            return;
        };

        while *i < frames {
            let Some(c) = self.chunks.get(id) else {
                self.run_passthrough_rest(io, i);
                return;
            };
            let (start, length, cycle) = (c.start, c.length, c.cycle_length);
            if length == 0 {
                self.run_passthrough_rest(io, i);
                return;
            }
            let pos = c.pos;
            let src_info = c
                .source
                .and_then(|s| self.chunks.get(s))
                .map(|s| (s.start, s.length));
            let cur = pos.rem_euclid(length as f64) as u64;

            let sync_on = self.sync_enabled();
            if sync_on {
                io.sync_out[*i] = io.sync_in[*i];
            } else if self.boundary_pulse(cur, cycle, ctx.tempo) {
                io.sync_out[*i] = 1.0;
            }

            if self.waiting_for_sync && self.wait_gate(io.sync_in[*i], cur, cycle, ctx.tempo) {
                let next = self.next_state.take();
                self.waiting_for_sync = false;
                if matches!(self.state, LooperState::Replace | LooperState::Substitute) {
                    let xf = self.xfade_samples();
                    self.feed_fade.ramp_to(1.0, xf);
                }
                self.transition_to_next(next);
                return;
            }

            fill_chain(&mut self.chunks, &mut self.ring, id, cur, self.rate > 0.0);

            let wet = self.wet.next();
            let dry = self.dry.next();
            let feedback = self.feedback.next();
            self.scratch_pos.next();
            let lf = self.loop_fade.advance();
            let pf = self.play_fade.advance();
            let ff = self.feed_fade.advance();

            let input = io.input[*i];
            let existing = self.ring.get(start + cur);
            let (out, write) = match self.state {
                LooperState::Overdub => (
                    wet * lf * existing + dry * input,
                    input + SAFETY_FEEDBACK * feedback * existing,
                ),
                LooperState::Replace => {
                    // old content drains out of the write mix over the
                    // crossfade instead of being cut hard
                    (dry * input, input + ff * existing)
                }
                _ => {
                    // substitute: the source stays audible while its
                    // audio is replaced underneath
                    let heard = match src_info {
                        Some((src_start, src_len)) if src_len > 0 => {
                            self.ring.get(src_start + cur % src_len)
                        }
                        _ => existing,
                    };
                    (wet * pf * heard + dry * input, input + ff * existing)
                }
            };
            self.ring.set(start + cur, write);
            io.output[*i] = out;

            let rate = self.rate as f64;
            if let Some(c) = self.chunks.get_mut(id) {
                c.pos += rate;
                if sync_on && io.sync_in[*i] != 0.0 {
                    if let Some(r) = self.next_rate.take() {
                        self.rate = r;
                    }
                }
                if c.pos < 0.0 {
                    c.pos += length as f64;
                    if let Some(r) = self.next_rate.take() {
                        self.rate = r;
                    }
                } else if c.pos >= length as f64 {
                    c.pos = c.pos.rem_euclid(length as f64);
                    if let Some(r) = self.next_rate.take() {
                        self.rate = r;
                    }
                }
            }
            *i += 1;
        }
    }

    /// Multiply: grow the loop cycle by cycle over the source
    fn run_multiply(&mut self, io: &mut VoiceIo<'_>, ctx: &RunContext, i: &mut usize) {
        let frames = io.frames();
        let cap = self.ring.capacity();
        let Some(id) = self.chunks.head() else {
            self.run_passthrough_rest(io, i);
            return;
        };

        while *i < frames {
            let Some(c) = self.chunks.get(id) else {
                self.run_passthrough_rest(io, i);
                return;
            };
            let (start, length, cycle, pos, start_adj) =
                (c.start, c.length, c.cycle_length, c.pos, c.start_adj);
            let (cycles, mark_end_lo, mark_end_hi) = (c.cycles, c.mark_end_lo, c.mark_end_hi);
            let src_info = c
                .source
                .and_then(|s| self.chunks.get(s))
                .map(|s| (s.start, s.length));
            let Some((src_start, src_len)) = src_info else {
                self.run_passthrough_rest(io, i);
                return;
            };
            if length == 0 || src_len == 0 {
                self.run_passthrough_rest(io, i);
                return;
            }

            let src_pos = (pos + start_adj as f64).rem_euclid(src_len as f64) as u64;
            let s_cur = pos as i64;

            // a deferred multiply-end lands on the chunk's own cycle
            // grid; loop-quantize chases the source's loop start
            let gate_pos = if self.quantize() == QuantizeMode::Loop {
                src_pos
            } else {
                s_cur.max(0) as u64
            };
            if self.waiting_for_sync && self.wait_gate(io.sync_in[*i], gate_pos, cycle, ctx.tempo) {
                io.sync_out[*i] = io.sync_in[*i];
                let next = self.next_state.take();
                self.waiting_for_sync = false;
                self.end_multiply(next.unwrap_or(LooperState::Play));
                return;
            }

            fill_chain(&mut self.chunks, &mut self.ring, id, src_pos, self.rate > 0.0);

            let wet_raw = self.wet.next();
            let dry = self.dry.next();
            let feedback = self.feedback.next();
            self.scratch_pos.next();
            self.loop_fade.advance();
            self.play_fade.advance();
            self.feed_fade.advance();
            // heading into mute: keep the loop inaudible already
            let wet = if self.next_state == Some(LooperState::Mute) {
                0.0
            } else {
                wet_raw
            };

            let sync_on = self.sync_enabled();
            if sync_on {
                io.sync_out[*i] = io.sync_in[*i];
            } else if self.boundary_pulse(src_pos, cycle, ctx.tempo) {
                io.sync_out[*i] = 1.0;
            }

            let input = io.input[*i];
            let src_sample = self.ring.get(src_start + src_pos);
            io.output[*i] = wet * src_sample + dry * input;

            if s_cur >= 0 {
                let quantized = self.quantize() != QuantizeMode::Off;
                let past_end =
                    !self.round_mode() && mark_end_lo != NO_MARK && (s_cur as u64) > mark_end_lo;
                let write = if (cycles <= 1 && quantized) || past_end {
                    // not yet (or no longer) taking the new input
                    feedback * src_sample
                } else {
                    input + SAFETY_FEEDBACK * feedback * src_sample
                };
                self.ring.set(start + s_cur as u64, write);
            }

            let rate = self.rate as f64;
            let mut grow = false;
            let mut finish = false;
            if let Some(c) = self.chunks.get_mut(id) {
                c.pos += rate;
                if c.pos >= length as f64 {
                    if mark_end_hi != NO_MARK && c.pos >= mark_end_hi as f64 {
                        // round-mode ending reached the loop end
                        c.mark_end_lo = NO_MARK;
                        c.mark_end_hi = NO_MARK;
                        c.backfill = false;
                        c.pos = 0.0;
                        c.length = c.cycles * c.cycle_length;
                        finish = true;
                    } else {
                        c.cycles += 1;
                        c.length += c.cycle_length;
                        c.first_cycle = false;
                        grow = true;
                    }
                }
            }
            *i += 1;

            if finish {
                let next = self.next_state.take();
                self.transition_to_next(next);
                return;
            }
            if grow {
                let new_len = self.chunks.get(id).map_or(0, |c| c.length);
                if !self.chunks.ensure_space(id, new_len, cap) {
                    // out of space: abandon the multiply, previous loop
                    // comes back untouched
                    self.undo_loop();
                    self.abort_to_play();
                    return;
                }
            }
        }
    }

    /// Insert: open the source at the insert point and record new
    /// cycles into the gap
    fn run_insert(&mut self, io: &mut VoiceIo<'_>, ctx: &RunContext, i: &mut usize) {
        let frames = io.frames();
        let cap = self.ring.capacity();
        let Some(id) = self.chunks.head() else {
            self.run_passthrough_rest(io, i);
            return;
        };

        while *i < frames {
            let Some(c) = self.chunks.get(id) else {
                self.run_passthrough_rest(io, i);
                return;
            };
            let (start, length, cycle, pos) = (c.start, c.length, c.cycle_length, c.pos);
            let (first, ins_pos, mark_end_lo, mark_end_hi) =
                (c.first_cycle, c.ins_pos, c.mark_end_lo, c.mark_end_hi);
            let src_info = c
                .source
                .and_then(|s| self.chunks.get(s))
                .map(|s| (s.start, s.length));
            let Some((src_start, src_len)) = src_info else {
                self.run_passthrough_rest(io, i);
                return;
            };
            if length == 0 || cycle == 0 || src_len == 0 {
                self.run_passthrough_rest(io, i);
                return;
            }

            let src_pos = pos.rem_euclid(src_len as f64) as u64;
            let cur = pos.max(0.0) as u64;

            fill_chain(&mut self.chunks, &mut self.ring, id, cur, self.rate > 0.0);

            let wet_raw = self.wet.next();
            let dry = self.dry.next();
            self.feedback.next();
            self.scratch_pos.next();
            self.loop_fade.advance();
            self.play_fade.advance();
            self.feed_fade.advance();
            let wet = if self.next_state == Some(LooperState::Mute) {
                0.0
            } else {
                wet_raw
            };

            let input = io.input[*i];
            let quantized = self.quantize() != QuantizeMode::Off;
            if first && quantized {
                // still playing the source until the gap opens at the
                // next cycle boundary
                let src_sample = self.ring.get(src_start + src_pos);
                io.output[*i] = wet * src_sample + dry * input;
            } else if !self.round_mode() && mark_end_lo != NO_MARK && cur > mark_end_lo {
                // finishing an unrounded insert with silence
                self.ring.set(start + cur, 0.0);
                io.output[*i] = dry * input;
            } else {
                self.ring.set(start + cur, input);
                io.output[*i] = dry * input;
            }

            let sync_on = self.sync_enabled();
            if sync_on {
                io.sync_out[*i] = io.sync_in[*i];
            } else if self.boundary_pulse(cur % length.max(1), cycle, ctx.tempo) {
                io.sync_out[*i] = 1.0;
            }

            let rate = self.rate as f64;
            let mut finish = false;
            let mut grow = false;
            if let Some(c) = self.chunks.get_mut(id) {
                c.pos += rate;
                if mark_end_hi != NO_MARK && c.pos >= mark_end_hi as f64 {
                    // the parked ending arrived: backfill the remainder
                    // from the source and round the length out
                    c.mark_end_lo = c.pos.max(0.0) as u64;
                    c.mark_end_hi = c.length.saturating_sub(1);
                    c.backfill = true;
                    c.length = c.cycles * c.cycle_length;
                    finish = true;
                } else {
                    if c.first_cycle && cur % cycle == 0 {
                        c.first_cycle = false;
                    }
                    if cur % cycle == (ins_pos + cycle - 1) % cycle {
                        grow = true;
                    }
                }
            }
            *i += 1;

            if finish {
                let next = self.next_state.take();
                self.transition_to_next(next);
                return;
            }
            if grow {
                let new_len = length + cycle;
                if !self.chunks.ensure_space(id, new_len, cap) {
                    // out of space: finish early, keep what fits
                    self.abort_to_play();
                    return;
                }
                if let Some(c) = self.chunks.get_mut(id) {
                    c.cycles += 1;
                    c.length += c.cycle_length;
                }
            }
        }
    }

    /// Play-family states: Play, OneShot, Scratch, Mute
    fn run_play(&mut self, io: &mut VoiceIo<'_>, ctx: &RunContext, i: &mut usize) {
        let frames = io.frames();
        let Some(id) = self.chunks.head() else {
            self.run_passthrough_rest(io, i);
            return;
        };
        let Some(head) = self.chunks.get(id) else {
            self.run_passthrough_rest(io, i);
            return;
        };
        let length = head.length;
        if length == 0 {
            self.run_passthrough_rest(io, i);
            return;
        }

        // scratch velocity is derived once per span
        let rate_eff = if self.state == LooperState::Scratch {
            let pos = head.pos;
            self.update_scratch_rate(pos, length)
        } else {
            self.rate
        };

        while *i < frames {
            let Some(c) = self.chunks.get(id) else { break };
            let (start, cycle, pos) = (c.start, c.cycle_length, c.pos);
            let cur = pos.rem_euclid(length as f64) as u64;

            let sync_on = self.sync_enabled();
            if sync_on {
                io.sync_out[*i] = io.sync_in[*i];
            } else if self.boundary_pulse(cur, cycle, ctx.tempo) {
                io.sync_out[*i] = 1.0;
            }

            if self.waiting_for_sync && self.wait_gate(io.sync_in[*i], cur, cycle, ctx.tempo) {
                let next = self.next_state.take();
                self.waiting_for_sync = false;
                self.transition_to_next(next);
                return;
            }

            let wet = self.wet.next();
            let dry = self.dry.next();
            self.feedback.next();
            self.scratch_pos.next();
            let pf = self.play_fade.advance();
            let lf = self.loop_fade.advance();
            self.feed_fade.advance();
            let tmp_wet = wet * pf * lf;

            fill_chain(&mut self.chunks, &mut self.ring, id, cur, rate_eff > 0.0);

            let input = io.input[*i];
            let sample = self.ring.get(start + cur);
            io.output[*i] = tmp_wet * sample + dry * input;
            *i += 1;

            let mut oneshot_done = false;
            if let Some(c) = self.chunks.get_mut(id) {
                c.pos += rate_eff as f64;
                let idx = *i - 1;
                if sync_on && io.sync_in[idx] != 0.0 {
                    if let Some(r) = self.next_rate.take() {
                        self.rate = r;
                    }
                }
                if c.pos >= length as f64 {
                    oneshot_done = self.state == LooperState::OneShot;
                    if let Some(r) = self.next_rate.take() {
                        self.rate = r;
                    }
                } else if c.pos < 0.0 {
                    c.pos += length as f64;
                    oneshot_done = self.state == LooperState::OneShot;
                    if let Some(r) = self.next_rate.take() {
                        self.rate = r;
                    }
                }
            }
            if oneshot_done {
                // one-shot finished its pass; fade to silence
                self.state = LooperState::Mute;
                let xf = self.xfade_samples();
                self.play_fade.ramp_to(0.0, xf);
            }
        }

        // recenter the fractional position inside the loop
        if let Some(c) = self.chunks.get_mut(id) {
            if length > 0 {
                c.pos = c.pos.rem_euclid(length as f64);
            }
        }
    }

    /// Delay: the loop length is the delay time; input feeds the ring
    /// continuously unless hold mode freezes it
    fn run_delay(&mut self, io: &mut VoiceIo<'_>, i: &mut usize) {
        let frames = io.frames();
        let Some(id) = self.chunks.head() else {
            self.run_passthrough_rest(io, i);
            return;
        };
        let length = self.chunks.get(id).map_or(0, |c| c.length);
        if length == 0 {
            self.run_passthrough_rest(io, i);
            return;
        }
        let hold = self.hold_mode;

        while *i < frames {
            let wet = self.wet.next();
            let dry = self.dry.next();
            let feedback = self.feedback.next();
            self.scratch_pos.next();

            let Some(c) = self.chunks.get(id) else { break };
            let (start, pos) = (c.start, c.pos);
            let (backfill, mark_end_lo, mark_end_hi) = (c.backfill, c.mark_end_lo, c.mark_end_hi);
            let cur = pos.rem_euclid(length as f64) as u64;

            if backfill && mark_end_lo != NO_MARK && cur >= mark_end_lo && cur <= mark_end_hi {
                // this stretch of the buffer is stale, clear it first
                self.ring.set(start + cur, 0.0);
                let positive = self.rate > 0.0;
                if let Some(c) = self.chunks.get_mut(id) {
                    if positive {
                        c.mark_end_lo = cur;
                    } else {
                        c.mark_end_hi = cur;
                    }
                }
            }

            let input = io.input[*i];
            let sample = self.ring.get(start + cur);
            io.output[*i] = wet * sample + dry * input;
            if !hold {
                self.ring.set(start + cur, input + feedback * sample);
            }

            let sync_on = self.sync_enabled();
            if sync_on || self.quantize() == QuantizeMode::Off {
                io.sync_out[*i] = io.sync_in[*i];
            } else if self.chunks.get(id).map_or(false, |c| {
                c.cycle_length > 0 && cur % c.cycle_length == 0
            }) {
                io.sync_out[*i] = 1.0;
            }

            let rate = self.rate as f64;
            if let Some(c) = self.chunks.get_mut(id) {
                c.pos += rate;
                if c.backfill && c.mark_end_lo == c.mark_end_hi {
                    c.backfill = false;
                    c.mark_end_lo = NO_MARK;
                    c.mark_end_hi = NO_MARK;
                } else if c.pos < 0.0 {
                    c.pos += length as f64;
                }
            }
            *i += 1;
        }

        if let Some(c) = self.chunks.get_mut(id) {
            c.pos = c.pos.rem_euclid(length as f64);
        }
    }

    /// Whether this sample position is a pulse-worthy boundary for the
    /// current quantize mode (sync output generation)
    fn boundary_pulse(&self, cur: u64, cycle_len: u64, tempo: f32) -> bool {
        match self.quantize() {
            QuantizeMode::Off => true,
            QuantizeMode::Cycle => cycle_len > 0 && cur % cycle_len == 0,
            QuantizeMode::Loop => cur == 0,
            QuantizeMode::Eighth => {
                let e = self.eighth_len(tempo);
                e > 0 && cur % e == 0
            }
        }
    }

    /// Derive the scratch playback rate from the smoothed scratch
    /// position control
    fn update_scratch_rate(&mut self, pos: f64, length: u64) -> f32 {
        let target = self
            .controls
            .get(ControlId::ScratchPosition)
            .clamp(0.0, 1.0);
        let pos_ratio = (pos / length as f64) as f32;

        if self.last_scratch_val != target && self.scratch_samples > 0 {
            if self.scratch_samples < SCRATCH_SETTLE_SAMPLES {
                // head towards the new destination over the time the
                // gesture took
                self.scratch_rate =
                    ((target - pos_ratio) as f64 * length as f64 / self.scratch_samples as f64)
                        as f32;
            }
            self.scratch_samples = 0;
            self.last_scratch_val = target;
            self.scratch_rate
        } else if self.scratch_rate.abs() < 0.2
            || self.scratch_samples > SCRATCH_SETTLE_SAMPLES
            || (self.scratch_rate > 0.0 && pos_ratio >= self.last_scratch_val)
            || (self.scratch_rate < 0.0 && pos_ratio <= self.last_scratch_val)
        {
            // destination reached (or the gesture went stale)
            self.scratch_rate = 0.0;
            if self.use_rate() {
                self.controls.get(ControlId::Rate)
            } else {
                0.0
            }
        } else {
            self.scratch_rate
        }
    }
}
