//! Sync pulse generation and tracking
//!
//! The engine maintains one sync bus per block. Depending on the
//! selected source it carries driver-supplied pulses (External), a
//! tempo-derived pulse train (Internal), another voice's sync output
//! (Voice), or silence (None). The tracker also counts samples since
//! the last pulse, which relative-offset sync uses to phase-lock
//! voices of different lengths.

use crate::types::Sample;

/// Generates internal pulses and tracks distance to the last pulse
pub struct SyncTracker {
    sample_rate: f64,
    /// Phase accumulator for the internal tempo pulse
    phase: f64,
    /// Samples since the last pulse seen on the bus
    samples_since_pulse: u64,
}

impl SyncTracker {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            phase: 0.0,
            samples_since_pulse: 0,
        }
    }

    /// Samples elapsed since the last pulse on the bus
    #[inline]
    pub fn samples_since_pulse(&self) -> u64 {
        self.samples_since_pulse
    }

    /// Write a tempo-derived pulse train (one pulse per beat)
    pub fn fill_internal(&mut self, buf: &mut [Sample], tempo: f32) {
        buf.fill(0.0);
        if tempo <= 0.0 {
            return;
        }
        let period = self.sample_rate * 60.0 / tempo as f64;
        for slot in buf.iter_mut() {
            if self.phase <= 0.0 {
                *slot = 1.0;
                self.phase += period;
            }
            self.phase -= 1.0;
        }
    }

    /// Advance the pulse-distance counter over a span of the bus
    pub fn advance(&mut self, bus: &[Sample]) {
        for &s in bus {
            if s != 0.0 {
                self.samples_since_pulse = 0;
            } else {
                self.samples_since_pulse = self.samples_since_pulse.saturating_add(1);
            }
        }
    }

    /// Reset phase and distance (sync source change)
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.samples_since_pulse = 0;
    }
}
