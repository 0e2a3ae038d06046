//! Lock-free voice state for non-RT readers
//!
//! The audio thread publishes a voice's observable state into this
//! block of atomics after every run span; control surfaces read it
//! without touching the engine lock. All operations use
//! `Ordering::Relaxed` since only visibility is needed, not
//! synchronization with other memory.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::types::LooperState;

/// Atomic snapshot of one voice's readable outputs
pub struct VoiceAtomics {
    /// Current state (LooperState as u8)
    state: AtomicU8,
    /// Pending deferred state, 255 when none
    next_state: AtomicU8,
    /// Waiting for a sync pulse / quantize boundary
    waiting: AtomicBool,
    /// Loop length in seconds (f32 bits)
    loop_length: AtomicU32,
    /// Playback position in seconds (f32 bits)
    loop_position: AtomicU32,
    /// Cycle length in seconds (f32 bits)
    cycle_length: AtomicU32,
    /// Free loop memory in seconds (f32 bits)
    free_time: AtomicU32,
    /// Total loop memory in seconds (f32 bits)
    total_time: AtomicU32,
    /// Effective playback rate (f32 bits)
    true_rate: AtomicU32,
}

const NO_NEXT_STATE: u8 = u8::MAX;

#[inline]
fn store_f32(cell: &AtomicU32, v: f32) {
    cell.store(v.to_bits(), Ordering::Relaxed);
}

#[inline]
fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

impl VoiceAtomics {
    pub fn new(total_secs: f32) -> Self {
        Self {
            state: AtomicU8::new(LooperState::Play as u8),
            next_state: AtomicU8::new(NO_NEXT_STATE),
            waiting: AtomicBool::new(false),
            loop_length: AtomicU32::new(0f32.to_bits()),
            loop_position: AtomicU32::new(0f32.to_bits()),
            cycle_length: AtomicU32::new(0f32.to_bits()),
            free_time: AtomicU32::new(total_secs.to_bits()),
            total_time: AtomicU32::new(total_secs.to_bits()),
            true_rate: AtomicU32::new(1f32.to_bits()),
        }
    }

    // ── audio-thread publishers ─────────────────────────────────────

    pub fn publish_state(&self, state: LooperState, next: Option<LooperState>, waiting: bool) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.next_state
            .store(next.map_or(NO_NEXT_STATE, |s| s as u8), Ordering::Relaxed);
        self.waiting.store(waiting, Ordering::Relaxed);
    }

    pub fn publish_loop(&self, length_secs: f32, pos_secs: f32, cycle_secs: f32, free_secs: f32) {
        store_f32(&self.loop_length, length_secs);
        store_f32(&self.loop_position, pos_secs);
        store_f32(&self.cycle_length, cycle_secs);
        store_f32(&self.free_time, free_secs);
    }

    pub fn publish_rate(&self, rate: f32) {
        store_f32(&self.true_rate, rate);
    }

    // ── lock-free readers ───────────────────────────────────────────

    #[inline]
    pub fn state(&self) -> LooperState {
        LooperState::from_u8(self.state.load(Ordering::Relaxed)).unwrap_or(LooperState::Off)
    }

    #[inline]
    pub fn next_state(&self) -> Option<LooperState> {
        match self.next_state.load(Ordering::Relaxed) {
            NO_NEXT_STATE => None,
            v => LooperState::from_u8(v),
        }
    }

    #[inline]
    pub fn waiting(&self) -> bool {
        self.waiting.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loop_length(&self) -> f32 {
        load_f32(&self.loop_length)
    }

    #[inline]
    pub fn loop_position(&self) -> f32 {
        load_f32(&self.loop_position)
    }

    #[inline]
    pub fn cycle_length(&self) -> f32 {
        load_f32(&self.cycle_length)
    }

    #[inline]
    pub fn free_time(&self) -> f32 {
        load_f32(&self.free_time)
    }

    #[inline]
    pub fn total_time(&self) -> f32 {
        load_f32(&self.total_time)
    }

    #[inline]
    pub fn true_rate(&self) -> f32 {
        load_f32(&self.true_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_read() {
        let a = VoiceAtomics::new(40.0);
        assert_eq!(a.state(), LooperState::Play);
        assert_eq!(a.total_time(), 40.0);
        assert_eq!(a.free_time(), 40.0);

        a.publish_state(LooperState::Record, Some(LooperState::Play), true);
        a.publish_loop(2.0, 0.5, 1.0, 38.0);
        a.publish_rate(-1.0);

        assert_eq!(a.state(), LooperState::Record);
        assert_eq!(a.next_state(), Some(LooperState::Play));
        assert!(a.waiting());
        assert_eq!(a.loop_length(), 2.0);
        assert_eq!(a.loop_position(), 0.5);
        assert_eq!(a.cycle_length(), 1.0);
        assert_eq!(a.true_rate(), -1.0);
    }
}
