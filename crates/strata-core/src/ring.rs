//! Fixed-size sample ring for one loop voice
//!
//! All of a voice's recorded audio lives in a single circular `f32`
//! buffer whose length is a power of two, so wrap-around is a bitmask
//! instead of a division. The ring is addressed with monotonically
//! increasing *ring addresses*: the physical slot for address `a` is
//! `a & mask`. Loop chunks claim half-open address ranges; once the
//! write head has advanced more than one full capacity past a chunk's
//! start, that chunk's slots have been physically reused (see
//! [`crate::chunk::ChunkArena::ensure_space`]).
//!
//! The ring is owned exclusively by one voice and only mutated from
//! the audio thread. Every operation here is allocation-free and
//! bounded-time.

use crate::types::Sample;

/// Circular sample storage with power-of-two capacity
pub struct SampleRing {
    data: Box<[Sample]>,
    mask: u64,
}

impl SampleRing {
    /// Create a ring holding at least `secs` seconds at `sample_rate`
    ///
    /// The requested size is rounded up to the next power of two.
    pub fn with_seconds(sample_rate: u32, secs: f32) -> Self {
        let wanted = (sample_rate as f64 * secs as f64).ceil() as usize;
        Self::with_capacity(wanted.max(2).next_power_of_two())
    }

    /// Create a ring with an exact power-of-two capacity
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        Self {
            data: vec![0.0; capacity].into_boxed_slice(),
            mask: (capacity - 1) as u64,
        }
    }

    /// Total capacity in samples
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    /// Seconds of audio the ring can hold at the given rate
    pub fn seconds(&self, sample_rate: u32) -> f32 {
        self.data.len() as f32 / sample_rate as f32
    }

    /// Read the sample at a ring address
    #[inline]
    pub fn get(&self, addr: u64) -> Sample {
        self.data[(addr & self.mask) as usize]
    }

    /// Write the sample at a ring address
    #[inline]
    pub fn set(&mut self, addr: u64, value: Sample) {
        self.data[(addr & self.mask) as usize] = value;
    }

    /// Copy `out.len()` samples starting at `start` into `out`
    ///
    /// The copy is split in at most two parts when the physical range
    /// crosses the wrap point; the result is identical either way.
    pub fn read(&self, start: u64, out: &mut [Sample]) {
        let cap = self.data.len();
        debug_assert!(out.len() <= cap);
        let first = (start & self.mask) as usize;
        let head = (cap - first).min(out.len());
        out[..head].copy_from_slice(&self.data[first..first + head]);
        let rest = out.len() - head;
        if rest > 0 {
            out[head..].copy_from_slice(&self.data[..rest]);
        }
    }

    /// Zero `count` samples starting at `start`
    pub fn clear(&mut self, start: u64, count: u64) {
        let count = count.min(self.capacity());
        let cap = self.data.len();
        let first = (start & self.mask) as usize;
        let head = (cap - first).min(count as usize);
        self.data[first..first + head].fill(0.0);
        let rest = count as usize - head;
        if rest > 0 {
            self.data[..rest].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let ring = SampleRing::with_seconds(48000, 1.0);
        assert!(ring.capacity().is_power_of_two());
        assert!(ring.capacity() >= 48000);
    }

    #[test]
    fn test_addresses_wrap_with_mask() {
        let mut ring = SampleRing::with_capacity(8);
        ring.set(3, 0.5);
        assert_eq!(ring.get(3), 0.5);
        // address 11 aliases slot 3
        assert_eq!(ring.get(11), 0.5);
        ring.set(8 + 1, -1.0);
        assert_eq!(ring.get(1), -1.0);
    }

    #[test]
    fn test_wrap_crossing_read_matches_straight_read() {
        let cap = 64u64;
        let mut ring = SampleRing::with_capacity(cap as usize);
        for a in 0..cap {
            ring.set(a, a as f32);
        }

        // Straight read fully inside the buffer.
        let mut straight = [0.0f32; 16];
        ring.read(8, &mut straight);
        for (i, s) in straight.iter().enumerate() {
            assert_eq!(*s, (8 + i as u64) as f32);
        }

        // The same physical samples read through a wrap-crossing range:
        // address cap+8 aliases slot 8.
        let mut crossing = [0.0f32; 16];
        ring.read(cap - 8, &mut crossing);
        for (i, s) in crossing.iter().enumerate() {
            assert_eq!(*s, ring.get(cap - 8 + i as u64));
        }

        let mut aliased = [0.0f32; 16];
        ring.read(cap + 8, &mut aliased);
        assert_eq!(aliased, straight);
    }

    #[test]
    fn test_clear_wraps() {
        let mut ring = SampleRing::with_capacity(16);
        for a in 0..16 {
            ring.set(a, 1.0);
        }
        ring.clear(14, 4);
        assert_eq!(ring.get(14), 0.0);
        assert_eq!(ring.get(15), 0.0);
        assert_eq!(ring.get(16), 0.0); // slot 0
        assert_eq!(ring.get(17), 0.0); // slot 1
        assert_eq!(ring.get(2), 1.0);
    }
}
