//! Loop chunk records and the per-voice chunk arena
//!
//! A [`LoopChunk`] is one historical version of a voice's loop: a
//! claim on a range of ring addresses plus the cycle geometry and the
//! lazy-fill bookkeeping needed to play it. Chunks are immutable once
//! finished; every new operation (record, overdub, multiply, insert,
//! replace, substitute, delay) chains a fresh chunk off the current
//! head, and Undo/Redo move the head pointer along the chain.
//!
//! Storage is a fixed pre-allocated arena addressed by [`ChunkId`]
//! handles carrying a generation tag, so use of an invalidated chunk is
//! detected instead of reading stale memory. Nothing here allocates
//! after construction; every operation is bounded by the arena size.

use crate::types::Sample;

/// Sentinel for an empty fill-marker range
pub const NO_MARK: u64 = u64::MAX;

/// Default number of chunk records per voice
///
/// Bounds the undo history depth. 64 versions is far more than a
/// performer walks back through, while the records themselves stay
/// small (a few KB per voice).
pub const DEFAULT_POOL_CHUNKS: usize = 64;

/// Stable handle to a chunk record
///
/// The generation tag changes whenever the slot is invalidated or
/// reused, so a stale handle simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkId {
    index: u32,
    gen: u32,
}

/// One historical version of a loop
///
/// Positions (`pos`) are fractional to support non-integral playback
/// rates; all lengths and markers are in samples. `start` is a ring
/// address, everything else is relative to the chunk.
#[derive(Debug, Clone, Copy)]
pub struct LoopChunk {
    /// Ring address of the chunk's sample 0
    pub start: u64,
    /// Current loop length in samples
    pub length: u64,
    /// Length of one cycle; `length` is a multiple of this once finalized
    pub cycle_length: u64,
    /// Number of cycles
    pub cycles: u64,
    /// Fractional playback/record position in `[0, length)`
    pub pos: f64,
    /// Cycles skipped at the front when a multiply began mid-loop
    pub start_adj: u64,
    /// Length difference vs. the source, set when an insert ends
    pub end_adj: u64,
    /// Cycle-relative position where an insert opens (Insert only)
    pub ins_pos: u64,
    /// Samples of the source that remained after the insert point (Insert only)
    pub rem_len: u64,
    /// Pending frontfill range (inclusive); `NO_MARK` when empty
    pub mark_lo: u64,
    pub mark_hi: u64,
    /// Pending backfill range (inclusive); `NO_MARK` when empty
    pub mark_end_lo: u64,
    pub mark_end_hi: u64,
    pub frontfill: bool,
    pub backfill: bool,
    /// Still inside the first cycle of a multiply/insert
    pub first_cycle: bool,
    /// Feedback level captured when the operation began
    pub orig_feedback: Sample,
    /// Chunk this one lazily copies its unwritten regions from
    pub source: Option<ChunkId>,
    /// Older neighbour in the history chain
    pub prev: Option<ChunkId>,
    /// Newer neighbour (kept across Undo so Redo can restore it)
    pub next: Option<ChunkId>,
    /// One past the highest ring address this chunk has claimed
    pub claimed: u64,
}

impl LoopChunk {
    fn blank(start: u64) -> Self {
        Self {
            start,
            length: 0,
            cycle_length: 0,
            cycles: 1,
            pos: 0.0,
            start_adj: 0,
            end_adj: 0,
            ins_pos: 0,
            rem_len: 0,
            mark_lo: NO_MARK,
            mark_hi: NO_MARK,
            mark_end_lo: NO_MARK,
            mark_end_hi: NO_MARK,
            frontfill: false,
            backfill: false,
            first_cycle: false,
            orig_feedback: 1.0,
            source: None,
            prev: None,
            next: None,
            claimed: start,
        }
    }

    /// Ring address of the chunk-relative sample index `offset`
    #[inline]
    pub fn addr(&self, offset: u64) -> u64 {
        self.start + offset
    }
}

struct Slot {
    chunk: LoopChunk,
    gen: u32,
    used: bool,
    valid: bool,
}

/// Fixed pool of chunk records plus the history chain state
///
/// `head` is the active chunk, `tail` the oldest still reachable.
/// After undoing everything `head` is `None` while `tail` keeps the
/// chain alive so Redo can climb back in.
pub struct ChunkArena {
    slots: Box<[Slot]>,
    head: Option<ChunkId>,
    tail: Option<ChunkId>,
    /// Highest ring address claimed by any chunk so far (monotonic)
    write_end: u64,
}

impl ChunkArena {
    pub fn new(pool_size: usize) -> Self {
        let slots = (0..pool_size)
            .map(|_| Slot {
                chunk: LoopChunk::blank(0),
                gen: 0,
                used: false,
                valid: false,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            head: None,
            tail: None,
            write_end: 0,
        }
    }

    /// The active chunk, if any
    #[inline]
    pub fn head(&self) -> Option<ChunkId> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<ChunkId> {
        self.tail
    }

    /// Next free ring address
    #[inline]
    pub fn write_end(&self) -> u64 {
        self.write_end
    }

    /// Whether a handle still resolves to live data
    #[inline]
    pub fn is_valid(&self, id: ChunkId) -> bool {
        let slot = &self.slots[id.index as usize];
        slot.used && slot.valid && slot.gen == id.gen
    }

    /// Resolve a handle, `None` if the chunk has been invalidated
    #[inline]
    pub fn get(&self, id: ChunkId) -> Option<&LoopChunk> {
        if self.is_valid(id) {
            Some(&self.slots[id.index as usize].chunk)
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut LoopChunk> {
        if self.is_valid(id) {
            Some(&mut self.slots[id.index as usize].chunk)
        } else {
            None
        }
    }

    /// Number of chunks reachable from the head via `prev`
    pub fn history_len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.head;
        while let Some(id) = cur {
            if !self.is_valid(id) {
                break;
            }
            n += 1;
            cur = self.slots[id.index as usize].chunk.prev;
        }
        n
    }

    /// Allocate a new chunk and link it as the head's successor
    ///
    /// The chunk starts at the current write end with an initial claim
    /// of `init_len` samples. Returns `None` when the claim cannot fit
    /// the ring or no record can be recycled (pool exhausted down to a
    /// lone active chunk).
    pub fn push_chunk(&mut self, init_len: u64, ring_capacity: u64) -> Option<ChunkId> {
        if init_len > ring_capacity {
            return None;
        }
        let index = self.find_slot()?;
        let start = self.write_end;

        let gen = self.slots[index].gen.wrapping_add(1);
        let slot = &mut self.slots[index];
        slot.gen = gen;
        slot.used = true;
        slot.valid = true;
        slot.chunk = LoopChunk::blank(start);
        slot.chunk.claimed = start + init_len;
        let id = ChunkId {
            index: index as u32,
            gen,
        };

        slot.chunk.prev = self.head;
        if let Some(head) = self.head {
            if self.is_valid(head) {
                self.slots[head.index as usize].chunk.next = Some(id);
            }
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }

        self.write_end = self.write_end.max(start + init_len);
        self.reclaim(self.write_end, ring_capacity, id);
        Some(id)
    }

    /// Grow a chunk's claim on the ring to `total_len` samples
    ///
    /// Fails (without touching anything) when the span would exceed the
    /// whole ring. On success, any older chunk whose region has now
    /// been physically reused is invalidated and its dependents lose
    /// their source link.
    pub fn ensure_space(&mut self, id: ChunkId, total_len: u64, ring_capacity: u64) -> bool {
        if total_len > ring_capacity {
            return false;
        }
        let (start, claimed) = match self.get(id) {
            Some(c) => (c.start, c.claimed),
            None => return false,
        };
        let new_claim = start + total_len;
        if new_claim <= claimed {
            return true;
        }
        self.slots[id.index as usize].chunk.claimed = new_claim;
        self.write_end = self.write_end.max(new_claim);
        self.reclaim(new_claim, ring_capacity, id);
        true
    }

    /// Move the head back one chunk, keeping the forward link for Redo
    ///
    /// When the previous chunk was the undone chunk's fill source, the
    /// playback position carries over (so audio continues seamlessly).
    /// No-op when the history is empty.
    pub fn undo(&mut self) {
        let Some(head) = self.head else { return };
        if !self.is_valid(head) {
            self.head = None;
            return;
        }
        let dead = self.slots[head.index as usize].chunk;
        let prev = dead.prev.filter(|p| self.is_valid(*p));

        if let Some(prev_id) = prev {
            let prev_chunk = &mut self.slots[prev_id.index as usize].chunk;
            if dead.source == Some(prev_id) && prev_chunk.length > 0 {
                prev_chunk.pos =
                    (dead.pos + dead.start_adj as f64).rem_euclid(prev_chunk.length as f64);
            }
            // leave prev.next pointing at the undone chunk for redo
            self.head = Some(prev_id);
            if self.slots[prev_id.index as usize].chunk.prev.is_none() {
                self.tail = Some(prev_id);
            }
        } else {
            self.head = None;
            // tail stays valid to support redo from nothing
        }
    }

    /// Move the head forward one chunk (inverse of [`Self::undo`])
    pub fn redo(&mut self) {
        let (from, next) = match self.head {
            Some(head) if self.is_valid(head) => {
                let next = self.slots[head.index as usize].chunk.next;
                (Some(head), next)
            }
            _ => (None, self.tail),
        };
        let Some(next_id) = next.filter(|n| self.is_valid(*n)) else {
            return;
        };

        if let Some(from_id) = from {
            let from_chunk = self.slots[from_id.index as usize].chunk;
            let next_chunk = &mut self.slots[next_id.index as usize].chunk;
            if next_chunk.source == Some(from_id) && next_chunk.length > 0 {
                next_chunk.pos = (from_chunk.pos + from_chunk.start_adj as f64)
                    .rem_euclid(next_chunk.length as f64);
            }
        }
        self.head = Some(next_id);
    }

    /// Undo everything (Redo can still climb back in from the tail)
    pub fn undo_all(&mut self) {
        self.head = None;
    }

    fn find_slot(&mut self) -> Option<usize> {
        // prefer a never-used record
        if let Some(i) = self.slots.iter().position(|s| !s.used) {
            return Some(i);
        }
        // then the oldest invalid one
        if let Some(i) = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.valid)
            .min_by_key(|(_, s)| s.chunk.start)
            .map(|(i, _)| i)
        {
            return Some(i);
        }
        // otherwise evict the oldest history entry, unless it is the
        // active chunk itself
        let tail = self.tail?;
        if Some(tail) == self.head {
            return None;
        }
        self.evict(tail);
        Some(tail.index as usize)
    }

    fn evict(&mut self, id: ChunkId) {
        let next = self.slots[id.index as usize].chunk.next;
        self.slots[id.index as usize].valid = false;
        self.slots[id.index as usize].gen = self.slots[id.index as usize].gen.wrapping_add(1);
        if self.tail == Some(id) {
            self.tail = next.filter(|n| self.is_valid(*n));
            if let Some(n) = self.tail {
                self.slots[n.index as usize].chunk.prev = None;
            }
        }
        self.drop_dead_sources();
    }

    /// Invalidate every chunk whose region was physically reused
    ///
    /// After the write head reaches `end`, ring data below
    /// `end - capacity` is gone. Chunk starts grow monotonically along
    /// the history, so this always removes a prefix of the chain.
    fn reclaim(&mut self, end: u64, ring_capacity: u64, keep: ChunkId) {
        let threshold = end.saturating_sub(ring_capacity);
        if threshold == 0 {
            return;
        }
        let mut any = false;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.used || !slot.valid || i == keep.index as usize {
                continue;
            }
            if slot.chunk.start < threshold {
                slot.valid = false;
                slot.gen = slot.gen.wrapping_add(1);
                any = true;
            }
        }
        if !any {
            return;
        }

        // invalidation always removes the oldest chunks (starts grow
        // monotonically along the chain), so the new tail is simply
        // the valid chunk with the lowest start address
        self.tail = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.used && s.valid)
            .min_by_key(|(_, s)| s.chunk.start)
            .map(|(i, s)| ChunkId {
                index: i as u32,
                gen: s.gen,
            });
        if let Some(t) = self.tail {
            self.slots[t.index as usize].chunk.prev = None;
        }
        if let Some(h) = self.head {
            if !self.is_valid(h) {
                self.head = None;
            }
        }
        self.drop_dead_sources();
    }

    /// Clear source links that point at invalidated chunks, so
    /// dependents know to silence-fill instead of copying stale audio
    fn drop_dead_sources(&mut self) {
        for i in 0..self.slots.len() {
            if !self.slots[i].used || !self.slots[i].valid {
                continue;
            }
            if let Some(src) = self.slots[i].chunk.source {
                if !self.is_valid(src) {
                    self.slots[i].chunk.source = None;
                }
            }
        }
    }
}
