//! Lazy frontfill/backfill of derived chunks
//!
//! A chunk created partway through its source's cycle starts life with
//! regions that were never physically written: the part before the
//! entry point (frontfill) and, once the operation ends, the part
//! after the recorded extent up to the full loop length (backfill).
//! Those regions are populated sample-by-sample, exactly once each, by
//! copying from the source chunk as the play position walks across
//! them; the pending-range markers shrink monotonically until empty.
//!
//! A chunk whose source was invalidated before its fill completed is
//! filled with silence instead (graceful degradation, never stale ring
//! data).

use crate::chunk::{ChunkArena, ChunkId, NO_MARK};
use crate::ring::SampleRing;

/// Deepest source-chain we will walk in one call; bounded by the
/// arena size, so this is never hit in practice
const MAX_CHAIN: usize = 64;

/// Fill any pending regions of `head` and its ancestors at position `cur`
///
/// `cur` is the head chunk's wrapped sample position for this sample.
/// Filling proceeds from the oldest unfilled ancestor towards the
/// head, so each chunk copies from an already-filled source.
pub(crate) fn fill_chain(
    chunks: &mut ChunkArena,
    ring: &mut SampleRing,
    head: ChunkId,
    cur: u64,
    rate_positive: bool,
) {
    // descend to the oldest chunk that still needs filling
    let mut chain = [head; MAX_CHAIN];
    let mut depth = 0usize;
    let mut node = Some(head);
    while let Some(id) = node {
        let Some(chunk) = chunks.get(id) else { break };
        if !(chunk.frontfill || chunk.backfill) {
            break;
        }
        chain[depth] = id;
        depth += 1;
        if depth == MAX_CHAIN {
            break;
        }
        node = chunk.source;
    }
    if depth == 0 {
        return; // everything is filled
    }

    // fill from earliest to latest
    for idx in (0..depth).rev() {
        let id = chain[idx];
        let Some(chunk) = chunks.get(id) else { continue };
        let (start, start_adj, end_adj) = (chunk.start, chunk.start_adj, chunk.end_adj);
        let frontfill = chunk.frontfill && chunk.mark_lo <= cur && cur <= chunk.mark_hi;
        let backfill =
            !frontfill && chunk.backfill && chunk.mark_end_lo <= cur && cur <= chunk.mark_end_hi;
        if !frontfill && !backfill {
            continue;
        }
        let src = chunk
            .source
            .and_then(|s| chunks.get(s))
            .map(|s| (s.start, s.length));

        if frontfill {
            let value = match src {
                Some((src_start, src_len)) if src_len > 0 => ring.get(src_start + cur % src_len),
                _ => 0.0,
            };
            ring.set(start + cur, value);
            let Some(chunk) = chunks.get_mut(id) else { continue };
            if rate_positive {
                chunk.mark_lo = cur;
            } else {
                chunk.mark_hi = cur;
            }
            if chunk.mark_lo == chunk.mark_hi {
                chunk.frontfill = false;
                chunk.mark_lo = NO_MARK;
                chunk.mark_hi = NO_MARK;
            }
        } else {
            let value = match src {
                Some((src_start, src_len)) if src_len > 0 => {
                    let idx = (cur + start_adj) as i64 - end_adj as i64;
                    ring.get(src_start + idx.rem_euclid(src_len as i64) as u64)
                }
                _ => 0.0,
            };
            ring.set(start + cur, value);
            let Some(chunk) = chunks.get_mut(id) else { continue };
            if rate_positive {
                chunk.mark_end_lo = cur;
            } else {
                chunk.mark_end_hi = cur;
            }
            if chunk.mark_end_lo == chunk.mark_end_hi {
                chunk.backfill = false;
                chunk.mark_end_lo = NO_MARK;
                chunk.mark_end_hi = NO_MARK;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: u64 = 1 << 12;

    fn arena_with_source(ring: &mut SampleRing) -> (ChunkArena, ChunkId, ChunkId) {
        let mut arena = ChunkArena::new(8);
        let src = arena.push_chunk(100, CAP).unwrap();
        {
            let c = arena.get_mut(src).unwrap();
            c.length = 100;
            c.cycle_length = 100;
        }
        for i in 0..100u64 {
            ring.set(i, i as f32);
        }
        let dst = arena.push_chunk(100, CAP).unwrap();
        {
            let c = arena.get_mut(dst).unwrap();
            c.length = 100;
            c.cycle_length = 100;
            c.source = Some(src);
            c.frontfill = true;
            c.mark_lo = 0;
            c.mark_hi = 49;
        }
        (arena, src, dst)
    }

    #[test]
    fn test_frontfill_copies_from_source_once() {
        let mut ring = SampleRing::with_capacity(CAP as usize);
        let (mut arena, _src, dst) = arena_with_source(&mut ring);
        let dst_start = arena.get(dst).unwrap().start;

        for cur in 0..50u64 {
            fill_chain(&mut arena, &mut ring, dst, cur, true);
            assert_eq!(ring.get(dst_start + cur), cur as f32);
        }
        // the pending range shrank to empty
        let c = arena.get(dst).unwrap();
        assert!(!c.frontfill);
        assert_eq!(c.mark_lo, NO_MARK);
    }

    #[test]
    fn test_fill_outside_marks_is_ignored() {
        let mut ring = SampleRing::with_capacity(CAP as usize);
        let (mut arena, _src, dst) = arena_with_source(&mut ring);
        let dst_start = arena.get(dst).unwrap().start;

        fill_chain(&mut arena, &mut ring, dst, 80, true);
        assert_eq!(ring.get(dst_start + 80), 0.0);
        assert!(arena.get(dst).unwrap().frontfill);
    }

    #[test]
    fn test_invalid_source_fills_silence() {
        let mut ring = SampleRing::with_capacity(CAP as usize);
        let (mut arena, _src, dst) = arena_with_source(&mut ring);
        let dst_start = arena.get(dst).unwrap().start;
        // sever the source link as invalidation would
        arena.get_mut(dst).unwrap().source = None;
        ring.set(dst_start + 10, 123.0); // stale data that must not survive

        fill_chain(&mut arena, &mut ring, dst, 10, true);
        assert_eq!(ring.get(dst_start + 10), 0.0);
    }

    #[test]
    fn test_backfill_uses_adjusted_source_index() {
        let mut ring = SampleRing::with_capacity(CAP as usize);
        let (mut arena, _src, dst) = arena_with_source(&mut ring);
        let dst_start = arena.get(dst).unwrap().start;
        {
            let c = arena.get_mut(dst).unwrap();
            c.frontfill = false;
            c.mark_lo = NO_MARK;
            c.mark_hi = NO_MARK;
            c.backfill = true;
            c.mark_end_lo = 60;
            c.mark_end_hi = 99;
            c.start_adj = 0;
            c.end_adj = 0;
        }
        fill_chain(&mut arena, &mut ring, dst, 60, true);
        assert_eq!(ring.get(dst_start + 60), 60.0);
        assert_eq!(arena.get(dst).unwrap().mark_end_lo, 60);
    }
}
