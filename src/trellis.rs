//! Word trellis: surviving word ends of the first pass.
//!
//! Append-only while the beam search runs. Finalisation buckets the atoms
//! by end frame and sorts each bucket by word id so the stack decoder can
//! look words up in logarithmic time. Back-pointers are dense atom ids
//! into the arena; the beginning-of-sentence sentinel is `None`.

use crate::am::{LOG_ZERO, LogProb};
use crate::dict::WordId;

/// Dense trellis atom id.
pub type AtomId = u32;

/// One surviving word end.
#[derive(Debug, Clone)]
pub struct TrellisAtom {
    /// The word that ended.
    pub wid: WordId,
    /// First frame of the word.
    pub begin: i32,
    /// Last frame of the word.
    pub end: i32,
    /// Accumulated Viterbi score up to `end` (AM + LM as applied by the
    /// first pass).
    pub score: LogProb,
    /// LM contribution consumed by this word on the first pass.
    pub lm_score: LogProb,
    /// Previous atom on the first-pass best path, `None` for BOS.
    pub prev: Option<AtomId>,
    /// Last non-transparent context word at this atom.
    pub last_cword: WordId,
}

/// The time-indexed trellis.
#[derive(Debug, Clone, Default)]
pub struct WordTrellis {
    /// Atom arena in emission order.
    pub atoms: Vec<TrellisAtom>,
    /// Atom ids bucketed by end frame, filled by [`Self::finalize`].
    buckets: Vec<Vec<AtomId>>,
    finalized: bool,
}

impl WordTrellis {
    /// Create an empty trellis.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of atoms stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// True when no atom was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Append an atom, returning its id.
    pub fn push(&mut self, atom: TrellisAtom) -> AtomId {
        debug_assert!(!self.finalized);
        let id = self.atoms.len() as AtomId;
        self.atoms.push(atom);
        id
    }

    /// Access an atom.
    #[must_use]
    pub fn atom(&self, id: AtomId) -> &TrellisAtom {
        &self.atoms[id as usize]
    }

    /// Re-index the atoms by end frame and sort each bucket by word id.
    pub fn finalize(&mut self, num_frames: usize) {
        self.buckets = vec![Vec::new(); num_frames];
        for (i, atom) in self.atoms.iter().enumerate() {
            let t = atom.end;
            if t >= 0 && (t as usize) < num_frames {
                self.buckets[t as usize].push(i as AtomId);
            }
        }
        for bucket in &mut self.buckets {
            bucket.sort_by_key(|&id| self.atoms[id as usize].wid);
        }
        self.finalized = true;
    }

    /// Atom ids ending exactly at frame `t` (finalised order: by word id).
    #[must_use]
    pub fn ending_at(&self, t: i32) -> &[AtomId] {
        debug_assert!(self.finalized);
        if t < 0 || t as usize >= self.buckets.len() {
            return &[];
        }
        &self.buckets[t as usize]
    }

    /// Binary search for the atom of `wid` ending at frame `t`.
    #[must_use]
    pub fn atom_at(&self, t: i32, wid: WordId) -> Option<AtomId> {
        let bucket = self.ending_at(t);
        let idx = bucket
            .binary_search_by_key(&wid, |&id| self.atoms[id as usize].wid)
            .ok()?;
        Some(bucket[idx])
    }

    /// Best-scoring atom ending at frame `t`.
    #[must_use]
    pub fn best_at(&self, t: i32) -> Option<AtomId> {
        let bucket = self.ending_at(t);
        bucket
            .iter()
            .copied()
            .max_by(|&a, &b| {
                self.atoms[a as usize]
                    .score
                    .partial_cmp(&self.atoms[b as usize].score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Best score over all atoms ending at frame `t`, or [`LOG_ZERO`].
    #[must_use]
    pub fn best_score_at(&self, t: i32) -> LogProb {
        self.best_at(t)
            .map_or(LOG_ZERO, |id| self.atoms[id as usize].score)
    }

    /// Follow the back-pointers from an atom, returning word ids in time
    /// order.
    #[must_use]
    pub fn backtrack(&self, from: AtomId) -> Vec<WordId> {
        let mut seq = Vec::new();
        let mut cur = Some(from);
        while let Some(id) = cur {
            let atom = &self.atoms[id as usize];
            seq.push(atom.wid);
            cur = atom.prev;
        }
        seq.reverse();
        seq
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::dict::WORD_INVALID;

    fn atom(wid: WordId, begin: i32, end: i32, score: f32, prev: Option<AtomId>) -> TrellisAtom {
        TrellisAtom {
            wid,
            begin,
            end,
            score,
            lm_score: 0.0,
            prev,
            last_cword: WORD_INVALID,
        }
    }

    #[test]
    fn lookup_after_finalize() {
        let mut tr = WordTrellis::new();
        let a = tr.push(atom(3, 0, 5, -10.0, None));
        let _b = tr.push(atom(1, 0, 5, -12.0, None));
        let c = tr.push(atom(2, 6, 9, -20.0, Some(a)));
        tr.finalize(10);

        // Buckets are sorted by word id.
        let ids = tr.ending_at(5);
        assert_eq!(ids.len(), 2);
        assert_eq!(tr.atom(ids[0]).wid, 1);
        assert_eq!(tr.atom(ids[1]).wid, 3);

        assert_eq!(tr.atom_at(5, 3), Some(a));
        assert_eq!(tr.atom_at(5, 2), None);
        assert_eq!(tr.atom_at(9, 2), Some(c));
        assert!(tr.ending_at(3).is_empty());
        assert!(tr.ending_at(-1).is_empty());
    }

    #[test]
    fn best_at_picks_highest_score() {
        let mut tr = WordTrellis::new();
        tr.push(atom(0, 0, 4, -30.0, None));
        let best = tr.push(atom(1, 0, 4, -20.0, None));
        tr.finalize(5);
        assert_eq!(tr.best_at(4), Some(best));
        assert!((tr.best_score_at(4) + 20.0).abs() < 1e-6);
        assert_eq!(tr.best_score_at(2), LOG_ZERO);
    }

    #[test]
    fn backtrack_follows_prev_chain() {
        let mut tr = WordTrellis::new();
        let a = tr.push(atom(7, 0, 3, -5.0, None));
        let b = tr.push(atom(8, 4, 8, -9.0, Some(a)));
        let c = tr.push(atom(9, 9, 12, -13.0, Some(b)));
        tr.finalize(13);
        assert_eq!(tr.backtrack(c), vec![7, 8, 9]);
    }

    #[test]
    fn atom_chain_has_contiguous_boundaries() {
        // Trellis integrity: begin = prev.end + 1 along any back-chain.
        let mut tr = WordTrellis::new();
        let a = tr.push(atom(0, 0, 3, -5.0, None));
        let b = tr.push(atom(1, 4, 8, -9.0, Some(a)));
        let c = tr.push(atom(2, 9, 12, -13.0, Some(b)));
        tr.finalize(13);

        for id in [a, b, c] {
            let atom = tr.atom(id);
            match atom.prev {
                Some(p) => assert_eq!(atom.begin, tr.atom(p).end + 1),
                None => assert_eq!(atom.begin, 0),
            }
        }
    }
}
