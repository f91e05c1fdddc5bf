//! Word graph accumulated during stack decoding.
//!
//! Every word expansion of the second pass contributes a graph word with
//! its boundary frames and scores. After search, words with the same id
//! and near-identical boundaries are merged, and adjacency (end meets
//! begin) defines the edges.

use crate::am::LogProb;
use crate::dict::WordId;

/// One word instance in the graph.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphWord {
    /// Word id.
    pub wid: WordId,
    /// First frame.
    pub begin: i32,
    /// Last frame.
    pub end: i32,
    /// Best combined score observed for this instance.
    pub score: LogProb,
}

/// Directed word graph over time.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WordGraph {
    /// Word instances.
    pub words: Vec<GraphWord>,
    /// Edges as (from, to) index pairs: `from.end + 1 == to.begin`.
    pub edges: Vec<(usize, usize)>,
}

impl WordGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one expanded word.
    pub fn add(&mut self, wid: WordId, begin: i32, end: i32, score: LogProb) {
        self.words.push(GraphWord {
            wid,
            begin,
            end,
            score,
        });
    }

    /// Merge same-word instances whose boundaries differ by at most
    /// `range` frames (keeping the better score), then rebuild edges
    /// from frame adjacency.
    pub fn finalize(&mut self, range: i32) {
        let mut merged: Vec<GraphWord> = Vec::new();
        // Process best-first so a kept instance carries its best score.
        let mut words = std::mem::take(&mut self.words);
        words.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for w in words {
            let dup = merged.iter().any(|m| {
                m.wid == w.wid
                    && (m.begin - w.begin).abs() <= range
                    && (m.end - w.end).abs() <= range
            });
            if !dup {
                merged.push(w);
            }
        }
        merged.sort_by_key(|w| (w.begin, w.end, w.wid));
        self.words = merged;

        self.edges.clear();
        for (i, a) in self.words.iter().enumerate() {
            for (j, b) in self.words.iter().enumerate() {
                if a.end + 1 == b.begin {
                    self.edges.push((i, j));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn merge_within_range_keeps_best() {
        let mut g = WordGraph::new();
        g.add(1, 0, 9, -50.0);
        g.add(1, 1, 10, -40.0); // better, within range 2
        g.add(1, 0, 30, -45.0); // far end, kept separately
        g.finalize(2);
        assert_eq!(g.words.len(), 2);
        let close = g.words.iter().find(|w| w.end <= 12).unwrap();
        assert!((close.score + 40.0).abs() < 1e-6);
    }

    #[test]
    fn edges_follow_adjacency() {
        let mut g = WordGraph::new();
        g.add(1, 0, 4, -10.0);
        g.add(2, 5, 9, -12.0);
        g.add(3, 7, 9, -15.0); // not adjacent to word 1
        g.finalize(0);
        assert_eq!(g.edges, vec![(0, 1)]);
    }
}
