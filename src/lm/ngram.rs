//! In-memory N-gram language model with back-off.
//!
//! Probabilities are natural-log scaled. Word ids are the dictionary's
//! word ids; the loader that builds this structure is responsible for
//! aligning them. Missing higher-order entries back off:
//! `P(w|v) = bo(v) + P(w)` and `P(w|u,v) = bo(u,v) + P(w|v)`.

use crate::am::{LOG_ZERO, LogProb};
use crate::dict::WordId;
use std::collections::HashMap;

/// One direction of an N-gram model (up to trigram).
#[derive(Debug, Clone, Default)]
pub struct NgramModel {
    unigram: Vec<LogProb>,
    backoff_uni: Vec<LogProb>,
    bigram: HashMap<(WordId, WordId), LogProb>,
    backoff_bi: HashMap<(WordId, WordId), LogProb>,
    trigram: HashMap<(WordId, WordId, WordId), LogProb>,
    max_unigram: LogProb,
}

impl NgramModel {
    /// Create a model over `nwords` words with all probabilities at
    /// log-zero until set.
    #[must_use]
    pub fn new(nwords: usize) -> Self {
        Self {
            unigram: vec![LOG_ZERO; nwords],
            backoff_uni: vec![0.0; nwords],
            bigram: HashMap::new(),
            backoff_bi: HashMap::new(),
            trigram: HashMap::new(),
            max_unigram: LOG_ZERO,
        }
    }

    /// Create a model where every word has probability `1/nwords`.
    #[must_use]
    pub fn uniform(nwords: usize) -> Self {
        let mut model = Self::new(nwords);
        let p = -(nwords.max(1) as f32).ln();
        for w in 0..nwords {
            model.set_unigram(w as WordId, p);
        }
        model
    }

    /// Number of words the model is defined over.
    #[must_use]
    pub fn nwords(&self) -> usize {
        self.unigram.len()
    }

    /// Set a unigram log probability.
    pub fn set_unigram(&mut self, w: WordId, p: LogProb) {
        self.unigram[w as usize] = p;
        if p > self.max_unigram {
            self.max_unigram = p;
        }
    }

    /// Set the back-off weight applied after a unigram context.
    pub fn set_backoff_uni(&mut self, w: WordId, bo: LogProb) {
        self.backoff_uni[w as usize] = bo;
    }

    /// Set a bigram log probability for `P(w|v)`.
    pub fn set_bigram(&mut self, v: WordId, w: WordId, p: LogProb) {
        self.bigram.insert((v, w), p);
    }

    /// Set the back-off weight for the bigram context `(u, v)`.
    pub fn set_backoff_bi(&mut self, u: WordId, v: WordId, bo: LogProb) {
        self.backoff_bi.insert((u, v), bo);
    }

    /// Set a trigram log probability for `P(w|u,v)`.
    pub fn set_trigram(&mut self, u: WordId, v: WordId, w: WordId, p: LogProb) {
        self.trigram.insert((u, v, w), p);
    }

    /// Unigram log probability.
    #[must_use]
    pub fn prob_uni(&self, w: WordId) -> LogProb {
        self.unigram.get(w as usize).copied().unwrap_or(LOG_ZERO)
    }

    /// Bigram log probability with unigram back-off.
    #[must_use]
    pub fn prob_bi(&self, v: WordId, w: WordId) -> LogProb {
        match self.bigram.get(&(v, w)) {
            Some(&p) => p,
            None => {
                let bo = self
                    .backoff_uni
                    .get(v as usize)
                    .copied()
                    .unwrap_or(0.0);
                bo + self.prob_uni(w)
            }
        }
    }

    /// Trigram log probability with bigram back-off.
    #[must_use]
    pub fn prob_tri(&self, u: WordId, v: WordId, w: WordId) -> LogProb {
        match self.trigram.get(&(u, v, w)) {
            Some(&p) => p,
            None => {
                let bo = self.backoff_bi.get(&(u, v)).copied().unwrap_or(0.0);
                bo + self.prob_bi(v, w)
            }
        }
    }

    /// Best unigram value over the whole vocabulary (factoring ceiling).
    #[must_use]
    pub fn max_unigram(&self) -> LogProb {
        self.max_unigram
    }

    /// True if any trigram entry is present.
    #[must_use]
    pub fn has_trigram(&self) -> bool {
        !self.trigram.is_empty()
    }
}

/// The N-gram pair used by the decoder: a forward model for the
/// frame-synchronous pass and an optional backward (reversed-context)
/// model for the stack decoding pass.
#[derive(Debug, Clone, Default)]
pub struct NgramLm {
    /// Forward model (unigram/bigram).
    pub forward: NgramModel,
    /// Backward model with trigrams, contexts in reverse word order.
    pub backward: Option<NgramModel>,
}

impl NgramLm {
    /// Build from a forward model only.
    #[must_use]
    pub fn from_forward(forward: NgramModel) -> Self {
        Self {
            forward,
            backward: None,
        }
    }

    /// LM score for the second pass: `P(w | next1, next2)` using the
    /// backward trigram when available, else the forward bigram
    /// `P(w | next1)` read in reverse.
    #[must_use]
    pub fn backward_prob(&self, next2: Option<WordId>, next1: WordId, w: WordId) -> LogProb {
        match (&self.backward, next2) {
            (Some(back), Some(n2)) => back.prob_tri(n2, next1, w),
            (Some(back), None) => back.prob_bi(next1, w),
            (None, _) => self.forward.prob_bi(w, next1),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn backoff_chain() {
        let mut m = NgramModel::new(3);
        m.set_unigram(0, -1.0);
        m.set_unigram(1, -2.0);
        m.set_unigram(2, -3.0);
        m.set_backoff_uni(0, -0.5);
        m.set_bigram(0, 1, -0.25);

        // Explicit bigram.
        assert!((m.prob_bi(0, 1) + 0.25).abs() < 1e-6);
        // Backed-off bigram: bo(0) + P(2).
        assert!((m.prob_bi(0, 2) + 3.5).abs() < 1e-6);
        // Trigram falls back to bigram with zero bigram-context weight.
        assert!((m.prob_tri(2, 0, 1) - m.prob_bi(0, 1)).abs() < 1e-6);

        m.set_backoff_bi(2, 0, -0.75);
        assert!((m.prob_tri(2, 0, 1) - (-0.75 + m.prob_bi(0, 1))).abs() < 1e-6);

        m.set_trigram(2, 0, 1, -0.1);
        assert!((m.prob_tri(2, 0, 1) + 0.1).abs() < 1e-6);
    }

    #[test]
    fn uniform_sums_to_one() {
        let m = NgramModel::uniform(4);
        let total: f32 = (0..4).map(|w| m.prob_uni(w).exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!((m.max_unigram() - m.prob_uni(0)).abs() < 1e-6);
    }

    #[test]
    fn backward_prob_prefers_trigram_model() {
        let mut forward = NgramModel::new(3);
        forward.set_unigram(0, -1.0);
        forward.set_bigram(2, 0, -0.5);

        let mut backward = NgramModel::new(3);
        backward.set_unigram(0, -1.0);
        backward.set_bigram(1, 0, -0.3);
        backward.set_trigram(2, 1, 0, -0.2);

        let lm = NgramLm {
            forward: forward.clone(),
            backward: Some(backward),
        };
        assert!((lm.backward_prob(Some(2), 1, 0) + 0.2).abs() < 1e-6);
        assert!((lm.backward_prob(None, 1, 0) + 0.3).abs() < 1e-6);

        let lm2 = NgramLm::from_forward(forward);
        // Without a backward model, falls back to the forward bigram.
        assert!((lm2.backward_prob(None, 2, 0) + 0.5).abs() < 1e-6);
    }
}
