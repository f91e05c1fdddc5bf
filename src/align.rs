//! Concatenated word HMMs and forced alignment.
//!
//! Builds one flat HMM over a word sequence with exact cross-word
//! triphones (unlike the first pass, which approximates them), runs full
//! Viterbi against the feature sequence and reports unit boundaries at
//! word, phone or state granularity. The same structure drives the
//! second pass's exact acoustic re-scan of candidate words.

use crate::am::{AcousticModel, LOG_ZERO, LogProb, StateRef, compose_triphone};
use crate::config::IwcdMethod;
use crate::dict::{WordEntry, WordId, lookup_with_fallback};
use crate::error::{DecodeError, Result};
use crate::gauss::GaussianScorer;

/// Alignment granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AlignUnit {
    /// Per-word boundaries.
    Word,
    /// Per-phone boundaries.
    Phone,
    /// Per-state boundaries.
    State,
}

/// One aligned unit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlignSeg {
    /// First frame of the unit.
    pub begin: i32,
    /// Last frame of the unit.
    pub end: i32,
    /// Log likelihood averaged over the unit's frames.
    pub avg_score: LogProb,
    /// Owning word.
    pub word: WordId,
    /// Phone name (phone/state granularity).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// State location within the phone (state granularity).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_loc: Option<usize>,
}

/// A complete forced alignment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Alignment {
    /// Granularity of the segments.
    pub unit: AlignUnit,
    /// Segments in time order.
    pub segs: Vec<AlignSeg>,
    /// Re-computed whole-path score.
    pub total_score: LogProb,
}

/// A flat HMM concatenated from word pronunciations.
#[derive(Debug, Clone)]
pub struct ConcatHmm {
    /// Emitting states in chain order.
    pub states: Vec<StateRef>,
    /// Outgoing arcs per state (within the chain).
    pub arcs: Vec<Vec<(usize, LogProb)>>,
    /// Entry states with their entry log probabilities.
    pub entries: Vec<(usize, LogProb)>,
    /// Exit log probability per state ([`LOG_ZERO`] where none).
    pub exit: Vec<LogProb>,
    /// Word position per state.
    pub state_word: Vec<usize>,
    /// Global phone position per state.
    pub state_phone: Vec<usize>,
    /// State location within its phone, per state.
    pub state_loc: Vec<usize>,
    /// Phone names per global phone position.
    pub phone_names: Vec<String>,
    /// Word position per global phone position.
    pub phone_word: Vec<usize>,
}

/// Options for building a concatenated HMM.
#[derive(Debug, Clone, Default)]
pub struct ConcatOptions<'a> {
    /// Phone context to the left of the first word.
    pub left_context: Option<&'a str>,
    /// Phone context to the right of the last word.
    pub right_context: Option<&'a str>,
    /// Insert this short-pause model between words, with the given
    /// transition penalty. The pause is transparent to phone contexts.
    pub insert_sp: Option<(usize, LogProb)>,
}

impl ConcatHmm {
    /// Build the flat HMM for a word sequence.
    ///
    /// # Errors
    ///
    /// Returns a `Model` error when a phone cannot be resolved.
    pub fn build(
        am: &AcousticModel,
        words: &[(WordId, &WordEntry)],
        opts: &ConcatOptions<'_>,
    ) -> Result<Self> {
        let mut chmm = Self {
            states: Vec::new(),
            arcs: Vec::new(),
            entries: Vec::new(),
            exit: Vec::new(),
            state_word: Vec::new(),
            state_phone: Vec::new(),
            state_loc: Vec::new(),
            phone_names: Vec::new(),
            phone_word: Vec::new(),
        };
        // Open ends while chaining: (state index, accumulated exit prob);
        // empty means "at the virtual start".
        let mut open: Vec<(usize, LogProb)> = Vec::new();

        for (wi, (_, entry)) in words.iter().enumerate() {
            if entry.base_phones.is_empty() {
                return Err(DecodeError::Model(format!(
                    "word {} has no pronunciation",
                    entry.name
                )));
            }
            if wi > 0 {
                if let Some((sp, penalty)) = opts.insert_sp {
                    open = chmm.append_phone(am, sp, "sp", wi, &open, penalty)?;
                }
            }
            let n = entry.base_phones.len();
            for j in 0..n {
                let left = if j > 0 {
                    Some(entry.base_phones[j - 1].as_str())
                } else if wi > 0 {
                    let prev = words[wi - 1].1;
                    prev.base_phones.last().map(String::as_str)
                } else {
                    opts.left_context
                };
                let right = if j + 1 < n {
                    Some(entry.base_phones[j + 1].as_str())
                } else if wi + 1 < words.len() {
                    words[wi + 1].1.base_phones.first().map(String::as_str)
                } else {
                    opts.right_context
                };
                let base = &entry.base_phones[j];
                let name = if am.is_triphone {
                    compose_triphone(left, base, right)
                } else {
                    base.clone()
                };
                let logical = lookup_with_fallback(am, &name, base).ok_or_else(|| {
                    DecodeError::Model(format!("cannot resolve phone {name}"))
                })?;
                open = chmm.append_phone(am, logical, &name, wi, &open, 0.0)?;
            }
        }

        for &(s, p) in &open {
            chmm.exit[s] = chmm.exit[s].max(p);
        }
        if chmm.states.is_empty() {
            return Err(DecodeError::Model("empty word sequence".into()));
        }
        Ok(chmm)
    }

    /// Append one phone chain, wiring it from the current open ends.
    /// Returns the open ends after the phone.
    fn append_phone(
        &mut self,
        am: &AcousticModel,
        logical: usize,
        name: &str,
        word_pos: usize,
        open: &[(usize, LogProb)],
        extra_penalty: LogProb,
    ) -> Result<Vec<(usize, LogProb)>> {
        let (chain, trans_id) = am.state_chain(logical);
        let trans = &am.transitions[trans_id];
        let n = chain.len();
        let nstate = trans.nstate;
        let phone_pos = self.phone_names.len();
        self.phone_names.push(name.to_owned());
        self.phone_word.push(word_pos);

        let base = self.states.len();
        for (loc, state) in chain.into_iter().enumerate() {
            self.states.push(state);
            self.arcs.push(Vec::new());
            self.exit.push(LOG_ZERO);
            self.state_word.push(word_pos);
            self.state_phone.push(phone_pos);
            self.state_loc.push(loc);
        }

        for i in 0..n {
            for j in 0..n {
                let p = trans.prob(i + 1, j + 1);
                if p > LOG_ZERO {
                    self.arcs[base + i].push((base + j, p));
                }
            }
        }

        for j in 0..n {
            let e = trans.prob(0, j + 1);
            if e <= LOG_ZERO {
                continue;
            }
            if open.is_empty() {
                self.entries.push((base + j, e + extra_penalty));
            } else {
                for &(s, p) in open {
                    self.arcs[s].push((base + j, p + e + extra_penalty));
                }
            }
        }

        let mut ends: Vec<(usize, LogProb)> = Vec::new();
        for i in 0..n {
            let e = trans.prob(i + 1, nstate - 1);
            if e > LOG_ZERO {
                ends.push((base + i, e));
            }
        }
        // Tee phone: the previous open ends survive with the bypass cost.
        // A tee at the very start cannot be skipped.
        let bypass = trans.prob(0, nstate - 1);
        if bypass > LOG_ZERO && !open.is_empty() {
            for &(s, p) in open {
                ends.push((s, p + bypass + extra_penalty));
            }
        }
        Ok(ends)
    }

    /// Full Viterbi against a frame range, with traceback.
    ///
    /// Returns the total path score (including the final exit
    /// transition) and the state index per frame.
    #[must_use]
    pub fn viterbi(
        &self,
        am: &AcousticModel,
        scorer: &mut GaussianScorer,
        frames: &[Vec<f32>],
        iwcd: IwcdMethod,
        iwcd_n: usize,
    ) -> Option<(LogProb, Vec<usize>, Vec<LogProb>)> {
        let t_len = frames.len();
        let s_len = self.states.len();
        if t_len == 0 {
            return None;
        }

        let mut out = vec![vec![LOG_ZERO; s_len]; t_len];
        for (t, frame) in frames.iter().enumerate() {
            scorer.begin_frame(t);
            for s in 0..s_len {
                out[t][s] = scorer.outprob_ref(am, &self.states[s], frame, iwcd, iwcd_n);
            }
        }

        let mut score = vec![vec![LOG_ZERO; s_len]; t_len];
        let mut from = vec![vec![usize::MAX; s_len]; t_len];
        for &(s, e) in &self.entries {
            score[0][s] = e + out[0][s];
        }
        for t in 1..t_len {
            for s in 0..s_len {
                if score[t - 1][s] <= LOG_ZERO {
                    continue;
                }
                for &(to, a) in &self.arcs[s] {
                    let cand = score[t - 1][s] + a + out[t][to];
                    if cand > score[t][to] {
                        score[t][to] = cand;
                        from[t][to] = s;
                    }
                }
            }
        }

        let mut best: Option<(LogProb, usize)> = None;
        for s in 0..s_len {
            if score[t_len - 1][s] <= LOG_ZERO || self.exit[s] <= LOG_ZERO {
                continue;
            }
            let total = score[t_len - 1][s] + self.exit[s];
            if best.is_none_or(|(b, _)| total > b) {
                best = Some((total, s));
            }
        }
        let (total, mut s) = best?;

        let mut path = vec![0usize; t_len];
        let mut framescore = vec![0.0f32; t_len];
        for t in (0..t_len).rev() {
            path[t] = s;
            framescore[t] = out[t][s];
            if t > 0 {
                s = from[t][s];
                if s == usize::MAX {
                    return None;
                }
            }
        }
        Some((total, path, framescore))
    }

    /// Backward acoustic scan for the stack decoder.
    ///
    /// Computes, for every begin frame `b` in `b_min..=t_end`, the best
    /// score of this HMM covering exactly `[b, t_end]` (entry and exit
    /// transitions included). Index 0 of the result corresponds to
    /// `b_min`.
    #[must_use]
    pub fn scan_backward(
        &self,
        am: &AcousticModel,
        scorer: &mut GaussianScorer,
        frames: &[Vec<f32>],
        b_min: usize,
        t_end: usize,
        iwcd: IwcdMethod,
        iwcd_n: usize,
    ) -> Vec<LogProb> {
        let s_len = self.states.len();
        if t_end >= frames.len() || b_min > t_end {
            return Vec::new();
        }
        let span = t_end - b_min + 1;

        // back[s] = best score of a path that emits at the current frame
        // in state s and runs to the exit at t_end.
        let mut back = vec![LOG_ZERO; s_len];
        let mut result = vec![LOG_ZERO; span];

        for t in (b_min..=t_end).rev() {
            scorer.begin_frame(t);
            let mut cur = vec![LOG_ZERO; s_len];
            for s in 0..s_len {
                let out = scorer.outprob_ref(am, &self.states[s], &frames[t], iwcd, iwcd_n);
                if out <= LOG_ZERO {
                    continue;
                }
                let mut tail = LOG_ZERO;
                if t == t_end {
                    tail = self.exit[s];
                } else {
                    for &(to, a) in &self.arcs[s] {
                        let cand = a + back[to];
                        if cand > tail {
                            tail = cand;
                        }
                    }
                }
                if tail > LOG_ZERO {
                    cur[s] = out + tail;
                }
            }
            back = cur;
            let mut best = LOG_ZERO;
            for &(s, e) in &self.entries {
                let cand = e + back[s];
                if cand > best {
                    best = cand;
                }
            }
            result[t - b_min] = best;
        }
        result
    }

    /// Run forced alignment and cut the path into units.
    ///
    /// # Errors
    ///
    /// Returns a `Search` error when no alignment path exists.
    pub fn align(
        &self,
        am: &AcousticModel,
        scorer: &mut GaussianScorer,
        frames: &[Vec<f32>],
        unit: AlignUnit,
        words: &[(WordId, &WordEntry)],
        iwcd: IwcdMethod,
        iwcd_n: usize,
    ) -> Result<Alignment> {
        let (total, path, framescore) = self
            .viterbi(am, scorer, frames, iwcd, iwcd_n)
            .ok_or_else(|| {
                DecodeError::Search("forced alignment found no path".into())
            })?;

        let key = |s: usize| match unit {
            AlignUnit::Word => (self.state_word[s], 0, 0),
            AlignUnit::Phone => (self.state_word[s], self.state_phone[s], 0),
            AlignUnit::State => (self.state_word[s], self.state_phone[s], self.state_loc[s]),
        };

        let mut segs: Vec<AlignSeg> = Vec::new();
        let mut start = 0usize;
        for t in 1..=path.len() {
            if t < path.len() && key(path[t]) == key(path[start]) {
                continue;
            }
            let s = path[start];
            let sum: f32 = framescore[start..t].iter().sum();
            let word_pos = self.state_word[s];
            segs.push(AlignSeg {
                begin: start as i32,
                end: (t - 1) as i32,
                avg_score: sum / (t - start) as f32,
                word: words[word_pos].0,
                phone: match unit {
                    AlignUnit::Word => None,
                    _ => Some(self.phone_names[self.state_phone[s]].clone()),
                },
                state_loc: match unit {
                    AlignUnit::State => Some(self.state_loc[s]),
                    _ => None,
                },
            });
            start = t;
        }

        Ok(Alignment {
            unit,
            segs,
            total_score: total,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::{Density, HmmState, Mixture, PhysicalHmm, Transition};
    use crate::config::GprunMethod;
    use crate::dict::WordLexicon;

    fn test_am() -> AcousticModel {
        let mut am = AcousticModel::new(1);
        for (name, mean) in [("a", 0.0f32), ("b", 4.0), ("sp", -4.0)] {
            let d = am.add_density(Density::from_variance(vec![mean], &[1.0]));
            let s = am.add_state(HmmState {
                mixtures: vec![Mixture {
                    density: d,
                    weight: 0.0,
                }],
            });
            let half = 0.5f32.ln();
            let t = am.add_transition(Transition {
                nstate: 3,
                a: vec![
                    LOG_ZERO, 0.0, LOG_ZERO,
                    LOG_ZERO, half, half,
                    LOG_ZERO, LOG_ZERO, LOG_ZERO,
                ],
            });
            am.add_physical(PhysicalHmm {
                name: name.into(),
                states: vec![s],
                trans: t,
            })
            .unwrap();
        }
        am
    }

    fn frames(values: &[(f32, usize)]) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for &(v, n) in values {
            for _ in 0..n {
                out.push(vec![v]);
            }
        }
        out
    }

    #[test]
    fn aligns_two_words_at_the_acoustic_boundary() {
        let am = test_am();
        let dict = WordLexicon::load_str("A a\nB b\n", Some(&am)).unwrap();
        let words: Vec<(WordId, &WordEntry)> =
            vec![(0, &dict.words[0]), (1, &dict.words[1])];
        let chmm = ConcatHmm::build(&am, &words, &ConcatOptions::default()).unwrap();
        let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 2);

        let fr = frames(&[(0.0, 5), (4.0, 5)]);
        let align = chmm
            .align(
                &am,
                &mut scorer,
                &fr,
                AlignUnit::Word,
                &words,
                IwcdMethod::Max,
                1,
            )
            .unwrap();

        assert_eq!(align.segs.len(), 2);
        assert_eq!(align.segs[0].word, 0);
        assert_eq!(align.segs[0].begin, 0);
        assert_eq!(align.segs[0].end, 4);
        assert_eq!(align.segs[1].word, 1);
        assert_eq!(align.segs[1].begin, 5);
        assert_eq!(align.segs[1].end, 9);
        assert!(align.total_score > LOG_ZERO);
    }

    #[test]
    fn state_alignment_has_per_state_segments() {
        let am = test_am();
        let dict = WordLexicon::load_str("A a\n", Some(&am)).unwrap();
        let words: Vec<(WordId, &WordEntry)> = vec![(0, &dict.words[0])];
        let chmm = ConcatHmm::build(&am, &words, &ConcatOptions::default()).unwrap();
        let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 2);
        let fr = frames(&[(0.0, 4)]);
        let align = chmm
            .align(
                &am,
                &mut scorer,
                &fr,
                AlignUnit::State,
                &words,
                IwcdMethod::Max,
                1,
            )
            .unwrap();
        assert_eq!(align.segs.len(), 1);
        assert_eq!(align.segs[0].state_loc, Some(0));
        assert_eq!(align.segs[0].phone.as_deref(), Some("a"));
    }

    #[test]
    fn scan_backward_matches_viterbi_at_fixed_range() {
        let am = test_am();
        let dict = WordLexicon::load_str("A a\n", Some(&am)).unwrap();
        let words: Vec<(WordId, &WordEntry)> = vec![(0, &dict.words[0])];
        let chmm = ConcatHmm::build(&am, &words, &ConcatOptions::default()).unwrap();
        let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 2);

        let fr = frames(&[(0.0, 6)]);
        let scans = chmm.scan_backward(&am, &mut scorer, &fr, 2, 5, IwcdMethod::Max, 1);
        assert_eq!(scans.len(), 4);

        // scan(b) for b = 2 must equal the full Viterbi over frames 2..=5.
        let sub: Vec<Vec<f32>> = fr[2..=5].to_vec();
        let (direct, _, _) = chmm
            .viterbi(&am, &mut scorer, &sub, IwcdMethod::Max, 1)
            .unwrap();
        assert!((scans[0] - direct).abs() < 1e-4);
        // Longer coverage accumulates more (negative) log likelihood.
        assert!(scans[0] <= scans[3]);
    }

    #[test]
    fn inter_word_pause_insertion() {
        let am = test_am();
        let dict = WordLexicon::load_str("A a\nB b\n", Some(&am)).unwrap();
        let sp = am.logical_id("sp").unwrap();
        let words: Vec<(WordId, &WordEntry)> =
            vec![(0, &dict.words[0]), (1, &dict.words[1])];
        let opts = ConcatOptions {
            insert_sp: Some((sp, -1.0)),
            ..ConcatOptions::default()
        };
        let chmm = ConcatHmm::build(&am, &words, &opts).unwrap();
        // Three phones: a, sp, b.
        assert_eq!(chmm.phone_names, vec!["a", "sp", "b"]);

        let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 2);
        let fr = frames(&[(0.0, 3), (-4.0, 2), (4.0, 3)]);
        let align = chmm
            .align(
                &am,
                &mut scorer,
                &fr,
                AlignUnit::Phone,
                &words,
                IwcdMethod::Max,
                1,
            )
            .unwrap();
        assert_eq!(align.segs.len(), 3);
        assert_eq!(align.segs[1].phone.as_deref(), Some("sp"));
    }
}
