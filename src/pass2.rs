//! Second pass: best-first stack decoding over the word trellis.
//!
//! Sentences are grown right-to-left from the utterance end. Each
//! hypothesis carries the exact score of the frames it already covers;
//! the remainder is estimated from first-pass trellis scores that have
//! been discounted down to a pure back-estimate. Expansion re-computes
//! the acoustic score of every candidate word by Viterbi over its HMM
//! with exact cross-word triphones, searching the trellis for candidate
//! words in a frame neighbourhood of the current boundary.

use crate::align::{ConcatHmm, ConcatOptions};
use crate::am::{AcousticModel, LOG_ZERO, LogProb};
use crate::config::{DecoderConfig, IwcdMethod};
use crate::dict::{WORD_INVALID, WordId, WordLexicon};
use crate::gauss::GaussianScorer;
use crate::lm::dfa::DfaInfo;
use crate::lm::ngram::NgramLm;
use crate::trellis::WordTrellis;
use crate::wordgraph::WordGraph;
use tracing::{debug, warn};

/// Hard cap on sentence length in words.
const MAX_SEQ_NUM: usize = 150;

/// Language model view for the second pass.
pub enum Pass2Lm<'a> {
    /// N-gram with full context (backward trigram when available).
    Ngram(&'a NgramLm),
    /// DFA grammar constraint via the category-pair table.
    Dfa {
        /// The global automaton.
        dfa: &'a DfaInfo,
        /// Category per word.
        word_category: &'a [usize],
    },
    /// Flat word list: single-word sentences.
    WordList,
}

/// Read-only resources for the search.
pub struct Pass2Resources<'a> {
    /// Acoustic model.
    pub am: &'a AcousticModel,
    /// Dictionary.
    pub words: &'a WordLexicon,
    /// LM constraint.
    pub lm: Pass2Lm<'a>,
    /// Cross-word context summarisation for cluster states.
    pub iwcd_method: IwcdMethod,
    /// N for the best-N summarisation.
    pub iwcd_best_n: usize,
}

/// Search parameters captured from the configuration.
#[derive(Debug, Clone)]
pub struct Pass2Params {
    /// Stop after this many complete sentences.
    pub nbest: usize,
    /// Stack size bound.
    pub stack_size: usize,
    /// Pop budget before giving up.
    pub hypo_overflow: usize,
    /// Per-length expansion bound.
    pub envelope_width: usize,
    /// Score envelope threshold per hypothesis length.
    pub scan_beam_thres: LogProb,
    /// Trellis lookup neighbourhood in frames.
    pub lookup_range: usize,
    /// LM weight.
    pub lm_weight2: LogProb,
    /// LM insertion penalty.
    pub lm_penalty2: LogProb,
    /// DFA insertion penalty.
    pub penalty2: LogProb,
    /// Additional penalty for transparent words.
    pub lm_penalty_trans: LogProb,
    /// Compute per-word confidence scores.
    pub confidence: bool,
    /// Confidence scaling factor.
    pub cm_alpha: f32,
    /// Accumulate a word graph.
    pub graph: bool,
    /// Post-merge margin for the word graph.
    pub graph_merge_range: i32,
    /// Head silence word required at sentence start (N-gram).
    pub head_silword: Option<WordId>,
    /// Tail silence word required at sentence end (N-gram).
    pub tail_silword: Option<WordId>,
}

impl Pass2Params {
    /// Capture the relevant settings from a decoder configuration.
    #[must_use]
    pub fn from_config(config: &DecoderConfig) -> Self {
        Self {
            nbest: config.search.pass2.nbest.max(1),
            stack_size: config.search.pass2.stack_size.max(1),
            hypo_overflow: config.search.pass2.hypo_overflow.max(1),
            envelope_width: config.search.pass2.envelope_width.max(1),
            scan_beam_thres: config.search.pass2.scan_beam_thres,
            lookup_range: config.search.pass2.lookup_range.max(1),
            lm_weight2: config.lm.lm_weight2,
            lm_penalty2: config.lm.lm_penalty2,
            penalty2: config.lm.penalty2,
            lm_penalty_trans: config.lm.lm_penalty_trans,
            confidence: config.search.pass2.confidence,
            cm_alpha: config.search.pass2.cm_alpha,
            graph: config.search.graph.enabled,
            graph_merge_range: config.search.graph.merge_range,
            head_silword: None,
            tail_silword: None,
        }
    }
}

/// A complete sentence found by the search.
#[derive(Debug, Clone)]
pub struct FoundSentence {
    /// Words in time order.
    pub words: Vec<WordId>,
    /// Combined exact score over the whole input.
    pub score: LogProb,
    /// Acoustic part.
    pub score_am: LogProb,
    /// Weighted LM part.
    pub score_lm: LogProb,
    /// Per-word confidence in time order (empty when disabled).
    pub confidence: Vec<f32>,
}

/// Search output.
#[derive(Debug, Default)]
pub struct Pass2Output {
    /// Complete sentences, best first.
    pub sentences: Vec<FoundSentence>,
    /// Word graph, when enabled.
    pub graph: Option<WordGraph>,
}

/// A partial right-to-left sentence on the stack.
#[derive(Debug, Clone)]
struct Hypo {
    /// Words, latest first (so `last()` is the earliest word).
    seq: Vec<WordId>,
    /// Exact score covering `[next_frame + 1, T-1]`.
    g: LogProb,
    /// Acoustic part of `g`.
    am: LogProb,
    /// LM part of `g`.
    lm: LogProb,
    /// Estimated total score `g + h(next_frame)`.
    f: LogProb,
    /// Last frame not yet covered; `-1` when the start is reached.
    next_frame: i32,
    /// Per-word confidence, aligned with `seq`.
    confidence: Vec<f32>,
}

/// Bounded best-first hypothesis stack.
struct HypoStack {
    items: Vec<Hypo>,
    capacity: usize,
}

impl HypoStack {
    fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
        }
    }

    fn push(&mut self, hypo: Hypo) {
        let pos = self
            .items
            .partition_point(|h| h.f > hypo.f);
        if pos >= self.capacity {
            return;
        }
        self.items.insert(pos, hypo);
        self.items.truncate(self.capacity);
    }

    fn pop(&mut self) -> Option<Hypo> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }
}

/// The stack decoder.
pub struct StackDecoder {
    params: Pass2Params,
}

impl StackDecoder {
    /// Create a decoder with the given parameters.
    #[must_use]
    pub fn new(params: Pass2Params) -> Self {
        Self { params }
    }

    /// Run the search over a finalised trellis.
    pub fn search(
        &self,
        res: &Pass2Resources<'_>,
        trellis: &WordTrellis,
        frames: &[Vec<f32>],
        scorer: &mut GaussianScorer,
    ) -> Pass2Output {
        let num_frames = frames.len();
        let mut output = Pass2Output {
            sentences: Vec::new(),
            graph: self.params.graph.then(WordGraph::new),
        };
        if num_frames == 0 || trellis.is_empty() {
            return output;
        }

        let framemax = self.prepare_heuristic(res, trellis, frames, scorer);

        let mut stack = HypoStack::new(self.params.stack_size);
        self.seed_initial(res, trellis, frames, scorer, &framemax, &mut stack, &mut output);

        let mut popctr = 0usize;
        let mut len_count = vec![0usize; MAX_SEQ_NUM + 1];
        let mut len_best = vec![LOG_ZERO; MAX_SEQ_NUM + 1];

        while let Some(hypo) = stack.pop() {
            popctr += 1;
            if popctr > self.params.hypo_overflow {
                warn!("second pass pop limit reached ({popctr} pops)");
                break;
            }

            // Completed hypothesis: covered every frame.
            if hypo.next_frame < 0 {
                if self.valid_start(res, &hypo) {
                    output.sentences.push(self.emit(hypo));
                    if output.sentences.len() >= self.params.nbest {
                        break;
                    }
                }
                continue;
            }

            let len = hypo.seq.len().min(MAX_SEQ_NUM);
            len_count[len] += 1;
            if len_count[len] > self.params.envelope_width {
                continue;
            }
            if hypo.f > len_best[len] {
                len_best[len] = hypo.f;
            } else if hypo.f < len_best[len] - self.params.scan_beam_thres {
                continue;
            }
            if hypo.seq.len() >= MAX_SEQ_NUM {
                continue;
            }

            self.expand(
                res, trellis, frames, scorer, &framemax, &hypo, &mut stack, &mut output,
            );
        }

        if let Some(graph) = &mut output.graph {
            graph.finalize(self.params.graph_merge_range);
        }
        output
            .sentences
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        output
    }

    /// Per-frame heuristic: best trellis score up to each frame with the
    /// last-frame output probability and the first-pass LM contribution
    /// discounted away, made monotone over time.
    fn prepare_heuristic(
        &self,
        res: &Pass2Resources<'_>,
        trellis: &WordTrellis,
        frames: &[Vec<f32>],
        scorer: &mut GaussianScorer,
    ) -> Vec<LogProb> {
        let num_frames = frames.len();
        let mut framemax = vec![LOG_ZERO; num_frames];
        for t in 0..num_frames {
            scorer.begin_frame(t);
            for &id in trellis.ending_at(t as i32) {
                let atom = trellis.atom(id);
                let discount = self
                    .wordend_outprob(res, scorer, atom.wid, &frames[t])
                    .unwrap_or(0.0);
                let d = atom.score - discount - atom.lm_score;
                if d > framemax[t] {
                    framemax[t] = d;
                }
            }
            if t > 0 && framemax[t - 1] > framemax[t] {
                framemax[t] = framemax[t - 1];
            }
        }
        framemax
    }

    /// Output probability of a word's final emitting state.
    fn wordend_outprob(
        &self,
        res: &Pass2Resources<'_>,
        scorer: &mut GaussianScorer,
        wid: WordId,
        frame: &[f32],
    ) -> Option<LogProb> {
        let entry = &res.words.words[wid as usize];
        let &last_phone = entry.phones.last()?;
        let (chain, _) = res.am.state_chain(last_phone);
        let state = chain.last()?;
        Some(scorer.outprob_ref(
            res.am,
            state,
            frame,
            res.iwcd_method,
            res.iwcd_best_n,
        ))
    }

    /// Heuristic value for the uncovered frames up to `t`.
    fn h(&self, framemax: &[LogProb], t: i32) -> LogProb {
        if t < 0 {
            0.0
        } else {
            framemax.get(t as usize).copied().unwrap_or(LOG_ZERO)
        }
    }

    /// Seed the stack with sentence-final word candidates at the last
    /// frame.
    #[allow(clippy::too_many_arguments)]
    fn seed_initial(
        &self,
        res: &Pass2Resources<'_>,
        trellis: &WordTrellis,
        frames: &[Vec<f32>],
        scorer: &mut GaussianScorer,
        framemax: &[LogProb],
        stack: &mut HypoStack,
        output: &mut Pass2Output,
    ) {
        let last = frames.len() as i32 - 1;
        let mut candidates: Vec<WordId> = Vec::new();
        for &id in trellis.ending_at(last) {
            let wid = trellis.atom(id).wid;
            if !candidates.contains(&wid) {
                candidates.push(wid);
            }
        }
        if let Some(tail) = self.params.tail_silword {
            if candidates.contains(&tail) {
                candidates.retain(|&w| w == tail);
            }
        }
        if let Pass2Lm::Dfa { dfa, word_category } = &res.lm {
            candidates.retain(|&w| dfa.cp_end[word_category[w as usize]]);
        }

        for wid in candidates {
            let entry = &res.words.words[wid as usize];
            let lm_raw = match &res.lm {
                Pass2Lm::Ngram(lm) => {
                    let model = lm.backward.as_ref().unwrap_or(&lm.forward);
                    self.params.lm_weight2 * (model.prob_uni(wid) + entry.cprob)
                        + self.params.lm_penalty2
                }
                Pass2Lm::Dfa { .. } => self.params.penalty2 + entry.cprob,
                Pass2Lm::WordList => entry.cprob,
            };
            let Some(atom) = trellis.atom_at(last, wid) else {
                continue;
            };
            let atom_begins = vec![trellis.atom(atom).begin.max(0) as usize];
            let b_min = atom_begins[0].saturating_sub(self.params.lookup_range);

            let Ok(chmm) = ConcatHmm::build(
                res.am,
                &[(wid, entry)],
                &ConcatOptions::default(),
            ) else {
                continue;
            };
            let scans = chmm.scan_backward(
                res.am,
                scorer,
                frames,
                b_min,
                last as usize,
                res.iwcd_method,
                res.iwcd_best_n,
            );
            for (b, am_score) in begin_candidates(&scans, b_min, &atom_begins) {
                let g = am_score + lm_raw;
                let f = g + self.h(framemax, b as i32 - 1);
                if let Some(graph) = &mut output.graph {
                    graph.add(wid, b as i32, last, f);
                }
                stack.push(Hypo {
                    seq: vec![wid],
                    g,
                    am: am_score,
                    lm: lm_raw,
                    f,
                    next_frame: b as i32 - 1,
                    confidence: vec![1.0],
                });
            }
        }
    }

    /// Expand one hypothesis with every admissible previous word.
    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        res: &Pass2Resources<'_>,
        trellis: &WordTrellis,
        frames: &[Vec<f32>],
        scorer: &mut GaussianScorer,
        framemax: &[LogProb],
        hypo: &Hypo,
        stack: &mut HypoStack,
        output: &mut Pass2Output,
    ) {
        if matches!(res.lm, Pass2Lm::WordList) {
            // Isolated word recognition: sentences are single words.
            return;
        }
        let t0 = hypo.next_frame;
        debug_assert!(t0 >= 0);

        // Trellis words ending in the lookup neighbourhood.
        let range = self.params.lookup_range as i32;
        let mut candidates: Vec<WordId> = Vec::new();
        for t in (t0 - range).max(0)..=(t0 + range).min(frames.len() as i32 - 1) {
            for &id in trellis.ending_at(t) {
                let wid = trellis.atom(id).wid;
                if !candidates.contains(&wid) {
                    candidates.push(wid);
                }
            }
        }
        if candidates.is_empty() {
            return;
        }

        // The word this one connects to (earliest so far).
        let following = *hypo.seq.last().unwrap_or(&WORD_INVALID);
        if let Pass2Lm::Dfa { dfa, word_category } = &res.lm {
            let cp_right = self
                .first_nontransparent(res, hypo)
                .unwrap_or(following);
            let c2 = word_category[cp_right as usize];
            candidates.retain(|&w| dfa.cp_accept(word_category[w as usize], c2));
        }

        let right_ctx = res.words.words[following as usize]
            .base_phones
            .first()
            .cloned();

        let mut pushes: Vec<Hypo> = Vec::new();
        for wid in candidates {
            let entry = &res.words.words[wid as usize];
            let lm_raw = match &res.lm {
                Pass2Lm::Ngram(lm) => {
                    let (n1, n2) = self.context_after(res, hypo);
                    let mut v = self.params.lm_weight2
                        * (lm.backward_prob(n2, n1, wid) + entry.cprob)
                        + self.params.lm_penalty2;
                    if entry.transparent {
                        v += self.params.lm_penalty_trans;
                    }
                    v
                }
                Pass2Lm::Dfa { .. } => {
                    let mut v = self.params.penalty2 + entry.cprob;
                    if entry.transparent {
                        v += self.params.lm_penalty_trans;
                    }
                    v
                }
                Pass2Lm::WordList => unreachable!(),
            };

            // Begin frames suggested by the trellis atoms in range.
            let mut atom_begins: Vec<usize> = Vec::new();
            let mut begin_hint = t0;
            for t in (t0 - range).max(0)..=(t0 + range).min(frames.len() as i32 - 1) {
                if let Some(a) = trellis.atom_at(t, wid) {
                    let begin = trellis.atom(a).begin;
                    begin_hint = begin_hint.min(begin);
                    let begin = begin.max(0) as usize;
                    if begin <= t0 as usize && !atom_begins.contains(&begin) {
                        atom_begins.push(begin);
                    }
                }
            }
            let b_min = (begin_hint.max(0) as usize)
                .saturating_sub(self.params.lookup_range);

            let opts = ConcatOptions {
                right_context: right_ctx.as_deref(),
                ..ConcatOptions::default()
            };
            let Ok(chmm) = ConcatHmm::build(res.am, &[(wid, entry)], &opts) else {
                continue;
            };
            let scans = chmm.scan_backward(
                res.am,
                scorer,
                frames,
                b_min,
                t0 as usize,
                res.iwcd_method,
                res.iwcd_best_n,
            );
            for (b, am_score) in begin_candidates(&scans, b_min, &atom_begins) {
                let g = hypo.g + am_score + lm_raw;
                let f = g + self.h(framemax, b as i32 - 1);

                if let Some(graph) = &mut output.graph {
                    graph.add(wid, b as i32, t0, f);
                }

                let mut seq = hypo.seq.clone();
                seq.push(wid);
                let mut confidence = hypo.confidence.clone();
                confidence.push(1.0);
                pushes.push(Hypo {
                    seq,
                    g,
                    am: hypo.am + am_score,
                    lm: hypo.lm + lm_raw,
                    f,
                    next_frame: b as i32 - 1,
                    confidence,
                });
            }
        }

        if pushes.is_empty() {
            debug!("no expansion at boundary {t0}");
            return;
        }

        // Sibling-normalised confidence of the newly attached words.
        if self.params.confidence {
            let fmax = pushes
                .iter()
                .map(|h| h.f)
                .fold(LOG_ZERO, LogProb::max);
            let total: f32 = pushes
                .iter()
                .map(|h| (self.params.cm_alpha * (h.f - fmax)).exp())
                .sum();
            for h in &mut pushes {
                let cm = (self.params.cm_alpha * (h.f - fmax)).exp() / total.max(f32::MIN_POSITIVE);
                if let Some(last) = h.confidence.last_mut() {
                    *last = cm;
                }
            }
        }

        for h in pushes {
            stack.push(h);
        }
    }

    /// LM context following the word about to be attached: the nearest
    /// one or two non-transparent words already in the hypothesis.
    fn context_after(
        &self,
        res: &Pass2Resources<'_>,
        hypo: &Hypo,
    ) -> (WordId, Option<WordId>) {
        let mut found: Vec<WordId> = Vec::new();
        for &w in hypo.seq.iter().rev() {
            if !res.words.words[w as usize].transparent {
                found.push(w);
                if found.len() == 2 {
                    break;
                }
            }
        }
        match found.as_slice() {
            [] => (*hypo.seq.last().expect("nonempty hypo"), None),
            [one] => (*one, None),
            [one, two, ..] => (*one, Some(*two)),
        }
    }

    /// Earliest non-transparent word of the hypothesis (for the
    /// category-pair check; short pauses are transparent to it).
    fn first_nontransparent(&self, res: &Pass2Resources<'_>, hypo: &Hypo) -> Option<WordId> {
        hypo.seq
            .iter()
            .rev()
            .copied()
            .find(|&w| !res.words.words[w as usize].transparent)
    }

    /// Whether a completed hypothesis is a valid sentence start.
    fn valid_start(&self, res: &Pass2Resources<'_>, hypo: &Hypo) -> bool {
        let Some(&first) = hypo.seq.last() else {
            return false;
        };
        match &res.lm {
            Pass2Lm::Ngram(_) => match self.params.head_silword {
                Some(h) => first == h,
                None => true,
            },
            Pass2Lm::Dfa { dfa, word_category } => {
                let w = self.first_nontransparent(res, hypo).unwrap_or(first);
                dfa.cp_begin[word_category[w as usize]]
            }
            Pass2Lm::WordList => true,
        }
    }

    /// Turn a completed hypothesis into a result sentence.
    fn emit(&self, hypo: Hypo) -> FoundSentence {
        let mut words = hypo.seq;
        words.reverse();
        let mut confidence = hypo.confidence;
        confidence.reverse();
        if !self.params.confidence {
            confidence.clear();
        }
        FoundSentence {
            words,
            score: hypo.g,
            score_am: hypo.am,
            score_lm: hypo.lm,
            confidence,
        }
    }
}

/// Begin-frame candidates from a backward scan: the best-scoring begin,
/// the begins proposed by the first pass's trellis atoms, and the
/// utterance-start begin (frame 0) when viable, so a sentence-completing
/// connection is never lost to a locally better one.
fn begin_candidates(
    scans: &[LogProb],
    b_min: usize,
    atom_begins: &[usize],
) -> Vec<(usize, LogProb)> {
    let mut best: Option<(usize, LogProb)> = None;
    for (i, &s) in scans.iter().enumerate() {
        if s <= LOG_ZERO {
            continue;
        }
        if best.is_none_or(|(_, b)| s > b) {
            best = Some((b_min + i, s));
        }
    }
    let mut out: Vec<(usize, LogProb)> = Vec::new();
    let Some(best) = best else {
        return out;
    };
    out.push(best);
    let mut add = |b: usize| {
        if b < b_min || b - b_min >= scans.len() {
            return;
        }
        let s = scans[b - b_min];
        if s > LOG_ZERO && !out.iter().any(|&(eb, _)| eb == b) {
            out.push((b, s));
        }
    };
    for &b in atom_begins {
        add(b);
    }
    if b_min == 0 {
        add(0);
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn stack_is_bounded_and_ordered() {
        let mut stack = HypoStack::new(3);
        for f in [-10.0f32, -5.0, -20.0, -1.0, -15.0] {
            stack.push(Hypo {
                seq: vec![0],
                g: f,
                am: f,
                lm: 0.0,
                f,
                next_frame: 0,
                confidence: vec![1.0],
            });
        }
        // Only the best three survive, popped best-first.
        let fs: Vec<f32> = std::iter::from_fn(|| stack.pop().map(|h| h.f)).collect();
        assert_eq!(fs, vec![-1.0, -5.0, -10.0]);
    }

    #[test]
    fn begin_candidates_keep_best_atoms_and_start() {
        let scans = vec![LOG_ZERO, -5.0, -3.0, -9.0];
        assert_eq!(begin_candidates(&scans, 10, &[]), vec![(12, -3.0)]);
        assert!(begin_candidates(&[LOG_ZERO, LOG_ZERO], 0, &[]).is_empty());

        // Atom-proposed begins are kept next to the best one.
        assert_eq!(
            begin_candidates(&scans, 10, &[13]),
            vec![(12, -3.0), (13, -9.0)]
        );
        // A dead or out-of-range atom begin is ignored.
        assert_eq!(begin_candidates(&scans, 10, &[10, 99]), vec![(12, -3.0)]);

        // With b_min == 0 the completing begin is kept as well.
        let scans = vec![-8.0, -3.0];
        assert_eq!(
            begin_candidates(&scans, 0, &[]),
            vec![(1, -3.0), (0, -8.0)]
        );
    }
}
