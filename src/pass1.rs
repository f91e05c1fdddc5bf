//! First pass: frame-synchronous Viterbi beam search over the tree
//! lexicon with token passing.
//!
//! Tokens live in two arenas swapped per frame; the 0/1 parity is hidden
//! inside [`BeamSet`]. Each frame propagates the surviving tokens along
//! their arcs, applies 1-gram factoring deltas incrementally, detects
//! word ends (emitting trellis atoms), prunes to the beam width and
//! expands the surviving word ends across word boundaries. Token merges
//! keep the old token on ties: a new token wins only on strict
//! improvement.

use crate::am::{AcousticModel, LOG_ZERO, LogProb};
use crate::config::{DecoderConfig, IwcdMethod};
use crate::dict::{WORD_INVALID, WordId, WordLexicon};
use crate::gauss::GaussianScorer;
use crate::lexicon::{LexNodeKind, Lexicon, NodeId};
use crate::lm::dfa::DfaInfo;
use crate::lm::ngram::NgramLm;
use crate::trellis::{AtomId, TrellisAtom, WordTrellis};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Minimal beam width applied when deriving the width from the
/// vocabulary size.
const MINIMAL_BEAM_WIDTH: usize = 200;

/// Token id inside an arena.
type TokenId = u32;
const TOKEN_NONE: TokenId = u32::MAX;

/// A search token occupying one lexicon node.
#[derive(Debug, Clone, Copy)]
struct Token {
    node: NodeId,
    score: LogProb,
    /// Previous word-end atom (BOS when `None`-encoded as `u32::MAX`).
    last_tre: u32,
    /// Last non-transparent LM context word.
    last_cword: WordId,
    /// Word id of the immediately previous word (for category checks).
    prev_word: WordId,
    /// Currently applied (weighted) LM value for the word in progress.
    last_lscore: LogProb,
    /// Next token on the same node (word-pair approximation).
    next: TokenId,
    alive: bool,
}

const TRE_NONE: u32 = u32::MAX;

/// Token store for one frame pair with the parity hidden inside.
struct BeamSet {
    tlist: [Vec<Token>; 2],
    node_token: [Vec<TokenId>; 2],
    /// Arena currently being built.
    tn: usize,
    /// Sorted live token ids of the finished frame (in arena `tn`).
    order: Vec<TokenId>,
}

impl BeamSet {
    fn new(num_nodes: usize) -> Self {
        Self {
            tlist: [Vec::new(), Vec::new()],
            node_token: [vec![TOKEN_NONE; num_nodes], vec![TOKEN_NONE; num_nodes]],
            tn: 0,
            order: Vec::new(),
        }
    }

    fn reset(&mut self) {
        for arena in &mut self.tlist {
            arena.clear();
        }
        for index in &mut self.node_token {
            index.iter_mut().for_each(|v| *v = TOKEN_NONE);
        }
        self.tn = 0;
        self.order.clear();
    }

    /// Swap arenas: the finished frame becomes the source, the other
    /// arena is cleared for the new frame.
    fn swap(&mut self) {
        self.tn ^= 1;
        self.tlist[self.tn].clear();
        self.node_token[self.tn].iter_mut().for_each(|v| *v = TOKEN_NONE);
    }

    fn token(&self, id: TokenId) -> &Token {
        &self.tlist[self.tn][id as usize]
    }

    /// Merge a candidate token into the current arena.
    ///
    /// With `wpair_limit == 0` one token per node survives; otherwise up
    /// to `wpair_limit` tokens keyed by previous word id are kept and the
    /// lowest-scoring one is evicted on overflow. The merge is strict:
    /// an equal-scoring candidate loses.
    fn insert(&mut self, cand: Token, wpair_limit: usize) {
        let node = cand.node as usize;
        let arena = &mut self.tlist[self.tn];
        let head = self.node_token[self.tn][node];

        if wpair_limit == 0 {
            if head == TOKEN_NONE {
                let id = arena.len() as TokenId;
                arena.push(cand);
                self.node_token[self.tn][node] = id;
            } else {
                let slot = &mut arena[head as usize];
                if cand.score > slot.score {
                    let next = slot.next;
                    *slot = cand;
                    slot.next = next;
                }
            }
            return;
        }

        // Word-pair approximation: find a token with the same previous
        // word on this node.
        let mut cur = head;
        let mut count = 0usize;
        let mut worst: (TokenId, LogProb) = (TOKEN_NONE, f32::MAX);
        while cur != TOKEN_NONE {
            let t = &arena[cur as usize];
            if t.prev_word == cand.prev_word {
                let slot = &mut arena[cur as usize];
                if cand.score > slot.score {
                    let next = slot.next;
                    *slot = cand;
                    slot.next = next;
                }
                return;
            }
            if t.score < worst.1 {
                worst = (cur, t.score);
            }
            count += 1;
            cur = t.next;
        }

        if count >= wpair_limit {
            if cand.score <= worst.1 {
                return;
            }
            // Evict the lowest-scoring token in place.
            let slot = &mut arena[worst.0 as usize];
            let next = slot.next;
            *slot = cand;
            slot.next = next;
            return;
        }

        let id = arena.len() as TokenId;
        let mut cand = cand;
        cand.next = head;
        arena.push(cand);
        self.node_token[self.tn][node] = id;
    }

    /// Sort live tokens by score and keep the best `width`.
    fn prune(&mut self, width: usize) {
        let arena = &mut self.tlist[self.tn];
        let mut ids: Vec<TokenId> = (0..arena.len() as TokenId)
            .filter(|&i| arena[i as usize].alive)
            .collect();
        ids.sort_by(|&a, &b| {
            arena[b as usize]
                .score
                .partial_cmp(&arena[a as usize].score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for &id in ids.iter().skip(width) {
            arena[id as usize].alive = false;
        }
        ids.truncate(width);
        self.order = ids;
    }
}

/// Language model view for the first pass.
pub enum Pass1Lm<'a> {
    /// Statistical N-gram.
    Ngram(&'a NgramLm),
    /// DFA grammar with per-word categories.
    Dfa {
        /// The (global) automaton.
        dfa: &'a DfaInfo,
        /// Category of each word.
        word_category: &'a [usize],
    },
    /// Flat word list; each utterance is one word.
    WordList,
}

/// Shared read-only resources for the search.
pub struct Pass1Resources<'a> {
    /// Acoustic model.
    pub am: &'a AcousticModel,
    /// Tree lexicon.
    pub lexicon: &'a Lexicon,
    /// Dictionary the lexicon was built over.
    pub words: &'a WordLexicon,
    /// LM constraint.
    pub lm: Pass1Lm<'a>,
}

/// Search parameters captured from the configuration.
#[derive(Debug, Clone)]
pub struct Pass1Params {
    /// N-gram weight.
    pub lm_weight: LogProb,
    /// N-gram insertion penalty.
    pub lm_penalty: LogProb,
    /// Additional penalty for transparent words.
    pub lm_penalty_trans: LogProb,
    /// DFA insertion penalty.
    pub penalty1: LogProb,
    /// Apply 1-gram factoring inside the tree.
    pub factoring: bool,
    /// Word-pair token limit (0 = 1-best-per-node).
    pub wpair_nlimit: usize,
    /// Cross-word context approximation.
    pub iwcd_method: IwcdMethod,
    /// N for the best-N approximation.
    pub iwcd_best_n: usize,
    /// Head silence word (N-gram).
    pub head_silword: Option<WordId>,
    /// Tail silence word (N-gram).
    pub tail_silword: Option<WordId>,
}

impl Pass1Params {
    /// Capture the relevant settings from a decoder configuration.
    #[must_use]
    pub fn from_config(config: &DecoderConfig) -> Self {
        Self {
            lm_weight: config.lm.lm_weight,
            lm_penalty: config.lm.lm_penalty,
            lm_penalty_trans: config.lm.lm_penalty_trans,
            penalty1: config.lm.penalty1,
            factoring: config.search.pass1.factoring_unigram,
            wpair_nlimit: config.search.pass1.wpair_nlimit,
            iwcd_method: config.am.iwcd_method,
            iwcd_best_n: config.am.iwcd_best_n,
            head_silword: None,
            tail_silword: None,
        }
    }
}

/// Result of the first pass.
#[derive(Debug, Clone)]
pub struct Pass1Result {
    /// Best path score at the final frame ([`LOG_ZERO`] on failure).
    pub score: LogProb,
    /// Best word sequence in time order.
    pub seq: Vec<WordId>,
    /// Final atom of the best path.
    pub final_atom: Option<AtomId>,
    /// Number of processed frames.
    pub num_frames: usize,
}

/// Frame-synchronous beam search state.
pub struct BeamSearch {
    params: Pass1Params,
    beam: BeamSet,
    width: usize,
    frame: usize,
    /// Trellis under construction.
    pub trellis: WordTrellis,
    /// Best word end of the last processed frame.
    best_wordend: Option<(AtomId, WordId, LogProb)>,
    /// Inter-word bigram cache, keyed by (context, word).
    iw_cache: HashMap<(WordId, WordId), LogProb>,
    alive: bool,
}

/// A word end surviving the beam at the current frame.
struct WordEnd {
    atom: AtomId,
    word: WordId,
    score: LogProb,
    /// LM context after this word (transparent words keep the old one).
    cword: WordId,
    /// Context used for the category-pair check.
    cp_word: WordId,
}

impl BeamSearch {
    /// Create the search over a lexicon of `num_nodes` nodes.
    #[must_use]
    pub fn new(params: Pass1Params, num_nodes: usize, beam_width: usize) -> Self {
        Self {
            params,
            beam: BeamSet::new(num_nodes),
            width: beam_width,
            frame: 0,
            trellis: WordTrellis::new(),
            best_wordend: None,
            iw_cache: HashMap::new(),
            alive: false,
        }
    }

    /// Derive the actual beam width from the user setting and the
    /// model class: `sqrt(|V|) * 15` clamped into a model-dependent
    /// ceiling and a fixed floor. `0` means full search.
    #[must_use]
    pub fn select_beam_width(
        specified: i32,
        num_nodes: usize,
        nwords: usize,
        am: &AcousticModel,
    ) -> usize {
        let width = match specified {
            0 => num_nodes,
            n if n > 0 => n as usize,
            _ => {
                let ceiling = if am.is_triphone {
                    if am.tied_mixture { 800 } else { 1500 }
                } else {
                    700
                };
                let guess = ((nwords as f32).sqrt() * 15.0) as usize;
                guess.min(ceiling).max(MINIMAL_BEAM_WIDTH)
            }
        };
        width.min(num_nodes.max(1))
    }

    /// Number of frames processed so far.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frame
    }

    /// True while any token survives.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Best word end of the most recent frame, if any.
    #[must_use]
    pub fn best_wordend(&self) -> Option<(AtomId, WordId)> {
        self.best_wordend.map(|(a, w, _)| (a, w))
    }

    /// Override the word the search must start from (`None` allows any
    /// word; used when resuming after a segment boundary).
    pub fn set_head_silword(&mut self, word: Option<WordId>) {
        self.params.head_silword = word;
    }

    /// Place initial tokens. For N-gram the search starts at the head
    /// silence word's tree; for a DFA at every sentence-initial
    /// category; for a word list at every root.
    pub fn start(&mut self, res: &Pass1Resources<'_>) {
        self.beam.reset();
        self.trellis = WordTrellis::new();
        self.frame = 0;
        self.best_wordend = None;
        self.iw_cache.clear();
        self.alive = false;

        let mut injected = Vec::new();
        match &res.lm {
            Pass1Lm::Ngram(_) => {
                let head = self.params.head_silword;
                for root in &res.lexicon.roots {
                    let contains_head = match head {
                        Some(h) => root_contains(res.lexicon, root, h),
                        None => true,
                    };
                    if !contains_head {
                        continue;
                    }
                    let lscore = self.entry_lscore_ngram(res, root.node, WORD_INVALID);
                    injected.push(Token {
                        node: root.node,
                        score: lscore,
                        last_tre: TRE_NONE,
                        last_cword: WORD_INVALID,
                        prev_word: WORD_INVALID,
                        last_lscore: lscore,
                        next: TOKEN_NONE,
                        alive: true,
                    });
                }
            }
            Pass1Lm::Dfa { dfa, .. } => {
                for (c, &ok) in dfa.cp_begin.iter().enumerate() {
                    if !ok {
                        continue;
                    }
                    for &ri in res
                        .lexicon
                        .roots_by_category
                        .get(c)
                        .map_or(&[][..], Vec::as_slice)
                        .iter()
                    {
                        let root = &res.lexicon.roots[ri];
                        injected.push(Token {
                            node: root.node,
                            score: self.params.penalty1,
                            last_tre: TRE_NONE,
                            last_cword: WORD_INVALID,
                            prev_word: WORD_INVALID,
                            last_lscore: self.params.penalty1,
                            next: TOKEN_NONE,
                            alive: true,
                        });
                    }
                }
            }
            Pass1Lm::WordList => {
                for root in &res.lexicon.roots {
                    injected.push(Token {
                        node: root.node,
                        score: 0.0,
                        last_tre: TRE_NONE,
                        last_cword: WORD_INVALID,
                        prev_word: WORD_INVALID,
                        last_lscore: 0.0,
                        next: TOKEN_NONE,
                        alive: true,
                    });
                }
            }
        }

        for token in injected {
            self.beam.insert(token, self.params.wpair_nlimit);
        }
        let n = self.beam.tlist[self.beam.tn].len();
        self.beam.order = (0..n as TokenId).collect();
        self.alive = n > 0;
        if !self.alive {
            warn!("first pass started with no initial token (empty grammar?)");
        }
    }

    /// Process one feature frame.
    pub fn frame(
        &mut self,
        res: &Pass1Resources<'_>,
        scorer: &mut GaussianScorer,
        vec: &[f32],
    ) {
        if !self.alive {
            return;
        }
        let t = self.frame;
        scorer.begin_frame(t);
        self.best_wordend = None;

        // Intra-word propagation into the new arena.
        let sources = std::mem::take(&mut self.beam.order);
        self.beam.swap();
        let tl = self.beam.tn ^ 1;
        for &src in &sources {
            let tok = self.beam.tlist[tl][src as usize];
            if !tok.alive {
                continue;
            }
            for arc in &res.lexicon.nodes[tok.node as usize].arcs {
                let dest = &res.lexicon.nodes[arc.to as usize];
                let LexNodeKind::State(state) = &dest.kind else {
                    continue;
                };
                let outprob = scorer.outprob_ref(
                    res.am,
                    state,
                    vec,
                    self.params.iwcd_method,
                    self.params.iwcd_best_n,
                );
                let (delta, new_lscore) = self.factoring_delta(res, arc.to, &tok);
                self.beam.insert(
                    Token {
                        node: arc.to,
                        score: tok.score + arc.prob + outprob + delta,
                        last_tre: tok.last_tre,
                        last_cword: tok.last_cword,
                        prev_word: tok.prev_word,
                        last_lscore: new_lscore,
                        next: TOKEN_NONE,
                        alive: true,
                    },
                    self.params.wpair_nlimit,
                );
            }
        }

        // Beam pruning.
        self.beam.prune(self.width);
        if self.beam.order.is_empty() {
            warn!("beam emptied at frame {t}, terminating first pass");
            self.alive = false;
            self.frame += 1;
            return;
        }

        // Word-end detection on the survivors.
        let wordends = self.detect_wordends(res, t);

        // Track the frame-best word end (used by the segmenter and the
        // progressive output).
        for we in &wordends {
            let better = match self.best_wordend {
                Some((_, _, s)) => we.score > s,
                None => true,
            };
            if better {
                self.best_wordend = Some((we.atom, we.word, we.score));
            }
        }

        // Cross-word expansion.
        self.expand_wordends(res, &wordends);

        self.frame += 1;
    }

    /// Close the search, finalise the trellis and backtrack the best
    /// first-pass path.
    pub fn finish(&mut self) -> Pass1Result {
        self.finish_at(self.frame)
    }

    /// Close the search as of `num_frames` frames. Trellis atoms past
    /// the cutoff (a short-pause segmentation boundary) are dropped.
    pub fn finish_at(&mut self, num_frames: usize) -> Pass1Result {
        self.trellis.finalize(num_frames);
        if num_frames == 0 {
            return Pass1Result {
                score: LOG_ZERO,
                seq: Vec::new(),
                final_atom: None,
                num_frames,
            };
        }

        let last = num_frames as i32 - 1;
        // Prefer the tail silence word at the final frame when set.
        let final_atom = self
            .params
            .tail_silword
            .and_then(|w| self.trellis.atom_at(last, w))
            .or_else(|| self.trellis.best_at(last));

        match final_atom {
            Some(atom) => Pass1Result {
                score: self.trellis.atom(atom).score,
                seq: self.trellis.backtrack(atom),
                final_atom: Some(atom),
                num_frames,
            },
            None => {
                debug!("no word end survived at the final frame");
                Pass1Result {
                    score: LOG_ZERO,
                    seq: Vec::new(),
                    final_atom: None,
                    num_frames,
                }
            }
        }
    }

    /// Current best word sequence (progressive output).
    #[must_use]
    pub fn current_best_seq(&self) -> Vec<WordId> {
        match self.best_wordend {
            Some((atom, _, _)) => {
                let mut seq = Vec::new();
                let mut cur = Some(atom);
                while let Some(id) = cur {
                    let a = &self.trellis.atoms[id as usize];
                    seq.push(a.wid);
                    cur = a.prev;
                }
                seq.reverse();
                seq
            }
            None => Vec::new(),
        }
    }

    /// Factoring adjustment when a token crosses into `node`.
    fn factoring_delta(
        &mut self,
        res: &Pass1Resources<'_>,
        node: NodeId,
        tok: &Token,
    ) -> (LogProb, LogProb) {
        let Pass1Lm::Ngram(lm) = &res.lm else {
            return (0.0, tok.last_lscore);
        };
        if !self.params.factoring {
            return (0.0, tok.last_lscore);
        }
        let n = &res.lexicon.nodes[node as usize];
        let new_lscore = match n.fact_word {
            Some(w) => {
                self.params.lm_weight
                    * (bi_or_uni(lm, tok.last_cword, w) + res.words.words[w as usize].cprob)
                    + self.params.lm_penalty
            }
            None => self.params.lm_weight * n.factor + self.params.lm_penalty,
        };
        if (new_lscore - tok.last_lscore).abs() < f32::EPSILON {
            (0.0, tok.last_lscore)
        } else {
            (new_lscore - tok.last_lscore, new_lscore)
        }
    }

    /// LM value applied when entering a tree root.
    fn entry_lscore_ngram(
        &self,
        res: &Pass1Resources<'_>,
        root_node: NodeId,
        cword: WordId,
    ) -> LogProb {
        let Pass1Lm::Ngram(lm) = &res.lm else {
            return self.params.penalty1;
        };
        let node = &res.lexicon.nodes[root_node as usize];
        let raw = match node.fact_word {
            Some(w) if self.params.factoring => {
                bi_or_uni(lm, cword, w) + res.words.words[w as usize].cprob
            }
            _ if self.params.factoring => node.factor,
            _ => 0.0,
        };
        self.params.lm_weight * raw + self.params.lm_penalty
    }

    /// Emit trellis atoms for surviving tokens on word-end nodes.
    fn detect_wordends(&mut self, res: &Pass1Resources<'_>, t: usize) -> Vec<WordEnd> {
        // Keep only the best candidate per word for this frame.
        let mut best: HashMap<WordId, (LogProb, Token, LogProb)> = HashMap::new();

        for &id in &self.beam.order {
            let tok = *self.beam.token(id);
            let node = &res.lexicon.nodes[tok.node as usize];
            let Some((wid, exit_prob)) = node.word_end else {
                continue;
            };
            let entry = &res.words.words[wid as usize];

            // Replace the factored value by the exact LM score.
            let exact_lm = match &res.lm {
                Pass1Lm::Ngram(lm) => {
                    let mut v = self.params.lm_weight
                        * (bi_or_uni(lm, tok.last_cword, wid) + entry.cprob)
                        + self.params.lm_penalty;
                    if entry.transparent {
                        v += self.params.lm_penalty_trans;
                    }
                    v
                }
                Pass1Lm::Dfa { .. } => self.params.penalty1 + entry.cprob,
                Pass1Lm::WordList => entry.cprob,
            };
            let score = tok.score + exit_prob + (exact_lm - tok.last_lscore);

            let slot = best.get(&wid);
            if slot.is_none_or(|&(s, _, _)| score > s) {
                best.insert(wid, (score, tok, exact_lm));
            }
        }

        let mut out = Vec::with_capacity(best.len());
        for (wid, (score, tok, exact_lm)) in best {
            let entry = &res.words.words[wid as usize];
            let prev = (tok.last_tre != TRE_NONE).then_some(tok.last_tre);
            let begin = match prev {
                Some(p) => self.trellis.atom(p).end + 1,
                None => 0,
            };
            let cword = if entry.transparent {
                tok.last_cword
            } else {
                wid
            };
            let atom = self.trellis.push(TrellisAtom {
                wid,
                begin,
                end: t as i32,
                score,
                lm_score: exact_lm,
                prev,
                last_cword: cword,
            });
            let cp_word = if entry.transparent && tok.prev_word != WORD_INVALID {
                tok.prev_word
            } else {
                wid
            };
            out.push(WordEnd {
                atom,
                word: wid,
                score,
                cword,
                cp_word,
            });
        }
        out
    }

    /// Propagate surviving word ends into the word-head roots.
    fn expand_wordends(&mut self, res: &Pass1Resources<'_>, wordends: &[WordEnd]) {
        if wordends.is_empty() {
            return;
        }
        match &res.lm {
            Pass1Lm::Ngram(lm) => {
                // Under 1-gram factoring the LM value at a shared root
                // does not depend on the context, so only the best word
                // end of this frame enters shared trees.
                let best = wordends
                    .iter()
                    .max_by(|a, b| {
                        a.score
                            .partial_cmp(&b.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .expect("nonempty");

                for root in &res.lexicon.roots {
                    if self.params.factoring && root.is_shared() {
                        let lscore = self.entry_lscore_ngram(res, root.node, best.cword);
                        self.inject(root.node, best, lscore);
                    } else {
                        // Isolated heads (or factoring disabled): expand
                        // every context with its exact score.
                        for we in wordends {
                            let lscore = match root.single_word {
                                Some(w) => {
                                    let bi = *self
                                        .iw_cache
                                        .entry((we.cword, w))
                                        .or_insert_with(|| bi_or_uni(lm, we.cword, w));
                                    self.params.lm_weight
                                        * (bi + res.words.words[w as usize].cprob)
                                        + self.params.lm_penalty
                                }
                                None => self.entry_lscore_ngram(res, root.node, we.cword),
                            };
                            self.inject(root.node, we, lscore);
                        }
                    }
                }
            }
            Pass1Lm::Dfa { dfa, word_category } => {
                for we in wordends {
                    let c1 = word_category[we.cp_word as usize];
                    for (c2, row) in dfa.cp[c1].iter().enumerate() {
                        if !row {
                            continue;
                        }
                        for &ri in &res.lexicon.roots_by_category[c2] {
                            let root_node = res.lexicon.roots[ri].node;
                            self.inject(root_node, we, self.params.penalty1);
                        }
                    }
                }
            }
            Pass1Lm::WordList => {
                // Isolated word recognition: no cross-word transitions.
            }
        }
    }

    fn inject(&mut self, root_node: NodeId, we: &WordEnd, lscore: LogProb) {
        let token = Token {
            node: root_node,
            score: we.score + lscore,
            last_tre: we.atom,
            last_cword: we.cword,
            prev_word: we.word,
            last_lscore: lscore,
            next: TOKEN_NONE,
            alive: true,
        };
        let before = self.beam.tlist[self.beam.tn].len();
        self.beam.insert(token, self.params.wpair_nlimit);
        let after = self.beam.tlist[self.beam.tn].len();
        if after > before {
            // Newly created root token joins the survivor order.
            self.beam.order.push((after - 1) as TokenId);
        }
    }
}

/// Bigram with a unigram fallback for the empty context.
fn bi_or_uni(lm: &NgramLm, cword: WordId, w: WordId) -> LogProb {
    if cword == WORD_INVALID {
        lm.forward.prob_uni(w)
    } else {
        lm.forward.prob_bi(cword, w)
    }
}

/// Whether a root's subtree contains the given word.
fn root_contains(lexicon: &Lexicon, root: &crate::lexicon::Root, wid: WordId) -> bool {
    if root.single_word == Some(wid) {
        return true;
    }
    // Shared roots: check whether any word-end of `wid` is reachable.
    // The tree is small near the root, so a forward DFS is fine.
    let targets = &lexicon.word_end_nodes[wid as usize];
    let mut seen = vec![false; lexicon.nodes.len()];
    let mut stack = vec![root.node];
    seen[root.node as usize] = true;
    while let Some(n) = stack.pop() {
        if targets.contains(&n) {
            return true;
        }
        for arc in &lexicon.nodes[n as usize].arcs {
            if !seen[arc.to as usize] {
                seen[arc.to as usize] = true;
                stack.push(arc.to);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::{Density, HmmState, Mixture, PhysicalHmm, Transition};
    use crate::config::GprunMethod;
    use crate::lm::ngram::NgramModel;

    /// One-state monophones on a 1-dimensional feature space; phone "a"
    /// peaks at 0.0, "b" at 4.0, "s" (silence) at -4.0.
    fn test_am() -> AcousticModel {
        let mut am = AcousticModel::new(1);
        for (name, mean) in [("s", -4.0f32), ("a", 0.0), ("b", 4.0)] {
            let d = am.add_density(Density::from_variance(vec![mean], &[1.0]));
            let st = am.add_state(HmmState {
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
                states: vec![st],
                trans: t,
            })
            .unwrap();
        }
        am
    }

    fn run_search(
        frames: &[f32],
        width: usize,
    ) -> (Pass1Result, WordTrellis) {
        let am = test_am();
        let dict =
            WordLexicon::load_str("<s> s\nA a\nB b\n", Some(&am)).unwrap();
        let mut lmm = NgramModel::uniform(3);
        lmm.set_backoff_uni(0, 0.0);
        let lm = NgramLm::from_forward(lmm);
        let lexicon = Lexicon::build_ngram(&am, &dict, &lm.forward).unwrap();

        let mut params = Pass1Params {
            lm_weight: 1.0,
            lm_penalty: 0.0,
            lm_penalty_trans: 0.0,
            penalty1: 0.0,
            factoring: true,
            wpair_nlimit: 0,
            iwcd_method: IwcdMethod::Max,
            iwcd_best_n: 3,
            head_silword: Some(0),
            tail_silword: None,
        };
        params.head_silword = Some(dict.id_by_name("<s>").unwrap());

        let res = Pass1Resources {
            am: &am,
            lexicon: &lexicon,
            words: &dict,
            lm: Pass1Lm::Ngram(&lm),
        };
        let mut scorer = GaussianScorer::new(&am, GprunMethod::None, 4);
        scorer.prepare();

        let mut search = BeamSearch::new(params, lexicon.len(), width);
        search.start(&res);
        for &v in frames {
            search.frame(&res, &mut scorer, &[v]);
        }
        let result = search.finish();
        let trellis = search.trellis.clone();
        (result, trellis)
    }

    /// Silence then "a" then "b" in the feature space.
    fn sab_frames() -> Vec<f32> {
        let mut v = Vec::new();
        v.extend(std::iter::repeat_n(-4.0f32, 4));
        v.extend(std::iter::repeat_n(0.0f32, 4));
        v.extend(std::iter::repeat_n(4.0f32, 4));
        v
    }

    #[test]
    fn recognizes_word_sequence() {
        let (result, _) = run_search(&sab_frames(), 1000);
        assert!(result.score > LOG_ZERO);
        // Path starts at the silence word and ends at B.
        assert_eq!(result.seq.first().copied(), Some(0));
        assert_eq!(result.seq.last().copied(), Some(2));
        // "A" must appear between them.
        assert!(result.seq.contains(&1), "sequence: {:?}", result.seq);
    }

    #[test]
    fn trellis_atoms_are_contiguous() {
        let (result, trellis) = run_search(&sab_frames(), 1000);
        let mut cur = result.final_atom;
        while let Some(id) = cur {
            let atom = trellis.atom(id);
            match atom.prev {
                Some(p) => assert_eq!(atom.begin, trellis.atom(p).end + 1),
                None => assert_eq!(atom.begin, 0),
            }
            cur = atom.prev;
        }
    }

    #[test]
    fn beam_monotonicity() {
        // A wider beam can only improve (or match) the best path score.
        let frames = sab_frames();
        let (narrow, _) = run_search(&frames, 2);
        let (wide, _) = run_search(&frames, 1000);
        if narrow.score > LOG_ZERO {
            assert!(wide.score >= narrow.score - 1e-4);
        } else {
            assert!(wide.score >= LOG_ZERO);
        }
    }

    #[test]
    fn strict_merge_keeps_old_token_on_tie() {
        let mut beam = BeamSet::new(2);
        let mk = |score: f32, prev_word: WordId| Token {
            node: 1,
            score,
            last_tre: TRE_NONE,
            last_cword: 7,
            prev_word,
            last_lscore: 0.0,
            next: TOKEN_NONE,
            alive: true,
        };
        beam.insert(mk(-5.0, 1), 0);
        // Equal score: the old token must survive.
        beam.insert(mk(-5.0, 2), 0);
        assert_eq!(beam.tlist[beam.tn].len(), 1);
        assert_eq!(beam.tlist[beam.tn][0].prev_word, 1);
        // Strictly better: replaced.
        beam.insert(mk(-4.0, 3), 0);
        assert_eq!(beam.tlist[beam.tn][0].prev_word, 3);
    }

    #[test]
    fn wpair_keeps_tokens_per_previous_word() {
        let mut beam = BeamSet::new(2);
        let mk = |score: f32, prev_word: WordId| Token {
            node: 1,
            score,
            last_tre: TRE_NONE,
            last_cword: prev_word,
            prev_word,
            last_lscore: 0.0,
            next: TOKEN_NONE,
            alive: true,
        };
        beam.insert(mk(-5.0, 1), 2);
        beam.insert(mk(-6.0, 2), 2);
        assert_eq!(beam.tlist[beam.tn].len(), 2);
        // Third context evicts the lowest scoring token.
        beam.insert(mk(-4.0, 3), 2);
        let words: Vec<WordId> = beam.tlist[beam.tn]
            .iter()
            .map(|t| t.prev_word)
            .collect();
        assert!(words.contains(&1));
        assert!(words.contains(&3));
        assert!(!words.contains(&2));
        // A worse token than every kept one is dropped.
        beam.insert(mk(-9.0, 4), 2);
        assert_eq!(beam.tlist[beam.tn].len(), 2);
    }

    #[test]
    fn select_beam_width_rules() {
        let am = test_am();
        assert_eq!(BeamSearch::select_beam_width(0, 5000, 100, &am), 5000);
        assert_eq!(BeamSearch::select_beam_width(400, 5000, 100, &am), 400);
        // Auto: sqrt(10000)*15 = 1500, monophone ceiling 700.
        assert_eq!(BeamSearch::select_beam_width(-1, 5000, 10_000, &am), 700);
        // Floor applies for tiny vocabularies.
        assert_eq!(BeamSearch::select_beam_width(-1, 5000, 4, &am), 200);
        // Never more than the node count.
        assert_eq!(BeamSearch::select_beam_width(400, 30, 100, &am), 30);
    }
}
