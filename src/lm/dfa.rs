//! DFA grammar over word categories.
//!
//! States and arcs express the sentence syntax; each arc consumes one
//! word category. A category-pair table extracted from the automaton
//! constrains inter-word transitions during the frame-synchronous pass
//! and candidate expansion during stack decoding.

use crate::dict::WordId;

/// One outgoing arc of a DFA state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfaArc {
    /// Word category consumed by this arc.
    pub category: usize,
    /// Destination state.
    pub to: usize,
}

/// A deterministic finite automaton over word categories.
///
/// State 0 is the initial state. Word ids in `term_words` refer to the
/// owning dictionary.
#[derive(Debug, Clone, Default)]
pub struct DfaInfo {
    /// Number of states.
    pub state_num: usize,
    /// Outgoing arcs per state.
    pub arcs: Vec<Vec<DfaArc>>,
    /// Accepting states.
    pub accept: Vec<bool>,
    /// Number of word categories (terminals).
    pub term_num: usize,
    /// Word ids belonging to each category.
    pub term_words: Vec<Vec<WordId>>,
    /// Category-pair constraint: `cp[c1][c2]` is true when a word of
    /// category `c2` may directly follow one of category `c1`.
    pub cp: Vec<Vec<bool>>,
    /// Categories allowed at sentence start.
    pub cp_begin: Vec<bool>,
    /// Categories allowed at sentence end.
    pub cp_end: Vec<bool>,
}

impl DfaInfo {
    /// Create an automaton with `state_num` states and `term_num`
    /// categories and no arcs.
    #[must_use]
    pub fn new(state_num: usize, term_num: usize) -> Self {
        Self {
            state_num,
            arcs: vec![Vec::new(); state_num],
            accept: vec![false; state_num],
            term_num,
            term_words: vec![Vec::new(); term_num],
            cp: vec![vec![false; term_num]; term_num],
            cp_begin: vec![false; term_num],
            cp_end: vec![false; term_num],
        }
    }

    /// Add an arc consuming `category` from `from` to `to`.
    pub fn add_arc(&mut self, from: usize, category: usize, to: usize) {
        self.arcs[from].push(DfaArc { category, to });
    }

    /// Register a word under a category.
    pub fn add_term_word(&mut self, category: usize, word: WordId) {
        self.term_words[category].push(word);
    }

    /// Extract the category-pair table and begin/end sets from the arcs.
    ///
    /// Call after the automaton is fully built; rebuilding is idempotent.
    pub fn extract_cpair(&mut self) {
        self.cp = vec![vec![false; self.term_num]; self.term_num];
        self.cp_begin = vec![false; self.term_num];
        self.cp_end = vec![false; self.term_num];

        for arc in &self.arcs[0] {
            self.cp_begin[arc.category] = true;
        }
        for state_arcs in &self.arcs {
            for arc in state_arcs {
                if self.accept[arc.to] {
                    self.cp_end[arc.category] = true;
                }
                for next in &self.arcs[arc.to] {
                    self.cp[arc.category][next.category] = true;
                }
            }
        }
    }

    /// True when `c2` may follow `c1`.
    #[must_use]
    pub fn cp_accept(&self, c1: usize, c2: usize) -> bool {
        self.cp[c1][c2]
    }

    /// Append another automaton with the given offsets (global grammar
    /// construction). Cross-grammar category pairs stay false.
    pub fn append(&mut self, other: &DfaInfo, cate_offset: usize, word_offset: WordId) {
        let state_offset = self.state_num;
        self.state_num += other.state_num;
        for (s, state_arcs) in other.arcs.iter().enumerate() {
            let mut arcs = Vec::with_capacity(state_arcs.len());
            for arc in state_arcs {
                arcs.push(DfaArc {
                    category: arc.category + cate_offset,
                    to: arc.to + state_offset,
                });
            }
            self.arcs.push(arcs);
            self.accept.push(other.accept[s]);
        }

        self.term_num += other.term_num;
        for words in &other.term_words {
            self.term_words
                .push(words.iter().map(|&w| w + word_offset).collect());
        }

        // Grow existing rows, then append the other grammar's rows.
        for row in &mut self.cp {
            row.resize(self.term_num, false);
        }
        for row in &other.cp {
            let mut new_row = vec![false; self.term_num];
            for (c2, &v) in row.iter().enumerate() {
                new_row[c2 + cate_offset] = v;
            }
            self.cp.push(new_row);
        }
        self.cp_begin.extend(other.cp_begin.iter().copied());
        self.cp_end.extend(other.cp_end.iter().copied());
    }
}
