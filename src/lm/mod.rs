//! Language model layer.
//!
//! Three LM variants drive the decoder: a statistical N-gram (forward
//! bigram for the first pass, backward trigram for the second), a DFA
//! grammar over word categories with a category-pair constraint table,
//! and a flat word list for isolated word recognition. Grammars are
//! managed as a set with staged add/delete/activate/deactivate hooks and
//! concatenated into one global grammar.

pub mod dfa;
pub mod multigram;
pub mod ngram;

pub use dfa::{DfaArc, DfaInfo};
pub use multigram::{GlobalGrammar, GramHook, Grammar, GrammarSet};
pub use ngram::{NgramLm, NgramModel};

/// Which kind of language model is driving the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmKind {
    /// Statistical N-gram.
    Ngram,
    /// DFA grammar over word categories.
    DfaGrammar,
    /// Flat word list (isolated word recognition).
    WordList,
}
