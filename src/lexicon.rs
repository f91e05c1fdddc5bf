//! Tree-structured lexicon.
//!
//! Words sharing pronunciation prefixes share lexicon states. Each tree
//! root is a non-emitting junction per (category, first phone); emitting
//! nodes carry an HMM state (or a left-context state cluster resolved
//! through pseudo phones). The final phone of every word is never shared,
//! so a word-end node identifies exactly one word.
//!
//! For N-gram decoding one global tree is built and every node carries a
//! 1-gram factoring value (the best attainable unigram over its subtree);
//! branches holding exactly one word record it so the exact 2-gram can be
//! applied on entry. For DFA grammars one tree per category is built and
//! inter-word transitions are constrained by the category-pair table.

use crate::am::{AcousticModel, LOG_ZERO, LogProb, StateRef};
use crate::dict::{WordId, WordLexicon};
use crate::error::{DecodeError, Result};
use crate::lm::ngram::NgramModel;
use tracing::info;

/// Dense lexicon node id.
pub type NodeId = u32;

/// Sentinel for "no node".
pub const NODE_INVALID: NodeId = u32::MAX;

/// Category value used for N-gram (category-less) trees.
pub const NO_CATEGORY: usize = usize::MAX;

/// An outgoing arc with its transition log probability.
#[derive(Debug, Clone, Copy)]
pub struct LexArc {
    /// Destination node.
    pub to: NodeId,
    /// Transition log probability.
    pub prob: LogProb,
}

/// What a lexicon node emits.
#[derive(Debug, Clone)]
pub enum LexNodeKind {
    /// Non-emitting tree root junction.
    Root,
    /// Emitting node bound to an HMM state (or context cluster).
    State(StateRef),
}

/// One lexicon node.
#[derive(Debug, Clone)]
pub struct LexNode {
    /// Emission binding.
    pub kind: LexNodeKind,
    /// Outgoing arcs (self loops included).
    pub arcs: Vec<LexArc>,
    /// Word id and exit log probability when this node can end a word.
    pub word_end: Option<(WordId, LogProb)>,
    /// 1-gram factoring value (raw log probability, unweighted).
    pub factor: LogProb,
    /// Set when the subtree below holds exactly one word.
    pub fact_word: Option<WordId>,
    /// Category of the owning tree ([`NO_CATEGORY`] for N-gram).
    pub category: usize,
}

/// A tree root junction.
#[derive(Debug, Clone)]
pub struct Root {
    /// The junction node.
    pub node: NodeId,
    /// Category of the tree this root belongs to.
    pub category: usize,
    /// Number of words reachable below this root.
    pub word_count: usize,
    /// The single word below, when `word_count == 1`.
    pub single_word: Option<WordId>,
}

impl Root {
    /// A root shared by two or more words (factoring applies below it).
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.word_count > 1
    }
}

/// The complete tree lexicon.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    /// Node arena.
    pub nodes: Vec<LexNode>,
    /// Tree roots.
    pub roots: Vec<Root>,
    /// Root indices per category (empty for N-gram lexicons).
    pub roots_by_category: Vec<Vec<usize>>,
    /// Word-end node ids per word.
    pub word_end_nodes: Vec<Vec<NodeId>>,
    /// Number of words covered.
    pub nwords: usize,
}

impl Lexicon {
    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the lexicon holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Build the global N-gram tree with 1-gram factoring values.
    ///
    /// # Errors
    ///
    /// Returns a `Model` error when a word has no resolvable phones.
    pub fn build_ngram(
        am: &AcousticModel,
        dict: &WordLexicon,
        lm: &NgramModel,
    ) -> Result<Self> {
        let mut builder = TreeBuilder::new(am, dict.len());
        for (wid, entry) in dict.words.iter().enumerate() {
            let uni = lm.prob_uni(wid as WordId);
            builder.add_word(wid as WordId, &entry.phones, uni, NO_CATEGORY)?;
        }
        let lexicon = builder.finish(0);
        info!(
            "lexicon tree built: {} nodes, {} roots, {} words",
            lexicon.len(),
            lexicon.roots.len(),
            lexicon.nwords
        );
        Ok(lexicon)
    }

    /// Build per-category trees for a DFA grammar.
    ///
    /// `word_category` gives the category of each dictionary word.
    ///
    /// # Errors
    ///
    /// Returns a `Model` error when a word has no resolvable phones.
    pub fn build_dfa(
        am: &AcousticModel,
        dict: &WordLexicon,
        word_category: &[usize],
        num_categories: usize,
    ) -> Result<Self> {
        let mut builder = TreeBuilder::new(am, dict.len());
        for (wid, entry) in dict.words.iter().enumerate() {
            let category = word_category[wid];
            builder.add_word(wid as WordId, &entry.phones, 0.0, category)?;
        }
        let lexicon = builder.finish(num_categories);
        info!(
            "category lexicon built: {} nodes, {} roots, {} categories",
            lexicon.len(),
            lexicon.roots.len(),
            num_categories
        );
        Ok(lexicon)
    }
}

/// Open path end while chaining phones: a node plus the accumulated exit
/// log probability from it.
type OpenEnd = (NodeId, LogProb);

/// A shared phone instance in the prefix trie.
struct TrieNode {
    phone: usize,
    children: Vec<usize>,
    /// Nodes created for this phone chain.
    chain: Vec<NodeId>,
    /// Effective open ends after this phone (bypass folded in).
    open_ends: Vec<OpenEnd>,
}

struct TreeBuilder<'a> {
    am: &'a AcousticModel,
    nodes: Vec<LexNode>,
    roots: Vec<Root>,
    /// Root index per (category, first phone).
    root_index: Vec<((usize, usize), usize)>,
    /// Trie storage; children of a root chain start from its entry.
    trie: Vec<TrieNode>,
    /// Trie entry per root index.
    root_children: Vec<Vec<usize>>,
    word_end_nodes: Vec<Vec<NodeId>>,
}

impl<'a> TreeBuilder<'a> {
    fn new(am: &'a AcousticModel, nwords: usize) -> Self {
        Self {
            am,
            nodes: Vec::new(),
            roots: Vec::new(),
            root_index: Vec::new(),
            trie: Vec::new(),
            root_children: Vec::new(),
            word_end_nodes: vec![Vec::new(); nwords],
        }
    }

    fn new_node(&mut self, kind: LexNodeKind, category: usize) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(LexNode {
            kind,
            arcs: Vec::new(),
            word_end: None,
            factor: LOG_ZERO,
            fact_word: None,
            category,
        });
        id
    }

    /// Create the emitting node chain for one phone, wiring entry arcs
    /// from the given open ends. Returns (chain nodes, open ends after).
    fn build_phone(
        &mut self,
        phone: usize,
        from: &[OpenEnd],
        category: usize,
    ) -> (Vec<NodeId>, Vec<OpenEnd>) {
        let (chain_states, trans_id) = self.am.state_chain(phone);
        let trans = &self.am.transitions[trans_id];
        let n = chain_states.len();
        let nstate = trans.nstate;

        let node_ids: Vec<NodeId> = chain_states
            .into_iter()
            .map(|s| self.new_node(LexNodeKind::State(s), category))
            .collect();

        // Internal transitions (self loops and skips included).
        for i in 0..n {
            for j in 0..n {
                let p = trans.prob(i + 1, j + 1);
                if p > LOG_ZERO {
                    self.nodes[node_ids[i] as usize].arcs.push(LexArc {
                        to: node_ids[j],
                        prob: p,
                    });
                }
            }
        }

        // Entry arcs from every open end into every entry state.
        for &(from_node, from_prob) in from {
            for j in 0..n {
                let e = trans.prob(0, j + 1);
                if e > LOG_ZERO {
                    self.nodes[from_node as usize].arcs.push(LexArc {
                        to: node_ids[j],
                        prob: from_prob + e,
                    });
                }
            }
        }

        // Open ends after this phone.
        let mut open_ends: Vec<OpenEnd> = Vec::new();
        for i in 0..n {
            let e = trans.prob(i + 1, nstate - 1);
            if e > LOG_ZERO {
                open_ends.push((node_ids[i], e));
            }
        }
        // Tee phone: the previous open ends survive with the bypass cost.
        let bypass = trans.prob(0, nstate - 1);
        if bypass > LOG_ZERO {
            for &(node, prob) in from {
                open_ends.push((node, prob + bypass));
            }
        }

        (node_ids, open_ends)
    }

    fn root_for(&mut self, category: usize, first_phone: usize) -> usize {
        if let Some(&(_, idx)) = self
            .root_index
            .iter()
            .find(|&&(key, _)| key == (category, first_phone))
        {
            return idx;
        }
        let node = self.new_node(LexNodeKind::Root, category);
        let idx = self.roots.len();
        self.roots.push(Root {
            node,
            category,
            word_count: 0,
            single_word: None,
        });
        self.root_index.push(((category, first_phone), idx));
        self.root_children.push(Vec::new());
        idx
    }

    fn add_word(
        &mut self,
        wid: WordId,
        phones: &[usize],
        unigram: LogProb,
        category: usize,
    ) -> Result<()> {
        if phones.is_empty() {
            return Err(DecodeError::Model(format!(
                "word {wid} has no resolvable phone sequence"
            )));
        }

        let root_idx = self.root_for(category, phones[0]);
        let root_node = self.roots[root_idx].node;
        self.roots[root_idx].word_count += 1;
        self.roots[root_idx].single_word = if self.roots[root_idx].word_count == 1 {
            Some(wid)
        } else {
            None
        };
        let mut touched: Vec<NodeId> = vec![root_node];

        let mut open_ends: Vec<OpenEnd> = vec![(root_node, 0.0)];
        let mut trie_pos: Option<usize> = None;

        // Shared prefix: all phones but the last walk (or extend) the trie.
        for (i, &phone) in phones.iter().enumerate() {
            let last = i == phones.len() - 1;
            if last {
                // The final phone is always a private chain so the word
                // end identifies this word alone.
                let (chain, ends) = self.build_phone(phone, &open_ends, category);
                touched.extend_from_slice(&chain);
                for &(node, exit_prob) in &ends {
                    // Only freshly created nodes may carry the word end.
                    if chain.contains(&node) {
                        self.nodes[node as usize].word_end = Some((wid, exit_prob));
                        self.word_end_nodes[wid as usize].push(node);
                    }
                }
                break;
            }

            let children: &[usize] = match trie_pos {
                None => &self.root_children[root_idx],
                Some(t) => &self.trie[t].children,
            };
            let found = children
                .iter()
                .copied()
                .find(|&c| self.trie[c].phone == phone);

            let next = match found {
                Some(c) => c,
                None => {
                    let (chain, ends) = self.build_phone(phone, &open_ends, category);
                    let t = self.trie.len();
                    self.trie.push(TrieNode {
                        phone,
                        children: Vec::new(),
                        chain,
                        open_ends: ends,
                    });
                    match trie_pos {
                        None => self.root_children[root_idx].push(t),
                        Some(parent) => self.trie[parent].children.push(t),
                    }
                    t
                }
            };
            touched.extend_from_slice(&self.trie[next].chain);
            open_ends = self.trie[next].open_ends.clone();
            trie_pos = Some(next);
        }

        // Factoring: the node value is the best unigram over its subtree.
        for node in touched {
            let n = &mut self.nodes[node as usize];
            if unigram > n.factor {
                n.factor = unigram;
            }
        }
        Ok(())
    }

    fn finish(mut self, num_categories: usize) -> Lexicon {
        // fact_word means "exactly one word below this node"; derive it
        // from per-node word counts.
        let mut word_count = vec![0usize; self.nodes.len()];
        let mut only_word = vec![None; self.nodes.len()];
        self.count_words(&mut word_count, &mut only_word);
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if word_count[i] == 1 {
                node.fact_word = only_word[i];
            }
        }

        let mut roots_by_category = vec![Vec::new(); num_categories];
        if num_categories > 0 {
            for (idx, root) in self.roots.iter().enumerate() {
                if root.category != NO_CATEGORY {
                    roots_by_category[root.category].push(idx);
                }
            }
        }

        let nwords = self.word_end_nodes.len();
        Lexicon {
            nodes: self.nodes,
            roots: self.roots,
            roots_by_category,
            word_end_nodes: self.word_end_nodes,
            nwords,
        }
    }

    /// Count, for every node, how many distinct words can pass it, and
    /// remember the word when there is exactly one. Runs a reverse walk
    /// from each word-end chain via a per-word DFS over predecessors.
    fn count_words(&self, word_count: &mut [usize], only_word: &mut [Option<WordId>]) {
        // Build a predecessor map once.
        let mut preds: Vec<Vec<NodeId>> = vec![Vec::new(); self.nodes.len()];
        for (from, node) in self.nodes.iter().enumerate() {
            for arc in &node.arcs {
                if arc.to as usize != from {
                    preds[arc.to as usize].push(from as NodeId);
                }
            }
        }
        for (wid, ends) in self.word_end_nodes.iter().enumerate() {
            let mut seen = vec![false; self.nodes.len()];
            let mut stack: Vec<NodeId> = ends.clone();
            for &e in ends {
                seen[e as usize] = true;
            }
            while let Some(n) = stack.pop() {
                word_count[n as usize] += 1;
                only_word[n as usize] = Some(wid as WordId);
                for &p in &preds[n as usize] {
                    if !seen[p as usize] {
                        seen[p as usize] = true;
                        stack.push(p);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::{Density, HmmState, Mixture, PhysicalHmm, Transition};
    use crate::dict::WordLexicon;

    fn linear_am(phones: &[&str]) -> AcousticModel {
        let mut am = AcousticModel::new(1);
        for (i, name) in phones.iter().enumerate() {
            let d = am.add_density(Density::from_variance(vec![i as f32], &[1.0]));
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
                name: (*name).to_owned(),
                states: vec![s],
                trans: t,
            })
            .unwrap();
        }
        am
    }

    fn dict(am: &AcousticModel, text: &str) -> WordLexicon {
        WordLexicon::load_str(text, Some(am)).unwrap()
    }

    #[test]
    fn prefix_sharing_but_private_word_ends() {
        let am = linear_am(&["a", "b", "c", "d"]);
        let d = dict(&am, "AB a b\nABC a b c\nABD a b d\n");
        let lm = NgramModel::uniform(3);
        let lex = Lexicon::build_ngram(&am, &d, &lm).unwrap();

        // One root (all words start with "a").
        assert_eq!(lex.roots.len(), 1);
        assert_eq!(lex.roots[0].word_count, 3);
        assert!(lex.roots[0].is_shared());

        // Each word has its own word-end node.
        let mut end_nodes: Vec<NodeId> = lex
            .word_end_nodes
            .iter()
            .flat_map(|v| v.iter().copied())
            .collect();
        end_nodes.sort_unstable();
        end_nodes.dedup();
        assert_eq!(end_nodes.len(), 3, "word ends must not be shared");

        // Word-end nodes map to exactly one word.
        for (wid, ends) in lex.word_end_nodes.iter().enumerate() {
            for &e in ends {
                assert_eq!(lex.nodes[e as usize].word_end.unwrap().0, wid as WordId);
            }
        }
    }

    #[test]
    fn factoring_values_decrease_into_the_tree() {
        let am = linear_am(&["a", "b", "c"]);
        let d = dict(&am, "AB a b\nAC a c\n");
        let mut lm = NgramModel::new(2);
        lm.set_unigram(0, -1.0);
        lm.set_unigram(1, -2.0);
        let lex = Lexicon::build_ngram(&am, &d, &lm).unwrap();

        let root = &lex.nodes[lex.roots[0].node as usize];
        // Root factoring = best unigram below = -1.0.
        assert!((root.factor + 1.0).abs() < 1e-6);
        assert!(root.fact_word.is_none(), "two words below the root");

        // The word-end chains belong to single words with their own
        // unigram as the factoring value.
        for (wid, ends) in lex.word_end_nodes.iter().enumerate() {
            let expected = lm.prob_uni(wid as WordId);
            for &e in ends {
                let node = &lex.nodes[e as usize];
                assert_eq!(node.fact_word, Some(wid as WordId));
                assert!((node.factor - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn dfa_trees_are_per_category() {
        let am = linear_am(&["y", "n"]);
        let d = dict(&am, "0 y\n1 n\n");
        let lex = Lexicon::build_dfa(&am, &d, &[0, 1], 2).unwrap();
        assert_eq!(lex.roots_by_category.len(), 2);
        assert_eq!(lex.roots_by_category[0].len(), 1);
        assert_eq!(lex.roots_by_category[1].len(), 1);
        let r0 = &lex.roots[lex.roots_by_category[0][0]];
        assert_eq!(r0.category, 0);
        assert_eq!(r0.single_word, Some(0));
    }

    #[test]
    fn single_word_root_is_isolated() {
        let am = linear_am(&["a", "b", "z"]);
        let d = dict(&am, "AB a b\nZ z\n");
        let lm = NgramModel::uniform(2);
        let lex = Lexicon::build_ngram(&am, &d, &lm).unwrap();
        assert_eq!(lex.roots.len(), 2);
        let z_root = lex
            .roots
            .iter()
            .find(|r| r.word_count == 1)
            .expect("isolated root");
        assert_eq!(z_root.single_word, Some(1));
        assert!(!z_root.is_shared());
    }

    #[test]
    fn arcs_carry_entry_and_exit_probabilities() {
        let am = linear_am(&["a", "b"]);
        let d = dict(&am, "AB a b\n");
        let lm = NgramModel::uniform(1);
        let lex = Lexicon::build_ngram(&am, &d, &lm).unwrap();

        let root = &lex.nodes[lex.roots[0].node as usize];
        assert_eq!(root.arcs.len(), 1, "root connects to the first state");
        assert!((root.arcs[0].prob - 0.0).abs() < 1e-6);

        let first = &lex.nodes[root.arcs[0].to as usize];
        // Self loop plus the cross-phone arc (exit + entry).
        assert_eq!(first.arcs.len(), 2);
        let half = 0.5f32.ln();
        let cross = first
            .arcs
            .iter()
            .find(|a| a.to != root.arcs[0].to)
            .unwrap();
        assert!((cross.prob - half).abs() < 1e-5);
    }
}
