//! Multiple-grammar management.
//!
//! Grammars can be added, deleted, activated and deactivated while the
//! engine runs. Mutations are only marked here (a pending hook per
//! grammar); `exec` applies all pending hooks at a safe point and
//! rebuilds the single global grammar used for recognition by
//! concatenating every active grammar with dense id offsets.

use super::dfa::DfaInfo;
use crate::dict::{WordEntry, WordId, WordLexicon};
use crate::error::{DecodeError, Result};
use tracing::{info, warn};

/// Pending mutation on a grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GramHook {
    /// Nothing pending.
    #[default]
    None,
    /// Remove the grammar at the next rebuild.
    Delete,
    /// Activate at the next rebuild.
    Activate,
    /// Deactivate at the next rebuild.
    Deactivate,
}

/// One registered grammar: an optional DFA plus its own dictionary.
///
/// A grammar without a DFA is a plain word list (isolated word
/// recognition).
#[derive(Debug, Clone)]
pub struct Grammar {
    /// Unique id assigned at registration.
    pub id: u32,
    /// Name for reporting.
    pub name: String,
    /// Syntax automaton; `None` for word-list grammars.
    pub dfa: Option<DfaInfo>,
    /// The grammar's own dictionary. Word entry names are category
    /// labels when a DFA is present.
    pub words: WordLexicon,
    /// Whether the grammar participates in recognition.
    pub active: bool,
    /// Pending mutation.
    pub hook: GramHook,
    /// Offsets of this grammar inside the current global grammar.
    pub cate_begin: usize,
    /// First global word id of this grammar.
    pub word_begin: WordId,
}

/// The global grammar produced by concatenating all active grammars.
#[derive(Debug, Clone, Default)]
pub struct GlobalGrammar {
    /// Combined automaton; `None` when every member is a word list.
    pub dfa: Option<DfaInfo>,
    /// Combined dictionary.
    pub words: WordLexicon,
    /// Category of each word (meaningful when `dfa` is present).
    pub word_category: Vec<usize>,
    /// Source grammar id of each word.
    pub word_grammar: Vec<u32>,
}

/// Registry of grammars with staged mutations.
#[derive(Debug, Clone, Default)]
pub struct GrammarSet {
    /// All registered grammars in registration order.
    pub grammars: Vec<Grammar>,
    next_id: u32,
    dirty: bool,
}

impl GrammarSet {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a rebuild is pending.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.dirty
            || self
                .grammars
                .iter()
                .any(|g| g.hook != GramHook::None)
    }

    /// Register a new grammar (active by default). Takes effect at the
    /// next `exec`.
    pub fn add(&mut self, name: &str, dfa: Option<DfaInfo>, words: WordLexicon) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.grammars.push(Grammar {
            id,
            name: name.to_owned(),
            dfa,
            words,
            active: true,
            hook: GramHook::None,
            cate_begin: 0,
            word_begin: 0,
        });
        self.dirty = true;
        info!("grammar #{id} \"{name}\" registered");
        id
    }

    /// Mark a grammar for deletion.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an unknown id.
    pub fn delete(&mut self, id: u32) -> Result<()> {
        let g = self.find_mut(id)?;
        g.hook = GramHook::Delete;
        Ok(())
    }

    /// Mark a grammar for activation.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an unknown id.
    pub fn activate(&mut self, id: u32) -> Result<()> {
        let g = self.find_mut(id)?;
        if g.active && g.hook == GramHook::None {
            warn!("grammar #{id} is already active");
            return Ok(());
        }
        g.hook = GramHook::Activate;
        Ok(())
    }

    /// Mark a grammar for deactivation.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for an unknown id.
    pub fn deactivate(&mut self, id: u32) -> Result<()> {
        let g = self.find_mut(id)?;
        if !g.active && g.hook == GramHook::None {
            warn!("grammar #{id} is already inactive");
            return Ok(());
        }
        g.hook = GramHook::Deactivate;
        Ok(())
    }

    fn find_mut(&mut self, id: u32) -> Result<&mut Grammar> {
        self.grammars
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| DecodeError::Config(format!("no grammar with id {id}")))
    }

    /// Apply all pending hooks and rebuild the global grammar.
    ///
    /// Returns `Some` with the new global grammar when anything changed,
    /// `None` when no rebuild was needed. An empty global grammar (no
    /// active member) is returned as `Some(empty)` so the caller can
    /// pause recognition.
    pub fn exec(&mut self) -> Option<GlobalGrammar> {
        if !self.needs_rebuild() {
            return None;
        }

        self.grammars.retain(|g| {
            if g.hook == GramHook::Delete {
                info!("grammar #{} \"{}\" deleted", g.id, g.name);
                false
            } else {
                true
            }
        });
        for g in &mut self.grammars {
            match g.hook {
                GramHook::Activate => g.active = true,
                GramHook::Deactivate => g.active = false,
                GramHook::None | GramHook::Delete => {}
            }
            g.hook = GramHook::None;
        }
        self.dirty = false;

        Some(self.build_global())
    }

    /// Concatenate all active grammars into one global grammar.
    fn build_global(&mut self) -> GlobalGrammar {
        let mut global = GlobalGrammar::default();
        let mut have_dfa = false;
        for g in &self.grammars {
            if g.active && g.dfa.is_some() {
                have_dfa = true;
            }
        }
        if have_dfa {
            global.dfa = Some(DfaInfo::new(0, 0));
        }

        for g in &mut self.grammars {
            if !g.active {
                continue;
            }
            g.cate_begin = global.dfa.as_ref().map_or(0, |d| d.term_num);
            g.word_begin = global.words.len() as WordId;

            for entry in &g.words.words {
                let category = g.cate_begin
                    + g.dfa
                        .as_ref()
                        .map_or(0, |_| local_category(&g.words, entry));
                global.word_category.push(category);
                global.word_grammar.push(g.id);
                global.words.push(WordEntry {
                    name: entry.name.clone(),
                    output: entry.output.clone(),
                    base_phones: entry.base_phones.clone(),
                    phones: entry.phones.clone(),
                    transparent: entry.transparent,
                    cprob: entry.cprob,
                });
            }

            if let (Some(gdfa), Some(dfa)) = (&mut global.dfa, &g.dfa) {
                gdfa.append(dfa, g.cate_begin, g.word_begin);
            }
        }

        info!(
            "global grammar rebuilt: {} words, {} active grammar(s)",
            global.words.len(),
            self.grammars.iter().filter(|g| g.active).count()
        );
        global
    }
}

/// Local category index of a word entry inside its own grammar: the
/// entry name parsed as a terminal id.
fn local_category(words: &WordLexicon, entry: &WordEntry) -> usize {
    entry.name.parse().unwrap_or_else(|_| {
        // Labelled categories: index by first appearance order.
        let mut seen: Vec<&str> = Vec::new();
        for e in &words.words {
            if !seen.contains(&e.name.as_str()) {
                seen.push(&e.name);
            }
            if e.name == entry.name {
                break;
            }
        }
        seen.len() - 1
    })
}
