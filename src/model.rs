//! Model aggregate: acoustic model, dictionary, language model and the
//! lexicon trees built from them.
//!
//! Grammar mutations are staged in the grammar set and committed here at
//! safe points; committing rebuilds the global grammar and the lexicon
//! and re-seeds the default beam width. A grammar whose lexicon cannot
//! be built is rolled back by marking it for deletion.

use crate::am::AcousticModel;
use crate::dict::{WordId, WordLexicon};
use crate::error::{DecodeError, Result};
use crate::lexicon::Lexicon;
use crate::lm::multigram::{GlobalGrammar, GrammarSet};
use crate::lm::ngram::NgramLm;
use crate::lm::{DfaInfo, LmKind};
use crate::pass1::Pass1Lm;
use crate::pass2::Pass2Lm;
use tracing::{info, warn};

/// Everything the decoder reads during a segment.
pub struct Model {
    /// Acoustic model.
    pub am: AcousticModel,
    /// LM kind driving the search.
    pub lm_kind: LmKind,
    /// N-gram model (N-gram mode).
    pub ngram: Option<NgramLm>,
    /// Dictionary (N-gram mode; grammar modes use the global grammar).
    pub dict: WordLexicon,
    /// Grammar registry (grammar and word-list modes).
    pub grammars: GrammarSet,
    /// Concatenated global grammar.
    pub global: Option<GlobalGrammar>,
    /// The lexicon tree(s) currently in use.
    pub lexicon: Option<Lexicon>,
    /// Words pronounced as the short-pause model alone.
    pub sp_words: Vec<WordId>,
    /// Head silence word (N-gram).
    pub head_silword: Option<WordId>,
    /// Tail silence word (N-gram).
    pub tail_silword: Option<WordId>,
}

impl Model {
    /// Build an N-gram model set. The lexicon is built immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the lexicon cannot be built or the special
    /// silence words are missing.
    pub fn ngram(
        am: AcousticModel,
        dict: WordLexicon,
        ngram: NgramLm,
        head_silname: &str,
        tail_silname: &str,
        spmodel_name: &str,
    ) -> Result<Self> {
        let head_silword = dict.id_by_name(head_silname);
        let tail_silword = dict.id_by_name(tail_silname);
        if head_silword.is_none() {
            warn!("head silence word \"{head_silname}\" not in dictionary");
        }
        let lexicon = Lexicon::build_ngram(&am, &dict, &ngram.forward)?;
        let sp_words = find_sp_words(&am, &dict, spmodel_name);
        Ok(Self {
            am,
            lm_kind: LmKind::Ngram,
            ngram: Some(ngram),
            dict,
            grammars: GrammarSet::new(),
            global: None,
            lexicon: Some(lexicon),
            sp_words,
            head_silword,
            tail_silword,
        })
    }

    /// Build an (initially empty) grammar model set.
    #[must_use]
    pub fn grammar(am: AcousticModel) -> Self {
        Self {
            am,
            lm_kind: LmKind::DfaGrammar,
            ngram: None,
            dict: WordLexicon::new(),
            grammars: GrammarSet::new(),
            global: None,
            lexicon: None,
            sp_words: Vec::new(),
            head_silword: None,
            tail_silword: None,
        }
    }

    /// Build a word-list model set for isolated word recognition.
    #[must_use]
    pub fn word_list(am: AcousticModel) -> Self {
        Self {
            lm_kind: LmKind::WordList,
            ..Self::grammar(am)
        }
    }

    /// Add the automatic inter-word short-pause word to an N-gram
    /// dictionary and rebuild the lexicon.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry cannot be parsed or the lexicon
    /// rebuild fails.
    pub fn add_iwspword(&mut self, entry_line: &str, spmodel_name: &str) -> Result<()> {
        if self.lm_kind != LmKind::Ngram {
            return Ok(());
        }
        let added = WordLexicon::load_str(entry_line, Some(&self.am))?;
        for word in added.words {
            self.dict.push(word);
        }
        let ngram = self
            .ngram
            .as_ref()
            .ok_or_else(|| DecodeError::Model("N-gram model missing".into()))?;
        self.lexicon = Some(Lexicon::build_ngram(&self.am, &self.dict, &ngram.forward)?);
        self.sp_words = find_sp_words(&self.am, &self.dict, spmodel_name);
        info!("short-pause word added to the dictionary");
        Ok(())
    }

    /// Register a grammar (takes effect at the next commit).
    pub fn add_grammar(
        &mut self,
        name: &str,
        dfa: Option<DfaInfo>,
        words: WordLexicon,
    ) -> u32 {
        self.grammars.add(name, dfa, words)
    }

    /// The dictionary active for recognition.
    #[must_use]
    pub fn active_words(&self) -> &WordLexicon {
        match self.lm_kind {
            LmKind::Ngram => &self.dict,
            LmKind::DfaGrammar | LmKind::WordList => self
                .global
                .as_ref()
                .map_or(&self.dict, |g| &g.words),
        }
    }

    /// True when recognition currently has anything to recognise.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.lexicon.as_ref().is_some_and(|l| !l.is_empty())
            && !self.active_words().is_empty()
    }

    /// Commit pending grammar mutations and rebuild the global grammar
    /// and lexicon when needed. Returns true when anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error when the rebuild fails and no rollback target
    /// can be determined.
    pub fn commit_grammars(&mut self, spmodel_name: &str) -> Result<bool> {
        if self.lm_kind == LmKind::Ngram {
            return Ok(false);
        }
        let Some(global) = self.grammars.exec() else {
            return Ok(false);
        };

        if global.words.is_empty() {
            info!("no active grammar; recognition paused until one is added");
            self.global = Some(global);
            self.lexicon = None;
            self.sp_words.clear();
            return Ok(true);
        }

        let lexicon = match &global.dfa {
            Some(dfa) => Lexicon::build_dfa(
                &self.am,
                &global.words,
                &global.word_category,
                dfa.term_num,
            ),
            None => {
                // Word-list mode: one pseudo category over all words.
                let cats = vec![0usize; global.words.len()];
                Lexicon::build_dfa(&self.am, &global.words, &cats, 1)
            }
        };
        match lexicon {
            Ok(lexicon) => {
                self.sp_words = find_sp_words(&self.am, &global.words, spmodel_name);
                self.global = Some(global);
                self.lexicon = Some(lexicon);
                Ok(true)
            }
            Err(e) => {
                // Roll back: mark the most recently added grammar for
                // deletion and rebuild without it.
                let last = self
                    .grammars
                    .grammars
                    .last()
                    .map(|g| g.id)
                    .ok_or_else(|| {
                        DecodeError::Model(format!("lexicon rebuild failed: {e}"))
                    })?;
                warn!("lexicon rebuild failed ({e}); rolling back grammar #{last}");
                self.grammars.delete(last)?;
                self.commit_grammars(spmodel_name)
            }
        }
    }

    /// First pass LM view.
    ///
    /// # Panics
    ///
    /// Panics when called on an inconsistent model (e.g. N-gram mode
    /// without an N-gram), which cannot be constructed via the public
    /// constructors.
    #[must_use]
    pub fn pass1_lm(&self) -> Pass1Lm<'_> {
        match self.lm_kind {
            LmKind::Ngram => Pass1Lm::Ngram(self.ngram.as_ref().expect("ngram model")),
            LmKind::DfaGrammar => {
                let global = self.global.as_ref().expect("global grammar");
                Pass1Lm::Dfa {
                    dfa: global.dfa.as_ref().expect("global dfa"),
                    word_category: &global.word_category,
                }
            }
            LmKind::WordList => Pass1Lm::WordList,
        }
    }

    /// Second pass LM view.
    ///
    /// # Panics
    ///
    /// Panics when called on an inconsistent model; see [`Self::pass1_lm`].
    #[must_use]
    pub fn pass2_lm(&self) -> Pass2Lm<'_> {
        match self.lm_kind {
            LmKind::Ngram => Pass2Lm::Ngram(self.ngram.as_ref().expect("ngram model")),
            LmKind::DfaGrammar => {
                let global = self.global.as_ref().expect("global grammar");
                Pass2Lm::Dfa {
                    dfa: global.dfa.as_ref().expect("global dfa"),
                    word_category: &global.word_category,
                }
            }
            LmKind::WordList => Pass2Lm::WordList,
        }
    }
}

/// Words whose pronunciation is exactly the short-pause model.
fn find_sp_words(am: &AcousticModel, words: &WordLexicon, spmodel_name: &str) -> Vec<WordId> {
    let mut out = Vec::new();
    for (wid, entry) in words.words.iter().enumerate() {
        let is_sp = entry.base_phones.len() == 1
            && (entry.base_phones[0] == spmodel_name
                || entry
                    .phones
                    .first()
                    .is_some_and(|&p| am.logical[p].name == spmodel_name));
        if is_sp {
            out.push(wid as WordId);
        }
    }
    out
}
