//! Word dictionary.
//!
//! HTK-style entries, one word per line:
//!
//! ```text
//! GRAMMAR_ENTRY [OUTPUT] phone1 phone2 ...
//! GRAMMAR_ENTRY {OUTPUT} phone1 phone2 ...     (transparent word)
//! GRAMMAR_ENTRY @-1.5 [OUTPUT] phone1 ...      (in-class log probability)
//! ```
//!
//! With a triphone acoustic model the monophone pronunciation is converted
//! to word-internal triphones here, and every phone must resolve to a
//! logical model (or a pseudo phone); unresolvable names are collected and
//! reported in bulk.

use crate::am::{AcousticModel, LogProb, compose_triphone};
use crate::error::{DecodeError, Result};
use std::collections::HashMap;
use tracing::info;

/// Dense word identifier.
pub type WordId = u32;

/// Sentinel for "no word".
pub const WORD_INVALID: WordId = u32::MAX;

/// One dictionary entry.
#[derive(Debug, Clone)]
pub struct WordEntry {
    /// Grammar entry: N-gram word name or DFA category name.
    pub name: String,
    /// Output string reported on recognition.
    pub output: String,
    /// Original (context-independent) phone names.
    pub base_phones: Vec<String>,
    /// Logical model ids after word-internal context conversion.
    pub phones: Vec<usize>,
    /// Transparent words do not update the LM context.
    pub transparent: bool,
    /// In-class log probability (0.0 = class equals word).
    pub cprob: LogProb,
}

/// The word dictionary.
#[derive(Debug, Clone, Default)]
pub struct WordLexicon {
    /// All entries, indexed by [`WordId`].
    pub words: Vec<WordEntry>,
    name_index: HashMap<String, Vec<WordId>>,
}

impl WordLexicon {
    /// Create an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when the dictionary holds no words.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Append an entry and return its id.
    pub fn push(&mut self, entry: WordEntry) -> WordId {
        let id = self.words.len() as WordId;
        self.name_index
            .entry(entry.name.clone())
            .or_default()
            .push(id);
        self.words.push(entry);
        id
    }

    /// All word ids registered under a grammar entry name.
    #[must_use]
    pub fn ids_by_name(&self, name: &str) -> &[WordId] {
        self.name_index.get(name).map_or(&[], Vec::as_slice)
    }

    /// First word id registered under a name, if any.
    #[must_use]
    pub fn id_by_name(&self, name: &str) -> Option<WordId> {
        self.ids_by_name(name).first().copied()
    }

    /// Parse a whole dictionary text.
    ///
    /// With an acoustic model, phones are resolved (and converted to
    /// word-internal triphones when the model is context-dependent).
    /// Unresolvable phones are collected across all lines and reported
    /// as one error.
    ///
    /// # Errors
    ///
    /// Returns a `Model` error naming every missing phone.
    pub fn load_str(text: &str, am: Option<&AcousticModel>) -> Result<Self> {
        let mut lexicon = Self::new();
        let mut missing: Vec<String> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "DICEND" {
                break;
            }
            let entry = parse_line(line, am, &mut missing).map_err(|e| {
                DecodeError::Model(format!("dictionary line {}: {e}", lineno + 1))
            })?;
            lexicon.push(entry);
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(DecodeError::Model(format!(
                "{} phone(s) not found in the acoustic model: {}",
                missing.len(),
                missing.join(", ")
            )));
        }
        info!("dictionary loaded: {} words", lexicon.len());
        Ok(lexicon)
    }

    /// Load a dictionary file. See [`Self::load_str`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or unresolvable phones.
    pub fn load(path: &std::path::Path, am: Option<&AcousticModel>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::load_str(&text, am)
    }
}

/// Parse one dictionary line.
fn parse_line(
    line: &str,
    am: Option<&AcousticModel>,
    missing: &mut Vec<String>,
) -> std::result::Result<WordEntry, String> {
    let mut rest = line;

    let name = take_token(&mut rest).ok_or("empty entry")?.to_owned();

    // Optional in-class probability: "@<logprob>".
    let mut cprob: LogProb = 0.0;
    let peek = rest.trim_start();
    if let Some(stripped) = peek.strip_prefix('@') {
        let tok_end = stripped
            .find(char::is_whitespace)
            .unwrap_or(stripped.len());
        let value = &stripped[..tok_end];
        if value.is_empty() {
            return Err("value after '@' missing".into());
        }
        cprob = value
            .parse()
            .map_err(|_| format!("bad in-class probability: @{value}"))?;
        rest = &stripped[tok_end..];
    }

    // Optional output string: "[...]" plain, "{...}" transparent.
    let peek = rest.trim_start();
    let (output, transparent) = if peek.starts_with('[') {
        (take_bracketed(&mut rest, '[', ']')?, false)
    } else if peek.starts_with('{') {
        (take_bracketed(&mut rest, '{', '}')?, true)
    } else {
        (name.clone(), false)
    };

    let base_phones: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
    if base_phones.is_empty() {
        return Err(format!("word {name} has no phonemes"));
    }

    let phones = match am {
        None => Vec::new(),
        Some(am) => resolve_word_internal(am, &base_phones, missing),
    };

    Ok(WordEntry {
        name,
        output,
        base_phones,
        phones,
        transparent,
        cprob,
    })
}

/// Resolve a monophone pronunciation against the model, converting to
/// word-internal triphones when the model is context-dependent.
fn resolve_word_internal(
    am: &AcousticModel,
    base_phones: &[String],
    missing: &mut Vec<String>,
) -> Vec<usize> {
    let n = base_phones.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let name = if am.is_triphone {
            let left = (i > 0).then(|| base_phones[i - 1].as_str());
            let right = (i + 1 < n).then(|| base_phones[i + 1].as_str());
            compose_triphone(left, &base_phones[i], right)
        } else {
            base_phones[i].clone()
        };
        match lookup_with_fallback(am, &name, &base_phones[i]) {
            Some(id) => out.push(id),
            None => missing.push(name),
        }
    }
    out
}

/// Look up a logical name, falling back to the context-independent base.
pub(crate) fn lookup_with_fallback(
    am: &AcousticModel,
    name: &str,
    base: &str,
) -> Option<usize> {
    am.logical_id(name).or_else(|| am.logical_id(base))
}

fn take_token<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        *rest = trimmed;
        return None;
    }
    let end = trimmed
        .find(char::is_whitespace)
        .unwrap_or(trimmed.len());
    let (token, tail) = trimmed.split_at(end);
    *rest = tail;
    Some(token)
}

fn take_bracketed(
    rest: &mut &str,
    open: char,
    close: char,
) -> std::result::Result<String, String> {
    let trimmed = rest.trim_start();
    debug_assert!(trimmed.starts_with(open));
    let inner = &trimmed[open.len_utf8()..];
    let end = inner
        .find(close)
        .ok_or_else(|| format!("unterminated {open}...{close}"))?;
    let token = inner[..end].to_owned();
    *rest = &inner[end + close.len_utf8()..];
    Ok(token)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::am::{Density, HmmState, LOG_ZERO, Mixture, PhysicalHmm, Transition};

    fn monophone_am(names: &[&str]) -> AcousticModel {
        let mut am = AcousticModel::new(1);
        for (i, name) in names.iter().enumerate() {
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

    #[test]
    fn parses_plain_entry() {
        let am = monophone_am(&["h", "eh", "l", "ow"]);
        let lexicon = WordLexicon::load_str("HELLO [hello] h eh l ow\n", Some(&am)).unwrap();
        assert_eq!(lexicon.len(), 1);
        let w = &lexicon.words[0];
        assert_eq!(w.name, "HELLO");
        assert_eq!(w.output, "hello");
        assert_eq!(w.base_phones, vec!["h", "eh", "l", "ow"]);
        assert_eq!(w.phones.len(), 4);
        assert!(!w.transparent);
    }

    #[test]
    fn transparent_and_cprob() {
        let am = monophone_am(&["sp"]);
        let lexicon =
            WordLexicon::load_str("<sp> @-1.2 {pause} sp\n", Some(&am)).unwrap();
        let w = &lexicon.words[0];
        assert!(w.transparent);
        assert_eq!(w.output, "pause");
        assert!((w.cprob + 1.2).abs() < 1e-6);
    }

    #[test]
    fn output_defaults_to_entry_name() {
        let am = monophone_am(&["n", "ow"]);
        let lexicon = WordLexicon::load_str("NO n ow\n", Some(&am)).unwrap();
        assert_eq!(lexicon.words[0].output, "NO");
    }

    #[test]
    fn missing_phones_reported_in_bulk() {
        let am = monophone_am(&["a"]);
        let err = WordLexicon::load_str("W1 a b\nW2 c a\n", Some(&am)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains('b'), "missing b in: {msg}");
        assert!(msg.contains('c'), "missing c in: {msg}");
        assert!(msg.contains("2 phone"), "count in: {msg}");
    }

    #[test]
    fn triphone_conversion_uses_word_internal_context() {
        let mut am = monophone_am(&[]);
        for name in ["a-b+c", "b+c", "a-b", "a", "b", "c", "a+b", "b-c"] {
            let d = am.add_density(Density::from_variance(vec![0.0], &[1.0]));
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
                name: name.to_owned(),
                states: vec![s],
                trans: t,
            })
            .unwrap();
        }
        assert!(am.is_triphone);
        let lexicon = WordLexicon::load_str("ABC a b c\n", Some(&am)).unwrap();
        let w = &lexicon.words[0];
        // First phone "a+b", middle "a-b+c", last "b-c".
        assert_eq!(am.logical[w.phones[0]].name, "a+b");
        assert_eq!(am.logical[w.phones[1]].name, "a-b+c");
        assert_eq!(am.logical[w.phones[2]].name, "b-c");
    }

    #[test]
    fn homophones_share_name_index() {
        let am = monophone_am(&["a", "b"]);
        let lexicon = WordLexicon::load_str("W a\nW b\n", Some(&am)).unwrap();
        assert_eq!(lexicon.ids_by_name("W"), &[0, 1]);
        assert_eq!(lexicon.id_by_name("W"), Some(0));
    }
}
