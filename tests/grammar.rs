//! Grammar registration, activation and recognition under DFA
//! constraints.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use ardea::dict::WordLexicon;
use ardea::engine::Recog;
use ardea::error::UtteranceStatus;
use ardea::events::NullSink;
use ardea::lm::dfa::DfaInfo;
use ardea::model::Model;
use common::{feats, mono_am, tiny_config};

/// A single-word grammar: one category, one word.
fn one_word_grammar(am: &ardea::am::AcousticModel, phone: &str) -> (DfaInfo, WordLexicon) {
    let mut dfa = DfaInfo::new(2, 1);
    dfa.add_arc(0, 0, 1);
    dfa.accept[1] = true;
    dfa.add_term_word(0, 0);
    dfa.extract_cpair();
    let words = WordLexicon::load_str(&format!("0 [{phone}] {phone}\n"), Some(am)).unwrap();
    (dfa, words)
}

fn grammar_engine() -> (Recog<NullSink>, u32, u32) {
    let am = mono_am(&[("y", 0.0), ("n", 5.0)]);
    let mut model = Model::grammar(am);
    let (da, wa) = one_word_grammar(&model.am, "y");
    let ga = model.add_grammar("yes", Some(da), wa);
    let (db, wb) = one_word_grammar(&model.am, "n");
    let gb = model.add_grammar("no", Some(db), wb);

    let mut config = tiny_config();
    config.lm.penalty1 = 0.0;
    config.lm.penalty2 = 0.0;
    let engine = Recog::new(model, config, NullSink).unwrap();
    (engine, ga, gb)
}

#[test]
fn recognizes_word_from_active_grammar() {
    let (mut engine, _, _) = grammar_engine();
    let results = engine.run_on_features(&feats(&[(0.0, 8)])).unwrap();
    assert_eq!(results[0].status, UtteranceStatus::Success);
    let top = &results[0].sentences[0];
    assert_eq!(top.outputs, vec!["y"]);
    // The sentence reports its source grammar.
    assert_eq!(top.gram_id, Some(0));
}

#[test]
fn deactivated_grammar_is_excluded() {
    let (mut engine, ga, gb) = grammar_engine();
    engine.model.grammars.deactivate(ga).unwrap();
    engine.commit_grammars().unwrap();

    // Input matching YES must now come back as NO or fail.
    let results = engine.run_on_features(&feats(&[(0.0, 8)])).unwrap();
    match results[0].status {
        UtteranceStatus::Success => {
            let top = &results[0].sentences[0];
            assert_eq!(top.outputs, vec!["n"], "only grammar B words remain");
            assert_eq!(top.gram_id, Some(gb));
        }
        UtteranceStatus::SearchFailed => {}
        other => panic!("unexpected status {other:?}"),
    }
}

#[test]
fn reactivation_restores_recognition() {
    let (mut engine, ga, _) = grammar_engine();
    engine.model.grammars.deactivate(ga).unwrap();
    engine.commit_grammars().unwrap();
    engine.model.grammars.activate(ga).unwrap();
    engine.commit_grammars().unwrap();

    let results = engine.run_on_features(&feats(&[(0.0, 8)])).unwrap();
    assert_eq!(results[0].status, UtteranceStatus::Success);
    assert_eq!(results[0].sentences[0].outputs, vec!["y"]);
}

#[test]
fn global_wordset_is_union_of_active() {
    let (mut engine, ga, gb) = grammar_engine();
    assert_eq!(engine.model.active_words().len(), 2);

    engine.model.grammars.deactivate(gb).unwrap();
    engine.commit_grammars().unwrap();
    assert_eq!(engine.model.active_words().len(), 1);

    // Word ids are tagged with their source grammar, disjointly.
    engine.model.grammars.activate(gb).unwrap();
    engine.commit_grammars().unwrap();
    let global = engine.model.global.as_ref().unwrap();
    assert_eq!(global.word_grammar, vec![ga, gb]);
    assert_eq!(global.word_category, vec![0, 1]);
}

#[test]
fn deleting_all_grammars_disables_recognition() {
    let (mut engine, ga, gb) = grammar_engine();
    engine.model.grammars.delete(ga).unwrap();
    engine.model.grammars.delete(gb).unwrap();
    engine.commit_grammars().unwrap();
    assert!(!engine.model.is_usable());
    assert!(engine.run_on_features(&feats(&[(0.0, 8)])).is_err());
}

#[test]
fn word_list_mode_single_word() {
    let am = mono_am(&[("y", 0.0), ("n", 5.0)]);
    let mut model = Model::word_list(am);
    let words =
        WordLexicon::load_str("YES [yes] y\nNO [no] n\n", Some(&model.am)).unwrap();
    model.add_grammar("words", None, words);
    let config = tiny_config();
    let mut engine = Recog::new(model, config, NullSink).unwrap();

    let results = engine.run_on_features(&feats(&[(5.0, 8)])).unwrap();
    assert_eq!(results[0].status, UtteranceStatus::Success);
    assert_eq!(results[0].sentences[0].outputs, vec!["no"]);
}
