//! Shared fixtures: tiny synthetic acoustic models over a 1-dimensional
//! feature space, where each phone is a single-Gaussian single-state
//! HMM peaking at a chosen feature value.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ardea::am::{AcousticModel, Density, HmmState, LOG_ZERO, Mixture, PhysicalHmm, Transition};
use ardea::config::DecoderConfig;
use ardea::dict::WordLexicon;
use ardea::engine::Recog;
use ardea::events::RecordingSink;
use ardea::htkparam::FeatureSeq;
use ardea::lm::ngram::{NgramLm, NgramModel};
use ardea::model::Model;

/// Build a monophone acoustic model over 1-dimensional features.
pub fn mono_am(phones: &[(&str, f32)]) -> AcousticModel {
    let mut am = AcousticModel::new(1);
    for &(name, mean) in phones {
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
            name: name.to_owned(),
            states: vec![s],
            trans: t,
        })
        .unwrap();
    }
    am
}

/// A feature sequence built from (value, frame count) spans.
pub fn feats(spans: &[(f32, usize)]) -> FeatureSeq {
    let mut seq = FeatureSeq::new(1);
    for &(v, n) in spans {
        for _ in 0..n {
            seq.frames.push(vec![v]);
        }
    }
    seq
}

/// A configuration suitable for the tiny fixtures: unit LM weight, no
/// insertion penalties, single-sentence output.
pub fn tiny_config() -> DecoderConfig {
    let mut config = DecoderConfig::default();
    config.lm.lm_weight = 1.0;
    config.lm.lm_penalty = 0.0;
    config.lm.lm_weight2 = 1.0;
    config.lm.lm_penalty2 = 0.0;
    config.search.pass2.nbest = 2;
    config.output.hypo_maxnum = 2;
    config
}

/// Assemble an N-gram engine over the given phones and dictionary text
/// with a uniform unigram language model.
pub fn ngram_engine(
    phones: &[(&str, f32)],
    dict_text: &str,
    configure: impl FnOnce(&mut DecoderConfig),
) -> Recog<RecordingSink> {
    let am = mono_am(phones);
    let dict = WordLexicon::load_str(dict_text, Some(&am)).unwrap();
    let nwords = dict.len();
    let lm = NgramLm::from_forward(NgramModel::uniform(nwords));
    let mut config = tiny_config();
    configure(&mut config);
    let model = Model::ngram(
        am,
        dict,
        lm,
        &config.lm.head_silname,
        &config.lm.tail_silname,
        &config.am.spmodel_name,
    )
    .unwrap();
    Recog::new(model, config, RecordingSink::default()).unwrap()
}
