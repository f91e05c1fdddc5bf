//! ardea: a large-vocabulary continuous speech recognition engine.
//!
//! A two-pass decoder over a stream of acoustic feature vectors:
//! audio arrives sample by sample, MFCC features are extracted on the
//! fly, and recognition starts before the utterance ends.
//!
//! # Architecture
//!
//! - **Front end**: windowing, MFCC, delta/acceleration, MAP-CMN
//!   (`mfcc`, `cmn`)
//! - **Pass 1**: frame-synchronous Viterbi beam search over a
//!   tree-structured lexicon with LM factoring (`lexicon`, `pass1`),
//!   producing a word trellis (`trellis`)
//! - **Pass 2**: reverse A-star stack decoding over the trellis with
//!   full LM context and exact cross-word triphones (`pass2`)
//! - **Short-pause segmentation** splits long inputs at silences and
//!   restarts the search mid-utterance (`segment`)
//! - **Verification**: parallel GMM scoring accepts or rejects whole
//!   utterances (`gmm`)
//!
//! The [`engine::Recog`] aggregate owns everything; the caller feeds
//! PCM (or pre-computed feature files) and receives events and
//! per-segment results through an [`events::EventSink`].

pub mod adin;
pub mod align;
pub mod am;
pub mod cmn;
pub mod config;
pub mod dict;
pub mod engine;
pub mod error;
pub mod events;
pub mod gauss;
pub mod gmm;
pub mod htkparam;
pub mod lexicon;
pub mod lm;
pub mod mfcc;
pub mod model;
pub mod pass1;
pub mod pass2;
pub mod result;
pub mod segment;
pub mod trellis;
pub mod wordgraph;

pub use config::DecoderConfig;
pub use engine::{FeedOutcome, Recog, SimpleRecog};
pub use error::{DecodeError, Result, UtteranceStatus};
pub use events::{Event, EventSink, NullSink, RecordingSink};
pub use model::Model;
pub use result::{Sentence, UtteranceResult};
