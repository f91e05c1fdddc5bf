//! Recognition result types.

use crate::align::Alignment;
use crate::am::LogProb;
use crate::dict::WordId;
use crate::error::UtteranceStatus;
use crate::wordgraph::WordGraph;

/// One sentence hypothesis.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Sentence {
    /// Word ids in time order.
    pub words: Vec<WordId>,
    /// Output strings of the words, in time order.
    pub outputs: Vec<String>,
    /// Combined AM + LM score.
    pub score: LogProb,
    /// Acoustic part of the score.
    pub score_am: LogProb,
    /// Language part of the score (weighted).
    pub score_lm: LogProb,
    /// Per-word confidence scores (empty when disabled).
    pub confidence: Vec<f32>,
    /// Grammar the sentence belongs to (DFA mode).
    pub gram_id: Option<u32>,
    /// Forced alignment, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Alignment>,
}

/// First-pass summary kept alongside the final result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Pass1Summary {
    /// Best word sequence of the first pass.
    pub words: Vec<WordId>,
    /// Its accumulated score.
    pub score: LogProb,
}

/// Complete result of one recognition segment.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UtteranceResult {
    /// Outcome status.
    pub status: UtteranceStatus,
    /// Number of feature frames recognised.
    pub num_frames: usize,
    /// Length of the recognised part in milliseconds.
    pub length_msec: u32,
    /// Sentence hypotheses, best first.
    pub sentences: Vec<Sentence>,
    /// First-pass result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass1: Option<Pass1Summary>,
    /// Word graph accumulated during the second pass, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<WordGraph>,
}

impl UtteranceResult {
    /// A rejection result carrying only a status code.
    #[must_use]
    pub fn rejected(status: UtteranceStatus, num_frames: usize, length_msec: u32) -> Self {
        Self {
            status,
            num_frames,
            length_msec,
            sentences: Vec::new(),
            pass1: None,
            graph: None,
        }
    }
}
