//! Error types for the decoder.

/// Top-level error type for the recognition engine.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Configuration error (unknown option, conflicting LM types, missing file).
    #[error("config error: {0}")]
    Config(String),

    /// Model load error (malformed binary header, unresolvable phones,
    /// mismatched feature kind).
    #[error("model error: {0}")]
    Model(String),

    /// Audio source or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Resource exhaustion (token arena growth failure, buffer overflow).
    #[error("resource error: {0}")]
    Resource(String),

    /// Search-level failure that cannot be expressed as a per-utterance
    /// status code.
    #[error("search error: {0}")]
    Search(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Per-utterance recognition status.
///
/// `Success` means at least one sentence candidate was found. The negative
/// codes mirror the engine's status reporting: the utterance is skipped and
/// recognition continues with the next input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum UtteranceStatus {
    /// At least one sentence hypothesis was found.
    Success,
    /// Search failed: the beam emptied or no sentence survived Pass 2.
    SearchFailed,
    /// Input was shorter than the front-end latency or the reject threshold.
    TooShort,
    /// Input was rejected by the GMM verifier.
    GmmRejected,
}

impl UtteranceStatus {
    /// Numeric code as reported by the engine (0, -1, -2, -3).
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            UtteranceStatus::Success => 0,
            UtteranceStatus::SearchFailed => -1,
            UtteranceStatus::TooShort => -2,
            UtteranceStatus::GmmRejected => -3,
        }
    }
}
