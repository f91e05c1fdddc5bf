//! Engine events delivered to the embedding application.
//!
//! The engine reports progress through a single [`EventSink`] supplied at
//! construction time. Events are plain data; the sink decides what to do
//! with them (print, forward over a socket, ignore).

use crate::error::UtteranceStatus;
use crate::result::UtteranceResult;

/// An event emitted by the engine while processing a stream.
#[derive(Debug, Clone)]
pub enum Event {
    /// The engine is ready and listening for a trigger.
    SpeechReady,
    /// Input level crossed the trigger threshold; an utterance begins.
    SpeechStart,
    /// Input went back below the threshold; the utterance ended.
    SpeechEnd,
    /// A recognition segment begins (the whole utterance, or one
    /// short-pause segment of it).
    SegmentBegin,
    /// A recognition segment ended.
    SegmentEnd,
    /// Number of feature frames that entered the search.
    FrameCount(usize),
    /// Running best word sequence on the first pass (progressive output).
    Pass1Progress {
        /// Frame the report was taken at.
        frame: usize,
        /// Best word sequence so far, in time order.
        words: Vec<u32>,
    },
    /// First pass finished with this best score.
    Pass1End {
        /// Viterbi score of the best trellis path.
        score: f32,
    },
    /// Final result for a segment.
    Result(Box<UtteranceResult>),
    /// Per-utterance status when no result could be produced.
    Rejected(UtteranceStatus),
    /// GMM verification outcome.
    GmmResult {
        /// Name of the best scoring GMM.
        name: String,
        /// Posterior-style confidence of the decision.
        confidence: f32,
    },
}

/// Receiver capability for engine events.
pub trait EventSink {
    /// Deliver one event. Implementations should return quickly; the
    /// engine calls this from its processing loop.
    fn event(&mut self, event: Event);
}

/// Sink that discards all events.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn event(&mut self, _event: Event) {}
}

/// Sink that records events for inspection, mainly for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// All events received so far, in order.
    pub events: Vec<Event>,
}

impl EventSink for RecordingSink {
    fn event(&mut self, event: Event) {
        self.events.push(event);
    }
}
