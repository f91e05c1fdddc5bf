//! The recognition engine aggregate.
//!
//! `Recog` owns the models, the front end and both search passes, and
//! exposes an explicit state machine to the caller: `feed` PCM fragments
//! (or whole feature sequences) and collect per-segment results. The
//! caller owns scheduling; the engine never blocks on audio itself
//! except inside the convenience stream drivers.

use crate::adin::cut::{AdinCutter, CutEvent};
use crate::adin::{AudioSource, ReadOutcome};
use crate::align::{AlignUnit, ConcatHmm, ConcatOptions};
use crate::am::LOG_ZERO;
use crate::config::DecoderConfig;
use crate::dict::{WordEntry, WordId};
use crate::error::{DecodeError, Result, UtteranceStatus};
use crate::events::{Event, EventSink};
use crate::gauss::GaussianScorer;
use crate::gmm::GmmVerifier;
use crate::htkparam::FeatureSeq;
use crate::mfcc::pipeline::FeaturePipeline;
use crate::model::Model;
use crate::pass1::{BeamSearch, Pass1Params, Pass1Resources};
use crate::pass2::{FoundSentence, Pass2Params, Pass2Resources, StackDecoder};
use crate::result::{Pass1Summary, Sentence, UtteranceResult};
use crate::segment::SpSegmenter;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Outcome of feeding input into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Keep feeding; the current segment continues.
    NeedsMore,
    /// A short-pause segment boundary was detected; finalise and resume.
    Segmented,
    /// The search cannot continue (beam died or termination requested);
    /// close the utterance.
    Done,
}

/// The recognition engine.
pub struct Recog<S: EventSink> {
    /// Engine configuration.
    pub config: DecoderConfig,
    /// Models in use.
    pub model: Model,
    sink: S,
    pipeline: FeaturePipeline,
    scorer: GaussianScorer,
    search: BeamSearch,
    segmenter: SpSegmenter,
    gmm: Option<GmmVerifier>,
    /// Feature frames of the current segment.
    frames: Vec<Vec<f32>>,
    /// Frames computed by the front end but not yet searched.
    pending: VecDeque<Vec<f32>>,
    /// Frames past a segmentation boundary, replayed into the next
    /// segment.
    rest_features: Vec<Vec<f32>>,
    /// PCM buffered for the batched (non-realtime) first pass.
    batch: Vec<i16>,
    /// True when the current segment continues a segmented utterance.
    processing_segment: bool,
    /// False while decoding a pre-computed feature file.
    pipeline_input: bool,
    want_terminate: bool,
    want_pause: bool,
}

impl<S: EventSink> Recog<S> {
    /// Assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns a `Model` error when the feature dimension does not match
    /// the acoustic model, or a `Config` error for inconsistent setup.
    pub fn new(mut model: Model, config: DecoderConfig, sink: S) -> Result<Self> {
        model.commit_grammars(&config.am.spmodel_name)?;
        if config.lm.enable_iwspword {
            model.add_iwspword(&config.lm.iwspentry, &config.am.spmodel_name)?;
        }

        let mut pipeline = FeaturePipeline::new(&config.analysis, &config.frontend);
        if let Some(path) = &config.frontend.cmn_load {
            pipeline.cmn_mut().load(path)?;
        }

        let scorer = GaussianScorer::new(&model.am, config.am.gprune, config.am.mixnum_thres);
        let segmenter = SpSegmenter::new(
            config.search.sp_frame_duration,
            model.sp_words.clone(),
        );

        let mut engine = Self {
            search: BeamSearch::new(Pass1Params::from_config(&config), 0, 1),
            config,
            model,
            sink,
            pipeline,
            scorer,
            segmenter,
            gmm: None,
            frames: Vec::new(),
            pending: VecDeque::new(),
            rest_features: Vec::new(),
            batch: Vec::new(),
            processing_segment: false,
            pipeline_input: true,
            want_terminate: false,
            want_pause: false,
        };
        engine.rebuild_search();
        Ok(engine)
    }

    /// Attach a GMM verifier.
    pub fn set_gmm(&mut self, gmm: GmmVerifier) {
        self.gmm = Some(gmm);
    }

    /// Access the event sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Access the event sink mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Request immediate termination: the current input is discarded.
    pub fn request_terminate(&mut self) {
        self.want_terminate = true;
    }

    /// Request a pause after the current utterance completes.
    pub fn request_pause(&mut self) {
        self.want_pause = true;
    }

    /// Clear termination/pause requests and return to the active state.
    pub fn request_resume(&mut self) {
        self.want_terminate = false;
        self.want_pause = false;
    }

    /// Commit staged grammar mutations (idle point). Rebuilds the
    /// lexicon and re-seeds the beam width when anything changed.
    ///
    /// # Errors
    ///
    /// Propagates rebuild failures.
    pub fn commit_grammars(&mut self) -> Result<bool> {
        let spname = self.config.am.spmodel_name.clone();
        let changed = self.model.commit_grammars(&spname)?;
        if changed {
            self.segmenter =
                SpSegmenter::new(self.config.search.sp_frame_duration, self.model.sp_words.clone());
            self.rebuild_search();
        }
        Ok(changed)
    }

    fn rebuild_search(&mut self) {
        let Some(lexicon) = &self.model.lexicon else {
            return;
        };
        let width = BeamSearch::select_beam_width(
            self.config.search.pass1.beam_width,
            lexicon.len(),
            self.model.active_words().len(),
            &self.model.am,
        );
        let mut params = Pass1Params::from_config(&self.config);
        params.head_silword = self.model.head_silword;
        params.tail_silword = self.model.tail_silword;
        info!("first pass beam width: {width} nodes");
        self.search = BeamSearch::new(params, lexicon.len(), width);
    }

    /// The MFCC pipeline output must match the acoustic model exactly;
    /// checked on every PCM-driven entry point.
    fn check_pipeline_dim(&self) -> Result<()> {
        let produced = self.config.analysis.vec_dim();
        if produced != self.model.am.veclen {
            return Err(DecodeError::Model(format!(
                "feature dimension mismatch: analysis produces {produced}, \
                 acoustic model wants {}",
                self.model.am.veclen
            )));
        }
        Ok(())
    }

    /// Milliseconds per frame shift.
    fn frame_shift_ms(&self) -> f32 {
        self.config.analysis.frame_shift as f32 * 1000.0
            / self.config.analysis.sample_rate as f32
    }

    /// Start a fresh utterance (or resume after segmentation).
    fn begin_utterance(&mut self, resume: bool) {
        if !resume {
            self.pipeline.prepare();
            self.frames.clear();
            self.pending.clear();
            self.rest_features.clear();
            self.batch.clear();
            self.processing_segment = false;
            self.search.set_head_silword(self.model.head_silword);
        } else {
            self.processing_segment = true;
            // A resumed segment may start from any word.
            self.search.set_head_silword(None);
        }
        self.scorer.prepare();
        if let Some(gmm) = &mut self.gmm {
            gmm.prepare();
        }
        self.segmenter.prepare(!resume);
        let res = pass1_resources(&self.model);
        self.search.start(&res);
        self.sink.event(Event::SegmentBegin);
    }

    /// Feed a PCM fragment through the front end and the first pass.
    ///
    /// # Errors
    ///
    /// Propagates front-end failures.
    pub fn feed(&mut self, samples: &[i16]) -> Result<FeedOutcome> {
        let mut new_frames = Vec::new();
        self.pipeline.feed(samples, &mut new_frames);
        self.process_frames(new_frames)
    }

    /// Queue computed feature frames and run the first pass over them.
    /// Frames left unprocessed at a segmentation boundary stay queued
    /// for the next segment.
    fn process_frames(&mut self, new_frames: Vec<Vec<f32>>) -> Result<FeedOutcome> {
        self.pending.extend(new_frames);
        self.drain_pending()
    }

    fn drain_pending(&mut self) -> Result<FeedOutcome> {
        if self.model.lexicon.is_none() {
            self.pending.clear();
            return Ok(FeedOutcome::Done);
        }
        while let Some(vec) = self.pending.pop_front() {
            if self.want_terminate {
                self.pending.clear();
                return Ok(FeedOutcome::Done);
            }
            let t = self.search.frames();
            {
                let res = pass1_resources(&self.model);
                self.search.frame(&res, &mut self.scorer, &vec);
            }
            if let Some(gmm) = &mut self.gmm {
                gmm.frame(t, &vec);
            }
            self.frames.push(vec);

            if self.config.search.pass1.progout {
                let interval =
                    (self.config.search.pass1.progout_interval_ms as f32 / self.frame_shift_ms())
                        .max(1.0) as usize;
                if t > 0 && t % interval == 0 {
                    let words = self.search.current_best_seq();
                    self.sink.event(Event::Pass1Progress { frame: t, words });
                }
            }

            if self.config.search.sp_segment {
                let best = self.search.best_wordend().map(|(_, w)| w);
                if self.segmenter.observe(t, best) {
                    return Ok(FeedOutcome::Segmented);
                }
            }
            if !self.search.is_alive() {
                self.pending.clear();
                return Ok(FeedOutcome::Done);
            }
        }
        Ok(FeedOutcome::NeedsMore)
    }

    /// Flush the front end at the end of the utterance's PCM.
    ///
    /// # Errors
    ///
    /// Propagates front-end failures.
    pub fn end_input(&mut self) -> Result<FeedOutcome> {
        let mut tail = Vec::new();
        self.pipeline.end(&mut tail);
        self.process_frames(tail)
    }

    /// Resume the search over the frames retained past the last segment
    /// boundary.
    ///
    /// # Errors
    ///
    /// Propagates search failures.
    pub fn resume_segment(&mut self) -> Result<FeedOutcome> {
        self.begin_utterance(true);
        self.frames.clear();
        // Replay the boundary tail before anything still queued.
        let rest = std::mem::take(&mut self.rest_features);
        for frame in rest.into_iter().rev() {
            self.pending.push_front(frame);
        }
        self.drain_pending()
    }

    /// Close the current segment: run the checks and the second pass,
    /// update CMN, emit events and return the result.
    pub fn finalize_segment(&mut self, segmented: bool) -> UtteranceResult {
        let total = self.search.frames();
        let num = if segmented {
            self.segmenter.boundary().unwrap_or(total).min(total)
        } else {
            total
        };

        if segmented {
            let keep = num.min(self.frames.len());
            self.rest_features = self.frames.split_off(keep);
        } else {
            // Frames may have been buffered past a mid-utterance search
            // death; the result covers only the searched prefix.
            self.frames.truncate(num);
        }

        let pass1 = self.search.finish_at(num);
        self.sink.event(Event::FrameCount(num));
        let length_msec = (num as f32 * self.frame_shift_ms()) as u32;

        // Short input rejection.
        let latency = self.config.analysis.total_latency();
        let too_short = num == 0
            || (self.pipeline_input && num < latency)
            || (self.config.reject.reject_short_ms > 0
                && length_msec < self.config.reject.reject_short_ms);
        if too_short {
            info!("input too short ({num} frames), rejected");
            let result = UtteranceResult::rejected(UtteranceStatus::TooShort, num, length_msec);
            self.sink.event(Event::Rejected(UtteranceStatus::TooShort));
            self.sink.event(Event::SegmentEnd);
            return result;
        }

        // GMM-based rejection.
        if let Some(gmm) = &self.gmm {
            if let Some(decision) = gmm.decide() {
                self.sink.event(Event::GmmResult {
                    name: decision.name.clone(),
                    confidence: decision.confidence,
                });
                if !decision.accepted {
                    let result =
                        UtteranceResult::rejected(UtteranceStatus::GmmRejected, num, length_msec);
                    self.sink
                        .event(Event::Rejected(UtteranceStatus::GmmRejected));
                    self.sink.event(Event::SegmentEnd);
                    return result;
                }
            }
        }

        self.sink.event(Event::Pass1End { score: pass1.score });

        if pass1.score <= LOG_ZERO || pass1.final_atom.is_none() {
            self.update_cmn();
            let result =
                UtteranceResult::rejected(UtteranceStatus::SearchFailed, num, length_msec);
            self.sink
                .event(Event::Rejected(UtteranceStatus::SearchFailed));
            self.sink.event(Event::SegmentEnd);
            return result;
        }

        let pass1_summary = Pass1Summary {
            words: pass1.seq.clone(),
            score: pass1.score,
        };

        // Second pass (or first pass only).
        let (mut found, graph) = if self.config.search.pass2.only_1pass {
            (Vec::new(), None)
        } else {
            let mut params = Pass2Params::from_config(&self.config);
            params.head_silword = if self.processing_segment {
                None
            } else {
                self.model.head_silword
            };
            params.tail_silword = self.model.tail_silword;
            let decoder = StackDecoder::new(params);
            let res = pass2_resources(&self.model, &self.config);
            let output =
                decoder.search(&res, &self.search.trellis, &self.frames, &mut self.scorer);
            (output.sentences, output.graph)
        };

        // First-pass fallback when stack decoding found nothing.
        if found.is_empty() {
            if !self.config.search.pass2.only_1pass {
                warn!("second pass found no sentence, falling back to first pass result");
            }
            found.push(FoundSentence {
                words: pass1.seq.clone(),
                score: pass1.score,
                score_am: pass1.score,
                score_lm: 0.0,
                confidence: Vec::new(),
            });
        }
        found.truncate(self.config.output.hypo_maxnum.max(1));

        let sentences: Vec<Sentence> = found
            .into_iter()
            .map(|f| self.build_sentence(f))
            .collect();

        self.update_cmn();

        let result = UtteranceResult {
            status: UtteranceStatus::Success,
            num_frames: num,
            length_msec,
            sentences,
            pass1: Some(pass1_summary),
            graph,
        };
        self.sink.event(Event::Result(Box::new(result.clone())));
        self.sink.event(Event::SegmentEnd);
        result
    }

    /// Expand a found sentence with output strings, confidence and the
    /// optional forced alignment.
    fn build_sentence(&mut self, found: FoundSentence) -> Sentence {
        let dict = self.model.active_words();
        let outputs: Vec<String> = found
            .words
            .iter()
            .map(|&w| dict.words[w as usize].output.clone())
            .collect();
        let gram_id = self.model.global.as_ref().and_then(|g| {
            found
                .words
                .first()
                .map(|&w| g.word_grammar[w as usize])
        });

        let align_unit = if self.config.search.align_state {
            Some(AlignUnit::State)
        } else if self.config.search.align_phone {
            Some(AlignUnit::Phone)
        } else if self.config.search.align_word {
            Some(AlignUnit::Word)
        } else {
            None
        };
        let align = align_unit.and_then(|unit| {
            let pairs: Vec<(WordId, &WordEntry)> = found
                .words
                .iter()
                .map(|&w| (w, &dict.words[w as usize]))
                .collect();
            let sp = self.config.lm.enable_iwsp.then(|| {
                self.model
                    .am
                    .logical_id(&self.config.am.spmodel_name)
                    .map(|id| (id, self.config.lm.iwsp_penalty))
            }).flatten();
            let opts = ConcatOptions {
                insert_sp: sp,
                ..ConcatOptions::default()
            };
            let chmm = ConcatHmm::build(&self.model.am, &pairs, &opts).ok()?;
            chmm.align(
                &self.model.am,
                &mut self.scorer,
                &self.frames,
                unit,
                &pairs,
                self.config.am.iwcd_method,
                self.config.am.iwcd_best_n,
            )
            .ok()
        });

        Sentence {
            words: found.words,
            outputs,
            score: found.score,
            score_am: found.score_am,
            score_lm: found.score_lm,
            confidence: found.confidence,
            gram_id,
            align,
        }
    }

    fn update_cmn(&mut self) {
        if self.config.frontend.cmn && self.pipeline_input {
            if self.config.frontend.cmn_update {
                self.pipeline.cmn_mut().update();
            }
            if let Some(path) = self.config.frontend.cmn_save.clone() {
                if let Err(e) = self.pipeline.cmn_mut().save(&path) {
                    warn!("cannot save CMN parameter: {e}");
                }
            }
        }
    }

    /// Recognise one utterance given directly as PCM (no trigger
    /// detection).
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn run_on_samples(&mut self, samples: &[i16]) -> Result<Vec<UtteranceResult>> {
        if !self.model.is_usable() {
            return Err(DecodeError::Config("no active grammar or lexicon".into()));
        }
        self.check_pipeline_dim()?;
        let mut results = Vec::new();
        self.begin_utterance(false);
        let mut outcome = self.feed(samples)?;
        let mut flushed = false;
        loop {
            match outcome {
                FeedOutcome::Segmented => {
                    results.push(self.finalize_segment(true));
                    outcome = self.resume_segment()?;
                }
                FeedOutcome::NeedsMore if !flushed => {
                    flushed = true;
                    outcome = self.end_input()?;
                }
                FeedOutcome::NeedsMore | FeedOutcome::Done => {
                    results.push(self.finalize_segment(false));
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Recognise a pre-computed feature sequence (bypasses the MFCC
    /// front end and CMN).
    ///
    /// # Errors
    ///
    /// Returns a `Model` error on dimension mismatch.
    pub fn run_on_features(&mut self, seq: &FeatureSeq) -> Result<Vec<UtteranceResult>> {
        if !self.model.is_usable() {
            return Err(DecodeError::Config("no active grammar or lexicon".into()));
        }
        if !seq.is_empty() && seq.veclen != self.model.am.veclen {
            return Err(DecodeError::Model(format!(
                "feature file dimension {} does not match the acoustic model ({})",
                seq.veclen, self.model.am.veclen
            )));
        }
        self.pipeline_input = false;
        let mut results = Vec::new();
        self.begin_utterance(false);
        let mut outcome = self.process_frames(seq.frames.clone())?;
        loop {
            match outcome {
                FeedOutcome::Segmented => {
                    results.push(self.finalize_segment(true));
                    outcome = self.resume_segment()?;
                }
                FeedOutcome::NeedsMore | FeedOutcome::Done => {
                    results.push(self.finalize_segment(false));
                    break;
                }
            }
        }
        self.pipeline_input = true;
        Ok(results)
    }

    /// Drive a whole audio stream: trigger detection, segmentation,
    /// recognition, events. Returns the per-segment results.
    ///
    /// # Errors
    ///
    /// Propagates source and engine failures.
    pub fn run_on_source(&mut self, src: &mut dyn AudioSource) -> Result<Vec<UtteranceResult>> {
        if !self.model.is_usable() {
            return Err(DecodeError::Config("no active grammar or lexicon".into()));
        }
        self.check_pipeline_dim()?;
        src.standby(self.config.analysis.sample_rate)?;
        src.begin()?;
        self.sink.event(Event::SpeechReady);

        let mut cutter = self
            .config
            .detect
            .silence_cut
            .then(|| AdinCutter::new(&self.config.detect, self.config.analysis.sample_rate));
        let mut results = Vec::new();
        let mut in_utterance = false;
        let mut buf = vec![0i16; 4096];

        'stream: loop {
            if self.want_terminate {
                let _ = src.terminate();
                in_utterance = false;
                break;
            }
            // A capture hand-off overflow force-terminates the current
            // utterance with whatever has been recognised so far.
            if src.take_overflow() {
                warn!("capture buffer overflowed, segmenting current utterance");
                if in_utterance {
                    self.close_utterance(&mut results)?;
                    in_utterance = false;
                }
                if let Some(cutter) = &mut cutter {
                    cutter.reset();
                }
            }
            match src.read(&mut buf)? {
                ReadOutcome::Samples(n) => {
                    let chunk = buf[..n].to_vec();
                    match &mut cutter {
                        Some(cutter) => {
                            for event in cutter.feed(&chunk) {
                                match event {
                                    CutEvent::TriggerUp(head) => {
                                        self.sink.event(Event::SpeechStart);
                                        self.begin_utterance(false);
                                        in_utterance = true;
                                        self.drive(&head, &mut results)?;
                                    }
                                    CutEvent::Samples(samples) => {
                                        if in_utterance {
                                            self.drive(&samples, &mut results)?;
                                        }
                                    }
                                    CutEvent::TriggerDown => {
                                        if in_utterance {
                                            self.sink.event(Event::SpeechEnd);
                                            self.close_utterance(&mut results)?;
                                            in_utterance = false;
                                            if self.want_pause {
                                                break 'stream;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        None => {
                            if !in_utterance {
                                self.sink.event(Event::SpeechStart);
                                self.begin_utterance(false);
                                in_utterance = true;
                            }
                            self.drive(&chunk, &mut results)?;
                        }
                    }
                }
                ReadOutcome::EndOfSegment => {
                    if in_utterance {
                        self.close_utterance(&mut results)?;
                        in_utterance = false;
                    }
                    if self.want_pause {
                        break;
                    }
                }
                ReadOutcome::EndOfStream => {
                    if in_utterance {
                        self.close_utterance(&mut results)?;
                    }
                    break;
                }
            }
        }
        src.end()?;
        Ok(results)
    }

    /// Feed samples, finalising and resuming across segment boundaries.
    /// In batched mode the PCM is held back until the utterance closes.
    fn drive(&mut self, samples: &[i16], results: &mut Vec<UtteranceResult>) -> Result<()> {
        if !self.config.search.pass1.realtime {
            self.batch.extend_from_slice(samples);
            return Ok(());
        }
        let mut outcome = self.feed(samples)?;
        while outcome == FeedOutcome::Segmented {
            results.push(self.finalize_segment(true));
            outcome = self.resume_segment()?;
        }
        Ok(())
    }

    /// Flush the front end and finalise the utterance.
    fn close_utterance(&mut self, results: &mut Vec<UtteranceResult>) -> Result<()> {
        if !self.config.search.pass1.realtime && !self.batch.is_empty() {
            let batch = std::mem::take(&mut self.batch);
            let mut outcome = self.feed(&batch)?;
            while outcome == FeedOutcome::Segmented {
                results.push(self.finalize_segment(true));
                outcome = self.resume_segment()?;
            }
        }
        let mut outcome = self.end_input()?;
        while outcome == FeedOutcome::Segmented {
            results.push(self.finalize_segment(true));
            outcome = self.resume_segment()?;
        }
        results.push(self.finalize_segment(false));
        Ok(())
    }
}

/// First pass resources view over the model.
fn pass1_resources(model: &Model) -> Pass1Resources<'_> {
    Pass1Resources {
        am: &model.am,
        lexicon: model.lexicon.as_ref().expect("lexicon built"),
        words: model.active_words(),
        lm: model.pass1_lm(),
    }
}

/// Second pass resources view over the model.
fn pass2_resources<'a>(model: &'a Model, config: &DecoderConfig) -> Pass2Resources<'a> {
    Pass2Resources {
        am: &model.am,
        words: model.active_words(),
        lm: model.pass2_lm(),
        iwcd_method: config.am.iwcd_method,
        iwcd_best_n: config.am.iwcd_best_n,
    }
}

/// Convenience alias for an engine discarding its events.
pub type SimpleRecog = Recog<crate::events::NullSink>;
