//! Configuration types for the recognition engine.
//!
//! Each processing concern gets its own sub-struct with engine defaults,
//! so a TOML config file only needs to mention the values it overrides.
//! `DecoderConfig::apply_args` additionally accepts the traditional
//! command-line option surface.

use crate::error::{DecodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Acoustic analysis (MFCC) parameters.
    pub analysis: AnalysisConfig,
    /// Front-end processing (CMN, DC removal, zero stripping).
    pub frontend: FrontendConfig,
    /// Acoustic model computation settings.
    pub am: AmConfig,
    /// Language model weights and penalties.
    pub lm: LmConfig,
    /// Search parameters for both passes.
    pub search: SearchConfig,
    /// Input trigger (voice activity) detection.
    pub detect: DetectConfig,
    /// Input rejection (GMM, short input).
    pub reject: RejectConfig,
    /// Result output settings.
    pub output: OutputConfig,
}

/// Acoustic analysis configuration.
///
/// Defaults follow the common 16kHz setup: 25ms window, 10ms shift,
/// 12 cepstral coefficients plus log energy, delta and acceleration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sampling frequency in Hz.
    pub sample_rate: u32,
    /// Window size in samples.
    pub frame_size: usize,
    /// Window shift in samples.
    pub frame_shift: usize,
    /// Pre-emphasis coefficient.
    pub preemph: f32,
    /// Number of mel filterbank channels.
    pub fbank_num: usize,
    /// Number of cepstral coefficients (excluding energy/c0).
    pub mfcc_dim: usize,
    /// Cepstral liftering coefficient (0 = no liftering).
    pub lifter: usize,
    /// Append log energy to the base vector.
    pub use_energy: bool,
    /// Append the 0th cepstral coefficient to the base vector.
    pub use_c0: bool,
    /// Use raw energy (skip normalisation against the running maximum).
    pub raw_energy: bool,
    /// Normalise log energy against the previous utterance maximum.
    pub energy_normalize: bool,
    /// Energy scaling factor for normalisation.
    pub escale: f32,
    /// Silence floor in dB for energy normalisation.
    pub silence_floor: f32,
    /// Delta window width in frames (one side).
    pub delta_window: usize,
    /// Acceleration window width in frames (one side), 0 to disable accel.
    pub accel_window: usize,
    /// Compute acceleration coefficients.
    pub use_accel: bool,
    /// Suppress the absolute energy element in the final vector.
    pub absesup: bool,
    /// Frame-wise DC offset removal.
    pub zmean_frame: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 400,
            frame_shift: 160,
            preemph: 0.97,
            fbank_num: 24,
            mfcc_dim: 12,
            lifter: 22,
            use_energy: true,
            use_c0: false,
            raw_energy: false,
            energy_normalize: true,
            escale: 1.0,
            silence_floor: 50.0,
            delta_window: 2,
            accel_window: 2,
            use_accel: true,
            absesup: false,
            zmean_frame: false,
        }
    }
}

impl AnalysisConfig {
    /// Dimension of the base vector (cepstra plus optional energy/c0).
    #[must_use]
    pub fn base_dim(&self) -> usize {
        let mut n = self.mfcc_dim;
        if self.use_c0 {
            n += 1;
        }
        if self.use_energy {
            n += 1;
        }
        n
    }

    /// Dimension of the final vector handed to the decoder.
    #[must_use]
    pub fn vec_dim(&self) -> usize {
        let base = self.base_dim();
        let mut n = base * 2;
        if self.use_accel {
            n += base;
        }
        if self.absesup {
            n -= 1;
        }
        n
    }

    /// Combined delta + acceleration latency in frames.
    #[must_use]
    pub fn total_latency(&self) -> usize {
        self.delta_window + if self.use_accel { self.accel_window } else { 0 }
    }
}

/// Front-end (pre-analysis) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Apply cepstral mean normalisation.
    pub cmn: bool,
    /// Load the initial cepstral mean from this file at startup.
    pub cmn_load: Option<PathBuf>,
    /// Save the cepstral mean to this file after every utterance.
    pub cmn_save: Option<PathBuf>,
    /// Update the initial cepstral mean across utterances.
    pub cmn_update: bool,
    /// MAP weight for the initial cepstral mean.
    pub cmn_map_weight: f32,
    /// Strip off sequences of zero samples.
    pub strip_zero_samples: bool,
    /// Remove DC offset by whole-input zero mean.
    pub zmean: bool,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            cmn: true,
            cmn_load: None,
            cmn_save: None,
            cmn_update: true,
            cmn_map_weight: 100.0,
            strip_zero_samples: true,
            zmean: false,
        }
    }
}

/// Gaussian pruning method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GprunMethod {
    /// Compute all Gaussians.
    None,
    /// Running top-K threshold with per-dimension early exit.
    Safe,
    /// Threshold seeded from the previous frame's best score per state.
    Beam,
    /// Restrict to the previous frame's top-K plus a wider window.
    Heuristic,
}

/// Cross-word triphone approximation on the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IwcdMethod {
    /// Average of the left-context set scores.
    Avg,
    /// Maximum of the left-context set scores.
    Max,
    /// Average of the best N scores of the left-context set.
    Best,
}

/// Acoustic model computation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmConfig {
    /// Gaussian pruning method.
    pub gprune: GprunMethod,
    /// Number of Gaussians to keep per mixture under pruning.
    pub mixnum_thres: usize,
    /// Logical name of the short pause model.
    pub spmodel_name: String,
    /// Cross-word triphone approximation method on the first pass.
    pub iwcd_method: IwcdMethod,
    /// N for `IwcdMethod::Best`.
    pub iwcd_best_n: usize,
    /// Force context-dependent handling regardless of model naming.
    pub ccd_force: bool,
}

impl Default for AmConfig {
    fn default() -> Self {
        Self {
            gprune: GprunMethod::Safe,
            mixnum_thres: 2,
            spmodel_name: "sp".into(),
            iwcd_method: IwcdMethod::Best,
            iwcd_best_n: 3,
            ccd_force: false,
        }
    }
}

/// Language model weights, penalties and special word names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// N-gram weight on the first pass.
    pub lm_weight: f32,
    /// Word insertion penalty on the first pass (N-gram).
    pub lm_penalty: f32,
    /// N-gram weight on the second pass.
    pub lm_weight2: f32,
    /// Word insertion penalty on the second pass (N-gram).
    pub lm_penalty2: f32,
    /// Additional insertion penalty for transparent words.
    pub lm_penalty_trans: f32,
    /// Word insertion penalty on the first pass (DFA).
    pub penalty1: f32,
    /// Word insertion penalty on the second pass (DFA).
    pub penalty2: f32,
    /// Head silence word name (N-gram).
    pub head_silname: String,
    /// Tail silence word name (N-gram).
    pub tail_silname: String,
    /// Enable inter-word short pause handling.
    pub enable_iwsp: bool,
    /// Transition penalty for inter-word short pauses.
    pub iwsp_penalty: f32,
    /// Automatically add a short-pause word to the dictionary (N-gram).
    pub enable_iwspword: bool,
    /// Dictionary entry text used by `enable_iwspword`.
    pub iwspentry: String,
    /// Grammar file prefixes to load at startup.
    pub gram_prefixes: Vec<String>,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            lm_weight: 8.0,
            lm_penalty: -2.0,
            lm_weight2: 8.0,
            lm_penalty2: -2.0,
            lm_penalty_trans: 0.0,
            penalty1: 0.0,
            penalty2: 10.0,
            head_silname: "<s>".into(),
            tail_silname: "</s>".into(),
            enable_iwsp: false,
            iwsp_penalty: -1.0,
            enable_iwspword: false,
            iwspentry: "<UNK> [sp] sp".into(),
            gram_prefixes: Vec::new(),
        }
    }
}

/// First pass search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pass1Config {
    /// Pipelined (on-the-fly) first pass; batched when false. Both paths
    /// produce identical feature sequences.
    pub realtime: bool,
    /// Beam width: 0 = full search, -1 = derive from vocabulary size.
    pub beam_width: i32,
    /// Keep up to this many tokens per node under word-pair approximation
    /// (0 = 1-best-per-node).
    pub wpair_nlimit: usize,
    /// Apply 1-gram factoring to tree-internal branches (N-gram only).
    pub factoring_unigram: bool,
    /// Report the running best word sequence while decoding.
    pub progout: bool,
    /// Interval for progressive output, in ms.
    pub progout_interval_ms: u32,
}

impl Default for Pass1Config {
    fn default() -> Self {
        Self {
            realtime: true,
            beam_width: -1,
            wpair_nlimit: 0,
            factoring_unigram: true,
            progout: false,
            progout_interval_ms: 300,
        }
    }
}

/// Second pass search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pass2Config {
    /// Search until this many sentence hypotheses are found.
    pub nbest: usize,
    /// Hypothesis stack size.
    pub stack_size: usize,
    /// Give up after this many hypotheses have been popped.
    pub hypo_overflow: usize,
    /// Per-length expansion limit (word envelope).
    pub envelope_width: usize,
    /// Score envelope threshold.
    pub scan_beam_thres: f32,
    /// Frame neighbourhood for trellis word lookup.
    pub lookup_range: usize,
    /// Enable word confidence scoring.
    pub confidence: bool,
    /// Scaling factor for confidence scoring.
    pub cm_alpha: f32,
    /// Run only the first pass and report its result.
    pub only_1pass: bool,
}

impl Default for Pass2Config {
    fn default() -> Self {
        Self {
            nbest: 10,
            stack_size: 500,
            hypo_overflow: 2000,
            envelope_width: 30,
            scan_beam_thres: 80.0,
            lookup_range: 5,
            confidence: true,
            cm_alpha: 0.05,
            only_1pass: false,
        }
    }
}

/// Word graph output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Accumulate a word graph during the second pass.
    pub enabled: bool,
    /// Frame margin for post-merging graph words.
    pub merge_range: i32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            merge_range: 0,
        }
    }
}

/// Search configuration for both passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// First pass parameters.
    pub pass1: Pass1Config,
    /// Second pass parameters.
    pub pass2: Pass2Config,
    /// Word graph output.
    pub graph: GraphConfig,
    /// Enable short-pause segmentation.
    pub sp_segment: bool,
    /// Short-pause run length (frames) that triggers segmentation.
    pub sp_frame_duration: usize,
    /// Forced alignment per word after recognition.
    pub align_word: bool,
    /// Forced alignment per phone after recognition.
    pub align_phone: bool,
    /// Forced alignment per state after recognition.
    pub align_state: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            pass1: Pass1Config::default(),
            pass2: Pass2Config::default(),
            graph: GraphConfig::default(),
            sp_segment: false,
            sp_frame_duration: 10,
            align_word: false,
            align_phone: false,
            align_state: false,
        }
    }
}

/// Input trigger detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Cut silence regions from the input stream.
    pub silence_cut: bool,
    /// Input level threshold (0..32767).
    pub level_thres: i32,
    /// Zero crossings per second that count as a trigger.
    pub zero_cross_num: usize,
    /// Head margin in ms kept before the trigger point.
    pub head_margin_ms: u32,
    /// Tail margin in ms kept after the input drops below the threshold.
    pub tail_margin_ms: u32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            silence_cut: true,
            level_thres: 2000,
            zero_cross_num: 60,
            head_margin_ms: 300,
            tail_margin_ms: 400,
        }
    }
}

/// Input rejection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectConfig {
    /// Reject inputs shorter than this many ms (0 = disabled).
    pub reject_short_ms: u32,
    /// GMM names whose selection rejects the utterance.
    pub gmm_reject_names: Vec<String>,
    /// Number of Gaussians computed per GMM frame.
    pub gmm_prune_num: usize,
}

/// Result output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Number of sentence candidates to output.
    pub hypo_maxnum: usize,
    /// Report AM and LM scores separately.
    pub separate_score: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            hypo_maxnum: 1,
            separate_score: false,
        }
    }
}

impl DecoderConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| DecodeError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Apply traditional command-line options to this configuration.
    ///
    /// Recognised options follow the historical decoder surface
    /// (`-b`, `-n`, `-s`, `-m`, `-sb`, `-lmp`, `-gprune`, ...). Unknown
    /// options are an error so typos do not silently pass.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for unknown options or malformed values.
    pub fn apply_args<I, S>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_owned()).collect();
        let mut i = 0;
        while i < args.len() {
            let opt = args[i].as_str();
            let mut next = |i: &mut usize| -> Result<String> {
                *i += 1;
                args.get(*i)
                    .cloned()
                    .ok_or_else(|| DecodeError::Config(format!("option {opt} requires a value")))
            };
            match opt {
                "-b" => self.search.pass1.beam_width = parse(&next(&mut i)?, opt)?,
                "-n" => self.search.pass2.nbest = parse(&next(&mut i)?, opt)?,
                "-output" => self.output.hypo_maxnum = parse(&next(&mut i)?, opt)?,
                "-s" => self.search.pass2.stack_size = parse(&next(&mut i)?, opt)?,
                "-m" => self.search.pass2.hypo_overflow = parse(&next(&mut i)?, opt)?,
                "-b2" => self.search.pass2.envelope_width = parse(&next(&mut i)?, opt)?,
                "-sb" => self.search.pass2.scan_beam_thres = parse(&next(&mut i)?, opt)?,
                "-lookuprange" => self.search.pass2.lookup_range = parse(&next(&mut i)?, opt)?,
                "-lmp" => {
                    self.lm.lm_weight = parse(&next(&mut i)?, opt)?;
                    self.lm.lm_penalty = parse(&next(&mut i)?, opt)?;
                }
                "-lmp2" => {
                    self.lm.lm_weight2 = parse(&next(&mut i)?, opt)?;
                    self.lm.lm_penalty2 = parse(&next(&mut i)?, opt)?;
                }
                "-transp" => self.lm.lm_penalty_trans = parse(&next(&mut i)?, opt)?,
                "-penalty1" => self.lm.penalty1 = parse(&next(&mut i)?, opt)?,
                "-penalty2" => self.lm.penalty2 = parse(&next(&mut i)?, opt)?,
                "-silhead" => self.lm.head_silname = next(&mut i)?,
                "-siltail" => self.lm.tail_silname = next(&mut i)?,
                "-iwsp" => self.lm.enable_iwsp = true,
                "-iwsppenalty" => self.lm.iwsp_penalty = parse(&next(&mut i)?, opt)?,
                "-iwspword" => self.lm.enable_iwspword = true,
                "-iwspentry" => self.lm.iwspentry = next(&mut i)?,
                "-gram" => {
                    self.lm
                        .gram_prefixes
                        .extend(next(&mut i)?.split(',').map(str::to_owned));
                }
                "-gramlist" => {
                    let path = next(&mut i)?;
                    let text = std::fs::read_to_string(&path).map_err(|e| {
                        DecodeError::Config(format!("cannot read grammar list {path}: {e}"))
                    })?;
                    self.lm.gram_prefixes.extend(
                        text.lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty() && !l.starts_with('#'))
                            .map(str::to_owned),
                    );
                }
                "-gprune" => {
                    self.am.gprune = match next(&mut i)?.as_str() {
                        "none" => GprunMethod::None,
                        "safe" => GprunMethod::Safe,
                        "beam" => GprunMethod::Beam,
                        "heuristic" => GprunMethod::Heuristic,
                        other => {
                            return Err(DecodeError::Config(format!(
                                "unknown -gprune method: {other}"
                            )));
                        }
                    }
                }
                "-tmix" => self.am.mixnum_thres = parse(&next(&mut i)?, opt)?,
                "-spmodel" | "-sp" => self.am.spmodel_name = next(&mut i)?,
                "-iwcd1" => {
                    match next(&mut i)?.as_str() {
                        "max" => self.am.iwcd_method = IwcdMethod::Max,
                        "avg" => self.am.iwcd_method = IwcdMethod::Avg,
                        "best" => {
                            self.am.iwcd_method = IwcdMethod::Best;
                            self.am.iwcd_best_n = parse(&next(&mut i)?, opt)?;
                        }
                        other => {
                            return Err(DecodeError::Config(format!(
                                "unknown -iwcd1 method: {other}"
                            )));
                        }
                    };
                }
                "-nlimit" => self.search.pass1.wpair_nlimit = parse(&next(&mut i)?, opt)?,
                "-1pass" => self.search.pass2.only_1pass = true,
                "-realtime" => self.search.pass1.realtime = true,
                "-norealtime" => self.search.pass1.realtime = false,
                "-progout" => self.search.pass1.progout = true,
                "-proginterval" => {
                    self.search.pass1.progout_interval_ms = parse(&next(&mut i)?, opt)?;
                }
                "-cmalpha" => self.search.pass2.cm_alpha = parse(&next(&mut i)?, opt)?,
                "-graphout" | "-lattice" => self.search.graph.enabled = true,
                "-nolattice" => self.search.graph.enabled = false,
                "-graphrange" => self.search.graph.merge_range = parse(&next(&mut i)?, opt)?,
                "-walign" => self.search.align_word = true,
                "-palign" => self.search.align_phone = true,
                "-salign" => self.search.align_state = true,
                "-spsegment" => self.search.sp_segment = true,
                "-spdur" => self.search.sp_frame_duration = parse(&next(&mut i)?, opt)?,
                "-lv" => self.detect.level_thres = parse(&next(&mut i)?, opt)?,
                "-zc" => self.detect.zero_cross_num = parse(&next(&mut i)?, opt)?,
                "-headmargin" => self.detect.head_margin_ms = parse(&next(&mut i)?, opt)?,
                "-tailmargin" => self.detect.tail_margin_ms = parse(&next(&mut i)?, opt)?,
                "-cutsilence" => self.detect.silence_cut = true,
                "-nocutsilence" => self.detect.silence_cut = false,
                "-rejectshort" => self.reject.reject_short_ms = parse(&next(&mut i)?, opt)?,
                "-gmmreject" => {
                    self.reject.gmm_reject_names =
                        next(&mut i)?.split(',').map(str::to_owned).collect();
                }
                "-gmmnum" => self.reject.gmm_prune_num = parse(&next(&mut i)?, opt)?,
                "-cmnload" => self.frontend.cmn_load = Some(PathBuf::from(next(&mut i)?)),
                "-cmnsave" => self.frontend.cmn_save = Some(PathBuf::from(next(&mut i)?)),
                "-cmnnoupdate" => self.frontend.cmn_update = false,
                "-cmnmapweight" => self.frontend.cmn_map_weight = parse(&next(&mut i)?, opt)?,
                "-zmean" => self.frontend.zmean = true,
                "-nozmean" => self.frontend.zmean = false,
                "-zmeanframe" => self.analysis.zmean_frame = true,
                "-nozmeanframe" => self.analysis.zmean_frame = false,
                "-nostrip" => self.frontend.strip_zero_samples = false,
                "-smpFreq" => self.analysis.sample_rate = parse(&next(&mut i)?, opt)?,
                "-fsize" => self.analysis.frame_size = parse(&next(&mut i)?, opt)?,
                "-fshift" => self.analysis.frame_shift = parse(&next(&mut i)?, opt)?,
                "-preemph" => self.analysis.preemph = parse(&next(&mut i)?, opt)?,
                "-fbank" => self.analysis.fbank_num = parse(&next(&mut i)?, opt)?,
                "-ceplif" => self.analysis.lifter = parse(&next(&mut i)?, opt)?,
                "-delwin" => self.analysis.delta_window = parse(&next(&mut i)?, opt)?,
                "-accwin" => self.analysis.accel_window = parse(&next(&mut i)?, opt)?,
                "-rawe" => self.analysis.raw_energy = true,
                "-norawe" => self.analysis.raw_energy = false,
                "-enormal" => self.analysis.energy_normalize = true,
                "-noenormal" => self.analysis.energy_normalize = false,
                "-escale" => self.analysis.escale = parse(&next(&mut i)?, opt)?,
                "-silfloor" => self.analysis.silence_floor = parse(&next(&mut i)?, opt)?,
                "-separatescore" => self.output.separate_score = true,
                other => {
                    return Err(DecodeError::Config(format!("unknown option: {other}")));
                }
            }
            i += 1;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(value: &str, opt: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| DecodeError::Config(format!("invalid value for {opt}: {value}")))
}
