//! Input triggering: level / zero-cross speech detection with head and
//! tail margins.
//!
//! Incoming samples run through a cycle buffer of head-margin length.
//! Speech is triggered when the number of threshold-crossing zero
//! crossings inside the window reaches the configured count; the whole
//! head margin is then replayed so the utterance keeps its onset. After
//! the level stays below the threshold for the tail margin, the segment
//! is closed (the tail margin itself is included).

use crate::config::DetectConfig;
use std::collections::VecDeque;

/// Events produced while cutting the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutEvent {
    /// Speech started; carries the buffered head-margin samples.
    TriggerUp(Vec<i16>),
    /// Samples inside a triggered segment.
    Samples(Vec<i16>),
    /// Speech ended (tail margin elapsed).
    TriggerDown,
}

/// Level/zero-cross input cutter.
#[derive(Debug)]
pub struct AdinCutter {
    level: i32,
    zc_thres: usize,
    head_len: usize,
    tail_len: usize,
    /// Head-margin cycle buffer of recent samples.
    cycle: VecDeque<i16>,
    /// Crossing markers parallel to `cycle`.
    crossings: VecDeque<bool>,
    /// Crossings currently inside the window.
    zc_count: usize,
    /// Sign of the last swing beyond the level threshold.
    last_sign: i8,
    triggered: bool,
    /// Samples seen since the level last exceeded the threshold.
    silence_run: usize,
}

impl AdinCutter {
    /// Create a cutter from the detection configuration.
    #[must_use]
    pub fn new(config: &DetectConfig, sample_rate: u32) -> Self {
        let head_len = (config.head_margin_ms as usize * sample_rate as usize) / 1000;
        let tail_len = (config.tail_margin_ms as usize * sample_rate as usize) / 1000;
        // The configured count is per second; scale it to the window.
        let zc_thres =
            (config.zero_cross_num * head_len.max(1)) / (sample_rate as usize).max(1);
        Self {
            level: config.level_thres,
            zc_thres: zc_thres.max(1),
            head_len: head_len.max(1),
            tail_len: tail_len.max(1),
            cycle: VecDeque::new(),
            crossings: VecDeque::new(),
            zc_count: 0,
            last_sign: 0,
            triggered: false,
            silence_run: 0,
        }
    }

    /// Reset all state.
    pub fn reset(&mut self) {
        self.cycle.clear();
        self.crossings.clear();
        self.zc_count = 0;
        self.last_sign = 0;
        self.triggered = false;
        self.silence_run = 0;
    }

    /// True while inside a triggered segment.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Feed samples, producing cut events.
    pub fn feed(&mut self, samples: &[i16]) -> Vec<CutEvent> {
        let mut events = Vec::new();
        let mut run: Vec<i16> = Vec::new();

        for &s in samples {
            self.update_zerocross(s);

            if self.triggered {
                run.push(s);
                if i32::from(s).abs() >= self.level {
                    self.silence_run = 0;
                } else {
                    self.silence_run += 1;
                    if self.silence_run >= self.tail_len {
                        if !run.is_empty() {
                            events.push(CutEvent::Samples(std::mem::take(&mut run)));
                        }
                        events.push(CutEvent::TriggerDown);
                        self.triggered = false;
                        self.silence_run = 0;
                        self.zc_count = 0;
                        self.crossings.iter_mut().for_each(|c| *c = false);
                    }
                }
            } else if self.zc_count >= self.zc_thres {
                // Trigger: replay the head margin.
                let head: Vec<i16> = self.cycle.iter().copied().collect();
                events.push(CutEvent::TriggerUp(head));
                self.triggered = true;
                self.silence_run = 0;
            }
        }

        if self.triggered && !run.is_empty() {
            events.push(CutEvent::Samples(run));
        }
        events
    }

    /// Push a sample into the cycle buffer and maintain the windowed
    /// zero-cross count. A crossing counts when the waveform swings
    /// across zero with amplitude beyond the level threshold.
    fn update_zerocross(&mut self, s: i16) {
        let mut crossing = false;
        let v = i32::from(s);
        if v.abs() >= self.level {
            let sign: i8 = if v > 0 { 1 } else { -1 };
            if self.last_sign != 0 && sign != self.last_sign {
                crossing = true;
            }
            self.last_sign = sign;
        }

        self.cycle.push_back(s);
        self.crossings.push_back(crossing);
        if crossing {
            self.zc_count += 1;
        }
        if self.cycle.len() > self.head_len {
            self.cycle.pop_front();
            if self.crossings.pop_front() == Some(true) {
                self.zc_count -= 1;
            }
        }
    }
}
