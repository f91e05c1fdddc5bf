//! Front-end pipeline properties: on-line processing equals batch
//! processing, and the delta/acceleration latency accounting is exact.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ardea::config::{AnalysisConfig, FrontendConfig};
use ardea::mfcc::pipeline::FeaturePipeline;

fn speechlike(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / 16_000.0;
            let v = 6000.0 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                + 2500.0 * (2.0 * std::f32::consts::PI * 700.0 * t).sin()
                + 800.0 * (2.0 * std::f32::consts::PI * 1900.0 * t).sin();
            v as i16
        })
        .collect()
}

#[test]
fn online_equals_batch_for_any_fragmentation() {
    let analysis = AnalysisConfig::default();
    let frontend = FrontendConfig::default();
    let samples = speechlike(16_000);

    let mut batch_pipe = FeaturePipeline::new(&analysis, &frontend);
    let batch = batch_pipe.process_all(&samples);
    assert!(!batch.is_empty());

    for chunk_size in [1usize, 7, 160, 1111, 4096] {
        let mut pipe = FeaturePipeline::new(&analysis, &frontend);
        pipe.prepare();
        let mut online = Vec::new();
        for chunk in samples.chunks(chunk_size) {
            pipe.feed(chunk, &mut online);
        }
        pipe.end(&mut online);

        assert_eq!(
            batch.len(),
            online.len(),
            "frame count differs for chunk size {chunk_size}"
        );
        for (t, (a, b)) in batch.iter().zip(online.iter()).enumerate() {
            for (x, y) in a.iter().zip(b.iter()) {
                assert!(
                    (x - y).abs() < 1e-3,
                    "chunk {chunk_size}, frame {t}: {x} vs {y}"
                );
            }
        }
    }
}

#[test]
fn frame_count_and_flush_tail() {
    let analysis = AnalysisConfig::default();
    let frontend = FrontendConfig::default();
    let latency = analysis.total_latency();

    // Enough samples for exactly 50 windows.
    let n_windows = 50;
    let samples = speechlike(analysis.frame_size + analysis.frame_shift * (n_windows - 1));

    let mut pipe = FeaturePipeline::new(&analysis, &frontend);
    pipe.prepare();
    let mut streamed = Vec::new();
    pipe.feed(&samples, &mut streamed);

    // Steady state: emission lags by the combined window latency.
    assert_eq!(streamed.len(), n_windows - latency);

    // Flush yields exactly the latency tail, completing the count.
    pipe.end(&mut streamed);
    assert_eq!(streamed.len(), n_windows);
    assert_eq!(pipe.frames_emitted(), n_windows);
}

#[test]
fn vector_dimension_matches_configuration() {
    let mut analysis = AnalysisConfig::default();
    analysis.use_c0 = true;
    let frontend = FrontendConfig::default();
    let mut pipe = FeaturePipeline::new(&analysis, &frontend);
    let out = pipe.process_all(&speechlike(8_000));
    assert!(!out.is_empty());
    assert!(out.iter().all(|v| v.len() == analysis.vec_dim()));
}

#[test]
fn delta_part_reflects_temporal_change() {
    // A level step in the input must produce nonzero deltas around it.
    let analysis = AnalysisConfig::default();
    let frontend = FrontendConfig {
        cmn: false,
        ..FrontendConfig::default()
    };
    let mut samples = vec![0i16; 8000];
    samples.extend(speechlike(8000));

    let mut pipe = FeaturePipeline::new(&analysis, &frontend);
    let out = pipe.process_all(&samples);
    let base = analysis.base_dim();
    let max_delta = out
        .iter()
        .flat_map(|v| v[base..base * 2].iter())
        .fold(0.0f32, |acc, &d| acc.max(d.abs()));
    assert!(max_delta > 0.0, "deltas must react to the step");
}
