//! Short-pause segmentation across a long input.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use ardea::error::UtteranceStatus;
use common::{feats, ngram_engine};

const PHONES: &[(&str, f32)] = &[
    ("s", -6.0),
    ("sp", -12.0),
    ("a", 0.0),
    ("b", 6.0),
];

const DICT: &str = "<s> s\n</s> s\n<sp> {pause} sp\nA [a] a\nB [b] b\n";

#[test]
fn long_silence_gap_splits_into_two_segments() {
    let mut engine = ngram_engine(PHONES, DICT, |c| {
        c.search.sp_segment = true;
        c.search.sp_frame_duration = 4;
    });

    // <s> A <pause...> B <s>, with the pause long enough to trigger.
    let seq = feats(&[
        (-6.0, 5),
        (0.0, 6),
        (-12.0, 10),
        (6.0, 6),
        (-6.0, 5),
    ]);
    let results = engine.run_on_features(&seq).unwrap();
    assert_eq!(results.len(), 2, "expected exactly two segments");

    // Both segments produced their own result.
    let outputs: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            r.sentences
                .first()
                .map(|s| s.outputs.clone())
                .unwrap_or_default()
        })
        .collect();

    assert_eq!(results[0].status, UtteranceStatus::Success);
    assert!(
        outputs[0].contains(&"a".to_owned()),
        "first segment holds A: {outputs:?}"
    );
    // Word B belongs to the second segment only.
    assert!(
        !outputs[0].contains(&"b".to_owned()),
        "B must not leak into the first segment: {outputs:?}"
    );
    if results[1].status == UtteranceStatus::Success {
        assert!(
            outputs[1].contains(&"b".to_owned()),
            "second segment holds B: {outputs:?}"
        );
    }

    // The two segments cover the whole input without losing frames
    // (the pause area may be shared at the seam).
    let total: usize = results.iter().map(|r| r.num_frames).sum();
    assert!(total >= seq.len(), "segments cover the input: {total}");
}

#[test]
fn concatenation_matches_unsegmented_run() {
    let seq = feats(&[
        (-6.0, 5),
        (0.0, 6),
        (-12.0, 10),
        (6.0, 6),
        (-6.0, 5),
    ]);

    let mut plain = ngram_engine(PHONES, DICT, |_| {});
    let plain_results = plain.run_on_features(&seq).unwrap();
    let plain_words: Vec<String> = plain_results[0]
        .sentences
        .first()
        .map(|s| s.outputs.clone())
        .unwrap_or_default();

    let mut seg = ngram_engine(PHONES, DICT, |c| {
        c.search.sp_segment = true;
        c.search.sp_frame_duration = 4;
    });
    let seg_results = seg.run_on_features(&seq).unwrap();
    let mut seg_words: Vec<String> = Vec::new();
    for r in &seg_results {
        if let Some(s) = r.sentences.first() {
            seg_words.extend(s.outputs.iter().cloned());
        }
    }

    // The content words survive segmentation in order.
    let content = |words: &[String]| -> Vec<String> {
        words
            .iter()
            .filter(|w| *w == "a" || *w == "b")
            .cloned()
            .collect()
    };
    assert_eq!(
        content(&plain_words),
        content(&seg_words),
        "plain {plain_words:?} vs segmented {seg_words:?}"
    );
}

#[test]
fn input_without_pause_run_stays_one_segment() {
    let mut engine = ngram_engine(PHONES, DICT, |c| {
        c.search.sp_segment = true;
        c.search.sp_frame_duration = 3;
    });
    // Long leading silence (matched by the silence word, not the pause
    // word), one word, trailing silence: no boundary.
    let seq = feats(&[(-6.0, 10), (0.0, 6), (-6.0, 4)]);
    let results = engine.run_on_features(&seq).unwrap();
    assert_eq!(results.len(), 1);
}
