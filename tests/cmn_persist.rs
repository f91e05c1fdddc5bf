//! CMN persistence: saved means reload bit-exactly, normalisation with
//! a frozen mean is idempotent, and the file survives a no-update run
//! unchanged.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ardea::cmn::MapCmn;

fn utterance(dim: usize, frames: usize) -> Vec<Vec<f32>> {
    (0..frames)
        .map(|t| {
            (0..dim)
                .map(|d| ((t * 7 + d * 3) % 11) as f32 * 0.25 - 1.0)
                .collect()
        })
        .collect()
}

#[test]
fn saved_file_holds_the_running_mean_of_u1() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmn.bin");
    let dim = 4;
    let frames = utterance(dim, 20);

    let mut cmn = MapCmn::new(dim, 100.0);
    cmn.prepare();
    // Track the raw running mean ourselves.
    let mut sums = vec![0.0f32; dim];
    for frame in &frames {
        for (d, &v) in frame.iter().enumerate() {
            sums[d] += v;
        }
        let mut work = frame.clone();
        cmn.process(&mut work);
    }
    cmn.update();
    cmn.save(&path).unwrap();

    // File contents are the dimension header plus the mean of U1.
    let raw = std::fs::read(&path).unwrap();
    assert_eq!(raw.len(), 4 + dim * 4);
    assert_eq!(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]), dim as u32);
    for d in 0..dim {
        let off = 4 + d * 4;
        let stored =
            f32::from_be_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
        let expected = sums[d] / frames.len() as f32;
        assert!(
            (stored - expected).abs() < 1e-5,
            "dim {d}: stored {stored}, running mean {expected}"
        );
    }
}

#[test]
fn no_update_runs_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmn.bin");
    let dim = 3;
    let frames = utterance(dim, 15);

    // U1 establishes and saves the mean.
    let mut first = MapCmn::new(dim, 100.0);
    first.prepare();
    for frame in &frames {
        let mut work = frame.clone();
        first.process(&mut work);
    }
    first.update();
    first.save(&path).unwrap();

    // Two independent runs from the saved mean, without updating it,
    // produce identical outputs.
    let run = || -> Vec<Vec<f32>> {
        let mut cmn = MapCmn::new(dim, 100.0);
        cmn.load(&path).unwrap();
        cmn.prepare();
        frames
            .iter()
            .map(|frame| {
                let mut work = frame.clone();
                cmn.process(&mut work);
                work
            })
            .collect()
    };
    let a = run();
    let b = run();
    assert_eq!(a, b);
}

#[test]
fn file_unchanged_after_no_update_utterance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cmn.bin");
    let dim = 3;

    let mut cmn = MapCmn::new(dim, 100.0);
    cmn.prepare();
    for frame in &utterance(dim, 10) {
        let mut work = frame.clone();
        cmn.process(&mut work);
    }
    cmn.update();
    cmn.save(&path).unwrap();
    let before = std::fs::read(&path).unwrap();

    // U2 with update disabled: process but never call update; a save
    // then rewrites the same initial mean.
    let mut second = MapCmn::new(dim, 100.0);
    second.load(&path).unwrap();
    second.prepare();
    for frame in &utterance(dim, 25) {
        let mut work = frame.clone();
        second.process(&mut work);
    }
    second.save(&path).unwrap();
    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);
}

#[test]
fn map_smoothing_converges_to_running_mean() {
    // With many frames the MAP term washes out.
    let dim = 1;
    let mut cmn = MapCmn::new(dim, 10.0);
    cmn.prepare();
    let mut v = vec![5.0];
    cmn.process(&mut v);
    cmn.update();

    cmn.prepare();
    let mut last = 0.0;
    for _ in 0..2000 {
        let mut v = vec![1.0];
        cmn.process(&mut v);
        last = v[0];
    }
    // Subtracted mean approaches 1.0, so the output approaches 0.
    assert!(last.abs() < 0.05, "converged output: {last}");
}
