//! Cycle buffer for on-line delta coefficient computation.
//!
//! A vector entering the buffer leaves it `win` frames later together with
//! its regression-based delta coefficients. At stream end the buffer is
//! flushed; missing context at the edges is replaced by the last valid
//! frame on that side.

/// Delta computation cycle buffer.
///
/// Holds `2 * win + 1` slots of `2 * veclen` floats: the input vector in
/// the first half, the computed deltas in the second.
#[derive(Debug, Clone)]
pub struct DeltaBuf {
    veclen: usize,
    win: usize,
    len: usize,
    rows: Vec<Vec<f32>>,
    is_on: Vec<bool>,
    store: usize,
    /// Regression denominator `2 * sum(theta^2)`.
    b: f32,
}

impl DeltaBuf {
    /// Create a buffer for vectors of `veclen` elements and a one-sided
    /// window of `win` frames.
    #[must_use]
    pub fn new(veclen: usize, win: usize) -> Self {
        let len = win * 2 + 1;
        let b = 2.0 * (1..=win).map(|t| (t * t) as f32).sum::<f32>();
        Self {
            veclen,
            win,
            len,
            rows: vec![vec![0.0; veclen * 2]; len],
            is_on: vec![false; len],
            store: 0,
            b,
        }
    }

    /// Clear all state. Call before each input stream.
    pub fn prepare(&mut self) {
        self.store = 0;
        self.is_on.iter_mut().for_each(|v| *v = false);
    }

    /// Compute deltas for the slot at `cur` using whatever neighbours are
    /// valid, replicating the last valid frame at the edges.
    fn calc(&mut self, cur: usize) {
        for n in 0..self.veclen {
            let mut sum = 0.0f32;
            let mut last_valid_left = cur;
            let mut last_valid_right = cur;
            for theta in 1..=self.win {
                let p = (cur + self.len - theta) % self.len;
                let a1 = if self.is_on[p] {
                    last_valid_left = p;
                    self.rows[p][n]
                } else {
                    self.rows[last_valid_left][n]
                };
                let p = (cur + theta) % self.len;
                let a2 = if self.is_on[p] {
                    last_valid_right = p;
                    self.rows[p][n]
                } else {
                    self.rows[last_valid_right][n]
                };
                sum += theta as f32 * (a2 - a1);
            }
            self.rows[cur][self.veclen + n] = sum / self.b;
        }
    }

    /// Store a new vector and return the completed (vector, delta) pair
    /// that becomes available, if any.
    ///
    /// The returned slice is `2 * veclen` long: input vector then deltas.
    pub fn proceed(&mut self, vec: &[f32]) -> Option<&[f32]> {
        debug_assert_eq!(vec.len(), self.veclen);
        self.rows[self.store][..self.veclen].copy_from_slice(vec);
        self.is_on[self.store] = true;
        self.advance()
    }

    /// Flush one pending frame at stream end.
    ///
    /// Call repeatedly until `None`; each call yields the next delayed
    /// frame with edge-replicated deltas.
    pub fn flush(&mut self) -> Option<&[f32]> {
        self.is_on[self.store] = false;
        self.advance()
    }

    fn advance(&mut self) -> Option<&[f32]> {
        let cur = (self.store + self.len - self.win) % self.len;
        let ready = self.is_on[cur];
        if ready {
            self.calc(cur);
        }
        self.store = (self.store + 1) % self.len;
        if ready { Some(&self.rows[cur]) } else { None }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn emits_after_window_latency() {
        let mut db = DeltaBuf::new(1, 2);
        db.prepare();
        assert!(db.proceed(&[1.0]).is_none());
        assert!(db.proceed(&[2.0]).is_none());
        // Third input: slot 0 has both right neighbours, delta available.
        let out = db.proceed(&[3.0]).map(<[f32]>::to_vec);
        assert!(out.is_some());
        let out = out.unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn flush_emits_exactly_window_frames() {
        let win = 2;
        let mut db = DeltaBuf::new(1, win);
        db.prepare();
        let total = 10;
        let mut emitted = 0;
        for i in 0..total {
            if db.proceed(&[i as f32]).is_some() {
                emitted += 1;
            }
        }
        let mut flushed = 0;
        while db.flush().is_some() {
            flushed += 1;
        }
        assert_eq!(emitted, total - win);
        assert_eq!(flushed, win);
    }

    #[test]
    fn linear_input_has_constant_delta() {
        // For x_t = t the regression delta is exactly 1 in steady state.
        let mut db = DeltaBuf::new(1, 2);
        db.prepare();
        let mut deltas = Vec::new();
        for t in 0..8 {
            if let Some(row) = db.proceed(&[t as f32]) {
                deltas.push(row[1]);
            }
        }
        // Skip the first emission (left edge replication).
        for &d in &deltas[2..] {
            assert!((d - 1.0).abs() < 1e-5, "delta {d} should be 1.0");
        }
    }

    #[test]
    fn constant_input_has_zero_delta() {
        let mut db = DeltaBuf::new(3, 2);
        db.prepare();
        for _ in 0..6 {
            if let Some(row) = db.proceed(&[4.0, -1.0, 0.5]) {
                assert!(row[3..].iter().all(|d| d.abs() < 1e-6));
            }
        }
        while let Some(row) = db.flush() {
            assert!(row[3..].iter().all(|d| d.abs() < 1e-6));
        }
    }
}
