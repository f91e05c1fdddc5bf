//! Audio input sources and input-side processing.
//!
//! An [`AudioSource`] is the capability set the engine drives: stand by
//! with a sample rate, begin/end a stream, optionally pause and resume,
//! and read 16-bit samples. Variants cover WAV and raw files, stdin and
//! a TCP audio server; a threaded wrapper decouples capture from
//! decoding with a bounded hand-off buffer.

pub mod cut;
pub mod file;
pub mod tcp;
pub mod thread;

use crate::error::Result;

/// Result of one read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` samples were stored into the buffer.
    Samples(usize),
    /// The source finished one segment; more may follow.
    EndOfSegment,
    /// The stream is exhausted.
    EndOfStream,
}

/// Capability set of an audio source.
///
/// Sample format is 16-bit signed, mono, at the rate given to
/// [`AudioSource::standby`]; byte order is normalised to the host by the
/// implementation.
pub trait AudioSource {
    /// One-time initialisation with the required sampling frequency.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot provide the rate.
    fn standby(&mut self, sample_rate: u32) -> Result<()>;

    /// Open the stream for capturing.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream cannot be opened.
    fn begin(&mut self) -> Result<()>;

    /// Close the stream.
    ///
    /// # Errors
    ///
    /// Returns an error when closing fails.
    fn end(&mut self) -> Result<()>;

    /// Resume after a pause. Default: no-op.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Pause capturing. Default: no-op.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    /// Ask the producer to stop sending immediately. Default: no-op.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read up to `buf.len()` samples without blocking longer than one
    /// capture fragment.
    ///
    /// # Errors
    ///
    /// Returns an error on device failure.
    fn read(&mut self, buf: &mut [i16]) -> Result<ReadOutcome>;

    /// Read and clear a sticky hand-off overflow condition. Default:
    /// never overflows.
    fn take_overflow(&mut self) -> bool {
        false
    }
}

/// An in-memory source, mainly for tests and synthetic inputs.
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: Vec<i16>,
    pos: usize,
}

impl MemorySource {
    /// Wrap a sample buffer.
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, pos: 0 }
    }
}

impl AudioSource for MemorySource {
    fn standby(&mut self, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadOutcome> {
        if self.pos >= self.samples.len() {
            return Ok(ReadOutcome::EndOfStream);
        }
        let n = buf.len().min(self.samples.len() - self.pos);
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(ReadOutcome::Samples(n))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn memory_source_reads_in_chunks() {
        let mut src = MemorySource::new((0..10i16).collect());
        src.standby(16_000).unwrap();
        src.begin().unwrap();
        let mut buf = [0i16; 4];
        assert_eq!(src.read(&mut buf).unwrap(), ReadOutcome::Samples(4));
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(src.read(&mut buf).unwrap(), ReadOutcome::Samples(4));
        assert_eq!(src.read(&mut buf).unwrap(), ReadOutcome::Samples(2));
        assert_eq!(src.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
        src.end().unwrap();
    }
}
