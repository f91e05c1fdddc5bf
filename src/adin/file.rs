//! File-based audio sources: WAV and headerless raw PCM.

use super::{AudioSource, ReadOutcome};
use crate::error::{DecodeError, Result};
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

/// WAV file source. Multi-channel files are mixed down to mono.
pub struct WavFileSource {
    path: PathBuf,
    sample_rate: u32,
    samples: Vec<i16>,
    pos: usize,
}

impl WavFileSource {
    /// Create a source for the given file; nothing is read until
    /// [`AudioSource::begin`].
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            sample_rate: 16_000,
            samples: Vec::new(),
            pos: 0,
        }
    }
}

impl AudioSource for WavFileSource {
    fn standby(&mut self, sample_rate: u32) -> Result<()> {
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        let mut reader = hound::WavReader::open(&self.path)
            .map_err(|e| DecodeError::Audio(format!("cannot open WAV {}: {e}", self.path.display())))?;
        let spec = reader.spec();
        if spec.sample_rate != self.sample_rate {
            return Err(DecodeError::Audio(format!(
                "WAV {} is {}Hz, engine requires {}Hz",
                self.path.display(),
                spec.sample_rate,
                self.sample_rate
            )));
        }
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(DecodeError::Audio(format!(
                "WAV {} is not 16-bit PCM",
                self.path.display()
            )));
        }
        let interleaved: Vec<i16> = reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| DecodeError::Audio(format!("WAV read error: {e}")))?;
        self.samples = if spec.channels > 1 {
            let ch = spec.channels as usize;
            interleaved
                .chunks(ch)
                .map(|frame| {
                    (frame.iter().map(|&s| i32::from(s)).sum::<i32>() / ch as i32) as i16
                })
                .collect()
        } else {
            interleaved
        };
        self.pos = 0;
        info!(
            "opened WAV {}: {} samples",
            self.path.display(),
            self.samples.len()
        );
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.samples.clear();
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

/// Headerless raw PCM source: 16-bit signed little-endian mono.
pub struct RawFileSource {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl RawFileSource {
    /// Create a source for the given file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }
}

impl AudioSource for RawFileSource {
    fn standby(&mut self, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.file = Some(std::fs::File::open(&self.path).map_err(|e| {
            DecodeError::Audio(format!("cannot open raw file {}: {e}", self.path.display()))
        })?);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadOutcome> {
        let Some(file) = &mut self.file else {
            return Ok(ReadOutcome::EndOfStream);
        };
        let mut bytes = vec![0u8; buf.len() * 2];
        let n = file.read(&mut bytes)?;
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        let samples = n / 2;
        for (i, chunk) in bytes[..samples * 2].chunks_exact(2).enumerate() {
            buf[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(ReadOutcome::Samples(samples))
    }
}

/// Raw PCM on standard input.
pub struct StdinSource;

impl AudioSource for StdinSource {
    fn standby(&mut self, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadOutcome> {
        let mut bytes = vec![0u8; buf.len() * 2];
        let n = std::io::stdin().lock().read(&mut bytes)?;
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        let samples = n / 2;
        for (i, chunk) in bytes[..samples * 2].chunks_exact(2).enumerate() {
            buf[i] = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(ReadOutcome::Samples(samples))
    }
}
