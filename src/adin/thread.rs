//! Threaded capture wrapper.
//!
//! Runs an [`AudioSource`] on its own producer thread and hands sample
//! fragments to the decoding side over a bounded channel. When the
//! consumer falls behind and the channel fills up, a sticky overflow
//! flag is raised; the engine reads and clears it and force-terminates
//! the current utterance.

use super::{AudioSource, ReadOutcome};
use crate::error::{DecodeError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::warn;

/// Capture fragment size in samples.
const FRAGMENT_SAMPLES: usize = 1600;
/// Bounded hand-off capacity in fragments.
const CHANNEL_FRAGMENTS: usize = 32;

enum Fragment {
    Samples(Vec<i16>),
    EndOfSegment,
    EndOfStream,
    Error(String),
}

/// A source wrapper running capture on a separate thread.
pub struct ThreadedSource {
    rx: Receiver<Fragment>,
    handle: Option<JoinHandle<()>>,
    /// Raised by the producer on hand-off overflow.
    overflowed: Arc<AtomicBool>,
    /// While false, captured samples are discarded instead of queued.
    transfer_online: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    /// Samples of the current fragment not yet consumed.
    pending: Vec<i16>,
}

impl ThreadedSource {
    /// Spawn the capture thread over an already standing-by source.
    ///
    /// # Errors
    ///
    /// Returns an error when the inner source fails to begin.
    pub fn spawn(mut inner: Box<dyn AudioSource + Send>) -> Result<Self> {
        inner.begin()?;

        let (tx, rx): (Sender<Fragment>, Receiver<Fragment>) = bounded(CHANNEL_FRAGMENTS);
        let overflowed = Arc::new(AtomicBool::new(false));
        let transfer_online = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));

        let t_overflow = Arc::clone(&overflowed);
        let t_online = Arc::clone(&transfer_online);
        let t_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let mut buf = vec![0i16; FRAGMENT_SAMPLES];
            loop {
                if t_stop.load(Ordering::Relaxed) {
                    break;
                }
                match inner.read(&mut buf) {
                    Ok(ReadOutcome::Samples(n)) => {
                        if !t_online.load(Ordering::Relaxed) {
                            continue;
                        }
                        match tx.try_send(Fragment::Samples(buf[..n].to_vec())) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                t_overflow.store(true, Ordering::Relaxed);
                            }
                            Err(TrySendError::Disconnected(_)) => break,
                        }
                    }
                    Ok(ReadOutcome::EndOfSegment) => {
                        if tx.send(Fragment::EndOfSegment).is_err() {
                            break;
                        }
                    }
                    Ok(ReadOutcome::EndOfStream) => {
                        let _ = tx.send(Fragment::EndOfStream);
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Fragment::Error(e.to_string()));
                        break;
                    }
                }
            }
            let _ = inner.end();
        });

        Ok(Self {
            rx,
            handle: Some(handle),
            overflowed,
            transfer_online,
            stop,
            pending: Vec::new(),
        })
    }

    /// Enable or disable sample transfer (the thread keeps capturing).
    pub fn set_transfer_online(&self, online: bool) {
        self.transfer_online.store(online, Ordering::Relaxed);
    }
}

impl AudioSource for ThreadedSource {
    fn standby(&mut self, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.set_transfer_online(false);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.set_transfer_online(true);
        Ok(())
    }

    fn take_overflow(&mut self) -> bool {
        self.overflowed.swap(false, Ordering::Relaxed)
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadOutcome> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(Fragment::Samples(samples)) => self.pending = samples,
                Ok(Fragment::EndOfSegment) => return Ok(ReadOutcome::EndOfSegment),
                Ok(Fragment::EndOfStream) | Err(_) => return Ok(ReadOutcome::EndOfStream),
                Ok(Fragment::Error(message)) => {
                    warn!("capture thread error: {message}");
                    return Err(DecodeError::Audio(message));
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(ReadOutcome::Samples(n))
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Unblock the producer by draining, then join.
        while self.rx.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
