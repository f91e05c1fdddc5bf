//! Network audio input: a TCP server receiving framed PCM.
//!
//! Wire format, all integers big-endian: repeated records of a 4-byte
//! length followed by that many bytes of 16-bit big-endian PCM. A
//! zero-length record marks end-of-segment (the connection stays open
//! for the next segment); a negative length marks end-of-stream.
//! Control bytes sent back to the client: `'0'` pause, `'1'` resume,
//! `'2'` terminate.

use super::{AudioSource, ReadOutcome};
use crate::error::{DecodeError, Result};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use tracing::info;

/// TCP audio server source.
pub struct TcpSource {
    port: u16,
    listener: Option<TcpListener>,
    conn: Option<TcpStream>,
    /// Samples decoded but not yet handed to the caller.
    pending: Vec<i16>,
    /// True when the last segment ended with an end-of-segment record,
    /// so the connection is kept for the next segment.
    last_is_segmented: bool,
}

impl TcpSource {
    /// Create a server source listening on `port`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            listener: None,
            conn: None,
            pending: Vec::new(),
            last_is_segmented: false,
        }
    }

    fn send_control(&mut self, byte: u8) -> Result<()> {
        if let Some(conn) = &mut self.conn {
            conn.write_all(&[byte])
                .map_err(|e| DecodeError::Audio(format!("control send failed: {e}")))?;
        }
        Ok(())
    }

    /// Receive one framed record into `pending`. Returns the outcome.
    fn fill(&mut self) -> Result<ReadOutcome> {
        let Some(conn) = &mut self.conn else {
            return Ok(ReadOutcome::EndOfStream);
        };
        let mut head = [0u8; 4];
        if let Err(e) = conn.read_exact(&mut head) {
            // A closed connection ends the stream.
            info!("audio connection closed: {e}");
            self.conn = None;
            self.last_is_segmented = false;
            return Ok(ReadOutcome::EndOfStream);
        }
        let len = i32::from_be_bytes(head);
        if len < 0 {
            self.conn = None;
            self.last_is_segmented = false;
            return Ok(ReadOutcome::EndOfStream);
        }
        if len == 0 {
            self.last_is_segmented = true;
            return Ok(ReadOutcome::EndOfSegment);
        }
        if len % 2 != 0 {
            return Err(DecodeError::Audio(format!(
                "odd audio record length {len}"
            )));
        }
        let mut body = vec![0u8; len as usize];
        conn.read_exact(&mut body)
            .map_err(|e| DecodeError::Audio(format!("audio receive failed: {e}")))?;
        self.pending
            .extend(body.chunks_exact(2).map(|c| i16::from_be_bytes([c[0], c[1]])));
        Ok(ReadOutcome::Samples(self.pending.len()))
    }
}

impl AudioSource for TcpSource {
    fn standby(&mut self, _sample_rate: u32) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .map_err(|e| DecodeError::Audio(format!("cannot listen on port {}: {e}", self.port)))?;
        info!("audio server listening on port {}", self.port);
        self.listener = Some(listener);
        self.last_is_segmented = false;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.last_is_segmented && self.conn.is_some() {
            // Keep the connection for the next segment.
            return Ok(());
        }
        let Some(listener) = &self.listener else {
            return Err(DecodeError::Audio("server not standing by".into()));
        };
        info!("waiting for audio client connection");
        let (conn, peer) = listener
            .accept()
            .map_err(|e| DecodeError::Audio(format!("accept failed: {e}")))?;
        info!("audio client connected from {peer}");
        self.conn = Some(conn);
        self.pending.clear();
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if !self.last_is_segmented {
            self.conn = None;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.send_control(b'0')
    }

    fn resume(&mut self) -> Result<()> {
        self.send_control(b'1')
    }

    fn terminate(&mut self) -> Result<()> {
        self.send_control(b'2')
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<ReadOutcome> {
        if self.pending.is_empty() {
            match self.fill()? {
                ReadOutcome::Samples(_) => {}
                other => return Ok(other),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(ReadOutcome::Samples(n))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::net::TcpStream;

    fn frame(samples: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((samples.len() * 2) as i32).to_be_bytes());
        for &s in samples {
            out.extend_from_slice(&s.to_be_bytes());
        }
        out
    }

    #[test]
    fn receives_framed_pcm_and_segment_marks() {
        let mut src = TcpSource::new(0);
        // Bind on an ephemeral port for the test.
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        src.listener = Some(listener);

        let client = std::thread::spawn(move || {
            let mut conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
            conn.write_all(&frame(&[1, -2, 3])).unwrap();
            conn.write_all(&0i32.to_be_bytes()).unwrap(); // end of segment
            conn.write_all(&frame(&[7])).unwrap();
            conn.write_all(&(-1i32).to_be_bytes()).unwrap(); // end of stream
        });

        src.begin().unwrap();
        let mut buf = [0i16; 16];
        let ReadOutcome::Samples(n) = src.read(&mut buf).unwrap() else {
            panic!("expected samples");
        };
        assert_eq!(&buf[..n], &[1, -2, 3]);
        assert_eq!(src.read(&mut buf).unwrap(), ReadOutcome::EndOfSegment);
        src.end().unwrap();

        // Next segment reuses the connection.
        src.begin().unwrap();
        let ReadOutcome::Samples(n) = src.read(&mut buf).unwrap() else {
            panic!("expected samples");
        };
        assert_eq!(&buf[..n], &[7]);
        assert_eq!(src.read(&mut buf).unwrap(), ReadOutcome::EndOfStream);
        client.join().unwrap();
    }
}
