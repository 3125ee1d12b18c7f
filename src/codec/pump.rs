//! Decode pump: stream ring → decoder → PCM ring
//!
//! The pump owns the decoder and runs on the `decoder` thread. It pulls
//! compressed bytes through a [`RingReader`], converts each decoded chunk
//! to little-endian PCM and pushes it into the PCM ring. Before every
//! decode it waits until the PCM ring can take a worst-case chunk, so a
//! full ring applies backpressure all the way to the network.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{BYTES_PER_FRAME, CHANNELS, MAX_DECODE_FRAMES};
use crate::error::CodecError;
use crate::ring::SharedByteRing;
use crate::sync::Shutdown;

/// Pull-style PCM decoder
pub trait PcmDecoder: Send {
    /// Decode the next chunk into `out` (interleaved stereo `i16`).
    ///
    /// Returns the number of frames written; `Ok(0)` means the input
    /// ended and nothing more will be produced.
    fn decode(&mut self, out: &mut [i16]) -> Result<usize, CodecError>;
}

/// Blocking `Read` over a byte ring
///
/// Reads wait for data. End-of-stream on the ring reads as `Ok(0)`;
/// shutdown reads as a `BrokenPipe` error so callers that retry
/// `Interrupted` still give up.
pub struct RingReader {
    ring: SharedByteRing,
    shutdown: Arc<Shutdown>,
}

impl RingReader {
    pub fn new(ring: SharedByteRing, shutdown: Arc<Shutdown>) -> Self {
        Self { ring, shutdown }
    }
}

impl Read for RingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.ring.pop_blocking(buf, &self.shutdown) {
            Some(n) => Ok(n),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "shutdown")),
        }
    }
}

/// Decode pump counters
#[derive(Debug, Default)]
pub struct PumpStats {
    chunks: AtomicU64,
    frames: AtomicU64,
    errors: AtomicU64,
    backpressure_waits: AtomicU64,
}

impl PumpStats {
    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn backpressure_waits(&self) -> u64 {
        self.backpressure_waits.load(Ordering::Relaxed)
    }
}

/// Moves decoded PCM into the PCM ring
pub struct DecodePump<D: PcmDecoder> {
    decoder: D,
    pcm: SharedByteRing,
    shutdown: Arc<Shutdown>,
    retry_delay: Duration,
    stats: Arc<PumpStats>,
}

impl<D: PcmDecoder> DecodePump<D> {
    pub fn new(
        decoder: D,
        pcm: SharedByteRing,
        shutdown: Arc<Shutdown>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            decoder,
            pcm,
            shutdown,
            retry_delay,
            stats: Arc::new(PumpStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PumpStats> {
        self.stats.clone()
    }

    /// Run until the decoder reports end of input or shutdown.
    /// Marks the PCM ring end-of-stream on exit.
    pub fn run(mut self) {
        tracing::info!("Decode pump started");

        let channels = CHANNELS as usize;
        let chunk_bytes = MAX_DECODE_FRAMES * BYTES_PER_FRAME;
        let mut samples = vec![0i16; MAX_DECODE_FRAMES * channels];
        let mut bytes = Vec::with_capacity(chunk_bytes);
        let mut consecutive_errors = 0u32;

        while !self.shutdown.is_triggered() {
            if self.pcm.free_space() < chunk_bytes {
                self.stats.backpressure_waits.fetch_add(1, Ordering::Relaxed);
                self.pcm.writable_event().wait_timeout(self.retry_delay);
                continue;
            }

            match self.decoder.decode(&mut samples) {
                Ok(0) => {
                    tracing::info!("Decoder reached end of input");
                    break;
                }
                Ok(frames) => {
                    consecutive_errors = 0;
                    bytes.clear();
                    for sample in &samples[..frames * channels] {
                        bytes.extend_from_slice(&sample.to_le_bytes());
                    }
                    let pushed = self.pcm.push_all(&bytes, &self.shutdown);
                    self.stats.chunks.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .frames
                        .fetch_add((pushed / BYTES_PER_FRAME) as u64, Ordering::Relaxed);
                }
                Err(CodecError::Interrupted) => break,
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    if consecutive_errors == 0 {
                        tracing::warn!("Decode error: {}", e);
                    } else {
                        tracing::debug!("Decode error ({} in a row): {}", consecutive_errors + 1, e);
                    }
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.shutdown.sleep(self.retry_delay);
                }
            }
        }

        self.pcm.set_eof();
        self.pcm.wake_all();
        tracing::info!(
            "Decode pump stopped ({} chunks, {} errors)",
            self.stats.chunks(),
            self.stats.errors()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::ByteRing;
    use std::collections::VecDeque;
    use std::thread;

    /// Replays a fixed script of decode results
    struct Scripted(VecDeque<Result<Vec<i16>, CodecError>>);

    impl PcmDecoder for Scripted {
        fn decode(&mut self, out: &mut [i16]) -> Result<usize, CodecError> {
            match self.0.pop_front() {
                Some(Ok(samples)) => {
                    out[..samples.len()].copy_from_slice(&samples);
                    Ok(samples.len() / CHANNELS as usize)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_pcm_is_little_endian_and_ordered() {
        let pcm = Arc::new(ByteRing::new(64 * 1024));
        let shutdown = Shutdown::new();
        let script = VecDeque::from(vec![
            Ok(vec![1i16, -1]),
            Err(CodecError::DecodingFailed("corrupt".into())),
            Ok(vec![0x0102, 0x0304, 5, 6]),
        ]);

        let pump = DecodePump::new(
            Scripted(script),
            pcm.clone(),
            shutdown,
            Duration::from_millis(1),
        );
        let stats = pump.stats();
        pump.run();

        let mut out = vec![0u8; 64];
        let n = pcm.pop(&mut out);
        assert_eq!(
            &out[..n],
            &[1, 0, 0xFF, 0xFF, 0x02, 0x01, 0x04, 0x03, 5, 0, 6, 0]
        );
        assert!(pcm.is_eof());
        assert_eq!(stats.chunks(), 2);
        assert_eq!(stats.frames(), 3);
        assert_eq!(stats.errors(), 1);
    }

    #[test]
    fn test_full_pcm_ring_applies_backpressure() {
        // Room for less than one worst-case chunk
        let pcm = Arc::new(ByteRing::new(MAX_DECODE_FRAMES * BYTES_PER_FRAME - 4));
        let shutdown = Shutdown::new();
        let script = VecDeque::from(vec![Ok(vec![7i16, 7])]);

        let pump = DecodePump::new(
            Scripted(script),
            pcm.clone(),
            shutdown.clone(),
            Duration::from_millis(5),
        );
        let stats = pump.stats();
        let handle = thread::spawn(move || pump.run());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(stats.chunks(), 0);
        assert!(stats.backpressure_waits() > 0);

        shutdown.trigger();
        handle.join().unwrap();
        assert!(pcm.is_empty());
        assert!(pcm.is_eof());
    }

    #[test]
    fn test_ring_reader_reports_eof_and_shutdown() {
        let ring = Arc::new(ByteRing::new(16));
        let shutdown = Shutdown::new();
        ring.push(b"abc");
        ring.set_eof();

        let mut reader = RingReader::new(ring.clone(), shutdown.clone());
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        shutdown.trigger();
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
