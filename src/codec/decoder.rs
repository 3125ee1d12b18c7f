//! Opus packet decoder
//!
//! Thin wrapper over libopus that decodes one packet at a time into
//! interleaved `i16` PCM and keeps per-stream counters.

use opus::{Channels, Decoder};

use crate::constants::MAX_DECODE_FRAMES;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    stats: DecoderStats,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let layout = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::DecoderInit(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let decoder = Decoder::new(sample_rate, layout)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            channels: channels as usize,
            stats: DecoderStats::default(),
        })
    }

    /// Decode one packet into `out`, which must hold a worst-case
    /// (120 ms) packet. Returns frames (samples per channel) written.
    pub fn decode(&mut self, packet: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        let needed = MAX_DECODE_FRAMES * self.channels;
        if out.len() < needed {
            return Err(CodecError::BufferTooSmall(out.len()));
        }

        match self.decoder.decode(packet, out, false) {
            Ok(frames) => {
                self.stats.packets_decoded += 1;
                self.stats.frames_produced += frames as u64;
                Ok(frames)
            }
            Err(e) => {
                self.stats.packets_failed += 1;
                Err(CodecError::DecodingFailed(e.to_string()))
            }
        }
    }

    /// Forget inter-packet state; used when a new logical stream starts.
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats.clone()
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub packets_decoded: u64,
    pub packets_failed: u64,
    pub frames_produced: u64,
}

impl DecoderStats {
    pub fn failure_rate(&self) -> f32 {
        let total = self.packets_decoded + self.packets_failed;
        if total == 0 {
            0.0
        } else {
            self.packets_failed as f32 / total as f32
        }
    }
}
