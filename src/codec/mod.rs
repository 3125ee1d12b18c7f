//! Audio decoding
//!
//! Ogg demuxing, Opus decoding and the pump that moves decoded PCM
//! from the stream ring to the PCM ring.

pub mod decoder;
pub mod ogg_opus;
pub mod pump;

pub use decoder::{DecoderStats, OpusDecoder};
pub use ogg_opus::{ForwardReader, OggOpusDecoder, ResyncRead};
pub use pump::{DecodePump, PcmDecoder, PumpStats, RingReader};

/// Decoder used by the player: Ogg/Opus read straight from the stream ring
pub type StreamDecoder = OggOpusDecoder<ForwardReader<RingReader>>;

/// Build the stream decoder on top of a ring reader.
pub fn stream_decoder(reader: RingReader) -> Result<StreamDecoder, crate::error::CodecError> {
    OggOpusDecoder::new(ForwardReader::new(reader))
}
