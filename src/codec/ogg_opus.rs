//! Ogg/Opus stream decoding
//!
//! Demuxes the Ogg container with the `ogg` crate and feeds the packets
//! to [`OpusDecoder`]. The input is a live stream that may restart after
//! a reconnect, so the decoder:
//! - skips audio until it has seen an `OpusHead` packet,
//! - treats every later `OpusHead` as a new logical stream (decoder reset,
//!   new pre-skip),
//! - on a container error rewinds to the end of the last good packet and
//!   starts a fresh page reader on the next `OggS` capture pattern.
//!
//! A page that fails twice from the same place is skipped by one byte
//! before the next scan, so every recovery moves forward.

use ogg::reading::{OggReadError, PacketReader};
use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};

use crate::codec::decoder::OpusDecoder;
use crate::codec::pump::PcmDecoder;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::CodecError;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Bytes kept for rewinding: a maximal Ogg page plus the page reader's
/// capture search window
const HISTORY_LIMIT: usize = 80 * 1024;

/// A forward-only byte source the Ogg demuxer can resynchronize on
pub trait ResyncRead: Read {
    /// Discard input up to the next Ogg capture pattern, leaving the
    /// pattern itself as the next bytes to be read.
    ///
    /// Returns the number of bytes discarded, or `Ok(None)` at end of stream.
    fn resync(&mut self) -> io::Result<Option<usize>>;

    /// Bytes read so far
    fn position(&self) -> u64;

    /// Step back toward `position` as far as retained input allows.
    /// Returns the position actually reached.
    fn rewind_to(&mut self, position: u64) -> u64;
}

/// Adapts any `Read` into a non-seekable source with a bounded rewind
///
/// Recently read bytes are retained so short backward seeks (the page
/// reader overshooting a capture pattern) and decoder recovery can
/// re-read them.
pub struct ForwardReader<R> {
    inner: R,
    pushback: VecDeque<u8>,
    history: VecDeque<u8>,
    position: u64,
}

impl<R: Read> ForwardReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushback: VecDeque::new(),
            history: VecDeque::new(),
            position: 0,
        }
    }

    /// Return the last `n` read bytes to the front of the input.
    fn unread(&mut self, n: usize) {
        let n = n.min(self.history.len());
        let start = self.history.len() - n;
        for byte in self.history.drain(start..).rev() {
            self.pushback.push_front(byte);
        }
        self.position -= n as u64;
    }

    fn remember(&mut self, bytes: &[u8]) {
        self.history.extend(bytes.iter().copied());
        let excess = self.history.len().saturating_sub(HISTORY_LIMIT);
        self.history.drain(..excess);
    }
}

impl<R: Read> Read for ForwardReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = if self.pushback.is_empty() {
            self.inner.read(buf)?
        } else {
            let n = buf.len().min(self.pushback.len());
            for (dst, byte) in buf.iter_mut().zip(self.pushback.drain(..n)) {
                *dst = byte;
            }
            n
        };
        self.remember(&buf[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

/// Position queries and short backward steps only; the stream cannot
/// skip ahead or rewind past its retained history.
impl<R: Read> Seek for ForwardReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            SeekFrom::Current(offset)
                if offset < 0 && offset.unsigned_abs() <= self.history.len() as u64 =>
            {
                self.unread(offset.unsigned_abs() as usize);
                Ok(self.position)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "live stream is not seekable",
            )),
        }
    }
}

impl<R: Read> ResyncRead for ForwardReader<R> {
    fn resync(&mut self) -> io::Result<Option<usize>> {
        let mut window = [0u8; 4];
        let mut filled = 0usize;
        let mut discarded = 0usize;
        let mut byte = [0u8; 1];

        loop {
            if self.read(&mut byte)? == 0 {
                return Ok(None);
            }
            if filled < 4 {
                window[filled] = byte[0];
                filled += 1;
            } else {
                window.rotate_left(1);
                window[3] = byte[0];
                discarded += 1;
            }
            if filled == 4 && &window == CAPTURE_PATTERN {
                self.unread(4);
                return Ok(Some(discarded));
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn rewind_to(&mut self, position: u64) -> u64 {
        let back = self.position.saturating_sub(position);
        self.unread(back.min(self.history.len() as u64) as usize);
        self.position
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    /// No `OpusHead` seen yet
    AwaitingHead,
    /// Head seen; the next packet is `OpusTags`
    AwaitingTags,
    Audio,
}

/// Fields of the `OpusHead` identification header we act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub mapping_family: u8,
}

impl OpusHead {
    pub fn parse(packet: &[u8]) -> Result<Self, CodecError> {
        if packet.len() < 19 || &packet[..8] != b"OpusHead" {
            return Err(CodecError::Container("truncated OpusHead".into()));
        }
        if packet[8] >> 4 != 0 {
            return Err(CodecError::Unsupported(format!("OpusHead version {}", packet[8])));
        }
        Ok(Self {
            channels: packet[9],
            pre_skip: u16::from_le_bytes([packet[10], packet[11]]),
            input_sample_rate: u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]),
            mapping_family: packet[18],
        })
    }
}

/// Ogg/Opus → interleaved stereo PCM
pub struct OggOpusDecoder<R: ResyncRead + Seek> {
    packets: Option<PacketReader<R>>,
    opus: OpusDecoder,
    state: HeaderState,
    pre_skip_remaining: usize,
    streams_started: u64,
    /// Input position just past the last page that yielded a packet
    resume_at: u64,
    /// Where the current page reader was started after an error
    restarted_at: Option<u64>,
}

/// A page reader that tolerates starting in the middle of a stream.
fn page_reader<R: Read + Seek>(source: R) -> Result<PacketReader<R>, CodecError> {
    let mut reader = PacketReader::new(source);
    reader
        .seek_bytes(SeekFrom::Current(0))
        .map_err(|_| CodecError::Interrupted)?;
    Ok(reader)
}

impl<R: ResyncRead + Seek> OggOpusDecoder<R> {
    pub fn new(source: R) -> Result<Self, CodecError> {
        Ok(Self {
            packets: Some(page_reader(source)?),
            opus: OpusDecoder::new(SAMPLE_RATE, CHANNELS)?,
            state: HeaderState::AwaitingHead,
            pre_skip_remaining: 0,
            streams_started: 0,
            resume_at: 0,
            restarted_at: None,
        })
    }

    /// Number of logical streams (`OpusHead` packets) seen so far
    pub fn streams_started(&self) -> u64 {
        self.streams_started
    }

    pub fn opus(&self) -> &OpusDecoder {
        &self.opus
    }

    fn next_packet(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        let reader = self
            .packets
            .as_mut()
            .ok_or(CodecError::Interrupted)?;

        match reader.read_packet() {
            Ok(Some(packet)) => {
                self.resume_at = reader.get_ref().position();
                Ok(Some(packet.data))
            }
            Ok(None) => Ok(None),
            Err(OggReadError::ReadError(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(CodecError::Interrupted)
            }
            Err(e) => {
                let message = e.to_string();
                self.restart_reader()?;
                Err(CodecError::Container(message))
            }
        }
    }

    /// Replace the page reader with a fresh one positioned on a capture
    /// pattern at or after the last good packet. Partial packets of the
    /// old reader are dropped.
    fn restart_reader(&mut self) -> Result<(), CodecError> {
        let Some(reader) = self.packets.take() else {
            return Err(CodecError::Interrupted);
        };
        let mut source = reader.into_inner();

        let from = source.rewind_to(self.resume_at);
        if self.restarted_at == Some(from) {
            // Same page failed again
            io::copy(&mut source.by_ref().take(1), &mut io::sink())
                .map_err(|_| CodecError::Interrupted)?;
        }

        match source.resync() {
            Ok(Some(skipped)) => {
                let at = source.position();
                tracing::debug!("Ogg resync skipped {} bytes, restarting at {}", skipped, at);
                self.resume_at = at;
                self.restarted_at = Some(at);
            }
            Ok(None) => {}
            Err(_) => return Err(CodecError::Interrupted),
        }
        self.packets = Some(page_reader(source)?);
        Ok(())
    }

    fn start_stream(&mut self, head: OpusHead) -> Result<(), CodecError> {
        if head.mapping_family != 0 && head.channels > 2 {
            return Err(CodecError::Unsupported(format!(
                "channel mapping family {} with {} channels",
                head.mapping_family, head.channels
            )));
        }
        if self.streams_started > 0 {
            let stats = self.opus.stats();
            tracing::debug!(
                "Previous stream: {} packets, {} failed",
                stats.packets_decoded,
                stats.packets_failed
            );
        }
        self.opus.reset()?;
        self.pre_skip_remaining = head.pre_skip as usize;
        self.state = HeaderState::AwaitingTags;
        self.streams_started += 1;
        tracing::info!(
            "Opus stream: {} channel(s), original rate {} Hz, pre-skip {}",
            head.channels,
            head.input_sample_rate,
            head.pre_skip
        );
        Ok(())
    }

    /// Drop the first `pre_skip` frames of a stream.
    fn apply_pre_skip(&mut self, out: &mut [i16], frames: usize) -> usize {
        if self.pre_skip_remaining == 0 {
            return frames;
        }
        let skip = self.pre_skip_remaining.min(frames);
        self.pre_skip_remaining -= skip;
        let channels = CHANNELS as usize;
        out.copy_within(skip * channels..frames * channels, 0);
        frames - skip
    }
}

impl<R: ResyncRead + Seek + Send> PcmDecoder for OggOpusDecoder<R> {
    fn decode(&mut self, out: &mut [i16]) -> Result<usize, CodecError> {
        loop {
            let Some(packet) = self.next_packet()? else {
                return Ok(0);
            };

            if packet.starts_with(b"OpusHead") {
                self.start_stream(OpusHead::parse(&packet)?)?;
                continue;
            }

            match self.state {
                HeaderState::AwaitingHead => continue,
                HeaderState::AwaitingTags => {
                    self.state = HeaderState::Audio;
                    if packet.starts_with(b"OpusTags") {
                        continue;
                    }
                    tracing::debug!("OpusTags missing, treating packet as audio");
                }
                HeaderState::Audio => {}
            }

            let frames = self.opus.decode(&packet, out)?;
            let frames = self.apply_pre_skip(out, frames);
            if frames > 0 {
                return Ok(frames);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_DECODE_FRAMES;
    use ogg::writing::{PacketWriteEndInfo, PacketWriter};
    use std::io::Cursor;

    /// CELT 20 ms packet with an empty frame: 960 frames of silence
    const SILENCE: u8 = 0xF8;

    fn opus_head(pre_skip: u16) -> Vec<u8> {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2]);
        head.extend_from_slice(&pre_skip.to_le_bytes());
        head.extend_from_slice(&48000u32.to_le_bytes());
        head.extend_from_slice(&[0, 0, 0]);
        head
    }

    fn opus_tags() -> Vec<u8> {
        let mut tags = b"OpusTags".to_vec();
        tags.extend_from_slice(&0u32.to_le_bytes());
        tags.extend_from_slice(&0u32.to_le_bytes());
        tags
    }

    /// One page per packet
    fn ogg_stream(serial: u32, pre_skip: u16, with_tags: bool, audio_packets: usize) -> Vec<u8> {
        let mut writer = PacketWriter::new(Vec::new());
        writer
            .write_packet(opus_head(pre_skip), serial, PacketWriteEndInfo::EndPage, 0)
            .unwrap();
        if with_tags {
            writer
                .write_packet(opus_tags(), serial, PacketWriteEndInfo::EndPage, 0)
                .unwrap();
        }
        for i in 0..audio_packets {
            let end = if i + 1 == audio_packets {
                PacketWriteEndInfo::EndStream
            } else {
                PacketWriteEndInfo::EndPage
            };
            writer
                .write_packet(vec![SILENCE], serial, end, (i as u64 + 1) * 960)
                .unwrap();
        }
        writer.into_inner()
    }

    fn capture_offsets(bytes: &[u8]) -> Vec<usize> {
        bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == CAPTURE_PATTERN)
            .map(|(i, _)| i)
            .collect()
    }

    fn decoder(bytes: Vec<u8>) -> OggOpusDecoder<ForwardReader<Cursor<Vec<u8>>>> {
        OggOpusDecoder::new(ForwardReader::new(Cursor::new(bytes))).unwrap()
    }

    /// Results of decoding until end of stream
    fn decode_all(decoder: &mut impl PcmDecoder) -> Vec<Result<usize, String>> {
        let mut out = vec![0i16; MAX_DECODE_FRAMES * CHANNELS as usize];
        let mut results = Vec::new();
        loop {
            match decoder.decode(&mut out) {
                Ok(0) => return results,
                Ok(frames) => results.push(Ok(frames)),
                Err(CodecError::Container(_)) => results.push(Err("container".to_string())),
                Err(e) => panic!("unexpected decode error: {}", e),
            }
            assert!(results.len() < 32, "decoder does not reach end of stream");
        }
    }

    #[test]
    fn test_resync_finds_capture_pattern() {
        let mut reader = ForwardReader::new(Cursor::new(b"garbageOggSrest".to_vec()));
        assert_eq!(reader.resync().unwrap(), Some(7));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"OggSrest");
    }

    #[test]
    fn test_resync_at_end_of_stream() {
        let mut reader = ForwardReader::new(Cursor::new(b"no pattern here".to_vec()));
        assert_eq!(reader.resync().unwrap(), None);
    }

    #[test]
    fn test_forward_reader_only_reports_position() {
        let mut reader = ForwardReader::new(Cursor::new(vec![1u8, 2, 3]));
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.stream_position().unwrap(), 2);
        assert!(reader.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn test_parse_opus_head() {
        let mut head = b"OpusHead".to_vec();
        head.extend_from_slice(&[1, 2]);
        head.extend_from_slice(&312u16.to_le_bytes());
        head.extend_from_slice(&44100u32.to_le_bytes());
        head.extend_from_slice(&[0, 0, 0]);

        let parsed = OpusHead::parse(&head).unwrap();
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.pre_skip, 312);
        assert_eq!(parsed.input_sample_rate, 44100);
        assert_eq!(parsed.mapping_family, 0);

        assert!(OpusHead::parse(b"OpusHead").is_err());
    }

    #[test]
    fn test_forward_reader_steps_back_within_history() {
        let mut reader = ForwardReader::new(Cursor::new(b"0123456789".to_vec()));
        let mut buf = [0u8; 6];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.seek(SeekFrom::Current(-4)).unwrap(), 2);
        assert!(reader.seek(SeekFrom::Current(-3)).is_err());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"23456789");
        assert_eq!(reader.rewind_to(5), 5);
    }

    #[test]
    fn test_headers_and_pre_skip() {
        // A foreign stream's audio comes before any OpusHead
        let mut writer = PacketWriter::new(Vec::new());
        writer
            .write_packet(vec![SILENCE], 9, PacketWriteEndInfo::EndPage, 0)
            .unwrap();
        let mut bytes = writer.into_inner();
        bytes.extend(ogg_stream(1, 1000, true, 3));

        let mut decoder = decoder(bytes);
        // First packet is swallowed whole by the pre-skip
        assert_eq!(decode_all(&mut decoder), vec![Ok(920), Ok(960)]);
        assert_eq!(decoder.streams_started(), 1);
        assert_eq!(decoder.opus().stats().packets_decoded, 3);
    }

    #[test]
    fn test_missing_tags_and_chained_stream() {
        let mut bytes = ogg_stream(1, 0, false, 2);
        bytes.extend(ogg_stream(2, 480, true, 2));

        let mut decoder = decoder(bytes);
        assert_eq!(
            decode_all(&mut decoder),
            vec![Ok(960), Ok(960), Ok(480), Ok(960)]
        );
        assert_eq!(decoder.streams_started(), 2);
    }

    #[test]
    fn test_restart_with_reused_serial() {
        let mut bytes = ogg_stream(1, 0, true, 2);
        bytes.extend(ogg_stream(1, 480, true, 1));

        let mut decoder = decoder(bytes);
        assert_eq!(
            decode_all(&mut decoder),
            vec![Ok(960), Ok(960), Err("container".into()), Ok(480)]
        );
        assert_eq!(decoder.streams_started(), 2);
    }

    #[test]
    fn test_garbage_before_first_page() {
        let mut bytes = vec![b'x'; 100];
        bytes.extend(ogg_stream(1, 0, true, 2));

        let mut decoder = decoder(bytes);
        assert_eq!(decode_all(&mut decoder), vec![Ok(960), Ok(960)]);
    }

    #[test]
    fn test_recovers_from_garbage_inside_page() {
        let mut bytes = ogg_stream(1, 0, true, 4);
        // head, tags, four audio pages; corrupt the second audio page
        let pages = capture_offsets(&bytes);
        assert_eq!(pages.len(), 6);
        let at = pages[3] + 14;
        bytes.splice(at..at, vec![0xAA; 64]);

        let mut decoder = decoder(bytes);
        assert_eq!(
            decode_all(&mut decoder),
            vec![
                Ok(960),
                Err("container".into()),
                Err("container".into()),
                Ok(960),
                Ok(960),
            ]
        );
    }

    #[test]
    fn test_reconnect_mid_page_keeps_new_stream_head() {
        let first = ogg_stream(1, 0, true, 3);
        let pages = capture_offsets(&first);
        // Cut after the last page's header and lacing, before its body
        let mut bytes = first[..pages[4] + 28].to_vec();
        bytes.extend(ogg_stream(2, 0, true, 2));

        let mut decoder = decoder(bytes);
        assert_eq!(
            decode_all(&mut decoder),
            vec![
                Ok(960),
                Ok(960),
                Err("container".into()),
                Err("container".into()),
                Ok(960),
                Ok(960),
            ]
        );
        assert_eq!(decoder.streams_started(), 2);
    }
}
