//! VBAN header codec
//!
//! Every VBAN datagram starts with a fixed 28-byte header:
//!
//! ```text
//! 0      4      5      6      7      8                      24         28
//! ┌──────┬──────┬──────┬──────┬──────┬──────────────────────┬──────────┬─────────
//! │"VBAN"│SR|SP │N-1   │C-1   │FMT   │ stream name (16, NUL)│ counter  │ payload
//! └──────┴──────┴──────┴──────┴──────┴──────────────────────┴──────────┴─────────
//! ```
//!
//! Byte 4 packs the rate index (bits 0-4) and the sub-protocol (bits 5-7).
//! For audio the rate index points into [`SAMPLE_RATES`]; for text it points
//! into [`BAUD_RATES`](super::text::BAUD_RATES). The frame counter is
//! little-endian.
//!
//! Everything in here is pure: no I/O, no allocation beyond the stream name.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::text::BAUD_RATES;
use crate::error::ProtocolError;

/// Header length in bytes
pub const HEADER_LEN: usize = 28;

/// Magic bytes at the start of every packet
pub const MAGIC: [u8; 4] = *b"VBAN";

/// Maximum stream name length in bytes
pub const STREAM_NAME_LEN: usize = 16;

/// Data format code for interleaved signed 16-bit PCM
pub const DATA_FORMAT_INT16: u8 = 0x01;

/// Sample rate table indexed by the low 5 bits of byte 4
pub const SAMPLE_RATES: [u32; 21] = [
    6000, 12000, 24000, 48000, 96000, 192000, 384000, 8000, 16000, 32000, 64000, 128000, 256000,
    512000, 11025, 22050, 44100, 88200, 176400, 352800, 705600,
];

const NAME_OFFSET: usize = 8;
const RATE_INDEX_MASK: u8 = 0x1F;
const SUB_PROTOCOL_SHIFT: u8 = 5;

/// Sub-protocol carried in the top 3 bits of byte 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubProtocol {
    Audio,
    Serial,
    Text,
    /// Anything else; decoded so the caller can decide to drop it
    Other(u8),
}

impl SubProtocol {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => SubProtocol::Audio,
            1 => SubProtocol::Serial,
            2 => SubProtocol::Text,
            n => SubProtocol::Other(n),
        }
    }

    /// Entries in the table the rate index selects from: baud rates for
    /// serial and text, sample rates otherwise.
    pub fn rate_table_len(self) -> usize {
        match self {
            SubProtocol::Serial | SubProtocol::Text => BAUD_RATES.len(),
            SubProtocol::Audio | SubProtocol::Other(_) => SAMPLE_RATES.len(),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            SubProtocol::Audio => 0,
            SubProtocol::Serial => 1,
            SubProtocol::Text => 2,
            SubProtocol::Other(n) => n & 0x07,
        }
    }
}

/// Decoded VBAN header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbanHeader {
    pub sub_protocol: SubProtocol,
    /// Raw 5-bit rate index; meaning depends on `sub_protocol`
    pub rate_index: u8,
    /// Samples per channel in this packet (1..=256)
    pub samples_per_frame: u16,
    /// Channel count (1..=256)
    pub channels: u16,
    pub data_format: u8,
    pub stream_name: String,
    pub frame_counter: u32,
}

impl VbanHeader {
    /// Build an audio header, looking up the rate index for `sample_rate`.
    pub fn audio(
        stream_name: impl Into<String>,
        sample_rate: u32,
        samples_per_frame: u16,
        channels: u16,
        frame_counter: u32,
    ) -> Result<Self, ProtocolError> {
        let rate_index = sample_rate_index(sample_rate)?;
        Ok(Self {
            sub_protocol: SubProtocol::Audio,
            rate_index,
            samples_per_frame,
            channels,
            data_format: DATA_FORMAT_INT16,
            stream_name: stream_name.into(),
            frame_counter,
        })
    }

    /// Sample rate in Hz, if this is an audio header
    pub fn sample_rate(&self) -> Option<u32> {
        match self.sub_protocol {
            SubProtocol::Audio => SAMPLE_RATES.get(self.rate_index as usize).copied(),
            _ => None,
        }
    }

    /// Whether the packet carries PCM audio
    pub fn is_audio(&self) -> bool {
        self.sub_protocol == SubProtocol::Audio
    }
}

/// Reverse lookup into [`SAMPLE_RATES`]
pub fn sample_rate_index(sample_rate: u32) -> Result<u8, ProtocolError> {
    SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .map(|i| i as u8)
        .ok_or(ProtocolError::UnsupportedSampleRate(sample_rate))
}

/// Parse the 28-byte header at the start of `data`.
///
/// Fails on short input, wrong magic, or a rate index past the end of its
/// table. Non-audio sub-protocols otherwise decode; filtering is up to the
/// caller.
pub fn decode_header(data: &[u8]) -> Result<VbanHeader, ProtocolError> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort(data.len()));
    }

    let mut buf = &data[..HEADER_LEN];

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let sr_sp = buf.get_u8();
    let rate_index = sr_sp & RATE_INDEX_MASK;
    let sub_protocol = SubProtocol::from_bits(sr_sp >> SUB_PROTOCOL_SHIFT);
    if rate_index as usize >= sub_protocol.rate_table_len() {
        return Err(ProtocolError::SampleRateIndex(rate_index));
    }

    let samples_per_frame = buf.get_u8() as u16 + 1;
    let channels = buf.get_u8() as u16 + 1;
    let data_format = buf.get_u8();

    let name_bytes = &data[NAME_OFFSET..NAME_OFFSET + STREAM_NAME_LEN];
    let name_end = name_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(STREAM_NAME_LEN);
    let stream_name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();
    buf.advance(STREAM_NAME_LEN);

    let frame_counter = buf.get_u32_le();

    Ok(VbanHeader {
        sub_protocol,
        rate_index,
        samples_per_frame,
        channels,
        data_format,
        stream_name,
        frame_counter,
    })
}

/// Serialize a header into its 28-byte wire form.
pub fn encode_header(header: &VbanHeader) -> Result<[u8; HEADER_LEN], ProtocolError> {
    let name = header.stream_name.as_bytes();
    if name.len() > STREAM_NAME_LEN {
        return Err(ProtocolError::StreamNameTooLong(name.len()));
    }
    if !(1..=256).contains(&header.samples_per_frame) {
        return Err(ProtocolError::SamplesPerFrame(header.samples_per_frame));
    }
    if !(1..=256).contains(&header.channels) {
        return Err(ProtocolError::Channels(header.channels));
    }
    if header.rate_index as usize >= header.sub_protocol.rate_table_len() {
        return Err(ProtocolError::SampleRateIndex(header.rate_index));
    }

    let mut out = [0u8; HEADER_LEN];
    let mut buf = &mut out[..];
    buf.put_slice(&MAGIC);
    buf.put_u8(
        (header.sub_protocol.bits() << SUB_PROTOCOL_SHIFT) | (header.rate_index & RATE_INDEX_MASK),
    );
    buf.put_u8((header.samples_per_frame - 1) as u8);
    buf.put_u8((header.channels - 1) as u8);
    buf.put_u8(header.data_format);
    buf.put_slice(name);
    buf.put_bytes(0, STREAM_NAME_LEN - name.len());
    buf.put_u32_le(header.frame_counter);

    Ok(out)
}

/// Header followed by `payload`, ready to send.
pub fn encode_packet(header: &VbanHeader, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let head = encode_header(header)?;
    let mut packet = BytesMut::with_capacity(HEADER_LEN + payload.len());
    packet.put_slice(&head);
    packet.put_slice(payload);
    Ok(packet.freeze())
}

/// Bytes following the header; empty when the packet is header-only or short.
pub fn payload(data: &[u8]) -> &[u8] {
    data.get(HEADER_LEN..).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_header() -> VbanHeader {
        VbanHeader::audio("Stream1", 48000, 256, 2, 7).unwrap()
    }

    #[test]
    fn test_known_layout() {
        let bytes = encode_header(&sample_header()).unwrap();

        assert_eq!(&bytes[0..4], b"VBAN");
        assert_eq!(bytes[4], 3); // 48 kHz, audio
        assert_eq!(bytes[5], 255);
        assert_eq!(bytes[6], 1);
        assert_eq!(bytes[7], DATA_FORMAT_INT16);
        assert_eq!(&bytes[8..15], b"Stream1");
        assert!(bytes[15..24].iter().all(|&b| b == 0));
        assert_eq!(&bytes[24..28], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_decode_sub_protocol_and_counter() {
        let mut bytes = encode_header(&sample_header()).unwrap();
        bytes[4] = (2 << 5) | 4;
        bytes[24..28].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());

        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.sub_protocol, SubProtocol::Text);
        assert_eq!(header.rate_index, 4);
        assert_eq!(header.sample_rate(), None);
        assert_eq!(header.frame_counter, 0xDEADBEEF);
    }

    #[test]
    fn test_unsupported_sub_protocol_decodes() {
        let mut bytes = encode_header(&sample_header()).unwrap();
        bytes[4] = (5 << 5) | 3;

        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.sub_protocol, SubProtocol::Other(5));
        assert!(!header.is_audio());
    }

    #[test]
    fn test_rate_index_checked_per_table() {
        let mut bytes = encode_header(&sample_header()).unwrap();

        // Baud table is longer than the sample rate table
        bytes[4] = (1 << 5) | 22;
        assert_eq!(decode_header(&bytes).unwrap().sub_protocol, SubProtocol::Serial);
        bytes[4] = (2 << 5) | 24;
        assert_eq!(decode_header(&bytes).unwrap().rate_index, 24);

        bytes[4] = (2 << 5) | 31;
        assert_eq!(decode_header(&bytes), Err(ProtocolError::SampleRateIndex(31)));
        bytes[4] = (1 << 5) | 25;
        assert_eq!(decode_header(&bytes), Err(ProtocolError::SampleRateIndex(25)));
        bytes[4] = (5 << 5) | 30;
        assert_eq!(decode_header(&bytes), Err(ProtocolError::SampleRateIndex(30)));
    }

    #[test]
    fn test_encode_rejects_rate_index() {
        let mut header = sample_header();
        header.sub_protocol = SubProtocol::Text;
        header.rate_index = 25;
        assert_eq!(encode_header(&header), Err(ProtocolError::SampleRateIndex(25)));
    }

    #[test]
    fn test_reject_short() {
        let bytes = encode_header(&sample_header()).unwrap();
        assert_eq!(decode_header(&bytes[..27]), Err(ProtocolError::TooShort(27)));
        assert_eq!(decode_header(&[]), Err(ProtocolError::TooShort(0)));
    }

    #[test]
    fn test_reject_bad_magic() {
        let mut bytes = encode_header(&sample_header()).unwrap();
        bytes[0] = b'X';
        assert_eq!(
            decode_header(&bytes),
            Err(ProtocolError::BadMagic(*b"XBAN"))
        );
    }

    #[test]
    fn test_reject_rate_index() {
        let mut bytes = encode_header(&sample_header()).unwrap();
        bytes[4] = 21;
        assert_eq!(decode_header(&bytes), Err(ProtocolError::SampleRateIndex(21)));
    }

    #[test]
    fn test_stream_name_limits() {
        let mut header = sample_header();
        header.stream_name = "exactly16bytes!!".to_string();
        let bytes = encode_header(&header).unwrap();
        assert_eq!(decode_header(&bytes).unwrap().stream_name, "exactly16bytes!!");

        header.stream_name = "seventeen bytes!!".to_string();
        assert_eq!(
            encode_header(&header),
            Err(ProtocolError::StreamNameTooLong(17))
        );
    }

    #[test]
    fn test_unknown_sample_rate() {
        assert_eq!(
            VbanHeader::audio("x", 47999, 256, 2, 0),
            Err(ProtocolError::UnsupportedSampleRate(47999))
        );
    }

    #[test]
    fn test_packet_payload() {
        let packet = encode_packet(&sample_header(), &[1, 2, 3]).unwrap();
        assert_eq!(packet.len(), HEADER_LEN + 3);
        assert_eq!(payload(&packet), &[1, 2, 3]);
        assert!(payload(&packet[..HEADER_LEN]).is_empty());
        assert!(payload(&packet[..5]).is_empty());
    }

    fn audio_header() -> impl Strategy<Value = VbanHeader> {
        (
            0u8..21,
            1u16..=256,
            1u16..=256,
            any::<u8>(),
            "[A-Za-z0-9 _-]{0,16}",
            any::<u32>(),
        )
            .prop_map(|(rate_index, spf, ch, fmt, name, counter)| VbanHeader {
                sub_protocol: SubProtocol::Audio,
                rate_index,
                samples_per_frame: spf,
                channels: ch,
                data_format: fmt,
                stream_name: name,
                frame_counter: counter,
            })
    }

    proptest! {
        #[test]
        fn prop_header_round_trip(header in audio_header()) {
            let bytes = encode_header(&header).unwrap();
            prop_assert_eq!(decode_header(&bytes).unwrap(), header);
        }

        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_header(&data);
        }

        #[test]
        fn prop_corrupted_magic_rejected(
            header in audio_header(),
            pos in 0usize..4,
            flip in 1u8..=255,
        ) {
            let mut bytes = encode_header(&header).unwrap();
            bytes[pos] ^= flip;
            let rejected = matches!(decode_header(&bytes), Err(ProtocolError::BadMagic(_)));
            prop_assert!(rejected);
        }
    }
}
