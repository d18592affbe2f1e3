//! Text sub-protocol frames
//!
//! Text packets reuse the audio header layout: the rate index selects a baud
//! rate, bytes 5 and 6 are zero and the format byte marks UTF-8.

use bytes::Bytes;

use super::header::{encode_packet, SubProtocol, VbanHeader};
use crate::error::ProtocolError;

/// Format byte for UTF-8 text payloads
pub const TEXT_FORMAT_UTF8: u8 = 0x10;

/// Baud rate table indexed by the low 5 bits of byte 4
pub const BAUD_RATES: [u32; 25] = [
    0, 110, 150, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 31250, 38400, 57600, 115200,
    128000, 230400, 250000, 256000, 460800, 921600, 1000000, 1500000, 2000000, 3000000,
];

pub fn baud_rate_index(baud_rate: u32) -> Result<u8, ProtocolError> {
    BAUD_RATES
        .iter()
        .position(|&b| b == baud_rate)
        .map(|i| i as u8)
        .ok_or(ProtocolError::UnsupportedBaudRate(baud_rate))
}

/// Header for a text packet
pub fn text_header(
    stream_name: impl Into<String>,
    baud_rate: u32,
    frame_counter: u32,
) -> Result<VbanHeader, ProtocolError> {
    Ok(VbanHeader {
        sub_protocol: SubProtocol::Text,
        rate_index: baud_rate_index(baud_rate)?,
        samples_per_frame: 1,
        channels: 1,
        data_format: TEXT_FORMAT_UTF8,
        stream_name: stream_name.into(),
        frame_counter,
    })
}

/// Complete text packet carrying `text` as UTF-8
pub fn encode_text(
    stream_name: &str,
    baud_rate: u32,
    frame_counter: u32,
    text: &str,
) -> Result<Bytes, ProtocolError> {
    let header = text_header(stream_name, baud_rate, frame_counter)?;
    encode_packet(&header, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::{decode_header, payload};

    #[test]
    fn test_text_packet_layout() {
        let packet = encode_text("Command1", 115200, 3, "Strip[0].Mute = 1;").unwrap();

        assert_eq!(packet[4], 0x40 | 14);
        assert_eq!(packet[5], 0);
        assert_eq!(packet[6], 0);
        assert_eq!(packet[7], TEXT_FORMAT_UTF8);

        let header = decode_header(&packet).unwrap();
        assert_eq!(header.sub_protocol, SubProtocol::Text);
        assert_eq!(header.stream_name, "Command1");
        assert_eq!(header.frame_counter, 3);
        assert_eq!(payload(&packet), b"Strip[0].Mute = 1;");
    }

    #[test]
    fn test_high_baud_index_decodes() {
        let packet = encode_text("c", 3_000_000, 0, "").unwrap();
        let header = decode_header(&packet).unwrap();
        assert_eq!(header.rate_index, 24);
    }

    #[test]
    fn test_unknown_baud_rate() {
        assert_eq!(
            encode_text("c", 1234, 0, "hi"),
            Err(ProtocolError::UnsupportedBaudRate(1234))
        );
    }
}
