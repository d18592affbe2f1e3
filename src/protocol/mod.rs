//! VBAN wire format
//!
//! Stateless encoding and decoding of the 28-byte VBAN header, plus the text
//! sub-protocol used for remote commands.

pub mod header;
pub mod text;

pub use header::{
    decode_header, encode_header, encode_packet, payload, sample_rate_index, SubProtocol,
    VbanHeader, DATA_FORMAT_INT16, HEADER_LEN, SAMPLE_RATES,
};
pub use text::{encode_text, BAUD_RATES};
