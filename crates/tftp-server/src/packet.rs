//! TFTP packet codec.
//!
//! Every packet starts with a big-endian 16-bit opcode. DATA and ACK carry a
//! big-endian block number in bytes 2..4, ERROR carries its error code in the
//! same position followed by a NUL-terminated message. Read and write
//! requests carry a NUL-terminated filename and mode string.
//!
//! Encoders return an owned buffer sized exactly to the packet.

use crate::error::RequestParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed DATA payload size.
pub const BLOCK_SIZE: usize = 512;

/// Opcode plus block number / error code.
pub const HEADER_LEN: usize = 4;

/// Well-known TFTP server port.
pub const TFTP_PORT: u16 = 69;

/// Message used in ERROR packets until something more specific is set.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

/// Packet type carried in the first two bytes of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Read request
    Rrq = 1,
    /// Write request
    Wrq = 2,
    /// Data block
    Data = 3,
    /// Acknowledgment
    Ack = 4,
    /// Error report
    Error = 5,
}

impl TryFrom<u16> for Opcode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            1 => Ok(Self::Rrq),
            2 => Ok(Self::Wrq),
            3 => Ok(Self::Data),
            4 => Ok(Self::Ack),
            5 => Ok(Self::Error),
            other => Err(other),
        }
    }
}

/// Standard TFTP error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Not defined, see error message
    NotDefined = 0,
    /// File not found
    FileNotFound = 1,
    /// Access violation
    AccessViolation = 2,
    /// Disk full or allocation exceeded
    DiskFull = 3,
    /// Illegal TFTP operation
    IllegalOperation = 4,
    /// Unknown transfer ID
    UnknownTid = 5,
    /// File already exists
    FileExists = 6,
    /// No such user
    NoSuchUser = 7,
}

impl ErrorCode {
    /// Wire value of this code.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maps a wire value back to a code; unknown values become `NotDefined`.
    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::FileNotFound,
            2 => Self::AccessViolation,
            3 => Self::DiskFull,
            4 => Self::IllegalOperation,
            5 => Self::UnknownTid,
            6 => Self::FileExists,
            7 => Self::NoSuchUser,
            _ => Self::NotDefined,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotDefined => "not defined",
            Self::FileNotFound => "file not found",
            Self::AccessViolation => "access violation",
            Self::DiskFull => "disk full",
            Self::IllegalOperation => "illegal operation",
            Self::UnknownTid => "unknown transfer id",
            Self::FileExists => "file exists",
            Self::NoSuchUser => "no such user",
        };
        write!(f, "{text} ({})", self.as_u16())
    }
}

/// Transfer mode named in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Text transfer
    NetAscii,
    /// Binary transfer
    Octet,
}

impl TransferMode {
    /// Case-insensitive match against the two supported mode strings.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.eq_ignore_ascii_case(b"netascii") {
            Some(Self::NetAscii)
        } else if raw.eq_ignore_ascii_case(b"octet") {
            Some(Self::Octet)
        } else {
            None
        }
    }

    /// Canonical wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetAscii => "netascii",
            Self::Octet => "octet",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way the file moves, from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// RRQ: the server sends the file
    Read,
    /// WRQ: the server receives the file
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Fields of a structurally valid RRQ/WRQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// RRQ or WRQ
    pub direction: Direction,
    /// Requested filename, lossily decoded as UTF-8
    pub filename: String,
    /// Requested transfer mode
    pub mode: TransferMode,
}

/// Reads the opcode from the first two bytes.
#[must_use]
pub fn read_opcode(packet: &[u8]) -> Option<u16> {
    match packet {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Decodes the 4-byte header shared by DATA, ACK and ERROR.
///
/// Returns `None` for short packets or unknown opcodes.
#[must_use]
pub fn decode_header(packet: &[u8]) -> Option<(Opcode, u16)> {
    match packet {
        [op_hi, op_lo, hi, lo, ..] => {
            let opcode = Opcode::try_from(u16::from_be_bytes([*op_hi, *op_lo])).ok()?;
            Some((opcode, u16::from_be_bytes([*hi, *lo])))
        }
        _ => None,
    }
}

/// Parses a read or write request.
///
/// Layout after the opcode: `filename\0mode\0`. Anything following the mode
/// terminator (option extensions) is ignored.
pub fn parse_request(packet: &[u8]) -> Result<ParsedRequest, RequestParseError> {
    let opcode = read_opcode(packet).ok_or(RequestParseError::TooShort)?;
    let direction = match Opcode::try_from(opcode) {
        Ok(Opcode::Rrq) => Direction::Read,
        Ok(Opcode::Wrq) => Direction::Write,
        _ => return Err(RequestParseError::UnsupportedOpcode(opcode)),
    };

    let body = &packet[2..];
    let name_end = body
        .iter()
        .position(|&b| b == 0)
        .ok_or(RequestParseError::MissingFilename)?;
    let filename = &body[..name_end];

    let mode_field = &body[name_end + 1..];
    let mode_end = mode_field
        .iter()
        .position(|&b| b == 0)
        .ok_or(RequestParseError::InvalidMode)?;
    let mode = TransferMode::parse(&mode_field[..mode_end]).ok_or(RequestParseError::InvalidMode)?;

    Ok(ParsedRequest {
        direction,
        filename: String::from_utf8_lossy(filename).into_owned(),
        mode,
    })
}

/// Builds a request packet. Used by tests and client tooling.
#[must_use]
pub fn encode_request(direction: Direction, filename: &str, mode: TransferMode) -> Vec<u8> {
    let opcode = match direction {
        Direction::Read => Opcode::Rrq,
        Direction::Write => Opcode::Wrq,
    };
    let mut packet = Vec::with_capacity(2 + filename.len() + 1 + mode.as_str().len() + 1);
    packet.extend_from_slice(&(opcode as u16).to_be_bytes());
    packet.extend_from_slice(filename.as_bytes());
    packet.push(0);
    packet.extend_from_slice(mode.as_str().as_bytes());
    packet.push(0);
    packet
}

/// ACK: opcode + block number, 4 bytes.
#[must_use]
pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN);
    packet.extend_from_slice(&(Opcode::Ack as u16).to_be_bytes());
    packet.extend_from_slice(&block.to_be_bytes());
    packet
}

/// DATA packet with a zeroed payload of `payload_len` bytes.
///
/// The caller fills `packet[HEADER_LEN..]` in place before sending.
#[must_use]
pub fn data_packet(block: u16, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0; HEADER_LEN + payload_len];
    packet[..2].copy_from_slice(&(Opcode::Data as u16).to_be_bytes());
    packet[2..HEADER_LEN].copy_from_slice(&block.to_be_bytes());
    packet
}

/// DATA: opcode + block number + payload.
#[must_use]
pub fn encode_data(block: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = data_packet(block, payload.len());
    packet[HEADER_LEN..].copy_from_slice(payload);
    packet
}

/// ERROR: opcode + error code + message + NUL.
#[must_use]
pub fn encode_error(code: ErrorCode, message: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + message.len() + 1);
    packet.extend_from_slice(&(Opcode::Error as u16).to_be_bytes());
    packet.extend_from_slice(&code.as_u16().to_be_bytes());
    packet.extend_from_slice(message.as_bytes());
    packet.push(0);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_request() {
        let packet = b"\x00\x01foo.txt\x00octet\x00";
        let request = parse_request(packet).unwrap();
        assert_eq!(request.direction, Direction::Read);
        assert_eq!(request.filename, "foo.txt");
        assert_eq!(request.mode, TransferMode::Octet);
    }

    #[test]
    fn test_parse_write_request_mode_is_case_insensitive() {
        let packet = b"\x00\x02bar.bin\x00NetASCII\x00";
        let request = parse_request(packet).unwrap();
        assert_eq!(request.direction, Direction::Write);
        assert_eq!(request.filename, "bar.bin");
        assert_eq!(request.mode, TransferMode::NetAscii);
    }

    #[test]
    fn test_parse_request_ignores_trailing_options() {
        let packet = b"\x00\x01boot.img\x00octet\x00blksize\x001428\x00";
        let request = parse_request(packet).unwrap();
        assert_eq!(request.filename, "boot.img");
        assert_eq!(request.mode, TransferMode::Octet);
    }

    #[test]
    fn test_parse_request_rejects_other_opcodes() {
        assert_eq!(
            parse_request(b"\x00\x03foo\x00octet\x00"),
            Err(RequestParseError::UnsupportedOpcode(3))
        );
        assert_eq!(
            parse_request(b"\x00\x04\x00\x01"),
            Err(RequestParseError::UnsupportedOpcode(4))
        );
        assert_eq!(parse_request(b"\x00"), Err(RequestParseError::TooShort));
    }

    #[test]
    fn test_parse_request_rejects_unknown_mode() {
        assert_eq!(
            parse_request(b"\x00\x01foo\x00mail\x00"),
            Err(RequestParseError::InvalidMode)
        );
        assert_eq!(
            parse_request(b"\x00\x01foo\x00octets\x00"),
            Err(RequestParseError::InvalidMode)
        );
    }

    #[test]
    fn test_parse_request_requires_both_terminators() {
        assert_eq!(
            parse_request(b"\x00\x01foo"),
            Err(RequestParseError::MissingFilename)
        );
        assert_eq!(
            parse_request(b"\x00\x01foo\x00octet"),
            Err(RequestParseError::InvalidMode)
        );
        assert_eq!(
            parse_request(b"\x00\x01foo\x00"),
            Err(RequestParseError::InvalidMode)
        );
    }

    #[test]
    fn test_parse_request_allows_empty_filename() {
        let request = parse_request(b"\x00\x01\x00octet\x00").unwrap();
        assert_eq!(request.filename, "");
    }

    #[test]
    fn test_encode_request_parses_back() {
        let packet = encode_request(Direction::Write, "fw/app.bin", TransferMode::Octet);
        assert_eq!(packet, b"\x00\x02fw/app.bin\x00octet\x00");
    }

    #[test]
    fn test_encode_ack() {
        let packet = encode_ack(0x0102);
        assert_eq!(packet, vec![0, 4, 1, 2]);
        assert_eq!(decode_header(&packet), Some((Opcode::Ack, 0x0102)));
    }

    #[test]
    fn test_encode_data_header() {
        let packet = encode_data(7, b"hello");
        assert_eq!(packet.len(), HEADER_LEN + 5);
        assert_eq!(decode_header(&packet), Some((Opcode::Data, 7)));
        assert_eq!(&packet[HEADER_LEN..], b"hello");
    }

    #[test]
    fn test_encode_error_is_nul_terminated() {
        let packet = encode_error(ErrorCode::FileNotFound, "File not found");
        assert_eq!(packet.len(), 5 + "File not found".len());
        assert_eq!(&packet[..4], &[0, 5, 0, 1]);
        assert_eq!(&packet[4..packet.len() - 1], b"File not found");
        assert_eq!(packet.last(), Some(&0));
    }

    #[test]
    fn test_decode_header_rejects_short_and_unknown() {
        assert_eq!(decode_header(&[0, 4, 0]), None);
        assert_eq!(decode_header(&[0, 9, 0, 1]), None);
    }

    #[test]
    fn test_error_code_round_trip_through_wire_value() {
        for code in [
            ErrorCode::NotDefined,
            ErrorCode::FileNotFound,
            ErrorCode::AccessViolation,
            ErrorCode::DiskFull,
            ErrorCode::IllegalOperation,
            ErrorCode::UnknownTid,
            ErrorCode::FileExists,
            ErrorCode::NoSuchUser,
        ] {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), code);
        }
        assert_eq!(ErrorCode::from_u16(42), ErrorCode::NotDefined);
    }
}
