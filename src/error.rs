//! Unified error types for the relay

use std::fmt;
use std::io;

use crate::relay::RelayError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all relay operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Connection rejected by the application handler
    Rejected(String),
    /// Handshake did not complete in time
    Timeout,
    /// Connection was closed by the peer
    ConnectionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Rejected(msg) => write!(f, "Rejected: {}", msg),
            Error::Timeout => write!(f, "Handshake timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<RelayError> for Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::PublisherBusy => Error::Protocol(ProtocolError::PublisherBusy),
        }
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    /// Control message payload shorter than its fixed layout
    ShortPayload,
    /// Variant-3 chunk arrived with no cached header on its chunk stream
    ChunkWithoutHeader(u8),
    /// A chunk header declared a length below the bytes already assembled
    MessageLengthShrunk { declared: u32, assembled: u32 },
    /// The extended-timestamp escape (0xFFFFFF) is not supported
    ExtendedTimestamp,
    /// FLV tunneling (message type 0x16) is not supported
    FlvTunnel,
    /// Audio, video, or metadata from a session that is not the publisher
    NotPublisher,
    /// The publisher slot is already taken
    PublisherBusy,
    /// Connect requested an application other than the served one
    UnsupportedApp(String),
    /// @setDataFrame with a frame name other than onMetaData
    InvalidDataFrame(String),
    /// An invoke argument object lacks a required field
    MissingField(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::ShortPayload => write!(f, "control payload too short"),
            ProtocolError::ChunkWithoutHeader(csid) => {
                write!(f, "chunk stream {} has no message header", csid)
            }
            ProtocolError::MessageLengthShrunk {
                declared,
                assembled,
            } => write!(
                f,
                "declared message length {} below {} assembled bytes",
                declared, assembled
            ),
            ProtocolError::ExtendedTimestamp => write!(f, "extended timestamp not supported"),
            ProtocolError::FlvTunnel => write!(f, "streaming FLV not supported"),
            ProtocolError::NotPublisher => write!(f, "not the publisher"),
            ProtocolError::PublisherBusy => write!(f, "already have a publisher"),
            ProtocolError::UnsupportedApp(app) => write!(f, "unsupported application: {}", app),
            ProtocolError::InvalidDataFrame(name) => {
                write!(f, "can only set onMetaData, got {}", name)
            }
            ProtocolError::MissingField(field) => write!(f, "missing field: {}", field),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    /// Buffer ended in the middle of a value
    ShortBuffer,
    /// A value carried a different type tag than required
    TypeMismatch { expected: u8, found: u8 },
    /// A type tag this codec does not handle
    UnknownType(u8),
    /// AMF0 has no integer type
    IntegerUnsupported,
    /// String bytes were not valid UTF-8
    InvalidUtf8,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::ShortBuffer => write!(f, "not enough data"),
            AmfError::TypeMismatch { expected, found } => {
                write!(f, "expected type 0x{:02x}, found 0x{:02x}", expected, found)
            }
            AmfError::UnknownType(tag) => write!(f, "unsupported type 0x{:02x}", tag),
            AmfError::IntegerUnsupported => write!(f, "AMF0 has no integer type"),
            AmfError::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    /// First byte was not the plaintext protocol selector
    UnsupportedVersion(u8),
    /// The peer's echo of our signature did not match
    SignatureMismatch,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::UnsupportedVersion(v) => {
                write!(f, "only plaintext handshake supported, got 0x{:02x}", v)
            }
            HandshakeError::SignatureMismatch => write!(f, "invalid signature echo"),
        }
    }
}

impl std::error::Error for HandshakeError {}
