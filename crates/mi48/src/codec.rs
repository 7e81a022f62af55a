//! Wire framing of the MI48 serial protocol.
//!
//! ```text
//! Frame := "   #" LEN(4 hex chars) TYPE(4 ascii chars) PAYLOAD(LEN-8 bytes) TRAILER(4 bytes)
//! ```
//!
//! `LEN` counts the type tag, the payload and the trailer. There is no
//! out-of-band delimiter: the reader resynchronises by scanning for the
//! marker, so a corrupted stream can skip arbitrarily many bytes.
//! The trailer is documented as a checksum but is passed through unchecked.

use crate::transport::ByteStream;
use std::fmt;
use std::io;
use thiserror::Error;

/// Start-of-frame marker.
pub const MARKER: [u8; 4] = *b"   #";

/// Trailer length in bytes.
pub const TRAILER_LEN: usize = 4;

/// Bytes counted by `LEN` that are not payload (type tag + trailer).
const LENGTH_OVERHEAD: usize = 8;

/// Trailer sent with host commands. The device does not check it.
const COMMAND_TRAILER: [u8; TRAILER_LEN] = *b"XXXX";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream I/O failed: {0}")]
    Io(#[source] io::Error),
    #[error("stream ended inside frame {0}")]
    ShortRead(&'static str),
    #[error("length field is not hex: {0:?}")]
    InvalidLength(String),
    #[error("declared length {0} is shorter than the 8-byte tag and trailer")]
    LengthTooShort(u16),
    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLarge(usize),
}

impl FrameError {
    fn from_io(part: &'static str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ShortRead(part)
        } else {
            Self::Io(err)
        }
    }
}

/// Four-character frame type identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag([u8; 4]);

impl TypeTag {
    pub const IMAGE: TypeTag = TypeTag(*b"GFRA");
    pub const READ_REGISTER: TypeTag = TypeTag(*b"RREG");
    pub const WRITE_REGISTER: TypeTag = TypeTag(*b"WREG");

    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Closed set of frame purposes known to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Image,
    RegisterRead,
    RegisterWrite,
    Unrecognized(TypeTag),
}

impl From<TypeTag> for FrameKind {
    fn from(tag: TypeTag) -> Self {
        match tag {
            TypeTag::IMAGE => Self::Image,
            TypeTag::READ_REGISTER => Self::RegisterRead,
            TypeTag::WRITE_REGISTER => Self::RegisterWrite,
            other => Self::Unrecognized(other),
        }
    }
}

/// One decoded (or to-be-encoded) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub tag: TypeTag,
    pub payload: Vec<u8>,
    pub trailer: [u8; TRAILER_LEN],
}

impl Packet {
    /// A packet carrying the host's placeholder trailer.
    pub fn new(tag: TypeTag, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            payload: payload.into(),
            trailer: COMMAND_TRAILER,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.tag.into()
    }

    /// Value of the `LEN` field for this packet.
    pub fn declared_length(&self) -> Result<u16, FrameError> {
        u16::try_from(self.payload.len() + LENGTH_OVERHEAD)
            .map_err(|_| FrameError::PayloadTooLarge(self.payload.len()))
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let len = self.declared_length()?;
        let mut out = Vec::with_capacity(MARKER.len() + 4 + len as usize);
        out.extend_from_slice(&MARKER);
        out.extend_from_slice(format!("{len:04X}").as_bytes());
        out.extend_from_slice(self.tag.as_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.trailer);
        Ok(out)
    }
}

/// Build a host command frame from a tag and its ASCII-hex body.
///
/// The protocol's 8-character command body (`"B1XXXXXX"` for a read of
/// 0xB1) is split here: `body` carries the first four characters and the
/// `XXXX` command trailer supplies the last four fillers. So
/// `encode_command(RREG, "B1XX")` yields `"   #000CRREGB1XXXXXX"`.
pub fn encode_command(tag: TypeTag, body: &str) -> Result<Vec<u8>, FrameError> {
    Packet::new(tag, body.as_bytes()).to_bytes()
}

/// Scan for the next marker and decode the header that follows it.
///
/// Returns the type tag and the payload length still to be read.
pub fn read_header<S: ByteStream + ?Sized>(stream: &mut S) -> Result<(TypeTag, usize), FrameError> {
    let mut window = [0u8; 4];
    stream
        .read_exact(&mut window)
        .map_err(|e| FrameError::from_io("marker", e))?;

    let mut skipped = 0usize;
    while window != MARKER {
        window.rotate_left(1);
        stream
            .read_exact(&mut window[3..])
            .map_err(|e| FrameError::from_io("marker", e))?;
        skipped += 1;
    }
    if skipped > 0 {
        tracing::trace!(skipped, "resynchronised on frame marker");
    }

    let mut header = [0u8; 8];
    stream
        .read_exact(&mut header)
        .map_err(|e| FrameError::from_io("header", e))?;

    let length = decode_length(&header[..4])?;
    let tag = TypeTag::new([header[4], header[5], header[6], header[7]]);

    Ok((tag, length as usize - LENGTH_OVERHEAD))
}

fn decode_length(field: &[u8]) -> Result<u16, FrameError> {
    let invalid = || FrameError::InvalidLength(String::from_utf8_lossy(field).into_owned());
    let bytes: [u8; 2] = hex::decode(field)
        .map_err(|_| invalid())?
        .try_into()
        .map_err(|_| invalid())?;
    let length = u16::from_be_bytes(bytes);
    if (length as usize) < LENGTH_OVERHEAD {
        return Err(FrameError::LengthTooShort(length));
    }
    Ok(length)
}

/// Read exactly `len` payload bytes.
pub fn read_payload<S: ByteStream + ?Sized>(stream: &mut S, len: usize) -> Result<Vec<u8>, FrameError> {
    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .map_err(|e| FrameError::from_io("payload", e))?;
    Ok(payload)
}

/// Read the 4-byte trailer. Not validated.
pub fn read_trailer<S: ByteStream + ?Sized>(stream: &mut S) -> Result<[u8; TRAILER_LEN], FrameError> {
    let mut trailer = [0u8; TRAILER_LEN];
    stream
        .read_exact(&mut trailer)
        .map_err(|e| FrameError::from_io("trailer", e))?;
    Ok(trailer)
}

/// Decode one complete frame: header, payload and trailer.
pub fn read_packet<S: ByteStream + ?Sized>(stream: &mut S) -> Result<Packet, FrameError> {
    let (tag, len) = read_header(stream)?;
    let payload = read_payload(stream, len)?;
    let trailer = read_trailer(stream)?;
    tracing::trace!(tag = %tag, len, "decoded frame");
    Ok(Packet {
        tag,
        payload,
        trailer,
    })
}
