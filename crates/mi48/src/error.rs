//! Driver error type.

use crate::codec::{FrameError, TypeTag};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// The byte stream failed underneath an operation.
    #[error("{op}: transport failed: {source}")]
    Transport {
        op: String,
        #[source]
        source: std::io::Error,
    },
    /// The stream carried something that is not a well-formed frame.
    #[error("{op}: protocol error: {source}")]
    Protocol {
        op: String,
        #[source]
        source: FrameError,
    },
    /// A frame arrived intact but its payload makes no sense for the request.
    #[error("{op}: malformed response: {detail}")]
    MalformedResponse { op: String, detail: String },
    /// A frame no reader expects at this point of the protocol.
    #[error("{op}: unexpected frame type {tag}")]
    UnexpectedFrame { op: String, tag: TypeTag },
    #[error("unknown camera type code {0}")]
    UnknownDevice(u8),
    #[error("register {0} is read-only")]
    ReadOnlyRegister(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("a frame stream is already running on this device")]
    StreamActive,
    #[error("no MI48 device found")]
    DeviceNotFound,
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("failed to spawn stream worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DeviceError {
    /// Attach the failing operation to a codec error, splitting stream I/O
    /// failures from framing failures.
    pub(crate) fn frame(op: impl Into<String>, err: FrameError) -> Self {
        match err {
            FrameError::Io(source) => Self::Transport {
                op: op.into(),
                source,
            },
            other => Self::Protocol {
                op: op.into(),
                source: other,
            },
        }
    }

    pub(crate) fn transport(op: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            op: op.into(),
            source,
        }
    }

    /// I/O failure of the underlying stream.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Serial(_))
    }

    /// Malformed data on the wire.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::MalformedResponse { .. } | Self::UnexpectedFrame { .. }
        )
    }

    /// Rejected before touching the device.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::ReadOnlyRegister(_) | Self::StreamActive
        )
    }
}
