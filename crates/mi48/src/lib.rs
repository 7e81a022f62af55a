//! mi48: host driver for MI48 thermal sensor modules.
//!
//! Register control and continuous frame streaming share one USB-CDC byte
//! stream. Every transport read goes through a single lock so command
//! responses and image frames are never split between readers.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod registers;
pub mod session;
pub mod stream;
pub mod transaction;
pub mod transport;

pub use catalog::SensorGeometry;
pub use config::SessionConfig;
pub use error::DeviceError;
pub use frame::ImageFrame;
pub use registers::{FilterSettings, MedianFilter, NetdConfig, Register};
pub use session::{CameraIdentity, Session};
pub use stream::{CancelHandle, FrameStream, StreamExit};
pub use transport::{ByteStream, MemoryTransport, SerialTransport};
