//! Command/response transactions over the shared transport.
//!
//! All transport access goes through [`Link`]'s lock. A transaction holds it
//! from the command write until its response has been decoded; the stream
//! worker holds it for exactly one frame at a time. Frames are therefore
//! never split between readers, but a command issued while streaming waits
//! for the frame currently being read.

use crate::codec::{self, TypeTag};
use crate::error::DeviceError;
use crate::registers::Register;
use crate::transport::ByteStream;
use parking_lot::{Mutex, MutexGuard};

pub struct Link {
    transport: Mutex<Box<dyn ByteStream>>,
}

impl Link {
    pub fn new(transport: Box<dyn ByteStream>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Exclusive access to the transport.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn ByteStream>> {
        self.transport.lock()
    }

    /// Send one command and wait for the frame answering it.
    ///
    /// Every incoming frame with a different tag is discarded, image frames
    /// included. There is no timeout: a device that never answers blocks
    /// the caller until the transport fails.
    pub fn execute(&self, tag: TypeTag, body: &str, op: &str) -> Result<Vec<u8>, DeviceError> {
        let command = codec::encode_command(tag, body).map_err(|e| DeviceError::frame(op, e))?;

        let mut stream = self.lock();
        stream
            .write_all(&command)
            .map_err(|e| DeviceError::transport(op, e))?;

        let mut discarded = 0usize;
        loop {
            let packet = codec::read_packet(&mut *stream).map_err(|e| DeviceError::frame(op, e))?;
            if packet.tag == tag {
                if discarded > 0 {
                    tracing::trace!(op, discarded, "skipped frames before response");
                }
                return Ok(packet.payload);
            }
            tracing::trace!(op, tag = %packet.tag, "discarding frame while awaiting response");
            discarded += 1;
        }
    }

    /// Read all bytes of a register, one address per transaction, in
    /// ascending address order.
    pub fn read_register(&self, reg: Register) -> Result<Vec<u8>, DeviceError> {
        let op = format!("read {}", reg.name);
        let mut value = Vec::with_capacity(reg.length as usize);

        for address in reg.addresses() {
            let body = format!("{address:02X}XX");
            let response = self.execute(TypeTag::READ_REGISTER, &body, &op)?;
            let bytes = hex::decode(&response).map_err(|_| DeviceError::MalformedResponse {
                op: op.clone(),
                detail: format!(
                    "register {address:#04x} value is not hex: {:?}",
                    String::from_utf8_lossy(&response)
                ),
            })?;
            if bytes.is_empty() {
                return Err(DeviceError::MalformedResponse {
                    op,
                    detail: format!("register {address:#04x} returned no data"),
                });
            }
            value.extend_from_slice(&bytes);
        }

        Ok(value)
    }

    /// Read a one-byte register.
    pub fn read_byte(&self, reg: Register) -> Result<u8, DeviceError> {
        let value = self.read_register(reg)?;
        value
            .first()
            .copied()
            .ok_or_else(|| DeviceError::MalformedResponse {
                op: format!("read {}", reg.name),
                detail: "empty value".to_string(),
            })
    }

    /// Write one byte. Read-only registers are rejected before any I/O.
    pub fn write_register(&self, reg: Register, value: u8) -> Result<(), DeviceError> {
        if reg.read_only {
            return Err(DeviceError::ReadOnlyRegister(reg.name));
        }

        tracing::debug!(register = reg.name, address = reg.address, value, "write register");
        let body = format!("{:02X}{value:02X}", reg.address);
        self.execute(TypeTag::WRITE_REGISTER, &body, &format!("write {}", reg.name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packet;
    use crate::registers::{FRAME_RATE, FW_VERSION, SENXOR_TYPE};
    use crate::transport::MemoryTransport;

    fn response(tag: TypeTag, payload: &str) -> Vec<u8> {
        Packet::new(tag, payload.as_bytes()).to_bytes().unwrap()
    }

    fn link_with(bytes: &[u8]) -> (Link, MemoryTransport) {
        let transport = MemoryTransport::new();
        transport.inject_read(bytes);
        (Link::new(Box::new(transport.clone())), transport)
    }

    #[test]
    fn test_execute_skips_other_frames() {
        let mut bytes = Packet::new(TypeTag::IMAGE, vec![0u8; 32]).to_bytes().unwrap();
        bytes.extend(response(TypeTag::WRITE_REGISTER, ""));
        bytes.extend(response(TypeTag::new(*b"ZZZZ"), "??"));
        bytes.extend(response(TypeTag::READ_REGISTER, "19"));
        let (link, transport) = link_with(&bytes);

        let payload = link.execute(TypeTag::READ_REGISTER, "B4XX", "test").unwrap();
        assert_eq!(payload, b"19");
        assert_eq!(transport.written(), b"   #000CRREGB4XXXXXX");
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_read_multi_byte_register() {
        let mut bytes = response(TypeTag::READ_REGISTER, "25");
        bytes.extend(response(TypeTag::READ_REGISTER, "07"));
        let (link, transport) = link_with(&bytes);

        assert_eq!(link.read_register(FW_VERSION).unwrap(), vec![0x25, 0x07]);
        let written = String::from_utf8(transport.written()).unwrap();
        assert_eq!(written, "   #000CRREGB2XXXXXX   #000CRREGB3XXXXXX");
    }

    #[test]
    fn test_read_byte() {
        let (link, _) = link_with(&response(TypeTag::READ_REGISTER, "02"));
        assert_eq!(link.read_byte(SENXOR_TYPE).unwrap(), 2);
    }

    #[test]
    fn test_write_register_encodes_address_and_value() {
        let (link, transport) = link_with(&response(TypeTag::WRITE_REGISTER, ""));
        link.write_register(FRAME_RATE, 0x0A).unwrap();
        assert_eq!(transport.written(), b"   #000CWREGB40AXXXX");
    }

    #[test]
    fn test_write_read_only_register_no_io() {
        let (link, transport) = link_with(&[]);
        let err = link.write_register(SENXOR_TYPE, 1).unwrap_err();
        assert!(matches!(err, DeviceError::ReadOnlyRegister("SENXOR_TYPE")));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_non_hex_response() {
        let (link, _) = link_with(&response(TypeTag::READ_REGISTER, "G1"));
        let err = link.read_register(FRAME_RATE).unwrap_err();
        assert!(matches!(err, DeviceError::MalformedResponse { .. }));
    }

    #[test]
    fn test_empty_response() {
        let (link, _) = link_with(&response(TypeTag::READ_REGISTER, ""));
        let err = link.read_register(FRAME_RATE).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_stream_closed_before_response() {
        let (link, _) = link_with(&response(TypeTag::IMAGE, "0000"));
        let err = link.read_register(FRAME_RATE).unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().starts_with("read FRAME_RATE"));
    }
}
