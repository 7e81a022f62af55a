//! Simulated MI48 module for integration tests.
//!
//! Answers RREG/WREG commands from a 256-byte register file, records every
//! command, and after FRAME_MODE is written with the continuous bit emits
//! GFRA frames on demand until its frame budget runs out. An exhausted
//! read buffer is reported as end of stream.

#![allow(dead_code)]

use mi48::codec::{Packet, TypeTag};
use mi48::ByteStream;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

pub const SERIAL_ID: [u8; 6] = [24, 7, 0x1A, 0x00, 0x12, 0xAB];
pub const FIRMWARE: [u8; 2] = [0x25, 0x07];

/// Bytes of device header in front of the pixel buffer of every GFRA payload.
pub const IMAGE_HEADER_LEN: usize = 160;

#[derive(Clone)]
pub struct SimulatedSensor {
    state: Arc<Mutex<SensorState>>,
}

pub struct SensorState {
    pub registers: [u8; 256],
    pub commands: Vec<(TypeTag, String)>,
    pub frames_remaining: usize,
    pub frames_generated: usize,
    /// Push an image frame ahead of each command response while streaming.
    pub image_before_response: bool,
    pub undersized_images: bool,
    pub fail_writes: bool,
    /// Counts down on every WREG; the one that reaches zero fails.
    writes_until_failure: Option<usize>,
    pixel_bytes: usize,
    streaming: bool,
    outbound: VecDeque<u8>,
}

impl SimulatedSensor {
    pub fn new(type_code: u8) -> Self {
        let mut registers = [0u8; 256];
        registers[0xBA] = type_code;
        registers[0xB2..0xB4].copy_from_slice(&FIRMWARE);
        registers[0xE0..0xE6].copy_from_slice(&SERIAL_ID);
        registers[0xB4] = 1;

        let pixel_bytes = mi48::catalog::lookup_camera(type_code)
            .map(|c| c.geometry().byte_len())
            .unwrap_or(0);

        Self {
            state: Arc::new(Mutex::new(SensorState {
                registers,
                commands: Vec::new(),
                frames_remaining: 0,
                frames_generated: 0,
                image_before_response: false,
                undersized_images: false,
                fail_writes: false,
                writes_until_failure: None,
                pixel_bytes,
                streaming: false,
                outbound: VecDeque::new(),
            })),
        }
    }

    pub fn with_frames(self, count: usize) -> Self {
        self.state().frames_remaining = count;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap()
    }

    /// Fail the `nth` register write from now on (1-based) with a broken pipe.
    /// The failing write never reaches the register file or the command log.
    pub fn fail_write(&self, nth: usize) {
        assert!(nth >= 1);
        self.state().writes_until_failure = Some(nth);
    }

    pub fn register(&self, address: u8) -> u8 {
        self.state().registers[address as usize]
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn commands(&self) -> Vec<(TypeTag, String)> {
        self.state().commands.clone()
    }

    /// (address, value) of every WREG received, in order.
    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.commands()
            .iter()
            .filter(|(tag, _)| *tag == TypeTag::WRITE_REGISTER)
            .map(|(_, body)| (hex_byte(&body[0..2]), hex_byte(&body[2..4])))
            .collect()
    }

    /// Address of every RREG received, in order.
    pub fn reads(&self) -> Vec<u8> {
        self.commands()
            .iter()
            .filter(|(tag, _)| *tag == TypeTag::READ_REGISTER)
            .map(|(_, body)| hex_byte(&body[0..2]))
            .collect()
    }
}

fn hex_byte(s: &str) -> u8 {
    u8::from_str_radix(s, 16).unwrap()
}

impl SensorState {
    fn push(&mut self, packet: Packet) {
        self.outbound.extend(packet.to_bytes().unwrap());
    }

    fn push_image(&mut self) {
        let index = self.frames_generated as u16;
        let mut payload = vec![0u8; IMAGE_HEADER_LEN];
        let pixel_bytes = if self.undersized_images {
            self.pixel_bytes - 2
        } else {
            self.pixel_bytes
        };
        for _ in 0..pixel_bytes / 2 {
            payload.extend_from_slice(&index.to_be_bytes());
        }
        if self.undersized_images {
            // Keep the payload short of the geometry even with the header
            payload.drain(..IMAGE_HEADER_LEN);
        }
        self.push(Packet::new(TypeTag::IMAGE, payload));
        self.frames_generated += 1;
        self.frames_remaining -= 1;
    }

    fn handle_command(&mut self, data: &[u8]) {
        assert_eq!(&data[0..4], b"   #", "command without marker");
        let len = usize::from_str_radix(std::str::from_utf8(&data[4..8]).unwrap(), 16).unwrap();
        let tag = TypeTag::new(data[8..12].try_into().unwrap());
        let body = std::str::from_utf8(&data[12..12 + len - 8]).unwrap().to_string();
        assert_eq!(&data[12 + len - 8..], b"XXXX", "command trailer");
        self.commands.push((tag, body.clone()));

        if self.streaming && self.image_before_response && self.frames_remaining > 0 {
            self.push_image();
        }

        match tag {
            TypeTag::READ_REGISTER => {
                let address = hex_byte(&body[0..2]);
                let value = self.registers[address as usize];
                self.push(Packet::new(TypeTag::READ_REGISTER, format!("{value:02X}")));
            }
            TypeTag::WRITE_REGISTER => {
                let address = hex_byte(&body[0..2]);
                let value = hex_byte(&body[2..4]);
                self.registers[address as usize] = value;
                if address == 0xB1 && value & 0x02 != 0 {
                    self.streaming = true;
                }
                self.push(Packet::new(TypeTag::WRITE_REGISTER, body));
            }
            other => panic!("unexpected command {other}"),
        }
    }
}

impl ByteStream for SimulatedSensor {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if &data[8..12] == b"WREG" {
            match state.writes_until_failure {
                Some(1) => {
                    state.writes_until_failure = None;
                    return Err(io::ErrorKind::BrokenPipe.into());
                }
                Some(n) => state.writes_until_failure = Some(n - 1),
                None => {}
            }
        }
        state.handle_command(data);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let n = buf.len();
        let mut state = self.state();
        while state.outbound.len() < n && state.streaming && state.frames_remaining > 0 {
            state.push_image();
        }
        if state.outbound.len() < n {
            state.outbound.clear();
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        for (dst, src) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }
}
