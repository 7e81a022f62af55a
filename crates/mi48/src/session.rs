//! Device session: initialisation sequence and unit-level controls.

use crate::catalog::{self, SensorGeometry};
use crate::config::SessionConfig;
use crate::error::DeviceError;
use crate::registers::{
    frame_mode, FilterSettings, NetdConfig, Register, FRAME_MODE, FRAME_RATE, FW_VERSION,
    OFFSET_CORR, SENXOR_ID, SENXOR_TYPE,
};
use crate::stream::{self, FrameStream};
use crate::transaction::Link;
use crate::transport::{self, ByteStream, SerialTransport, SystemDiscovery};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Temperature offset register resolution in °C.
const OFFSET_STEP_CELSIUS: f64 = 0.05;

/// Identity of the connected module, resolved once at initialisation.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIdentity {
    pub type_code: u8,
    pub model_name: String,
    pub serial_info: String,
    pub firmware_version: String,
    /// Frame rate at divisor 1, in Hz. `0.0` when the model's rate is unknown.
    pub max_frame_rate: f64,
}

/// An open, initialised MI48 module.
///
/// All methods take `&self`; transport access is serialised internally, so a
/// session may be shared across threads while a stream is running.
pub struct Session {
    link: Arc<Link>,
    identity: CameraIdentity,
    geometry: SensorGeometry,
    stream_capacity: usize,
    streaming: Arc<AtomicBool>,
}

impl Session {
    /// Open the configured serial port (or the first MI48 on USB) and
    /// initialise the module.
    pub fn open(config: &SessionConfig) -> Result<Self, DeviceError> {
        let port = match &config.port {
            Some(port) => port.clone(),
            None => transport::find_port(&SystemDiscovery)?,
        };
        let transport = SerialTransport::open(&port, config.read_timeout)?;
        Self::with_transport(Box::new(transport), config)
    }

    /// Initialise a module reachable through an arbitrary byte stream.
    ///
    /// Resolves the camera identity, then applies default filters, a zero
    /// temperature offset and the default NETD configuration.
    pub fn with_transport(
        transport: Box<dyn ByteStream>,
        config: &SessionConfig,
    ) -> Result<Self, DeviceError> {
        let link = Arc::new(Link::new(transport));

        let type_code = link.read_byte(SENXOR_TYPE)?;
        let camera = catalog::lookup_camera(type_code).ok_or(DeviceError::UnknownDevice(type_code))?;

        let serial_info = format_serial_info(&link.read_register(SENXOR_ID)?).ok_or_else(|| {
            DeviceError::MalformedResponse {
                op: "read SENXOR_ID".to_string(),
                detail: "expected at least 4 bytes".to_string(),
            }
        })?;
        let firmware_version = format_firmware_version(&link.read_register(FW_VERSION)?)
            .ok_or_else(|| DeviceError::MalformedResponse {
                op: "read FW_VERSION".to_string(),
                detail: "expected 2 bytes".to_string(),
            })?;

        let identity = CameraIdentity {
            type_code,
            model_name: camera.name.clone(),
            serial_info,
            firmware_version,
            max_frame_rate: camera.max_frame_rate,
        };

        tracing::info!(
            model = %identity.model_name,
            type_code,
            serial = %identity.serial_info,
            firmware = %identity.firmware_version,
            max_fps = identity.max_frame_rate,
            "camera identified"
        );

        let session = Self {
            link,
            identity,
            geometry: camera.geometry(),
            stream_capacity: config.stream_capacity,
            streaming: Arc::new(AtomicBool::new(false)),
        };

        session.set_filters(&FilterSettings::default())?;
        session.set_temperature_offset(0.0)?;
        session.set_netd(&NetdConfig::default())?;

        Ok(session)
    }

    pub fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Raw register read (all bytes of the descriptor, ascending addresses).
    pub fn read_register(&self, reg: Register) -> Result<Vec<u8>, DeviceError> {
        self.link.read_register(reg)
    }

    /// Raw one-byte register write.
    pub fn write_register(&self, reg: Register, value: u8) -> Result<(), DeviceError> {
        self.link.write_register(reg, value)
    }

    /// Apply filter settings. Writes stop at the first failure; earlier
    /// writes stay applied.
    pub fn set_filters(&self, settings: &FilterSettings) -> Result<(), DeviceError> {
        for (reg, value) in settings.register_writes() {
            self.link.write_register(reg, value)?;
        }
        Ok(())
    }

    /// Apply NETD configuration. Same partial-failure behaviour as
    /// [`Session::set_filters`].
    pub fn set_netd(&self, netd: &NetdConfig) -> Result<(), DeviceError> {
        for (reg, value) in netd.register_writes() {
            self.link.write_register(reg, value)?;
        }
        Ok(())
    }

    pub fn set_temperature_offset(&self, celsius: f64) -> Result<(), DeviceError> {
        let value = temperature_offset_value(celsius)?;
        self.link.write_register(OFFSET_CORR, value)
    }

    /// Request a frame rate. Returns the rate actually configured, which is
    /// the maximum rate divided by the nearest integer divisor.
    pub fn set_frame_rate(&self, target_hz: f64) -> Result<f64, DeviceError> {
        let max = self.identity.max_frame_rate;
        let divisor = frame_rate_divisor(max, target_hz)?;
        self.link.write_register(FRAME_RATE, divisor)?;
        let actual = max / f64::from(divisor);
        tracing::debug!(target_hz, divisor, actual, "frame rate set");
        Ok(actual)
    }

    pub fn get_frame_rate(&self) -> Result<f64, DeviceError> {
        let divisor = self.link.read_byte(FRAME_RATE)?;
        if divisor == 0 {
            return Err(DeviceError::InvalidArgument(
                "frame rate divisor register holds 0".to_string(),
            ));
        }
        Ok(self.identity.max_frame_rate / f64::from(divisor))
    }

    /// Switch the module to continuous mode and start the stream worker.
    ///
    /// Only one stream may run per session. Cancelling the stream stops the
    /// host side only; the module is not switched out of continuous mode.
    pub fn start_stream(&self) -> Result<FrameStream, DeviceError> {
        if self
            .streaming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DeviceError::StreamActive);
        }

        let started = self
            .link
            .write_register(FRAME_MODE, frame_mode::CONTINUOUS_STREAM)
            .and_then(|()| {
                stream::spawn(
                    self.link.clone(),
                    self.geometry,
                    self.stream_capacity,
                    self.streaming.clone(),
                )
            });

        if started.is_err() {
            self.streaming.store(false, Ordering::SeqCst);
        }
        started
    }
}

/// Nearest integer divisor of `max_hz` for `target_hz`.
fn frame_rate_divisor(max_hz: f64, target_hz: f64) -> Result<u8, DeviceError> {
    // Written so that NaN fails the check
    if !(target_hz > 0.0 && target_hz <= max_hz) {
        return Err(DeviceError::InvalidArgument(format!(
            "frame rate {target_hz} Hz outside 0 < rate <= {max_hz} Hz"
        )));
    }
    let divisor = (max_hz / target_hz).round();
    if divisor > f64::from(u8::MAX) {
        return Err(DeviceError::InvalidArgument(format!(
            "frame rate {target_hz} Hz needs divisor {divisor}, register holds at most 255"
        )));
    }
    Ok(divisor as u8)
}

/// OFFSET_CORR encoding: 0.05 °C steps, negative values as two's complement.
fn temperature_offset_value(celsius: f64) -> Result<u8, DeviceError> {
    let steps = (celsius / OFFSET_STEP_CELSIUS).round();
    if !(f64::from(i8::MIN)..=f64::from(i8::MAX)).contains(&steps) {
        return Err(DeviceError::InvalidArgument(format!(
            "temperature offset {celsius} °C outside -6.40..=6.35 °C"
        )));
    }
    Ok(steps as i8 as u8)
}

/// `SENXOR_ID` bytes: year - 2000, week, fab, then the serial number.
fn format_serial_info(id: &[u8]) -> Option<String> {
    if id.len() < 4 {
        return None;
    }
    Some(format!(
        "Week: {:2}; Year: {:4}; Fab: {:02X}; Serial: {}",
        id[1],
        u16::from(id[0]) + 2000,
        id[2],
        hex::encode_upper(&id[3..])
    ))
}

/// `FW_VERSION` bytes: major/minor nibbles, then build.
fn format_firmware_version(version: &[u8]) -> Option<String> {
    match version {
        [majmin, build, ..] => Some(format!("{}.{}.{}", majmin >> 4, majmin & 0x0F, build)),
        _ => None,
    }
}
