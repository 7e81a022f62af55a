//! Register map of the MI48 control plane.
//!
//! Every register is one byte wide; multi-byte values occupy consecutive
//! addresses and are read one address at a time.

/// Descriptor of an addressable register (or run of registers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub address: u8,
    /// Number of consecutive one-byte registers starting at `address`.
    pub length: u8,
    pub read_only: bool,
}

impl Register {
    const fn rw(name: &'static str, address: u8) -> Self {
        Self {
            name,
            address,
            length: 1,
            read_only: false,
        }
    }

    const fn ro(name: &'static str, address: u8, length: u8) -> Self {
        Self {
            name,
            address,
            length,
            read_only: true,
        }
    }

    /// Addresses covered by this descriptor, in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u8> {
        let base = self.address;
        (0..self.length).map(move |i| base.wrapping_add(i))
    }
}

pub const FRAME_MODE: Register = Register::rw("FRAME_MODE", 0xB1);
pub const FW_VERSION: Register = Register::ro("FW_VERSION", 0xB2, 2);
pub const FRAME_RATE: Register = Register::rw("FRAME_RATE", 0xB4);
pub const POWER_DOWN_1: Register = Register::rw("POWER_DOWN_1", 0xB5);
pub const STATUS: Register = Register::ro("STATUS", 0xB6, 1);
pub const CLK_SPEED: Register = Register::rw("CLK_SPEED", 0xB7);
pub const SENXOR_TYPE: Register = Register::ro("SENXOR_TYPE", 0xBA, 1);
pub const SENSITIVITY_FACTOR: Register = Register::rw("SENSITIVITY_FACTOR", 0xC2);
pub const EMISSIVITY: Register = Register::rw("EMISSIVITY", 0xCA);
pub const OFFSET_CORR: Register = Register::rw("OFFSET_CORR", 0xCB);
pub const SENXOR_ID: Register = Register::ro("SENXOR_ID", 0xE0, 6);
pub const FILTER_CONTROL: Register = Register::rw("FILTER_CONTROL", 0xD0);
pub const FILTER_SETTING_1_LSB: Register = Register::rw("FILTER_SETTING_1_LSB", 0xD1);
pub const FILTER_SETTING_1_MSB: Register = Register::rw("FILTER_SETTING_1_MSB", 0xD2);
pub const FILTER_SETTING_2: Register = Register::rw("FILTER_SETTING_2", 0xD3);
pub const NETD_CONFIG: Register = Register::rw("NETD_CONFIG", 0xD4);
pub const NETD_FACTOR: Register = Register::rw("NETD_FACTOR", 0xD5);
pub const NETD_PIXEL_X: Register = Register::rw("NETD_PIXEL_X", 0xD6);
pub const NETD_PIXEL_Y: Register = Register::rw("NETD_PIXEL_Y", 0xD7);
pub const USER_FLASH_CTRL: Register = Register::rw("USER_FLASH_CTRL", 0xD8);

/// Bits of the FRAME_MODE register.
pub mod frame_mode {
    pub const GET_SINGLE_FRAME: u8 = 0x01;
    pub const CONTINUOUS_STREAM: u8 = 0x02;
    pub const NO_HEADER: u8 = 0x20;
    pub const LOW_NETD_ROW_IN_HEADER: u8 = 0x40;
}

/// Median filter kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MedianFilter {
    #[default]
    Disabled,
    Kernel3,
    Kernel5,
}

/// On-sensor filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    /// Temporal filter threshold, 0 disables.
    pub temporal: u16,
    /// Rolling average window, 0 disables.
    pub rolling_average: u8,
    pub median: MedianFilter,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            temporal: 125,
            rolling_average: 4,
            median: MedianFilter::Disabled,
        }
    }
}

impl FilterSettings {
    /// Register writes for these settings, in the order they must be applied.
    /// FILTER_CONTROL is the enable gate and always comes last.
    pub fn register_writes(&self) -> [(Register, u8); 4] {
        let mut control = 0u8;
        let mut setting_1 = [0u8; 2];
        let mut setting_2 = 0u8;

        if self.temporal > 0 {
            control |= 0x03;
            setting_1 = self.temporal.to_le_bytes();
        }
        if self.rolling_average > 0 {
            control |= 0x04;
            setting_2 = self.rolling_average;
        }
        match self.median {
            MedianFilter::Disabled => {}
            MedianFilter::Kernel3 => control |= 0x40,
            MedianFilter::Kernel5 => control |= 0x40 | 0x20,
        }

        [
            (FILTER_SETTING_1_LSB, setting_1[0]),
            (FILTER_SETTING_1_MSB, setting_1[1]),
            (FILTER_SETTING_2, setting_2),
            (FILTER_CONTROL, control),
        ]
    }
}

/// Noise-equivalent temperature difference compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetdConfig {
    pub enabled: bool,
    /// Report the NETD row inside the frame. Only honoured when `enabled`.
    pub row_in_frame: bool,
    pub factor: u8,
    pub x: u8,
    pub y: u8,
}

impl Default for NetdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            row_in_frame: false,
            factor: 0x14,
            x: 0,
            y: 0,
        }
    }
}

impl NetdConfig {
    pub fn config_byte(&self) -> u8 {
        let mut config = 0u8;
        if self.enabled {
            config |= 0x01;
            if self.row_in_frame {
                config |= 0x02;
            }
        }
        config
    }

    /// Register writes in application order; NETD_CONFIG last.
    pub fn register_writes(&self) -> [(Register, u8); 4] {
        [
            (NETD_FACTOR, self.factor),
            (NETD_PIXEL_Y, self.y),
            (NETD_PIXEL_X, self.x),
            (NETD_CONFIG, self.config_byte()),
        ]
    }
}
