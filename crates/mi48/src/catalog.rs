//! Camera catalog.
//!
//! Maps the SENXOR_TYPE code reported by the module to its model name,
//! sensor geometry and maximum frame rate, and lists the USB identifiers
//! used for port discovery. The table is embedded at compile time from
//! `contrib/hw/mi48.toml`.

use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

const CATALOG_TOML: &str = include_str!("../../../contrib/hw/mi48.toml");

static CATALOG: OnceLock<Catalog> = OnceLock::new();

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("bad camera catalog TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parsed catalog file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub usb: UsbIds,
    #[serde(default, rename = "camera")]
    pub cameras: Vec<CameraType>,
}

/// USB vendor/product identifiers from the `[usb]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsbIds {
    pub vendor_id: u16,
    pub product_ids: Vec<u16>,
}

/// One `[[camera]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraType {
    pub type_code: u8,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate at divisor 1. `0.0` when unknown.
    #[serde(default)]
    pub max_frame_rate: f64,
}

impl CameraType {
    pub fn geometry(&self) -> SensorGeometry {
        SensorGeometry {
            width: self.width,
            height: self.height,
        }
    }
}

/// Fixed pixel dimensions of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorGeometry {
    pub width: u32,
    pub height: u32,
}

impl SensorGeometry {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of the raw pixel buffer on the wire (2 bytes per pixel).
    pub fn byte_len(&self) -> usize {
        self.pixel_count() * 2
    }
}

impl Catalog {
    pub fn from_toml(src: &str) -> Result<Self, CatalogError> {
        Ok(toml::from_str(src)?)
    }

    pub fn camera(&self, type_code: u8) -> Option<&CameraType> {
        self.cameras.iter().find(|c| c.type_code == type_code)
    }

    pub fn is_known_usb_id(&self, vid: u16, pid: u16) -> bool {
        self.usb.vendor_id == vid && self.usb.product_ids.contains(&pid)
    }
}

fn catalog() -> &'static Catalog {
    CATALOG.get_or_init(|| match Catalog::from_toml(CATALOG_TOML) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "embedded camera catalog is invalid");
            Catalog::default()
        }
    })
}

/// Look up a camera type by its SENXOR_TYPE code.
/// Returns a `'static` reference into the embedded catalog.
pub fn lookup_camera(type_code: u8) -> Option<&'static CameraType> {
    catalog().camera(type_code)
}

/// True if the USB vendor:product pair belongs to an MI48 module.
pub fn is_known_usb_id(vid: u16, pid: u16) -> bool {
    catalog().is_known_usb_id(vid, pid)
}

/// List all known camera types.
pub fn list_cameras() -> &'static [CameraType] {
    &catalog().cameras
}
