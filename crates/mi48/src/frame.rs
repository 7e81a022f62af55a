//! Thermal image frame extracted from a `GFRA` payload.

use crate::catalog::SensorGeometry;

/// A 16-bit grayscale thermal frame.
#[derive(Clone)]
pub struct ImageFrame {
    /// Row-major pixel values (width * height).
    pixels: Vec<u16>,
    width: u32,
    height: u32,
    /// Position of this frame within its stream, starting at 0.
    pub sequence: u64,
    pub timestamp: std::time::Instant,
}

impl ImageFrame {
    /// Build a frame from an image payload.
    ///
    /// The payload starts with a device-defined header; the pixel buffer is
    /// the trailing `geometry.byte_len()` bytes, big-endian, 2 bytes per pixel.
    pub fn from_payload(
        payload: &[u8],
        geometry: SensorGeometry,
        sequence: u64,
    ) -> Result<Self, ImageError> {
        let expected = geometry.byte_len();
        if payload.len() < expected {
            return Err(ImageError::Undersized {
                expected,
                actual: payload.len(),
            });
        }

        let pixels = payload[payload.len() - expected..]
            .chunks_exact(2)
            .map(|px| u16::from_be_bytes([px[0], px[1]]))
            .collect();

        Ok(Self {
            pixels,
            width: geometry.width,
            height: geometry.height,
            sequence,
            timestamp: std::time::Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u16> {
        self.pixels
    }

    /// Pixel at column `x`, row `y`.
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Smallest and largest raw value in the frame.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        let min = self.pixels.iter().min()?;
        let max = self.pixels.iter().max()?;
        Some((*min, *max))
    }
}

impl std::fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image payload too short: expected {expected} bytes, got {actual}")]
    Undersized { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: SensorGeometry = SensorGeometry {
        width: 3,
        height: 2,
    };

    fn pixel_bytes(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn test_exact_payload() {
        let payload = pixel_bytes(&[1, 2, 3, 4, 5, 6]);
        let frame = ImageFrame::from_payload(&payload, GEOMETRY, 0).unwrap();
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.pixels(), &[1u16, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_header_is_dropped() {
        let mut payload = vec![0xEE; 10];
        payload.extend(pixel_bytes(&[0x0102, 0x0304, 5, 6, 7, 0xFFFF]));
        let frame = ImageFrame::from_payload(&payload, GEOMETRY, 7).unwrap();
        assert_eq!(frame.pixels()[0], 0x0102);
        assert_eq!(frame.pixels()[5], 0xFFFF);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_undersized_payload() {
        let payload = pixel_bytes(&[1, 2, 3, 4, 5]);
        let result = ImageFrame::from_payload(&payload, GEOMETRY, 0);
        assert!(matches!(
            result,
            Err(ImageError::Undersized {
                expected: 12,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_pixel_access() {
        let payload = pixel_bytes(&[10, 11, 12, 20, 21, 22]);
        let frame = ImageFrame::from_payload(&payload, GEOMETRY, 0).unwrap();
        assert_eq!(frame.get(0, 0), Some(10));
        assert_eq!(frame.get(2, 0), Some(12));
        assert_eq!(frame.get(1, 1), Some(21));
        assert_eq!(frame.get(3, 0), None);
        assert_eq!(frame.get(0, 2), None);
    }

    #[test]
    fn test_min_max() {
        let payload = pixel_bytes(&[300, 2, 900, 4, 5, 6]);
        let frame = ImageFrame::from_payload(&payload, GEOMETRY, 0).unwrap();
        assert_eq!(frame.min_max(), Some((2, 900)));
    }
}
