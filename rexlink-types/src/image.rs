//! Captured fingerprint images

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::text;

/// Raw 8-bit grayscale image delivered by an image-acquired event
///
/// Pixels are row-major, one byte each. Turning them into a file format is
/// left to the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct FingerprintImage {
    /// Name of the scanner that captured the image
    pub scanner: String,
    pub width: u32,
    pub height: u32,

    /// Horizontal resolution (DPI)
    pub resolution_x: u32,

    /// Vertical resolution (DPI)
    pub resolution_y: u32,

    pub pixels: Bytes,
}

impl FingerprintImage {
    const HEADER_SIZE: usize = 16;

    /// Parse an image-acquired payload
    ///
    /// ```text
    /// width | height | resX | resY | pixels(width*height) | scanner name(rest)
    /// ```
    pub fn parse(payload: Bytes) -> Result<Self> {
        let mut cursor = Cursor::new(payload.as_ref());
        let mut field = || {
            cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| Error::truncated("image"))
        };
        let width = field()?;
        let height = field()?;
        let resolution_x = field()?;
        let resolution_y = field()?;

        let pixel_count = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| Error::Validation(format!("image size {}x{} overflows", width, height)))?;
        let pixels_end = Self::HEADER_SIZE
            .checked_add(pixel_count)
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| Error::truncated("image"))?;

        Ok(Self {
            scanner: text::decode(&payload[pixels_end..]),
            width,
            height,
            resolution_x,
            resolution_y,
            pixels: payload.slice(Self::HEADER_SIZE..pixels_end),
        })
    }

    /// Encode as an image-acquired payload
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.pixels.len() + self.scanner.len());
        for value in [self.width, self.height, self.resolution_x, self.resolution_y] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf.extend_from_slice(&self.pixels);
        buf.extend_from_slice(&text::encode(&self.scanner));
        buf
    }

    /// Gray level at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.pixels.get(index).copied()
    }

    /// One row of pixels
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.width as usize;
        self.pixels.get(start..start + self.width as usize)
    }
}

impl fmt::Debug for FingerprintImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintImage")
            .field("scanner", &self.scanner)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("resolution_x", &self.resolution_x)
            .field("resolution_y", &self.resolution_y)
            .field("pixels_len", &self.pixels.len())
            .finish()
    }
}
