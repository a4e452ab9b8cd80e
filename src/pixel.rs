//! Pixel encoding model.
//!
//! Every buffer-sizing and layout decision in the crate goes through this
//! module, both when capture sizes its buffer and when persistence lays out
//! scanlines or checks the buffer length.

use std::fmt;
use std::str::FromStr;

use crate::traits::{CameraError, Result};

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Raw8,
    /// 16-bit monochrome, little-endian samples.
    Raw16,
    /// 24-bit packed RGB (colour cameras only).
    Rgb24,
    /// 8-bit monochrome produced by a colour sensor.
    Y8,
}

impl PixelFormat {
    /// All supported formats, in vendor code order.
    pub const ALL: [Self; 4] = [Self::Raw8, Self::Rgb24, Self::Raw16, Self::Y8];

    /// Canonical name as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw8 => "RAW8",
            Self::Raw16 => "RAW16",
            Self::Rgb24 => "RGB24",
            Self::Y8 => "Y8",
        }
    }

    /// Map a vendor image-type code to a format.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Raw8),
            1 => Ok(Self::Rgb24),
            2 => Ok(Self::Raw16),
            3 => Ok(Self::Y8),
            other => Err(CameraError::UnsupportedFormat(format!("image type code {other}"))),
        }
    }

    /// Bytes occupied by one pixel in the raw buffer.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Raw8 | Self::Y8 => 1,
            Self::Raw16 => 2,
            Self::Rgb24 => 3,
        }
    }

    /// Bits per stored pixel: 8, 16, 24 or 8.
    #[must_use]
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            Self::Raw8 | Self::Y8 => 8,
            Self::Raw16 => 16,
            Self::Rgb24 => 24,
        }
    }

    /// Samples per pixel: 3 for RGB, 1 otherwise.
    #[must_use]
    pub const fn samples_per_pixel(self) -> u16 {
        match self {
            Self::Rgb24 => 3,
            Self::Raw8 | Self::Raw16 | Self::Y8 => 1,
        }
    }

    /// Whether the format carries colour.
    #[must_use]
    pub const fn is_color(self) -> bool {
        matches!(self, Self::Rgb24)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CameraError::UnsupportedFormat(s.to_owned()))
    }
}

/// Size in bytes of a `width` x `height` frame in `format`.
///
/// Returns `CameraError::Allocation` if the product does not fit in `usize`.
pub fn buffer_size(format: PixelFormat, width: u32, height: u32) -> Result<usize> {
    let pixels = usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h));

    pixels
        .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
        .ok_or(CameraError::Allocation {
            width,
            height,
            format,
        })
}

/// Length in bytes of one scanline, `width * bits_per_sample / 8`.
#[must_use]
pub fn row_bytes(format: PixelFormat, width: u32) -> usize {
    usize::try_from(width).unwrap_or(usize::MAX) * usize::from(format.bits_per_sample()) / 8
}
