//! Frame validation utilities.
//!
//! [`validate_frame`] runs before every write and rejects frames whose
//! buffer or metadata disagree with their geometry. [`validate_gradient`]
//! checks monochrome test patterns and is used with virtual cameras.

use crate::capture::CapturedFrame;
use crate::persist::{PersistError, Result};
use crate::pixel::{self, PixelFormat};

/// Minimum brightness change across a frame for it to count as a gradient.
const MIN_GRADIENT_SPAN: f64 = 50.0;

/// Checks that a frame is internally consistent.
///
/// # Errors
///
/// Returns `BufferSize` if the buffer length differs from the size derived
/// from the frame's format and geometry, and `InvalidFrame` if the geometry
/// is empty, the metadata disagrees with it, or a recorded pixel size is not
/// positive.
pub fn validate_frame(frame: &CapturedFrame) -> Result<()> {
    let geometry = frame.geometry();
    if geometry.width == 0 || geometry.height == 0 || geometry.binning == 0 {
        return Err(PersistError::InvalidFrame(format!(
            "empty geometry {}x{} bin {}",
            geometry.width, geometry.height, geometry.binning
        )));
    }

    let expected = pixel::buffer_size(frame.format(), geometry.width, geometry.height)
        .map_err(|err| PersistError::InvalidFrame(err.to_string()))?;
    if frame.buffer.len() != expected {
        return Err(PersistError::BufferSize {
            expected,
            actual: frame.buffer.len(),
        });
    }

    let meta = &frame.metadata;
    if meta.x_binning != geometry.binning || meta.y_binning != geometry.binning {
        return Err(PersistError::InvalidFrame(format!(
            "metadata binning {}x{} does not match geometry binning {}",
            meta.x_binning, meta.y_binning, geometry.binning
        )));
    }

    if !meta.exposure_seconds.is_finite() || meta.exposure_seconds < 0.0 {
        return Err(PersistError::InvalidFrame(format!(
            "exposure {} s is not a valid duration",
            meta.exposure_seconds
        )));
    }

    if let Some([x, y]) = meta.pixel_size_um {
        if !(x.is_finite() && y.is_finite() && x > 0.0 && y > 0.0) {
            return Err(PersistError::InvalidFrame(format!(
                "pixel size {x} x {y} um must be positive"
            )));
        }
    }

    Ok(())
}

/// Validates that a monochrome frame brightens from left to right.
///
/// Samples every tenth pixel of the centre row, allowing small dips from
/// sensor noise, and requires a total change of at least
/// `MIN_GRADIENT_SPAN` in 8-bit units.
pub fn validate_gradient(frame: &CapturedFrame) -> Result<()> {
    let format = frame.format();
    if format.is_color() {
        return Err(PersistError::InvalidFrame(format!(
            "gradient check needs a monochrome frame, got {format}"
        )));
    }

    let geometry = frame.geometry();
    let row_len = pixel::row_bytes(format, geometry.width);
    let center = usize::try_from(geometry.height / 2).unwrap_or(0);
    let row = frame
        .buffer
        .as_slice()
        .chunks_exact(row_len.max(1))
        .nth(center)
        .ok_or_else(|| PersistError::InvalidFrame("frame has no centre row".to_owned()))?;

    let samples: Vec<f64> = match format {
        PixelFormat::Raw16 => row
            .chunks_exact(2)
            .step_by(10)
            .filter_map(|px| match px {
                [lo, hi] => Some(f64::from(u16::from_le_bytes([*lo, *hi])) / 257.0),
                _ => None,
            })
            .collect(),
        _ => row.iter().step_by(10).map(|&px| f64::from(px)).collect(),
    };

    for (x, pair) in samples.windows(2).enumerate() {
        if let [prev, next] = pair {
            if *next < prev - 1.0 {
                return Err(PersistError::InvalidFrame(format!(
                    "gradient not increasing at sample {}: {next} < {prev}",
                    x + 1
                )));
            }
        }
    }

    let span = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => last - first,
        _ => 0.0,
    };
    if span < MIN_GRADIENT_SPAN {
        return Err(PersistError::InvalidFrame(format!(
            "insufficient brightness change for gradient: {span} (expected at least {MIN_GRADIENT_SPAN})"
        )));
    }

    Ok(())
}
