//! TIFF output, one scanline per strip.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::Tag;

use super::{generator, write_or_discard, FrameEncoder, OutputKind, PersistError, Result};
use crate::capture::{CaptureMetadata, CapturedFrame};
use crate::pixel;

/// EXIF `ExposureTime`, stored in the image directory.
pub(crate) const EXPOSURE_TIME_TAG: u16 = 33434;

/// Writes frames as uncompressed TIFF.
///
/// Photometric interpretation follows [`pixel::PixelFormat::is_color`];
/// the byte layout of each row is `row_bytes` from the pixel model.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterEncoder;

impl FrameEncoder for RasterEncoder {
    fn kind(&self) -> OutputKind {
        OutputKind::RasterScanline
    }

    fn encode(&self, frame: &CapturedFrame, path: &Path) -> Result<()> {
        write_or_discard(path, |path| {
            let mut writer = BufWriter::new(File::create(path)?);
            write_tiff(&mut writer, frame)?;

            let file = writer.into_inner().map_err(|err| PersistError::Close {
                path: path.to_path_buf(),
                source: err.into_error(),
            })?;
            file.sync_all().map_err(|source| PersistError::Close {
                path: path.to_path_buf(),
                source,
            })
        })
    }
}

fn write_tiff<W: Write + Seek>(writer: &mut W, frame: &CapturedFrame) -> Result<()> {
    let mut encoder = TiffEncoder::new(writer)?;
    let format = frame.format();

    if format.is_color() {
        write_scanlines::<_, colortype::RGB8>(&mut encoder, frame, <[u8]>::to_vec)
    } else if format.bits_per_sample() == 16 {
        write_scanlines::<_, colortype::Gray16>(&mut encoder, frame, le_samples)
    } else {
        write_scanlines::<_, colortype::Gray8>(&mut encoder, frame, <[u8]>::to_vec)
    }
}

fn write_scanlines<W, C>(
    encoder: &mut TiffEncoder<W>,
    frame: &CapturedFrame,
    samples: fn(&[u8]) -> Vec<C::Inner>,
) -> Result<()>
where
    W: Write + Seek,
    C: ColorType,
    [C::Inner]: TiffValue,
{
    let geometry = frame.geometry();
    let mut image = encoder.new_image::<C>(geometry.width, geometry.height)?;
    image.rows_per_strip(1)?;

    let meta = &frame.metadata;
    let directory = image.encoder();
    directory.write_tag(Tag::DateTime, tiff_datetime(meta).as_str())?;
    directory.write_tag(Tag::Software, generator().as_str())?;
    directory.write_tag(
        Tag::Unknown(EXPOSURE_TIME_TAG),
        exposure_rational(meta.exposure_seconds),
    )?;

    let row_len = pixel::row_bytes(frame.format(), geometry.width);
    for row in frame.buffer.as_slice().chunks_exact(row_len) {
        image.write_strip(&samples(row))?;
    }

    image.finish()?;
    Ok(())
}

/// Raw16 rows hold little-endian samples.
fn le_samples(row: &[u8]) -> Vec<u16> {
    row.chunks_exact(2)
        .filter_map(|px| match px {
            [lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        })
        .collect()
}

fn tiff_datetime(meta: &CaptureMetadata) -> String {
    meta.captured_at.format("%Y:%m:%d %H:%M:%S").to_string()
}

/// Exposure as a rational number of seconds, microsecond resolution when it fits.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn exposure_rational(seconds: f64) -> Rational {
    let seconds = seconds.max(0.0);
    let micros = (seconds * 1e6).round();
    if micros <= f64::from(u32::MAX) {
        Rational {
            n: micros as u32,
            d: 1_000_000,
        }
    } else {
        Rational {
            n: seconds.round().min(f64::from(u32::MAX)) as u32,
            d: 1,
        }
    }
}
