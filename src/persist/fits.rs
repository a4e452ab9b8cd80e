//! FITS output.

use std::ffi::CString;
use std::path::Path;

use fitsio::hdu::FitsHdu;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

use super::{
    generator, project_line, write_or_discard, FrameEncoder, OutputKind, PersistError, Result,
};
use crate::capture::CapturedFrame;
use crate::pixel::PixelFormat;

/// Writes monochrome frames as a FITS primary image.
///
/// RAW8 becomes an unsigned byte image, RAW16 an unsigned 16-bit image.
/// The header carries the observation time, exposure, binning and pixel
/// size of the capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsEncoder;

impl FrameEncoder for FitsEncoder {
    fn kind(&self) -> OutputKind {
        OutputKind::ScientificArray
    }

    fn encode(&self, frame: &CapturedFrame, path: &Path) -> Result<()> {
        let data_type = image_type(frame.format())?;
        write_or_discard(path, |path| write_fits(frame, data_type, path))
    }
}

fn image_type(format: PixelFormat) -> Result<ImageType> {
    match format {
        PixelFormat::Raw8 => Ok(ImageType::UnsignedByte),
        PixelFormat::Raw16 => Ok(ImageType::UnsignedShort),
        PixelFormat::Rgb24 | PixelFormat::Y8 => Err(PersistError::UnsupportedFormatForContainer {
            format,
            kind: OutputKind::ScientificArray,
        }),
    }
}

// Everything is flushed with a checked status before returning; dropping
// `fptr` afterwards only closes the handle.
fn write_fits(frame: &CapturedFrame, data_type: ImageType, path: &Path) -> Result<()> {
    let geometry = frame.geometry();
    let dimensions = [geometry.height as usize, geometry.width as usize];
    let description = ImageDescription {
        data_type,
        dimensions: &dimensions,
    };

    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let hdu = fptr.primary_hdu()?;

    match frame.format() {
        PixelFormat::Raw16 => {
            let samples: Vec<u16> = frame
                .buffer
                .as_slice()
                .chunks_exact(2)
                .filter_map(|px| match px {
                    [lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
                    _ => None,
                })
                .collect();
            hdu.write_image(&mut fptr, &samples)?;
        }
        _ => hdu.write_image(&mut fptr, frame.buffer.as_slice())?,
    }

    write_header(&mut fptr, &hdu, frame)?;
    flush(&mut fptr)
}

fn write_header(fptr: &mut FitsFile, hdu: &FitsHdu, frame: &CapturedFrame) -> Result<()> {
    let meta = &frame.metadata;

    hdu.write_key(fptr, "DATE-OBS", meta.timestamp_utc())?;
    hdu.write_key(fptr, "EXPTIME", meta.exposure_seconds)?;
    hdu.write_key(fptr, "XBINNING", i64::from(meta.x_binning))?;
    hdu.write_key(fptr, "YBINNING", i64::from(meta.y_binning))?;
    if let Some([pix_x, pix_y]) = meta.pixel_size_um {
        hdu.write_key(fptr, "PIXSIZE1", pix_x)?;
        hdu.write_key(fptr, "PIXSIZE2", pix_y)?;
    }

    write_comment(fptr, &format!("Generated by {}", generator()))?;
    write_comment(fptr, &project_line())
}

/// Append a `COMMENT` card to the current HDU.
#[allow(unsafe_code)]
fn write_comment(fptr: &mut FitsFile, text: &str) -> Result<()> {
    let comment = CString::new(text).map_err(|_| PersistError::FitsStatus {
        status: -1,
        step: "comment encoding",
    })?;
    let mut status = 0;
    // SAFETY: `fptr` is an open file owned for the duration of the call and
    // `comment` is a valid NUL-terminated string that outlives it.
    unsafe {
        fitsio::sys::ffpcom(fptr.as_raw(), comment.as_ptr(), &mut status);
    }
    check_status(status, "write comment")
}

/// Flush buffered header and data blocks to disk.
#[allow(unsafe_code)]
fn flush(fptr: &mut FitsFile) -> Result<()> {
    let mut status = 0;
    // SAFETY: `fptr` is an open file owned for the duration of the call.
    unsafe {
        fitsio::sys::ffflus(fptr.as_raw(), &mut status);
    }
    check_status(status, "flush")
}

const fn check_status(status: i32, step: &'static str) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(PersistError::FitsStatus { status, step })
    }
}
