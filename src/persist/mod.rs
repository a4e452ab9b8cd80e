//! Image persistence.
//!
//! A captured frame is written by exactly one encoder, chosen from the
//! destination's file extension:
//!
//! - `.tif` / `.tiff`: [`OutputKind::RasterScanline`], written row by row
//!   by [`RasterEncoder`].
//! - `.fit` / `.fits`: [`OutputKind::ScientificArray`], written as one
//!   two-dimensional array by [`FitsEncoder`].
//!
//! Encoders only read the frame. On failure they release the file handle and
//! remove the partially written file before returning the error.

mod fits;
mod raster;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::capture::CapturedFrame;
use crate::pixel::PixelFormat;
use crate::validation::validate_frame;

pub use fits::FitsEncoder;
pub use raster::RasterEncoder;

/// Text identifying this tool inside written files.
pub(crate) fn generator() -> String {
    format!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// One-line description of this tool for file headers.
pub(crate) fn project_line() -> String {
    format!("{}: {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_DESCRIPTION"))
}

/// Container format of the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// TIFF, one scanline per strip.
    RasterScanline,
    /// FITS primary image.
    ScientificArray,
}

impl OutputKind {
    /// Select the container from the file extension, ignoring case.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("tif" | "tiff") => Ok(Self::RasterScanline),
            Some("fit" | "fits") => Ok(Self::ScientificArray),
            _ => Err(PersistError::UnknownOutputType(path.to_path_buf())),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RasterScanline => f.write_str("TIFF"),
            Self::ScientificArray => f.write_str("FITS"),
        }
    }
}

/// Error type for image persistence.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The destination has no recognised image extension.
    #[error("Unknown image output type for '{}', valid types are <filename>.fit or <filename>.tif", .0.display())]
    UnknownOutputType(PathBuf),

    /// The container cannot hold this pixel format.
    #[error("{format} frames cannot be written as {kind}")]
    UnsupportedFormatForContainer {
        /// Pixel format of the frame.
        format: PixelFormat,
        /// Requested container.
        kind: OutputKind,
    },

    /// Buffer length does not match the frame's format and geometry.
    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize {
        /// Size derived from the pixel encoding model.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// Frame metadata or geometry is inconsistent.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// TIFF encoder failure.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// FITS library failure.
    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Raw FITS call returned a non-zero status.
    #[error("FITS status {status} during {step}")]
    FitsStatus {
        /// cfitsio status code.
        status: i32,
        /// Write step that failed.
        step: &'static str,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Flushing or closing the finished file failed.
    #[error("Failed to close '{}': {source}", .path.display())]
    Close {
        /// File being closed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Serializes a frame into one container format.
pub trait FrameEncoder {
    /// Container produced by this encoder.
    fn kind(&self) -> OutputKind;

    /// Write `frame` to `path`, replacing any existing file.
    fn encode(&self, frame: &CapturedFrame, path: &Path) -> Result<()>;
}

/// Write a captured frame to `path` using the container selected by `target`.
///
/// The frame is validated first; an inconsistent frame never reaches an
/// encoder. The frame's buffer is released when this returns.
pub fn persist(frame: CapturedFrame, target: OutputKind, path: &Path) -> Result<()> {
    validate_frame(&frame)?;

    let encoder: &dyn FrameEncoder = match target {
        OutputKind::RasterScanline => &RasterEncoder,
        OutputKind::ScientificArray => &FitsEncoder,
    };
    encoder.encode(&frame, path)?;

    info!(path = %path.display(), kind = %encoder.kind(), "created successfully");
    Ok(())
}

/// Resolve the container from `path` and write the frame.
pub fn persist_to(frame: CapturedFrame, path: &Path) -> Result<()> {
    let target = OutputKind::from_path(path)?;
    persist(frame, target, path)
}

/// Run `write` against `path`, removing whatever it left behind on failure.
///
/// `write` must have released its file handle by the time it returns.
pub(crate) fn write_or_discard<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let result = write(path);
    if result.is_err() {
        discard_partial(path);
    }
    result
}

/// Best-effort removal of a file left behind by a failed write.
fn discard_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "cannot remove partial file"),
    }
}
