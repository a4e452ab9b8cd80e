//! asi-capture: single-frame astronomy camera capture.
//!
//! A camera is driven through the [`CameraControl`] trait: controls are
//! resolved by name and applied, one exposure is taken with bounded retry,
//! and the frame is written as TIFF or FITS depending on the output file's
//! extension. [`V4L2Device`] implements the trait for Video4Linux2 cameras;
//! tests use a scripted mock.

pub mod capture;
pub mod controls;
pub mod device;
pub mod logging;
pub mod persist;
pub mod pixel;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capture::{CaptureConfig, CaptureSession, CapturedFrame};
pub use controls::{
    apply_assignments, apply_exposure, parse_assignments, try_apply_exposure, ControlId,
};
pub use device::{list_devices, V4L2Device};
pub use persist::{persist, persist_to, OutputKind, PersistError};
pub use pixel::PixelFormat;
pub use traits::{CameraControl, CameraError, CameraInfo, RoiFormat};
