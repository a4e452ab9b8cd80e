//! Core traits and types for the camera control abstraction.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::controls::ControlId;
use crate::persist::PersistError;
use crate::pixel::PixelFormat;

/// Frame dimensions as configured on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Symmetric pixel binning factor (1 = no binning).
    pub binning: u32,
}

impl FrameGeometry {
    /// Create a new geometry.
    #[must_use]
    pub const fn new(width: u32, height: u32, binning: u32) -> Self {
        Self {
            width,
            height,
            binning,
        }
    }
}

/// Region-of-interest format negotiated with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiFormat {
    /// Frame geometry.
    pub geometry: FrameGeometry,
    /// Pixel format.
    pub format: PixelFormat,
}

impl RoiFormat {
    /// Create a new ROI format.
    #[must_use]
    pub const fn new(width: u32, height: u32, binning: u32, format: PixelFormat) -> Self {
        Self {
            geometry: FrameGeometry::new(width, height, binning),
            format,
        }
    }
}

/// Exposure status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    /// No exposure in progress.
    Idle,
    /// Exposing.
    Working,
    /// Exposure finished, data waiting for download.
    Success,
    /// Exposure failed and must be restarted.
    Failed,
}

impl fmt::Display for ExposureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Idle => "idle",
            Self::Working => "exposing",
            Self::Success => "exposure finished and waiting for download",
            Self::Failed => "exposure failed",
        };
        f.write_str(msg)
    }
}

/// Static camera properties.
#[derive(Debug, Clone, Default)]
pub struct CameraInfo {
    /// Camera name.
    pub name: String,
    /// Driver name.
    pub driver: String,
    /// Bus information.
    pub bus_info: String,
    /// Maximum frame width in pixels.
    pub max_width: u32,
    /// Maximum frame height in pixels.
    pub max_height: u32,
    /// Whether the sensor is a colour sensor.
    pub is_color: bool,
    /// Physical pixel size in microns (x, y), when known.
    pub pixel_size_um: Option<[f64; 2]>,
    /// Pixel formats the device accepts.
    pub formats: Vec<PixelFormat>,
}

/// Capabilities of one device control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescriptor {
    /// Control name as reported by the device.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Minimum value.
    pub min: i64,
    /// Maximum value.
    pub max: i64,
    /// Default value.
    pub default: i64,
    /// Whether the control can be device-managed.
    pub auto_supported: bool,
    /// Whether the control can be written.
    pub writable: bool,
}

/// Current value of a control together with its auto flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlValue {
    /// Control value.
    pub value: i64,
    /// Whether the device manages the value.
    pub auto: bool,
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),

    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),

    /// A device call failed.
    #[error("{op} failed: {message}")]
    Device {
        /// Facade operation that failed.
        op: &'static str,
        /// Device-reported reason.
        message: String,
    },

    /// Pixel format is unknown or not handled by the device.
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Control name is not in the vocabulary.
    #[error("Unknown control '{0}'")]
    UnknownControl(String),

    /// Control exists but the device cannot handle it.
    #[error("Control {0} is not supported by this device")]
    ControlNotSupported(ControlId),

    /// Batch assignment token is not of the form `name=value`.
    #[error("Malformed assignment '{0}', expected name=value")]
    MalformedAssignment(String),

    /// Assignment value is neither an integer nor `auto`.
    #[error("Invalid value '{value}' for control '{name}'")]
    InvalidControlValue {
        /// Control name.
        name: String,
        /// Offending value.
        value: String,
    },

    /// Frame buffer could not be allocated.
    #[error("Cannot allocate frame buffer for {width}x{height} {format}")]
    Allocation {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
        /// Pixel format.
        format: PixelFormat,
    },

    /// Pixel data transfer after a successful exposure failed.
    #[error("Failed to fetch frame data: {0}")]
    Fetch(String),

    /// Every exposure attempt failed.
    #[error("Exposure failed after {attempts} attempts")]
    ExposureExhausted {
        /// Number of exposure starts issued.
        attempts: u32,
    },

    /// The device reported a status outside the exposure protocol.
    #[error("Invalid exposure state: {0}")]
    InvalidState(ExposureStatus),

    /// Operation timed out.
    #[error("Exposure attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Writing the image file failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the vendor control channel of one opened camera.
///
/// Opening and initialising happen in the implementor's constructor, closing
/// happens on drop. A handle is owned by a single capture at a time.
pub trait CameraControl {
    /// Static camera properties.
    fn info(&self) -> &CameraInfo;

    /// Enumerate the device's controls.
    fn controls(&self) -> Result<Vec<ControlDescriptor>>;

    /// Read a control's current value and auto flag.
    fn control(&self, id: ControlId) -> Result<ControlValue>;

    /// Write a control value, optionally handing it to the device as an auto seed.
    fn set_control(&mut self, id: ControlId, value: i64, auto: bool) -> Result<()>;

    /// Request a region-of-interest format. The device may clamp it.
    fn set_roi_format(&mut self, roi: &RoiFormat) -> Result<()>;

    /// Read back the region-of-interest format actually in effect.
    fn roi_format(&self) -> Result<RoiFormat>;

    /// Start a single exposure without blocking.
    fn start_exposure(&mut self) -> Result<()>;

    /// Poll the status of the running exposure.
    fn exposure_status(&mut self) -> Result<ExposureStatus>;

    /// Copy the finished exposure into `buffer`.
    fn fetch_frame(&mut self, buffer: &mut [u8]) -> Result<()>;

    /// Stop the exposure and release device-side resources.
    fn stop_exposure(&mut self) -> Result<()>;
}
