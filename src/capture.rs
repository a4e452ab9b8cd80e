//! Single-frame exposure acquisition.
//!
//! A capture negotiates the ROI once, sizes its buffer from the read-back
//! format, then runs the exposure handshake (start, poll, fetch). Only a
//! `Failed` exposure status is retried, up to [`MAX_EXPOSURE_ATTEMPTS`]
//! starts in total. The device's `stop_exposure` is issued exactly once
//! when the capture ends, whatever the outcome.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::controls::ControlId;
use crate::pixel::{self, PixelFormat};
use crate::traits::{CameraControl, CameraError, ExposureStatus, FrameGeometry, Result, RoiFormat};

/// Number of exposure starts before a failing exposure is abandoned.
pub const MAX_EXPOSURE_ATTEMPTS: u32 = 3;

/// Pause between starting an exposure and the first status poll.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Owned pixel bytes of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer(Vec<u8>);

impl RawBuffer {
    /// Allocate a zeroed buffer of `size` bytes without aborting on failure.
    pub fn allocate(size: usize, roi: &RoiFormat) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| CameraError::Allocation {
                width: roi.geometry.width,
                height: roi.geometry.height,
                format: roi.format,
            })?;
        data.resize(size, 0);
        Ok(Self(data))
    }

    /// Buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read-only view of the bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl From<Vec<u8>> for RawBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

/// Acquisition metadata attached to the written file.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMetadata {
    /// UTC time the acquisition started.
    pub captured_at: DateTime<Utc>,
    /// Exposure time in effect, in seconds.
    pub exposure_seconds: f64,
    /// Horizontal binning factor.
    pub x_binning: u32,
    /// Vertical binning factor.
    pub y_binning: u32,
    /// Pixel size in microns (x, y), when known.
    pub pixel_size_um: Option<[f64; 2]>,
}

impl CaptureMetadata {
    /// Observation timestamp as `YYYY-MM-DDThh:mm:ss`.
    #[must_use]
    pub fn timestamp_utc(&self) -> String {
        self.captured_at.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// A fetched frame ready to persist.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Pixel data, exactly `buffer_size(roi)` bytes.
    pub buffer: RawBuffer,
    /// Format actually used by the device.
    pub roi: RoiFormat,
    /// Acquisition metadata.
    pub metadata: CaptureMetadata,
}

impl CapturedFrame {
    /// Frame geometry.
    #[must_use]
    pub const fn geometry(&self) -> FrameGeometry {
        self.roi.geometry
    }

    /// Pixel format.
    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.roi.format
    }
}

/// Requested capture parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Requested ROI; the device may clamp it.
    pub roi: RoiFormat,
    /// Pause between exposure start and the first poll.
    pub settle_delay: Duration,
    /// Optional wall-clock ceiling for a single exposure attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            roi: RoiFormat::new(640, 480, 1, PixelFormat::Raw8),
            settle_delay: DEFAULT_SETTLE_DELAY,
            attempt_timeout: None,
        }
    }
}

/// Terminal result of the exposure loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureOutcome {
    /// Exposure finished; data can be fetched.
    Success {
        /// Exposure starts issued.
        attempts: u32,
    },
    /// Every attempt reported `Failed`.
    Exhausted {
        /// Exposure starts issued.
        attempts: u32,
    },
    /// The device left `Working` for a status outside the protocol.
    InvalidState(ExposureStatus),
}

/// Runs one capture against an exclusively borrowed device.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    config: CaptureConfig,
}

impl CaptureSession {
    /// Create a session with the given parameters.
    #[must_use]
    pub const fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Session parameters.
    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture one frame.
    ///
    /// `stop_exposure` is called exactly once before returning. A stop
    /// failure is logged and never replaces the capture's own result.
    pub fn capture<C: CameraControl>(&self, device: &mut C) -> Result<CapturedFrame> {
        let result = self.acquire(device);

        if let Err(err) = device.stop_exposure() {
            warn!(error = %err, "stop_exposure failed");
        }

        result
    }

    fn acquire<C: CameraControl>(&self, device: &mut C) -> Result<CapturedFrame> {
        let requested = self.config.roi;
        device.set_roi_format(&requested)?;
        let roi = device.roi_format()?;
        debug!(?requested, applied = ?roi, "roi negotiated");

        let size = pixel::buffer_size(roi.format, roi.geometry.width, roi.geometry.height)?;
        let mut buffer = RawBuffer::allocate(size, &roi)?;

        let metadata = stamp_metadata(device, &roi)?;

        info!(
            width = roi.geometry.width,
            height = roi.geometry.height,
            binning = roi.geometry.binning,
            format = %roi.format,
            exposure_s = metadata.exposure_seconds,
            size,
            "capture image"
        );

        match self.run_exposure(device)? {
            ExposureOutcome::Success { attempts } => {
                info!(attempts, "exposure finished");
            }
            ExposureOutcome::Exhausted { attempts } => {
                return Err(CameraError::ExposureExhausted { attempts });
            }
            ExposureOutcome::InvalidState(status) => {
                return Err(CameraError::InvalidState(status));
            }
        }

        device
            .fetch_frame(buffer.as_mut_slice())
            .map_err(|err| match err {
                CameraError::Fetch(msg) => CameraError::Fetch(msg),
                other => CameraError::Fetch(other.to_string()),
            })?;

        Ok(CapturedFrame {
            buffer,
            roi,
            metadata,
        })
    }

    /// Exposure handshake with bounded retry.
    ///
    /// A retry only restarts the exposure; the ROI negotiated before the
    /// first attempt stays in effect and is not renegotiated.
    fn run_exposure<C: CameraControl>(&self, device: &mut C) -> Result<ExposureOutcome> {
        let mut attempt = 1;

        loop {
            device.start_exposure()?;
            debug!(attempt, "exposure started");
            std::thread::sleep(self.config.settle_delay);

            let status = self.poll_until_done(device, attempt)?;

            match status {
                ExposureStatus::Success => {
                    return Ok(ExposureOutcome::Success { attempts: attempt });
                }
                ExposureStatus::Failed if attempt >= MAX_EXPOSURE_ATTEMPTS => {
                    warn!(attempt, %status, "giving up on exposure");
                    return Ok(ExposureOutcome::Exhausted { attempts: attempt });
                }
                ExposureStatus::Failed => {
                    warn!(attempt, %status, "restarting exposure");
                    attempt += 1;
                }
                ExposureStatus::Idle | ExposureStatus::Working => {
                    warn!(attempt, %status, "invalid exposure state");
                    return Ok(ExposureOutcome::InvalidState(status));
                }
            }
        }
    }

    fn poll_until_done<C: CameraControl>(
        &self,
        device: &mut C,
        attempt: u32,
    ) -> Result<ExposureStatus> {
        let started = Instant::now();

        loop {
            let status = device.exposure_status()?;
            if status != ExposureStatus::Working {
                debug!(attempt, %status, "exposure status changed");
                return Ok(status);
            }

            if let Some(limit) = self.config.attempt_timeout {
                if started.elapsed() > limit {
                    return Err(CameraError::Timeout(limit));
                }
            }
        }
    }
}

/// Build metadata from the device state in effect for this capture.
fn stamp_metadata<C: CameraControl>(device: &C, roi: &RoiFormat) -> Result<CaptureMetadata> {
    let micros = match device.control(ControlId::Exposure) {
        Ok(exposure) => exposure.value.max(0),
        Err(CameraError::ControlNotSupported(_)) => {
            debug!("device has no exposure control, recording 0 s");
            0
        }
        Err(err) => return Err(err),
    };
    #[allow(clippy::cast_precision_loss)]
    let exposure_seconds = micros as f64 / 1e6;

    Ok(CaptureMetadata {
        captured_at: Utc::now(),
        exposure_seconds,
        x_binning: roi.geometry.binning,
        y_binning: roi.geometry.binning,
        pixel_size_um: device.info().pixel_size_um,
    })
}
