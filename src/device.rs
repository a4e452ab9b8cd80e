//! V4L2 device implementation using the v4l crate.
//!
//! V4L2 has no single-exposure API, so an exposure here is one frame
//! dequeued from a short-lived mmap stream. The frame is held until it is
//! fetched or the exposure is stopped.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::control::{Flags as ControlFlags, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Control, Device, FourCC};

use crate::controls::ControlId;
use crate::pixel::{self, PixelFormat};
use crate::traits::{
    CameraControl, CameraError, CameraInfo, ControlDescriptor, ControlValue, ExposureStatus,
    Result, RoiFormat,
};

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_GAMMA: u32 = 0x0098_0910;
const CID_AUTOGAIN: u32 = 0x0098_0912;
const CID_GAIN: u32 = 0x0098_0913;
const CID_HFLIP: u32 = 0x0098_0914;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// `V4L2_EXPOSURE_AUTO` and `V4L2_EXPOSURE_MANUAL` menu entries.
const EXPOSURE_MODE_AUTO: i64 = 0;
const EXPOSURE_MODE_MANUAL: i64 = 1;

/// Absolute exposure is reported in 100 us steps.
const EXPOSURE_UNIT_US: i64 = 100;

const STREAM_BUFFERS: u32 = 4;

/// V4L2 control ids backing a vocabulary control.
#[derive(Debug, Clone, Copy)]
struct ControlMapping {
    value: u32,
    auto: Option<u32>,
}

const fn mapping(id: ControlId) -> Option<ControlMapping> {
    let (value, auto) = match id {
        ControlId::Gain => (CID_GAIN, Some(CID_AUTOGAIN)),
        ControlId::Exposure => (CID_EXPOSURE_ABSOLUTE, Some(CID_EXPOSURE_AUTO)),
        ControlId::Gamma => (CID_GAMMA, None),
        ControlId::Flip => (CID_HFLIP, None),
        ControlId::Brightness => (CID_BRIGHTNESS, None),
        _ => return None,
    };
    Some(ControlMapping { value, auto })
}

fn fourcc_for(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Raw8 | PixelFormat::Y8 => FourCC::new(b"GREY"),
        PixelFormat::Raw16 => FourCC::new(b"Y16 "),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
    }
}

fn formats_for(fourcc: FourCC) -> &'static [PixelFormat] {
    match &fourcc.repr {
        b"GREY" => &[PixelFormat::Raw8, PixelFormat::Y8],
        b"Y16 " => &[PixelFormat::Raw16],
        b"RGB3" => &[PixelFormat::Rgb24],
        _ => &[],
    }
}

fn device_error(op: &'static str, err: &std::io::Error) -> CameraError {
    CameraError::Device {
        op,
        message: err.to_string(),
    }
}

/// A video capture node found on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Index N of `/dev/videoN`.
    pub index: usize,
    /// Name reported by the driver.
    pub name: String,
    /// Device node path.
    pub path: PathBuf,
}

/// Enumerate V4L2 device nodes, ordered by index.
pub fn list_devices() -> Vec<DeviceSummary> {
    let mut devices: Vec<DeviceSummary> = v4l::context::enum_devices()
        .into_iter()
        .map(|node| DeviceSummary {
            index: node.index(),
            name: node.name().unwrap_or_default(),
            path: node.path().to_path_buf(),
        })
        .collect();
    devices.sort_by_key(|dev| dev.index);
    devices
}

/// Frame dequeued by the last exposure.
struct PendingFrame {
    data: Vec<u8>,
    stride: usize,
}

/// V4L2 camera implementing [`CameraControl`].
pub struct V4L2Device {
    device: Device,
    info: CameraInfo,
    requested: Option<PixelFormat>,
    status: ExposureStatus,
    pending: Option<PendingFrame>,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let node = format!("/dev/video{index}");
        if !Path::new(&node).exists() {
            return Err(CameraError::DeviceNotFound(index));
        }

        let device = Device::with_path(&node)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("{node}: {err}")))?;
        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE | v4l::capability::Flags::STREAMING)
        {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{node} cannot stream video capture"
            )));
        }

        let mut formats: Vec<PixelFormat> = device
            .enum_formats()
            .map_err(|err| device_error("enumerate formats", &err))?
            .iter()
            .flat_map(|desc| formats_for(desc.fourcc).iter().copied())
            .collect();
        formats.sort_by_key(|f| PixelFormat::ALL.iter().position(|a| a == f));
        formats.dedup();

        let (max_width, max_height) = max_frame_size(&device, &formats);

        let info = CameraInfo {
            name: caps.card,
            driver: caps.driver,
            bus_info: caps.bus,
            max_width,
            max_height,
            is_color: formats.contains(&PixelFormat::Rgb24),
            pixel_size_um: None,
            formats,
        };
        debug!(name = %info.name, driver = %info.driver, "opened camera");

        Ok(Self {
            device,
            info,
            requested: None,
            status: ExposureStatus::Idle,
            pending: None,
        })
    }

    /// Set the physical pixel size in microns. V4L2 does not report it.
    #[must_use]
    pub const fn with_pixel_size(mut self, x_um: f64, y_um: f64) -> Self {
        self.info.pixel_size_um = Some([x_um, y_um]);
        self
    }

    fn read_raw(&self, id: u32) -> std::io::Result<i64> {
        match self.device.control(id)?.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(flag) => Ok(i64::from(flag)),
            other => Err(std::io::Error::other(format!(
                "unexpected value {other:?} for control {id:#x}"
            ))),
        }
    }

    fn write_raw(&self, control: ControlId, id: u32, value: Value) -> Result<()> {
        self.device
            .set_control(Control { id, value })
            .map_err(|err| control_error(control, "set control", &err))
    }
}

/// Drivers answer `EINVAL` for control ids they do not implement.
fn control_error(control: ControlId, op: &'static str, err: &std::io::Error) -> CameraError {
    if err.kind() == std::io::ErrorKind::InvalidInput {
        CameraError::ControlNotSupported(control)
    } else {
        device_error(op, err)
    }
}

fn max_frame_size(device: &Device, formats: &[PixelFormat]) -> (u32, u32) {
    let area = |(w, h): (u32, u32)| u64::from(w) * u64::from(h);
    let mut best = (0, 0);
    for format in formats {
        let Ok(sizes) = device.enum_framesizes(fourcc_for(*format)) else {
            continue;
        };
        for size in sizes {
            let candidate = match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(d) => (d.width, d.height),
                v4l::framesize::FrameSizeEnum::Stepwise(s) => (s.max_width, s.max_height),
            };
            if area(candidate) > area(best) {
                best = candidate;
            }
        }
    }
    best
}

impl CameraControl for V4L2Device {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn controls(&self) -> Result<Vec<ControlDescriptor>> {
        let descriptions = self
            .device
            .query_controls()
            .map_err(|err| device_error("enumerate controls", &err))?;
        let present = |cid: u32| descriptions.iter().any(|d| d.id == cid);

        let mut controls = Vec::new();
        for id in ControlId::ALL {
            let Some(map) = mapping(id) else { continue };
            let Some(desc) = descriptions.iter().find(|d| d.id == map.value) else {
                continue;
            };

            let scale = if id == ControlId::Exposure { EXPOSURE_UNIT_US } else { 1 };
            controls.push(ControlDescriptor {
                name: id.name().to_owned(),
                description: desc.name.clone(),
                min: desc.minimum.saturating_mul(scale),
                max: desc.maximum.saturating_mul(scale),
                default: desc.default.saturating_mul(scale),
                auto_supported: map.auto.is_some_and(present),
                writable: !desc.flags.contains(ControlFlags::READ_ONLY),
            });
        }
        Ok(controls)
    }

    fn control(&self, id: ControlId) -> Result<ControlValue> {
        let map = mapping(id).ok_or(CameraError::ControlNotSupported(id))?;
        let raw = self
            .read_raw(map.value)
            .map_err(|err| control_error(id, "get control", &err))?;

        let auto = match (id, map.auto) {
            (ControlId::Exposure, Some(cid)) => {
                self.read_raw(cid).is_ok_and(|mode| mode != EXPOSURE_MODE_MANUAL)
            }
            (_, Some(cid)) => self.read_raw(cid).is_ok_and(|flag| flag != 0),
            (_, None) => false,
        };

        let value = if id == ControlId::Exposure {
            raw.saturating_mul(EXPOSURE_UNIT_US)
        } else {
            raw
        };
        Ok(ControlValue { value, auto })
    }

    fn set_control(&mut self, id: ControlId, value: i64, auto: bool) -> Result<()> {
        let map = mapping(id).ok_or(CameraError::ControlNotSupported(id))?;

        let (raw, auto_value) = if id == ControlId::Exposure {
            let mode = if auto { EXPOSURE_MODE_AUTO } else { EXPOSURE_MODE_MANUAL };
            ((value / EXPOSURE_UNIT_US).max(1), Value::Integer(mode))
        } else {
            (value, Value::Boolean(auto))
        };

        match map.auto {
            Some(cid) if !auto => {
                // Manual values are rejected while the driver owns the control.
                self.write_raw(id, cid, auto_value)?;
                self.write_raw(id, map.value, Value::Integer(raw))
            }
            Some(cid) => {
                self.write_raw(id, map.value, Value::Integer(raw))?;
                self.write_raw(id, cid, auto_value)
            }
            None => {
                if auto {
                    warn!(control = %id, "device has no auto mode, applying value only");
                }
                self.write_raw(id, map.value, Value::Integer(raw))
            }
        }
    }

    fn set_roi_format(&mut self, roi: &RoiFormat) -> Result<()> {
        if roi.geometry.binning != 1 {
            warn!(binning = roi.geometry.binning, "binning not supported, using 1");
        }

        let mut fmt = self
            .device
            .format()
            .map_err(|err| device_error("get format", &err))?;
        fmt.width = roi.geometry.width;
        fmt.height = roi.geometry.height;
        fmt.fourcc = fourcc_for(roi.format);

        self.device
            .set_format(&fmt)
            .map_err(|err| device_error("set format", &err))?;
        self.requested = Some(roi.format);
        Ok(())
    }

    fn roi_format(&self) -> Result<RoiFormat> {
        let fmt = self
            .device
            .format()
            .map_err(|err| device_error("get format", &err))?;

        let candidates = formats_for(fmt.fourcc);
        let format = match self.requested {
            Some(requested) if candidates.contains(&requested) => requested,
            _ => candidates
                .first()
                .copied()
                .ok_or_else(|| CameraError::UnsupportedFormat(fmt.fourcc.to_string()))?,
        };

        Ok(RoiFormat::new(fmt.width, fmt.height, 1, format))
    }

    fn start_exposure(&mut self) -> Result<()> {
        self.pending = None;
        let stride = self
            .device
            .format()
            .map_err(|err| device_error("get format", &err))?
            .stride as usize;

        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|err| device_error("start exposure", &err))?;

        match stream.next() {
            Ok((buf, meta)) => {
                debug!(sequence = meta.sequence, bytes = meta.bytesused, "frame dequeued");
                self.pending = Some(PendingFrame {
                    data: buf.to_vec(),
                    stride,
                });
                self.status = ExposureStatus::Success;
            }
            Err(err) => {
                warn!(error = %err, "frame dequeue failed");
                self.status = ExposureStatus::Failed;
            }
        }
        Ok(())
    }

    fn exposure_status(&mut self) -> Result<ExposureStatus> {
        Ok(self.status)
    }

    fn fetch_frame(&mut self, buffer: &mut [u8]) -> Result<()> {
        let frame = self
            .pending
            .take()
            .ok_or_else(|| CameraError::Fetch("no finished exposure".to_owned()))?;
        let roi = self.roi_format()?;
        let row_len = pixel::row_bytes(roi.format, roi.geometry.width);
        let stride = frame.stride.max(row_len);

        if row_len == 0 {
            return Err(CameraError::Fetch("empty frame row".to_owned()));
        }
        let rows = buffer.len() / row_len;
        if frame.data.len() < stride * rows.saturating_sub(1) + row_len {
            return Err(CameraError::Fetch(format!(
                "frame holds {} bytes, need {rows} rows of {row_len} with stride {stride}",
                frame.data.len()
            )));
        }

        for (dst, src) in buffer
            .chunks_exact_mut(row_len)
            .zip(frame.data.chunks(stride))
        {
            let src = src
                .get(..row_len)
                .ok_or_else(|| CameraError::Fetch("short frame row".to_owned()))?;
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    fn stop_exposure(&mut self) -> Result<()> {
        self.pending = None;
        self.status = ExposureStatus::Idle;
        Ok(())
    }
}
