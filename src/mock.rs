//! Scripted camera for testing without hardware.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::controls::ControlId;
use crate::pixel::PixelFormat;
use crate::traits::{
    CameraControl, CameraError, CameraInfo, ControlDescriptor, ControlValue, ExposureStatus,
    Result, RoiFormat,
};

/// Mock camera whose exposure results are scripted per start.
#[allow(clippy::struct_excessive_bools)]
pub struct MockCamera {
    info: CameraInfo,
    controls: HashMap<ControlId, ControlValue>,
    unsupported: HashSet<ControlId>,
    roi: RoiFormat,
    max_size: Option<(u32, u32)>,
    forced_roi: Option<RoiFormat>,
    results: VecDeque<ExposureStatus>,
    working_polls: u32,
    pending_working: u32,
    current: ExposureStatus,
    stuck: bool,
    fail_start: bool,
    fail_poll: bool,
    fail_fetch: bool,
    fail_stop: bool,
    start_calls: u32,
    stop_calls: u32,
    poll_calls: u32,
    fetch_calls: u32,
    set_roi_calls: u32,
    set_control_calls: u32,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCamera {
    /// Create a mock camera whose exposures always succeed.
    #[must_use]
    pub fn new() -> Self {
        let mut controls: HashMap<ControlId, ControlValue> = ControlId::ALL
            .into_iter()
            .map(|id| (id, ControlValue { value: 0, auto: false }))
            .collect();
        controls.insert(
            ControlId::Exposure,
            ControlValue {
                value: 10_000,
                auto: false,
            },
        );

        Self {
            info: CameraInfo {
                name: "Mock Camera".to_owned(),
                driver: "mock".to_owned(),
                bus_info: "mock:0".to_owned(),
                max_width: 1936,
                max_height: 1096,
                is_color: true,
                pixel_size_um: Some([2.9, 3.1]),
                formats: PixelFormat::ALL.to_vec(),
            },
            controls,
            unsupported: HashSet::new(),
            roi: RoiFormat::new(640, 480, 1, PixelFormat::Raw8),
            max_size: None,
            forced_roi: None,
            results: VecDeque::new(),
            working_polls: 2,
            pending_working: 0,
            current: ExposureStatus::Idle,
            stuck: false,
            fail_start: false,
            fail_poll: false,
            fail_fetch: false,
            fail_stop: false,
            start_calls: 0,
            stop_calls: 0,
            poll_calls: 0,
            fetch_calls: 0,
            set_roi_calls: 0,
            set_control_calls: 0,
        }
    }

    /// Script the terminal status of successive exposures.
    ///
    /// Once the script runs out, exposures succeed.
    #[must_use]
    pub fn with_exposure_results(mut self, results: Vec<ExposureStatus>) -> Self {
        self.results = results.into();
        self
    }

    /// Clamp requested frames to this size, like a real sensor would.
    #[must_use]
    pub const fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_size = Some((width, height));
        self
    }

    /// Report this format on read-back regardless of what was requested.
    #[must_use]
    pub const fn with_forced_roi(mut self, roi: RoiFormat) -> Self {
        self.forced_roi = Some(roi);
        self
    }

    /// Keep every exposure in `Working` forever.
    #[must_use]
    pub const fn with_stuck_exposure(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Make `start_exposure` report an error.
    #[must_use]
    pub const fn with_failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make `exposure_status` report an error.
    #[must_use]
    pub const fn with_failing_poll(mut self) -> Self {
        self.fail_poll = true;
        self
    }

    /// Make pixel transfer fail.
    #[must_use]
    pub const fn with_failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Make `stop_exposure` report an error.
    #[must_use]
    pub const fn with_failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Remove a control, as on a camera that lacks it. Reads and writes
    /// both report `ControlNotSupported`.
    #[must_use]
    pub fn without_control(mut self, id: ControlId) -> Self {
        self.controls.remove(&id);
        self.unsupported.insert(id);
        self
    }

    /// Number of `start_exposure` calls.
    pub const fn start_calls(&self) -> u32 {
        self.start_calls
    }

    /// Number of `stop_exposure` calls.
    pub const fn stop_calls(&self) -> u32 {
        self.stop_calls
    }

    /// Number of `exposure_status` calls.
    pub const fn poll_calls(&self) -> u32 {
        self.poll_calls
    }

    /// Number of `fetch_frame` calls.
    pub const fn fetch_calls(&self) -> u32 {
        self.fetch_calls
    }

    /// Number of `set_roi_format` calls.
    pub const fn set_roi_calls(&self) -> u32 {
        self.set_roi_calls
    }

    /// Number of `set_control` calls.
    pub const fn set_control_calls(&self) -> u32 {
        self.set_control_calls
    }
}

impl CameraControl for MockCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn controls(&self) -> Result<Vec<ControlDescriptor>> {
        Ok(ControlId::ALL
            .into_iter()
            .map(|id| ControlDescriptor {
                name: id.name().to_owned(),
                description: format!("mock {id}"),
                min: 0,
                max: 1000,
                default: 0,
                auto_supported: matches!(id, ControlId::Gain | ControlId::Exposure),
                writable: id != ControlId::Temperature,
            })
            .collect())
    }

    fn control(&self, id: ControlId) -> Result<ControlValue> {
        self.controls
            .get(&id)
            .copied()
            .ok_or(CameraError::ControlNotSupported(id))
    }

    fn set_control(&mut self, id: ControlId, value: i64, auto: bool) -> Result<()> {
        self.set_control_calls += 1;
        if self.unsupported.contains(&id) {
            return Err(CameraError::ControlNotSupported(id));
        }
        self.controls.insert(id, ControlValue { value, auto });
        Ok(())
    }

    fn set_roi_format(&mut self, roi: &RoiFormat) -> Result<()> {
        self.set_roi_calls += 1;
        let mut applied = *roi;
        if let Some((max_w, max_h)) = self.max_size {
            applied.geometry.width = applied.geometry.width.min(max_w);
            applied.geometry.height = applied.geometry.height.min(max_h);
        }
        self.roi = applied;
        Ok(())
    }

    fn roi_format(&self) -> Result<RoiFormat> {
        Ok(self.forced_roi.unwrap_or(self.roi))
    }

    fn start_exposure(&mut self) -> Result<()> {
        self.start_calls += 1;
        if self.fail_start {
            return Err(CameraError::Device {
                op: "start_exposure",
                message: "mock start error".to_owned(),
            });
        }
        self.pending_working = self.working_polls;
        self.current = self.results.pop_front().unwrap_or(ExposureStatus::Success);
        Ok(())
    }

    fn exposure_status(&mut self) -> Result<ExposureStatus> {
        self.poll_calls += 1;
        if self.fail_poll {
            return Err(CameraError::Device {
                op: "exposure_status",
                message: "mock poll error".to_owned(),
            });
        }
        if self.stuck {
            return Ok(ExposureStatus::Working);
        }
        if self.pending_working > 0 {
            self.pending_working -= 1;
            return Ok(ExposureStatus::Working);
        }
        Ok(self.current)
    }

    fn fetch_frame(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.fetch_calls += 1;
        if self.fail_fetch {
            return Err(CameraError::Fetch("mock transfer error".to_owned()));
        }
        for (i, byte) in buffer.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *byte = (i % 251) as u8;
            }
        }
        Ok(())
    }

    fn stop_exposure(&mut self) -> Result<()> {
        self.stop_calls += 1;
        self.current = ExposureStatus::Idle;
        if self.fail_stop {
            return Err(CameraError::Device {
                op: "stop_exposure",
                message: "mock stop error".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_creation() {
        let camera = MockCamera::new();
        assert_eq!(camera.info().driver, "mock");
        assert_eq!(camera.info().formats.len(), 4);
    }

    #[test]
    fn test_mock_clamps_geometry() {
        let mut camera = MockCamera::new().with_max_size(100, 50);
        camera
            .set_roi_format(&RoiFormat::new(640, 480, 2, PixelFormat::Raw16))
            .expect("set_roi_format should succeed");

        let roi = camera.roi_format().expect("roi_format should succeed");
        assert_eq!(roi, RoiFormat::new(100, 50, 2, PixelFormat::Raw16));
    }

    #[test]
    fn test_mock_status_script() {
        let mut camera = MockCamera::new().with_exposure_results(vec![ExposureStatus::Failed]);

        camera.start_exposure().expect("start should succeed");
        assert_eq!(camera.exposure_status().ok(), Some(ExposureStatus::Working));
        assert_eq!(camera.exposure_status().ok(), Some(ExposureStatus::Working));
        assert_eq!(camera.exposure_status().ok(), Some(ExposureStatus::Failed));

        camera.start_exposure().expect("start should succeed");
        camera.exposure_status().expect("poll should succeed");
        camera.exposure_status().expect("poll should succeed");
        assert_eq!(camera.exposure_status().ok(), Some(ExposureStatus::Success));
        assert_eq!(camera.start_calls(), 2);
    }

    #[test]
    fn test_mock_without_control_rejects_writes() {
        let mut camera = MockCamera::new().without_control(ControlId::Exposure);

        assert!(matches!(
            camera.set_control(ControlId::Exposure, 100, false),
            Err(CameraError::ControlNotSupported(ControlId::Exposure))
        ));
        assert!(camera.control(ControlId::Exposure).is_err());
        assert_eq!(camera.set_control_calls(), 1);
    }
}
