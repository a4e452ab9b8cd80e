//! Control name resolution and batched `name=value` assignments.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::traits::{CameraControl, CameraError, ControlValue, Result};

/// Value that hands a control over to the device.
pub const AUTO: &str = "auto";

/// Device-managed scalar setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    /// Sensor gain.
    Gain,
    /// Exposure time in microseconds.
    Exposure,
    /// Gamma correction.
    Gamma,
    /// Image flip.
    Flip,
    /// High speed readout mode.
    HighSpeedMode,
    /// Sensor overclock.
    Overclock,
    /// Brightness offset.
    Brightness,
    /// USB bandwidth limit.
    BandwidthOverload,
    /// Sensor temperature.
    Temperature,
    /// Upper bound for auto gain.
    AutoMaxGain,
    /// Upper bound for auto exposure.
    AutoMaxExposure,
    /// Target brightness for auto exposure.
    AutoMaxBrightness,
    /// Fan switch.
    FanOn,
    /// Hardware binning switch.
    HardwareBin,
    /// Cooler switch.
    CoolerOn,
    /// Cooler target temperature.
    TargetTemperature,
}

impl ControlId {
    /// All controls, in vendor order.
    pub const ALL: [Self; 16] = [
        Self::Gain,
        Self::Exposure,
        Self::Gamma,
        Self::Flip,
        Self::HighSpeedMode,
        Self::Overclock,
        Self::Brightness,
        Self::BandwidthOverload,
        Self::Temperature,
        Self::AutoMaxGain,
        Self::AutoMaxExposure,
        Self::AutoMaxBrightness,
        Self::FanOn,
        Self::HardwareBin,
        Self::CoolerOn,
        Self::TargetTemperature,
    ];

    /// Canonical command line name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gain => "gain",
            Self::Exposure => "exposure",
            Self::Gamma => "gamma",
            Self::Flip => "flip",
            Self::HighSpeedMode => "high-speed-mode",
            Self::Overclock => "overclock",
            Self::Brightness => "brightness",
            Self::BandwidthOverload => "bandwidth-overload",
            Self::Temperature => "temperature",
            Self::AutoMaxGain => "auto-max-gain",
            Self::AutoMaxExposure => "auto-max-exposure",
            Self::AutoMaxBrightness => "auto-max-brightness",
            Self::FanOn => "fan-on",
            Self::HardwareBin => "hardware-bin",
            Self::CoolerOn => "cooler-on",
            Self::TargetTemperature => "target-temperature",
        }
    }

    /// Short vendor spellings accepted in addition to the canonical names.
    const fn alias(self) -> Option<&'static str> {
        match self {
            Self::AutoMaxExposure => Some("automaxexp"),
            Self::TargetTemperature => Some("targettemp"),
            _ => None,
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase and drop word separators.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl FromStr for ControlId {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = normalize(s);
        Self::ALL
            .into_iter()
            .find(|id| normalize(id.name()) == wanted || id.alias() == Some(wanted.as_str()))
            .ok_or_else(|| CameraError::UnknownControl(s.to_owned()))
    }
}

/// Resolve free text to a control identifier.
pub fn resolve_control_name(text: &str) -> Result<ControlId> {
    text.parse()
}

/// One `name=value` pair from a batch string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlAssignment {
    /// Control name as typed.
    pub name: String,
    /// Value as typed; may be [`AUTO`].
    pub value: String,
}

impl ControlAssignment {
    /// Create a new assignment.
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }

    /// Whether the value is the auto sentinel.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.value == AUTO
    }
}

/// Parse a batch such as `"gain=50,exposure=auto"` into ordered assignments.
///
/// Tokens are separated by commas or spaces. A token without `=` fails the
/// whole batch.
pub fn parse_assignments(batch: &str) -> Result<Vec<ControlAssignment>> {
    batch
        .split([',', ' '])
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok(ControlAssignment::new(name, value)),
            _ => Err(CameraError::MalformedAssignment(token.to_owned())),
        })
        .collect()
}

/// Apply one assignment to the device.
///
/// `auto` re-writes the control's current value with the auto flag set, so
/// the device uses it as a seed. Any other value must be a signed integer.
pub fn apply_assignment<C: CameraControl>(
    device: &mut C,
    assignment: &ControlAssignment,
) -> Result<()> {
    let id = resolve_control_name(&assignment.name)?;

    let (value, auto) = if assignment.is_auto() {
        let current = device.control(id)?;
        (current.value, true)
    } else {
        let value = assignment
            .value
            .parse::<i64>()
            .map_err(|_| CameraError::InvalidControlValue {
                name: assignment.name.clone(),
                value: assignment.value.clone(),
            })?;
        (value, false)
    };

    debug!(control = %id, value, auto, "set control");
    device.set_control(id, value, auto)
}

/// Apply assignments in order, stopping at the first failure.
pub fn apply_assignments<C: CameraControl>(
    device: &mut C,
    assignments: &[ControlAssignment],
) -> Result<()> {
    assignments
        .iter()
        .try_for_each(|assignment| apply_assignment(device, assignment))
}

/// Read a control by name.
pub fn read_control<C: CameraControl>(device: &C, name: &str) -> Result<(ControlId, ControlValue)> {
    let id = resolve_control_name(name)?;
    let value = device.control(id)?;
    debug!(control = %id, value = value.value, auto = value.auto, "get control");
    Ok((id, value))
}

/// Write the exposure control in microseconds with auto off.
pub fn apply_exposure<C: CameraControl>(device: &mut C, exposure: Duration) -> Result<()> {
    let micros = i64::try_from(exposure.as_micros()).unwrap_or(i64::MAX);
    debug!(micros, "set exposure");
    device.set_control(ControlId::Exposure, micros, false)
}

/// Like [`apply_exposure`], but a camera without an exposure control is
/// left as it is.
///
/// Returns whether the exposure was written. Other errors propagate.
pub fn try_apply_exposure<C: CameraControl>(device: &mut C, exposure: Duration) -> Result<bool> {
    match apply_exposure(device, exposure) {
        Ok(()) => Ok(true),
        Err(CameraError::ControlNotSupported(ControlId::Exposure)) => {
            warn!("camera has no exposure control, keeping its own exposure");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;

    #[test]
    fn test_resolve_is_case_insensitive() {
        assert_eq!(resolve_control_name("GAIN").ok(), Some(ControlId::Gain));
        assert_eq!(
            resolve_control_name("HighSpeedMode").ok(),
            Some(ControlId::HighSpeedMode)
        );
        assert_eq!(
            resolve_control_name("high-speed-mode").ok(),
            Some(ControlId::HighSpeedMode)
        );
        assert_eq!(
            resolve_control_name("targettemp").ok(),
            Some(ControlId::TargetTemperature)
        );
        assert_eq!(
            resolve_control_name("automaxexp").ok(),
            Some(ControlId::AutoMaxExposure)
        );
    }

    #[test]
    fn test_every_canonical_name_resolves() {
        for id in ControlId::ALL {
            assert_eq!(resolve_control_name(id.name()).ok(), Some(id));
        }
    }

    #[test]
    fn test_resolve_unknown() {
        assert!(matches!(
            resolve_control_name("zoom"),
            Err(CameraError::UnknownControl(name)) if name == "zoom"
        ));
    }

    #[test]
    fn test_parse_preserves_order() {
        let parsed = parse_assignments("gain=50,exposure=auto").expect("parse should succeed");
        assert_eq!(
            parsed,
            vec![
                ControlAssignment::new("gain", "50"),
                ControlAssignment::new("exposure", "auto"),
            ]
        );
    }

    #[test]
    fn test_parse_mixed_delimiters() {
        let parsed = parse_assignments("gain=1, gamma=2  flip=0").expect("parse should succeed");
        let names: Vec<&str> = parsed.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["gain", "gamma", "flip"]);
    }

    #[test]
    fn test_parse_splits_at_first_equals() {
        let parsed = parse_assignments("gain=1=2").expect("parse should succeed");
        assert_eq!(parsed, vec![ControlAssignment::new("gain", "1=2")]);
    }

    #[test]
    fn test_parse_missing_equals_fails_whole_batch() {
        assert!(matches!(
            parse_assignments("gain-50"),
            Err(CameraError::MalformedAssignment(token)) if token == "gain-50"
        ));
        assert!(matches!(
            parse_assignments("gain=1,gamma"),
            Err(CameraError::MalformedAssignment(_))
        ));
        assert!(matches!(
            parse_assignments("=5"),
            Err(CameraError::MalformedAssignment(_))
        ));
    }

    #[test]
    fn test_apply_numeric_value() {
        let mut camera = MockCamera::new();
        apply_assignment(&mut camera, &ControlAssignment::new("Gain", "-5"))
            .expect("apply should succeed");
        assert_eq!(
            camera.control(ControlId::Gain).ok(),
            Some(ControlValue {
                value: -5,
                auto: false
            })
        );
    }

    #[test]
    fn test_apply_auto_reuses_current_value() {
        let mut camera = MockCamera::new();
        camera
            .set_control(ControlId::Gain, 120, false)
            .expect("set should succeed");

        apply_assignment(&mut camera, &ControlAssignment::new("gain", AUTO))
            .expect("apply should succeed");

        assert_eq!(
            camera.control(ControlId::Gain).ok(),
            Some(ControlValue {
                value: 120,
                auto: true
            })
        );
    }

    #[test]
    fn test_apply_invalid_value() {
        let mut camera = MockCamera::new();
        let result = apply_assignment(&mut camera, &ControlAssignment::new("gain", "loud"));
        assert!(matches!(result, Err(CameraError::InvalidControlValue { .. })));
        assert_eq!(camera.set_control_calls(), 0);
    }

    #[test]
    fn test_apply_assignments_stops_at_first_error() {
        let mut camera = MockCamera::new();
        let batch = parse_assignments("gain=10,zoom=3,gamma=7").expect("parse should succeed");

        let result = apply_assignments(&mut camera, &batch);
        assert!(matches!(result, Err(CameraError::UnknownControl(_))));
        assert_eq!(camera.set_control_calls(), 1);
        assert_eq!(camera.control(ControlId::Gamma).map(|v| v.value).ok(), Some(0));
    }

    #[test]
    fn test_apply_exposure_in_micros() {
        let mut camera = MockCamera::new();
        apply_exposure(&mut camera, Duration::from_millis(250)).expect("apply should succeed");
        assert_eq!(
            camera.control(ControlId::Exposure).ok(),
            Some(ControlValue {
                value: 250_000,
                auto: false
            })
        );
    }

    #[test]
    fn test_try_apply_exposure_skips_missing_control() {
        let mut camera = MockCamera::new().without_control(ControlId::Exposure);

        let applied = try_apply_exposure(&mut camera, Duration::from_millis(10))
            .expect("missing exposure control is not an error");

        assert!(!applied);
        assert_eq!(camera.set_control_calls(), 1);
    }

    #[test]
    fn test_try_apply_exposure_writes_when_supported() {
        let mut camera = MockCamera::new();

        let applied = try_apply_exposure(&mut camera, Duration::from_millis(10))
            .expect("apply should succeed");

        assert!(applied);
        assert_eq!(
            camera.control(ControlId::Exposure).ok(),
            Some(ControlValue {
                value: 10_000,
                auto: false
            })
        );
    }

    #[test]
    fn test_read_control() {
        let camera = MockCamera::new();
        let (id, value) = read_control(&camera, "exposure").expect("read should succeed");
        assert_eq!(id, ControlId::Exposure);
        assert!(!value.auto);
    }
}
