//! Linear range mapping for control values

use super::error::EngineError;

/// Lower bound of the normalized rate control
pub const RATE_CONTROL_MIN: f32 = -1.0;
/// Upper bound of the normalized rate control
pub const RATE_CONTROL_MAX: f32 = 1.0;
/// Playback rate at the bottom of the control range
pub const RATE_MIN: f32 = 0.75;
/// Playback rate at the top of the control range
pub const RATE_MAX: f32 = 1.25;

/// Map `value` linearly from `[from_min, from_max]` onto `[to_min, to_max]`.
///
/// The source range must not be degenerate. Use [`try_map_value`] when the
/// bounds come from outside the program.
#[inline]
pub fn map_value(value: f32, from_min: f32, from_max: f32, to_min: f32, to_max: f32) -> f32 {
    debug_assert!(from_max != from_min, "degenerate source range");
    let normalized = (value - from_min) / (from_max - from_min);
    normalized * (to_max - to_min) + to_min
}

/// Checked variant of [`map_value`]
pub fn try_map_value(
    value: f32,
    from_min: f32,
    from_max: f32,
    to_min: f32,
    to_max: f32,
) -> Result<f32, EngineError> {
    if from_max == from_min || !from_min.is_finite() || !from_max.is_finite() {
        return Err(EngineError::InvalidRange {
            min: from_min,
            max: from_max,
        });
    }
    Ok(map_value(value, from_min, from_max, to_min, to_max))
}

/// Convert a rate control in [-1, 1] into a playback-rate multiplier in [0.75, 1.25]
pub fn rate_from_control(value: f32) -> f32 {
    let value = value.clamp(RATE_CONTROL_MIN, RATE_CONTROL_MAX);
    map_value(value, RATE_CONTROL_MIN, RATE_CONTROL_MAX, RATE_MIN, RATE_MAX)
}
