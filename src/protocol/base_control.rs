// Base-control conversion for the Kobuki differential drive
// Maps body velocities (linear m/s, angular rad/s) to the controller's
// (speed mm/s, radius mm) pair and back.

/// Distance between the drive wheels (meters)
pub const WHEEL_BASE: f32 = 0.230;

/// Device-supported command range
pub const MAX_LINEAR: f32 = 0.7; // m/s
pub const MAX_ANGULAR: f32 = std::f32::consts::PI; // rad/s

/// Below this a velocity component is treated as zero
const EPSILON: f32 = 0.0001;

/// Radius value the controller interprets as "rotate in place"
const PURE_ROTATION_RADIUS: i16 = 1;

/// Speed/radius pair carried by the base-control sub-payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseControl {
    pub speed: i16,  // mm/s
    pub radius: i16, // mm, 0 = straight, 1 = pure rotation
}

impl BaseControl {
    pub fn new(speed: i16, radius: i16) -> Self {
        Self { speed, radius }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.speed == 0
    }
}

/// Round and clamp to the signed 16-bit wire range
fn to_i16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert body velocities to a base-control command
///
/// # Arguments
/// * `linear` - Forward velocity in m/s (positive = forward)
/// * `angular` - Rotational velocity in rad/s (positive = counter-clockwise)
pub fn velocity_to_base_control(linear: f32, angular: f32) -> BaseControl {
    velocity_to_base_control_with_params(linear, angular, WHEEL_BASE)
}

/// Convert body velocities to a base-control command with a custom wheel base
pub fn velocity_to_base_control_with_params(
    linear: f32,
    angular: f32,
    wheel_base: f32,
) -> BaseControl {
    let half_base_mm = 1000.0 * wheel_base / 2.0;

    // Straight run
    if angular.abs() < EPSILON {
        return BaseControl::new(to_i16(1000.0 * linear), 0);
    }

    let radius = 1000.0 * linear / angular;

    // Pure rotation, or a turn tighter than the 1mm resolution
    if linear.abs() < EPSILON || radius.abs() <= 1.0 {
        return BaseControl::new(to_i16(half_base_mm * angular), PURE_ROTATION_RADIUS);
    }

    // Turn so wide the radius cannot be represented: drive straight
    if radius.abs() > i16::MAX as f32 {
        return BaseControl::new(to_i16(1000.0 * linear), 0);
    }

    // Speed is given for the outer wheel
    let speed = if radius > 0.0 {
        (radius + half_base_mm) * angular
    } else {
        (radius - half_base_mm) * angular
    };

    BaseControl::new(to_i16(speed), to_i16(radius))
}

/// Recover body velocities (m/s, rad/s) from a base-control command
pub fn base_control_to_velocity(cmd: BaseControl) -> (f32, f32) {
    base_control_to_velocity_with_params(cmd, WHEEL_BASE)
}

pub fn base_control_to_velocity_with_params(cmd: BaseControl, wheel_base: f32) -> (f32, f32) {
    let half_base_mm = 1000.0 * wheel_base / 2.0;
    let speed = cmd.speed as f32;

    match cmd.radius {
        0 => (speed / 1000.0, 0.0),
        PURE_ROTATION_RADIUS => (0.0, speed / half_base_mm),
        r => {
            let radius = r as f32;
            let outer = if radius > 0.0 {
                radius + half_base_mm
            } else {
                radius - half_base_mm
            };
            let angular = speed / outer;
            (radius * angular / 1000.0, angular)
        }
    }
}
