//! Per-client transmit/skip decisions.
//!
//! The server culls against a fixed 90°x70° frustum rebuilt each tick from
//! the client's last reported position and orientation. Audible objects
//! override the frustum: positional audio needs a current position even when
//! the emitter is off-screen.

use glam::{EulerRot, Quat, Vec3};

use crate::snapshot::ObjectState;

/// Horizontal field of view, radians (90 degrees).
pub const HORIZONTAL_FOV: f32 = std::f32::consts::FRAC_PI_2;
/// Vertical field of view, radians (70 degrees).
pub const VERTICAL_FOV: f32 = 70.0 * std::f32::consts::PI / 180.0;

/// Objects with a bounding radius at or below this use the cheaper
/// point-in-frustum test.
pub const POINT_TEST_RADIUS: f32 = 1.0;

/// A client's last reported viewpoint, as carried by its input packets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewPoint {
    pub position: Vec3,
    /// Euler angles in radians: pitch (x), yaw (y), roll (z).
    pub orientation: Vec3,
}

/// View volume derived from a [`ViewPoint`].
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    eye: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    half_h: f32,
    half_v: f32,
}

impl Frustum {
    pub fn from_view(view: &ViewPoint) -> Self {
        let rot = Quat::from_euler(
            EulerRot::YXZ,
            view.orientation.y,
            view.orientation.x,
            view.orientation.z,
        );
        Self {
            eye: view.position,
            forward: rot * Vec3::NEG_Z,
            right: rot * Vec3::X,
            up: rot * Vec3::Y,
            half_h: HORIZONTAL_FOV * 0.5,
            half_v: VERTICAL_FOV * 0.5,
        }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.contains_sphere(point, 0.0)
    }

    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        let v = center - self.eye;
        let ahead = self.forward.dot(v);
        if ahead <= 0.0 {
            return false;
        }

        let angular_radius = if radius > 0.0 {
            let dist = v.length();
            if dist <= radius {
                return true;
            }
            (radius / dist).clamp(-1.0, 1.0).asin()
        } else {
            0.0
        };

        let yaw_off = self.right.dot(v).atan2(ahead).abs();
        let pitch_off = self.up.dot(v).atan2(ahead).abs();

        yaw_off - angular_radius <= self.half_h && pitch_off - angular_radius <= self.half_v
    }
}

/// The transmit/skip decision for one candidate object.
///
/// Flat (2D) replicas have no meaningful 3D position and are always
/// transmitted. The client's own in-world object and the bootstrap snapshot
/// (culling disabled) are handled by the replicator, not here.
pub fn should_transmit(object: &ObjectState, frustum: &Frustum, eye: Vec3) -> bool {
    if object.is_2d {
        return true;
    }

    if object.sound > -1 {
        let radius = object.sound_radius as f32;
        if eye.distance(object.position) <= radius {
            return true;
        }
    } else if object.sound < -1 {
        // Non-positional audio is audible everywhere.
        return true;
    }

    if object.view_radius <= POINT_TEST_RADIUS {
        frustum.contains_point(object.position)
    } else {
        frustum.contains_sphere(object.position, object.view_radius)
    }
}
