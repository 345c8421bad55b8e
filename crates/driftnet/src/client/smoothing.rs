//! Client-side transform smoothing.
//!
//! Authoritative corrections land as short time-based interpolation windows
//! instead of hard snaps. Both endpoints of an active window keep advancing
//! by `velocity * dt`, so smoothing composes with dead reckoning instead of
//! stalling it.

use glam::Vec3;

/// Corrections smaller than this snap directly.
pub const SNAP_EPSILON: f32 = 0.01;

/// Default correction window, seconds.
pub const SMOOTHING_WINDOW: f32 = 0.1;

fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % std::f32::consts::TAU;
    if a > std::f32::consts::PI {
        a -= std::f32::consts::TAU;
    } else if a < -std::f32::consts::PI {
        a += std::f32::consts::TAU;
    }
    a
}

/// Per-component angle lerp along the shortest arc.
fn lerp_angles(from: Vec3, to: Vec3, t: f32) -> Vec3 {
    Vec3::new(
        from.x + wrap_angle(to.x - from.x) * t,
        from.y + wrap_angle(to.y - from.y) * t,
        from.z + wrap_angle(to.z - from.z) * t,
    )
}

#[derive(Debug, Clone, Copy)]
struct Window {
    from: Vec3,
    to: Vec3,
    elapsed: f32,
}

/// Smooths one replica's position, orientation, and scale toward
/// authoritative values over a fixed window.
#[derive(Debug)]
pub struct TransformSmoother {
    window: f32,
    position: Vec3,
    orientation: Vec3,
    scale: Vec3,
    position_window: Option<Window>,
    orientation_window: Option<Window>,
    scale_window: Option<Window>,
    initialized: bool,
}

impl TransformSmoother {
    pub fn new() -> Self {
        Self::with_window(SMOOTHING_WINDOW)
    }

    pub fn with_window(window: f32) -> Self {
        Self {
            window,
            position: Vec3::ZERO,
            orientation: Vec3::ZERO,
            scale: Vec3::ONE,
            position_window: None,
            orientation_window: None,
            scale_window: None,
            initialized: false,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Vec3 {
        self.orientation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Places the replica without any smoothing: first application,
    /// teleports, and attachment transform copies.
    pub fn snap(&mut self, position: Vec3, orientation: Vec3, scale: Vec3) {
        self.position = position;
        self.orientation = orientation;
        self.scale = scale;
        self.position_window = None;
        self.orientation_window = None;
        self.scale_window = None;
        self.initialized = true;
    }

    pub fn snap_position(&mut self, position: Vec3) {
        self.position = position;
        self.position_window = None;
        self.initialized = true;
    }

    /// Receives an authoritative position. Far-enough corrections open an
    /// interpolation window from the currently displayed position.
    pub fn correct_position(&mut self, target: Vec3) {
        if !self.initialized {
            self.snap_position(target);
            return;
        }
        if (target - self.position).length() <= SNAP_EPSILON {
            self.position = target;
            self.position_window = None;
            return;
        }
        self.position_window = Some(Window {
            from: self.position,
            to: target,
            elapsed: 0.0,
        });
    }

    pub fn correct_orientation(&mut self, target: Vec3) {
        if !self.initialized {
            self.orientation = target;
            return;
        }
        self.orientation_window = Some(Window {
            from: self.orientation,
            to: target,
            elapsed: 0.0,
        });
    }

    pub fn correct_scale(&mut self, target: Vec3) {
        if !self.initialized {
            self.scale = target;
            return;
        }
        self.scale_window = Some(Window {
            from: self.scale,
            to: target,
            elapsed: 0.0,
        });
    }

    /// Advances one render frame. `velocity` drives dead reckoning: it moves
    /// the displayed position and both endpoints of any active position
    /// window.
    pub fn advance(&mut self, dt: f32, velocity: Vec3) {
        let drift = velocity * dt;

        match &mut self.position_window {
            Some(window) => {
                window.from += drift;
                window.to += drift;
                window.elapsed += dt;
                let t = (window.elapsed / self.window).min(1.0);
                self.position = window.from.lerp(window.to, t);
                if t >= 1.0 {
                    self.position_window = None;
                }
            }
            None => {
                self.position += drift;
            }
        }

        if let Some(window) = &mut self.orientation_window {
            window.elapsed += dt;
            let t = (window.elapsed / self.window).min(1.0);
            self.orientation = lerp_angles(window.from, window.to, t);
            if t >= 1.0 {
                self.orientation = window.to;
                self.orientation_window = None;
            }
        }

        if let Some(window) = &mut self.scale_window {
            window.elapsed += dt;
            let t = (window.elapsed / self.window).min(1.0);
            self.scale = window.from.lerp(window.to, t);
            if t >= 1.0 {
                self.scale_window = None;
            }
        }
    }
}

impl Default for TransformSmoother {
    fn default() -> Self {
        Self::new()
    }
}
