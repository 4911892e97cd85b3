//! Orbit camera: a look-at point, two orbit angles and a distance.
//!
//! Eye convention (right-handed, Y up):
//! ```text
//! eye = look_at + distance * (sin(theta) * cos(phi), sin(phi), -cos(theta) * cos(phi))
//! ```
//! so `theta = 0, phi = 0` places the eye on the negative Z axis looking towards +Z.

use glam::{Mat4, Vec3};

/// Camera max phi angle (~89.95 degrees, 1.57 radians)
pub const MAX_PHI_ANGLE: f32 = 1.57;

/// World up axis used to build the view matrix
pub const WORLD_UP: Vec3 = Vec3::Y;

/// Perspective projection parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perspective {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Perspective {
    pub fn new(fov_y: f32, aspect: f32, z_near: f32, z_far: f32) -> Self {
        Self { fov_y, aspect, z_near, z_far }
    }

    /// Projection matrix with wgpu's 0..1 clip depth.
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.z_near, self.z_far)
    }
}

impl Default for Perspective {
    fn default() -> Self {
        Self::new(90.0_f32.to_radians(), 1.0, 0.5, 100.0)
    }
}

/// Simple camera used to orbit around a look-at position.
///
/// Every setter recomputes the eye and view matrix immediately, so the
/// getters never observe a stale state.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    distance: f32,
    theta: f32,
    phi: f32,
    look_at: Vec3,
    eye: Vec3,
    view: Mat4,
}

impl OrbitCamera {
    pub fn new(look_at: Vec3, theta: f32, phi: f32, distance: f32) -> Self {
        let mut camera = Self {
            distance: distance.max(0.0),
            theta,
            phi: phi.clamp(-MAX_PHI_ANGLE, MAX_PHI_ANGLE),
            look_at,
            eye: Vec3::ZERO,
            view: Mat4::IDENTITY,
        };
        camera.update_view();
        camera
    }

    /// View matrix (world to camera)
    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn set_look_at(&mut self, look_at: Vec3) {
        self.look_at = look_at;
        self.update_view();
    }

    pub fn look_at(&self) -> Vec3 {
        self.look_at
    }

    /// Eye position in world space
    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    /// Negative distances clamp to zero.
    pub fn set_distance(&mut self, distance: f32) {
        self.distance = distance.max(0.0);
        self.update_view();
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Orbit angle around the Y axis. Not wrapped; trig handles full turns.
    pub fn set_theta(&mut self, radians: f32) {
        self.theta = radians;
        self.update_view();
    }

    pub fn theta(&self) -> f32 {
        self.theta
    }

    /// Elevation angle, clamped to `[-MAX_PHI_ANGLE, MAX_PHI_ANGLE]` so the
    /// camera never flips over a pole.
    pub fn set_phi(&mut self, radians: f32) {
        self.phi = radians.clamp(-MAX_PHI_ANGLE, MAX_PHI_ANGLE);
        self.update_view();
    }

    pub fn phi(&self) -> f32 {
        self.phi
    }

    /// Unit vector from the look-at point towards the eye.
    pub fn direction(theta: f32, phi: f32) -> Vec3 {
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_p, cos_p) = phi.sin_cos();
        Vec3::new(sin_t * cos_p, sin_p, -cos_t * cos_p)
    }

    fn update_view(&mut self) {
        self.eye = self.look_at + self.distance * Self::direction(self.theta, self.phi);
        self.view = Mat4::look_at_rh(self.eye, self.look_at, WORLD_UP);
    }
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 0.0, 0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn test_phi_clamped() {
        let mut cam = OrbitCamera::default();
        cam.set_phi(10.0);
        assert_eq!(cam.phi(), MAX_PHI_ANGLE);
        cam.set_phi(-10.0);
        assert_eq!(cam.phi(), -MAX_PHI_ANGLE);
        cam.set_phi(0.25);
        assert_eq!(cam.phi(), 0.25);
    }

    #[test]
    fn test_distance_non_negative() {
        let mut cam = OrbitCamera::default();
        cam.set_distance(-5.0);
        assert_eq!(cam.distance(), 0.0);
        assert!(approx(cam.eye(), cam.look_at()));
    }

    #[test]
    fn test_eye_default_axis() {
        let mut cam = OrbitCamera::default();
        cam.set_look_at(Vec3::ZERO);
        cam.set_theta(0.0);
        cam.set_phi(0.0);
        cam.set_distance(5.0);
        assert!(approx(cam.eye(), Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn test_eye_follows_look_at() {
        let mut cam = OrbitCamera::new(Vec3::ZERO, std::f32::consts::FRAC_PI_2, 0.0, 2.0);
        assert!(approx(cam.eye(), Vec3::new(2.0, 0.0, 0.0)));
        cam.set_look_at(Vec3::new(1.0, 1.0, 1.0));
        assert!(approx(cam.eye(), Vec3::new(3.0, 1.0, 1.0)));
    }

    #[test]
    fn test_theta_wraps_through_trig() {
        let mut cam = OrbitCamera::new(Vec3::ZERO, 0.3, 0.2, 4.0);
        let eye = cam.eye();
        cam.set_theta(0.3 + std::f32::consts::TAU);
        assert!((cam.eye() - eye).length() < 1e-4);
        assert!((cam.theta() - (0.3 + std::f32::consts::TAU)).abs() < 1e-6);
    }

    #[test]
    fn test_view_matrix_in_sync() {
        let mut cam = OrbitCamera::new(Vec3::ZERO, 0.0, 0.0, 5.0);
        cam.set_theta(1.0);
        cam.set_phi(0.5);
        // The look-at point sits straight ahead of the eye in view space.
        let target = cam.view_matrix().transform_point3(cam.look_at());
        assert!(approx(target, Vec3::new(0.0, 0.0, -5.0)));
        // The eye is the view-space origin.
        let origin = cam.view_matrix().transform_point3(cam.eye());
        assert!(approx(origin, Vec3::ZERO));
    }

    #[test]
    fn test_phi_near_pole_stays_finite() {
        let mut cam = OrbitCamera::new(Vec3::ZERO, 0.0, 0.0, 5.0);
        cam.set_phi(100.0);
        assert!(cam.view_matrix().is_finite());
        assert!(cam.eye().y > 4.99);
    }
}
