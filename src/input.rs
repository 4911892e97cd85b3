//! Pointer and scroll input mapped onto orbit camera moves.

use crate::camera::OrbitCamera;
use crate::progressive::{PathTracer, TraceBackend};
use crate::util::Result;

/// Radians of orbit per pixel of pointer travel (half a degree)
pub const ORBIT_SENSITIVITY: f64 = 0.5 * std::f64::consts::PI / 180.0;

/// Distance change per scroll step
pub const ZOOM_SENSITIVITY: f64 = 0.5;

/// Something that owns an orbit camera and can restart accumulation.
pub trait OrbitControl {
    fn camera_mut(&mut self) -> &mut OrbitCamera;
    fn restart(&mut self) -> Result<()>;
}

impl<B: TraceBackend> OrbitControl for PathTracer<B> {
    fn camera_mut(&mut self) -> &mut OrbitCamera {
        PathTracer::camera_mut(self)
    }

    fn restart(&mut self) -> Result<()> {
        PathTracer::restart(self)
    }
}

/// Turns pointer drags into theta/phi changes and scrolling into distance.
///
/// Only the previous pointer position is remembered. Input that arrives while
/// the control panel owns the pointer is dropped.
#[derive(Debug, Clone, Default)]
pub struct InputMapper {
    last_pointer: Option<(f64, f64)>,
    orbit_sensitivity: f64,
    zoom_sensitivity: f64,
}

impl InputMapper {
    pub fn new() -> Self {
        Self {
            last_pointer: None,
            orbit_sensitivity: ORBIT_SENSITIVITY,
            zoom_sensitivity: ZOOM_SENSITIVITY,
        }
    }

    pub fn with_sensitivity(orbit: f64, zoom: f64) -> Self {
        Self {
            last_pointer: None,
            orbit_sensitivity: orbit,
            zoom_sensitivity: zoom,
        }
    }

    pub fn last_pointer(&self) -> Option<(f64, f64)> {
        self.last_pointer
    }

    /// Handle a pointer move to `(x, y)`. While `dragging` the camera orbits by
    /// the travel since the previous event and accumulation restarts.
    /// Returns true when the camera moved.
    pub fn pointer_moved(
        &mut self,
        target: &mut impl OrbitControl,
        x: f64,
        y: f64,
        dragging: bool,
        ui_has_pointer: bool,
    ) -> Result<bool> {
        // The first event only seeds the previous position.
        let (prev_x, prev_y) = self.last_pointer.unwrap_or((x, y));
        self.last_pointer = Some((x, y));

        if !dragging || ui_has_pointer {
            return Ok(false);
        }

        let offset_x = prev_x - x;
        let offset_y = prev_y - y;
        if offset_x == 0.0 && offset_y == 0.0 {
            return Ok(false);
        }

        let camera = target.camera_mut();
        let theta = camera.theta() - (offset_x * self.orbit_sensitivity) as f32;
        let phi = camera.phi() - (offset_y * self.orbit_sensitivity) as f32;
        camera.set_theta(theta);
        camera.set_phi(phi);
        target.restart()?;
        Ok(true)
    }

    /// Handle a scroll of `delta` steps (positive moves the camera closer).
    pub fn scrolled(&mut self, target: &mut impl OrbitControl, delta: f64, ui_has_pointer: bool) -> Result<bool> {
        if ui_has_pointer || delta == 0.0 {
            return Ok(false);
        }
        let camera = target.camera_mut();
        let distance = camera.distance() - (delta * self.zoom_sensitivity) as f32;
        camera.set_distance(distance);
        target.restart()?;
        Ok(true)
    }

    /// Forget the previous pointer position (pointer left the viewport).
    pub fn reset(&mut self) {
        self.last_pointer = None;
    }
}
