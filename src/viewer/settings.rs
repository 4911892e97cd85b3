//! Persistent viewer settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::progressive::{DEFAULT_CAMERA_DISTANCE, DEFAULT_MAX_BOUNCES, MAX_BOUNCES, MIN_BOUNCES};
use crate::Result;

pub const DEFAULT_WINDOW_SIZE: f32 = 720.0;
pub const DEFAULT_FOV_Y_DEGREES: f32 = 90.0;
pub const Z_NEAR: f32 = 0.5;
pub const Z_FAR: f32 = 100.0;

/// Viewer settings that persist between sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Window
    pub window_width: f32,
    pub window_height: f32,
    pub window_pos: Option<[f32; 2]>,

    // Rendering
    pub ssaa: bool,
    pub max_bounces: u32,
    pub clear_color: [f32; 3],
    pub fov_y_degrees: f32,

    // Camera
    pub camera_distance: f32,
    pub camera_theta: f32,
    pub camera_phi: f32,

    // Last directory an image was saved to
    pub last_export_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_width: DEFAULT_WINDOW_SIZE,
            window_height: DEFAULT_WINDOW_SIZE,
            window_pos: None,
            ssaa: true,
            max_bounces: DEFAULT_MAX_BOUNCES,
            clear_color: [0.0, 0.0, 0.0],
            fov_y_degrees: DEFAULT_FOV_Y_DEGREES,
            camera_distance: DEFAULT_CAMERA_DISTANCE,
            camera_theta: 0.0,
            camera_phi: 0.0,
            last_export_dir: None,
        }
    }
}

impl Settings {
    /// Settings file path, `<config_dir>/pathtracer/settings.json`
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("pathtracer");
            p.push("settings.json");
            p
        })
    }

    /// Load settings from the default location, falling back to defaults.
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    /// Load settings from `path`. Missing or corrupt files give defaults.
    pub fn load_from(path: &Path) -> Self {
        let settings: Self = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| match serde_json::from_str(&s) {
                Ok(v) => Some(v),
                Err(e) => {
                    log::warn!("ignoring {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default();
        settings.sanitized()
    }

    /// Save settings to the default location.
    pub fn save(&self) {
        if let Some(path) = Self::path() {
            if let Err(e) = self.save_to(&path) {
                log::warn!("failed to save settings: {e}");
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamp out-of-range values into something the viewer can use.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        self.max_bounces = self.max_bounces.clamp(MIN_BOUNCES, MAX_BOUNCES);

        if !(self.window_width.is_finite() && self.window_width >= 64.0) {
            self.window_width = defaults.window_width;
        }
        if !(self.window_height.is_finite() && self.window_height >= 64.0) {
            self.window_height = defaults.window_height;
        }
        if !(self.fov_y_degrees.is_finite() && self.fov_y_degrees > 1.0 && self.fov_y_degrees < 179.0) {
            self.fov_y_degrees = defaults.fov_y_degrees;
        }
        if !(self.camera_distance.is_finite() && self.camera_distance >= 0.0) {
            self.camera_distance = defaults.camera_distance;
        }
        if !self.camera_theta.is_finite() {
            self.camera_theta = 0.0;
        }
        if !self.camera_phi.is_finite() {
            self.camera_phi = 0.0;
        }
        for c in &mut self.clear_color {
            *c = if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 };
        }
        self
    }
}
