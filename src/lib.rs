//! # Pathtracer
//!
//! Interactive progressive path tracing viewer. A GPU compute kernel adds one
//! sample per pixel and tick to a floating-point accumulation surface; a
//! presentation pass shows the running average while an orbit camera and a
//! small control panel steer the session.
//!
//! ## Modules
//!
//! - [`util`] - Errors and shader build logs
//! - [`camera`] - Orbit camera and projection
//! - [`surface`] - Accumulation surface trait, CPU surface, exposure resolve
//! - [`progressive`] - Sampling controller and the GPU backend seam
//! - [`input`] - Pointer/scroll to camera mapping
//! - `viewer` - wgpu backend and egui application (feature `viewer`)
//!
//! ## Example
//!
//! ```ignore
//! use pathtracer::prelude::*;
//!
//! let mut pt = PathTracer::new(backend);
//! pt.init()?;
//! pt.set_viewport(0, 0, 720, 720)?;
//! pt.render()?;
//! pt.present()?;
//! ```

pub mod util;
pub mod camera;
pub mod surface;
pub mod progressive;
pub mod input;

// Interactive viewer (optional, enabled with "viewer" feature)
#[cfg(feature = "viewer")]
pub mod viewer;

pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result, ShaderLogs, ShaderStage};
    pub use crate::camera::{OrbitCamera, Perspective};
    pub use crate::surface::{AccumulationSurface, SoftwareSurface};
    pub use crate::progressive::{PathTracer, Renderer, TraceBackend, KernelParams, PresentParams, State};
    pub use crate::input::{InputMapper, OrbitControl};
}
