//! Progressive path tracing controller.
//!
//! Owns the orbit camera, the viewport with its accumulation surface and the
//! sampling session. Every tick [`PathTracer::render`] adds one sample to the
//! surface and [`PathTracer::present`] shows the averaged result. Anything
//! that changes what a pixel sees (viewport, projection, camera, explicit
//! restart) invalidates the surface and starts counting from zero again.
//!
//! ## Usage
//! ```ignore
//! let mut pt = PathTracer::new(backend);
//! pt.init()?;
//! pt.set_viewport(0, 0, 720, 720)?;
//! pt.set_perspective(90f32.to_radians(), 1.0, 0.5, 100.0)?;
//! loop {
//!     pt.render()?;   // one sampling pass
//!     pt.present()?;  // averaged image to the display target
//! }
//! ```

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use log::{debug, info, warn};

use crate::camera::{OrbitCamera, Perspective};
use crate::surface::{AccumulationSurface, Texel};
use crate::util::{Error, ProgramLog, Result};

/// Compute work-group width (must match @workgroup_size in the kernel)
pub const WORKGROUP_SIZE_X: u32 = 16;
/// Compute work-group height (must match @workgroup_size in the kernel)
pub const WORKGROUP_SIZE_Y: u32 = 16;

pub const MIN_BOUNCES: u32 = 1;
pub const MAX_BOUNCES: u32 = 32;
pub const DEFAULT_MAX_BOUNCES: u32 = 10;

/// Supersample factor used when SSAA is enabled
pub const SSAA_FACTOR: u32 = 2;

/// Camera distance set by `init()`
pub const DEFAULT_CAMERA_DISTANCE: f32 = 5.0;

/// Number of groups needed to cover `dimension` items, counting partial groups.
#[inline]
pub fn work_groups(dimension: u32, group_size: u32) -> u32 {
    dimension.div_ceil(group_size)
}

/// Uniform block handed to the path tracing kernel.
///
/// Layout matches `Params` in `pathtracer.comp.wgsl`: each vec3 is followed
/// by a u32 so the block packs into 16-byte rows.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct KernelParams {
    pub eye: [f32; 3],
    pub max_bounces: u32,
    /// Ray through the bottom-left corner (-1, -1)
    pub ray00: [f32; 3],
    pub num_samples: u32,
    /// Ray through the bottom-right corner (1, -1)
    pub ray10: [f32; 3],
    pub width: u32,
    /// Ray through the top-left corner (-1, 1)
    pub ray01: [f32; 3],
    pub height: u32,
    /// Ray through the top-right corner (1, 1)
    pub ray11: [f32; 3],
    pub _pad: u32,
}

/// Uniform block of the presentation pass (`screen_quad.frag.wgsl`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PresentParams {
    pub buffer_width: u32,
    pub buffer_height: u32,
    pub supersample: u32,
    pub num_samples: u32,
}

/// World-space directions from `eye` through the four viewport corners,
/// ordered `[(-1,-1), (1,-1), (-1,1), (1,1)]` in NDC.
pub fn corner_rays(view_proj: Mat4, eye: Vec3) -> [Vec3; 4] {
    let inv = view_proj.inverse();
    let corner = |x: f32, y: f32| {
        let p = inv * Vec4::new(x, y, 0.0, 1.0);
        p.truncate() / p.w - eye
    };
    [
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(-1.0, 1.0),
        corner(1.0, 1.0),
    ]
}

/// Region of the window the image is shown in, plus its supersampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub supersample: u32,
}

impl Viewport {
    pub fn buffer_width(&self) -> u32 {
        self.width * self.supersample
    }

    pub fn buffer_height(&self) -> u32 {
        self.height * self.supersample
    }

    /// Work-groups needed to cover the accumulation surface.
    pub fn work_groups(&self) -> [u32; 2] {
        [
            work_groups(self.buffer_width(), WORKGROUP_SIZE_X),
            work_groups(self.buffer_height(), WORKGROUP_SIZE_Y),
        ]
    }
}

/// Sample counter and the knobs exposed to the control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    sample_count: u32,
    active: bool,
    max_bounces: u32,
}

impl Session {
    pub fn new() -> Self {
        Self {
            sample_count: 0,
            active: true,
            max_bounces: DEFAULT_MAX_BOUNCES,
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn max_bounces(&self) -> u32 {
        self.max_bounces
    }

    /// A paused session still takes its first sample after a reset.
    pub fn should_sample(&self) -> bool {
        self.active || self.sample_count == 0
    }

    fn advance(&mut self) -> u32 {
        self.sample_count += 1;
        self.sample_count
    }

    fn retreat(&mut self) {
        self.sample_count = self.sample_count.saturating_sub(1);
    }

    fn reset(&mut self) {
        self.sample_count = 0;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// GPU seam of the path tracer: program building, kernel dispatch and the
/// presentation pass.
pub trait TraceBackend {
    type Surface: AccumulationSurface;

    /// Compile and link the sampling kernel and the presentation program.
    /// Returns one log per program; `Err` only when there is no usable context.
    fn build_programs(&mut self) -> Result<Vec<ProgramLog>>;

    /// Create an unallocated accumulation surface.
    fn create_surface(&mut self) -> Result<Self::Surface>;

    /// Recreate the display target for a `width x height` viewport.
    fn resize_target(&mut self, width: u32, height: u32) -> Result<()>;

    /// Run one sampling pass over `groups` work-groups.
    fn dispatch(&mut self, surface: &mut Self::Surface, params: &KernelParams, groups: [u32; 2]) -> Result<()>;

    /// Make the last dispatch's writes visible to the presentation pass.
    fn barrier(&mut self) -> Result<()>;

    /// Draw the averaged surface onto the display target. Must not modify the surface.
    fn present(&mut self, surface: &Self::Surface, params: &PresentParams) -> Result<()>;

    /// Release programs and targets.
    fn destroy(&mut self);
}

/// Rendering interface implemented by the progressive path tracer.
pub trait Renderer {
    /// Build programs and prime the camera. A viewport must be set afterwards.
    fn init(&mut self) -> Result<()>;

    /// Free all GPU resources.
    fn destroy(&mut self);

    /// Advance the image by one tick.
    fn render(&mut self) -> Result<()>;

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<()>;

    fn set_perspective(&mut self, fov_y: f32, aspect: f32, z_near: f32, z_far: f32) -> Result<()>;

    /// Export the current image as row-major RGB8.
    fn read_frame_buffer(&self, buffer: &mut [u8], width: u32, height: u32) -> Result<()>;
}

/// Controller lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    /// Programs failed to build; nothing will be dispatched
    Unusable,
    ReadyActive,
    ReadyPaused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Unusable,
    Ready,
}

/// Progressive path tracer driving a [`TraceBackend`].
pub struct PathTracer<B: TraceBackend> {
    backend: B,
    camera: OrbitCamera,
    proj: Mat4,
    viewport: Option<Viewport>,
    surface: Option<B::Surface>,
    session: Session,
    clear_color: Texel,
    ssaa: bool,
    lifecycle: Lifecycle,
    shader_logs: Vec<ProgramLog>,
}

impl<B: TraceBackend> PathTracer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            camera: OrbitCamera::default(),
            proj: Perspective::default().matrix(),
            viewport: None,
            surface: None,
            session: Session::new(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            ssaa: false,
            lifecycle: Lifecycle::Uninitialized,
            shader_logs: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        match self.lifecycle {
            Lifecycle::Uninitialized => State::Uninitialized,
            Lifecycle::Unusable => State::Unusable,
            Lifecycle::Ready if self.session.active => State::ReadyActive,
            Lifecycle::Ready => State::ReadyPaused,
        }
    }

    /// Build logs from the last `init()`, one entry per program.
    pub fn shader_logs(&self) -> &[ProgramLog] {
        &self.shader_logs
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    /// Mutable camera access. Callers must [`restart`](Self::restart) after
    /// moving the camera.
    pub fn camera_mut(&mut self) -> &mut OrbitCamera {
        &mut self.camera
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn surface(&self) -> Option<&B::Surface> {
        self.surface.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn sample_count(&self) -> u32 {
        self.session.sample_count()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    /// Pause or resume sampling. Accumulated samples are kept.
    pub fn set_active(&mut self, active: bool) {
        self.session.active = active;
    }

    pub fn max_bounces(&self) -> u32 {
        self.session.max_bounces()
    }

    /// Set the path length cap, clamped to `[MIN_BOUNCES, MAX_BOUNCES]`.
    /// A changed value restarts accumulation.
    pub fn set_max_bounces(&mut self, max_bounces: u32) -> Result<()> {
        let clamped = max_bounces.clamp(MIN_BOUNCES, MAX_BOUNCES);
        if clamped != self.session.max_bounces {
            self.session.max_bounces = clamped;
            self.invalidate()?;
        }
        Ok(())
    }

    /// Background the surface is cleared to on every restart.
    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32) {
        self.clear_color = [r, g, b, 1.0];
    }

    pub fn ssaa(&self) -> bool {
        self.ssaa
    }

    /// Enable/disable supersampling. Takes effect on the next `set_viewport`.
    pub fn set_ssaa(&mut self, ssaa: bool) {
        self.ssaa = ssaa;
    }

    /// Discard accumulated samples.
    pub fn restart(&mut self) -> Result<()> {
        self.invalidate()
    }

    /// Kernel inputs for the current camera, projection and session.
    pub fn kernel_params(&self) -> KernelParams {
        let eye = self.camera.eye();
        let view_proj = self.proj * self.camera.view_matrix();
        let [r00, r10, r01, r11] = corner_rays(view_proj, eye);
        let (width, height) = self
            .viewport
            .map(|v| (v.buffer_width(), v.buffer_height()))
            .unwrap_or((0, 0));

        KernelParams {
            eye: eye.to_array(),
            max_bounces: self.session.max_bounces,
            ray00: r00.to_array(),
            num_samples: self.session.sample_count,
            ray10: r10.to_array(),
            width,
            ray01: r01.to_array(),
            height,
            ray11: r11.to_array(),
            _pad: 0,
        }
    }

    /// Draw the averaged surface onto the display target.
    pub fn present(&mut self) -> Result<()> {
        let _span = tracing::info_span!("pt_present").entered();
        self.ensure_ready()?;
        let (Some(surface), Some(vp)) = (&self.surface, self.viewport) else {
            return Ok(());
        };
        let params = PresentParams {
            buffer_width: vp.buffer_width(),
            buffer_height: vp.buffer_height(),
            supersample: vp.supersample,
            num_samples: self.session.sample_count,
        };
        self.backend.present(surface, &params)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => Err(Error::NotInitialized),
            Lifecycle::Unusable => Err(Error::ProgramUnusable),
        }
    }

    fn invalidate(&mut self) -> Result<()> {
        self.session.reset();
        if let Some(surface) = &mut self.surface {
            surface.clear(self.clear_color)?;
            debug!("accumulation restarted");
        }
        Ok(())
    }
}

impl<B: TraceBackend> Renderer for PathTracer<B> {
    fn init(&mut self) -> Result<()> {
        let logs = self.backend.build_programs()?;
        for p in &logs {
            for s in &p.logs.stages {
                if !s.log.is_empty() {
                    info!("{} {}: {}", p.program, s.stage, s.log);
                }
            }
        }

        let failed = logs.iter().find(|p| !p.logs.is_ok()).cloned();
        self.shader_logs = logs;
        if let Some(p) = failed {
            warn!("shader program '{}' failed to build", p.program);
            self.lifecycle = Lifecycle::Unusable;
            return Err(Error::ShaderBuild { program: p.program, logs: p.logs });
        }

        self.lifecycle = Lifecycle::Ready;
        self.camera.set_distance(DEFAULT_CAMERA_DISTANCE);
        self.camera.set_look_at(Vec3::ZERO);
        info!("path tracer initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.surface = None;
        self.viewport = None;
        self.backend.destroy();
        self.session.reset();
        self.lifecycle = Lifecycle::Uninitialized;
    }

    fn render(&mut self) -> Result<()> {
        let _span = tracing::info_span!("pt_render").entered();
        self.ensure_ready()?;
        let Some(vp) = self.viewport else {
            return Ok(());
        };
        if self.surface.is_none() || !self.session.should_sample() {
            return Ok(());
        }

        // A pass that never reached the surface is not counted.
        self.session.advance();
        let params = self.kernel_params();
        let dispatched = match self.surface.as_mut() {
            Some(surface) => self.backend.dispatch(surface, &params, vp.work_groups()),
            None => Ok(()),
        };
        if let Err(e) = dispatched {
            self.session.retreat();
            return Err(e);
        }
        self.backend.barrier()
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidViewport { width, height });
        }
        self.ensure_ready()?;

        let vp = Viewport {
            x,
            y,
            width,
            height,
            supersample: if self.ssaa { SSAA_FACTOR } else { 1 },
        };

        // On failure the old viewport stays, or none at all if the surface
        // was already lost.
        self.backend.resize_target(width, height)?;
        let surface = match self.surface.take() {
            Some(s) => s,
            None => self.backend.create_surface()?,
        };
        let surface = self.surface.insert(surface);
        if let Err(e) = surface.resize(vp.buffer_width(), vp.buffer_height()) {
            self.surface = None;
            self.viewport = None;
            self.session.reset();
            return Err(e);
        }
        self.viewport = Some(vp);
        debug!(
            "viewport {}x{} (surface {}x{})",
            width,
            height,
            vp.buffer_width(),
            vp.buffer_height()
        );

        self.invalidate()
    }

    fn set_perspective(&mut self, fov_y: f32, aspect: f32, z_near: f32, z_far: f32) -> Result<()> {
        self.proj = Perspective::new(fov_y, aspect, z_near, z_far).matrix();
        self.invalidate()
    }

    fn read_frame_buffer(&self, buffer: &mut [u8], width: u32, height: u32) -> Result<()> {
        let surface = self.surface.as_ref().ok_or(Error::NotInitialized)?;
        surface.read_back(buffer, width, height, self.session.sample_count)
    }
}
