//! Path tracing viewport widget for egui

use std::sync::Arc;

use egui::{Response, Sense, Ui, Vec2};
use log::error;

use super::gpu::GpuBackend;
use super::settings::{Settings, Z_FAR, Z_NEAR};
use crate::input::InputMapper;
use crate::progressive::{PathTracer, Renderer, State};
use crate::{Error, Result};

/// egui reports wheel notches in points; one notch is one zoom step.
const SCROLL_POINTS_PER_STEP: f32 = 50.0;

/// Viewport state: the path tracer plus the egui texture showing its output.
pub struct Viewport {
    tracer: Option<PathTracer<GpuBackend>>,
    input: InputMapper,
    texture_id: Option<egui::TextureId>,
    registered_generation: u64,
    /// Physical pixel size handed to the tracer, `(0, 0)` forces a new viewport
    size: (u32, u32),
    fov_y: f32,
    last_error: Option<String>,
}

impl Viewport {
    pub fn new(fov_y_degrees: f32) -> Self {
        Self {
            tracer: None,
            input: InputMapper::new(),
            texture_id: None,
            registered_generation: 0,
            size: (0, 0),
            fov_y: fov_y_degrees.to_radians(),
            last_error: None,
        }
    }

    /// Create the GPU backend and build programs. Settings are applied
    /// before `init` and the saved camera after it.
    pub fn init_tracer(&mut self, render_state: Option<&egui_wgpu::RenderState>, settings: &Settings) -> Result<()> {
        let render_state = render_state.ok_or_else(|| Error::context("wgpu render state unavailable"))?;
        let backend = GpuBackend::new(
            Arc::new(render_state.device.clone()),
            Arc::new(render_state.queue.clone()),
        );

        let mut tracer = PathTracer::new(backend);
        tracer.set_ssaa(settings.ssaa);
        tracer.set_max_bounces(settings.max_bounces)?;
        let [r, g, b] = settings.clear_color;
        tracer.set_clear_color(r, g, b);

        let result = tracer.init();
        let camera = tracer.camera_mut();
        camera.set_distance(settings.camera_distance);
        camera.set_theta(settings.camera_theta);
        camera.set_phi(settings.camera_phi);

        // Keep an unusable tracer around so its build log can be shown.
        self.tracer = Some(tracer);
        self.size = (0, 0);
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    pub fn tracer(&self) -> Option<&PathTracer<GpuBackend>> {
        self.tracer.as_ref()
    }

    pub fn tracer_mut(&mut self) -> Option<&mut PathTracer<GpuBackend>> {
        self.tracer.as_mut()
    }

    /// Physical size of the displayed image.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Re-apply the viewport on the next frame (picks up an SSAA change).
    pub fn request_resize(&mut self) {
        self.size = (0, 0);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a failed operation, logging each distinct message once.
    pub fn report(&mut self, result: Result<()>) {
        if let Err(e) = result {
            let msg = e.to_string();
            if self.last_error.as_deref() != Some(msg.as_str()) {
                error!("{msg}");
            }
            self.last_error = Some(msg);
        }
    }

    /// Show viewport UI, handle input and advance the image by one tick.
    pub fn show(&mut self, ui: &mut Ui, render_state: Option<&egui_wgpu::RenderState>) -> Response {
        let _span = tracing::info_span!("viewport_show").entered();
        let available = ui.available_size();
        let size = Vec2::new(available.x.max(64.0), available.y.max(64.0));
        let (rect, response) = ui.allocate_exact_size(size, Sense::click_and_drag());

        let ready = matches!(
            self.tracer.as_ref().map(|t| t.state()),
            Some(State::ReadyActive | State::ReadyPaused)
        );
        let Some(render_state) = render_state.filter(|_| ready) else {
            let text = self.last_error.as_deref().unwrap_or("Initializing...");
            ui.painter().rect_filled(rect, 0.0, egui::Color32::from_rgb(30, 30, 35));
            ui.painter().text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                text,
                egui::FontId::default(),
                egui::Color32::GRAY,
            );
            return response;
        };

        let ppp = ui.ctx().pixels_per_point();
        let width = (rect.width() * ppp).round().max(1.0) as u32;
        let height = (rect.height() * ppp).round().max(1.0) as u32;
        if (width, height) != self.size {
            let result = self.apply_size(width, height);
            self.report(result);
        }

        let result = self.handle_input(ui, &response);
        self.report(result);

        if let Some(tracer) = &mut self.tracer {
            let result = tracer.render().and_then(|_| tracer.present());
            self.report(result);
        }

        self.ensure_texture(render_state);
        if let Some(tex_id) = self.texture_id {
            ui.painter().image(
                tex_id,
                rect,
                egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                egui::Color32::WHITE,
            );
        }
        response
    }

    fn apply_size(&mut self, width: u32, height: u32) -> Result<()> {
        let Some(tracer) = &mut self.tracer else {
            return Ok(());
        };
        tracer.set_viewport(0, 0, width, height)?;
        tracer.set_perspective(self.fov_y, width as f32 / height as f32, Z_NEAR, Z_FAR)?;
        self.size = (width, height);
        Ok(())
    }

    fn handle_input(&mut self, ui: &Ui, response: &Response) -> Result<()> {
        let Some(tracer) = &mut self.tracer else {
            return Ok(());
        };
        let (pointer, scroll) = ui.input(|i| (i.pointer.latest_pos(), i.raw_scroll_delta.y));
        // The control panel owns the pointer unless it is over (or dragging in) the image.
        let ui_has_pointer = !(response.hovered() || response.dragged());

        match pointer {
            Some(pos) => {
                let dragging = response.dragged_by(egui::PointerButton::Primary);
                self.input
                    .pointer_moved(tracer, pos.x as f64, pos.y as f64, dragging, ui_has_pointer)?;
            }
            None => self.input.reset(),
        }
        if scroll != 0.0 {
            self.input
                .scrolled(tracer, (scroll / SCROLL_POINTS_PER_STEP) as f64, ui_has_pointer)?;
        }
        Ok(())
    }

    /// Register the display target with egui whenever the backend replaced it.
    fn ensure_texture(&mut self, render_state: &egui_wgpu::RenderState) {
        let Some(backend) = self.tracer.as_ref().map(|t| t.backend()) else {
            return;
        };
        let generation = backend.target_generation();
        if self.texture_id.is_some() && generation == self.registered_generation {
            return;
        }
        let Some(view) = backend.display_view() else {
            return;
        };

        let mut renderer = render_state.renderer.write();
        let tex_id = renderer.register_native_texture(&render_state.device, view, wgpu::FilterMode::Linear);
        if let Some(old_id) = self.texture_id.take() {
            renderer.free_texture(&old_id);
        }
        self.texture_id = Some(tex_id);
        self.registered_generation = generation;
    }

    /// Release GPU resources and the egui texture.
    pub fn destroy(&mut self, render_state: Option<&egui_wgpu::RenderState>) {
        if let (Some(id), Some(rs)) = (self.texture_id.take(), render_state) {
            rs.renderer.write().free_texture(&id);
        }
        if let Some(tracer) = &mut self.tracer {
            tracer.destroy();
        }
    }
}
