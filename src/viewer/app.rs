//! Main viewer application: control panel, status bar and the viewport.

use std::collections::VecDeque;
use std::time::Instant;

use egui::{CentralPanel, RichText, TopBottomPanel};
use log::info;

use super::export;
use super::settings::Settings;
use super::viewport::Viewport;
use crate::progressive::{State, MAX_BOUNCES, MIN_BOUNCES};

/// Frames averaged for the FPS readout
const FPS_WINDOW: usize = 60;

/// What the control panel asked for this frame.
#[derive(Default)]
struct PanelActions {
    toggle_run: bool,
    restart: bool,
    bounces: Option<u32>,
    ssaa: Option<bool>,
    clear_color: Option<[f32; 3]>,
    save_image: bool,
}

pub struct ViewerApp {
    viewport: Viewport,
    settings: Settings,
    show_controls: bool,
    status_message: String,
    frame_times: VecDeque<Instant>,
    _trace_guard: Option<tracing_chrome::FlushGuard>,
}

impl ViewerApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: Settings,
        trace_guard: Option<tracing_chrome::FlushGuard>,
    ) -> Self {
        let mut viewport = Viewport::new(settings.fov_y_degrees);
        let status_message = match viewport.init_tracer(cc.wgpu_render_state.as_ref(), &settings) {
            Ok(()) => "Ready".to_string(),
            Err(e) => {
                log::error!("{e}");
                "Path tracer unavailable, see log".to_string()
            }
        };

        Self {
            viewport,
            settings,
            show_controls: true,
            status_message,
            frame_times: VecDeque::with_capacity(FPS_WINDOW),
            _trace_guard: trace_guard,
        }
    }

    fn fps(&self) -> f32 {
        match (self.frame_times.front(), self.frame_times.back()) {
            (Some(first), Some(last)) if self.frame_times.len() > 1 => {
                let secs = last.duration_since(*first).as_secs_f32();
                if secs > 0.0 {
                    (self.frame_times.len() - 1) as f32 / secs
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    fn tick_fps(&mut self) {
        if self.frame_times.len() == FPS_WINDOW {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(Instant::now());
    }

    fn toggle_running(&mut self) {
        if let Some(t) = self.viewport.tracer_mut() {
            let active = !t.is_active();
            t.set_active(active);
        }
    }

    fn restart(&mut self) {
        let result = match self.viewport.tracer_mut() {
            Some(t) => t.restart(),
            None => Ok(()),
        };
        self.viewport.report(result);
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }
        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            self.toggle_running();
        }
        if ctx.input(|i| i.key_pressed(egui::Key::R)) {
            self.restart();
        }
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }

    fn controls_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_controls;
        let mut actions = PanelActions::default();
        egui::Window::new("Path tracer")
            .open(&mut open)
            .resizable(false)
            .default_pos([10.0, 10.0])
            .show(ctx, |ui| {
                let Some(tracer) = self.viewport.tracer() else {
                    ui.label("No GPU context");
                    return;
                };
                if tracer.state() == State::Unusable {
                    ui.colored_label(egui::Color32::LIGHT_RED, "Shader programs failed to build");
                    for p in tracer.shader_logs().iter().filter(|p| !p.logs.is_ok()) {
                        ui.label(RichText::new(format!("{}:\n{}", p.program, p.logs)).monospace());
                    }
                    return;
                }

                ui.horizontal(|ui| {
                    let label = if tracer.is_active() { "Stop" } else { "Run" };
                    actions.toggle_run = ui.button(label).clicked();
                    actions.restart = ui.button("Restart").clicked();
                });
                ui.label(format!("Total of {} samples done.", tracer.sample_count()));
                ui.separator();

                let mut bounces = tracer.max_bounces();
                let slider = egui::Slider::new(&mut bounces, MIN_BOUNCES..=MAX_BOUNCES).text("maxBounces");
                if ui.add(slider).changed() {
                    actions.bounces = Some(bounces);
                }

                let mut ssaa = tracer.ssaa();
                if ui.checkbox(&mut ssaa, "SSAA (2x2)").changed() {
                    actions.ssaa = Some(ssaa);
                }

                ui.horizontal(|ui| {
                    let mut color = self.settings.clear_color;
                    ui.label("Background");
                    if ui.color_edit_button_rgb(&mut color).changed() {
                        actions.clear_color = Some(color);
                    }
                });

                ui.separator();
                actions.save_image = ui.button("Save image…").clicked();
            });
        self.show_controls = open;
        self.apply(actions);
    }

    fn apply(&mut self, actions: PanelActions) {
        if actions.toggle_run {
            self.toggle_running();
        }
        if actions.restart {
            self.restart();
        }
        if let Some(tracer) = self.viewport.tracer_mut() {
            let mut result = Ok(());
            if let Some(bounces) = actions.bounces {
                result = tracer.set_max_bounces(bounces);
                self.settings.max_bounces = tracer.max_bounces();
            }
            if let Some(ssaa) = actions.ssaa {
                tracer.set_ssaa(ssaa);
                self.settings.ssaa = ssaa;
            }
            if let Some([r, g, b]) = actions.clear_color {
                tracer.set_clear_color(r, g, b);
                self.settings.clear_color = [r, g, b];
                result = result.and(tracer.restart());
            }
            self.viewport.report(result);
        }
        if actions.ssaa.is_some() {
            // Supersampling changes the surface size.
            self.viewport.request_resize();
        }
        if actions.save_image {
            self.save_image();
        }
    }

    fn save_image(&mut self) {
        let (width, height) = self.viewport.size();
        let Some(tracer) = self.viewport.tracer() else {
            return;
        };
        let Some(path) = export::pick_save_path(self.settings.last_export_dir.as_deref()) else {
            return;
        };
        match export::save_png(tracer, width, height, &path) {
            Ok(()) => {
                self.status_message = format!("Saved {}", path.display());
                self.settings.last_export_dir = path.parent().map(|p| p.to_path_buf());
            }
            Err(e) => {
                log::error!("export failed: {e}");
                self.status_message = format!("Export failed: {e}");
            }
        }
    }

    fn status_bar(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label(format!("FPS: {:.0}", self.fps()));
            ui.separator();
            if let Some(t) = self.viewport.tracer() {
                let state = match t.state() {
                    State::ReadyActive => "running",
                    State::ReadyPaused => "paused",
                    State::Unusable => "unusable",
                    State::Uninitialized => "not initialized",
                };
                ui.label(format!("{} samples ({state})", t.sample_count()));
                ui.separator();
                if let Some((w, h)) = t.backend().display_size() {
                    let ss = t.viewport().map(|v| v.supersample).unwrap_or(1);
                    ui.label(format!("{w}x{h} x{ss}"));
                    ui.separator();
                }
            }
            match self.viewport.last_error() {
                Some(e) => ui.colored_label(egui::Color32::LIGHT_RED, e),
                None => ui.label(&self.status_message),
            };
        });
    }

    fn store_camera(&mut self) {
        if let Some(t) = self.viewport.tracer() {
            let camera = t.camera();
            self.settings.camera_distance = camera.distance();
            self.settings.camera_theta = camera.theta();
            self.settings.camera_phi = camera.phi();
        }
    }
}

impl eframe::App for ViewerApp {
    fn on_exit(&mut self) {
        self.store_camera();
        self.settings.save();
        self.viewport.destroy(None);
        info!("settings saved");
    }

    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let _span = tracing::info_span!("viewer_update").entered();
        self.tick_fps();
        self.handle_keys(ctx);

        TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.toggle_value(&mut self.show_controls, "Controls");
                ui.label(RichText::new("Space run/stop · R restart · drag orbit · wheel zoom").weak());
            });
        });

        TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            self.status_bar(ui);
        });

        CentralPanel::default().frame(egui::Frame::NONE).show(ctx, |ui| {
            self.viewport.show(ui, frame.wgpu_render_state());
        });

        self.controls_window(ctx);

        // Track window size and position for saving on exit
        ctx.input(|i| {
            if let Some(rect) = i.viewport().inner_rect {
                self.settings.window_width = rect.width();
                self.settings.window_height = rect.height();
            }
            if let Some(rect) = i.viewport().outer_rect {
                self.settings.window_pos = Some([rect.min.x, rect.min.y]);
            }
        });

        let sampling = self.viewport.tracer().is_some_and(|t| t.state() == State::ReadyActive);
        if sampling {
            ctx.request_repaint();
        }
    }
}
