//! Interactive viewer: wgpu backend, egui control panel and viewport

mod app;
pub mod export;
pub mod gpu;
mod settings;
mod viewport;

pub use gpu::{GpuBackend, GpuSurface};
pub use settings::Settings;

use anyhow::Result;
use tracing_subscriber::prelude::*;

/// Startup options collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Default log filter when `RUST_LOG` is unset
    pub log_filter: Option<&'static str>,
    pub ssaa: Option<bool>,
    pub max_bounces: Option<u32>,
    /// Square window size in logical pixels
    pub size: Option<f32>,
}

/// Run the viewer until the window closes.
pub fn run(options: Options) -> Result<()> {
    let env = env_logger::Env::default().default_filter_or(options.log_filter.unwrap_or("info"));
    env_logger::Builder::from_env(env).init();

    let trace_guard = init_tracing();

    std::panic::set_hook(Box::new(|info| {
        let msg = info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
            .or_else(|| info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("Unknown error");

        if msg.contains("wgpu") || msg.contains("Buffer") || msg.contains("shader") {
            eprintln!("\n[GPU Error] {}", msg);
        } else {
            eprintln!("\n[Error] {}", msg);
            if let Some(loc) = info.location() {
                eprintln!("  at {}:{}:{}", loc.file(), loc.line(), loc.column());
            }
        }
    }));

    let mut settings = Settings::load();
    if let Some(ssaa) = options.ssaa {
        settings.ssaa = ssaa;
    }
    if let Some(bounces) = options.max_bounces {
        settings.max_bounces = bounces;
    }
    if let Some(size) = options.size {
        settings.window_width = size;
        settings.window_height = size;
    }
    let settings = settings.sanitized();

    let native_options = eframe::NativeOptions {
        viewport: {
            let mut vp = egui::ViewportBuilder::default()
                .with_inner_size([settings.window_width, settings.window_height])
                .with_title("Path Tracer");
            if let Some(pos) = settings.window_pos {
                vp = vp.with_position(pos);
            }
            vp
        },
        renderer: eframe::Renderer::Wgpu,
        wgpu_options: egui_wgpu::WgpuConfiguration {
            wgpu_setup: egui_wgpu::WgpuSetup::CreateNew(egui_wgpu::WgpuSetupCreateNew {
                device_descriptor: std::sync::Arc::new(|adapter| {
                    let adapter_limits = adapter.limits();
                    wgpu::DeviceDescriptor {
                        label: Some("pathtracer device"),
                        required_features: wgpu::Features::empty(),
                        // Supersampled surfaces outgrow the default storage binding size.
                        required_limits: wgpu::Limits {
                            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                            max_buffer_size: adapter_limits.max_buffer_size,
                            max_texture_dimension_2d: adapter_limits.max_texture_dimension_2d,
                            ..wgpu::Limits::default()
                        },
                        ..Default::default()
                    }
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    };

    eframe::run_native(
        "Path Tracer",
        native_options,
        Box::new(move |cc| Ok(Box::new(app::ViewerApp::new(cc, settings, trace_guard)))),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run: {}", e))
}

fn init_tracing() -> Option<tracing_chrome::FlushGuard> {
    if std::env::var("PATHTRACER_TRACE").ok().as_deref() != Some("1") {
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();

    let subscriber = tracing_subscriber::registry().with(chrome_layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }

    Some(guard)
}
