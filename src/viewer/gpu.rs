//! wgpu backend for the progressive path tracer.
//!
//! Owns the sampling kernel, the clear kernel and the screen quad program.
//! The accumulation surface is an rgba32float storage buffer; the screen quad
//! averages it into an Rgba8Unorm display target that egui shows as a native
//! texture.
//!
//! ## Usage
//! ```ignore
//! let backend = GpuBackend::new(device, queue);
//! let mut pt = PathTracer::new(backend);
//! pt.init()?;
//! pt.set_viewport(0, 0, w, h)?;
//! pt.render()?;
//! pt.present()?;
//! // register pt.backend().display_view() with egui
//! ```

use std::future::Future;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{debug, error};

use crate::progressive::{KernelParams, PresentParams, TraceBackend, WORKGROUP_SIZE_X, WORKGROUP_SIZE_Y, work_groups};
use crate::surface::{AccumulationSurface, Texel, TEXEL_BYTES, resolve_rgb8};
use crate::util::{Error, GpuErrorKind, ProgramLog, Result, ShaderLogs, ShaderStage};

const PATHTRACER_WGSL: &str = include_str!("shaders/pathtracer.comp.wgsl");
const CLEAR_WGSL: &str = include_str!("shaders/clear.comp.wgsl");
const SCREEN_QUAD_VERT_WGSL: &str = include_str!("shaders/screen_quad.vert.wgsl");
const SCREEN_QUAD_FRAG_WGSL: &str = include_str!("shaders/screen_quad.frag.wgsl");

/// Format of the texture egui displays.
pub const DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniform of `clear.comp.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ClearParams {
    color: [f32; 4],
    width: u32,
    height: u32,
    _pad: [u32; 2],
}

/// Run `f` inside out-of-memory and validation error scopes and turn a
/// captured error into [`Error::Gpu`] tagged with the caller's location.
#[track_caller]
fn checked<T>(device: &wgpu::Device, op: &'static str, f: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let validation = block_on(device.pop_error_scope());
    let oom = block_on(device.pop_error_scope());

    match validation.or(oom) {
        None => Ok(value),
        Some(e) => {
            let err = Error::gpu(op, error_kind(&e), e.to_string());
            error!("{err}");
            Err(err)
        }
    }
}

fn error_kind(e: &wgpu::Error) -> GpuErrorKind {
    match e {
        wgpu::Error::OutOfMemory { .. } => GpuErrorKind::OutOfMemory,
        wgpu::Error::Validation { .. } => GpuErrorKind::Validation,
        _ => GpuErrorKind::Internal,
    }
}

fn block_on<F: Future>(f: F) -> F::Output {
    pollster::block_on(f)
}

/// Compile one WGSL stage and collect its compiler messages.
fn compile_stage(
    device: &wgpu::Device,
    label: &'static str,
    stage: ShaderStage,
    source: &str,
    logs: &mut ShaderLogs,
) -> Option<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let info = block_on(module.get_compilation_info());
    let scope = block_on(device.pop_error_scope());

    let mut ok = scope.is_none();
    let mut lines = Vec::new();
    for msg in &info.messages {
        if matches!(msg.message_type, wgpu::CompilationMessageType::Error) {
            ok = false;
        }
        match &msg.location {
            Some(loc) => lines.push(format!(
                "{:?} {}:{}: {}",
                msg.message_type, loc.line_number, loc.line_position, msg.message
            )),
            None => lines.push(format!("{:?}: {}", msg.message_type, msg.message)),
        }
    }
    // Compilation info can be empty while the scope still caught the error.
    if let (Some(e), true) = (&scope, lines.is_empty()) {
        lines.push(e.to_string());
    }

    logs.push(stage, ok, lines.join("\n"));
    ok.then_some(module)
}

/// Link a pipeline, recording the outcome under the `link` stage.
fn link<T>(device: &wgpu::Device, logs: &mut ShaderLogs, f: impl FnOnce() -> T) -> Option<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = f();
    match block_on(device.pop_error_scope()) {
        None => {
            logs.push(ShaderStage::Link, true, String::new());
            Some(pipeline)
        }
        Some(e) => {
            logs.push(ShaderStage::Link, false, e.to_string());
            None
        }
    }
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group layout shared by both compute kernels:
/// @binding(0) params uniform, @binding(1) accumulation storage.
fn kernel_layout(device: &wgpu::Device, label: &'static str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::COMPUTE),
            storage_entry(1, wgpu::ShaderStages::COMPUTE, false),
        ],
    })
}

fn compute_program(
    device: &wgpu::Device,
    name: &'static str,
    source: &str,
    layout: &wgpu::BindGroupLayout,
) -> (Option<wgpu::ComputePipeline>, ProgramLog) {
    let mut logs = ShaderLogs::default();
    let pipeline = compile_stage(device, name, ShaderStage::Compute, source, &mut logs).and_then(|module| {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });
        link(device, &mut logs, || {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        })
    });
    (pipeline, ProgramLog { program: name, logs })
}

fn screen_quad_program(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
) -> (Option<wgpu::RenderPipeline>, ProgramLog) {
    let mut logs = ShaderLogs::default();
    let vert = compile_stage(device, "screen_quad_vert", ShaderStage::Vertex, SCREEN_QUAD_VERT_WGSL, &mut logs);
    let frag = compile_stage(device, "screen_quad_frag", ShaderStage::Fragment, SCREEN_QUAD_FRAG_WGSL, &mut logs);

    let pipeline = match (vert, frag) {
        (Some(vert), Some(frag)) => {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("screen_quad_pl"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            link(device, &mut logs, || {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("screen_quad_pipeline"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vert,
                        entry_point: Some("vs_main"),
                        compilation_options: Default::default(),
                        buffers: &[],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &frag,
                        entry_point: Some("fs_main"),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: DISPLAY_FORMAT,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            })
        }
        _ => {
            logs.push(ShaderStage::Link, false, "not linked: a stage failed to compile");
            None
        }
    };
    (pipeline, ProgramLog { program: "screen_quad", logs })
}

/// Clear kernel plus the handles a surface needs to run it.
struct ClearProgram {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
}

/// Accumulation surface in a GPU storage buffer (rgba32float texels, row-major,
/// top row first).
pub struct GpuSurface {
    clear: Arc<ClearProgram>,
    buffer: Option<wgpu::Buffer>,
    width: u32,
    height: u32,
}

impl GpuSurface {
    fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * TEXEL_BYTES as u64
    }
}

impl AccumulationSurface for GpuSurface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidViewport { width, height });
        }
        let _span = tracing::info_span!("surface_resize", width, height).entered();
        let size = width as u64 * height as u64 * TEXEL_BYTES as u64;
        let device = &self.clear.device;

        // Release the old storage first.
        if let Some(old) = self.buffer.take() {
            old.destroy();
        }
        self.width = 0;
        self.height = 0;

        let buffer = checked(device, "resize", || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("accumulation"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        })?;
        self.buffer = Some(buffer);
        self.width = width;
        self.height = height;
        debug!("accumulation surface {}x{} ({} bytes)", width, height, size);
        Ok(())
    }

    fn clear(&mut self, color: Texel) -> Result<()> {
        let Some(buffer) = &self.buffer else {
            return Ok(());
        };
        let program = &self.clear;
        let params = ClearParams {
            color,
            width: self.width,
            height: self.height,
            _pad: [0; 2],
        };

        checked(&program.device, "clear", || {
            program.queue.write_buffer(&program.params, 0, bytemuck::bytes_of(&params));
            let bind_group = program.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("clear_bg"),
                layout: &program.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: program.params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffer.as_entire_binding(),
                    },
                ],
            });
            let mut encoder = program.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("clear_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(
                    work_groups(self.width, WORKGROUP_SIZE_X),
                    work_groups(self.height, WORKGROUP_SIZE_Y),
                    1,
                );
            }
            // Submission order puts the clear ahead of later sampling passes.
            program.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn read_back(&self, out: &mut [u8], width: u32, height: u32, samples: u32) -> Result<()> {
        let _span = tracing::info_span!("surface_read_back").entered();
        let buffer = self.buffer.as_ref().ok_or(Error::NotInitialized)?;
        let program = &self.clear;
        let device = &program.device;
        let size = self.byte_size();

        let staging = checked(device, "read_back", || {
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
            encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
            program.queue.submit(std::iter::once(encoder.finish()));
            staging
        })?;

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::gpu("read_back", GpuErrorKind::Internal, e.to_string()))?;
        rx.recv()
            .map_err(|e| Error::other(format!("readback channel closed: {e}")))?
            .map_err(|e| Error::gpu("read_back", GpuErrorKind::Internal, e.to_string()))?;

        let texels: Vec<Texel> = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec(&data[..])
        };
        staging.unmap();

        resolve_rgb8(&texels, self.width, self.height, samples, out, width, height)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Offscreen texture the screen quad draws into.
struct DisplayTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct Programs {
    trace: wgpu::ComputePipeline,
    screen_quad: wgpu::RenderPipeline,
    clear: Arc<ClearProgram>,
}

/// [`TraceBackend`] on a wgpu device.
pub struct GpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    trace_layout: wgpu::BindGroupLayout,
    clear_layout: wgpu::BindGroupLayout,
    present_layout: wgpu::BindGroupLayout,
    kernel_params: wgpu::Buffer,
    present_params: wgpu::Buffer,
    programs: Option<Programs>,
    target: Option<DisplayTarget>,
    /// Bumped whenever the display target is recreated
    target_generation: u64,
    /// Sampling passes recorded since the last barrier
    pending: Option<wgpu::CommandEncoder>,
}

impl GpuBackend {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let trace_layout = kernel_layout(&device, "pathtracer_bgl");
        let clear_layout = kernel_layout(&device, "clear_bgl");
        let present_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("screen_quad_bgl"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                storage_entry(1, wgpu::ShaderStages::FRAGMENT, true),
            ],
        });

        let kernel_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kernel_params"),
            size: std::mem::size_of::<KernelParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let present_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("present_params"),
            size: std::mem::size_of::<PresentParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            trace_layout,
            clear_layout,
            present_layout,
            kernel_params,
            present_params,
            programs: None,
            target: None,
            target_generation: 0,
            pending: None,
        }
    }

    /// View of the display target, `None` before the first viewport.
    pub fn display_view(&self) -> Option<&wgpu::TextureView> {
        self.target.as_ref().map(|t| &t.view)
    }

    pub fn display_size(&self) -> Option<(u32, u32)> {
        self.target.as_ref().map(|t| (t.width, t.height))
    }

    /// Changes every time the display target is replaced, so texture
    /// registrations can be refreshed.
    pub fn target_generation(&self) -> u64 {
        self.target_generation
    }

    fn programs(&self) -> Result<&Programs> {
        self.programs.as_ref().ok_or(Error::NotInitialized)
    }
}

impl TraceBackend for GpuBackend {
    type Surface = GpuSurface;

    fn build_programs(&mut self) -> Result<Vec<ProgramLog>> {
        let _span = tracing::info_span!("build_programs").entered();
        let device = &self.device;

        let (trace, trace_log) = compute_program(device, "pathtracer", PATHTRACER_WGSL, &self.trace_layout);
        let (clear, clear_log) = compute_program(device, "clear", CLEAR_WGSL, &self.clear_layout);
        let (screen_quad, quad_log) = screen_quad_program(device, &self.present_layout);

        self.programs = match (trace, clear, screen_quad) {
            (Some(trace), Some(clear), Some(screen_quad)) => {
                let params = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("clear_params"),
                    size: std::mem::size_of::<ClearParams>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                Some(Programs {
                    trace,
                    screen_quad,
                    clear: Arc::new(ClearProgram {
                        device: self.device.clone(),
                        queue: self.queue.clone(),
                        pipeline: clear,
                        layout: self.clear_layout.clone(),
                        params,
                    }),
                })
            }
            _ => None,
        };
        Ok(vec![trace_log, clear_log, quad_log])
    }

    fn create_surface(&mut self) -> Result<GpuSurface> {
        Ok(GpuSurface {
            clear: self.programs()?.clear.clone(),
            buffer: None,
            width: 0,
            height: 0,
        })
    }

    fn resize_target(&mut self, width: u32, height: u32) -> Result<()> {
        let device = &self.device;
        if let Some(old) = self.target.take() {
            old.texture.destroy();
        }
        let texture = checked(device, "resize_target", || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("display_target"),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: DISPLAY_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.target = Some(DisplayTarget { texture, view, width, height });
        self.target_generation += 1;
        Ok(())
    }

    fn dispatch(&mut self, surface: &mut GpuSurface, params: &KernelParams, groups: [u32; 2]) -> Result<()> {
        let buffer = surface.buffer.as_ref().ok_or(Error::NotInitialized)?;
        let programs = self.programs.as_ref().ok_or(Error::NotInitialized)?;
        let device = &self.device;

        let encoder = checked(device, "dispatch", || {
            self.queue.write_buffer(&self.kernel_params, 0, bytemuck::bytes_of(params));
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pathtracer_bg"),
                layout: &self.trace_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.kernel_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffer.as_entire_binding(),
                    },
                ],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pathtracer_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("pathtracer_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&programs.trace);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0], groups[1], 1);
            }
            encoder
        })?;
        self.pending = Some(encoder);
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        // Queue submissions execute in order, so submitting the sampling pass
        // before the screen quad makes its writes visible there.
        if let Some(encoder) = self.pending.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }

    fn present(&mut self, surface: &GpuSurface, params: &PresentParams) -> Result<()> {
        let programs = self.programs()?;
        let target = self.target.as_ref().ok_or(Error::NotInitialized)?;
        let buffer = surface.buffer.as_ref().ok_or(Error::NotInitialized)?;
        let device = &self.device;

        checked(device, "present", || {
            self.queue.write_buffer(&self.present_params, 0, bytemuck::bytes_of(params));
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("screen_quad_bg"),
                layout: &self.present_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.present_params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffer.as_entire_binding(),
                    },
                ],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("screen_quad_encoder"),
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("screen_quad_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&programs.screen_quad);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn destroy(&mut self) {
        self.pending = None;
        if let Some(target) = self.target.take() {
            target.texture.destroy();
        }
        self.programs = None;
        debug!("gpu backend released");
    }
}
