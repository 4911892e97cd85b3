//! Progressive accumulation protocol driven through a recording backend

use glam::Vec3;
use pathtracer::prelude::*;
use pathtracer::progressive::{work_groups, Viewport, SSAA_FACTOR, WORKGROUP_SIZE_X, WORKGROUP_SIZE_Y};
use pathtracer::surface::{rgb8_len, tonemap_channel, Texel};
use pathtracer::util::{GpuErrorKind, ProgramLog, ShaderStage};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Build,
    CreateSurface,
    ResizeTarget(u32, u32),
    Dispatch { params: KernelParams, groups: [u32; 2] },
    Barrier,
    Present(PresentParams),
    Destroy,
}

/// Backend that records every call and adds `radiance` to each covered
/// texel on dispatch, like a kernel returning a constant.
struct Recorder {
    calls: Vec<Call>,
    radiance: f32,
    fail_stage: Option<ShaderStage>,
    fail_dispatch: bool,
    fail_resize: bool,
}

impl Recorder {
    fn new() -> Self {
        Self { calls: Vec::new(), radiance: 0.5, fail_stage: None, fail_dispatch: false, fail_resize: false }
    }

    fn failing(stage: ShaderStage) -> Self {
        Self { fail_stage: Some(stage), ..Self::new() }
    }
}

impl TraceBackend for Recorder {
    type Surface = SoftwareSurface;

    fn build_programs(&mut self) -> Result<Vec<ProgramLog>> {
        self.calls.push(Call::Build);
        let mut logs = ShaderLogs::default();
        for stage in [ShaderStage::Compute, ShaderStage::Link] {
            if self.fail_stage == Some(stage) {
                logs.push(stage, false, "0:12: 'accum' : undeclared identifier");
            } else {
                logs.push(stage, true, "");
            }
        }
        Ok(vec![ProgramLog { program: "pathtracer", logs }])
    }

    fn create_surface(&mut self) -> Result<SoftwareSurface> {
        self.calls.push(Call::CreateSurface);
        Ok(SoftwareSurface::new())
    }

    fn resize_target(&mut self, width: u32, height: u32) -> Result<()> {
        self.calls.push(Call::ResizeTarget(width, height));
        if self.fail_resize {
            return Err(Error::gpu("create_texture", GpuErrorKind::OutOfMemory, "out of memory"));
        }
        Ok(())
    }

    fn dispatch(&mut self, surface: &mut SoftwareSurface, params: &KernelParams, groups: [u32; 2]) -> Result<()> {
        self.calls.push(Call::Dispatch { params: *params, groups });
        if self.fail_dispatch {
            return Err(Error::gpu("dispatch_workgroups", GpuErrorKind::Validation, "binding size mismatch"));
        }
        let (w, h) = surface.size();
        let radiance = self.radiance;
        for y in 0..(groups[1] * WORKGROUP_SIZE_Y) {
            for x in 0..(groups[0] * WORKGROUP_SIZE_X) {
                // Bounds check, as the kernel does for edge groups.
                if x >= params.width || y >= params.height {
                    continue;
                }
                assert!(x < w && y < h, "dispatch wider than the surface");
                let t = &mut surface.texels_mut()[(y * w + x) as usize];
                t[0] += radiance;
                t[1] += radiance;
                t[2] += radiance;
            }
        }
        Ok(())
    }

    fn barrier(&mut self) -> Result<()> {
        self.calls.push(Call::Barrier);
        Ok(())
    }

    fn present(&mut self, _surface: &SoftwareSurface, params: &PresentParams) -> Result<()> {
        self.calls.push(Call::Present(*params));
        Ok(())
    }

    fn destroy(&mut self) {
        self.calls.push(Call::Destroy);
    }
}

const BLACK: Texel = [0.0, 0.0, 0.0, 1.0];

fn ready(width: u32, height: u32) -> PathTracer<Recorder> {
    let mut pt = PathTracer::new(Recorder::new());
    pt.init().unwrap();
    pt.set_viewport(0, 0, width, height).unwrap();
    pt.set_perspective(90f32.to_radians(), width as f32 / height as f32, 0.5, 100.0)
        .unwrap();
    pt
}

fn surface(pt: &PathTracer<Recorder>) -> &SoftwareSurface {
    pt.surface().expect("surface exists after set_viewport")
}

fn dispatches(pt: &PathTracer<Recorder>) -> Vec<KernelParams> {
    pt.backend()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::Dispatch { params, .. } => Some(*params),
            _ => None,
        })
        .collect()
}

#[test]
fn test_invalidation_resets_exactly() {
    let mut pt = ready(32, 24);
    pt.set_clear_color(0.1, 0.2, 0.3);

    for _ in 0..5 {
        pt.render().unwrap();
    }
    assert_eq!(pt.sample_count(), 5);

    // camera mutations followed by a restart
    pt.camera_mut().set_theta(1.0);
    pt.camera_mut().set_phi(-0.4);
    pt.camera_mut().set_distance(3.0);
    pt.restart().unwrap();
    assert_eq!(pt.sample_count(), 0);
    assert!(surface(&pt).is_filled_with([0.1, 0.2, 0.3, 1.0]));

    // camera mutations followed by a viewport change
    pt.render().unwrap();
    pt.camera_mut().set_theta(-2.0);
    pt.set_viewport(0, 0, 40, 20).unwrap();
    assert_eq!(pt.sample_count(), 0);
    assert_eq!(surface(&pt).size(), (40, 20));
    assert!(surface(&pt).is_filled_with([0.1, 0.2, 0.3, 1.0]));
}

#[test]
fn test_invalidation_read_back_shows_clear_color() {
    let mut pt = ready(4, 4);
    pt.set_clear_color(1.0, 0.0, 0.0);
    pt.render().unwrap();
    pt.restart().unwrap();

    let mut buf = vec![0u8; rgb8_len(4, 4)];
    pt.read_frame_buffer(&mut buf, 4, 4).unwrap();
    for px in buf.chunks_exact(3) {
        assert_eq!(px, &[255, 0, 0]);
    }
}

#[test]
fn test_perspective_change_invalidates() {
    let mut pt = ready(8, 8);
    pt.render().unwrap();
    pt.render().unwrap();
    pt.set_perspective(60f32.to_radians(), 1.0, 0.5, 100.0).unwrap();
    assert_eq!(pt.sample_count(), 0);
    assert!(surface(&pt).is_filled_with(BLACK));
}

#[test]
fn test_monotonic_accumulation_while_active() {
    let mut pt = ready(16, 16);
    assert!(pt.is_active());
    for expected in 1..=20 {
        pt.render().unwrap();
        pt.present().unwrap();
        assert_eq!(pt.sample_count(), expected);
    }
    // the kernel sees the post-increment count
    let counts: Vec<u32> = dispatches(&pt).iter().map(|p| p.num_samples).collect();
    assert_eq!(counts, (1..=20).collect::<Vec<_>>());
}

#[test]
fn test_pause_is_idempotent() {
    let mut pt = ready(16, 16);
    pt.render().unwrap();
    pt.render().unwrap();
    pt.set_active(false);
    assert_eq!(pt.state(), State::ReadyPaused);

    let before = surface(&pt).texels().to_vec();
    for _ in 0..10 {
        pt.render().unwrap();
        pt.present().unwrap();
    }
    assert_eq!(pt.sample_count(), 2);
    assert_eq!(surface(&pt).texels(), &before[..]);
    assert_eq!(dispatches(&pt).len(), 2);

    pt.set_active(true);
    pt.render().unwrap();
    assert_eq!(pt.sample_count(), 3);
}

#[test]
fn test_paused_session_forces_first_sample() {
    let mut pt = ready(16, 16);
    pt.set_active(false);
    pt.restart().unwrap();

    pt.render().unwrap();
    assert_eq!(pt.sample_count(), 1);
    pt.render().unwrap();
    pt.render().unwrap();
    assert_eq!(pt.sample_count(), 1);
    // invalidation keeps the paused sub-state
    pt.camera_mut().set_theta(0.3);
    pt.restart().unwrap();
    assert_eq!(pt.state(), State::ReadyPaused);
    pt.render().unwrap();
    assert_eq!(pt.sample_count(), 1);
}

#[test]
fn test_dispatch_covers_surface_with_ceil_groups() {
    let mut pt = ready(721, 17);
    pt.render().unwrap();

    let groups = pt
        .backend()
        .calls
        .iter()
        .find_map(|c| match c {
            Call::Dispatch { groups, .. } => Some(*groups),
            _ => None,
        })
        .unwrap();
    assert_eq!(groups, [46, 2]);
    assert_eq!(work_groups(721, 16), 46);

    // every texel including the partial edge groups got exactly one sample
    let s = surface(&pt);
    assert!(s.texels().iter().all(|t| t[0] == 0.5));
    assert_eq!(s.texel(720, 16), Some([0.5, 0.5, 0.5, 1.0]));
}

#[test]
fn test_render_then_barrier_then_present_order() {
    let mut pt = ready(8, 8);
    pt.backend_mut().calls.clear();
    pt.render().unwrap();
    pt.present().unwrap();

    let calls = &pt.backend().calls;
    assert!(matches!(calls[0], Call::Dispatch { .. }));
    assert_eq!(calls[1], Call::Barrier);
    assert_eq!(
        calls[2],
        Call::Present(PresentParams { buffer_width: 8, buffer_height: 8, supersample: 1, num_samples: 1 })
    );
}

#[test]
fn test_present_does_not_touch_state() {
    let mut pt = ready(8, 8);
    pt.render().unwrap();
    let before = surface(&pt).texels().to_vec();
    for _ in 0..3 {
        pt.present().unwrap();
    }
    assert_eq!(pt.sample_count(), 1);
    assert_eq!(surface(&pt).texels(), &before[..]);
}

#[test]
fn test_kernel_params_carry_camera_and_bounces() {
    let mut pt = ready(10, 10);
    pt.set_max_bounces(4).unwrap();
    pt.render().unwrap();

    let p = dispatches(&pt)[0];
    assert_eq!(p.max_bounces, 4);
    assert_eq!((p.width, p.height), (10, 10));
    // init() primes the camera at distance 5 looking at the origin
    let eye = Vec3::from_array(p.eye);
    assert!(eye.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    // rays point from the eye towards the origin
    let center = (Vec3::from_array(p.ray00)
        + Vec3::from_array(p.ray10)
        + Vec3::from_array(p.ray01)
        + Vec3::from_array(p.ray11))
        / 4.0;
    assert!(center.normalize().abs_diff_eq(Vec3::Z, 1e-4));
}

#[test]
fn test_max_bounces_clamped_and_restarts_on_change() {
    let mut pt = ready(8, 8);
    pt.render().unwrap();
    pt.set_max_bounces(10).unwrap(); // unchanged
    assert_eq!(pt.sample_count(), 1);

    pt.set_max_bounces(100).unwrap();
    assert_eq!(pt.max_bounces(), 32);
    assert_eq!(pt.sample_count(), 0);

    pt.set_max_bounces(0).unwrap();
    assert_eq!(pt.max_bounces(), 1);
}

#[test]
fn test_ssaa_applies_on_next_viewport() {
    let mut pt = ready(20, 10);
    pt.set_ssaa(true);
    // surface keeps its size until the viewport is set again
    assert_eq!(surface(&pt).size(), (20, 10));

    pt.set_viewport(0, 0, 20, 10).unwrap();
    assert_eq!(surface(&pt).size(), (20 * SSAA_FACTOR, 10 * SSAA_FACTOR));
    assert_eq!(
        pt.viewport(),
        Some(Viewport { x: 0, y: 0, width: 20, height: 10, supersample: 2 })
    );
    assert_eq!(pt.backend().calls.last(), Some(&Call::ResizeTarget(20, 10)));

    pt.render().unwrap();
    let p = dispatches(&pt)[0];
    assert_eq!((p.width, p.height), (40, 20));

    // read-back box-filters the supersampled surface down to the viewport
    let mut buf = vec![0u8; rgb8_len(20, 10)];
    pt.read_frame_buffer(&mut buf, 20, 10).unwrap();
    assert!(buf.iter().all(|&b| b == tonemap_channel(0.5, 1)));
}

#[test]
fn test_surface_reused_across_viewports() {
    let mut pt = ready(8, 8);
    pt.set_viewport(0, 0, 16, 16).unwrap();
    pt.set_viewport(0, 0, 4, 4).unwrap();
    let created = pt.backend().calls.iter().filter(|c| **c == Call::CreateSurface).count();
    assert_eq!(created, 1);
    assert!(pt.backend().calls.contains(&Call::ResizeTarget(4, 4)));
}

#[test]
fn test_zero_viewport_rejected() {
    let mut pt = ready(8, 8);
    assert!(matches!(pt.set_viewport(0, 0, 0, 8), Err(Error::InvalidViewport { width: 0, height: 8 })));
    assert!(matches!(pt.set_viewport(0, 0, 8, 0), Err(Error::InvalidViewport { .. })));
    // previous viewport is untouched
    assert_eq!(pt.viewport().map(|v| (v.width, v.height)), Some((8, 8)));
}

#[test]
fn test_operations_before_init_rejected() {
    let mut pt = PathTracer::new(Recorder::new());
    assert_eq!(pt.state(), State::Uninitialized);
    assert!(matches!(pt.render(), Err(Error::NotInitialized)));
    assert!(matches!(pt.set_viewport(0, 0, 8, 8), Err(Error::NotInitialized)));
    let mut buf = vec![0u8; 12];
    assert!(matches!(pt.read_frame_buffer(&mut buf, 2, 2), Err(Error::NotInitialized)));
    assert!(pt.backend().calls.is_empty());
}

#[test]
fn test_render_without_viewport_is_noop() {
    let mut pt = PathTracer::new(Recorder::new());
    pt.init().unwrap();
    pt.render().unwrap();
    pt.present().unwrap();
    assert_eq!(pt.sample_count(), 0);
    assert_eq!(pt.backend().calls, vec![Call::Build]);
}

#[test]
fn test_failed_build_leaves_tracer_unusable() {
    let mut pt = PathTracer::new(Recorder::failing(ShaderStage::Link));
    let err = pt.init().unwrap_err();
    match &err {
        Error::ShaderBuild { program, logs } => {
            assert_eq!(*program, "pathtracer");
            assert!(!logs.is_ok());
            assert!(logs.get(ShaderStage::Link).unwrap().contains("undeclared"));
            assert_eq!(logs.get(ShaderStage::Compute), Some(""));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(pt.state(), State::Unusable);
    assert_eq!(pt.shader_logs().len(), 1);

    assert!(matches!(pt.set_viewport(0, 0, 8, 8), Err(Error::ProgramUnusable)));
    assert!(matches!(pt.render(), Err(Error::ProgramUnusable)));
    assert!(!pt.backend().calls.iter().any(|c| matches!(c, Call::Dispatch { .. })));
}

#[test]
fn test_destroy_returns_to_uninitialized() {
    let mut pt = ready(8, 8);
    pt.render().unwrap();
    pt.destroy();
    assert_eq!(pt.state(), State::Uninitialized);
    assert!(pt.surface().is_none());
    assert_eq!(pt.backend().calls.last(), Some(&Call::Destroy));

    pt.init().unwrap();
    pt.set_viewport(0, 0, 4, 4).unwrap();
    pt.render().unwrap();
    assert_eq!(pt.sample_count(), 1);
}

#[test]
fn test_converged_average_is_exposure_independent() {
    let mut pt = ready(4, 4);
    for _ in 0..8 {
        pt.render().unwrap();
    }
    // 8 samples of 0.5 average to 0.5
    let mut buf = vec![0u8; rgb8_len(4, 4)];
    pt.read_frame_buffer(&mut buf, 4, 4).unwrap();
    assert!(buf.iter().all(|&b| b == tonemap_channel(4.0, 8)));
    assert_eq!(tonemap_channel(4.0, 8), tonemap_channel(0.5, 1));
}

#[test]
fn test_input_mapper_restarts_tracer() {
    let mut pt = ready(8, 8);
    let mut input = InputMapper::new();
    pt.render().unwrap();
    pt.render().unwrap();

    input.pointer_moved(&mut pt, 100.0, 100.0, false, false).unwrap();
    assert!(input.pointer_moved(&mut pt, 90.0, 100.0, true, false).unwrap());
    assert_eq!(pt.sample_count(), 0);
    assert!(pt.camera().theta() < 0.0);

    pt.render().unwrap();
    assert!(input.scrolled(&mut pt, 1.0, false).unwrap());
    assert_eq!(pt.camera().distance(), 4.5);
    assert_eq!(pt.sample_count(), 0);

    // ignored while the control panel has the pointer
    pt.render().unwrap();
    assert!(!input.scrolled(&mut pt, 1.0, true).unwrap());
    assert_eq!(pt.sample_count(), 1);
}

#[test]
fn test_failed_dispatch_is_not_counted() {
    let mut pt = ready(8, 8);
    pt.render().unwrap();
    pt.backend_mut().fail_dispatch = true;
    for _ in 0..3 {
        assert!(matches!(pt.render(), Err(Error::Gpu { .. })));
    }
    assert_eq!(pt.sample_count(), 1);
    // no barrier follows a rejected pass
    assert_eq!(pt.backend().calls.iter().filter(|c| **c == Call::Barrier).count(), 1);

    pt.backend_mut().fail_dispatch = false;
    pt.render().unwrap();
    assert_eq!(pt.sample_count(), 2);
    assert_eq!(dispatches(&pt).last().map(|p| p.num_samples), Some(2));

    let mut buf = vec![0u8; rgb8_len(8, 8)];
    pt.read_frame_buffer(&mut buf, 8, 8).unwrap();
    assert!(buf.iter().all(|&b| b == tonemap_channel(0.5, 1)));
}

#[test]
fn test_failed_target_resize_keeps_viewport_and_surface() {
    let mut pt = ready(64, 64);
    pt.render().unwrap();
    pt.backend_mut().fail_resize = true;

    assert!(matches!(pt.set_viewport(0, 0, 8, 8), Err(Error::Gpu { .. })));
    assert_eq!(pt.viewport().map(|v| (v.width, v.height)), Some((64, 64)));
    assert_eq!(surface(&pt).size(), (64, 64));
    assert_eq!(pt.sample_count(), 1);

    // the next pass still covers the old viewport exactly
    pt.render().unwrap();
    let p = *dispatches(&pt).last().unwrap();
    assert_eq!((p.width, p.height), (64, 64));
    assert_eq!(pt.sample_count(), 2);

    pt.backend_mut().fail_resize = false;
    pt.set_viewport(0, 0, 8, 8).unwrap();
    assert_eq!(surface(&pt).size(), (8, 8));
    assert_eq!(pt.sample_count(), 0);
}
