#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;
use vesta_gfx::{GfxExtent, null::NullDevice};
use vesta_render_interface::scene::{CameraEntry, Transform};
use vesta_renderer::{
    EngineContext, FrameBackend, FrameTarget, LightType, PassContext, RenderPipelineHooks, RendererSettings,
    compute::{ComputeSubEngine, NoopParticleSimulator},
};
use vesta_transport::FrameTransport;

pub const EXTENT: GfxExtent = GfxExtent::new(64, 32);

pub fn settings(frames_in_flight: usize, compute_enabled: bool) -> RendererSettings {
    RendererSettings {
        frames_in_flight,
        worker_threads: 2,
        fence_timeout_ns: u64::MAX,
        compute_enabled,
        extent: EXTENT,
    }
}

pub fn context(null: &Arc<NullDevice>, settings: RendererSettings, hooks: Arc<dyn RenderPipelineHooks>) -> EngineContext {
    EngineContext::new(settings, null.clone(), hooks).unwrap()
}

/// 创建一个绑定了 transform 的 camera，返回 camera 地址
pub fn add_camera(ctx: &EngineContext, x: f32) -> u32 {
    let transform_addr = ctx.scene.transforms.insert(Transform::from_position(Vec3::new(x, 0.0, 5.0)));
    ctx.scene.cameras.insert(CameraEntry {
        transform_addr,
        ..Default::default()
    })
}

fn compute_engine(ctx: &EngineContext) -> ComputeSubEngine {
    ComputeSubEngine::new(ctx.device.as_ref(), ctx.settings.compute_enabled, Arc::new(NoopParticleSimulator))
}

pub fn headless_backend(ctx: &EngineContext, transport: Option<Box<dyn FrameTransport>>) -> FrameBackend {
    let target = FrameTarget::headless(ctx.device.clone(), transport, ctx.settings.extent, ctx.settings.ring_size());
    FrameBackend::new(ctx.clone(), target, compute_engine(ctx)).unwrap()
}

pub fn windowed_backend(ctx: &EngineContext, surface: vesta_gfx::null::NullSurface) -> FrameBackend {
    let target = FrameTarget::windowed(ctx.device.clone(), Box::new(surface), ctx.settings.frames_in_flight);
    FrameBackend::new(ctx.clone(), target, compute_engine(ctx)).unwrap()
}

/// 记录所有回调，可以让某个 camera 的 post process panic
#[derive(Default)]
pub struct RecordingHooks {
    pub events: Mutex<Vec<String>>,
    pub resizes: Mutex<Vec<(u32, u32)>>,
    pub panic_post_on_camera: Option<usize>,
}
impl RecordingHooks {
    fn push(&self, pass: &PassContext<'_>, event: &str) {
        self.events.lock().push(format!("cam{} {}", pass.camera_index, event));
    }

    pub fn events_of(&self, camera_index: usize) -> Vec<String> {
        let prefix = format!("cam{camera_index} ");
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}
impl RenderPipelineHooks for RecordingHooks {
    fn pre_render(&self, pass: &PassContext<'_>) {
        self.push(pass, "pre_render");
    }
    fn post_render(&self, pass: &PassContext<'_>) {
        self.push(pass, "post_render");
    }
    fn light_setup(&self, pass: &PassContext<'_>) {
        self.push(pass, "light_setup");
    }
    fn pre_light(&self, pass: &PassContext<'_>, light_type: LightType) {
        self.push(pass, &format!("pre_light {}", light_type.name()));
    }
    fn post_light(&self, pass: &PassContext<'_>, light_type: LightType) {
        self.push(pass, &format!("post_light {}", light_type.name()));
    }
    fn post_process(&self, pass: &PassContext<'_>) {
        if self.panic_post_on_camera == Some(pass.camera_index) {
            panic!("post process failed on camera {}", pass.camera_index);
        }
        self.push(pass, "post_process");
    }
    fn resize(&self, width: u32, height: u32) {
        self.resizes.lock().push((width, height));
    }
}
