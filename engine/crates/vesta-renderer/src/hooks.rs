//! 外部渲染管线的回调
//!
//! 除了 `resize` 之外，回调都在 worker 线程上同步执行，调用时 command buffer 正在录制。
//! 回调不能阻塞，否则会拖慢整帧。

use vesta_gfx::{GfxBuffer, GfxCommandBuffer, GfxDevice};
use vesta_render_interface::scene::ActiveCamera;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Directional,
    Point,
    Spot,
}
impl LightType {
    pub const ALL: [LightType; 3] = [LightType::Directional, LightType::Point, LightType::Spot];

    pub fn name(self) -> &'static str {
        match self {
            LightType::Directional => "directional",
            LightType::Point => "point",
            LightType::Spot => "spot",
        }
    }
}

/// 一个 camera pass 的录制上下文
pub struct PassContext<'a> {
    pub device: &'a dyn GfxDevice,
    pub cmd: GfxCommandBuffer,
    /// camera 在本帧 active camera 列表中的序号
    pub camera_index: usize,
    pub camera: &'a ActiveCamera,
    /// 本帧该 pass 独占的 `PerCameraData`
    pub camera_buffer: GfxBuffer,
    pub frame_name: &'a str,
}

#[allow(unused_variables)]
pub trait RenderPipelineHooks: Send + Sync {
    /// draw pass 开始
    fn pre_render(&self, pass: &PassContext<'_>) {}
    /// draw pass 结束
    fn post_render(&self, pass: &PassContext<'_>) {}

    /// light pass 开始，在所有 light type 之前调用一次
    fn light_setup(&self, pass: &PassContext<'_>) {}
    fn pre_light(&self, pass: &PassContext<'_>, light_type: LightType) {}
    fn post_light(&self, pass: &PassContext<'_>, light_type: LightType) {}

    fn post_process(&self, pass: &PassContext<'_>) {}

    /// frame target 重建之后在 frame 线程上调用
    fn resize(&self, width: u32, height: u32) {}
}

/// 所有回调都为空
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;
impl RenderPipelineHooks for NoopHooks {}
