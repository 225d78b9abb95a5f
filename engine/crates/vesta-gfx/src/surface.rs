use crate::{
    error::GfxResult,
    handles::{GfxCommandBuffer, GfxExtent, GfxSemaphore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxSwapchainInfo {
    pub extent: GfxExtent,
    pub image_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxAcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    /// 需要销毁并重建 swapchain
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxPresentOutcome {
    Presented { suboptimal: bool },
    OutOfDate,
}

/// 窗口模式下的 swapchain
///
/// 只有 frame 线程会访问，因此不要求 `Sync`
pub trait GfxPresentSurface: Send {
    /// 创建（或重建）swapchain
    ///
    /// 如果 surface 不限制尺寸，则使用 `fallback_extent`
    fn create_swapchain(&mut self, fallback_extent: GfxExtent) -> GfxResult<GfxSwapchainInfo>;
    fn destroy_swapchain(&mut self);

    /// timeout: nano seconds
    fn acquire_next_image(&mut self, signal: GfxSemaphore, timeout_ns: u64) -> GfxResult<GfxAcquireOutcome>;
    /// 在 command buffer 中录制：把 swapchain image 转换到可以 present 的状态
    fn cmd_prepare_present(&mut self, cmd: GfxCommandBuffer, image_index: u32);
    fn present(&mut self, image_index: u32, wait: Option<GfxSemaphore>) -> GfxResult<GfxPresentOutcome>;

    /// 窗口当前的物理尺寸
    fn window_extent(&self) -> GfxExtent;
}
