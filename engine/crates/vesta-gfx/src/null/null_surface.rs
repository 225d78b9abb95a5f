use std::{collections::BTreeSet, sync::Arc};

use parking_lot::Mutex;

use crate::{
    error::{GfxError, GfxResult},
    device::GfxDevice,
    handles::{GfxCommandBuffer, GfxExtent, GfxSemaphore},
    null::NullDevice,
    surface::{GfxAcquireOutcome, GfxPresentOutcome, GfxPresentSurface, GfxSwapchainInfo},
};

struct NullSurfaceState {
    window_extent: GfxExtent,
    /// 当前 swapchain 的尺寸，None 表示没有 swapchain
    swapchain_extent: Option<GfxExtent>,
    next_image: u32,

    acquire_calls: u64,
    failing_acquires: BTreeSet<u64>,

    swapchains_created: usize,
    presented: Vec<u32>,
}

/// 模拟的窗口 surface
///
/// Clone 之后共享同一个状态，测试可以在 frame target 拿走 surface 之后继续控制窗口尺寸。
/// 窗口尺寸和 swapchain 尺寸不一致时，acquire 返回 out of date。
#[derive(Clone)]
pub struct NullSurface {
    device: Arc<NullDevice>,
    state: Arc<Mutex<NullSurfaceState>>,
}

impl NullSurface {
    pub const IMAGE_COUNT: usize = 3;

    pub fn new(device: Arc<NullDevice>, window_extent: GfxExtent) -> Self {
        Self {
            device,
            state: Arc::new(Mutex::new(NullSurfaceState {
                window_extent,
                swapchain_extent: None,
                next_image: 0,
                acquire_calls: 0,
                failing_acquires: BTreeSet::new(),
                swapchains_created: 0,
                presented: vec![],
            })),
        }
    }

    /// 模拟窗口缩放
    pub fn set_window_extent(&self, extent: GfxExtent) {
        self.state.lock().window_extent = extent;
    }

    /// 第 `call_index` 次（从 0 开始）acquire 返回 out of date
    pub fn fail_acquire_at(&self, call_index: u64) {
        self.state.lock().failing_acquires.insert(call_index);
    }

    pub fn acquire_calls(&self) -> u64 {
        self.state.lock().acquire_calls
    }

    pub fn swapchains_created(&self) -> usize {
        self.state.lock().swapchains_created
    }

    pub fn presented_images(&self) -> Vec<u32> {
        self.state.lock().presented.clone()
    }
}

impl GfxPresentSurface for NullSurface {
    fn create_swapchain(&mut self, fallback_extent: GfxExtent) -> GfxResult<GfxSwapchainInfo> {
        let mut state = self.state.lock();
        let extent = if state.window_extent.is_empty() { fallback_extent } else { state.window_extent };
        state.swapchain_extent = Some(extent);
        state.next_image = 0;
        state.swapchains_created += 1;
        Ok(GfxSwapchainInfo {
            extent,
            image_count: Self::IMAGE_COUNT,
        })
    }

    fn destroy_swapchain(&mut self) {
        self.state.lock().swapchain_extent = None;
    }

    fn acquire_next_image(&mut self, signal: GfxSemaphore, _timeout_ns: u64) -> GfxResult<GfxAcquireOutcome> {
        let index = {
            let mut state = self.state.lock();
            let call = state.acquire_calls;
            state.acquire_calls += 1;

            let Some(extent) = state.swapchain_extent else {
                return Err(GfxError::Validation("acquire without swapchain".to_string()));
            };
            if state.failing_acquires.remove(&call) || extent != state.window_extent {
                return Ok(GfxAcquireOutcome::OutOfDate);
            }

            let index = state.next_image;
            state.next_image = (index + 1) % Self::IMAGE_COUNT as u32;
            index
        };

        self.device.host_signal_semaphore(signal)?;
        Ok(GfxAcquireOutcome::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn cmd_prepare_present(&mut self, cmd: GfxCommandBuffer, image_index: u32) {
        self.device.cmd_begin_label(cmd, &format!("prepare-present[{image_index}]"));
        self.device.cmd_end_label(cmd);
    }

    fn present(&mut self, image_index: u32, wait: Option<GfxSemaphore>) -> GfxResult<GfxPresentOutcome> {
        if let Some(wait) = wait {
            self.device.host_wait_semaphore(wait)?;
        }

        let mut state = self.state.lock();
        if state.swapchain_extent != Some(state.window_extent) {
            return Ok(GfxPresentOutcome::OutOfDate);
        }
        state.presented.push(image_index);
        Ok(GfxPresentOutcome::Presented { suboptimal: false })
    }

    fn window_extent(&self) -> GfxExtent {
        self.state.lock().window_extent
    }
}
