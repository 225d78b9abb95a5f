//! frame target 的状态机
//!
//! ```text
//! Uninitialized -> Initialized(Windowed | Headless) -> Resizing -> Initialized -> Destroyed
//! ```
//!
//! 窗口模式通过 swapchain present；headless 模式把图像拷贝到 CPU 可见的内存，通过 transport 发送。

mod headless;
mod windowed;

use std::sync::Arc;

use vesta_gfx::{GfxCommandBuffer, GfxDevice, GfxExtent, GfxPresentSurface, GfxReadbackTarget, GfxResult, GfxSemaphore};
use vesta_transport::FrameTransport;

pub use headless::HeadlessPresenter;
pub use windowed::WindowedPresenter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Windowed,
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTargetState {
    Uninitialized,
    Initialized(TargetMode),
    Resizing,
    Destroyed,
}

/// 本帧获取到的 target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredTarget {
    /// swapchain image，headless 模式下为 None
    pub image_index: Option<u32>,
    /// 链上第一个 command buffer 需要等待
    pub wait: Option<GfxSemaphore>,
    /// 链上最后一个 command buffer 需要 signal，present 等待它
    pub signal: Option<GfxSemaphore>,
    /// headless 模式下本帧拷贝的目标
    pub readback: Option<GfxReadbackTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAcquire {
    Ready(AcquiredTarget),
    /// 需要重建之后再试
    OutOfDate,
}

enum Presenter {
    Windowed(WindowedPresenter),
    Headless(HeadlessPresenter),
}

pub struct FrameTarget {
    device: Arc<dyn GfxDevice>,
    presenter: Presenter,
    state: FrameTargetState,
    extent: GfxExtent,
}

// new & init
impl FrameTarget {
    pub fn windowed(device: Arc<dyn GfxDevice>, surface: Box<dyn GfxPresentSurface>, fif_count: usize) -> Self {
        let extent = surface.window_extent();
        Self {
            presenter: Presenter::Windowed(WindowedPresenter::new(surface, fif_count)),
            device,
            state: FrameTargetState::Uninitialized,
            extent,
        }
    }

    /// `ring_size` 个 readback target 轮流使用，前 `ring_size` 帧不会发送
    pub fn headless(
        device: Arc<dyn GfxDevice>,
        transport: Option<Box<dyn FrameTransport>>,
        extent: GfxExtent,
        ring_size: usize,
    ) -> Self {
        Self {
            presenter: Presenter::Headless(HeadlessPresenter::new(transport, ring_size)),
            device,
            state: FrameTargetState::Uninitialized,
            extent,
        }
    }

    pub fn init(&mut self) -> GfxResult<()> {
        debug_assert_eq!(self.state, FrameTargetState::Uninitialized);
        let device = self.device.as_ref();
        let mode = match &mut self.presenter {
            Presenter::Windowed(windowed) => {
                self.extent = windowed.create(device, self.extent)?;
                TargetMode::Windowed
            }
            Presenter::Headless(headless) => {
                headless.create(device, self.extent)?;
                TargetMode::Headless
            }
        };
        self.state = FrameTargetState::Initialized(mode);
        log::info!("frame target initialized: {:?} {}", mode, self.extent);
        Ok(())
    }
}

// destroy
impl FrameTarget {
    /// 调用前需要 wait idle
    pub fn destroy(&mut self) {
        if self.state == FrameTargetState::Destroyed {
            return;
        }
        let device = self.device.as_ref();
        match &mut self.presenter {
            Presenter::Windowed(windowed) => windowed.destroy(device),
            Presenter::Headless(headless) => headless.destroy(device),
        }
        self.state = FrameTargetState::Destroyed;
    }
}
impl Drop for FrameTarget {
    fn drop(&mut self) {
        debug_assert!(
            matches!(self.state, FrameTargetState::Destroyed | FrameTargetState::Uninitialized)
                || std::thread::panicking(),
            "FrameTarget must be destroyed before being dropped"
        );
    }
}

// getters
impl FrameTarget {
    #[inline]
    pub fn state(&self) -> FrameTargetState {
        self.state
    }

    /// 当前的像素尺寸
    #[inline]
    pub fn size(&self) -> GfxExtent {
        self.extent
    }

    #[inline]
    pub fn mode(&self) -> TargetMode {
        match self.presenter {
            Presenter::Windowed(_) => TargetMode::Windowed,
            Presenter::Headless(_) => TargetMode::Headless,
        }
    }

    /// headless 模式下已经发送的帧数
    pub fn frames_transported(&self) -> u64 {
        match &self.presenter {
            Presenter::Windowed(_) => 0,
            Presenter::Headless(headless) => headless.frames_transported(),
        }
    }
}

// update
impl FrameTarget {
    /// 下一次 acquire 会返回 out of date，重建后使用新的尺寸
    ///
    /// 窗口模式下尺寸由窗口决定，`extent` 只在窗口尺寸为 0 时使用
    pub fn request_resize(&mut self, extent: GfxExtent) {
        match &mut self.presenter {
            Presenter::Windowed(windowed) => windowed.request_rebuild(),
            Presenter::Headless(headless) => headless.request_resize(extent),
        }
    }

    pub fn acquire(&mut self, flight_index: usize, timeout_ns: u64) -> GfxResult<TargetAcquire> {
        let _span = vesta_utils::profile_span!("FrameTarget::acquire");
        debug_assert!(matches!(self.state, FrameTargetState::Initialized(_)));
        match &mut self.presenter {
            Presenter::Windowed(windowed) => windowed.acquire(flight_index, timeout_ns),
            Presenter::Headless(headless) => Ok(headless.acquire()),
        }
    }

    /// 录制到链上最后一个 command buffer 中：layout 转换或者拷贝到 CPU 可见内存
    pub fn record_end(&mut self, cmd: GfxCommandBuffer, acquired: &AcquiredTarget) {
        let device = self.device.as_ref();
        match &mut self.presenter {
            Presenter::Windowed(windowed) => windowed.record_end(cmd, acquired),
            Presenter::Headless(_) => {
                if let Some(readback) = acquired.readback {
                    device.cmd_copy_target_to_host(cmd, readback);
                }
            }
        }
    }

    /// 提交之后调用：present，或者发送已经完成的旧帧
    pub fn end_frame(&mut self, acquired: &AcquiredTarget) -> GfxResult<()> {
        let _span = vesta_utils::profile_span!("FrameTarget::end_frame");
        let device = self.device.as_ref();
        match &mut self.presenter {
            Presenter::Windowed(windowed) => windowed.present(acquired),
            Presenter::Headless(headless) => headless.end_frame(device, self.extent),
        }
    }

    /// 重建所有和尺寸相关的对象，返回新的尺寸
    pub fn rebuild(&mut self) -> GfxResult<GfxExtent> {
        let _span = vesta_utils::profile_span!("FrameTarget::rebuild");
        let mode = self.mode();
        self.state = FrameTargetState::Resizing;
        self.device.wait_idle()?;

        let device = self.device.as_ref();
        let old_extent = self.extent;
        self.extent = match &mut self.presenter {
            Presenter::Windowed(windowed) => windowed.rebuild(device, self.extent)?,
            Presenter::Headless(headless) => headless.rebuild(device, self.extent)?,
        };
        self.state = FrameTargetState::Initialized(mode);
        log::info!("frame target rebuilt: {} -> {}", old_extent, self.extent);
        Ok(self.extent)
    }
}
