use vesta_gfx::{
    GfxAcquireOutcome, GfxCommandBuffer, GfxDevice, GfxExtent, GfxPresentOutcome, GfxPresentSurface, GfxResult,
    GfxSemaphore,
};

use super::{AcquiredTarget, TargetAcquire};

/// swapchain present
///
/// image available semaphore 的数量和 flight frame 相同，
/// render complete semaphore 的数量和 swapchain image 相同
pub struct WindowedPresenter {
    surface: Box<dyn GfxPresentSurface>,
    fif_count: usize,
    image_available: Vec<GfxSemaphore>,
    render_complete: Vec<GfxSemaphore>,
    /// suboptimal、present 时 out of date 或者外部要求重建，下一次 acquire 之前重建
    rebuild_requested: bool,
}

// new & init
impl WindowedPresenter {
    pub fn new(surface: Box<dyn GfxPresentSurface>, fif_count: usize) -> Self {
        Self {
            surface,
            fif_count,
            image_available: vec![],
            render_complete: vec![],
            rebuild_requested: false,
        }
    }

    pub(super) fn create(&mut self, device: &dyn GfxDevice, fallback_extent: GfxExtent) -> GfxResult<GfxExtent> {
        let info = self.surface.create_swapchain(fallback_extent)?;
        self.image_available = (0..self.fif_count)
            .map(|i| device.create_semaphore(&format!("window-image-available-{i}")))
            .collect::<GfxResult<Vec<_>>>()?;
        self.render_complete = (0..info.image_count)
            .map(|i| device.create_semaphore(&format!("window-render-complete-{i}")))
            .collect::<GfxResult<Vec<_>>>()?;
        self.rebuild_requested = false;
        Ok(info.extent)
    }

    pub(super) fn destroy(&mut self, device: &dyn GfxDevice) {
        for semaphore in self.image_available.drain(..).chain(self.render_complete.drain(..)) {
            device.destroy_semaphore(semaphore);
        }
        self.surface.destroy_swapchain();
    }

    pub(super) fn rebuild(&mut self, device: &dyn GfxDevice, fallback_extent: GfxExtent) -> GfxResult<GfxExtent> {
        self.destroy(device);
        self.create(device, fallback_extent)
    }
}

// update
impl WindowedPresenter {
    #[inline]
    pub(super) fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub(super) fn acquire(&mut self, flight_index: usize, timeout_ns: u64) -> GfxResult<TargetAcquire> {
        if self.rebuild_requested {
            return Ok(TargetAcquire::OutOfDate);
        }

        let image_available = self.image_available[flight_index];
        match self.surface.acquire_next_image(image_available, timeout_ns) {
            Ok(GfxAcquireOutcome::Acquired { index, suboptimal }) => {
                if suboptimal {
                    log::debug!("swapchain suboptimal, rebuild after present");
                    self.rebuild_requested = true;
                }
                Ok(TargetAcquire::Ready(AcquiredTarget {
                    image_index: Some(index),
                    wait: Some(image_available),
                    signal: Some(self.render_complete[index as usize]),
                    readback: None,
                }))
            }
            Ok(GfxAcquireOutcome::OutOfDate) => Ok(TargetAcquire::OutOfDate),
            Err(e) if e.is_recoverable_by_rebuild() => Ok(TargetAcquire::OutOfDate),
            Err(e) => Err(e),
        }
    }

    pub(super) fn record_end(&mut self, cmd: GfxCommandBuffer, acquired: &AcquiredTarget) {
        if let Some(index) = acquired.image_index {
            self.surface.cmd_prepare_present(cmd, index);
        }
    }

    pub(super) fn present(&mut self, acquired: &AcquiredTarget) -> GfxResult<()> {
        let Some(index) = acquired.image_index else {
            return Ok(());
        };
        match self.surface.present(index, acquired.signal) {
            Ok(GfxPresentOutcome::Presented { suboptimal }) => {
                self.rebuild_requested |= suboptimal;
                Ok(())
            }
            Ok(GfxPresentOutcome::OutOfDate) => {
                self.rebuild_requested = true;
                Ok(())
            }
            Err(e) if e.is_recoverable_by_rebuild() => {
                self.rebuild_requested = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
