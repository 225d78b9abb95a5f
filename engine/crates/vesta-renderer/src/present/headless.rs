use vesta_gfx::{GfxDevice, GfxExtent, GfxReadbackTarget, GfxResult};
use vesta_transport::{FramePixels, FrameTransport, TransportError, TransportMessage};

use super::{AcquiredTarget, TargetAcquire};

/// 没有窗口时的 frame target
///
/// `ring_size` 个 readback target 轮流作为拷贝目标。第 k 帧结束时读取第 k + 1 - ring_size 帧的结果，
/// 该帧所在 flight frame 的 fence 在本帧开始时已经等待过。
/// 重建之后的前 `ring_size` 帧不发送，避免发出未初始化或者旧尺寸的像素。
pub struct HeadlessPresenter {
    transport: Option<Box<dyn FrameTransport>>,
    ring_size: usize,
    targets: Vec<GfxReadbackTarget>,
    /// 上次重建之后提交的帧数
    frames_rendered: u64,
    frames_transported: u64,
    pending_extent: Option<GfxExtent>,
    pixels: Vec<u8>,
}

// new & init
impl HeadlessPresenter {
    pub fn new(transport: Option<Box<dyn FrameTransport>>, ring_size: usize) -> Self {
        Self {
            transport,
            ring_size,
            targets: vec![],
            frames_rendered: 0,
            frames_transported: 0,
            pending_extent: None,
            pixels: vec![],
        }
    }

    pub(super) fn create(&mut self, device: &dyn GfxDevice, extent: GfxExtent) -> GfxResult<()> {
        for i in 0..self.ring_size {
            let target = device.create_readback_target(extent, &format!("headless-target-{i}"))?;
            self.targets.push(target);
        }
        self.frames_rendered = 0;
        Ok(())
    }

    pub(super) fn destroy(&mut self, device: &dyn GfxDevice) {
        for target in self.targets.drain(..) {
            device.destroy_readback_target(target);
        }
    }

    pub(super) fn rebuild(&mut self, device: &dyn GfxDevice, current: GfxExtent) -> GfxResult<GfxExtent> {
        let extent = self.pending_extent.take().unwrap_or(current);
        self.destroy(device);
        self.create(device, extent)?;
        Ok(extent)
    }
}

// getters
impl HeadlessPresenter {
    #[inline]
    pub fn frames_transported(&self) -> u64 {
        self.frames_transported
    }
}

// update
impl HeadlessPresenter {
    pub(super) fn request_resize(&mut self, extent: GfxExtent) {
        if extent.is_empty() {
            log::warn!("ignore headless resize to {extent}");
            return;
        }
        log::info!("headless resize requested: {extent}");
        self.pending_extent = Some(extent);
    }

    pub(super) fn acquire(&mut self) -> TargetAcquire {
        if self.pending_extent.is_some() {
            return TargetAcquire::OutOfDate;
        }
        let slot = (self.frames_rendered % self.ring_size as u64) as usize;
        TargetAcquire::Ready(AcquiredTarget {
            image_index: None,
            wait: None,
            signal: None,
            readback: Some(self.targets[slot]),
        })
    }

    pub(super) fn end_frame(&mut self, device: &dyn GfxDevice, extent: GfxExtent) -> GfxResult<()> {
        let frame = self.frames_rendered;
        self.frames_rendered += 1;
        if frame < self.ring_size as u64 {
            return Ok(());
        }
        let Some(transport) = self.transport.as_ref() else {
            return Ok(());
        };

        let slot = ((frame + 1) % self.ring_size as u64) as usize;
        device.read_target(self.targets[slot], &mut self.pixels)?;
        let message = TransportMessage::PushFrame(FramePixels {
            width: extent.width,
            height: extent.height,
            pixels: std::mem::take(&mut self.pixels),
        });

        match transport.send(&message) {
            Ok(()) => self.frames_transported += 1,
            Err(TransportError::Closed) => {
                log::warn!("frame transport closed, stop sending frames");
                self.transport = None;
            }
            Err(e) => log::warn!("failed to send frame: {e}"),
        }
        if let TransportMessage::PushFrame(frame) = message {
            self.pixels = frame.pixels;
        }
        Ok(())
    }
}
