use itertools::Itertools;

use crate::handles::{GfxCommandBuffer, GfxSemaphore};

bitflags::bitflags! {
    /// semaphore 等待或者 signal 时所在的 pipeline stage
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GfxStageMask: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const COMPUTE_SHADER = 1 << 1;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 2;
        const FRAGMENT_SHADER = 1 << 3;
        const TRANSFER = 1 << 4;
        const BOTTOM_OF_PIPE = 1 << 5;
        const ALL_COMMANDS = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxSemaphoreSubmit {
    pub semaphore: GfxSemaphore,
    pub stage: GfxStageMask,
}

/// 一次 submit 中的一个 batch
///
/// 同一个 batch 内的 command buffer 必须属于同一个队列
#[derive(Debug, Clone, Default)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<GfxCommandBuffer>,
    wait_infos: Vec<GfxSemaphoreSubmit>,
    signal_infos: Vec<GfxSemaphoreSubmit>,
}

impl GfxSubmitInfo {
    pub fn new(commands: &[GfxCommandBuffer]) -> Self {
        Self {
            command_buffers: commands.iter().copied().collect_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: GfxSemaphore, stage: GfxStageMask) -> Self {
        self.wait_infos.push(GfxSemaphoreSubmit { semaphore, stage });
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: GfxSemaphore, stage: GfxStageMask) -> Self {
        self.signal_infos.push(GfxSemaphoreSubmit { semaphore, stage });
        self
    }
}
// getters
impl GfxSubmitInfo {
    #[inline]
    pub fn command_buffers(&self) -> &[GfxCommandBuffer] {
        &self.command_buffers
    }

    #[inline]
    pub fn wait_infos(&self) -> &[GfxSemaphoreSubmit] {
        &self.wait_infos
    }

    #[inline]
    pub fn signal_infos(&self) -> &[GfxSemaphoreSubmit] {
        &self.signal_infos
    }
}
