use crate::{
    error::GfxResult,
    handles::{
        GfxBuffer, GfxCommandBuffer, GfxCommandPool, GfxExtent, GfxFence, GfxQueueType, GfxReadbackTarget,
        GfxSemaphore,
    },
    submit_info::GfxSubmitInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Timeout,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GfxBufferUsage: u32 {
        const UNIFORM = 1 << 0;
        const STORAGE = 1 << 1;
        const TRANSFER_SRC = 1 << 2;
        const TRANSFER_DST = 1 << 3;
    }
}

/// 调度器所需的全部 GPU 能力
///
/// 通过 `Arc<dyn GfxDevice>` 在各个线程之间共享。
/// 实现需要保证同一个 command pool 不会被并发访问时的正确性由调用方负责，
/// 而队列的提交在实现内部串行化。
pub trait GfxDevice: Send + Sync {
    fn name(&self) -> &str;

    fn queue_supported(&self, queue: GfxQueueType) -> bool;

    // sync objects
    fn create_semaphore(&self, debug_name: &str) -> GfxResult<GfxSemaphore>;
    fn destroy_semaphore(&self, semaphore: GfxSemaphore);

    /// # param
    /// * signaled - 是否创建时就 signaled
    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<GfxFence>;
    fn destroy_fence(&self, fence: GfxFence);
    /// timeout: nano seconds
    fn wait_fence(&self, fence: GfxFence, timeout_ns: u64) -> GfxResult<FenceStatus>;
    fn reset_fence(&self, fence: GfxFence) -> GfxResult<()>;

    // commands
    fn create_command_pool(&self, queue: GfxQueueType, debug_name: &str) -> GfxResult<GfxCommandPool>;
    /// 重置 pool 中所有的 command buffer，调用方需要保证这些 command buffer 已经执行完毕
    fn reset_command_pool(&self, pool: GfxCommandPool) -> GfxResult<()>;
    fn destroy_command_pool(&self, pool: GfxCommandPool);
    fn allocate_command_buffer(&self, pool: GfxCommandPool, debug_name: &str) -> GfxResult<GfxCommandBuffer>;
    fn begin_command_buffer(&self, cmd: GfxCommandBuffer) -> GfxResult<()>;
    fn end_command_buffer(&self, cmd: GfxCommandBuffer) -> GfxResult<()>;
    fn cmd_begin_label(&self, cmd: GfxCommandBuffer, label: &str);
    fn cmd_end_label(&self, cmd: GfxCommandBuffer);

    /// 按顺序提交 batches，fence 在所有 batch 执行完毕后 signal
    fn submit(&self, queue: GfxQueueType, batches: &[GfxSubmitInfo], fence: Option<GfxFence>) -> GfxResult<()>;

    // buffers
    fn create_buffer(&self, size: u64, usage: GfxBufferUsage, debug_name: &str) -> GfxResult<GfxBuffer>;
    fn write_buffer(&self, buffer: GfxBuffer, offset: u64, data: &[u8]) -> GfxResult<()>;
    fn destroy_buffer(&self, buffer: GfxBuffer);

    // headless readback
    fn create_readback_target(&self, extent: GfxExtent, debug_name: &str) -> GfxResult<GfxReadbackTarget>;
    /// 在 command buffer 中录制：渲染目标 -> CPU 可见内存
    fn cmd_copy_target_to_host(&self, cmd: GfxCommandBuffer, target: GfxReadbackTarget);
    /// 读取最近一次拷贝的结果，RGBA8
    fn read_target(&self, target: GfxReadbackTarget, dst: &mut Vec<u8>) -> GfxResult<()>;
    fn destroy_readback_target(&self, target: GfxReadbackTarget);

    fn wait_idle(&self) -> GfxResult<()>;
}
