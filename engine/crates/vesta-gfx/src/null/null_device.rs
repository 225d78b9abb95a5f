use parking_lot::Mutex;
use slotmap::{Key, KeyData, SlotMap, new_key_type};

use crate::{
    device::{FenceStatus, GfxBufferUsage, GfxDevice},
    error::{GfxError, GfxResult},
    handles::{
        GfxBuffer, GfxCommandBuffer, GfxCommandPool, GfxExtent, GfxFence, GfxQueueType, GfxReadbackTarget,
        GfxSemaphore,
    },
    submit_info::GfxSubmitInfo,
};

new_key_type! {
    struct SemaphoreKey;
    struct FenceKey;
    struct PoolKey;
    struct CmdKey;
    struct BufferKey;
    struct TargetKey;
}

#[inline]
fn raw_of(key: impl Key) -> u64 {
    key.data().as_ffi()
}

#[inline]
fn key_of<K: Key + From<KeyData>>(raw: u64) -> K {
    K::from(KeyData::from_ffi(raw))
}

struct NullSemaphore {
    name: String,
    signaled: bool,
}

struct NullFence {
    name: String,
    signaled: bool,
    /// signal 该 fence 的最后一个 batch 的序号
    signal_seq: u64,
}

struct NullPool {
    queue: GfxQueueType,
    buffers: Vec<CmdKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdState {
    Initial,
    Recording,
    Executable,
    Pending(u64),
}

struct NullCmd {
    name: String,
    queue: GfxQueueType,
    state: CmdState,
    labels: Vec<String>,
    label_depth: usize,
    copies: Vec<TargetKey>,
}

struct NullBuffer {
    data: Vec<u8>,
}

struct NullTarget {
    extent: GfxExtent,
    pixels: Vec<u8>,
}

/// 被提交的一个 command buffer
#[derive(Debug, Clone)]
pub struct NullSubmittedCommand {
    pub handle: GfxCommandBuffer,
    pub name: String,
    /// 录制时打的 debug label，按顺序
    pub labels: Vec<String>,
}

/// 一个被提交的 batch
#[derive(Debug, Clone)]
pub struct NullSubmission {
    /// batch 的全局序号，从 1 开始
    pub seq: u64,
    /// 属于第几次 submit 调用，从 0 开始
    pub submit_call: usize,
    pub queue: GfxQueueType,
    pub command_buffers: Vec<NullSubmittedCommand>,
    pub waits: Vec<GfxSemaphore>,
    pub signals: Vec<GfxSemaphore>,
    pub fence: Option<GfxFence>,
}

/// 仍然存活的对象数量，用于检查泄漏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullLiveObjects {
    pub semaphores: usize,
    pub fences: usize,
    pub command_pools: usize,
    pub buffers: usize,
    pub readback_targets: usize,
}
impl NullLiveObjects {
    pub fn total(&self) -> usize {
        self.semaphores + self.fences + self.command_pools + self.buffers + self.readback_targets
    }
}

#[derive(Default)]
struct NullState {
    semaphores: SlotMap<SemaphoreKey, NullSemaphore>,
    fences: SlotMap<FenceKey, NullFence>,
    pools: SlotMap<PoolKey, NullPool>,
    cmds: SlotMap<CmdKey, NullCmd>,
    buffers: SlotMap<BufferKey, NullBuffer>,
    targets: SlotMap<TargetKey, NullTarget>,

    submissions: Vec<NullSubmission>,
    submit_calls: usize,
    last_seq: u64,
    completed_seq: u64,

    injected_fence_timeouts: usize,
    device_lost: bool,
}

/// 记录所有调用的 GPU 设备
pub struct NullDevice {
    queues: Vec<GfxQueueType>,
    state: Mutex<NullState>,
}

// new & init
impl NullDevice {
    /// 支持 graphics 和 compute 队列
    pub fn new() -> Self {
        Self::with_queues(&[GfxQueueType::Graphics, GfxQueueType::Compute])
    }

    pub fn with_queues(queues: &[GfxQueueType]) -> Self {
        Self {
            queues: queues.to_vec(),
            state: Mutex::new(NullState::default()),
        }
    }
}
impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

// fault injection
impl NullDevice {
    /// 接下来的 `count` 次 fence 等待都会超时
    pub fn inject_fence_timeouts(&self, count: usize) {
        self.state.lock().injected_fence_timeouts += count;
    }

    /// 之后的所有提交都会返回 [`GfxError::DeviceLost`]
    pub fn inject_device_lost(&self) {
        self.state.lock().device_lost = true;
    }
}

// inspection
impl NullDevice {
    pub fn submissions(&self) -> Vec<NullSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn submit_call_count(&self) -> usize {
        self.state.lock().submit_calls
    }

    pub fn submitted_command_buffer_count(&self) -> usize {
        self.state.lock().submissions.iter().map(|s| s.command_buffers.len()).sum()
    }

    pub fn live_objects(&self) -> NullLiveObjects {
        let state = self.state.lock();
        NullLiveObjects {
            semaphores: state.semaphores.len(),
            fences: state.fences.len(),
            command_pools: state.pools.len(),
            buffers: state.buffers.len(),
            readback_targets: state.targets.len(),
        }
    }

    pub fn buffer_contents(&self, buffer: GfxBuffer) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(key_of::<BufferKey>(buffer.raw())).map(|b| b.data.clone())
    }

    pub fn semaphore_name(&self, semaphore: GfxSemaphore) -> Option<String> {
        self.state.lock().semaphores.get(key_of::<SemaphoreKey>(semaphore.raw())).map(|s| s.name.clone())
    }

    pub fn fence_name(&self, fence: GfxFence) -> Option<String> {
        self.state.lock().fences.get(key_of::<FenceKey>(fence.raw())).map(|f| f.name.clone())
    }
}

// host side semaphore operations, used by NullSurface
impl NullDevice {
    /// 模拟 presentation engine signal 一个 semaphore（acquire）
    pub fn host_signal_semaphore(&self, semaphore: GfxSemaphore) -> GfxResult<()> {
        let mut state = self.state.lock();
        let sem = state
            .semaphores
            .get_mut(key_of::<SemaphoreKey>(semaphore.raw()))
            .ok_or_else(|| GfxError::InvalidHandle(format!("{semaphore:?}")))?;
        if sem.signaled {
            return Err(GfxError::Validation(format!("semaphore {} signaled twice", sem.name)));
        }
        sem.signaled = true;
        Ok(())
    }

    /// 模拟 presentation engine 等待一个 semaphore（present）
    pub fn host_wait_semaphore(&self, semaphore: GfxSemaphore) -> GfxResult<()> {
        let mut state = self.state.lock();
        let sem = state
            .semaphores
            .get_mut(key_of::<SemaphoreKey>(semaphore.raw()))
            .ok_or_else(|| GfxError::InvalidHandle(format!("{semaphore:?}")))?;
        if !sem.signaled {
            return Err(GfxError::Validation(format!("wait on unsignaled semaphore {}", sem.name)));
        }
        sem.signaled = false;
        Ok(())
    }
}

impl NullState {
    fn cmd_mut(&mut self, cmd: GfxCommandBuffer) -> GfxResult<&mut NullCmd> {
        self.cmds.get_mut(key_of::<CmdKey>(cmd.raw)).ok_or_else(|| GfxError::InvalidHandle(format!("{cmd:?}")))
    }

    fn is_completed(&self, state: CmdState) -> bool {
        match state {
            CmdState::Pending(seq) => seq <= self.completed_seq,
            _ => true,
        }
    }

    fn submit_batch(&mut self, queue: GfxQueueType, batch: &GfxSubmitInfo) -> GfxResult<NullSubmission> {
        self.last_seq += 1;
        let seq = self.last_seq;

        let mut command_buffers = Vec::with_capacity(batch.command_buffers().len());
        for &handle in batch.command_buffers() {
            let cmd = self.cmd_mut(handle)?;
            if cmd.queue != queue {
                return Err(GfxError::Validation(format!(
                    "command buffer {} recorded for {} queue submitted to {} queue",
                    cmd.name,
                    cmd.queue.name(),
                    queue.name()
                )));
            }
            if cmd.state != CmdState::Executable {
                return Err(GfxError::Validation(format!("submit command buffer {} in state {:?}", cmd.name, cmd.state)));
            }
            cmd.state = CmdState::Pending(seq);
            let copies = cmd.copies.clone();
            command_buffers.push(NullSubmittedCommand {
                handle,
                name: cmd.name.clone(),
                labels: cmd.labels.clone(),
            });

            // 执行拷贝：用 batch 序号填充像素，便于检查读到的是哪一帧
            for target in copies {
                if let Some(target) = self.targets.get_mut(target) {
                    target.pixels.fill(seq as u8);
                }
            }
        }

        for wait in batch.wait_infos() {
            let sem = self
                .semaphores
                .get_mut(key_of::<SemaphoreKey>(wait.semaphore.raw()))
                .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", wait.semaphore)))?;
            if !sem.signaled {
                return Err(GfxError::Validation(format!("wait on unsignaled semaphore {}", sem.name)));
            }
            sem.signaled = false;
        }
        for signal in batch.signal_infos() {
            let sem = self
                .semaphores
                .get_mut(key_of::<SemaphoreKey>(signal.semaphore.raw()))
                .ok_or_else(|| GfxError::InvalidHandle(format!("{:?}", signal.semaphore)))?;
            if sem.signaled {
                return Err(GfxError::Validation(format!("semaphore {} signaled twice", sem.name)));
            }
            sem.signaled = true;
        }

        Ok(NullSubmission {
            seq,
            submit_call: self.submit_calls,
            queue,
            command_buffers,
            waits: batch.wait_infos().iter().map(|w| w.semaphore).collect(),
            signals: batch.signal_infos().iter().map(|s| s.semaphore).collect(),
            fence: None,
        })
    }
}

impl GfxDevice for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn queue_supported(&self, queue: GfxQueueType) -> bool {
        self.queues.contains(&queue)
    }

    fn create_semaphore(&self, debug_name: &str) -> GfxResult<GfxSemaphore> {
        let key = self.state.lock().semaphores.insert(NullSemaphore {
            name: debug_name.to_string(),
            signaled: false,
        });
        Ok(GfxSemaphore::from_raw(raw_of(key)))
    }

    fn destroy_semaphore(&self, semaphore: GfxSemaphore) {
        let removed = self.state.lock().semaphores.remove(key_of::<SemaphoreKey>(semaphore.raw()));
        vesta_utils::precondition!(removed.is_some(), "destroy unknown semaphore {semaphore:?}");
    }

    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<GfxFence> {
        let key = self.state.lock().fences.insert(NullFence {
            name: debug_name.to_string(),
            signaled,
            signal_seq: 0,
        });
        Ok(GfxFence::from_raw(raw_of(key)))
    }

    fn destroy_fence(&self, fence: GfxFence) {
        let removed = self.state.lock().fences.remove(key_of::<FenceKey>(fence.raw()));
        vesta_utils::precondition!(removed.is_some(), "destroy unknown fence {fence:?}");
    }

    fn wait_fence(&self, fence: GfxFence, _timeout_ns: u64) -> GfxResult<FenceStatus> {
        let mut state = self.state.lock();
        if state.injected_fence_timeouts > 0 {
            state.injected_fence_timeouts -= 1;
            return Ok(FenceStatus::Timeout);
        }

        let (signaled, signal_seq, name) = {
            let f = state
                .fences
                .get(key_of::<FenceKey>(fence.raw()))
                .ok_or_else(|| GfxError::InvalidHandle(format!("{fence:?}")))?;
            (f.signaled, f.signal_seq, f.name.clone())
        };
        if !signaled {
            return Err(GfxError::Validation(format!("wait on fence {name} which no submission will signal")));
        }
        state.completed_seq = state.completed_seq.max(signal_seq);
        Ok(FenceStatus::Signaled)
    }

    fn reset_fence(&self, fence: GfxFence) -> GfxResult<()> {
        let mut state = self.state.lock();
        let f = state
            .fences
            .get_mut(key_of::<FenceKey>(fence.raw()))
            .ok_or_else(|| GfxError::InvalidHandle(format!("{fence:?}")))?;
        f.signaled = false;
        Ok(())
    }

    fn create_command_pool(&self, queue: GfxQueueType, _debug_name: &str) -> GfxResult<GfxCommandPool> {
        if !self.queue_supported(queue) {
            return Err(GfxError::Unsupported(format!("{} queue", queue.name())));
        }
        let key = self.state.lock().pools.insert(NullPool {
            queue,
            buffers: vec![],
        });
        Ok(GfxCommandPool { raw: raw_of(key), queue })
    }

    fn reset_command_pool(&self, pool: GfxCommandPool) -> GfxResult<()> {
        let mut state = self.state.lock();
        let buffers = state
            .pools
            .get(key_of::<PoolKey>(pool.raw))
            .ok_or_else(|| GfxError::InvalidHandle(format!("{pool:?}")))?
            .buffers
            .clone();

        for key in &buffers {
            let cmd_state = state.cmds[*key].state;
            if !state.is_completed(cmd_state) {
                return Err(GfxError::Validation(format!(
                    "reset command pool while {} is still executing",
                    state.cmds[*key].name
                )));
            }
        }
        for key in buffers {
            let cmd = &mut state.cmds[key];
            cmd.state = CmdState::Initial;
            cmd.labels.clear();
            cmd.label_depth = 0;
            cmd.copies.clear();
        }
        Ok(())
    }

    fn destroy_command_pool(&self, pool: GfxCommandPool) {
        let mut state = self.state.lock();
        let Some(removed) = state.pools.remove(key_of::<PoolKey>(pool.raw)) else {
            vesta_utils::precondition!(false, "destroy unknown command pool {pool:?}");
            return;
        };
        for key in removed.buffers {
            if let Some(cmd) = state.cmds.remove(key) {
                let completed = state.is_completed(cmd.state);
                vesta_utils::precondition!(completed, "destroy command pool while {} is still executing", cmd.name);
            }
        }
    }

    fn allocate_command_buffer(&self, pool: GfxCommandPool, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        let mut state = self.state.lock();
        let pool_key = key_of::<PoolKey>(pool.raw);
        let queue = state
            .pools
            .get(pool_key)
            .ok_or_else(|| GfxError::InvalidHandle(format!("{pool:?}")))?
            .queue;
        let key = state.cmds.insert(NullCmd {
            name: debug_name.to_string(),
            queue,
            state: CmdState::Initial,
            labels: vec![],
            label_depth: 0,
            copies: vec![],
        });
        state.pools[pool_key].buffers.push(key);
        Ok(GfxCommandBuffer { raw: raw_of(key), queue })
    }

    fn begin_command_buffer(&self, cmd: GfxCommandBuffer) -> GfxResult<()> {
        let mut state = self.state.lock();
        let cmd = state.cmd_mut(cmd)?;
        if cmd.state != CmdState::Initial {
            return Err(GfxError::Validation(format!("begin command buffer {} in state {:?}", cmd.name, cmd.state)));
        }
        cmd.state = CmdState::Recording;
        Ok(())
    }

    fn end_command_buffer(&self, cmd: GfxCommandBuffer) -> GfxResult<()> {
        let mut state = self.state.lock();
        let cmd = state.cmd_mut(cmd)?;
        if cmd.state != CmdState::Recording {
            return Err(GfxError::Validation(format!("end command buffer {} in state {:?}", cmd.name, cmd.state)));
        }
        if cmd.label_depth != 0 {
            log::warn!("command buffer {} ended with {} open labels", cmd.name, cmd.label_depth);
        }
        cmd.state = CmdState::Executable;
        Ok(())
    }

    fn cmd_begin_label(&self, cmd: GfxCommandBuffer, label: &str) {
        if let Ok(cmd) = self.state.lock().cmd_mut(cmd) {
            cmd.labels.push(label.to_string());
            cmd.label_depth += 1;
        }
    }

    fn cmd_end_label(&self, cmd: GfxCommandBuffer) {
        if let Ok(cmd) = self.state.lock().cmd_mut(cmd) {
            cmd.label_depth = cmd.label_depth.saturating_sub(1);
        }
    }

    fn submit(&self, queue: GfxQueueType, batches: &[GfxSubmitInfo], fence: Option<GfxFence>) -> GfxResult<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(GfxError::DeviceLost);
        }
        if !self.queue_supported(queue) {
            return Err(GfxError::Unsupported(format!("{} queue", queue.name())));
        }

        let mut records = Vec::with_capacity(batches.len());
        for batch in batches {
            records.push(state.submit_batch(queue, batch)?);
        }

        if let Some(fence) = fence {
            let last_seq = state.last_seq;
            let f = state
                .fences
                .get_mut(key_of::<FenceKey>(fence.raw()))
                .ok_or_else(|| GfxError::InvalidHandle(format!("{fence:?}")))?;
            if f.signaled {
                return Err(GfxError::Validation(format!("submit with signaled fence {}", f.name)));
            }
            f.signaled = true;
            f.signal_seq = last_seq;
            if let Some(last) = records.last_mut() {
                last.fence = Some(fence);
            }
        }

        state.submissions.extend(records);
        state.submit_calls += 1;
        Ok(())
    }

    fn create_buffer(&self, size: u64, _usage: GfxBufferUsage, _debug_name: &str) -> GfxResult<GfxBuffer> {
        let key = self.state.lock().buffers.insert(NullBuffer {
            data: vec![0; size as usize],
        });
        Ok(GfxBuffer::from_raw(raw_of(key)))
    }

    fn write_buffer(&self, buffer: GfxBuffer, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut state = self.state.lock();
        let buf = state
            .buffers
            .get_mut(key_of::<BufferKey>(buffer.raw()))
            .ok_or_else(|| GfxError::InvalidHandle(format!("{buffer:?}")))?;
        let begin = offset as usize;
        let end = begin + data.len();
        if end > buf.data.len() {
            return Err(GfxError::Validation(format!(
                "write [{begin}, {end}) out of buffer range {}",
                buf.data.len()
            )));
        }
        buf.data[begin..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        let removed = self.state.lock().buffers.remove(key_of::<BufferKey>(buffer.raw()));
        vesta_utils::precondition!(removed.is_some(), "destroy unknown buffer {buffer:?}");
    }

    fn create_readback_target(&self, extent: GfxExtent, _debug_name: &str) -> GfxResult<GfxReadbackTarget> {
        let key = self.state.lock().targets.insert(NullTarget {
            extent,
            pixels: vec![0; extent.rgba8_size()],
        });
        Ok(GfxReadbackTarget::from_raw(raw_of(key)))
    }

    fn cmd_copy_target_to_host(&self, cmd: GfxCommandBuffer, target: GfxReadbackTarget) {
        if let Ok(cmd) = self.state.lock().cmd_mut(cmd) {
            vesta_utils::precondition!(cmd.state == CmdState::Recording, "record copy into {} outside recording", cmd.name);
            cmd.copies.push(key_of::<TargetKey>(target.raw()));
        }
    }

    fn read_target(&self, target: GfxReadbackTarget, dst: &mut Vec<u8>) -> GfxResult<()> {
        let state = self.state.lock();
        let t = state
            .targets
            .get(key_of::<TargetKey>(target.raw()))
            .ok_or_else(|| GfxError::InvalidHandle(format!("{target:?}")))?;
        debug_assert_eq!(t.pixels.len(), t.extent.rgba8_size());
        dst.clear();
        dst.extend_from_slice(&t.pixels);
        Ok(())
    }

    fn destroy_readback_target(&self, target: GfxReadbackTarget) {
        let removed = self.state.lock().targets.remove(key_of::<TargetKey>(target.raw()));
        vesta_utils::precondition!(removed.is_some(), "destroy unknown readback target {target:?}");
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let mut state = self.state.lock();
        if state.device_lost {
            return Err(GfxError::DeviceLost);
        }
        state.completed_seq = state.last_seq;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit_info::GfxStageMask;

    fn recorded(device: &NullDevice, pool: GfxCommandPool, name: &str) -> GfxCommandBuffer {
        let cmd = device.allocate_command_buffer(pool, name).unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.cmd_begin_label(cmd, name);
        device.cmd_end_label(cmd);
        device.end_command_buffer(cmd).unwrap();
        cmd
    }

    #[test]
    fn test_semaphore_chain_is_validated() {
        let device = NullDevice::new();
        let pool = device.create_command_pool(GfxQueueType::Graphics, "pool").unwrap();
        let sem = device.create_semaphore("a").unwrap();
        let first = recorded(&device, pool, "first");
        let second = recorded(&device, pool, "second");

        let batches = [
            GfxSubmitInfo::new(&[first]).signal(sem, GfxStageMask::ALL_COMMANDS),
            GfxSubmitInfo::new(&[second]).wait(sem, GfxStageMask::ALL_COMMANDS),
        ];
        device.submit(GfxQueueType::Graphics, &batches, None).unwrap();

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].submit_call, submissions[1].submit_call);
        assert_eq!(submissions[1].command_buffers[0].labels, vec!["second".to_string()]);
    }

    #[test]
    fn test_wait_on_unsignaled_semaphore_fails() {
        let device = NullDevice::new();
        let pool = device.create_command_pool(GfxQueueType::Graphics, "pool").unwrap();
        let sem = device.create_semaphore("a").unwrap();
        let cmd = recorded(&device, pool, "cmd");

        let batch = GfxSubmitInfo::new(&[cmd]).wait(sem, GfxStageMask::ALL_COMMANDS);
        assert!(matches!(device.submit(GfxQueueType::Graphics, &[batch], None), Err(GfxError::Validation(_))));
    }

    #[test]
    fn test_pool_reset_requires_fence_wait() {
        let device = NullDevice::new();
        let pool = device.create_command_pool(GfxQueueType::Graphics, "pool").unwrap();
        let fence = device.create_fence(false, "fence").unwrap();
        let cmd = recorded(&device, pool, "cmd");
        device.submit(GfxQueueType::Graphics, &[GfxSubmitInfo::new(&[cmd])], Some(fence)).unwrap();

        assert!(matches!(device.reset_command_pool(pool), Err(GfxError::Validation(_))));
        assert_eq!(device.wait_fence(fence, u64::MAX).unwrap(), FenceStatus::Signaled);
        device.reset_command_pool(pool).unwrap();
        device.begin_command_buffer(cmd).unwrap();
    }

    #[test]
    fn test_injected_faults() {
        let device = NullDevice::new();
        let fence = device.create_fence(true, "fence").unwrap();
        device.inject_fence_timeouts(1);
        assert_eq!(device.wait_fence(fence, 1).unwrap(), FenceStatus::Timeout);
        assert_eq!(device.wait_fence(fence, 1).unwrap(), FenceStatus::Signaled);

        device.inject_device_lost();
        assert!(matches!(device.submit(GfxQueueType::Graphics, &[], None), Err(GfxError::DeviceLost)));
        assert!(!device.queue_supported(GfxQueueType::VideoDecode));
    }

    #[test]
    fn test_readback_copy_marks_pixels() {
        let device = NullDevice::new();
        let pool = device.create_command_pool(GfxQueueType::Graphics, "pool").unwrap();
        let target = device.create_readback_target(GfxExtent::new(2, 2), "target").unwrap();
        let cmd = device.allocate_command_buffer(pool, "copy").unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.cmd_copy_target_to_host(cmd, target);
        device.end_command_buffer(cmd).unwrap();
        device.submit(GfxQueueType::Graphics, &[GfxSubmitInfo::new(&[cmd])], None).unwrap();

        let mut pixels = vec![];
        device.read_target(target, &mut pixels).unwrap();
        assert_eq!(pixels, vec![1u8; 16]);

        device.wait_idle().unwrap();
        device.destroy_readback_target(target);
        device.destroy_command_pool(pool);
        assert_eq!(device.live_objects().total(), 0);
    }
}
