use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use vesta_gfx::{GfxCommandBuffer, GfxCommandPool, GfxDevice, GfxQueueType, GfxResult};

use crate::deletion_ring::{DeletionCategory, GpuDeletionRing};

struct UnitPoolInner {
    pool: GfxCommandPool,
    name: String,
    /// 已经重置，可以重新录制的 command buffer
    free: Vec<GfxCommandBuffer>,
    /// 本帧分配出去的 command buffer
    in_use: Vec<GfxCommandBuffer>,
    allocated: usize,
}

/// 一个录制单元独占的 command pool
///
/// 不同的 worker 永远不会共享同一个 pool，因此可以并行录制。
/// 可以 clone 后发送给 worker。
#[derive(Clone)]
pub struct CmdUnit {
    inner: Arc<Mutex<UnitPoolInner>>,
}

impl CmdUnit {
    fn new(device: &dyn GfxDevice, queue: GfxQueueType, name: String) -> GfxResult<Self> {
        let pool = device.create_command_pool(queue, &name)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(UnitPoolInner {
                pool,
                name,
                free: vec![],
                in_use: vec![],
                allocated: 0,
            })),
        })
    }

    /// 分配 command buffer，在当前 frame 使用
    ///
    /// 优先复用 free list 中的 command buffer
    pub fn alloc_command_buffer(&self, device: &dyn GfxDevice, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        let mut inner = self.inner.lock();
        let cmd = match inner.free.pop() {
            Some(cmd) => cmd,
            None => {
                let cmd = device.allocate_command_buffer(inner.pool, &format!("{}-{}", inner.name, debug_name))?;
                inner.allocated += 1;
                cmd
            }
        };
        inner.in_use.push(cmd);
        Ok(cmd)
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueType {
        self.inner.lock().pool.queue
    }

    fn reset(&self, device: &dyn GfxDevice) -> GfxResult<()> {
        device.reset_command_pool(self.inner.lock().pool)
    }

    /// 把本帧使用的 command buffer 交给 deletion ring，到期后回到 free list
    fn retire(&self, ring: &GpuDeletionRing) {
        let used = std::mem::take(&mut self.inner.lock().in_use);
        if used.is_empty() {
            return;
        }
        let inner = self.inner.clone();
        ring.push(DeletionCategory::CommandBuffer, move || {
            inner.lock().free.extend(used);
        });
    }

    fn destroy(&self, device: &dyn GfxDevice) {
        device.destroy_command_pool(self.inner.lock().pool);
    }
}

#[derive(Default)]
struct FramePools {
    /// 图形队列的录制单元：每个 camera 的 draw / light / post 加上 bracket
    graphics: Vec<CmdUnit>,
    compute: Option<CmdUnit>,
}

/// command pool 分配器
///
/// 每个 flight frame 一组 pool，每个录制单元一个 pool。
/// pool 的数量按需增长，slot 复用时重置而不是重新创建。
pub struct CmdAllocator {
    device: Arc<dyn GfxDevice>,
    frames: Vec<FramePools>,
}

// init & destroy
impl CmdAllocator {
    pub fn new(device: Arc<dyn GfxDevice>, fif_count: usize) -> Self {
        Self {
            device,
            frames: (0..fif_count).map(|_| FramePools::default()).collect_vec(),
        }
    }

    /// 调用前需要 wait idle
    pub fn destroy(&mut self) {
        log::info!("destroying command pools");
        for frame in self.frames.drain(..) {
            for unit in frame.graphics.iter().chain(frame.compute.iter()) {
                unit.destroy(self.device.as_ref());
            }
        }
    }
}
impl Drop for CmdAllocator {
    fn drop(&mut self) {
        debug_assert!(
            self.frames.is_empty() || std::thread::panicking(),
            "CmdAllocator must be destroyed before being dropped"
        );
    }
}

// update
impl CmdAllocator {
    /// 在 flight frame 的 fence 等待之后调用
    ///
    /// 保证至少有 `graphics_units` 个图形录制单元，并重置该 frame 的所有 pool
    pub fn begin_frame(&mut self, flight_index: usize, graphics_units: usize) -> GfxResult<()> {
        let _span = vesta_utils::profile_span!("CmdAllocator::begin_frame");
        let device = self.device.clone();
        let frame = &mut self.frames[flight_index];

        for unit in frame.graphics.iter().chain(frame.compute.iter()) {
            unit.reset(device.as_ref())?;
        }
        while frame.graphics.len() < graphics_units {
            let name = format!("graphics-pool-{}-{}", flight_index, frame.graphics.len());
            frame.graphics.push(CmdUnit::new(device.as_ref(), GfxQueueType::Graphics, name)?);
        }
        Ok(())
    }

    /// 提交之后调用，本帧的 command buffer 在 deletion ring 到期后回收
    pub fn end_frame(&self, flight_index: usize, ring: &GpuDeletionRing) {
        let frame = &self.frames[flight_index];
        for unit in frame.graphics.iter().chain(frame.compute.iter()) {
            unit.retire(ring);
        }
    }
}

// getters
impl CmdAllocator {
    #[inline]
    pub fn graphics_unit(&self, flight_index: usize, unit_index: usize) -> CmdUnit {
        self.frames[flight_index].graphics[unit_index].clone()
    }

    /// compute 录制单元，第一次使用时创建
    pub fn compute_unit(&mut self, flight_index: usize) -> GfxResult<CmdUnit> {
        let frame = &mut self.frames[flight_index];
        if let Some(unit) = &frame.compute {
            return Ok(unit.clone());
        }
        let unit = CmdUnit::new(self.device.as_ref(), GfxQueueType::Compute, format!("compute-pool-{flight_index}"))?;
        frame.compute = Some(unit.clone());
        Ok(unit)
    }

    /// 所有 flight frame 的 pool 总数
    pub fn pool_count(&self) -> usize {
        self.frames.iter().map(|f| f.graphics.len() + f.compute.iter().count()).sum()
    }

    /// 实际向设备分配过的 command buffer 总数
    pub fn allocated_command_buffers(&self) -> usize {
        self.frames
            .iter()
            .flat_map(|f| f.graphics.iter().chain(f.compute.iter()))
            .map(|unit| unit.inner.lock().allocated)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_gfx::{GfxSubmitInfo, null::NullDevice};

    fn record_and_submit(device: &NullDevice, cmds: &[GfxCommandBuffer], fence: vesta_gfx::GfxFence) {
        for cmd in cmds {
            device.begin_command_buffer(*cmd).unwrap();
            device.end_command_buffer(*cmd).unwrap();
        }
        device.submit(GfxQueueType::Graphics, &[GfxSubmitInfo::new(cmds)], Some(fence)).unwrap();
    }

    #[test]
    fn test_pools_grow_lazily_and_buffers_are_recycled() {
        let null = Arc::new(NullDevice::new());
        let device: Arc<dyn GfxDevice> = null.clone();
        let ring = GpuDeletionRing::new(2);
        let mut allocator = CmdAllocator::new(device.clone(), 1);
        let fence = device.create_fence(false, "fence").unwrap();

        for frame in 0..6 {
            if frame > 0 {
                device.wait_fence(fence, u64::MAX).unwrap();
                device.reset_fence(fence).unwrap();
            }
            ring.advance();
            let units = if frame < 2 { 1 } else { 3 };
            allocator.begin_frame(0, units).unwrap();

            let cmds = (0..units)
                .map(|i| allocator.graphics_unit(0, i).alloc_command_buffer(device.as_ref(), "cmd").unwrap())
                .collect_vec();
            record_and_submit(&null, &cmds, fence);
            allocator.end_frame(0, &ring);
        }

        assert_eq!(allocator.pool_count(), 3);
        // ring 长度为 2，每个单元最多同时存在 2 个 command buffer
        assert!(allocator.allocated_command_buffers() <= 6);

        device.wait_idle().unwrap();
        ring.flush_all();
        allocator.destroy();
        device.destroy_fence(fence);
        assert_eq!(null.live_objects().total(), 0);
    }

    #[test]
    fn test_compute_unit_is_created_once() {
        let device: Arc<dyn GfxDevice> = Arc::new(NullDevice::new());
        let mut allocator = CmdAllocator::new(device, 2);
        let a = allocator.compute_unit(1).unwrap();
        let b = allocator.compute_unit(1).unwrap();
        assert_eq!(a.queue(), GfxQueueType::Compute);
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert_eq!(allocator.pool_count(), 1);
        allocator.destroy();
    }
}
