//! 帧调度核心
//!
//! 每个 tick 的状态：`Idle -> SwapAcquire -> ComputeSubmit -> DrawSubmit -> PresentOrTransport -> Idle`
//!
//! 一帧内提交的所有 command buffer 组成一条严格的线性链：
//! `compute -> draw(cam0) -> light(cam0) -> post(cam0) -> draw(cam1) -> ... -> bracket`，
//! 每个 command buffer 等待前一个 signal 的 semaphore。链的第一个等待 image available，
//! 最后一个 signal render complete 以及该 flight frame 的 fence。

use vesta_gfx::{
    FenceStatus, GfxCommandBuffer, GfxError, GfxFence, GfxQueueType, GfxResult, GfxSemaphore, GfxStageMask,
    GfxSubmitInfo,
};
use vesta_jobs::JobError;
use vesta_render_interface::{
    cmd_allocator::CmdAllocator,
    frame_counter::FrameCounter,
    phase_deletion::DeletionPhase,
    uniform_arena::{PerCameraData, UniformArena},
};

use crate::{
    camera_jobs::{CameraPass, CameraRecordInput, spawn_camera_jobs},
    compute::ComputeSubEngine,
    context::EngineContext,
    present::{AcquiredTarget, FrameTarget, TargetAcquire},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    SwapAcquire,
    ComputeSubmit,
    DrawSubmit,
    PresentOrTransport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FenceTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Submitted { frame_id: u64, command_buffers: usize },
    /// 没有提交任何东西，状态没有变化
    Skipped(SkipReason),
    /// frame target 已经重建，本帧的内容在下一个 tick 渲染
    Rebuilt { width: u32, height: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// 除了 out of date 之外的设备错误，没有安全的降级状态
    #[error("fatal gpu failure: {0}")]
    Fatal(#[from] GfxError),
    #[error("failed to start worker pool: {0}")]
    Jobs(#[from] JobError),
}

/// 每个 flight frame 的同步对象
struct FlightSync {
    fence: GfxFence,
    /// fence 已经 reset 但还没有提交，不能等待
    fence_unsubmitted: bool,
    /// 链上相邻 command buffer 之间的 semaphore，数量随 command buffer 增长
    chain: Vec<GfxSemaphore>,
}

pub struct FrameBackend {
    ctx: EngineContext,
    frame_counter: FrameCounter,
    flights: Vec<FlightSync>,

    cmd_allocator: CmdAllocator,
    uniforms: UniformArena,
    target: FrameTarget,
    compute: ComputeSubEngine,

    stage: FrameStage,
    delta_time: f32,
    time: f64,
    destroyed: bool,
}

// new & init
impl FrameBackend {
    pub fn new(ctx: EngineContext, mut target: FrameTarget, compute: ComputeSubEngine) -> Result<Self, FrameError> {
        let fif_count = ctx.settings.frames_in_flight;
        let frame_counter = FrameCounter::new(fif_count);
        let device = ctx.device.clone();

        // fence 初始为 signaled，第一次使用时不需要等待
        let flights = (0..fif_count)
            .map(|i| {
                Ok(FlightSync {
                    fence: device.create_fence(true, &format!("frame-fence-{i}"))?,
                    fence_unsubmitted: false,
                    chain: vec![],
                })
            })
            .collect::<GfxResult<Vec<_>>>()?;
        if let Err(e) = target.init() {
            flights.iter().for_each(|sync| device.destroy_fence(sync.fence));
            return Err(e.into());
        }

        log::info!(
            "frame backend: {} frames in flight, ring size {}, compute {}",
            fif_count,
            frame_counter.ring_size(),
            if compute.enabled() { "enabled" } else { "disabled" }
        );
        Ok(Self {
            cmd_allocator: CmdAllocator::new(device.clone(), fif_count),
            uniforms: UniformArena::new(device, fif_count),
            ctx,
            frame_counter,
            flights,
            target,
            compute,
            stage: FrameStage::Idle,
            delta_time: 0.0,
            time: 0.0,
            destroyed: false,
        })
    }
}

// destroy
impl FrameBackend {
    /// 等待 GPU 空闲，按依赖的逆序销毁所有对象。可以重复调用
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let device = self.ctx.device.clone();

        for sync in self.flights.iter().filter(|sync| !sync.fence_unsubmitted) {
            match device.wait_fence(sync.fence, self.ctx.settings.fence_timeout_ns) {
                Ok(FenceStatus::Signaled) => {}
                Ok(FenceStatus::Timeout) => log::warn!("fence wait timed out during shutdown"),
                Err(e) => log::error!("fence wait failed during shutdown: {e}"),
            }
        }
        if let Err(e) = device.wait_idle() {
            log::error!("wait idle failed during shutdown: {e}");
        }

        self.target.destroy();
        let flushed = self.ctx.deletion_ring.flush_all();
        let drained = self.ctx.phase_deletion.drain_all();
        self.ctx.resources.destroy_all();
        self.cmd_allocator.destroy();
        self.uniforms.destroy();
        for sync in self.flights.drain(..) {
            device.destroy_fence(sync.fence);
            for semaphore in sync.chain {
                device.destroy_semaphore(semaphore);
            }
        }
        log::info!(
            "frame backend destroyed after {} frames, {} deferred and {} phase objects flushed",
            self.frame_counter.frame_id(),
            flushed,
            drained
        );
    }
}
impl Drop for FrameBackend {
    fn drop(&mut self) {
        debug_assert!(self.destroyed || std::thread::panicking(), "FrameBackend must be destroyed before being dropped");
    }
}

// getters
impl FrameBackend {
    #[inline]
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn target(&self) -> &FrameTarget {
        &self.target
    }

    #[inline]
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    #[inline]
    pub fn cmd_allocator(&self) -> &CmdAllocator {
        &self.cmd_allocator
    }

    #[inline]
    pub fn uniforms(&self) -> &UniformArena {
        &self.uniforms
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }
}

// update
impl FrameBackend {
    /// 宿主驱动的时间，compute 使用 delta time
    pub fn set_timing(&mut self, delta_time: f64, time: f64) {
        self.delta_time = delta_time as f32;
        self.time = time;
    }

    /// 下一个 tick 重建 frame target
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.target.request_resize(vesta_gfx::GfxExtent::new(width, height));
    }

    /// 执行一帧
    ///
    /// - fence 等待超时：跳过本帧，不修改任何状态
    /// - frame target out of date：重建，调用 resize hook，下一个 tick 渲染本帧
    /// - 其他设备错误：返回 [`FrameError::Fatal`]
    pub fn tick(&mut self) -> Result<FrameOutcome, FrameError> {
        let _span = vesta_utils::profile_span!("FrameBackend::tick");
        let result = self.tick_inner();
        if let Err(e) = &result {
            log::error!("{} fatal error in {:?}: {}", self.frame_counter.frame_name(), self.stage, e);
        }
        self.stage = FrameStage::Idle;
        result
    }

    fn tick_inner(&mut self) -> Result<FrameOutcome, FrameError> {
        let device = self.ctx.device.clone();
        let flight_index = self.frame_counter.flight_index();
        let frame_name = self.frame_counter.frame_name();
        let timeout_ns = self.ctx.settings.fence_timeout_ns;

        // SwapAcquire
        self.stage = FrameStage::SwapAcquire;
        let fence = self.flights[flight_index].fence;
        if device.wait_fence(fence, timeout_ns)? == FenceStatus::Timeout {
            log::warn!("{frame_name} fence wait timed out, frame skipped");
            return Ok(FrameOutcome::Skipped(SkipReason::FenceTimeout));
        }
        let acquired = match self.target.acquire(flight_index, timeout_ns)? {
            TargetAcquire::Ready(acquired) => acquired,
            TargetAcquire::OutOfDate => return self.rebuild(),
        };
        device.reset_fence(fence)?;
        self.flights[flight_index].fence_unsubmitted = true;

        // 至少 RingSize - 1 帧之前 push 的对象，GPU 已经不再引用
        self.ctx.deletion_ring.advance();
        self.ctx.phase_deletion.drain(DeletionPhase::Render);

        let cameras = self.ctx.scene.active_cameras();
        let camera_count = cameras.len();
        let unit_count = camera_count * CameraPass::COUNT + 1;
        self.cmd_allocator.begin_frame(flight_index, unit_count)?;
        self.uniforms.ensure(flight_index, unit_count)?;
        let mut chain = Vec::with_capacity(camera_count * CameraPass::COUNT + 2);

        // ComputeSubmit
        self.stage = FrameStage::ComputeSubmit;
        if self.compute.enabled() {
            let unit = self.cmd_allocator.compute_unit(flight_index)?;
            let systems = self.ctx.resources.particle_systems();
            chain.push(self.compute.record(device.as_ref(), &unit, &systems, self.delta_time, &frame_name)?);
        }

        // DrawSubmit
        self.stage = FrameStage::DrawSubmit;
        let extent = self.target.size();
        let aspect_ratio = extent.width as f32 / extent.height.max(1) as f32;
        let mut inputs = Vec::with_capacity(camera_count);
        for (camera_index, camera) in cameras.into_iter().enumerate() {
            let data = PerCameraData::from_camera(&camera, aspect_ratio);
            for pass in CameraPass::ALL {
                self.uniforms.write(flight_index, pass.unit_index(camera_index), &data)?;
            }
            inputs.push(CameraRecordInput {
                camera,
                camera_buffers: CameraPass::ALL
                    .map(|pass| self.uniforms.buffer(flight_index, pass.unit_index(camera_index))),
                units: CameraPass::ALL
                    .map(|pass| self.cmd_allocator.graphics_unit(flight_index, pass.unit_index(camera_index))),
            });
        }
        let pending = spawn_camera_jobs(&self.ctx.thread_pool, &device, &self.ctx.hooks, &frame_name, inputs)?;
        chain.extend(pending.wait()?);
        chain.push(self.record_bracket(flight_index, camera_count, &frame_name, &acquired)?);

        self.submit_chain(flight_index, &chain, &acquired)?;
        self.flights[flight_index].fence_unsubmitted = false;
        self.cmd_allocator.end_frame(flight_index, &self.ctx.deletion_ring);

        // PresentOrTransport
        self.stage = FrameStage::PresentOrTransport;
        self.target.end_frame(&acquired)?;

        let frame_id = self.frame_counter.frame_id();
        self.frame_counter.next_frame();
        Ok(FrameOutcome::Submitted {
            frame_id,
            command_buffers: chain.len(),
        })
    }

    fn rebuild(&mut self) -> Result<FrameOutcome, FrameError> {
        let extent = self.target.rebuild()?;
        self.ctx.hooks.resize(extent.width, extent.height);
        Ok(FrameOutcome::Rebuilt {
            width: extent.width,
            height: extent.height,
        })
    }

    /// 保证 camera 数量为 0 时 base pass 仍然执行，并录制 present / readback 需要的命令
    fn record_bracket(
        &mut self,
        flight_index: usize,
        camera_count: usize,
        frame_name: &str,
        acquired: &AcquiredTarget,
    ) -> GfxResult<GfxCommandBuffer> {
        let device = self.ctx.device.clone();
        let unit = self.cmd_allocator.graphics_unit(flight_index, camera_count * CameraPass::COUNT);
        let cmd = unit.alloc_command_buffer(device.as_ref(), "bracket")?;
        device.begin_command_buffer(cmd)?;
        device.cmd_begin_label(cmd, &format!("{frame_name} base-pass"));
        device.cmd_end_label(cmd);
        self.target.record_end(cmd, acquired);
        device.end_command_buffer(cmd)?;
        Ok(cmd)
    }

    fn submit_chain(
        &mut self,
        flight_index: usize,
        cmds: &[GfxCommandBuffer],
        acquired: &AcquiredTarget,
    ) -> GfxResult<()> {
        let _span = vesta_utils::profile_span!("FrameBackend::submit_chain");
        let device = self.ctx.device.clone();
        let sync = &mut self.flights[flight_index];
        while sync.chain.len() + 1 < cmds.len() {
            let name = format!("chain-{}-{}", flight_index, sync.chain.len());
            sync.chain.push(device.create_semaphore(&name)?);
        }

        // 同一个队列上相邻的 command buffer 合并为一次提交，队列之间的顺序只由 semaphore 保证
        let mut groups: Vec<(GfxQueueType, Vec<GfxSubmitInfo>)> = Vec::new();
        for (i, &cmd) in cmds.iter().enumerate() {
            let mut info = GfxSubmitInfo::new(&[cmd]);
            if i == 0 {
                if let Some(image_available) = acquired.wait {
                    info = info.wait(image_available, Self::first_wait_stage(cmd.queue));
                }
            } else {
                info = info.wait(sync.chain[i - 1], GfxStageMask::ALL_COMMANDS);
            }
            if i + 1 < cmds.len() {
                info = info.signal(sync.chain[i], GfxStageMask::ALL_COMMANDS);
            } else if let Some(render_complete) = acquired.signal {
                info = info.signal(render_complete, GfxStageMask::ALL_COMMANDS);
            }

            match groups.last_mut() {
                Some((queue, infos)) if *queue == cmd.queue => infos.push(info),
                _ => groups.push((cmd.queue, vec![info])),
            }
        }

        let group_count = groups.len();
        for (i, (queue, infos)) in groups.into_iter().enumerate() {
            let fence = (i + 1 == group_count).then_some(sync.fence);
            device.submit(queue, &infos, fence)?;
        }
        Ok(())
    }

    fn first_wait_stage(queue: GfxQueueType) -> GfxStageMask {
        match queue {
            GfxQueueType::Compute => GfxStageMask::COMPUTE_SHADER,
            _ => GfxStageMask::COLOR_ATTACHMENT_OUTPUT,
        }
    }
}
