//! per-camera 并行录制
//!
//! 每个 active camera 三个 job：draw、light、post，以 `EngineUrgent` 优先级提交。
//! command buffer 由 frame 线程分配后交给 job，每个 job 独占一个录制单元的 pool。
//! job 出错时仍然会交回一个可以提交的 command buffer，单个 camera 不会让整帧失败。

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use itertools::Itertools;
use vesta_gfx::{GfxBuffer, GfxCommandBuffer, GfxDevice, GfxResult};
use vesta_jobs::{JobFuture, JobPriority, ThreadPool, panic_message};
use vesta_render_interface::{cmd_allocator::CmdUnit, scene::ActiveCamera};

use crate::hooks::{LightType, PassContext, RenderPipelineHooks};

/// 同一个 camera 内的 pass 按 Draw -> Light -> Post 的顺序提交
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraPass {
    Draw,
    Light,
    Post,
}
impl CameraPass {
    pub const ALL: [CameraPass; 3] = [CameraPass::Draw, CameraPass::Light, CameraPass::Post];
    pub const COUNT: usize = Self::ALL.len();

    pub fn name(self) -> &'static str {
        match self {
            CameraPass::Draw => "draw",
            CameraPass::Light => "light",
            CameraPass::Post => "post",
        }
    }

    /// 录制单元的序号：`camera_index * 3 + pass`
    #[inline]
    pub fn unit_index(self, camera_index: usize) -> usize {
        camera_index * Self::COUNT + self as usize
    }
}

/// 一个 camera 一帧需要的数据
pub struct CameraRecordInput {
    pub camera: ActiveCamera,
    /// 每个 pass 独占的 uniform buffer，按 [`CameraPass::ALL`] 的顺序
    pub camera_buffers: [GfxBuffer; CameraPass::COUNT],
    /// 按 [`CameraPass::ALL`] 的顺序
    pub units: [CmdUnit; CameraPass::COUNT],
}

struct PassJob {
    device: Arc<dyn GfxDevice>,
    hooks: Arc<dyn RenderPipelineHooks>,
    cmd: GfxCommandBuffer,
    pass: CameraPass,
    camera_index: usize,
    camera: ActiveCamera,
    camera_buffer: GfxBuffer,
    frame_name: String,
}

impl PassJob {
    /// 返回 hook 中发生的错误，command buffer 总是会被 end
    fn record(self) -> GfxResult<Option<String>> {
        let device = self.device.as_ref();
        device.begin_command_buffer(self.cmd)?;
        device.cmd_begin_label(
            self.cmd,
            &format!("{} cam{} {}", self.frame_name, self.camera_index, self.pass.name()),
        );

        let pass = PassContext {
            device,
            cmd: self.cmd,
            camera_index: self.camera_index,
            camera: &self.camera,
            camera_buffer: self.camera_buffer,
            frame_name: &self.frame_name,
        };
        let failure = catch_unwind(AssertUnwindSafe(|| Self::record_pass(self.hooks.as_ref(), self.pass, &pass)))
            .err()
            .map(|payload| panic_message(payload.as_ref()));

        device.cmd_end_label(self.cmd);
        device.end_command_buffer(self.cmd)?;
        Ok(failure)
    }

    fn record_pass(hooks: &dyn RenderPipelineHooks, pass_type: CameraPass, pass: &PassContext<'_>) {
        let _span = vesta_utils::profile_span!("PassJob::record_pass");
        match pass_type {
            CameraPass::Draw => {
                hooks.pre_render(pass);
                pass.device.cmd_begin_label(pass.cmd, "opaque");
                pass.device.cmd_end_label(pass.cmd);
                hooks.post_render(pass);
            }
            CameraPass::Light => {
                hooks.light_setup(pass);
                for light_type in LightType::ALL {
                    hooks.pre_light(pass, light_type);
                    pass.device.cmd_begin_label(pass.cmd, light_type.name());
                    pass.device.cmd_end_label(pass.cmd);
                    hooks.post_light(pass, light_type);
                }
            }
            CameraPass::Post => {
                hooks.post_process(pass);
            }
        }
    }
}

struct PendingPass {
    camera_index: usize,
    pass: CameraPass,
    unit: CmdUnit,
    cmd: GfxCommandBuffer,
    future: JobFuture<GfxResult<Option<String>>>,
}

/// 已经提交给 thread pool 的 camera job
pub struct PendingCameraJobs {
    device: Arc<dyn GfxDevice>,
    frame_name: String,
    passes: Vec<PendingPass>,
}

/// 为每个 camera 分配 command buffer 并提交 draw / light / post job
pub fn spawn_camera_jobs(
    thread_pool: &ThreadPool,
    device: &Arc<dyn GfxDevice>,
    hooks: &Arc<dyn RenderPipelineHooks>,
    frame_name: &str,
    cameras: Vec<CameraRecordInput>,
) -> GfxResult<PendingCameraJobs> {
    let _span = vesta_utils::profile_span!("spawn_camera_jobs");

    // 先分配所有 command buffer，分配失败时不会有 job 在运行
    let mut allocated = Vec::with_capacity(cameras.len() * CameraPass::COUNT);
    for (camera_index, input) in cameras.into_iter().enumerate() {
        let per_pass = CameraPass::ALL.into_iter().zip_eq(input.units).zip_eq(input.camera_buffers);
        for ((pass, unit), camera_buffer) in per_pass {
            let cmd = unit.alloc_command_buffer(device.as_ref(), &format!("cam{camera_index}-{}", pass.name()))?;
            allocated.push((camera_index, pass, unit, cmd, input.camera, camera_buffer));
        }
    }

    let passes = allocated
        .into_iter()
        .map(|(camera_index, pass, unit, cmd, camera, camera_buffer)| {
            let job = PassJob {
                device: device.clone(),
                hooks: hooks.clone(),
                cmd,
                pass,
                camera_index,
                camera,
                camera_buffer,
                frame_name: frame_name.to_string(),
            };
            PendingPass {
                camera_index,
                pass,
                unit,
                cmd,
                future: thread_pool.spawn(JobPriority::EngineUrgent, move || job.record()),
            }
        })
        .collect_vec();

    Ok(PendingCameraJobs {
        device: device.clone(),
        frame_name: frame_name.to_string(),
        passes,
    })
}

impl PendingCameraJobs {
    /// 等待所有 job，按 camera 顺序、camera 内按 Draw -> Light -> Post 返回 command buffer
    ///
    /// 设备错误会在所有 job 结束之后返回
    pub fn wait(self) -> GfxResult<Vec<GfxCommandBuffer>> {
        let _span = vesta_utils::profile_span!("PendingCameraJobs::wait");
        let mut cmds = Vec::with_capacity(self.passes.len());
        let mut first_error = None;

        for PendingPass {
            camera_index,
            pass,
            unit,
            cmd,
            future,
        } in self.passes
        {
            match future.wait() {
                Ok(Ok(None)) => cmds.push(cmd),
                Ok(Ok(Some(failure))) => {
                    log::error!(
                        "{} cam{} {} pass failed, submitting partial commands: {}",
                        self.frame_name,
                        camera_index,
                        pass.name(),
                        failure
                    );
                    cmds.push(cmd);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    // job 没有正常结束，command buffer 的状态未知，换一个空的
                    log::error!(
                        "{} cam{} {} job failed, submitting empty commands: {}",
                        self.frame_name,
                        camera_index,
                        pass.name(),
                        e
                    );
                    match Self::record_empty(self.device.as_ref(), &unit, camera_index, pass) {
                        Ok(cmd) => cmds.push(cmd),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(cmds),
        }
    }

    fn record_empty(
        device: &dyn GfxDevice,
        unit: &CmdUnit,
        camera_index: usize,
        pass: CameraPass,
    ) -> GfxResult<GfxCommandBuffer> {
        let cmd = unit.alloc_command_buffer(device, &format!("cam{camera_index}-{}-empty", pass.name()))?;
        device.begin_command_buffer(cmd)?;
        device.end_command_buffer(cmd)?;
        Ok(cmd)
    }
}
