use std::sync::Arc;

use vesta_crate_tools::config::EngineConfig;
use vesta_gfx::{GfxDevice, GfxExtent};
use vesta_jobs::{JobError, ThreadPool};
use vesta_render_interface::{
    deletion_ring::GpuDeletionRing, phase_deletion::PhaseDeletionQueue, resource_registry::ResourceRegistry,
    scene::SceneTables,
};

use crate::hooks::RenderPipelineHooks;

/// 调度器需要的配置项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererSettings {
    pub frames_in_flight: usize,
    /// 0 表示 max(hardware_concurrency / 2, 2)
    pub worker_threads: usize,
    pub fence_timeout_ns: u64,
    pub compute_enabled: bool,
    pub extent: GfxExtent,
}
impl Default for RendererSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
impl RendererSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            frames_in_flight: config.frames_in_flight,
            worker_threads: config.resolved_worker_threads(),
            fence_timeout_ns: config.fence_timeout_ns(),
            compute_enabled: config.compute_enabled,
            extent: GfxExtent::new(config.present.width, config.present.height),
        }
    }

    #[inline]
    pub fn ring_size(&self) -> usize {
        self.frames_in_flight + 1
    }
}

/// 所有子系统共享的对象
///
/// 由 app 创建并持有，按引用（或 clone）传给需要的子系统，不使用全局单例
#[derive(Clone)]
pub struct EngineContext {
    pub settings: RendererSettings,
    pub device: Arc<dyn GfxDevice>,
    pub thread_pool: Arc<ThreadPool>,
    pub deletion_ring: Arc<GpuDeletionRing>,
    pub phase_deletion: Arc<PhaseDeletionQueue>,
    pub scene: Arc<SceneTables>,
    pub resources: Arc<ResourceRegistry>,
    pub hooks: Arc<dyn RenderPipelineHooks>,
}

// new & init
impl EngineContext {
    pub fn new(
        settings: RendererSettings,
        device: Arc<dyn GfxDevice>,
        hooks: Arc<dyn RenderPipelineHooks>,
    ) -> Result<Self, JobError> {
        let worker_threads = match settings.worker_threads {
            0 => EngineConfig::default().resolved_worker_threads(),
            n => n,
        };
        let thread_pool = Arc::new(ThreadPool::new(worker_threads)?);
        let deletion_ring = Arc::new(GpuDeletionRing::new(settings.ring_size()));
        let resources = Arc::new(ResourceRegistry::new(device.clone(), deletion_ring.clone()));

        log::info!(
            "engine context: device={}, frames in flight={}, workers={}",
            device.name(),
            settings.frames_in_flight,
            worker_threads
        );
        Ok(Self {
            settings,
            device,
            thread_pool,
            deletion_ring,
            phase_deletion: Arc::new(PhaseDeletionQueue::new()),
            scene: Arc::new(SceneTables::new()),
            resources,
            hooks,
        })
    }
}

// destroy
impl EngineContext {
    /// 在 frame backend 销毁之后调用，停止 worker
    ///
    /// 其他地方仍然持有 thread pool 时只打印警告，worker 在最后一个引用释放时停止
    pub fn shutdown(self) {
        match Arc::try_unwrap(self.thread_pool) {
            Ok(mut thread_pool) => thread_pool.shutdown(),
            Err(shared) => log::warn!("thread pool still shared by {} other owners at shutdown", Arc::strong_count(&shared) - 1),
        }
    }
}
