//! compute 子引擎
//!
//! 和图形部分一样是一个帧生产者：每帧录制一个 compute command buffer，
//! 位于 semaphore 链的最前面。

use std::sync::Arc;

use vesta_gfx::{GfxCommandBuffer, GfxDevice, GfxQueueType, GfxResult};
use vesta_render_interface::{cmd_allocator::CmdUnit, resource_registry::ParticleSystemView};

/// 粒子模拟的录制逻辑，由外部提供
#[allow(unused_variables)]
pub trait ParticleSimulator: Send + Sync {
    fn record(&self, device: &dyn GfxDevice, cmd: GfxCommandBuffer, system: &ParticleSystemView, delta_time: f32) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopParticleSimulator;
impl ParticleSimulator for NoopParticleSimulator {}

pub struct ComputeSubEngine {
    simulator: Arc<dyn ParticleSimulator>,
    enabled: bool,
}

// new & init
impl ComputeSubEngine {
    /// 设备没有 compute 队列时禁用
    pub fn new(device: &dyn GfxDevice, enabled: bool, simulator: Arc<dyn ParticleSimulator>) -> Self {
        let supported = device.queue_supported(GfxQueueType::Compute);
        if enabled && !supported {
            log::warn!("device {} has no compute queue, compute sub-engine disabled", device.name());
        }
        Self {
            simulator,
            enabled: enabled && supported,
        }
    }

    pub fn disabled() -> Self {
        Self {
            simulator: Arc::new(NoopParticleSimulator),
            enabled: false,
        }
    }
}

// getters
impl ComputeSubEngine {
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

// update
impl ComputeSubEngine {
    /// 录制本帧唯一的 compute command buffer，按地址顺序模拟每个存活的粒子系统
    pub fn record(
        &self,
        device: &dyn GfxDevice,
        unit: &CmdUnit,
        systems: &[ParticleSystemView],
        delta_time: f32,
        frame_name: &str,
    ) -> GfxResult<GfxCommandBuffer> {
        let _span = vesta_utils::profile_span!("ComputeSubEngine::record");
        let cmd = unit.alloc_command_buffer(device, "particles")?;
        device.begin_command_buffer(cmd)?;
        device.cmd_begin_label(cmd, &format!("{frame_name} compute"));
        for system in systems {
            device.cmd_begin_label(cmd, &system.name);
            self.simulator.record(device, cmd, system, delta_time);
            device.cmd_end_label(cmd);
        }
        device.cmd_end_label(cmd);
        device.end_command_buffer(cmd)?;
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vesta_gfx::{GfxSubmitInfo, null::NullDevice};
    use vesta_render_interface::cmd_allocator::CmdAllocator;

    #[derive(Default)]
    struct CountingSimulator {
        simulated: Mutex<Vec<(u32, u32)>>,
    }
    impl ParticleSimulator for CountingSimulator {
        fn record(&self, _device: &dyn GfxDevice, _cmd: GfxCommandBuffer, system: &ParticleSystemView, _dt: f32) {
            self.simulated.lock().push((system.addr, system.max_particles));
        }
    }

    #[test]
    fn test_disabled_without_compute_queue() {
        let device = NullDevice::with_queues(&[GfxQueueType::Graphics]);
        let engine = ComputeSubEngine::new(&device, true, Arc::new(NoopParticleSimulator));
        assert!(!engine.enabled());
    }

    #[test]
    fn test_records_every_particle_system() {
        let null = Arc::new(NullDevice::new());
        let device: Arc<dyn GfxDevice> = null.clone();
        let simulator = Arc::new(CountingSimulator::default());
        let engine = ComputeSubEngine::new(device.as_ref(), true, simulator.clone());
        let mut allocator = CmdAllocator::new(device.clone(), 1);
        let unit = allocator.compute_unit(0).unwrap();

        let systems = (0..2)
            .map(|i| ParticleSystemView {
                addr: i,
                name: format!("system-{i}"),
                max_particles: 64 * (i + 1),
                pipeline_addr: 0,
                buffer: vesta_gfx::GfxBuffer::from_raw(0),
            })
            .collect::<Vec<_>>();
        let cmd = engine.record(device.as_ref(), &unit, &systems, 0.016, "[F0A]").unwrap();
        assert_eq!(cmd.queue, GfxQueueType::Compute);
        assert_eq!(simulator.simulated.lock().clone(), vec![(0, 64), (1, 128)]);

        device.submit(GfxQueueType::Compute, &[GfxSubmitInfo::new(&[cmd])], None).unwrap();
        let labels = null.submissions()[0].command_buffers[0].labels.clone();
        assert_eq!(labels, vec!["[F0A] compute", "system-0", "system-1"]);

        null.wait_idle().unwrap();
        allocator.destroy();
    }
}
