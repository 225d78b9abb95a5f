use parking_lot::Mutex;

use crate::deletion_ring::DeletionObject;

/// CPU 侧对象销毁的逻辑阶段
///
/// 声明顺序即为 shutdown 时的销毁顺序：依赖者先于被依赖者销毁
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeletionPhase {
    Update,
    Render,
    Resource,
    Device,
}
impl DeletionPhase {
    pub const ALL: [DeletionPhase; 4] =
        [DeletionPhase::Update, DeletionPhase::Render, DeletionPhase::Resource, DeletionPhase::Device];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// 与 GPU 无关的延迟销毁队列
///
/// 不按帧推进，而是在明确的时间点按阶段清空，例如 update 线程结束时清空 Update 阶段
#[derive(Default)]
pub struct PhaseDeletionQueue {
    phases: Mutex<[Vec<Box<dyn DeletionObject>>; 4]>,
}

impl PhaseDeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, phase: DeletionPhase, object: impl DeletionObject + 'static) {
        self.phases.lock()[phase.index()].push(Box::new(object));
    }

    /// 销毁某个阶段的所有对象，返回销毁的数量
    pub fn drain(&self, phase: DeletionPhase) -> usize {
        let objects = std::mem::take(&mut self.phases.lock()[phase.index()]);
        let count = objects.len();
        for object in objects {
            object.destroy();
        }
        count
    }

    /// shutdown 时按 Update -> Render -> Resource -> Device 的顺序销毁所有对象
    pub fn drain_all(&self) -> usize {
        DeletionPhase::ALL
            .into_iter()
            .map(|phase| {
                let count = self.drain(phase);
                if count > 0 {
                    log::info!("phase {:?}: {} outstanding objects destroyed at shutdown", phase, count);
                }
                count
            })
            .sum()
    }

    pub fn pending_count(&self, phase: DeletionPhase) -> usize {
        self.phases.lock()[phase.index()].len()
    }
}
