use std::cmp::Ordering;

/// 任务优先级
///
/// 从高到低：EngineUrgent > EngineHigh > RuntimeHigh > EngineMedium > RuntimeMedium > EngineLow > RuntimeLow。
/// 声明顺序即为从低到高，`Ord` 由此派生。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    RuntimeLow,
    EngineLow,
    RuntimeMedium,
    EngineMedium,
    RuntimeHigh,
    EngineHigh,
    /// 每帧的 camera 录制任务
    EngineUrgent,
}

pub(crate) type JobPayload = Box<dyn FnOnce() + Send + 'static>;

/// 队列中的任务
///
/// 由队列持有，直到被 worker 取出；执行完毕后由 worker 释放
pub(crate) struct QueuedJob {
    pub priority: JobPriority,
    /// 入队序号，同优先级的任务先进先出
    pub seq: u64,
    pub payload: JobPayload,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedJob {}
impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedJob {
    /// BinaryHeap 是大顶堆：优先级高的在前，序号小的在前
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_priority_order() {
        assert!(JobPriority::EngineUrgent > JobPriority::EngineHigh);
        assert!(JobPriority::EngineHigh > JobPriority::RuntimeHigh);
        assert!(JobPriority::RuntimeHigh > JobPriority::EngineMedium);
        assert!(JobPriority::EngineMedium > JobPriority::RuntimeMedium);
        assert!(JobPriority::RuntimeMedium > JobPriority::EngineLow);
        assert!(JobPriority::EngineLow > JobPriority::RuntimeLow);
    }

    #[test]
    fn test_heap_pops_highest_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let pushes = [
            JobPriority::RuntimeLow,
            JobPriority::EngineUrgent,
            JobPriority::EngineMedium,
            JobPriority::EngineUrgent,
            JobPriority::RuntimeLow,
        ];
        for (seq, priority) in pushes.into_iter().enumerate() {
            heap.push(QueuedJob {
                priority,
                seq: seq as u64,
                payload: Box::new(|| {}),
            });
        }

        let popped: Vec<_> = std::iter::from_fn(|| heap.pop()).map(|job| (job.priority, job.seq)).collect();
        assert_eq!(
            popped,
            vec![
                (JobPriority::EngineUrgent, 1),
                (JobPriority::EngineUrgent, 3),
                (JobPriority::EngineMedium, 2),
                (JobPriority::RuntimeLow, 0),
                (JobPriority::RuntimeLow, 4),
            ]
        );
    }
}
