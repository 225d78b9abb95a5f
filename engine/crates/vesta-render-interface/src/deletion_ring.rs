//! 基于 epoch 的延迟销毁
//!
//! 不为每个对象创建 fence：对象进入当前 cursor 指向的 slot，
//! 每提交一帧 cursor 前进一格并清空新指向的 slot。
//! slot 中的对象至少经过 RingSize - 1 帧之后才会被销毁，此时引用它的 GPU 工作一定已经完成。

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// 可以被延迟销毁的对象
pub trait DeletionObject: Send {
    fn destroy(self: Box<Self>);
}

impl<F: FnOnce() + Send> DeletionObject for F {
    fn destroy(self: Box<Self>) {
        (*self)()
    }
}

/// 用于诊断的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeletionCategory {
    CommandBuffer,
    Buffer,
    Image,
    Sampler,
    Pipeline,
    Shader,
    ParticleSystem,
    Generic,
}

struct PendingDeletion {
    category: DeletionCategory,
    object: Box<dyn DeletionObject>,
}

struct RingInner {
    slots: Vec<Vec<PendingDeletion>>,
    cursor: usize,
    /// cursor 前进的总次数
    epoch: u64,
}

/// GPU 资源的延迟销毁环
///
/// 可以从任意线程 push，只有 frame 线程调用 [`advance`](Self::advance)
pub struct GpuDeletionRing {
    inner: Mutex<RingInner>,
}

// new & init
impl GpuDeletionRing {
    /// 第一次 advance 之后 cursor 指向 0，和 pool index 一致
    pub fn new(ring_size: usize) -> Self {
        assert!(ring_size >= 2, "deletion ring needs at least 2 slots");
        Self {
            inner: Mutex::new(RingInner {
                slots: (0..ring_size).map(|_| Vec::new()).collect(),
                cursor: ring_size - 1,
                epoch: 0,
            }),
        }
    }
}
// update
impl GpuDeletionRing {
    pub fn push(&self, category: DeletionCategory, object: impl DeletionObject + 'static) {
        self.push_boxed(category, Box::new(object));
    }

    pub fn push_boxed(&self, category: DeletionCategory, object: Box<dyn DeletionObject>) {
        let mut inner = self.inner.lock();
        let cursor = inner.cursor;
        inner.slots[cursor].push(PendingDeletion { category, object });
    }

    /// cursor 前进一格，销毁新 slot 中的所有对象，返回销毁的数量
    ///
    /// 对象在锁外销毁，destroy 中可以再次 push
    pub fn advance(&self) -> usize {
        let _span = vesta_utils::profile_span!("GpuDeletionRing::advance");
        let expired = {
            let mut inner = self.inner.lock();
            inner.cursor = (inner.cursor + 1) % inner.slots.len();
            inner.epoch += 1;
            let cursor = inner.cursor;
            std::mem::take(&mut inner.slots[cursor])
        };

        let count = expired.len();
        for pending in expired {
            pending.object.destroy();
        }
        count
    }

    /// 立即销毁所有对象，调用前需要 wait idle
    ///
    /// 从最老的 slot 开始销毁
    pub fn flush_all(&self) -> usize {
        let mut total = 0;
        loop {
            let drained = {
                let mut inner = self.inner.lock();
                let ring_size = inner.slots.len();
                let cursor = inner.cursor;
                (1..=ring_size)
                    .map(|offset| (cursor + offset) % ring_size)
                    .flat_map(|slot| std::mem::take(&mut inner.slots[slot]))
                    .collect::<Vec<_>>()
            };
            if drained.is_empty() {
                break;
            }
            total += drained.len();
            for pending in drained {
                pending.object.destroy();
            }
        }
        if total > 0 {
            log::info!("deletion ring flushed {} objects", total);
        }
        total
    }
}
// getters
impl GpuDeletionRing {
    #[inline]
    pub fn ring_size(&self) -> usize {
        self.inner.lock().slots.len()
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.inner.lock().cursor
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().slots.iter().map(Vec::len).sum()
    }

    pub fn pending_by_category(&self) -> BTreeMap<DeletionCategory, usize> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        for pending in inner.slots.iter().flatten() {
            *counts.entry(pending.category).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[test]
    fn test_destroyed_after_ring_size_advances() {
        for ring_size in 2..6 {
            let ring = GpuDeletionRing::new(ring_size);
            // 模拟若干帧之后再 push
            for _ in 0..ring_size + 1 {
                ring.advance();
            }

            let destroyed = Arc::new(AtomicUsize::new(0));
            {
                let destroyed = destroyed.clone();
                ring.push(DeletionCategory::Generic, move || {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                });
            }

            let mut advances = 0;
            while destroyed.load(Ordering::SeqCst) == 0 {
                ring.advance();
                advances += 1;
                assert!(advances <= ring_size, "object never destroyed");
            }
            assert!(advances >= ring_size - 1);

            for _ in 0..ring_size * 2 {
                ring.advance();
            }
            assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_cursor_follows_pool_index() {
        let ring = GpuDeletionRing::new(3);
        let mut cursors = vec![];
        for _ in 0..4 {
            ring.advance();
            cursors.push(ring.cursor());
        }
        assert_eq!(cursors, vec![0, 1, 2, 0]);
        assert_eq!(ring.epoch(), 4);
    }

    #[test]
    fn test_counts_and_flush() {
        let ring = GpuDeletionRing::new(3);
        let destroyed = Arc::new(AtomicUsize::new(0));
        for category in [DeletionCategory::Buffer, DeletionCategory::Buffer, DeletionCategory::Image] {
            let destroyed = destroyed.clone();
            ring.push(category, move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
            });
            ring.advance();
        }

        assert_eq!(ring.pending_count(), 3);
        assert_eq!(ring.pending_by_category().get(&DeletionCategory::Buffer), Some(&2));
        assert_eq!(ring.flush_all(), 3);
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(ring.pending_count(), 0);
    }

    #[test]
    fn test_destroy_may_push() {
        let ring = Arc::new(GpuDeletionRing::new(2));
        let destroyed = Arc::new(AtomicUsize::new(0));
        {
            let ring2 = ring.clone();
            let destroyed = destroyed.clone();
            ring.push(DeletionCategory::Generic, move || {
                let destroyed = destroyed.clone();
                ring2.push(DeletionCategory::Generic, move || {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        assert_eq!(ring.flush_all(), 2);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
