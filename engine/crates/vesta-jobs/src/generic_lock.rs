//! 按地址访问的读写锁
//!
//! 锁对象存放在 [`HandleTable`] 中，调用方只持有 `u32` 地址。
//! 加锁和解锁是分开的两次调用，因此不能使用 RAII guard，
//! 这里记录持有状态，避免对没有持有的锁解锁。

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use parking_lot::lock_api::RawRwLock as _;
use vesta_utils::{handle_table::HandleTable, precondition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    pub read_acquisitions: u64,
    pub write_acquisitions: u64,
}

struct GenericLock {
    raw: parking_lot::RawRwLock,
    readers: AtomicUsize,
    writer: AtomicBool,
    read_acquisitions: AtomicU64,
    write_acquisitions: AtomicU64,
}
impl GenericLock {
    fn new() -> Self {
        Self {
            raw: parking_lot::RawRwLock::INIT,
            readers: AtomicUsize::new(0),
            writer: AtomicBool::new(false),
            read_acquisitions: AtomicU64::new(0),
            write_acquisitions: AtomicU64::new(0),
        }
    }

    fn is_held(&self) -> bool {
        self.readers.load(Ordering::Acquire) > 0 || self.writer.load(Ordering::Acquire)
    }
}

pub struct GenericLockTable {
    locks: HandleTable<Arc<GenericLock>>,
}

impl GenericLockTable {
    pub fn new() -> Self {
        Self {
            locks: HandleTable::new("GenericLock"),
        }
    }

    pub fn generate(&self) -> u32 {
        self.locks.insert(Arc::new(GenericLock::new()))
    }

    pub fn destroy(&self, addr: u32) {
        if let Some(lock) = self.locks.remove(addr) {
            if lock.is_held() {
                log::warn!("generic lock {addr} destroyed while held");
            }
        }
    }

    /// 取出锁对象后再阻塞，不持有 handle table 的锁
    fn get(&self, addr: u32, op: &str) -> Option<Arc<GenericLock>> {
        let lock = self.locks.get_cloned(addr);
        precondition!(lock.is_some(), "generic lock: {op} on unknown address {addr}");
        lock
    }

    pub fn read_lock(&self, addr: u32) {
        let Some(lock) = self.get(addr, "read lock") else {
            return;
        };
        lock.raw.lock_shared();
        lock.readers.fetch_add(1, Ordering::AcqRel);
        lock.read_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_unlock(&self, addr: u32) {
        let Some(lock) = self.get(addr, "read unlock") else {
            return;
        };
        let held = lock.readers.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)).is_ok();
        if precondition!(held, "generic lock: read unlock {addr} which is not read locked") {
            // SAFETY: readers 计数保证存在一个对应的 lock_shared
            unsafe { lock.raw.unlock_shared() };
        }
    }

    pub fn write_lock(&self, addr: u32) {
        let Some(lock) = self.get(addr, "write lock") else {
            return;
        };
        lock.raw.lock_exclusive();
        lock.writer.store(true, Ordering::Release);
        lock.write_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_unlock(&self, addr: u32) {
        let Some(lock) = self.get(addr, "write unlock") else {
            return;
        };
        let held = lock.writer.swap(false, Ordering::AcqRel);
        if precondition!(held, "generic lock: write unlock {addr} which is not write locked") {
            // SAFETY: writer 标记保证存在一个对应的 lock_exclusive
            unsafe { lock.raw.unlock_exclusive() };
        }
    }

    pub fn stats(&self, addr: u32) -> Option<LockStats> {
        self.locks.with(addr, |lock| LockStats {
            read_acquisitions: lock.read_acquisitions.load(Ordering::Relaxed),
            write_acquisitions: lock.write_acquisitions.load(Ordering::Relaxed),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// shutdown 时仍然存在的锁只打印警告
    pub fn report_outstanding(&self) {
        self.locks.for_each_alive(|addr, lock| {
            log::warn!(
                "generic lock {addr} still registered at shutdown (held: {}, reads: {}, writes: {})",
                lock.is_held(),
                lock.read_acquisitions.load(Ordering::Relaxed),
                lock.write_acquisitions.load(Ordering::Relaxed)
            );
        });
    }
}
impl Default for GenericLockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_read_write_and_stats() {
        let table = GenericLockTable::new();
        let addr = table.generate();

        table.read_lock(addr);
        table.read_lock(addr);
        table.read_unlock(addr);
        table.read_unlock(addr);
        table.write_lock(addr);
        table.write_unlock(addr);

        assert_eq!(
            table.stats(addr),
            Some(LockStats {
                read_acquisitions: 2,
                write_acquisitions: 1
            })
        );

        table.destroy(addr);
        assert_eq!(table.stats(addr), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let table = Arc::new(GenericLockTable::new());
        let addr = table.generate();
        table.read_lock(addr);

        let (tx, rx) = crossbeam_channel::bounded(1);
        let writer = {
            let table = table.clone();
            std::thread::spawn(move || {
                table.write_lock(addr);
                tx.send(()).unwrap();
                table.write_unlock(addr);
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        table.read_unlock(addr);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
    }

    #[test]
    #[should_panic]
    fn test_unlock_without_lock_is_precondition_violation() {
        let table = GenericLockTable::new();
        let addr = table.generate();
        table.write_unlock(addr);
    }

    #[test]
    #[should_panic]
    fn test_lock_unknown_address_is_precondition_violation() {
        let table = GenericLockTable::new();
        table.read_lock(7);
    }
}
