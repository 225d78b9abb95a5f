use std::{
    collections::BinaryHeap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread::JoinHandle,
};

use crossbeam_utils::sync::WaitGroup;
use parking_lot::{Condvar, Mutex};

use crate::{
    generic_lock::{GenericLockTable, LockStats},
    job::{JobPriority, QueuedJob},
    job_future::{JobError, JobFuture, panic_message},
};

struct PoolShared {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    cv: Condvar,
    shutdown: AtomicBool,

    /// 不需要加锁即可读取的队列长度
    queue_len: AtomicUsize,
    next_seq: AtomicU64,
}

/// 固定数量的 worker + 优先级任务队列
///
/// - push 不会阻塞调用方，只会唤醒一个空闲的 worker
/// - worker 在队列锁内取出优先级最高的任务，释放锁之后再执行
/// - shutdown 时仍在队列中的任务不会被执行，直接释放
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
    /// 每个 worker 退出循环时 drop 自己的副本
    drained: Option<WaitGroup>,
    locks: GenericLockTable,
}

// new & init
impl ThreadPool {
    pub fn new(thread_count: usize) -> Result<Self, JobError> {
        let thread_count = thread_count.max(1);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(BinaryHeap::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            queue_len: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
        });
        let drained = WaitGroup::new();

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(thread_count),
            drained: None,
            locks: GenericLockTable::new(),
        };
        for worker_index in 0..thread_count {
            let shared = pool.shared.clone();
            let worker_drained = drained.clone();
            let spawned = std::thread::Builder::new().name(format!("vesta-worker-{worker_index}")).spawn(move || {
                Self::worker_loop(&shared);
                drop(worker_drained);
            });
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // 已经启动的 worker 由 Drop 中的 shutdown 回收
                    pool.drained = Some(drained);
                    return Err(JobError::WorkerSpawn(e.to_string()));
                }
            }
        }
        pool.drained = Some(drained);

        log::info!("thread pool started with {} workers", thread_count);
        Ok(pool)
    }

    /// max(hardware_concurrency / 2, 2) 个 worker
    pub fn with_default_threads() -> Result<Self, JobError> {
        let hardware = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        Self::new((hardware / 2).max(2))
    }

    fn worker_loop(shared: &PoolShared) {
        loop {
            let job = {
                let mut queue = shared.queue.lock();
                loop {
                    if shared.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(job) = queue.pop() {
                        shared.queue_len.fetch_sub(1, Ordering::AcqRel);
                        break job;
                    }
                    shared.cv.wait(&mut queue);
                }
            };

            let priority = job.priority;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job.payload)) {
                log::error!("{:?} job panicked: {}", priority, panic_message(payload.as_ref()));
            }
        }
    }
}

// destroy
impl ThreadPool {
    /// 停止所有 worker
    ///
    /// 正在执行的任务会执行完毕，队列中剩余的任务被直接释放。可以重复调用。
    pub fn shutdown(&mut self) {
        let Some(drained) = self.drained.take() else {
            return;
        };

        {
            let _queue = self.shared.queue.lock();
            self.shared.shutdown.store(true, Ordering::Release);
        }
        self.shared.cv.notify_all();

        drained.wait();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread exited abnormally");
            }
        }

        let dropped = {
            let mut queue = self.shared.queue.lock();
            let dropped = queue.len();
            queue.clear();
            self.shared.queue_len.store(0, Ordering::Release);
            dropped
        };
        if dropped > 0 {
            log::warn!("thread pool shutdown: {} queued jobs freed without execution", dropped);
        }
        self.locks.report_outstanding();
        log::info!("thread pool stopped");
    }
}
impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// jobs
impl ThreadPool {
    /// 提交一个不关心返回值的任务
    pub fn push_job(&self, priority: JobPriority, job: impl FnOnce() + Send + 'static) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            log::warn!("push {:?} job after shutdown, job dropped", priority);
            return;
        }

        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.shared.queue.lock();
            queue.push(QueuedJob {
                priority,
                seq,
                payload: Box::new(job),
            });
            self.shared.queue_len.fetch_add(1, Ordering::AcqRel);
        }
        self.shared.cv.notify_one();
    }

    /// 提交任务并获取返回值
    ///
    /// 任务 panic 时返回 [`JobError::Panicked`]，任务没有执行就被释放时返回 [`JobError::Cancelled`]
    pub fn spawn<R: Send + 'static>(
        &self,
        priority: JobPriority,
        job: impl FnOnce() -> R + Send + 'static,
    ) -> JobFuture<R> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.push_job(priority, move || {
            let result = catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
                let msg = panic_message(payload.as_ref());
                log::error!("{:?} job panicked: {}", priority, msg);
                JobError::Panicked(msg)
            });
            let _ = sender.send(result);
        });
        JobFuture { receiver }
    }
}

// getters
impl ThreadPool {
    #[inline]
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// 还没有被 worker 取出的任务数量
    #[inline]
    pub fn queue_size(&self) -> usize {
        self.shared.queue_len.load(Ordering::Acquire)
    }
}

// generic locks
impl ThreadPool {
    #[inline]
    pub fn generate_lock(&self) -> u32 {
        self.locks.generate()
    }

    #[inline]
    pub fn destroy_lock(&self, addr: u32) {
        self.locks.destroy(addr)
    }

    #[inline]
    pub fn read_lock(&self, addr: u32) {
        self.locks.read_lock(addr)
    }

    #[inline]
    pub fn read_unlock(&self, addr: u32) {
        self.locks.read_unlock(addr)
    }

    #[inline]
    pub fn write_lock(&self, addr: u32) {
        self.locks.write_lock(addr)
    }

    #[inline]
    pub fn write_unlock(&self, addr: u32) {
        self.locks.write_unlock(addr)
    }

    #[inline]
    pub fn lock_stats(&self, addr: u32) -> Option<LockStats> {
        self.locks.stats(addr)
    }
}
