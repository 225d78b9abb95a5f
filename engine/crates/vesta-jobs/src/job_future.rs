use crossbeam_channel::{Receiver, TryRecvError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// 任务 panic，panic 被 worker 捕获，不会跨越线程边界
    #[error("job panicked: {0}")]
    Panicked(String),
    /// 任务在 shutdown 时仍在队列中，没有被执行
    #[error("job cancelled before execution")]
    Cancelled,
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

/// 任务的返回值
///
/// 任务被释放时 sender 一同被释放，因此 wait 不会永久阻塞
pub struct JobFuture<R> {
    pub(crate) receiver: Receiver<Result<R, JobError>>,
}

impl<R> JobFuture<R> {
    /// 阻塞等待任务结束
    pub fn wait(self) -> Result<R, JobError> {
        self.receiver.recv().unwrap_or(Err(JobError::Cancelled))
    }

    /// 不阻塞，任务还没有结束时返回 None
    pub fn try_wait(&self) -> Option<Result<R, JobError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(JobError::Cancelled)),
        }
    }
}

/// 等待所有任务，结果顺序和输入顺序一致
pub fn wait_all<R>(futures: impl IntoIterator<Item = JobFuture<R>>) -> Vec<Result<R, JobError>> {
    futures.into_iter().map(JobFuture::wait).collect()
}

/// 从 panic payload 中取出消息
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
