//! 录制 command buffer 等并行工作的执行底座
//!
//! - [`thread_pool::ThreadPool`]：固定数量的 worker + 优先级队列
//! - [`job_future::JobFuture`]：获取任务的返回值
//! - [`generic_lock`]：按地址访问的读写锁

pub mod generic_lock;
pub mod job;
pub mod job_future;
pub mod thread_pool;

pub use job::JobPriority;
pub use job_future::{JobError, JobFuture, panic_message, wait_all};
pub use thread_pool::ThreadPool;
