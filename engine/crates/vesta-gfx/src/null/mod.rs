//! 不依赖 GPU 的后端
//!
//! 所有提交立即"执行"：semaphore 在 submit 时按顺序 wait / signal，fence 在 submit 时 signal。
//! 但 command buffer 只有在对应的 fence 被 wait（或者 wait_idle）之后才算执行完毕，
//! 在此之前重置它所在的 pool 会返回 [`GfxError::Validation`](crate::GfxError::Validation)。

mod null_device;
mod null_surface;

pub use null_device::{NullDevice, NullLiveObjects, NullSubmission, NullSubmittedCommand};
pub use null_surface::NullSurface;
