//! Vesta 的 GFX 层
//!
//! 调度器只依赖 [`device::GfxDevice`] 和 [`surface::GfxPresentSurface`] 两个 trait，
//! 具体实现有两个：
//! - [`vulkan`]：基于 ash + vk-mem 的真实后端
//! - [`null`]：不依赖 GPU，记录所有调用，可以注入错误，用于测试以及没有 GPU 的 headless 运行

pub mod device;
pub mod error;
pub mod handles;
pub mod null;
pub mod submit_info;
pub mod surface;
pub mod vulkan;

pub use device::{FenceStatus, GfxBufferUsage, GfxDevice};
pub use error::{GfxError, GfxResult};
pub use handles::*;
pub use submit_info::{GfxSemaphoreSubmit, GfxStageMask, GfxSubmitInfo};
pub use surface::{GfxAcquireOutcome, GfxPresentOutcome, GfxPresentSurface, GfxSwapchainInfo};
