//! Vesta 的帧调度器
//!
//! 每个 tick 的流程：
//! 1. 等待当前 flight frame 的 fence，从 [`present::FrameTarget`] 获取 frame target
//! 2. deletion ring 前进一格
//! 3. [`compute::ComputeSubEngine`] 录制一个 compute command buffer
//! 4. 每个 active camera 在 thread pool 上并行录制 draw / light / post
//! 5. 录制 bracket command buffer，按顺序提交，相邻的 command buffer 之间用 semaphore 串联
//! 6. present 或者通过 transport 发送像素

pub mod camera_jobs;
pub mod compute;
pub mod context;
pub mod frame_backend;
pub mod hooks;
pub mod present;
pub mod render_thread;

pub use context::{EngineContext, RendererSettings};
pub use frame_backend::{FrameBackend, FrameError, FrameOutcome, FrameStage, SkipReason};
pub use hooks::{LightType, NoopHooks, PassContext, RenderPipelineHooks};
pub use present::{FrameTarget, FrameTargetState};
pub use render_thread::{RenderThread, RenderThreadMessage, RenderThreadStats};
