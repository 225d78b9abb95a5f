//! 基于 ash 的 Vulkan 后端
//!
//! - 需要 Vulkan 1.3，使用 synchronization2 的 `vkQueueSubmit2`
//! - buffer / image 通过 vk-mem 分配
//! - 窗口模式的 surface 通过 ash-window 创建

mod convert;
mod vulkan_device;
mod vulkan_surface;

pub use vulkan_device::VulkanDevice;
pub use vulkan_surface::VulkanSurface;
