use std::sync::Arc;

use ash::vk::{self, Handle};

use crate::{
    error::{GfxError, GfxResult},
    handles::{GfxCommandBuffer, GfxExtent, GfxQueueType, GfxSemaphore},
    surface::{GfxAcquireOutcome, GfxPresentOutcome, GfxPresentSurface, GfxSwapchainInfo},
    vulkan::VulkanDevice,
};

/// 窗口 surface 以及它的 swapchain
///
/// present 使用 graphics 队列
pub struct VulkanSurface {
    device: Arc<VulkanDevice>,
    surface_pf: ash::khr::surface::Instance,
    swapchain_pf: ash::khr::swapchain::Device,

    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,

    /// 由窗口系统提供的物理尺寸
    window_extent: Box<dyn Fn() -> GfxExtent + Send>,
}

// new & init
impl VulkanSurface {
    pub fn new(
        device: Arc<VulkanDevice>,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        window_extent: impl Fn() -> GfxExtent + Send + 'static,
    ) -> GfxResult<Self> {
        if !device.swapchain_enabled() {
            return Err(GfxError::Unsupported("device created without a display handle".to_string()));
        }

        let surface_pf = ash::khr::surface::Instance::new(device.entry(), device.instance());
        let swapchain_pf = ash::khr::swapchain::Device::new(device.instance(), device.ash_device());
        let surface = unsafe {
            ash_window::create_surface(device.entry(), device.instance(), raw_display_handle, raw_window_handle, None)?
        };

        let family = device.queue_family(GfxQueueType::Graphics)?;
        let present_supported =
            unsafe { surface_pf.get_physical_device_surface_support(device.pdevice(), family, surface) }
                .unwrap_or(false);
        if !present_supported {
            unsafe { surface_pf.destroy_surface(surface, None) };
            return Err(GfxError::Unsupported("graphics queue can not present to the surface".to_string()));
        }

        Ok(Self {
            device,
            surface_pf,
            swapchain_pf,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: vec![],
            window_extent: Box::new(window_extent),
        })
    }

    /// 确定 window 的 extent 尺寸
    ///
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: GfxExtent,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == 0xFFFFFFFF || surface_extent.height == 0xFFFFFFFF {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }

    fn pick_surface_format(&self) -> GfxResult<vk::SurfaceFormatKHR> {
        let formats =
            unsafe { self.surface_pf.get_physical_device_surface_formats(self.device.pdevice(), self.surface)? };
        formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or(formats.first())
            .copied()
            .ok_or_else(|| GfxError::Unsupported("surface has no formats".to_string()))
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        self.destroy_swapchain();
        unsafe { self.surface_pf.destroy_surface(self.surface, None) };
    }
}

impl GfxPresentSurface for VulkanSurface {
    fn create_swapchain(&mut self, fallback_extent: GfxExtent) -> GfxResult<GfxSwapchainInfo> {
        let _span = vesta_utils::profile_span!("VulkanSurface::create_swapchain");

        let capabilities = unsafe {
            self.surface_pf.get_physical_device_surface_capabilities(self.device.pdevice(), self.surface)?
        };
        let window_extent = (self.window_extent)();
        let window_extent = if window_extent.is_empty() { fallback_extent } else { window_extent };
        let extent = Self::calculate_swapchain_extent(&capabilities, window_extent);
        log::info!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            window physical extent: {}
            final swapchain extent: {}x{}",
            capabilities.current_extent.width,
            capabilities.current_extent.height,
            capabilities.min_image_extent.width,
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.width,
            capabilities.max_image_extent.height,
            window_extent,
            extent.width,
            extent.height
        );

        // max_image_count == 0，表示不限制 image 数量
        let image_count = if capabilities.max_image_count == 0 {
            capabilities.min_image_count + 1
        } else {
            u32::min(capabilities.max_image_count, capabilities.min_image_count + 1)
        };
        let surface_format = self.pick_surface_format()?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(self.swapchain);
        let swapchain = unsafe { self.swapchain_pf.create_swapchain(&create_info, None)? };
        self.destroy_swapchain();
        self.swapchain = swapchain;
        self.images = unsafe { self.swapchain_pf.get_swapchain_images(swapchain)? };

        Ok(GfxSwapchainInfo {
            extent: GfxExtent::new(extent.width, extent.height),
            image_count: self.images.len(),
        })
    }

    fn destroy_swapchain(&mut self) {
        if self.swapchain.is_null() {
            return;
        }
        unsafe { self.swapchain_pf.destroy_swapchain(self.swapchain, None) };
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }

    fn acquire_next_image(&mut self, signal: GfxSemaphore, timeout_ns: u64) -> GfxResult<GfxAcquireOutcome> {
        let result = unsafe {
            self.swapchain_pf.acquire_next_image(
                self.swapchain,
                timeout_ns,
                vk::Semaphore::from_raw(signal.raw()),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", index);
                }
                Ok(GfxAcquireOutcome::Acquired { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(GfxAcquireOutcome::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cmd_prepare_present(&mut self, cmd: GfxCommandBuffer, image_index: u32) {
        let Some(&image) = self.images.get(image_index as usize) else {
            vesta_utils::precondition!(false, "prepare present for unknown swapchain image {image_index}");
            return;
        };
        let cmd = vk::CommandBuffer::from_raw(cmd.raw);
        self.device.cmd_image_barrier(
            cmd,
            image,
            (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED),
            (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        );
        self.device.cmd_clear_image(cmd, image, [0.0, 0.0, 0.0, 1.0]);
        self.device.cmd_image_barrier(
            cmd,
            image,
            (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR),
        );
    }

    fn present(&mut self, image_index: u32, wait: Option<GfxSemaphore>) -> GfxResult<GfxPresentOutcome> {
        let wait_semaphores = wait.map(|s| vk::Semaphore::from_raw(s.raw())).into_iter().collect::<Vec<_>>();
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.swapchain));

        let result = self
            .device
            .with_queue(GfxQueueType::Graphics, |queue| unsafe { self.swapchain_pf.queue_present(queue, &present_info) })?;
        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::warn!("swapchain present image index {} is not optimal", image_index);
                }
                Ok(GfxPresentOutcome::Presented { suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(GfxPresentOutcome::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn window_extent(&self) -> GfxExtent {
        (self.window_extent)()
    }
}
