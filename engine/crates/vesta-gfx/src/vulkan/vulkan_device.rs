use std::{
    collections::HashMap,
    ffi::{CStr, CString, c_char},
    mem::ManuallyDrop,
};

use ash::vk::{self, Handle};
use itertools::Itertools;
use parking_lot::Mutex;
use vk_mem::Alloc;

use crate::{
    device::{FenceStatus, GfxBufferUsage, GfxDevice},
    error::{GfxError, GfxResult},
    handles::{
        GfxBuffer, GfxCommandBuffer, GfxCommandPool, GfxExtent, GfxFence, GfxQueueType, GfxReadbackTarget,
        GfxSemaphore,
    },
    submit_info::GfxSubmitInfo,
    vulkan::convert,
};

/// 一个 queue family 只创建一个 queue，多个队列类型可能共享它
struct VulkanQueue {
    family_index: u32,
    /// vkQueueSubmit 要求对 queue 外部同步
    queue: Mutex<vk::Queue>,
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
}

struct VulkanReadbackTarget {
    extent: GfxExtent,
    image: vk::Image,
    image_allocation: vk_mem::Allocation,
    host_buffer: vk::Buffer,
    host_allocation: vk_mem::Allocation,
}

/// Vulkan 设备
///
/// 代替全局的 `Gfx` 单例，通过 `Arc` 显式传递给需要它的子系统。
/// instance、device、allocator 的生命周期都由它管理，Drop 时按创建的逆序销毁。
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    pdevice: vk::PhysicalDevice,
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    swapchain_enabled: bool,

    queues: Vec<VulkanQueue>,
    /// 队列类型 -> queues 的下标
    queue_map: HashMap<GfxQueueType, usize>,

    allocator: ManuallyDrop<vk_mem::Allocator>,
    buffers: Mutex<HashMap<u64, VulkanBuffer>>,
    targets: Mutex<HashMap<u64, VulkanReadbackTarget>>,
}

// new & init
impl VulkanDevice {
    /// # param
    /// * display_handle - 窗口模式下需要，用于开启 surface 相关的 extension
    pub fn new(app_name: &str, display_handle: Option<raw_window_handle::RawDisplayHandle>) -> GfxResult<Self> {
        let _span = vesta_utils::profile_span!("VulkanDevice::new");

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GfxError::Unsupported(format!("failed to load vulkan: {e}")))?;

        let debug_utils_supported = unsafe { entry.enumerate_instance_extension_properties(None)? }
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == ash::ext::debug_utils::NAME));

        let mut instance_exts: Vec<*const c_char> = vec![];
        if let Some(display_handle) = display_handle {
            instance_exts.extend_from_slice(ash_window::enumerate_required_extensions(display_handle)?);
        }
        if debug_utils_supported {
            instance_exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let mut exts_str = String::new();
        for ext in &instance_exts {
            exts_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", exts_str);

        let app_name = CString::new(app_name).map_err(|_| GfxError::Unsupported("app name with nul".to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 需要 synchronization2
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"Vesta")
            .engine_version(vk::make_api_version(0, 1, 0, 0));
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&instance_exts);
        let instance = unsafe { entry.create_instance(&instance_ci, None)? };

        let (pdevice, families) = match Self::pick_physical_device(&instance) {
            Ok(picked) => picked,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        // 去重之后的 queue family，每个 family 一个 queue
        let unique_families = families.values().copied().unique().sorted().collect_vec();
        let queue_cis = unique_families
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo::default().queue_family_index(family).queue_priorities(&[1.0]))
            .collect_vec();

        let swapchain_enabled = display_handle.is_some();
        let device_exts = if swapchain_enabled { vec![ash::khr::swapchain::NAME.as_ptr()] } else { vec![] };
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_cis)
            .enabled_extension_names(&device_exts)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(pdevice, &device_ci, None)? };

        let queues = unique_families
            .iter()
            .map(|&family_index| VulkanQueue {
                family_index,
                queue: Mutex::new(unsafe { device.get_device_queue(family_index, 0) }),
            })
            .collect_vec();
        let queue_map = families
            .iter()
            .map(|(queue_type, family)| {
                let index = unique_families.iter().position(|f| f == family).unwrap_or_default();
                (*queue_type, index)
            })
            .collect();

        let debug_utils = debug_utils_supported.then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&instance, &device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci)? };

        Ok(Self {
            _entry: entry,
            instance,
            pdevice,
            device,
            debug_utils,
            swapchain_enabled,
            queues,
            queue_map,
            allocator: ManuallyDrop::new(allocator),
            buffers: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
        })
    }

    /// 选择支持 Vulkan 1.3 且有 graphics 队列的设备，优先独显
    ///
    /// compute 优先使用独立的 async compute family
    fn pick_physical_device(
        instance: &ash::Instance,
    ) -> GfxResult<(vk::PhysicalDevice, HashMap<GfxQueueType, u32>)> {
        let pdevices = unsafe { instance.enumerate_physical_devices()? };

        let mut candidates = pdevices
            .into_iter()
            .filter_map(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(pdevice) };
                if props.api_version < vk::API_VERSION_1_3 {
                    return None;
                }
                let family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
                let find = |flags: vk::QueueFlags, without: vk::QueueFlags| {
                    family_props
                        .iter()
                        .enumerate()
                        .find(|(_, prop)| prop.queue_flags.contains(flags) && !prop.queue_flags.intersects(without))
                        .map(|(index, _)| index as u32)
                };

                let graphics = find(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())?;
                let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);

                let mut families = HashMap::from([(GfxQueueType::Graphics, graphics), (GfxQueueType::Compute, compute)]);
                if let Some(decode) = find(vk::QueueFlags::VIDEO_DECODE_KHR, vk::QueueFlags::empty()) {
                    families.insert(GfxQueueType::VideoDecode, decode);
                }

                let score = match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    _ => 0,
                };
                log::info!(
                    "physical device candidate: {:?}, type: {:?}",
                    props.device_name_as_c_str().unwrap_or(c"unknown"),
                    props.device_type
                );
                Some((score, pdevice, families))
            })
            .collect_vec();

        candidates.sort_by_key(|(score, _, _)| std::cmp::Reverse(*score));
        candidates
            .into_iter()
            .next()
            .map(|(_, pdevice, families)| (pdevice, families))
            .ok_or_else(|| GfxError::Unsupported("no vulkan 1.3 device with a graphics queue".to_string()))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("destroying vulkan device");
        unsafe {
            let _ = self.device.device_wait_idle();

            for (_, mut buffer) in self.buffers.get_mut().drain() {
                self.allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }
            for (_, mut target) in self.targets.get_mut().drain() {
                self.allocator.destroy_image(target.image, &mut target.image_allocation);
                self.allocator.destroy_buffer(target.host_buffer, &mut target.host_allocation);
            }

            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// getters
impl VulkanDevice {
    #[inline]
    pub(crate) fn entry(&self) -> &ash::Entry {
        &self._entry
    }

    #[inline]
    pub(crate) fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub(crate) fn pdevice(&self) -> vk::PhysicalDevice {
        self.pdevice
    }

    #[inline]
    pub(crate) fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub(crate) fn swapchain_enabled(&self) -> bool {
        self.swapchain_enabled
    }

    fn queue(&self, queue_type: GfxQueueType) -> GfxResult<&VulkanQueue> {
        self.queue_map
            .get(&queue_type)
            .map(|&index| &self.queues[index])
            .ok_or_else(|| GfxError::Unsupported(format!("{} queue", queue_type.name())))
    }

    #[inline]
    pub(crate) fn queue_family(&self, queue_type: GfxQueueType) -> GfxResult<u32> {
        self.queue(queue_type).map(|q| q.family_index)
    }

    /// 在 queue 的锁内执行，用于 present
    pub(crate) fn with_queue<R>(&self, queue_type: GfxQueueType, f: impl FnOnce(vk::Queue) -> R) -> GfxResult<R> {
        let queue = self.queue(queue_type)?;
        let guard = queue.queue.lock();
        Ok(f(*guard))
    }
}

// tools
impl VulkanDevice {
    fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        unsafe {
            let _ = debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            );
        }
    }

    #[inline]
    fn vk_cmd(cmd: GfxCommandBuffer) -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(cmd.raw)
    }

    fn color_range() -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    }

    /// 录制 image layout 转换
    pub(crate) fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        (src_stage, src_access, old_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
        (dst_stage, dst_access, new_layout): (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
    ) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .image(image)
            .subresource_range(Self::color_range())
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .old_layout(old_layout)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .new_layout(new_layout);
        let dependency = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    /// 清空 image 到指定颜色，调用前 image 需要处于 TRANSFER_DST_OPTIMAL
    pub(crate) fn cmd_clear_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]) {
        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue { float32: color },
                &[Self::color_range()],
            );
        }
    }
}

impl GfxDevice for VulkanDevice {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn queue_supported(&self, queue: GfxQueueType) -> bool {
        self.queue_map.contains_key(&queue)
    }

    fn create_semaphore(&self, debug_name: &str) -> GfxResult<GfxSemaphore> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        self.set_object_debug_name(semaphore, debug_name);
        Ok(GfxSemaphore::from_raw(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: GfxSemaphore) {
        unsafe { self.device.destroy_semaphore(vk::Semaphore::from_raw(semaphore.raw()), None) };
    }

    fn create_fence(&self, signaled: bool, debug_name: &str) -> GfxResult<GfxFence> {
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None)? };
        self.set_object_debug_name(fence, debug_name);
        Ok(GfxFence::from_raw(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: GfxFence) {
        unsafe { self.device.destroy_fence(vk::Fence::from_raw(fence.raw()), None) };
    }

    fn wait_fence(&self, fence: GfxFence, timeout_ns: u64) -> GfxResult<FenceStatus> {
        let fence = vk::Fence::from_raw(fence.raw());
        match unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_fence(&self, fence: GfxFence) -> GfxResult<()> {
        let fence = vk::Fence::from_raw(fence.raw());
        unsafe { self.device.reset_fences(std::slice::from_ref(&fence))? };
        Ok(())
    }

    fn create_command_pool(&self, queue: GfxQueueType, debug_name: &str) -> GfxResult<GfxCommandPool> {
        let family = self.queue_family(queue)?;
        let pool = unsafe {
            self.device.create_command_pool(&vk::CommandPoolCreateInfo::default().queue_family_index(family), None)?
        };
        self.set_object_debug_name(pool, debug_name);
        Ok(GfxCommandPool {
            raw: pool.as_raw(),
            queue,
        })
    }

    fn reset_command_pool(&self, pool: GfxCommandPool) -> GfxResult<()> {
        unsafe {
            self.device
                .reset_command_pool(vk::CommandPool::from_raw(pool.raw), vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }

    fn destroy_command_pool(&self, pool: GfxCommandPool) {
        unsafe { self.device.destroy_command_pool(vk::CommandPool::from_raw(pool.raw), None) };
    }

    fn allocate_command_buffer(&self, pool: GfxCommandPool, debug_name: &str) -> GfxResult<GfxCommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(vk::CommandPool::from_raw(pool.raw))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&info)? }[0];
        self.set_object_debug_name(cmd, debug_name);
        Ok(GfxCommandBuffer {
            raw: cmd.as_raw(),
            queue: pool.queue,
        })
    }

    fn begin_command_buffer(&self, cmd: GfxCommandBuffer) -> GfxResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(Self::vk_cmd(cmd), &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: GfxCommandBuffer) -> GfxResult<()> {
        unsafe { self.device.end_command_buffer(Self::vk_cmd(cmd))? };
        Ok(())
    }

    fn cmd_begin_label(&self, cmd: GfxCommandBuffer, label: &str) {
        let (Some(debug_utils), Ok(name)) = (&self.debug_utils, CString::new(label)) else {
            return;
        };
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                Self::vk_cmd(cmd),
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()),
            );
        }
    }

    fn cmd_end_label(&self, cmd: GfxCommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(Self::vk_cmd(cmd)) };
        }
    }

    fn submit(&self, queue: GfxQueueType, batches: &[GfxSubmitInfo], fence: Option<GfxFence>) -> GfxResult<()> {
        let _span = vesta_utils::profile_span!("VulkanDevice::submit");

        let to_semaphore_infos = |infos: &[crate::GfxSemaphoreSubmit]| {
            infos
                .iter()
                .map(|info| {
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(vk::Semaphore::from_raw(info.semaphore.raw()))
                        .stage_mask(convert::stage_mask(info.stage))
                })
                .collect_vec()
        };
        let cmd_infos = batches
            .iter()
            .map(|batch| {
                batch
                    .command_buffers()
                    .iter()
                    .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(Self::vk_cmd(*cmd)))
                    .collect_vec()
            })
            .collect_vec();
        let wait_infos = batches.iter().map(|batch| to_semaphore_infos(batch.wait_infos())).collect_vec();
        let signal_infos = batches.iter().map(|batch| to_semaphore_infos(batch.signal_infos())).collect_vec();

        let submit_infos = (0..batches.len())
            .map(|i| {
                vk::SubmitInfo2::default()
                    .command_buffer_infos(&cmd_infos[i])
                    .wait_semaphore_infos(&wait_infos[i])
                    .signal_semaphore_infos(&signal_infos[i])
            })
            .collect_vec();

        let fence = fence.map_or(vk::Fence::null(), |f| vk::Fence::from_raw(f.raw()));
        self.with_queue(queue, |vk_queue| unsafe { self.device.queue_submit2(vk_queue, &submit_infos, fence) })??;
        Ok(())
    }

    fn create_buffer(&self, size: u64, usage: GfxBufferUsage, debug_name: &str) -> GfxResult<GfxBuffer> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size)
            .usage(convert::buffer_usage(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };
        let (buffer, allocation) = unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        self.set_object_debug_name(buffer, debug_name);

        self.buffers.lock().insert(
            buffer.as_raw(),
            VulkanBuffer {
                buffer,
                allocation,
                size,
            },
        );
        Ok(GfxBuffer::from_raw(buffer.as_raw()))
    }

    fn write_buffer(&self, buffer: GfxBuffer, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut buffers = self.buffers.lock();
        let buf = buffers.get_mut(&buffer.raw()).ok_or_else(|| GfxError::InvalidHandle(format!("{buffer:?}")))?;
        if offset + data.len() as u64 > buf.size {
            return Err(GfxError::Validation(format!("write out of buffer range {}", buf.size)));
        }
        unsafe {
            let ptr = self.allocator.map_memory(&mut buf.allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
            self.allocator.unmap_memory(&mut buf.allocation);
        }
        self.allocator.flush_allocation(&buf.allocation, offset, data.len() as vk::DeviceSize)?;
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GfxBuffer) {
        let Some(mut buf) = self.buffers.lock().remove(&buffer.raw()) else {
            vesta_utils::precondition!(false, "destroy unknown buffer {buffer:?}");
            return;
        };
        unsafe { self.allocator.destroy_buffer(buf.buffer, &mut buf.allocation) };
    }

    fn create_readback_target(&self, extent: GfxExtent, debug_name: &str) -> GfxResult<GfxReadbackTarget> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image_alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, image_allocation) = unsafe { self.allocator.create_image(&image_ci, &image_alloc_ci)? };
        self.set_object_debug_name(image, debug_name);

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(extent.rgba8_size() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let host_alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::Auto,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        };
        let (host_buffer, host_allocation) = match unsafe { self.allocator.create_buffer(&buffer_ci, &host_alloc_ci) } {
            Ok(created) => created,
            Err(e) => {
                let mut image_allocation = image_allocation;
                unsafe { self.allocator.destroy_image(image, &mut image_allocation) };
                return Err(e.into());
            }
        };

        self.targets.lock().insert(
            image.as_raw(),
            VulkanReadbackTarget {
                extent,
                image,
                image_allocation,
                host_buffer,
                host_allocation,
            },
        );
        Ok(GfxReadbackTarget::from_raw(image.as_raw()))
    }

    fn cmd_copy_target_to_host(&self, cmd: GfxCommandBuffer, target: GfxReadbackTarget) {
        let targets = self.targets.lock();
        let Some(target) = targets.get(&target.raw()) else {
            vesta_utils::precondition!(false, "copy unknown readback target {target:?}");
            return;
        };
        let cmd = Self::vk_cmd(cmd);

        // 着色器由外部模块提供，这里只保证目标有确定的内容
        self.cmd_image_barrier(
            cmd,
            target.image,
            (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED),
            (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
        );
        self.cmd_clear_image(cmd, target.image, [0.0, 0.0, 0.0, 1.0]);
        self.cmd_image_barrier(
            cmd,
            target.image,
            (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
        );

        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: target.extent.width,
                height: target.extent.height,
                depth: 1,
            });
        let host_barrier = vk::BufferMemoryBarrier2::default()
            .buffer(target.host_buffer)
            .size(vk::WHOLE_SIZE)
            .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::HOST)
            .dst_access_mask(vk::AccessFlags2::HOST_READ);
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                cmd,
                target.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target.host_buffer,
                &[region],
            );
            self.device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&host_barrier)),
            );
        }
    }

    fn read_target(&self, target: GfxReadbackTarget, dst: &mut Vec<u8>) -> GfxResult<()> {
        let mut targets = self.targets.lock();
        let target =
            targets.get_mut(&target.raw()).ok_or_else(|| GfxError::InvalidHandle(format!("{target:?}")))?;
        let size = target.extent.rgba8_size();

        self.allocator.invalidate_allocation(&target.host_allocation, 0, vk::WHOLE_SIZE)?;
        dst.clear();
        dst.reserve(size);
        unsafe {
            let ptr = self.allocator.map_memory(&mut target.host_allocation)?;
            dst.extend_from_slice(std::slice::from_raw_parts(ptr, size));
            self.allocator.unmap_memory(&mut target.host_allocation);
        }
        Ok(())
    }

    fn destroy_readback_target(&self, target: GfxReadbackTarget) {
        let Some(mut target) = self.targets.lock().remove(&target.raw()) else {
            vesta_utils::precondition!(false, "destroy unknown readback target {target:?}");
            return;
        };
        unsafe {
            self.allocator.destroy_image(target.image, &mut target.image_allocation);
            self.allocator.destroy_buffer(target.host_buffer, &mut target.host_allocation);
        }
    }

    fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}
