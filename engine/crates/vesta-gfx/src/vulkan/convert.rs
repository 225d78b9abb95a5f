use ash::vk;

use crate::{device::GfxBufferUsage, submit_info::GfxStageMask};

pub(crate) fn stage_mask(mask: GfxStageMask) -> vk::PipelineStageFlags2 {
    let mut flags = vk::PipelineStageFlags2::NONE;
    let table = [
        (GfxStageMask::TOP_OF_PIPE, vk::PipelineStageFlags2::TOP_OF_PIPE),
        (GfxStageMask::COMPUTE_SHADER, vk::PipelineStageFlags2::COMPUTE_SHADER),
        (GfxStageMask::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
        (GfxStageMask::FRAGMENT_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (GfxStageMask::TRANSFER, vk::PipelineStageFlags2::ALL_TRANSFER),
        (GfxStageMask::BOTTOM_OF_PIPE, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
        (GfxStageMask::ALL_COMMANDS, vk::PipelineStageFlags2::ALL_COMMANDS),
    ];
    for (gfx, vk_flag) in table {
        if mask.contains(gfx) {
            flags |= vk_flag;
        }
    }
    flags
}

pub(crate) fn buffer_usage(usage: GfxBufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(GfxBufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(GfxBufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(GfxBufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(GfxBufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mask_conversion() {
        assert_eq!(stage_mask(GfxStageMask::empty()), vk::PipelineStageFlags2::NONE);
        assert_eq!(
            stage_mask(GfxStageMask::COMPUTE_SHADER | GfxStageMask::TRANSFER),
            vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::ALL_TRANSFER
        );
        assert_eq!(
            buffer_usage(GfxBufferUsage::UNIFORM | GfxBufferUsage::TRANSFER_DST),
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
    }
}
