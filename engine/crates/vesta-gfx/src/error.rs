use ash::vk;

pub type GfxResult<T> = Result<T, GfxError>;

/// GPU 调用的错误
///
/// 只有 [`GfxError::OutOfDate`] 可以通过重建 swapchain 恢复，其余都是致命错误。
#[derive(Debug, Clone, thiserror::Error)]
pub enum GfxError {
    #[error("swapchain is out of date")]
    OutOfDate,
    #[error("gpu wait timed out")]
    Timeout,
    #[error("device lost")]
    DeviceLost,
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// 对象状态不允许该操作，例如重置仍在执行的 command pool
    #[error("invalid usage: {0}")]
    Validation(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),
}

impl GfxError {
    #[inline]
    pub fn is_recoverable_by_rebuild(&self) -> bool {
        matches!(self, GfxError::OutOfDate)
    }
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => GfxError::OutOfDate,
            vk::Result::TIMEOUT => GfxError::Timeout,
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GfxError::OutOfMemory,
            other => GfxError::Vulkan(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_out_of_date_is_recoverable() {
        assert!(GfxError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_recoverable_by_rebuild());
        assert!(!GfxError::from(vk::Result::ERROR_DEVICE_LOST).is_recoverable_by_rebuild());
        assert!(!GfxError::Timeout.is_recoverable_by_rebuild());
        assert!(matches!(GfxError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), GfxError::OutOfMemory));
        assert!(matches!(
            GfxError::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        ));
    }
}
