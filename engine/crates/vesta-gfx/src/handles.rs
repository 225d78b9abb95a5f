//! GPU 对象的句柄
//!
//! 所有句柄都是 `Copy` 的 `u64` newtype，不负责对象的生命周期，
//! 需要通过 [`GfxDevice`](crate::device::GfxDevice) 的 `destroy_*` 手动销毁。

use std::fmt;

macro_rules! define_gfx_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            raw: u64,
        }

        impl $name {
            #[inline]
            pub fn from_raw(raw: u64) -> Self {
                Self { raw }
            }

            #[inline]
            pub fn raw(&self) -> u64 {
                self.raw
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.raw)
            }
        }
    };
}

define_gfx_handle!(
    /// binary semaphore
    GfxSemaphore
);
define_gfx_handle!(GfxFence);
define_gfx_handle!(
    /// uniform / storage buffer，host visible
    GfxBuffer
);
define_gfx_handle!(
    /// headless 模式下的渲染目标，可以拷贝到 CPU 可见的内存
    GfxReadbackTarget
);

/// 硬件队列的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GfxQueueType {
    Graphics,
    Compute,
    VideoDecode,
}
impl GfxQueueType {
    pub const ALL: [GfxQueueType; 3] = [GfxQueueType::Graphics, GfxQueueType::Compute, GfxQueueType::VideoDecode];

    pub fn name(&self) -> &'static str {
        match self {
            GfxQueueType::Graphics => "graphics",
            GfxQueueType::Compute => "compute",
            GfxQueueType::VideoDecode => "video-decode",
        }
    }
}

/// command pool 只能分配一种队列的 command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GfxCommandPool {
    pub raw: u64,
    pub queue: GfxQueueType,
}

/// command buffer 记录
///
/// 记录了它属于哪个队列，提交时需要据此选择队列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GfxCommandBuffer {
    pub raw: u64,
    pub queue: GfxQueueType,
}

/// 二维尺寸，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GfxExtent {
    pub width: u32,
    pub height: u32,
}
impl GfxExtent {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGBA8 格式下的字节数
    #[inline]
    pub fn rgba8_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}
impl fmt::Display for GfxExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
