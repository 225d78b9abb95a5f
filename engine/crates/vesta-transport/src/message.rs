/// payload 的上限，超过时认为对端出错
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    UpdateData = 1,
    PushFrame = 2,
    FrameData = 3,
    Resize = 4,
    Close = 5,
}
impl MessageKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::UpdateData),
            2 => Some(Self::PushFrame),
            3 => Some(Self::FrameData),
            4 => Some(Self::Resize),
            5 => Some(Self::Close),
            _ => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::UpdateData => "UpdateData",
            Self::PushFrame => "PushFrame",
            Self::FrameData => "FrameData",
            Self::Resize => "Resize",
            Self::Close => "Close",
        }
    }
}

/// RGBA8 像素，行优先，没有行对齐
#[derive(Clone, PartialEq, Eq)]
pub struct FramePixels {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}
impl FramePixels {
    /// 像素字节数，溢出 `usize` 时返回 None
    #[inline]
    pub fn expected_len(width: u32, height: u32) -> Option<usize> {
        (width as usize).checked_mul(height as usize)?.checked_mul(4)
    }

    #[inline]
    pub fn is_consistent(&self) -> bool {
        Self::expected_len(self.width, self.height) == Some(self.pixels.len())
    }
}
impl std::fmt::Debug for FramePixels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePixels")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// 宿主驱动的时间步进，单位秒
    UpdateData { delta: f64, time: f64 },
    /// 引擎渲染完成的一帧
    PushFrame(FramePixels),
    /// 宿主发送给引擎的像素，作为事件交给 app
    FrameData(FramePixels),
    Resize { width: i32, height: i32 },
    Close,
}
impl TransportMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::UpdateData { .. } => MessageKind::UpdateData,
            Self::PushFrame(_) => MessageKind::PushFrame,
            Self::FrameData(_) => MessageKind::FrameData,
            Self::Resize { .. } => MessageKind::Resize,
            Self::Close => MessageKind::Close,
        }
    }
}
