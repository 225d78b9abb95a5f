use std::fmt::{self, Display};

/// flight frame 的标签，A, B, C ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLabel(usize);
impl FrameLabel {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (b'A' + self.0 as u8) as char)
    }
}

/// 帧计数
///
/// - flight index: `frame_id % F`，选择 fence、semaphore、command pool、uniform buffer
/// - pool index: `frame_id % (F + 1)`，比 flight index 多一个，deletion ring 的长度与之相同，
///   保证 ring 至少落后提交一整轮
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    frames_in_flight: usize,
}
// new & init
impl FrameCounter {
    pub fn new(frames_in_flight: usize) -> Self {
        assert!((1..=26).contains(&frames_in_flight), "invalid frames in flight: {frames_in_flight}");
        Self {
            frame_id: 0,
            frames_in_flight,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.frames_in_flight
    }
    #[inline]
    pub fn ring_size(&self) -> usize {
        self.frames_in_flight + 1
    }
    #[inline]
    pub fn flight_index(&self) -> usize {
        (self.frame_id % self.frames_in_flight as u64) as usize
    }
    #[inline]
    pub fn pool_index(&self) -> usize {
        (self.frame_id % self.ring_size() as u64) as usize
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel(self.flight_index())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices() {
        let mut counter = FrameCounter::new(2);
        let mut seen = vec![];
        for _ in 0..6 {
            seen.push((counter.flight_index(), counter.pool_index()));
            counter.next_frame();
        }
        assert_eq!(seen, vec![(0, 0), (1, 1), (0, 2), (1, 0), (0, 1), (1, 2)]);
        assert_eq!(counter.ring_size(), 3);
        assert_eq!(counter.frame_name(), "[F6A]");
    }
}
