//! 独立的 frame 线程
//!
//! [`FrameBackend`] 被 move 到线程中，其他线程只通过消息与它交互。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::frame_backend::{FrameBackend, FrameError, FrameOutcome};

/// 发给 frame 线程的消息
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderThreadMessage {
    /// 下一个 tick 重建 frame target
    Resize { width: u32, height: u32 },
    /// 宿主驱动的时间
    UpdateData { delta_time: f64, time: f64 },
    Shutdown,
}

/// 线程退出时返回的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderThreadStats {
    pub submitted: u64,
    pub skipped: u64,
    pub rebuilt: u64,
}
impl RenderThreadStats {
    fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Submitted { .. } => self.submitted += 1,
            FrameOutcome::Skipped(_) => self.skipped += 1,
            FrameOutcome::Rebuilt { .. } => self.rebuilt += 1,
        }
    }
}

pub struct RenderThread {
    sender: Sender<RenderThreadMessage>,
    thread_handle: Option<JoinHandle<Result<RenderThreadStats, FrameError>>>,
    running: Arc<AtomicBool>,
}

// new & init
impl RenderThread {
    /// 启动 frame 线程
    ///
    /// `fps_limit` 为 None 时不限制帧率
    pub fn spawn(backend: FrameBackend, fps_limit: Option<f32>) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let min_frame_time = fps_limit.filter(|fps| *fps > 0.0).map(|fps| Duration::from_secs_f32(1.0 / fps));

        let thread_handle = thread::Builder::new()
            .name("vesta-render".to_string())
            .spawn(move || Self::render_thread_main(backend, receiver, running_clone, min_frame_time))?;

        Ok(Self {
            sender,
            thread_handle: Some(thread_handle),
            running,
        })
    }
}

// update
impl RenderThread {
    pub fn send(&self, message: RenderThreadMessage) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.sender.send(message);
        }
    }

    #[inline]
    pub fn resize(&self, width: u32, height: u32) {
        self.send(RenderThreadMessage::Resize { width, height });
    }

    #[inline]
    pub fn update_data(&self, delta_time: f64, time: f64) {
        self.send(RenderThreadMessage::UpdateData { delta_time, time });
    }

    /// 请求线程退出，不等待
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.sender.send(RenderThreadMessage::Shutdown);
    }

    /// 线程仍在运行。发生 fatal error 之后为 false
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 停止线程并等待 backend 销毁完成
    pub fn join(mut self) -> Result<RenderThreadStats, FrameError> {
        self.stop();
        let Some(handle) = self.thread_handle.take() else {
            return Ok(RenderThreadStats::default());
        };
        match handle.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    fn render_thread_main(
        mut backend: FrameBackend,
        receiver: Receiver<RenderThreadMessage>,
        running: Arc<AtomicBool>,
        min_frame_time: Option<Duration>,
    ) -> Result<RenderThreadStats, FrameError> {
        log::info!("render thread started");
        let mut stats = RenderThreadStats::default();

        let result = 'frames: loop {
            if !running.load(Ordering::SeqCst) {
                break Ok(());
            }
            let frame_start = Instant::now();

            loop {
                match receiver.try_recv() {
                    Ok(RenderThreadMessage::Resize { width, height }) => backend.request_resize(width, height),
                    Ok(RenderThreadMessage::UpdateData { delta_time, time }) => backend.set_timing(delta_time, time),
                    Ok(RenderThreadMessage::Shutdown) => break 'frames Ok(()),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        log::warn!("render thread channel disconnected");
                        break 'frames Ok(());
                    }
                }
            }

            match backend.tick() {
                Ok(outcome) => stats.record(outcome),
                Err(e) => break Err(e),
            }

            if let Some(remaining) = min_frame_time.and_then(|min| min.checked_sub(frame_start.elapsed())) {
                thread::sleep(remaining);
            }
        };

        running.store(false, Ordering::SeqCst);
        backend.destroy();
        log::info!(
            "render thread exited: {} submitted, {} skipped, {} rebuilt",
            stats.submitted,
            stats.skipped,
            stats.rebuilt
        );
        result.map(|()| stats)
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
