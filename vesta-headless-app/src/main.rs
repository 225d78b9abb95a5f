//! headless 宿主
//!
//! 用法：`vesta-headless [config.toml]`
//!
//! 连接配置中的宿主地址，宿主发送 `UpdateData` / `Resize` / `Close`，
//! 引擎把渲染完成的帧以 `PushFrame` 发送回去。

mod scene_update;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use vesta_crate_tools::{
    config::{BackendKind, EngineConfig, PresentMode},
    init_log::init_log,
};
use vesta_gfx::{
    GfxDevice,
    null::{NullDevice, NullSurface},
    vulkan::VulkanDevice,
};
use vesta_renderer::{
    EngineContext, FrameBackend, FrameTarget, NoopHooks, RenderThread, RendererSettings,
    compute::{ComputeSubEngine, NoopParticleSimulator},
};
use vesta_transport::{FrameTransport, StreamTransport, TransportError, TransportMessage};

use crate::scene_update::{DemoScene, UpdateThread};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn load_config() -> anyhow::Result<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path),
        None => {
            log::info!("no config file given, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

/// null 后端同时返回具体类型，模拟窗口需要它
fn create_device(config: &EngineConfig) -> anyhow::Result<(Arc<dyn GfxDevice>, Option<Arc<NullDevice>>)> {
    Ok(match config.backend {
        BackendKind::Null => {
            let null = Arc::new(NullDevice::new());
            (null.clone() as Arc<dyn GfxDevice>, Some(null))
        }
        BackendKind::Vulkan => {
            let vulkan = VulkanDevice::new(&config.app_name, None).context("failed to create vulkan device")?;
            (Arc::new(vulkan) as Arc<dyn GfxDevice>, None)
        }
    })
}

fn main() -> anyhow::Result<()> {
    init_log();
    #[cfg(feature = "profile")]
    tracy_client::Client::start();

    let config = load_config()?;
    log::info!("config: {config:?}");

    let (device, null_device) = create_device(&config)?;
    let transport = StreamTransport::connect(config.transport.address.as_str())
        .with_context(|| format!("failed to connect to host at {}", config.transport.address))?;

    let settings = RendererSettings::from_config(&config);
    let ctx = EngineContext::new(settings, device.clone(), Arc::new(NoopHooks))?;

    let target = match (config.present.mode, null_device) {
        (PresentMode::Headless, _) => FrameTarget::headless(
            device.clone(),
            Some(Box::new(transport.clone())),
            settings.extent,
            settings.ring_size(),
        ),
        (PresentMode::Windowed, Some(null)) => {
            log::warn!("windowed mode on the null backend presents to a simulated surface");
            let surface = NullSurface::new(null, settings.extent);
            FrameTarget::windowed(device.clone(), Box::new(surface), settings.frames_in_flight)
        }
        (PresentMode::Windowed, None) => {
            bail!("windowed mode needs a window host, use the headless present mode")
        }
    };
    let compute = ComputeSubEngine::new(device.as_ref(), settings.compute_enabled, Arc::new(NoopParticleSimulator));

    let demo = DemoScene::build(&ctx.scene, &ctx.resources)?;
    let update_thread = UpdateThread::spawn(ctx.scene.clone(), demo)?;
    let backend = FrameBackend::new(ctx.clone(), target, compute)?;
    let render_thread = RenderThread::spawn(backend, None)?;

    loop {
        match transport.recv_timeout(POLL_INTERVAL) {
            Ok(Some(TransportMessage::UpdateData { delta, time })) => {
                update_thread.update(delta, time);
                render_thread.update_data(delta, time);
            }
            Ok(Some(TransportMessage::Resize { width, height })) => {
                if width <= 0 || height <= 0 {
                    log::warn!("ignore resize to {width}x{height}");
                    continue;
                }
                render_thread.resize(width as u32, height as u32);
            }
            Ok(Some(TransportMessage::FrameData(frame))) => {
                log::info!("host frame data: {frame:?}");
            }
            Ok(Some(TransportMessage::PushFrame(_))) => {
                log::warn!("host sent PushFrame, ignored");
            }
            Ok(Some(TransportMessage::Close)) => {
                log::info!("host requested close");
                break;
            }
            Ok(None) => {
                if !render_thread.is_running() {
                    break;
                }
            }
            Err(TransportError::Closed) => {
                log::info!("host disconnected");
                break;
            }
            Err(e) => log::warn!("transport error: {e}"),
        }
    }

    let result = render_thread.join();
    update_thread.join();
    transport.shutdown();
    ctx.shutdown();

    let stats = result?;
    log::info!("frames: {} submitted, {} skipped, {} rebuilt", stats.submitted, stats.skipped, stats.rebuilt);
    Ok(())
}
