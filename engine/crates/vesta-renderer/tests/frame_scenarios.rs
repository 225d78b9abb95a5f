mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use common::{EXTENT, RecordingHooks, add_camera, context, headless_backend, settings, windowed_backend};
use parking_lot::Mutex;
use vesta_gfx::{
    GfxBuffer, GfxError, GfxExtent, GfxQueueType,
    null::{NullDevice, NullSurface},
};
use vesta_render_interface::resource_registry::{ResourceKind, ShaderStage};
use vesta_renderer::{
    FrameError, FrameOutcome, FrameStage, FrameTargetState, NoopHooks, PassContext, RenderPipelineHooks, SkipReason,
};
use vesta_transport::{ChannelTransport, FrameTransport, TransportMessage};

#[test]
fn test_one_chain_per_frame() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(2, true), Arc::new(NoopHooks));
    add_camera(&ctx, 0.0);
    add_camera(&ctx, 1.0);
    let shader = ctx.resources.generate_shader_program("sim", vec![(ShaderStage::Compute, vec![0; 16])]).unwrap();
    let pipeline = ctx.resources.generate_compute_pipeline("sim", shader).unwrap();
    ctx.resources.generate_particle_system("sparks", 256, pipeline).unwrap();

    let mut backend = headless_backend(&ctx, None);
    for frame_id in 0..4 {
        // compute + 2 * (draw, light, post) + bracket
        assert_eq!(
            backend.tick().unwrap(),
            FrameOutcome::Submitted {
                frame_id,
                command_buffers: 8
            }
        );
        assert_eq!(backend.stage(), FrameStage::Idle);
    }
    assert_eq!(null.submitted_command_buffer_count(), 32);
    // compute 队列和 graphics 队列各提交一次
    assert_eq!(null.submit_call_count(), 8);

    let submissions = null.submissions();
    let first_frame = &submissions[..8];
    assert_eq!(first_frame[0].queue, GfxQueueType::Compute);
    assert!(first_frame[0].command_buffers[0].labels.contains(&"sparks".to_string()));
    assert!(first_frame[1..].iter().all(|s| s.queue == GfxQueueType::Graphics));

    // 相邻的 batch 之间通过 semaphore 串联，fence 只在最后一个 batch 上
    for pair in first_frame.windows(2) {
        assert_eq!(pair[0].signals.len(), 1);
        assert_eq!(pair[1].waits, pair[0].signals);
    }
    assert!(first_frame[..7].iter().all(|s| s.fence.is_none()));
    assert!(first_frame[7].fence.is_some());

    let order: Vec<&str> = first_frame[1..7].iter().map(|s| s.command_buffers[0].labels[0].as_str()).collect();
    assert_eq!(
        order,
        vec![
            "[F0A] cam0 draw",
            "[F0A] cam0 light",
            "[F0A] cam0 post",
            "[F0A] cam1 draw",
            "[F0A] cam1 light",
            "[F0A] cam1 post"
        ]
    );
    assert_eq!(first_frame[7].command_buffers[0].labels[0], "[F0A] base-pass");

    backend.destroy();
}

#[test]
fn test_no_camera_still_submits_bracket() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(2, false), Arc::new(NoopHooks));
    let mut backend = headless_backend(&ctx, None);

    assert_eq!(
        backend.tick().unwrap(),
        FrameOutcome::Submitted {
            frame_id: 0,
            command_buffers: 1
        }
    );
    assert_eq!(null.submitted_command_buffer_count(), 1);
    backend.destroy();
}

#[test]
fn test_compute_disabled_without_compute_queue() {
    let null = Arc::new(NullDevice::with_queues(&[GfxQueueType::Graphics]));
    let ctx = context(&null, settings(2, true), Arc::new(NoopHooks));
    add_camera(&ctx, 0.0);
    let mut backend = headless_backend(&ctx, None);

    assert_eq!(
        backend.tick().unwrap(),
        FrameOutcome::Submitted {
            frame_id: 0,
            command_buffers: 4
        }
    );
    assert!(null.submissions().iter().all(|s| s.queue == GfxQueueType::Graphics));
    backend.destroy();
}

#[test]
fn test_hooks_called_in_pass_order() {
    let null = Arc::new(NullDevice::new());
    let hooks = Arc::new(RecordingHooks::default());
    let ctx = context(&null, settings(2, false), hooks.clone());
    add_camera(&ctx, 0.0);
    let mut backend = headless_backend(&ctx, None);

    backend.tick().unwrap();
    // 三个 pass 在不同的 worker 上并行录制，只检查每个 pass 内部的顺序
    let events = hooks.events_of(0);
    let of_pass = |names: &[&str]| -> Vec<String> {
        events.iter().filter(|e| names.iter().any(|n| e.starts_with(n))).cloned().collect()
    };
    assert_eq!(of_pass(&["pre_render", "post_render"]), vec!["pre_render", "post_render"]);
    assert_eq!(
        of_pass(&["light_setup", "pre_light", "post_light"]),
        vec![
            "light_setup",
            "pre_light directional",
            "post_light directional",
            "pre_light point",
            "post_light point",
            "pre_light spot",
            "post_light spot",
        ]
    );
    assert_eq!(of_pass(&["post_process"]), vec!["post_process"]);
    assert_eq!(events.len(), 10);
    backend.destroy();
}

/// 记录每个 pass 拿到的 uniform buffer
#[derive(Default)]
struct UniformHooks {
    buffers: Mutex<Vec<(usize, &'static str, GfxBuffer)>>,
}
impl RenderPipelineHooks for UniformHooks {
    fn pre_render(&self, pass: &PassContext<'_>) {
        self.buffers.lock().push((pass.camera_index, "draw", pass.camera_buffer));
    }
    fn light_setup(&self, pass: &PassContext<'_>) {
        self.buffers.lock().push((pass.camera_index, "light", pass.camera_buffer));
    }
    fn post_process(&self, pass: &PassContext<'_>) {
        self.buffers.lock().push((pass.camera_index, "post", pass.camera_buffer));
    }
}

#[test]
fn test_each_recording_unit_owns_a_uniform_buffer() {
    let null = Arc::new(NullDevice::new());
    let hooks = Arc::new(UniformHooks::default());
    let ctx = context(&null, settings(2, false), hooks.clone());
    add_camera(&ctx, 0.0);
    add_camera(&ctx, 3.0);
    let mut backend = headless_backend(&ctx, None);

    backend.tick().unwrap();
    assert_eq!(backend.uniforms().unit_count(0), 2 * 3 + 1);
    assert_eq!(backend.uniforms().unit_count(1), 0);

    let buffers = hooks.buffers.lock().clone();
    assert_eq!(buffers.len(), 6);
    let distinct: HashSet<GfxBuffer> = buffers.iter().map(|(_, _, buffer)| *buffer).collect();
    assert_eq!(distinct.len(), 6);

    // 同一个 camera 的三个 pass 看到相同的数据
    for camera_index in 0..2 {
        let contents: HashSet<Vec<u8>> = buffers
            .iter()
            .filter(|(index, _, _)| *index == camera_index)
            .map(|(_, _, buffer)| null.buffer_contents(*buffer).unwrap())
            .collect();
        assert_eq!(contents.len(), 1);
    }

    backend.tick().unwrap();
    assert_eq!(backend.uniforms().unit_count(1), 7);
    backend.destroy();
}

#[test]
fn test_deferred_destroy_waits_ring_size_frames() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(2, false), Arc::new(NoopHooks));
    add_camera(&ctx, 0.0);
    let mut backend = headless_backend(&ctx, None);

    backend.tick().unwrap();
    let addr = ctx.resources.generate_camera_buffer("scratch").unwrap();
    let buffer = ctx.resources.with(ResourceKind::CameraBuffer, addr, |r| r.buffers[0]).unwrap();
    ctx.resources.destroy_camera_buffer(addr);
    assert!(!ctx.resources.is_alive(ResourceKind::CameraBuffer, addr));

    // 第 0 帧 push 的对象在第 RingSize 帧开始时销毁
    backend.tick().unwrap();
    backend.tick().unwrap();
    assert!(null.buffer_contents(buffer).is_some());
    backend.tick().unwrap();
    assert!(null.buffer_contents(buffer).is_none());

    // 地址到期之后才会复用
    assert_eq!(ctx.resources.generate_camera_buffer("scratch").unwrap(), addr);
    backend.destroy();
}

#[test]
fn test_fence_timeout_skips_frame() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(2, false), Arc::new(NoopHooks));
    add_camera(&ctx, 0.0);
    let mut backend = headless_backend(&ctx, None);

    null.inject_fence_timeouts(1);
    assert_eq!(backend.tick().unwrap(), FrameOutcome::Skipped(SkipReason::FenceTimeout));
    assert_eq!(backend.frame_counter().frame_id(), 0);
    assert_eq!(null.submit_call_count(), 0);
    assert_eq!(ctx.deletion_ring.epoch(), 0);

    assert_eq!(
        backend.tick().unwrap(),
        FrameOutcome::Submitted {
            frame_id: 0,
            command_buffers: 4
        }
    );
    backend.destroy();
}

#[test]
fn test_panicking_hook_does_not_abort_frame() {
    let null = Arc::new(NullDevice::new());
    let hooks = Arc::new(RecordingHooks {
        panic_post_on_camera: Some(0),
        ..Default::default()
    });
    let ctx = context(&null, settings(2, false), hooks.clone());
    add_camera(&ctx, 0.0);
    add_camera(&ctx, 1.0);
    let mut backend = headless_backend(&ctx, None);

    for frame_id in 0..3 {
        assert_eq!(
            backend.tick().unwrap(),
            FrameOutcome::Submitted {
                frame_id,
                command_buffers: 7
            }
        );
    }
    assert!(!hooks.events_of(0).contains(&"post_process".to_string()));
    assert_eq!(hooks.events_of(1).iter().filter(|e| *e == "post_process").count(), 3);
    backend.destroy();
}

#[test]
fn test_windowed_out_of_date_rebuilds() {
    let null = Arc::new(NullDevice::new());
    let hooks = Arc::new(RecordingHooks::default());
    let ctx = context(&null, settings(2, false), hooks.clone());
    add_camera(&ctx, 0.0);
    let surface = NullSurface::new(null.clone(), EXTENT);
    surface.fail_acquire_at(5);
    let mut backend = windowed_backend(&ctx, surface.clone());

    for frame_id in 0..5 {
        assert!(matches!(backend.tick().unwrap(), FrameOutcome::Submitted { frame_id: id, .. } if id == frame_id));
    }
    assert_eq!(
        backend.tick().unwrap(),
        FrameOutcome::Rebuilt {
            width: EXTENT.width,
            height: EXTENT.height
        }
    );
    assert_eq!(*hooks.resizes.lock(), vec![(EXTENT.width, EXTENT.height)]);
    assert_eq!(surface.swapchains_created(), 2);
    assert!(matches!(backend.tick().unwrap(), FrameOutcome::Submitted { frame_id: 5, .. }));
    assert_eq!(surface.presented_images(), vec![0, 1, 2, 0, 1, 0]);

    // 窗口缩放
    surface.set_window_extent(GfxExtent::new(128, 96));
    assert_eq!(backend.tick().unwrap(), FrameOutcome::Rebuilt { width: 128, height: 96 });
    assert_eq!(backend.target().size(), GfxExtent::new(128, 96));
    assert_eq!(backend.target().state(), FrameTargetState::Initialized(vesta_renderer::present::TargetMode::Windowed));
    assert!(matches!(backend.tick().unwrap(), FrameOutcome::Submitted { frame_id: 6, .. }));

    backend.destroy();
    assert_eq!(backend.target().state(), FrameTargetState::Destroyed);
    assert_eq!(null.live_objects().total(), 0);
}

#[test]
fn test_headless_transport_and_resize() {
    let null = Arc::new(NullDevice::new());
    let hooks = Arc::new(RecordingHooks::default());
    let ctx = context(&null, settings(2, false), hooks.clone());
    add_camera(&ctx, 0.0);
    let (engine_side, host) = ChannelTransport::pair();
    let mut backend = headless_backend(&ctx, Some(Box::new(engine_side)));
    let ring_size = ctx.settings.ring_size();

    // 前 RingSize 帧的 readback target 还没有写过完整的一帧
    for _ in 0..ring_size {
        backend.tick().unwrap();
    }
    assert_eq!(host.try_recv().unwrap(), None);

    backend.tick().unwrap();
    backend.tick().unwrap();
    for _ in 0..2 {
        match host.recv_timeout(Duration::from_secs(1)).unwrap() {
            Some(TransportMessage::PushFrame(frame)) => {
                assert_eq!((frame.width, frame.height), (EXTENT.width, EXTENT.height));
                assert!(frame.is_consistent());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert_eq!(backend.target().frames_transported(), 2);

    backend.request_resize(128, 64);
    assert_eq!(backend.tick().unwrap(), FrameOutcome::Rebuilt { width: 128, height: 64 });
    assert_eq!(backend.target().size(), GfxExtent::new(128, 64));
    assert_eq!(*hooks.resizes.lock(), vec![(128, 64)]);

    for _ in 0..ring_size + 3 {
        backend.tick().unwrap();
    }
    let mut frames = vec![];
    while let Some(message) = host.try_recv().unwrap() {
        frames.push(message);
    }
    assert_eq!(frames.len(), 3);
    for message in frames {
        let TransportMessage::PushFrame(frame) = message else {
            panic!("unexpected message {message:?}");
        };
        assert_eq!((frame.width, frame.height), (128, 64));
        assert_eq!(frame.pixels.len(), 128 * 64 * 4);
    }

    backend.destroy();
}

#[test]
fn test_closed_transport_keeps_rendering() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(1, false), Arc::new(NoopHooks));
    let (engine_side, host) = ChannelTransport::pair();
    drop(host);
    let mut backend = headless_backend(&ctx, Some(Box::new(engine_side)));

    for frame_id in 0..5 {
        assert!(matches!(backend.tick().unwrap(), FrameOutcome::Submitted { frame_id: id, .. } if id == frame_id));
    }
    assert_eq!(backend.target().frames_transported(), 0);
    backend.destroy();
}

#[test]
fn test_device_lost_is_fatal() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(2, true), Arc::new(NoopHooks));
    add_camera(&ctx, 0.0);
    let mut backend = headless_backend(&ctx, None);

    backend.tick().unwrap();
    null.inject_device_lost();
    assert!(matches!(backend.tick(), Err(FrameError::Fatal(GfxError::DeviceLost))));
    assert_eq!(backend.stage(), FrameStage::Idle);
    assert_eq!(backend.frame_counter().frame_id(), 1);

    backend.destroy();
    assert_eq!(null.live_objects().total(), 0);
}

#[test]
fn test_destroy_releases_everything() {
    let null = Arc::new(NullDevice::new());
    let ctx = context(&null, settings(3, true), Arc::new(NoopHooks));
    add_camera(&ctx, 0.0);
    add_camera(&ctx, 1.0);
    ctx.resources.generate_texture("albedo", GfxExtent::new(4, 4), 1).unwrap();
    let model = ctx.resources.generate_model("cube", 24, 36).unwrap();
    let mut backend = headless_backend(&ctx, None);

    for _ in 0..5 {
        backend.tick().unwrap();
    }
    ctx.resources.destroy_model(model);
    backend.tick().unwrap();

    backend.destroy();
    backend.destroy();
    assert_eq!(null.live_objects().total(), 0);
    assert_eq!(ctx.deletion_ring.pending_count(), 0);
}
