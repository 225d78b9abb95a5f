//! update 线程
//!
//! 只通过 handle table 修改场景，与 frame 线程之间没有其他共享状态。

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use glam::{Quat, Vec3};
use vesta_gfx::GfxExtent;
use vesta_render_interface::{
    resource_registry::{ResourceRegistry, ShaderStage},
    scene::{CameraEntry, SceneTables, Transform, Viewport},
};

/// 演示场景：两个 camera 左右分屏，围绕原点旋转
pub struct DemoScene {
    camera_transforms: Vec<u32>,
}

impl DemoScene {
    pub fn build(scene: &SceneTables, resources: &ResourceRegistry) -> anyhow::Result<Self> {
        let mut camera_transforms = Vec::new();
        for (i, x) in [0.0_f32, 0.5].into_iter().enumerate() {
            let transform_addr = scene.transforms.insert(Transform::from_position(Vec3::new(0.0, 2.0, 8.0)));
            scene.cameras.insert(CameraEntry {
                transform_addr,
                viewport: Viewport {
                    x,
                    y: 0.0,
                    width: 0.5,
                    height: 1.0,
                },
                ..Default::default()
            });
            log::info!("camera {i} bound to transform {transform_addr}");
            camera_transforms.push(transform_addr);
        }

        resources.generate_model("ground", 4, 6)?;
        resources.generate_texture("checker", GfxExtent::new(64, 64), 1)?;
        let shader = resources.generate_shader_program("particles", vec![(ShaderStage::Compute, vec![0; 64])])?;
        let pipeline = resources.generate_compute_pipeline("particles", shader)?;
        resources.generate_particle_system("sparks", 4096, pipeline)?;

        Ok(Self { camera_transforms })
    }

    /// 按宿主时间旋转 camera
    fn animate(&self, scene: &SceneTables, time: f64) {
        for (i, &addr) in self.camera_transforms.iter().enumerate() {
            let angle = time as f32 * 0.5 + i as f32 * std::f32::consts::PI;
            scene.transforms.with_mut(addr, |transform| {
                transform.position = Quat::from_rotation_y(angle) * Vec3::new(0.0, 2.0, 8.0);
                transform.rotation = Quat::from_rotation_y(angle);
            });
        }
    }
}

pub struct UpdateThread {
    sender: Option<Sender<(f64, f64)>>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateThread {
    pub fn spawn(scene: Arc<SceneTables>, demo: DemoScene) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("vesta-update".to_string())
            .spawn(move || Self::update_thread_main(scene, demo, receiver))?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn update(&self, delta: f64, time: f64) {
        if let Some(sender) = &self.sender {
            let _ = sender.send((delta, time));
        }
    }

    fn update_thread_main(scene: Arc<SceneTables>, demo: DemoScene, receiver: Receiver<(f64, f64)>) {
        let mut updates = 0_u64;
        // channel 关闭后退出
        for (_delta, time) in receiver {
            demo.animate(&scene, time);
            updates += 1;
        }
        log::info!("update thread exited after {updates} updates");
    }

    pub fn join(mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UpdateThread {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_gfx::null::NullDevice;
    use vesta_render_interface::deletion_ring::GpuDeletionRing;

    #[test]
    fn test_update_thread_moves_cameras() {
        let scene = Arc::new(SceneTables::new());
        let resources = ResourceRegistry::new(Arc::new(NullDevice::new()), Arc::new(GpuDeletionRing::new(3)));
        let demo = DemoScene::build(&scene, &resources).unwrap();
        let addr = demo.camera_transforms[0];
        assert_eq!(scene.active_cameras().len(), 2);

        let update_thread = UpdateThread::spawn(scene.clone(), demo).unwrap();
        update_thread.update(0.5, 1.0);
        update_thread.join();

        let position = scene.transforms.get_cloned(addr).unwrap().position;
        let expected = Quat::from_rotation_y(0.5) * Vec3::new(0.0, 2.0, 8.0);
        assert!(position.abs_diff_eq(expected, 1e-5));
        resources.destroy_all();
    }
}
