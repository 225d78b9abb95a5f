//! update 线程和 frame 线程共享的场景数据
//!
//! 两个线程之间只通过 handle table 通信。transform 可能同时被多个 writer 修改，
//! 通过 handle table 的写锁访问；camera 只由 update 线程修改。

use glam::{Mat4, Quat, Vec3};
use vesta_utils::handle_table::{HandleTable, INVALID_ADDRESS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}
impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}
impl Transform {
    #[inline]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    #[inline]
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

bitflags::bitflags! {
    /// camera 只渲染 layer mask 有交集的物体
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderLayers: u32 {
        const DEFAULT = 1 << 0;
        const TRANSPARENT = 1 << 1;
        const UI = 1 << 2;
        const ALL = u32::MAX;
    }
}

/// 归一化的视口，取值范围 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}
impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraEntry {
    /// INVALID_ADDRESS 表示 camera 没有绑定 transform，不参与渲染
    pub transform_addr: u32,
    /// INVALID_ADDRESS 表示渲染到 frame target
    pub render_texture_addr: u32,
    pub viewport: Viewport,
    pub render_layers: RenderLayers,
    /// 垂直视场角，弧度
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}
impl Default for CameraEntry {
    fn default() -> Self {
        Self {
            transform_addr: INVALID_ADDRESS,
            render_texture_addr: INVALID_ADDRESS,
            viewport: Viewport::default(),
            render_layers: RenderLayers::DEFAULT,
            fov: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 1000.0,
        }
    }
}
impl CameraEntry {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.transform_addr != INVALID_ADDRESS
    }
}

/// 每帧开始时取得的 camera 快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveCamera {
    pub camera_addr: u32,
    pub entry: CameraEntry,
    pub transform: Transform,
}

pub struct SceneTables {
    pub transforms: HandleTable<Transform>,
    pub cameras: HandleTable<CameraEntry>,
}

impl SceneTables {
    pub fn new() -> Self {
        Self {
            transforms: HandleTable::new("Transform"),
            cameras: HandleTable::new("Camera"),
        }
    }

    /// 按地址顺序收集所有 active camera，保证每帧 command buffer 链的顺序是确定的
    ///
    /// transform 已经被销毁的 camera 仍然是 active 的，使用默认 transform
    pub fn active_cameras(&self) -> Vec<ActiveCamera> {
        let mut entries = Vec::new();
        self.cameras.for_each_alive(|camera_addr, entry| {
            if entry.is_active() {
                entries.push((camera_addr, *entry));
            }
        });

        entries
            .into_iter()
            .map(|(camera_addr, entry)| {
                let transform = self.transforms.get_cloned(entry.transform_addr).unwrap_or_else(|| {
                    log::debug!("camera {camera_addr} references dead transform {}", entry.transform_addr);
                    Transform::default()
                });
                ActiveCamera {
                    camera_addr,
                    entry,
                    transform,
                }
            })
            .collect()
    }
}
impl Default for SceneTables {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_cameras_in_address_order() {
        let scene = SceneTables::new();
        let t0 = scene.transforms.insert(Transform::from_position(Vec3::X));
        let t1 = scene.transforms.insert(Transform::from_position(Vec3::Y));

        let c0 = scene.cameras.insert(CameraEntry {
            transform_addr: t1,
            ..Default::default()
        });
        let _inactive = scene.cameras.insert(CameraEntry::default());
        let c2 = scene.cameras.insert(CameraEntry {
            transform_addr: t0,
            ..Default::default()
        });

        let active = scene.active_cameras();
        assert_eq!(active.iter().map(|c| c.camera_addr).collect::<Vec<_>>(), vec![c0, c2]);
        assert_eq!(active[0].transform.position, Vec3::Y);

        // 解除绑定后不再 active
        scene.cameras.with_mut(c0, |c| c.transform_addr = INVALID_ADDRESS);
        assert_eq!(scene.active_cameras().len(), 1);
    }
}
