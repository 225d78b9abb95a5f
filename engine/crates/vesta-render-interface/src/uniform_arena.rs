use std::sync::Arc;

use glam::Mat4;
use itertools::Itertools;
use vesta_gfx::{GfxBuffer, GfxBufferUsage, GfxDevice, GfxResult};

use crate::scene::ActiveCamera;

/// 每个 camera 每帧上传一次的数据
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PerCameraData {
    pub view: Mat4,
    pub projection: Mat4,
    /// x, y, width, height
    pub viewport: [f32; 4],
    pub near: f32,
    pub far: f32,
    pub fov: f32,
    pub render_layers: u32,
}

impl PerCameraData {
    pub fn from_camera(camera: &ActiveCamera, aspect_ratio: f32) -> Self {
        let entry = &camera.entry;
        let viewport = entry.viewport;
        let aspect = (aspect_ratio * viewport.width / viewport.height.max(f32::EPSILON)).max(f32::EPSILON);
        Self {
            view: camera.transform.matrix().inverse(),
            projection: Mat4::perspective_rh(entry.fov, aspect, entry.near, entry.far),
            viewport: [viewport.x, viewport.y, viewport.width, viewport.height],
            near: entry.near,
            far: entry.far,
            fov: entry.fov,
            render_layers: entry.render_layers.bits(),
        }
    }
}

/// 每个 flight frame 每个录制单元一个 uniform buffer，数量随 camera 增长
///
/// 录制单元的序号与 `CmdAllocator` 一致，同一个 camera 的各个 pass 并行录制，互不共享 buffer
pub struct UniformArena {
    device: Arc<dyn GfxDevice>,
    frames: Vec<Vec<GfxBuffer>>,
}

// init & destroy
impl UniformArena {
    pub fn new(device: Arc<dyn GfxDevice>, fif_count: usize) -> Self {
        Self {
            device,
            frames: (0..fif_count).map(|_| Vec::new()).collect_vec(),
        }
    }

    /// 调用前需要 wait idle
    pub fn destroy(&mut self) {
        for buffer in self.frames.drain(..).flatten() {
            self.device.destroy_buffer(buffer);
        }
    }
}
impl Drop for UniformArena {
    fn drop(&mut self) {
        debug_assert!(
            self.frames.is_empty() || std::thread::panicking(),
            "UniformArena must be destroyed before being dropped"
        );
    }
}

impl UniformArena {
    /// 保证 `flight_index` 至少有 `unit_count` 个 buffer，只增不减
    pub fn ensure(&mut self, flight_index: usize, unit_count: usize) -> GfxResult<()> {
        let buffers = &mut self.frames[flight_index];
        while buffers.len() < unit_count {
            let name = format!("unit-ubo-{}-{}", flight_index, buffers.len());
            buffers.push(self.device.create_buffer(
                size_of::<PerCameraData>() as u64,
                GfxBufferUsage::UNIFORM,
                &name,
            )?);
        }
        Ok(())
    }

    /// 上一次使用该 buffer 的帧已经完成（fence 已经等待过）
    pub fn write(&self, flight_index: usize, unit_index: usize, data: &PerCameraData) -> GfxResult<()> {
        self.device.write_buffer(self.frames[flight_index][unit_index], 0, bytemuck::bytes_of(data))
    }

    #[inline]
    pub fn buffer(&self, flight_index: usize, unit_index: usize) -> GfxBuffer {
        self.frames[flight_index][unit_index]
    }

    #[inline]
    pub fn unit_count(&self, flight_index: usize) -> usize {
        self.frames[flight_index].len()
    }

    pub fn buffer_count(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{CameraEntry, Transform};
    use vesta_gfx::null::NullDevice;

    #[test]
    fn test_per_camera_data_layout() {
        assert_eq!(size_of::<PerCameraData>(), 160);
    }

    #[test]
    fn test_ensure_and_write() {
        let null = Arc::new(NullDevice::new());
        let mut arena = UniformArena::new(null.clone(), 2);
        arena.ensure(1, 2).unwrap();
        arena.ensure(1, 1).unwrap();
        assert_eq!(arena.buffer_count(), 2);
        assert_eq!(arena.unit_count(0), 0);
        assert_eq!(arena.unit_count(1), 2);

        let camera = ActiveCamera {
            camera_addr: 0,
            entry: CameraEntry {
                transform_addr: 0,
                near: 0.5,
                ..Default::default()
            },
            transform: Transform::default(),
        };
        let data = PerCameraData::from_camera(&camera, 16.0 / 9.0);
        arena.write(1, 1, &data).unwrap();

        let written = null.buffer_contents(arena.buffer(1, 1)).unwrap();
        assert_eq!(written, bytemuck::bytes_of(&data));
        assert_eq!(data.near, 0.5);

        arena.destroy();
        assert_eq!(null.live_objects().buffers, 0);
    }
}
