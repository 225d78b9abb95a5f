//! 资源生成接口
//!
//! `generate_*` 返回稳定的 `u32` 地址；`destroy_*` 立即清除 liveness bit，
//! GPU 对象的销毁和地址的释放通过 deletion ring 延迟进行。

use std::sync::Arc;

use vesta_gfx::{GfxBuffer, GfxBufferUsage, GfxDevice, GfxExtent, GfxResult};
use vesta_utils::{handle_table::HandleTable, precondition};

use crate::{
    deletion_ring::{DeletionCategory, GpuDeletionRing},
    uniform_arena::PerCameraData,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Model,
    Texture,
    TextureSampler,
    RenderTexture,
    CameraBuffer,
    ShaderProgram,
    ComputePipeline,
    ParticleSystem,
}
impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Model,
        ResourceKind::Texture,
        ResourceKind::TextureSampler,
        ResourceKind::RenderTexture,
        ResourceKind::CameraBuffer,
        ResourceKind::ShaderProgram,
        ResourceKind::ComputePipeline,
        ResourceKind::ParticleSystem,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }

    pub fn deletion_category(self) -> DeletionCategory {
        match self {
            ResourceKind::Model | ResourceKind::CameraBuffer => DeletionCategory::Buffer,
            ResourceKind::Texture | ResourceKind::RenderTexture => DeletionCategory::Image,
            ResourceKind::TextureSampler => DeletionCategory::Sampler,
            ResourceKind::ShaderProgram => DeletionCategory::Shader,
            ResourceKind::ComputePipeline => DeletionCategory::Pipeline,
            ResourceKind::ParticleSystem => DeletionCategory::ParticleSystem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// 各类资源的描述
///
/// shader 的字节码对调度器是不透明的，只负责保存
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDesc {
    Model { vertex_count: u32, index_count: u32 },
    Texture { extent: GfxExtent, mip_levels: u32 },
    TextureSampler { filter: SamplerFilter, anisotropy: f32 },
    RenderTexture { extent: GfxExtent },
    CameraBuffer,
    ShaderProgram { stages: Vec<(ShaderStage, Vec<u8>)> },
    ComputePipeline { shader_addr: u32 },
    ParticleSystem { max_particles: u32, pipeline_addr: u32 },
}
impl ResourceDesc {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDesc::Model { .. } => ResourceKind::Model,
            ResourceDesc::Texture { .. } => ResourceKind::Texture,
            ResourceDesc::TextureSampler { .. } => ResourceKind::TextureSampler,
            ResourceDesc::RenderTexture { .. } => ResourceKind::RenderTexture,
            ResourceDesc::CameraBuffer => ResourceKind::CameraBuffer,
            ResourceDesc::ShaderProgram { .. } => ResourceKind::ShaderProgram,
            ResourceDesc::ComputePipeline { .. } => ResourceKind::ComputePipeline,
            ResourceDesc::ParticleSystem { .. } => ResourceKind::ParticleSystem,
        }
    }

    /// 需要的 GPU 内存：(size, usage)
    fn gpu_buffers(&self) -> Vec<(u64, GfxBufferUsage)> {
        const VERTEX_STRIDE: u64 = 32;
        const PARTICLE_STRIDE: u64 = 32;
        match self {
            ResourceDesc::Model {
                vertex_count,
                index_count,
            } => vec![
                (*vertex_count as u64 * VERTEX_STRIDE, GfxBufferUsage::STORAGE),
                (*index_count as u64 * 4, GfxBufferUsage::STORAGE),
            ],
            ResourceDesc::Texture { extent, mip_levels } => {
                // 完整 mip 链不超过基础层的 4/3
                let base = extent.rgba8_size() as u64;
                let size = if *mip_levels > 1 { base * 4 / 3 } else { base };
                vec![(size, GfxBufferUsage::STORAGE | GfxBufferUsage::TRANSFER_DST)]
            }
            ResourceDesc::RenderTexture { extent } => {
                vec![(extent.rgba8_size() as u64, GfxBufferUsage::STORAGE | GfxBufferUsage::TRANSFER_SRC)]
            }
            ResourceDesc::CameraBuffer => vec![(size_of::<PerCameraData>() as u64, GfxBufferUsage::UNIFORM)],
            ResourceDesc::ParticleSystem { max_particles, .. } => {
                vec![(*max_particles as u64 * PARTICLE_STRIDE, GfxBufferUsage::STORAGE)]
            }
            ResourceDesc::TextureSampler { .. }
            | ResourceDesc::ShaderProgram { .. }
            | ResourceDesc::ComputePipeline { .. } => vec![],
        }
    }
}

pub struct GpuResource {
    pub name: String,
    pub desc: ResourceDesc,
    pub buffers: Vec<GfxBuffer>,
}

/// 资源表
///
/// 每类资源一张 handle table，地址在同类资源中唯一
pub struct ResourceRegistry {
    device: Arc<dyn GfxDevice>,
    ring: Arc<GpuDeletionRing>,
    tables: Arc<[HandleTable<GpuResource>; 8]>,
}

// new & init
impl ResourceRegistry {
    pub fn new(device: Arc<dyn GfxDevice>, ring: Arc<GpuDeletionRing>) -> Self {
        let tables = ResourceKind::ALL.map(|kind| HandleTable::new(Self::table_name(kind)));
        Self {
            device,
            ring,
            tables: Arc::new(tables),
        }
    }

    fn table_name(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Model => "Model",
            ResourceKind::Texture => "Texture",
            ResourceKind::TextureSampler => "TextureSampler",
            ResourceKind::RenderTexture => "RenderTexture",
            ResourceKind::CameraBuffer => "CameraBuffer",
            ResourceKind::ShaderProgram => "ShaderProgram",
            ResourceKind::ComputePipeline => "ComputePipeline",
            ResourceKind::ParticleSystem => "ParticleSystem",
        }
    }

    /// shutdown 时调用，此时 deletion ring 已经 flush
    ///
    /// 仍然存活的资源打印警告后强制销毁
    pub fn destroy_all(&self) {
        for kind in ResourceKind::ALL {
            let leftovers = self.tables[kind.index()].drain();
            if !leftovers.is_empty() {
                log::warn!("{} {:?} resources outstanding at shutdown", leftovers.len(), kind);
            }
            for (_, resource) in leftovers {
                for buffer in resource.buffers {
                    self.device.destroy_buffer(buffer);
                }
            }
        }
    }
}

// generate & destroy
impl ResourceRegistry {
    pub fn generate(&self, name: &str, desc: ResourceDesc) -> GfxResult<u32> {
        let kind = desc.kind();
        let mut buffers = Vec::new();
        for (index, (size, usage)) in desc.gpu_buffers().into_iter().enumerate() {
            match self.device.create_buffer(size.max(1), usage, &format!("{name}-{index}")) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        self.device.destroy_buffer(buffer);
                    }
                    return Err(e);
                }
            }
        }

        let addr = self.tables[kind.index()].insert(GpuResource {
            name: name.to_string(),
            desc,
            buffers,
        });
        log::debug!("generate {:?} '{}' at {}", kind, name, addr);
        Ok(addr)
    }

    /// 立即对外不可见，GPU 对象在 deletion ring 到期后销毁，之后地址才会被复用
    ///
    /// 地址未知或者重复销毁属于前置条件违规
    pub fn destroy(&self, kind: ResourceKind, addr: u32) {
        if !self.tables[kind.index()].retire(addr) {
            return;
        }

        let tables = self.tables.clone();
        let device = self.device.clone();
        self.ring.push(kind.deletion_category(), move || {
            if let Some(resource) = tables[kind.index()].release(addr) {
                log::debug!("destroy {:?} '{}' at {}", kind, resource.name, addr);
                for buffer in resource.buffers {
                    device.destroy_buffer(buffer);
                }
            }
        });
    }

    pub fn generate_model(&self, name: &str, vertex_count: u32, index_count: u32) -> GfxResult<u32> {
        self.generate(
            name,
            ResourceDesc::Model {
                vertex_count,
                index_count,
            },
        )
    }
    pub fn destroy_model(&self, addr: u32) {
        self.destroy(ResourceKind::Model, addr)
    }

    pub fn generate_texture(&self, name: &str, extent: GfxExtent, mip_levels: u32) -> GfxResult<u32> {
        self.generate(name, ResourceDesc::Texture { extent, mip_levels })
    }
    pub fn destroy_texture(&self, addr: u32) {
        self.destroy(ResourceKind::Texture, addr)
    }

    pub fn generate_texture_sampler(&self, name: &str, filter: SamplerFilter, anisotropy: f32) -> GfxResult<u32> {
        self.generate(name, ResourceDesc::TextureSampler { filter, anisotropy })
    }
    pub fn destroy_texture_sampler(&self, addr: u32) {
        self.destroy(ResourceKind::TextureSampler, addr)
    }

    pub fn generate_render_texture(&self, name: &str, extent: GfxExtent) -> GfxResult<u32> {
        self.generate(name, ResourceDesc::RenderTexture { extent })
    }
    pub fn destroy_render_texture(&self, addr: u32) {
        self.destroy(ResourceKind::RenderTexture, addr)
    }

    pub fn generate_camera_buffer(&self, name: &str) -> GfxResult<u32> {
        self.generate(name, ResourceDesc::CameraBuffer)
    }
    pub fn destroy_camera_buffer(&self, addr: u32) {
        self.destroy(ResourceKind::CameraBuffer, addr)
    }

    pub fn generate_shader_program(&self, name: &str, stages: Vec<(ShaderStage, Vec<u8>)>) -> GfxResult<u32> {
        self.generate(name, ResourceDesc::ShaderProgram { stages })
    }
    pub fn destroy_shader_program(&self, addr: u32) {
        self.destroy(ResourceKind::ShaderProgram, addr)
    }

    pub fn generate_compute_pipeline(&self, name: &str, shader_addr: u32) -> GfxResult<u32> {
        precondition!(
            self.is_alive(ResourceKind::ShaderProgram, shader_addr),
            "compute pipeline '{name}' references dead shader program {shader_addr}"
        );
        self.generate(name, ResourceDesc::ComputePipeline { shader_addr })
    }
    pub fn destroy_compute_pipeline(&self, addr: u32) {
        self.destroy(ResourceKind::ComputePipeline, addr)
    }

    pub fn generate_particle_system(&self, name: &str, max_particles: u32, pipeline_addr: u32) -> GfxResult<u32> {
        precondition!(
            self.is_alive(ResourceKind::ComputePipeline, pipeline_addr),
            "particle system '{name}' references dead compute pipeline {pipeline_addr}"
        );
        self.generate(
            name,
            ResourceDesc::ParticleSystem {
                max_particles,
                pipeline_addr,
            },
        )
    }
    pub fn destroy_particle_system(&self, addr: u32) {
        self.destroy(ResourceKind::ParticleSystem, addr)
    }
}

/// 每帧交给 compute 录制的粒子系统快照
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystemView {
    pub addr: u32,
    pub name: String,
    pub max_particles: u32,
    pub pipeline_addr: u32,
    pub buffer: GfxBuffer,
}

// getters
impl ResourceRegistry {
    #[inline]
    pub fn is_alive(&self, kind: ResourceKind, addr: u32) -> bool {
        self.tables[kind.index()].is_alive(addr)
    }

    #[inline]
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.tables[kind.index()].len()
    }

    pub fn with<R>(&self, kind: ResourceKind, addr: u32, f: impl FnOnce(&GpuResource) -> R) -> Option<R> {
        self.tables[kind.index()].with(addr, f)
    }

    /// 按地址顺序返回所有存活的粒子系统
    pub fn particle_systems(&self) -> Vec<ParticleSystemView> {
        let mut views = Vec::new();
        self.tables[ResourceKind::ParticleSystem.index()].for_each_alive(|addr, resource| {
            if let (
                ResourceDesc::ParticleSystem {
                    max_particles,
                    pipeline_addr,
                },
                Some(buffer),
            ) = (&resource.desc, resource.buffers.first())
            {
                views.push(ParticleSystemView {
                    addr,
                    name: resource.name.clone(),
                    max_particles: *max_particles,
                    pipeline_addr: *pipeline_addr,
                    buffer: *buffer,
                });
            }
        });
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_gfx::null::NullDevice;

    fn registry() -> (Arc<NullDevice>, Arc<GpuDeletionRing>, ResourceRegistry) {
        let null = Arc::new(NullDevice::new());
        let ring = Arc::new(GpuDeletionRing::new(3));
        let registry = ResourceRegistry::new(null.clone(), ring.clone());
        (null, ring, registry)
    }

    #[test]
    fn test_destroy_is_deferred_by_ring() {
        let (null, ring, registry) = registry();
        let model = registry.generate_model("cube", 24, 36).unwrap();
        assert_eq!(null.live_objects().buffers, 2);

        ring.advance();
        registry.destroy_model(model);
        assert!(!registry.is_alive(ResourceKind::Model, model));
        assert_eq!(ring.pending_by_category().get(&DeletionCategory::Buffer), Some(&1));

        // 地址在 ring 到期之前不会被复用
        let other = registry.generate_model("sphere", 8, 8).unwrap();
        assert_ne!(other, model);

        ring.advance();
        ring.advance();
        assert_eq!(null.live_objects().buffers, 4);
        ring.advance();
        assert_eq!(null.live_objects().buffers, 2);
        assert_eq!(registry.generate_model("cone", 8, 8).unwrap(), model);
    }

    #[test]
    #[should_panic]
    fn test_double_destroy_is_precondition_violation() {
        let (_null, _ring, registry) = registry();
        let sampler = registry.generate_texture_sampler("linear", SamplerFilter::Linear, 16.0).unwrap();
        registry.destroy_texture_sampler(sampler);
        registry.destroy_texture_sampler(sampler);
    }

    #[test]
    fn test_particle_system_chain() {
        let (null, ring, registry) = registry();
        let shader = registry.generate_shader_program("sim", vec![(ShaderStage::Compute, vec![3, 2, 35, 7])]).unwrap();
        let pipeline = registry.generate_compute_pipeline("sim", shader).unwrap();
        let a = registry.generate_particle_system("sparks", 1024, pipeline).unwrap();
        let b = registry.generate_particle_system("smoke", 64, pipeline).unwrap();

        let views = registry.particle_systems();
        assert_eq!(views.iter().map(|v| v.addr).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(views[0].max_particles, 1024);

        registry.destroy_particle_system(a);
        assert_eq!(registry.particle_systems().len(), 1);

        ring.flush_all();
        registry.destroy_all();
        assert_eq!(null.live_objects().buffers, 0);
        assert_eq!(registry.live_count(ResourceKind::ComputePipeline), 0);
    }
}
