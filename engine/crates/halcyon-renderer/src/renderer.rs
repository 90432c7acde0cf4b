use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec4};
use halcyon_gfx::{
    descriptors::bindless_layout::BindlessLimits,
    error::GfxError,
    resources::{
        buffer::{BufferRole, MemoryDomain},
        typed_buffer::GfxStorageBuffer,
    },
};
use halcyon_render_interface::{
    bindless_registry::{BindlessRegistry, Registered},
    config::{ConfigError, RendererConfig},
    gfx_bindless_sink::GfxBindlessSink,
    gfx_heap_storage::GfxHeapStorage,
    handles::PipelineHandle,
    pipeline_cache_store::PipelineCacheStore,
};
use halcyon_scene::{
    camera::{PerspectiveCamera, SharedCamera},
    draw_batch::DrawBatchSet,
    error::SceneError,
    importer::ImportedMesh,
    mesh::{MeshHandle, MeshManager},
    scene::{Instance, InstanceHandle, Scene},
};

use crate::{
    frame::{
        backend::FrameBackend,
        orchestrator::{FrameError, FrameOrchestrator, FrameOutcome},
        vulkan_backend::VulkanFrameBackend,
    },
    present::{presenter::Presenter, swapchain_presenter::SwapchainPresenter},
    render_stat::RenderStat,
    timer::FrameTimer,
    visibility::cull_executor::CullOptions,
};

#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// 默认材质参数，shader 通过 bindless storage buffer 读取
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct MaterialParams {
    base_color: Vec4,
}

/// 渲染器核心
///
/// 持有场景、mesh 堆、bindless 表和帧编排，`render` 每调用一次推进一帧。
/// 需要先调用 [`halcyon_gfx::gfx::Gfx::init`]。
///
/// # 销毁顺序
/// backend 等待 GPU 空闲并销毁，随后释放材质、bindless 表和 mesh 堆，最后销毁 descriptor set。
pub struct Renderer<P: Presenter> {
    config: RendererConfig,

    meshes: MeshManager<GfxHeapStorage>,
    scene: Scene,
    batches: DrawBatchSet,

    bindless: BindlessRegistry<GfxBindlessSink>,
    material: Registered<GfxStorageBuffer, GfxBindlessSink>,
    mesh_pipeline: PipelineHandle,

    orchestrator: FrameOrchestrator<VulkanFrameBackend<P>>,
    camera: SharedCamera,

    timer: FrameTimer,
    render_stat: RenderStat,
}

// new & init
impl<P: Presenter> Renderer<P> {
    pub fn new(config: RendererConfig, presenter: P) -> Result<Self, RendererError> {
        let _span = tracy_client::span!("Renderer::new");
        config.validate()?;

        let extent = presenter.extent();
        let sink = Arc::new(GfxBindlessSink::new(BindlessLimits::default(), config.frames_in_flight)?);
        let bindless = BindlessRegistry::new(config.bindless.initial_capacity, sink.clone());

        let material_buffer =
            GfxStorageBuffer::new(size_of::<MaterialParams>() as vk::DeviceSize, MemoryDomain::Upload, "default-material")?;
        material_buffer.write_by_mmap(
            &[MaterialParams {
                base_color: Vec4::new(0.8, 0.8, 0.8, 1.0),
            }],
            0,
        )?;
        let material = bindless.register(material_buffer)?;

        let mut backend = VulkanFrameBackend::new(
            presenter,
            sink,
            config.frames_in_flight,
            config.max_scene_instances,
            config.culling.work_group_size,
            PipelineCacheStore::new(&config.pipeline_cache_path),
        )?;
        let mesh_pipeline = backend.create_mesh_pipeline()?;
        backend.set_material_slot(material.slot().index());

        let meshes = MeshManager::new(
            GfxHeapStorage::new(BufferRole::Vertex, "vertex-heap"),
            GfxHeapStorage::new(BufferRole::Index, "index-heap"),
            &config.heap,
            config.vertex_heap_bytes,
            config.index_heap_bytes,
        )?;
        let scene = Scene::new(config.max_scene_instances);
        let batches = DrawBatchSet::build(&scene, &meshes)?;

        let mut camera = PerspectiveCamera::default();
        camera.set_aspect(extent.width, extent.height);

        let orchestrator = FrameOrchestrator::new(backend, &config);
        Ok(Self {
            config,
            meshes,
            scene,
            batches,
            bindless,
            material,
            mesh_pipeline,
            orchestrator,
            camera: SharedCamera::new(camera),
            timer: FrameTimer::default(),
            render_stat: RenderStat::default(),
        })
    }
}

impl Renderer<SwapchainPresenter> {
    /// 在窗口上创建渲染器，呈现模式取自 `config.present`
    pub fn with_window(
        config: RendererConfig,
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        window_extent: vk::Extent2D,
    ) -> Result<Self, RendererError> {
        config.validate()?;
        let presenter =
            SwapchainPresenter::new(raw_display_handle, raw_window_handle, window_extent, &config.present)?;
        Self::new(config, presenter)
    }
}

// getters
impl<P: Presenter> Renderer<P> {
    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    #[inline]
    pub fn meshes(&self) -> &MeshManager<GfxHeapStorage> {
        &self.meshes
    }

    /// 可以克隆后交给其他线程更新
    #[inline]
    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    #[inline]
    pub fn render_stat(&self) -> &RenderStat {
        &self.render_stat
    }

    #[inline]
    pub fn bindless(&self) -> &BindlessRegistry<GfxBindlessSink> {
        &self.bindless
    }

    #[inline]
    pub fn mesh_pipeline(&self) -> PipelineHandle {
        self.mesh_pipeline
    }
}

// update
impl<P: Presenter> Renderer<P> {
    pub fn add_mesh(&mut self, mesh: &ImportedMesh) -> Result<MeshHandle, SceneError> {
        self.meshes.add_mesh(mesh)
    }

    /// mesh 仍被 instance 引用时返回错误
    pub fn remove_mesh(&mut self, mesh: MeshHandle) -> Result<(), SceneError> {
        self.meshes.remove_mesh(mesh)
    }

    pub fn add_instance(&mut self, transform: Mat4, mesh: MeshHandle) -> Result<InstanceHandle, SceneError> {
        self.scene.insert(&self.meshes, Instance::new(transform, mesh, self.mesh_pipeline))
    }

    pub fn remove_instance(&mut self, handle: InstanceHandle) -> Result<Instance, SceneError> {
        self.scene.remove(&self.meshes, handle)
    }

    pub fn set_transform(&mut self, handle: InstanceHandle, transform: Mat4) -> Result<(), SceneError> {
        self.scene.set_transform(handle, transform)
    }

    pub fn set_cull_options(&mut self, options: CullOptions) {
        self.orchestrator.set_cull_options(options);
    }

    /// 窗口尺寸变化时调用，下一帧重建呈现目标
    pub fn resize(&mut self, extent: vk::Extent2D) {
        self.camera.update(|camera| camera.set_aspect(extent.width, extent.height));
        self.orchestrator.request_resize(extent);
    }

    /// 推进一帧
    ///
    /// acquire 时 swapchain 过期返回 [`FrameOutcome::Skipped`]，调用方直接进入下一次循环即可
    pub fn render(&mut self) -> Result<FrameOutcome, RendererError> {
        let _span = tracy_client::span!("Renderer::render");
        self.timer.tick();

        if self.batches.is_stale(&self.scene) {
            self.batches = DrawBatchSet::build(&self.scene, &self.meshes)?;
            log::debug!("draw batches rebuilt: {} batches", self.batches.len());
        }
        self.orchestrator.backend_mut().set_geometry(
            self.meshes.vertex_heap().storage().vk_buffer(),
            self.meshes.index_heap().storage().vk_buffer(),
        );

        let camera = self.camera.snapshot();
        let outcome = self.orchestrator.render_frame(&self.scene.frame(), &camera, &mut self.batches)?;

        if let FrameOutcome::Presented { frame_id, stats, .. } = outcome {
            self.orchestrator.apply_visibility(&mut self.scene);
            self.render_stat.frame_id = frame_id;
            self.render_stat.update_visibility(stats);
            self.render_stat.update_timing(&self.timer, self.orchestrator.backend().gpu_timings());
            self.update_geometry_stat();
        }
        Ok(outcome)
    }

    fn update_geometry_stat(&mut self) {
        let (vertices, triangles) = self
            .scene
            .iter()
            .filter_map(|(_, instance)| self.meshes.get(instance.mesh).ok())
            .fold((0u64, 0u64), |(v, t), mesh| (v + mesh.vertex_count as u64, t + mesh.triangle_count() as u64));
        self.render_stat.vertex_count = vertices;
        self.render_stat.triangle_count = triangles;
    }
}

// destroy
impl<P: Presenter> Renderer<P> {
    pub fn destroy(self) -> Result<(), RendererError> {
        let _span = tracy_client::span!("Renderer::destroy");
        let Self {
            orchestrator,
            material,
            bindless,
            meshes,
            ..
        } = self;

        let backend = orchestrator.into_backend();
        let sink = backend.destroy()?;
        drop(material);
        drop(bindless);
        drop(meshes);

        match Arc::try_unwrap(sink) {
            Ok(sink) => sink.destroy(),
            Err(sink) => log::warn!("bindless sink still has {} owners, descriptor sets leak", Arc::strong_count(&sink)),
        }
        Ok(())
    }
}
