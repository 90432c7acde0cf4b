use ash::vk;
use halcyon_gfx::{
    commands::wait_timeout::WaitTimeout,
    error::{GfxError, GfxResult},
    swapchain::render_swapchain::PresentStatus,
};
use halcyon_render_interface::{config::RendererConfig, frame_counter::FrameCounter, pipeline_settings::FrameSlot};
use halcyon_scene::{
    camera::CameraSnapshot,
    draw_batch::DrawBatchSet,
    scene::{Scene, SceneFrame},
};

use crate::{
    frame::backend::FrameBackend,
    present::presenter::AcquiredImage,
    visibility::{
        cull_executor::{CullOptions, VisibilityStats},
        pipeline::VisibilityPipeline,
    },
};

/// 一帧依次经过的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    WaitPreviousFrame,
    AcquireImage,
    RecordCommands,
    Submit,
    Present,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{phase:?} timed out: {source}")]
    Timeout {
        phase: FramePhase,
        #[source]
        source: GfxError,
    },

    #[error("presentation surface lost during {0:?}")]
    SurfaceLost(FramePhase),

    #[error("{phase:?} failed: {source}")]
    Gfx {
        phase: FramePhase,
        #[source]
        source: GfxError,
    },
}

impl FrameError {
    pub fn at(phase: FramePhase, source: GfxError) -> Self {
        match source {
            GfxError::Timeout { .. } => Self::Timeout { phase, source },
            GfxError::SurfaceLost => Self::SurfaceLost(phase),
            source => Self::Gfx { phase, source },
        }
    }

    pub fn phase(&self) -> FramePhase {
        match self {
            Self::Timeout { phase, .. } | Self::Gfx { phase, .. } => *phase,
            Self::SurfaceLost(phase) => *phase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        frame_id: u64,
        image_index: u32,
        stats: VisibilityStats,
    },
    /// acquire 时 swapchain 已过期，本帧没有提交，帧序号不变
    Skipped,
}

/// 帧循环的状态机：WaitPreviousFrame → AcquireImage → RecordCommands → Submit → Present
pub struct FrameOrchestrator<B: FrameBackend> {
    backend: B,
    frame_counter: FrameCounter,
    visibility: VisibilityPipeline,

    /// 下一帧开始前需要以这个尺寸重建呈现目标
    pending_resize: Option<vk::Extent2D>,

    fence_timeout: WaitTimeout,
    acquire_timeout: WaitTimeout,
}

// new & init
impl<B: FrameBackend> FrameOrchestrator<B> {
    pub fn new(backend: B, config: &RendererConfig) -> Self {
        Self {
            backend,
            frame_counter: FrameCounter::new(0, config.frames_in_flight),
            visibility: VisibilityPipeline::new(CullOptions {
                enabled: config.culling.enabled,
                ..Default::default()
            }),
            pending_resize: None,
            fence_timeout: config.fence_timeout,
            acquire_timeout: config.acquire_timeout,
        }
    }
}

// getters
impl<B: FrameBackend> FrameOrchestrator<B> {
    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn pending_resize(&self) -> Option<vk::Extent2D> {
        self.pending_resize
    }

    #[inline]
    pub fn cull_options(&self) -> CullOptions {
        self.visibility.options()
    }

    #[inline]
    pub fn set_cull_options(&mut self, options: CullOptions) {
        self.visibility.set_options(options);
    }
}

// update
impl<B: FrameBackend> FrameOrchestrator<B> {
    /// 窗口尺寸变化时调用，下一帧开始时重建
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        self.pending_resize = Some(extent);
    }

    pub fn render_frame(
        &mut self,
        scene_frame: &SceneFrame,
        camera: &CameraSnapshot,
        batches: &mut DrawBatchSet,
    ) -> Result<FrameOutcome, FrameError> {
        let _span = tracy_client::span!("FrameOrchestrator::render_frame");
        let slot = self.frame_counter.frame_slot();

        self.backend
            .wait_frame_slot(slot, self.fence_timeout)
            .map_err(|e| FrameError::at(FramePhase::WaitPreviousFrame, e))?;

        if let Some(extent) = self.pending_resize.take() {
            log::info!("{} recreate targets {}x{}", self.frame_counter.frame_name(), extent.width, extent.height);
            self.backend.recreate_targets(extent).map_err(|e| FrameError::at(FramePhase::AcquireImage, e))?;
        }

        let status = self
            .backend
            .acquire(slot, self.acquire_timeout)
            .map_err(|e| FrameError::at(FramePhase::AcquireImage, e))?;
        let image = match status {
            PresentStatus::Ok(image) => image,
            PresentStatus::Suboptimal(image) => {
                self.mark_resize();
                image
            }
            PresentStatus::OutOfDate => {
                self.mark_resize();
                return Ok(FrameOutcome::Skipped);
            }
        };

        let stats = match self.record(slot, image, scene_frame, camera, batches) {
            Ok(stats) => stats,
            Err(e) => {
                self.visibility.reset();
                if let Err(abandon_err) = self.backend.abandon_frame(slot, image) {
                    log::error!("{} failed to abandon frame: {abandon_err}", self.frame_counter.frame_name());
                }
                // 图像没有呈现，重建后才会归还
                self.mark_resize();
                return Err(FrameError::at(FramePhase::RecordCommands, e));
            }
        };

        self.backend.submit(slot, image).map_err(|e| FrameError::at(FramePhase::Submit, e))?;

        let present = self.backend.present(image).map_err(|e| FrameError::at(FramePhase::Present, e))?;
        if present.needs_recreate() {
            self.mark_resize();
        }

        let frame_id = self.frame_counter.frame_id();
        self.frame_counter.next_frame();
        Ok(FrameOutcome::Presented {
            frame_id,
            image_index: image.index,
            stats,
        })
    }

    fn record(
        &mut self,
        slot: FrameSlot,
        image: AcquiredImage,
        scene_frame: &SceneFrame,
        camera: &CameraSnapshot,
        batches: &mut DrawBatchSet,
    ) -> GfxResult<VisibilityStats> {
        self.backend.begin_recording(slot, image)?;

        let executor = self.backend.cull_executor();
        self.visibility.upload_bounds(executor, scene_frame)?;
        self.visibility.cull(executor, &camera.frustum);
        self.visibility.compact(executor, batches)?;
        let stats = self.visibility.finish(executor);

        self.backend.record_draws(slot, image, camera.view_projection, batches)?;
        Ok(stats)
    }

    /// 把剔除执行器最新的可见性写回 instance 的 `visible`
    ///
    /// GPU 执行器的结果在 slot 轮转一圈后才读回，槽位在这期间可能被复用
    pub fn apply_visibility(&mut self, scene: &mut Scene) {
        scene.apply_visibility(self.backend.cull_executor().visibility());
    }

    /// 保留已经请求的尺寸，否则沿用当前尺寸
    fn mark_resize(&mut self) {
        if self.pending_resize.is_none() {
            self.pending_resize = Some(self.backend.extent());
        }
    }

    /// 消费 orchestrator，取回 backend 用于销毁
    pub fn into_backend(self) -> B {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use glam::{Mat4, Vec3};
    use halcyon_render_interface::handles::PipelineHandle;
    use halcyon_scene::{
        importer::cube_mesh,
        scene::{Instance, Scene},
    };
    use slotmap::SlotMap;

    use super::*;
    use crate::{
        frame::backend::GpuTimings,
        visibility::{
            cpu_executor::{
                CpuCullExecutor,
                tests::{frustum_at, host_meshes},
            },
            cull_executor::CullExecutor,
        },
    };

    /// 记录调用顺序的 backend，acquire/present/wait 的结果可以预先排队
    #[derive(Default)]
    struct MockBackend {
        calls: Vec<String>,
        extent: vk::Extent2D,
        executor: CpuCullExecutor,
        wait_results: VecDeque<GfxResult<()>>,
        acquire_results: VecDeque<PresentStatus<AcquiredImage>>,
        present_results: VecDeque<PresentStatus<()>>,
        fail_draws: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                ..Default::default()
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_frame_slot(&mut self, slot: FrameSlot, _timeout: WaitTimeout) -> GfxResult<()> {
            self.calls.push(format!("wait {slot}"));
            self.wait_results.pop_front().unwrap_or(Ok(()))
        }

        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn recreate_targets(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
            self.calls.push(format!("recreate {}x{}", extent.width, extent.height));
            self.extent = extent;
            Ok(())
        }

        fn acquire(&mut self, slot: FrameSlot, _timeout: WaitTimeout) -> GfxResult<PresentStatus<AcquiredImage>> {
            self.calls.push(format!("acquire {slot}"));
            Ok(self.acquire_results.pop_front().unwrap_or(PresentStatus::Ok(AcquiredImage {
                index: *slot as u32,
                signaled: true,
            })))
        }

        fn begin_recording(&mut self, slot: FrameSlot, _image: AcquiredImage) -> GfxResult<()> {
            self.calls.push(format!("begin {slot}"));
            Ok(())
        }

        fn cull_executor(&mut self) -> &mut dyn CullExecutor {
            &mut self.executor
        }

        fn record_draws(
            &mut self,
            slot: FrameSlot,
            _image: AcquiredImage,
            _view_projection: Mat4,
            batches: &DrawBatchSet,
        ) -> GfxResult<()> {
            if self.fail_draws {
                return Err(GfxError::OutOfMemory);
            }
            self.calls.push(format!("draw {slot} x{}", batches.len()));
            Ok(())
        }

        fn submit(&mut self, slot: FrameSlot, _image: AcquiredImage) -> GfxResult<()> {
            self.calls.push(format!("submit {slot}"));
            Ok(())
        }

        fn abandon_frame(&mut self, slot: FrameSlot, image: AcquiredImage) -> GfxResult<()> {
            self.calls.push(format!("abandon {slot} signaled={}", image.signaled));
            Ok(())
        }

        fn present(&mut self, image: AcquiredImage) -> GfxResult<PresentStatus<()>> {
            self.calls.push(format!("present {}", image.index));
            Ok(self.present_results.pop_front().unwrap_or(PresentStatus::Ok(())))
        }

        fn gpu_timings(&self) -> GpuTimings {
            GpuTimings::default()
        }
    }

    struct Fixture {
        scene: Scene,
        batches: DrawBatchSet,
        camera: CameraSnapshot,
    }

    fn fixture() -> Fixture {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(4);
        for z in [-5.0, 5.0] {
            scene.insert(&meshes, Instance::new(Mat4::from_translation(Vec3::new(0.0, 0.0, z)), cube, pipeline)).unwrap();
        }
        let batches = DrawBatchSet::build(&scene, &meshes).unwrap();
        let frustum = frustum_at(Vec3::ZERO);
        Fixture {
            scene,
            batches,
            camera: CameraSnapshot {
                view_projection: Mat4::IDENTITY,
                frustum,
            },
        }
    }

    fn orchestrator(backend: MockBackend) -> FrameOrchestrator<MockBackend> {
        FrameOrchestrator::new(backend, &RendererConfig::default())
    }

    fn render(orchestrator: &mut FrameOrchestrator<MockBackend>, fixture: &mut Fixture) -> Result<FrameOutcome, FrameError> {
        orchestrator.render_frame(&fixture.scene.frame(), &fixture.camera, &mut fixture.batches)
    }

    #[test]
    fn phases_run_in_order_and_slots_rotate() {
        let mut fixture = fixture();
        let mut orchestrator = orchestrator(MockBackend::new());

        let outcome = render(&mut orchestrator, &mut fixture).unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                frame_id: 0,
                image_index: 0,
                stats: VisibilityStats {
                    tested_instances: 2,
                    visible_instances: 1,
                    surviving_commands: 1,
                },
            }
        );
        render(&mut orchestrator, &mut fixture).unwrap();
        render(&mut orchestrator, &mut fixture).unwrap();

        let calls = &orchestrator.backend().calls;
        assert_eq!(
            calls[..6],
            ["wait A", "acquire A", "begin A", "draw A x1", "submit A", "present 0"]
        );
        assert_eq!(calls[6], "wait B");
        assert_eq!(calls[12], "wait A");
        assert_eq!(orchestrator.frame_counter().frame_id(), 3);
    }

    #[test]
    fn out_of_date_acquire_skips_and_recreates_next_frame() {
        let mut fixture = fixture();
        let mut backend = MockBackend::new();
        backend.acquire_results.push_back(PresentStatus::OutOfDate);
        let mut orchestrator = orchestrator(backend);

        assert_eq!(render(&mut orchestrator, &mut fixture).unwrap(), FrameOutcome::Skipped);
        assert_eq!(orchestrator.frame_counter().frame_id(), 0);
        assert_eq!(orchestrator.pending_resize(), Some(vk::Extent2D { width: 800, height: 600 }));
        assert_eq!(orchestrator.backend().calls, ["wait A", "acquire A"]);

        let outcome = render(&mut orchestrator, &mut fixture).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { frame_id: 0, .. }));
        assert_eq!(orchestrator.backend().calls[2..4], ["wait A", "recreate 800x600"]);
        assert_eq!(orchestrator.pending_resize(), None);
    }

    #[test]
    fn suboptimal_present_recreates_before_next_acquire() {
        let mut fixture = fixture();
        let mut backend = MockBackend::new();
        backend.present_results.push_back(PresentStatus::Suboptimal(()));
        let mut orchestrator = orchestrator(backend);

        render(&mut orchestrator, &mut fixture).unwrap();
        assert!(orchestrator.pending_resize().is_some());
        render(&mut orchestrator, &mut fixture).unwrap();
        assert_eq!(orchestrator.backend().calls[6..9], ["wait B", "recreate 800x600", "acquire B"]);
    }

    #[test]
    fn requested_resize_wins_over_current_extent() {
        let mut fixture = fixture();
        let mut backend = MockBackend::new();
        backend.acquire_results.push_back(PresentStatus::OutOfDate);
        let mut orchestrator = orchestrator(backend);

        orchestrator.request_resize(vk::Extent2D {
            width: 1024,
            height: 768,
        });
        // 第一帧先消费请求的尺寸，acquire 过期后再按当前尺寸重建
        assert_eq!(render(&mut orchestrator, &mut fixture).unwrap(), FrameOutcome::Skipped);
        assert_eq!(orchestrator.backend().calls[1], "recreate 1024x768");
        assert_eq!(orchestrator.pending_resize(), Some(vk::Extent2D { width: 1024, height: 768 }));
    }

    #[test]
    fn fence_timeout_is_reported_with_its_phase() {
        let mut fixture = fixture();
        let mut backend = MockBackend::new();
        backend.wait_results.push_back(Err(GfxError::Timeout {
            what: "frame fence",
            timeout_ns: 1_000_000,
        }));
        let mut orchestrator = orchestrator(backend);

        let err = render(&mut orchestrator, &mut fixture).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Timeout {
                phase: FramePhase::WaitPreviousFrame,
                ..
            }
        ));
        assert_eq!(orchestrator.frame_counter().frame_id(), 0);

        // 超时可以重试
        assert!(render(&mut orchestrator, &mut fixture).is_ok());
    }

    #[test]
    fn record_failure_resets_visibility_for_the_next_frame() {
        let mut fixture = fixture();
        let mut backend = MockBackend::new();
        backend.fail_draws = true;
        let mut orchestrator = orchestrator(backend);

        let err = render(&mut orchestrator, &mut fixture).unwrap_err();
        assert_eq!(err.phase(), FramePhase::RecordCommands);
        assert!(!orchestrator.backend().calls.iter().any(|c| c.starts_with("submit")));

        orchestrator.backend_mut().fail_draws = false;
        assert!(render(&mut orchestrator, &mut fixture).is_ok());
    }

    #[test]
    fn record_failure_consumes_the_acquire_semaphore() {
        let mut fixture = fixture();
        let mut backend = MockBackend::new();
        backend.fail_draws = true;
        let mut orchestrator = orchestrator(backend);

        render(&mut orchestrator, &mut fixture).unwrap_err();
        assert_eq!(
            orchestrator.backend().calls,
            ["wait A", "acquire A", "begin A", "abandon A signaled=true"]
        );
        assert_eq!(orchestrator.frame_counter().frame_id(), 0);
        assert!(orchestrator.pending_resize().is_some());

        // 同一个 slot 重新等待，先重建再 acquire
        orchestrator.backend_mut().fail_draws = false;
        render(&mut orchestrator, &mut fixture).unwrap();
        assert_eq!(orchestrator.backend().calls[4..7], ["wait A", "recreate 800x600", "acquire A"]);
    }

    #[test]
    fn presented_frame_visibility_lands_on_instances() {
        let mut fixture = fixture();
        let mut orchestrator = orchestrator(MockBackend::new());
        let handles = fixture.scene.iter().map(|(handle, _)| handle).collect::<Vec<_>>();
        assert!(handles.iter().all(|h| fixture.scene.get(*h).unwrap().visible));

        render(&mut orchestrator, &mut fixture).unwrap();
        orchestrator.apply_visibility(&mut fixture.scene);

        // 相机在原点看向 -Z，z = 5 的 instance 在身后
        let visible = handles.iter().map(|h| fixture.scene.get(*h).unwrap().visible).collect::<Vec<_>>();
        assert_eq!(visible, [true, false]);
    }

    #[test]
    fn surface_loss_maps_to_its_own_variant() {
        assert!(matches!(
            FrameError::at(FramePhase::Present, GfxError::SurfaceLost),
            FrameError::SurfaceLost(FramePhase::Present)
        ));
        assert!(matches!(
            FrameError::at(FramePhase::Submit, GfxError::OutOfMemory),
            FrameError::Gfx {
                phase: FramePhase::Submit,
                source: GfxError::OutOfMemory
            }
        ));
    }
}
