use halcyon_gfx::error::GfxResult;
use halcyon_scene::{bounds::Frustum, draw_batch::DrawBatchSet, scene::SceneFrame};

use crate::visibility::cull_executor::{CullExecutor, CullOptions, VisibilityStats};

/// 一帧内可见性计算所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityStage {
    #[default]
    Idle,
    BoundsUploaded,
    Culled,
    Compacted,
}

/// 每帧的可见性状态机：`Idle → BoundsUploaded → Culled → Compacted → Idle`
///
/// 真正的计算交给 [`CullExecutor`]，这里只负责顺序。乱序调用会 panic。
#[derive(Debug, Default)]
pub struct VisibilityPipeline {
    stage: VisibilityStage,
    options: CullOptions,
}

// new & init
impl VisibilityPipeline {
    pub fn new(options: CullOptions) -> Self {
        Self {
            stage: VisibilityStage::Idle,
            options,
        }
    }
}

// getters
impl VisibilityPipeline {
    #[inline]
    pub fn stage(&self) -> VisibilityStage {
        self.stage
    }

    #[inline]
    pub fn options(&self) -> CullOptions {
        self.options
    }

    #[inline]
    pub fn set_options(&mut self, options: CullOptions) {
        self.options = options;
    }
}

// update
impl VisibilityPipeline {
    pub fn upload_bounds(&mut self, executor: &mut dyn CullExecutor, frame: &SceneFrame) -> GfxResult<()> {
        let _span = tracy_client::span!("VisibilityPipeline::upload_bounds");
        self.expect_stage(VisibilityStage::Idle, "upload_bounds");
        executor.upload_bounds(frame)?;
        self.stage = VisibilityStage::BoundsUploaded;
        Ok(())
    }

    pub fn cull(&mut self, executor: &mut dyn CullExecutor, frustum: &Frustum) {
        let _span = tracy_client::span!("VisibilityPipeline::cull");
        self.expect_stage(VisibilityStage::BoundsUploaded, "cull");
        executor.cull(frustum, self.options);
        self.stage = VisibilityStage::Culled;
    }

    pub fn compact(&mut self, executor: &mut dyn CullExecutor, batches: &mut DrawBatchSet) -> GfxResult<()> {
        let _span = tracy_client::span!("VisibilityPipeline::compact");
        self.expect_stage(VisibilityStage::Culled, "compact");
        executor.compact(batches)?;
        self.stage = VisibilityStage::Compacted;
        Ok(())
    }

    pub fn finish(&mut self, executor: &mut dyn CullExecutor) -> VisibilityStats {
        self.expect_stage(VisibilityStage::Compacted, "finish");
        self.stage = VisibilityStage::Idle;
        executor.stats()
    }

    /// 录制中途出错时回到 Idle，下一帧重新开始
    pub fn reset(&mut self) {
        if self.stage != VisibilityStage::Idle {
            log::warn!("visibility pipeline reset from {:?}", self.stage);
        }
        self.stage = VisibilityStage::Idle;
    }

    fn expect_stage(&self, expected: VisibilityStage, call: &str) {
        assert_eq!(self.stage, expected, "visibility `{call}` called in stage {:?}", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use halcyon_render_interface::handles::PipelineHandle;
    use halcyon_scene::{
        importer::cube_mesh,
        scene::{Instance, Scene},
    };
    use slotmap::SlotMap;

    use super::*;
    use crate::visibility::cpu_executor::{
        CpuCullExecutor,
        tests::{frustum_at, host_meshes},
    };

    fn frustum() -> Frustum {
        frustum_at(Vec3::ZERO)
    }

    fn one_instance_scene() -> (Scene, DrawBatchSet) {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(4);
        scene
            .insert(&meshes, Instance::new(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)), cube, pipeline))
            .unwrap();
        let batches = DrawBatchSet::build(&scene, &meshes).unwrap();
        (scene, batches)
    }

    #[test]
    fn stages_run_in_order_and_return_to_idle() {
        let (scene, mut batches) = one_instance_scene();
        let mut executor = CpuCullExecutor::default();
        let mut pipeline = VisibilityPipeline::default();

        for _ in 0..2 {
            pipeline.upload_bounds(&mut executor, &scene.frame()).unwrap();
            assert_eq!(pipeline.stage(), VisibilityStage::BoundsUploaded);
            pipeline.cull(&mut executor, &frustum());
            pipeline.compact(&mut executor, &mut batches).unwrap();
            assert_eq!(pipeline.stage(), VisibilityStage::Compacted);
            let stats = pipeline.finish(&mut executor);
            assert_eq!(stats.visible_instances, 1);
            assert_eq!(pipeline.stage(), VisibilityStage::Idle);
        }
    }

    #[test]
    #[should_panic(expected = "visibility `compact` called in stage BoundsUploaded")]
    fn compact_before_cull_panics() {
        let (scene, mut batches) = one_instance_scene();
        let mut executor = CpuCullExecutor::default();
        let mut pipeline = VisibilityPipeline::default();
        pipeline.upload_bounds(&mut executor, &scene.frame()).unwrap();
        pipeline.compact(&mut executor, &mut batches).unwrap();
    }

    #[test]
    #[should_panic(expected = "visibility `cull` called in stage Idle")]
    fn cull_without_bounds_panics() {
        let mut executor = CpuCullExecutor::default();
        VisibilityPipeline::default().cull(&mut executor, &frustum());
    }

    #[test]
    fn reset_allows_a_new_frame() {
        let (scene, _) = one_instance_scene();
        let mut executor = CpuCullExecutor::default();
        let mut pipeline = VisibilityPipeline::default();
        pipeline.upload_bounds(&mut executor, &scene.frame()).unwrap();
        pipeline.reset();
        pipeline.upload_bounds(&mut executor, &scene.frame()).unwrap();
        assert_eq!(pipeline.stage(), VisibilityStage::BoundsUploaded);
    }
}
