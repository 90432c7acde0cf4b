use std::sync::atomic::{AtomicU32, Ordering};

use halcyon_gfx::error::GfxResult;
use halcyon_render_interface::gpu_types::GpuInstanceBound;
use halcyon_scene::{
    bounds::{Aabb, CullShape, Frustum},
    draw_batch::DrawBatchSet,
    scene::SceneFrame,
};
use itertools::Itertools;
use rayon::prelude::*;

use crate::visibility::cull_executor::{CullExecutor, CullOptions, VisibilityStats};

/// 在 CPU 上完成剔除和压缩，结果直接写回 [`DrawBatchSet`] 的 host 镜像
///
/// 与 `instance_compact.comp` 一样使用原子计数分配区域内的位置，
/// 所以同一个 command 内 instance 的先后顺序不固定。
#[derive(Debug, Default)]
pub struct CpuCullExecutor {
    bounds: Vec<GpuInstanceBound>,
    live: Vec<bool>,
    /// 每个槽位一个 0/1
    visibility: Vec<u32>,
    stats: VisibilityStats,
}

// tools
impl CpuCullExecutor {
    fn is_bound_visible(frustum: &Frustum, bound: &GpuInstanceBound, shape: CullShape) -> bool {
        let aabb = Aabb::new(bound.aabb_min.truncate(), bound.aabb_max.truncate());
        frustum.is_visible(&bound.transform, &aabb, shape)
    }
}

impl CullExecutor for CpuCullExecutor {
    fn upload_bounds(&mut self, frame: &SceneFrame) -> GfxResult<()> {
        self.bounds.clear();
        self.bounds.extend_from_slice(&frame.bounds);
        self.live.clear();
        self.live.extend_from_slice(&frame.live);

        self.stats = VisibilityStats {
            tested_instances: self.live.iter().filter(|live| **live).count() as u32,
            ..Default::default()
        };
        Ok(())
    }

    fn cull(&mut self, frustum: &Frustum, options: CullOptions) {
        let _span = tracy_client::span!("CpuCullExecutor::cull");
        self.visibility.resize(self.bounds.len(), 0);
        self.bounds.par_iter().zip(self.live.par_iter()).zip(self.visibility.par_iter_mut()).for_each(
            |((bound, live), visible)| {
                let is_visible =
                    *live && (!options.enabled || Self::is_bound_visible(frustum, bound, options.shape));
                *visible = is_visible as u32;
            },
        );
        self.stats.visible_instances = self.visibility.iter().sum();
    }

    fn compact(&mut self, batches: &mut DrawBatchSet) -> GfxResult<()> {
        let _span = tracy_client::span!("CpuCullExecutor::compact");
        let visibility = &self.visibility;
        let mut surviving_commands = 0;

        for batch in batches.batches_mut() {
            let instance_counts = (0..batch.commands().len()).map(|_| AtomicU32::new(0)).collect_vec();
            let visible_instances = (0..batch.instances().len()).map(|_| AtomicU32::new(0)).collect_vec();
            let counter = AtomicU32::new(0);

            let template = batch.template();
            batch.instances().par_iter().for_each(|instance| {
                if visibility.get(instance.instance_index as usize).copied().unwrap_or(0) == 0 {
                    return;
                }
                let command_index = instance.command_index as usize;
                let slot = instance_counts[command_index].fetch_add(1, Ordering::Relaxed);
                if slot == 0 {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                let target = template[command_index].first_instance + slot;
                visible_instances[target as usize].store(instance.instance_index, Ordering::Relaxed);
            });

            let instance_counts = instance_counts.into_iter().map(AtomicU32::into_inner).collect_vec();
            let visible_instances = visible_instances.into_iter().map(AtomicU32::into_inner).collect_vec();
            let counter = counter.into_inner();
            batch.commit_compaction(&instance_counts, visible_instances, counter);
            surviving_commands += counter;
        }

        self.stats.surviving_commands = surviving_commands;
        Ok(())
    }

    fn stats(&self) -> VisibilityStats {
        self.stats
    }

    /// 上一次 `cull` 的结果
    fn visibility(&self) -> &[u32] {
        &self.visibility
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::{Mat4, Vec3};
    use halcyon_render_interface::{config::HeapConfig, handles::PipelineHandle, heap_buffer::HostHeapStorage};
    use halcyon_scene::{
        importer::cube_mesh,
        mesh::MeshManager,
        scene::{Instance, Scene},
    };
    use slotmap::SlotMap;

    use super::*;
    use crate::visibility::pipeline::VisibilityPipeline;

    pub(crate) fn host_meshes() -> MeshManager<HostHeapStorage> {
        MeshManager::new(HostHeapStorage::default(), HostHeapStorage::default(), &HeapConfig::default(), 4096, 4096)
            .unwrap()
    }

    /// 位于 `eye`、看向 -Z 的相机
    pub(crate) fn frustum_at(eye: Vec3) -> Frustum {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(eye, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    fn at(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    fn run(executor: &mut CpuCullExecutor, scene: &Scene, batches: &mut DrawBatchSet, frustum: &Frustum) -> VisibilityStats {
        let mut pipeline = VisibilityPipeline::default();
        pipeline.upload_bounds(executor, &scene.frame()).unwrap();
        pipeline.cull(executor, frustum);
        pipeline.compact(executor, batches).unwrap();
        pipeline.finish(executor)
    }

    #[test]
    fn cull_is_conservative() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(8);
        // 完全在内部、跨越左平面、完全在相机后方、包住相机的巨大盒子
        let transforms = [
            at(0.0, 0.0, -10.0),
            at(-5.8, 0.0, -10.0),
            at(0.0, 0.0, 10.0),
            Mat4::from_scale(Vec3::splat(500.0)),
        ];
        for transform in transforms {
            scene.insert(&meshes, Instance::new(transform, cube, pipeline)).unwrap();
        }

        let mut executor = CpuCullExecutor::default();
        executor.upload_bounds(&scene.frame()).unwrap();
        executor.cull(&frustum_at(Vec3::ZERO), CullOptions::default());
        assert_eq!(executor.visibility(), &[1, 1, 0, 1]);
        assert_eq!(executor.stats().visible_instances, 3);
        assert_eq!(executor.stats().tested_instances, 4);

        // 包围球比盒子更保守：跨越平面的物体仍然可见
        executor.cull(
            &frustum_at(Vec3::ZERO),
            CullOptions {
                enabled: true,
                shape: CullShape::Sphere,
            },
        );
        assert_eq!(executor.visibility(), &[1, 1, 0, 1]);
    }

    #[test]
    fn disabled_culling_keeps_every_live_instance() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(8);
        let behind = scene.insert(&meshes, Instance::new(at(0.0, 0.0, 10.0), cube, pipeline)).unwrap();
        let removed = scene.insert(&meshes, Instance::new(at(0.0, 0.0, -10.0), cube, pipeline)).unwrap();
        scene.remove(&meshes, removed).unwrap();

        let mut executor = CpuCullExecutor::default();
        executor.upload_bounds(&scene.frame()).unwrap();
        executor.cull(
            &frustum_at(Vec3::ZERO),
            CullOptions {
                enabled: false,
                shape: CullShape::Aabb,
            },
        );
        // 墓碑槽位永远不可见
        assert_eq!(executor.visibility(), &[1, 0]);
        assert_eq!(executor.stats().tested_instances, 1);
        assert!(scene.get(behind).is_ok());
    }

    #[test]
    fn compaction_keeps_command_order_and_regions() {
        let mut meshes = host_meshes();
        let small = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let big = meshes.add_mesh(&cube_mesh(2.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(8);
        // small: 0, 2, 4；big: 1, 3
        let placements =
            [(small, -10.0), (big, -10.0), (small, 10.0), (big, 10.0), (small, -20.0)];
        for (mesh, z) in placements {
            scene.insert(&meshes, Instance::new(at(0.0, 0.0, z), mesh, pipeline)).unwrap();
        }
        let mut batches = DrawBatchSet::build(&scene, &meshes).unwrap();
        let template = batches.batches()[0].template().to_vec();

        let mut executor = CpuCullExecutor::default();
        let stats = run(&mut executor, &scene, &mut batches, &frustum_at(Vec3::ZERO));
        let batch = &batches.batches()[0];
        assert_eq!(batch.commands()[0].instance_count, 2);
        assert_eq!(batch.commands()[1].instance_count, 1);
        assert_eq!(batch.visible_of(0).iter().copied().sorted().collect_vec(), vec![0, 4]);
        assert_eq!(batch.visible_of(1), &[1]);
        assert_eq!(batch.counter(), 2);
        assert_eq!(stats.surviving_commands, 2);
        assert_eq!(stats.visible_instances, 3);

        // 相机转到 +Z 之后只剩 2 和 3，command 的顺序和区域不变
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::Z, Vec3::Y);
        let stats = run(&mut executor, &scene, &mut batches, &Frustum::from_view_projection(&(proj * view)));
        let batch = &batches.batches()[0];
        assert_eq!(batch.visible_of(0), &[2]);
        assert_eq!(batch.visible_of(1), &[3]);
        assert_eq!(stats.visible_instances, 2);
        for (cmd, template) in batch.commands().iter().zip(&template) {
            assert_eq!(cmd.first_instance, template.first_instance);
            assert_eq!(cmd.first_index, template.first_index);
            assert_eq!(cmd.vertex_offset, template.vertex_offset);
            assert_eq!(cmd.index_count, template.index_count);
        }
    }

    #[test]
    fn three_instances_with_a_moving_camera() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(3);
        for x in [0.0, 2.0, 60.0] {
            scene.insert(&meshes, Instance::new(at(x, 0.0, -10.0), cube, pipeline)).unwrap();
        }
        let mut batches = DrawBatchSet::build(&scene, &meshes).unwrap();
        let template = batches.batches()[0].template()[0];

        let mut executor = CpuCullExecutor::default();
        run(&mut executor, &scene, &mut batches, &frustum_at(Vec3::ZERO));
        let command = batches.batches()[0].commands()[0];
        assert_eq!(command.instance_count, 2);
        assert_eq!(batches.batches()[0].counter(), 1);

        // 相机退到所有 instance 的前方
        run(&mut executor, &scene, &mut batches, &frustum_at(Vec3::new(0.0, 0.0, -50.0)));
        let command = batches.batches()[0].commands()[0];
        assert_eq!(command.instance_count, 0);
        assert_eq!(batches.batches()[0].counter(), 0);
        assert_eq!(command, template);
    }

    #[test]
    fn capacity_boundary_leaves_scene_unchanged() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(2);
        scene.insert(&meshes, Instance::new(at(0.0, 0.0, -10.0), cube, pipeline)).unwrap();
        scene.insert(&meshes, Instance::new(at(1.0, 0.0, -10.0), cube, pipeline)).unwrap();
        let revision = scene.revision();

        let err = scene.insert(&meshes, Instance::new(at(2.0, 0.0, -10.0), cube, pipeline));
        assert!(matches!(err, Err(halcyon_scene::error::SceneError::CapacityExceeded { capacity: 2 })));
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.revision(), revision);
        assert_eq!(meshes.get(cube).unwrap().instance_count(), 2);

        let mut batches = DrawBatchSet::build(&scene, &meshes).unwrap();
        let stats = run(&mut CpuCullExecutor::default(), &scene, &mut batches, &frustum_at(Vec3::ZERO));
        assert_eq!(stats.visible_instances, 2);
    }
}
