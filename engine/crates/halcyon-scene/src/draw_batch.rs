use std::collections::{BTreeMap, HashMap};

use halcyon_render_interface::{
    gpu_types::{DrawIndexedIndirectCommand, GpuBatchInstance},
    handles::PipelineHandle,
    heap_buffer::HeapStorage,
};
use itertools::Itertools;

use crate::{error::SceneError, mesh::MeshHandle, mesh::MeshManager, scene::Scene};

/// 使用同一个图形管线的所有绘制
///
/// mesh 在列表中的位置就是它的 command 下标，每帧保持不变。
/// 每个 command 在 visible_instances 中有一段固定区域，起点是 `first_instance`。
#[derive(Debug, Clone)]
pub struct DrawBatch {
    pipeline: PipelineHandle,
    meshes: Vec<MeshHandle>,
    /// instance_count 为 0 的模板，每帧从这里复制
    template: Vec<DrawIndexedIndirectCommand>,
    commands: Vec<DrawIndexedIndirectCommand>,
    instances: Vec<GpuBatchInstance>,
    visible_instances: Vec<u32>,
    /// 至少有一个存活 instance 的 command 数量
    counter: u32,
}

// getters
impl DrawBatch {
    #[inline]
    pub fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }

    #[inline]
    pub fn meshes(&self) -> &[MeshHandle] {
        &self.meshes
    }

    #[inline]
    pub fn template(&self) -> &[DrawIndexedIndirectCommand] {
        &self.template
    }

    #[inline]
    pub fn commands(&self) -> &[DrawIndexedIndirectCommand] {
        &self.commands
    }

    #[inline]
    pub fn instances(&self) -> &[GpuBatchInstance] {
        &self.instances
    }

    #[inline]
    pub fn visible_instances(&self) -> &[u32] {
        &self.visible_instances
    }

    #[inline]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// 这个 command 本帧可见的 instance 下标
    pub fn visible_of(&self, command_index: usize) -> &[u32] {
        let cmd = &self.commands[command_index];
        let start = cmd.first_instance as usize;
        &self.visible_instances[start..start + cmd.instance_count as usize]
    }
}

// tools
impl DrawBatch {
    /// 回到模板状态：所有 instance_count 和计数器清零
    pub fn reset(&mut self) {
        self.commands.copy_from_slice(&self.template);
        self.counter = 0;
    }

    /// 写入一次 compaction 的结果
    ///
    /// # Panics
    /// 数组长度与 batch 不一致，或者某个 command 的 instance 数量超出了它的区域
    pub fn commit_compaction(&mut self, instance_counts: &[u32], visible_instances: Vec<u32>, counter: u32) {
        assert_eq!(instance_counts.len(), self.commands.len(), "one instance count per command");
        assert_eq!(visible_instances.len(), self.visible_instances.len(), "visible instance buffer size changed");
        assert!(counter as usize <= self.commands.len(), "counter exceeds command count");

        for (idx, (cmd, count)) in self.commands.iter_mut().zip(instance_counts).enumerate() {
            let region = self.template.get(idx + 1).map_or(self.instances.len() as u32, |next| next.first_instance)
                - cmd.first_instance;
            assert!(*count <= region, "command {idx} has {count} survivors in a region of {region}");
            cmd.instance_count = *count;
        }
        self.visible_instances = visible_instances;
        self.counter = counter;
    }
}

/// 所有管线的 draw batch
#[derive(Debug, Default)]
pub struct DrawBatchSet {
    batches: Vec<DrawBatch>,
    /// 构建时场景的 revision
    scene_revision: Option<u64>,
}

// new & init
impl DrawBatchSet {
    /// 按管线分组；管线按句柄排序，batch 内的 mesh 按第一次出现的顺序排列
    pub fn build<S: HeapStorage>(scene: &Scene, meshes: &MeshManager<S>) -> Result<Self, SceneError> {
        let _span = tracy_client::span!("DrawBatchSet::build");

        // pipeline -> [(mesh, [instance index])]
        let mut groups: BTreeMap<PipelineHandle, (Vec<(MeshHandle, Vec<u32>)>, HashMap<MeshHandle, usize>)> =
            BTreeMap::new();
        for (handle, instance) in scene.iter() {
            let (entries, positions) = groups.entry(instance.pipeline).or_default();
            let position = *positions.entry(instance.mesh).or_insert_with(|| {
                entries.push((instance.mesh, Vec::new()));
                entries.len() - 1
            });
            entries[position].1.push(handle.index);
        }

        let batches = groups
            .into_iter()
            .map(|(pipeline, (entries, _))| {
                let mut template = Vec::with_capacity(entries.len());
                let mut instances = Vec::new();
                for (command_index, (mesh_handle, instance_indices)) in entries.iter().enumerate() {
                    let mesh = meshes.get(*mesh_handle)?;
                    template.push(DrawIndexedIndirectCommand {
                        index_count: mesh.index_count,
                        instance_count: 0,
                        first_index: mesh.first_index,
                        vertex_offset: mesh.vertex_offset,
                        first_instance: instances.len() as u32,
                    });
                    instances.extend(instance_indices.iter().map(|instance_index| GpuBatchInstance {
                        instance_index: *instance_index,
                        command_index: command_index as u32,
                    }));
                }
                Ok(DrawBatch {
                    pipeline,
                    meshes: entries.into_iter().map(|(mesh, _)| mesh).collect_vec(),
                    commands: template.clone(),
                    template,
                    visible_instances: vec![0; instances.len()],
                    instances,
                    counter: 0,
                })
            })
            .collect::<Result<Vec<_>, SceneError>>()?;

        log::debug!("built {} draw batches from {} instances", batches.len(), scene.len());
        Ok(Self {
            batches,
            scene_revision: Some(scene.revision()),
        })
    }
}

// getters
impl DrawBatchSet {
    #[inline]
    pub fn batches(&self) -> &[DrawBatch] {
        &self.batches
    }

    #[inline]
    pub fn batches_mut(&mut self) -> &mut [DrawBatch] {
        &mut self.batches
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// 构建时场景的 revision，GPU 侧据此判断是否需要重新上传
    #[inline]
    pub fn scene_revision(&self) -> Option<u64> {
        self.scene_revision
    }

    pub fn is_stale(&self, scene: &Scene) -> bool {
        self.scene_revision != Some(scene.revision())
    }

    pub fn total_instances(&self) -> usize {
        self.batches.iter().map(|b| b.instances.len()).sum()
    }

    pub fn total_commands(&self) -> usize {
        self.batches.iter().map(|b| b.commands.len()).sum()
    }

    pub fn surviving_commands(&self) -> u32 {
        self.batches.iter().map(|b| b.counter).sum()
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;
    use slotmap::SlotMap;

    use super::*;
    use crate::{importer::cube_mesh, mesh::tests::host_meshes, scene::Instance};

    #[test]
    fn instances_are_grouped_by_pipeline_then_mesh() {
        let mut meshes = host_meshes();
        let small = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let big = meshes.add_mesh(&cube_mesh(4.0)).unwrap();
        let mut pipelines = SlotMap::<PipelineHandle, ()>::with_key();
        let (opaque, wire) = (pipelines.insert(()), pipelines.insert(()));

        let mut scene = Scene::new(16);
        for (mesh, pipeline) in [(big, opaque), (small, opaque), (big, opaque), (small, wire), (big, opaque)] {
            scene.insert(&meshes, Instance::new(Mat4::IDENTITY, mesh, pipeline)).unwrap();
        }

        let set = DrawBatchSet::build(&scene, &meshes).unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.is_stale(&scene));

        let batch = set.batches().iter().find(|b| b.pipeline() == opaque).unwrap();
        assert_eq!(batch.meshes(), &[big, small]);
        assert_eq!(batch.commands().len(), batch.meshes().len());
        // big 有 3 个 instance，small 有 1 个
        assert_eq!(batch.template()[0].first_instance, 0);
        assert_eq!(batch.template()[1].first_instance, 3);
        assert_eq!(batch.template()[1].first_index, meshes.get(small).unwrap().first_index);
        assert!(batch.template().iter().all(|c| c.instance_count == 0));
        assert_eq!(
            batch.instances().iter().map(|i| (i.instance_index, i.command_index)).collect_vec(),
            vec![(0, 0), (2, 0), (4, 0), (1, 1)]
        );
        assert_eq!(set.total_instances(), 5);
    }

    #[test]
    fn scene_changes_make_the_set_stale() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(4);
        let set = DrawBatchSet::build(&scene, &meshes).unwrap();
        assert!(set.is_empty());

        scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, pipeline)).unwrap();
        assert!(set.is_stale(&scene));
    }

    #[test]
    fn commit_and_reset() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(4);
        for _ in 0..3 {
            scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, pipeline)).unwrap();
        }
        let mut set = DrawBatchSet::build(&scene, &meshes).unwrap();
        let batch = &mut set.batches_mut()[0];

        batch.commit_compaction(&[2], vec![2, 0, 0], 1);
        assert_eq!(batch.visible_of(0), &[2, 0]);
        assert_eq!(batch.counter(), 1);

        batch.reset();
        assert_eq!(batch.commands(), batch.template());
        assert_eq!(batch.counter(), 0);
    }

    #[test]
    #[should_panic(expected = "survivors in a region")]
    fn commit_past_region_panics() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let pipeline = SlotMap::<PipelineHandle, ()>::with_key().insert(());
        let mut scene = Scene::new(4);
        scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, pipeline)).unwrap();
        let mut set = DrawBatchSet::build(&scene, &meshes).unwrap();
        set.batches_mut()[0].commit_compaction(&[2], vec![0], 1);
    }
}
