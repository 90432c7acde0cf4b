use glam::{Mat4, Vec4};
use halcyon_render_interface::{gpu_types::GpuInstanceBound, handles::PipelineHandle, heap_buffer::HeapStorage};

use crate::{
    bounds::Aabb,
    error::SceneError,
    mesh::{MeshHandle, MeshManager},
};

/// instance 的句柄，槽位复用后旧句柄失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub transform: Mat4,
    pub mesh: MeshHandle,
    pub pipeline: PipelineHandle,
    /// 物体空间，插入时从 mesh 复制
    pub bound_box: Aabb,
    /// 上一帧的剔除结果
    pub visible: bool,
}

impl Instance {
    pub fn new(transform: Mat4, mesh: MeshHandle, pipeline: PipelineHandle) -> Self {
        Self {
            transform,
            mesh,
            pipeline,
            bound_box: Aabb::default(),
            visible: true,
        }
    }
}

struct InstanceSlot {
    generation: u32,
    /// None 表示墓碑，槽位在 free list 中
    instance: Option<Instance>,
}

/// 每帧上传给剔除阶段的数据，下标就是 instance 的槽位
#[derive(Debug, Default)]
pub struct SceneFrame {
    pub bounds: Vec<GpuInstanceBound>,
    pub live: Vec<bool>,
}

impl SceneFrame {
    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.bounds.len() as u32
    }
}

/// instance 的容器
///
/// 删除只会把槽位标记为墓碑并压入 free list，其余 instance 的下标不变
pub struct Scene {
    slots: Vec<InstanceSlot>,
    free_list: Vec<u32>,
    live_count: u32,
    capacity: u32,
    /// 每次增删 instance 都会增加，draw batch 据此判断是否需要重建
    revision: u64,
}

// new & init
impl Scene {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live_count: 0,
            capacity,
            revision: 0,
        }
    }
}

// getters
impl Scene {
    #[inline]
    pub fn len(&self) -> u32 {
        self.live_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 包括墓碑在内的槽位数量
    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, handle: InstanceHandle) -> Result<&Instance, SceneError> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.instance.as_ref())
            .ok_or(SceneError::StaleInstance)
    }

    pub fn get_mut(&mut self, handle: InstanceHandle) -> Result<&mut Instance, SceneError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.instance.as_mut())
            .ok_or(SceneError::StaleInstance)
    }

    /// 按槽位顺序遍历存活的 instance
    pub fn iter(&self) -> impl Iterator<Item = (InstanceHandle, &Instance)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.instance.as_ref().map(|instance| {
                (
                    InstanceHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    instance,
                )
            })
        })
    }
}

// tools
impl Scene {
    /// 超出容量时返回错误，场景不变
    pub fn insert<S: HeapStorage>(
        &mut self,
        meshes: &MeshManager<S>,
        mut instance: Instance,
    ) -> Result<InstanceHandle, SceneError> {
        if self.live_count >= self.capacity {
            return Err(SceneError::CapacityExceeded { capacity: self.capacity });
        }
        let mesh = meshes.get(instance.mesh)?;
        instance.bound_box = mesh.bound_box;
        mesh.add_instance();

        self.live_count += 1;
        self.revision += 1;
        let handle = match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.instance = Some(instance);
                InstanceHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(InstanceSlot {
                    generation: 0,
                    instance: Some(instance),
                });
                InstanceHandle {
                    index: self.slots.len() as u32 - 1,
                    generation: 0,
                }
            }
        };
        Ok(handle)
    }

    pub fn remove<S: HeapStorage>(
        &mut self,
        meshes: &MeshManager<S>,
        handle: InstanceHandle,
    ) -> Result<Instance, SceneError> {
        self.get(handle)?;
        let slot = &mut self.slots[handle.index as usize];
        let Some(instance) = slot.instance.take() else {
            return Err(SceneError::StaleInstance);
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.live_count -= 1;
        self.revision += 1;

        if let Ok(mesh) = meshes.get(instance.mesh) {
            mesh.remove_instance();
        }
        Ok(instance)
    }

    pub fn set_transform(&mut self, handle: InstanceHandle, transform: Mat4) -> Result<(), SceneError> {
        self.get_mut(handle)?.transform = transform;
        Ok(())
    }

    /// 把剔除结果写回 instance，下标是槽位；墓碑和超出范围的槽位不变
    pub fn apply_visibility(&mut self, visibility: &[u32]) {
        for (slot, visible) in self.slots.iter_mut().zip(visibility) {
            if let Some(instance) = slot.instance.as_mut() {
                instance.visible = *visible != 0;
            }
        }
    }

    /// 所有槽位的变换和包围盒；墓碑写入全零
    pub fn frame(&self) -> SceneFrame {
        let _span = tracy_client::span!("Scene::frame");
        let mut frame = SceneFrame {
            bounds: Vec::with_capacity(self.slots.len()),
            live: Vec::with_capacity(self.slots.len()),
        };
        for slot in &self.slots {
            match &slot.instance {
                Some(instance) => {
                    frame.bounds.push(GpuInstanceBound {
                        transform: instance.transform,
                        aabb_min: instance.bound_box.min.extend(1.0),
                        aabb_max: instance.bound_box.max.extend(1.0),
                    });
                    frame.live.push(true);
                }
                None => {
                    frame.bounds.push(GpuInstanceBound {
                        transform: Mat4::ZERO,
                        aabb_min: Vec4::ZERO,
                        aabb_max: Vec4::ZERO,
                    });
                    frame.live.push(false);
                }
            }
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use slotmap::SlotMap;

    use super::*;
    use crate::importer::cube_mesh;
    use crate::mesh::tests::host_meshes;

    fn pipeline() -> PipelineHandle {
        let mut pipelines = SlotMap::<PipelineHandle, ()>::with_key();
        pipelines.insert(())
    }

    #[test]
    fn insert_copies_mesh_bounds_and_counts_instances() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(2.0)).unwrap();
        let mut scene = Scene::new(8);

        let handle = scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, pipeline())).unwrap();
        assert_eq!(scene.get(handle).unwrap().bound_box.max, Vec3::ONE);
        assert_eq!(meshes.get(cube).unwrap().instance_count(), 1);
        assert_eq!(scene.len(), 1);
    }

    #[test]
    fn removal_tombstones_and_reuses_the_slot() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let mut scene = Scene::new(8);
        let p = pipeline();

        let a = scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap();
        let b = scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap();
        scene.remove(&meshes, a).unwrap();

        // b 的下标不变
        assert_eq!(b.index, 1);
        assert!(scene.get(b).is_ok());
        assert!(matches!(scene.get(a), Err(SceneError::StaleInstance)));
        assert!(matches!(scene.remove(&meshes, a), Err(SceneError::StaleInstance)));

        let frame = scene.frame();
        assert_eq!(frame.live, vec![false, true]);

        let c = scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap();
        assert_eq!(c.index, a.index);
        assert_ne!(c.generation, a.generation);
        assert_eq!(scene.slot_count(), 2);
        assert_eq!(meshes.get(cube).unwrap().instance_count(), 2);
    }

    #[test]
    fn capacity_boundary_leaves_scene_unchanged() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let mut scene = Scene::new(2);
        let p = pipeline();

        scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap();
        scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap();
        let revision = scene.revision();

        let err = scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap_err();
        assert!(matches!(err, SceneError::CapacityExceeded { capacity: 2 }));
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.slot_count(), 2);
        assert_eq!(scene.revision(), revision);
        assert_eq!(meshes.get(cube).unwrap().instance_count(), 2);
    }

    #[test]
    fn stale_mesh_is_rejected() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        meshes.remove_mesh(cube).unwrap();
        let mut scene = Scene::new(2);
        assert!(matches!(
            scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, pipeline())),
            Err(SceneError::StaleMesh)
        ));
        assert!(scene.is_empty());
    }

    #[test]
    fn frame_carries_transforms() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let mut scene = Scene::new(4);
        let handle = scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, pipeline())).unwrap();
        let moved = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        scene.set_transform(handle, moved).unwrap();

        let frame = scene.frame();
        assert_eq!(frame.instance_count(), 1);
        assert_eq!(frame.bounds[0].transform, moved);
        assert_eq!(frame.bounds[0].aabb_min, Vec4::new(-0.5, -0.5, -0.5, 1.0));
    }

    #[test]
    fn visibility_is_written_back_by_slot() {
        let mut meshes = host_meshes();
        let cube = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let mut scene = Scene::new(4);
        let p = pipeline();
        let handles = (0..3)
            .map(|_| scene.insert(&meshes, Instance::new(Mat4::IDENTITY, cube, p)).unwrap())
            .collect::<Vec<_>>();
        scene.remove(&meshes, handles[1]).unwrap();

        scene.apply_visibility(&[0, 1]);
        assert!(!scene.get(handles[0]).unwrap().visible);
        // 结果比槽位少时，多出的 instance 保持原值
        assert!(scene.get(handles[2]).unwrap().visible);

        scene.apply_visibility(&[1, 1, 0]);
        assert!(scene.get(handles[0]).unwrap().visible);
        assert!(!scene.get(handles[2]).unwrap().visible);
    }
}
