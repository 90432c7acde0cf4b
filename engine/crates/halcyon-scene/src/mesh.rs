use std::sync::atomic::{AtomicU32, Ordering};

use halcyon_render_interface::{
    config::HeapConfig,
    gpu_types::VertexPosNormalUv,
    heap_buffer::{HeapBuffer, HeapStorage},
};
use slotmap::SlotMap;

use crate::{bounds::Aabb, error::SceneError, importer::ImportedMesh};

slotmap::new_key_type! {
    pub struct MeshHandle;
}

/// 一个 mesh 在顶点堆和索引堆中的位置
///
/// 几何信息创建后不再改变；instance_count 是引用它的 instance 数量
#[derive(Debug)]
pub struct Mesh {
    /// 以顶点为单位
    pub vertex_offset: i32,
    pub vertex_count: u32,
    /// 以索引为单位
    pub first_index: u32,
    pub index_count: u32,
    /// 物体空间
    pub bound_box: Aabb,

    /// 顶点堆中的字节 offset
    pub vertex_alloc: u64,
    /// 索引堆中的字节 offset
    pub index_alloc: u64,

    instance_count: AtomicU32,
}

impl Mesh {
    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.instance_count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn add_instance(&self) {
        self.instance_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn remove_instance(&self) {
        let prev = self.instance_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "mesh instance count underflow");
    }

    #[inline]
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// mesh 的 arena，几何数据放在两个共享的堆中
pub struct MeshManager<S: HeapStorage> {
    meshes: SlotMap<MeshHandle, Mesh>,
    vertex_heap: HeapBuffer<S>,
    index_heap: HeapBuffer<S>,
}

// new & init
impl<S: HeapStorage> MeshManager<S> {
    pub fn new(
        vertex_storage: S,
        index_storage: S,
        heap: &HeapConfig,
        vertex_heap_bytes: u64,
        index_heap_bytes: u64,
    ) -> Result<Self, SceneError> {
        // 顶点堆至少按顶点大小对齐，offset 可以直接换算成顶点下标
        let vertex_desc = heap.buffer_desc(VertexPosNormalUv::STRIDE as u64, vertex_heap_bytes);
        let index_desc = heap.buffer_desc(size_of::<u32>() as u64, index_heap_bytes);
        Ok(Self {
            meshes: SlotMap::with_key(),
            vertex_heap: HeapBuffer::new(vertex_desc, vertex_storage)?,
            index_heap: HeapBuffer::new(index_desc, index_storage)?,
        })
    }
}

// getters
impl<S: HeapStorage> MeshManager<S> {
    pub fn get(&self, handle: MeshHandle) -> Result<&Mesh, SceneError> {
        self.meshes.get(handle).ok_or(SceneError::StaleMesh)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    #[inline]
    pub fn vertex_heap(&self) -> &HeapBuffer<S> {
        &self.vertex_heap
    }

    #[inline]
    pub fn index_heap(&self) -> &HeapBuffer<S> {
        &self.index_heap
    }
}

// tools
impl<S: HeapStorage> MeshManager<S> {
    pub fn add_mesh(&mut self, mesh: &ImportedMesh) -> Result<MeshHandle, SceneError> {
        let _span = tracy_client::span!("MeshManager::add_mesh");
        let stride = VertexPosNormalUv::STRIDE;
        if mesh.vertex_stride != stride {
            return Err(SceneError::VertexStrideMismatch {
                expected: stride,
                actual: mesh.vertex_stride,
            });
        }

        let vertex_count = (mesh.vertices.len() / stride as usize) as u32;
        let index_bytes = (mesh.indices.len() * size_of::<u32>()) as u64;

        let vertex_alloc = self.vertex_heap.allocate(mesh.vertices.len() as u64)?;
        let index_alloc = match self.index_heap.allocate(index_bytes) {
            Ok(offset) => offset,
            Err(e) => {
                self.vertex_heap.free(vertex_alloc);
                return Err(e.into());
            }
        };
        self.vertex_heap.write(&mesh.vertices, vertex_alloc)?;
        self.index_heap.write(&mesh.indices, index_alloc)?;

        let handle = self.meshes.insert(Mesh {
            vertex_offset: (vertex_alloc / stride as u64) as i32,
            vertex_count,
            first_index: (index_alloc / size_of::<u32>() as u64) as u32,
            index_count: mesh.indices.len() as u32,
            bound_box: mesh.bound_box,
            vertex_alloc,
            index_alloc,
            instance_count: AtomicU32::new(0),
        });
        log::debug!("mesh {:?}: {} vertices, {} indices", handle, vertex_count, mesh.indices.len());
        Ok(handle)
    }

    /// 仍被 instance 引用的 mesh 不能删除
    pub fn remove_mesh(&mut self, handle: MeshHandle) -> Result<(), SceneError> {
        let mesh = self.get(handle)?;
        let instances = mesh.instance_count();
        if instances > 0 {
            return Err(SceneError::MeshInUse { instances });
        }
        if let Some(mesh) = self.meshes.remove(handle) {
            self.vertex_heap.free(mesh.vertex_alloc);
            self.index_heap.free(mesh.index_alloc);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Vec3;
    use halcyon_render_interface::heap_buffer::{HeapGrowthPolicy, HostHeapStorage};

    use super::*;
    use crate::importer::cube_mesh;

    pub(crate) fn host_meshes() -> MeshManager<HostHeapStorage> {
        MeshManager::new(HostHeapStorage::default(), HostHeapStorage::default(), &HeapConfig::default(), 4096, 4096)
            .unwrap()
    }

    #[test]
    fn meshes_are_packed_into_shared_heaps() {
        let mut meshes = host_meshes();
        let a = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let b = meshes.add_mesh(&cube_mesh(2.0)).unwrap();

        let (a, b) = (meshes.get(a).unwrap(), meshes.get(b).unwrap());
        assert_eq!(a.vertex_offset, 0);
        assert_eq!(a.index_count, 36);
        assert_eq!(b.vertex_offset, a.vertex_count as i32);
        // 36 个索引 = 144 字节，已经是 16 的倍数
        assert_eq!(b.first_index, 36);
        assert_eq!(b.bound_box.max, Vec3::splat(1.0));
    }

    #[test]
    fn geometry_lands_in_the_heap() {
        let mut meshes = host_meshes();
        let cube = cube_mesh(1.0);
        let handle = meshes.add_mesh(&cube).unwrap();
        let mesh = meshes.get(handle).unwrap();
        let bytes = meshes.index_heap().storage().bytes();
        let start = mesh.index_alloc as usize;
        let stored: &[u32] = bytemuck::cast_slice(&bytes[start..start + 36 * 4]);
        assert_eq!(stored, cube.indices.as_slice());
    }

    #[test]
    fn removed_handle_is_stale() {
        let mut meshes = host_meshes();
        let handle = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        meshes.remove_mesh(handle).unwrap();
        assert!(matches!(meshes.get(handle), Err(SceneError::StaleMesh)));
        assert_eq!(meshes.vertex_heap().allocator().stats().live_allocations, 0);
    }

    #[test]
    fn mesh_in_use_is_kept() {
        let mut meshes = host_meshes();
        let handle = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        meshes.get(handle).unwrap().add_instance();
        assert!(matches!(meshes.remove_mesh(handle), Err(SceneError::MeshInUse { instances: 1 })));
    }

    #[test]
    fn wrong_stride_is_rejected() {
        let mut meshes = host_meshes();
        let mut cube = cube_mesh(1.0);
        cube.vertex_stride = 24;
        assert!(matches!(meshes.add_mesh(&cube), Err(SceneError::VertexStrideMismatch { expected: 32, actual: 24 })));
    }

    #[test]
    fn heap_config_sets_alignment_and_initial_size() {
        let heap = HeapConfig {
            alignment: 64,
            ..Default::default()
        };
        let mut meshes = MeshManager::new(HostHeapStorage::default(), HostHeapStorage::default(), &heap, 2048, 1024).unwrap();
        assert_eq!(meshes.vertex_heap().allocator().alignment(), 64);
        assert_eq!(meshes.index_heap().allocator().alignment(), 64);
        assert_eq!(meshes.vertex_heap().storage().capacity(), 2048);
        assert_eq!(meshes.index_heap().storage().capacity(), 1024);

        let a = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        let b = meshes.add_mesh(&cube_mesh(1.0)).unwrap();
        // 36 个索引 = 144 字节，按 64 对齐后第二个 mesh 从 192 字节开始
        assert_eq!(meshes.get(b).unwrap().first_index, 48);
        assert_eq!(meshes.get(b).unwrap().vertex_offset % 2, 0);
        assert_eq!(meshes.get(a).unwrap().vertex_offset, 0);
    }

    #[test]
    fn small_alignment_still_keeps_whole_vertices() {
        let heap = HeapConfig {
            alignment: 4,
            ..Default::default()
        };
        let meshes = MeshManager::new(HostHeapStorage::default(), HostHeapStorage::default(), &heap, 2048, 1024).unwrap();
        assert_eq!(meshes.vertex_heap().allocator().alignment(), VertexPosNormalUv::STRIDE as u64);
        assert_eq!(meshes.index_heap().allocator().alignment(), 4);
    }

    #[test]
    fn fixed_heap_reports_exhaustion() {
        let heap = HeapConfig {
            growth: HeapGrowthPolicy::Fixed,
            ..Default::default()
        };
        let mut meshes = MeshManager::new(HostHeapStorage::default(), HostHeapStorage::default(), &heap, 1024, 1024).unwrap();
        let cube = cube_mesh(1.0);
        meshes.add_mesh(&cube).unwrap();
        assert!(matches!(meshes.add_mesh(&cube), Err(SceneError::Heap(_))));
        assert_eq!(meshes.vertex_heap().storage().capacity(), 1024);
        assert_eq!(meshes.vertex_heap().allocator().stats().live_allocations, 1);
    }
}
