use std::marker::PhantomData;
use std::ops::Deref;

use ash::vk;

use crate::{
    error::GfxResult,
    resources::buffer::{BufferRole, GfxBuffer, GfxBufferDesc, MemoryDomain},
};

/// 编译期的 buffer 用途标记
pub trait BufferRoleMarker {
    const ROLE: BufferRole;
}

macro_rules! buffer_role {
    ($marker:ident, $alias:ident, $role:expr) => {
        pub struct $marker;
        impl BufferRoleMarker for $marker {
            const ROLE: BufferRole = $role;
        }
        pub type $alias = GfxRoleBuffer<$marker>;
    };
}

buffer_role!(VertexRole, GfxVertexBuffer, BufferRole::Vertex);
buffer_role!(IndexRole, GfxIndexBuffer, BufferRole::Index);
buffer_role!(StorageRole, GfxStorageBuffer, BufferRole::Storage);
buffer_role!(IndirectRole, GfxIndirectBuffer, BufferRole::Indirect);
buffer_role!(UniformRole, GfxUniformBuffer, BufferRole::Uniform);
buffer_role!(ReadbackRole, GfxReadbackBuffer, BufferRole::Readback);

/// 带用途标记的 [`GfxBuffer`]，不同用途的 buffer 不能互相传递
pub struct GfxRoleBuffer<R: BufferRoleMarker> {
    inner: GfxBuffer,
    _role: PhantomData<R>,
}

impl<R: BufferRoleMarker> GfxRoleBuffer<R> {
    pub fn new(size: vk::DeviceSize, memory: MemoryDomain, name: impl AsRef<str>) -> GfxResult<Self> {
        Ok(Self {
            inner: GfxBuffer::new(GfxBufferDesc::new(size, R::ROLE, memory), name)?,
            _role: PhantomData,
        })
    }

    /// 容纳 count 个 T 的 device local buffer
    pub fn new_device_array<T>(count: usize, name: impl AsRef<str>) -> GfxResult<Self> {
        let size = (count.max(1) * size_of::<T>()) as vk::DeviceSize;
        Self::new(size, MemoryDomain::Device, name)
    }

    #[inline]
    pub fn buffer(&self) -> &GfxBuffer {
        &self.inner
    }

    #[inline]
    pub fn destroy(self) {
        self.inner.destroy()
    }
}

impl<R: BufferRoleMarker> Deref for GfxRoleBuffer<R> {
    type Target = GfxBuffer;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_usage() {
        assert_eq!(<IndirectRole as BufferRoleMarker>::ROLE, BufferRole::Indirect);
        let usage = IndirectRole::ROLE.usage_flags();
        assert!(usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(!UniformRole::ROLE.usage_flags().contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert!(VertexRole::ROLE.usage_flags().contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(IndexRole::ROLE.usage_flags().contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }
}
