//! CPU 与 shader 共享的数据布局
//!
//! 所有结构体都是 std430 兼容的 POD，与 `engine/shader/src/common/gpu_types.glsl` 以及各 shader 的 push constant 一一对应。

use std::mem::offset_of;

use ash::vk;

/// 与 `VkDrawIndexedIndirectCommand` 的内存布局一致
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawIndexedIndirectCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirectCommand {
    pub const STRIDE: u32 = size_of::<Self>() as u32;
}

/// 每个 instance 的变换和物体空间包围盒，每帧上传一次
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuInstanceBound {
    pub transform: glam::Mat4,
    /// xyz 有效
    pub aabb_min: glam::Vec4,
    /// xyz 有效
    pub aabb_max: glam::Vec4,
}

/// batch 内一个 instance 的剔除元数据
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuBatchInstance {
    /// scene 中的 instance 下标
    pub instance_index: u32,
    /// 所属 mesh 在 batch 中的位置，也是 command 的下标
    pub command_index: u32,
}

/// 视锥体的 6 个平面，xyz 为归一化法线，w 为距离
pub type GpuFrustumPlanes = [[f32; 4]; 6];

/// `instance_cull.comp` 的 push constant
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CullPushConstants {
    pub planes: GpuFrustumPlanes,
    /// `GpuInstanceBound[]`
    pub bounds_addr: u64,
    /// `uint[]`，0 或 1
    pub visibility_addr: u64,
    pub instance_count: u32,
    /// 0 表示不剔除，所有 instance 可见
    pub cull_enabled: u32,
    /// 0: AABB，1: 包围球
    pub cull_shape: u32,
    pub _padding: u32,
}

/// `instance_compact.comp` 的 push constant，每个 batch 一次 dispatch
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompactPushConstants {
    /// `GpuBatchInstance[]`
    pub batch_instances_addr: u64,
    pub visibility_addr: u64,
    /// `DrawIndexedIndirectCommand[]`
    pub commands_addr: u64,
    /// `uint[]`
    pub visible_instances_addr: u64,
    /// `uint`，有存活 instance 的 command 数量
    pub counter_addr: u64,
    pub instance_count: u32,
    pub _padding: u32,
}

/// 绘制管线的 push constant
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawPushConstants {
    pub view_proj: glam::Mat4,
    pub bounds_addr: u64,
    pub visible_instances_addr: u64,
    /// bindless storage buffer 数组中材质参数的下标
    pub material_slot: u32,
    pub _padding: [u32; 3],
}

/// AoS 顶点：位置、法线、uv
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexPosNormalUv {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl VertexPosNormalUv {
    pub const STRIDE: u32 = size_of::<Self>() as u32;

    pub fn vertex_input_bindings() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: Self::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn vertex_input_attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(VertexPosNormalUv, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(VertexPosNormalUv, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(VertexPosNormalUv, uv) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_shader_side() {
        assert_eq!(size_of::<DrawIndexedIndirectCommand>(), 20);
        assert_eq!(size_of::<GpuInstanceBound>(), 96);
        assert_eq!(size_of::<GpuBatchInstance>(), 8);
        assert_eq!(size_of::<VertexPosNormalUv>(), 32);
        assert_eq!(offset_of!(CullPushConstants, bounds_addr), 96);
        // push constant 至少保证 128 字节
        assert_eq!(size_of::<CullPushConstants>(), 128);
        assert!(size_of::<CompactPushConstants>() <= 128);
        assert_eq!(size_of::<DrawPushConstants>(), 96);
    }
}
