use std::{ffi::CStr, path::Path};

use ash::vk;

use crate::{
    commands::command_buffer::GfxCommandBuffer,
    error::GfxResult,
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    pipelines::{pipeline_cache::GfxPipelineCache, pipeline_layout::GfxPipelineLayout, shader::GfxShaderModule},
};

/// 泛型参数 P 表示 compute shader 的参数，以 push constant 的形式传入 shader
pub struct GfxComputePipeline<P: bytemuck::Pod> {
    pipeline: vk::Pipeline,
    pipeline_layout: GfxPipelineLayout,

    _phantom: std::marker::PhantomData<P>,
}
impl<P: bytemuck::Pod> GfxComputePipeline<P> {
    /// `specialization[i]` 是 `constant_id = i` 的特化常量，均为 32 位
    pub fn new(
        shader_path: &Path,
        entry_point: &CStr,
        specialization: &[u32],
        set_layouts: &[vk::DescriptorSetLayout],
        pipeline_cache: &GfxPipelineCache,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let shader_module = GfxShaderModule::new(shader_path)?;
        let map_entries = specialization_map(specialization.len());
        let specialization_info = vk::SpecializationInfo::default()
            .map_entries(&map_entries)
            .data(bytemuck::cast_slice(specialization));
        let mut stage_info = vk::PipelineShaderStageCreateInfo::default()
            .module(shader_module.handle())
            .stage(vk::ShaderStageFlags::COMPUTE)
            .name(entry_point);
        if !specialization.is_empty() {
            stage_info = stage_info.specialization_info(&specialization_info);
        }

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(size_of::<P>() as u32);
        let pipeline_layout =
            GfxPipelineLayout::new(set_layouts, std::slice::from_ref(&push_constant_range), debug_name)?;

        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(pipeline_layout.handle());
        let result = unsafe {
            Gfx::get().gfx_device().create_compute_pipelines(
                pipeline_cache.handle(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };
        shader_module.destroy();
        let pipeline = result.map_err(|(_, e)| e)?[0];

        let compute_pipeline = Self {
            pipeline,
            pipeline_layout,

            _phantom: std::marker::PhantomData,
        };
        Gfx::get().gfx_device().set_debug_name(&compute_pipeline, debug_name);
        Ok(compute_pipeline)
    }

    /// 绑定 pipeline、push constant、descriptor sets 后 dispatch
    pub fn exec(&self, cmd: &GfxCommandBuffer, params: &P, descriptor_sets: &[vk::DescriptorSet], group_cnt: glam::UVec3) {
        cmd.cmd_bind_pipeline(vk::PipelineBindPoint::COMPUTE, self.pipeline);
        cmd.cmd_push_constants(
            self.pipeline_layout.handle(),
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(params),
        );
        if !descriptor_sets.is_empty() {
            cmd.bind_descriptor_sets(vk::PipelineBindPoint::COMPUTE, self.pipeline_layout.handle(), 0, descriptor_sets);
        }
        cmd.cmd_dispatch(group_cnt);
    }

    pub fn destroy(self) {
        // drop
    }
}
/// 连续排列的 u32 特化常量，constant_id 从 0 开始
fn specialization_map(count: usize) -> Vec<vk::SpecializationMapEntry> {
    (0..count as u32)
        .map(|id| vk::SpecializationMapEntry {
            constant_id: id,
            offset: id * size_of::<u32>() as u32,
            size: size_of::<u32>(),
        })
        .collect()
}

impl<P: bytemuck::Pod> Drop for GfxComputePipeline<P> {
    fn drop(&mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_pipeline(self.pipeline, None);
        }
    }
}
impl<P: bytemuck::Pod> DebugType for GfxComputePipeline<P> {
    fn debug_type_name() -> &'static str {
        "GfxComputePipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialization_constants_are_packed_u32s() {
        let entries = specialization_map(2);
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[1].constant_id, entries[1].offset, entries[1].size), (1, 4, 4));
        assert!(specialization_map(0).is_empty());
    }
}
