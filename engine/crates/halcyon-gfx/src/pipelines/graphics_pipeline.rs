use std::{ffi::CStr, path::PathBuf, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::GfxResult,
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
    pipelines::{pipeline_cache::GfxPipelineCache, pipeline_layout::GfxPipelineLayout, shader::GfxShaderModule},
};

pub struct GfxShaderStageInfo {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: &'static CStr,
    pub path: PathBuf,
}

pub struct GfxGraphicsPipeline {
    pipeline: vk::Pipeline,

    /// 多个 pipeline 可以使用同一个 pipeline layout
    pipeline_layout: Rc<GfxPipelineLayout>,
}
impl GfxGraphicsPipeline {
    pub fn new(
        create_info: &GfxGraphicsPipelineCreateInfo,
        pipeline_layout: Rc<GfxPipelineLayout>,
        pipeline_cache: &GfxPipelineCache,
        debug_name: &str,
    ) -> GfxResult<Self> {
        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&create_info.color_attach_formats)
            .depth_attachment_format(create_info.depth_attach_format);

        let shader_modules: Vec<GfxShaderModule> =
            create_info.shader_stages.iter().map(|stage| GfxShaderModule::new(&stage.path)).collect::<GfxResult<_>>()?;
        let shader_stages_info = create_info
            .shader_stages
            .iter()
            .zip(shader_modules.iter())
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(module.handle())
                    .name(stage.entry_point)
            })
            .collect_vec();

        let vertex_input_state_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&create_info.vertex_binding_desc)
            .vertex_attribute_descriptions(&create_info.vertex_attribute_desc);

        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo {
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };

        let rasterize_state_info = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(create_info.cull_mode)
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let msaa_info =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_states = create_info
            .color_attach_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_states);

        let depth_enabled = create_info.depth_attach_format != vk::Format::UNDEFINED;
        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(depth_enabled)
            .depth_write_enable(depth_enabled)
            .depth_compare_op(vk::CompareOp::LESS);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages_info)
            .vertex_input_state(&vertex_input_state_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_state_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .layout(pipeline_layout.handle())
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut attach_info);

        let gfx_device = Gfx::get().gfx_device();
        let result = unsafe {
            gfx_device.create_graphics_pipelines(
                pipeline_cache.handle(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        };
        shader_modules.into_iter().for_each(GfxShaderModule::destroy);
        let pipeline = result.map_err(|(_, e)| e)?[0];

        let pipeline = GfxGraphicsPipeline {
            pipeline,
            pipeline_layout,
        };
        gfx_device.set_debug_name(&pipeline, debug_name);
        Ok(pipeline)
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout.handle()
    }

    #[inline]
    pub fn destroy(self) {
        // drop
    }
}
impl Drop for GfxGraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_pipeline(self.pipeline, None);
        }
    }
}
impl DebugType for GfxGraphicsPipeline {
    fn debug_type_name() -> &'static str {
        "GfxGraphicsPipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}

pub struct GfxGraphicsPipelineCreateInfo {
    /// dynamic render 需要的 framebuffer 信息
    color_attach_formats: Vec<vk::Format>,
    /// format = undefined 表示不使用 depth attachment
    depth_attach_format: vk::Format,

    shader_stages: Vec<GfxShaderStageInfo>,

    vertex_binding_desc: Vec<vk::VertexInputBindingDescription>,
    vertex_attribute_desc: Vec<vk::VertexInputAttributeDescription>,

    cull_mode: vk::CullModeFlags,
}
impl Default for GfxGraphicsPipelineCreateInfo {
    fn default() -> Self {
        Self {
            color_attach_formats: vec![],
            depth_attach_format: vk::Format::UNDEFINED,
            shader_stages: vec![],
            vertex_binding_desc: vec![],
            vertex_attribute_desc: vec![],
            cull_mode: vk::CullModeFlags::BACK,
        }
    }
}
// builder
impl GfxGraphicsPipelineCreateInfo {
    #[inline]
    pub fn attach_info(&mut self, color_attach_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> &mut Self {
        self.color_attach_formats = color_attach_formats;
        self.depth_attach_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    #[inline]
    pub fn vertex_shader_stage(&mut self, path: PathBuf, entry_point: &'static CStr) -> &mut Self {
        self.shader_stages.push(GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::VERTEX,
            entry_point,
            path,
        });
        self
    }

    #[inline]
    pub fn fragment_shader_stage(&mut self, path: PathBuf, entry_point: &'static CStr) -> &mut Self {
        self.shader_stages.push(GfxShaderStageInfo {
            stage: vk::ShaderStageFlags::FRAGMENT,
            entry_point,
            path,
        });
        self
    }

    #[inline]
    pub fn vertex_binding(&mut self, bindings: Vec<vk::VertexInputBindingDescription>) -> &mut Self {
        self.vertex_binding_desc = bindings;
        self
    }

    #[inline]
    pub fn vertex_attribute(&mut self, attributes: Vec<vk::VertexInputAttributeDescription>) -> &mut Self {
        self.vertex_attribute_desc = attributes;
        self
    }

    #[inline]
    pub fn cull_mode(&mut self, mode: vk::CullModeFlags) -> &mut Self {
        self.cull_mode = mode;
        self
    }
}
