use std::{rc::Rc, sync::Arc};

use ash::vk;
use glam::Mat4;
use halcyon_crate_tools::resource::HalcyonPath;
use halcyon_gfx::{
    commands::{
        barrier::GfxImageBarrier, command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence,
        semaphore::GfxSemaphore, submit_info::GfxSubmitInfo, wait_timeout::WaitTimeout,
    },
    error::{GfxError, GfxResult},
    gfx::Gfx,
    pipelines::{
        graphics_pipeline::{GfxGraphicsPipeline, GfxGraphicsPipelineCreateInfo},
        pipeline_cache::GfxPipelineCache,
        pipeline_layout::GfxPipelineLayout,
    },
    query::query_pool::GfxQueryPool,
    resources::{image::GfxImage, image_view::GfxImageView},
    swapchain::render_swapchain::PresentStatus,
};
use halcyon_render_interface::{
    gfx_bindless_sink::GfxBindlessSink,
    gpu_types::{DrawIndexedIndirectCommand, DrawPushConstants, VertexPosNormalUv},
    handles::PipelineHandle,
    pipeline_cache_store::PipelineCacheStore,
    pipeline_settings::{DefaultRendererSettings, FrameSettings, FrameSlot},
};
use halcyon_scene::draw_batch::DrawBatchSet;
use slotmap::SlotMap;

use crate::{
    frame::backend::{FrameBackend, GpuTimings},
    present::presenter::{AcquiredImage, Presenter},
    visibility::{cull_executor::CullExecutor, gpu_executor::GpuCullExecutor},
};

/// 帧开始、剔除结束、绘制结束
const TIMESTAMP_COUNT: u32 = 3;

/// 一个 frame slot 独占的命令、同步对象和深度图
struct FrameSlotResources {
    command_pool: GfxCommandPool,
    cmd: GfxCommandBuffer,
    /// 创建时为 signaled，第一次等待直接返回
    fence: GfxFence,
    image_available: GfxSemaphore,

    depth_image: GfxImage,
    depth_view: GfxImageView,

    timestamps: GfxQueryPool,
    /// 这个 slot 是否提交过带 timestamp 的命令
    timestamps_written: bool,
}

impl FrameSlotResources {
    fn new(slot: FrameSlot, extent: vk::Extent2D, depth_format: vk::Format) -> GfxResult<Self> {
        let command_pool = GfxCommandPool::new(
            Gfx::get().gfx_queue().queue_family().clone(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("frame-{slot}"),
        )?;
        let cmd = GfxCommandBuffer::new(&command_pool, &format!("frame-{slot}"))?;
        let (depth_image, depth_view) = Self::create_depth(slot, extent, depth_format)?;
        Ok(Self {
            command_pool,
            cmd,
            fence: GfxFence::new(true, &format!("frame-{slot}"))?,
            image_available: GfxSemaphore::new(&format!("image-available-{slot}"))?,
            depth_image,
            depth_view,
            timestamps: GfxQueryPool::new(vk::QueryType::TIMESTAMP, TIMESTAMP_COUNT, &format!("timestamps-{slot}"))?,
            timestamps_written: false,
        })
    }

    fn create_depth(slot: FrameSlot, extent: vk::Extent2D, format: vk::Format) -> GfxResult<(GfxImage, GfxImageView)> {
        let image = GfxImage::new_2d(
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            &format!("depth-{slot}"),
        )?;
        let view = GfxImageView::new_2d(image.handle(), format, vk::ImageAspectFlags::DEPTH, format!("depth-{slot}"))?;
        Ok((image, view))
    }

    fn destroy(self) {
        self.depth_view.destroy();
        self.depth_image.destroy();
        self.timestamps.destroy();
        self.image_available.destroy();
        self.fence.destroy();
        self.command_pool.free_command_buffers(vec![self.cmd]);
        self.command_pool.destroy();
    }
}

/// 基于 vulkan 的 [`FrameBackend`]
///
/// 剔除和绘制录制在同一个 command buffer 中，一帧一次提交。
pub struct VulkanFrameBackend<P: Presenter> {
    presenter: P,
    frame_settings: FrameSettings,

    slots: Vec<FrameSlotResources>,
    /// 按 presenter 的图像下标索引
    render_finished: Vec<GfxSemaphore>,

    cull_executor: GpuCullExecutor,
    bindless: Arc<GfxBindlessSink>,

    pipeline_cache: GfxPipelineCache,
    pipeline_cache_store: PipelineCacheStore,
    pipeline_layout: Rc<GfxPipelineLayout>,
    pipelines: SlotMap<PipelineHandle, GfxGraphicsPipeline>,

    /// (vertex buffer, index buffer)
    geometry: Option<(vk::Buffer, vk::Buffer)>,
    material_slot: u32,

    gpu_timings: GpuTimings,
}

// new & init
impl<P: Presenter> VulkanFrameBackend<P> {
    pub fn new(
        presenter: P,
        bindless: Arc<GfxBindlessSink>,
        frames_in_flight: usize,
        max_instances: u32,
        cull_work_group_size: u32,
        pipeline_cache_store: PipelineCacheStore,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanFrameBackend::new");

        let depth_format = Gfx::get()
            .find_supported_format(
                DefaultRendererSettings::DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .first()
            .copied()
            .ok_or(GfxError::FormatUnsupported(DefaultRendererSettings::DEPTH_FORMAT_CANDIDATES[0]))?;
        let frame_settings = FrameSettings {
            color_format: presenter.format(),
            depth_format,
            frame_extent: presenter.extent(),
        };
        log::info!(
            "frame settings: color {:?}, depth {:?}, {}x{}",
            frame_settings.color_format,
            frame_settings.depth_format,
            frame_settings.frame_extent.width,
            frame_settings.frame_extent.height
        );

        let slots = (0..frames_in_flight)
            .map(|idx| FrameSlotResources::new(FrameSlot(idx), frame_settings.frame_extent, depth_format))
            .collect::<GfxResult<Vec<_>>>()?;
        let render_finished = Self::create_render_finished(presenter.image_count())?;

        let pipeline_cache = GfxPipelineCache::new(pipeline_cache_store.load().as_deref())?;
        let cull_executor = GpuCullExecutor::new(max_instances, frames_in_flight, cull_work_group_size, &pipeline_cache)?;
        let pipeline_layout = Rc::new(GfxPipelineLayout::new(
            &[bindless.layout().layout()],
            &[vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                size: size_of::<DrawPushConstants>() as u32,
            }],
            "mesh-draw",
        )?);

        Ok(Self {
            presenter,
            frame_settings,
            slots,
            render_finished,
            cull_executor,
            bindless,
            pipeline_cache,
            pipeline_cache_store,
            pipeline_layout,
            pipelines: SlotMap::with_key(),
            geometry: None,
            material_slot: 0,
            gpu_timings: GpuTimings::default(),
        })
    }

    fn create_render_finished(count: usize) -> GfxResult<Vec<GfxSemaphore>> {
        (0..count).map(|idx| GfxSemaphore::new(&format!("render-finished-{idx}"))).collect()
    }

    /// 使用 `draw/mesh.vert` 与 `draw/mesh.frag` 的管线
    pub fn create_mesh_pipeline(&mut self) -> GfxResult<PipelineHandle> {
        let _span = tracy_client::span!("VulkanFrameBackend::create_mesh_pipeline");
        let mut create_info = GfxGraphicsPipelineCreateInfo::default();
        create_info
            .vertex_shader_stage(HalcyonPath::shader_build_path("draw/mesh.vert"), c"main")
            .fragment_shader_stage(HalcyonPath::shader_build_path("draw/mesh.frag"), c"main")
            .attach_info(vec![self.frame_settings.color_format], Some(self.frame_settings.depth_format))
            .vertex_binding(VertexPosNormalUv::vertex_input_bindings())
            .vertex_attribute(VertexPosNormalUv::vertex_input_attributes())
            .cull_mode(vk::CullModeFlags::BACK);

        let pipeline =
            GfxGraphicsPipeline::new(&create_info, self.pipeline_layout.clone(), &self.pipeline_cache, "mesh")?;
        Ok(self.pipelines.insert(pipeline))
    }
}

// getters
impl<P: Presenter> VulkanFrameBackend<P> {
    #[inline]
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    #[inline]
    pub fn frame_settings(&self) -> FrameSettings {
        self.frame_settings
    }

    #[inline]
    pub fn gpu_cull_executor(&self) -> &GpuCullExecutor {
        &self.cull_executor
    }
}

// update
impl<P: Presenter> VulkanFrameBackend<P> {
    /// mesh heap 增长后 buffer 会变化，每帧绘制前重新设置
    #[inline]
    pub fn set_geometry(&mut self, vertex_buffer: vk::Buffer, index_buffer: vk::Buffer) {
        self.geometry = (vertex_buffer != vk::Buffer::null() && index_buffer != vk::Buffer::null())
            .then_some((vertex_buffer, index_buffer));
    }

    /// 材质参数在 bindless storage buffer 数组中的下标
    #[inline]
    pub fn set_material_slot(&mut self, slot: u32) {
        self.material_slot = slot;
    }

    /// 读取这个 slot 上一次提交写入的 timestamp
    fn read_timestamps(&mut self, slot: FrameSlot) -> GfxResult<()> {
        let resources = &self.slots[*slot];
        if !resources.timestamps_written {
            return Ok(());
        }
        let values = resources.timestamps.get_timestamps(0, TIMESTAMP_COUNT)?;
        if let [Some(begin), Some(culled), Some(drawn)] = values[..] {
            let ns_per_tick = Gfx::get().physical_device().timestamp_period_ns() as f64;
            let to_ms = |ticks: u64| (ticks as f64 * ns_per_tick / 1_000_000.0) as f32;
            self.gpu_timings = GpuTimings {
                cull_ms: to_ms(culled.saturating_sub(begin)),
                draw_ms: to_ms(drawn.saturating_sub(culled)),
            };
        }
        Ok(())
    }

    fn record_geometry_pass(&self, cmd: &GfxCommandBuffer, slot: FrameSlot, view_projection: Mat4, batches: &DrawBatchSet) {
        let extent = self.frame_settings.frame_extent;
        cmd.cmd_set_viewport(
            0,
            &[vk::Viewport {
                x: 0.0,
                y: extent.height as f32,
                width: extent.width as f32,
                height: -(extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        cmd.cmd_set_scissor(
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            }],
        );

        let Some((vertex_buffer, index_buffer)) = self.geometry else {
            log::warn!("no geometry bound, skip drawing");
            return;
        };
        cmd.cmd_bind_vertex_buffers(0, &[vertex_buffer], &[0]);
        cmd.cmd_bind_index_buffer(index_buffer, 0, vk::IndexType::UINT32);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout.handle(),
            0,
            &[self.bindless.set(slot)],
        );

        let bounds_addr = self.cull_executor.bounds_address(slot);
        for (batch, gpu_batch) in batches.batches().iter().zip(self.cull_executor.draw_batches(slot)) {
            let Some(pipeline) = self.pipelines.get(batch.pipeline()) else {
                log::warn!("pipeline {:?} not found, skip batch", batch.pipeline());
                continue;
            };
            if gpu_batch.command_count() == 0 {
                continue;
            }
            cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
            let params = DrawPushConstants {
                view_proj: view_projection,
                bounds_addr,
                visible_instances_addr: gpu_batch.visible_instances_address(),
                material_slot: self.material_slot,
                _padding: [0; 3],
            };
            cmd.cmd_push_constants(
                self.pipeline_layout.handle(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&params),
            );
            cmd.cmd_draw_indexed_indirect(
                gpu_batch.commands(),
                0,
                gpu_batch.command_count(),
                DrawIndexedIndirectCommand::STRIDE,
            );
        }
    }
}

impl<P: Presenter> FrameBackend for VulkanFrameBackend<P> {
    fn wait_frame_slot(&mut self, slot: FrameSlot, timeout: WaitTimeout) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanFrameBackend::wait_frame_slot");
        self.slots[*slot].fence.wait(timeout)?;
        self.read_timestamps(slot)
    }

    #[inline]
    fn extent(&self) -> vk::Extent2D {
        self.presenter.extent()
    }

    fn recreate_targets(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanFrameBackend::recreate_targets");
        Gfx::get().wait_idle()?;
        self.presenter.recreate(extent)?;
        self.frame_settings.frame_extent = self.presenter.extent();

        for (idx, resources) in self.slots.iter_mut().enumerate() {
            let (image, view) = FrameSlotResources::create_depth(
                FrameSlot(idx),
                self.frame_settings.frame_extent,
                self.frame_settings.depth_format,
            )?;
            std::mem::replace(&mut resources.depth_view, view).destroy();
            std::mem::replace(&mut resources.depth_image, image).destroy();
        }
        if self.render_finished.len() != self.presenter.image_count() {
            self.render_finished.drain(..).for_each(GfxSemaphore::destroy);
            self.render_finished = Self::create_render_finished(self.presenter.image_count())?;
        }
        Ok(())
    }

    fn acquire(&mut self, slot: FrameSlot, timeout: WaitTimeout) -> GfxResult<PresentStatus<AcquiredImage>> {
        let _span = tracy_client::span!("VulkanFrameBackend::acquire");
        self.presenter.acquire(&self.slots[*slot].image_available, timeout)
    }

    fn begin_recording(&mut self, slot: FrameSlot, _image: AcquiredImage) -> GfxResult<()> {
        let resources = &mut self.slots[*slot];
        resources.command_pool.reset_all_buffers()?;
        let cmd = resources.cmd.clone();
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &format!("frame-{slot}"))?;
        cmd.cmd_reset_query_pool(&resources.timestamps, 0, TIMESTAMP_COUNT);
        cmd.cmd_write_timestamp(vk::PipelineStageFlags2::TOP_OF_PIPE, &resources.timestamps, 0);
        resources.timestamps_written = true;

        self.bindless.flush(slot);
        self.cull_executor.begin_frame(cmd, slot)
    }

    #[inline]
    fn cull_executor(&mut self) -> &mut dyn CullExecutor {
        &mut self.cull_executor
    }

    fn record_draws(
        &mut self,
        slot: FrameSlot,
        image: AcquiredImage,
        view_projection: Mat4,
        batches: &DrawBatchSet,
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanFrameBackend::record_draws");
        let resources = &self.slots[*slot];
        let cmd = resources.cmd.clone();
        cmd.cmd_write_timestamp(vk::PipelineStageFlags2::COMPUTE_SHADER, &resources.timestamps, 1);

        let (color_image, color_view) = self.presenter.image(image.index);
        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[
                GfxImageBarrier::new()
                    .image(color_image)
                    .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .src_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::empty())
                    .dst_mask(
                        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                    ),
                GfxImageBarrier::new()
                    .image(resources.depth_image.handle())
                    .image_aspect_flag(vk::ImageAspectFlags::DEPTH)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .src_mask(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, vk::AccessFlags2::empty())
                    .dst_mask(
                        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
                        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    ),
            ],
        );

        let color_attach = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.1, 0.1, 0.12, 1.0],
                },
            });
        let depth_attach = vk::RenderingAttachmentInfo::default()
            .image_view(resources.depth_view.handle())
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        let render_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.frame_settings.frame_extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attach))
            .depth_attachment(&depth_attach);

        cmd.begin_label("geometry-pass", glam::vec4(0.8, 0.6, 0.2, 1.0));
        cmd.cmd_begin_rendering(&render_info);
        self.record_geometry_pass(&cmd, slot, view_projection, batches);
        cmd.cmd_end_rendering();
        cmd.end_label();

        cmd.image_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxImageBarrier::new()
                .image(color_image)
                .image_aspect_flag(vk::ImageAspectFlags::COLOR)
                .layout_transfer(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, self.presenter.present_layout())
                .src_mask(
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                )
                .dst_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::empty())],
        );
        cmd.cmd_write_timestamp(vk::PipelineStageFlags2::ALL_GRAPHICS, &resources.timestamps, 2);
        cmd.end()
    }

    fn submit(&mut self, slot: FrameSlot, image: AcquiredImage) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanFrameBackend::submit");
        let resources = &self.slots[*slot];
        resources.fence.reset()?;

        let mut submit_info = GfxSubmitInfo::new(std::slice::from_ref(&resources.cmd));
        if image.signaled {
            submit_info = submit_info
                .wait(&resources.image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, None)
                .signal(
                    &self.render_finished[image.index as usize],
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    None,
                );
        }
        Gfx::get().gfx_queue().submit(vec![submit_info], Some(&resources.fence))
    }

    fn abandon_frame(&mut self, slot: FrameSlot, image: AcquiredImage) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanFrameBackend::abandon_frame");
        let resources = &mut self.slots[*slot];
        // 没有提交的 timestamp 不能读
        resources.timestamps_written = false;
        resources.fence.reset()?;

        let mut submit_info = GfxSubmitInfo::new(&[]);
        if image.signaled {
            submit_info = submit_info.wait(&resources.image_available, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        }
        Gfx::get().gfx_queue().submit(vec![submit_info], Some(&resources.fence))
    }

    fn present(&mut self, image: AcquiredImage) -> GfxResult<PresentStatus<()>> {
        let _span = tracy_client::span!("VulkanFrameBackend::present");
        self.presenter.present(image.index, &self.render_finished[image.index as usize])
    }

    #[inline]
    fn gpu_timings(&self) -> GpuTimings {
        self.gpu_timings
    }
}

// destroy
impl<P: Presenter> VulkanFrameBackend<P> {
    /// 等待 GPU 空闲后销毁，pipeline cache 写回磁盘
    ///
    /// 返回 bindless sink，调用方在所有 registry 释放之后销毁它
    pub fn destroy(self) -> GfxResult<Arc<GfxBindlessSink>> {
        Gfx::get().wait_idle()?;

        match self.pipeline_cache.data() {
            Ok(data) => self.pipeline_cache_store.store(&data),
            Err(e) => log::warn!("failed to read pipeline cache data: {e}"),
        }

        self.pipelines.into_iter().for_each(|(_, pipeline)| pipeline.destroy());
        drop(self.pipeline_layout);
        drop(self.cull_executor);
        self.pipeline_cache.destroy();

        self.slots.into_iter().for_each(FrameSlotResources::destroy);
        self.render_finished.into_iter().for_each(GfxSemaphore::destroy);
        self.presenter.destroy();
        Ok(self.bindless)
    }
}
