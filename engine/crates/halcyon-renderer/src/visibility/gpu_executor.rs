use ash::vk;
use halcyon_crate_tools::resource::HalcyonPath;
use halcyon_gfx::{
    commands::{
        barrier::{GfxBarrierMask, GfxBufferBarrier},
        command_buffer::GfxCommandBuffer,
    },
    error::GfxResult,
    pipelines::{compute_pipeline::GfxComputePipeline, pipeline_cache::GfxPipelineCache},
    resources::{
        buffer::{GfxBuffer, MemoryDomain},
        typed_buffer::{GfxIndirectBuffer, GfxStorageBuffer},
    },
};
use halcyon_render_interface::{
    gpu_types::{
        CompactPushConstants, CullPushConstants, DrawIndexedIndirectCommand, GpuBatchInstance, GpuInstanceBound,
    },
    pipeline_settings::FrameSlot,
};
use halcyon_scene::{
    bounds::{CullShape, Frustum},
    draw_batch::{DrawBatch, DrawBatchSet},
    scene::SceneFrame,
};
use itertools::Itertools;

use crate::visibility::cull_executor::{CullExecutor, CullOptions, VisibilityStats};

/// 每个 batch 两个计数：存活的 command 数量、可见的 instance 数量
const COUNTERS_PER_BATCH: usize = 2;

#[inline]
fn group_count(n: u32, work_group_size: u32) -> glam::UVec3 {
    glam::uvec3(n.div_ceil(work_group_size), 1, 1)
}

#[inline]
fn address_of(buffer: &GfxBuffer) -> vk::DeviceAddress {
    debug_assert!(buffer.device_address().is_some(), "{} has no device address", buffer.debug_name());
    buffer.device_address().unwrap_or_default()
}

/// 一个 [`DrawBatch`] 在 GPU 上的镜像
///
/// instance 元数据和 command 模板在 batch 重建时写入一次；
/// commands 和 visible_instances 每帧由 compaction 重写，绘制时直接读取。
pub struct GpuDrawBatch {
    instances: GfxStorageBuffer,
    template: GfxIndirectBuffer,
    commands: GfxIndirectBuffer,
    visible_instances: GfxStorageBuffer,

    instance_count: u32,
    command_count: u32,
}

// new & init
impl GpuDrawBatch {
    pub fn new(batch: &DrawBatch, name: &str) -> GfxResult<Self> {
        let instance_bytes = (batch.instances().len().max(1) * size_of::<GpuBatchInstance>()) as vk::DeviceSize;
        let command_bytes =
            (batch.template().len().max(1) * size_of::<DrawIndexedIndirectCommand>()) as vk::DeviceSize;

        let instances = GfxStorageBuffer::new(instance_bytes, MemoryDomain::Upload, format!("{name}-instances"))?;
        instances.write_by_mmap(batch.instances(), 0)?;
        let template = GfxIndirectBuffer::new(command_bytes, MemoryDomain::Upload, format!("{name}-template"))?;
        template.write_by_mmap(batch.template(), 0)?;

        Ok(Self {
            instances,
            template,
            commands: GfxIndirectBuffer::new(command_bytes, MemoryDomain::Device, format!("{name}-commands"))?,
            visible_instances: GfxStorageBuffer::new_device_array::<u32>(
                batch.instances().len(),
                format!("{name}-visible-instances"),
            )?,
            instance_count: batch.instances().len() as u32,
            command_count: batch.template().len() as u32,
        })
    }
}

// getters
impl GpuDrawBatch {
    #[inline]
    pub fn commands(&self) -> &GfxBuffer {
        &self.commands
    }

    #[inline]
    pub fn command_count(&self) -> u32 {
        self.command_count
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    #[inline]
    pub fn visible_instances_address(&self) -> vk::DeviceAddress {
        address_of(&self.visible_instances)
    }
}

/// 一个 frame slot 独占的剔除资源，只在这个 slot 的 fence 等待之后修改
struct GpuCullFrameData {
    /// host 每帧写入
    bounds: GfxStorageBuffer,
    visibility: GfxStorageBuffer,
    /// visibility 的 host 副本，每帧剔除后拷贝
    visibility_readback: GfxStorageBuffer,
    /// 上一次拷贝到 visibility_readback 的槽位数量
    recorded_instances: u32,
    /// `[surviving_commands, visible_instances]` × batch
    counters: Option<GfxIndirectBuffer>,
    batches: Vec<GpuDrawBatch>,
    /// 构建 `batches` 时 [`DrawBatchSet`] 的 revision
    batch_revision: Option<u64>,
    /// 上一次录制的 batch 数量，读回计数时使用
    recorded_batches: usize,
}

impl GpuCullFrameData {
    fn new(max_instances: u32, slot: FrameSlot) -> GfxResult<Self> {
        let bounds_bytes = (max_instances.max(1) as usize * size_of::<GpuInstanceBound>()) as vk::DeviceSize;
        Ok(Self {
            bounds: GfxStorageBuffer::new(bounds_bytes, MemoryDomain::Upload, format!("cull-bounds-{slot}"))?,
            visibility: GfxStorageBuffer::new_device_array::<u32>(
                max_instances as usize,
                format!("cull-visibility-{slot}"),
            )?,
            visibility_readback: GfxStorageBuffer::new(
                (max_instances.max(1) as usize * size_of::<u32>()) as vk::DeviceSize,
                MemoryDomain::Readback,
                format!("cull-visibility-readback-{slot}"),
            )?,
            recorded_instances: 0,
            counters: None,
            batches: vec![],
            batch_revision: None,
            recorded_batches: 0,
        })
    }

    /// batch 结构变化后重新上传 instance 元数据和模板
    fn rebuild_batches(&mut self, batches: &DrawBatchSet, slot: FrameSlot) -> GfxResult<()> {
        let _span = tracy_client::span!("GpuCullFrameData::rebuild_batches");
        self.batches = batches
            .batches()
            .iter()
            .enumerate()
            .map(|(idx, batch)| GpuDrawBatch::new(batch, &format!("batch-{idx}-{slot}")))
            .collect::<GfxResult<Vec<_>>>()?;

        let counter_bytes = (batches.len().max(1) * COUNTERS_PER_BATCH * size_of::<u32>()) as vk::DeviceSize;
        self.counters =
            Some(GfxIndirectBuffer::new(counter_bytes, MemoryDomain::Readback, format!("cull-counters-{slot}"))?);
        self.batch_revision = batches.scene_revision();
        self.recorded_batches = 0;
        log::debug!("slot {} rebuilt {} gpu draw batches", slot, self.batches.len());
        Ok(())
    }

    /// 上一次使用这个 slot 时的剔除结果
    fn read_visibility(&self) -> GfxResult<Vec<u32>> {
        if self.recorded_instances == 0 {
            return Ok(vec![]);
        }
        self.visibility_readback.read_by_mmap::<u32>(0, self.recorded_instances as usize)
    }

    /// 上一次使用这个 slot 时 GPU 写入的计数
    fn read_counters(&self) -> GfxResult<(u32, u32)> {
        let Some(counters) = self.counters.as_ref() else {
            return Ok((0, 0));
        };
        if self.recorded_batches == 0 {
            return Ok((0, 0));
        }
        let values = counters.read_by_mmap::<u32>(0, self.recorded_batches * COUNTERS_PER_BATCH)?;
        Ok(values.chunks_exact(COUNTERS_PER_BATCH).fold((0, 0), |(commands, visible), chunk| {
            (commands + chunk[0], visible + chunk[1])
        }))
    }
}

/// 两次 compute dispatch 完成剔除和压缩：`instance_cull.comp` 与 `instance_compact.comp`
///
/// 所有 buffer 通过 device address 写入 push constant。
/// GPU 统计和可见性在 slot 下一次被使用时读回，因此比 CPU 侧的帧晚 `frames_in_flight` 帧。
pub struct GpuCullExecutor {
    cull_pipeline: GfxComputePipeline<CullPushConstants>,
    compact_pipeline: GfxComputePipeline<CompactPushConstants>,
    /// 两个 shader 的 `local_size_x`
    work_group_size: u32,

    frames: Vec<GpuCullFrameData>,
    /// 当前帧录制用的 command buffer 和 slot
    recording: Option<(GfxCommandBuffer, FrameSlot)>,

    max_instances: u32,
    instance_count: u32,
    stats: VisibilityStats,
    /// 当前 slot 上一次的剔除结果
    visibility: Vec<u32>,
}

// new & init
impl GpuCullExecutor {
    /// work_group_size 作为特化常量传给两个 compute shader
    pub fn new(
        max_instances: u32,
        frames_in_flight: usize,
        work_group_size: u32,
        pipeline_cache: &GfxPipelineCache,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GpuCullExecutor::new");
        let cull_pipeline = GfxComputePipeline::new(
            &HalcyonPath::shader_build_path("culling/instance_cull.comp"),
            c"main",
            &[work_group_size],
            &[],
            pipeline_cache,
            "instance-cull",
        )?;
        let compact_pipeline = GfxComputePipeline::new(
            &HalcyonPath::shader_build_path("culling/instance_compact.comp"),
            c"main",
            &[work_group_size],
            &[],
            pipeline_cache,
            "instance-compact",
        )?;
        let frames = (0..frames_in_flight)
            .map(|idx| GpuCullFrameData::new(max_instances, FrameSlot(idx)))
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            cull_pipeline,
            compact_pipeline,
            work_group_size,
            frames,
            recording: None,
            max_instances,
            instance_count: 0,
            stats: VisibilityStats::default(),
            visibility: vec![],
        })
    }
}

// getters
impl GpuCullExecutor {
    /// 绘制时使用的 batch，顺序与 [`DrawBatchSet::batches`] 一致
    #[inline]
    pub fn draw_batches(&self, slot: FrameSlot) -> &[GpuDrawBatch] {
        &self.frames[*slot].batches
    }

    #[inline]
    pub fn bounds_address(&self, slot: FrameSlot) -> vk::DeviceAddress {
        address_of(&self.frames[*slot].bounds)
    }
}

// update
impl GpuCullExecutor {
    /// slot 的 fence 等待之后调用，读回上一次的计数和可见性并记下本帧的 command buffer
    pub fn begin_frame(&mut self, cmd: GfxCommandBuffer, slot: FrameSlot) -> GfxResult<()> {
        self.visibility = self.frames[*slot].read_visibility()?;
        let (surviving_commands, visible_instances) = self.frames[*slot].read_counters()?;
        self.stats.surviving_commands = surviving_commands;
        self.stats.visible_instances = visible_instances;
        self.recording = Some((cmd, slot));
        Ok(())
    }

    fn recording(&self) -> (GfxCommandBuffer, FrameSlot) {
        self.recording.clone().expect("GpuCullExecutor used before begin_frame")
    }
}

impl CullExecutor for GpuCullExecutor {
    fn upload_bounds(&mut self, frame: &SceneFrame) -> GfxResult<()> {
        let (_, slot) = self.recording();
        assert!(
            frame.instance_count() <= self.max_instances,
            "scene has {} slots but the cull buffers hold {}",
            frame.instance_count(),
            self.max_instances
        );
        self.frames[*slot].bounds.write_by_mmap(&frame.bounds, 0)?;
        self.instance_count = frame.instance_count();
        self.stats.tested_instances = frame.live.iter().filter(|live| **live).count() as u32;
        Ok(())
    }

    fn cull(&mut self, frustum: &Frustum, options: CullOptions) {
        let (cmd, slot) = self.recording();
        let frame = &mut self.frames[*slot];
        frame.recorded_instances = self.instance_count;
        if self.instance_count == 0 {
            return;
        }

        cmd.begin_label("instance-cull", glam::vec4(0.2, 0.6, 0.2, 1.0));
        let params = CullPushConstants {
            planes: frustum.to_gpu(),
            bounds_addr: address_of(&frame.bounds),
            visibility_addr: address_of(&frame.visibility),
            instance_count: self.instance_count,
            cull_enabled: options.enabled as u32,
            cull_shape: match options.shape {
                CullShape::Aabb => 0,
                CullShape::Sphere => 1,
            },
            _padding: 0,
        };
        self.cull_pipeline.exec(&cmd, &params, &[], group_count(self.instance_count, self.work_group_size));
        cmd.buffer_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxBufferBarrier::new().mask(GfxBarrierMask::COMPUTE_TO_TRANSFER_AND_COMPUTE).buffer(
                frame.visibility.vk_buffer(),
                0,
                vk::WHOLE_SIZE,
            )],
        );

        let visibility_bytes = (self.instance_count as usize * size_of::<u32>()) as vk::DeviceSize;
        cmd.cmd_copy_buffer(
            &frame.visibility,
            &frame.visibility_readback,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: visibility_bytes,
            }],
        );
        cmd.buffer_memory_barrier(
            vk::DependencyFlags::empty(),
            &[GfxBufferBarrier::new().mask(GfxBarrierMask::TRANSFER_TO_HOST).buffer(
                frame.visibility_readback.vk_buffer(),
                0,
                vk::WHOLE_SIZE,
            )],
        );
        cmd.end_label();
    }

    fn compact(&mut self, batches: &mut DrawBatchSet) -> GfxResult<()> {
        let (cmd, slot) = self.recording();
        let frame = &mut self.frames[*slot];
        if frame.batch_revision != batches.scene_revision() || frame.batches.len() != batches.len() {
            frame.rebuild_batches(batches, slot)?;
        }
        frame.recorded_batches = frame.batches.len();
        let Some(counters) = frame.counters.as_ref() else {
            return Ok(());
        };
        if frame.batches.is_empty() {
            return Ok(());
        }

        cmd.begin_label("instance-compact", glam::vec4(0.2, 0.4, 0.8, 1.0));
        // 每帧从模板开始，计数清零
        let counter_stride = (COUNTERS_PER_BATCH * size_of::<u32>()) as vk::DeviceSize;
        for (idx, gpu_batch) in frame.batches.iter().enumerate() {
            cmd.cmd_copy_buffer(
                &gpu_batch.template,
                &gpu_batch.commands,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: gpu_batch.commands.size(),
                }],
            );
            cmd.cmd_fill_buffer(counters, idx as vk::DeviceSize * counter_stride, counter_stride, 0);
        }
        let reset_barriers = frame
            .batches
            .iter()
            .map(|b| GfxBufferBarrier::new().mask(GfxBarrierMask::TRANSFER_TO_COMPUTE).buffer(
                b.commands.vk_buffer(),
                0,
                vk::WHOLE_SIZE,
            ))
            .chain(std::iter::once(GfxBufferBarrier::new().mask(GfxBarrierMask::TRANSFER_TO_COMPUTE).buffer(
                counters.vk_buffer(),
                0,
                vk::WHOLE_SIZE,
            )))
            .collect_vec();
        cmd.buffer_memory_barrier(vk::DependencyFlags::empty(), &reset_barriers);

        for (idx, gpu_batch) in frame.batches.iter().enumerate() {
            if gpu_batch.instance_count == 0 {
                continue;
            }
            let params = CompactPushConstants {
                batch_instances_addr: address_of(&gpu_batch.instances),
                visibility_addr: address_of(&frame.visibility),
                commands_addr: address_of(&gpu_batch.commands),
                visible_instances_addr: address_of(&gpu_batch.visible_instances),
                counter_addr: address_of(counters) + idx as vk::DeviceAddress * counter_stride,
                instance_count: gpu_batch.instance_count,
                _padding: 0,
            };
            self.compact_pipeline.exec(&cmd, &params, &[], group_count(gpu_batch.instance_count, self.work_group_size));
        }

        let draw_barriers = frame
            .batches
            .iter()
            .flat_map(|b| {
                [b.commands.vk_buffer(), b.visible_instances.vk_buffer()].map(|buffer| {
                    GfxBufferBarrier::new().mask(GfxBarrierMask::COMPUTE_TO_INDIRECT_DRAW).buffer(
                        buffer,
                        0,
                        vk::WHOLE_SIZE,
                    )
                })
            })
            .chain(std::iter::once(GfxBufferBarrier::new().mask(GfxBarrierMask::COMPUTE_TO_HOST).buffer(
                counters.vk_buffer(),
                0,
                vk::WHOLE_SIZE,
            )))
            .collect_vec();
        cmd.buffer_memory_barrier(vk::DependencyFlags::empty(), &draw_barriers);
        cmd.end_label();
        Ok(())
    }

    fn stats(&self) -> VisibilityStats {
        self.stats
    }

    fn visibility(&self) -> &[u32] {
        &self.visibility
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_covers_every_instance() {
        assert_eq!(group_count(0, 32).x, 0);
        assert_eq!(group_count(1, 32).x, 1);
        assert_eq!(group_count(32, 32).x, 1);
        assert_eq!(group_count(33, 32).x, 2);
    }

    #[test]
    fn dispatch_follows_configured_work_group_size() {
        assert_eq!(group_count(64, 64).x, 1);
        assert_eq!(group_count(65, 64).x, 2);
        assert_eq!(group_count(1000, 256), glam::uvec3(4, 1, 1));
    }
}
