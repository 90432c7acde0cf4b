use ash::vk;
use glam::Mat4;
use halcyon_gfx::{
    commands::wait_timeout::WaitTimeout, error::GfxResult, swapchain::render_swapchain::PresentStatus,
};
use halcyon_render_interface::pipeline_settings::FrameSlot;
use halcyon_scene::draw_batch::DrawBatchSet;
use serde::Serialize;

use crate::{present::presenter::AcquiredImage, visibility::cull_executor::CullExecutor};

/// 一帧的 GPU 耗时（毫秒），来自 timestamp query，比当前帧晚一次 slot 轮转
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GpuTimings {
    pub cull_ms: f32,
    pub draw_ms: f32,
}

/// 帧循环中与 GPU 打交道的部分
///
/// [`super::orchestrator::FrameOrchestrator`] 只负责阶段顺序和错误处理，
/// 具体的同步对象、command buffer 和呈现都在这里。
pub trait FrameBackend {
    /// 等待这个 slot 上一次提交的 fence
    fn wait_frame_slot(&mut self, slot: FrameSlot, timeout: WaitTimeout) -> GfxResult<()>;

    /// 当前呈现目标的尺寸
    fn extent(&self) -> vk::Extent2D;

    /// 重建呈现目标和与尺寸相关的资源
    fn recreate_targets(&mut self, extent: vk::Extent2D) -> GfxResult<()>;

    fn acquire(&mut self, slot: FrameSlot, timeout: WaitTimeout) -> GfxResult<PresentStatus<AcquiredImage>>;

    fn begin_recording(&mut self, slot: FrameSlot, image: AcquiredImage) -> GfxResult<()>;

    /// 录制期间使用的剔除执行器
    fn cull_executor(&mut self) -> &mut dyn CullExecutor;

    /// 每个 batch 一次间接绘制，之后结束录制
    fn record_draws(
        &mut self,
        slot: FrameSlot,
        image: AcquiredImage,
        view_projection: Mat4,
        batches: &DrawBatchSet,
    ) -> GfxResult<()>;

    /// 提交并 signal 这个 slot 的 fence
    fn submit(&mut self, slot: FrameSlot, image: AcquiredImage) -> GfxResult<()>;

    /// 录制失败时代替 [`FrameBackend::submit`]
    ///
    /// 不提交录制的命令，但要消费 acquire 时 signal 的信号量，并让这个 slot 的 fence 重新 signal
    fn abandon_frame(&mut self, slot: FrameSlot, image: AcquiredImage) -> GfxResult<()>;

    fn present(&mut self, image: AcquiredImage) -> GfxResult<PresentStatus<()>>;

    fn gpu_timings(&self) -> GpuTimings {
        GpuTimings::default()
    }
}
