use halcyon_gfx::error::GfxResult;
use halcyon_scene::{
    bounds::{CullShape, Frustum},
    draw_batch::DrawBatchSet,
    scene::SceneFrame,
};
use serde::Serialize;

/// 剔除开关和使用的包围体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CullOptions {
    /// false 时所有存活的 instance 都可见
    pub enabled: bool,
    pub shape: CullShape,
}

impl Default for CullOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            shape: CullShape::Aabb,
        }
    }
}

/// 一帧剔除的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VisibilityStats {
    /// 参与剔除的存活 instance 数量
    pub tested_instances: u32,
    pub visible_instances: u32,
    /// 至少有一个可见 instance 的 command 数量
    pub surviving_commands: u32,
}

/// 剔除和压缩的执行者
///
/// 调用顺序由 [`super::pipeline::VisibilityPipeline`] 保证：
/// `upload_bounds` → `cull` → `compact` → `stats`
///
/// [`CullExecutor::visibility`] 随时可以读取，是执行者手上最新的一份结果
pub trait CullExecutor {
    /// 写入本帧所有槽位的变换和包围盒
    fn upload_bounds(&mut self, frame: &SceneFrame) -> GfxResult<()>;

    /// 对每个 instance 做视锥体测试，结果写入 visibility 数组
    fn cull(&mut self, frustum: &Frustum, options: CullOptions);

    /// 把可见的 instance 写入每个 command 的固定区域
    fn compact(&mut self, batches: &mut DrawBatchSet) -> GfxResult<()>;

    fn stats(&self) -> VisibilityStats;

    /// 每个槽位一个 0/1，下标是 instance 槽位；还没有结果时为空
    fn visibility(&self) -> &[u32];
}
