use std::{io::Write, path::Path};

use serde::Serialize;

use crate::{frame::backend::GpuTimings, timer::FrameTimer, visibility::cull_executor::VisibilityStats};

/// 一帧的统计信息，可以写成 JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RenderStat {
    pub frame_id: u64,

    /// 两次 render 调用之间的时间
    pub cpu_time_ms: f32,
    pub cpu_fps: f32,

    pub culling_gpu_time_ms: f32,
    pub render_gpu_time_ms: f32,
    pub gpu_time_ms: f32,
    pub gpu_fps: f32,

    pub tested_instances: u32,
    pub visible_instances: u32,
    pub surviving_commands: u32,

    /// 场景中所有 instance 的顶点数和三角形数
    pub vertex_count: u64,
    pub triangle_count: u64,
}

// update
impl RenderStat {
    pub fn update_timing(&mut self, timer: &FrameTimer, gpu: GpuTimings) {
        self.cpu_time_ms = timer.delta_time_ms();
        self.cpu_fps = timer.fps();

        self.culling_gpu_time_ms = gpu.cull_ms;
        self.render_gpu_time_ms = gpu.draw_ms;
        self.gpu_time_ms = gpu.cull_ms + gpu.draw_ms;
        self.gpu_fps = if self.gpu_time_ms > 0.0 { 1000.0 / self.gpu_time_ms } else { 0.0 };
    }

    #[inline]
    pub fn update_visibility(&mut self, stats: VisibilityStats) {
        self.tested_instances = stats.tested_instances;
        self.visible_instances = stats.visible_instances;
        self.surviving_commands = stats.surviving_commands;
    }
}

// tools
impl RenderStat {
    pub fn write_to_json(&self, out: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(out, self)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to_json(&mut writer)?;
        writer.flush()?;
        log::info!("render stat written to {}", path.display());
        Ok(())
    }
}
