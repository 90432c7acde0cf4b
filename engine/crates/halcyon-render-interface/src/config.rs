//! 渲染器的运行期配置，从 toml 读取
//!
//! 所有字段都有默认值，配置文件只需要写出需要覆盖的部分：
//! ```toml
//! frames_in_flight = 3
//! fence_timeout = { millis = 1000 }
//!
//! [culling]
//! enabled = false
//! ```

use std::path::{Path, PathBuf};

use ash::vk;
use halcyon_crate_tools::resource::HalcyonPath;
use halcyon_gfx::commands::wait_timeout::WaitTimeout;
use serde::{Deserialize, Serialize};

use crate::{
    frame_counter::FrameCounter,
    heap_buffer::{HeapBufferDesc, HeapGrowthPolicy},
    pipeline_settings::DefaultRendererSettings,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeapConfig {
    /// 所有子分配的最小对齐
    pub alignment: u64,
    /// 第一个 block 之后每次增长的大小
    pub default_block_size: u64,
    pub growth: HeapGrowthPolicy,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            alignment: 16,
            default_block_size: 64 * 1024 * 1024,
            growth: HeapGrowthPolicy::Grow,
        }
    }
}

impl HeapConfig {
    /// element_alignment 是元素自身的对齐（2 的幂），与配置的对齐取较大者
    pub fn buffer_desc(&self, element_alignment: u64, initial_capacity: u64) -> HeapBufferDesc {
        HeapBufferDesc {
            alignment: self.alignment.max(element_alignment),
            initial_capacity,
            block_size: self.default_block_size,
            policy: self.growth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindlessConfig {
    pub initial_capacity: u32,
}

impl Default for BindlessConfig {
    fn default() -> Self {
        Self { initial_capacity: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CullingConfig {
    /// false 时所有 instance 都可见
    pub enabled: bool,
    /// 剔除和压缩 compute shader 的 local_size_x，通过特化常量传入
    pub work_group_size: u32,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            work_group_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresentConfig {
    /// true 时使用 FIFO
    pub vsync: bool,
    /// [width, height]
    pub extent: [u32; 2],
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            vsync: false,
            extent: [1280, 720],
        }
    }
}

impl PresentConfig {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent[0],
            height: self.extent[1],
        }
    }

    /// 按优先级排列的呈现模式
    #[inline]
    pub fn present_mode_candidates(&self) -> &'static [vk::PresentModeKHR] {
        DefaultRendererSettings::present_mode_candidates(self.vsync)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub frames_in_flight: usize,
    pub max_scene_instances: u32,
    pub heap: HeapConfig,
    pub vertex_heap_bytes: u64,
    pub index_heap_bytes: u64,
    pub bindless: BindlessConfig,
    pub fence_timeout: WaitTimeout,
    pub acquire_timeout: WaitTimeout,
    pub culling: CullingConfig,
    pub present: PresentConfig,
    pub pipeline_cache_path: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_scene_instances: 65536,
            heap: HeapConfig::default(),
            vertex_heap_bytes: 64 * 1024 * 1024,
            index_heap_bytes: 32 * 1024 * 1024,
            bindless: BindlessConfig::default(),
            fence_timeout: WaitTimeout::Infinite,
            acquire_timeout: WaitTimeout::Infinite,
            culling: CullingConfig::default(),
            present: PresentConfig::default(),
            pipeline_cache_path: HalcyonPath::cache_path("pipeline.cache"),
        }
    }
}

// new & init
impl RendererConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("renderer config loaded from {}", path.display());
        Ok(config)
    }
}

// tools
impl RendererConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });

        if !(1..=FrameCounter::MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return invalid(
                "frames_in_flight",
                format!("{} is outside 1..={}", self.frames_in_flight, FrameCounter::MAX_FRAMES_IN_FLIGHT),
            );
        }
        if self.max_scene_instances == 0 {
            return invalid("max_scene_instances", "must be positive".to_string());
        }
        if !self.heap.alignment.is_power_of_two() {
            return invalid("heap.alignment", format!("{} is not a power of two", self.heap.alignment));
        }
        if self.heap.default_block_size < self.heap.alignment {
            return invalid(
                "heap.default_block_size",
                format!("{} is smaller than the alignment", self.heap.default_block_size),
            );
        }
        if self.vertex_heap_bytes == 0 || self.index_heap_bytes == 0 {
            return invalid("vertex_heap_bytes/index_heap_bytes", "must be positive".to_string());
        }
        if self.bindless.initial_capacity == 0 {
            return invalid("bindless.initial_capacity", "must be positive".to_string());
        }
        if self.culling.work_group_size == 0 || self.culling.work_group_size % 32 != 0 {
            return invalid(
                "culling.work_group_size",
                format!("{} is not a positive multiple of 32", self.culling.work_group_size),
            );
        }
        if self.present.extent.contains(&0) {
            return invalid("present.extent", format!("{:?} has a zero dimension", self.present.extent));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.heap.alignment, 16);
    }

    #[test]
    fn partial_override() {
        let config = RendererConfig::from_toml_str(
            r#"
            frames_in_flight = 3
            fence_timeout = { millis = 500 }

            [culling]
            enabled = false

            [heap]
            growth = "fixed"
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.fence_timeout, WaitTimeout::Millis(500));
        assert_eq!(config.acquire_timeout, WaitTimeout::Infinite);
        assert!(!config.culling.enabled);
        assert_eq!(config.culling.work_group_size, 32);
        assert_eq!(config.heap.growth, HeapGrowthPolicy::Fixed);
    }

    #[test]
    fn frames_in_flight_out_of_range() {
        let err = RendererConfig::from_toml_str("frames_in_flight = 4").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "frames_in_flight", .. }));
        let err = RendererConfig::from_toml_str("frames_in_flight = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "frames_in_flight", .. }));
    }

    #[test]
    fn alignment_must_be_power_of_two() {
        let err = RendererConfig::from_toml_str("[heap]\nalignment = 24").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "heap.alignment", .. }));
    }

    #[test]
    fn heap_section_shapes_buffer_desc() {
        let config = RendererConfig::from_toml_str(
            r#"
            [heap]
            alignment = 64
            default_block_size = 4096
            growth = "fixed"
            "#,
        )
        .unwrap();
        let desc = config.heap.buffer_desc(4, 1024);
        assert_eq!(
            desc,
            HeapBufferDesc {
                alignment: 64,
                initial_capacity: 1024,
                block_size: 4096,
                policy: HeapGrowthPolicy::Fixed,
            }
        );
        // 元素对齐更大时以元素为准
        assert_eq!(HeapConfig::default().buffer_desc(32, 1024).alignment, 32);
    }

    #[test]
    fn present_section_selects_modes_and_extent() {
        let config = RendererConfig::from_toml_str("[present]\nvsync = true\nextent = [800, 600]").unwrap();
        assert_eq!(config.present.present_mode_candidates(), &[vk::PresentModeKHR::FIFO]);
        assert_eq!(config.present.extent(), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(RendererConfig::default().present.present_mode_candidates()[0], vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let err = RendererConfig::from_toml_str("frames_in_flite = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RendererConfig::load("/nonexistent/halcyon.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
