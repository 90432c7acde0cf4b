use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let shader = HalcyonPath::shader_build_path("culling/instance_cull.comp"); // engine/shader/.build/culling/instance_cull.comp.spv
/// let cache = HalcyonPath::cache_path("pipeline.cache");                     // target/halcyon-cache/pipeline.cache
/// ```
pub struct HalcyonPath {}
// 核心路径
impl HalcyonPath {
    /// 获取工作区根目录
    ///
    /// 当前 crate 位于 `engine/crates/halcyon-crate-tools`
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.ancestors().nth(3).unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }

    pub fn engine_path() -> PathBuf {
        Self::workspace_path().join("engine")
    }
}
// engine 目录下
impl HalcyonPath {
    pub fn shader_root_path() -> PathBuf {
        Self::engine_path().join("shader")
    }

    /// 获取 `engine/shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_build_path(filename: &str) -> PathBuf {
        let mut file_name = filename.to_string();
        file_name.push_str(".spv");
        Self::shader_root_path().join(".build").join(file_name)
    }

    /// 运行期缓存（pipeline cache 等）存放的位置
    pub fn cache_path(filename: &str) -> PathBuf {
        Self::target_path().join("halcyon-cache").join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_build_path_appends_spv() {
        let path = HalcyonPath::shader_build_path("culling/instance_cull.comp");
        assert!(path.ends_with("engine/shader/.build/culling/instance_cull.comp.spv"));
    }

    #[test]
    fn workspace_contains_engine_dir() {
        let workspace = HalcyonPath::workspace_path();
        assert!(workspace.join("engine").join("crates").is_dir());
    }
}
