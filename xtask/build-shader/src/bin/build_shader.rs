//! 把 `engine/shader/src` 下的 glsl 编译为 spv，输出到 `engine/shader/.build`，保持相对路径
//!
//! 需要 vulkan sdk 中的 `glslc`。只编译比输出新的文件。

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use halcyon_crate_tools::{init_log::init_log, resource::HalcyonPath};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ShaderCompileEntry {
    shader_path: PathBuf,
    shader_stage: ShaderStage,
    output_path: PathBuf,
}

impl ShaderCompileEntry {
    fn new(src_root: &Path, shader_path: PathBuf) -> Option<Self> {
        let shader_stage = ShaderStage::from_path(&shader_path)?;
        let relative = shader_path.strip_prefix(src_root).ok()?.to_str()?.replace('\\', "/");
        Some(Self {
            output_path: HalcyonPath::shader_build_path(&relative),
            shader_path,
            shader_stage,
        })
    }

    fn is_outdated(&self) -> bool {
        let modified = |path: &Path| std::fs::metadata(path).and_then(|m| m.modified()).ok();
        match (modified(&self.shader_path), modified(&self.output_path)) {
            (Some(src), Some(out)) => src > out,
            _ => true,
        }
    }

    fn build_glsl(&self, include_dir: &Path) -> anyhow::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let output = std::process::Command::new("glslc")
            .arg(format!("-I{}", include_dir.display()))
            .args(["-g", "--target-env=vulkan1.3"])
            .arg("-o")
            .arg(&self.output_path)
            .arg(&self.shader_path)
            .output()
            .context("failed to run glslc")?;

        if !output.status.success() {
            if !output.stdout.is_empty() {
                log::info!("stdout: {}", String::from_utf8_lossy(&output.stdout));
            }
            if !output.stderr.is_empty() {
                log::error!("stderr: {}", String::from_utf8_lossy(&output.stderr));
            }
            bail!("failed to compile {:?} shader {}", self.shader_stage, self.shader_path.display());
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    init_log();

    let src_root = HalcyonPath::shader_root_path().join("src");
    let entries = walkdir::WalkDir::new(&src_root)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("walk {}", src_root.display()))?
        .into_iter()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| ShaderCompileEntry::new(&src_root, entry.into_path()))
        .filter(|entry| {
            let outdated = entry.is_outdated();
            if !outdated {
                log::info!("skip compile shader: {}", entry.shader_path.display());
            }
            outdated
        })
        .collect::<Vec<_>>();

    entries.par_iter().try_for_each(|entry| {
        log::info!("compile shader: {}", entry.shader_path.display());
        entry.build_glsl(&src_root)
    })?;
    log::info!("{} shaders compiled", entries.len());
    Ok(())
}
