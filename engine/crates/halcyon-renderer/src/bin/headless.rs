//! 无窗口运行渲染器：程序化的立方体阵列，离屏渲染若干帧后输出统计
//!
//! ```text
//! cargo run --bin headless -- [frames] [config.toml] [stat.json]
//! ```

use std::path::PathBuf;

use anyhow::Context;
use glam::{Mat4, Vec3};
use halcyon_crate_tools::init_log::init_log;
use halcyon_gfx::gfx::Gfx;
use halcyon_render_interface::config::RendererConfig;
use halcyon_renderer::{
    frame::orchestrator::FrameOutcome, present::dummy_presenter::DummyPresenter, renderer::Renderer,
};
use halcyon_scene::importer::cube_mesh;

/// 每边的立方体数量
const GRID: i32 = 8;
const SPACING: f32 = 2.5;

struct Args {
    frames: u32,
    config: Option<PathBuf>,
    stat_path: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let frames = match args.next() {
            Some(frames) => frames.parse().with_context(|| format!("invalid frame count `{frames}`"))?,
            None => 120,
        };
        Ok(Self {
            frames,
            config: args.next().map(PathBuf::from),
            stat_path: args.next().map(PathBuf::from),
        })
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    let presenter = DummyPresenter::new(config.present.extent())?;
    let mut renderer = Renderer::new(config, presenter)?;
    let cube = renderer.add_mesh(&cube_mesh(1.0))?;
    for x in 0..GRID {
        for z in 0..GRID {
            let offset = (GRID - 1) as f32 * SPACING * 0.5;
            let position = Vec3::new(x as f32 * SPACING - offset, 0.0, -(z as f32) * SPACING - 4.0);
            renderer.add_instance(Mat4::from_translation(position), cube)?;
        }
    }
    log::info!("scene: {} instances", renderer.scene().len());

    let camera = renderer.camera().clone();
    camera.update(|camera| camera.position = Vec3::new(0.0, 2.0, 4.0));

    let yaw_per_frame = 360.0 / args.frames.max(1) as f32;
    let mut presented = 0;
    for _ in 0..args.frames {
        camera.update(|camera| camera.rotate_yaw(yaw_per_frame));
        match renderer.render()? {
            FrameOutcome::Presented { .. } => presented += 1,
            FrameOutcome::Skipped => log::warn!("frame skipped"),
        }
    }
    log::info!("{presented}/{} frames presented", args.frames);

    let stat = *renderer.render_stat();
    renderer.destroy()?;

    match &args.stat_path {
        Some(path) => stat.write_to_file(path)?,
        None => {
            stat.write_to_json(std::io::stdout().lock())?;
            println!();
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_log();
    let args = Args::parse()?;

    Gfx::init("halcyon-headless", &[])?;
    let result = run(&args);
    Gfx::destroy();
    result
}
