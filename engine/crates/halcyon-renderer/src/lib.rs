//! 渲染器的帧循环
//!
//! - [`visibility`]：视锥剔除和间接绘制命令的压缩，CPU 与 GPU 两种执行器
//! - [`present`]：swapchain 呈现和无窗口的离屏呈现
//! - [`frame`]：等待、获取、录制、提交、呈现五个阶段的编排
//! - [`renderer`]：把场景、mesh 堆、bindless 表和帧编排组合在一起

pub mod frame;
pub mod present;
pub mod render_stat;
pub mod renderer;
pub mod timer;
pub mod visibility;
