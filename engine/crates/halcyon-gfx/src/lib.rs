//! Vulkan GFX 抽象层
//!
//! 提供对 Vulkan API 的高层封装，包括设备管理、命令缓冲、描述符、管线等核心功能。
//! 所有 Vulkan 资源通过 [`gfx::Gfx`] 单例统一管理，简化生命周期和借用关系。
//!
//! 资源创建、等待、提交等可能失败的操作返回 [`error::GfxError`]，
//! 由创建资源的调用链决定如何处理。

pub mod basic;
pub mod commands;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod gfx;
pub mod gfx_core;
pub mod pipelines;
pub mod query;
pub mod resources;
pub mod swapchain;
