use std::{fmt::Display, ops::Deref};

use ash::vk;

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::R8G8B8A8_SRGB,
        // 通知 OS，将数值按照 sRGB 空间进行处理和显示
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const SURFACE_FORMAT_CANDIDATES: &'static [vk::SurfaceFormatKHR] = &[
        Self::DEFAULT_SURFACE_FORMAT,
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    ];
    pub const DEFAULT_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::MAILBOX;
    pub const VSYNC_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;
    pub const DEPTH_FORMAT_CANDIDATES: &'static [vk::Format] = &[
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    /// 离屏呈现使用的图像数量
    pub const OFFSCREEN_IMAGE_COUNT: usize = 3;

    /// vsync 打开时使用 FIFO，否则优先 MAILBOX
    #[inline]
    pub fn present_mode_candidates(vsync: bool) -> &'static [vk::PresentModeKHR] {
        if vsync {
            &[Self::VSYNC_PRESENT_MODE]
        } else {
            &[Self::DEFAULT_PRESENT_MODE, vk::PresentModeKHR::IMMEDIATE, Self::VSYNC_PRESENT_MODE]
        }
    }
}

/// 帧级渲染配置
#[derive(Copy, Clone, Default, Debug)]
pub struct FrameSettings {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub frame_extent: vk::Extent2D,
}

/// Frames in Flight 中的槽位
///
/// 通过 `Deref` 转换为索引，显示为 A/B/C。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot(pub usize);
impl Deref for FrameSlot {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Display for FrameSlot {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", (b'A' + self.0 as u8) as char)
    }
}
