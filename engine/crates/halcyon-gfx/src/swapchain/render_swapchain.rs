use ash::vk;
use ash::vk::Handle;

use crate::{
    commands::{command_queue::GfxCommandQueue, semaphore::GfxSemaphore, wait_timeout::WaitTimeout},
    error::{GfxError, GfxResult},
    gfx::Gfx,
    swapchain::surface::GfxSurface,
};

/// acquire 和 present 的结果
///
/// OutOfDate 和 Suboptimal 不是错误，调用方需要重建 swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus<T> {
    Ok(T),
    Suboptimal(T),
    OutOfDate,
}

impl<T> PresentStatus<T> {
    #[inline]
    pub fn needs_recreate(&self) -> bool {
        !matches!(self, PresentStatus::Ok(_))
    }
}

pub struct GfxRenderSwapchain {
    surface: GfxSurface,
    swapchain_handle: vk::SwapchainKHR,

    swapchain_images: Vec<vk::Image>,

    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    swapchain_extent: vk::Extent2D,
}

// new & init
impl GfxRenderSwapchain {
    pub fn new(
        surface: GfxSurface,
        present_mode: vk::PresentModeKHR,
        surface_format: vk::SurfaceFormatKHR,
        window_physical_extent: vk::Extent2D,
    ) -> GfxResult<Self> {
        let mut swapchain = Self {
            surface,
            swapchain_handle: vk::SwapchainKHR::null(),
            swapchain_images: vec![],
            surface_format,
            present_mode,
            swapchain_extent: window_physical_extent,
        };
        swapchain.recreate(window_physical_extent)?;
        Ok(swapchain)
    }

    /// 基于新的窗口尺寸重建 swapchain，旧的 swapchain 作为 old_swapchain 传入后销毁
    ///
    /// 调用前需要确保旧的 swapchain image 不再被 GPU 使用
    pub fn recreate(&mut self, window_physical_extent: vk::Extent2D) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxRenderSwapchain::recreate");
        let surface_capabilities = self.surface.get_capabilities()?;
        let extent = Self::calculate_swapchain_extent(&surface_capabilities, window_physical_extent);
        log::info!(
            "create swapchain: window extent {}x{}, final extent {}x{}",
            window_physical_extent.width,
            window_physical_extent.height,
            extent.width,
            extent.height
        );

        // max_image_count == 0，表示不限制 image 数量
        let image_count = if surface_capabilities.max_image_count == 0 {
            surface_capabilities.min_image_count + 1
        } else {
            u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle)
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 clear 以及 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(self.swapchain_handle);

        let gfx_device = Gfx::get().gfx_device();
        let new_handle = unsafe { gfx_device.swapchain.create_swapchain(&create_info, None)? };
        gfx_device.set_object_debug_name(new_handle, "main");

        if !self.swapchain_handle.is_null() {
            unsafe { gfx_device.swapchain.destroy_swapchain(self.swapchain_handle, None) };
        }
        self.swapchain_handle = new_handle;
        self.swapchain_images = unsafe { gfx_device.swapchain.get_swapchain_images(new_handle)? };
        self.swapchain_extent = extent;
        Ok(())
    }
}

// getters
impl GfxRenderSwapchain {
    #[inline]
    pub fn present_images(&self) -> &[vk::Image] {
        &self.swapchain_images
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }
}

// tools
impl GfxRenderSwapchain {
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }
}

// update
impl GfxRenderSwapchain {
    /// 返回 image index；超时返回 `GfxError::Timeout`
    pub fn acquire_next_image(&self, semaphore: &GfxSemaphore, timeout: WaitTimeout) -> GfxResult<PresentStatus<u32>> {
        let _span = tracy_client::span!("GfxRenderSwapchain::acquire_next_image");
        let timeout_ns = timeout.as_nanos();
        let result = unsafe {
            Gfx::get().gfx_device().swapchain.acquire_next_image(
                self.swapchain_handle,
                timeout_ns,
                semaphore.handle(),
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, false)) => Ok(PresentStatus::Ok(image_index)),
            Ok((image_index, true)) => {
                log::warn!("swapchain acquire image index {} is not optimal", image_index);
                Ok(PresentStatus::Suboptimal(image_index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(PresentStatus::OutOfDate)
            }
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(GfxError::Timeout {
                what: "swapchain image",
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn present_image(
        &self,
        queue: &GfxCommandQueue,
        image_index: u32,
        wait_semaphore: &GfxSemaphore,
    ) -> GfxResult<PresentStatus<()>> {
        let wait_semaphores = [wait_semaphore.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.swapchain_handle));

        let result = unsafe { Gfx::get().gfx_device().swapchain.queue_present(queue.handle(), &present_info) };
        match result {
            Ok(false) => Ok(PresentStatus::Ok(())),
            Ok(true) => Ok(PresentStatus::Suboptimal(())),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(PresentStatus::OutOfDate)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// destroy
impl GfxRenderSwapchain {
    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().swapchain.destroy_swapchain(self.swapchain_handle, None);
        }
        self.swapchain_handle = vk::SwapchainKHR::null();
    }
}
impl Drop for GfxRenderSwapchain {
    fn drop(&mut self) {
        assert!(self.swapchain_handle.is_null());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let fixed = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let window = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        assert_eq!(GfxRenderSwapchain::calculate_swapchain_extent(&caps(fixed), window), fixed);
    }

    #[test]
    fn extent_clamps_window_when_free() {
        let free = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let window = vk::Extent2D {
            width: 10000,
            height: 0,
        };
        let extent = GfxRenderSwapchain::calculate_swapchain_extent(&caps(free), window);
        assert_eq!(extent.width, 4096);
        assert_eq!(extent.height, 1);
    }

    #[test]
    fn only_ok_skips_recreate() {
        assert!(!PresentStatus::Ok(0u32).needs_recreate());
        assert!(PresentStatus::Suboptimal(1u32).needs_recreate());
        assert!(PresentStatus::<u32>::OutOfDate.needs_recreate());
    }
}
