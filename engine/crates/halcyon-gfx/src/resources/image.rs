use ash::vk;
use ash::vk::Handle;
use vk_mem::{Alloc, Allocation};

use crate::{error::GfxResult, foundation::debug_messenger::DebugType, gfx::Gfx};

/// Image 来源
pub enum ImageSource {
    /// 由 VMA 分配的 Image
    Allocated(Allocation),
    /// 外部 Image（例如 Swapchain Image），不管理其内存生命周期
    External,
}

pub struct GfxImage {
    handle: vk::Image,
    source: ImageSource,

    extent: vk::Extent2D,
    format: vk::Format,

    name: String,
}
// getters
impl GfxImage {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}
// new & init
impl GfxImage {
    /// 2D 的 device local image，用作 render target 或 depth attachment
    pub fn new_2d(
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent.into())
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, alloc) = unsafe { Gfx::get().allocator().create_image(&image_ci, &alloc_ci)? };
        let image = Self {
            handle: image,
            source: ImageSource::Allocated(alloc),
            extent,
            format,
            name: debug_name.to_string(),
        };
        Gfx::get().gfx_device().set_debug_name(&image, debug_name);
        Ok(image)
    }

    /// 包装外部 image（例如 swapchain image），不负责释放内存
    pub fn from_external(handle: vk::Image, extent: vk::Extent2D, format: vk::Format, debug_name: &str) -> Self {
        let image = Self {
            handle,
            source: ImageSource::External,
            extent,
            format,
            name: debug_name.to_string(),
        };
        Gfx::get().gfx_device().set_debug_name(&image, debug_name);
        image
    }
}
impl DebugType for GfxImage {
    fn debug_type_name() -> &'static str {
        "GfxImage2D"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// destroy
impl GfxImage {
    pub fn destroy(mut self) {
        log::debug!("destroying GfxImage: {}", self.name);

        match &mut self.source {
            ImageSource::External => (),
            ImageSource::Allocated(allocation) => unsafe {
                Gfx::get().allocator().destroy_image(self.handle, allocation)
            },
        }
        self.handle = vk::Image::null();
    }
}
impl Drop for GfxImage {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null(), "GfxImage must be destroyed manually: {}", self.name);
    }
}
