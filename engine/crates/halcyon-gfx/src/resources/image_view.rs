use ash::vk;
use ash::vk::Handle;

use crate::{error::GfxResult, foundation::debug_messenger::DebugType, gfx::Gfx};

pub struct GfxImageView {
    handle: vk::ImageView,
    format: vk::Format,
}
impl DebugType for GfxImageView {
    fn debug_type_name() -> &'static str {
        "GfxImage2DView"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl GfxImageView {
    pub fn new_2d(
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
        name: impl AsRef<str>,
    ) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();

        let info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let handle = unsafe { gfx_device.create_image_view(&info, None)? };
        let image_view = Self { handle, format };
        gfx_device.set_debug_name(&image_view, name);
        Ok(image_view)
    }
}
// destroy
impl GfxImageView {
    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_image_view(self.handle, None);
        }
        self.handle = vk::ImageView::null();
    }
}
impl Drop for GfxImageView {
    fn drop(&mut self) {
        debug_assert!(self.handle.is_null());
    }
}
// getters
impl GfxImageView {
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}
