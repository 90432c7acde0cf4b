use ash::vk;
use halcyon_gfx::{
    commands::{semaphore::GfxSemaphore, wait_timeout::WaitTimeout},
    error::GfxResult,
    resources::{image::GfxImage, image_view::GfxImageView},
    swapchain::render_swapchain::PresentStatus,
};
use halcyon_render_interface::pipeline_settings::DefaultRendererSettings;

use crate::present::presenter::{AcquiredImage, Presenter};

/// 在固定数量的图像之间轮转，从 1 开始：1 → 2 → 0 → 1 ...
#[derive(Debug, Clone, Copy)]
struct RotatingIndex {
    current: u32,
    count: u32,
}

impl RotatingIndex {
    fn new(count: u32) -> Self {
        assert!(count > 0);
        Self { current: 0, count }
    }

    fn advance(&mut self) -> u32 {
        self.current = (self.current + 1) % self.count;
        self.current
    }
}

/// 无窗口运行时使用的离屏呈现
///
/// 没有真正的 acquire：semaphore 不会被 signal，present 什么也不做。
pub struct DummyPresenter {
    images: Vec<GfxImage>,
    views: Vec<GfxImageView>,
    extent: vk::Extent2D,
    format: vk::Format,
    index: RotatingIndex,
}

// new & init
impl DummyPresenter {
    pub const DEFAULT_EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    pub fn new(extent: vk::Extent2D) -> GfxResult<Self> {
        let format = DefaultRendererSettings::DEFAULT_SURFACE_FORMAT.format;
        let mut presenter = Self {
            images: vec![],
            views: vec![],
            extent,
            format,
            index: RotatingIndex::new(DefaultRendererSettings::OFFSCREEN_IMAGE_COUNT as u32),
        };
        presenter.create_images()?;
        Ok(presenter)
    }

    fn create_images(&mut self) -> GfxResult<()> {
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC;
        for idx in 0..DefaultRendererSettings::OFFSCREEN_IMAGE_COUNT {
            let image = GfxImage::new_2d(self.extent, self.format, usage, &format!("offscreen-{idx}"))?;
            let view = GfxImageView::new_2d(
                image.handle(),
                self.format,
                vk::ImageAspectFlags::COLOR,
                format!("offscreen-{idx}"),
            )?;
            self.images.push(image);
            self.views.push(view);
        }
        log::info!(
            "created {} offscreen images {}x{}",
            self.images.len(),
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    fn destroy_images(&mut self) {
        self.views.drain(..).for_each(GfxImageView::destroy);
        self.images.drain(..).for_each(GfxImage::destroy);
    }
}

impl Presenter for DummyPresenter {
    #[inline]
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn acquire(&mut self, _available: &GfxSemaphore, _timeout: WaitTimeout) -> GfxResult<PresentStatus<AcquiredImage>> {
        Ok(PresentStatus::Ok(AcquiredImage {
            index: self.index.advance(),
            signaled: false,
        }))
    }

    fn present(&mut self, _image_index: u32, _ready: &GfxSemaphore) -> GfxResult<PresentStatus<()>> {
        Ok(PresentStatus::Ok(()))
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
        self.destroy_images();
        self.extent = extent;
        self.create_images()
    }

    fn image(&self, image_index: u32) -> (vk::Image, vk::ImageView) {
        let idx = image_index as usize;
        (self.images[idx].handle(), self.views[idx].handle())
    }

    fn present_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    }

    fn destroy(mut self) {
        self.destroy_images();
    }
}
