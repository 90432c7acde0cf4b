use ash::vk;
use halcyon_gfx::{
    commands::{semaphore::GfxSemaphore, wait_timeout::WaitTimeout},
    error::GfxResult,
    gfx::Gfx,
    resources::image_view::GfxImageView,
    swapchain::{
        render_swapchain::{GfxRenderSwapchain, PresentStatus},
        surface::GfxSurface,
    },
};
use halcyon_render_interface::{config::PresentConfig, pipeline_settings::DefaultRendererSettings};

use crate::present::presenter::{AcquiredImage, Presenter};

/// 基于窗口 surface 的呈现
pub struct SwapchainPresenter {
    swapchain: Option<GfxRenderSwapchain>,
    image_views: Vec<GfxImageView>,
}

// new & init
impl SwapchainPresenter {
    /// 呈现模式由 `present.vsync` 决定：打开时使用 FIFO，否则优先 MAILBOX
    pub fn new(
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
        window_extent: vk::Extent2D,
        present: &PresentConfig,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("SwapchainPresenter::new");
        let surface = GfxSurface::new(raw_display_handle, raw_window_handle)?;
        let surface_format = surface.select_format(DefaultRendererSettings::SURFACE_FORMAT_CANDIDATES)?;
        let present_mode = surface.select_present_mode(present.present_mode_candidates())?;
        log::info!("surface format {:?}, present mode {:?}", surface_format.format, present_mode);

        let swapchain = GfxRenderSwapchain::new(surface, present_mode, surface_format, window_extent)?;
        let mut presenter = Self {
            swapchain: Some(swapchain),
            image_views: vec![],
        };
        presenter.create_image_views()?;
        Ok(presenter)
    }

    fn create_image_views(&mut self) -> GfxResult<()> {
        let swapchain = self.swapchain();
        let format = swapchain.format();
        let views = swapchain
            .present_images()
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                GfxImageView::new_2d(*image, format, vk::ImageAspectFlags::COLOR, format!("swapchain-{idx}"))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        self.image_views = views;
        Ok(())
    }

    #[inline]
    fn swapchain(&self) -> &GfxRenderSwapchain {
        self.swapchain.as_ref().expect("swapchain already destroyed")
    }
}

impl Presenter for SwapchainPresenter {
    #[inline]
    fn extent(&self) -> vk::Extent2D {
        self.swapchain().extent()
    }

    #[inline]
    fn format(&self) -> vk::Format {
        self.swapchain().format()
    }

    #[inline]
    fn image_count(&self) -> usize {
        self.swapchain().present_images().len()
    }

    fn acquire(&mut self, available: &GfxSemaphore, timeout: WaitTimeout) -> GfxResult<PresentStatus<AcquiredImage>> {
        let status = self.swapchain().acquire_next_image(available, timeout)?;
        let image = |index| AcquiredImage { index, signaled: true };
        Ok(match status {
            PresentStatus::Ok(index) => PresentStatus::Ok(image(index)),
            PresentStatus::Suboptimal(index) => PresentStatus::Suboptimal(image(index)),
            PresentStatus::OutOfDate => PresentStatus::OutOfDate,
        })
    }

    fn present(&mut self, image_index: u32, ready: &GfxSemaphore) -> GfxResult<PresentStatus<()>> {
        self.swapchain().present_image(Gfx::get().gfx_queue(), image_index, ready)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> GfxResult<()> {
        self.image_views.drain(..).for_each(GfxImageView::destroy);
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.recreate(extent)?;
        }
        self.create_image_views()
    }

    fn image(&self, image_index: u32) -> (vk::Image, vk::ImageView) {
        let idx = image_index as usize;
        (self.swapchain().present_images()[idx], self.image_views[idx].handle())
    }

    #[inline]
    fn present_layout(&self) -> vk::ImageLayout {
        vk::ImageLayout::PRESENT_SRC_KHR
    }

    fn destroy(mut self) {
        self.image_views.drain(..).for_each(GfxImageView::destroy);
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy();
        }
    }
}
