use ash::vk;
use halcyon_gfx::{
    commands::{semaphore::GfxSemaphore, wait_timeout::WaitTimeout},
    error::GfxResult,
    swapchain::render_swapchain::PresentStatus,
};

/// acquire 得到的图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// acquire 时传入的 semaphore 是否会被 signal
    ///
    /// 为 false 时提交不等待 image-available，也不 signal render-finished
    pub signaled: bool,
}

/// 渲染结果的去处：窗口的 swapchain，或者离屏的图像
pub trait Presenter {
    fn extent(&self) -> vk::Extent2D;

    fn format(&self) -> vk::Format;

    fn image_count(&self) -> usize;

    fn acquire(&mut self, available: &GfxSemaphore, timeout: WaitTimeout) -> GfxResult<PresentStatus<AcquiredImage>>;

    fn present(&mut self, image_index: u32, ready: &GfxSemaphore) -> GfxResult<PresentStatus<()>>;

    /// 调用前需要确保图像不再被 GPU 使用
    fn recreate(&mut self, extent: vk::Extent2D) -> GfxResult<()>;

    /// (image, view)
    fn image(&self, image_index: u32) -> (vk::Image, vk::ImageView);

    /// 绘制结束后图像需要处于的 layout
    fn present_layout(&self) -> vk::ImageLayout;

    fn destroy(self)
    where
        Self: Sized;
}
