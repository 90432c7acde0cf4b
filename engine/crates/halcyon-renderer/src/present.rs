pub mod dummy_presenter;
pub mod presenter;
pub mod swapchain_presenter;
