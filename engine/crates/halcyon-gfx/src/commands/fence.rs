use ash::vk;

use crate::{
    commands::wait_timeout::WaitTimeout,
    error::{GfxError, GfxResult},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

/// # Destroy
/// 可以 Clone，因此不实现 Drop，需要手动 destroy
#[derive(Clone)]
pub struct GfxFence {
    fence: vk::Fence,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

// new & init
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(signaled: bool, debug_name: &str) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { gfx_device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None)? };

        let fence = Self { fence };
        gfx_device.set_debug_name(&fence, debug_name);
        Ok(fence)
    }

    #[inline]
    pub fn destroy(self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_fence(self.fence, None);
        }
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence；有限超时到期时返回 `GfxError::Timeout`
    pub fn wait(&self, timeout: WaitTimeout) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxFence::wait");
        let gfx_device = Gfx::get().gfx_device();
        let timeout_ns = timeout.as_nanos();
        let result = unsafe { gfx_device.wait_for_fences(std::slice::from_ref(&self.fence), true, timeout_ns) };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GfxError::Timeout {
                what: "fence",
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        let gfx_device = Gfx::get().gfx_device();
        unsafe { gfx_device.reset_fences(std::slice::from_ref(&self.fence))? };
        Ok(())
    }
}
