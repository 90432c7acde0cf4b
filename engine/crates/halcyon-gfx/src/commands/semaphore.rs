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
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
}

// new & init
impl GfxSemaphore {
    pub fn new(debug_name: &str) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let semaphore = unsafe { gfx_device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };

        let semaphore = Self { semaphore };
        gfx_device.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    pub fn new_timeline(initial_value: u64, debug_name: &str) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { gfx_device.create_semaphore(&timeline_semaphore_ci, None)? };

        let semaphore = Self { semaphore };
        gfx_device.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    #[inline]
    pub fn destroy(self) {
        let gfx_device = Gfx::get().gfx_device();
        unsafe {
            gfx_device.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

// tools
impl GfxSemaphore {
    pub fn wait_timeline(&self, timeline_value: u64, timeout: WaitTimeout) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxSemaphore::wait_timeline");
        let gfx_device = Gfx::get().gfx_device();
        let timeout_ns = timeout.as_nanos();
        let wait_semaphore = [self.semaphore];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&wait_semaphore)
            .values(std::slice::from_ref(&timeline_value));
        match unsafe { gfx_device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GfxError::Timeout {
                what: "timeline semaphore",
                timeout_ns,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}
