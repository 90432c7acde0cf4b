use ash::vk;

use crate::{error::GfxResult, foundation::debug_messenger::DebugType, gfx::Gfx};

pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
}
impl DebugType for GfxDescriptorPool {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl GfxDescriptorPool {
    pub fn new(
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        debug_name: &str,
    ) -> GfxResult<Self> {
        let pool_ci = vk::DescriptorPoolCreateInfo::default().flags(flags).max_sets(max_sets).pool_sizes(pool_sizes);
        let gfx_device = Gfx::get().gfx_device();
        let handle = unsafe { gfx_device.create_descriptor_pool(&pool_ci, None)? };
        let pool = Self { handle };
        gfx_device.set_debug_name(&pool, debug_name);
        Ok(pool)
    }

    /// descriptor sets 跟随 pool 一起销毁
    pub fn destroy(self) {
        unsafe { Gfx::get().gfx_device().destroy_descriptor_pool(self.handle, None) }
    }
}
// getters
impl GfxDescriptorPool {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }
}
