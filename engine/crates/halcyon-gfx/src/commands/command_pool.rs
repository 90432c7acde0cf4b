use std::rc::Rc;

use ash::vk;

use crate::{
    commands::{command_buffer::GfxCommandBuffer, command_queue::GfxQueueFamily},
    error::GfxResult,
    foundation::{debug_messenger::DebugType, device::GfxDevice},
    gfx::Gfx,
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    _queue_family: GfxQueueFamily,

    debug_name: String,
    valid: bool,
}
// new & init
impl GfxCommandPool {
    #[inline]
    pub fn new(queue_family: GfxQueueFamily, flags: vk::CommandPoolCreateFlags, debug_name: &str) -> GfxResult<Self> {
        Self::new_internal(&Gfx::get().gfx_core.gfx_device, queue_family, flags, debug_name)
    }

    /// 在 Gfx 单例初始化完成之前使用
    pub(crate) fn new_internal(
        gfx_device: &Rc<GfxDevice>,
        queue_family: GfxQueueFamily,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let pool = unsafe {
            gfx_device.create_command_pool(
                &vk::CommandPoolCreateInfo::default().queue_family_index(queue_family.queue_family_index).flags(flags),
                None,
            )?
        };

        let command_pool = Self {
            handle: pool,
            _queue_family: queue_family,
            debug_name: debug_name.to_string(),
            valid: true,
        };
        gfx_device.set_debug_name(&command_pool, debug_name);
        Ok(command_pool)
    }

    pub fn destroy(mut self) {
        self.destroy_internal(Gfx::get().gfx_device());
    }

    pub(crate) fn destroy_internal(&mut self, gfx_device: &GfxDevice) {
        unsafe {
            gfx_device.destroy_command_pool(self.handle, None);
        }
        self.valid = false;
    }
}

// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }
}
// tools
impl GfxCommandPool {
    /// 不会释放资源，而是将 pool 内的 command buffer 设置到初始状态
    pub fn reset_all_buffers(&self) -> GfxResult<()> {
        let gfx_device = Gfx::get().gfx_device();
        unsafe { gfx_device.reset_command_pool(self.handle, vk::CommandPoolResetFlags::RELEASE_RESOURCES)? };
        Ok(())
    }

    /// 释放之后，command buffer 不能再被使用
    pub fn free_command_buffers(&self, command_buffers: Vec<GfxCommandBuffer>) {
        let command_buffer_handles: Vec<vk::CommandBuffer> =
            command_buffers.iter().map(|cmd| cmd.vk_handle()).collect();
        unsafe {
            Gfx::get().gfx_device().free_command_buffers(self.handle, &command_buffer_handles);
        }
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        assert!(!self.valid, "GfxCommandPool must be destroyed manually: {}", self.debug_name);
    }
}
