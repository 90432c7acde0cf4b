use ash::vk;

use crate::{error::GfxResult, foundation::debug_messenger::DebugType, gfx::Gfx};

/// vk::PipelineCache 的封装，初始数据来自上一次运行保存的 blob
pub struct GfxPipelineCache {
    handle: vk::PipelineCache,
}
impl GfxPipelineCache {
    /// 驱动会自行校验 blob 的 header，不匹配时忽略初始数据
    pub fn new(initial_data: Option<&[u8]>) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let create_info = vk::PipelineCacheCreateInfo::default().initial_data(initial_data.unwrap_or(&[]));
        let handle = unsafe { gfx_device.create_pipeline_cache(&create_info, None)? };
        let cache = Self { handle };
        gfx_device.set_debug_name(&cache, "main");
        Ok(cache)
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }

    /// 用于持久化的 cache 数据
    pub fn data(&self) -> GfxResult<Vec<u8>> {
        Ok(unsafe { Gfx::get().gfx_device().get_pipeline_cache_data(self.handle)? })
    }

    pub fn destroy(self) {
        unsafe { Gfx::get().gfx_device().destroy_pipeline_cache(self.handle, None) }
    }
}
impl DebugType for GfxPipelineCache {
    fn debug_type_name() -> &'static str {
        "GfxPipelineCache"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
