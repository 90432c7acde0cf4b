use ash::vk;

use crate::{error::GfxResult, foundation::debug_messenger::DebugType, gfx::Gfx};

pub struct GfxQueryPool {
    handle: vk::QueryPool,
    query_type: vk::QueryType,

    /// pool 的容量
    cnt: u32,
}
impl DebugType for GfxQueryPool {
    fn debug_type_name() -> &'static str {
        "GfxQueryPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
impl Drop for GfxQueryPool {
    fn drop(&mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_query_pool(self.handle, None);
        }
    }
}
impl GfxQueryPool {
    #[inline]
    pub fn new(ty: vk::QueryType, cnt: u32, debug_name: &str) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();
        let create_info = vk::QueryPoolCreateInfo::default().query_type(ty).query_count(cnt);

        let handle = unsafe { gfx_device.create_query_pool(&create_info, None)? };

        let query_pool = Self {
            handle,
            query_type: ty,
            cnt,
        };
        gfx_device.set_debug_name(&query_pool, debug_name);
        // host query reset：创建后立即 reset，保证第一次读取前处于可用状态
        query_pool.reset(0, cnt);
        Ok(query_pool)
    }

    #[inline]
    pub fn handle(&self) -> vk::QueryPool {
        self.handle
    }

    #[inline]
    pub fn query_type(&self) -> vk::QueryType {
        self.query_type
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.cnt
    }

    /// 读取 timestamp 结果，尚未写入的 query 返回 None
    pub fn get_timestamps(&self, first_index: u32, query_cnt: u32) -> GfxResult<Vec<Option<u64>>> {
        let gfx_device = Gfx::get().gfx_device();
        // 每个 query 两个 u64：值和 availability
        let mut res = vec![[0u64; 2]; query_cnt as usize];
        unsafe {
            gfx_device.get_query_pool_results(
                self.handle,
                first_index,
                &mut res,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WITH_AVAILABILITY,
            )
        }
        .or_else(|e| if e == vk::Result::NOT_READY { Ok(()) } else { Err(e) })?;
        Ok(res.into_iter().map(|[value, available]| (available != 0).then_some(value)).collect())
    }

    #[inline]
    pub fn reset(&self, first_query: u32, query_cnt: u32) {
        unsafe {
            Gfx::get().gfx_device().reset_query_pool(self.handle, first_query, query_cnt);
        }
    }

    #[inline]
    pub fn destroy(self) {
        drop(self)
    }
}
