use ash::vk;
use halcyon_gfx::{
    error::GfxError,
    gfx::Gfx,
    resources::buffer::{BufferRole, GfxBuffer, GfxBufferDesc, MemoryDomain},
};

use crate::heap_buffer::HeapStorage;

/// device local 的 [`GfxBuffer`] 存储
///
/// 写入通过 staging buffer 同步上传；增长时新建 buffer 并在 GPU 上拷贝旧内容。
/// 首次增长之前没有 vulkan 对象。
pub struct GfxHeapStorage {
    buffer: Option<GfxBuffer>,
    role: BufferRole,
    name: String,
}

// new & init
impl GfxHeapStorage {
    pub fn new(role: BufferRole, name: impl Into<String>) -> Self {
        Self {
            buffer: None,
            role,
            name: name.into(),
        }
    }
}

// getters
impl GfxHeapStorage {
    #[inline]
    pub fn buffer(&self) -> Option<&GfxBuffer> {
        self.buffer.as_ref()
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer.as_ref().map(|b| b.vk_buffer()).unwrap_or_default()
    }
}

// destroy
impl GfxHeapStorage {
    pub fn destroy(self) {
        if let Some(buffer) = self.buffer {
            buffer.destroy();
        }
    }
}

impl HeapStorage for GfxHeapStorage {
    fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |b| b.size())
    }

    fn raw_handle(&self) -> u64 {
        vk::Handle::as_raw(self.vk_buffer())
    }

    fn grow(&mut self, new_capacity: u64) -> Result<(), GfxError> {
        let _span = tracy_client::span!("GfxHeapStorage::grow");
        let new_buffer = GfxBuffer::new(
            GfxBufferDesc::new(new_capacity, self.role, MemoryDomain::Device),
            format!("{}-{}", self.name, new_capacity),
        )?;

        if let Some(old_buffer) = self.buffer.take() {
            let region = vk::BufferCopy::default().size(old_buffer.size());
            Gfx::get().one_time_exec(
                |cmd| cmd.cmd_copy_buffer(&old_buffer, &new_buffer, std::slice::from_ref(&region)),
                "heap-copy-forward",
            )?;
            old_buffer.destroy();
        }
        self.buffer = Some(new_buffer);
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), GfxError> {
        match &self.buffer {
            Some(buffer) => buffer.transfer_data_sync(bytes, offset),
            // 容量为 0 时只可能出现空写入
            None => {
                debug_assert!(bytes.is_empty());
                Ok(())
            }
        }
    }
}
