use crate::heap_allocator::{HeapAllocator, HeapAllocatorConfig, HeapError};
use halcyon_gfx::error::GfxError;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum HeapBufferError {
    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error("heap storage: {0}")]
    Storage(#[from] GfxError),

    #[error("write of {len} bytes at {offset} is outside the heap storage ({capacity} bytes)")]
    OutOfBounds { offset: u64, len: u64, capacity: u64 },
}

/// 堆的增长策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeapGrowthPolicy {
    /// 空间不足时追加 block，存储随之重新分配
    #[default]
    Grow,
    /// 预先分配一个 block，之后不再增长
    Fixed,
}

/// HeapBuffer 背后的物理存储
pub trait HeapStorage {
    fn capacity(&self) -> u64;

    /// 当前物理资源的原始句柄，增长后会变化
    fn raw_handle(&self) -> u64;

    /// 重新分配为 new_capacity，并把 `[0, capacity)` 的内容拷贝到新存储
    fn grow(&mut self, new_capacity: u64) -> Result<(), GfxError>;

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), GfxError>;
}

/// CPU 内存中的存储，用于测试和 CPU 参考实现
#[derive(Debug, Default)]
pub struct HostHeapStorage {
    bytes: Vec<u8>,
    /// 每次增长都会换一个新的 "句柄"
    handle: u64,
}

impl HostHeapStorage {
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl HeapStorage for HostHeapStorage {
    fn capacity(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn raw_handle(&self) -> u64 {
        self.handle
    }

    fn grow(&mut self, new_capacity: u64) -> Result<(), GfxError> {
        let mut bytes = vec![0u8; new_capacity as usize];
        bytes[..self.bytes.len()].copy_from_slice(&self.bytes);
        self.bytes = bytes;
        self.handle += 1;
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), GfxError> {
        let offset = offset as usize;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// HeapBuffer 的尺寸参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBufferDesc {
    /// 2 的幂
    pub alignment: u64,
    /// 创建时立即占用的第一个 block
    pub initial_capacity: u64,
    /// `Grow` 时之后每次追加的 block 大小
    pub block_size: u64,
    pub policy: HeapGrowthPolicy,
}

/// 由 [`HeapAllocator`] 管理的单个大 buffer
///
/// 持有者需要缓存 `(raw_handle, generation)`，generation 变化时重新绑定
pub struct HeapBuffer<S: HeapStorage> {
    allocator: HeapAllocator,
    storage: S,
    generation: u64,
    policy: HeapGrowthPolicy,
}

// new & init
impl<S: HeapStorage> HeapBuffer<S> {
    /// 第一个 block 在这里创建，存储按它的实际容量分配；`Fixed` 之后不再追加 block
    pub fn new(desc: HeapBufferDesc, mut storage: S) -> Result<Self, HeapBufferError> {
        let alignment = desc.alignment;
        let config = HeapAllocatorConfig {
            alignment,
            default_block_size: desc.block_size.max(alignment).next_multiple_of(alignment),
            max_blocks: match desc.policy {
                HeapGrowthPolicy::Grow => None,
                HeapGrowthPolicy::Fixed => Some(1),
            },
        };
        let allocator = HeapAllocator::new(config);
        allocator.reserve_block(desc.initial_capacity)?;

        let capacity = allocator.total_capacity();
        if storage.capacity() < capacity {
            storage.grow(capacity)?;
        }
        Ok(Self {
            allocator,
            storage,
            generation: 0,
            policy: desc.policy,
        })
    }
}

// getters
impl<S: HeapStorage> HeapBuffer<S> {
    #[inline]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn policy(&self) -> HeapGrowthPolicy {
        self.policy
    }

    #[inline]
    pub fn allocator(&self) -> &HeapAllocator {
        &self.allocator
    }
}

// tools
impl<S: HeapStorage> HeapBuffer<S> {
    /// 返回字节 offset；size 向上取整到 alignment
    pub fn allocate(&mut self, size: u64) -> Result<u64, HeapBufferError> {
        let size = size.max(1).next_multiple_of(self.allocator.alignment());
        let allocation = self.allocator.allocate(size)?;

        let required = self.allocator.total_capacity();
        if allocation.grew && self.storage.capacity() < required {
            if let Err(e) = self.storage.grow(required) {
                self.allocator.deallocate(allocation.offset);
                return Err(e.into());
            }
            self.generation += 1;
            log::info!("heap buffer storage grew to {} bytes, generation {}", required, self.generation);
        }
        Ok(allocation.offset)
    }

    pub fn free(&mut self, offset: u64) {
        self.allocator.deallocate(offset);
    }

    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T], offset: u64) -> Result<(), HeapBufferError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let capacity = self.storage.capacity();
        if offset + bytes.len() as u64 > capacity {
            return Err(HeapBufferError::OutOfBounds {
                offset,
                len: bytes.len() as u64,
                capacity,
            });
        }
        self.storage.write(offset, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(capacity: u64, policy: HeapGrowthPolicy) -> HeapBufferDesc {
        HeapBufferDesc {
            alignment: 16,
            initial_capacity: capacity,
            block_size: capacity,
            policy,
        }
    }

    fn heap(capacity: u64, policy: HeapGrowthPolicy) -> HeapBuffer<HostHeapStorage> {
        HeapBuffer::new(desc(capacity, policy), HostHeapStorage::default()).unwrap()
    }

    #[test]
    fn allocation_rounds_up_to_alignment() {
        let mut heap = heap(256, HeapGrowthPolicy::Grow);
        let a = heap.allocate(5).unwrap();
        let b = heap.allocate(17).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 16);
        assert_eq!(heap.allocator().stats().used_bytes, 48);
    }

    #[test]
    fn initial_block_is_allocated_up_front() {
        let mut heap = heap(64, HeapGrowthPolicy::Grow);
        assert_eq!(heap.storage().capacity(), 64);
        assert_eq!(heap.allocator().stats().block_count, 1);

        assert_eq!(heap.allocate(64).unwrap(), 0);
        assert_eq!(heap.generation(), 0);
    }

    #[test]
    fn growth_copies_contents_and_bumps_generation() {
        let mut heap = heap(64, HeapGrowthPolicy::Grow);
        let first = heap.allocate(64).unwrap();
        heap.write(&[7u32; 16], first).unwrap();
        let handle = heap.storage().raw_handle();

        let second = heap.allocate(16).unwrap();
        assert_eq!(second, 64);
        assert_eq!(heap.generation(), 1);
        assert_ne!(heap.storage().raw_handle(), handle);
        assert_eq!(heap.storage().capacity(), 128);
        let copied: &[u32] = bytemuck::cast_slice(&heap.storage().bytes()[..64]);
        assert!(copied.iter().all(|v| *v == 7));
    }

    #[test]
    fn growth_uses_block_size_after_the_initial_block() {
        let mut heap = HeapBuffer::new(
            HeapBufferDesc {
                alignment: 16,
                initial_capacity: 64,
                block_size: 256,
                policy: HeapGrowthPolicy::Grow,
            },
            HostHeapStorage::default(),
        )
        .unwrap();
        heap.allocate(64).unwrap();
        assert_eq!(heap.allocate(16).unwrap(), 64);
        assert_eq!(heap.storage().capacity(), 64 + 256);
    }

    #[test]
    fn fixed_heap_is_presized_and_never_grows() {
        let mut heap = heap(128, HeapGrowthPolicy::Fixed);
        assert_eq!(heap.storage().capacity(), 128);

        heap.allocate(128).unwrap();
        assert_eq!(heap.generation(), 0);
        assert!(matches!(
            heap.allocate(16),
            Err(HeapBufferError::Heap(HeapError::BlockLimitReached { .. }))
        ));
    }

    #[test]
    fn fixed_heap_rejects_a_request_larger_than_itself() {
        let mut heap = heap(128, HeapGrowthPolicy::Fixed);
        assert!(matches!(
            heap.allocate(256),
            Err(HeapBufferError::Heap(HeapError::BlockLimitReached { max_blocks: 1, size: 256 }))
        ));
        assert_eq!(heap.storage().capacity(), 128);
        assert_eq!(heap.generation(), 0);
        assert_eq!(heap.allocator().stats().block_count, 1);
    }

    #[test]
    fn write_outside_storage_is_rejected() {
        let mut heap = heap(64, HeapGrowthPolicy::Fixed);
        let err = heap.write(&[0u8; 32], 48).unwrap_err();
        assert!(matches!(err, HeapBufferError::OutOfBounds { offset: 48, len: 32, capacity: 64 }));
    }

    #[test]
    fn freed_range_is_reused_without_growth() {
        let mut heap = heap(64, HeapGrowthPolicy::Grow);
        let a = heap.allocate(64).unwrap();
        heap.free(a);
        assert_eq!(heap.allocate(32).unwrap(), 0);
        assert_eq!(heap.generation(), 0);
        assert_eq!(heap.storage().capacity(), 64);
    }
}
