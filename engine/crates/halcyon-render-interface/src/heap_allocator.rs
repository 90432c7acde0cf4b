//! 多个 block 组成的子分配器
//!
//! 每个 block 是全局 offset 空间中的一段 `[base, base + capacity)`，内部使用
//! `offset_allocator` 做 TLSF 风格的子分配。block 只增不减，已分配的 offset 在增长后依然有效。

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use offset_allocator::{Allocation, Allocator};

/// 单个 block 的最大单元数，也是 `offset_allocator` 能精确表示的最大 bin
const MAX_BLOCK_UNITS: u32 = 0xF000_0000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("heap block limit {max_blocks} reached while allocating {size} bytes")]
    BlockLimitReached { max_blocks: usize, size: u64 },

    #[error("allocation of {size} bytes exceeds the addressable block size")]
    TooLarge { size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapAllocatorConfig {
    /// 必须是 2 的幂；所有 offset 和 size 都是它的整数倍
    pub alignment: u64,
    pub default_block_size: u64,
    /// None 表示不限制 block 数量
    pub max_blocks: Option<usize>,
}

impl Default for HeapAllocatorConfig {
    fn default() -> Self {
        Self {
            alignment: 16,
            default_block_size: 64 * 1024 * 1024,
            max_blocks: None,
        }
    }
}

/// 一次分配的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapAllocation {
    /// 全局 offset 空间中的起始位置
    pub offset: u64,
    pub size: u64,
    pub block: usize,
    /// 这次分配是否新建了 block
    pub grew: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub block_count: usize,
    pub total_capacity: u64,
    pub used_bytes: u64,
    pub live_allocations: usize,
}

struct LiveRange {
    allocation: Allocation,
    size: u64,
}

struct BlockState {
    allocator: Allocator,
    /// key 是全局 offset
    live: HashMap<u64, LiveRange>,
    used_bytes: u64,
}

struct HeapBlock {
    base: u64,
    capacity: u64,
    state: Mutex<BlockState>,
}

impl HeapBlock {
    fn new(base: u64, capacity_units: u32, alignment: u64) -> Self {
        Self {
            base,
            capacity: capacity_units as u64 * alignment,
            state: Mutex::new(BlockState {
                allocator: Allocator::new(capacity_units),
                live: HashMap::new(),
                used_bytes: 0,
            }),
        }
    }

    #[inline]
    fn contains(&self, offset: u64) -> bool {
        self.base <= offset && offset < self.base + self.capacity
    }

    fn try_allocate(&self, size: u64, alignment: u64) -> Option<u64> {
        let units = (size / alignment) as u32;
        let mut state = self.state.lock().unwrap();
        let allocation = state.allocator.allocate(units)?;
        let offset = self.base + allocation.offset as u64 * alignment;
        state.live.insert(offset, LiveRange { allocation, size });
        state.used_bytes += size;
        Some(offset)
    }
}

/// # 并发
/// - block 列表使用 RwLock，分配和释放只需要读锁
/// - 每个 block 有自己的 Mutex，一次调用只会锁住一个 block
/// - 新建 block 由单独的 grow 锁串行化
pub struct HeapAllocator {
    config: HeapAllocatorConfig,
    blocks: RwLock<Vec<HeapBlock>>,
    grow_lock: Mutex<()>,
}

// new & init
impl HeapAllocator {
    pub fn new(config: HeapAllocatorConfig) -> Self {
        assert!(config.alignment.is_power_of_two(), "heap alignment must be a power of two");
        assert!(config.default_block_size >= config.alignment, "heap block must hold at least one aligned unit");
        Self {
            config,
            blocks: RwLock::new(Vec::new()),
            grow_lock: Mutex::new(()),
        }
    }
}

// getters
impl HeapAllocator {
    #[inline]
    pub fn config(&self) -> &HeapAllocatorConfig {
        &self.config
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.config.alignment
    }

    /// 所有 block 容量之和，也就是全局 offset 空间的大小
    pub fn total_capacity(&self) -> u64 {
        self.blocks.read().unwrap().iter().map(|b| b.capacity).sum()
    }

    pub fn stats(&self) -> HeapStats {
        let blocks = self.blocks.read().unwrap();
        let mut stats = HeapStats {
            block_count: blocks.len(),
            ..Default::default()
        };
        for block in blocks.iter() {
            let state = block.state.lock().unwrap();
            stats.total_capacity += block.capacity;
            stats.used_bytes += state.used_bytes;
            stats.live_allocations += state.live.len();
        }
        stats
    }
}

// tools
impl HeapAllocator {
    /// # Panics
    /// size 为 0 或者不是 alignment 的整数倍
    pub fn allocate(&self, size: u64) -> Result<HeapAllocation, HeapError> {
        let _span = tracy_client::span!("HeapAllocator::allocate");
        let alignment = self.config.alignment;
        assert!(size > 0 && size % alignment == 0, "heap allocation size {size} is not a non-zero multiple of {alignment}");
        if size / alignment > MAX_BLOCK_UNITS as u64 {
            return Err(HeapError::TooLarge { size });
        }

        let scanned = {
            let blocks = self.blocks.read().unwrap();
            if let Some(allocation) = Self::scan(&blocks, 0, size, alignment) {
                return Ok(allocation);
            }
            blocks.len()
        };

        // 没有合适的 block，串行化增长；拿到锁后先检查期间新建的 block
        let _grow_guard = self.grow_lock.lock().unwrap();
        {
            let blocks = self.blocks.read().unwrap();
            if let Some(allocation) = Self::scan(&blocks, scanned, size, alignment) {
                return Ok(allocation);
            }
        }

        let mut blocks = self.blocks.write().unwrap();
        let block_index = self.push_block(&mut blocks, self.config.default_block_size.max(size), size)?;
        let offset = blocks[block_index].try_allocate(size, alignment).ok_or(HeapError::TooLarge { size })?;

        Ok(HeapAllocation {
            offset,
            size,
            block: block_index,
            grew: true,
        })
    }

    /// 不分配任何范围，直接追加一个至少 size 字节的 block，返回 block 序号
    ///
    /// 用于预先占好初始容量，同样受 `max_blocks` 限制
    pub fn reserve_block(&self, size: u64) -> Result<usize, HeapError> {
        let size = size.max(1).next_multiple_of(self.config.alignment);
        if size / self.config.alignment > MAX_BLOCK_UNITS as u64 {
            return Err(HeapError::TooLarge { size });
        }
        let _grow_guard = self.grow_lock.lock().unwrap();
        let mut blocks = self.blocks.write().unwrap();
        self.push_block(&mut blocks, size, size)
    }

    /// # Panics
    /// offset 不是一个存活的分配
    pub fn deallocate(&self, offset: u64) {
        let _span = tracy_client::span!("HeapAllocator::deallocate");
        let blocks = self.blocks.read().unwrap();
        let block_index = blocks.partition_point(|b| b.base + b.capacity <= offset);
        let Some(block) = blocks.get(block_index).filter(|b| b.contains(offset)) else {
            panic!("heap deallocate: offset {offset} is outside every block");
        };

        let mut state = block.state.lock().unwrap();
        let Some(range) = state.live.remove(&offset) else {
            panic!("heap deallocate: offset {offset} is not a live allocation");
        };
        state.used_bytes -= range.size;
        state.allocator.free(range.allocation);
    }

    /// 调用方需要持有 grow 锁
    ///
    /// 容量取整到 `offset_allocator` 的 bin 边界：空闲节点按向下取整的 bin 归档，
    /// 非 bin 边界的容量在整块空闲时放不下与容量等大的请求
    fn push_block(&self, blocks: &mut Vec<HeapBlock>, capacity: u64, size: u64) -> Result<usize, HeapError> {
        if let Some(max_blocks) = self.config.max_blocks {
            if blocks.len() >= max_blocks {
                return Err(HeapError::BlockLimitReached { max_blocks, size });
            }
        }

        let alignment = self.config.alignment;
        let units = capacity.div_ceil(alignment).min(MAX_BLOCK_UNITS as u64) as u32;
        let capacity_units = offset_allocator::ext::min_allocator_size(units);

        let base = blocks.iter().map(|b| b.capacity).sum();
        let block = HeapBlock::new(base, capacity_units, alignment);
        let block_index = blocks.len();
        log::debug!(
            "heap grew: block {} at base {} with capacity {} bytes",
            block_index,
            block.base,
            block.capacity
        );
        blocks.push(block);
        Ok(block_index)
    }

    /// 按创建顺序从 start 开始扫描 block
    fn scan(blocks: &[HeapBlock], start: usize, size: u64, alignment: u64) -> Option<HeapAllocation> {
        blocks.iter().enumerate().skip(start).find_map(|(block_index, block)| {
            if block.capacity < size {
                return None;
            }
            block.try_allocate(size, alignment).map(|offset| HeapAllocation {
                offset,
                size,
                block: block_index,
                grew: false,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rayon::prelude::*;

    use super::*;

    fn small_heap() -> HeapAllocator {
        HeapAllocator::new(HeapAllocatorConfig {
            alignment: 16,
            default_block_size: 1024,
            max_blocks: None,
        })
    }

    fn assert_disjoint(allocations: &[HeapAllocation]) {
        let mut ranges = allocations.iter().map(|a| (a.offset, a.offset + a.size)).collect::<Vec<_>>();
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap: {:?} and {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn allocations_do_not_overlap_and_are_aligned() {
        let heap = small_heap();
        let sizes = [16, 32, 48, 64, 16, 128, 80, 256, 16, 32];
        let allocations = sizes.iter().map(|s| heap.allocate(*s).unwrap()).collect::<Vec<_>>();

        assert_disjoint(&allocations);
        for a in &allocations {
            assert_eq!(a.offset % 16, 0);
        }
        let stats = heap.stats();
        assert_eq!(stats.live_allocations, sizes.len());
        assert_eq!(stats.used_bytes, sizes.iter().sum::<u64>());
    }

    #[test]
    fn first_allocation_creates_a_block() {
        let heap = small_heap();
        assert_eq!(heap.stats().block_count, 0);
        let a = heap.allocate(64).unwrap();
        assert!(a.grew);
        assert_eq!(a.block, 0);
        assert!(!heap.allocate(64).unwrap().grew);
    }

    #[test]
    fn growth_adds_exactly_one_block() {
        let heap = small_heap();
        let full = heap.allocate(1024).unwrap();
        assert_eq!(full.offset, 0);

        let next = heap.allocate(16).unwrap();
        assert!(next.grew);
        assert_eq!(next.block, 1);
        assert_eq!(next.offset, 1024);

        let stats = heap.stats();
        assert_eq!(stats.block_count, 2);
        assert_eq!(stats.total_capacity, 2048);
    }

    #[test]
    fn oversized_request_gets_its_own_block() {
        let heap = small_heap();
        heap.allocate(16).unwrap();
        let big = heap.allocate(4096).unwrap();
        assert!(big.grew);
        assert_eq!(big.block, 1);
        assert!(heap.stats().total_capacity >= 1024 + 4096);
    }

    #[test]
    fn free_all_then_full_block_allocation_does_not_grow() {
        let heap = small_heap();
        let allocations = (0..16).map(|_| heap.allocate(64).unwrap()).collect::<Vec<_>>();
        assert_eq!(heap.stats().block_count, 1);

        for a in &allocations {
            heap.deallocate(a.offset);
        }
        assert_eq!(heap.stats().used_bytes, 0);

        let full = heap.allocate(1024).unwrap();
        assert!(!full.grew);
        assert_eq!(full.block, 0);
        assert_eq!(heap.stats().block_count, 1);
    }

    #[test]
    fn freed_range_in_later_block_is_reused() {
        let heap = small_heap();
        heap.allocate(1024).unwrap();
        let second = heap.allocate(512).unwrap();
        heap.deallocate(second.offset);
        let again = heap.allocate(512).unwrap();
        assert!(!again.grew);
        assert_eq!(again.block, 1);
    }

    #[test]
    fn block_limit_is_reported() {
        let heap = HeapAllocator::new(HeapAllocatorConfig {
            alignment: 16,
            default_block_size: 256,
            max_blocks: Some(1),
        });
        heap.allocate(256).unwrap();
        assert_eq!(heap.allocate(16), Err(HeapError::BlockLimitReached { max_blocks: 1, size: 16 }));
    }

    fn uneven_heap() -> HeapAllocator {
        HeapAllocator::new(HeapAllocatorConfig {
            alignment: 16,
            default_block_size: 16000,
            max_blocks: None,
        })
    }

    #[test]
    fn block_capacity_is_rounded_up_to_a_bin() {
        let heap = uneven_heap();
        heap.allocate(16).unwrap();
        // 1000 个单元取整到 1024
        assert_eq!(heap.total_capacity(), 16384);
    }

    #[test]
    fn emptied_block_takes_its_nominal_size() {
        let heap = uneven_heap();
        let small = heap.allocate(16).unwrap();
        heap.deallocate(small.offset);

        let whole = heap.allocate(16000).unwrap();
        assert!(!whole.grew);
        assert_eq!(whole.block, 0);
        assert_eq!(heap.stats().block_count, 1);
    }

    #[test]
    fn quarters_of_an_uneven_block_fit_in_it() {
        let heap = uneven_heap();
        let quarters = (0..4).map(|_| heap.allocate(4000).unwrap()).collect::<Vec<_>>();

        assert!(quarters[1..].iter().all(|a| !a.grew && a.block == 0));
        assert_disjoint(&quarters);
        assert_eq!(heap.stats().block_count, 1);

        for a in &quarters {
            heap.deallocate(a.offset);
        }
        let full = heap.allocate(heap.total_capacity()).unwrap();
        assert!(!full.grew);
    }

    #[test]
    fn reserved_block_is_used_before_growing() {
        let heap = HeapAllocator::new(HeapAllocatorConfig {
            alignment: 16,
            default_block_size: 256,
            max_blocks: Some(1),
        });
        assert_eq!(heap.reserve_block(1000), Ok(0));
        assert_eq!(heap.total_capacity(), 1024);
        assert_eq!(heap.stats().used_bytes, 0);

        let a = heap.allocate(1024).unwrap();
        assert!(!a.grew);
        assert_eq!(heap.reserve_block(16), Err(HeapError::BlockLimitReached { max_blocks: 1, size: 16 }));
    }

    #[test]
    #[should_panic(expected = "not a non-zero multiple")]
    fn misaligned_size_panics() {
        small_heap().allocate(24).ok();
    }

    #[test]
    #[should_panic(expected = "not a live allocation")]
    fn double_free_panics() {
        let heap = small_heap();
        let a = heap.allocate(32).unwrap();
        heap.deallocate(a.offset);
        heap.deallocate(a.offset);
    }

    #[test]
    fn concurrent_allocations_are_disjoint() {
        let heap = Arc::new(small_heap());
        let allocations = (0..256)
            .into_par_iter()
            .map(|i| heap.allocate(16 * (1 + i % 4)).unwrap())
            .collect::<Vec<_>>();
        assert_disjoint(&allocations);

        let stats = heap.stats();
        assert_eq!(stats.live_allocations, 256);
        // 一次增长只新建一个 block，不会出现多余的空 block
        assert!(stats.used_bytes <= stats.total_capacity);

        allocations.par_iter().for_each(|a| heap.deallocate(a.offset));
        assert_eq!(heap.stats().live_allocations, 0);
    }
}
