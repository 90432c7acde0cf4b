use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;
use halcyon_gfx::{descriptors::bindless_layout::BindlessKind, error::GfxError};
use itertools::Itertools;

use crate::handles::{BindlessSlot, ResourceIdentity};

/// 写入 bindless 数组的一个描述符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindlessDescriptor {
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    SampledImage {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

impl BindlessDescriptor {
    #[inline]
    pub fn kind(&self) -> BindlessKind {
        match self {
            BindlessDescriptor::StorageBuffer { .. } => BindlessKind::StorageBuffer,
            BindlessDescriptor::UniformBuffer { .. } => BindlessKind::UniformBuffer,
            BindlessDescriptor::SampledImage { .. } => BindlessKind::Texture,
        }
    }
}

/// 可以注册到 bindless 表中的资源
pub trait BindlessResource {
    fn identity(&self) -> ResourceIdentity;
    fn descriptor(&self) -> BindlessDescriptor;
}

/// 描述符的最终去处
///
/// 所有调用都发生在表的锁内，同一张表的调用是串行的。
pub trait DescriptorSink: Send + Sync {
    /// 数组容量扩大到 new_capacity；超出上限时返回错误，表保持原样
    fn grow(&self, kind: BindlessKind, new_capacity: u32) -> Result<(), GfxError>;

    fn write(&self, kind: BindlessKind, writes: &[(BindlessSlot, BindlessDescriptor)]);

    fn clear(&self, kind: BindlessKind, slot: BindlessSlot);
}

struct TableState {
    capacity: u32,
    /// LIFO，栈顶是下一个分配的 slot
    free_list: Vec<u32>,
    live: HashMap<ResourceIdentity, (BindlessSlot, BindlessDescriptor)>,
}

impl TableState {
    /// 把 [from, to) 压栈，使 from 最先弹出
    fn push_free_range(&mut self, from: u32, to: u32) {
        self.free_list.extend((from..to).rev());
    }
}

/// 一种资源的 bindless 数组
///
/// # 并发
/// 所有操作都在同一个 Mutex 内完成，包括对 sink 的调用。
///
/// 增长时 sink 先扩容，再按 slot 顺序重写全部存活的描述符；
/// 这两步之间不能插入其他线程的 write 或 clear，free list 和 live 也不能变化，
/// 否则新数组里会缺少描述符，或者写入已经释放的 slot。
/// 因此 sink 看到的调用顺序就是表状态变化的顺序。
pub struct BindlessTable<S: DescriptorSink> {
    kind: BindlessKind,
    sink: Arc<S>,
    state: Mutex<TableState>,
}

// new & init
impl<S: DescriptorSink> BindlessTable<S> {
    pub fn new(kind: BindlessKind, initial_capacity: u32, sink: Arc<S>) -> Self {
        assert!(initial_capacity > 0, "bindless table needs a non-zero capacity");
        let mut state = TableState {
            capacity: initial_capacity,
            free_list: Vec::with_capacity(initial_capacity as usize),
            live: HashMap::new(),
        };
        state.push_free_range(0, initial_capacity);
        Self {
            kind,
            sink,
            state: Mutex::new(state),
        }
    }
}

// getters
impl<S: DescriptorSink> BindlessTable<S> {
    #[inline]
    pub fn kind(&self) -> BindlessKind {
        self.kind
    }

    #[inline]
    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn slot_of(&self, identity: ResourceIdentity) -> Option<BindlessSlot> {
        self.state.lock().unwrap().live.get(&identity).map(|(slot, _)| *slot)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.state.lock().unwrap().capacity
    }
}

// tools
impl<S: DescriptorSink> BindlessTable<S> {
    /// # Panics
    /// 同一个资源重复注册
    pub fn register(&self, resource: &impl BindlessResource) -> Result<BindlessSlot, GfxError> {
        let mut slots = self.register_entries(&[(resource.identity(), resource.descriptor())])?;
        Ok(slots.remove(0))
    }

    /// 一次注册多个资源，sink 只收到一批写入
    pub fn register_many<R: BindlessResource>(&self, resources: &[R]) -> Result<Vec<BindlessSlot>, GfxError> {
        let entries = resources.iter().map(|r| (r.identity(), r.descriptor())).collect_vec();
        self.register_entries(&entries)
    }

    /// # Panics
    /// 资源没有注册过
    pub fn unregister(&self, identity: ResourceIdentity) {
        let mut state = self.state.lock().unwrap();
        let Some((slot, _)) = state.live.remove(&identity) else {
            panic!("bindless {:?}: unregister of unknown resource {:?}", self.kind, identity);
        };
        self.sink.clear(self.kind, slot);
        state.free_list.push(slot.0);
    }

    fn register_entries(
        &self,
        entries: &[(ResourceIdentity, BindlessDescriptor)],
    ) -> Result<Vec<BindlessSlot>, GfxError> {
        let _span = tracy_client::span!("BindlessTable::register");
        let mut state = self.state.lock().unwrap();

        for (idx, (identity, descriptor)) in entries.iter().enumerate() {
            assert_eq!(descriptor.kind(), self.kind, "descriptor kind does not match the bindless table");
            if state.live.contains_key(identity) || entries[..idx].iter().any(|(other, _)| other == identity) {
                panic!("bindless {:?}: resource {:?} is already registered", self.kind, identity);
            }
        }

        while state.free_list.len() < entries.len() {
            self.grow(&mut state)?;
        }

        let writes = entries
            .iter()
            .map(|(identity, descriptor)| {
                // 上面保证了 free_list 足够
                let slot = BindlessSlot(state.free_list.pop().unwrap_or_default());
                state.live.insert(*identity, (slot, *descriptor));
                (slot, *descriptor)
            })
            .collect_vec();
        self.sink.write(self.kind, &writes);

        Ok(writes.into_iter().map(|(slot, _)| slot).collect())
    }

    /// 容量翻倍，重写所有存活的描述符
    fn grow(&self, state: &mut TableState) -> Result<(), GfxError> {
        let old_capacity = state.capacity;
        let new_capacity = old_capacity.saturating_mul(2);
        self.sink.grow(self.kind, new_capacity)?;

        let live = state.live.values().copied().sorted_by_key(|(slot, _)| *slot).collect_vec();
        if !live.is_empty() {
            self.sink.write(self.kind, &live);
        }

        state.capacity = new_capacity;
        // 新的 slot 放在栈顶，old_capacity 最先弹出
        state.push_free_range(old_capacity, new_capacity);
        log::info!("bindless {:?} grew from {} to {}", self.kind, old_capacity, new_capacity);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum SinkCall {
        Grow(BindlessKind, u32),
        Write(BindlessKind, Vec<BindlessSlot>),
        Clear(BindlessKind, BindlessSlot),
    }

    /// 记录所有调用；limit 之外的 grow 返回错误
    pub(crate) struct RecordingSink {
        pub(crate) calls: Mutex<Vec<SinkCall>>,
        pub(crate) limit: u32,
    }

    impl RecordingSink {
        pub(crate) fn new(limit: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                limit,
            })
        }

        pub(crate) fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DescriptorSink for RecordingSink {
        fn grow(&self, kind: BindlessKind, new_capacity: u32) -> Result<(), GfxError> {
            if new_capacity > self.limit {
                return Err(GfxError::DescriptorCapacity {
                    requested: new_capacity,
                    limit: self.limit,
                });
            }
            self.calls.lock().unwrap().push(SinkCall::Grow(kind, new_capacity));
            Ok(())
        }

        fn write(&self, kind: BindlessKind, writes: &[(BindlessSlot, BindlessDescriptor)]) {
            self.calls.lock().unwrap().push(SinkCall::Write(kind, writes.iter().map(|(slot, _)| *slot).collect()));
        }

        fn clear(&self, kind: BindlessKind, slot: BindlessSlot) {
            self.calls.lock().unwrap().push(SinkCall::Clear(kind, slot));
        }
    }

    pub(crate) struct FakeBuffer(pub(crate) u64);

    impl BindlessResource for FakeBuffer {
        fn identity(&self) -> ResourceIdentity {
            ResourceIdentity(self.0)
        }

        fn descriptor(&self) -> BindlessDescriptor {
            BindlessDescriptor::StorageBuffer {
                buffer: <vk::Buffer as vk::Handle>::from_raw(self.0),
                offset: 0,
                range: vk::WHOLE_SIZE,
            }
        }
    }

    fn table(capacity: u32) -> BindlessTable<RecordingSink> {
        BindlessTable::new(BindlessKind::StorageBuffer, capacity, RecordingSink::new(64))
    }

    #[test]
    fn slots_are_handed_out_in_order() {
        let table = table(4);
        let slots = (1..=3).map(|i| table.register(&FakeBuffer(i)).unwrap()).collect_vec();
        assert_eq!(slots, vec![BindlessSlot(0), BindlessSlot(1), BindlessSlot(2)]);
        assert_eq!(table.slot_of(ResourceIdentity(2)), Some(BindlessSlot(1)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn freed_slot_is_reused_first() {
        let table = table(4);
        for i in 1..=3 {
            table.register(&FakeBuffer(i)).unwrap();
        }
        table.unregister(ResourceIdentity(2));
        assert_eq!(table.slot_of(ResourceIdentity(2)), None);

        let reused = table.register(&FakeBuffer(9)).unwrap();
        assert_eq!(reused, BindlessSlot(1));
        assert_eq!(
            table.sink().calls().last(),
            Some(&SinkCall::Write(BindlessKind::StorageBuffer, vec![BindlessSlot(1)]))
        );
    }

    #[test]
    fn exhaustion_doubles_capacity_and_rewrites_live() {
        let table = table(2);
        table.register(&FakeBuffer(1)).unwrap();
        table.register(&FakeBuffer(2)).unwrap();

        let third = table.register(&FakeBuffer(3)).unwrap();
        assert_eq!(third, BindlessSlot(2));
        assert_eq!(table.capacity(), 4);

        let calls = table.sink().calls();
        let grow_at = calls.iter().position(|c| *c == SinkCall::Grow(BindlessKind::StorageBuffer, 4)).unwrap();
        assert_eq!(
            calls[grow_at + 1],
            SinkCall::Write(BindlessKind::StorageBuffer, vec![BindlessSlot(0), BindlessSlot(1)])
        );
        assert_eq!(table.register(&FakeBuffer(4)).unwrap(), BindlessSlot(3));
    }

    #[test]
    fn growth_keeps_previously_freed_slots_behind_new_ones() {
        let table = table(2);
        table.register(&FakeBuffer(1)).unwrap();
        table.register(&FakeBuffer(2)).unwrap();
        table.unregister(ResourceIdentity(1));

        // 一次注册两个：先用掉空闲的 slot 0 不够，需要增长
        let slots = table.register_many(&[FakeBuffer(3), FakeBuffer(4)]).unwrap();
        assert_eq!(table.capacity(), 4);
        assert_eq!(slots, vec![BindlessSlot(2), BindlessSlot(3)]);
        assert_eq!(table.register(&FakeBuffer(5)).unwrap(), BindlessSlot(0));
    }

    #[test]
    fn released_slots_come_back_in_reverse_release_order() {
        for n in [1u64, 2, 5, 16] {
            let table = table(4);
            let ids = (1..=n).collect_vec();
            let first = ids.iter().map(|i| table.register(&FakeBuffer(*i)).unwrap()).collect_vec();

            // 正序、逆序和交错的释放顺序
            let orders = [
                ids.clone(),
                ids.iter().rev().copied().collect_vec(),
                ids.iter().copied().filter(|i| i % 2 == 0).chain(ids.iter().copied().filter(|i| i % 2 == 1)).collect_vec(),
            ];
            for order in orders {
                let released = order
                    .iter()
                    .map(|i| {
                        let slot = table.slot_of(ResourceIdentity(*i)).unwrap();
                        table.unregister(ResourceIdentity(*i));
                        slot
                    })
                    .collect_vec();
                assert!(table.is_empty());

                let capacity = table.capacity();
                let again = ids.iter().map(|i| table.register(&FakeBuffer(*i)).unwrap()).collect_vec();
                assert_eq!(again, released.iter().rev().copied().collect_vec());
                assert_eq!(again.iter().copied().sorted().collect_vec(), first.iter().copied().sorted().collect_vec());
                assert_eq!(table.capacity(), capacity);
                for (id, slot) in ids.iter().zip(&again) {
                    assert_eq!(table.slot_of(ResourceIdentity(*id)), Some(*slot));
                }
            }
        }
    }

    #[test]
    fn unregister_after_growth_clears_and_recycles() {
        let table = table(2);
        for i in 1..=3 {
            table.register(&FakeBuffer(i)).unwrap();
        }
        assert_eq!(table.capacity(), 4);

        // 一个增长前的 slot，一个增长后的 slot
        table.unregister(ResourceIdentity(1));
        table.unregister(ResourceIdentity(3));
        let calls = table.sink().calls();
        assert_eq!(
            calls[calls.len() - 2..],
            [
                SinkCall::Clear(BindlessKind::StorageBuffer, BindlessSlot(0)),
                SinkCall::Clear(BindlessKind::StorageBuffer, BindlessSlot(2)),
            ]
        );
        assert_eq!(table.len(), 1);

        assert_eq!(table.register(&FakeBuffer(4)).unwrap(), BindlessSlot(2));
        assert_eq!(table.register(&FakeBuffer(5)).unwrap(), BindlessSlot(0));
        assert_eq!(table.register(&FakeBuffer(6)).unwrap(), BindlessSlot(3));

        // 再次增长只重写仍然存活的描述符
        table.register(&FakeBuffer(7)).unwrap();
        let calls = table.sink().calls();
        let grow_at = calls.iter().position(|c| *c == SinkCall::Grow(BindlessKind::StorageBuffer, 8)).unwrap();
        assert_eq!(
            calls[grow_at + 1],
            SinkCall::Write(
                BindlessKind::StorageBuffer,
                vec![BindlessSlot(0), BindlessSlot(1), BindlessSlot(2), BindlessSlot(3)]
            )
        );
    }

    #[test]
    fn register_many_is_one_write_batch() {
        let table = table(8);
        let slots = table.register_many(&[FakeBuffer(1), FakeBuffer(2), FakeBuffer(3)]).unwrap();
        assert_eq!(slots.len(), 3);
        let writes = table.sink().calls().into_iter().filter(|c| matches!(c, SinkCall::Write(..))).count();
        assert_eq!(writes, 1);
    }

    #[test]
    fn growth_past_sink_limit_fails_without_changes() {
        let table = BindlessTable::new(BindlessKind::StorageBuffer, 2, RecordingSink::new(2));
        table.register(&FakeBuffer(1)).unwrap();
        table.register(&FakeBuffer(2)).unwrap();
        let err = table.register(&FakeBuffer(3)).unwrap_err();
        assert!(matches!(err, GfxError::DescriptorCapacity { requested: 4, limit: 2 }));
        assert_eq!(table.capacity(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn double_registration_panics() {
        let table = table(4);
        table.register(&FakeBuffer(7)).unwrap();
        table.register(&FakeBuffer(7)).ok();
    }

    #[test]
    #[should_panic(expected = "unknown resource")]
    fn unregister_unknown_panics() {
        table(4).unregister(ResourceIdentity(42));
    }

    #[test]
    fn concurrent_registration_gives_unique_slots() {
        let table = Arc::new(table(4));
        let handles = (0..4)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..8).map(|i| table.register(&FakeBuffer(t * 100 + i + 1)).unwrap()).collect_vec()
                })
            })
            .collect_vec();
        let mut slots = handles.into_iter().flat_map(|h| h.join().unwrap()).collect_vec();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 32);
        assert_eq!(table.capacity(), 32);
    }

    #[test]
    fn concurrent_churn_never_writes_past_capacity() {
        let table = Arc::new(BindlessTable::new(BindlessKind::StorageBuffer, 2, RecordingSink::new(1024)));
        let handles = (0..4u64)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..32 {
                        let id = t * 1000 + i + 1;
                        table.register(&FakeBuffer(id)).unwrap();
                        if i % 3 == 0 {
                            table.unregister(ResourceIdentity(id));
                        }
                    }
                })
            })
            .collect_vec();
        handles.into_iter().for_each(|h| h.join().unwrap());

        // sink 的调用顺序就是表状态变化的顺序
        let mut capacity = 2;
        let mut written = std::collections::HashSet::new();
        for call in table.sink().calls() {
            match call {
                SinkCall::Grow(_, new_capacity) => capacity = new_capacity,
                SinkCall::Write(_, slots) => {
                    assert!(slots.iter().all(|slot| slot.0 < capacity));
                    written.extend(slots);
                }
                SinkCall::Clear(_, slot) => assert!(written.remove(&slot), "cleared {slot:?} twice"),
            }
        }
        assert_eq!(written.len(), table.len());
    }
}
