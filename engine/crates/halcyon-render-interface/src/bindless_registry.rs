use std::ops::Deref;
use std::sync::Arc;

use halcyon_gfx::{descriptors::bindless_layout::BindlessKind, error::GfxError};

use crate::{
    bindless_table::{BindlessResource, BindlessTable, DescriptorSink},
    handles::BindlessSlot,
};

/// 已注册到 bindless 表中的资源
///
/// drop 时先从表中注销，再释放资源本身，shader 永远不会看到已经销毁的句柄
pub struct Registered<R: BindlessResource, S: DescriptorSink> {
    table: Arc<BindlessTable<S>>,
    slot: BindlessSlot,
    resource: R,
}

impl<R: BindlessResource, S: DescriptorSink> Registered<R, S> {
    pub fn new(table: Arc<BindlessTable<S>>, resource: R) -> Result<Self, GfxError> {
        let slot = table.register(&resource)?;
        Ok(Self { table, slot, resource })
    }

    #[inline]
    pub fn slot(&self) -> BindlessSlot {
        self.slot
    }
}

impl<R: BindlessResource, S: DescriptorSink> Deref for Registered<R, S> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<R: BindlessResource, S: DescriptorSink> Drop for Registered<R, S> {
    fn drop(&mut self) {
        // resource 字段在这之后才会被 drop
        self.table.unregister(self.resource.identity());
    }
}

/// 三张 bindless 表，分别对应 descriptor set 的三个 binding
pub struct BindlessRegistry<S: DescriptorSink> {
    textures: Arc<BindlessTable<S>>,
    uniform_buffers: Arc<BindlessTable<S>>,
    storage_buffers: Arc<BindlessTable<S>>,
}

// new & init
impl<S: DescriptorSink> BindlessRegistry<S> {
    pub fn new(initial_capacity: u32, sink: Arc<S>) -> Self {
        let table = |kind| Arc::new(BindlessTable::new(kind, initial_capacity, sink.clone()));
        Self {
            textures: table(BindlessKind::Texture),
            uniform_buffers: table(BindlessKind::UniformBuffer),
            storage_buffers: table(BindlessKind::StorageBuffer),
        }
    }
}

// getters
impl<S: DescriptorSink> BindlessRegistry<S> {
    #[inline]
    pub fn table(&self, kind: BindlessKind) -> &Arc<BindlessTable<S>> {
        match kind {
            BindlessKind::Texture => &self.textures,
            BindlessKind::UniformBuffer => &self.uniform_buffers,
            BindlessKind::StorageBuffer => &self.storage_buffers,
        }
    }

    #[inline]
    pub fn sink(&self) -> &Arc<S> {
        self.textures.sink()
    }
}

// tools
impl<S: DescriptorSink> BindlessRegistry<S> {
    /// 按资源的描述符类型选择表并注册
    pub fn register<R: BindlessResource>(&self, resource: R) -> Result<Registered<R, S>, GfxError> {
        let kind = resource.descriptor().kind();
        Registered::new(self.table(kind).clone(), resource)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ash::vk;

    use super::*;
    use crate::bindless_table::tests::{FakeBuffer, RecordingSink, SinkCall};
    use crate::bindless_table::BindlessDescriptor;
    use crate::handles::ResourceIdentity;

    /// drop 时往日志里写一条记录
    struct LoggedTexture {
        id: u64,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl BindlessResource for LoggedTexture {
        fn identity(&self) -> ResourceIdentity {
            ResourceIdentity(self.id)
        }

        fn descriptor(&self) -> BindlessDescriptor {
            BindlessDescriptor::SampledImage {
                view: <vk::ImageView as vk::Handle>::from_raw(self.id),
                sampler: vk::Sampler::null(),
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }
        }
    }

    impl Drop for LoggedTexture {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(format!("destroy {}", self.id));
        }
    }

    /// 把 clear 调用也写进同一份日志
    struct LoggingSink {
        inner: Arc<RecordingSink>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl DescriptorSink for LoggingSink {
        fn grow(&self, kind: BindlessKind, new_capacity: u32) -> Result<(), GfxError> {
            self.inner.grow(kind, new_capacity)
        }

        fn write(&self, kind: BindlessKind, writes: &[(BindlessSlot, BindlessDescriptor)]) {
            self.inner.write(kind, writes)
        }

        fn clear(&self, kind: BindlessKind, slot: BindlessSlot) {
            self.log.lock().unwrap().push(format!("clear {}", slot.0));
            self.inner.clear(kind, slot)
        }
    }

    #[test]
    fn guard_unregisters_before_destroying() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(LoggingSink {
            inner: RecordingSink::new(64),
            log: log.clone(),
        });
        let registry = BindlessRegistry::new(4, sink);

        let texture = registry.register(LoggedTexture { id: 11, log: log.clone() }).unwrap();
        assert_eq!(texture.slot(), BindlessSlot(0));
        assert_eq!(registry.table(BindlessKind::Texture).len(), 1);

        drop(texture);
        assert_eq!(*log.lock().unwrap(), vec!["clear 0".to_string(), "destroy 11".to_string()]);
        assert!(registry.table(BindlessKind::Texture).is_empty());
    }

    #[test]
    fn resources_go_to_their_own_table() {
        let registry = BindlessRegistry::new(4, RecordingSink::new(64));
        let buffer = registry.register(FakeBuffer(5)).unwrap();

        assert_eq!(buffer.slot(), BindlessSlot(0));
        assert_eq!(registry.table(BindlessKind::StorageBuffer).len(), 1);
        assert!(registry.table(BindlessKind::Texture).is_empty());
        assert_eq!(
            registry.sink().calls(),
            vec![SinkCall::Write(BindlessKind::StorageBuffer, vec![BindlessSlot(0)])]
        );
    }
}
