use std::collections::BTreeSet;
use std::sync::Mutex;

use ash::vk;
use halcyon_gfx::{
    descriptors::bindless_layout::{BindlessKind, BindlessLimits, GfxBindlessLayout},
    error::{GfxError, GfxResult},
    gfx::Gfx,
    resources::typed_buffer::{GfxStorageBuffer, GfxUniformBuffer},
};
use itertools::Itertools;

use crate::{
    bindless_table::{BindlessDescriptor, BindlessResource, DescriptorSink},
    handles::{BindlessSlot, ResourceIdentity},
    pipeline_settings::FrameSlot,
};

impl BindlessResource for GfxStorageBuffer {
    fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::from_handle(self.vk_buffer())
    }

    fn descriptor(&self) -> BindlessDescriptor {
        BindlessDescriptor::StorageBuffer {
            buffer: self.vk_buffer(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }
}

impl BindlessResource for GfxUniformBuffer {
    fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::from_handle(self.vk_buffer())
    }

    fn descriptor(&self) -> BindlessDescriptor {
        BindlessDescriptor::UniformBuffer {
            buffer: self.vk_buffer(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }
}

struct ShadowState {
    /// 按 BindlessKind::binding() 索引
    arrays: [Vec<Option<BindlessDescriptor>>; 3],
    /// 每个 frame slot 尚未写入 descriptor set 的位置
    pending: Vec<BTreeSet<(u32, u32)>>,
}

/// 写入 vulkan descriptor set 的 sink
///
/// 表的写入先落在 CPU 侧的影子数组中；某个 frame slot 的 fence 等待结束后，
/// 调用 `flush` 把该 slot 的 descriptor set 补齐。这样 GPU 正在使用的 set 不会被改写。
pub struct GfxBindlessSink {
    layout: GfxBindlessLayout,
    shadow: Mutex<ShadowState>,
}

// new & init
impl GfxBindlessSink {
    pub fn new(limits: BindlessLimits, frames_in_flight: usize) -> GfxResult<Self> {
        let layout = GfxBindlessLayout::new(limits, frames_in_flight, "bindless")?;
        Ok(Self {
            layout,
            shadow: Mutex::new(ShadowState {
                arrays: Default::default(),
                pending: vec![BTreeSet::new(); frames_in_flight],
            }),
        })
    }
}

// getters
impl GfxBindlessSink {
    #[inline]
    pub fn layout(&self) -> &GfxBindlessLayout {
        &self.layout
    }

    #[inline]
    pub fn set(&self, frame_slot: FrameSlot) -> vk::DescriptorSet {
        self.layout.set(*frame_slot)
    }
}

// tools
impl GfxBindlessSink {
    /// # Phase: Before Render
    ///
    /// 在 frame slot 的 fence 等待结束之后调用
    pub fn flush(&self, frame_slot: FrameSlot) {
        let _span = tracy_client::span!("GfxBindlessSink::flush");
        let mut shadow = self.shadow.lock().unwrap();
        let pending = std::mem::take(&mut shadow.pending[*frame_slot]);
        if pending.is_empty() {
            return;
        }

        // 被 clear 的位置不需要写：PARTIALLY_BOUND 允许保留旧的描述符，shader 也不会再访问
        let live = pending
            .iter()
            .filter_map(|&(binding, index)| {
                shadow.arrays[binding as usize].get(index as usize).copied().flatten().map(|d| (binding, index, d))
            })
            .collect_vec();

        let buffer_infos = live
            .iter()
            .map(|(_, _, descriptor)| match *descriptor {
                BindlessDescriptor::StorageBuffer { buffer, offset, range }
                | BindlessDescriptor::UniformBuffer { buffer, offset, range } => {
                    vk::DescriptorBufferInfo::default().buffer(buffer).offset(offset).range(range)
                }
                BindlessDescriptor::SampledImage { .. } => vk::DescriptorBufferInfo::default(),
            })
            .collect_vec();
        let image_infos = live
            .iter()
            .map(|(_, _, descriptor)| match *descriptor {
                BindlessDescriptor::SampledImage { view, sampler, layout } => {
                    vk::DescriptorImageInfo::default().image_view(view).sampler(sampler).image_layout(layout)
                }
                _ => vk::DescriptorImageInfo::default(),
            })
            .collect_vec();

        let dst_set = self.layout.set(*frame_slot);
        let writes = live
            .iter()
            .enumerate()
            .map(|(i, (binding, index, descriptor))| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(dst_set)
                    .dst_binding(*binding)
                    .dst_array_element(*index)
                    .descriptor_type(descriptor.kind().descriptor_type());
                match descriptor {
                    BindlessDescriptor::SampledImage { .. } => write.image_info(std::slice::from_ref(&image_infos[i])),
                    _ => write.buffer_info(std::slice::from_ref(&buffer_infos[i])),
                }
            })
            .collect_vec();

        log::debug!("bindless flush {}: {} descriptors", frame_slot, writes.len());
        unsafe {
            Gfx::get().gfx_device().update_descriptor_sets(&writes, &[]);
        }
    }

    pub fn destroy(self) {
        self.layout.destroy();
    }

    fn mark_pending(shadow: &mut ShadowState, binding: u32, index: u32) {
        for pending in shadow.pending.iter_mut() {
            pending.insert((binding, index));
        }
    }
}

impl DescriptorSink for GfxBindlessSink {
    fn grow(&self, kind: BindlessKind, new_capacity: u32) -> Result<(), GfxError> {
        let limit = self.layout.limits().limit(kind);
        if new_capacity > limit {
            return Err(GfxError::DescriptorCapacity {
                requested: new_capacity,
                limit,
            });
        }
        let mut shadow = self.shadow.lock().unwrap();
        shadow.arrays[kind.binding() as usize].resize(new_capacity as usize, None);
        Ok(())
    }

    fn write(&self, kind: BindlessKind, writes: &[(BindlessSlot, BindlessDescriptor)]) {
        let binding = kind.binding();
        let mut shadow = self.shadow.lock().unwrap();
        for (slot, descriptor) in writes {
            let array = &mut shadow.arrays[binding as usize];
            if array.len() <= slot.0 as usize {
                array.resize(slot.0 as usize + 1, None);
            }
            array[slot.0 as usize] = Some(*descriptor);
            Self::mark_pending(&mut shadow, binding, slot.0);
        }
    }

    fn clear(&self, kind: BindlessKind, slot: BindlessSlot) {
        let binding = kind.binding();
        let mut shadow = self.shadow.lock().unwrap();
        if let Some(entry) = shadow.arrays[binding as usize].get_mut(slot.0 as usize) {
            *entry = None;
        }
        Self::mark_pending(&mut shadow, binding, slot.0);
    }
}
