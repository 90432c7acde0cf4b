use ash::vk;
use itertools::Itertools;

use crate::{
    descriptors::descriptor_pool::GfxDescriptorPool, error::GfxResult, foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

/// bindless descriptor set 中的一个数组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindlessKind {
    /// binding 0: combined image sampler
    Texture,
    /// binding 1: uniform buffer
    UniformBuffer,
    /// binding 2: storage buffer
    StorageBuffer,
}

impl BindlessKind {
    pub const ALL: [BindlessKind; 3] = [BindlessKind::Texture, BindlessKind::UniformBuffer, BindlessKind::StorageBuffer];

    #[inline]
    pub fn binding(self) -> u32 {
        match self {
            BindlessKind::Texture => 0,
            BindlessKind::UniformBuffer => 1,
            BindlessKind::StorageBuffer => 2,
        }
    }

    #[inline]
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BindlessKind::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindlessKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindlessKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }

    /// uniform buffer 的 update-after-bind 支持很少，只在 set 空闲时写入
    #[inline]
    pub fn binding_flags(self) -> vk::DescriptorBindingFlags {
        match self {
            BindlessKind::UniformBuffer => vk::DescriptorBindingFlags::PARTIALLY_BOUND,
            _ => vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
        }
    }
}

/// 每个 binding 的数组上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindlessLimits {
    pub textures: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
}

impl Default for BindlessLimits {
    fn default() -> Self {
        Self {
            textures: 1024,
            uniform_buffers: 256,
            storage_buffers: 1024,
        }
    }
}

impl BindlessLimits {
    #[inline]
    pub fn limit(&self, kind: BindlessKind) -> u32 {
        match kind {
            BindlessKind::Texture => self.textures,
            BindlessKind::UniformBuffer => self.uniform_buffers,
            BindlessKind::StorageBuffer => self.storage_buffers,
        }
    }
}

/// bindless 的 descriptor set layout 以及每个 frame slot 一个的 descriptor set
///
/// - Binding 0: 纹理数组
/// - Binding 1: uniform buffer 数组
/// - Binding 2: storage buffer 数组
pub struct GfxBindlessLayout {
    layout: vk::DescriptorSetLayout,
    pool: GfxDescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    limits: BindlessLimits,
}
impl DebugType for GfxBindlessLayout {
    fn debug_type_name() -> &'static str {
        "GfxBindlessLayout"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.layout
    }
}
// new & init
impl GfxBindlessLayout {
    pub fn new(limits: BindlessLimits, frames_in_flight: usize, debug_name: &str) -> GfxResult<Self> {
        let gfx_device = Gfx::get().gfx_device();

        let bindings = BindlessKind::ALL
            .iter()
            .map(|kind| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(kind.binding())
                    .descriptor_type(kind.descriptor_type())
                    .descriptor_count(limits.limit(*kind))
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect_vec();
        let binding_flags = BindlessKind::ALL.iter().map(|kind| kind.binding_flags()).collect_vec();
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_ci);
        let layout = unsafe { gfx_device.create_descriptor_set_layout(&layout_ci, None)? };

        let fif = frames_in_flight as u32;
        let pool_sizes = BindlessKind::ALL
            .iter()
            .map(|kind| vk::DescriptorPoolSize {
                ty: kind.descriptor_type(),
                descriptor_count: limits.limit(*kind) * fif,
            })
            .collect_vec();
        let pool = GfxDescriptorPool::new(
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            fif,
            &pool_sizes,
            &format!("{}-pool", debug_name),
        )?;

        let layouts = vec![layout; frames_in_flight];
        let sets = unsafe {
            gfx_device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool.handle()).set_layouts(&layouts),
            )?
        };
        for (idx, set) in sets.iter().enumerate() {
            gfx_device.set_object_debug_name(*set, format!("{}-set-{}", debug_name, idx));
        }

        let bindless_layout = Self {
            layout,
            pool,
            sets,
            limits,
        };
        gfx_device.set_debug_name(&bindless_layout, debug_name);
        Ok(bindless_layout)
    }

    pub fn destroy(self) {
        unsafe { Gfx::get().gfx_device().destroy_descriptor_set_layout(self.layout, None) };
        self.pool.destroy();
    }
}
// getters
impl GfxBindlessLayout {
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn set(&self, frame_slot: usize) -> vk::DescriptorSet {
        self.sets[frame_slot]
    }

    #[inline]
    pub fn limits(&self) -> &BindlessLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_fixed() {
        assert_eq!(BindlessKind::Texture.binding(), 0);
        assert_eq!(BindlessKind::UniformBuffer.binding(), 1);
        assert_eq!(BindlessKind::StorageBuffer.binding(), 2);
        assert!(
            !BindlessKind::UniformBuffer.binding_flags().contains(vk::DescriptorBindingFlags::UPDATE_AFTER_BIND)
        );
        assert_eq!(BindlessLimits::default().limit(BindlessKind::StorageBuffer), 1024);
    }
}
