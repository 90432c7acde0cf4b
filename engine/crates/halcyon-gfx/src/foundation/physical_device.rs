use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::command_queue::GfxQueueFamily,
    error::{GfxError, GfxResult},
    foundation::debug_messenger::DebugType,
};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,

    pub(crate) _mem_props: vk::PhysicalDeviceMemoryProperties,

    /// 同时支持 graphics、compute、transfer 的 queue family
    pub(crate) gfx_queue_family: GfxQueueFamily,
}

impl GfxPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个拥有全能 queue family 的显卡
    pub fn new_descrete_physical_device(instance: &ash::Instance) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices()? };
        pdevices
            .iter()
            .filter_map(|pdevice| Self::new(*pdevice, instance))
            .find_or_first(Self::is_descrete_gpu)
            .ok_or(GfxError::NoSuitableDevice("no gpu exposes a graphics+compute+transfer queue"))
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        unsafe {
            let basic_props = instance.get_physical_device_properties(pdevice);
            let physical_device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}", physical_device_name);

            let queue_familiy_props = instance.get_physical_device_queue_family_properties(pdevice);
            log::debug!("physical device: queue family props:\n{:#?}", queue_familiy_props);

            // 全能的 Queue：graphics, compute, transfer
            let all_flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
            let gfx_queue_family = queue_familiy_props
                .iter()
                .enumerate()
                .find(|(_, props)| props.queue_flags.contains(all_flags))
                .map(|(family_idx, props)| GfxQueueFamily {
                    name: "gfx".to_string(),
                    queue_family_index: family_idx as u32,
                    queue_flags: props.queue_flags,
                    queue_count: props.queue_count,
                })?;

            Some(Self {
                vk_handle: pdevice,
                basic_props,
                _mem_props: instance.get_physical_device_memory_properties(pdevice),
                gfx_queue_family,
            })
        }
    }

    pub fn destroy(self) {
        // 无需销毁
    }
}

// getters
impl GfxPhysicalDevice {
    /// 当前 gpu 是否是独立显卡
    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::PhysicalDevice {
        self.vk_handle
    }

    #[inline]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.basic_props.limits
    }

    /// timestamp query 的一个 tick 对应的纳秒数
    #[inline]
    pub fn timestamp_period_ns(&self) -> f32 {
        self.basic_props.limits.timestamp_period
    }
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
