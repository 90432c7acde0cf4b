use std::ffi::CStr;
use std::rc::Rc;

use ash::vk;

use crate::{
    commands::command_queue::GfxCommandQueue,
    error::GfxResult,
    foundation::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice,
    },
};

pub struct GfxCore {
    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    pub(crate) vk_entry: ash::Entry,

    pub(crate) instance: GfxInstance,
    pub(crate) physical_device: GfxPhysicalDevice,

    /// 在 Gfx 内部的对象（queue、初始化阶段的 command pool）通过 Rc 访问 device
    pub(crate) gfx_device: Rc<GfxDevice>,

    pub(crate) debug_msger: GfxDebugMsger,

    pub(crate) gfx_queue: GfxCommandQueue,
}

// new & init
impl GfxCore {
    pub fn new(app_name: &str, engine_name: &str, instance_extra_exts: &[&'static CStr]) -> GfxResult<Self> {
        let vk_entry = unsafe { ash::Entry::load()? };
        let instance = GfxInstance::new(&vk_entry, app_name, engine_name, instance_extra_exts)?;
        let physical_device = GfxPhysicalDevice::new_descrete_physical_device(instance.ash_instance())?;

        // graphics、compute、transfer 都使用同一个 queue family 的同一个 queue
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical_device.gfx_queue_family.queue_family_index)
            .queue_priorities(&[1.0])];

        let gfx_device = Rc::new(GfxDevice::new(&instance.ash_instance, physical_device.vk_handle, &queue_create_infos)?);
        let gfx_queue = GfxCommandQueue {
            vk_queue: unsafe { gfx_device.get_device_queue(physical_device.gfx_queue_family.queue_family_index, 0) },
            queue_family: physical_device.gfx_queue_family.clone(),
            gfx_device: gfx_device.clone(),
        };

        let debug_msger = GfxDebugMsger::new(&vk_entry, &instance.ash_instance)?;

        log::info!("gfx queue's queue family:\n{:#?}", gfx_queue.queue_family);

        // 在 device 以及 debug_utils 之前创建的 vk::Handle
        {
            gfx_device.set_object_debug_name(instance.vk_instance(), "GfxInstance");
            gfx_device.set_object_debug_name(physical_device.vk_handle, "GfxPhysicalDevice");
            gfx_device.set_object_debug_name(gfx_device.vk_handle(), "GfxDevice");
            gfx_device.set_object_debug_name(gfx_queue.vk_queue, "GfxCommandQueue-gfx");
        }

        Ok(Self {
            vk_entry,
            instance,
            physical_device,
            gfx_device,
            debug_msger,
            gfx_queue,
        })
    }

    pub fn destroy(self) {
        let Self {
            vk_entry,
            instance,
            physical_device,
            gfx_device,
            debug_msger,
            gfx_queue,
        } = self;

        drop(gfx_queue);
        debug_msger.destroy();
        gfx_device.destroy();
        physical_device.destroy();
        instance.destroy();
        drop(vk_entry);
    }
}
