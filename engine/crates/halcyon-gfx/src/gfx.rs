use std::ffi::CStr;

use ash::vk;

use crate::{
    commands::{
        command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, command_queue::GfxCommandQueue,
        submit_info::GfxSubmitInfo,
    },
    error::GfxResult,
    foundation::{
        device::GfxDevice, instance::GfxInstance, mem_allocator::GfxMemAllocator, physical_device::GfxPhysicalDevice,
    },
    gfx_core::GfxCore,
};

/// Vulkan 图形上下文单例
///
/// 管理所有 Vulkan 核心资源，包括实例、设备、队列、内存分配器等。
/// 采用单例模式简化参数传递和生命周期管理，仅适用于单线程环境。
///
/// # 初始化流程
/// ```ignore
/// Gfx::init("MyApp", &extra_extensions)?;
/// let device = Gfx::get().gfx_device();
/// // 使用...
/// Gfx::destroy();
/// ```
pub struct Gfx {
    pub(crate) gfx_core: GfxCore,
    pub(crate) vm_allocator: GfxMemAllocator,

    /// 临时的 graphics command pool，用于 one_time_exec
    pub(crate) temp_graphics_command_pool: GfxCommandPool,
}

// new & init
impl Gfx {
    const ENGINE_NAME: &'static str = "Halcyon";

    fn new(app_name: &str, instance_extra_exts: &[&'static CStr]) -> GfxResult<Self> {
        let gfx_core = GfxCore::new(app_name, Self::ENGINE_NAME, instance_extra_exts)?;

        // 单例还没有初始化，需要显式传入 device
        let temp_graphics_command_pool = GfxCommandPool::new_internal(
            &gfx_core.gfx_device,
            gfx_core.physical_device.gfx_queue_family.clone(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            "gfx-one-time",
        )?;

        let vm_allocator = GfxMemAllocator::new(
            &gfx_core.instance.ash_instance,
            gfx_core.physical_device.vk_handle,
            &gfx_core.gfx_device,
        )?;

        Ok(Self {
            gfx_core,
            vm_allocator,
            temp_graphics_command_pool,
        })
    }
}

// 此静态变量仅用于单线程环境
static mut G_GFX: Option<Gfx> = None;

// 单例模式
// - Gfx 自身的生命周期管理比较简单，因此适合使用单例模式
// - 其他类的类型签名也会变得更简单
impl Gfx {
    /// # Panics
    /// 如果 Gfx 还未初始化，此方法会 panic
    #[inline]
    pub fn get() -> &'static Gfx {
        unsafe {
            // 使用 addr_of! 避免直接对 static mut 创建引用
            let ptr = std::ptr::addr_of!(G_GFX);
            (*ptr).as_ref().expect("Gfx not initialized. Call Gfx::init() first.")
        }
    }

    #[inline]
    pub fn is_initialized() -> bool {
        unsafe { (*std::ptr::addr_of!(G_GFX)).is_some() }
    }

    /// # Panics
    /// 如果 Gfx 已经被初始化，此方法会 panic
    pub fn init(app_name: &str, instance_extra_exts: &[&'static CStr]) -> GfxResult<()> {
        let gfx = Self::new(app_name, instance_extra_exts)?;
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            assert!((*ptr).is_none(), "Gfx already initialized");
            *ptr = Some(gfx);
        }
        Ok(())
    }

    /// 调用此方法后，不应再使用 Gfx::get()
    pub fn destroy() {
        unsafe {
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            let Some(gfx) = (*ptr).take() else {
                log::warn!("Gfx::destroy called before Gfx::init");
                return;
            };
            let Gfx {
                gfx_core,
                vm_allocator,
                mut temp_graphics_command_pool,
            } = gfx;

            vm_allocator.destroy();
            temp_graphics_command_pool.destroy_internal(&gfx_core.gfx_device);
            gfx_core.destroy();
        }
    }
}

// getters
impl Gfx {
    #[inline]
    pub fn gfx_core(&self) -> &GfxCore {
        &self.gfx_core
    }

    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.gfx_core.instance
    }

    #[inline]
    pub fn vk_entry(&self) -> &ash::Entry {
        &self.gfx_core.vk_entry
    }

    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.gfx_core.gfx_device
    }

    #[inline]
    pub fn allocator(&self) -> &GfxMemAllocator {
        &self.vm_allocator
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.gfx_core.physical_device
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.gfx_queue
    }

    /// uniform buffer 的 descriptor offset 必须是这个值的整数倍，一定是 power of 2
    #[inline]
    pub fn min_ubo_offset_align(&self) -> vk::DeviceSize {
        self.gfx_core.physical_device.basic_props.limits.min_uniform_buffer_offset_alignment
    }

    /// storage buffer 的 descriptor offset 必须是这个值的整数倍，一定是 power of 2
    #[inline]
    pub fn min_ssbo_offset_align(&self) -> vk::DeviceSize {
        self.gfx_core.physical_device.basic_props.limits.min_storage_buffer_offset_alignment
    }
}

// tools
impl Gfx {
    /// 根据给定的格式，返回支持的格式
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Vec<vk::Format> {
        candidates
            .iter()
            .filter(|f| {
                let props = unsafe {
                    self.instance()
                        .ash_instance
                        .get_physical_device_format_properties(self.physical_device().vk_handle, **f)
                };
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                    _ => false,
                }
            })
            .copied()
            .collect()
    }

    /// 立即执行某个 command，并同步等待执行结果
    pub fn one_time_exec<F, R>(&self, func: F, name: &str) -> GfxResult<R>
    where
        F: FnOnce(&GfxCommandBuffer) -> R,
    {
        let command_buffer = GfxCommandBuffer::new(&self.temp_graphics_command_pool, &format!("one-time-{}", name))?;

        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name)?;
        let result = func(&command_buffer);
        command_buffer.end()?;

        self.gfx_queue().submit(vec![GfxSubmitInfo::new(std::slice::from_ref(&command_buffer))], None)?;
        self.gfx_queue().wait_idle()?;
        self.temp_graphics_command_pool.free_command_buffers(vec![command_buffer]);

        Ok(result)
    }

    pub fn wait_idle(&self) -> GfxResult<()> {
        self.gfx_device().wait_idle()
    }
}
