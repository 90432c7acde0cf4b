use ash::vk;

use crate::{
    error::{GfxError, GfxResult},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

impl GfxSurface {
    pub fn new(
        raw_display_handle: raw_window_handle::RawDisplayHandle,
        raw_window_handle: raw_window_handle::RawWindowHandle,
    ) -> GfxResult<Self> {
        let gfx_core = Gfx::get().gfx_core();
        let surface_pf = ash::khr::surface::Instance::new(&gfx_core.vk_entry, &gfx_core.instance.ash_instance);

        let surface = unsafe {
            ash_window::create_surface(
                &gfx_core.vk_entry,
                &gfx_core.instance.ash_instance,
                raw_display_handle,
                raw_window_handle,
                None,
            )?
        };

        let surface = GfxSurface {
            handle: surface,
            pf: surface_pf,
        };
        gfx_core.gfx_device.set_debug_name(&surface, "main");

        Ok(surface)
    }

    /// 创建 instance 时需要开启的 surface 相关 extensions
    pub fn required_instance_extensions(
        raw_display_handle: raw_window_handle::RawDisplayHandle,
    ) -> GfxResult<Vec<&'static std::ffi::CStr>> {
        let exts = ash_window::enumerate_required_extensions(raw_display_handle)?;
        Ok(exts.iter().map(|ext| unsafe { std::ffi::CStr::from_ptr(*ext) }).collect())
    }
}

// getters
impl GfxSurface {
    pub fn get_capabilities(&self) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        let pdevice = Gfx::get().physical_device().vk_handle();
        Ok(unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle)? })
    }

    /// 在候选格式中选择第一个受支持的，都不支持时返回 FormatUnsupported
    pub fn select_format(&self, candidates: &[vk::SurfaceFormatKHR]) -> GfxResult<vk::SurfaceFormatKHR> {
        let pdevice = Gfx::get().physical_device().vk_handle();
        let supported = unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle)? };
        candidates
            .iter()
            .find(|c| supported.iter().any(|s| s.format == c.format && s.color_space == c.color_space))
            .copied()
            .ok_or(GfxError::FormatUnsupported(candidates.first().map_or(vk::Format::UNDEFINED, |c| c.format)))
    }

    /// FIFO 一定受支持，作为最后的回退
    pub fn select_present_mode(&self, candidates: &[vk::PresentModeKHR]) -> GfxResult<vk::PresentModeKHR> {
        let pdevice = Gfx::get().physical_device().vk_handle();
        let supported = unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle)? };
        Ok(candidates.iter().find(|m| supported.contains(m)).copied().unwrap_or(vk::PresentModeKHR::FIFO))
    }
}

impl Drop for GfxSurface {
    fn drop(&mut self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

impl DebugType for GfxSurface {
    fn debug_type_name() -> &'static str {
        "GfxSurface"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
