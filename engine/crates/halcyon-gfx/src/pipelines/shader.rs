use std::path::Path;

use ash::vk;

use crate::{
    error::{GfxError, GfxResult},
    foundation::debug_messenger::DebugType,
    gfx::Gfx,
};

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源
pub struct GfxShaderModule {
    handle: vk::ShaderModule,

    #[cfg(debug_assertions)]
    destroyed: bool,
}
impl GfxShaderModule {
    /// # param
    /// * path - 预编译好的 spv 文件路径
    pub fn new(path: &Path) -> GfxResult<Self> {
        let shader_load_err = |source| GfxError::ShaderLoad {
            path: path.display().to_string(),
            source,
        };
        let mut file = std::fs::File::open(path).map_err(shader_load_err)?;
        let shader_code = ash::util::read_spv(&mut file).map_err(shader_load_err)?;

        let gfx_device = Gfx::get().gfx_device();
        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&shader_code);
        let handle = unsafe { gfx_device.create_shader_module(&shader_module_info, None)? };
        let shader_module = Self {
            handle,

            #[cfg(debug_assertions)]
            destroyed: false,
        };
        gfx_device.set_debug_name(&shader_module, path.display().to_string());
        Ok(shader_module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(mut self) {
        unsafe {
            Gfx::get().gfx_device().destroy_shader_module(self.handle, None);
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for GfxShaderModule {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "GfxShaderModule must be destroyed manually before drop.");
    }
}
impl DebugType for GfxShaderModule {
    fn debug_type_name() -> &'static str {
        "GfxShaderModule"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
