use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult},
    foundation::debug_messenger::GfxDebugMsger,
};

pub struct GfxInstance {
    /// 仅仅是函数指针，以及一个裸的 handle，生命周期由手动控制
    pub(crate) ash_instance: ash::Instance,
}

// new & init
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_instance_exts: &[&'static CStr],
    ) -> GfxResult<Self> {
        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = CString::new(engine_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_instance_exts)?;
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .push_next(&mut debug_utils_messenger_ci);

        let handle = unsafe { vk_entry.create_instance(&instance_ci, None)? };

        Ok(Self { ash_instance: handle })
    }

    pub fn destroy(self) {
        log::info!("destroying GfxInstance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}

// 构造过程
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_instance_exts: &[&'static CStr]) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None)? };
        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();

        for ext in extra_instance_exts.iter().copied().chain(Self::basic_instance_exts()) {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| supported_ext.extension_name_as_c_str().is_ok_and(|name| name == ext));
            if !supported {
                log::error!("required instance extension {:?} is missing", ext);
                return Err(GfxError::Vk(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
            }
            enabled_extensions.insert(ext);
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// 必须要开启的 instance extensions
    ///
    /// validation layer 不在这里开启，使用 vulkan configurator 控制
    fn basic_instance_exts() -> Vec<&'static CStr> {
        vec![
            // debug messenger、object debug name、queue/command buffer 的 label
            vk::EXT_DEBUG_UTILS_NAME,
        ]
    }
}
