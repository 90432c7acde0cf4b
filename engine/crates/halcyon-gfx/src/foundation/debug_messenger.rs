use std::ffi::CStr;

use ash::vk;

use crate::error::GfxResult;

pub struct GfxDebugMsger {
    pub vk_debug_utils_instance: ash::ext::debug_utils::Instance,
    pub vk_debug_utils_messenger: vk::DebugUtilsMessengerEXT,
}

impl GfxDebugMsger {
    pub fn new(vk_pf: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(vk_pf, instance);

        let create_info = Self::debug_utils_messenger_ci();
        let debug_messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };

        Ok(Self {
            vk_debug_utils_instance: loader,
            vk_debug_utils_messenger: debug_messenger,
        })
    }

    pub fn destroy(self) {
        // 触发 drop 进行销毁
    }
}

impl Drop for GfxDebugMsger {
    fn drop(&mut self) {
        unsafe {
            log::info!("destroying GfxDebugMsger");
            self.vk_debug_utils_instance.destroy_debug_utils_messenger(self.vk_debug_utils_messenger, None);
        }
    }
}

/// debug messenger 的回调函数
/// # Safety
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let format_msg = format!("[{:?}]\n{}\n", message_type, split_main_message(msg.as_ref()));

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// validation layer 的消息可能是 json，其中 MainMessage 字段带有换行，单独放到最后输出
fn split_main_message(msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg);
    let Some(obj) = json_value.as_mut().ok().and_then(|v| v.as_object_mut()) else {
        return msg.to_string();
    };
    let main_msg = obj.remove("MainMessage");
    let main_msg_str = main_msg.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let rest = serde_json::to_string_pretty(&obj).unwrap_or_else(|_| msg.to_string());
    format!("{}\n{}", rest, main_msg_str)
}

// 构造过程辅助函数
impl GfxDebugMsger {
    /// 用于创建 debug messenger 的结构体，也会挂在 instance 的创建参数上
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

pub trait DebugType {
    fn debug_type_name() -> &'static str;
    fn vk_handle(&self) -> impl vk::Handle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_message_moves_to_the_end() {
        let formatted = split_main_message(r#"{"MessageID":"0x1","MainMessage":"line1\nline2"}"#);
        assert!(formatted.contains("MessageID"));
        assert!(formatted.ends_with("line1\nline2"));
        assert!(!formatted.contains("MainMessage"));
    }

    #[test]
    fn plain_message_is_kept() {
        assert_eq!(split_main_message("not json"), "not json");
    }
}
