use ash::vk;

/// GFX 层的错误类型
///
/// 资源创建失败（显存不足、surface 丢失、格式不支持）以及有限超时的等待都会通过这里返回。
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("vulkan call failed: {0:?}")]
    Vk(vk::Result),

    #[error("device memory exhausted")]
    OutOfMemory,

    #[error("presentation surface lost")]
    SurfaceLost,

    #[error("format {0:?} is not supported for the requested usage")]
    FormatUnsupported(vk::Format),

    #[error("timed out after {timeout_ns} ns while waiting for {what}")]
    Timeout { what: &'static str, timeout_ns: u64 },

    #[error("no suitable physical device: {0}")]
    NoSuitableDevice(&'static str),

    #[error("failed to load vulkan entry: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("failed to read shader `{path}`: {source}")]
    ShaderLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bindless capacity {requested} exceeds the descriptor layout limit {limit}")]
    DescriptorCapacity { requested: u32, limit: u32 },
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfMemory,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED => Self::FormatUnsupported(vk::Format::UNDEFINED),
            other => Self::Vk(other),
        }
    }
}

pub type GfxResult<T> = Result<T, GfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_result_maps_to_resource_errors() {
        assert!(matches!(GfxError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), GfxError::OutOfMemory));
        assert!(matches!(GfxError::from(vk::Result::ERROR_SURFACE_LOST_KHR), GfxError::SurfaceLost));
        assert!(matches!(
            GfxError::from(vk::Result::ERROR_DEVICE_LOST),
            GfxError::Vk(vk::Result::ERROR_DEVICE_LOST)
        ));
    }
}
