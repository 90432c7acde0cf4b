use ash::vk;

slotmap::new_key_type! {
    /// 图形管线的句柄，DrawBatch 以此分组
    pub struct PipelineHandle;
}

/// 资源的身份：vulkan 对象的原始句柄
///
/// 同一个资源的两份拷贝身份相同，bindless 注册以身份而不是值判重。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity(pub u64);

impl ResourceIdentity {
    #[inline]
    pub fn from_handle<H: vk::Handle>(handle: H) -> Self {
        Self(handle.as_raw())
    }
}

/// bindless 描述符数组中的下标，shader 中直接使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindlessSlot(pub u32);

impl BindlessSlot {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn identity_comes_from_raw_handle() {
        let buffer = vk::Buffer::from_raw(0xdead_beef);
        assert_eq!(ResourceIdentity::from_handle(buffer), ResourceIdentity(0xdead_beef));
    }
}
