use serde::{Deserialize, Serialize};

/// CPU 等待 GPU（fence、timeline semaphore、acquire）时使用的超时策略
///
/// 默认无限等待；有限超时会把等待超时转换为 `GfxError::Timeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitTimeout {
    #[default]
    Infinite,
    Millis(u64),
}

impl WaitTimeout {
    /// 传给 vulkan 的纳秒数，Infinite 对应 u64::MAX
    #[inline]
    pub fn as_nanos(self) -> u64 {
        match self {
            WaitTimeout::Infinite => u64::MAX,
            WaitTimeout::Millis(ms) => ms.saturating_mul(1_000_000),
        }
    }
}
