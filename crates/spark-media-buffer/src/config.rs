//! 缓冲子系统的配置。
//!
//! # 设计背景（Why）
//! - 分配上限是进程级策略：恶意或损坏的码流可能声明巨大的画面尺寸，
//!   统一上限让所有分配入口在触达系统分配器之前就拒绝请求。
//! - 默认对齐决定 `frame_get_buffer(align = 0)` 时的行跨度，SIMD 路径依赖它。
//! - 缓冲池的缓存上限用于约束峰值驻留内存。
//!
//! # 契约说明（What）
//! - [`BufferConfig`] 可由 TOML 反序列化，缺省字段取默认值，未知字段报错；
//! - [`BufferConfig::install`] 将上限与默认对齐发布到进程级原子变量，之后的分配立即生效；
//! - 池级参数（`pool_max_cached`）只在构造池时读取，不影响已存在的池。

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MediaError, Result};

/// 默认单次分配上限，与 32 位有符号尺寸字段的最大值一致。
pub const DEFAULT_MAX_ALLOC_SIZE: usize = i32::MAX as usize;

/// 默认平面对齐（字节）。
pub const DEFAULT_ALIGNMENT: usize = 32;

static MAX_ALLOC_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_ALLOC_SIZE);
static ALIGNMENT: AtomicUsize = AtomicUsize::new(DEFAULT_ALIGNMENT);

/// 当前生效的单次分配上限。
pub fn max_alloc_size() -> usize {
    MAX_ALLOC_SIZE.load(Ordering::Relaxed)
}

/// 设置单次分配上限，`0` 会被拒绝。
pub fn set_max_alloc_size(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(MediaError::invalid_argument(
            "max_alloc_size must be greater than zero",
        ));
    }
    MAX_ALLOC_SIZE.store(limit, Ordering::Relaxed);
    Ok(())
}

/// 当前生效的默认平面对齐。
pub fn default_alignment() -> usize {
    ALIGNMENT.load(Ordering::Relaxed)
}

/// 缓冲子系统配置。
///
/// # 字段
/// - `max_alloc_size`：单次分配上限（字节）；
/// - `default_alignment`：`align = 0` 时使用的平面对齐，必须是 2 的幂；
/// - `pool_max_cached`：每个池自由链表最多缓存的条目数，`None` 表示不限。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    /// 单次分配上限（字节）。
    pub max_alloc_size: usize,
    /// `align = 0` 时使用的平面对齐。
    pub default_alignment: usize,
    /// 每个池自由链表最多缓存的条目数。
    pub pool_max_cached: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_alloc_size: DEFAULT_MAX_ALLOC_SIZE,
            default_alignment: DEFAULT_ALIGNMENT,
            pool_max_cached: None,
        }
    }
}

impl BufferConfig {
    /// 从 TOML 文本解析并校验配置。
    ///
    /// ```
    /// use spark_media_buffer::BufferConfig;
    ///
    /// let config = BufferConfig::from_toml_str("default_alignment = 64").unwrap();
    /// assert_eq!(config.default_alignment, 64);
    /// assert_eq!(config.pool_max_cached, None);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BufferConfig = toml::from_str(text).map_err(|err| {
            MediaError::invalid_argument(format!("malformed buffer configuration: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段之间的约束。
    pub fn validate(&self) -> Result<()> {
        if self.max_alloc_size == 0 {
            return Err(MediaError::invalid_argument(
                "max_alloc_size must be greater than zero",
            ));
        }
        if !self.default_alignment.is_power_of_two() {
            return Err(MediaError::invalid_argument(format!(
                "default_alignment must be a power of two, got {}",
                self.default_alignment
            )));
        }
        Ok(())
    }

    /// 发布进程级参数（分配上限与默认对齐）。
    pub fn install(&self) -> Result<()> {
        self.validate()?;
        MAX_ALLOC_SIZE.store(self.max_alloc_size, Ordering::Relaxed);
        ALIGNMENT.store(self.default_alignment, Ordering::Relaxed);
        debug!(
            max_alloc_size = self.max_alloc_size,
            default_alignment = self.default_alignment,
            "buffer configuration installed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = BufferConfig::from_toml_str("pool_max_cached = 4").expect("解析配置失败");
        assert_eq!(config.max_alloc_size, DEFAULT_MAX_ALLOC_SIZE);
        assert_eq!(config.default_alignment, DEFAULT_ALIGNMENT);
        assert_eq!(config.pool_max_cached, Some(4));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_alignment() {
        let unknown = BufferConfig::from_toml_str("alignment = 16").unwrap_err();
        assert_eq!(unknown.code(), crate::error::codes::INVALID_ARGUMENT);

        let odd = BufferConfig::from_toml_str("default_alignment = 24").unwrap_err();
        assert!(odd.to_string().contains("power of two"));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let config = BufferConfig {
            max_alloc_size: 0,
            ..BufferConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(set_max_alloc_size(0).is_err());
    }
}
