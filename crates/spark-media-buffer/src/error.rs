//! 媒体缓冲的错误域。
//!
//! # 角色定位（Why）
//! - 缓冲子系统只有两类真正的失败：分配失败（可恢复，向上传播为当前帧处理失败）
//!   与前置条件违例（编程错误，不应重试）。
//! - 参数校验失败单独成类，便于调用方区分“输入越界”与“对象状态不对”。
//!
//! # 设计要求（What）
//! - 每个变体都有稳定错误码（见 [`codes`]），日志与指标以错误码而非消息文本聚合；
//! - 失败的操作不得留下半完成状态，这一约束由各模块实现保证，错误类型只负责描述。

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// 稳定错误码，遵循 `<域>.<语义>` 约定。
pub mod codes {
    /// 分配器无法提供内存，或请求超过进程级上限。
    pub const ALLOCATION: &str = "buffer.allocation";
    /// 在不满足前置条件的对象上调用了操作。
    pub const INVALID_STATE: &str = "buffer.invalid_state";
    /// 参数越界或自相矛盾。
    pub const INVALID_ARGUMENT: &str = "buffer.invalid_argument";
}

/// 分配失败的具体原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocFailure {
    /// 请求大小超过 [`crate::max_alloc_size`] 配置的上限。
    ExceedsLimit {
        /// 生效中的上限（字节）。
        limit: usize,
    },
    /// 系统分配器拒绝了请求。
    OutOfMemory,
}

impl fmt::Display for AllocFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocFailure::ExceedsLimit { limit } => write!(f, "exceeds allocation limit of {limit} bytes"),
            AllocFailure::OutOfMemory => f.write_str("allocator is out of memory"),
        }
    }
}

/// 缓冲与帧操作共享的错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：让 `frame_get_buffer` 等组合操作可以直接 `?` 传播底层缓冲错误，
///   调用方只需匹配一个枚举。
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`，可跨线程传递；
///   [`MediaError::code`] 返回的字符串在版本间保持稳定。
/// - **设计权衡 (Trade-offs)**：描述信息使用 `Cow<'static, str>`，静态消息零分配，
///   需要拼接上下文时才分配。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MediaError {
    /// 分配失败，调用方通常放弃当前帧并向上报告。
    #[error("failed to allocate {requested} bytes: {reason}")]
    Allocation {
        /// 请求的字节数。
        requested: usize,
        /// 失败原因。
        reason: AllocFailure,
    },

    /// 对象状态不满足前置条件，例如向非空帧执行 `ref_from`。
    #[error("invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// 参数越界或不合法。
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),
}

impl MediaError {
    /// 构造分配失败错误。
    pub fn allocation(requested: usize, reason: AllocFailure) -> Self {
        MediaError::Allocation { requested, reason }
    }

    /// 构造状态错误。
    pub fn invalid_state(message: impl Into<Cow<'static, str>>) -> Self {
        MediaError::InvalidState(message.into())
    }

    /// 构造参数错误。
    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        MediaError::InvalidArgument(message.into())
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::Allocation { .. } => codes::ALLOCATION,
            MediaError::InvalidState(_) => codes::INVALID_STATE,
            MediaError::InvalidArgument(_) => codes::INVALID_ARGUMENT,
        }
    }

    /// 是否属于可恢复的分配失败。
    pub fn is_allocation(&self) -> bool {
        matches!(self, MediaError::Allocation { .. })
    }
}

/// crate 统一的结果别名。
pub type Result<T, E = MediaError> = core::result::Result<T, E>;
