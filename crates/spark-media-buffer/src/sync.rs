//! 同步原语切换层。
//!
//! 教案级说明：为了让 Loom 在模型检查阶段能够捕获引用计数与自由链表的所有调度交错，
//! 启用 `--cfg loom`（或 `--cfg spark_loom`）时切换到 Loom 提供的 `Arc`、原子类型与互斥锁；
//! 常规构建使用标准库 `Arc` 与 `spin::Mutex`。进程级配置使用的静态原子不经过本模块，
//! 因为 Loom 原子无法在 `static` 中常量构造。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[cfg(not(any(loom, spark_loom)))]
pub(crate) type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

#[cfg(any(loom, spark_loom))]
pub(crate) type MutexGuard<'a, T> = loom::sync::MutexGuard<'a, T>;

/// 仅保护自由链表的短临界区互斥锁。
pub(crate) struct Mutex<T> {
    #[cfg(not(any(loom, spark_loom)))]
    inner: spin::Mutex<T>,
    #[cfg(any(loom, spark_loom))]
    inner: loom::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            #[cfg(not(any(loom, spark_loom)))]
            inner: spin::Mutex::new(value),
            #[cfg(any(loom, spark_loom))]
            inner: loom::sync::Mutex::new(value),
        }
    }

    #[cfg(not(any(loom, spark_loom)))]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    // 临界区内不会 panic，中毒只可能来自测试线程自身的断言失败。
    #[cfg(any(loom, spark_loom))]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
