#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `spark-media-buffer` 提供媒体数据的引用计数缓冲与池化复用。
//!
//! # 模块定位（Why）
//! - 解码、滤镜、封装等阶段需要在多个线程之间共享大块字节（图像平面、音频采样、码流负载），
//!   复制这些数据的成本远高于传递一个句柄。
//! - 本 crate 以 [`BufferRef`] 承载“共享所有权 + 写时复制”的契约，以 [`BufferPool`]
//!   摊薄高频分配/释放（每帧一次）的堆开销。
//!
//! # 设计概要（How）
//! - `buffer_ref` 模块：`Arc` 的强引用计数即缓冲的引用计数，类型擦除的 `Backing`
//!   在最后一个句柄释放时执行回收逻辑（释放内存、调用外部回调或归还缓冲池）。
//! - `pool` 模块：基于自由链表的缓冲池，回收钩子在 `get` 时绑定到具体池的共享状态，
//!   池被拆除后仍在外流转的缓冲会延长共享状态的生命周期，最终直接释放。
//! - `config` 模块：进程级分配上限与默认对齐；`error` 模块：稳定错误码。
//! - `sync` 模块：在 `--cfg loom` 下切换到 Loom 原语，便于穷举并发交错。
//!
//! # 命名约定（Consistency）
//! - 操作命名与媒体框架的惯用术语保持一致：`alloc`、`create`、`make_writable`、`realloc`；
//!   `ref`/`unref` 分别对应 `Clone` 与 `Drop`。

mod backing;
mod buffer_ref;
pub mod config;
pub mod error;
mod pool;
mod sync;

pub use buffer_ref::{BufferFlags, BufferRef};
pub use config::{BufferConfig, default_alignment, max_alloc_size, set_max_alloc_size};
pub use error::{AllocFailure, MediaError, Result};
pub use pool::{BufferPool, PoolStats};
