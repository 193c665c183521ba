//! 缓冲底层存储的类型擦除层。
//!
//! `Backing` 是“释放函数 + 不透明上下文”这一对回调在 Rust 中的形态：
//! 存储本身持有字节，`Drop` 即释放动作。最后一个 [`crate::BufferRef`] 释放时，
//! 共享状态随 `Arc` 析构，`Backing` 的 `Drop` 恰好执行一次。

use bytes::Bytes;
use tracing::trace;

use crate::config::max_alloc_size;
use crate::error::{AllocFailure, MediaError, Result};

/// 底层存储契约。
///
/// - 实现必须线程安全，`Drop` 中不得 panic；
/// - `bytes_mut` 只会在持有者独占且缓冲未被标记为只读时调用；
/// - `resize` 返回 `Ok(true)` 表示已就地调整长度，`Ok(false)` 表示不支持，调用方改走复制路径。
pub(crate) trait Backing: Send + Sync + 'static {
    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    fn resize(&mut self, _new_len: usize) -> Result<bool> {
        Ok(false)
    }
}

/// 在堆上分配 `size` 字节并清零。
///
/// 超过上限或分配器失败时返回错误，绝不 panic 或中止进程。
pub(crate) fn allocate_zeroed(size: usize) -> Result<Vec<u8>> {
    let limit = max_alloc_size();
    if size > limit {
        return Err(MediaError::allocation(
            size,
            AllocFailure::ExceedsLimit { limit },
        ));
    }
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(size)
        .map_err(|_| MediaError::allocation(size, AllocFailure::OutOfMemory))?;
    storage.resize(size, 0);
    Ok(storage)
}

/// 由本 crate 分配、支持就地调整大小的堆存储。
pub(crate) struct HeapBacking {
    storage: Vec<u8>,
}

impl HeapBacking {
    pub(crate) fn new(storage: Vec<u8>) -> Self {
        Self { storage }
    }
}

impl Backing for HeapBacking {
    fn bytes(&self) -> &[u8] {
        &self.storage
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    fn resize(&mut self, new_len: usize) -> Result<bool> {
        let limit = max_alloc_size();
        if new_len > limit {
            return Err(MediaError::allocation(
                new_len,
                AllocFailure::ExceedsLimit { limit },
            ));
        }
        if new_len > self.storage.len() {
            self.storage
                .try_reserve_exact(new_len - self.storage.len())
                .map_err(|_| MediaError::allocation(new_len, AllocFailure::OutOfMemory))?;
        }
        self.storage.resize(new_len, 0);
        Ok(true)
    }
}

/// 外部所有的存储：释放时把存储交还给调用方提供的回调。
pub(crate) struct AdoptedBacking<S, F>
where
    S: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static,
    F: FnOnce(S) + Send + Sync + 'static,
{
    storage: Option<S>,
    release: Option<F>,
}

impl<S, F> AdoptedBacking<S, F>
where
    S: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static,
    F: FnOnce(S) + Send + Sync + 'static,
{
    pub(crate) fn new(storage: S, release: F) -> Self {
        Self {
            storage: Some(storage),
            release: Some(release),
        }
    }
}

impl<S, F> Backing for AdoptedBacking<S, F>
where
    S: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static,
    F: FnOnce(S) + Send + Sync + 'static,
{
    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Some(storage) => storage.as_ref(),
            None => &[],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Some(storage) => storage.as_mut(),
            None => &mut [],
        }
    }
}

impl<S, F> Drop for AdoptedBacking<S, F>
where
    S: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static,
    F: FnOnce(S) + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let (Some(storage), Some(release)) = (self.storage.take(), self.release.take()) {
            trace!(size = storage.as_ref().len(), "invoking release callback for adopted buffer");
            release(storage);
        }
    }
}

/// 只读的 `Bytes` 存储，`bytes_mut` 永远不会被调用（缓冲带只读标记）。
pub(crate) struct SharedBytesBacking {
    bytes: Bytes,
}

impl SharedBytesBacking {
    pub(crate) fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl Backing for SharedBytesBacking {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut []
    }
}
