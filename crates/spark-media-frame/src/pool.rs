//! 平面分配策略：堆分配、单尺寸缓冲池与按平面索引的帧级缓冲池。

use std::fmt;
use std::sync::Arc;

use spark_media_buffer::{BufferConfig, BufferPool, BufferRef, MediaError, PoolStats, Result};
use spin::Mutex;
use tracing::debug;

/// 为帧的第 `plane` 个平面提供至少 `size` 字节的独占缓冲。
///
/// # 契约说明（What）
/// - 返回的缓冲必须独占、可写且长度不小于 `size`，否则 `Frame::get_buffer_with` 以
///   `InvalidState` 拒绝并回滚已分配的平面；
/// - 实现需线程安全，同一分配器可能被多个解码线程同时使用。
pub trait PlaneAllocator: Send + Sync {
    /// 为第 `plane` 个平面分配至少 `size` 字节的缓冲。
    fn allocate(&self, plane: usize, size: usize) -> Result<BufferRef>;
}

/// 每次直接向堆申请。`Frame::get_buffer` 的默认策略。
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl PlaneAllocator for HeapAllocator {
    fn allocate(&self, _plane: usize, size: usize) -> Result<BufferRef> {
        BufferRef::alloc(size)
    }
}

/// 单个缓冲池服务所有平面，请求尺寸不得超过池尺寸。
impl PlaneAllocator for BufferPool {
    fn allocate(&self, _plane: usize, size: usize) -> Result<BufferRef> {
        if size > self.size() {
            return Err(MediaError::invalid_argument(format!(
                "plane of {size} bytes does not fit pool buffers of {} bytes",
                self.size()
            )));
        }
        self.get()
    }
}

/// `FramePool` 为解码循环按平面索引维护缓冲池。
///
/// # 设计背景（Why）
/// - 同一路码流的帧布局通常固定，每个平面索引的尺寸在多帧之间保持不变；
/// - 布局变化（分辨率切换）时只需替换尺寸改变的平面池，旧池在外的缓冲照常释放。
///
/// # 核心机制（How）
/// - `pools[i]` 服务第 `i` 个平面，锁只保护池列表的查找与替换；
/// - 取缓冲前克隆出 `Arc<BufferPool>` 并释放锁，池自身的自由链表锁不会嵌套在本锁内。
pub struct FramePool {
    config: BufferConfig,
    pools: Mutex<Vec<Option<Arc<BufferPool>>>>,
}

impl FramePool {
    /// 使用默认缓冲配置创建空的帧池，平面池按需创建。
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    /// `config.pool_max_cached` 约束每个平面池的缓存条目数。
    pub fn with_config(config: BufferConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(Vec::new()),
        }
    }

    fn pool_for(&self, plane: usize, size: usize) -> Arc<BufferPool> {
        let mut pools = self.pools.lock();
        if pools.len() <= plane {
            pools.resize_with(plane + 1, || None);
        }
        if let Some(pool) = pools[plane].as_ref().filter(|pool| pool.size() == size) {
            return Arc::clone(pool);
        }
        let previous = pools[plane].as_ref().map(|pool| pool.size());
        debug!(plane, size, ?previous, "frame pool plane reinitialised");
        let pool = Arc::new(BufferPool::with_config(size, BufferRef::alloc, &self.config));
        pools[plane] = Some(Arc::clone(&pool));
        pool
    }

    /// 每个平面池的统计快照，未初始化的平面为 `None`。
    pub fn stats(&self) -> Vec<Option<PoolStats>> {
        self.pools
            .lock()
            .iter()
            .map(|pool| pool.as_ref().map(|pool| pool.stats()))
            .collect()
    }

    /// 丢弃全部平面池。在外的缓冲在最后一次释放时直接归还分配器。
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.pools.lock());
        debug!(planes = drained.len(), "frame pool cleared");
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaneAllocator for FramePool {
    fn allocate(&self, plane: usize, size: usize) -> Result<BufferRef> {
        self.pool_for(plane, size).get()
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("planes", &self.stats())
            .finish()
    }
}
