use std::fmt;
use std::ops::Range;

use tracing::{debug, trace, warn};

use crate::backing::Backing;
use crate::buffer_ref::{BufferFlags, BufferRef};
use crate::config::BufferConfig;
use crate::error::{MediaError, Result};
use crate::sync::{Arc, AtomicUsize, Mutex, Ordering};

type AllocFn = dyn Fn(usize) -> Result<BufferRef> + Send + Sync;

/// `BufferPool` 是固定尺寸媒体缓冲的自由链表池。
///
/// # 模块角色（Why）
/// - 紧密的解码循环每帧都要申请、释放同样大小的平面缓冲，
///   复用已释放的存储可以省掉绝大多数分配器往返；
/// - 池发放的仍是普通 [`BufferRef`]，消费方无需感知缓冲来自池还是堆。
///
/// # 核心机制（How）
/// - 共享状态 `PoolShared` 由池本身与每个在外流转的缓冲共同持有（`Arc`）；
/// - `get` 时把存储包装为 `PooledBacking`，它的 `Drop` 就是绑定到本池的释放函数：
///   最后一个引用释放时把存储交还 `PoolShared::reclaim`；
/// - 自由链表由 `spin::Mutex` 保护，锁只覆盖一次 push/pop，存储的析构总是在锁外执行；
/// - 原子计数跟踪分配、复用、在外数量，支撑 [`PoolStats`] 快照。
///
/// # 契约说明（What）
/// - 同一存储不会同时出现在自由链表与调用方手中：出链表后才包装，回收时包装已析构；
/// - 复用的缓冲引用计数重新从 1 开始，内容保持上一次使用后的状态（不清零）；
/// - [`BufferPool::uninit`]（或析构）只标记关闭并清空自由链表；仍在外的缓冲延长共享状态的生命周期，
///   释放时直接归还分配器而不再入链表。
///
/// # 设计权衡（Trade-offs）
/// - 复用的存储不清零，与平面缓冲“先写后读”的使用方式一致，省掉一次整块写入；
/// - 分配函数返回的缓冲必须独占且可写，否则池无法接管其存储，此时以 `InvalidState` 报告。
/// - 池接管的是分配函数返回句柄的可见窗口（例如 `alloc(n + pad)?.slice(pad..)` 的对齐视图），
///   窗口长度不足池尺寸即拒绝，窗口之外的字节不会对外发放。
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// 创建服务 `size` 字节缓冲的池，未命中时调用 `alloc`。
    pub fn new<F>(size: usize, alloc: F) -> Self
    where
        F: Fn(usize) -> Result<BufferRef> + Send + Sync + 'static,
    {
        Self::with_config(size, alloc, &BufferConfig::default())
    }

    /// 使用堆分配作为未命中路径。
    pub fn with_default_allocator(size: usize) -> Self {
        Self::new(size, BufferRef::alloc)
    }

    /// 按配置创建池，`config.pool_max_cached` 约束自由链表长度。
    pub fn with_config<F>(size: usize, alloc: F, config: &BufferConfig) -> Self
    where
        F: Fn(usize) -> Result<BufferRef> + Send + Sync + 'static,
    {
        let max_cached = config.pool_max_cached.unwrap_or(usize::MAX);
        debug!(size, max_cached, "buffer pool initialised");
        Self {
            shared: Arc::new(PoolShared {
                size,
                max_cached,
                alloc: Box::new(alloc),
                free_list: Mutex::new(FreeList {
                    entries: Vec::new(),
                    closed: false,
                }),
                metrics: PoolMetrics::new(),
            }),
        }
    }

    /// 池服务的缓冲大小。
    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// 取出一个缓冲：优先复用自由链表，否则调用分配函数。
    ///
    /// # 错误
    /// - 分配函数失败时原样传播（通常是 [`MediaError::Allocation`]）；
    /// - 分配函数返回共享、只读或过小的缓冲时返回 [`MediaError::InvalidState`]。
    pub fn get(&self) -> Result<BufferRef> {
        let recycled = self.shared.free_list.lock().entries.pop();
        let entry = match recycled {
            Some(entry) => {
                self.shared.metrics.reuses.fetch_add(1, Ordering::Relaxed);
                trace!(size = self.shared.size, "buffer pool hit");
                entry
            }
            None => self.shared.allocate_entry()?,
        };
        self.shared.metrics.outstanding.fetch_add(1, Ordering::Relaxed);
        let pooled = PooledBacking {
            entry: Some(entry),
            shared: Arc::clone(&self.shared),
        };
        Ok(BufferRef::from_backing(Box::new(pooled), BufferFlags::empty(), None))
    }

    /// 释放自由链表中缓存的全部存储，返回释放的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        let drained = std::mem::take(&mut self.shared.free_list.lock().entries);
        let reclaimed: usize = drained.iter().map(PoolEntry::len).sum();
        debug!(entries = drained.len(), bytes = reclaimed, "buffer pool shrunk");
        reclaimed
    }

    /// 统计快照。
    pub fn stats(&self) -> PoolStats {
        let (cached, cached_bytes) = {
            let list = self.shared.free_list.lock();
            let bytes = list.entries.iter().map(PoolEntry::len).sum();
            (list.entries.len(), bytes)
        };
        let metrics = &self.shared.metrics;
        PoolStats {
            buffer_size: self.shared.size,
            allocations: metrics.allocations.load(Ordering::Relaxed),
            reuses: metrics.reuses.load(Ordering::Relaxed),
            outstanding: metrics.outstanding.load(Ordering::Relaxed),
            cached,
            cached_bytes,
            released_after_uninit: metrics.released_after_uninit.load(Ordering::Relaxed),
        }
    }

    /// 拆除池。等价于析构，提供显式名字便于在调用点表达意图。
    pub fn uninit(self) {
        drop(self);
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// 缓冲池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 池服务的缓冲大小。
    pub buffer_size: usize,
    /// 调用分配函数的次数（未命中次数）。
    pub allocations: usize,
    /// 自由链表命中次数。
    pub reuses: usize,
    /// 当前在外流转的缓冲数。
    pub outstanding: usize,
    /// 自由链表中的条目数。
    pub cached: usize,
    /// 自由链表中的字节数（按池保留的窗口计，不含分配函数多给的存储）。
    pub cached_bytes: usize,
    /// 池拆除后才释放、因而直接归还分配器的缓冲数。
    pub released_after_uninit: usize,
}

struct FreeList {
    entries: Vec<PoolEntry>,
    closed: bool,
}

/// 池接管的一份存储：分配函数返回的底层存储，以及池对外发放的窗口。
///
/// 窗口取自分配函数返回句柄的可见区间，截到池尺寸；窗口之外的字节从不对外暴露。
struct PoolEntry {
    backing: Box<dyn Backing>,
    window: Range<usize>,
}

impl PoolEntry {
    fn bytes(&self) -> &[u8] {
        &self.backing.bytes()[self.window.clone()]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let window = self.window.clone();
        &mut self.backing.bytes_mut()[window]
    }

    fn len(&self) -> usize {
        self.window.len()
    }
}

struct PoolShared {
    size: usize,
    max_cached: usize,
    alloc: Box<AllocFn>,
    free_list: Mutex<FreeList>,
    metrics: PoolMetrics,
}

impl PoolShared {
    /// 未命中路径：调用分配函数并接管其存储。
    fn allocate_entry(&self) -> Result<PoolEntry> {
        let buf = (self.alloc)(self.size)?;
        if buf.flags().contains(BufferFlags::READONLY) {
            warn!(size = self.size, "pool allocator returned a read-only buffer");
            return Err(MediaError::invalid_state(
                "pool allocator returned a read-only buffer",
            ));
        }
        let actual = buf.len();
        if actual < self.size {
            warn!(size = self.size, actual, "pool allocator returned a short buffer");
            return Err(MediaError::invalid_state(format!(
                "pool allocator returned {actual} bytes, pool serves {}",
                self.size
            )));
        }
        let (backing, window) = match buf.into_backing() {
            Ok(parts) => parts,
            Err(shared) => {
                warn!(
                    size = self.size,
                    refs = shared.ref_count(),
                    "pool allocator returned a shared buffer"
                );
                return Err(MediaError::invalid_state(
                    "pool allocator returned a shared buffer",
                ));
            }
        };
        self.metrics.allocations.fetch_add(1, Ordering::Relaxed);
        debug!(size = self.size, "buffer pool miss, allocated new entry");
        Ok(PoolEntry {
            backing,
            window: window.start..window.start + self.size,
        })
    }

    /// 回收路径：由 `PooledBacking::drop` 在最后一个引用释放时调用。
    fn reclaim(&self, entry: PoolEntry) {
        saturating_decrement(&self.metrics.outstanding);
        let rejected = {
            let mut list = self.free_list.lock();
            if list.closed {
                self.metrics
                    .released_after_uninit
                    .fetch_add(1, Ordering::Relaxed);
                Some(entry)
            } else if list.entries.len() >= self.max_cached {
                Some(entry)
            } else {
                list.entries.push(entry);
                None
            }
        };
        match rejected {
            Some(entry) => {
                trace!(size = self.size, "pooled buffer released to allocator");
                drop(entry);
            }
            None => trace!(size = self.size, "pooled buffer returned to free list"),
        }
    }

    fn close(&self) {
        let drained = {
            let mut list = self.free_list.lock();
            list.closed = true;
            std::mem::take(&mut list.entries)
        };
        debug!(
            size = self.size,
            freed = drained.len(),
            outstanding = self.metrics.outstanding.load(Ordering::Relaxed),
            "buffer pool uninitialised"
        );
    }
}

/// 池内存储在外流转时的包装；析构即“归还本池”。
struct PooledBacking {
    entry: Option<PoolEntry>,
    shared: Arc<PoolShared>,
}

impl Backing for PooledBacking {
    fn bytes(&self) -> &[u8] {
        match &self.entry {
            Some(entry) => entry.bytes(),
            None => &[],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.entry {
            Some(entry) => entry.bytes_mut(),
            None => &mut [],
        }
    }
}

impl Drop for PooledBacking {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.shared.reclaim(entry);
        }
    }
}

struct PoolMetrics {
    allocations: AtomicUsize,
    reuses: AtomicUsize,
    outstanding: AtomicUsize,
    released_after_uninit: AtomicUsize,
}

impl PoolMetrics {
    fn new() -> Self {
        Self {
            allocations: AtomicUsize::new(0),
            reuses: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            released_after_uninit: AtomicUsize::new(0),
        }
    }
}

fn saturating_decrement(target: &AtomicUsize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(1))
    });
}
