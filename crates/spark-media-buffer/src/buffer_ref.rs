use std::any::Any;
use std::fmt;
use std::ops::{Bound, Range, RangeBounds};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::backing::{AdoptedBacking, Backing, HeapBacking, SharedBytesBacking, allocate_zeroed};
use crate::error::{MediaError, Result};
use crate::sync::Arc;

/// 缓冲标志位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// 缓冲永远不可写，即使只剩一个引用。
    pub const READONLY: BufferFlags = BufferFlags(1);

    /// 空标志集合。
    pub const fn empty() -> Self {
        BufferFlags(0)
    }

    /// 是否包含 `other` 的全部位。
    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// 按位合并。
    pub const fn union(self, other: BufferFlags) -> Self {
        BufferFlags(self.0 | other.0)
    }
}

/// 被所有 `BufferRef` 共享的缓冲本体。
///
/// `Arc` 的强引用计数就是缓冲的引用计数：计数从 1 变为 0 时 `BufferInner` 析构，
/// 其 `backing` 随之析构并执行释放动作，且只执行一次。
struct BufferInner {
    backing: Box<dyn Backing>,
    flags: BufferFlags,
    opaque: Option<Box<dyn Any + Send + Sync>>,
}

/// `BufferRef` 是共享一块媒体缓冲的轻量句柄。
///
/// # 设计动机（Why）
/// - 解码输出的图像平面会被滤镜、编码器、渲染器同时引用，复制字节的代价远大于递增一次原子计数；
/// - 句柄可以只覆盖缓冲的一段（`offset`/`len`），多个句柄可以指向同一缓冲的重叠或不重叠区域。
///
/// # 架构关系（How）
/// - `inner`：`Arc<BufferInner>`，克隆即 `ref`，析构即 `unref`；
/// - `offset`/`len`：句柄可见的字节窗口，始终满足 `offset + len <= 缓冲大小`；
/// - 写访问经由 `Arc::get_mut` 获得，它在判定“唯一持有者”时带有获取语义，
///   保证其它线程在释放引用之前的读取都已完成。
///
/// # 契约说明（What）
/// - **可写性**：当且仅当引用计数恰为 1 且缓冲未被标记为 [`BufferFlags::READONLY`]；
/// - **写时复制**：任何可能写入共享缓冲的代码必须先调用 [`BufferRef::make_writable`]，
///   [`BufferRef::data_mut`] 在共享状态下返回 `None`，违例无法通过安全 API 发生；
/// - **释放**：最后一个句柄析构时执行释放动作（释放内存、外部回调或归还缓冲池）。
///
/// # 风险与取舍（Trade-offs）
/// - `is_writable` 只是某一时刻的快照；对共享缓冲而言，其它线程随时可能释放引用使其变为可写，
///   但不会出现“判定为可写后又被别人共享”的情况，因为新的引用只能从已有句柄克隆得到。
#[derive(Clone)]
pub struct BufferRef {
    inner: Arc<BufferInner>,
    offset: usize,
    len: usize,
}

impl BufferRef {
    /// 分配 `size` 字节的新缓冲，引用计数为 1。
    ///
    /// 内容在安全 Rust 中总是已初始化（清零）；需要显式保证清零语义时使用 [`BufferRef::alloc_zeroed`]。
    ///
    /// # 错误
    /// - 超过 [`crate::max_alloc_size`] 或分配器失败时返回 [`MediaError::Allocation`]，不会返回半成品句柄。
    pub fn alloc(size: usize) -> Result<Self> {
        Ok(Self::from_heap(allocate_zeroed(size)?))
    }

    /// 分配并清零 `size` 字节。
    pub fn alloc_zeroed(size: usize) -> Result<Self> {
        Self::alloc(size)
    }

    /// 分配新缓冲并复制 `src` 的内容。
    pub fn copy_from_slice(src: &[u8]) -> Result<Self> {
        let mut storage = allocate_zeroed(src.len())?;
        storage.copy_from_slice(src);
        Ok(Self::from_heap(storage))
    }

    /// 接管调用方拥有的存储，零拷贝。
    ///
    /// # 参数
    /// - `storage`：任何可读写字节容器（`Vec<u8>`、`Box<[u8]>`、`BytesMut`、映射内存的封装等）；
    /// - `release`：最后一个引用释放时以 `storage` 为参数调用，恰好一次。
    ///
    /// # 示例
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use spark_media_buffer::BufferRef;
    ///
    /// let released = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&released);
    /// let buf = BufferRef::create(vec![1u8, 2, 3], move |_storage: Vec<u8>| {
    ///     counter.fetch_add(1, Ordering::SeqCst);
    /// });
    /// let alias = buf.clone();
    /// drop(buf);
    /// assert_eq!(released.load(Ordering::SeqCst), 0);
    /// drop(alias);
    /// assert_eq!(released.load(Ordering::SeqCst), 1);
    /// ```
    pub fn create<S, F>(storage: S, release: F) -> Self
    where
        S: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static,
        F: FnOnce(S) + Send + Sync + 'static,
    {
        Self::create_with(storage, release, BufferFlags::empty(), None)
    }

    /// [`BufferRef::create`] 的完整形态：附带标志位与不透明上下文。
    ///
    /// 不透明上下文可通过 [`BufferRef::opaque`] 按类型取回，生命周期与缓冲本体一致。
    pub fn create_with<S, F>(
        storage: S,
        release: F,
        flags: BufferFlags,
        opaque: Option<Box<dyn Any + Send + Sync>>,
    ) -> Self
    where
        S: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static,
        F: FnOnce(S) + Send + Sync + 'static,
    {
        Self::from_backing(Box::new(AdoptedBacking::new(storage, release)), flags, opaque)
    }

    /// 接管 `Vec<u8>`，释放时归还全局分配器。
    pub fn from_vec(storage: Vec<u8>) -> Self {
        Self::from_heap(storage)
    }

    /// 接管 `Box<[u8]>`。
    pub fn from_boxed_slice(storage: Box<[u8]>) -> Self {
        Self::from_heap(storage.into_vec())
    }

    /// 接管 `BytesMut`，缓冲可写。
    pub fn from_bytes_mut(storage: BytesMut) -> Self {
        Self::create(storage, drop)
    }

    /// 包装 `Bytes`，缓冲带只读标志，任何时候都不可写。
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::from_backing(
            Box::new(SharedBytesBacking::new(bytes)),
            BufferFlags::READONLY,
            None,
        )
    }

    fn from_heap(storage: Vec<u8>) -> Self {
        Self::from_backing(Box::new(HeapBacking::new(storage)), BufferFlags::empty(), None)
    }

    pub(crate) fn from_backing(
        backing: Box<dyn Backing>,
        flags: BufferFlags,
        opaque: Option<Box<dyn Any + Send + Sync>>,
    ) -> Self {
        let len = backing.bytes().len();
        Self {
            inner: Arc::new(BufferInner {
                backing,
                flags,
                opaque,
            }),
            offset: 0,
            len,
        }
    }

    /// 夺回独占缓冲的底层存储与句柄的可见窗口，供缓冲池重新包装。
    ///
    /// 非独占时原样返回句柄。被夺走存储的外壳随即析构，不会触发释放动作。
    pub(crate) fn into_backing(
        mut self,
    ) -> core::result::Result<(Box<dyn Backing>, Range<usize>), BufferRef> {
        let window = self.offset..self.offset + self.len;
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => Ok((
                std::mem::replace(&mut inner.backing, Box::new(HeapBacking::new(Vec::new()))),
                window,
            )),
            None => Err(self),
        }
    }

    /// 句柄可见的字节。
    pub fn data(&self) -> &[u8] {
        &self.inner.backing.bytes()[self.offset..self.offset + self.len]
    }

    /// 独占且非只读时返回可写视图，否则返回 `None`。
    ///
    /// 需要写入可能共享的缓冲时，先调用 [`BufferRef::make_writable`]。
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        if self.inner.flags.contains(BufferFlags::READONLY) {
            return None;
        }
        let (offset, len) = (self.offset, self.len);
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.backing.bytes_mut()[offset..offset + len])
    }

    /// 句柄可见的字节数。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 句柄是否为空视图。
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 视图在缓冲中的起始偏移。
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 整个缓冲的大小（不受视图限制）。
    pub fn buffer_size(&self) -> usize {
        self.inner.backing.bytes().len()
    }

    /// 缓冲标志位。
    pub fn flags(&self) -> BufferFlags {
        self.inner.flags
    }

    /// 当前引用计数。
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// 引用计数恰为 1 且非只读。
    pub fn is_writable(&self) -> bool {
        !self.inner.flags.contains(BufferFlags::READONLY) && Arc::strong_count(&self.inner) == 1
    }

    /// 按类型取回创建时附带的不透明上下文。
    pub fn opaque<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner
            .opaque
            .as_ref()
            .and_then(|opaque| opaque.downcast_ref::<T>())
    }

    /// 两个句柄是否共享同一缓冲本体。
    pub fn ptr_eq(a: &BufferRef, b: &BufferRef) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// 视图首字节的地址，仅用于身份比较与诊断。
    pub fn as_ptr(&self) -> *const u8 {
        self.data().as_ptr()
    }

    /// 创建覆盖 `range`（相对当前视图）的新句柄，引用计数加一。
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<BufferRef> {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end.saturating_add(1),
            Bound::Excluded(&end) => end,
            Bound::Unbounded => self.len,
        };
        if start > end || end > self.len {
            return Err(MediaError::invalid_argument(format!(
                "slice {start}..{end} out of bounds for view of {} bytes",
                self.len
            )));
        }
        Ok(BufferRef {
            inner: Arc::clone(&self.inner),
            offset: self.offset + start,
            len: end - start,
        })
    }

    /// 将视图缩短到 `len` 字节，不影响缓冲本体与引用计数。
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// 确保句柄独占其缓冲。
    ///
    /// # 契约说明（What）
    /// - 已可写时什么也不做，缓冲本体不变；
    /// - 否则分配同样大小的新缓冲、复制视图字节，再释放对共享缓冲的引用；
    ///   其它持有者看到的字节与引用关系不受影响；
    /// - 分配失败时句柄保持原状。
    pub fn make_writable(&mut self) -> Result<()> {
        if self.is_writable() {
            return Ok(());
        }
        let mut storage = allocate_zeroed(self.len)?;
        storage.copy_from_slice(self.data());
        debug!(
            size = self.len,
            shared_refs = self.ref_count(),
            "copy-on-write detached shared media buffer"
        );
        *self = Self::from_heap(storage);
        Ok(())
    }

    /// 调整句柄可见的大小。
    ///
    /// 独占、视图覆盖整个缓冲且底层存储支持调整时就地完成，新增字节为 0；
    /// 否则分配新缓冲、复制 `min(len, new_size)` 字节并释放旧引用。失败时句柄保持原状。
    pub fn realloc(&mut self, new_size: usize) -> Result<()> {
        let whole_view = self.offset == 0 && self.len == self.buffer_size();
        if whole_view && self.is_writable() {
            if let Some(inner) = Arc::get_mut(&mut self.inner) {
                if inner.backing.resize(new_size)? {
                    self.len = new_size;
                    return Ok(());
                }
            }
        }
        let mut storage = allocate_zeroed(new_size)?;
        let keep = self.len.min(new_size);
        storage[..keep].copy_from_slice(&self.data()[..keep]);
        *self = Self::from_heap(storage);
        Ok(())
    }

    /// 复制视图字节为 `Vec<u8>`。
    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }
}

impl AsRef<[u8]> for BufferRef {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl From<Vec<u8>> for BufferRef {
    fn from(storage: Vec<u8>) -> Self {
        Self::from_vec(storage)
    }
}

impl From<Bytes> for BufferRef {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRef")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("buffer_size", &self.buffer_size())
            .field("ref_count", &self.ref_count())
            .field("flags", &self.inner.flags)
            .finish()
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;

    #[test]
    fn slice_shares_buffer_and_bounds_are_checked() {
        let mut buf = BufferRef::alloc(8).expect("分配失败");
        buf.data_mut()
            .expect("新分配的缓冲应可写")
            .copy_from_slice(b"abcdefgh");
        let middle = buf.slice(2..5).expect("切片应成功");
        assert_eq!(middle.data(), b"cde");
        assert_eq!(middle.offset(), 2);
        assert_eq!(buf.ref_count(), 2);
        assert!(BufferRef::ptr_eq(&buf, &middle));
        assert!(buf.slice(4..9).is_err(), "越界切片应报错");
        assert!(middle.slice(..=3).is_err(), "相对视图越界同样报错");
    }

    #[test]
    fn readonly_buffer_is_never_writable() {
        let mut buf = BufferRef::from_bytes(Bytes::from_static(b"frozen"));
        assert_eq!(buf.ref_count(), 1);
        assert!(!buf.is_writable());
        assert!(buf.data_mut().is_none());
        buf.make_writable().expect("只读缓冲应复制为可写缓冲");
        assert!(buf.is_writable());
        assert_eq!(buf.data(), b"frozen");
    }

    #[test]
    fn realloc_of_slice_copies_visible_bytes() {
        let mut buf = BufferRef::from_vec(b"0123456789".to_vec());
        let mut tail = buf.slice(6..).expect("切片应成功");
        drop(buf);
        tail.realloc(6).expect("复制路径不应失败");
        assert_eq!(tail.data(), b"6789\0\0");
        assert_eq!(tail.offset(), 0);
        assert!(tail.is_writable());
    }

    #[test]
    fn opaque_is_typed() {
        let buf = BufferRef::create_with(
            vec![0u8; 4],
            drop,
            BufferFlags::empty(),
            Some(Box::new(42u32)),
        );
        assert_eq!(buf.opaque::<u32>(), Some(&42));
        assert!(buf.opaque::<u64>().is_none());
    }

    #[test]
    fn into_backing_requires_exclusive_handle() {
        let buf = BufferRef::from_vec(vec![1, 2, 3]);
        let alias = buf.clone();
        let buf = match buf.into_backing() {
            Ok(_) => panic!("共享时不应交出存储"),
            Err(buf) => buf,
        };
        drop(alias);
        let (backing, window) = buf.into_backing().ok().expect("独占时应交出存储");
        assert_eq!(backing.bytes(), &[1, 2, 3]);
        assert_eq!(window, 0..3);

        let view = BufferRef::from_vec(vec![1, 2, 3, 4, 5])
            .slice(1..4)
            .expect("切片应成功");
        let (backing, window) = view.into_backing().ok().expect("独占视图应交出存储");
        assert_eq!(&backing.bytes()[window], &[2, 3, 4]);
    }
}
