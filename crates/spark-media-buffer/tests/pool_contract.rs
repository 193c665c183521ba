#![cfg(not(any(loom, spark_loom)))]
//! `pool_contract` 集成测试：验证 `BufferPool` 的复用、拆除与并发契约。
//!
//! # 测试总览（Why）
//! - 复用必须命中同一块存储，否则池形同虚设；
//! - 池拆除后仍在外流转的缓冲必须继续有效，并在最后释放时归还分配器；
//! - 多线程并发租借与归还不能丢失或重复回收存储。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use spark_media_buffer::{BufferConfig, BufferPool, BufferRef, Result, error::codes};

/// `CountingAllocator`：记录分配函数调用次数与外部存储释放次数。
#[derive(Clone, Default)]
struct CountingAllocator {
    allocations: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl CountingAllocator {
    fn allocate(&self, size: usize) -> Result<BufferRef> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        let releases = Arc::clone(&self.releases);
        Ok(BufferRef::create(vec![0u8; size], move |_storage: Vec<u8>| {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn pool(&self, size: usize) -> BufferPool {
        let allocator = self.clone();
        BufferPool::new(size, move |size| allocator.allocate(size))
    }

    fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// 65536 字节的池：取出两个、归还一个、再取出一个，只应分配两次且命中被归还的存储。
#[test]
fn returned_buffer_is_handed_out_again() {
    let allocator = CountingAllocator::default();
    let pool = allocator.pool(65536);

    let first = pool.get().expect("首次租借失败");
    let second = pool.get().expect("第二次租借失败");
    assert_eq!(allocator.allocations(), 2);
    assert_eq!(first.len(), 65536);
    let returned_address = first.as_ptr();

    drop(first);
    let third = pool.get().expect("复用租借失败");
    assert_eq!(allocator.allocations(), 2, "命中自由链表时不得调用分配函数");
    assert_eq!(third.as_ptr(), returned_address);
    assert!(third.is_writable(), "复用的缓冲引用计数从 1 开始");

    let stats = pool.stats();
    assert_eq!(stats.allocations, 2);
    assert_eq!(stats.reuses, 1);
    assert_eq!(stats.outstanding, 2);
    assert_eq!(stats.cached, 0);
    drop((second, third));
    assert_eq!(allocator.releases(), 0, "池存活期间存储只回到自由链表");
}

/// 拆除池时仍有缓冲在外：缓冲继续可用，最后释放时直接归还分配器。
#[test]
fn uninit_is_deferred_until_last_buffer_returns() {
    let allocator = CountingAllocator::default();
    let pool = allocator.pool(256);

    let cached = pool.get().expect("租借失败");
    let mut outstanding = pool.get().expect("租借失败");
    drop(cached);
    assert_eq!(pool.stats().cached, 1);

    pool.uninit();
    assert_eq!(allocator.releases(), 1, "拆除时自由链表中的存储立即释放");

    outstanding
        .data_mut()
        .expect("在外的缓冲应保持可写")
        .fill(0x5A);
    assert!(outstanding.data().iter().all(|&b| b == 0x5A));

    let alias = outstanding.clone();
    drop(outstanding);
    assert_eq!(allocator.releases(), 1);
    drop(alias);
    assert_eq!(allocator.releases(), 2, "最后一个引用释放时恰好归还一次");
}

/// 分配函数的错误原样传播，只读缓冲以 `InvalidState` 拒绝。
#[test]
fn allocator_failures_surface_to_caller() {
    let failing = BufferPool::new(64, |_| BufferRef::alloc(usize::MAX));
    assert_eq!(failing.get().unwrap_err().code(), codes::ALLOCATION);

    let readonly = BufferPool::new(4, |_| {
        Ok(BufferRef::from_bytes(bytes::Bytes::from_static(b"ro!!")))
    });
    assert_eq!(readonly.get().unwrap_err().code(), codes::INVALID_STATE);

    let short = BufferPool::new(64, |size| BufferRef::alloc(size / 2));
    let err = short.get().unwrap_err();
    assert_eq!(err.code(), codes::INVALID_STATE);
    assert_eq!(short.stats().outstanding, 0);
}

/// 分配函数返回偏移视图（对齐分配的常见写法）：池发放的正是该视图的字节，
/// 视图长度不足池尺寸时拒绝，即使底层存储足够大。
#[test]
fn allocator_view_is_served_as_returned() {
    const PAD: usize = 16;
    let pool = BufferPool::new(8, |size| {
        let mut storage = BufferRef::alloc(size + PAD)?;
        if let Some(bytes) = storage.data_mut() {
            bytes[..PAD].fill(0x11);
            bytes[PAD..].fill(0xAB);
        }
        storage.slice(PAD..)
    });

    let mut buf = pool.get().expect("租借失败");
    assert_eq!(buf.data(), &[0xAB; 8]);
    buf.data_mut().expect("池发放的缓冲应独占").fill(0xCD);
    let address = buf.as_ptr();
    drop(buf);

    let reused = pool.get().expect("复用租借失败");
    assert_eq!(reused.as_ptr(), address, "复用同一窗口");
    assert_eq!(reused.data(), &[0xCD; 8]);
    drop(reused);
    assert_eq!(pool.stats().cached_bytes, 8);

    let narrow = BufferPool::new(16, |size| BufferRef::alloc(size * 4)?.slice(0..4));
    assert_eq!(narrow.get().unwrap_err().code(), codes::INVALID_STATE);
    assert_eq!(narrow.stats().allocations, 0);
    assert_eq!(narrow.stats().outstanding, 0);
}

/// `pool_max_cached` 限制自由链表长度，多余的存储直接释放。
#[test]
fn cache_cap_limits_free_list() {
    let config = BufferConfig {
        pool_max_cached: Some(2),
        ..BufferConfig::default()
    };
    let pool = BufferPool::with_config(128, BufferRef::alloc, &config);
    let leased: Vec<_> = (0..4).map(|_| pool.get().expect("租借失败")).collect();
    drop(leased);

    let stats = pool.stats();
    assert_eq!(stats.cached, 2);
    assert_eq!(stats.cached_bytes, 256);
    assert_eq!(stats.outstanding, 0);

    assert_eq!(pool.shrink_to_fit(), 256);
    assert_eq!(pool.stats().cached, 0);
}

/// 多线程并发租借、写入、归还：每块存储在同一时刻只属于一个持有者。
#[test]
fn concurrent_churn_keeps_entries_exclusive() {
    let allocator = CountingAllocator::default();
    let pool = Arc::new(allocator.pool(1024));
    let threads = 8;
    let rounds = 200;

    let handles: Vec<_> = (0..threads)
        .map(|tag| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                for _ in 0..rounds {
                    let mut buf = pool.get().expect("租借失败");
                    let bytes = buf.data_mut().expect("池发放的缓冲应独占");
                    bytes.fill(tag as u8);
                    assert!(
                        buf.data().iter().all(|&b| b == tag as u8),
                        "存储被其它线程同时持有"
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("工作线程不应 panic");
    }

    let stats = pool.stats();
    assert_eq!(stats.outstanding, 0);
    assert_eq!(stats.allocations + stats.reuses, threads * rounds);
    assert!(allocator.allocations() <= threads);
    assert_eq!(stats.cached, allocator.allocations());

    match Arc::try_unwrap(pool) {
        Ok(pool) => pool.uninit(),
        Err(_) => panic!("所有工作线程已退出，池不应再被共享"),
    }
    assert_eq!(allocator.releases(), allocator.allocations());
}
