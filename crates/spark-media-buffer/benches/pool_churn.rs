use criterion::{BenchmarkId, Criterion, black_box};
use spark_media_buffer::{BufferPool, BufferRef};
use std::{env, time::Duration};

/// 对比缓冲池租借与直接堆分配在解码循环节奏下的成本。
///
/// # 设计背景（Why）
/// - 缓冲池存在的理由是省掉分配器往返，回归时需要能直接看到两条路径的差距；
/// - 尺寸取 1080p 亮度平面与 4 KiB 小块两档，分别代表大平面与边数据。
///
/// # 逻辑解析（How）
/// - `pool_get_drop`：租借、写首字节、归还；
/// - `heap_alloc_drop`：每轮重新分配同样大小的缓冲；
/// - `cow_clone`：共享一次后写时复制，衡量复制路径的开销。
fn bench_pool_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_churn");
    for size in [4 * 1024usize, 1920 * 1088] {
        let pool = BufferPool::with_default_allocator(size);
        group.bench_with_input(BenchmarkId::new("pool_get_drop", size), &size, |b, _| {
            b.iter(|| {
                let mut buf = pool.get().unwrap();
                if let Some(bytes) = buf.data_mut() {
                    bytes[0] = 1;
                }
                black_box(buf.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("heap_alloc_drop", size), &size, |b, &size| {
            b.iter(|| {
                let mut buf = BufferRef::alloc(size).unwrap();
                if let Some(bytes) = buf.data_mut() {
                    bytes[0] = 1;
                }
                black_box(buf.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("cow_clone", size), &size, |b, &size| {
            let source = BufferRef::alloc(size).unwrap();
            b.iter(|| {
                let mut copy = source.clone();
                copy.make_writable().unwrap();
                black_box(copy.len())
            });
        });
    }
    group.finish();
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_pool_churn(&mut criterion);
    criterion.final_summary();
}
