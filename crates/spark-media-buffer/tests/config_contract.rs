#![cfg(not(any(loom, spark_loom)))]
//! 进程级配置的集成测试。
//!
//! 单独成为一个测试二进制：这里会改写全局分配上限，不能与其它测试共享进程。
//! 同一文件内的用例通过 `GLOBAL` 串行化，并在结束时恢复默认值。

use std::sync::Mutex;

use spark_media_buffer::{
    BufferConfig, BufferRef, MediaError, default_alignment, max_alloc_size, set_max_alloc_size,
};
use tracing_test::traced_test;

static GLOBAL: Mutex<()> = Mutex::new(());

#[test]
#[traced_test]
fn installed_limit_applies_to_every_allocation_entry() {
    let _guard = GLOBAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let config = BufferConfig::from_toml_str(
        r#"
        max_alloc_size = 1024
        default_alignment = 64
        "#,
    )
    .expect("解析配置失败");
    config.install().expect("安装配置失败");
    assert!(logs_contain("buffer configuration installed"));
    assert_eq!(max_alloc_size(), 1024);
    assert_eq!(default_alignment(), 64);

    assert!(BufferRef::alloc(1024).is_ok());
    assert!(matches!(
        BufferRef::alloc(1025),
        Err(MediaError::Allocation { requested: 1025, .. })
    ));
    assert!(BufferRef::copy_from_slice(&[0u8; 2048]).is_err());

    let mut buf = BufferRef::alloc(512).expect("分配失败");
    assert!(buf.realloc(4096).is_err());
    assert_eq!(buf.len(), 512, "失败时句柄保持原状");

    BufferConfig::default().install().expect("恢复默认配置失败");
}

#[test]
fn set_max_alloc_size_rejects_zero_and_takes_effect() {
    let _guard = GLOBAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    assert!(set_max_alloc_size(0).is_err());
    set_max_alloc_size(16).expect("设置上限失败");
    assert!(BufferRef::alloc(17).is_err());
    assert!(BufferRef::alloc(16).is_ok());
    BufferConfig::default().install().expect("恢复默认配置失败");
}
