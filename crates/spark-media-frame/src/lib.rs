#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `spark-media-frame` 把引用计数平面缓冲组合为多平面媒体帧。
//!
//! # 模块定位（Why）
//! - 一幅解码图像由多个平面组成（亮度、色度、透明度、调色板），一段平面音频每声道一个平面；
//!   帧级操作（共享、释放、写时复制）需要一次作用于全部平面并保持原子性。
//!
//! # 设计概要（How）
//! - `frame`：[`Frame`] 与 [`Plane`]，8 个内联槽位加扩展列表；
//! - `layout`：像素 / 采样格式的平面布局，只描述尺寸，不涉及转换；
//! - `side_data`：边数据、量化参数表与元数据字典，各自持有独立缓冲；
//! - `pool`：[`PlaneAllocator`] 抽象与按平面索引复用缓冲的 [`FramePool`]；
//! - `props`：时间戳、图像类型、色彩描述等标量属性。
//!
//! 错误类型与缓冲原语来自 `spark-media-buffer`，在此重新导出。

mod frame;
pub mod layout;
mod pool;
pub mod props;
mod side_data;

pub use frame::{Frame, Plane};
pub use layout::{MediaFormat, PixelFormat, PlaneLayout, SampleFormat};
pub use pool::{FramePool, HeapAllocator, PlaneAllocator};
pub use props::FrameProps;
pub use side_data::{Metadata, QpTable, QpTableKind, SideData, SideDataType};
pub use spark_media_buffer::{BufferPool, BufferRef, MediaError, Result};
