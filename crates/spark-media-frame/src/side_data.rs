//! 帧边数据、量化参数表与元数据字典。
//!
//! 每条边数据都持有独立的 [`BufferRef`]，因此 `Frame::ref_from` 共享边数据只需递增引用计数；
//! 需要写入时与平面一样先 [`SideData::make_writable`]。

use std::collections::BTreeMap;
use std::fmt;

use spark_media_buffer::{BufferRef, Result};

/// 有序字符串字典，不持有任何反向引用。
pub type Metadata = BTreeMap<String, String>;

/// 边数据种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SideDataType {
    /// MPEG-2 风格的平移扫描矩形。
    PanScan,
    /// ATSC A53 Part 4 隐藏字幕。
    A53Cc,
    /// 立体 3D 打包方式。
    Stereo3d,
    /// 矩阵编码的声道立体声信息。
    MatrixEncoding,
    /// 下混元数据。
    DownmixInfo,
    /// 回放增益。
    ReplayGain,
    /// 3x3 显示变换矩阵。
    DisplayMatrix,
}

impl SideDataType {
    /// 边数据种类的可读名称，也用于 `Display`。
    pub const fn name(self) -> &'static str {
        match self {
            SideDataType::PanScan => "AVPanScan",
            SideDataType::A53Cc => "ATSC A53 Part 4 Closed Captions",
            SideDataType::Stereo3d => "Stereoscopic 3d metadata",
            SideDataType::MatrixEncoding => "AVMatrixEncoding",
            SideDataType::DownmixInfo => "Metadata relevant to a downmix procedure",
            SideDataType::ReplayGain => "AVReplayGain",
            SideDataType::DisplayMatrix => "3x3 displaymatrix",
        }
    }
}

impl fmt::Display for SideDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 一条边数据：种类、独立持有的字节缓冲与逐条元数据。
///
/// 克隆只共享缓冲（引用计数加一），[`SideData::deep_copy`] 复制字节。
#[derive(Clone, Debug)]
pub struct SideData {
    kind: SideDataType,
    buf: BufferRef,
    /// 附属于该条边数据的键值元数据。
    pub metadata: Metadata,
}

impl SideData {
    /// 以现有缓冲创建边数据，元数据为空。
    pub fn new(kind: SideDataType, buf: BufferRef) -> Self {
        Self {
            kind,
            buf,
            metadata: Metadata::new(),
        }
    }

    /// 边数据种类。
    pub fn kind(&self) -> SideDataType {
        self.kind
    }

    /// 边数据的字节内容。
    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    /// 独占时返回可写视图；共享时返回 `None`，需先调用 [`SideData::make_writable`]。
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.buf.data_mut()
    }

    /// 字节数。
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// 是否没有内容。
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 承载边数据的缓冲。
    pub fn buffer(&self) -> &BufferRef {
        &self.buf
    }

    /// 写时复制：共享时复制字节，使本条边数据独占其缓冲。
    pub fn make_writable(&mut self) -> Result<()> {
        self.buf.make_writable()
    }

    /// 复制字节与元数据，得到与原条目互不共享的副本。
    pub fn deep_copy(&self) -> Result<SideData> {
        Ok(SideData {
            kind: self.kind,
            buf: BufferRef::copy_from_slice(self.buf.data())?,
            metadata: self.metadata.clone(),
        })
    }
}

/// 量化参数表的编码约定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QpTableKind {
    /// MPEG-1 量化尺度。
    Mpeg1,
    /// MPEG-2 量化尺度。
    Mpeg2,
    /// H.264 QP。
    H264,
    /// VP5/VP6 量化参数。
    Vp56,
}

/// 逐宏块量化参数表，作为辅助缓冲挂在帧上。
#[derive(Clone, Debug)]
pub struct QpTable {
    buf: BufferRef,
    stride: usize,
    kind: QpTableKind,
}

impl QpTable {
    pub(crate) fn new(buf: BufferRef, stride: usize, kind: QpTableKind) -> Self {
        Self { buf, stride, kind }
    }

    /// 以有符号字节解读的量化参数。
    pub fn values(&self) -> impl Iterator<Item = i8> + '_ {
        self.buf.data().iter().map(|&byte| byte as i8)
    }

    /// 表的原始字节，每字节一个量化参数。
    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    /// 相邻两行宏块之间的字节数。
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// 量化参数的编码体系。
    pub fn kind(&self) -> QpTableKind {
        self.kind
    }

    /// 承载表的缓冲。
    pub fn buffer(&self) -> &BufferRef {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_and_deep_copy_detaches() {
        let mut entry = SideData::new(
            SideDataType::ReplayGain,
            BufferRef::copy_from_slice(&[1, 2, 3, 4]).expect("分配失败"),
        );
        entry.metadata.insert("track_gain".into(), "-6.5".into());

        let shared = entry.clone();
        assert!(BufferRef::ptr_eq(shared.buffer(), entry.buffer()));
        assert!(entry.data_mut().is_none(), "共享边数据不可直接写");

        let copy = entry.deep_copy().expect("深拷贝失败");
        assert!(!BufferRef::ptr_eq(copy.buffer(), entry.buffer()));
        assert_eq!(copy.data(), entry.data());
        assert_eq!(copy.metadata.get("track_gain").map(String::as_str), Some("-6.5"));

        entry.make_writable().expect("写时复制失败");
        entry.data_mut().expect("独占后应可写")[0] = 9;
        assert_eq!(shared.data()[0], 1);
    }

    #[test]
    fn qp_values_are_signed() {
        let table = QpTable::new(BufferRef::from_vec(vec![0xFF, 0x02]), 2, QpTableKind::H264);
        assert_eq!(table.values().collect::<Vec<_>>(), vec![-1, 2]);
        assert_eq!(table.stride(), 2);
    }
}
