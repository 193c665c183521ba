use spark_media_buffer::{BufferRef, MediaError, Result};
use tracing::{debug, trace, warn};

use crate::layout::{
    INLINE_PLANES, MediaFormat, PixelFormat, PlaneLayout, SampleFormat, audio_layout, video_layout,
};
use crate::pool::{HeapAllocator, PlaneAllocator};
use crate::props::FrameProps;
use crate::side_data::{Metadata, QpTable, QpTableKind, SideData, SideDataType};

/// 帧的一个平面：持有缓冲的引用与行跨度。
///
/// 平面数据总是从 `buf` 派生，替换缓冲即同时替换数据，不存在缓存指针与缓冲脱节的可能。
#[derive(Clone, Debug)]
pub struct Plane {
    buf: BufferRef,
    linesize: usize,
}

impl Plane {
    /// 平面可见的字节，含行尾与尾部填充。
    pub fn data(&self) -> &[u8] {
        self.buf.data()
    }

    /// 独占时返回可写视图，共享时返回 `None`。
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.buf.data_mut()
    }

    /// 相邻两行起点之间的字节数。
    pub fn linesize(&self) -> usize {
        self.linesize
    }

    /// 平面背后的缓冲句柄。
    pub fn buffer(&self) -> &BufferRef {
        &self.buf
    }

    /// 平面缓冲独占且非只读。
    pub fn is_writable(&self) -> bool {
        self.buf.is_writable()
    }
}

/// `Frame` 把若干平面缓冲、边数据与标量属性组合为一个媒体单元（一幅图像或一段音频）。
///
/// # 设计动机（Why）
/// - 解码器产出的帧会被多个滤镜、编码器并行消费，帧级共享必须只是递增每个平面的引用计数；
/// - 写入前以帧为单位执行写时复制，只复制真正被共享的平面。
///
/// # 架构关系（How）
/// - 前 8 个平面存放在内联槽位，平面格式音频超过 8 声道时其余平面进入 `extended`；
///   平面总是从索引 0 起连续填充；
/// - 边数据、量化参数表各自持有独立的 [`BufferRef`]，与平面遵循相同的共享规则；
/// - 格式与几何尺寸决定 [`Frame::get_buffer`] 的平面布局，帧持有缓冲期间不可修改。
///
/// # 契约说明（What）
/// - 状态：`Empty`（无平面、无边数据）→ `Populated`（`get_buffer` / `attach_plane` / `ref_from`）→
///   `Empty`（`unref`）；
/// - 所有复合操作要么完整生效，要么失败且帧保持调用前的状态；
/// - `Clone` 即帧级共享：得到的新帧与原帧共享全部缓冲。
#[derive(Clone, Debug, Default)]
pub struct Frame {
    planes: [Option<Plane>; INLINE_PLANES],
    extended: Vec<Plane>,
    format: MediaFormat,
    width: usize,
    height: usize,
    channels: usize,
    nb_samples: usize,
    side_data: Vec<SideData>,
    qp_table: Option<QpTable>,
    /// 时间戳、图像类型、色彩描述等标量属性。
    pub props: FrameProps,
    /// 帧级键值元数据。
    pub metadata: Metadata,
}

impl Frame {
    /// 空帧。
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置好视频格式与尺寸的空帧。
    pub fn video(format: PixelFormat, width: usize, height: usize) -> Self {
        Self {
            format: MediaFormat::Video(format),
            width,
            height,
            ..Self::default()
        }
    }

    /// 设置好音频格式、声道数与采样数的空帧。
    pub fn audio(format: SampleFormat, channels: usize, nb_samples: usize) -> Self {
        Self {
            format: MediaFormat::Audio(format),
            channels,
            nb_samples,
            ..Self::default()
        }
    }

    /// 帧的媒体格式；空帧为 [`MediaFormat::None`]。
    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// 图像宽度（像素），音频帧为 0。
    pub fn width(&self) -> usize {
        self.width
    }

    /// 图像高度（行），音频帧为 0。
    pub fn height(&self) -> usize {
        self.height
    }

    /// 声道数，视频帧为 0。
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// 每声道采样数，视频帧为 0。
    pub fn nb_samples(&self) -> usize {
        self.nb_samples
    }

    /// 修改视频格式与尺寸。帧已持有平面时返回 `InvalidState`。
    pub fn set_video(&mut self, format: PixelFormat, width: usize, height: usize) -> Result<()> {
        self.ensure_no_planes("cannot change video geometry of a frame holding planes")?;
        self.format = MediaFormat::Video(format);
        self.width = width;
        self.height = height;
        self.channels = 0;
        self.nb_samples = 0;
        Ok(())
    }

    /// 修改音频格式、声道数与采样数。帧已持有平面时返回 `InvalidState`。
    pub fn set_audio(
        &mut self,
        format: SampleFormat,
        channels: usize,
        nb_samples: usize,
    ) -> Result<()> {
        self.ensure_no_planes("cannot change audio layout of a frame holding planes")?;
        self.format = MediaFormat::Audio(format);
        self.width = 0;
        self.height = 0;
        self.channels = channels;
        self.nb_samples = nb_samples;
        Ok(())
    }

    fn ensure_no_planes(&self, message: &'static str) -> Result<()> {
        if self.nb_planes() > 0 {
            return Err(MediaError::invalid_state(message));
        }
        Ok(())
    }

    /// 帧不持有任何缓冲（平面、边数据、量化参数表）。
    pub fn is_empty(&self) -> bool {
        self.nb_planes() == 0 && self.side_data.is_empty() && self.qp_table.is_none()
    }

    /// 平面数量（内联与扩展之和）。
    pub fn nb_planes(&self) -> usize {
        self.planes.iter().take_while(|slot| slot.is_some()).count() + self.extended.len()
    }

    /// 第 `index` 个平面；`index >= 8` 时落在扩展列表中。
    pub fn plane(&self, index: usize) -> Option<&Plane> {
        if index < INLINE_PLANES {
            self.planes[index].as_ref()
        } else {
            self.extended.get(index - INLINE_PLANES)
        }
    }

    /// 第 `index` 个平面的可变引用，供替换缓冲或调整行跨度。
    pub fn plane_mut(&mut self, index: usize) -> Option<&mut Plane> {
        if index < INLINE_PLANES {
            self.planes[index].as_mut()
        } else {
            self.extended.get_mut(index - INLINE_PLANES)
        }
    }

    /// 按索引顺序遍历全部平面。
    pub fn planes(&self) -> impl Iterator<Item = &Plane> + '_ {
        self.planes
            .iter()
            .map_while(Option::as_ref)
            .chain(self.extended.iter())
    }

    /// 超出内联槽位的平面。
    pub fn extended_planes(&self) -> &[Plane] {
        &self.extended
    }

    /// 第 `index` 个平面的只读字节。
    pub fn plane_data(&self, index: usize) -> Option<&[u8]> {
        self.plane(index).map(Plane::data)
    }

    /// 平面独占时返回可写视图；共享或不存在时返回 `None`。
    pub fn plane_data_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.plane_mut(index).and_then(Plane::data_mut)
    }

    /// 第 `index` 个平面的行跨度。
    pub fn linesize(&self, index: usize) -> Option<usize> {
        self.plane(index).map(Plane::linesize)
    }

    /// 第 `index` 个平面背后的缓冲。
    pub fn plane_buffer(&self, index: usize) -> Option<&BufferRef> {
        self.plane(index).map(Plane::buffer)
    }

    fn push_plane(&mut self, plane: Plane) -> usize {
        let index = self.nb_planes();
        if index < INLINE_PLANES {
            self.planes[index] = Some(plane);
        } else {
            self.extended.push(plane);
        }
        index
    }

    /// 直接包装调用方提供的缓冲作为下一个平面，返回平面索引。
    pub fn attach_plane(&mut self, buf: BufferRef, linesize: usize) -> Result<usize> {
        if linesize == 0 && !buf.is_empty() {
            return Err(MediaError::invalid_argument(
                "linesize must be non-zero for a non-empty plane",
            ));
        }
        Ok(self.push_plane(Plane { buf, linesize }))
    }

    fn layout(&self, align: usize) -> Result<Vec<PlaneLayout>> {
        match self.format {
            MediaFormat::None => Err(MediaError::invalid_state("frame format is not set")),
            MediaFormat::Video(format) => video_layout(format, self.width, self.height, align),
            MediaFormat::Audio(format) => {
                audio_layout(format, self.channels, self.nb_samples, align)
            }
        }
    }

    /// 按格式与几何尺寸从堆上分配全部平面。`align == 0` 使用进程默认对齐。
    pub fn get_buffer(&mut self, align: usize) -> Result<()> {
        self.get_buffer_with(align, &HeapAllocator)
    }

    /// 通过 `allocator` 分配全部平面。
    ///
    /// # 契约说明（What）
    /// - 帧已持有平面或未设置格式时返回 `InvalidState`，几何尺寸为零时返回 `InvalidArgument`；
    /// - 任一平面分配失败时，已取得的平面全部释放，帧不持有任何平面；
    /// - 每个平面的可见长度截断为布局大小。
    pub fn get_buffer_with(&mut self, align: usize, allocator: &dyn PlaneAllocator) -> Result<()> {
        self.ensure_no_planes("frame already holds plane buffers")?;
        let layouts = self.layout(align)?;

        let mut acquired = Vec::with_capacity(layouts.len());
        for (index, layout) in layouts.iter().enumerate() {
            let mut buf = allocator.allocate(index, layout.size)?;
            if buf.len() < layout.size || !buf.is_writable() {
                warn!(
                    plane = index,
                    requested = layout.size,
                    actual = buf.len(),
                    refs = buf.ref_count(),
                    "plane allocator returned an unusable buffer"
                );
                return Err(MediaError::invalid_state(
                    "plane allocator returned a shared or short buffer",
                ));
            }
            buf.truncate(layout.size);
            acquired.push(Plane {
                buf,
                linesize: layout.linesize,
            });
        }

        let planes = acquired.len();
        for plane in acquired {
            self.push_plane(plane);
        }
        debug!(
            format = ?self.format,
            planes,
            bytes = layouts.iter().map(|layout| layout.size).sum::<usize>(),
            "frame buffers allocated"
        );
        Ok(())
    }

    /// 让本帧共享 `src` 的全部平面、边数据、量化参数表、属性与元数据。
    ///
    /// 本帧必须为空，否则返回 `InvalidState` 且不做任何修改。
    pub fn ref_from(&mut self, src: &Frame) -> Result<()> {
        if !self.is_empty() {
            return Err(MediaError::invalid_state(
                "destination frame must be empty before frame_ref",
            ));
        }
        *self = src.clone();
        Ok(())
    }

    /// 释放全部缓冲并恢复默认属性，帧可以继续复用。对空帧调用无副作用。
    pub fn unref(&mut self) {
        let released = self.nb_planes();
        for slot in &mut self.planes {
            *slot = None;
        }
        self.extended.clear();
        self.side_data.clear();
        self.qp_table = None;
        self.props = FrameProps::default();
        self.metadata.clear();
        self.format = MediaFormat::None;
        self.width = 0;
        self.height = 0;
        self.channels = 0;
        self.nb_samples = 0;
        if released > 0 {
            trace!(planes = released, "frame unreferenced");
        }
    }

    /// 把 `src` 的全部内容移入本帧，`src` 变为空帧。本帧必须为空。
    pub fn move_ref(&mut self, src: &mut Frame) -> Result<()> {
        if !self.is_empty() {
            return Err(MediaError::invalid_state(
                "destination frame must be empty before move_ref",
            ));
        }
        *self = std::mem::take(src);
        Ok(())
    }

    /// 至少持有一个平面且全部平面都独占可写。
    pub fn is_writable(&self) -> bool {
        self.nb_planes() > 0 && self.planes().all(Plane::is_writable)
    }

    /// 帧级写时复制：每个被共享的平面替换为独占的深拷贝，已独占的平面保持不变。
    ///
    /// 复制先写入临时列表，全部成功后才替换，任一复制失败时帧保持原状。
    pub fn make_writable(&mut self) -> Result<()> {
        if self.nb_planes() == 0 {
            return Err(MediaError::invalid_state("frame holds no plane buffers"));
        }
        let mut replacements = Vec::new();
        for (index, plane) in self.planes().enumerate() {
            if !plane.is_writable() {
                let mut copy = plane.buf.clone();
                copy.make_writable()?;
                replacements.push((index, copy));
            }
        }
        if replacements.is_empty() {
            return Ok(());
        }
        debug!(
            copied = replacements.len(),
            planes = self.nb_planes(),
            "frame planes detached by copy-on-write"
        );
        for (index, buf) in replacements {
            if let Some(plane) = self.plane_mut(index) {
                plane.buf = buf;
            }
        }
        Ok(())
    }

    /// 把 `src` 的平面数据逐行复制到本帧已分配的平面。
    ///
    /// # 前置条件
    /// - 两帧格式相同；视频要求本帧尺寸不小于 `src`，音频要求声道数与采样数相同；
    /// - 本帧全部平面独占可写（否则 `InvalidState`，先调用 [`Frame::make_writable`]）；
    /// - 平面数量一致且每个平面都容纳得下 `src` 的有效行。
    ///
    /// 全部检查在复制之前完成，失败时本帧字节不变。
    pub fn copy_data_from(&mut self, src: &Frame) -> Result<()> {
        if self.format != src.format || self.format == MediaFormat::None {
            return Err(MediaError::invalid_argument(
                "frames must share the same, non-empty format",
            ));
        }
        match self.format {
            MediaFormat::Video(_) if self.width < src.width || self.height < src.height => {
                return Err(MediaError::invalid_argument(format!(
                    "destination {}x{} is smaller than source {}x{}",
                    self.width, self.height, src.width, src.height
                )));
            }
            MediaFormat::Audio(_)
                if self.channels != src.channels || self.nb_samples != src.nb_samples =>
            {
                return Err(MediaError::invalid_argument(
                    "audio frames must have identical channel and sample counts",
                ));
            }
            _ => {}
        }
        let extents = src.layout(1)?;
        if self.nb_planes() != extents.len() || src.nb_planes() != extents.len() {
            return Err(MediaError::invalid_argument(
                "plane count does not match the frame format",
            ));
        }
        if !self.is_writable() {
            return Err(MediaError::invalid_state(
                "destination frame has shared planes",
            ));
        }
        for (index, extent) in extents.iter().enumerate() {
            let (Some(dst), Some(from)) = (self.plane(index), src.plane(index)) else {
                return Err(MediaError::invalid_argument("missing plane"));
            };
            if !fits(dst, extent) || !fits(from, extent) {
                return Err(MediaError::invalid_argument(format!(
                    "plane {index} is too small for {} rows of {} bytes",
                    extent.rows, extent.row_bytes
                )));
            }
        }

        for (index, extent) in extents.iter().enumerate() {
            let (Some(from), Some(dst)) = (src.plane(index), self.plane_mut(index)) else {
                continue;
            };
            let (src_stride, dst_stride) = (from.linesize, dst.linesize);
            let Some(target) = dst.buf.data_mut() else {
                continue;
            };
            copy_rows(target, dst_stride, from.data(), src_stride, extent);
        }
        Ok(())
    }

    /// 复制标量属性、元数据、边数据（深拷贝）与量化参数表（共享）。不改变平面与几何尺寸。
    ///
    /// 本帧原有的边数据被替换；边数据复制失败时本帧保持原状。
    pub fn copy_props_from(&mut self, src: &Frame) -> Result<()> {
        let side_data = src
            .side_data
            .iter()
            .map(SideData::deep_copy)
            .collect::<Result<Vec<_>>>()?;
        self.props = src.props.clone();
        self.metadata = src.metadata.clone();
        self.side_data = side_data;
        self.qp_table = src.qp_table.clone();
        Ok(())
    }

    /// 分配 `size` 字节（清零）的新边数据并追加到帧上。
    pub fn new_side_data(&mut self, kind: SideDataType, size: usize) -> Result<&mut SideData> {
        let buf = BufferRef::alloc(size)?;
        Ok(self.add_side_data(kind, buf))
    }

    /// 以已有缓冲作为新边数据追加到帧上（零拷贝）。
    pub fn add_side_data(&mut self, kind: SideDataType, buf: BufferRef) -> &mut SideData {
        let index = self.side_data.len();
        self.side_data.push(SideData::new(kind, buf));
        &mut self.side_data[index]
    }

    /// 第一条种类为 `kind` 的边数据。
    pub fn side_data(&self, kind: SideDataType) -> Option<&SideData> {
        self.side_data.iter().find(|entry| entry.kind() == kind)
    }

    /// 按种类查找第一条边数据的可变引用，写入前需先 [`SideData::make_writable`]。
    pub fn side_data_mut(&mut self, kind: SideDataType) -> Option<&mut SideData> {
        self.side_data.iter_mut().find(|entry| entry.kind() == kind)
    }

    /// 移除全部种类为 `kind` 的边数据，返回移除的条数。
    pub fn remove_side_data(&mut self, kind: SideDataType) -> usize {
        let before = self.side_data.len();
        self.side_data.retain(|entry| entry.kind() != kind);
        before - self.side_data.len()
    }

    /// 按添加顺序遍历全部边数据。
    pub fn side_data_iter(&self) -> impl Iterator<Item = &SideData> + '_ {
        self.side_data.iter()
    }

    /// 挂载量化参数表，替换（并释放）原有的表。
    pub fn set_qp_table(&mut self, buf: BufferRef, stride: usize, kind: QpTableKind) {
        self.qp_table = Some(QpTable::new(buf, stride, kind));
    }

    /// 附加的量化参数表。
    pub fn qp_table(&self) -> Option<&QpTable> {
        self.qp_table.as_ref()
    }

    /// 取走量化参数表，帧不再持有它。
    pub fn take_qp_table(&mut self) -> Option<QpTable> {
        self.qp_table.take()
    }
}

fn fits(plane: &Plane, extent: &PlaneLayout) -> bool {
    if extent.rows == 0 {
        return true;
    }
    if extent.rows > 1 && plane.linesize < extent.row_bytes {
        return false;
    }
    (extent.rows - 1)
        .checked_mul(plane.linesize)
        .and_then(|offset| offset.checked_add(extent.row_bytes))
        .is_some_and(|needed| needed <= plane.buf.len())
}

fn copy_rows(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, extent: &PlaneLayout) {
    for row in 0..extent.rows {
        let to = row * dst_stride;
        let from = row * src_stride;
        dst[to..to + extent.row_bytes].copy_from_slice(&src[from..from + extent.row_bytes]);
    }
}
