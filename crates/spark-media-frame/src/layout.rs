//! 平面布局描述：像素 / 采样格式只在这里以“布局”形式出现。
//!
//! # 设计背景（Why）
//! - 帧分配缓冲时必须知道平面数量、每行字节数与行数，这些都由格式与几何尺寸决定；
//! - 本模块不做任何颜色或采样转换，只回答“每个平面多大、行跨度多少”。
//!
//! # 契约说明（What）
//! - 视频平面：`linesize = align_up(plane_width * bpp, align)`，
//!   平面大小 `linesize * align_up(height, 32)（色度平面再按色度缩放）+ PLANE_PADDING`；
//! - 调色板格式额外分配 [`PALETTE_SIZE`] 字节的调色板平面；
//! - 音频平面：平面格式每声道一个平面，打包格式一个平面，
//!   `linesize = align_up(nb_samples * bps * (planar ? 1 : channels), align)`。

use spark_media_buffer::{AllocFailure, MediaError, Result, default_alignment, max_alloc_size};

/// 行跨度的基础对齐（字节），决定平面尾部的额外填充。
pub const STRIDE_ALIGN: usize = 16;

/// 每个视频平面尾部的额外字节，允许向量化读取越过最后一行。
pub const PLANE_PADDING: usize = 16 + STRIDE_ALIGN - 1;

/// 调色板平面大小：256 个 32 位颜色。
pub const PALETTE_SIZE: usize = 1024;

/// 帧内联平面槽位数，超出部分进入扩展列表。
pub const INLINE_PLANES: usize = 8;

const HEIGHT_ALIGN: usize = 32;

/// 帧承载的媒体格式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    /// 尚未设置格式（空帧）。
    #[default]
    None,
    /// 视频帧及其像素格式。
    Video(PixelFormat),
    /// 音频帧及其采样格式。
    Audio(SampleFormat),
}

impl MediaFormat {
    /// 是否为视频格式。
    pub fn is_video(self) -> bool {
        matches!(self, MediaFormat::Video(_))
    }

    /// 是否为音频格式。
    pub fn is_audio(self) -> bool {
        matches!(self, MediaFormat::Audio(_))
    }
}

/// 支持的像素格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8 位灰度，单平面。
    Gray8,
    /// 平面 YUV 4:2:0。
    Yuv420p,
    /// 平面 YUV 4:2:2。
    Yuv422p,
    /// 平面 YUV 4:4:4。
    Yuv444p,
    /// 平面 YUV 4:2:0 加全分辨率透明度平面。
    Yuva420p,
    /// 亮度平面加 UV 交错的半平面 4:2:0。
    Nv12,
    /// 打包 RGB，每像素 3 字节。
    Rgb24,
    /// 打包 RGBA，每像素 4 字节。
    Rgba,
    /// 8 位调色板索引，附 1024 字节调色板平面。
    Pal8,
}

/// 单个图像平面的描述。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneComponent {
    /// 每个像素在该平面占用的字节数。
    pub bytes_per_pixel: usize,
    /// 该平面是否按色度缩放。
    pub chroma: bool,
}

/// 像素格式的布局描述符。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelDescriptor {
    /// 格式名称。
    pub name: &'static str,
    /// 逐平面的像素描述。
    pub planes: &'static [PlaneComponent],
    /// 色度平面宽度相对亮度的右移位数。
    pub log2_chroma_w: u32,
    /// 色度平面高度相对亮度的右移位数。
    pub log2_chroma_h: u32,
    /// 是否附带 1024 字节调色板平面。
    pub has_palette: bool,
}

const fn luma(bytes_per_pixel: usize) -> PlaneComponent {
    PlaneComponent {
        bytes_per_pixel,
        chroma: false,
    }
}

const fn chroma(bytes_per_pixel: usize) -> PlaneComponent {
    PlaneComponent {
        bytes_per_pixel,
        chroma: true,
    }
}

impl PixelFormat {
    /// 布局描述符。
    pub const fn descriptor(self) -> PixelDescriptor {
        const PACKED_1: &[PlaneComponent] = &[luma(1)];
        const PACKED_3: &[PlaneComponent] = &[luma(3)];
        const PACKED_4: &[PlaneComponent] = &[luma(4)];
        const PLANAR_YUV: &[PlaneComponent] = &[luma(1), chroma(1), chroma(1)];
        const PLANAR_YUVA: &[PlaneComponent] = &[luma(1), chroma(1), chroma(1), luma(1)];
        const SEMI_PLANAR: &[PlaneComponent] = &[luma(1), chroma(2)];
        match self {
            PixelFormat::Gray8 => PixelDescriptor {
                name: "gray",
                planes: PACKED_1,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                has_palette: false,
            },
            PixelFormat::Yuv420p => PixelDescriptor {
                name: "yuv420p",
                planes: PLANAR_YUV,
                log2_chroma_w: 1,
                log2_chroma_h: 1,
                has_palette: false,
            },
            PixelFormat::Yuv422p => PixelDescriptor {
                name: "yuv422p",
                planes: PLANAR_YUV,
                log2_chroma_w: 1,
                log2_chroma_h: 0,
                has_palette: false,
            },
            PixelFormat::Yuv444p => PixelDescriptor {
                name: "yuv444p",
                planes: PLANAR_YUV,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                has_palette: false,
            },
            PixelFormat::Yuva420p => PixelDescriptor {
                name: "yuva420p",
                planes: PLANAR_YUVA,
                log2_chroma_w: 1,
                log2_chroma_h: 1,
                has_palette: false,
            },
            PixelFormat::Nv12 => PixelDescriptor {
                name: "nv12",
                planes: SEMI_PLANAR,
                log2_chroma_w: 1,
                log2_chroma_h: 1,
                has_palette: false,
            },
            PixelFormat::Rgb24 => PixelDescriptor {
                name: "rgb24",
                planes: PACKED_3,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                has_palette: false,
            },
            PixelFormat::Rgba => PixelDescriptor {
                name: "rgba",
                planes: PACKED_4,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                has_palette: false,
            },
            PixelFormat::Pal8 => PixelDescriptor {
                name: "pal8",
                planes: PACKED_1,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                has_palette: true,
            },
        }
    }

    /// 平面数量（含调色板平面）。
    pub const fn nb_planes(self) -> usize {
        let desc = self.descriptor();
        desc.planes.len() + if desc.has_palette { 1 } else { 0 }
    }

    /// 像素格式的常用名称（与 FFmpeg 命名一致）。
    pub const fn name(self) -> &'static str {
        self.descriptor().name
    }
}

/// 支持的采样格式，`*p` 为平面（每声道一个平面）变体。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 无符号 8 位，交错。
    U8,
    /// 有符号 16 位，交错。
    S16,
    /// 有符号 32 位，交错。
    S32,
    /// 32 位浮点，交错。
    Flt,
    /// 64 位浮点，交错。
    Dbl,
    /// 无符号 8 位，每声道一个平面。
    U8p,
    /// 有符号 16 位，每声道一个平面。
    S16p,
    /// 有符号 32 位，每声道一个平面。
    S32p,
    /// 32 位浮点，每声道一个平面。
    Fltp,
    /// 64 位浮点，每声道一个平面。
    Dblp,
}

impl SampleFormat {
    /// 每个采样的字节数。
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8p => 1,
            SampleFormat::S16 | SampleFormat::S16p => 2,
            SampleFormat::S32 | SampleFormat::S32p | SampleFormat::Flt | SampleFormat::Fltp => 4,
            SampleFormat::Dbl | SampleFormat::Dblp => 8,
        }
    }

    /// 每个声道是否独占一个平面。
    pub const fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::U8p
                | SampleFormat::S16p
                | SampleFormat::S32p
                | SampleFormat::Fltp
                | SampleFormat::Dblp
        )
    }

    /// 对应的打包格式。
    pub const fn packed(self) -> SampleFormat {
        match self {
            SampleFormat::U8p => SampleFormat::U8,
            SampleFormat::S16p => SampleFormat::S16,
            SampleFormat::S32p => SampleFormat::S32,
            SampleFormat::Fltp => SampleFormat::Flt,
            SampleFormat::Dblp => SampleFormat::Dbl,
            other => other,
        }
    }

    /// 对应的平面格式。
    pub const fn planar(self) -> SampleFormat {
        match self {
            SampleFormat::U8 => SampleFormat::U8p,
            SampleFormat::S16 => SampleFormat::S16p,
            SampleFormat::S32 => SampleFormat::S32p,
            SampleFormat::Flt => SampleFormat::Fltp,
            SampleFormat::Dbl => SampleFormat::Dblp,
            other => other,
        }
    }

    /// 采样格式的常用名称（与 FFmpeg 命名一致）。
    pub const fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::Flt => "flt",
            SampleFormat::Dbl => "dbl",
            SampleFormat::U8p => "u8p",
            SampleFormat::S16p => "s16p",
            SampleFormat::S32p => "s32p",
            SampleFormat::Fltp => "fltp",
            SampleFormat::Dblp => "dblp",
        }
    }
}

/// 单个平面的分配与复制参数。
///
/// - `size`：需要分配的字节数（含填充）；
/// - `linesize`：行跨度；
/// - `rows` / `row_bytes`：有效数据的行数与每行有效字节数，复制帧数据时使用。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneLayout {
    /// 需要分配的字节数（含填充）。
    pub size: usize,
    /// 行跨度。
    pub linesize: usize,
    /// 有效数据的行数。
    pub rows: usize,
    /// 每行有效字节数。
    pub row_bytes: usize,
}

/// 把 `value` 向上对齐到 `align`（2 的幂）。
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value
        .checked_add(align - 1)
        .map(|padded| padded & !(align - 1))
}

/// `align == 0` 取进程默认对齐；其余值必须是 2 的幂。
pub fn resolve_alignment(align: usize) -> Result<usize> {
    let align = if align == 0 { default_alignment() } else { align };
    if !align.is_power_of_two() {
        return Err(MediaError::invalid_argument(format!(
            "plane alignment must be a power of two, got {align}"
        )));
    }
    Ok(align)
}

fn ceil_rshift(value: usize, shift: u32) -> usize {
    value.div_ceil(1 << shift)
}

fn overflow() -> MediaError {
    MediaError::allocation(
        usize::MAX,
        AllocFailure::ExceedsLimit {
            limit: max_alloc_size(),
        },
    )
}

fn mul(a: usize, b: usize) -> Result<usize> {
    a.checked_mul(b).ok_or_else(overflow)
}

fn add(a: usize, b: usize) -> Result<usize> {
    a.checked_add(b).ok_or_else(overflow)
}

fn aligned(value: usize, align: usize) -> Result<usize> {
    align_up(value, align).ok_or_else(overflow)
}

fn video_linesizes(desc: &PixelDescriptor, width: usize, align: usize) -> Result<Vec<usize>> {
    let fill = |padded_width: usize| -> Result<Vec<usize>> {
        desc.planes
            .iter()
            .map(|plane| {
                let plane_width = if plane.chroma {
                    ceil_rshift(padded_width, desc.log2_chroma_w)
                } else {
                    padded_width
                };
                mul(plane_width, plane.bytes_per_pixel)
            })
            .collect()
    };

    // 逐步放大宽度对齐，直到首平面行跨度天然满足 `align`，让色度平面随之对齐。
    let mut step = 1;
    let mut linesizes = fill(aligned(width, step)?)?;
    while linesizes[0] % align != 0 && step < align {
        step *= 2;
        linesizes = fill(aligned(width, step)?)?;
    }
    linesizes
        .into_iter()
        .map(|linesize| aligned(linesize, align))
        .collect()
}

/// 视频帧的平面布局。
pub fn video_layout(
    format: PixelFormat,
    width: usize,
    height: usize,
    align: usize,
) -> Result<Vec<PlaneLayout>> {
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_argument(format!(
            "video geometry must be non-zero, got {width}x{height}"
        )));
    }
    let align = resolve_alignment(align)?;
    let desc = format.descriptor();
    let linesizes = video_linesizes(&desc, width, align)?;
    let padded_height = aligned(height, HEIGHT_ALIGN)?;

    let mut layouts = Vec::with_capacity(format.nb_planes());
    for (plane, linesize) in desc.planes.iter().zip(linesizes) {
        let (alloc_rows, rows, plane_width) = if plane.chroma {
            (
                ceil_rshift(padded_height, desc.log2_chroma_h),
                ceil_rshift(height, desc.log2_chroma_h),
                ceil_rshift(width, desc.log2_chroma_w),
            )
        } else {
            (padded_height, height, width)
        };
        layouts.push(PlaneLayout {
            size: add(mul(linesize, alloc_rows)?, PLANE_PADDING)?,
            linesize,
            rows,
            row_bytes: mul(plane_width, plane.bytes_per_pixel)?,
        });
    }
    if desc.has_palette {
        layouts.push(PlaneLayout {
            size: PALETTE_SIZE,
            linesize: 4,
            rows: PALETTE_SIZE / 4,
            row_bytes: 4,
        });
    }
    Ok(layouts)
}

/// 音频帧的平面布局。平面格式每声道一个平面，各平面参数相同。
pub fn audio_layout(
    format: SampleFormat,
    channels: usize,
    nb_samples: usize,
    align: usize,
) -> Result<Vec<PlaneLayout>> {
    if channels == 0 || nb_samples == 0 {
        return Err(MediaError::invalid_argument(format!(
            "audio geometry must be non-zero, got {channels} channels x {nb_samples} samples"
        )));
    }
    let align = resolve_alignment(align)?;
    let interleaved = if format.is_planar() { 1 } else { channels };
    let row_bytes = mul(mul(nb_samples, format.bytes_per_sample())?, interleaved)?;
    let linesize = aligned(row_bytes, align)?;
    let planes = if format.is_planar() { channels } else { 1 };
    Ok(vec![
        PlaneLayout {
            size: linesize,
            linesize,
            rows: 1,
            row_bytes,
        };
        planes
    ])
}
