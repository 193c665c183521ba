//! 帧的标量属性：时间戳、图像类型、色彩描述等。
//!
//! 这些字段不影响平面布局，`Frame::copy_props_from` 与 `Frame::ref_from` 整体复制，
//! `Frame::unref` 恢复为默认值。

/// 有理数（采样宽高比等）。`den == 0` 表示未知。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子。
    pub num: i32,
    /// 分母。
    pub den: i32,
}

impl Rational {
    /// 按原样保存分子与分母，不做约分。
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }
}

/// 图像类型。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PictureType {
    /// 未定义。
    #[default]
    None,
    /// 帧内编码。
    I,
    /// 前向预测。
    P,
    /// 双向预测。
    B,
    /// S(GMC)-VOP。
    S,
    /// 切换帧内。
    Si,
    /// 切换预测。
    Sp,
    /// BI 类型。
    Bi,
}

impl PictureType {
    /// 单字符表示，未知类型为 `'?'`。
    pub const fn as_char(self) -> char {
        match self {
            PictureType::None => '?',
            PictureType::I => 'I',
            PictureType::P => 'P',
            PictureType::B => 'B',
            PictureType::S => 'S',
            PictureType::Si => 'i',
            PictureType::Sp => 'p',
            PictureType::Bi => 'b',
        }
    }
}

/// 像素取值范围。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorRange {
    /// 未指定。
    #[default]
    Unspecified,
    /// 有限范围（MPEG，亮度 16..235）。
    Limited,
    /// 全范围（JPEG，0..255）。
    Full,
}

/// 色域原色（ISO/IEC 23001-8 编号体系）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorPrimaries {
    /// ITU-R BT.709，亦即 sRGB 原色。
    Bt709,
    /// 未指定。
    #[default]
    Unspecified,
    /// FCC Title 47（NTSC 1953）。
    Bt470M,
    /// ITU-R BT.470 System B/G，PAL/SECAM。
    Bt470Bg,
    /// SMPTE 170M，NTSC 525 行。
    Smpte170M,
    /// SMPTE 240M。
    Smpte240M,
    /// 通用胶片（C 光源）。
    Film,
    /// ITU-R BT.2020 广色域。
    Bt2020,
}

/// 传递特性（光电转换曲线）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorTransfer {
    /// ITU-R BT.709。
    Bt709,
    /// 未指定。
    #[default]
    Unspecified,
    /// gamma 2.2（BT.470 System M）。
    Gamma22,
    /// gamma 2.8（BT.470 System B/G）。
    Gamma28,
    /// SMPTE 170M，与 BT.601 相同。
    Smpte170M,
    /// SMPTE 240M。
    Smpte240M,
    /// 线性传递。
    Linear,
    /// 对数传递，动态范围 100:1。
    Log,
    /// 对数传递，动态范围 100*sqrt(10):1。
    LogSqrt,
    /// IEC 61966-2-4（xvYCC）。
    Iec61966_2_4,
    /// ITU-R BT.1361 扩展色域。
    Bt1361Ecg,
    /// IEC 61966-2-1（sRGB / sYCC）。
    Iec61966_2_1,
    /// BT.2020 10 位系统。
    Bt2020_10,
    /// BT.2020 12 位系统。
    Bt2020_12,
}

/// YUV 与 RGB 之间的转换矩阵。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// 恒等矩阵，即 GBR 平面。
    Rgb,
    /// ITU-R BT.709。
    Bt709,
    /// 未指定。
    #[default]
    Unspecified,
    /// FCC Title 47。
    Fcc,
    /// BT.470 System B/G，与 BT.601 625 行相同。
    Bt470Bg,
    /// SMPTE 170M，与 BT.601 525 行相同。
    Smpte170M,
    /// SMPTE 240M。
    Smpte240M,
    /// YCgCo 变换（ITU-T SG16）。
    YCgCo,
    /// BT.2020 非恒定亮度。
    Bt2020Ncl,
    /// BT.2020 恒定亮度。
    Bt2020Cl,
}

impl ColorSpace {
    /// 色彩空间的常用名称；未指定时返回 `None`。
    pub const fn name(self) -> Option<&'static str> {
        match self {
            ColorSpace::Rgb => Some("GBR"),
            ColorSpace::Bt709 => Some("bt709"),
            ColorSpace::Unspecified => None,
            ColorSpace::Fcc => Some("fcc"),
            ColorSpace::Bt470Bg => Some("bt470bg"),
            ColorSpace::Smpte170M => Some("smpte170m"),
            ColorSpace::Smpte240M => Some("smpte240m"),
            ColorSpace::YCgCo => Some("YCgCo"),
            ColorSpace::Bt2020Ncl => Some("bt2020nc"),
            ColorSpace::Bt2020Cl => Some("bt2020c"),
        }
    }
}

/// 色度样本相对亮度样本的位置。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChromaLocation {
    /// 未指定。
    #[default]
    Unspecified,
    /// MPEG-2/4 4:2:0、H.264 默认的左侧位置。
    Left,
    /// MPEG-1 4:2:0、JPEG 的中心位置。
    Center,
    /// ITU-R 601 / SMPTE 274M 4:2:0 的左上位置。
    TopLeft,
    /// 顶部。
    Top,
    /// 左下。
    BottomLeft,
    /// 底部。
    Bottom,
}

/// 帧标志位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// 帧数据可能损坏（解码出错后仍输出）。
    pub const CORRUPT: FrameFlags = FrameFlags(1);

    /// 空标志集合。
    pub const fn empty() -> Self {
        FrameFlags(0)
    }

    /// 是否包含 `other` 的全部位。
    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// 置位。
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }

    /// 清位。
    pub fn remove(&mut self, other: FrameFlags) {
        self.0 &= !other.0;
    }
}

/// 解码错误标志位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DecodeErrorFlags(u32);

impl DecodeErrorFlags {
    /// 码流数据无效。
    pub const INVALID_BITSTREAM: DecodeErrorFlags = DecodeErrorFlags(1);
    /// 缺失参考帧。
    pub const MISSING_REFERENCE: DecodeErrorFlags = DecodeErrorFlags(2);

    /// 空标志集合。
    pub const fn empty() -> Self {
        DecodeErrorFlags(0)
    }

    /// 原始位值。
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// 是否包含 `other` 的全部位。
    pub const fn contains(self, other: DecodeErrorFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// 按位合并。
    pub const fn union(self, other: DecodeErrorFlags) -> Self {
        DecodeErrorFlags(self.0 | other.0)
    }
}

/// 帧的标量属性。时间戳以 `None` 表示“未设置”。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameProps {
    /// 呈现时间戳，以所在流的时间基为单位。
    pub pts: Option<i64>,
    /// 产生该帧的数据包的 pts。
    pub pkt_pts: Option<i64>,
    /// 产生该帧的数据包的 dts。
    pub pkt_dts: Option<i64>,
    /// 综合 pts/dts 推断出的时间戳。
    pub best_effort_timestamp: Option<i64>,
    /// 数据包在输入文件中的字节偏移。
    pub pkt_pos: Option<i64>,
    /// 数据包时长，0 表示未知。
    pub pkt_duration: i64,
    /// 数据包字节数。
    pub pkt_size: Option<usize>,
    /// 是否为关键帧。
    pub key_frame: bool,
    /// 图像类型。
    pub pict_type: PictureType,
    /// 采样宽高比。
    pub sample_aspect_ratio: Rational,
    /// 码流顺序中的图像序号。
    pub coded_picture_number: u32,
    /// 显示顺序中的图像序号。
    pub display_picture_number: u32,
    /// 编码质量，1（好）到 FF_LAMBDA_MAX（差）。
    pub quality: i32,
    /// 解码后需要额外显示的半帧数。
    pub repeat_pict: i32,
    /// 是否为隔行图像。
    pub interlaced_frame: bool,
    /// 隔行图像是否顶场优先。
    pub top_field_first: bool,
    /// 调色板相对上一帧是否变化。
    pub palette_has_changed: bool,
    /// 调用方随数据包传入、随帧原样带出的值。
    pub reordered_opaque: i64,
    /// 音频采样率。
    pub sample_rate: u32,
    /// 音频声道布局位掩码。
    pub channel_layout: u64,
    /// 帧标志。
    pub flags: FrameFlags,
    /// 解码过程中遇到的错误。
    pub decode_error_flags: DecodeErrorFlags,
    /// 取值范围。
    pub color_range: ColorRange,
    /// 色域原色。
    pub color_primaries: ColorPrimaries,
    /// 传递特性。
    pub color_trc: ColorTransfer,
    /// YUV 矩阵。
    pub colorspace: ColorSpace,
    /// 色度采样位置。
    pub chroma_location: ChromaLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unspecified() {
        let props = FrameProps::default();
        assert_eq!(props.pts, None);
        assert_eq!(props.pict_type.as_char(), '?');
        assert_eq!(props.colorspace.name(), None);
        assert_eq!(props.color_primaries, ColorPrimaries::Unspecified);
        assert!(!props.flags.contains(FrameFlags::CORRUPT));
    }

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = FrameFlags::empty();
        flags.insert(FrameFlags::CORRUPT);
        assert!(flags.contains(FrameFlags::CORRUPT));
        flags.remove(FrameFlags::CORRUPT);
        assert_eq!(flags, FrameFlags::empty());

        let errors = DecodeErrorFlags::INVALID_BITSTREAM.union(DecodeErrorFlags::MISSING_REFERENCE);
        assert_eq!(errors.bits(), 3);
    }
}
