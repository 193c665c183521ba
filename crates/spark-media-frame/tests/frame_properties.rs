//! 帧布局与写时复制的属性测试。
//!
//! - 任意格式、尺寸与对齐下，`get_buffer` 产出的平面行跨度满足对齐，且容纳全部有效行；
//! - 任意共享 / 写时复制 / 写入 / 释放序列下，每个帧观察到的字节只由它自己的写入决定。

use proptest::prelude::*;
use spark_media_frame::{Frame, PixelFormat, SampleFormat};

fn pixel_format() -> impl Strategy<Value = PixelFormat> {
    prop_oneof![
        Just(PixelFormat::Gray8),
        Just(PixelFormat::Yuv420p),
        Just(PixelFormat::Yuv422p),
        Just(PixelFormat::Yuv444p),
        Just(PixelFormat::Yuva420p),
        Just(PixelFormat::Nv12),
        Just(PixelFormat::Rgb24),
        Just(PixelFormat::Rgba),
    ]
}

#[derive(Clone, Debug)]
enum Op {
    Share(usize),
    Write(usize, u8),
    Unref(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..6).prop_map(Op::Share),
        (0usize..6, any::<u8>()).prop_map(|(idx, value)| Op::Write(idx, value)),
        (0usize..6).prop_map(Op::Unref),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn video_planes_are_aligned_and_large_enough(
        format in pixel_format(),
        width in 1usize..200,
        height in 1usize..120,
        align_log2 in 0u32..7,
    ) {
        let align = 1usize << align_log2;
        let mut frame = Frame::video(format, width, height);
        prop_assert!(frame.get_buffer(align).is_ok());
        prop_assert_eq!(frame.nb_planes(), format.nb_planes());

        let desc = format.descriptor();
        for (index, component) in desc.planes.iter().enumerate() {
            let plane = frame.plane(index).expect("平面应存在");
            prop_assert_eq!(plane.linesize() % align, 0);
            let (plane_width, rows) = if component.chroma {
                (
                    width.div_ceil(1 << desc.log2_chroma_w),
                    height.div_ceil(1 << desc.log2_chroma_h),
                )
            } else {
                (width, height)
            };
            prop_assert!(plane.linesize() >= plane_width * component.bytes_per_pixel);
            prop_assert!(plane.data().len() >= plane.linesize() * rows);
        }
    }

    #[test]
    fn audio_frames_have_one_plane_per_channel_when_planar(
        planar in any::<bool>(),
        channels in 1usize..16,
        nb_samples in 1usize..2048,
    ) {
        let format = if planar { SampleFormat::S16p } else { SampleFormat::S16 };
        let mut frame = Frame::audio(format, channels, nb_samples);
        prop_assert!(frame.get_buffer(16).is_ok());
        let expected_planes = if planar { channels } else { 1 };
        prop_assert_eq!(frame.nb_planes(), expected_planes);
        prop_assert_eq!(frame.extended_planes().len(), expected_planes.saturating_sub(8));
        let per_plane = nb_samples * 2 * if planar { 1 } else { channels };
        prop_assert!(frame.planes().all(|plane| plane.data().len() >= per_plane));
    }

    #[test]
    fn cow_writes_never_leak_between_frames(ops in prop::collection::vec(op_strategy(), 1..48)) {
        let mut root = Frame::video(PixelFormat::Yuv420p, 16, 8);
        prop_assert!(root.get_buffer(0).is_ok());
        let mut frames = vec![(root, Some(0u8))];

        for op in ops {
            match op {
                Op::Share(idx) => {
                    let idx = idx % frames.len();
                    let mut copy = Frame::new();
                    prop_assert!(copy.ref_from(&frames[idx].0).is_ok());
                    let expected = frames[idx].1;
                    frames.push((copy, expected));
                }
                Op::Write(idx, value) => {
                    let idx = idx % frames.len();
                    let (frame, expected) = &mut frames[idx];
                    if expected.is_none() {
                        continue;
                    }
                    prop_assert!(frame.make_writable().is_ok());
                    for index in 0..frame.nb_planes() {
                        let bytes = frame.plane_data_mut(index);
                        prop_assert!(bytes.is_some());
                        if let Some(bytes) = bytes {
                            bytes.fill(value);
                        }
                    }
                    *expected = Some(value);
                }
                Op::Unref(idx) => {
                    let idx = idx % frames.len();
                    frames[idx].0.unref();
                    frames[idx].1 = None;
                }
            }

            for (frame, expected) in &frames {
                match expected {
                    Some(value) => {
                        prop_assert!(frame.planes().all(|plane| plane.data().iter().all(|b| b == value)));
                    }
                    None => prop_assert!(frame.is_empty()),
                }
            }
        }
    }
}
