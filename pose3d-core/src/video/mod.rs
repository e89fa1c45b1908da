//! video — frame sources
//!
//! Stills are decoded with `image`; videos go through FFmpeg and are handed
//! to a per-frame callback in decode order as packed RGB24 frames.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, frame, media, software::scaling};
use image::RgbImage;
use std::path::Path;
use tracing::{debug, info};

/// Scaling flags for the decoded-frame → RGB24 conversion.
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;

/// A single frame in packed RGB24, row-major.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    pub fn from_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }

    /// A uniformly coloured frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Self {
            data,
            width,
            height,
        }
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .context("frame buffer does not match its dimensions")
    }

    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }
}

/// Decode a still image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbFrame> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("failed to open image: {}", path.display()))?
        .into_rgb8();
    Ok(RgbFrame::from_image(img))
}

/// Decode every video frame of `input_path` in order and pass it to
/// `frame_fn`. The first error returned by `frame_fn` aborts decoding.
///
/// Returns the number of frames delivered.
pub fn decode_frames<P, F>(input_path: P, mut frame_fn: F) -> Result<u64>
where
    P: AsRef<Path>,
    F: FnMut(RgbFrame) -> Result<()>,
{
    ffmpeg::init().context("failed to initialise FFmpeg")?;

    let mut ictx = format::input(&input_path).context("could not open input file")?;

    let video_stream_index = ictx
        .streams()
        .best(media::Type::Video)
        .context("no video stream found in input")?
        .index();

    let input_video_stream = ictx
        .stream(video_stream_index)
        .context("video stream disappeared")?;
    let decoder_ctx = codec::context::Context::from_parameters(input_video_stream.parameters())
        .context("failed to build decoder context")?;
    let mut decoder = decoder_ctx
        .decoder()
        .video()
        .context("failed to open video decoder")?;

    let src_width = decoder.width();
    let src_height = decoder.height();
    let src_pixel_fmt = decoder.format();

    info!(
        src_width,
        src_height,
        ?src_pixel_fmt,
        "opened input video stream"
    );

    let mut to_rgb = scaling::Context::get(
        src_pixel_fmt,
        src_width,
        src_height,
        format::Pixel::RGB24,
        src_width,
        src_height,
        SCALE_FLAGS,
    )
    .context("failed to create to-RGB scaler")?;

    let mut decoded_frame = frame::Video::empty();
    let mut rgb_frame = frame::Video::empty();
    let mut frame_count = 0u64;

    let mut drain = |decoder: &mut ffmpeg::decoder::Video, frame_count: &mut u64| -> Result<()> {
        while decoder.receive_frame(&mut decoded_frame).is_ok() {
            to_rgb
                .run(&decoded_frame, &mut rgb_frame)
                .context("to-RGB scaling failed")?;

            frame_fn(RgbFrame {
                data: packed_rows(&rgb_frame, src_width, src_height),
                width: src_width,
                height: src_height,
            })?;

            *frame_count += 1;
            if *frame_count % 100 == 0 {
                debug!(frame_count = *frame_count, "decoded frames");
            }
        }
        Ok(())
    };

    for (stream, packet) in ictx.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .context("decoder send_packet")?;
        drain(&mut decoder, &mut frame_count)?;
    }

    decoder.send_eof().context("decoder send_eof")?;
    drain(&mut decoder, &mut frame_count)?;

    info!(frame_count, "decode complete");
    Ok(frame_count)
}

/// Copy plane 0 of an RGB24 frame into a tightly packed buffer, dropping
/// any stride padding.
fn packed_rows(rgb: &frame::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let row_len = width as usize * 3;
    rgb.data(0)
        .chunks(stride)
        .take(height as usize)
        .flat_map(|row| &row[..row_len])
        .copied()
        .collect()
}

/// Return the approximate total frame count for a video file (used for
/// progress reporting). Falls back to 0 if the count cannot be determined.
pub fn total_frames<P: AsRef<Path>>(input_path: P) -> u64 {
    ffmpeg::init().ok();
    let Ok(ictx) = format::input(&input_path) else {
        return 0;
    };
    let Some(stream) = ictx.streams().best(media::Type::Video) else {
        return 0;
    };
    // nb_frames is set by most muxers; fall back to duration × fps estimate.
    let nb = stream.frames();
    if nb > 0 {
        return nb as u64;
    }
    let dur = stream.duration();
    let tb = stream.time_base();
    let fps = stream.avg_frame_rate();
    if dur > 0 && tb.denominator() > 0 && fps.numerator() > 0 && fps.denominator() > 0 {
        let seconds = dur as f64 * tb.numerator() as f64 / tb.denominator() as f64;
        let fps_f = fps.numerator() as f64 / fps.denominator() as f64;
        return (seconds * fps_f).round() as u64;
    }
    0
}
