//! FFmpeg-backed video source
//!
//! Decodes the best video stream of a file (or device URL) to RGB24 frames.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{input, Pixel};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use std::path::Path;
use tracing::debug;

use super::frame::Frame;
use super::VideoSource;

/// Video file source decoded through FFmpeg
pub struct FfmpegSource {
    input_context: Option<ffmpeg::format::context::Input>,
    video_stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: ScalingContext,
    frame_index: u64,
    width: u32,
    height: u32,
    fps: f64,
    eof_sent: bool,
}

impl FfmpegSource {
    /// Open a video file
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("Failed to initialize FFmpeg")?;

        let input_context =
            input(&path).with_context(|| format!("Failed to open video: {:?}", path))?;

        let video_stream = input_context
            .streams()
            .best(Type::Video)
            .context("No video stream found")?;

        let video_stream_index = video_stream.index();
        let codec_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = codec_context.decoder().video()?;

        let width = decoder.width();
        let height = decoder.height();

        let rate = video_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )?;

        Ok(Self {
            input_context: Some(input_context),
            video_stream_index,
            decoder,
            scaler,
            frame_index: 0,
            width,
            height,
            fps,
            eof_sent: false,
        })
    }

    /// Decode the next raw frame
    fn decode_next(&mut self) -> Result<Option<Video>> {
        loop {
            let mut decoded = Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let Some(input_context) = self.input_context.as_mut() else {
                return Ok(None);
            };

            let mut sent = false;
            for (stream, packet) in input_context.packets() {
                if stream.index() == self.video_stream_index {
                    self.decoder.send_packet(&packet)?;
                    sent = true;
                    break;
                }
            }

            if !sent {
                // Flush whatever the decoder still holds
                self.decoder.send_eof()?;
                self.eof_sent = true;
            }
        }
    }

    /// Convert a decoded frame to a tightly packed RGB image
    fn to_rgb(&mut self, decoded: &Video) -> Result<RgbImage> {
        let mut rgb_frame = Video::empty();
        self.scaler.run(decoded, &mut rgb_frame)?;

        let data = rgb_frame.data(0);
        let stride = rgb_frame.stride(0);
        let row_len = self.width as usize * 3;

        // Strip row padding
        let mut pixels = Vec::with_capacity(row_len * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * stride;
            pixels.extend_from_slice(&data[start..start + row_len]);
        }

        RgbImage::from_raw(self.width, self.height, pixels)
            .context("Decoded frame has unexpected size")
    }
}

impl VideoSource for FfmpegSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(decoded) = self.decode_next()? else {
            return Ok(None);
        };

        let image = self.to_rgb(&decoded)?;
        let frame = Frame::new(image, self.frame_index);
        self.frame_index += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.input_context.take().is_some() {
            debug!("Released video after {} frames", self.frame_index);
        }
        self.eof_sent = true;
    }
}
