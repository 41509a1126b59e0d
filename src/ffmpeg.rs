//! FFmpeg backend: asset probing and a threaded NV12 frame source.

use crate::compositor::{ColorRange, Frame, PixelFormat};
use crate::loader::{AssetInfo, AssetResolver, CancelToken, VideoSource};
use crate::Error;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{input, Pixel};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScaleContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video as FFmpegFrame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

fn init() -> Result<(), Error> {
    ffmpeg::init().map_err(|e| Error::load(format!("failed to initialize FFmpeg: {e}")))
}

fn open_video_decoder(
    ictx: &ffmpeg::format::context::Input,
) -> Result<(usize, ffmpeg::Rational, f64, ffmpeg::decoder::Video), Error> {
    let video_stream = ictx.streams().best(Type::Video).ok_or(Error::Caps)?;
    let index = video_stream.index();
    let time_base = video_stream.time_base();

    let framerate = {
        let avg_frame_rate = video_stream.avg_frame_rate();
        if avg_frame_rate.numerator() > 0 && avg_frame_rate.denominator() > 0 {
            avg_frame_rate.numerator() as f64 / avg_frame_rate.denominator() as f64
        } else {
            25.0
        }
    };

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
        .map_err(|_| Error::Caps)?
        .decoder()
        .video()
        .map_err(|_| Error::Caps)?;

    decoder.set_threading(ffmpeg::threading::Config {
        kind: ffmpeg::threading::Type::Frame,
        count: 0,
        ..Default::default()
    });

    Ok((index, time_base, framerate, decoder))
}

/// Range of the NV12 samples the scaler produces for this decoder.
///
/// swscale keeps the input range, except that the deprecated `yuvj*`
/// formats are remapped to studio swing on the way to NV12.
fn nv12_output_range(decoder: &ffmpeg::decoder::Video) -> ColorRange {
    let jpeg_format = matches!(
        decoder.format(),
        Pixel::YUVJ420P | Pixel::YUVJ422P | Pixel::YUVJ444P | Pixel::YUVJ440P
    );
    match decoder.color_range() {
        ffmpeg::util::color::Range::JPEG if !jpeg_format => ColorRange::Full,
        _ => ColorRange::Limited,
    }
}

/// Converts a seek position to the `AV_TIME_BASE` units expected when
/// seeking across all streams.
fn seek_timestamp(position: Duration) -> i64 {
    i64::try_from(position.as_micros()).unwrap_or(i64::MAX)
}

/// Probes sources with libavformat.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegResolver;

impl AssetResolver for FfmpegResolver {
    fn resolve(&self, source: &VideoSource, cancel: &CancelToken) -> Result<AssetInfo, Error> {
        init()?;
        let path = source.location()?;
        let ictx = input(&path).map_err(|e| Error::load(format!("{path}: {e}")))?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (_, _, framerate, decoder) = open_video_decoder(&ictx)?;
        let duration = if ictx.duration() > 0 {
            Duration::from_micros(ictx.duration() as u64)
        } else {
            Duration::ZERO
        };

        let mut info = AssetInfo::new(decoder.width(), decoder.height(), framerate, duration)
            .with_color_range(nv12_output_range(&decoder));
        if ictx.streams().best(Type::Audio).is_some() {
            info = info.with_audio();
        }

        log::info!(
            "Probed {}: {}x{} @ {:.2}fps, {:.2}s, audio: {}",
            path,
            info.width,
            info.height,
            info.framerate,
            info.duration.as_secs_f64(),
            info.has_audio()
        );
        Ok(info)
    }
}

enum DecoderCommand {
    Seek(Duration),
    Stop,
}

/// Decodes a source to NV12 [`Frame`]s on a worker thread.
///
/// Frames queue up in a bounded channel; the worker blocks once
/// `capacity` frames are waiting.
pub struct FfmpegFrameSource {
    frames: Receiver<Frame>,
    command_tx: Sender<DecoderCommand>,
    alive: Arc<AtomicBool>,
    is_eos: Arc<AtomicBool>,
    decoder_thread: Option<JoinHandle<()>>,
}

impl FfmpegFrameSource {
    pub fn open(source: &VideoSource, capacity: usize) -> Result<Self, Error> {
        init()?;
        let path = source.location()?;

        let (frame_tx, frames) = bounded(capacity.max(1));
        let (command_tx, command_rx) = bounded(100);
        let alive = Arc::new(AtomicBool::new(true));
        let is_eos = Arc::new(AtomicBool::new(false));

        let alive_ref = Arc::clone(&alive);
        let is_eos_ref = Arc::clone(&is_eos);
        let decoder_thread = std::thread::Builder::new()
            .name("ffmpeg-decoder".into())
            .spawn(move || {
                if let Err(e) = decoder_loop(path, frame_tx, command_rx, alive_ref, is_eos_ref) {
                    log::error!("Decoder error: {:?}", e);
                }
            })?;

        Ok(Self {
            frames,
            command_tx,
            alive,
            is_eos,
            decoder_thread: Some(decoder_thread),
        })
    }

    pub fn try_next(&self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.frames.recv_timeout(timeout).ok()
    }

    /// Flushes queued frames and restarts decoding at `position`.
    pub fn seek(&self, position: Duration) -> Result<(), Error> {
        self.is_eos.store(false, Ordering::Release);
        while self.frames.try_recv().is_ok() {}
        self.command_tx
            .send(DecoderCommand::Seek(position))
            .map_err(|_| Error::Sync)
    }

    /// True once the decoder has drained the stream and nothing is queued.
    pub fn is_eos(&self) -> bool {
        self.is_eos.load(Ordering::Acquire) && self.frames.is_empty()
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.command_tx.send(DecoderCommand::Stop);
        while self.frames.try_recv().is_ok() {}

        if let Some(worker) = self.decoder_thread.take() {
            let _ = worker.join();
        }
    }
}

fn decoder_loop(
    path: String,
    frame_tx: Sender<Frame>,
    command_rx: Receiver<DecoderCommand>,
    alive: Arc<AtomicBool>,
    is_eos: Arc<AtomicBool>,
) -> Result<(), Error> {
    let mut ictx = input(&path).map_err(|_| Error::Uri)?;
    let (video_stream_index, time_base, _, mut decoder) = open_video_decoder(&ictx)?;

    let mut scaler = ScaleContext::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        Pixel::NV12,
        decoder.width(),
        decoder.height(),
        Flags::BILINEAR,
    )
    .map_err(|_| Error::Caps)?;

    log::info!("Decoder loop started for {}", path);

    while alive.load(Ordering::Acquire) {
        while let Ok(cmd) = command_rx.try_recv() {
            match cmd {
                DecoderCommand::Seek(position) => {
                    let timestamp = seek_timestamp(position);
                    log::info!("Seek to {}us", timestamp);
                    if let Err(e) = ictx.seek(timestamp, ..timestamp) {
                        log::error!("Seek failed: {:?}", e);
                    }
                    decoder.flush();
                    is_eos.store(false, Ordering::Release);
                }
                DecoderCommand::Stop => {
                    log::info!("Stopping decoder");
                    return Ok(());
                }
            }
        }

        if is_eos.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(16));
            continue;
        }

        let packet = match ictx.packets().next() {
            Some((stream, packet)) => {
                if stream.index() != video_stream_index {
                    continue;
                }
                Some(packet)
            }
            None => None,
        };

        match packet {
            Some(packet) => {
                if let Err(e) = decoder.send_packet(&packet) {
                    log::warn!("Send video packet error: {:?}", e);
                    continue;
                }
            }
            None => {
                let _ = decoder.send_eof();
            }
        }

        let mut decoded = FFmpegFrame::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let mut nv12 = FFmpegFrame::empty();
            if let Err(e) = scaler.run(&decoded, &mut nv12) {
                log::error!("Scaling error: {:?}", e);
                continue;
            }
            let frame = pack_nv12(&nv12, decoded.pts().unwrap_or(0), time_base);
            if !send_frame(&frame_tx, frame, &alive) {
                return Ok(());
            }
        }

        if packet.is_none() {
            log::info!("End of stream");
            is_eos.store(true, Ordering::Release);
        }
    }

    Ok(())
}

/// Copies both NV12 planes into one tightly packed buffer.
fn pack_nv12(nv12: &FFmpegFrame, pts: i64, time_base: ffmpeg::Rational) -> Frame {
    let width = nv12.width();
    let height = nv12.height();
    let y_plane = nv12.data(0);
    let uv_plane = nv12.data(1);
    let y_stride = nv12.stride(0);
    let uv_stride = nv12.stride(1);

    let mut data = Vec::with_capacity((width * height * 3 / 2) as usize);
    for row in 0..height as usize {
        let start = row * y_stride;
        data.extend_from_slice(&y_plane[start..start + width as usize]);
    }
    for row in 0..(height / 2) as usize {
        let start = row * uv_stride;
        data.extend_from_slice(&uv_plane[start..start + width as usize]);
    }

    let timestamp_secs =
        pts as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator());
    Frame::new(data, width, height, PixelFormat::Nv12)
        .with_timestamp(Duration::from_secs_f64(timestamp_secs.max(0.0)), pts)
}

fn send_frame(frame_tx: &Sender<Frame>, mut frame: Frame, alive: &AtomicBool) -> bool {
    loop {
        match frame_tx.send_timeout(frame, Duration::from_millis(50)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if !alive.load(Ordering::Acquire) {
                    return false;
                }
                frame = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_timestamps_are_microseconds() {
        assert_eq!(seek_timestamp(Duration::ZERO), 0);
        assert_eq!(seek_timestamp(Duration::from_secs(1)), 1_000_000);
        assert_eq!(seek_timestamp(Duration::from_millis(2_500)), 2_500_000);
        assert_eq!(seek_timestamp(Duration::MAX), i64::MAX);
    }
}
