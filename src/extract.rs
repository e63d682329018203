//! Frame extraction.
//!
//! A [`FrameExtractor`] turns `(video, timepoint, tile_size)` into a square
//! still image, or into an [`ExtractionFailure`]. Failure is an expected,
//! tile-local outcome (corrupt file, timepoint past the end, unsupported
//! codec) and is returned as a value so the build can substitute an error
//! tile and keep going.
//!
//! Two extractors are provided:
//!
//! - [`LibavExtractor`] decodes in-process through `ffmpeg-next` (feature
//!   `libav`, on by default).
//! - [`ProcessExtractor`] runs an `ffmpeg` executable per frame and stages
//!   its output in a private scratch file.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//!
//! use reelatlas::{FrameExtractor, ProcessExtractor};
//!
//! let extractor = ProcessExtractor::new("ffmpeg", std::env::temp_dir());
//! match extractor.extract(Path::new("clip.mp4"), Duration::from_secs(5), 256) {
//!     Ok(frame) => println!("{} encoded bytes", frame.bytes().len()),
//!     Err(failure) => println!("no frame: {failure}"),
//! }
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Trailing bytes of ffmpeg's stderr kept in a failure message.
const STDERR_TAIL_BYTES: usize = 2048;

/// An encoded still image (PNG or JPEG) already cropped and scaled to the
/// tile size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
}

impl FrameBuffer {
    /// Wrap encoded image bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The encoded image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the buffer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Why a frame could not be produced for a tile.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExtractionFailure {
    /// Opening, seeking or decoding failed.
    Decode(String),
    /// The requested timepoint lies beyond the end of the video.
    BeyondEnd {
        /// Requested timepoint.
        timepoint: Duration,
        /// Duration of the video.
        duration: Duration,
    },
    /// The extraction did not finish within the configured timeout.
    TimedOut(Duration),
    /// The extraction task panicked or was aborted.
    Aborted(String),
}

impl Display for ExtractionFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ExtractionFailure::Decode(reason) => write!(f, "decode failed: {reason}"),
            ExtractionFailure::BeyondEnd {
                timepoint,
                duration,
            } => write!(
                f,
                "timepoint {:.3}s is beyond the video duration {:.3}s",
                timepoint.as_secs_f64(),
                duration.as_secs_f64()
            ),
            ExtractionFailure::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s", limit.as_secs_f64())
            }
            ExtractionFailure::Aborted(reason) => write!(f, "extraction aborted: {reason}"),
        }
    }
}

/// The outcome of one extraction: a frame, or the reason there is none.
pub type FrameResult = Result<FrameBuffer, ExtractionFailure>;

/// Produces one square frame per `(video, timepoint)`.
///
/// Implementations are called from blocking worker threads and must never
/// panic on bad input; every problem is reported as an
/// [`ExtractionFailure`].
pub trait FrameExtractor: Send + Sync {
    /// Extract the frame at `timepoint`, center-cropped to a square and
    /// scaled to `tile_size × tile_size`.
    fn extract(&self, video: &Path, timepoint: Duration, tile_size: u32) -> FrameResult;
}

/// The largest centered square of a `width × height` frame.
///
/// Returns `(x, y, side)`. Landscape frames are centered horizontally,
/// portrait frames vertically.
pub fn center_square(width: u32, height: u32) -> (u32, u32, u32) {
    let side = width.min(height);
    ((width - side) / 2, (height - side) / 2, side)
}

/// Build the `-vf` filter chain used by [`ProcessExtractor`].
fn crop_scale_filter(tile_size: u32) -> String {
    let side = "min(iw\\,ih)";
    format!("crop={side}:{side}:(iw-{side})/2:(ih-{side})/2,scale={tile_size}:{tile_size}")
}

/// Extracts frames by running an `ffmpeg` executable.
///
/// Each call writes its frame into a uniquely-named scratch file, so any
/// number of extractions can run side by side. The scratch file is removed
/// when the call returns, whatever the outcome.
#[derive(Debug, Clone)]
pub struct ProcessExtractor {
    ffmpeg: PathBuf,
    scratch_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessExtractor {
    /// Create an extractor running `ffmpeg`, with scratch files in
    /// `scratch_dir`.
    pub fn new<F: Into<PathBuf>, S: Into<PathBuf>>(ffmpeg: F, scratch_dir: S) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            scratch_dir: scratch_dir.into(),
            timeout: None,
        }
    }

    /// Kill the child process if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run(&self, video: &Path, timepoint: Duration, tile_size: u32) -> FrameResult {
        let scratch = tempfile::Builder::new()
            .prefix("reelatlas-frame-")
            .suffix(".jpg")
            .tempfile_in(&self.scratch_dir)
            .map_err(|error| {
                ExtractionFailure::Decode(format!(
                    "cannot create scratch file in {}: {error}",
                    self.scratch_dir.display()
                ))
            })?;

        // stderr goes to an unnamed file so a chatty ffmpeg can never block
        // on a full pipe.
        let mut stderr_log = tempfile::tempfile_in(&self.scratch_dir).map_err(|error| {
            ExtractionFailure::Decode(format!(
                "cannot create scratch file in {}: {error}",
                self.scratch_dir.display()
            ))
        })?;
        let stderr_sink = stderr_log
            .try_clone()
            .map_err(|error| ExtractionFailure::Decode(error.to_string()))?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-ss"])
            .arg(format!("{:.3}", timepoint.as_secs_f64()))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-vf"])
            .arg(crop_scale_filter(tile_size))
            .arg(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_sink))
            .spawn()
            .map_err(|error| {
                ExtractionFailure::Decode(format!(
                    "cannot run {}: {error}",
                    self.ffmpeg.display()
                ))
            })?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if let Some(limit) = self.timeout
                        && started.elapsed() >= limit
                    {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ExtractionFailure::TimedOut(limit));
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                Err(error) => {
                    let _ = child.kill();
                    return Err(ExtractionFailure::Decode(error.to_string()));
                }
            }
        };

        if !status.success() {
            let mut stderr = Vec::new();
            if stderr_log.seek(SeekFrom::Start(0)).is_ok() {
                let _ = stderr_log.read_to_end(&mut stderr);
            }
            let tail = &stderr[stderr.len().saturating_sub(STDERR_TAIL_BYTES)..];
            return Err(ExtractionFailure::Decode(format!(
                "ffmpeg exited with {status}: {}",
                String::from_utf8_lossy(tail).trim()
            )));
        }

        let bytes = std::fs::read(scratch.path())
            .map_err(|error| ExtractionFailure::Decode(error.to_string()))?;
        if bytes.is_empty() {
            // ffmpeg exits cleanly without writing a frame when seeking past
            // the end of the stream.
            return Err(ExtractionFailure::Decode(format!(
                "no frame decoded at {:.3}s",
                timepoint.as_secs_f64()
            )));
        }

        Ok(FrameBuffer::new(bytes))
    }
}

impl FrameExtractor for ProcessExtractor {
    fn extract(&self, video: &Path, timepoint: Duration, tile_size: u32) -> FrameResult {
        log::debug!(
            "Extracting {} @ {:?} via {}",
            video.display(),
            timepoint,
            self.ffmpeg.display()
        );
        self.run(video, timepoint, tile_size)
    }
}

#[cfg(feature = "libav")]
pub use libav::LibavExtractor;

#[cfg(feature = "libav")]
mod libav {
    use std::io::Cursor;
    use std::path::Path;
    use std::time::Duration;

    use ffmpeg_next::{
        codec::context::Context as CodecContext,
        format::Pixel,
        frame::Video as VideoFrame,
        media::Type,
        software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    };
    use image::{DynamicImage, ImageFormat, RgbImage, imageops::FilterType};

    use super::{ExtractionFailure, FrameBuffer, FrameExtractor, FrameResult, center_square};
    use crate::conversion::{duration_to_seek_timestamp, frame_to_rgb_buffer, pts_to_seconds};
    use crate::error::AtlasError;

    /// Extracts frames in-process through the FFmpeg libraries.
    ///
    /// Seeks to the keyframe before the timepoint, decodes forward to the
    /// first frame at or after it, then crops and scales with `image`. The
    /// frame never touches the disk; it is returned PNG-encoded.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LibavExtractor;

    impl LibavExtractor {
        /// Create a new in-process extractor.
        pub fn new() -> Self {
            Self
        }
    }

    impl FrameExtractor for LibavExtractor {
        fn extract(&self, video: &Path, timepoint: Duration, tile_size: u32) -> FrameResult {
            log::debug!("Decoding {} @ {:?}", video.display(), timepoint);
            match decode_frame_at(video, timepoint) {
                Ok(frame) => encode_tile(frame, tile_size)
                    .map_err(|error| ExtractionFailure::Decode(error.to_string())),
                Err(DecodeOutcome::BeyondEnd(duration)) => Err(ExtractionFailure::BeyondEnd {
                    timepoint,
                    duration,
                }),
                Err(DecodeOutcome::Failed(error)) => {
                    Err(ExtractionFailure::Decode(error.to_string()))
                }
            }
        }
    }

    enum DecodeOutcome {
        BeyondEnd(Duration),
        Failed(AtlasError),
    }

    impl From<AtlasError> for DecodeOutcome {
        fn from(error: AtlasError) -> Self {
            DecodeOutcome::Failed(error)
        }
    }

    impl From<ffmpeg_next::Error> for DecodeOutcome {
        fn from(error: ffmpeg_next::Error) -> Self {
            DecodeOutcome::Failed(error.into())
        }
    }

    fn decode_frame_at(video: &Path, timepoint: Duration) -> Result<RgbImage, DecodeOutcome> {
        ffmpeg_next::init().map_err(|error| AtlasError::FileOpen {
            path: video.to_path_buf(),
            reason: format!("FFmpeg initialisation failed: {error}"),
        })?;

        let mut input_context =
            ffmpeg_next::format::input(&video).map_err(|error| AtlasError::FileOpen {
                path: video.to_path_buf(),
                reason: error.to_string(),
            })?;

        let duration_microseconds = input_context.duration();
        if duration_microseconds > 0 {
            let duration = Duration::from_micros(duration_microseconds as u64);
            if timepoint > duration {
                return Err(DecodeOutcome::BeyondEnd(duration));
            }
        }

        let (video_stream_index, time_base, mut decoder) = {
            let stream = input_context
                .streams()
                .best(Type::Video)
                .ok_or(AtlasError::NoVideoStream)?;
            let decoder_context = CodecContext::from_parameters(stream.parameters())?;
            (
                stream.index(),
                stream.time_base(),
                decoder_context.decoder().video()?,
            )
        };

        let width = decoder.width();
        let height = decoder.height();
        let mut scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::BILINEAR,
        )?;

        let target = duration_to_seek_timestamp(timepoint);
        input_context.seek(target, ..target)?;

        let target_seconds = timepoint.as_secs_f64();
        let mut decoded_frame = VideoFrame::empty();
        let mut rgb_frame = VideoFrame::empty();

        for (stream, packet) in input_context.packets() {
            if stream.index() != video_stream_index {
                continue;
            }

            decoder.send_packet(&packet)?;

            while decoder.receive_frame(&mut decoded_frame).is_ok() {
                let pts = decoded_frame.timestamp().or(decoded_frame.pts()).unwrap_or(0);
                if pts_to_seconds(pts, time_base) >= target_seconds {
                    scaler.run(&decoded_frame, &mut rgb_frame)?;
                    return Ok(to_rgb_image(&rgb_frame, width, height)?);
                }
            }
        }

        decoder.send_eof()?;
        while decoder.receive_frame(&mut decoded_frame).is_ok() {
            let pts = decoded_frame.timestamp().or(decoded_frame.pts()).unwrap_or(0);
            if pts_to_seconds(pts, time_base) >= target_seconds {
                scaler.run(&decoded_frame, &mut rgb_frame)?;
                return Ok(to_rgb_image(&rgb_frame, width, height)?);
            }
        }

        Err(AtlasError::VideoDecodeError(format!(
            "no frame at or after {target_seconds:.3}s in {}",
            video.display()
        ))
        .into())
    }

    fn to_rgb_image(rgb_frame: &VideoFrame, width: u32, height: u32) -> Result<RgbImage, AtlasError> {
        let buffer = frame_to_rgb_buffer(rgb_frame, width, height);
        RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
            AtlasError::VideoDecodeError(
                "Failed to construct RGB image from decoded frame data".to_string(),
            )
        })
    }

    fn encode_tile(frame: RgbImage, tile_size: u32) -> Result<FrameBuffer, AtlasError> {
        let (x, y, side) = center_square(frame.width(), frame.height());
        if side == 0 {
            return Err(AtlasError::VideoDecodeError("decoded an empty frame".to_string()));
        }
        let tile = DynamicImage::ImageRgb8(frame)
            .crop_imm(x, y, side, side)
            .resize_exact(tile_size, tile_size, FilterType::Triangle);

        let mut bytes = Cursor::new(Vec::new());
        tile.write_to(&mut bytes, ImageFormat::Png)?;
        Ok(FrameBuffer::new(bytes.into_inner()))
    }
}
