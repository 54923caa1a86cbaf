use std::sync::Once;
use std::time::Instant;

use ffmpeg_next as ffmpeg;
use image::DynamicImage;
use tracing::{debug, warn};

use crate::admission::params::FramePosition;
use crate::core::error::ProxyError;
use crate::observability::metrics as obs;

/// Stop once the best candidate is within this distance of the target and
/// the decode position is moving away from it.
const TARGET_TOLERANCE_SECS: f64 = 0.1;

/// For `last`, frames earlier than this window before the end are only
/// sampled sparsely.
const LAST_DENSE_WINDOW_SECS: f64 = 5.0;

/// Sparse sampling stride outside the dense window.
const LAST_SPARSE_STRIDE: u64 = 24;

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            warn!(error = %e, "ffmpeg init failed");
        }
    });
}

// ---------------------------------------------------------------------------
// Frame selection policy (pure, unit-tested)
// ---------------------------------------------------------------------------

/// What the decode loop is looking for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    First,
    Last,
    /// Closest decodable frame to this time in seconds.
    Closest(f64),
}

/// Resolve a frame position against the known durations. `half` prefers
/// the container duration, falling back to the stream duration.
pub fn plan_target(
    position: FramePosition,
    container_duration_secs: Option<f64>,
    stream_duration_secs: Option<f64>,
) -> Target {
    match position {
        FramePosition::First => Target::First,
        FramePosition::Last => Target::Last,
        FramePosition::Half => {
            let duration = container_duration_secs.or(stream_duration_secs);
            match duration {
                Some(d) if d > 0.0 => Target::Closest(d / 2.0),
                _ => Target::First,
            }
        }
        FramePosition::Seconds(secs) => Target::Closest(secs),
    }
}

/// Tracks the frame nearest to a target timestamp.
///
/// Strictly-smaller distance wins, so of two equidistant frames the
/// earlier one is kept.
#[derive(Debug)]
pub struct ClosestPicker {
    target: f64,
    best_distance: Option<f64>,
}

impl ClosestPicker {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            best_distance: None,
        }
    }

    /// Whether the frame at `t` becomes the new best candidate.
    pub fn offer(&mut self, t: f64) -> bool {
        let distance = (t - self.target).abs();
        match self.best_distance {
            Some(best) if distance >= best => false,
            _ => {
                self.best_distance = Some(distance);
                true
            }
        }
    }

    /// Early exit: the decode position has passed the target and the best
    /// candidate is already within tolerance.
    pub fn should_stop(&self, t: f64) -> bool {
        match self.best_distance {
            Some(best) => t > self.target && best <= TARGET_TOLERANCE_SECS,
            None => false,
        }
    }
}

/// Decides which frames are worth converting when hunting for `last`:
/// every frame inside the final window, every Nth before it.
#[derive(Debug)]
pub struct LastFrameSampler {
    dense_from: Option<f64>,
    seen: u64,
}

impl LastFrameSampler {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            dense_from: duration_secs.map(|d| (d - LAST_DENSE_WINDOW_SECS).max(0.0)),
            seen: 0,
        }
    }

    pub fn should_convert(&mut self, t: Option<f64>) -> bool {
        self.seen += 1;
        match (self.dense_from, t) {
            (Some(dense_from), Some(t)) if t >= dense_from => true,
            (Some(_), _) => self.seen % LAST_SPARSE_STRIDE == 1,
            // Unknown duration: process densely.
            (None, _) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract one frame from a video the demuxer can open (HTTP URL or a
/// presigned object-store URL). CPU-bound and blocking; callers run it on
/// a blocking thread.
pub fn extract_frame(
    source_url: &str,
    position: FramePosition,
) -> Result<DynamicImage, ProxyError> {
    init_ffmpeg();
    let start = Instant::now();

    let mut ictx = ffmpeg::format::input(&source_url)
        .map_err(|e| ProxyError::SourceFailure(format!("failed to open input: {}", e)))?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| ProxyError::Internal("no video stream found".to_string()))?;
    let stream_index = stream.index();
    let time_base = f64::from(stream.time_base());
    let stream_duration = (stream.duration() > 0).then(|| stream.duration() as f64 * time_base);
    let container_duration =
        (ictx.duration() > 0).then(|| ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE));

    let decoder_context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| ProxyError::Internal(format!("failed to find decoder: {}", e)))?;
    let mut decoder = decoder_context
        .decoder()
        .video()
        .map_err(|e| ProxyError::Internal(format!("failed to open decoder: {}", e)))?;

    let target = plan_target(position, container_duration, stream_duration);
    let mut picker = match target {
        Target::Closest(t) => Some(ClosestPicker::new(t)),
        _ => None,
    };
    let mut sampler = LastFrameSampler::new(container_duration.or(stream_duration));

    let mut scaler = FrameConverter::new();
    let mut decoded = ffmpeg::util::frame::Video::empty();
    let mut first_frame: Option<DynamicImage> = None;
    let mut last_frame: Option<DynamicImage> = None;
    let mut best_frame: Option<DynamicImage> = None;
    let mut stop = false;

    'demux: for (packet_stream, packet) in ictx.packets() {
        if packet_stream.index() != stream_index {
            continue;
        }
        if let Err(e) = decoder.send_packet(&packet) {
            warn!(error = %e, "failed to send packet, skipping");
            continue;
        }

        while decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.planes() == 0 || decoded.data(0).is_empty() {
                continue;
            }
            let t = decoded
                .timestamp()
                .or(decoded.pts())
                .map(|pts| pts as f64 * time_base);

            match target {
                Target::First => {
                    match scaler.convert(&decoded) {
                        Ok(img) => {
                            obs::record_frame_extract_duration(start.elapsed().as_secs_f64());
                            return Ok(img);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to convert frame, continuing");
                            continue;
                        }
                    };
                }
                Target::Last => {
                    if sampler.should_convert(t) {
                        match scaler.convert(&decoded) {
                            Ok(img) => last_frame = Some(img),
                            Err(e) => warn!(error = %e, "failed to convert frame, continuing"),
                        }
                    }
                }
                Target::Closest(_) => {
                    let picker = picker.as_mut().expect("picker exists for closest target");
                    if let Some(t) = t {
                        if picker.offer(t) {
                            match scaler.convert(&decoded) {
                                Ok(img) => best_frame = Some(img),
                                Err(e) => {
                                    warn!(error = %e, "failed to convert frame, continuing")
                                }
                            }
                        }
                        if picker.should_stop(t) {
                            stop = true;
                        }
                    }
                    if first_frame.is_none() {
                        if let Ok(img) = scaler.convert(&decoded) {
                            first_frame = Some(img);
                        }
                    }
                }
            }
            if stop {
                break 'demux;
            }
        }
    }

    // Drain the decoder after EOF.
    if !stop && decoder.send_eof().is_ok() {
        while decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.planes() == 0 || decoded.data(0).is_empty() {
                continue;
            }
            let t = decoded
                .timestamp()
                .or(decoded.pts())
                .map(|pts| pts as f64 * time_base);
            match target {
                Target::First => {
                    if let Ok(img) = scaler.convert(&decoded) {
                        obs::record_frame_extract_duration(start.elapsed().as_secs_f64());
                        return Ok(img);
                    }
                }
                Target::Last => {
                    if sampler.should_convert(t) {
                        if let Ok(img) = scaler.convert(&decoded) {
                            last_frame = Some(img);
                        }
                    }
                }
                Target::Closest(_) => {
                    if let (Some(picker), Some(t)) = (picker.as_mut(), t) {
                        if picker.offer(t) {
                            if let Ok(img) = scaler.convert(&decoded) {
                                best_frame = Some(img);
                            }
                        }
                    }
                }
            }
        }
    }

    obs::record_frame_extract_duration(start.elapsed().as_secs_f64());
    debug!(?target, "frame extraction finished");

    let chosen = match target {
        Target::First => first_frame,
        Target::Last => last_frame,
        Target::Closest(_) => best_frame.or(first_frame),
    };
    chosen.ok_or_else(|| ProxyError::Internal("no video frames found".to_string()))
}

// ---------------------------------------------------------------------------
// Frame conversion
// ---------------------------------------------------------------------------

/// Converts decoded frames to RGB images, caching the scaling context as
/// long as the frame geometry stays stable.
struct FrameConverter {
    scaler: Option<(ffmpeg::format::Pixel, u32, u32, ffmpeg::software::scaling::Context)>,
}

impl FrameConverter {
    fn new() -> Self {
        Self { scaler: None }
    }

    fn convert(
        &mut self,
        frame: &ffmpeg::util::frame::Video,
    ) -> Result<DynamicImage, ffmpeg::Error> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());

        let needs_new = !matches!(
            &self.scaler,
            Some((f, w, h, _)) if *f == format && *w == width && *h == height
        );
        if needs_new {
            let context = ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some((format, width, height, context));
        }

        let (_, _, _, context) = self.scaler.as_mut().expect("scaler initialized above");
        let mut rgb = ffmpeg::util::frame::Video::empty();
        context.run(frame, &mut rgb)?;

        let width = rgb.width();
        let height = rgb.height();
        let stride = rgb.stride(0);
        let row_bytes = width as usize * 3;
        let data = rgb.data(0);

        let mut buffer = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let offset = row * stride;
            buffer.extend_from_slice(&data[offset..offset + row_bytes]);
        }

        image::RgbImage::from_raw(width, height, buffer)
            .map(DynamicImage::ImageRgb8)
            .ok_or(ffmpeg::Error::InvalidData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_target_positions() {
        assert_eq!(
            plan_target(FramePosition::First, Some(12.0), None),
            Target::First
        );
        assert_eq!(
            plan_target(FramePosition::Last, Some(12.0), None),
            Target::Last
        );
        assert_eq!(
            plan_target(FramePosition::Seconds(30.5), None, None),
            Target::Closest(30.5)
        );
    }

    #[test]
    fn half_prefers_container_duration() {
        assert_eq!(
            plan_target(FramePosition::Half, Some(12.0), Some(100.0)),
            Target::Closest(6.0)
        );
    }

    #[test]
    fn half_falls_back_to_stream_duration() {
        assert_eq!(
            plan_target(FramePosition::Half, None, Some(10.0)),
            Target::Closest(5.0)
        );
        // no duration at all degrades to the first frame
        assert_eq!(plan_target(FramePosition::Half, None, None), Target::First);
    }

    #[test]
    fn picker_converges_on_target() {
        let mut picker = ClosestPicker::new(6.0);
        let mut kept = Vec::new();
        for t in [0.0, 2.0, 4.0, 5.9, 6.1, 8.0] {
            if picker.offer(t) {
                kept.push(t);
            }
        }
        assert_eq!(kept.last().copied(), Some(5.9));
    }

    #[test]
    fn picker_ties_keep_the_earlier_frame() {
        let mut picker = ClosestPicker::new(6.0);
        assert!(picker.offer(5.5));
        // 6.5 is equidistant; the earlier 5.5 wins
        assert!(!picker.offer(6.5));
    }

    #[test]
    fn picker_early_exit_within_tolerance() {
        let mut picker = ClosestPicker::new(2.0);
        assert!(picker.offer(1.95));
        assert!(!picker.should_stop(1.98));
        assert!(picker.should_stop(2.5));
    }

    #[test]
    fn picker_no_early_exit_when_far_off() {
        let mut picker = ClosestPicker::new(10.0);
        assert!(picker.offer(2.0));
        assert!(!picker.should_stop(3.0));
        // past the target but the best candidate is 8s away
        assert!(!picker.should_stop(11.0));
    }

    #[test]
    fn last_sampler_dense_window() {
        let mut sampler = LastFrameSampler::new(Some(60.0));
        // first frame is always sampled (stride phase)
        assert!(sampler.should_convert(Some(0.0)));
        // early frames outside the window are mostly skipped
        let sampled = (1..100)
            .filter(|_| sampler.should_convert(Some(10.0)))
            .count();
        assert!(sampled < 10);
        // inside the final 5 seconds everything is converted
        assert!(sampler.should_convert(Some(56.0)));
        assert!(sampler.should_convert(Some(59.9)));
    }

    #[test]
    fn last_sampler_without_duration_is_dense() {
        let mut sampler = LastFrameSampler::new(None);
        assert!((0..50).all(|_| sampler.should_convert(None)));
    }
}
