//! Writing a clip to a byte stream.
//!
//! Frames are requested asynchronously with a bounded number of requests in
//! flight, collected in a reorder buffer and written strictly in index
//! order, either as raw planes or as YUV4MPEG2.

use crate::core::error::{FrameResult, PipeError};
use crate::core::format::ColorFamily;
use crate::core::frame::VideoFrame;
use crate::core::node::{Node, VideoInfo};
use crate::execution::progress::ProgressTracker;
use crossbeam::channel;
use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, Instant};

/// How frames are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plane rows back to back, without stride padding.
    #[default]
    Raw,
    /// YUV4MPEG2 stream header and per-frame markers.
    Y4m,
}

/// Options for [`pipe_node`].
#[derive(Debug, Clone, Default)]
pub struct PipeOptions {
    /// First frame to write.
    pub start: usize,
    /// Last frame to write (inclusive). `None` means the last frame.
    pub end: Option<usize>,
    /// Requests kept in flight. 0 uses the core's thread count.
    pub requests: usize,
    /// Output format.
    pub format: OutputFormat,
}

/// Result of a completed pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeSummary {
    /// Frames written.
    pub frames: usize,
    /// Bytes written, headers included.
    pub bytes: u64,
    /// Wall time.
    pub elapsed: Duration,
}

/// The YUV4MPEG2 stream header for a clip.
///
/// Only constant-format Gray and YUV clips can carry one.
pub fn y4m_header(info: &VideoInfo) -> Result<String, PipeError> {
    let format = match info.format {
        Some(format) if info.is_constant() => format,
        _ => {
            return Err(PipeError::Unsupported(
                "y4m output needs a constant format and size".to_string(),
            ))
        }
    };
    let bits = format.bits_per_sample;
    let colorspace = match format.color_family {
        ColorFamily::Gray if bits > 8 => format!("mono{}", bits),
        ColorFamily::Gray => "mono".to_string(),
        ColorFamily::Yuv => {
            let sub = match (format.subsampling_w, format.subsampling_h) {
                (1, 1) => "420",
                (1, 0) => "422",
                (0, 0) => "444",
                (2, 2) => "410",
                (2, 0) => "411",
                (0, 1) => "440",
                _ => {
                    return Err(PipeError::Unsupported(format!(
                        "no y4m identifier exists for {}",
                        format.name()
                    )))
                }
            };
            if bits > 8 {
                format!("{}p{}", sub, bits)
            } else {
                sub.to_string()
            }
        }
        ColorFamily::Rgb => {
            return Err(PipeError::Unsupported(
                "y4m headers can only be applied to YUV and Gray clips".to_string(),
            ))
        }
    };
    Ok(format!(
        "YUV4MPEG2 C{} W{} H{} F{}:{} Ip A0:0\n",
        colorspace, info.width, info.height, info.fps_num, info.fps_den
    ))
}

/// Human-readable description of a clip, one `Key: value` per line.
pub fn clip_info(info: &VideoInfo) -> String {
    let mut out = String::new();
    let dim = |v: usize| if v == 0 { "Variable".to_string() } else { v.to_string() };
    out.push_str(&format!("Width: {}\n", dim(info.width)));
    out.push_str(&format!("Height: {}\n", dim(info.height)));
    out.push_str(&format!("Frames: {}\n", info.num_frames));
    if info.fps_den > 0 {
        out.push_str(&format!(
            "FPS: {}/{} ({:.3} fps)\n",
            info.fps_num,
            info.fps_den,
            info.fps_num as f64 / info.fps_den as f64
        ));
    } else {
        out.push_str("FPS: Variable\n");
    }
    match info.format {
        Some(format) => {
            out.push_str(&format!("Format Name: {}\n", format.name()));
            out.push_str(&format!("Color Family: {}\n", format.color_family));
            out.push_str(&format!("Bits: {}\n", format.bits_per_sample));
            out.push_str(&format!("SubSampling W: {}\n", format.subsampling_w));
            out.push_str(&format!("SubSampling H: {}\n", format.subsampling_h));
        }
        None => out.push_str("Format Name: Variable\n"),
    }
    out
}

/// Write every plane of `frame`, row by row, without padding.
pub fn write_frame<W: Write>(out: &mut W, frame: &VideoFrame, y4m: bool) -> Result<u64, PipeError> {
    let mut written = 0u64;
    if y4m {
        out.write_all(b"FRAME\n")?;
        written += 6;
    }
    for plane in 0..frame.num_planes() {
        let height = frame
            .plane_height(plane)
            .map_err(|error| PipeError::Unsupported(error.to_string()))?;
        for row in 0..height {
            let bytes = frame
                .row_bytes(plane, row)
                .map_err(|error| PipeError::Unsupported(error.to_string()))?;
            out.write_all(bytes)?;
            written += bytes.len() as u64;
        }
    }
    Ok(written)
}

/// Write frames `start..=end` of `node` to `out`, in order.
///
/// The first failing frame stops further requests; requests already in
/// flight are drained before the error is returned.
pub fn pipe_node<W: Write>(
    node: &Node,
    out: &mut W,
    options: &PipeOptions,
    tracker: Option<&ProgressTracker>,
) -> Result<PipeSummary, PipeError> {
    let started = Instant::now();
    let info = *node.video_info();
    let y4m = options.format == OutputFormat::Y4m;

    let mut bytes = 0u64;
    if y4m {
        let header = y4m_header(&info)?;
        out.write_all(header.as_bytes())?;
        bytes += header.len() as u64;
    }

    if info.num_frames == 0 {
        out.flush()?;
        return Ok(PipeSummary {
            frames: 0,
            bytes,
            elapsed: started.elapsed(),
        });
    }

    let last = info.num_frames - 1;
    let end = options.end.unwrap_or(last);
    if end > last || options.start > end {
        return Err(PipeError::Unsupported(format!(
            "invalid range {}..={} for a clip with {} frames",
            options.start, end, info.num_frames
        )));
    }

    let total = end - options.start + 1;
    let requests = match options.requests {
        0 => node.core().num_threads(),
        n => n,
    }
    .min(total);

    let (tx, rx) = channel::unbounded::<(usize, FrameResult<VideoFrame>)>();
    let request = |n: usize| {
        let tx = tx.clone();
        node.get_frame_async(n, move |result| {
            // The receiver only goes away once every request is drained.
            let _ = tx.send((n, result));
        });
    };

    log::debug!(
        "piping frames {}..={} of {} with {} requests",
        options.start,
        end,
        node.name(),
        requests
    );

    let mut next_request = options.start;
    for _ in 0..requests {
        request(next_request);
        next_request += 1;
    }
    let mut outstanding = requests;
    let mut next_output = options.start;
    let mut frames = 0usize;
    let mut reorder: BTreeMap<usize, VideoFrame> = BTreeMap::new();
    let mut failure: Option<PipeError> = None;

    while outstanding > 0 {
        let Ok((n, result)) = rx.recv() else {
            break;
        };
        outstanding -= 1;

        match result {
            Ok(frame) if failure.is_none() => {
                reorder.insert(n, frame);
                while let Some(frame) = reorder.remove(&next_output) {
                    match write_frame(out, &frame, y4m) {
                        Ok(written) => bytes += written,
                        Err(error) => {
                            failure = Some(error);
                            break;
                        }
                    }
                    if let Some(tracker) = tracker {
                        tracker.frame_written(next_output);
                    }
                    frames += 1;
                    next_output += 1;
                }
            }
            Ok(_) => {}
            Err(error) => {
                if failure.is_none() {
                    log::error!("frame {} of {} failed: {}", n, node.name(), error);
                    if let Some(tracker) = tracker {
                        tracker.report_error(Some(n), error.to_string());
                    }
                    failure = Some(PipeError::Frame { index: n, error });
                }
            }
        }

        if failure.is_none() && tracker.is_some_and(|t| t.is_cancelled()) {
            failure = Some(PipeError::Cancelled(frames));
        }

        if failure.is_none() && next_request <= end {
            request(next_request);
            next_request += 1;
            outstanding += 1;
        }
    }

    if let Some(error) = failure {
        return Err(error);
    }
    out.flush()?;
    if let Some(tracker) = tracker {
        tracker.complete();
    }

    Ok(PipeSummary {
        frames,
        bytes,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::FrameContext;
    use crate::core::error::FrameError;
    use crate::core::format::Preset;
    use crate::core::node::Filter;
    use crate::execution::engine::Core;

    // Each frame is filled with its own index, after a delay that makes
    // later frames finish first.
    struct Numbered {
        info: VideoInfo,
        fail_on: Option<usize>,
    }

    impl Filter for Numbered {
        fn name(&self) -> &str {
            "Numbered"
        }

        fn video_info(&self) -> VideoInfo {
            self.info
        }

        fn get_frame(&self, n: usize, _ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
            if Some(n) == self.fail_on {
                return Err(FrameError::filter("broken frame"));
            }
            std::thread::sleep(Duration::from_millis(((8 - n % 8) * 2) as u64));
            let format = self.info.format.ok_or_else(|| FrameError::filter("no format"))?;
            let mut frame = VideoFrame::new(format, self.info.width, self.info.height);
            for p in 0..frame.num_planes() {
                frame.plane_mut::<u8>(p)?.fill(n as u8);
            }
            Ok(frame)
        }
    }

    fn numbered(core: &Core, preset: Preset, frames: usize, fail_on: Option<usize>) -> Node {
        let info = VideoInfo::new(core.preset(preset), 4, 2, frames).with_fps(25, 1);
        core.create_node(Numbered { info, fail_on })
    }

    #[test]
    fn test_raw_output_is_ordered() {
        let core = Core::with_threads(4).unwrap();
        let node = numbered(&core, Preset::Gray8, 10, None);
        let mut out = Vec::new();
        let options = PipeOptions {
            requests: 4,
            ..Default::default()
        };
        let summary = pipe_node(&node, &mut out, &options, None).unwrap();

        assert_eq!(summary.frames, 10);
        assert_eq!(out.len(), 10 * 8);
        for (i, chunk) in out.chunks(8).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
    }

    #[test]
    fn test_y4m_output() {
        let core = Core::with_threads(2).unwrap();
        let node = numbered(&core, Preset::Yuv420P8, 2, None);
        let mut out = Vec::new();
        let options = PipeOptions {
            start: 1,
            format: OutputFormat::Y4m,
            ..Default::default()
        };
        let summary = pipe_node(&node, &mut out, &options, None).unwrap();
        let header = "YUV4MPEG2 C420 W4 H2 F25:1 Ip A0:0\n";

        assert_eq!(summary.frames, 1);
        assert!(out.starts_with(header.as_bytes()));
        // 4x2 luma plus two 2x1 chroma planes
        assert_eq!(out.len(), header.len() + 6 + 8 + 2 + 2);
        assert_eq!(summary.bytes, out.len() as u64);
    }

    #[test]
    fn test_y4m_rejects_rgb() {
        let core = Core::with_threads(1).unwrap();
        let node = numbered(&core, Preset::Rgb24, 1, None);
        let options = PipeOptions {
            format: OutputFormat::Y4m,
            ..Default::default()
        };
        let err = pipe_node(&node, &mut Vec::new(), &options, None).unwrap_err();
        assert!(matches!(err, PipeError::Unsupported(_)));
    }

    #[test]
    fn test_error_stops_output() {
        let core = Core::with_threads(2).unwrap();
        let node = numbered(&core, Preset::Gray8, 10, Some(3));
        let mut out = Vec::new();
        let err = pipe_node(&node, &mut out, &PipeOptions::default(), None).unwrap_err();

        match err {
            PipeError::Frame { index, error } => {
                assert_eq!(index, 3);
                assert_eq!(error.message(), "broken frame");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(out.len() <= 3 * 8);
    }

    #[test]
    fn test_invalid_range() {
        let core = Core::with_threads(1).unwrap();
        let node = numbered(&core, Preset::Gray8, 3, None);
        let options = PipeOptions {
            end: Some(3),
            ..Default::default()
        };
        assert!(pipe_node(&node, &mut Vec::new(), &options, None).is_err());
    }

    #[test]
    fn test_progress_reported() {
        let core = Core::with_threads(2).unwrap();
        let node = numbered(&core, Preset::Gray8, 5, None);
        let mut tracker = ProgressTracker::new(5);
        tracker.start();
        pipe_node(&node, &mut Vec::new(), &PipeOptions::default(), Some(&tracker)).unwrap();
        assert_eq!(tracker.frames_written(), 5);
        assert_eq!(tracker.progress_percent(), 100.0);
    }

    #[test]
    fn test_clip_info() {
        let core = Core::with_threads(1).unwrap();
        let node = numbered(&core, Preset::Yuv420P10, 7, None);
        let text = clip_info(node.video_info());
        assert!(text.contains("Frames: 7"));
        assert!(text.contains("Format Name: YUV420P10"));
        assert!(text.contains("FPS: 25/1"));
    }
}
