//! Plane measurements attached as frame properties.

use crate::core::args::ArgReader;
use crate::core::context::{FrameContext, FrameRequests};
use crate::core::error::{ArgumentError, ArgumentResult, FrameError, FrameResult};
use crate::core::format::{PixelFormat, SampleType};
use crate::core::frame::{Sample, VideoFrame};
use crate::core::node::{Filter, Node, VideoInfo};
use crate::core::props::PropertyMap;
use crate::execution::engine::Core;
use crate::filters::builtin::{constant_format, is_expr_sample, plane_index};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Accum {
    min: f64,
    max: f64,
    sum: f64,
    diff: f64,
}

impl Accum {
    fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            diff: 0.0,
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            diff: self.diff + other.diff,
        }
    }
}

fn accumulate<T>(a: &VideoFrame, b: Option<&VideoFrame>, plane: usize) -> FrameResult<Accum>
where
    T: Sample + Into<f64>,
{
    let pa = a.plane::<T>(plane)?;
    let pb = b.map(|f| f.plane::<T>(plane)).transpose()?;
    let acc = (0..pa.height())
        .into_par_iter()
        .map(|y| {
            let row = pa.row(y);
            let mut acc = Accum::empty();
            for &v in row {
                let v: f64 = v.into();
                acc.min = acc.min.min(v);
                acc.max = acc.max.max(v);
                acc.sum += v;
            }
            if let Some(pb) = &pb {
                acc.diff = row
                    .iter()
                    .zip(pb.row(y))
                    .map(|(&a, &b)| {
                        let (a, b): (f64, f64) = (a.into(), b.into());
                        (a - b).abs()
                    })
                    .sum();
            }
            acc
        })
        .reduce(Accum::empty, Accum::merge);
    Ok(acc)
}

fn measure(format: &PixelFormat, a: &VideoFrame, b: Option<&VideoFrame>, plane: usize) -> FrameResult<Accum> {
    match (format.sample_type, format.bytes_per_sample) {
        (SampleType::Integer, 1) => accumulate::<u8>(a, b, plane),
        (SampleType::Integer, 2) => accumulate::<u16>(a, b, plane),
        (SampleType::Float, 4) => accumulate::<f32>(a, b, plane),
        _ => Err(FrameError::filter(format!("unsupported format {}", format.name()))),
    }
}

fn annotate(frame: &VideoFrame, values: &[(String, f64, bool)]) -> FrameResult<VideoFrame> {
    let mut dst = frame.copy();
    let props = dst
        .props_mut()
        .map_err(|e| FrameError::filter(e.to_string()))?;
    for (key, value, as_int) in values {
        let set = if *as_int {
            props.set_int(key, *value as i64)
        } else {
            props.set_float(key, *value)
        };
        set.map_err(|e| FrameError::filter(e.to_string()))?;
    }
    Ok(dst)
}

/// Minimum, maximum and average of one plane, optionally with the mean
/// absolute difference to a second clip.
///
/// Sets `<prop>Min`, `<prop>Max`, `<prop>Average` and, with `clipb`,
/// `<prop>Diff`. Averages and differences are normalized to `[0, 1]` for
/// integer formats.
pub struct PlaneStats {
    clipa: Node,
    clipb: Option<Node>,
    format: PixelFormat,
    plane: usize,
    prop: String,
}

impl PlaneStats {
    const NAME: &'static str = "PlaneStats";

    /// Build from validated arguments.
    pub fn from_args(args: &PropertyMap) -> ArgumentResult<Self> {
        let reader = ArgReader::new(Self::NAME, args);
        let clipa = reader
            .node("clipa")?
            .ok_or_else(|| ArgumentError::missing(Self::NAME, "clipa"))?;
        let format = constant_format(Self::NAME, clipa.video_info())?;
        if !is_expr_sample(&format) {
            return Err(ArgumentError::invalid(
                Self::NAME,
                "clip must be constant format and of integer 8-16 bit type or 32 bit float",
            ));
        }
        let clipb = reader.node("clipb")?;
        if let Some(clipb) = &clipb {
            let (a, b) = (clipa.video_info(), clipb.video_info());
            if b.format != a.format || b.width != a.width || b.height != a.height {
                return Err(ArgumentError::invalid(
                    Self::NAME,
                    "both clips must have the same format and dimensions",
                ));
            }
        }
        let plane = plane_index(Self::NAME, reader.int("plane")?.unwrap_or(0), format.num_planes)?;
        let prop = reader
            .string("prop")?
            .unwrap_or_else(|| Self::NAME.to_string());
        Ok(Self {
            clipa,
            clipb,
            format,
            plane,
            prop,
        })
    }
}

impl Filter for PlaneStats {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn video_info(&self) -> VideoInfo {
        *self.clipa.video_info()
    }

    fn dependencies(&self) -> Vec<Node> {
        std::iter::once(self.clipa.clone())
            .chain(self.clipb.clone())
            .collect()
    }

    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        requests.request(&self.clipa, n);
        if let Some(clipb) = &self.clipb {
            requests.request_clamped(clipb, n);
        }
    }

    fn get_frame(&self, _n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        let a = ctx
            .frame(0)
            .ok_or_else(|| FrameError::filter("PlaneStats: missing source frame"))?;
        let b = ctx.frame(1);
        let acc = measure(&self.format, a, b, self.plane)?;

        let pixels = (a.plane_width(self.plane)? * a.plane_height(self.plane)?).max(1) as f64;
        let (scale, integer) = match self.format.sample_type {
            SampleType::Integer => (self.format.max_integer_value() as f64, true),
            SampleType::Float => (1.0, false),
        };
        let mut values = vec![
            (format!("{}Min", self.prop), acc.min, integer),
            (format!("{}Max", self.prop), acc.max, integer),
            (format!("{}Average", self.prop), acc.sum / (pixels * scale), false),
        ];
        if b.is_some() {
            values.push((format!("{}Diff", self.prop), acc.diff / (pixels * scale), false));
        }
        annotate(a, &values)
    }
}

/// Normalized sum of absolute differences between one plane of two clips.
pub struct PlaneDifference {
    clips: [Node; 2],
    format: PixelFormat,
    plane: usize,
    prop: String,
}

impl PlaneDifference {
    const NAME: &'static str = "PlaneDifference";

    /// Build from validated arguments.
    pub fn from_args(args: &PropertyMap) -> ArgumentResult<Self> {
        let reader = ArgReader::new(Self::NAME, args);
        let clips: [Node; 2] = reader.nodes("clips")?.try_into().map_err(|_| {
            ArgumentError::invalid(Self::NAME, "exactly two clips are required as input")
        })?;

        let wrong_format = || {
            ArgumentError::invalid(
                Self::NAME,
                "clips must be the same format, constant format and of integer 8-16 bit type",
            )
        };
        let (a, b) = (clips[0].video_info(), clips[1].video_info());
        let format = constant_format(Self::NAME, a).map_err(|_| wrong_format())?;
        if b.format != a.format
            || b.width != a.width
            || b.height != a.height
            || format.sample_type != SampleType::Integer
            || format.bits_per_sample > 16
        {
            return Err(wrong_format());
        }

        let plane = plane_index(Self::NAME, reader.int("plane")?.unwrap_or(0), format.num_planes)?;
        let prop = reader
            .string("prop")?
            .unwrap_or_else(|| Self::NAME.to_string());
        Ok(Self {
            clips,
            format,
            plane,
            prop,
        })
    }
}

impl Filter for PlaneDifference {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn video_info(&self) -> VideoInfo {
        *self.clips[0].video_info()
    }

    fn dependencies(&self) -> Vec<Node> {
        self.clips.to_vec()
    }

    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        requests.request(&self.clips[0], n);
        requests.request_clamped(&self.clips[1], n);
    }

    fn get_frame(&self, _n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        let (a, b) = match ctx.frames() {
            [a, b] => (a, b),
            _ => return Err(FrameError::filter("PlaneDifference: missing source frame")),
        };
        let acc = measure(&self.format, a, Some(b), self.plane)?;
        let pixels = (a.plane_width(self.plane)? * a.plane_height(self.plane)?).max(1) as f64;
        let value = acc.diff / (pixels * self.format.max_integer_value() as f64);
        annotate(a, &[(self.prop.clone(), value, false)])
    }
}

pub(super) fn create_stats(core: &Core, args: &PropertyMap) -> ArgumentResult<Node> {
    Ok(core.create_node(PlaneStats::from_args(args)?))
}

pub(super) fn create_difference(core: &Core, args: &PropertyMap) -> ArgumentResult<Node> {
    Ok(core.create_node(PlaneDifference::from_args(args)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::Preset;
    use crate::filters::builtin::testing::{blank, expr};

    fn stats(core: &Core, clipa: Node, clipb: Option<Node>, plane: i64) -> ArgumentResult<Node> {
        let mut args = PropertyMap::new();
        args.set_node("clipa", clipa).unwrap();
        if let Some(clipb) = clipb {
            args.set_node("clipb", clipb).unwrap();
        }
        args.set_int("plane", plane).unwrap();
        core.invoke("PlaneStats", &args)
    }

    fn difference(core: &Core, clips: Vec<Node>, prop: &str) -> ArgumentResult<Node> {
        let mut args = PropertyMap::new();
        args.set("clips", clips).unwrap();
        args.set("prop", prop).unwrap();
        core.invoke("PlaneDifference", &args)
    }

    #[test]
    fn test_stats_against_second_clip() {
        let core = Core::with_threads(2).unwrap();
        let base = blank(&core, Preset::Gray8, 4, 4, &[0.0]);
        let bright = expr(&core, vec![base.clone()], vec!["x 255 +"]).unwrap();
        let node = stats(&core, bright, Some(base), 0).unwrap();
        let frame = node.get_frame(0).unwrap();
        let props = frame.props();
        assert_eq!(props.get_int("PlaneStatsMin", 0).unwrap(), 255);
        assert_eq!(props.get_int("PlaneStatsMax", 0).unwrap(), 255);
        assert_eq!(props.get_float("PlaneStatsAverage", 0).unwrap(), 1.0);
        assert_eq!(props.get_float("PlaneStatsDiff", 0).unwrap(), 1.0);
        assert!(props.contains_key("_DurationNum"));
    }

    #[test]
    fn test_stats_float_and_chroma_plane() {
        let core = Core::with_threads(1).unwrap();
        let clip = blank(&core, Preset::Yuv444PS, 4, 2, &[0.25, 0.5, -0.5]);
        let frame = stats(&core, clip.clone(), None, 2).unwrap().get_frame(0).unwrap();
        assert_eq!(frame.props().get_float("PlaneStatsMin", 0).unwrap(), -0.5);
        assert_eq!(frame.props().get_float("PlaneStatsAverage", 0).unwrap(), -0.5);
        assert!(!frame.props().contains_key("PlaneStatsDiff"));

        assert!(stats(&core, clip, None, 3).is_err());
    }

    #[test]
    fn test_difference_between_identical_clips_is_zero() {
        let core = Core::with_threads(1).unwrap();
        let a = blank(&core, Preset::Yuv420P10, 8, 8, &[64.0, 512.0, 512.0]);
        let b = blank(&core, Preset::Yuv420P10, 8, 8, &[64.0, 512.0, 512.0]);
        let node = difference(&core, vec![a, b], "Diff0").unwrap();
        let frame = node.get_frame(3).unwrap();
        assert_eq!(frame.props().get_float("Diff0", 0).unwrap(), 0.0);
    }

    #[test]
    fn test_difference_normalized() {
        let core = Core::with_threads(1).unwrap();
        let a = blank(&core, Preset::Gray16, 4, 4, &[65535.0]);
        let b = blank(&core, Preset::Gray16, 4, 4, &[0.0]);
        let node = difference(&core, vec![a, b], "PlaneDifference").unwrap();
        let frame = node.get_frame(0).unwrap();
        assert_eq!(frame.props().get_float("PlaneDifference", 0).unwrap(), 1.0);
    }

    #[test]
    fn test_difference_validation() {
        let core = Core::with_threads(1).unwrap();
        let a = blank(&core, Preset::Gray8, 4, 4, &[]);
        let b = blank(&core, Preset::Gray16, 4, 4, &[]);
        let f = blank(&core, Preset::GrayS, 4, 4, &[]);
        assert!(difference(&core, vec![a.clone()], "d").is_err());
        assert!(difference(&core, vec![a.clone(), b], "d").is_err());
        assert!(difference(&core, vec![f.clone(), f], "d").is_err());
        assert!(difference(&core, vec![a.clone(), a.clone(), a], "d").is_err());
    }
}
