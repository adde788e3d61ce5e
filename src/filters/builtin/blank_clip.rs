//! Solid color source.

use crate::core::args::ArgReader;
use crate::core::context::FrameContext;
use crate::core::error::{ArgumentError, ArgumentResult, FrameError, FrameResult};
use crate::core::format::{FormatId, PixelFormat, Preset, SampleType};
use crate::core::frame::VideoFrame;
use crate::core::node::{CacheMode, Filter, Node, VideoInfo};
use crate::core::props::PropertyMap;
use crate::execution::engine::Core;

const NAME: &str = "BlankClip";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fill {
    Int(u32),
    Half(half::f16),
    Float(f32),
}

/// A clip whose every frame is one solid color.
///
/// By default each requested frame is rendered and cached. With `keep` set a
/// single frame is rendered up front and every request returns that same frame.
pub struct BlankClip {
    info: VideoInfo,
    format: PixelFormat,
    colors: Vec<Fill>,
    kept: Option<VideoFrame>,
}

impl BlankClip {
    /// Build from validated arguments.
    pub fn from_args(core: &Core, args: &PropertyMap) -> ArgumentResult<Self> {
        let reader = ArgReader::new(NAME, args);
        let template = reader.node("clip")?.map(|clip| *clip.video_info());

        let width = match reader.int("width")? {
            Some(w) => w,
            None => template.map_or(640, |vi| vi.width as i64),
        };
        let height = match reader.int("height")? {
            Some(h) => h,
            None => template.map_or(480, |vi| vi.height as i64),
        };
        let fps_num = reader.int("fpsnum")?.unwrap_or(template.map_or(24, |vi| vi.fps_num));
        let fps_den = reader.int("fpsden")?.unwrap_or(template.map_or(1, |vi| vi.fps_den));
        if fps_num < 1 || fps_den < 1 {
            return Err(ArgumentError::invalid(NAME, "Invalid framerate specified"));
        }

        let format = match reader.int("format")? {
            Some(id) => u32::try_from(id)
                .ok()
                .and_then(|id| core.get_format(FormatId(id)).ok()),
            None => match template {
                Some(vi) => vi.format,
                None => Some(core.preset(Preset::Rgb24)),
            },
        }
        .ok_or_else(|| ArgumentError::invalid(NAME, "Invalid format"))?;

        let length = match reader.int("length")? {
            Some(len) => len,
            None => match template {
                Some(vi) => vi.num_frames as i64,
                None => fps_num
                    .checked_mul(10)
                    .map(|frames| frames / fps_den)
                    .ok_or_else(|| ArgumentError::invalid(NAME, "Invalid length"))?,
            },
        };

        if width <= 0 || width % (1 << format.subsampling_w) != 0 {
            return Err(ArgumentError::invalid(NAME, "Invalid width"));
        }
        if height <= 0 || height % (1 << format.subsampling_h) != 0 {
            return Err(ArgumentError::invalid(NAME, "Invalid height"));
        }
        if length < 0 {
            return Err(ArgumentError::invalid(NAME, "Invalid length"));
        }

        let colors = parse_colors(&format, &reader.floats("color")?)?;
        let keep = reader.int("keep")?.unwrap_or(0) != 0;

        let info = VideoInfo::new(format, width as usize, height as usize, length as usize)
            .with_fps(fps_num, fps_den);
        let mut filter = Self {
            info,
            format,
            colors,
            kept: None,
        };
        if keep {
            let frame = filter
                .render()
                .map_err(|e| ArgumentError::invalid(NAME, e.to_string()))?;
            filter.kept = Some(frame.freeze());
        }
        Ok(filter)
    }

    fn render(&self) -> FrameResult<VideoFrame> {
        let mut frame = VideoFrame::new(self.format, self.info.width, self.info.height);
        for (plane, fill) in self.colors.iter().enumerate() {
            match (self.format.bytes_per_sample, *fill) {
                (1, Fill::Int(v)) => frame.plane_mut::<u8>(plane)?.fill(v as u8),
                (2, Fill::Int(v)) => frame.plane_mut::<u16>(plane)?.fill(v as u16),
                (2, Fill::Half(v)) => frame.plane_mut::<u16>(plane)?.fill(v.to_bits()),
                (4, Fill::Int(v)) => frame.plane_mut::<u32>(plane)?.fill(v),
                (4, Fill::Float(v)) => frame.plane_mut::<f32>(plane)?.fill(v),
                _ => return Err(FrameError::filter("BlankClip: unsupported sample size")),
            }
        }
        frame
            .props_mut()
            .and_then(|props| {
                props.set_int("_DurationNum", self.info.fps_den)?;
                props.set_int("_DurationDen", self.info.fps_num)
            })
            .map_err(|e| FrameError::filter(e.to_string()))?;
        Ok(frame)
    }
}

fn parse_colors(format: &PixelFormat, values: &[f64]) -> ArgumentResult<Vec<Fill>> {
    let planes = format.num_planes;
    let values = match values.len() {
        0 => vec![0.0; planes],
        1 => vec![values[0]; planes],
        n if n == planes => values.to_vec(),
        _ => {
            return Err(ArgumentError::invalid(
                NAME,
                "invalid number of color values specified",
            ))
        }
    };

    let out_of_range = || ArgumentError::invalid(NAME, "color value out of range");
    values
        .iter()
        .map(|&c| match format.sample_type {
            SampleType::Integer => {
                let v = (c + 0.5) as i64;
                if c < 0.0 || v >= 1i64 << format.bits_per_sample {
                    return Err(out_of_range());
                }
                Ok(Fill::Int(v as u32))
            }
            SampleType::Float if format.bits_per_sample == 16 => {
                let v = half::f16::from_f64(c);
                if !v.is_finite() {
                    return Err(out_of_range());
                }
                Ok(Fill::Half(v))
            }
            SampleType::Float => {
                let v = c as f32;
                if !v.is_finite() {
                    return Err(out_of_range());
                }
                Ok(Fill::Float(v))
            }
        })
        .collect()
}

impl Filter for BlankClip {
    fn name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn get_frame(&self, _n: usize, _ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        match &self.kept {
            Some(frame) => Ok(frame.clone()),
            None => self.render(),
        }
    }

    fn cache_mode(&self) -> CacheMode {
        if self.kept.is_some() {
            CacheMode::NoCache
        } else {
            CacheMode::Cache
        }
    }
}

pub(super) fn create(core: &Core, args: &PropertyMap) -> ArgumentResult<Node> {
    Ok(core.create_node(BlankClip::from_args(core, args)?))
}
