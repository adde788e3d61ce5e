//! Per-pixel expression filter.

use crate::core::args::ArgReader;
use crate::core::context::{FrameContext, FrameRequests};
use crate::core::error::{ArgumentError, ArgumentResult, FrameError, FrameResult};
use crate::core::format::{FormatId, PixelFormat, SampleType};
use crate::core::frame::{PlaneRef, VideoFrame};
use crate::core::node::{Filter, Node, VideoInfo};
use crate::core::props::PropertyMap;
use crate::execution::engine::Core;
use crate::expr::{compile, Machine, Program, SourceRow, Store, MAX_CLIPS};
use crate::filters::builtin::{constant_format, is_expr_sample};

const NAME: &str = "Expr";

enum PlaneOp {
    Eval(Program),
    Copy,
    Undefined,
}

/// Evaluates one compiled expression per plane over up to 26 clips.
pub struct ExprFilter {
    clips: Vec<Node>,
    ops: Vec<PlaneOp>,
    info: VideoInfo,
    format: PixelFormat,
}

fn invalid(message: impl Into<String>) -> ArgumentError {
    ArgumentError::invalid(NAME, message)
}

impl ExprFilter {
    /// Build from validated arguments.
    pub fn from_args(core: &Core, args: &PropertyMap) -> ArgumentResult<Self> {
        let reader = ArgReader::new(NAME, args);
        let clips = reader.nodes("clips")?;
        if clips.len() > MAX_CLIPS {
            return Err(invalid(format!("More than {} input clips provided", MAX_CLIPS)));
        }
        let first = *clips
            .first()
            .ok_or_else(|| ArgumentError::missing(NAME, "clips"))?
            .video_info();

        let mut input = None;
        for clip in &clips {
            let vi = clip.video_info();
            let format = constant_format(NAME, vi)
                .map_err(|_| invalid("Only constant format input allowed"))?;
            let reference = *input.get_or_insert(format);
            if !format.same_layout(&reference) || vi.width != first.width || vi.height != first.height {
                return Err(invalid(
                    "All inputs must have the same number of planes and the same dimensions, subsampling included",
                ));
            }
            if !is_expr_sample(&format) {
                return Err(invalid("Input clips must be 8-16 bit integer or 32 bit float format"));
            }
        }
        let input = input.ok_or_else(|| ArgumentError::missing(NAME, "clips"))?;

        let format = match reader.int("format")? {
            None => input,
            Some(id) => {
                let requested = u32::try_from(id)
                    .ok()
                    .and_then(|id| core.get_format(FormatId(id)).ok())
                    .ok_or_else(|| invalid("Invalid output format"))?;
                if requested.num_planes != input.num_planes {
                    return Err(invalid("The number of planes in the inputs and output must match"));
                }
                let id = core
                    .query_format(
                        input.color_family,
                        requested.sample_type,
                        requested.bits_per_sample,
                        input.subsampling_w,
                        input.subsampling_h,
                    )
                    .map_err(|e| invalid(e.to_string()))?;
                core.get_format(id).map_err(|e| invalid(e.to_string()))?
            }
        };
        if !is_expr_sample(&format) {
            return Err(invalid("Output format must be 8-16 bit integer or 32 bit float"));
        }

        let mut exprs = reader.strings("expr")?;
        if exprs.len() > format.num_planes {
            return Err(invalid("More expressions given than there are planes"));
        }
        while exprs.len() < format.num_planes {
            let last = exprs.last().cloned().unwrap_or_default();
            exprs.push(last);
        }

        let copyable = format.bits_per_sample == input.bits_per_sample
            && format.sample_type == input.sample_type;
        let ops = exprs
            .iter()
            .map(|expr| {
                if !expr.trim().is_empty() {
                    compile(expr, clips.len())
                        .map(PlaneOp::Eval)
                        .map_err(|e| invalid(e.to_string()))
                } else if copyable {
                    Ok(PlaneOp::Copy)
                } else {
                    Ok(PlaneOp::Undefined)
                }
            })
            .collect::<ArgumentResult<Vec<_>>>()?;

        let num_frames = clips.iter().map(Node::num_frames).max().unwrap_or(0);
        let info = VideoInfo::new(format, first.width, first.height, num_frames)
            .with_fps(first.fps_num, first.fps_den);

        Ok(Self {
            clips,
            ops,
            info,
            format,
        })
    }

    fn eval_plane<T: Store>(
        &self,
        program: &Program,
        plane: usize,
        sources: &[&VideoFrame],
        dst: &mut VideoFrame,
    ) -> FrameResult<()> {
        let views = sources
            .iter()
            .map(|frame| SourcePlane::open(frame, plane))
            .collect::<FrameResult<Vec<_>>>()?;
        let max = match self.format.sample_type {
            SampleType::Integer => self.format.max_integer_value() as f32,
            SampleType::Float => f32::MAX,
        };

        let mut out = dst.plane_mut::<T>(plane)?;
        let mut machine = Machine::new(program, out.width());
        let mut rows = Vec::with_capacity(views.len());
        for y in 0..out.height() {
            rows.clear();
            rows.extend(views.iter().map(|v| v.row(y)));
            machine.eval_row(&rows, out.row_mut(y), max);
        }
        Ok(())
    }
}

enum SourcePlane<'a> {
    U8(PlaneRef<'a, u8>),
    U16(PlaneRef<'a, u16>),
    F32(PlaneRef<'a, f32>),
}

impl<'a> SourcePlane<'a> {
    fn open(frame: &'a VideoFrame, plane: usize) -> FrameResult<Self> {
        Ok(match frame.format().bytes_per_sample {
            1 => SourcePlane::U8(frame.plane(plane)?),
            2 => SourcePlane::U16(frame.plane(plane)?),
            _ => SourcePlane::F32(frame.plane(plane)?),
        })
    }

    fn row(&self, y: usize) -> SourceRow<'a> {
        match self {
            SourcePlane::U8(p) => SourceRow::U8(p.row(y)),
            SourcePlane::U16(p) => SourceRow::U16(p.row(y)),
            SourcePlane::F32(p) => SourceRow::F32(p.row(y)),
        }
    }
}

impl Filter for ExprFilter {
    fn name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn dependencies(&self) -> Vec<Node> {
        self.clips.clone()
    }

    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        for clip in &self.clips {
            requests.request_clamped(clip, n);
        }
    }

    fn get_frame(&self, _n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        let sources: Vec<&VideoFrame> = ctx.frames().iter().collect();
        let first = *sources
            .first()
            .ok_or_else(|| FrameError::filter("Expr: missing source frame"))?;

        let mut dst = ctx.new_frame(self.format, self.info.width, self.info.height);
        dst.props_mut()
            .map_err(|e| FrameError::filter(e.to_string()))?
            .merge_from(first.props());

        for (plane, op) in self.ops.iter().enumerate() {
            match op {
                PlaneOp::Eval(program) => match (self.format.sample_type, self.format.bytes_per_sample) {
                    (SampleType::Integer, 1) => self.eval_plane::<u8>(program, plane, &sources, &mut dst)?,
                    (SampleType::Integer, _) => self.eval_plane::<u16>(program, plane, &sources, &mut dst)?,
                    (SampleType::Float, _) => self.eval_plane::<f32>(program, plane, &sources, &mut dst)?,
                },
                PlaneOp::Copy => dst.copy_plane_from(plane, first, plane)?,
                PlaneOp::Undefined => {}
            }
        }
        Ok(dst)
    }
}

pub(super) fn create(core: &Core, args: &PropertyMap) -> ArgumentResult<Node> {
    Ok(core.create_node(ExprFilter::from_args(core, args)?))
}
