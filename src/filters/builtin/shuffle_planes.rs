//! Plane rearrangement between clips and color families.

use crate::core::args::ArgReader;
use crate::core::context::{FrameContext, FrameRequests};
use crate::core::error::{ArgumentError, ArgumentResult, FrameError, FrameResult};
use crate::core::format::{ColorFamily, PixelFormat};
use crate::core::frame::VideoFrame;
use crate::core::node::{Filter, Node, VideoInfo};
use crate::core::props::PropertyMap;
use crate::execution::engine::Core;

const NAME: &str = "ShufflePlanes";

fn invalid(message: impl Into<String>) -> ArgumentError {
    ArgumentError::invalid(NAME, message)
}

/// Smallest shift `s` with `full == sub << s`.
fn find_subsampling(full: usize, sub: usize) -> Option<u32> {
    (0..6u32).find(|&s| sub.checked_shl(s) == Some(full))
}

/// Takes plane `planes[i]` of `clips[i]` as output plane `i`.
///
/// Missing clips repeat the last one given. Gray output only uses the first
/// clip and may be built from a clip whose format varies per frame.
pub struct ShufflePlanes {
    clips: Vec<Node>,
    planes: Vec<usize>,
    family: ColorFamily,
    info: VideoInfo,
}

impl ShufflePlanes {
    /// Build from validated arguments.
    pub fn from_args(core: &Core, args: &PropertyMap) -> ArgumentResult<Self> {
        let reader = ArgReader::new(NAME, args);
        let family = reader
            .string("colorfamily")?
            .as_deref()
            .and_then(ColorFamily::from_name)
            .ok_or_else(|| invalid("invalid output colorspace"))?;
        let outplanes = family.num_planes();

        let given = reader.nodes("clips")?;
        let last = given
            .last()
            .cloned()
            .ok_or_else(|| ArgumentError::missing(NAME, "clips"))?;
        if given.len() > outplanes {
            return Err(invalid(format!("1-{} clips need to be specified", outplanes)));
        }
        let mut clips = given;
        clips.resize(outplanes, last);

        let indices = reader.ints("planes")?;
        if indices.len() > outplanes {
            return Err(invalid("too many planes specified"));
        }
        let mut planes = Vec::with_capacity(outplanes);
        for (i, clip) in clips.iter().enumerate() {
            let plane = indices.get(i).copied().unwrap_or(0);
            let num_planes = clip
                .video_info()
                .format
                .map_or(3, |f| f.num_planes as i64);
            if plane < 0 || plane >= num_planes {
                return Err(invalid("invalid plane specified"));
            }
            planes.push(plane as usize);
        }

        let first = *clips[0].video_info();
        let info = if family == ColorFamily::Gray {
            let info = match first.format {
                Some(format) if first.is_constant() => {
                    let gray = core
                        .query_format(
                            ColorFamily::Gray,
                            format.sample_type,
                            format.bits_per_sample,
                            0,
                            0,
                        )
                        .and_then(|id| core.get_format(id))
                        .map_err(|e| invalid(e.to_string()))?;
                    VideoInfo::new(
                        gray,
                        format.plane_width(planes[0], first.width),
                        format.plane_height(planes[0], first.height),
                        first.num_frames,
                    )
                }
                _ => VideoInfo::agnostic(first.num_frames),
            };
            info.with_fps(first.fps_num, first.fps_den)
        } else {
            Self::combined_info(core, family, &clips, &planes)?
        };

        Ok(Self {
            clips,
            planes,
            family,
            info,
        })
    }

    fn combined_info(
        core: &Core,
        family: ColorFamily,
        clips: &[Node],
        planes: &[usize],
    ) -> ArgumentResult<VideoInfo> {
        let mut formats = Vec::with_capacity(clips.len());
        let mut sizes = Vec::with_capacity(clips.len());
        for (clip, &plane) in clips.iter().zip(planes) {
            let vi = clip.video_info();
            let format = match vi.format {
                Some(f) if vi.is_constant() => f,
                _ => return Err(invalid("only clips with constant format and dimensions allowed")),
            };
            sizes.push((format.plane_width(plane, vi.width), format.plane_height(plane, vi.height)));
            formats.push(format);
        }

        if sizes[1] != sizes[2] {
            return Err(invalid("plane 1 and 2 size must match"));
        }
        let subsampling = find_subsampling(sizes[0].0, sizes[1].0).zip(find_subsampling(sizes[0].1, sizes[1].1));
        let (ssw, ssh) = subsampling
            .ok_or_else(|| invalid("plane 1 and 2 not same size or subsampled multiples"))?;

        let reference = formats[0];
        if formats
            .iter()
            .any(|f| f.bits_per_sample != reference.bits_per_sample || f.sample_type != reference.sample_type)
        {
            return Err(invalid("plane 0, 1 and 2 do not have binary compatible storage"));
        }

        let format = core
            .query_format(family, reference.sample_type, reference.bits_per_sample, ssw, ssh)
            .and_then(|id| core.get_format(id))
            .map_err(|e| invalid(e.to_string()))?;
        let first = clips[0].video_info();
        let num_frames = clips.iter().map(Node::num_frames).max().unwrap_or(0);
        Ok(VideoInfo::new(format, sizes[0].0, sizes[0].1, num_frames).with_fps(first.fps_num, first.fps_den))
    }

    fn unique_clips(&self) -> Vec<&Node> {
        let mut unique: Vec<&Node> = Vec::new();
        for clip in &self.clips {
            if !unique.contains(&clip) {
                unique.push(clip);
            }
        }
        unique
    }

    fn gray_format(&self, ctx: &FrameContext<'_>, src: &PixelFormat) -> FrameResult<PixelFormat> {
        if let Some(format) = self.info.format {
            return Ok(format);
        }
        let core = ctx.core();
        core.query_format(ColorFamily::Gray, src.sample_type, src.bits_per_sample, 0, 0)
            .and_then(|id| core.get_format(id))
            .map_err(|e| FrameError::filter(format!("{}: {}", NAME, e)))
    }
}

impl Filter for ShufflePlanes {
    fn name(&self) -> &str {
        NAME
    }

    fn video_info(&self) -> VideoInfo {
        self.info
    }

    fn dependencies(&self) -> Vec<Node> {
        self.unique_clips().into_iter().cloned().collect()
    }

    fn request_frames(&self, n: usize, requests: &mut FrameRequests) {
        for clip in self.unique_clips() {
            requests.request_clamped(clip, n);
        }
    }

    fn get_frame(&self, n: usize, ctx: &mut FrameContext<'_>) -> FrameResult<VideoFrame> {
        let sources = self
            .clips
            .iter()
            .map(|clip| ctx.get_frame(clip, n.min(clip.num_frames().saturating_sub(1))))
            .collect::<FrameResult<Vec<_>>>()?;
        let first = &sources[0];

        let mut dst = if self.family == ColorFamily::Gray {
            let plane = self.planes[0];
            if plane >= first.num_planes() {
                return Err(FrameError::filter(format!(
                    "{}: plane {} does not exist in a {} frame",
                    NAME,
                    plane,
                    first.format().name()
                )));
            }
            let format = self.gray_format(ctx, first.format())?;
            ctx.new_frame(format, first.plane_width(plane)?, first.plane_height(plane)?)
        } else {
            let format = self
                .info
                .format
                .ok_or_else(|| FrameError::filter("ShufflePlanes: output format unknown"))?;
            ctx.new_frame(format, self.info.width, self.info.height)
        };

        dst.props_mut()
            .map_err(|e| FrameError::filter(e.to_string()))?
            .merge_from(first.props());
        for (i, (src, &plane)) in sources.iter().zip(&self.planes).enumerate().take(dst.num_planes()) {
            dst.copy_plane_from(i, src, plane)?;
        }
        Ok(dst)
    }
}

pub(super) fn create(core: &Core, args: &PropertyMap) -> ArgumentResult<Node> {
    Ok(core.create_node(ShufflePlanes::from_args(core, args)?))
}
