//! Built-in filter implementations.
//!
//! These are the filters every core knows by name. `ModifyFrame` and
//! `FrameEval` are closure based and only reachable from Rust.

mod blank_clip;
mod expr;
mod modify_frame;
mod plane_stats;
mod shuffle_planes;

use crate::core::error::{ArgumentError, ArgumentResult};
use crate::core::format::{PixelFormat, SampleType};
use crate::core::node::{Node, VideoInfo};
use crate::core::props::PropertyMap;
use crate::execution::engine::Core;
use crate::filters::registry::{Category, FilterRegistry};

pub use blank_clip::BlankClip;
pub use expr::ExprFilter;
pub use modify_frame::{FrameEval, ModifyFrame};
pub use plane_stats::{PlaneDifference, PlaneStats};
pub use shuffle_planes::ShufflePlanes;

type Constructor = fn(&Core, &PropertyMap) -> ArgumentResult<Node>;

const BUILTINS: [(&str, &str, Category, &str, Constructor); 5] = [
    (
        "BlankClip",
        "clip:vnode:opt;width:int:opt;height:int:opt;format:int:opt;length:int:opt;fpsnum:int:opt;fpsden:int:opt;color:float[]:opt;keep:int:opt;",
        Category::Source,
        "Clip filled with a single color",
        blank_clip::create,
    ),
    (
        "Expr",
        "clips:vnode[];expr:data[];format:int:opt;",
        Category::Math,
        "Evaluate a postfix expression for every pixel",
        expr::create,
    ),
    (
        "PlaneStats",
        "clipa:vnode;clipb:vnode:opt;plane:int:opt;prop:data:opt;",
        Category::Analysis,
        "Minimum, maximum and average of a plane",
        plane_stats::create_stats,
    ),
    (
        "PlaneDifference",
        "clips:vnode[];plane:int:opt;prop:data:opt;",
        Category::Analysis,
        "Normalized absolute difference between two planes",
        plane_stats::create_difference,
    ),
    (
        "ShufflePlanes",
        "clips:vnode[];planes:int[];colorfamily:data;",
        Category::Channel,
        "Build a clip from planes of up to three clips",
        shuffle_planes::create,
    ),
];

/// Register all built-in filters.
pub fn register_all(registry: &mut FilterRegistry) {
    for (name, signature, category, description, constructor) in BUILTINS {
        if let Err(e) = registry.register(name, signature, category, description, constructor) {
            log::error!("failed to register {}: {}", name, e);
        }
    }
}

/// Declared format of a clip, or an error if it has none yet.
pub(crate) fn constant_format(filter: &str, info: &VideoInfo) -> ArgumentResult<PixelFormat> {
    match info.format {
        Some(format) if info.is_constant() => Ok(format),
        _ => Err(ArgumentError::invalid(
            filter,
            "only clips with constant format and dimensions are allowed",
        )),
    }
}

/// Integer of 8 to 16 bits, or 32-bit float.
pub(crate) fn is_expr_sample(format: &PixelFormat) -> bool {
    match format.sample_type {
        SampleType::Integer => (8..=16).contains(&format.bits_per_sample),
        SampleType::Float => format.bits_per_sample == 32,
    }
}

/// Validate a plane index argument.
pub(crate) fn plane_index(filter: &str, plane: i64, num_planes: usize) -> ArgumentResult<usize> {
    usize::try_from(plane)
        .ok()
        .filter(|&p| p < num_planes)
        .ok_or_else(|| ArgumentError::invalid(filter, "invalid plane specified"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for building argument maps in tests.

    use super::*;
    use crate::core::format::Preset;

    pub fn blank(core: &Core, preset: Preset, width: i64, height: i64, color: &[f64]) -> Node {
        let mut args = PropertyMap::new();
        args.set_int("width", width).unwrap();
        args.set_int("height", height).unwrap();
        args.set_int("format", preset.id().0 as i64).unwrap();
        args.set_int("length", 10).unwrap();
        if !color.is_empty() {
            args.set("color", color.to_vec()).unwrap();
        }
        core.invoke("BlankClip", &args).unwrap()
    }

    pub fn expr(core: &Core, clips: Vec<Node>, exprs: Vec<&str>) -> ArgumentResult<Node> {
        let mut args = PropertyMap::new();
        args.set("clips", clips).unwrap();
        args.set("expr", exprs).unwrap();
        core.invoke("Expr", &args)
    }
}
