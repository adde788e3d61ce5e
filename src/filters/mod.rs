//! Filter module.
//!
//! Contains the filter registry and built-in filter implementations.

pub mod builtin;
pub mod registry;

pub use builtin::{
    BlankClip, ExprFilter, FrameEval, ModifyFrame, PlaneDifference, PlaneStats, ShufflePlanes,
};
pub use registry::{Category, FilterConstructor, FilterRegistry, RegistryEntry};
