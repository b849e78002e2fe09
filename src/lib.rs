#![forbid(unsafe_code)]

pub mod atlas;
pub mod core;
pub mod error;
pub mod interpolate;
pub mod psf;
pub mod renderer;
pub mod resources;
pub mod stack;
pub mod tile;

pub use self::atlas::KernelAtlas;
pub use self::core::{
    ColorPlane, DepthPlane, Eye, EyeMode, Projection, RenderConfig, Resolution,
    dioptres_from_meters,
};
pub use self::error::{AberrateError, AberrateResult};
pub use self::interpolate::{InterpolatedPsfParam, LayerLayout, build_layer_layout, interpolate};
pub use self::psf::{Kernel, Psf};
pub use self::renderer::{FrameStats, Renderer};
pub use self::resources::{FrameResources, RebuildScope};
pub use self::stack::{GridShape, PsfAxes, PsfIndex, PsfParam, PsfStack};
pub use self::tile::{Fragment, TileGrid, TileSortEntry};
