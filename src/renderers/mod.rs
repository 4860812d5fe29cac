// Copyright @yucwang 2026

pub mod blend;
pub mod compositor;
pub mod filters;
pub mod hull;
pub mod lighting;
pub mod lut_cache;
pub mod renderer;
pub mod resample;
pub mod tonemap;
pub mod transform_sampler;

pub use self::renderer::{CustomOps, RenderOptions, Renderer};
