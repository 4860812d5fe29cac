// Copyright @yucwang 2026

//! Capability interface of the compute kernels that perform the per-voxel
//! sampling and depth-reduction arithmetic. The renderer core treats every
//! method as a pure function of its arguments.

use std::fmt;
use std::str::FromStr;

use ndarray::{arr0, Array5, Array6, ArrayView4, ArrayView5};

use crate::core::error::{RenderError, Result};
use crate::core::field::GridSize;
use crate::math::constants::{Float, Matrix4f};
use crate::math::frustum::Frustum;

pub mod cpu;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Linear,
}

/// Handling of sample positions outside the source grid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoundaryMode {
    /// Outside samples read zero.
    Border,
    Clamp,
    Wrap,
    Mirror,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MipMode {
    None,
    Nearest,
    Linear,
}

/// Direction and depth parameterisation of a transform sampling pass.
///
/// Forward modes map a grid into a camera frustum, the `Reverse` modes map
/// a frustum-shaped field back into the grid. `LinDepth` modes place depth
/// slices linearly between near and far instead of linearly in NDC depth.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoordinateMode {
    Transform,
    TransformReverse,
    TransformLinDepth,
    TransformLinDepthReverse,
}

impl CoordinateMode {
    pub fn opposite(self) -> Self {
        match self {
            CoordinateMode::Transform => CoordinateMode::TransformReverse,
            CoordinateMode::TransformReverse => CoordinateMode::Transform,
            CoordinateMode::TransformLinDepth => CoordinateMode::TransformLinDepthReverse,
            CoordinateMode::TransformLinDepthReverse => CoordinateMode::TransformLinDepth,
        }
    }

    pub fn is_reverse(self) -> bool {
        matches!(self, CoordinateMode::TransformReverse | CoordinateMode::TransformLinDepthReverse)
    }

    pub fn is_linear_depth(self) -> bool {
        matches!(self, CoordinateMode::TransformLinDepth | CoordinateMode::TransformLinDepthReverse)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlendMode {
    Max,
    Min,
    Mean,
    Additive,
    /// Light attenuated by the inclusive density sum, a sample shadows itself.
    BeerLambert,
    /// Light attenuated by the density in front of the sample only.
    BeerLambertExclusive,
    Alpha,
    AlphaAdditive,
}

impl BlendMode {
    /// Order independent reductions.
    pub fn is_reduction(self) -> bool {
        matches!(self, BlendMode::Max | BlendMode::Min | BlendMode::Mean)
    }

    pub fn is_beer_lambert(self) -> bool {
        matches!(self, BlendMode::BeerLambert | BlendMode::BeerLambertExclusive)
    }

    pub fn is_alpha(self) -> bool {
        matches!(self, BlendMode::Alpha | BlendMode::AlphaAdditive)
    }

    /// Modes the ray-march kernel can evaluate in one pass.
    pub fn is_fusable(self) -> bool {
        !self.is_reduction()
    }
}

/// How the views of a call are paired with the batch elements of the field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ViewPairing {
    /// Every batch element is sampled with every view: `(N, V, ...)`.
    Broadcast,
    /// Batch element `v` is sampled with view `v` only: `(V, 1, ...)`.
    Paired,
}

/// View and projection of one camera, plus the frustum its depth slices span.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewParams {
    pub view: Matrix4f,
    pub projection: Matrix4f,
    pub frustum: Frustum,
}

impl ViewParams {
    pub fn new(view: Matrix4f, projection: Matrix4f, frustum: Frustum) -> Self {
        Self { view, projection, frustum }
    }

    /// Orthographic identity projection over the unit cube.
    pub fn identity() -> Self {
        Self::new(Matrix4f::identity(), Matrix4f::identity(), Frustum::unit_cube())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SamplingOptions {
    pub interpolation: Interpolation,
    pub boundary: BoundaryMode,
    pub mip_mode: MipMode,
    /// Number of downsampled levels below the base level.
    pub mip_count: usize,
    pub mip_bias: Float,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Linear,
            boundary: BoundaryMode::Border,
            mip_mode: MipMode::None,
            mip_count: 0,
            mip_bias: 0.0,
        }
    }
}

impl SamplingOptions {
    pub fn with_mip_bias(&self, mip_bias: Float) -> Self {
        Self { mip_bias, ..*self }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RaymarchOptions {
    pub interpolation: Interpolation,
    pub boundary: BoundaryMode,
    pub blend_mode: BlendMode,
    /// One accumulation pass over all views instead of one pass per view.
    pub global_sampling: bool,
}

pub trait KernelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Samples `field` (N,D,H,W,C) into each view's frame, returning
    /// (N,V,D',H',W',C). `models` holds one matrix per batch element or a
    /// single broadcast matrix.
    fn sample_by_transform(
        &self,
        field: ArrayView5<Float>,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        options: &SamplingOptions,
        mode: CoordinateMode,
        pairing: ViewPairing,
    ) -> Result<Array6<Float>>;

    /// Builds per-view lookup tables (V,D',H',W',4) holding absolute source
    /// coordinates `(x, y, z)` and the level of detail.
    fn build_lookup_table(
        &self,
        input_size: GridSize,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        mode: CoordinateMode,
    ) -> Result<Array5<Float>>;

    /// Samples `field` through lookup tables. With `relative` the table holds
    /// offsets from the output voxel position.
    fn sample_by_lookup(
        &self,
        field: ArrayView5<Float>,
        luts: &[ArrayView4<Float>],
        options: &SamplingOptions,
        relative: bool,
        pairing: ViewPairing,
    ) -> Result<Array6<Float>>;

    fn reduce_blend(&self, field: ArrayView5<Float>, mode: BlendMode, keep_dims: bool) -> Result<Array5<Float>>;

    fn reduce_blend_grad(
        &self,
        output_grad: ArrayView5<Float>,
        output: ArrayView5<Float>,
        input: ArrayView5<Float>,
        mode: BlendMode,
        keep_dims: bool,
    ) -> Result<Array5<Float>>;

    /// Samples and blends along depth in one pass: (N,V,H',W',C).
    fn raymarch(
        &self,
        field: ArrayView5<Float>,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        options: &RaymarchOptions,
    ) -> Result<Array5<Float>>;

    /// Adjoint of `raymarch`: scatters image gradients (N,V,H',W',C) back into
    /// a field of the input's shape. With `BlendMode::Additive` this is
    /// inverse ray-marching and `input`/`output` are not read.
    fn raymarch_grad(
        &self,
        input: ArrayView5<Float>,
        output: ArrayView5<Float>,
        output_grad: ArrayView5<Float>,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        options: &RaymarchOptions,
    ) -> Result<Array5<Float>>;
}

/// Runs `f` on a zero field of `shape` without allocating it. Used for
/// inverse ray-marching, where only the shape of the input is read.
pub fn with_zero_field<T>(
    shape: (usize, usize, usize, usize, usize),
    f: impl FnOnce(ArrayView5<Float>) -> Result<T>,
) -> Result<T> {
    let zero = arr0::<Float>(0.0);
    let view = zero
        .broadcast(shape)
        .ok_or_else(|| RenderError::Shape(format!("cannot broadcast a scalar to {:?}", shape)))?;
    f(view)
}

fn parse_error(kind: &str, value: &str) -> RenderError {
    RenderError::Settings(format!("unknown {}: {}", kind, value))
}

impl FromStr for Interpolation {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NEAREST" => Ok(Interpolation::Nearest),
            "LINEAR" => Ok(Interpolation::Linear),
            _ => Err(parse_error("filter mode", s)),
        }
    }
}

impl FromStr for BoundaryMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BORDER" => Ok(BoundaryMode::Border),
            "CLAMP" => Ok(BoundaryMode::Clamp),
            "WRAP" => Ok(BoundaryMode::Wrap),
            "MIRROR" => Ok(BoundaryMode::Mirror),
            _ => Err(parse_error("boundary mode", s)),
        }
    }
}

impl FromStr for MipMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(MipMode::None),
            "NEAREST" => Ok(MipMode::Nearest),
            "LINEAR" => Ok(MipMode::Linear),
            _ => Err(parse_error("mip mode", s)),
        }
    }
}

impl FromStr for BlendMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MAX" => Ok(BlendMode::Max),
            "MIN" => Ok(BlendMode::Min),
            "MEAN" | "AVERAGE" => Ok(BlendMode::Mean),
            "ADDITIVE" => Ok(BlendMode::Additive),
            "BEER_LAMBERT" => Ok(BlendMode::BeerLambert),
            "BEER_LAMBERT_EXCLUSIVE" => Ok(BlendMode::BeerLambertExclusive),
            "ALPHA" => Ok(BlendMode::Alpha),
            "ALPHA_ADDITIVE" => Ok(BlendMode::AlphaAdditive),
            _ => Err(parse_error("blend mode", s)),
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlendMode::Max => "MAX",
            BlendMode::Min => "MIN",
            BlendMode::Mean => "MEAN",
            BlendMode::Additive => "ADDITIVE",
            BlendMode::BeerLambert => "BEER_LAMBERT",
            BlendMode::BeerLambertExclusive => "BEER_LAMBERT_EXCLUSIVE",
            BlendMode::Alpha => "ALPHA",
            BlendMode::AlphaAdditive => "ALPHA_ADDITIVE",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_mode_round_trips() {
        for mode in [
            CoordinateMode::Transform,
            CoordinateMode::TransformReverse,
            CoordinateMode::TransformLinDepth,
            CoordinateMode::TransformLinDepthReverse,
        ] {
            assert_eq!(mode.opposite().opposite(), mode);
            assert_ne!(mode.opposite().is_reverse(), mode.is_reverse());
            assert_eq!(mode.opposite().is_linear_depth(), mode.is_linear_depth());
        }
    }

    #[test]
    fn test_blend_mode_parsing() {
        assert_eq!("beer_lambert".parse::<BlendMode>().unwrap(), BlendMode::BeerLambert);
        assert_eq!("ALPHA_ADDITIVE".parse::<BlendMode>().unwrap(), BlendMode::AlphaAdditive);
        assert!("SOFTMAX".parse::<BlendMode>().is_err());
        assert_eq!(BlendMode::BeerLambertExclusive.to_string(), "BEER_LAMBERT_EXCLUSIVE");
    }

    #[test]
    fn test_fusable_modes() {
        assert!(BlendMode::Additive.is_fusable());
        assert!(BlendMode::AlphaAdditive.is_fusable());
        assert!(!BlendMode::Mean.is_fusable());
    }
}
