// Copyright @yucwang 2026

use std::fmt;

use ndarray::{Array5, ArrayD, Axis, Dimension, Ix5};

use crate::core::error::{RenderError, Result};
use crate::core::grid_transform::GridTransform;
use crate::math::constants::Float;

/// Dense field, axes (batch, depth, height, width, channel).
pub type VolumeField = Array5<Float>;
/// Resampled field with a view axis: (batch, view, depth, height, width, channel).
pub type ViewField = ndarray::Array6<Float>;
/// Image batch, axes (batch, height, width, channel).
pub type ImageBatch = ndarray::Array4<Float>;

/// Spatial resolution of a grid or camera frustum.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl GridSize {
    pub fn new(depth: usize, height: usize, width: usize) -> Self {
        Self { depth, height, width }
    }

    pub fn cube(size: usize) -> Self {
        Self::new(size, size, size)
    }

    pub fn of_field(field: &VolumeField) -> Self {
        let shape = field.shape();
        Self::new(shape[1], shape[2], shape[3])
    }

    pub fn voxel_count(&self) -> usize {
        self.depth * self.height * self.width
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.depth, self.height, self.width]
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_count() == 0
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.depth, self.height, self.width)
    }
}

/// Checks the rank of a dynamically shaped field and converts it.
pub fn into_field(data: ArrayD<Float>) -> Result<VolumeField> {
    let rank = data.ndim();
    data.into_dimensionality::<Ix5>()
        .map_err(|_| RenderError::Shape(format!("data must be 5D (NDHWC), is {}", rank)))
}

pub fn channels(field: &VolumeField) -> usize {
    field.len_of(Axis(4))
}

/// A batch of density grids sharing one grid transform.
#[derive(Debug, Clone)]
pub struct DensityVolume {
    pub data: VolumeField,
    pub transform: GridTransform,
}

impl DensityVolume {
    pub fn new(data: VolumeField, transform: GridTransform) -> Result<Self> {
        let size = GridSize::of_field(&data);
        if size != transform.grid_size() {
            return Err(RenderError::Shape(format!(
                "density grid {} does not match its transform resolution {}",
                size,
                transform.grid_size()
            )));
        }
        Ok(Self { data, transform })
    }

    pub fn batch_size(&self) -> usize {
        self.data.len_of(Axis(0))
    }
}

/// Resolves channel indices against a channel count. Negative indices wrap,
/// indices outside [-channels, channels) are dropped. Sorted and deduplicated.
pub fn resolve_channel_indices(indices: &[isize], channels: usize) -> Vec<usize> {
    let c = channels as isize;
    let mut resolved: Vec<usize> = indices
        .iter()
        .filter(|&&i| -c <= i && i < c)
        .map(|&i| i.rem_euclid(c) as usize)
        .collect();
    resolved.sort_unstable();
    resolved.dedup();
    resolved
}

/// Logs a warning if the array has non-finite or negative entries.
pub fn check_grid<D: Dimension>(label: &str, data: &ndarray::Array<Float, D>) {
    if data.iter().any(|v| !v.is_finite()) {
        log::warn!("{} with shape {:?} is not finite", label, data.shape());
    } else if data.iter().any(|&v| v < 0.0) {
        log::warn!("{} with shape {:?} is negative", label, data.shape());
    }
}
