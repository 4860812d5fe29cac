// Copyright @yucwang 2026

use std::str::FromStr;

use ndarray::{concatenate, Array2, Array5, ArrayView4, Axis};

use crate::core::differentiable::Differentiable;
use crate::core::error::{RenderError, Result};
use crate::core::field::{GridSize, ViewField, VolumeField};
use crate::core::grid_transform::GridTransform;
use crate::kernels::ViewPairing;
use crate::math::constants::{Float, Vector3f};
use crate::renderers::renderer::Renderer;
use crate::sensors::camera::LutDirection;

/// How input and output cells line up along one axis.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Alignment {
    /// Outer cell borders coincide.
    Border,
    /// Outer cell centres coincide.
    Center,
    /// Input border cell centres sit on the output border.
    StaggerInput,
    /// Input borders sit on the output border cell centres.
    StaggerOutput,
}

impl FromStr for Alignment {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BORDER" => Ok(Alignment::Border),
            "CENTER" => Ok(Alignment::Center),
            "STAGGER_INPUT" => Ok(Alignment::StaggerInput),
            "STAGGER_OUTPUT" => Ok(Alignment::StaggerOutput),
            _ => Err(RenderError::Settings(format!("unknown alignment: {}", s))),
        }
    }
}

impl Alignment {
    /// World size of one input cell when the output spans [-1, 1].
    fn cell_scale(self, input: usize, output: usize) -> Float {
        let (i, o) = (input as Float, output as Float);
        match self {
            Alignment::Border => 2.0 / i,
            Alignment::Center => 2.0 / o * (o - 1.0) / (i - 1.0),
            Alignment::StaggerInput => 2.0 / (i - 1.0),
            Alignment::StaggerOutput => 2.0 / (i + 1.0),
        }
    }
}

fn drop_view_axis(sampled: Differentiable<ViewField, VolumeField>) -> Differentiable<VolumeField, VolumeField> {
    sampled.map_output(
        |y| y.index_axis_move(Axis(1), 0),
        |dy: &VolumeField| Ok(dy.clone().insert_axis(Axis(1))),
    )
}

/// Pads `(…, 3)` coordinate tables with a zero level of detail.
fn pad_lookup(luts: &Array5<Float>) -> Result<Array5<Float>> {
    match luts.len_of(Axis(4)) {
        4 => Ok(luts.clone()),
        3 => {
            let (n, d, h, w, _) = luts.dim();
            concatenate(Axis(4), &[luts.view(), Array5::<Float>::zeros((n, d, h, w, 1)).view()])
                .map_err(|e| RenderError::Shape(e.to_string()))
        }
        c => Err(RenderError::Shape(format!("lookup tables must have 3 or 4 channels, have {}", c))),
    }
}

impl Renderer {
    /// Resamples `data` to `target` with per-axis alignment `[x, y, z]`.
    pub fn resample_grid3d_aligned(
        &self,
        data: &VolumeField,
        target: GridSize,
        alignment: [Alignment; 3],
    ) -> Result<Differentiable<VolumeField, VolumeField>> {
        let input = GridSize::of_field(data);
        let scale = Vector3f::new(
            alignment[0].cell_scale(input.width, target.width),
            alignment[1].cell_scale(input.height, target.height),
            alignment[2].cell_scale(input.depth, target.depth),
        );
        if scale.iter().any(|s| !s.is_finite()) {
            return Err(RenderError::Config(format!(
                "alignment {:?} is undefined for {} to {}",
                alignment, input, target
            )));
        }
        let from = GridTransform::centered(input, scale);
        let to = GridTransform::unit_cube(target);
        let sampled = self.sample_transform(data, &[from], &[to], LutDirection::Forward)?;
        Ok(drop_view_axis(sampled))
    }

    /// Samples `data` through lookup tables `(V, D, H, W, 3|4)`. Tables with
    /// three channels get a zero level of detail.
    pub fn sample_lookup(&self, data: &VolumeField, luts: &Array5<Float>, relative: bool, pairing: ViewPairing) -> Result<ViewField> {
        let luts = pad_lookup(luts)?;
        let views: Vec<ArrayView4<Float>> = luts.outer_iter().collect();
        self.kernels()
            .sample_by_lookup(data.view(), &views, &self.settings().sampling_options(), relative, pairing)
    }

    /// Shifts every batch element by its own offset `(x, y, z)` in cells,
    /// producing grids of size `target`.
    pub fn resample_grid3d_offset(&self, data: &VolumeField, offsets: &Array2<Float>, target: GridSize) -> Result<VolumeField> {
        let (count, components) = offsets.dim();
        if components != 3 {
            return Err(RenderError::Shape(format!("shape of offsets must be (N, 3), is {:?}", offsets.shape())));
        }
        let mut luts = Array5::<Float>::zeros((count, target.depth, target.height, target.width, 3));
        for (n, offset) in offsets.outer_iter().enumerate() {
            let mut lut = luts.index_axis_mut(Axis(0), n);
            for mut cell in lut.lanes_mut(Axis(3)) {
                cell.assign(&offset);
            }
        }
        let sampled = self.sample_lookup(data, &luts, true, ViewPairing::Paired)?;
        Ok(sampled.index_axis_move(Axis(1), 0))
    }
}
