// Copyright @yucwang 2026

use ndarray::{s, Array2, Array3, Array4, ArrayView4, ArrayView5};
use rayon::prelude::*;

use crate::core::field::GridSize;
use crate::kernels::cpu::blending::{blend_ray, blend_ray_grad};
use crate::kernels::cpu::grid::{volume_size, Footprint};
use crate::kernels::cpu::mapping::CoordinateMapping;
use crate::kernels::{BlendMode, CoordinateMode, RaymarchOptions, ViewParams};
use crate::math::constants::{Float, Matrix4f, Vector3f};

/// One ray per image pixel, sampled at every depth slice of the frustum.
pub(crate) struct RayMarcher<'a> {
    volume: ArrayView4<'a, Float>,
    mapping: CoordinateMapping,
    output_size: GridSize,
    options: &'a RaymarchOptions,
}

impl<'a> RayMarcher<'a> {
    pub(crate) fn new(
        volume: ArrayView4<'a, Float>,
        model: &Matrix4f,
        view: &ViewParams,
        output_size: GridSize,
        options: &'a RaymarchOptions,
    ) -> Self {
        let mapping = CoordinateMapping::new(
            model,
            view,
            volume_size(&volume),
            output_size,
            CoordinateMode::TransformLinDepth,
        );
        Self { volume, mapping, output_size, options }
    }

    fn footprint(&self, i: usize, j: usize, k: usize) -> Footprint {
        let q = Vector3f::new(i as Float + 0.5, j as Float + 0.5, k as Float + 0.5);
        Footprint::new(self.mapping.map(q), volume_size(&self.volume), self.options.interpolation, self.options.boundary)
    }

    fn gather_ray(&self, i: usize, j: usize, samples: &mut Array2<Float>) {
        samples.fill(0.0);
        for k in 0..self.output_size.depth {
            let mut row = samples.row_mut(k);
            if let Some(row) = row.as_slice_mut() {
                self.footprint(i, j, k).gather(&self.volume, 1.0, row);
            }
        }
    }

    /// Blended image `(H, W, C)`.
    pub(crate) fn march(&self) -> Array3<Float> {
        let channels = self.volume.shape()[3];
        let (height, width, depth) = (self.output_size.height, self.output_size.width, self.output_size.depth);

        let rows: Vec<Array2<Float>> = (0..height)
            .into_par_iter()
            .map(|j| {
                let mut row = Array2::<Float>::zeros((width, channels));
                let mut samples = Array2::<Float>::zeros((depth, channels));
                let mut pixel = Array2::<Float>::zeros((1, channels));
                for i in 0..width {
                    self.gather_ray(i, j, &mut samples);
                    blend_ray(samples.view(), self.options.blend_mode, false, pixel.view_mut());
                    row.row_mut(i).assign(&pixel.row(0));
                }
                row
            })
            .collect();

        let mut image = Array3::<Float>::zeros((height, width, channels));
        for (j, row) in rows.into_iter().enumerate() {
            image.slice_mut(s![j, .., ..]).assign(&row);
        }
        image
    }

    /// Adds the adjoint of `march` for image gradient `image_grad` (H,W,C)
    /// into `grad` (D,H,W,C). `image` is the forward result.
    pub(crate) fn scatter(&self, image: ArrayView5<Float>, image_grad: ArrayView5<Float>, index: (usize, usize), grad: &mut Array4<Float>) {
        let channels = self.volume.shape()[3];
        let (n, v) = index;
        let depth = self.output_size.depth;
        let additive = self.options.blend_mode == BlendMode::Additive;

        let mut samples = Array2::<Float>::zeros((depth, channels));
        let mut sample_grad = Array2::<Float>::zeros((depth, channels));
        let mut grad_view = grad.view_mut();
        for j in 0..self.output_size.height {
            for i in 0..self.output_size.width {
                let dy = image_grad.slice(s![n, v, j..j + 1, i, ..]);
                if dy.iter().all(|&g| g == 0.0) {
                    continue;
                }
                if !additive {
                    self.gather_ray(i, j, &mut samples);
                }
                let y = image.slice(s![n, v, j..j + 1, i, ..]);
                blend_ray_grad(dy, y, samples.view(), self.options.blend_mode, false, sample_grad.view_mut());
                for k in 0..depth {
                    let row = sample_grad.row(k);
                    if let Some(values) = row.as_slice() {
                        self.footprint(i, j, k).scatter(&mut grad_view, values);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid_transform::GridTransform;

    #[test]
    fn test_additive_march_sums_depth_column() {
        let volume = Array4::<Float>::from_shape_fn((4, 2, 2, 1), |(k, j, i, _)| (k + 2 * j + i) as Float);
        let size = GridSize::new(4, 2, 2);
        let grid = GridTransform::unit_cube(size);
        let options = RaymarchOptions {
            interpolation: crate::kernels::Interpolation::Linear,
            boundary: crate::kernels::BoundaryMode::Border,
            blend_mode: BlendMode::Additive,
            global_sampling: false,
        };
        let marcher = RayMarcher::new(volume.view(), grid.model_matrix(), &ViewParams::identity(), size, &options);
        let image = marcher.march();
        assert_eq!(image.dim(), (2, 2, 1));
        // column (j=1, i=0): sum over k of k + 2
        assert!((image[[1, 0, 0]] - 14.0).abs() < 1e-4);
    }
}
