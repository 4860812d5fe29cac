// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::{stack, Array3, Array4, Axis, Zip};

use crate::core::error::{RenderError, Result};
use crate::core::field::VolumeField;
use crate::core::grid_transform::GridTransform;
use crate::kernels::BlendMode;
use crate::math::constants::Float;
use crate::renderers::filters::{gaussian_blur_2d, gaussian_blur_3d};
use crate::renderers::renderer::Renderer;
use crate::renderers::transform_sampler::CameraSampling;
use crate::sensors::camera::{Camera, LutDirection};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HullParams {
    pub image_blur: Float,
    pub grid_blur: Float,
    pub threshold: Float,
    pub soft_blur: Float,
}

impl Default for HullParams {
    fn default() -> Self {
        Self { image_blur: 0.0, grid_blur: 0.0, threshold: 0.5, soft_blur: 0.0 }
    }
}

fn binarize<D: ndarray::Dimension>(data: &mut ndarray::Array<Float, D>, threshold: Float) {
    data.mapv_inplace(|v| if v >= threshold { 1.0 } else { 0.0 });
}

impl Renderer {
    /// Back-projects masks `(V, H, W, C)`, one per camera, into the grid of
    /// `transform`. Each mask is extended along the camera depth and inverse
    /// sampled; the results are combined with `combine` (minimum if `None`),
    /// starting from ones.
    pub fn unproject(
        &self,
        transform: &GridTransform,
        targets: &Array4<Float>,
        cameras: &[Arc<Camera>],
        combine: Option<&dyn Fn(Float, Float) -> Float>,
    ) -> Result<VolumeField> {
        let (views, height, width, channels) = targets.dim();
        if views != cameras.len() {
            return Err(RenderError::Shape(format!(
                "number of cameras and targets mismatch: {} - {}",
                cameras.len(),
                views
            )));
        }
        let grid = transform.grid_size();
        let mut hull = VolumeField::ones((1, grid.depth, grid.height, grid.width, channels));
        let transforms = [transform.clone()];

        for (target, camera) in targets.outer_iter().zip(cameras) {
            let resolution = camera.resolution();
            if resolution.height != height || resolution.width != width {
                return Err(RenderError::Shape(format!(
                    "target of size [{}, {}] does not match camera {}",
                    height, width, resolution
                )));
            }
            let frustum = target
                .broadcast((1, resolution.depth, height, width, channels))
                .ok_or_else(|| RenderError::Shape("cannot extend target along depth".to_string()))?
                .to_owned();
            let sampled = self
                .sample_camera(&frustum, &transforms, std::slice::from_ref(camera), LutDirection::Inverse, &CameraSampling::default())?
                .into_output();
            let unprojection = sampled.slice(ndarray::s![0, 0, .., .., .., ..]);
            Zip::from(hull.index_axis_mut(Axis(0), 0)).and(&unprojection).for_each(|h, &u| {
                *h = match combine {
                    Some(f) => f(*h, u),
                    None => h.min(u),
                };
            });
        }
        Ok(hull)
    }

    /// Projects a hull `(1, D, H, W, C)` into every camera with MAX blending.
    /// Returns masks `(V, H, W, C)`.
    pub fn project_hull(&self, hull: &VolumeField, transform: &GridTransform, cameras: &[Arc<Camera>]) -> Result<Array4<Float>> {
        let transforms = [transform.clone()];
        let mut masks: Vec<Array3<Float>> = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let sampling = CameraSampling { allow_static: false, ..Default::default() };
            let frustum = self
                .sample_camera(hull, &transforms, std::slice::from_ref(camera), LutDirection::Forward, &sampling)?
                .into_output()
                .index_axis_move(Axis(0), 0);
            let mask = self.blend_grid(&frustum, Some(BlendMode::Max), false)?.into_output();
            masks.push(mask.slice(ndarray::s![0, 0, .., .., ..]).to_owned());
        }
        let views: Vec<_> = masks.iter().map(|m| m.view()).collect();
        stack(Axis(0), &views).map_err(|e| RenderError::Shape(e.to_string()))
    }

    /// Visual hull of silhouettes `(V, H, W, C)`. Returns the hull and its
    /// re-projected masks.
    pub fn visual_hull(
        &self,
        transform: &GridTransform,
        targets: &Array4<Float>,
        cameras: &[Arc<Camera>],
        params: &HullParams,
    ) -> Result<(VolumeField, Array4<Float>)> {
        let mut target_hulls = gaussian_blur_2d(targets, params.image_blur);
        binarize(&mut target_hulls, params.threshold);

        let hull = self.unproject(transform, &target_hulls, cameras, None)?;
        let mut hull = gaussian_blur_3d(&hull, params.grid_blur);
        binarize(&mut hull, params.threshold);
        let hull = gaussian_blur_3d(&hull, params.soft_blur);

        let masks = self.project_hull(&hull, transform, cameras)?;
        Ok((hull, masks))
    }
}
