// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::Axis;

use crate::core::differentiable::Differentiable;
use crate::core::error::{RenderError, Result};
use crate::core::field::{GridSize, VolumeField};
use crate::core::grid_transform::GridTransform;
use crate::kernels::{with_zero_field, BlendMode, RaymarchOptions};
use crate::renderers::renderer::Renderer;
use crate::renderers::transform_sampler::{batch_models, common_resolution, plan_steps, scale_channels, StepPlan, StepScale};
use crate::sensors::camera::Camera;

impl Renderer {
    fn raymarch_options(&self, blend_mode: BlendMode) -> RaymarchOptions {
        RaymarchOptions {
            interpolation: self.settings().filter_mode,
            boundary: self.settings().boundary_mode,
            blend_mode,
            global_sampling: self.settings().global_sampling,
        }
    }

    /// Samples and blends `data` `(N, D, H, W, C)` into images
    /// `(N, V, H', W', C)` in one pass with the configured blend mode.
    pub fn raymarch_camera(
        &self,
        data: &VolumeField,
        transforms: &[GridTransform],
        cameras: &[Arc<Camera>],
        step: Option<&StepScale>,
    ) -> Result<Differentiable<VolumeField, VolumeField>> {
        let blend_mode = self.settings().blend_mode;
        if !blend_mode.is_fusable() {
            return Err(RenderError::Config(format!("blend mode {} can not be ray-marched", blend_mode)));
        }
        let batch = data.len_of(Axis(0));
        let channels = data.len_of(Axis(4));
        let models = batch_models(transforms, batch)?;
        let camera_size = common_resolution(cameras)?;

        let factors = match plan_steps(step, channels, cameras) {
            StepPlan::None => None,
            StepPlan::Before(factors) => Some(factors),
            StepPlan::After(_) => {
                let steps: Vec<_> = cameras.iter().map(|c| c.depth_step()).collect();
                return Err(RenderError::Config(format!(
                    "all cameras must have the same step size for batched rendering: {:?}",
                    steps
                )));
            }
        };
        let input = Arc::new(match &factors {
            Some(factors) => scale_channels(data, factors),
            None => data.clone(),
        });

        let views: Vec<_> = cameras.iter().map(|c| c.view_params()).collect();
        let options = self.raymarch_options(blend_mode);
        let output = self.kernels().raymarch(input.view(), &models, &views, camera_size, &options)?;
        if !self.settings().sample_gradients {
            return Ok(Differentiable::constant(output));
        }

        let kernels = Arc::clone(self.kernels());
        let forward = Arc::new(output.clone());
        Ok(Differentiable::new(output, move |dy: &VolumeField| {
            let dx = kernels.raymarch_grad(input.view(), forward.view(), dy.view(), &models, &views, camera_size, &options)?;
            Ok(match &factors {
                Some(factors) => scale_channels(&dx, factors),
                None => dx,
            })
        }))
    }

    /// Scatters images `(N, V, H, W, C)` of `cameras` back into the grid of
    /// `transforms`, summing over views. Only defined for additive blending.
    pub fn raymarch_camera_inverse(
        &self,
        images: &VolumeField,
        transforms: &[GridTransform],
        cameras: &[Arc<Camera>],
    ) -> Result<VolumeField> {
        let blend_mode = self.settings().blend_mode;
        if blend_mode != BlendMode::Additive {
            return Err(RenderError::Unsupported(format!(
                "inverse ray-marching not possible for blend mode {}",
                blend_mode
            )));
        }
        let (batch, views, height, width, channels) = images.dim();
        if cameras.len() != views {
            return Err(RenderError::Shape(format!(
                "number of cameras and data view dimension mismatch: {} - {}",
                cameras.len(),
                views
            )));
        }
        let models = batch_models(transforms, batch)?;
        let camera_size = common_resolution(cameras)?;
        let grid = transforms[0].grid_size();
        let output_size = GridSize::new(camera_size.depth, height, width);
        let view_params: Vec<_> = cameras.iter().map(|c| c.view_params()).collect();
        let options = self.raymarch_options(blend_mode);

        with_zero_field((batch, grid.depth, grid.height, grid.width, channels), |zero| {
            self.kernels()
                .raymarch_grad(zero, images.view(), images.view(), &models, &view_params, output_size, &options)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::RendererSettings;
    use crate::kernels::MipMode;
    use crate::math::constants::Float;
    use ndarray::Array5;

    fn renderer(blend_mode: BlendMode) -> Renderer {
        Renderer::cpu(RendererSettings { mip_mode: MipMode::None, blend_mode, fused: true, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_identity_additive_raymarch_sums_depth() {
        let size = GridSize::cube(4);
        let data = Array5::from_shape_fn((1, 4, 4, 4, 1), |(_, k, j, i, _)| (k + j + i) as Float * 0.1);
        let transforms = vec![GridTransform::unit_cube(size)];
        let cameras = vec![Arc::new(Camera::identity(size))];
        let image = renderer(BlendMode::Additive)
            .raymarch_camera(&data, &transforms, &cameras, Some(&StepScale::render_default()))
            .unwrap();
        let expected: Float = (0..4).map(|k| data[[0, k, 2, 1, 0]]).sum::<Float>() * 0.5;
        assert!((image.output()[[0, 0, 2, 1, 0]] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_mixed_steps_are_rejected() {
        let size = GridSize::cube(4);
        let data = Array5::<Float>::zeros((1, 4, 4, 4, 1));
        let transforms = vec![GridTransform::unit_cube(size)];
        let cameras = vec![
            Arc::new(Camera::identity(size)),
            Arc::new(Camera::identity(size).with_depth_step(0.1)),
        ];
        let result = renderer(BlendMode::Additive).raymarch_camera(&data, &transforms, &cameras, Some(&StepScale::render_default()));
        assert!(matches!(result, Err(RenderError::Config(_))));
        assert!(renderer(BlendMode::Additive).raymarch_camera(&data, &transforms, &cameras, None).is_ok());
    }

    #[test]
    fn test_inverse_raymarch_scatters_images() {
        let size = GridSize::cube(4);
        let transforms = vec![GridTransform::unit_cube(size)];
        let cameras = vec![Arc::new(Camera::identity(size))];
        let images = Array5::<Float>::ones((1, 1, 4, 4, 1));
        let volume = renderer(BlendMode::Additive).raymarch_camera_inverse(&images, &transforms, &cameras).unwrap();
        assert_eq!(volume.shape(), &[1, 4, 4, 4, 1]);
        assert!(volume.iter().all(|v| (v - 1.0).abs() < 1e-4));

        let err = renderer(BlendMode::BeerLambert).raymarch_camera_inverse(&images, &transforms, &cameras);
        assert!(matches!(err, Err(RenderError::Unsupported(_))));
    }
}
