// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::{Array1, Array5, Axis};

use crate::core::differentiable::Differentiable;
use crate::core::error::{RenderError, Result};
use crate::core::field::{resolve_channel_indices, GridSize, ViewField, VolumeField};
use crate::core::grid_transform::GridTransform;
use crate::kernels::{CoordinateMode, KernelBackend, SamplingOptions, ViewPairing, ViewParams};
use crate::math::constants::{Float, Matrix4f};
use crate::renderers::lut_cache::camera_luts;
use crate::renderers::renderer::Renderer;
use crate::sensors::camera::{Camera, LutDirection};

/// Premultiplication of field channels with the camera depth step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepScale {
    /// Scales the whole field.
    Scalar(Float),
    /// Channel indices scaled by each camera's depth step. Negative indices
    /// count from the back, out-of-range ones are ignored.
    Channels(Vec<isize>),
}

impl StepScale {
    /// Step channels used for rendering: light and density.
    pub fn render_default() -> Self {
        StepScale::Channels(vec![0, 1, 2, 3])
    }
}

#[derive(Debug, Clone)]
pub struct CameraSampling {
    /// Use cached lookup tables for static cameras.
    pub allow_static: bool,
    /// A static mismatch is an error instead of a fallback.
    pub force_static: bool,
    pub step: Option<StepScale>,
}

impl Default for CameraSampling {
    fn default() -> Self {
        Self { allow_static: true, force_static: false, step: None }
    }
}

/// Where step scaling happens relative to sampling.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepPlan {
    None,
    /// Per-channel factors applied to the input field.
    Before(Vec<Float>),
    /// Per-view, per-channel factors applied to the sampled field.
    After(Vec<Vec<Float>>),
}

pub(crate) fn plan_steps(step: Option<&StepScale>, channels: usize, cameras: &[Arc<Camera>]) -> StepPlan {
    match step {
        None => StepPlan::None,
        Some(StepScale::Scalar(s)) => StepPlan::Before(vec![*s; channels]),
        Some(StepScale::Channels(indices)) => {
            let selected = resolve_channel_indices(indices, channels);
            if selected.is_empty() || cameras.is_empty() {
                return StepPlan::None;
            }
            let factors = |step: Float| -> Vec<Float> {
                (0..channels).map(|c| if selected.contains(&c) { step } else { 1.0 }).collect()
            };
            let first = cameras[0].depth_step();
            if cameras.iter().all(|c| c.depth_step() == first) {
                StepPlan::Before(factors(first))
            } else {
                StepPlan::After(cameras.iter().map(|c| factors(c.depth_step())).collect())
            }
        }
    }
}

pub(crate) fn scale_channels(data: &VolumeField, factors: &[Float]) -> VolumeField {
    data * &Array1::from(factors.to_vec())
}

fn scale_views(mut data: ViewField, factors: &[Vec<Float>]) -> ViewField {
    for (v, f) in factors.iter().enumerate() {
        let mut view = data.index_axis_mut(Axis(1), v);
        view *= &Array1::from(f.clone());
    }
    data
}

/// One model matrix per batch element, broadcasting a single transform.
pub(crate) fn batch_models(transforms: &[GridTransform], batch: usize) -> Result<Vec<Matrix4f>> {
    match transforms.len() {
        1 => Ok(vec![*transforms[0].model_matrix(); batch]),
        len if len == batch => Ok(transforms.iter().map(|t| *t.model_matrix()).collect()),
        len => Err(RenderError::BatchMismatch { transforms: len, batch }),
    }
}

pub(crate) fn common_resolution(cameras: &[Arc<Camera>]) -> Result<GridSize> {
    let first = cameras
        .first()
        .ok_or_else(|| RenderError::Config("no cameras given".to_string()))?
        .resolution();
    if let Some(other) = cameras.iter().find(|c| c.resolution() != first) {
        return Err(RenderError::MixedResolution(format!("{} and {}", first, other.resolution())));
    }
    Ok(first)
}

fn camera_mode(direction: LutDirection) -> CoordinateMode {
    match direction {
        LutDirection::Forward => CoordinateMode::TransformLinDepth,
        LutDirection::Inverse => CoordinateMode::TransformLinDepthReverse,
    }
}

/// Direct transform sampling. The backward rule samples each batch element's
/// gradient with the opposite mode and sums the view contributions.
pub(crate) fn transform_sampling(
    kernels: &Arc<dyn KernelBackend>,
    data: &VolumeField,
    models: Vec<Matrix4f>,
    views: Vec<ViewParams>,
    output_size: GridSize,
    options: SamplingOptions,
    gradient_options: Option<SamplingOptions>,
    mode: CoordinateMode,
) -> Result<Differentiable<ViewField, VolumeField>> {
    let output = kernels.sample_by_transform(data.view(), &models, &views, output_size, &options, mode, ViewPairing::Broadcast)?;
    let gradient_options = match gradient_options {
        Some(options) => options,
        None => return Ok(Differentiable::constant(output)),
    };

    let kernels = Arc::clone(kernels);
    let input_size = GridSize::of_field(data);
    Ok(Differentiable::new(output, move |dy: &ViewField| {
        let (batch, _, _, _, _, channels) = dy.dim();
        let mut dx = Array5::<Float>::zeros((batch, input_size.depth, input_size.height, input_size.width, channels));
        for i in 0..batch {
            let model = models[if models.len() == 1 { 0 } else { i }];
            let per_view = kernels.sample_by_transform(
                dy.index_axis(Axis(0), i),
                &[model],
                &views,
                input_size,
                &gradient_options,
                mode.opposite(),
                ViewPairing::Paired,
            )?;
            dx.index_axis_mut(Axis(0), i).assign(&per_view.sum_axis(Axis(0)).index_axis(Axis(0), 0));
        }
        Ok(dx)
    }))
}

impl Renderer {
    fn gradient_options(&self) -> Option<SamplingOptions> {
        if self.settings().sample_gradients {
            Some(self.settings().gradient_sampling_options())
        } else {
            None
        }
    }

    fn static_fallback(&self, force_static: bool, reason: &str) -> Result<()> {
        if force_static || self.settings().strict_static {
            return Err(RenderError::StaticMismatch(reason.to_string()));
        }
        log::warn!("Incorrect static camera setup ({}), falling back to transform sampling.", reason);
        Ok(())
    }

    /// Samples a grid into camera frusta (`Forward`) or frustum fields back
    /// into the grid (`Inverse`). Output `(N, V, D', H', W', C)`.
    pub fn sample_camera(
        &self,
        data: &VolumeField,
        transforms: &[GridTransform],
        cameras: &[Arc<Camera>],
        direction: LutDirection,
        sampling: &CameraSampling,
    ) -> Result<Differentiable<ViewField, VolumeField>> {
        let batch = data.len_of(Axis(0));
        let channels = data.len_of(Axis(4));
        let models = batch_models(transforms, batch)?;
        let camera_size = common_resolution(cameras)?;

        let mut use_lut = false;
        if sampling.allow_static && cameras.iter().any(|c| c.is_static()) {
            let reference = &transforms[0];
            if !cameras.iter().all(|c| c.static_transform().map_or(false, |t| t.same_frame(reference))) {
                self.static_fallback(sampling.force_static, "static camera setup does not match the transform")?;
            } else if batch != 1 {
                self.static_fallback(sampling.force_static, "static cameras only work without a data batch")?;
            } else {
                use_lut = true;
            }
        }

        let plan = plan_steps(sampling.step.as_ref(), channels, cameras);
        let scaled;
        let input = match &plan {
            StepPlan::Before(factors) => {
                scaled = scale_channels(data, factors);
                &scaled
            }
            _ => data,
        };

        let sampled = if use_lut {
            self.sample_camera_lut(input, &transforms[0], cameras, direction)?
        } else {
            let views = cameras.iter().map(|c| c.view_params()).collect();
            let output_size = match direction {
                LutDirection::Forward => camera_size,
                LutDirection::Inverse => transforms[0].grid_size(),
            };
            transform_sampling(
                self.kernels(),
                input,
                models,
                views,
                output_size,
                self.settings().sampling_options(),
                self.gradient_options(),
                camera_mode(direction),
            )?
        };

        Ok(match plan {
            StepPlan::None => sampled,
            StepPlan::Before(factors) => sampled.map_input_grad(move |dx| Ok(scale_channels(&dx, &factors))),
            StepPlan::After(factors) => {
                let backward_factors = factors.clone();
                sampled.map_output(
                    |y| scale_views(y, &factors),
                    move |dy: &ViewField| Ok(scale_views(dy.clone(), &backward_factors)),
                )
            }
        })
    }

    /// Lookup-table sampling for static cameras. Data batches are not supported.
    pub(crate) fn sample_camera_lut(
        &self,
        data: &VolumeField,
        transform: &GridTransform,
        cameras: &[Arc<Camera>],
        direction: LutDirection,
    ) -> Result<Differentiable<ViewField, VolumeField>> {
        let luts = camera_luts(self.kernels().as_ref(), transform, cameras, direction)?;
        let lut_views: Vec<_> = luts.iter().map(|lut| lut.view()).collect();
        let options = self.settings().sampling_options();
        let output = self.kernels().sample_by_lookup(data.view(), &lut_views, &options, false, ViewPairing::Broadcast)?;

        let gradient_options = match self.gradient_options() {
            Some(options) => options,
            None => return Ok(Differentiable::constant(output)),
        };
        let kernels = Arc::clone(self.kernels());
        let transform = transform.clone();
        let cameras: Vec<Arc<Camera>> = cameras.to_vec();
        Ok(Differentiable::new(output, move |dy: &ViewField| {
            if dy.len_of(Axis(0)) != 1 {
                return Err(RenderError::Unsupported(format!(
                    "camera lookup sampling does not support data batches, got {}",
                    dy.len_of(Axis(0))
                )));
            }
            let inverse = camera_luts(kernels.as_ref(), &transform, &cameras, direction.opposite())?;
            let inverse_views: Vec<_> = inverse.iter().map(|lut| lut.view()).collect();
            let per_view = kernels.sample_by_lookup(
                dy.index_axis(Axis(0), 0),
                &inverse_views,
                &gradient_options,
                false,
                ViewPairing::Paired,
            )?;
            Ok(per_view.sum_axis(Axis(0)))
        }))
    }

    /// Grid to grid sampling with an orthographic identity projection. Each
    /// target grid's index space is mapped through its own model matrix.
    pub fn sample_transform(
        &self,
        data: &VolumeField,
        from: &[GridTransform],
        to: &[GridTransform],
        direction: LutDirection,
    ) -> Result<Differentiable<ViewField, VolumeField>> {
        let batch = data.len_of(Axis(0));
        let models = batch_models(from, batch)?;
        let target = to.first().ok_or_else(|| RenderError::Config("no target transform given".to_string()))?;
        if to.iter().any(|t| t.grid_size() != target.grid_size()) {
            return Err(RenderError::MixedResolution("target transforms differ in resolution".to_string()));
        }
        let views = to.iter().map(grid_view_params).collect();
        let (output_size, mode) = match direction {
            LutDirection::Forward => (target.grid_size(), CoordinateMode::Transform),
            LutDirection::Inverse => (from[0].grid_size(), CoordinateMode::TransformReverse),
        };
        transform_sampling(
            self.kernels(),
            data,
            models,
            views,
            output_size,
            self.settings().sampling_options(),
            self.gradient_options(),
            mode,
        )
    }
}

/// View parameters that place a target grid's index space in NDC.
pub(crate) fn grid_view_params(target: &GridTransform) -> ViewParams {
    ViewParams::new(
        target.index_to_ndc() * target.inverse_model_matrix(),
        target.identity_projection(),
        Default::default(),
    )
}
