// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::{concatenate, s, Array3, Array4, Axis, Zip};

use crate::core::differentiable::Differentiable;
use crate::core::error::{RenderError, Result};
use crate::core::field::{channels, check_grid, DensityVolume, GridSize, ImageBatch, ViewField, VolumeField};
use crate::core::grid_transform::GridTransform;
use crate::core::settings::RendererSettings;
use crate::kernels::cpu::CpuKernels;
use crate::kernels::KernelBackend;
use crate::math::constants::Float;
use crate::renderers::lighting::LightSource;
use crate::renderers::tonemap::Tonemap;
use crate::renderers::transform_sampler::{CameraSampling, StepScale};
use crate::sensors::camera::{Camera, LutDirection};

pub type FieldOp = Box<dyn Fn(VolumeField) -> Result<VolumeField> + Send + Sync>;
pub type ViewFieldOp = Box<dyn Fn(ViewField) -> Result<ViewField> + Send + Sync>;

/// User hooks applied in order at the stages of a render call. Hooks only
/// transform forward values; a render with GRID, FRUSTUM or IMAGE hooks
/// carries no backward rule.
#[derive(Default)]
pub struct CustomOps {
    /// Density before lighting, `(N, D, H, W, 1)`.
    pub density: Vec<FieldOp>,
    /// Lit field before sampling, `(N, D, H, W, C)`.
    pub grid: Vec<FieldOp>,
    /// Sampled frustum grids, `(N, V, D', H', W', C)`. Disables fused rendering.
    pub frustum: Vec<ViewFieldOp>,
    /// Raw images, `(N, V, H', W', C)`.
    pub image: Vec<FieldOp>,
}

impl CustomOps {
    fn touches_render(&self) -> bool {
        !(self.grid.is_empty() && self.frustum.is_empty() && self.image.is_empty())
    }
}

fn apply_ops<T>(mut value: T, ops: &[Box<dyn Fn(T) -> Result<T> + Send + Sync>]) -> Result<T> {
    for op in ops {
        value = op(value)?;
    }
    Ok(value)
}

pub struct RenderOptions {
    /// Drop the density channel from the images.
    pub cut_alpha: bool,
    /// One `(H, W, C)` background per camera, added behind the volume.
    pub background: Option<Vec<Array3<Float>>>,
    pub monochrome: bool,
    /// Render every camera on its own instead of per resolution group.
    pub split_cameras: bool,
    pub custom_ops: CustomOps,
    pub tonemapping: Tonemap,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            cut_alpha: true,
            background: None,
            monochrome: false,
            split_cameras: false,
            custom_ops: CustomOps::default(),
            tonemapping: Tonemap::None,
        }
    }
}

/// Cameras of one resolution and static status, with their input positions.
#[derive(Debug, Clone)]
pub struct CameraGroup {
    pub resolution: GridSize,
    pub is_static: bool,
    pub indices: Vec<usize>,
    pub cameras: Vec<Arc<Camera>>,
}

/// Groups cameras by static status (non-static groups first), then by
/// resolution in first-seen order.
pub fn sort_cameras(cameras: &[Arc<Camera>]) -> Vec<CameraGroup> {
    let mut groups: Vec<CameraGroup> = Vec::new();
    for is_static in [false, true] {
        let start = groups.len();
        for (index, camera) in cameras.iter().enumerate().filter(|(_, c)| c.is_static() == is_static) {
            match groups[start..].iter_mut().find(|g| g.resolution == camera.resolution()) {
                Some(group) => {
                    group.indices.push(index);
                    group.cameras.push(Arc::clone(camera));
                }
                None => groups.push(CameraGroup {
                    resolution: camera.resolution(),
                    is_static,
                    indices: vec![index],
                    cameras: vec![Arc::clone(camera)],
                }),
            }
        }
    }
    groups
}

/// `(N, V, D, H, W, C)` to `(N * V, D, H, W, C)`.
fn merge_views(field: ViewField) -> Result<VolumeField> {
    let (n, v, d, h, w, c) = field.dim();
    let field = if field.is_standard_layout() { field } else { field.as_standard_layout().into_owned() };
    field.into_shape((n * v, d, h, w, c)).map_err(|e| RenderError::Shape(e.to_string()))
}

fn split_views(field: VolumeField, views: usize) -> Result<ViewField> {
    let (nv, d, h, w, c) = field.dim();
    let field = if field.is_standard_layout() { field } else { field.as_standard_layout().into_owned() };
    field.into_shape((nv / views.max(1), views, d, h, w, c)).map_err(|e| RenderError::Shape(e.to_string()))
}

/// `(N * V, 1, H, W, C)` blend output to `(N, V, H, W, C)` images.
fn blended_to_images(blended: VolumeField, views: usize) -> Result<VolumeField> {
    let (nv, _, h, w, c) = blended.dim();
    let blended = if blended.is_standard_layout() { blended } else { blended.as_standard_layout().into_owned() };
    blended.into_shape((nv / views.max(1), views, h, w, c)).map_err(|e| RenderError::Shape(e.to_string()))
}

fn images_to_blended(images: &VolumeField) -> Result<VolumeField> {
    let (n, v, h, w, c) = images.dim();
    images
        .as_standard_layout()
        .into_owned()
        .into_shape((n * v, 1, h, w, c))
        .map_err(|e| RenderError::Shape(e.to_string()))
}

fn pad_image(image: ImageBatch, camera: &Camera) -> ImageBatch {
    match camera.scissor_pad() {
        None => image,
        Some(pad) => {
            let (n, h, w, c) = image.dim();
            let mut padded = Array4::<Float>::zeros((n, h + pad.top + pad.bottom, w + pad.left + pad.right, c));
            padded
                .slice_mut(s![.., pad.top..pad.top + h, pad.left..pad.left + w, ..])
                .assign(&image);
            padded
        }
    }
}

/// Differentiable volume renderer over an injected kernel backend.
pub struct Renderer {
    kernels: Arc<dyn KernelBackend>,
    settings: RendererSettings,
}

impl Renderer {
    pub fn new(kernels: Arc<dyn KernelBackend>, settings: RendererSettings) -> Result<Self> {
        settings.validate()?;
        log::info!(
            "Renderer on {} kernels: filter {:?}, boundary {:?}, mip {:?} x{}, blend {} ({:?}), fused {}",
            kernels.name(),
            settings.filter_mode,
            settings.boundary_mode,
            settings.mip_mode,
            settings.num_mips,
            settings.blend_mode,
            settings.effective_blend_path(settings.blend_mode),
            settings.fused
        );
        Ok(Self { kernels, settings })
    }

    /// Renderer on the reference CPU kernels.
    pub fn cpu(settings: RendererSettings) -> Result<Self> {
        Self::new(Arc::new(CpuKernels::new()), settings)
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn kernels(&self) -> &Arc<dyn KernelBackend> {
        &self.kernels
    }

    pub fn can_render_fused(&self) -> bool {
        self.settings.fused && self.settings.blend_mode.is_fusable()
    }

    fn step_channels(&self) -> Option<StepScale> {
        if self.settings.blend_mode.is_reduction() {
            None
        } else {
            Some(StepScale::render_default())
        }
    }

    /// Renders `data` `(N, D, H, W, C)` into images `(N, V, H', W', C)` for
    /// cameras sharing one resolution, without hooks.
    pub fn render_cameras_differentiable(
        &self,
        data: &VolumeField,
        transforms: &[GridTransform],
        cameras: &[Arc<Camera>],
    ) -> Result<Differentiable<VolumeField, VolumeField>> {
        self.render_cameras(data, transforms, cameras, None)
    }

    pub fn render_cameras(
        &self,
        data: &VolumeField,
        transforms: &[GridTransform],
        cameras: &[Arc<Camera>],
        custom_ops: Option<&CustomOps>,
    ) -> Result<Differentiable<VolumeField, VolumeField>> {
        let hooked;
        let data = match custom_ops {
            Some(ops) if !ops.grid.is_empty() => {
                hooked = apply_ops(data.clone(), &ops.grid)?;
                &hooked
            }
            _ => data,
        };
        let frustum_ops = custom_ops.map(|ops| &ops.frustum[..]).unwrap_or(&[]);
        let step = self.step_channels();

        let images = if self.can_render_fused() && frustum_ops.is_empty() {
            self.raymarch_camera(data, transforms, cameras, step.as_ref())?
        } else {
            let sampling = CameraSampling { step, ..Default::default() };
            let mut frustum = self.sample_camera(data, transforms, cameras, LutDirection::Forward, &sampling)?;
            if !frustum_ops.is_empty() {
                frustum = Differentiable::constant(apply_ops(frustum.into_output(), frustum_ops)?);
            }
            let views = cameras.len();
            frustum.then(|grid| {
                let blended = self.blend_grid(&merge_views(grid)?, None, false)?;
                let (output, backward) = blended.into_parts();
                let images = blended_to_images(output, views)?;
                Ok(match backward {
                    Some(backward) => Differentiable::new(images, move |dy: &VolumeField| {
                        split_views(backward(&images_to_blended(dy)?)?, views)
                    }),
                    None => Differentiable::constant(images),
                })
            })?
        };

        match custom_ops {
            Some(ops) if ops.touches_render() => {
                log::debug!("custom render hooks registered, images carry no backward rule");
                Ok(Differentiable::constant(apply_ops(images.into_output(), &ops.image)?))
            }
            _ => Ok(images),
        }
    }

    /// Concatenates density volumes along the batch axis, one transform per
    /// batch element.
    fn collect_density(volumes: &[DensityVolume]) -> Result<(VolumeField, Vec<GridTransform>)> {
        let first = volumes.first().ok_or_else(|| RenderError::Config("no density volumes given".to_string()))?;
        let spatial = GridSize::of_field(&first.data);
        let mut transforms = Vec::new();
        for volume in volumes {
            if GridSize::of_field(&volume.data) != spatial {
                return Err(RenderError::Shape(format!(
                    "all density grids must have the same spatial shape for batched rendering: {} and {}",
                    spatial,
                    GridSize::of_field(&volume.data)
                )));
            }
            transforms.extend(std::iter::repeat(volume.transform.clone()).take(volume.batch_size()));
        }
        let views: Vec<_> = volumes.iter().map(|v| v.data.view()).collect();
        let data = concatenate(Axis(0), &views).map_err(|e| RenderError::Shape(e.to_string()))?;
        Ok((data, transforms))
    }

    fn postprocess(
        &self,
        image: ImageBatch,
        index: usize,
        camera: &Camera,
        options: &RenderOptions,
    ) -> Result<ImageBatch> {
        let c = image.len_of(Axis(3));
        let transmittance = image.slice(s![.., .., .., c - 1..]).mapv(|d| (-d).exp());
        let mut image = if options.cut_alpha && c > 1 {
            image.slice(s![.., .., .., ..c - 1]).to_owned()
        } else {
            image
        };
        if self.settings.check_grids {
            check_grid(&format!("Raw image of camera {}", index), &image);
        }

        if let Some(backgrounds) = &options.background {
            let background = backgrounds
                .get(index)
                .ok_or_else(|| RenderError::Config(format!("no background for camera {}", index)))?;
            let background = background.broadcast(image.raw_dim()).ok_or_else(|| {
                RenderError::Shape(format!(
                    "background {:?} does not fit image {:?} of camera {}",
                    background.shape(),
                    image.shape(),
                    index
                ))
            })?;
            Zip::from(&mut image)
                .and(&background)
                .and_broadcast(&transmittance)
                .for_each(|v, &b, &t| *v += b * t);
        }

        let image = pad_image(options.tonemapping.apply(image), camera);
        if self.settings.check_grids {
            check_grid(&format!("Postprocessed image of camera {}", index), &image);
        }
        Ok(image)
    }

    /// Renders lit density volumes for every camera. Returns one image batch
    /// `(N, H, W, C)` per camera in input order.
    pub fn render_density(
        &self,
        volumes: &[DensityVolume],
        lights: &[LightSource],
        cameras: &[Arc<Camera>],
        options: &RenderOptions,
    ) -> Result<Vec<ImageBatch>> {
        let (density, transforms) = Self::collect_density(volumes)?;
        let density = apply_ops(density, &options.custom_ops.density)?;
        if self.settings.check_grids {
            check_grid("Preprocessed density", &density);
        }

        let data = if lights.is_empty() {
            log::warn!("Light list is empty, rendering density only.");
            density
        } else {
            let light = self.build_light_grid(&density, &transforms, lights, options.monochrome)?;
            if self.settings.check_grids {
                check_grid("Light grid", &light);
            }
            log::debug!("light shape: {:?}", light.shape());
            concatenate(Axis(4), &[light.view(), density.view()]).map_err(|e| RenderError::Shape(e.to_string()))?
        };
        log::debug!("render cameras: {}, field channels: {}", cameras.len(), channels(&data));

        let mut images: Vec<Option<ImageBatch>> = vec![None; cameras.len()];
        for group in sort_cameras(cameras) {
            log::debug!(
                "rendering {} {} camera(s) at {}",
                group.cameras.len(),
                if group.is_static { "static" } else { "dynamic" },
                group.resolution
            );
            if options.split_cameras {
                for (&index, camera) in group.indices.iter().zip(&group.cameras) {
                    let rendered = self
                        .render_cameras(&data, &transforms, std::slice::from_ref(camera), Some(&options.custom_ops))?
                        .into_output();
                    let image = rendered.index_axis_move(Axis(1), 0);
                    images[index] = Some(self.postprocess(image, index, camera, options)?);
                }
            } else {
                let rendered = self
                    .render_cameras(&data, &transforms, &group.cameras, Some(&options.custom_ops))?
                    .into_output();
                for (k, (&index, camera)) in group.indices.iter().zip(&group.cameras).enumerate() {
                    let image = rendered.index_axis(Axis(1), k).to_owned();
                    images[index] = Some(self.postprocess(image, index, camera, options)?);
                }
            }
        }

        images
            .into_iter()
            .enumerate()
            .map(|(i, image)| image.ok_or_else(|| RenderError::Config(format!("camera {} was not rendered", i))))
            .collect()
    }

    pub fn render_sdf(
        &self,
        _volumes: &[DensityVolume],
        _lights: &[LightSource],
        _cameras: &[Arc<Camera>],
        _options: &RenderOptions,
    ) -> Result<Vec<ImageBatch>> {
        Err(RenderError::NotImplemented("signed distance field rendering"))
    }

    /// Dispatches on `render_as_sdf`, falling back to the settings.
    pub fn render_density_switch(
        &self,
        volumes: &[DensityVolume],
        lights: &[LightSource],
        cameras: &[Arc<Camera>],
        options: &RenderOptions,
        render_as_sdf: Option<bool>,
    ) -> Result<Vec<ImageBatch>> {
        if render_as_sdf.unwrap_or(self.settings.render_as_sdf) {
            self.render_sdf(volumes, lights, cameras, options)
        } else {
            self.render_density(volumes, lights, cameras, options)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{BlendMode, MipMode};
    use crate::renderers::lighting::AmbientLight;
    use crate::sensors::camera::ScissorPad;
    use ndarray::Array5;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn exact(blend_mode: BlendMode) -> RendererSettings {
        RendererSettings { mip_mode: MipMode::None, blend_mode, ..Default::default() }
    }

    fn volume(size: usize, seed: u64) -> DensityVolume {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Array5::from_shape_fn((1, size, size, size, 1), |_| rng.gen_range(0.0..0.5));
        DensityVolume::new(data, GridTransform::unit_cube(GridSize::cube(size))).unwrap()
    }

    #[test]
    fn test_sort_cameras_orders_groups() {
        let grid = GridTransform::unit_cube(GridSize::cube(4));
        let cameras = vec![
            Arc::new(Camera::identity(GridSize::cube(4)).with_static(&grid)),
            Arc::new(Camera::identity(GridSize::cube(8))),
            Arc::new(Camera::identity(GridSize::cube(4))),
            Arc::new(Camera::identity(GridSize::cube(8))),
        ];
        let groups = sort_cameras(&cameras);
        let layout: Vec<(bool, Vec<usize>)> = groups.iter().map(|g| (g.is_static, g.indices.clone())).collect();
        assert_eq!(layout, vec![(false, vec![1, 3]), (false, vec![2]), (true, vec![0])]);
    }

    #[test]
    fn test_fused_and_sampled_rendering_agree() {
        let volume = volume(6, 3);
        let cameras = vec![Arc::new(Camera::identity(GridSize::cube(6)))];
        let transforms = vec![volume.transform.clone()];
        let lights = vec![LightSource::Procedural(Box::new(AmbientLight::new(1.0)))];

        let sampled = Renderer::cpu(exact(BlendMode::BeerLambert)).unwrap();
        let fused = Renderer::cpu(RendererSettings { fused: true, ..exact(BlendMode::BeerLambert) }).unwrap();
        let lit = sampled.build_light_grid(&volume.data, &transforms, &lights, true).unwrap();
        let data = concatenate(Axis(4), &[lit.view(), volume.data.view()]).unwrap();

        let a = sampled.render_cameras(&data, &transforms, &cameras, None).unwrap();
        let b = fused.render_cameras(&data, &transforms, &cameras, None).unwrap();
        assert_eq!(a.output().shape(), &[1, 1, 6, 6, 2]);
        for (x, y) in a.output().iter().zip(b.output().iter()) {
            assert!((x - y).abs() < 1e-4, "{} vs {}", x, y);
        }

        let dy = VolumeField::ones(a.output().raw_dim());
        let ga = a.backward(&dy).unwrap();
        let gb = b.backward(&dy).unwrap();
        for (x, y) in ga.iter().zip(gb.iter()) {
            assert!((x - y).abs() < 1e-3, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_render_density_postprocessing() {
        let volume = volume(4, 5);
        let pad = ScissorPad { top: 1, bottom: 0, left: 2, right: 1 };
        let cameras = vec![Arc::new(Camera::identity(GridSize::cube(4)).with_scissor_pad(pad))];
        let renderer = Renderer::cpu(exact(BlendMode::BeerLambert)).unwrap();

        let plain = renderer.render_density(&[volume.clone()], &[], &cameras, &RenderOptions { cut_alpha: false, ..Default::default() }).unwrap();
        assert_eq!(plain[0].shape(), &[1, 5, 7, 1]);
        assert_eq!(plain[0][[0, 0, 0, 0]], 0.0);

        let options = RenderOptions {
            background: Some(vec![Array3::from_elem((4, 4, 1), 1.0)]),
            ..Default::default()
        };
        let lit = renderer.render_density(&[volume], &[], &cameras, &options).unwrap();
        // density-only images keep their single channel
        assert_eq!(lit[0].shape(), &[1, 5, 7, 1]);
        let d = plain[0][[0, 2, 3, 0]];
        assert!((lit[0][[0, 2, 3, 0]] - (d + (-d).exp())).abs() < 1e-5);
    }

    #[test]
    fn test_hooks_run_and_drop_gradients() {
        let volume = volume(4, 7);
        let cameras = vec![Arc::new(Camera::identity(GridSize::cube(4)))];
        let renderer = Renderer::cpu(exact(BlendMode::Additive)).unwrap();
        let transforms = vec![volume.transform.clone()];
        let ops = CustomOps {
            image: vec![Box::new(|x: VolumeField| -> Result<VolumeField> { Ok(x * 2.0) })],
            ..Default::default()
        };
        let plain = renderer.render_cameras(&volume.data, &transforms, &cameras, None).unwrap();
        let hooked = renderer.render_cameras(&volume.data, &transforms, &cameras, Some(&ops)).unwrap();
        assert!(plain.has_backward());
        assert!(!hooked.has_backward());
        assert!((hooked.output()[[0, 0, 1, 1, 0]] - 2.0 * plain.output()[[0, 0, 1, 1, 0]]).abs() < 1e-5);
    }

    #[test]
    fn test_sdf_is_not_implemented() {
        let renderer = Renderer::cpu(RendererSettings::default()).unwrap();
        let result = renderer.render_density_switch(&[], &[], &[], &RenderOptions::default(), Some(true));
        assert!(matches!(result, Err(RenderError::NotImplemented(_))));
        assert!(matches!(
            renderer.render_density(&[], &[], &[], &RenderOptions::default()),
            Err(RenderError::Config(_))
        ));
    }
}
