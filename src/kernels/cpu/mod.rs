// Copyright @yucwang 2026

//! Reference CPU backend. Work is split over `(batch, view)` pairs and image
//! rows with rayon.

mod blending;
mod grid;
mod mapping;
mod raymarching;

use ndarray::{s, Array3, Array4, Array5, Array6, ArrayView4, ArrayView5, Axis};
use rayon::prelude::*;

use crate::core::error::{RenderError, Result};
use crate::core::field::GridSize;
use crate::kernels::{
    BlendMode, CoordinateMode, KernelBackend, RaymarchOptions, SamplingOptions, ViewPairing, ViewParams,
};
use crate::math::constants::{Float, Matrix4f, Vector3f};

use self::blending::{blend_ray, blend_ray_grad, check_blend, output_depth};
use self::grid::MipPyramid;
use self::mapping::CoordinateMapping;
use self::raymarching::RayMarcher;

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuKernels;

impl CpuKernels {
    pub fn new() -> Self {
        CpuKernels
    }
}

/// `(batch element, view, output view slot)` triples for a sampling call.
fn pair_indices(batch: usize, views: usize, pairing: ViewPairing) -> Result<(Vec<(usize, usize, usize)>, usize)> {
    match pairing {
        ViewPairing::Broadcast => {
            let pairs = (0..batch).flat_map(|n| (0..views).map(move |v| (n, v, v))).collect();
            Ok((pairs, views))
        }
        ViewPairing::Paired => {
            if batch != views {
                return Err(RenderError::BatchMismatch { transforms: views, batch });
            }
            Ok(((0..views).map(|v| (v, v, 0)).collect(), 1))
        }
    }
}

fn model_for<'m>(models: &'m [Matrix4f], n: usize, batch: usize) -> Result<&'m Matrix4f> {
    match models.len() {
        1 => Ok(&models[0]),
        len if len == batch => Ok(&models[n]),
        len => Err(RenderError::BatchMismatch { transforms: len, batch }),
    }
}

fn field_size(field: &ArrayView5<Float>) -> GridSize {
    let shape = field.shape();
    GridSize::new(shape[1], shape[2], shape[3])
}

/// Samples one output slice `(D', H', W', C)`. `entry` yields the source
/// coordinate and level of detail of output voxel `(x, y, z)`.
fn sample_slice<F>(pyramid: &MipPyramid, output_size: GridSize, channels: usize, options: &SamplingOptions, entry: F) -> Array4<Float>
where
    F: Fn(usize, usize, usize) -> [Float; 4] + Sync,
{
    let planes: Vec<Array3<Float>> = (0..output_size.depth)
        .into_par_iter()
        .map(|k| {
            let mut plane = Array3::<Float>::zeros((output_size.height, output_size.width, channels));
            let mut value = vec![0.0; channels];
            for j in 0..output_size.height {
                for i in 0..output_size.width {
                    let e = entry(i, j, k);
                    pyramid.sample(Vector3f::new(e[0], e[1], e[2]), e[3], options, &mut value);
                    for (c, v) in value.iter().enumerate() {
                        plane[[j, i, c]] = *v;
                    }
                }
            }
            plane
        })
        .collect();

    let mut out = Array4::<Float>::zeros((output_size.depth, output_size.height, output_size.width, channels));
    for (k, plane) in planes.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), k).assign(&plane);
    }
    out
}

fn build_pyramids(field: &ArrayView5<Float>, options: &SamplingOptions) -> Vec<MipPyramid> {
    let mip_count = if options.mip_mode == crate::kernels::MipMode::None { 0 } else { options.mip_count };
    (0..field.len_of(Axis(0)))
        .into_par_iter()
        .map(|n| MipPyramid::build(field.index_axis(Axis(0), n), mip_count))
        .collect()
}

fn assemble(batch: usize, views: usize, pairs: &[(usize, usize, usize)], slices: Vec<Array4<Float>>, output_size: GridSize, channels: usize) -> Array6<Float> {
    let mut out = Array6::<Float>::zeros((batch, views, output_size.depth, output_size.height, output_size.width, channels));
    for (&(n, _, slot), slice) in pairs.iter().zip(slices) {
        out.slice_mut(s![n, slot, .., .., .., ..]).assign(&slice);
    }
    out
}

impl KernelBackend for CpuKernels {
    fn name(&self) -> &str {
        "cpu"
    }

    fn sample_by_transform(
        &self,
        field: ArrayView5<Float>,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        options: &SamplingOptions,
        mode: CoordinateMode,
        pairing: ViewPairing,
    ) -> Result<Array6<Float>> {
        let batch = field.len_of(Axis(0));
        let channels = field.len_of(Axis(4));
        let input_size = field_size(&field);
        let (pairs, view_slots) = pair_indices(batch, views.len(), pairing)?;
        let mappings = pairs
            .iter()
            .map(|&(n, v, _)| -> Result<CoordinateMapping> {
                let model = model_for(models, n, batch)?;
                Ok(CoordinateMapping::new(model, &views[v], input_size, output_size, mode))
            })
            .collect::<Result<Vec<_>>>()?;

        let pyramids = build_pyramids(&field, options);
        let slices: Vec<Array4<Float>> = pairs
            .par_iter()
            .zip(mappings.par_iter())
            .map(|(&(n, _, _), mapping)| {
                sample_slice(&pyramids[n], output_size, channels, options, |i, j, k| mapping.lookup_entry(i, j, k))
            })
            .collect();

        let out_batch = if pairing == ViewPairing::Paired { views.len() } else { batch };
        Ok(assemble(out_batch, view_slots, &pairs, slices, output_size, channels))
    }

    fn build_lookup_table(
        &self,
        input_size: GridSize,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        mode: CoordinateMode,
    ) -> Result<Array5<Float>> {
        let mut luts = Array5::<Float>::zeros((views.len(), output_size.depth, output_size.height, output_size.width, 4));
        for (v, view) in views.iter().enumerate() {
            let model = model_for(models, v, views.len())?;
            let mapping = CoordinateMapping::new(model, view, input_size, output_size, mode);
            let mut lut = luts.index_axis_mut(Axis(0), v);
            for k in 0..output_size.depth {
                for j in 0..output_size.height {
                    for i in 0..output_size.width {
                        let e = mapping.lookup_entry(i, j, k);
                        for (c, value) in e.iter().enumerate() {
                            lut[[k, j, i, c]] = *value;
                        }
                    }
                }
            }
        }
        Ok(luts)
    }

    fn sample_by_lookup(
        &self,
        field: ArrayView5<Float>,
        luts: &[ArrayView4<Float>],
        options: &SamplingOptions,
        relative: bool,
        pairing: ViewPairing,
    ) -> Result<Array6<Float>> {
        let first = luts.first().ok_or_else(|| RenderError::Shape("no lookup tables given".to_string()))?;
        let lut_shape = first.shape().to_vec();
        if lut_shape[3] != 4 {
            return Err(RenderError::Shape(format!("lookup table must have 4 channels, has {}", lut_shape[3])));
        }
        if luts.iter().any(|lut| lut.shape() != lut_shape.as_slice()) {
            return Err(RenderError::MixedResolution("lookup tables differ in shape".to_string()));
        }
        let output_size = GridSize::new(lut_shape[0], lut_shape[1], lut_shape[2]);
        let batch = field.len_of(Axis(0));
        let channels = field.len_of(Axis(4));
        let (pairs, view_slots) = pair_indices(batch, luts.len(), pairing)?;

        let pyramids = build_pyramids(&field, options);
        let slices: Vec<Array4<Float>> = pairs
            .par_iter()
            .map(|&(n, v, _)| {
                let lut = &luts[v];
                sample_slice(&pyramids[n], output_size, channels, options, |i, j, k| {
                    let mut e = [lut[[k, j, i, 0]], lut[[k, j, i, 1]], lut[[k, j, i, 2]], lut[[k, j, i, 3]]];
                    if relative {
                        e[0] += i as Float + 0.5;
                        e[1] += j as Float + 0.5;
                        e[2] += k as Float + 0.5;
                    }
                    e
                })
            })
            .collect();

        let out_batch = if pairing == ViewPairing::Paired { luts.len() } else { batch };
        Ok(assemble(out_batch, view_slots, &pairs, slices, output_size, channels))
    }

    fn reduce_blend(&self, field: ArrayView5<Float>, mode: BlendMode, keep_dims: bool) -> Result<Array5<Float>> {
        check_blend(mode, keep_dims)?;
        let (batch, depth, height, width, channels) = field.dim();
        let out_depth = output_depth(mode, keep_dims, depth);

        let blended: Vec<Array4<Float>> = (0..batch)
            .into_par_iter()
            .map(|n| {
                let mut out = Array4::<Float>::zeros((out_depth, height, width, channels));
                for j in 0..height {
                    for i in 0..width {
                        blend_ray(field.slice(s![n, .., j, i, ..]), mode, keep_dims, out.slice_mut(s![.., j, i, ..]));
                    }
                }
                out
            })
            .collect();
        stack_batch(blended, (batch, out_depth, height, width, channels))
    }

    fn reduce_blend_grad(
        &self,
        output_grad: ArrayView5<Float>,
        output: ArrayView5<Float>,
        input: ArrayView5<Float>,
        mode: BlendMode,
        keep_dims: bool,
    ) -> Result<Array5<Float>> {
        check_blend(mode, keep_dims)?;
        if output_grad.shape() != output.shape() {
            return Err(RenderError::Shape(format!(
                "gradient shape {:?} does not match output shape {:?}",
                output_grad.shape(),
                output.shape()
            )));
        }
        let (batch, depth, height, width, channels) = input.dim();

        let grads: Vec<Array4<Float>> = (0..batch)
            .into_par_iter()
            .map(|n| {
                let mut dx = Array4::<Float>::zeros((depth, height, width, channels));
                for j in 0..height {
                    for i in 0..width {
                        blend_ray_grad(
                            output_grad.slice(s![n, .., j, i, ..]),
                            output.slice(s![n, .., j, i, ..]),
                            input.slice(s![n, .., j, i, ..]),
                            mode,
                            keep_dims,
                            dx.slice_mut(s![.., j, i, ..]),
                        );
                    }
                }
                dx
            })
            .collect();
        stack_batch(grads, (batch, depth, height, width, channels))
    }

    fn raymarch(
        &self,
        field: ArrayView5<Float>,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        options: &RaymarchOptions,
    ) -> Result<Array5<Float>> {
        let batch = field.len_of(Axis(0));
        let channels = field.len_of(Axis(4));
        let (pairs, _) = pair_indices(batch, views.len(), ViewPairing::Broadcast)?;
        for &(n, _, _) in &pairs {
            model_for(models, n, batch)?;
        }

        let march = |&(n, v, _): &(usize, usize, usize)| -> Result<Array3<Float>> {
            let model = model_for(models, n, batch)?;
            Ok(RayMarcher::new(field.index_axis(Axis(0), n), model, &views[v], output_size, options).march())
        };
        let images: Vec<Array3<Float>> = if options.global_sampling {
            pairs.par_iter().map(march).collect::<Result<_>>()?
        } else {
            pairs.iter().map(march).collect::<Result<_>>()?
        };

        let mut out = Array5::<Float>::zeros((batch, views.len(), output_size.height, output_size.width, channels));
        for (&(n, v, _), image) in pairs.iter().zip(images) {
            out.slice_mut(s![n, v, .., .., ..]).assign(&image);
        }
        Ok(out)
    }

    fn raymarch_grad(
        &self,
        input: ArrayView5<Float>,
        output: ArrayView5<Float>,
        output_grad: ArrayView5<Float>,
        models: &[Matrix4f],
        views: &[ViewParams],
        output_size: GridSize,
        options: &RaymarchOptions,
    ) -> Result<Array5<Float>> {
        let (batch, depth, height, width, channels) = input.dim();
        let expected = [batch, views.len(), output_size.height, output_size.width, channels];
        if output_grad.shape() != expected {
            return Err(RenderError::Shape(format!(
                "image gradient must have shape {:?}, has {:?}",
                expected,
                output_grad.shape()
            )));
        }
        let output = if options.blend_mode == BlendMode::Additive {
            output_grad.view()
        } else if output.shape() != expected {
            return Err(RenderError::Shape(format!(
                "ray-march output must have shape {:?}, has {:?}",
                expected,
                output.shape()
            )));
        } else {
            output.view()
        };

        let grads: Vec<Array4<Float>> = (0..batch)
            .into_par_iter()
            .map(|n| -> Result<Array4<Float>> {
                let model = model_for(models, n, batch)?;
                let mut grad = Array4::<Float>::zeros((depth, height, width, channels));
                for (v, view) in views.iter().enumerate() {
                    RayMarcher::new(input.index_axis(Axis(0), n), model, view, output_size, options)
                        .scatter(output, output_grad, (n, v), &mut grad);
                }
                Ok(grad)
            })
            .collect::<Result<_>>()?;
        stack_batch(grads, (batch, depth, height, width, channels))
    }
}

fn stack_batch(items: Vec<Array4<Float>>, shape: (usize, usize, usize, usize, usize)) -> Result<Array5<Float>> {
    let mut out = Array5::<Float>::zeros(shape);
    for (n, item) in items.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), n).assign(&item);
    }
    Ok(out)
}
