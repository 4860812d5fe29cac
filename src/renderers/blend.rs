// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::{concatenate, s, Array5, ArrayView5, Axis, Zip};

use crate::core::differentiable::Differentiable;
use crate::core::error::{RenderError, Result};
use crate::core::field::VolumeField;
use crate::core::settings::BlendPath;
use crate::kernels::BlendMode;
use crate::math::constants::Float;
use crate::renderers::renderer::Renderer;

impl Renderer {
    /// Blends a field along depth (axis 1). The depth axis is kept: size 1
    /// for reductions, full depth for the cumulative `keep_dims` variants.
    pub fn blend_grid(
        &self,
        data: &VolumeField,
        mode: Option<BlendMode>,
        keep_dims: bool,
    ) -> Result<Differentiable<VolumeField, VolumeField>> {
        let mode = mode.unwrap_or(self.settings().blend_mode);
        let input = Arc::new(data.clone());

        match self.settings().effective_blend_path(mode) {
            BlendPath::Explicit => {
                let output = blend_explicit(data.view(), mode, keep_dims)?;
                Ok(Differentiable::new(output, move |dy: &VolumeField| {
                    blend_explicit_grad(dy.view(), input.view(), mode, keep_dims)
                }))
            }
            BlendPath::Kernel => {
                let output = self.kernels().reduce_blend(data.view(), mode, keep_dims)?;
                let kernels = Arc::clone(self.kernels());
                let forward = Arc::new(output.clone());
                Ok(Differentiable::new(output, move |dy: &VolumeField| {
                    kernels.reduce_blend_grad(dy.view(), forward.view(), input.view(), mode, keep_dims)
                }))
            }
        }
    }
}

fn shape_error(err: ndarray::ShapeError) -> RenderError {
    RenderError::Shape(err.to_string())
}

fn cumsum(mut data: Array5<Float>) -> Array5<Float> {
    data.accumulate_axis_inplace(Axis(1), |&prev, cur| *cur += prev);
    data
}

fn reverse_cumsum(mut data: Array5<Float>) -> Array5<Float> {
    data.invert_axis(Axis(1));
    data.accumulate_axis_inplace(Axis(1), |&prev, cur| *cur += prev);
    data.invert_axis(Axis(1));
    data
}

fn depth_sum(data: ArrayView5<Float>) -> Array5<Float> {
    data.sum_axis(Axis(1)).insert_axis(Axis(1))
}

/// Gradient reaching every depth sample of an accumulated quantity.
fn upstream(dy: ArrayView5<Float>, depth: usize, keep_dims: bool) -> Result<Array5<Float>> {
    if keep_dims {
        Ok(reverse_cumsum(dy.to_owned()))
    } else {
        let (n, _, h, w, c) = dy.dim();
        dy.broadcast((n, depth, h, w, c))
            .map(|v| v.to_owned())
            .ok_or_else(|| RenderError::Shape(format!("cannot broadcast gradient {:?} to depth {}", dy.shape(), depth)))
    }
}

/// Light channels, density channel and the attenuation per sample.
fn beer_lambert_terms(x: ArrayView5<Float>, exclusive: bool) -> (ArrayView5<Float>, ArrayView5<Float>, Array5<Float>, Array5<Float>) {
    let channels = x.len_of(Axis(4));
    let light = x.slice_move(s![.., .., .., .., ..channels - 1]);
    let density = x.slice_move(s![.., .., .., .., channels - 1..]);
    let dens_sum = cumsum(density.to_owned());
    let attenuation = if exclusive { &dens_sum - &density } else { dens_sum.clone() };
    let transmittance = attenuation.mapv(|a| (-a).exp());
    (light, density, dens_sum, transmittance)
}

pub(crate) fn blend_explicit(x: ArrayView5<Float>, mode: BlendMode, keep_dims: bool) -> Result<Array5<Float>> {
    let channels = x.len_of(Axis(4));
    match mode {
        BlendMode::Max => Ok(x.fold_axis(Axis(1), Float::NEG_INFINITY, |&a, &b| a.max(b)).insert_axis(Axis(1))),
        BlendMode::Min => Ok(x.fold_axis(Axis(1), Float::INFINITY, |&a, &b| a.min(b)).insert_axis(Axis(1))),
        BlendMode::Mean => {
            let depth = x.len_of(Axis(1)).max(1) as Float;
            Ok(depth_sum(x) / depth)
        }
        BlendMode::BeerLambert | BlendMode::BeerLambertExclusive if channels > 1 => {
            let (light, _, dens_sum, transmittance) = beer_lambert_terms(x, mode == BlendMode::BeerLambertExclusive);
            let t = transmittance
                .broadcast(light.raw_dim())
                .ok_or_else(|| RenderError::Shape("transmittance does not broadcast over light".to_string()))?;
            let lit = &light * &t;
            if keep_dims {
                concatenate(Axis(4), &[cumsum(lit).view(), dens_sum.view()]).map_err(shape_error)
            } else {
                let depth = dens_sum.len_of(Axis(1));
                let total = dens_sum.slice(s![.., depth - 1..depth, .., .., ..]);
                concatenate(Axis(4), &[depth_sum(lit.view()).view(), total]).map_err(shape_error)
            }
        }
        BlendMode::Additive | BlendMode::BeerLambert | BlendMode::BeerLambertExclusive => {
            if keep_dims {
                Ok(cumsum(x.to_owned()))
            } else {
                Ok(depth_sum(x))
            }
        }
        BlendMode::Alpha | BlendMode::AlphaAdditive => Err(RenderError::Unsupported(format!(
            "{} blending is only available through the kernel path",
            mode
        ))),
    }
}

pub(crate) fn blend_explicit_grad(
    dy: ArrayView5<Float>,
    x: ArrayView5<Float>,
    mode: BlendMode,
    keep_dims: bool,
) -> Result<Array5<Float>> {
    let depth = x.len_of(Axis(1));
    let channels = x.len_of(Axis(4));
    match mode {
        BlendMode::Max | BlendMode::Min => {
            let y = blend_explicit(x, mode, false)?;
            let mut dx = Array5::<Float>::zeros(x.raw_dim());
            Zip::from(dx.lanes_mut(Axis(1)))
                .and(x.lanes(Axis(1)))
                .and(y.lanes(Axis(1)))
                .and(dy.lanes(Axis(1)))
                .for_each(|mut dx, x, y, dy| {
                    if let Some(d) = x.iter().position(|&v| v == y[0]) {
                        dx[d] = dy[0];
                    }
                });
            Ok(dx)
        }
        BlendMode::Mean => upstream(dy, depth, false).map(|g| g / depth.max(1) as Float),
        BlendMode::BeerLambert | BlendMode::BeerLambertExclusive if channels > 1 => {
            let exclusive = mode == BlendMode::BeerLambertExclusive;
            let (light, _, _, transmittance) = beer_lambert_terms(x, exclusive);
            let g = upstream(dy, depth, keep_dims)?;
            let g_light = g.slice(s![.., .., .., .., ..channels - 1]);
            let g_density = g.slice(s![.., .., .., .., channels - 1..]);

            let t = transmittance
                .broadcast(light.raw_dim())
                .ok_or_else(|| RenderError::Shape("transmittance does not broadcast over light".to_string()))?;
            let d_light = &g_light * &t;
            let shadow = (&light * &d_light).sum_axis(Axis(4)).insert_axis(Axis(4));
            let mut shadowed = reverse_cumsum(shadow.clone());
            if exclusive {
                shadowed -= &shadow;
            }
            let d_density = &g_density - &shadowed;
            concatenate(Axis(4), &[d_light.view(), d_density.view()]).map_err(shape_error)
        }
        BlendMode::Additive | BlendMode::BeerLambert | BlendMode::BeerLambertExclusive => upstream(dy, depth, keep_dims),
        BlendMode::Alpha | BlendMode::AlphaAdditive => Err(RenderError::Unsupported(format!(
            "{} blending is only available through the kernel path",
            mode
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::RendererSettings;
    use crate::kernels::cpu::CpuKernels;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_field(shape: (usize, usize, usize, usize, usize), seed: u64) -> Array5<Float> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array5::from_shape_fn(shape, |_| rng.gen_range(0.05..1.0))
    }

    fn renderer(path: BlendPath) -> Renderer {
        let settings = RendererSettings { blend_path: path, ..Default::default() };
        Renderer::new(Arc::new(CpuKernels::new()), settings).unwrap()
    }

    const MODES: [BlendMode; 6] = [
        BlendMode::Max,
        BlendMode::Min,
        BlendMode::Mean,
        BlendMode::Additive,
        BlendMode::BeerLambert,
        BlendMode::BeerLambertExclusive,
    ];

    #[test]
    fn test_explicit_and_kernel_paths_agree() {
        let x = random_field((2, 5, 3, 2, 4), 21);
        let explicit = renderer(BlendPath::Explicit);
        let kernel = renderer(BlendPath::Kernel);
        for mode in MODES {
            for keep_dims in [false, true] {
                let a = explicit.blend_grid(&x, Some(mode), keep_dims).unwrap();
                let b = kernel.blend_grid(&x, Some(mode), keep_dims).unwrap();
                assert_eq!(a.output().shape(), b.output().shape());
                assert!(a.output().iter().zip(b.output().iter()).all(|(p, q)| (p - q).abs() < 1e-4), "{} {}", mode, keep_dims);

                let dy = random_field(a.output().dim(), 22);
                let ga = a.backward(&dy).unwrap();
                let gb = b.backward(&dy).unwrap();
                assert!(ga.iter().zip(gb.iter()).all(|(p, q)| (p - q).abs() < 1e-4), "grad {} {}", mode, keep_dims);
            }
        }
    }

    #[test]
    fn test_explicit_gradients_match_finite_differences() {
        let x = random_field((1, 4, 2, 2, 3), 31);
        let r = renderer(BlendPath::Explicit);
        let eps = 1e-2;
        for mode in MODES {
            for keep_dims in [false, true] {
                let op = r.blend_grid(&x, Some(mode), keep_dims).unwrap();
                let dy = random_field(op.output().dim(), 32);
                let dx = op.backward(&dy).unwrap();
                for idx in [(0, 0, 0, 0, 2), (0, 1, 1, 0, 0), (0, 3, 1, 1, 1), (0, 2, 0, 1, 2)] {
                    let mut plus = x.clone();
                    plus[idx] += eps;
                    let mut minus = x.clone();
                    minus[idx] -= eps;
                    let fp = (&blend_explicit(plus.view(), mode, keep_dims).unwrap() * &dy).sum();
                    let fm = (&blend_explicit(minus.view(), mode, keep_dims).unwrap() * &dy).sum();
                    let numeric = (fp - fm) / (2.0 * eps);
                    assert!((numeric - dx[idx]).abs() < 2e-2, "{} keep {} at {:?}: {} vs {}", mode, keep_dims, idx, numeric, dx[idx]);
                }
            }
        }
    }

    #[test]
    fn test_beer_lambert_density_only_equals_additive() {
        let x = random_field((1, 6, 2, 3, 1), 41);
        for keep_dims in [false, true] {
            let bl = blend_explicit(x.view(), BlendMode::BeerLambert, keep_dims).unwrap();
            let add = blend_explicit(x.view(), BlendMode::Additive, keep_dims).unwrap();
            assert_eq!(bl, add);
        }
    }

    #[test]
    fn test_reductions_are_permutation_invariant_along_depth() {
        let x = random_field((1, 5, 2, 2, 2), 51);
        let mut permuted = x.clone();
        permuted.invert_axis(Axis(1));
        let permuted = permuted.as_standard_layout().to_owned();
        for mode in [BlendMode::Max, BlendMode::Min, BlendMode::Mean] {
            let a = blend_explicit(x.view(), mode, false).unwrap();
            let b = blend_explicit(permuted.view(), mode, false).unwrap();
            assert!(a.iter().zip(b.iter()).all(|(p, q)| (p - q).abs() < 1e-6));
        }
        for mode in [BlendMode::Additive, BlendMode::BeerLambert] {
            let a = blend_explicit(x.view(), mode, true).unwrap();
            let b = blend_explicit(permuted.view(), mode, true).unwrap();
            assert!(a.iter().zip(b.iter()).any(|(p, q)| (p - q).abs() > 1e-4));
        }
        let a = blend_explicit(x.view(), BlendMode::BeerLambert, false).unwrap();
        let b = blend_explicit(permuted.view(), BlendMode::BeerLambert, false).unwrap();
        assert!((a[[0, 0, 0, 0, 0]] - b[[0, 0, 0, 0, 0]]).abs() > 1e-5);
    }

    #[test]
    fn test_alpha_needs_kernel_path() {
        let x = random_field((1, 3, 1, 1, 2), 61);
        assert!(blend_explicit(x.view(), BlendMode::Alpha, false).is_err());
        let op = renderer(BlendPath::Explicit).blend_grid(&x, Some(BlendMode::Alpha), false).unwrap();
        assert_eq!(op.output().dim(), (1, 1, 1, 1, 2));
    }
}
