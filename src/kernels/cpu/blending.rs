// Copyright @yucwang 2026

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::core::error::{RenderError, Result};
use crate::kernels::BlendMode;
use crate::math::constants::Float;

/// Depth of the blended output for a ray of `depth` samples.
pub(crate) fn output_depth(mode: BlendMode, keep_dims: bool, depth: usize) -> usize {
    if keep_dims && !mode.is_reduction() {
        depth
    } else {
        1
    }
}

pub(crate) fn check_blend(mode: BlendMode, keep_dims: bool) -> Result<()> {
    if keep_dims && mode.is_alpha() {
        return Err(RenderError::Unsupported(format!("{} blending does not support keep_dims", mode)));
    }
    Ok(())
}

/// Blends one ray of samples `(D, C)` into `out` (`(1, C)` or `(D, C)`).
/// Index 0 is the sample closest to the camera.
pub(crate) fn blend_ray(x: ArrayView2<Float>, mode: BlendMode, keep_dims: bool, mut out: ArrayViewMut2<Float>) {
    let (depth, channels) = x.dim();
    out.fill(0.0);
    if depth == 0 || channels == 0 {
        return;
    }

    match mode {
        BlendMode::Max | BlendMode::Min => {
            for c in 0..channels {
                let column = x.column(c);
                out[[0, c]] = column.iter().skip(1).fold(column[0], |acc, &v| {
                    if mode == BlendMode::Max { acc.max(v) } else { acc.min(v) }
                });
            }
        }
        BlendMode::Mean => {
            for c in 0..channels {
                out[[0, c]] = x.column(c).sum() / depth as Float;
            }
        }
        BlendMode::BeerLambert | BlendMode::BeerLambertExclusive if channels > 1 => {
            let dc = channels - 1;
            let mut acc_light = vec![0.0; dc];
            let mut acc_density: Float = 0.0;
            for d in 0..depth {
                let s = x[[d, dc]];
                let attenuation = if mode == BlendMode::BeerLambert {
                    acc_density + s
                } else {
                    acc_density
                };
                let t = (-attenuation).exp();
                acc_density += s;
                for c in 0..dc {
                    acc_light[c] += x[[d, c]] * t;
                }
                if keep_dims {
                    for c in 0..dc {
                        out[[d, c]] = acc_light[c];
                    }
                    out[[d, dc]] = acc_density;
                }
            }
            if !keep_dims {
                for c in 0..dc {
                    out[[0, c]] = acc_light[c];
                }
                out[[0, dc]] = acc_density;
            }
        }
        BlendMode::Additive | BlendMode::BeerLambert | BlendMode::BeerLambertExclusive => {
            for c in 0..channels {
                let mut acc = 0.0;
                for d in 0..depth {
                    acc += x[[d, c]];
                    if keep_dims {
                        out[[d, c]] = acc;
                    }
                }
                if !keep_dims {
                    out[[0, c]] = acc;
                }
            }
        }
        BlendMode::Alpha | BlendMode::AlphaAdditive => {
            let ac = channels - 1;
            let mut transmittance: Float = 1.0;
            for d in 0..depth {
                let a = x[[d, ac]];
                let weight = if mode == BlendMode::Alpha { a * transmittance } else { transmittance };
                for c in 0..ac {
                    out[[0, c]] += x[[d, c]] * weight;
                }
                transmittance *= 1.0 - a;
            }
            out[[0, ac]] = 1.0 - transmittance;
        }
    }
}

/// Backward of `blend_ray`: writes the input gradient `(D, C)` into `dx`.
pub(crate) fn blend_ray_grad(
    dy: ArrayView2<Float>,
    y: ArrayView2<Float>,
    x: ArrayView2<Float>,
    mode: BlendMode,
    keep_dims: bool,
    mut dx: ArrayViewMut2<Float>,
) {
    let (depth, channels) = x.dim();
    dx.fill(0.0);
    if depth == 0 || channels == 0 {
        return;
    }

    // Gradient reaching sample d of an accumulated channel.
    let upstream = |d: usize, c: usize| -> Float {
        if keep_dims {
            (d..depth).map(|e| dy[[e, c]]).sum()
        } else {
            dy[[0, c]]
        }
    };

    match mode {
        BlendMode::Max | BlendMode::Min => {
            for c in 0..channels {
                if let Some(d) = (0..depth).find(|&d| x[[d, c]] == y[[0, c]]) {
                    dx[[d, c]] = dy[[0, c]];
                }
            }
        }
        BlendMode::Mean => {
            for c in 0..channels {
                for d in 0..depth {
                    dx[[d, c]] = dy[[0, c]] / depth as Float;
                }
            }
        }
        BlendMode::BeerLambert | BlendMode::BeerLambertExclusive if channels > 1 => {
            let dc = channels - 1;
            let inclusive = mode == BlendMode::BeerLambert;
            let mut q = vec![0.0; depth];
            let mut acc_density: Float = 0.0;
            for d in 0..depth {
                let s = x[[d, dc]];
                let t = (-(if inclusive { acc_density + s } else { acc_density })).exp();
                acc_density += s;
                for c in 0..dc {
                    let g = upstream(d, c);
                    dx[[d, c]] = t * g;
                    q[d] += x[[d, c]] * t * g;
                }
            }
            let mut suffix: Float = 0.0;
            for d in (0..depth).rev() {
                suffix += q[d];
                let shadowed = if inclusive { suffix } else { suffix - q[d] };
                dx[[d, dc]] = upstream(d, dc) - shadowed;
            }
        }
        BlendMode::Additive | BlendMode::BeerLambert | BlendMode::BeerLambertExclusive => {
            for c in 0..channels {
                for d in 0..depth {
                    dx[[d, c]] = upstream(d, c);
                }
            }
        }
        BlendMode::Alpha | BlendMode::AlphaAdditive => {
            let ac = channels - 1;
            let premultiplied = mode == BlendMode::AlphaAdditive;
            let mut prefix = vec![1.0; depth];
            for d in 1..depth {
                prefix[d] = prefix[d - 1] * (1.0 - x[[d - 1, ac]]);
            }
            // Colour arriving from behind sample d, and transmittance behind it.
            let mut behind = vec![0.0; ac];
            let mut behind_t: Float = 1.0;
            for d in (0..depth).rev() {
                let a = x[[d, ac]];
                let p = prefix[d];
                let mut da = dy[[0, ac]] * p * behind_t;
                for c in 0..ac {
                    let g = dy[[0, c]];
                    if premultiplied {
                        dx[[d, c]] = g * p;
                        da -= g * p * behind[c];
                    } else {
                        dx[[d, c]] = g * a * p;
                        da += g * p * (x[[d, c]] - behind[c]);
                    }
                }
                dx[[d, ac]] = da;
                for c in 0..ac {
                    let own = if premultiplied { x[[d, c]] } else { x[[d, c]] * a };
                    behind[c] = own + (1.0 - a) * behind[c];
                }
                behind_t *= 1.0 - a;
            }
        }
    }
}
