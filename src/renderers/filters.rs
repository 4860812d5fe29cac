// Copyright @yucwang 2026

use ndarray::{Array, Array4, Array5, Axis, Dimension, Zip};

use crate::math::constants::Float;

/// Normalized 1D Gaussian window with a radius of three sigma.
pub fn gaussian_kernel(sigma: Float) -> Vec<Float> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let weights: Vec<Float> = (-radius..=radius).map(|x| (-((x * x) as Float) / denom).exp()).collect();
    let sum: Float = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Convolves every lane along `axis` with `kernel`, zero padded to the same size.
fn blur_axis<D: Dimension>(data: &Array<Float, D>, axis: Axis, kernel: &[Float]) -> Array<Float, D> {
    let radius = (kernel.len() / 2) as isize;
    let mut out = Array::<Float, D>::zeros(data.raw_dim());
    Zip::from(out.lanes_mut(axis)).and(data.lanes(axis)).for_each(|mut out, lane| {
        let n = lane.len() as isize;
        for i in 0..n {
            let mut acc = 0.0;
            for (t, w) in kernel.iter().enumerate() {
                let idx = i + t as isize - radius;
                if idx >= 0 && idx < n {
                    acc += w * lane[idx as usize];
                }
            }
            out[i as usize] = acc;
        }
    });
    out
}

fn blur_axes<D: Dimension>(data: &Array<Float, D>, axes: &[usize], sigma: Float) -> Array<Float, D> {
    if sigma <= 0.0 {
        return data.clone();
    }
    let kernel = gaussian_kernel(sigma);
    axes.iter().fold(data.clone(), |acc, &axis| blur_axis(&acc, Axis(axis), &kernel))
}

/// Blurs image batches `(N, H, W, C)` over height and width.
pub fn gaussian_blur_2d(images: &Array4<Float>, sigma: Float) -> Array4<Float> {
    blur_axes(images, &[1, 2], sigma)
}

/// Blurs volumes `(N, D, H, W, C)` over depth, height and width.
pub fn gaussian_blur_3d(volume: &Array5<Float>, sigma: Float) -> Array5<Float> {
    blur_axes(volume, &[1, 2, 3], sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(1.5);
        assert_eq!(kernel.len(), 11);
        assert!((kernel.iter().sum::<Float>() - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[10]).abs() < 1e-7);
        assert!(kernel[5] > kernel[4]);
    }

    #[test]
    fn test_blur_preserves_interior_mass() {
        let mut images = Array4::<Float>::zeros((1, 9, 9, 1));
        images[[0, 4, 4, 0]] = 1.0;
        let blurred = gaussian_blur_2d(&images, 0.8);
        assert!((blurred.sum() - 1.0).abs() < 1e-4);
        assert!(blurred[[0, 4, 4, 0]] < 1.0);
        assert!((blurred[[0, 3, 4, 0]] - blurred[[0, 4, 5, 0]]).abs() < 1e-6);
        assert_eq!(gaussian_blur_2d(&images, 0.0), images);
    }
}
