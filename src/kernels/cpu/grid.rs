// Copyright @yucwang 2026

use ndarray::{s, Array4, ArrayView4, ArrayViewMut4, Axis};

use crate::core::field::GridSize;
use crate::kernels::{BoundaryMode, Interpolation, MipMode, SamplingOptions};
use crate::math::constants::{Float, Vector3f};

/// Resolves an integer cell index against the grid size. `None` means the
/// sample reads zero.
pub(crate) fn wrap_index(idx: isize, size: usize, mode: BoundaryMode) -> Option<usize> {
    let size_i = size as isize;
    if size_i == 0 {
        return None;
    }
    match mode {
        BoundaryMode::Border => {
            if idx < 0 || idx >= size_i {
                None
            } else {
                Some(idx as usize)
            }
        }
        BoundaryMode::Clamp => Some(idx.clamp(0, size_i - 1) as usize),
        BoundaryMode::Wrap => Some(idx.rem_euclid(size_i) as usize),
        BoundaryMode::Mirror => {
            let v = idx.rem_euclid(2 * size_i);
            if v >= size_i {
                Some((2 * size_i - v - 1) as usize)
            } else {
                Some(v as usize)
            }
        }
    }
}

/// Grid cells and weights touched by one sample, as `(z, y, x, weight)`.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Footprint {
    taps: [(usize, usize, usize, Float); 8],
    len: usize,
}

impl Footprint {
    fn empty() -> Self {
        Self { taps: [(0, 0, 0, 0.0); 8], len: 0 }
    }

    fn push(&mut self, z: usize, y: usize, x: usize, weight: Float) {
        if weight != 0.0 {
            self.taps[self.len] = (z, y, x, weight);
            self.len += 1;
        }
    }

    pub(crate) fn taps(&self) -> &[(usize, usize, usize, Float)] {
        &self.taps[..self.len]
    }

    /// Continuous index coordinate `p` (cell centres at `i + 0.5`).
    pub(crate) fn new(p: Vector3f, size: GridSize, interpolation: Interpolation, boundary: BoundaryMode) -> Self {
        let mut footprint = Self::empty();
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
            return footprint;
        }

        match interpolation {
            Interpolation::Nearest => {
                let x = wrap_index(p.x.floor() as isize, size.width, boundary);
                let y = wrap_index(p.y.floor() as isize, size.height, boundary);
                let z = wrap_index(p.z.floor() as isize, size.depth, boundary);
                if let (Some(x), Some(y), Some(z)) = (x, y, z) {
                    footprint.push(z, y, x, 1.0);
                }
            }
            Interpolation::Linear => {
                let u = p - Vector3f::new(0.5, 0.5, 0.5);
                let x0 = u.x.floor();
                let y0 = u.y.floor();
                let z0 = u.z.floor();
                let tx = u.x - x0;
                let ty = u.y - y0;
                let tz = u.z - z0;
                let (x0, y0, z0) = (x0 as isize, y0 as isize, z0 as isize);

                for dz in 0..2 {
                    let wz = if dz == 0 { 1.0 - tz } else { tz };
                    let z = match wrap_index(z0 + dz, size.depth, boundary) {
                        Some(z) => z,
                        None => continue,
                    };
                    for dy in 0..2 {
                        let wy = if dy == 0 { 1.0 - ty } else { ty };
                        let y = match wrap_index(y0 + dy, size.height, boundary) {
                            Some(y) => y,
                            None => continue,
                        };
                        for dx in 0..2 {
                            let wx = if dx == 0 { 1.0 - tx } else { tx };
                            if let Some(x) = wrap_index(x0 + dx, size.width, boundary) {
                                footprint.push(z, y, x, wz * wy * wx);
                            }
                        }
                    }
                }
            }
        }
        footprint
    }

    /// Accumulates `scale * volume[footprint]` into `out`.
    pub(crate) fn gather(&self, volume: &ArrayView4<Float>, scale: Float, out: &mut [Float]) {
        for &(z, y, x, w) in self.taps() {
            let cell = volume.slice(s![z, y, x, ..]);
            for (o, v) in out.iter_mut().zip(cell.iter()) {
                *o += scale * w * v;
            }
        }
    }

    /// Adjoint of `gather`.
    pub(crate) fn scatter(&self, grad: &mut ArrayViewMut4<Float>, values: &[Float]) {
        for &(z, y, x, w) in self.taps() {
            let mut cell = grad.slice_mut(s![z, y, x, ..]);
            for (g, v) in cell.iter_mut().zip(values.iter()) {
                *g += w * v;
            }
        }
    }
}

pub(crate) fn volume_size(volume: &ArrayView4<Float>) -> GridSize {
    let shape = volume.shape();
    GridSize::new(shape[0], shape[1], shape[2])
}

/// Box-filtered mip chain of one (D,H,W,C) volume. Level `l + 1` has
/// `ceil(n / 2)` cells per axis; index coordinates scale by `2^-l`.
pub(crate) struct MipPyramid {
    levels: Vec<Array4<Float>>,
}

impl MipPyramid {
    pub(crate) fn build(volume: ArrayView4<Float>, mip_count: usize) -> Self {
        let mut levels = vec![volume.to_owned()];
        for _ in 0..mip_count {
            let next = match levels.last() {
                Some(prev) => downsample(prev.view()),
                None => break,
            };
            levels.push(next);
        }
        Self { levels }
    }

    pub(crate) fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn level(&self, l: usize) -> ArrayView4<Float> {
        self.levels[l.min(self.levels.len() - 1)].view()
    }

    /// Samples at base-level coordinate `p` with level of detail `lod`.
    pub(crate) fn sample(&self, p: Vector3f, lod: Float, options: &SamplingOptions, out: &mut [Float]) {
        out.iter_mut().for_each(|o| *o = 0.0);
        let max_level = (self.levels.len() - 1) as Float;
        let lod = if lod.is_finite() { (lod + options.mip_bias).clamp(0.0, max_level) } else { 0.0 };

        match options.mip_mode {
            MipMode::None => self.sample_level(0, p, 1.0, options, out),
            MipMode::Nearest => self.sample_level(lod.round() as usize, p, 1.0, options, out),
            MipMode::Linear => {
                let l0 = lod.floor();
                let t = lod - l0;
                self.sample_level(l0 as usize, p, 1.0 - t, options, out);
                if t > 0.0 {
                    self.sample_level(l0 as usize + 1, p, t, options, out);
                }
            }
        }
    }

    fn sample_level(&self, l: usize, p: Vector3f, scale: Float, options: &SamplingOptions, out: &mut [Float]) {
        let level = self.level(l);
        let p = p / (1u32 << l) as Float;
        Footprint::new(p, volume_size(&level), options.interpolation, options.boundary).gather(&level, scale, out);
    }
}

fn downsample(volume: ArrayView4<Float>) -> Array4<Float> {
    let (d, h, w, c) = volume.dim();
    let (nd, nh, nw) = ((d + 1) / 2, (h + 1) / 2, (w + 1) / 2);
    let mut out = Array4::<Float>::zeros((nd, nh, nw, c));
    for k in 0..nd {
        for j in 0..nh {
            for i in 0..nw {
                let block = volume.slice(s![2 * k..(2 * k + 2).min(d), 2 * j..(2 * j + 2).min(h), 2 * i..(2 * i + 2).min(w), ..]);
                let count = (block.len() / c.max(1)) as Float;
                let sum = block.sum_axis(Axis(0)).sum_axis(Axis(0)).sum_axis(Axis(0));
                out.slice_mut(s![k, j, i, ..]).assign(&(sum / count));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_index_modes() {
        assert_eq!(wrap_index(-1, 4, BoundaryMode::Border), None);
        assert_eq!(wrap_index(-1, 4, BoundaryMode::Clamp), Some(0));
        assert_eq!(wrap_index(-1, 4, BoundaryMode::Wrap), Some(3));
        assert_eq!(wrap_index(-1, 4, BoundaryMode::Mirror), Some(0));
        assert_eq!(wrap_index(5, 4, BoundaryMode::Mirror), Some(2));
    }

    #[test]
    fn test_linear_footprint_at_cell_center_is_single_tap() {
        let fp = Footprint::new(Vector3f::new(1.5, 2.5, 0.5), GridSize::cube(4), Interpolation::Linear, BoundaryMode::Border);
        assert_eq!(fp.taps().len(), 1);
        assert_eq!(fp.taps()[0], (0, 2, 1, 1.0));
    }

    #[test]
    fn test_linear_interpolation_between_cells() {
        let mut volume = Array4::<Float>::zeros((1, 1, 2, 1));
        volume[[0, 0, 1, 0]] = 2.0;
        let fp = Footprint::new(Vector3f::new(1.25, 0.5, 0.5), GridSize::new(1, 1, 2), Interpolation::Linear, BoundaryMode::Clamp);
        let mut out = [0.0];
        fp.gather(&volume.view(), 1.0, &mut out);
        assert!((out[0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_pyramid_box_filter_with_odd_size() {
        let volume = Array4::<Float>::from_shape_fn((1, 1, 3, 1), |(_, _, x, _)| x as Float);
        let pyramid = MipPyramid::build(volume.view(), 2);
        assert_eq!(pyramid.level_count(), 3);
        assert_eq!(pyramid.level(1).dim(), (1, 1, 2, 1));
        assert!((pyramid.level(1)[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((pyramid.level(1)[[0, 0, 1, 0]] - 2.0).abs() < 1e-6);
        assert_eq!(pyramid.level(2).dim(), (1, 1, 1, 1));
    }
}
