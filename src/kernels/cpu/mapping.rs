// Copyright @yucwang 2026

use crate::core::field::GridSize;
use crate::kernels::{CoordinateMode, ViewParams};
use crate::math::constants::{Float, Matrix4f, Vector3f, Vector4f};
use crate::math::transform::dehomogenize;

/// Maps output voxel positions to continuous source index coordinates for
/// one (model, view) pair.
#[derive(Debug, Copy, Clone)]
pub(crate) struct CoordinateMapping {
    mode: CoordinateMode,
    input_size: GridSize,
    output_size: GridSize,
    near: Float,
    far: Float,
    /// Forward: inverse projection. Reverse: projection.
    projection: Matrix4f,
    /// Forward: view space to grid index. Reverse: grid index to view space.
    rigid: Matrix4f,
}

impl CoordinateMapping {
    pub(crate) fn new(
        model: &Matrix4f,
        view: &ViewParams,
        input_size: GridSize,
        output_size: GridSize,
        mode: CoordinateMode,
    ) -> Self {
        let inv = |m: &Matrix4f| m.try_inverse().unwrap_or_else(|| {
            log::warn!("Singular matrix in coordinate mapping, using identity.");
            Matrix4f::identity()
        });

        let (projection, rigid) = if mode.is_reverse() {
            (view.projection, view.view * model)
        } else {
            (inv(&view.projection), inv(model) * inv(&view.view))
        };

        Self {
            mode,
            input_size,
            output_size,
            near: view.frustum.near,
            far: view.frustum.far,
            projection,
            rigid,
        }
    }

    /// Source coordinate for the output position `q` (cell centres at `i + 0.5`).
    pub(crate) fn map(&self, q: Vector3f) -> Vector3f {
        if self.mode.is_reverse() {
            self.frustum_from_grid(q)
        } else {
            self.grid_from_frustum(q)
        }
    }

    fn grid_from_frustum(&self, q: Vector3f) -> Vector3f {
        let size = self.output_size;
        let nx = 2.0 * q.x / size.width as Float - 1.0;
        let ny = 2.0 * q.y / size.height as Float - 1.0;

        let p_view = if self.mode.is_linear_depth() {
            let depth = self.near + q.z / size.depth as Float * (self.far - self.near);
            let a = dehomogenize(&(self.projection * Vector4f::new(nx, ny, -1.0, 1.0)));
            let b = dehomogenize(&(self.projection * Vector4f::new(nx, ny, 1.0, 1.0)));
            let dz = b.z - a.z;
            if dz.abs() < Float::EPSILON {
                return Vector3f::repeat(Float::NAN);
            }
            a + (b - a) * ((depth - a.z) / dz)
        } else {
            let nz = 2.0 * q.z / size.depth as Float - 1.0;
            dehomogenize(&(self.projection * Vector4f::new(nx, ny, nz, 1.0)))
        };

        dehomogenize(&(self.rigid * Vector4f::new(p_view.x, p_view.y, p_view.z, 1.0)))
    }

    fn frustum_from_grid(&self, q: Vector3f) -> Vector3f {
        let size = self.input_size;
        let p_view = self.rigid * Vector4f::new(q.x, q.y, q.z, 1.0);
        let clip = self.projection * p_view;
        if clip.w <= 0.0 {
            return Vector3f::repeat(Float::NAN);
        }
        let ndc = dehomogenize(&clip);
        let x = (ndc.x + 1.0) * 0.5 * size.width as Float;
        let y = (ndc.y + 1.0) * 0.5 * size.height as Float;
        let z = if self.mode.is_linear_depth() {
            let view_z = p_view.z / p_view.w;
            (view_z - self.near) / (self.far - self.near) * size.depth as Float
        } else {
            (ndc.z + 1.0) * 0.5 * size.depth as Float
        };
        Vector3f::new(x, y, z)
    }

    /// `(x, y, z, lod)` for output voxel `(i, j, k)` = (x, y, z) index.
    pub(crate) fn lookup_entry(&self, i: usize, j: usize, k: usize) -> [Float; 4] {
        let q = Vector3f::new(i as Float + 0.5, j as Float + 0.5, k as Float + 0.5);
        let p = self.map(q);
        let mut footprint: Float = 0.0;
        for axis in 0..3 {
            let mut e = Vector3f::zeros();
            e[axis] = 1.0;
            let d = (self.map(q + e) - p).norm();
            if d.is_finite() {
                footprint = footprint.max(d);
            }
        }
        let lod = if footprint > 1.0 { footprint.log2() } else { 0.0 };
        [p.x, p.y, p.z, lod]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid_transform::GridTransform;
    use crate::math::frustum::Frustum;

    #[test]
    fn test_identity_camera_hits_cell_centers() {
        let size = GridSize::cube(8);
        let grid = GridTransform::unit_cube(size);
        for mode in [CoordinateMode::Transform, CoordinateMode::TransformLinDepth] {
            let mapping = CoordinateMapping::new(grid.model_matrix(), &ViewParams::identity(), size, size, mode);
            let e = mapping.lookup_entry(3, 5, 6);
            assert!((e[0] - 3.5).abs() < 1e-4);
            assert!((e[1] - 5.5).abs() < 1e-4);
            assert!((e[2] - 6.5).abs() < 1e-4);
            assert!(e[3].abs() < 1e-4);
        }
    }

    #[test]
    fn test_reverse_inverts_forward_for_perspective() {
        let grid_size = GridSize::cube(16);
        let cam_size = GridSize::new(12, 10, 10);
        let grid = GridTransform::unit_cube(grid_size);
        let frustum = Frustum::from_fov(0.8, 1.0, 2.0, 6.0);
        let view = ViewParams::new(
            Matrix4f::new_translation(&Vector3f::new(0.0, 0.0, 4.0)),
            frustum.perspective_matrix(),
            frustum,
        );
        for mode in [CoordinateMode::Transform, CoordinateMode::TransformLinDepth] {
            let forward = CoordinateMapping::new(grid.model_matrix(), &view, grid_size, cam_size, mode);
            let reverse = CoordinateMapping::new(grid.model_matrix(), &view, cam_size, grid_size, mode.opposite());
            let q = Vector3f::new(4.5, 6.5, 3.5);
            let back = reverse.map(forward.map(q));
            assert!((back - q).norm() < 1e-3, "{:?} -> {:?}", q, back);
        }
    }

    #[test]
    fn test_points_behind_perspective_camera_are_discarded() {
        let frustum = Frustum::from_fov(0.8, 1.0, 1.0, 3.0);
        let view = ViewParams::new(Matrix4f::identity(), frustum.perspective_matrix(), frustum);
        let grid = GridTransform::unit_cube(GridSize::cube(4));
        let reverse = CoordinateMapping::new(
            &(Matrix4f::new_translation(&Vector3f::new(0.0, 0.0, -10.0)) * grid.model_matrix()),
            &view,
            GridSize::cube(4),
            GridSize::cube(4),
            CoordinateMode::TransformReverse,
        );
        assert!(reverse.map(Vector3f::new(2.0, 2.0, 2.0)).x.is_nan());
    }
}
