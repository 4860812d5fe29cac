// Copyright @yucwang 2026

use crate::core::computation_node::{generate_node_id, ComputationNode};
use crate::core::field::GridSize;
use crate::math::constants::{Float, Matrix4f, Vector3f};
use crate::math::transform::Transform;

/// Placement of a voxel grid in world space.
///
/// The model matrix maps continuous grid index coordinates `(x, y, z)` to
/// world space. Index coordinates put the centre of cell `(i, j, k)` at
/// `(i + 0.5, j + 0.5, k + 0.5)`, with x along width and z along depth.
///
/// Clones share the id; `set_model` bumps the version so cached lookup tables
/// built against an older placement can be detected.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTransform {
    id: u64,
    version: u64,
    model: Transform,
    grid_size: GridSize,
}

impl GridTransform {
    pub fn new(grid_size: GridSize, model: Matrix4f) -> Self {
        Self {
            id: generate_node_id(),
            version: generate_node_id(),
            model: Transform::new(model),
            grid_size,
        }
    }

    /// Grid spanning the centred [-1, 1] cube.
    pub fn unit_cube(grid_size: GridSize) -> Self {
        Self::new(grid_size, index_to_unit_cube(grid_size))
    }

    /// Grid centred on the origin with the given world-space cell size.
    pub fn centered(grid_size: GridSize, cell_scale: Vector3f) -> Self {
        let half = Vector3f::new(
            grid_size.width as Float,
            grid_size.height as Float,
            grid_size.depth as Float,
        ) * 0.5;
        let model = Matrix4f::new_nonuniform_scaling(&cell_scale) * Matrix4f::new_translation(&-half);
        Self::new(grid_size, model)
    }

    pub fn grid_size(&self) -> GridSize {
        self.grid_size
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn model_matrix(&self) -> &Matrix4f {
        self.model.matrix()
    }

    pub fn inverse_model_matrix(&self) -> &Matrix4f {
        self.model.inv_matrix()
    }

    pub fn transform(&self) -> &Transform {
        &self.model
    }

    pub fn set_model(&mut self, model: Matrix4f) {
        self.model = Transform::new(model);
        self.version = generate_node_id();
    }

    /// Projection used when this grid is the target of a non-perspective resample.
    pub fn identity_projection(&self) -> Matrix4f {
        Matrix4f::identity()
    }

    /// Maps this grid's index space onto the [-1, 1] cube.
    pub fn index_to_ndc(&self) -> Matrix4f {
        index_to_unit_cube(self.grid_size)
    }

    /// True if both handles describe the same grid placement.
    pub fn same_frame(&self, other: &GridTransform) -> bool {
        self.id == other.id
    }

    pub fn cell_center_world(&self, x: usize, y: usize, z: usize) -> Vector3f {
        self.model.apply_point(Vector3f::new(x as Float + 0.5, y as Float + 0.5, z as Float + 0.5))
    }
}

impl ComputationNode for GridTransform {
    fn id(&self) -> u64 {
        self.id
    }

    fn describe(&self) -> String {
        format!("GridTransform_{} (v{}, {})", self.id, self.version, self.grid_size)
    }
}

fn index_to_unit_cube(grid_size: GridSize) -> Matrix4f {
    let scale = Vector3f::new(
        2.0 / grid_size.width.max(1) as Float,
        2.0 / grid_size.height.max(1) as Float,
        2.0 / grid_size.depth.max(1) as Float,
    );
    Matrix4f::new_translation(&Vector3f::new(-1.0, -1.0, -1.0)) * Matrix4f::new_nonuniform_scaling(&scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_cube_cell_centers() {
        let t = GridTransform::unit_cube(GridSize::cube(4));
        let p = t.cell_center_world(0, 0, 0);
        assert!((p - Vector3f::new(-0.75, -0.75, -0.75)).norm() < 1e-6);
        let p = t.cell_center_world(3, 3, 3);
        assert!((p - Vector3f::new(0.75, 0.75, 0.75)).norm() < 1e-6);
    }

    #[test]
    fn test_set_model_bumps_version_but_keeps_identity() {
        let mut t = GridTransform::unit_cube(GridSize::cube(2));
        let copy = t.clone();
        let before = t.version();
        t.set_model(Matrix4f::identity());
        assert!(t.version() > before);
        assert!(t.same_frame(&copy));
        assert!(!t.same_frame(&GridTransform::unit_cube(GridSize::cube(2))));
    }

    #[test]
    fn test_centered_grid_spans_scaled_extent() {
        let t = GridTransform::centered(GridSize::new(2, 4, 8), Vector3f::new(0.25, 0.5, 1.0));
        let corner = t.transform().apply_point(Vector3f::zeros());
        assert!((corner - Vector3f::new(-1.0, -1.0, -1.0)).norm() < 1e-6);
    }
}
