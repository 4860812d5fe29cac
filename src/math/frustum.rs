// Copyright @yucwang 2026

use super::constants::{Float, Matrix4f};

/// Side extents at the near plane plus near/far depths, in view space.
/// View space looks down +z.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frustum {
    pub left: Float,
    pub right: Float,
    pub bottom: Float,
    pub top: Float,
    pub near: Float,
    pub far: Float,
}

impl Default for Frustum {
    fn default() -> Self {
        Self::unit_cube()
    }
}

impl Frustum {
    pub fn new(left: Float, right: Float, bottom: Float, top: Float, near: Float, far: Float) -> Self {
        Self { left, right, bottom, top, near, far }
    }

    /// The centred [-1, 1] cube used for grid-to-grid resampling.
    pub fn unit_cube() -> Self {
        Self::new(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0)
    }

    /// Symmetric perspective frustum from a vertical field of view.
    pub fn from_fov(fov_y_radians: Float, aspect: Float, near: Float, far: Float) -> Self {
        let top = near * (0.5 * fov_y_radians).tan();
        let right = top * aspect;
        Self::new(-right, right, -top, top, near, far)
    }

    pub fn depth_range(&self) -> Float {
        self.far - self.near
    }

    pub fn as_array(&self) -> [Float; 6] {
        [self.left, self.right, self.bottom, self.top, self.near, self.far]
    }

    pub fn perspective_matrix(&self) -> Matrix4f {
        let (l, r, b, t, n, f) = (self.left, self.right, self.bottom, self.top, self.near, self.far);
        Matrix4f::new(
            2.0 * n / (r - l), 0.0, -(r + l) / (r - l), 0.0,
            0.0, 2.0 * n / (t - b), -(t + b) / (t - b), 0.0,
            0.0, 0.0, (f + n) / (f - n), -2.0 * f * n / (f - n),
            0.0, 0.0, 1.0, 0.0,
        )
    }

    pub fn orthographic_matrix(&self) -> Matrix4f {
        let (l, r, b, t, n, f) = (self.left, self.right, self.bottom, self.top, self.near, self.far);
        Matrix4f::new(
            2.0 / (r - l), 0.0, 0.0, -(r + l) / (r - l),
            0.0, 2.0 / (t - b), 0.0, -(t + b) / (t - b),
            0.0, 0.0, 2.0 / (f - n), -(f + n) / (f - n),
            0.0, 0.0, 0.0, 1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::constants::Vector4f;

    #[test]
    fn test_unit_cube_orthographic_is_identity() {
        assert_eq!(Frustum::unit_cube().orthographic_matrix(), Matrix4f::identity());
    }

    #[test]
    fn test_perspective_maps_near_and_far_planes() {
        let frustum = Frustum::from_fov(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 5.0);
        let p = frustum.perspective_matrix();
        let near = p * Vector4f::new(0.0, 0.0, 1.0, 1.0);
        let far = p * Vector4f::new(0.0, 0.0, 5.0, 1.0);
        assert!((near.z / near.w + 1.0).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }
}
