// Copyright 2020 @TwoCookingMice

use super::constants::{ Float, Matrix4f, Vector3f, Vector4f };

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    matrix: Matrix4f,
    inv_matrix: Matrix4f
}

impl Default for Transform {
    fn default() -> Self {
        Self { matrix: Matrix4f::identity(),
               inv_matrix: Matrix4f::identity() }
    }
}

impl Transform {
    pub fn new(matrix: Matrix4f) -> Self {
        let inv_matrix = matrix.try_inverse().unwrap_or_else(|| {
            log::warn!("Transform matrix is singular, using identity as its inverse.");
            Matrix4f::identity()
        });
        Self { matrix, inv_matrix }
    }

    pub fn try_new(matrix: Matrix4f) -> Option<Self> {
        matrix.try_inverse().map(|inv_matrix| Self { matrix, inv_matrix })
    }

    pub fn translation(offset: Vector3f) -> Self {
        Self::new(Matrix4f::new_translation(&offset))
    }

    pub fn scaling(scale: Vector3f) -> Self {
        Self::new(Matrix4f::new_nonuniform_scaling(&scale))
    }

    pub fn matrix(&self) -> &Matrix4f {
        &self.matrix
    }

    pub fn inv_matrix(&self) -> &Matrix4f {
        &self.inv_matrix
    }

    pub fn inverse(&self) -> Self {
        Self { matrix: self.inv_matrix, inv_matrix: self.matrix }
    }

    /// `self * other`: applies `other` first.
    pub fn compose(&self, other: &Transform) -> Self {
        Self { matrix: self.matrix * other.matrix,
               inv_matrix: other.inv_matrix * self.inv_matrix }
    }

    pub fn apply_point(&self, p: Vector3f) -> Vector3f {
        dehomogenize(&(self.matrix * Vector4f::new(p[0], p[1], p[2], 1.0)))
    }

    pub fn apply_vector(&self, v: Vector3f) -> Vector3f {
        let x = v[0] * self.matrix[(0, 0)] + v[1] * self.matrix[(0, 1)] + v[2] * self.matrix[(0, 2)];
        let y = v[0] * self.matrix[(1, 0)] + v[1] * self.matrix[(1, 1)] + v[2] * self.matrix[(1, 2)];
        let z = v[0] * self.matrix[(2, 0)] + v[1] * self.matrix[(2, 1)] + v[2] * self.matrix[(2, 2)];

        Vector3f::new(x, y, z)
    }

    pub fn inv_apply_point(&self, p: Vector3f) -> Vector3f {
        dehomogenize(&(self.inv_matrix * Vector4f::new(p[0], p[1], p[2], 1.0)))
    }
}

/// Divides by w. Points at infinity come back as NaN so callers can discard them.
pub fn dehomogenize(p: &Vector4f) -> Vector3f {
    if p[3].abs() < Float::EPSILON {
        return Vector3f::new(Float::NAN, Float::NAN, Float::NAN);
    }
    Vector3f::new(p[0] / p[3], p[1] / p[3], p[2] / p[3])
}

/// World-to-view matrix for a camera at `eye` looking at `target`. View space
/// looks down +z with +x to the right and +y up.
pub fn look_at(eye: Vector3f, target: Vector3f, up: Vector3f) -> Matrix4f {
    let forward = (target - eye).normalize();
    let right = forward.cross(&up).normalize();
    let up = right.cross(&forward).normalize();

    Matrix4f::new(
        right.x, right.y, right.z, -right.dot(&eye),
        up.x, up.y, up.z, -up.dot(&eye),
        forward.x, forward.y, forward.z, -forward.dot(&eye),
        0.0, 0.0, 0.0, 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_inverse_round_trip() {
        let t = Transform::translation(Vector3f::new(1.0, -2.0, 3.0))
            .compose(&Transform::scaling(Vector3f::new(2.0, 0.5, 4.0)));
        let p = Vector3f::new(0.25, 1.5, -0.75);
        let q = t.inv_apply_point(t.apply_point(p));
        assert!((p - q).norm() < 1e-5);
    }

    #[test]
    fn test_look_at_maps_target_onto_positive_z() {
        let eye = Vector3f::new(0.0, 0.0, -3.0);
        let view = Transform::new(look_at(eye, Vector3f::zeros(), Vector3f::new(0.0, 1.0, 0.0)));
        let p = view.apply_point(Vector3f::zeros());
        assert!(p.x.abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
        assert!((p.z - 3.0).abs() < 1e-6);
    }
}
