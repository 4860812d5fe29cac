// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::Array4;
use parking_lot::Mutex;

use crate::core::computation_node::{generate_node_id, ComputationNode};
use crate::core::field::GridSize;
use crate::core::grid_transform::GridTransform;
use crate::kernels::ViewParams;
use crate::math::constants::{Float, Matrix4f, Vector3f};
use crate::math::frustum::Frustum;
use crate::math::transform::look_at;

/// Zero padding applied around a rendered image, in pixels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ScissorPad {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LutDirection {
    /// Grid to camera frustum.
    Forward,
    /// Camera frustum to grid.
    Inverse,
}

impl LutDirection {
    pub fn opposite(self) -> Self {
        match self {
            LutDirection::Forward => LutDirection::Inverse,
            LutDirection::Inverse => LutDirection::Forward,
        }
    }
}

/// A lookup table together with the state it was built against.
#[derive(Debug, Clone)]
pub struct CachedLut {
    pub lut: Arc<Array4<Float>>,
    pub transform_id: u64,
    pub transform_version: u64,
    pub pose_version: u64,
}

impl CachedLut {
    pub fn is_valid_for(&self, transform: &GridTransform, pose_version: u64) -> bool {
        self.transform_id == transform.id()
            && self.transform_version == transform.version()
            && self.pose_version == pose_version
    }
}

pub struct Camera {
    id: u64,
    view: Matrix4f,
    projection: Matrix4f,
    frustum: Frustum,
    resolution: GridSize,
    depth_step: Float,
    static_transform: Option<GridTransform>,
    scissor_pad: Option<ScissorPad>,
    pose_version: u64,
    forward_lut: Mutex<Option<CachedLut>>,
    inverse_lut: Mutex<Option<CachedLut>>,
}

impl Camera {
    /// Camera with an explicit projection. The depth step defaults to the
    /// view-space length of one depth slice.
    pub fn new(view: Matrix4f, projection: Matrix4f, frustum: Frustum, resolution: GridSize) -> Self {
        let depth_step = frustum.depth_range() / resolution.depth.max(1) as Float;
        Self {
            id: generate_node_id(),
            view,
            projection,
            frustum,
            resolution,
            depth_step,
            static_transform: None,
            scissor_pad: None,
            pose_version: generate_node_id(),
            forward_lut: Mutex::new(None),
            inverse_lut: Mutex::new(None),
        }
    }

    pub fn orthographic(view: Matrix4f, frustum: Frustum, resolution: GridSize) -> Self {
        Self::new(view, frustum.orthographic_matrix(), frustum, resolution)
    }

    /// Perspective camera at `eye` looking at `target`. The aspect ratio
    /// follows the resolution.
    pub fn perspective(
        eye: Vector3f,
        target: Vector3f,
        up: Vector3f,
        fov_y_radians: Float,
        near: Float,
        far: Float,
        resolution: GridSize,
    ) -> Self {
        let aspect = resolution.width as Float / resolution.height.max(1) as Float;
        let frustum = Frustum::from_fov(fov_y_radians, aspect, near, far);
        Self::new(look_at(eye, target, up), frustum.perspective_matrix(), frustum, resolution)
    }

    /// Orthographic camera whose frustum is the unit cube seen from the front.
    pub fn identity(resolution: GridSize) -> Self {
        Self::orthographic(Matrix4f::identity(), Frustum::unit_cube(), resolution)
    }

    pub fn with_depth_step(mut self, depth_step: Float) -> Self {
        self.depth_step = depth_step;
        self
    }

    /// Marks the camera as fixed relative to `transform`, enabling LUT caching.
    pub fn with_static(mut self, transform: &GridTransform) -> Self {
        self.static_transform = Some(transform.clone());
        self
    }

    pub fn with_scissor_pad(mut self, pad: ScissorPad) -> Self {
        self.scissor_pad = Some(pad);
        self
    }

    pub fn view_matrix(&self) -> &Matrix4f {
        &self.view
    }

    pub fn projection_matrix(&self) -> &Matrix4f {
        &self.projection
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn resolution(&self) -> GridSize {
        self.resolution
    }

    pub fn depth_step(&self) -> Float {
        self.depth_step
    }

    pub fn is_static(&self) -> bool {
        self.static_transform.is_some()
    }

    pub fn static_transform(&self) -> Option<&GridTransform> {
        self.static_transform.as_ref()
    }

    pub fn scissor_pad(&self) -> Option<ScissorPad> {
        self.scissor_pad
    }

    pub fn pose_version(&self) -> u64 {
        self.pose_version
    }

    pub fn view_params(&self) -> ViewParams {
        ViewParams::new(self.view, self.projection, self.frustum)
    }

    pub fn set_view(&mut self, view: Matrix4f) {
        self.view = view;
        self.pose_version = generate_node_id();
    }

    pub fn set_projection(&mut self, projection: Matrix4f, frustum: Frustum) {
        self.projection = projection;
        self.frustum = frustum;
        self.pose_version = generate_node_id();
    }

    pub fn lut_slot(&self, direction: LutDirection) -> &Mutex<Option<CachedLut>> {
        match direction {
            LutDirection::Forward => &self.forward_lut,
            LutDirection::Inverse => &self.inverse_lut,
        }
    }

    pub fn cached_lut(&self, direction: LutDirection) -> Option<CachedLut> {
        self.lut_slot(direction).lock().clone()
    }

    pub fn has_lut(&self, direction: LutDirection) -> bool {
        self.lut_slot(direction).lock().is_some()
    }

    pub fn reset_luts(&self) {
        *self.forward_lut.lock() = None;
        *self.inverse_lut.lock() = None;
    }
}

impl ComputationNode for Camera {
    fn id(&self) -> u64 {
        self.id
    }

    fn describe(&self) -> String {
        format!(
            "Camera_{} {} step {:.4}{}",
            self.id,
            self.resolution,
            self.depth_step,
            if self.is_static() { " static" } else { "" }
        )
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
