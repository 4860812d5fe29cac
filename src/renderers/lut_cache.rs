// Copyright @yucwang 2026

use std::sync::Arc;

use ndarray::{s, Array4, Array5, Axis};

use crate::core::computation_node::ComputationNode;
use crate::core::error::{RenderError, Result};
use crate::core::field::GridSize;
use crate::core::grid_transform::GridTransform;
use crate::kernels::{CoordinateMode, KernelBackend};
use crate::math::constants::Float;
use crate::renderers::renderer::Renderer;
use crate::renderers::transform_sampler::grid_view_params;
use crate::sensors::camera::{CachedLut, Camera, LutDirection};

pub fn format_bytes(size: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", value, UNITS[unit])
}

/// Level-of-detail statistics of a camera lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct LodStats {
    pub shape: GridSize,
    pub step: Float,
    pub lod_min: Float,
    pub lod_max: Float,
    /// Range of the inverse table, used by gradient passes.
    pub gradient_lod: Option<(Float, Float)>,
}

/// Builds lookup tables `(V, D', H', W', 4)` for cameras sharing one resolution.
pub fn build_camera_luts(
    kernels: &dyn KernelBackend,
    transform: &GridTransform,
    cameras: &[&Camera],
    direction: LutDirection,
) -> Result<Array5<Float>> {
    let camera_size = cameras
        .first()
        .ok_or_else(|| RenderError::Config("no cameras given".to_string()))?
        .resolution();
    let views: Vec<_> = cameras.iter().map(|c| c.view_params()).collect();
    let (input_size, output_size, mode) = match direction {
        LutDirection::Forward => (transform.grid_size(), camera_size, CoordinateMode::TransformLinDepth),
        LutDirection::Inverse => (camera_size, transform.grid_size(), CoordinateMode::TransformLinDepthReverse),
    };
    kernels.build_lookup_table(input_size, &[*transform.model_matrix()], &views, output_size, mode)
}

/// Returns the cached tables of `cameras` for one direction, building the
/// missing or outdated ones for the whole group at once.
pub fn camera_luts(
    kernels: &dyn KernelBackend,
    transform: &GridTransform,
    cameras: &[Arc<Camera>],
    direction: LutDirection,
) -> Result<Vec<Arc<Array4<Float>>>> {
    let mut stale: Vec<&Camera> = Vec::new();
    for camera in cameras {
        match camera.cached_lut(direction) {
            Some(cached) if cached.is_valid_for(transform, camera.pose_version()) => {}
            Some(_) => {
                log::debug!("{} has an outdated {:?} lookup table, rebuilding.", camera.describe(), direction);
                stale.push(camera.as_ref());
            }
            None => stale.push(camera.as_ref()),
        }
    }

    if !stale.is_empty() {
        let luts = build_camera_luts(kernels, transform, &stale, direction)?;
        log::info!("generated LuTs: {:?} {}", luts.shape(), format_bytes(luts.len() * std::mem::size_of::<Float>()));
        for (camera, lut) in stale.iter().zip(luts.outer_iter()) {
            *camera.lut_slot(direction).lock() = Some(CachedLut {
                lut: Arc::new(lut.to_owned()),
                transform_id: transform.id(),
                transform_version: transform.version(),
                pose_version: camera.pose_version(),
            });
        }
    }

    cameras
        .iter()
        .map(|camera| {
            camera
                .cached_lut(direction)
                .map(|cached| cached.lut)
                .ok_or_else(|| RenderError::Config(format!("lookup table of {} missing after setup", camera.describe())))
        })
        .collect()
}

fn lod_range(lut: &Array5<Float>) -> (Float, Float) {
    lut.slice(s![.., .., .., .., 3])
        .iter()
        .fold((Float::INFINITY, Float::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

impl Renderer {
    /// Uncached lookup table `(D', H', W', 4)` of one camera.
    pub fn get_camera_lut(&self, transform: &GridTransform, camera: &Camera, direction: LutDirection) -> Result<Array4<Float>> {
        let luts = build_camera_luts(self.kernels().as_ref(), transform, &[camera], direction)?;
        Ok(luts.index_axis_move(Axis(0), 0))
    }

    pub fn camera_luts(&self, transform: &GridTransform, cameras: &[Arc<Camera>], direction: LutDirection) -> Result<Vec<Arc<Array4<Float>>>> {
        camera_luts(self.kernels().as_ref(), transform, cameras, direction)
    }

    /// Lookup tables between grids, one per target. With `relative` the
    /// entries are offsets from the output cell centres.
    pub fn get_transform_lut(
        &self,
        from: &GridTransform,
        to: &[GridTransform],
        direction: LutDirection,
        relative: bool,
    ) -> Result<Array5<Float>> {
        let target = to.first().ok_or_else(|| RenderError::Config("no target transform given".to_string()))?;
        let views: Vec<_> = to.iter().map(grid_view_params).collect();
        let (input_size, output_size, mode) = match direction {
            LutDirection::Forward => (from.grid_size(), target.grid_size(), CoordinateMode::Transform),
            LutDirection::Inverse => (target.grid_size(), from.grid_size(), CoordinateMode::TransformReverse),
        };
        let mut luts = self
            .kernels()
            .build_lookup_table(input_size, &[*from.model_matrix()], &views, output_size, mode)?;
        if relative {
            for ((_, k, j, i, c), value) in luts.indexed_iter_mut() {
                *value -= match c {
                    0 => i as Float + 0.5,
                    1 => j as Float + 0.5,
                    2 => k as Float + 0.5,
                    _ => 0.0,
                };
            }
        }
        Ok(luts)
    }

    /// Reports the level-of-detail range of a camera's tables.
    pub fn check_lod(&self, transform: &GridTransform, camera: &Camera, check_inverse: bool, name: Option<&str>) -> Result<LodStats> {
        let forward = build_camera_luts(self.kernels().as_ref(), transform, &[camera], LutDirection::Forward)?;
        let (lod_min, lod_max) = lod_range(&forward);
        drop(forward);

        let gradient_lod = if check_inverse {
            let inverse = build_camera_luts(self.kernels().as_ref(), transform, &[camera], LutDirection::Inverse)?;
            Some(lod_range(&inverse))
        } else {
            None
        };

        let shape = camera.resolution();
        if let Some(name) = name {
            let mebi_voxels = shape.voxel_count() as f64 / (1024.0 * 1024.0);
            match gradient_lod {
                Some((grad_min, grad_max)) => log::info!(
                    "{} stats: shape: {} ({:.2} Mi), step: {}, LoD: {} - {} (grad: {} - {})",
                    name, shape, mebi_voxels, camera.depth_step(), lod_min, lod_max, grad_min, grad_max
                ),
                None => log::info!(
                    "{} stats: shape: {} ({:.2} Mi), step: {}, LoD: {} - {}",
                    name, shape, mebi_voxels, camera.depth_step(), lod_min, lod_max
                ),
            }
        }

        Ok(LodStats { shape, step: camera.depth_step(), lod_min, lod_max, gradient_lod })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::RendererSettings;
    use crate::kernels::cpu::CpuKernels;
    use crate::math::constants::{Matrix4f, Vector3f};

    fn renderer() -> Renderer {
        Renderer::new(Arc::new(CpuKernels::new()), RendererSettings::default()).unwrap()
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00B");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00MiB");
    }

    #[test]
    fn test_luts_are_built_once_and_rebuilt_on_change() {
        let size = GridSize::cube(4);
        let mut grid = GridTransform::unit_cube(size);
        let cameras = vec![
            Arc::new(Camera::identity(size).with_static(&grid)),
            Arc::new(Camera::identity(size).with_static(&grid)),
        ];
        let kernels = CpuKernels::new();
        let first = camera_luts(&kernels, &grid, &cameras, LutDirection::Forward).unwrap();
        let again = camera_luts(&kernels, &grid, &cameras, LutDirection::Forward).unwrap();
        assert!(Arc::ptr_eq(&first[0], &again[0]));
        assert!(Arc::ptr_eq(&first[1], &again[1]));
        assert!(!cameras[0].has_lut(LutDirection::Inverse));

        grid.set_model(Matrix4f::new_translation(&Vector3f::new(0.25, 0.0, 0.0)) * grid.model_matrix());
        let moved = camera_luts(&kernels, &grid, &cameras, LutDirection::Forward).unwrap();
        assert!(!Arc::ptr_eq(&first[0], &moved[0]));
        assert!((moved[0][[0, 0, 0, 0]] - first[0][[0, 0, 0, 0]]).abs() > 0.1);

        cameras[1].reset_luts();
        assert!(!cameras[1].has_lut(LutDirection::Forward));
    }

    #[test]
    fn test_check_lod_reports_downsampling() {
        let grid = GridTransform::unit_cube(GridSize::cube(16));
        let camera = Camera::identity(GridSize::cube(4));
        let stats = renderer().check_lod(&grid, &camera, true, Some("test camera")).unwrap();
        assert!((stats.lod_min - 2.0).abs() < 1e-4);
        assert!((stats.lod_max - 2.0).abs() < 1e-4);
        let (grad_min, grad_max) = stats.gradient_lod.unwrap();
        assert!(grad_min.abs() < 1e-4 && grad_max.abs() < 1e-4);
    }

    #[test]
    fn test_relative_transform_lut_is_zero_for_identical_grids() {
        let grid = GridTransform::unit_cube(GridSize::new(3, 4, 5));
        let lut = renderer().get_transform_lut(&grid, &[grid.clone()], LutDirection::Forward, true).unwrap();
        assert_eq!(lut.shape(), &[1, 3, 4, 5, 4]);
        assert!(lut.iter().all(|v| v.abs() < 1e-5));
    }
}
