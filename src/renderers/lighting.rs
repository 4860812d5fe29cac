// Copyright @yucwang 2026

use ndarray::{Array1, Array5, Axis, Zip};

use crate::core::error::{RenderError, Result};
use crate::core::field::{channels, VolumeField};
use crate::core::grid_transform::GridTransform;
use crate::math::constants::{Float, Vector3f};
use crate::renderers::renderer::Renderer;

/// A light that computes its in-scattered radiance on the density grid.
pub trait GridLight: Send + Sync {
    fn is_monochrome(&self) -> bool;

    /// Light field `(N, D, H, W, 1|3)` for `density` `(N, D, H, W, 1)`.
    /// `transforms` holds one transform per batch element.
    fn grid_lighting(&self, density: &VolumeField, transforms: &[GridTransform], renderer: &Renderer) -> Result<VolumeField>;
}

pub enum LightSource {
    Procedural(Box<dyn GridLight>),
    /// Light field broadcastable to the density's spatial shape, mono or RGB.
    Precomputed(VolumeField),
}

/// Scattered light: density times incoming radiance and the scattering ratio.
pub fn volume_scatter(density: &VolumeField, light_in: &[Float], scattering_ratio: Float) -> VolumeField {
    let color = Array1::from(light_in.iter().map(|c| c * scattering_ratio).collect::<Vec<_>>());
    density * &color
}

/// Uniform light from every direction.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbientLight {
    pub intensity: Vector3f,
    pub monochrome: bool,
}

impl AmbientLight {
    pub fn new(intensity: Float) -> Self {
        Self { intensity: Vector3f::new(intensity, intensity, intensity), monochrome: true }
    }

    pub fn colored(intensity: Vector3f) -> Self {
        Self { intensity, monochrome: false }
    }
}

impl GridLight for AmbientLight {
    fn is_monochrome(&self) -> bool {
        self.monochrome
    }

    fn grid_lighting(&self, density: &VolumeField, _transforms: &[GridTransform], renderer: &Renderer) -> Result<VolumeField> {
        let light_in: Vec<Float> = if self.monochrome {
            vec![self.intensity.x]
        } else {
            self.intensity.iter().cloned().collect()
        };
        Ok(volume_scatter(density, &light_in, renderer.settings().scattering_ratio))
    }
}

/// Unshadowed point light with inverse square falloff.
#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    pub position: Vector3f,
    pub intensity: Vector3f,
    pub monochrome: bool,
    /// Distance below which the falloff is clamped.
    pub min_distance: Float,
}

impl PointLight {
    pub fn new(position: Vector3f, intensity: Vector3f) -> Self {
        Self { position, intensity, monochrome: false, min_distance: 1e-2 }
    }
}

impl GridLight for PointLight {
    fn is_monochrome(&self) -> bool {
        self.monochrome
    }

    fn grid_lighting(&self, density: &VolumeField, transforms: &[GridTransform], renderer: &Renderer) -> Result<VolumeField> {
        let (batch, depth, height, width, _) = density.dim();
        if transforms.len() != batch {
            return Err(RenderError::BatchMismatch { transforms: transforms.len(), batch });
        }
        let light_channels = if self.monochrome { 1 } else { 3 };
        let ratio = renderer.settings().scattering_ratio;
        let min_sq = self.min_distance * self.min_distance;

        let mut light = Array5::<Float>::zeros((batch, depth, height, width, light_channels));
        for (n, transform) in transforms.iter().enumerate() {
            let mut out = light.index_axis_mut(Axis(0), n);
            for ((k, j, i, c), value) in out.indexed_iter_mut() {
                let distance_sq = (transform.cell_center_world(i, j, k) - self.position).norm_squared().max(min_sq);
                *value = self.intensity[c] * ratio * density[[n, k, j, i, 0]] / distance_sq;
            }
        }
        Ok(light)
    }
}

fn luma_weighted(light: &VolumeField, luma: &[Float; 3]) -> VolumeField {
    let (n, d, h, w, _) = light.dim();
    let mut mono = Array5::<Float>::zeros((n, d, h, w, 1));
    Zip::from(mono.lanes_mut(Axis(4)))
        .and(light.lanes(Axis(4)))
        .for_each(|mut out, rgb| out[0] = rgb[0] * luma[0] + rgb[1] * luma[1] + rgb[2] * luma[2]);
    mono
}

/// Converts a light field to `target` channels: RGB to luma or mono to RGB.
fn convert_light(light: VolumeField, target: usize, luma: &[Float; 3]) -> Result<VolumeField> {
    match (channels(&light), target) {
        (c, t) if c == t => Ok(light),
        (3, 1) => Ok(luma_weighted(&light, luma)),
        (1, 3) => {
            let (n, d, h, w, _) = light.dim();
            light
                .broadcast((n, d, h, w, 3))
                .map(|view| view.to_owned())
                .ok_or_else(|| RenderError::Shape("cannot broadcast monochrome light to RGB".to_string()))
        }
        (c, _) => Err(RenderError::Shape(format!("light fields must have 1 or 3 channels, has {}", c))),
    }
}

impl Renderer {
    /// Sums all light sources into one field with 1 (monochrome) or 3
    /// channels matching the density's batch and spatial shape.
    pub fn build_light_grid(
        &self,
        density: &VolumeField,
        transforms: &[GridTransform],
        lights: &[LightSource],
        monochrome: bool,
    ) -> Result<VolumeField> {
        log::debug!("render lights: {}", lights.len());
        if lights.is_empty() {
            log::warn!("Light list is empty!");
        }
        let (batch, depth, height, width, _) = density.dim();
        let light_channels = if monochrome { 1 } else { 3 };
        let luma = self.settings().luma;
        let mut light_data = Array5::<Float>::zeros((batch, depth, height, width, light_channels));

        for (i, light) in lights.iter().enumerate() {
            let grid = match light {
                LightSource::Procedural(light) => {
                    convert_light(light.grid_lighting(density, transforms, self)?, light_channels, &luma)?
                }
                LightSource::Precomputed(grid) => convert_light(grid.clone(), light_channels, &luma)?,
            };
            let grid = grid.broadcast(light_data.raw_dim()).ok_or_else(|| {
                RenderError::Shape(format!(
                    "light {} with shape {:?} does not match the density shape {:?}",
                    i,
                    grid.shape(),
                    light_data.shape()
                ))
            })?;
            light_data += &grid;
        }
        Ok(light_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::GridSize;
    use crate::core::settings::RendererSettings;
    use crate::math::constants::REC709_LUMA;

    fn renderer() -> Renderer {
        Renderer::cpu(RendererSettings { scattering_ratio: 0.5, ..Default::default() }).unwrap()
    }

    #[test]
    fn test_lights_are_converted_and_accumulated() {
        let density = Array5::<Float>::from_elem((1, 2, 2, 2, 1), 2.0);
        let transforms = vec![GridTransform::unit_cube(GridSize::cube(2))];
        let lights = vec![
            LightSource::Procedural(Box::new(AmbientLight::new(1.0))),
            LightSource::Precomputed(Array5::from_shape_vec((1, 1, 1, 1, 3), vec![1.0, 0.0, 0.0]).unwrap()),
        ];
        let r = renderer();

        let rgb = r.build_light_grid(&density, &transforms, &lights, false).unwrap();
        assert_eq!(rgb.shape(), &[1, 2, 2, 2, 3]);
        assert!((rgb[[0, 1, 1, 1, 0]] - 2.0).abs() < 1e-6);
        assert!((rgb[[0, 1, 1, 1, 1]] - 1.0).abs() < 1e-6);

        let mono = r.build_light_grid(&density, &transforms, &lights, true).unwrap();
        assert_eq!(mono.shape(), &[1, 2, 2, 2, 1]);
        assert!((mono[[0, 0, 0, 0, 0]] - (1.0 + REC709_LUMA[0])).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_light_is_rejected() {
        let density = Array5::<Float>::zeros((1, 2, 2, 2, 1));
        let transforms = vec![GridTransform::unit_cube(GridSize::cube(2))];
        let lights = vec![LightSource::Precomputed(Array5::zeros((1, 3, 2, 2, 1)))];
        assert!(renderer().build_light_grid(&density, &transforms, &lights, true).is_err());
    }

    #[test]
    fn test_point_light_falls_off_with_distance() {
        let density = Array5::<Float>::ones((1, 1, 1, 4, 1));
        let transform = GridTransform::new(GridSize::new(1, 1, 4), nalgebra::Matrix4::identity());
        let mut light = PointLight::new(Vector3f::new(0.0, 0.5, 0.5), Vector3f::new(1.0, 1.0, 1.0));
        light.monochrome = true;
        let field = light.grid_lighting(&density, &[transform], &renderer()).unwrap();
        assert!((field[[0, 0, 0, 0, 0]] - 0.5 / 0.25).abs() < 1e-5);
        assert!(field[[0, 0, 0, 1, 0]] > field[[0, 0, 0, 2, 0]]);
    }
}
