// Copyright @yucwang 2026

use std::str::FromStr;

use crate::core::error::{RenderError, Result};
use crate::kernels::{BlendMode, BoundaryMode, Interpolation, MipMode, SamplingOptions};
use crate::math::constants::{Float, REC709_LUMA};

/// Which layer evaluates depth blending.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlendPath {
    /// Forward and backward formulas evaluated with `ndarray` in the renderer.
    Explicit,
    /// `reduce_blend` / `reduce_blend_grad` of the kernel backend.
    Kernel,
}

impl FromStr for BlendPath {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EXPLICIT" => Ok(BlendPath::Explicit),
            "KERNEL" => Ok(BlendPath::Kernel),
            _ => Err(RenderError::Settings(format!("unknown blend path: {}", s))),
        }
    }
}

/// Renderer configuration. Construct with `Default` and adjust fields, then
/// `Renderer::new` validates it.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    pub filter_mode: Interpolation,
    pub boundary_mode: BoundaryMode,
    pub mip_mode: MipMode,
    pub num_mips: usize,
    pub mip_bias: Float,
    /// Attach backward rules to sampling operations.
    pub sample_gradients: bool,
    /// Added to `mip_bias` for the inverse sampling of backward passes.
    pub gradient_mip_bias_add: Float,
    pub blend_mode: BlendMode,
    pub blend_path: BlendPath,
    /// Weights for RGB to monochrome light conversion.
    pub luma: [Float; 3],
    /// Use the fused ray-march kernel when the blend mode allows it.
    pub fused: bool,
    pub global_sampling: bool,
    pub scattering_ratio: Float,
    /// Static camera mismatches are errors instead of warnings.
    pub strict_static: bool,
    pub check_grids: bool,
    pub render_as_sdf: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            filter_mode: Interpolation::Linear,
            boundary_mode: BoundaryMode::Border,
            mip_mode: MipMode::Linear,
            num_mips: 2,
            mip_bias: 0.0,
            sample_gradients: true,
            gradient_mip_bias_add: 0.0,
            blend_mode: BlendMode::BeerLambert,
            blend_path: BlendPath::Explicit,
            luma: REC709_LUMA,
            fused: false,
            global_sampling: false,
            scattering_ratio: 1.0,
            strict_static: false,
            check_grids: false,
            render_as_sdf: false,
        }
    }
}

impl RendererSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.mip_bias.is_finite() || !self.gradient_mip_bias_add.is_finite() {
            return Err(RenderError::Settings("mip biases must be finite".to_string()));
        }
        if self.mip_mode != MipMode::None && self.num_mips == 0 {
            return Err(RenderError::Settings(format!(
                "mip mode {:?} needs at least one mip level",
                self.mip_mode
            )));
        }
        if self.num_mips > 16 {
            return Err(RenderError::Settings(format!("too many mip levels: {}", self.num_mips)));
        }
        if self.luma.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RenderError::Settings(format!("invalid luma weights {:?}", self.luma)));
        }
        if !self.scattering_ratio.is_finite() || self.scattering_ratio < 0.0 {
            return Err(RenderError::Settings(format!(
                "scattering ratio must be non-negative, is {}",
                self.scattering_ratio
            )));
        }
        if self.blend_mode.is_alpha() && self.blend_path == BlendPath::Explicit {
            log::debug!("{} blending always runs through the kernel path.", self.blend_mode);
        }
        Ok(())
    }

    pub fn sampling_options(&self) -> SamplingOptions {
        SamplingOptions {
            interpolation: self.filter_mode,
            boundary: self.boundary_mode,
            mip_mode: self.mip_mode,
            mip_count: if self.mip_mode == MipMode::None { 0 } else { self.num_mips },
            mip_bias: self.mip_bias,
        }
    }

    pub fn gradient_sampling_options(&self) -> SamplingOptions {
        self.sampling_options().with_mip_bias(self.mip_bias + self.gradient_mip_bias_add)
    }

    /// Explicit formulas cover every mode except the alpha compositing ones.
    pub fn effective_blend_path(&self, mode: BlendMode) -> BlendPath {
        if mode.is_alpha() {
            BlendPath::Kernel
        } else {
            self.blend_path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = RendererSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sampling_options().mip_count, 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let settings = RendererSettings { scattering_ratio: -1.0, ..Default::default() };
        assert!(matches!(settings.validate(), Err(RenderError::Settings(_))));

        let settings = RendererSettings { num_mips: 0, ..Default::default() };
        assert!(settings.validate().is_err());

        let settings = RendererSettings { num_mips: 0, mip_mode: MipMode::None, ..Default::default() };
        assert!(settings.validate().is_ok());

        let settings = RendererSettings { mip_bias: Float::NAN, ..Default::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_gradient_options_add_bias() {
        let settings = RendererSettings { mip_bias: 0.5, gradient_mip_bias_add: 1.0, ..Default::default() };
        assert_eq!(settings.gradient_sampling_options().mip_bias, 1.5);
        assert_eq!(settings.effective_blend_path(BlendMode::Alpha), BlendPath::Kernel);
    }
}
