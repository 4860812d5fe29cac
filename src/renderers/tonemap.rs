// Copyright @yucwang 2026

use std::str::FromStr;

use ndarray::{Array, Dimension};

use crate::core::error::{RenderError, Result};
use crate::math::constants::Float;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tonemap {
    None,
    ClipNegative,
    Saturate,
    /// Shift by the minimum if it is negative, then divide by the maximum if
    /// it is positive.
    Normalize,
}

impl Default for Tonemap {
    fn default() -> Self {
        Tonemap::None
    }
}

impl FromStr for Tonemap {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Tonemap::None),
            "CLIP_NEGATIVE" => Ok(Tonemap::ClipNegative),
            "SATURATE" => Ok(Tonemap::Saturate),
            "NORMALIZE" => Ok(Tonemap::Normalize),
            _ => Err(RenderError::Settings(format!("unknown tone mapping: {}", s))),
        }
    }
}

impl Tonemap {
    pub fn apply<D: Dimension>(self, mut image: Array<Float, D>) -> Array<Float, D> {
        match self {
            Tonemap::None => {}
            Tonemap::ClipNegative => image.mapv_inplace(|v| v.max(0.0)),
            Tonemap::Saturate => image.mapv_inplace(|v| v.clamp(0.0, 1.0)),
            Tonemap::Normalize => {
                let min = image.iter().cloned().fold(Float::INFINITY, Float::min);
                if min < 0.0 {
                    image -= min;
                }
                let max = image.iter().cloned().fold(Float::NEG_INFINITY, Float::max);
                if max > 0.0 {
                    image /= max;
                }
            }
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tonemap_modes() {
        let image = array![[-1.0, 0.5], [1.0, 3.0]];
        assert_eq!(Tonemap::None.apply(image.clone()), image);
        assert_eq!(Tonemap::ClipNegative.apply(image.clone()), array![[0.0, 0.5], [1.0, 3.0]]);
        assert_eq!(Tonemap::Saturate.apply(image.clone()), array![[0.0, 0.5], [1.0, 1.0]]);
        assert_eq!(Tonemap::Normalize.apply(image), array![[0.0, 0.375], [0.5, 1.0]]);
        assert_eq!("clip_negative".parse::<Tonemap>().unwrap(), Tonemap::ClipNegative);
    }
}
