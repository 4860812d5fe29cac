// Copyright @yucwang 2026

use std::fs;
use std::path::{Path, PathBuf};

use exr::prelude::{write_rgb_file, write_rgba_file};
use ndarray::{concatenate, Array3, ArrayView3, Axis};

use crate::core::error::{RenderError, Result};
use crate::core::field::ImageBatch;
use crate::math::constants::Float;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    /// OpenEXR, values written unclamped.
    Exr,
    /// 8-bit PNG, values clamped to [0, 1].
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Exr => "exr",
            ImageFormat::Png => "png",
        }
    }
}

/// Nesting of the image batches handed to the writer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatchLayout {
    /// One `(N, H, W, C)` batch per view, as returned by rendering.
    ViewsFirst,
    /// One `(V, H, W, C)` batch per batch element.
    BatchFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageWriteOptions {
    pub format: ImageFormat,
    pub layout: BatchLayout,
    pub y_flip: bool,
    pub gamma: Float,
    pub frame_idx: Option<usize>,
}

impl Default for ImageWriteOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Exr,
            layout: BatchLayout::ViewsFirst,
            y_flip: true,
            gamma: 1.0,
            frame_idx: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Fills `{batch}`, `{view}` and `{idx}` in a file name pattern.
pub fn format_file_name(mask: &str, batch: usize, view: usize, idx: Option<usize>) -> String {
    let name = mask.replace("{batch}", &batch.to_string()).replace("{view}", &view.to_string());
    match idx {
        Some(idx) => name.replace("{idx}", &idx.to_string()),
        None => name,
    }
}

/// Flips rows, pads two channel images to RGBA and applies gamma.
pub fn prepare_image(image: ArrayView3<Float>, y_flip: bool, gamma: Float) -> Result<Array3<Float>> {
    let (height, width, channels) = image.dim();
    let mut image = match channels {
        1 | 3 | 4 => image.to_owned(),
        2 => {
            let blue = Array3::<Float>::zeros((height, width, 1));
            let alpha = Array3::<Float>::ones((height, width, 1));
            concatenate(Axis(2), &[image.view(), blue.view(), alpha.view()]).map_err(|e| RenderError::Shape(e.to_string()))?
        }
        c => {
            return Err(RenderError::Shape(format!("channel dimension of images must be < 5, is {}", c)));
        }
    };
    if y_flip {
        image.invert_axis(Axis(0));
    }
    if gamma != 1.0 {
        let inv = 1.0 / gamma;
        image.mapv_inplace(|v| v.max(0.0).powf(inv));
    }
    Ok(image)
}

/// Writes one prepared `(H, W, C)` image with 1, 3 or 4 channels.
pub fn write_image(path: &Path, image: &Array3<Float>, format: ImageFormat) -> Result<()> {
    let (height, width, channels) = image.dim();
    let pixel = |x: usize, y: usize, c: usize| -> Float { image[[y, x, if channels == 1 { 0 } else { c }]] };
    match format {
        ImageFormat::Exr => {
            if channels == 4 {
                write_rgba_file(path, width, height, |x, y| (pixel(x, y, 0), pixel(x, y, 1), pixel(x, y, 2), pixel(x, y, 3)))?;
            } else {
                write_rgb_file(path, width, height, |x, y| (pixel(x, y, 0), pixel(x, y, 1), pixel(x, y, 2)))?;
            }
        }
        ImageFormat::Png => {
            let bytes: Vec<u8> = image.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8).collect();
            let color = match channels {
                1 => image::ColorType::L8,
                3 => image::ColorType::Rgb8,
                _ => image::ColorType::Rgba8,
            };
            image::save_buffer(path, &bytes, width as u32, height as u32, color)?;
        }
    }
    Ok(())
}

/// Writes nested image batches to `base_path`. A failing image is logged and
/// skipped; invalid image shapes abort the whole batch.
pub fn write_images_batch_views(
    image_batches: &[ImageBatch],
    base_path: &Path,
    file_mask: &str,
    options: &ImageWriteOptions,
) -> Result<WriteReport> {
    fs::create_dir_all(base_path)?;
    let mut report = WriteReport::default();
    for (outer, batch) in image_batches.iter().enumerate() {
        for (inner, image) in batch.outer_iter().enumerate() {
            let (batch_idx, view_idx) = match options.layout {
                BatchLayout::ViewsFirst => (inner, outer),
                BatchLayout::BatchFirst => (outer, inner),
            };
            let prepared = prepare_image(image, options.y_flip, options.gamma)?;
            let file_name = format!(
                "{}.{}",
                format_file_name(file_mask, batch_idx, view_idx, options.frame_idx),
                options.format.extension()
            );
            let path = base_path.join(file_name);
            match write_image(&path, &prepared, options.format) {
                Ok(()) => {
                    log::debug!("Image written to: {}.", path.display());
                    report.written.push(path);
                }
                Err(e) => {
                    log::error!(
                        "Failed to write {:?} image with shape {:?} to '{}': {}",
                        options.format,
                        prepared.shape(),
                        path.display(),
                        e
                    );
                    report.failed.push((path, e.to_string()));
                }
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_prepare_image_flips_and_pads() {
        let image = Array3::from_shape_fn((2, 1, 2), |(y, _, c)| (y * 2 + c) as Float);
        let prepared = prepare_image(image.view(), true, 1.0).unwrap();
        assert_eq!(prepared.dim(), (2, 1, 4));
        assert_eq!(prepared[[0, 0, 0]], 2.0);
        assert_eq!(prepared[[1, 0, 1]], 1.0);
        assert_eq!(prepared[[0, 0, 3]], 1.0);
        assert!(prepare_image(Array3::<Float>::zeros((1, 1, 5)).view(), false, 1.0).is_err());

        let gamma = prepare_image(Array3::from_elem((1, 1, 1), 0.25).view(), false, 2.0).unwrap();
        assert!((gamma[[0, 0, 0]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_file_name_pattern() {
        assert_eq!(format_file_name("cam{view}_b{batch}_{idx}", 1, 3, Some(7)), "cam3_b1_7");
        assert_eq!(format_file_name("img_{view}", 0, 2, None), "img_2");
    }

    #[test]
    fn test_writer_writes_png_batches() {
        let dir = std::env::temp_dir().join(format!("phirender_writer_{}", std::process::id()));
        let batches = vec![Array4::<Float>::from_elem((2, 3, 4, 3), 0.5)];
        let options = ImageWriteOptions { format: ImageFormat::Png, ..Default::default() };
        let report = write_images_batch_views(&batches, &dir, "v{view}_b{batch}", &options).unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(report.failed.is_empty());
        assert!(dir.join("v0_b1.png").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
