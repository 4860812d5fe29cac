// Copyright @yucwang 2026

use std::env;
use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array5;

use phirender::core::field::{DensityVolume, GridSize, ImageBatch};
use phirender::core::grid_transform::GridTransform;
use phirender::core::settings::RendererSettings;
use phirender::io::image_writer::{write_images_batch_views, ImageFormat, ImageWriteOptions};
use phirender::io::settings_loader::load_settings;
use phirender::math::constants::{Float, Vector3f};
use phirender::renderers::lighting::{AmbientLight, LightSource, PointLight};
use phirender::renderers::tonemap::Tonemap;
use phirender::renderers::{RenderOptions, Renderer};
use phirender::sensors::camera::Camera;

const GRID_SIZE: usize = 32;
const NUM_CAMERAS: usize = 8;

/// Two overlapping soft blobs in the unit cube.
fn blob_density(transform: &GridTransform) -> Array5<Float> {
    let size = transform.grid_size();
    let centers = [Vector3f::new(-0.25, 0.0, 0.0), Vector3f::new(0.3, 0.2, 0.1)];
    Array5::from_shape_fn((1, size.depth, size.height, size.width, 1), |(_, k, j, i, _)| {
        let p = transform.cell_center_world(i, j, k);
        centers.iter().map(|c| 4.0 * (-(p - c).norm_squared() / 0.08).exp()).sum()
    })
}

fn camera_ring(grid: &GridTransform, count: usize) -> Vec<Arc<Camera>> {
    let resolution = GridSize::new(48, 96, 96);
    (0..count)
        .map(|n| {
            let angle = 2.0 * std::f32::consts::PI * n as Float / count as Float;
            let eye = Vector3f::new(3.0 * angle.sin(), 0.5, 3.0 * angle.cos());
            let camera = Camera::perspective(
                eye,
                Vector3f::zeros(),
                Vector3f::new(0.0, 1.0, 0.0),
                40.0_f32.to_radians(),
                1.5,
                4.5,
                resolution,
            );
            Arc::new(camera.with_static(grid))
        })
        .collect()
}

fn main() {
    env::set_var("RUST_LOG", "info");
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let settings = match args.get(1) {
        Some(path) => match load_settings(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => RendererSettings::default(),
    };
    let output_dir = args.get(2).map(String::as_str).unwrap_or("renders");

    let renderer = match Renderer::cpu(settings) {
        Ok(renderer) => renderer,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let grid = GridTransform::unit_cube(GridSize::cube(GRID_SIZE));
    let volume = match DensityVolume::new(blob_density(&grid), grid.clone()) {
        Ok(volume) => volume,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let cameras = camera_ring(&grid, NUM_CAMERAS);
    let lights = vec![
        LightSource::Procedural(Box::new(AmbientLight::colored(Vector3f::new(0.05, 0.05, 0.08)))),
        LightSource::Procedural(Box::new(PointLight::new(Vector3f::new(1.5, 2.0, 1.0), Vector3f::new(4.0, 3.6, 3.0)))),
    ];
    let options = RenderOptions { tonemapping: Tonemap::Saturate, ..Default::default() };

    let progress = ProgressBar::new(cameras.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} cameras")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let mut images: Vec<ImageBatch> = Vec::with_capacity(cameras.len());
    for camera in &cameras {
        match renderer.render_density(&[volume.clone()], &lights, std::slice::from_ref(camera), &options) {
            Ok(mut rendered) => images.append(&mut rendered),
            Err(e) => {
                progress.abandon();
                eprintln!("rendering failed: {}", e);
                std::process::exit(1);
            }
        }
        progress.inc(1);
    }
    progress.finish();

    let write_options = ImageWriteOptions { format: ImageFormat::Png, ..Default::default() };
    match write_images_batch_views(&images, Path::new(output_dir), "cam{view}_b{batch}", &write_options) {
        Ok(report) => log::info!(
            "{} images written to {}, {} failed.",
            report.written.len(),
            output_dir,
            report.failed.len()
        ),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
