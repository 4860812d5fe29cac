// Copyright @yucwang 2026

use std::fs;
use std::sync::Arc;

use ndarray::{Array3, Array4, Array5};

use phirender::core::error::RenderError;
use phirender::core::field::{DensityVolume, GridSize, VolumeField};
use phirender::core::grid_transform::GridTransform;
use phirender::core::settings::RendererSettings;
use phirender::io::image_writer::{write_images_batch_views, ImageFormat, ImageWriteOptions};
use phirender::io::settings_loader::load_settings;
use phirender::kernels::{BlendMode, MipMode};
use phirender::math::constants::{Float, Matrix4f};
use phirender::math::frustum::Frustum;
use phirender::renderers::hull::HullParams;
use phirender::renderers::{RenderOptions, Renderer};
use phirender::sensors::camera::Camera;

fn renderer(blend_mode: BlendMode) -> Renderer {
    Renderer::cpu(RendererSettings { mip_mode: MipMode::None, blend_mode, ..Default::default() }).unwrap()
}

fn in_square(index: usize) -> bool {
    (2..6).contains(&index)
}

fn boxed_density(size: usize) -> DensityVolume {
    let data = Array5::from_shape_fn((1, size, size, size, 1), |(_, k, j, i, _)| {
        if in_square(j) && in_square(i) {
            0.1 * (k + 1) as Float
        } else {
            0.0
        }
    });
    DensityVolume::new(data, GridTransform::unit_cube(GridSize::cube(size))).unwrap()
}

#[test]
fn density_only_image_is_integrated_optical_depth() {
    let volume = boxed_density(8);
    let cameras = vec![Arc::new(Camera::identity(GridSize::cube(8)))];
    let renderer = renderer(BlendMode::BeerLambert);

    let images = renderer.render_density(&[volume.clone()], &[], &cameras, &RenderOptions::default()).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].shape(), &[1, 8, 8, 1]);
    for j in 0..8 {
        for i in 0..8 {
            let expected: Float = (0..8).map(|k| volume.data[[0, k, j, i, 0]] * 0.25).sum();
            assert!((images[0][[0, j, i, 0]] - expected).abs() < 1e-4, "pixel ({}, {})", j, i);
        }
    }

    let options = RenderOptions { background: Some(vec![Array3::from_elem((8, 8, 1), 0.7)]), ..Default::default() };
    let composited = renderer.render_density(&[volume], &[], &cameras, &options).unwrap();
    assert!((composited[0][[0, 0, 0, 0]] - 0.7).abs() < 1e-5);
    let d = images[0][[0, 3, 3, 0]];
    assert!((composited[0][[0, 3, 3, 0]] - (d + 0.7 * (-d).exp())).abs() < 1e-4);
}

fn hull_cameras(size: GridSize) -> Vec<Arc<Camera>> {
    let quarter_turn = Matrix4f::new(
        0.0, 0.0, 1.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        -1.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    vec![
        Arc::new(Camera::identity(size)),
        Arc::new(Camera::orthographic(quarter_turn, Frustum::unit_cube(), size)),
    ]
}

#[test]
fn visual_hull_of_full_masks_fills_the_grid() {
    let size = GridSize::cube(8);
    let transform = GridTransform::unit_cube(size);
    let targets = Array4::<Float>::ones((2, 8, 8, 1));
    let (hull, masks) = renderer(BlendMode::BeerLambert)
        .visual_hull(&transform, &targets, &hull_cameras(size), &HullParams::default())
        .unwrap();
    assert!(hull.iter().all(|&v| v == 1.0));
    assert!(masks.iter().all(|&v| (v - 1.0).abs() < 1e-3));
}

#[test]
fn visual_hull_of_two_views_is_reprojectable() {
    let size = GridSize::cube(8);
    let transform = GridTransform::unit_cube(size);
    let cameras = hull_cameras(size);
    let targets = Array4::from_shape_fn((2, 8, 8, 1), |(_, j, i, _)| if in_square(j) && in_square(i) { 1.0 } else { 0.0 });
    let renderer = renderer(BlendMode::BeerLambert);

    let (hull, masks) = renderer.visual_hull(&transform, &targets, &cameras, &HullParams::default()).unwrap();
    for ((_, k, j, i, _), &v) in hull.indexed_iter() {
        let expected = if in_square(k) && in_square(j) && in_square(i) { 1.0 } else { 0.0 };
        assert_eq!(v, expected, "voxel ({}, {}, {})", k, j, i);
    }
    for (m, t) in masks.iter().zip(targets.iter()) {
        assert!((m - t).abs() < 1e-3);
    }

    let (again, _) = renderer.visual_hull(&transform, &masks, &cameras, &HullParams::default()).unwrap();
    assert_eq!(again, hull);
}

#[test]
fn mixed_cameras_keep_input_order() {
    let volume = boxed_density(8);
    let grid = volume.transform.clone();
    let cameras = vec![
        Arc::new(Camera::identity(GridSize::cube(4)).with_static(&grid)),
        Arc::new(Camera::identity(GridSize::cube(8))),
        Arc::new(Camera::identity(GridSize::new(8, 6, 4))),
        Arc::new(Camera::identity(GridSize::cube(8)).with_static(&grid)),
    ];
    let renderer = renderer(BlendMode::BeerLambert);

    let together = renderer.render_density(&[volume.clone()], &[], &cameras, &RenderOptions::default()).unwrap();
    let split = renderer
        .render_density(&[volume.clone()], &[], &cameras, &RenderOptions { split_cameras: true, ..Default::default() })
        .unwrap();
    let shapes: Vec<&[usize]> = together.iter().map(|image| image.shape()).collect();
    assert_eq!(shapes, vec![&[1, 4, 4, 1][..], &[1, 8, 8, 1][..], &[1, 6, 4, 1][..], &[1, 8, 8, 1][..]]);

    for (index, camera) in cameras.iter().enumerate() {
        let single = renderer
            .render_density(&[volume.clone()], &[], std::slice::from_ref(camera), &RenderOptions::default())
            .unwrap();
        for ((a, b), c) in together[index].iter().zip(single[0].iter()).zip(split[index].iter()) {
            assert!((a - b).abs() < 1e-5 && (a - c).abs() < 1e-5, "camera {}", index);
        }
    }
}

#[test]
fn inverse_raymarch_needs_additive_blending() {
    let size = GridSize::cube(4);
    let transforms = vec![GridTransform::unit_cube(size)];
    let cameras = vec![Arc::new(Camera::identity(size))];
    let images = VolumeField::ones((1, 1, 4, 4, 1));

    let result = renderer(BlendMode::BeerLambert).raymarch_camera_inverse(&images, &transforms, &cameras);
    assert!(matches!(result, Err(RenderError::Unsupported(_))));

    let grid = renderer(BlendMode::Additive).raymarch_camera_inverse(&images, &transforms, &cameras).unwrap();
    assert_eq!(grid.shape(), &[1, 4, 4, 4, 1]);
    assert!(grid.iter().all(|&v| v >= 0.0));
}

#[test]
fn image_writer_skips_failing_images() {
    let dir = std::env::temp_dir().join(format!("phirender_scenarios_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(dir.join("v0_b0.png")).unwrap();

    let options = ImageWriteOptions { format: ImageFormat::Png, ..Default::default() };
    let batches = vec![Array4::<Float>::from_elem((2, 4, 4, 1), 0.25)];
    let report = write_images_batch_views(&batches, &dir, "v{view}_b{batch}", &options).unwrap();
    assert_eq!(report.written, vec![dir.join("v0_b1.png")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, dir.join("v0_b0.png"));

    let too_wide = vec![Array4::<Float>::zeros((1, 4, 4, 5))];
    assert!(write_images_batch_views(&too_wide, &dir, "wide{view}", &options).is_err());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn settings_file_configures_the_renderer() {
    let path = std::env::temp_dir().join(format!("phirender_settings_{}.xml", std::process::id()));
    fs::write(
        &path,
        r#"<renderer>
            <string name="blend_mode" value="additive"/>
            <string name="mip_mode" value="none"/>
            <boolean name="allow_fused" value="true"/>
        </renderer>"#,
    )
    .unwrap();
    let settings = load_settings(&path).unwrap();
    let _ = fs::remove_file(&path);

    assert_eq!(settings.blend_mode, BlendMode::Additive);
    let renderer = Renderer::cpu(settings).unwrap();
    assert!(renderer.can_render_fused());
}
