//! End-to-end glow compositing over the software device.
//!
//! Covers the render → blur → composite pipeline, inclusion/exclusion
//! filtering, and the shader-variant cache behavior.

use afterglow::device::{GraphicsDevice, TextureDesc};
use afterglow::layers::EffectLayer;
use afterglow::scene::{MaterialInfo, MeshFeatures, SceneContext, SimpleMesh, SimpleScene};
use afterglow::{EffectCompositor, GlowLayerOptions, HeadlessDevice};

fn red_emissive() -> MaterialInfo {
    MaterialInfo {
        emissive_color: [1.0, 0.0, 0.0, 1.0],
        ..Default::default()
    }
}

fn main_target(device: &mut HeadlessDevice, width: u32, height: u32) -> (afterglow::device::TextureHandle, afterglow::device::FramebufferHandle) {
    let texture = device
        .create_texture(&TextureDesc {
            label: "main".into(),
            width,
            height,
            ..Default::default()
        })
        .unwrap();
    let framebuffer = device.create_framebuffer(texture, 0, true).unwrap();
    (texture, framebuffer)
}

#[test]
fn test_glow_composite_raises_alpha_above_background() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(1, red_emissive()));

    let mut compositor = EffectCompositor::new();
    let layer = EffectLayer::glow(
        &mut device,
        scene.viewport(),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();
    compositor.add_layer(layer);

    let (main_texture, main_framebuffer) = main_target(&mut device, 64, 64);

    compositor.begin_frame(&mut device, &scene).unwrap();
    device.bind_framebuffer(main_framebuffer);
    device.clear([0.0, 0.0, 0.0, 0.2], true, true);
    compositor.end_frame(&mut device, &scene).unwrap();

    let pixel = device.read_pixel(main_texture, 0, 32, 32).unwrap();
    assert!(
        pixel[3] > 0.2,
        "composited alpha {} must exceed the neutral background",
        pixel[3]
    );
    assert!(pixel[0] > 0.5, "red emissive must reach the main frame");
}

#[test]
fn test_glow_skips_alpha_blended_meshes() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(
        1,
        MaterialInfo {
            needs_alpha_blending: true,
            ..red_emissive()
        },
    ));

    let mut compositor = EffectCompositor::new();
    compositor.add_layer(
        EffectLayer::glow(
            &mut device,
            scene.viewport(),
            "glow",
            GlowLayerOptions::default(),
        )
        .unwrap(),
    );
    let (main_texture, main_framebuffer) = main_target(&mut device, 64, 64);

    compositor.begin_frame(&mut device, &scene).unwrap();
    device.bind_framebuffer(main_framebuffer);
    device.clear([0.0; 4], true, true);
    compositor.end_frame(&mut device, &scene).unwrap();

    let pixel = device.read_pixel(main_texture, 0, 32, 32).unwrap();
    assert_eq!(pixel[0], 0.0, "blended mesh must not reach the glow map");
}

#[test]
fn test_excluded_mesh_is_filtered() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(1, red_emissive()));

    let mut layer = EffectLayer::glow(
        &mut device,
        scene.viewport(),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();
    assert!(layer.has_mesh(1));
    layer.add_excluded_mesh(1);
    assert!(!layer.has_mesh(1));
    layer.remove_excluded_mesh(1);
    assert!(layer.has_mesh(1));

    layer.add_included_only_mesh(2);
    assert!(!layer.has_mesh(1), "non-listed mesh fails the inclusion set");
    assert!(layer.has_mesh(2));
    layer.dispose(&mut device);
}

#[test]
fn test_shader_variants_are_cached_until_defines_change() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(1, red_emissive()));

    let mut layer = EffectLayer::glow(
        &mut device,
        scene.viewport(),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();

    layer.render(&mut device, &scene).unwrap();
    let shaders_after_first = device.live_shaders();
    layer.render(&mut device, &scene).unwrap();
    assert_eq!(
        device.live_shaders(),
        shaders_after_first,
        "unchanged defines must reuse the cached variant"
    );

    // Changing the feature set forces exactly one recompile (old variant
    // destroyed, new one created).
    scene.mesh_mut(1).unwrap().sub_meshes[0].features = MeshFeatures {
        morph_targets: 2,
        ..Default::default()
    };
    layer.render(&mut device, &scene).unwrap();
    assert_eq!(device.live_shaders(), shaders_after_first);
    layer.dispose(&mut device);
}

#[test]
fn test_failed_variant_excludes_submesh_until_defines_change() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    let mut mesh = SimpleMesh::with_material(1, red_emissive());
    mesh.sub_meshes[0].features.morph_targets = 2;
    scene.add_mesh(mesh);

    device.set_fail_define_token(Some("#define MORPHTARGETS".into()));
    let mut layer = EffectLayer::glow(
        &mut device,
        scene.viewport(),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();

    layer.render(&mut device, &scene).unwrap();
    let map = layer.main_texture().unwrap();
    assert_eq!(
        device.read_pixel(map, 0, 1, 1).unwrap()[0],
        0.0,
        "failed variant must keep the sub-mesh out of the map"
    );

    // A define change clears the failure and compiles the new variant.
    device.set_fail_define_token(None);
    scene.mesh_mut(1).unwrap().sub_meshes[0].features.morph_targets = 0;
    layer.render(&mut device, &scene).unwrap();
    assert!(device.read_pixel(map, 0, 1, 1).unwrap()[0] > 0.5);
    layer.dispose(&mut device);
}

#[test]
fn test_unready_mesh_defers_via_refresh_counter() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    let mut mesh = SimpleMesh::with_material(1, red_emissive());
    mesh.ready = false;
    scene.add_mesh(mesh);

    let mut layer = EffectLayer::glow(
        &mut device,
        scene.viewport(),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();

    layer.render(&mut device, &scene).unwrap();
    let map = layer.main_texture().unwrap();
    assert_eq!(device.read_pixel(map, 0, 1, 1).unwrap()[0], 0.0);

    // The mesh becomes ready; the reset refresh counter retries the render
    // instead of skipping the object for good.
    scene.mesh_mut(1).unwrap().ready = true;
    layer.render(&mut device, &scene).unwrap();
    assert!(device.read_pixel(map, 0, 1, 1).unwrap()[0] > 0.5);
    layer.dispose(&mut device);
}

#[test]
fn test_intensity_setter_reports_change() {
    let mut device = HeadlessDevice::default();
    let mut layer = EffectLayer::glow(
        &mut device,
        (64, 64),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();
    assert!(layer.set_intensity(2.0));
    assert!(!layer.set_intensity(2.0));
    assert_eq!(layer.as_glow().unwrap().intensity(), 2.0);
    layer.dispose(&mut device);
}
