//! Highlight layer registration, stencil-gated compositing and stroke mode.

use afterglow::device::{GraphicsDevice, TextureDesc};
use afterglow::layers::EffectLayer;
use afterglow::scene::{MaterialInfo, SceneContext, SimpleMesh, SimpleScene};
use afterglow::{EffectCompositor, HeadlessDevice, HighlightLayerOptions};

fn main_target(
    device: &mut HeadlessDevice,
    width: u32,
    height: u32,
) -> (afterglow::device::TextureHandle, afterglow::device::FramebufferHandle) {
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
fn test_remove_mesh_clears_registration_and_work() {
    let mut device = HeadlessDevice::default();
    let mut layer = EffectLayer::highlight(
        &mut device,
        (64, 64),
        "highlight",
        HighlightLayerOptions::default(),
    )
    .unwrap();

    assert!(!layer.should_render(), "empty highlight layer has no work");
    assert!(layer.add_mesh(7, [0.0, 1.0, 0.0, 1.0], false));
    assert!(layer.has_mesh(7));
    assert!(layer.should_render());

    assert!(layer.remove_mesh(7));
    assert!(!layer.has_mesh(7));
    assert!(
        !layer.should_render(),
        "layer with its only mesh removed must report no work"
    );
    layer.dispose(&mut device);
}

#[test]
fn test_add_mesh_is_rejected_on_glow() {
    let mut device = HeadlessDevice::default();
    let mut layer = EffectLayer::glow(
        &mut device,
        (64, 64),
        "glow",
        afterglow::GlowLayerOptions::default(),
    )
    .unwrap();
    assert!(!layer.add_mesh(1, [1.0; 4], false));
    assert!(!layer.remove_mesh(1));
    layer.dispose(&mut device);
}

#[test]
fn test_needs_stencil_only_for_highlight() {
    let mut device = HeadlessDevice::default();
    let glow = EffectLayer::glow(
        &mut device,
        (64, 64),
        "glow",
        afterglow::GlowLayerOptions::default(),
    )
    .unwrap();
    let highlight = EffectLayer::highlight(
        &mut device,
        (64, 64),
        "highlight",
        HighlightLayerOptions::default(),
    )
    .unwrap();
    assert!(!glow.needs_stencil());
    assert!(highlight.needs_stencil());
}

#[test]
fn test_outer_glow_lands_outside_the_stencil_mark() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(7, MaterialInfo::default()));

    let mut compositor = EffectCompositor::new();
    let mut layer = EffectLayer::highlight(
        &mut device,
        scene.viewport(),
        "highlight",
        HighlightLayerOptions::default(),
    )
    .unwrap();
    layer.add_mesh(7, [0.0, 1.0, 0.0, 1.0], false);
    compositor.add_layer(layer);

    let (main_texture, main_framebuffer) = main_target(&mut device, 64, 64);

    assert!(!device.stencil_enabled());
    compositor.begin_frame(&mut device, &scene).unwrap();
    assert!(
        device.stencil_enabled(),
        "highlight layer must enable the shared stencil"
    );

    device.bind_framebuffer(main_framebuffer);
    device.clear([0.0; 4], true, true);
    // main scene left the stencil at 0 everywhere: the inner pass
    // (less-or-equal against reference 1) fails, the outer pass (not-equal)
    // covers the frame
    compositor.end_frame(&mut device, &scene).unwrap();

    let pixel = device.read_pixel(main_texture, 0, 32, 32).unwrap();
    assert!(pixel[1] > 0.5, "outer glow must land where stencil != reference");
    assert!(
        !device.stencil_enabled(),
        "previous stencil state must be restored after the frame"
    );
}

#[test]
fn test_inner_glow_lands_inside_the_stencil_mark() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(7, MaterialInfo::default()));

    let mut compositor = EffectCompositor::new();
    let mut layer = EffectLayer::highlight(
        &mut device,
        scene.viewport(),
        "highlight",
        HighlightLayerOptions {
            outer_glow: false,
            ..Default::default()
        },
    )
    .unwrap();
    layer.add_mesh(7, [0.0, 1.0, 0.0, 1.0], false);
    compositor.add_layer(layer);

    let (main_texture, main_framebuffer) = main_target(&mut device, 64, 64);

    compositor.begin_frame(&mut device, &scene).unwrap();
    device.bind_framebuffer(main_framebuffer);
    device.clear([0.0; 4], true, true);
    // the main scene tagged the object's pixels with the layer reference
    device.write_stencil(main_texture, 0, 1);
    compositor.end_frame(&mut device, &scene).unwrap();

    let pixel = device.read_pixel(main_texture, 0, 32, 32).unwrap();
    assert!(pixel[1] > 0.5, "inner glow must land where stencil == reference");
    // composite never writes stencil
    compositor.begin_frame(&mut device, &scene).unwrap();
    device.bind_framebuffer(main_framebuffer);
    compositor.end_frame(&mut device, &scene).unwrap();
    let still_green = device.read_pixel(main_texture, 0, 32, 32).unwrap();
    assert!(still_green[1] > 0.5);
}

#[test]
fn test_highlight_allows_alpha_blended_meshes() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(
        7,
        MaterialInfo {
            needs_alpha_blending: true,
            ..Default::default()
        },
    ));

    let mut layer = EffectLayer::highlight(
        &mut device,
        scene.viewport(),
        "highlight",
        HighlightLayerOptions::default(),
    )
    .unwrap();
    layer.add_mesh(7, [0.0, 1.0, 0.0, 1.0], false);
    layer.render(&mut device, &scene).unwrap();

    let map = layer.main_texture().unwrap();
    assert!(
        device.read_pixel(map, 0, 1, 1).unwrap()[1] > 0.0,
        "highlight draws blended meshes into its map"
    );
    layer.dispose(&mut device);
}

#[test]
fn test_stroke_mode_thresholds_alpha() {
    let mut device = HeadlessDevice::default();
    let mut scene = SimpleScene::new(64, 64);
    scene.add_mesh(SimpleMesh::with_material(7, MaterialInfo::default()));

    let mut compositor = EffectCompositor::new();
    let mut layer = EffectLayer::highlight(
        &mut device,
        scene.viewport(),
        "highlight",
        HighlightLayerOptions {
            stroke: true,
            inner_glow: false,
            ..Default::default()
        },
    )
    .unwrap();
    // a faint registration color stays below the stroke threshold
    layer.add_mesh(7, [0.0, 1.0, 0.0, 0.25], false);
    compositor.add_layer(layer);

    let (main_texture, main_framebuffer) = main_target(&mut device, 64, 64);
    compositor.begin_frame(&mut device, &scene).unwrap();
    device.bind_framebuffer(main_framebuffer);
    device.clear([0.0; 4], true, true);
    compositor.end_frame(&mut device, &scene).unwrap();

    let pixel = device.read_pixel(main_texture, 0, 32, 32).unwrap();
    assert_eq!(pixel[3], 0.0, "sub-threshold alpha must be cut to zero");
}
