//! Serialize/parse round-trips for both layer variants.

use afterglow::device::BlendMode;
use afterglow::layers::EffectLayer;
use afterglow::{GlowLayerOptions, HeadlessDevice, HighlightLayerOptions};

#[test]
fn test_glow_round_trip_preserves_state() {
    let mut device = HeadlessDevice::default();
    let mut layer = EffectLayer::glow(
        &mut device,
        (64, 64),
        "hero_glow",
        GlowLayerOptions {
            main_texture_ratio: 0.25,
            blur_kernel_size: 17.0,
            intensity: 1.0,
        },
    )
    .unwrap();
    layer.set_enabled(false);
    layer.set_neutral_color([0.1, 0.2, 0.3, 0.4]);
    layer.set_rendering_group_id(2);
    layer.set_intensity(1.5);
    layer.add_excluded_mesh(11);
    layer.add_excluded_mesh(12);
    layer.add_included_only_mesh(42);

    let data = layer.serialize().unwrap();
    let parsed = EffectLayer::parse(&mut device, (64, 64), &data).unwrap();

    assert_eq!(parsed.snapshot(), layer.snapshot());
    assert!(!parsed.is_enabled());
    assert_eq!(parsed.neutral_color(), [0.1, 0.2, 0.3, 0.4]);
    assert_eq!(parsed.rendering_group_id(), 2);
    assert_eq!(parsed.as_glow().unwrap().intensity(), 1.5);
    assert!(!parsed.has_mesh(11));
    assert!(parsed.has_mesh(42));
}

#[test]
fn test_highlight_round_trip_preserves_meshes_and_options() {
    let mut device = HeadlessDevice::default();
    let mut layer = EffectLayer::highlight(
        &mut device,
        (64, 64),
        "selection",
        HighlightLayerOptions {
            inner_glow: false,
            stroke: true,
            alpha_blending_mode: BlendMode::AlphaBlend,
            stencil_reference: 3,
            ..Default::default()
        },
    )
    .unwrap();
    layer.add_mesh(7, [0.0, 1.0, 0.0, 1.0], false);
    layer.add_mesh(9, [1.0, 1.0, 0.0, 1.0], true);

    let data = layer.serialize().unwrap();
    let parsed = EffectLayer::parse(&mut device, (64, 64), &data).unwrap();

    assert_eq!(parsed.snapshot(), layer.snapshot());
    assert!(parsed.has_mesh(7));
    assert!(parsed.has_mesh(9));
    assert!(!parsed.has_mesh(8));
    let state = parsed.as_highlight().unwrap();
    assert!(!state.options().inner_glow);
    assert!(state.options().stroke);
    assert_eq!(state.options().alpha_blending_mode, BlendMode::AlphaBlend);
    assert_eq!(state.options().stencil_reference, 3);
}

#[test]
fn test_kernel_retune_is_persisted() {
    let mut device = HeadlessDevice::default();
    let mut layer = EffectLayer::glow(
        &mut device,
        (64, 64),
        "glow",
        GlowLayerOptions::default(),
    )
    .unwrap();
    assert!(layer.set_blur_kernel_size(13.0));
    let data = layer.serialize().unwrap();
    let parsed = EffectLayer::parse(&mut device, (64, 64), &data).unwrap();
    assert_eq!(parsed.as_glow().unwrap().options().blur_kernel_size, 13.0);
}
