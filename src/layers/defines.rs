//! Shader-variant define strings
//!
//! Every (sub-mesh, material, effect) triple maps to a define string; the
//! string is the cache key for the compiled variant, so its token order is
//! fixed and byte-stable.

use crate::scene::{MaterialInfo, MeshFeatures};

/// Build the define string for one sub-mesh under one effect.
pub fn sub_mesh_defines(
    effect_define: &str,
    features: &MeshFeatures,
    material: &MaterialInfo,
) -> String {
    let mut out = String::with_capacity(192);
    out.push_str("#define ");
    out.push_str(effect_define);
    out.push('\n');

    if let Some(uv) = features.diffuse_uv {
        out.push_str("#define DIFFUSE\n");
        out.push_str(&format!("#define DIFFUSEDIRECTUV {}\n", uv));
    }
    if let Some(uv) = features.opacity_uv {
        out.push_str("#define OPACITY\n");
        out.push_str(&format!("#define OPACITYDIRECTUV {}\n", uv));
    }
    if let Some(uv) = features.emissive_uv {
        out.push_str("#define EMISSIVE\n");
        out.push_str(&format!("#define EMISSIVEDIRECTUV {}\n", uv));
    }
    if features.vertex_alpha {
        out.push_str("#define VERTEXALPHA\n");
    }
    if material.needs_alpha_blending {
        out.push_str("#define ALPHABLEND\n");
    }
    if features.bone_influencers > 0 {
        out.push_str(&format!(
            "#define NUM_BONE_INFLUENCERS {}\n",
            features.bone_influencers
        ));
        if features.bones_in_texture {
            out.push_str("#define BONETEXTURE\n");
        }
    }
    if features.morph_targets > 0 {
        out.push_str(&format!("#define MORPHTARGETS {}\n", features.morph_targets));
        if features.morphs_in_texture {
            out.push_str("#define MORPHTARGETS_TEXTURE\n");
        }
    }
    if features.instanced {
        out.push_str("#define INSTANCES\n");
    }
    if features.thin_instances {
        out.push_str("#define THIN_INSTANCES\n");
    }
    out
}
