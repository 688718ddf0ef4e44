//! Fragment shader classification.
//!
//! Game shaders are never compiled. Each linked program is matched against a
//! fixed table of fingerprints and mapped onto one of the shipped variants.
//! Anything that does not match renders with the default sprite shader.

use crate::adapter::ShaderVariant;

/// Version of the fingerprint table below. Bump when a rule changes.
pub const CLASSIFIER_TABLE_VERSION: u32 = 1;

/// Visual effect a program was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Effect {
    #[default]
    Default,
    ScreenCopy,
    Shield,
    BuildBeam,
}

impl Effect {
    pub fn variant(self) -> ShaderVariant {
        match self {
            Effect::Default => ShaderVariant::Default,
            Effect::ScreenCopy => ShaderVariant::ScreenCopy,
            Effect::Shield => ShaderVariant::Shield,
            Effect::BuildBeam => ShaderVariant::BuildBeam,
        }
    }

    /// Whether draws with this effect carry `EffectUniforms`.
    pub fn uses_effect_uniforms(self) -> bool {
        matches!(self, Effect::Shield | Effect::BuildBeam)
    }

    pub fn index(self) -> usize {
        match self {
            Effect::Default => 0,
            Effect::ScreenCopy => 1,
            Effect::Shield => 2,
            Effect::BuildBeam => 3,
        }
    }
}

const SCREEN_COPY_SAMPLERS: &[&str] = &["uniformsampler2du_texture;", "uniformhighpsampler2du_texture;"];
const SCREEN_COPY_TARGETS: &[&str] = &["gl_fragcolor", "outcolor", "fragcolor"];
const SCREEN_COPY_CALLS: &[&str] = &["texture", "texture2d"];
const SCREEN_COPY_COORDS: &[&str] = &["v_texcoords", "v_texcoords.xy"];

const EFFECT_UNIFORMS: &[&str] = &["u_invsize", "u_texsize", "u_dp", "u_offset", "u_time"];

const SHIELD_MAXED: &[&str] = &["vec4maxed=max(", "maxed=max("];
const SHIELD_ALPHA: &[&str] = &["color.a=alpha;", "color.a=0.18;"];
const SHIELD_WOBBLE: &[&str] = &["sin(coords.y/3.0+u_time/20.0)", "sin(coords.y/3.0+pc.u_time/20.0)"];

const BEAM_STRIPES: &[&str] = &[
    "mod(coords.x/u_dp+coords.y/u_dp+u_time/4.0,10.0)",
    "mod(coords.x/dp+coords.y/dp+pc.u_time/4.0,10.0)",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// `<target>=<call>(u_texture,<coords>);` for every listed spelling.
fn is_plain_copy_assignment(compact: &str) -> bool {
    SCREEN_COPY_TARGETS.iter().any(|target| {
        SCREEN_COPY_CALLS.iter().any(|call| {
            SCREEN_COPY_COORDS
                .iter()
                .any(|coords| compact.contains(&format!("{target}={call}(u_texture,{coords});")))
        })
    })
}

/// Classifies a fragment shader source.
pub fn classify(fragment_source: &str) -> Effect {
    let source = fragment_source.to_lowercase();
    let compact: String = source.chars().filter(|c| !c.is_whitespace()).collect();

    let screen_copy = contains_any(&compact, SCREEN_COPY_SAMPLERS)
        && is_plain_copy_assignment(&compact)
        && !compact.contains("v_color")
        && !compact.contains("v_mix_color");
    if screen_copy {
        return Effect::ScreenCopy;
    }

    if !EFFECT_UNIFORMS.iter().all(|u| source.contains(u)) {
        return Effect::Default;
    }

    let shield = contains_any(&compact, SHIELD_MAXED)
        && compact.contains("maxed.a>0.9")
        && contains_any(&compact, SHIELD_ALPHA)
        && contains_any(&compact, SHIELD_WOBBLE);
    if shield {
        return Effect::Shield;
    }

    let beam = compact.contains("color.a*=(0.37+")
        && compact.contains("abs(sin(")
        && contains_any(&compact, BEAM_STRIPES);
    if beam {
        return Effect::BuildBeam;
    }

    Effect::Default
}
