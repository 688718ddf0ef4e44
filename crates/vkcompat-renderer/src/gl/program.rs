//! Program linking without a GLSL compiler.
//!
//! Attribute and uniform declarations are recovered with a small statement
//! scanner; locations are assigned the way a GL driver would report them.

use std::collections::HashSet;

use log::debug;

use super::consts::*;
use super::state::{ActiveVariable, HandleTable, ProgramState, ResolvedBindings, ShaderState};
use crate::effect;

const TEXCOORD_NAMES: &[&str] = &["a_texCoord0", "a_texCoord", "a_texCoords"];
const PROJECTION_NAMES: &[&str] = &[
    "u_projTrans",
    "u_projectionViewMatrix",
    "u_proj",
    "u_mat",
    "u_projection",
    "u_projectionView",
    "u_projView",
];
const PRECISIONS: &[&str] = &["lowp", "mediump", "highp"];

/// Storage qualifier a scan looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// `attribute` or `in`.
    Attribute,
    Uniform,
}

impl DeclKind {
    fn matches(self, keyword: &str) -> bool {
        match self {
            DeclKind::Attribute => keyword == "attribute" || keyword == "in",
            DeclKind::Uniform => keyword == "uniform",
        }
    }
}

/// One `[layout(...)] qualifier [precision] TYPE NAME[N];` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub ty: String,
    pub name: String,
    pub array_len: Option<i32>,
}

/// GL type enum for a GLSL type name. Unknown names report `FLOAT`.
pub fn map_type(name: &str) -> u32 {
    match name {
        "float" => FLOAT,
        "vec2" => FLOAT_VEC2,
        "vec3" => FLOAT_VEC3,
        "vec4" => FLOAT_VEC4,
        "int" => INT,
        "ivec2" => INT_VEC2,
        "ivec3" => INT_VEC3,
        "ivec4" => INT_VEC4,
        "mat3" => FLOAT_MAT3,
        "mat4" => FLOAT_MAT4,
        "sampler2D" => SAMPLER_2D,
        _ => FLOAT,
    }
}

fn is_identifier(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Removes comments and preprocessor lines.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("//") {
            rest = after.find('\n').map_or("", |i| &after[i..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]);
            out.push(' ');
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }
    out.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_layout(statement: &str) -> &str {
    let trimmed = statement.trim_start();
    let Some(after) = trimmed.strip_prefix("layout") else {
        return trimmed;
    };
    let after = after.trim_start();
    if !after.starts_with('(') {
        return trimmed;
    }
    after.find(')').map_or(trimmed, |i| &after[i + 1..])
}

fn parse_statement(statement: &str, kind: DeclKind) -> Option<Declaration> {
    let mut body = strip_layout(statement).trim();

    let mut array_len = None;
    if let Some(open) = body.strip_suffix(']').and_then(|b| b.rfind('[')) {
        let inner = body[open + 1..body.len() - 1].trim();
        array_len = Some(inner.parse::<i32>().ok()?);
        body = body[..open].trim_end();
    }

    let tokens: Vec<&str> = body.split_whitespace().collect();
    let (&name, rest) = tokens.split_last()?;
    let (&ty, rest) = rest.split_last()?;
    let rest = match rest.split_last() {
        Some((&precision, before)) if PRECISIONS.contains(&precision) => before,
        _ => rest,
    };
    let (&keyword, _) = rest.split_last()?;

    if !kind.matches(keyword) || !is_identifier(ty) || !is_identifier(name) {
        return None;
    }
    Some(Declaration { ty: ty.to_string(), name: name.to_string(), array_len })
}

/// Finds every declaration of `kind` in `source`, in source order.
pub fn scan_declarations(source: &str, kind: DeclKind) -> Vec<Declaration> {
    let cleaned = strip_comments(source);
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in cleaned.char_indices() {
        if !matches!(c, ';' | '{' | '}') {
            continue;
        }
        let statement = &cleaned[start..i];
        start = i + 1;
        if c != ';' {
            continue;
        }
        if let Some(decl) = parse_statement(statement, kind) {
            out.push(decl);
        }
    }
    out
}

fn resolve_bindings(program: &ProgramState) -> ResolvedBindings {
    let attrib = |name: &str| {
        program
            .attrib_locations
            .get(name)
            .and_then(|&loc| u32::try_from(loc).ok())
    };
    let uniform = |name: &str| program.uniform_locations.get(name).copied();

    ResolvedBindings {
        position: attrib("a_position"),
        color: attrib("a_color"),
        tex_coord: TEXCOORD_NAMES.iter().find_map(|&n| attrib(n)),
        mix_color: attrib("a_mix_color"),
        texture: uniform("u_texture"),
        projection: PROJECTION_NAMES.iter().find_map(|&n| uniform(n)),
        uses_projection_view: program.uniform_locations.contains_key("u_projectionViewMatrix"),
    }
}

fn reset(program: &mut ProgramState) {
    program.linked = false;
    program.info_log.clear();
    program.attributes.clear();
    program.uniforms.clear();
    program.attrib_locations.clear();
    program.uniform_locations.clear();
    program.cells.clear();
    program.bindings = ResolvedBindings::default();
}

/// Links `program` against its attached shaders.
///
/// Failures leave the program unlinked with a diagnostic in `info_log`.
pub fn link(program: &mut ProgramState, shaders: &HandleTable<ShaderState>) -> bool {
    reset(program);

    for &id in &program.shaders {
        if !shaders.get(id).is_some_and(|s| s.compiled) {
            program.info_log = format!("Shader {id} is not compiled.");
            return false;
        }
    }

    let source_of = |kind: u32| {
        program
            .shaders
            .iter()
            .filter_map(|&id| shaders.get(id))
            .find(|s| s.kind == kind)
            .map(|s| s.source.as_str())
    };
    let Some(vertex) = source_of(VERTEX_SHADER) else {
        program.info_log = "Missing vertex shader.".to_string();
        return false;
    };
    let Some(fragment) = source_of(FRAGMENT_SHADER) else {
        program.info_log = "Missing fragment shader.".to_string();
        return false;
    };

    let effect = effect::classify(fragment);
    let attribute_decls = scan_declarations(vertex, DeclKind::Attribute);
    let uniform_decls: Vec<Declaration> = scan_declarations(vertex, DeclKind::Uniform)
        .into_iter()
        .chain(scan_declarations(fragment, DeclKind::Uniform))
        .collect();

    // Explicit bindings are reserved up front so generated locations skip them.
    let mut used: HashSet<i32> = attribute_decls
        .iter()
        .filter_map(|d| program.bound_attribs.get(&d.name).copied())
        .collect();
    let mut next_location = 0;
    for decl in attribute_decls {
        if program.attrib_locations.contains_key(&decl.name) {
            continue;
        }
        let location = match program.bound_attribs.get(&decl.name) {
            Some(&bound) => bound,
            None => {
                while used.contains(&next_location) {
                    next_location += 1;
                }
                next_location
            }
        };
        used.insert(location);
        program.attributes.push(ActiveVariable {
            name: decl.name.clone(),
            ty: map_type(&decl.ty),
            size: 1,
            location,
        });
        program.attrib_locations.insert(decl.name, location);
    }

    let mut next_uniform = 0;
    for decl in uniform_decls {
        if program.uniform_locations.contains_key(&decl.name) {
            continue;
        }
        let size = decl.array_len.unwrap_or(1).max(1);
        program.uniforms.push(ActiveVariable {
            name: decl.name.clone(),
            ty: map_type(&decl.ty),
            size,
            location: next_uniform,
        });
        program.uniform_locations.insert(decl.name, next_uniform);
        next_uniform += size;
    }

    program.effect = effect;
    program.bindings = resolve_bindings(program);
    program.linked = true;
    debug!(
        "linked program {} effect={:?} attributes={} uniforms={}",
        program.id,
        program.effect,
        program.attributes.len(),
        program.uniforms.len()
    );
    true
}

/// `getUniformLocation`, including `name[i]` element lookups.
pub fn uniform_location(program: &ProgramState, name: &str) -> i32 {
    if let Some(&loc) = program.uniform_locations.get(name) {
        return loc;
    }
    let Some((base, index)) = name.strip_suffix(']').and_then(|n| n.split_once('[')) else {
        return -1;
    };
    if base.is_empty() {
        return -1;
    }
    let Ok(index) = index.parse::<i32>() else {
        return -1;
    };
    match program.uniforms.iter().find(|u| u.name == base) {
        Some(u) if (0..u.size).contains(&index) => u.location + index,
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"
        #version 100
        // attribute vec4 a_commented;
        attribute vec4 a_position;
        attribute lowp vec4 a_color;
        layout(location = 5) in vec2 a_texCoord0;
        attribute vec4 a_mix_color;
        uniform mat4 u_projTrans;
        uniform highp float u_weights[4];
        varying vec2 v_texCoords;
        void main() {
            v_texCoords = a_texCoord0;
            gl_Position = u_projTrans * a_position;
        }
    "#;

    const FRAGMENT: &str = r#"
        varying vec2 v_texCoords;
        uniform sampler2D u_texture;
        uniform mat4 u_projTrans;
        void main() { gl_FragColor = texture2D(u_texture, v_texCoords); }
    "#;

    fn shader(table: &mut HandleTable<ShaderState>, kind: u32, source: &str, compiled: bool) -> u32 {
        let id = table.allocate();
        let mut state = ShaderState::new(id, kind);
        state.source = source.to_string();
        state.compiled = compiled;
        table.insert(id, state);
        id
    }

    fn linked_program() -> ProgramState {
        let mut shaders = HandleTable::new();
        let vs = shader(&mut shaders, VERTEX_SHADER, VERTEX, true);
        let fs = shader(&mut shaders, FRAGMENT_SHADER, FRAGMENT, true);
        let mut program = ProgramState::new(1);
        program.attach(vs);
        program.attach(fs);
        assert!(link(&mut program, &shaders));
        program
    }

    // ==== scanning ====

    #[test]
    fn test_scan_attributes() {
        let decls = scan_declarations(VERTEX, DeclKind::Attribute);
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a_position", "a_color", "a_texCoord0", "a_mix_color"]);
        assert_eq!(decls[1].ty, "vec4");
    }

    #[test]
    fn test_scan_uniform_arrays() {
        let decls = scan_declarations(VERTEX, DeclKind::Uniform);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[1].name, "u_weights");
        assert_eq!(decls[1].array_len, Some(4));
    }

    #[test]
    fn test_scan_ignores_other_statements() {
        let src = "precision mediump float; varying vec2 v; uniform vec2 a, b; in vec3 ok;";
        let decls = scan_declarations(src, DeclKind::Attribute);
        assert_eq!(decls, vec![Declaration { ty: "vec3".into(), name: "ok".into(), array_len: None }]);
        assert!(scan_declarations(src, DeclKind::Uniform).is_empty());
    }

    #[test]
    fn test_map_type() {
        assert_eq!(map_type("vec3"), FLOAT_VEC3);
        assert_eq!(map_type("sampler2D"), SAMPLER_2D);
        assert_eq!(map_type("bvec2"), FLOAT);
    }

    // ==== linking ====

    #[test]
    fn test_link_assigns_locations() {
        let program = linked_program();
        assert!(program.linked);
        assert_eq!(program.attrib_locations["a_position"], 0);
        assert_eq!(program.attrib_locations["a_mix_color"], 3);
        assert_eq!(program.bindings.tex_coord, Some(2));
        assert_eq!(program.bindings.projection, Some(0));
        assert_eq!(program.bindings.texture, Some(5));
        assert_eq!(program.uniforms.len(), 3);
    }

    #[test]
    fn test_bound_locations_win() {
        let mut shaders = HandleTable::new();
        let vs = shader(&mut shaders, VERTEX_SHADER, VERTEX, true);
        let fs = shader(&mut shaders, FRAGMENT_SHADER, FRAGMENT, true);
        let mut program = ProgramState::new(1);
        program.attach(vs);
        program.attach(fs);
        program.bound_attribs.insert("a_color".into(), 0);
        assert!(link(&mut program, &shaders));
        assert_eq!(program.attrib_locations["a_color"], 0);
        assert_eq!(program.attrib_locations["a_position"], 1);
        assert_eq!(program.attrib_locations["a_texCoord0"], 2);
    }

    #[test]
    fn test_link_failures() {
        let mut shaders = HandleTable::new();
        let vs = shader(&mut shaders, VERTEX_SHADER, VERTEX, true);
        let bad = shader(&mut shaders, FRAGMENT_SHADER, "", false);

        let mut program = ProgramState::new(1);
        program.attach(vs);
        assert!(!link(&mut program, &shaders));
        assert_eq!(program.info_log, "Missing fragment shader.");

        program.attach(bad);
        assert!(!link(&mut program, &shaders));
        assert_eq!(program.info_log, format!("Shader {bad} is not compiled."));
        assert!(!program.linked);
    }

    #[test]
    fn test_uniform_element_locations() {
        let program = linked_program();
        let base = program.uniform_locations["u_weights"];
        assert_eq!(uniform_location(&program, "u_weights[0]"), base);
        assert_eq!(uniform_location(&program, "u_weights[3]"), base + 3);
        assert_eq!(uniform_location(&program, "u_weights[4]"), -1);
        assert_eq!(uniform_location(&program, "u_texture[0]"), 5);
        assert_eq!(uniform_location(&program, "u_texture[1]"), -1);
        assert_eq!(uniform_location(&program, "missing"), -1);
    }
}
