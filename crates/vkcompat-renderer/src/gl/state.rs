//! Object tables of the emulated GL API.

use std::collections::HashMap;

use crate::adapter::SamplerParams;
use crate::effect::Effect;
use crate::gl::consts::*;

// ============================================================================
// Handle table
// ============================================================================

/// Integer-keyed object table.
///
/// Generated handles are monotonic and start at 1. Binding an unknown handle
/// may insert it explicitly, which is how GL behaves for names that were never
/// generated. Names below `DENSE_LIMIT` live in a flat vector; larger
/// application-chosen names go to a map.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    sparse: HashMap<u32, T>,
    next: u32,
}

/// Names below this index are stored densely.
const DENSE_LIMIT: u32 = 4096;

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            sparse: HashMap::new(),
            next: 1,
        }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next handle without storing anything.
    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }

    fn reserve_slot(&mut self, index: usize) {
        if index >= self.slots.len() {
            let mut len = self.slots.len().max(16);
            while len <= index {
                len *= 2;
            }
            self.slots.resize_with(len, || None);
        }
    }

    pub fn insert(&mut self, id: u32, value: T) {
        if id >= DENSE_LIMIT {
            self.sparse.insert(id, value);
            return;
        }
        self.reserve_slot(id as usize);
        self.slots[id as usize] = Some(value);
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        if id >= DENSE_LIMIT {
            return self.sparse.get(&id);
        }
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        if id >= DENSE_LIMIT {
            return self.sparse.get_mut(&id);
        }
        self.slots.get_mut(id as usize)?.as_mut()
    }

    pub fn get_or_insert_with(&mut self, id: u32, create: impl FnOnce() -> T) -> &mut T {
        if id >= DENSE_LIMIT {
            return self.sparse.entry(id).or_insert_with(create);
        }
        self.reserve_slot(id as usize);
        self.slots[id as usize].get_or_insert_with(create)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        if id >= DENSE_LIMIT {
            return self.sparse.remove(&id);
        }
        self.slots.get_mut(id as usize)?.take()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Dense names in order, then the sparse ones in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i as u32, v)))
            .chain(self.sparse.iter().map(|(id, v)| (*id, v)))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots
            .iter_mut()
            .filter_map(Option::as_mut)
            .chain(self.sparse.values_mut())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count() + self.sparse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Shaders and programs
// ============================================================================

#[derive(Debug, Clone)]
pub struct ShaderState {
    pub id: u32,
    pub kind: u32,
    pub source: String,
    pub compiled: bool,
    pub info_log: String,
}

impl ShaderState {
    pub fn new(id: u32, kind: u32) -> Self {
        Self { id, kind, source: String::new(), compiled: false, info_log: String::new() }
    }
}

/// An active attribute or uniform as reported by `getActive*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveVariable {
    pub name: String,
    pub ty: u32,
    pub size: i32,
    pub location: i32,
}

/// Per-location uniform storage of a program.
#[derive(Debug, Default, Clone)]
pub struct UniformCells {
    ints: HashMap<i32, i32>,
    floats: HashMap<i32, Vec<f32>>,
    mat4: HashMap<i32, [f32; 16]>,
}

impl UniformCells {
    pub fn clear(&mut self) {
        self.ints.clear();
        self.floats.clear();
        self.mat4.clear();
    }

    /// `uniform1i`: stores the int and forgets any float vector.
    pub fn set_int(&mut self, location: i32, value: i32) {
        self.ints.insert(location, value);
        self.floats.remove(&location);
    }

    /// `uniform{2,3,4}i`: the first component as int, all as floats.
    pub fn set_int_vector(&mut self, location: i32, values: &[i32]) {
        if let Some(&first) = values.first() {
            self.ints.insert(location, first);
        }
        let floats: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        self.set_floats(location, &floats);
    }

    /// Writes a float vector; the cell grows to fit and is never shrunk.
    pub fn set_floats(&mut self, location: i32, values: &[f32]) {
        let cell = self.floats.entry(location).or_default();
        if cell.len() < values.len() {
            cell.resize(values.len(), 0.0);
        }
        cell[..values.len()].copy_from_slice(values);
    }

    /// Copies up to 16 floats and zero-fills the rest.
    pub fn set_mat4(&mut self, location: i32, values: &[f32]) {
        let cell = self.mat4.entry(location).or_insert([0.0; 16]);
        let n = values.len().min(16);
        cell[..n].copy_from_slice(&values[..n]);
        cell[n..].fill(0.0);
    }

    pub fn int(&self, location: i32) -> Option<i32> {
        self.ints.get(&location).copied()
    }

    pub fn floats(&self, location: i32) -> Option<&[f32]> {
        self.floats.get(&location).map(Vec::as_slice)
    }

    pub fn mat4(&self, location: i32) -> Option<&[f32; 16]> {
        self.mat4.get(&location)
    }
}

/// Locations the draw path needs, resolved once per link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBindings {
    pub position: Option<u32>,
    pub color: Option<u32>,
    pub tex_coord: Option<u32>,
    pub mix_color: Option<u32>,
    pub texture: Option<i32>,
    pub projection: Option<i32>,
    pub uses_projection_view: bool,
}

#[derive(Debug, Clone)]
pub struct ProgramState {
    pub id: u32,
    /// Attached shaders in attach order.
    pub shaders: Vec<u32>,
    pub bound_attribs: HashMap<String, i32>,
    pub attributes: Vec<ActiveVariable>,
    pub uniforms: Vec<ActiveVariable>,
    pub attrib_locations: HashMap<String, i32>,
    pub uniform_locations: HashMap<String, i32>,
    pub cells: UniformCells,
    pub bindings: ResolvedBindings,
    pub effect: Effect,
    pub linked: bool,
    pub info_log: String,
}

impl ProgramState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            shaders: Vec::new(),
            bound_attribs: HashMap::new(),
            attributes: Vec::new(),
            uniforms: Vec::new(),
            attrib_locations: HashMap::new(),
            uniform_locations: HashMap::new(),
            cells: UniformCells::default(),
            bindings: ResolvedBindings::default(),
            effect: Effect::Default,
            linked: false,
            info_log: String::new(),
        }
    }

    pub fn attach(&mut self, shader: u32) {
        if !self.shaders.contains(&shader) {
            self.shaders.push(shader);
        }
    }

    pub fn detach(&mut self, shader: u32) {
        self.shaders.retain(|&s| s != shader);
    }

    /// Current projection uniform, identity when never set.
    pub fn projection(&self) -> [f32; 16] {
        self.bindings
            .projection
            .and_then(|loc| self.cells.mat4(loc))
            .copied()
            .unwrap_or(IDENTITY)
    }

    /// First float of a named uniform.
    pub fn uniform_float(&self, name: &str, fallback: f32) -> f32 {
        self.uniform_locations
            .get(name)
            .and_then(|&loc| self.cells.floats(loc))
            .and_then(|v| v.first().copied())
            .unwrap_or(fallback)
    }

    /// First two floats of a named uniform; each falls back on its own.
    pub fn uniform_vec2(&self, name: &str, fallback: [f32; 2]) -> [f32; 2] {
        match self.uniform_locations.get(name).and_then(|&loc| self.cells.floats(loc)) {
            Some(v) => [
                v.first().copied().unwrap_or(fallback[0]),
                v.get(1).copied().unwrap_or(fallback[1]),
            ],
            None => fallback,
        }
    }
}

pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Identity within 1e-5 per element.
pub fn is_identity(m: &[f32; 16]) -> bool {
    m.iter().zip(IDENTITY.iter()).all(|(a, b)| (a - b).abs() <= 1e-5)
}

// ============================================================================
// Buffers and textures
// ============================================================================

/// Smallest power of two `>= value`, at least 1.
pub fn next_pow2(value: usize) -> usize {
    value.max(1).next_power_of_two()
}

#[derive(Debug, Clone)]
pub struct BufferState {
    pub id: u32,
    pub usage: u32,
    /// Length is the last `bufferData` size.
    pub data: Vec<u8>,
}

impl BufferState {
    pub fn new(id: u32) -> Self {
        Self { id, usage: STATIC_DRAW, data: Vec::new() }
    }

    /// `bufferData`: reuses the allocation when it fits, otherwise grows to
    /// `next_pow2(max(size, 1024))`. Missing source bytes read as zero.
    pub fn store(&mut self, size: usize, source: Option<&[u8]>) {
        if size > self.data.capacity() {
            self.data = Vec::with_capacity(next_pow2(size.max(1024)));
        }
        self.data.clear();
        if let Some(src) = source {
            self.data.extend_from_slice(&src[..src.len().min(size)]);
        }
        self.data.resize(size, 0);
    }

    /// `bufferSubData`: ignored when `offset` is outside the region, the copy
    /// is clamped to the region end.
    pub fn update(&mut self, offset: usize, source: &[u8]) {
        if offset >= self.data.len() {
            return;
        }
        let n = source.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&source[..n]);
    }
}

#[derive(Debug, Clone)]
pub struct TextureState {
    pub id: u32,
    pub target: u32,
    pub width: u32,
    pub height: u32,
    pub internal_format: u32,
    pub format: u32,
    pub ty: u32,
    pub sampler: SamplerParams,
    /// RGBA8888 copy kept while tracing.
    pub mirror: Option<Vec<u8>>,
}

impl TextureState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            target: TEXTURE_2D,
            width: 0,
            height: 0,
            internal_format: RGBA,
            format: RGBA,
            ty: UNSIGNED_BYTE,
            sampler: SamplerParams::default(),
            mirror: None,
        }
    }
}

// ============================================================================
// Vertex arrays
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribState {
    pub enabled: bool,
    pub size: u32,
    pub ty: u32,
    pub normalized: bool,
    pub stride: u32,
    pub pointer: usize,
    pub buffer: u32,
}

impl Default for VertexAttribState {
    fn default() -> Self {
        Self { enabled: false, size: 4, ty: FLOAT, normalized: false, stride: 0, pointer: 0, buffer: 0 }
    }
}

impl VertexAttribState {
    /// Stride 0 means tightly packed.
    pub fn effective_stride(&self) -> usize {
        if self.stride > 0 {
            return self.stride as usize;
        }
        let component = match self.ty {
            UNSIGNED_BYTE | BYTE => 1,
            UNSIGNED_SHORT | SHORT | HALF_FLOAT => 2,
            _ => 4,
        };
        self.size as usize * component
    }
}

#[derive(Debug, Clone, Default)]
pub struct VertexArrayState {
    pub id: u32,
    pub element_buffer: u32,
    pub attributes: HashMap<u32, VertexAttribState>,
}

impl VertexArrayState {
    pub fn new(id: u32) -> Self {
        Self { id, ..Default::default() }
    }

    pub fn attribute_mut(&mut self, index: u32) -> &mut VertexAttribState {
        self.attributes.entry(index).or_default()
    }

    /// The attribute at `location` if it is enabled.
    pub fn enabled(&self, location: u32) -> Option<&VertexAttribState> {
        self.attributes.get(&location).filter(|a| a.enabled)
    }
}
