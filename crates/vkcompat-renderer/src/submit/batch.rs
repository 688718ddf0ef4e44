//! Canonical vertex/index batch construction (the decode path).

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use super::decode::AttribSource;
use crate::adapter::IndexType;

/// Canonical sprite vertex, 24 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 2],
    pub color: u32,
    pub tex_coord: [f32; 2],
    pub mix_color: u32,
}

/// Where a colour comes from: a vertex array or a constant generic value.
#[derive(Debug, Clone, Copy)]
pub enum ColorSource<'a> {
    Array(AttribSource<'a>),
    Constant(u32),
}

impl ColorSource<'_> {
    fn read(&self, vertex: u32) -> Option<u32> {
        match self {
            ColorSource::Array(src) => src.packed_color(vertex),
            ColorSource::Constant(c) => Some(*c),
        }
    }
}

/// Attribute inputs of one draw.
#[derive(Debug, Clone, Copy)]
pub struct VertexSources<'a> {
    pub position: AttribSource<'a>,
    pub tex_coord: AttribSource<'a>,
    pub color: ColorSource<'a>,
    pub mix_color: ColorSource<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl BatchIndices {
    pub fn index_type(&self) -> IndexType {
        match self {
            BatchIndices::U16(_) => IndexType::U16,
            BatchIndices::U32(_) => IndexType::U32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchIndices::U16(v) => v.len(),
            BatchIndices::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BatchIndices::U16(v) => bytemuck::cast_slice(v),
            BatchIndices::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

/// A decoded draw ready for the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteBatch {
    pub vertices: Vec<SpriteVertex>,
    pub indices: BatchIndices,
}

impl SpriteBatch {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

/// How triangle indices map onto emitted vertices.
enum Remap {
    /// Dense range starting at `min`.
    Range { min: u32, len: usize },
    /// First-seen order of the distinct source indices.
    Sparse { order: Vec<u32>, slots: HashMap<u32, u32> },
}

fn plan_remap(triangles: &[u32]) -> Option<Remap> {
    let min = *triangles.iter().min()?;
    let max = *triangles.iter().max()?;
    let range = (max - min) as usize + 1;
    if range <= triangles.len().saturating_mul(3) {
        return Some(Remap::Range { min, len: range });
    }

    let mut order = Vec::new();
    let mut slots = HashMap::new();
    for &index in triangles {
        slots.entry(index).or_insert_with(|| {
            order.push(index);
            (order.len() - 1) as u32
        });
    }
    Some(Remap::Sparse { order, slots })
}

/// Decodes the vertices referenced by `triangles` into the canonical layout.
///
/// Returns `None` if any referenced vertex cannot be read; the draw is then
/// dropped. `flip_v` emits `1 - v` for render-to-texture sampling.
pub fn build_batch(triangles: &[u32], sources: &VertexSources<'_>, flip_v: bool) -> Option<SpriteBatch> {
    let remap = plan_remap(triangles)?;

    let source_indices: Vec<u32> = match &remap {
        Remap::Range { min, len } => (0..*len as u32).map(|i| min + i).collect(),
        Remap::Sparse { order, .. } => order.clone(),
    };

    let mut vertices = Vec::with_capacity(source_indices.len());
    for index in source_indices {
        let position = sources.position.vec2(index)?;
        let [u, v] = sources.tex_coord.vec2(index)?;
        let color = sources.color.read(index)?;
        let mix_color = sources.mix_color.read(index)?;
        vertices.push(SpriteVertex {
            position,
            color,
            tex_coord: [u, if flip_v { 1.0 - v } else { v }],
            mix_color,
        });
    }

    let local = |index: u32| -> u32 {
        match &remap {
            Remap::Range { min, .. } => index - min,
            Remap::Sparse { slots, .. } => slots[&index],
        }
    };

    let indices = if vertices.len() > 0xFFFF {
        BatchIndices::U32(triangles.iter().map(|&i| local(i)).collect())
    } else {
        BatchIndices::U16(triangles.iter().map(|&i| local(i) as u16).collect())
    };

    Some(SpriteBatch { vertices, indices })
}
