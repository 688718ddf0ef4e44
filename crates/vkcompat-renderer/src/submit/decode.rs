//! Vertex attribute component decoding.
//!
//! Every read is a bounds-checked slice access into the client buffer; a read
//! past the end yields `None` and the caller drops the draw.

use crate::gl::consts::*;

/// Size in bytes of one component of a vertex attribute type, 0 if unsupported.
pub fn bytes_per_component(ty: u32) -> usize {
    match ty {
        UNSIGNED_BYTE | BYTE => 1,
        UNSIGNED_SHORT | SHORT | HALF_FLOAT => 2,
        FLOAT | FIXED | UNSIGNED_INT | INT => 4,
        _ => 0,
    }
}

fn is_integer_type(ty: u32) -> bool {
    matches!(ty, UNSIGNED_BYTE | BYTE | UNSIGNED_SHORT | SHORT | UNSIGNED_INT | INT)
}

/// Divisor that maps an unnormalized integer colour channel into [0, 1].
fn integer_range(ty: u32) -> f32 {
    match ty {
        UNSIGNED_BYTE => 255.0,
        BYTE => 127.0,
        UNSIGNED_SHORT => 65535.0,
        SHORT => 32767.0,
        UNSIGNED_INT => 4_294_967_295.0,
        INT => 2_147_483_647.0,
        _ => 1.0,
    }
}

/// Expands an IEEE-754 binary16 value, including subnormals, infinities and NaN.
pub fn half_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exponent = u32::from((bits >> 10) & 0x1F);
    let mantissa = u32::from(bits & 0x3FF);

    let out = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, mut m) => {
            let mut e = 127 - 15 + 1;
            while m & 0x400 == 0 {
                m <<= 1;
                e -= 1;
            }
            sign | (e << 23) | ((m & 0x3FF) << 13)
        }
        (0x1F, 0) => sign | 0x7F80_0000,
        (0x1F, m) => sign | 0x7FC0_0000 | (m << 13),
        (e, m) => sign | ((e + 127 - 15) << 23) | (m << 13),
    };
    f32::from_bits(out)
}

/// Decodes one component starting at `bytes[0]`. The slice must hold at
/// least `bytes_per_component(ty)` bytes.
pub fn read_component(bytes: &[u8], ty: u32, normalized: bool) -> Option<f32> {
    let value = match ty {
        UNSIGNED_BYTE => {
            let v = f32::from(*bytes.first()?);
            if normalized { v / 255.0 } else { v }
        }
        BYTE => {
            let v = f32::from(*bytes.first()? as i8);
            if normalized { (v / 127.0).max(-1.0) } else { v }
        }
        UNSIGNED_SHORT => {
            let v = f32::from(u16::from_ne_bytes(bytes.get(..2)?.try_into().ok()?));
            if normalized { v / 65535.0 } else { v }
        }
        SHORT => {
            let v = f32::from(i16::from_ne_bytes(bytes.get(..2)?.try_into().ok()?));
            if normalized { (v / 32767.0).clamp(-1.0, 1.0) } else { v }
        }
        HALF_FLOAT => half_to_f32(u16::from_ne_bytes(bytes.get(..2)?.try_into().ok()?)),
        UNSIGNED_INT => {
            let v = u32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?) as f32;
            if normalized { v / 4_294_967_295.0 } else { v }
        }
        INT => {
            let v = i32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?) as f32;
            if normalized { (v / 2_147_483_647.0).clamp(-1.0, 1.0) } else { v }
        }
        FIXED => i32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?) as f32 / 65536.0,
        FLOAT => f32::from_ne_bytes(bytes.get(..4)?.try_into().ok()?),
        _ => return None,
    };
    Some(value)
}

/// Packs a float colour into RGBA8 with R in the low byte.
pub fn pack_color(r: f32, g: f32, b: f32, a: f32) -> u32 {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    channel(r) | (channel(g) << 8) | (channel(b) << 16) | (channel(a) << 24)
}

/// A resolved vertex attribute array over a client buffer.
#[derive(Debug, Clone, Copy)]
pub struct AttribSource<'a> {
    data: &'a [u8],
    pointer: usize,
    stride: usize,
    size: u32,
    ty: u32,
    normalized: bool,
    component_size: usize,
}

impl<'a> AttribSource<'a> {
    /// `None` when the type is not decodable or the stride is zero.
    pub fn new(data: &'a [u8], pointer: usize, stride: usize, size: u32, ty: u32, normalized: bool) -> Option<Self> {
        let component_size = bytes_per_component(ty);
        if stride == 0 || component_size == 0 {
            return None;
        }
        Some(Self { data, pointer, stride, size, ty, normalized, component_size })
    }

    fn vertex_offset(&self, vertex: u32) -> Option<usize> {
        self.stride.checked_mul(vertex as usize)?.checked_add(self.pointer)
    }

    /// Component `component` of `vertex`. Components past the declared size
    /// read as 0, except the fourth which reads as 1.
    pub fn component(&self, vertex: u32, component: u32) -> Option<f32> {
        if component >= self.size {
            return Some(if component == 3 { 1.0 } else { 0.0 });
        }
        let offset = self.vertex_offset(vertex)?
            .checked_add(component as usize * self.component_size)?;
        let bytes = self.data.get(offset..offset.checked_add(self.component_size)?)?;
        read_component(bytes, self.ty, self.normalized)
    }

    /// Two-component read used for position and texcoord. The first component
    /// must be readable; a missing second one reads as 0.
    pub fn vec2(&self, vertex: u32) -> Option<[f32; 2]> {
        let x = self.component(vertex, 0)?;
        let y = self.component(vertex, 1).unwrap_or(0.0);
        Some([x, y])
    }

    /// Colour read packed to RGBA8. Four or more unsigned bytes are copied
    /// verbatim; everything else goes through float decode.
    pub fn packed_color(&self, vertex: u32) -> Option<u32> {
        let offset = self.vertex_offset(vertex)?;
        if offset >= self.data.len() {
            return None;
        }
        if self.ty == UNSIGNED_BYTE && self.size >= 4 {
            let bytes = self.data.get(offset..offset + 4)?;
            return Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }
        let mut rgba = [0.0f32; 4];
        for (i, channel) in rgba.iter_mut().enumerate() {
            let value = self.component(vertex, i as u32)?;
            *channel = if !self.normalized && is_integer_type(self.ty) && (i as u32) < self.size {
                value / integer_range(self.ty)
            } else {
                value
            };
        }
        Some(pack_color(rgba[0], rgba[1], rgba[2], rgba[3]))
    }
}
