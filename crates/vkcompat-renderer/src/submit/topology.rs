//! Index reading and primitive normalization to triangle lists.

use crate::gl::consts::*;

/// Bytes per index for a GL index type.
pub fn bytes_per_index(ty: u32) -> Option<usize> {
    match ty {
        UNSIGNED_BYTE => Some(1),
        UNSIGNED_SHORT => Some(2),
        UNSIGNED_INT => Some(4),
        _ => None,
    }
}

/// Reads `count` native-endian indices of type `ty` from `bytes`.
pub fn read_indices(bytes: &[u8], count: usize, ty: u32) -> Option<Vec<u32>> {
    let width = bytes_per_index(ty)?;
    let span = bytes.get(..count.checked_mul(width)?)?;
    let indices = match ty {
        UNSIGNED_BYTE => span.iter().map(|&b| u32::from(b)).collect(),
        UNSIGNED_SHORT => span
            .chunks_exact(2)
            .map(|c| u32::from(u16::from_ne_bytes([c[0], c[1]])))
            .collect(),
        _ => span
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };
    Some(indices)
}

/// Sequential indices `first..first + count`.
pub fn sequential_indices(first: u32, count: usize) -> Vec<u32> {
    (0..count as u32).map(|i| first.wrapping_add(i)).collect()
}

/// Expands `source` in primitive `mode` into a triangle list.
///
/// Strips and fans skip triangles with two equal corners. Returns `None` for
/// non-triangle modes, for a triangle list whose length is not a multiple of
/// three, or when nothing is left to draw.
pub fn triangulate(mode: u32, source: &[u32]) -> Option<Vec<u32>> {
    if source.len() < 3 {
        return None;
    }

    let degenerate = |a: u32, b: u32, c: u32| a == b || b == c || c == a;

    let out = match mode {
        TRIANGLES if source.len() % 3 != 0 => return None,
        TRIANGLES => source.to_vec(),
        TRIANGLE_STRIP => {
            let mut out = Vec::with_capacity((source.len() - 2) * 3);
            for (i, w) in source.windows(3).enumerate() {
                let (a, b, c) = (w[0], w[1], w[2]);
                if degenerate(a, b, c) {
                    continue;
                }
                // Odd triangles swap the first two corners to keep winding.
                if i & 1 == 0 {
                    out.extend_from_slice(&[a, b, c]);
                } else {
                    out.extend_from_slice(&[b, a, c]);
                }
            }
            out
        }
        TRIANGLE_FAN => {
            let origin = source[0];
            let mut out = Vec::with_capacity((source.len() - 2) * 3);
            for w in source[1..].windows(2) {
                let (b, c) = (w[0], w[1]);
                if degenerate(origin, b, c) {
                    continue;
                }
                out.extend_from_slice(&[origin, b, c]);
            }
            out
        }
        _ => return None,
    };

    (!out.is_empty()).then_some(out)
}
