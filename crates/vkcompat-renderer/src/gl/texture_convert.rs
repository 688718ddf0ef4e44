//! Client pixel formats and their expansion to RGBA8888.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::gl::consts::*;

/// Client pixel layouts accepted by `texImage2D` / `texSubImage2D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
    Rgb888,
    Rgb565,
    Rgba4444,
    Rgba5551,
    Alpha8,
    Luminance8,
    LuminanceAlpha8,
}

impl PixelFormat {
    /// Resolves a GL `(format, type)` pair.
    pub fn from_gl(format: u32, ty: u32) -> Option<Self> {
        let fmt = match (format, ty) {
            (RGBA, UNSIGNED_BYTE) => PixelFormat::Rgba8888,
            (RGBA, UNSIGNED_SHORT_4_4_4_4) => PixelFormat::Rgba4444,
            (RGBA, UNSIGNED_SHORT_5_5_5_1) => PixelFormat::Rgba5551,
            (RGB, UNSIGNED_BYTE) => PixelFormat::Rgb888,
            (RGB, UNSIGNED_SHORT_5_6_5) => PixelFormat::Rgb565,
            (ALPHA, UNSIGNED_BYTE) => PixelFormat::Alpha8,
            (LUMINANCE, UNSIGNED_BYTE) => PixelFormat::Luminance8,
            (LUMINANCE_ALPHA, UNSIGNED_BYTE) => PixelFormat::LuminanceAlpha8,
            _ => return None,
        };
        Some(fmt)
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 | PixelFormat::Rgba4444 | PixelFormat::Rgba5551 => 2,
            PixelFormat::LuminanceAlpha8 => 2,
            PixelFormat::Alpha8 | PixelFormat::Luminance8 => 1,
        }
    }
}

fn expand5(v: u16) -> u8 {
    (u32::from(v & 0x1F) * 255 / 31) as u8
}

fn expand6(v: u16) -> u8 {
    (u32::from(v & 0x3F) * 255 / 63) as u8
}

fn expand4(v: u16) -> u8 {
    ((v & 0xF) * 17) as u8
}

/// Expands `width * height` pixels to tightly packed RGBA8888.
///
/// Short sources are zero-padded. RGBA8888 input is borrowed as is.
pub fn to_rgba8888(format: PixelFormat, width: u32, height: u32, pixels: &[u8]) -> Cow<'_, [u8]> {
    let count = width as usize * height as usize;
    let needed = count * format.bytes_per_pixel();

    let src: Cow<'_, [u8]> = if pixels.len() >= needed {
        Cow::Borrowed(&pixels[..needed])
    } else {
        let mut padded = pixels.to_vec();
        padded.resize(needed, 0);
        Cow::Owned(padded)
    };

    let mut out = Vec::with_capacity(count * 4);
    let packed = |chunk: &[u8]| u16::from_ne_bytes([chunk[0], chunk[1]]);

    match format {
        PixelFormat::Rgba8888 => return src,
        PixelFormat::Rgb888 => {
            for px in src.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 0xFF]);
            }
        }
        PixelFormat::Rgb565 => {
            for px in src.chunks_exact(2) {
                let p = packed(px);
                out.extend_from_slice(&[expand5(p >> 11), expand6(p >> 5), expand5(p), 0xFF]);
            }
        }
        PixelFormat::Rgba4444 => {
            for px in src.chunks_exact(2) {
                let p = packed(px);
                out.extend_from_slice(&[expand4(p >> 12), expand4(p >> 8), expand4(p >> 4), expand4(p)]);
            }
        }
        PixelFormat::Rgba5551 => {
            for px in src.chunks_exact(2) {
                let p = packed(px);
                let alpha = if p & 1 != 0 { 0xFF } else { 0 };
                out.extend_from_slice(&[expand5(p >> 11), expand5(p >> 6), expand5(p >> 1), alpha]);
            }
        }
        PixelFormat::Alpha8 => {
            for &a in src.iter() {
                out.extend_from_slice(&[0, 0, 0, a]);
            }
        }
        PixelFormat::Luminance8 => {
            for &l in src.iter() {
                out.extend_from_slice(&[l, l, l, 0xFF]);
            }
        }
        PixelFormat::LuminanceAlpha8 => {
            for px in src.chunks_exact(2) {
                out.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
        }
    }

    Cow::Owned(out)
}

/// Copies an RGBA8888 sub-rectangle into a full-texture mirror.
pub fn blit_rgba(mirror: &mut [u8], mirror_width: u32, x: u32, y: u32, width: u32, height: u32, rgba: &[u8]) {
    let row_bytes = width as usize * 4;
    for row in 0..height as usize {
        let Some(src) = rgba.get(row * row_bytes..) else {
            break;
        };
        let src = &src[..row_bytes.min(src.len())];
        let dst_start = ((y as usize + row) * mirror_width as usize + x as usize) * 4;
        if let Some(dst) = mirror.get_mut(dst_start..dst_start + src.len()) {
            dst.copy_from_slice(src);
        }
    }
}

/// Writes `rgba` as `texture-<id>-<w>x<h>.png` under `dir`.
///
/// GL rows run bottom-up, so they are flipped for the image file.
pub fn dump_png(dir: &Path, id: u32, width: u32, height: u32, rgba: &[u8]) -> Result<PathBuf> {
    let row_bytes = width as usize * 4;
    if row_bytes == 0 || height == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty texture").into());
    }
    std::fs::create_dir_all(dir)?;
    let mut flipped = Vec::with_capacity(rgba.len());
    for row in rgba.chunks_exact(row_bytes).rev() {
        flipped.extend_from_slice(row);
    }
    flipped.resize(row_bytes * height as usize, 0);

    let path = dir.join(format!("texture-{id}-{width}x{height}.png"));
    image::save_buffer(&path, &flipped, width, height, image::ExtendedColorType::Rgba8)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(format: PixelFormat, value: u16) -> Vec<u8> {
        to_rgba8888(format, 1, 1, &value.to_ne_bytes()).into_owned()
    }

    #[test]
    fn test_format_table() {
        assert_eq!(PixelFormat::from_gl(RGB, UNSIGNED_SHORT_5_6_5), Some(PixelFormat::Rgb565));
        assert_eq!(PixelFormat::from_gl(LUMINANCE_ALPHA, UNSIGNED_BYTE), Some(PixelFormat::LuminanceAlpha8));
        assert_eq!(PixelFormat::from_gl(RGB, UNSIGNED_SHORT_4_4_4_4), None);
        assert_eq!(PixelFormat::from_gl(RGBA, FLOAT), None);
    }

    #[test]
    fn test_rgb565_red() {
        assert_eq!(pixel(PixelFormat::Rgb565, 0xF800), vec![255, 0, 0, 255]);
        assert_eq!(pixel(PixelFormat::Rgb565, 0x07E0), vec![0, 255, 0, 255]);
    }

    #[test]
    fn test_rgba4444_red() {
        assert_eq!(pixel(PixelFormat::Rgba4444, 0xF00F), vec![255, 0, 0, 255]);
        assert_eq!(pixel(PixelFormat::Rgba4444, 0x1234), vec![17, 34, 51, 68]);
    }

    #[test]
    fn test_rgba5551() {
        assert_eq!(pixel(PixelFormat::Rgba5551, 0xF801), vec![255, 0, 0, 255]);
        assert_eq!(pixel(PixelFormat::Rgba5551, 0x003E), vec![0, 0, 255, 0]);
    }

    #[test]
    fn test_byte_formats() {
        assert_eq!(to_rgba8888(PixelFormat::Rgb888, 1, 1, &[1, 2, 3]).as_ref(), &[1, 2, 3, 255]);
        assert_eq!(to_rgba8888(PixelFormat::Alpha8, 1, 1, &[9]).as_ref(), &[0, 0, 0, 9]);
        assert_eq!(to_rgba8888(PixelFormat::Luminance8, 1, 1, &[7]).as_ref(), &[7, 7, 7, 255]);
        assert_eq!(to_rgba8888(PixelFormat::LuminanceAlpha8, 1, 1, &[7, 8]).as_ref(), &[7, 7, 7, 8]);
    }

    #[test]
    fn test_rgba_borrowed_and_padded() {
        let data = [1u8, 2, 3, 4, 5];
        assert!(matches!(to_rgba8888(PixelFormat::Rgba8888, 1, 1, &data), Cow::Borrowed(_)));
        let short = to_rgba8888(PixelFormat::Rgba8888, 2, 1, &data);
        assert_eq!(short.as_ref(), &[1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    fn test_blit_into_mirror() {
        let mut mirror = vec![0u8; 2 * 2 * 4];
        blit_rgba(&mut mirror, 2, 1, 1, 1, 1, &[9, 9, 9, 9]);
        assert_eq!(&mirror[12..16], &[9, 9, 9, 9]);
        assert!(mirror[..12].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dump_png_writes_file() {
        let dir = std::env::temp_dir().join(format!("vkcompat-dump-{}", std::process::id()));
        let path = dump_png(&dir, 5, 1, 2, &[255, 0, 0, 255, 0, 255, 0, 255]).unwrap();
        assert!(path.ends_with("texture-5-1x2.png"));
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
