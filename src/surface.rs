//! Accumulation surface: the floating-point image the kernel sums samples into.
//!
//! The GPU implementation lives in the viewer; [`SoftwareSurface`] keeps the
//! texels in CPU memory and backs headless runs and tests. Both resolve their
//! contents through [`resolve_rgb8`] so exports look the same everywhere.

use crate::util::{Error, Result};

/// One RGBA texel, 4 x 32-bit float
pub type Texel = [f32; 4];

/// Bytes per texel in GPU memory (rgba32float)
pub const TEXEL_BYTES: usize = std::mem::size_of::<Texel>();

/// Display gamma applied after averaging (must match `screen_quad.frag.wgsl`)
pub const DISPLAY_GAMMA: f32 = 2.2;

/// Storage the progressive renderer accumulates samples into.
pub trait AccumulationSurface {
    /// Drop any previous storage and allocate `width x height` texels.
    /// Safe to call on a fresh surface and repeatedly.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Reset every texel to `color` without reallocating. Ordered before any
    /// accumulation pass issued afterwards.
    fn clear(&mut self, color: Texel) -> Result<()>;

    /// Copy an exposure-resolved RGB8 snapshot, row-major with the top row
    /// first, into `buffer`. The surface is box-filtered down to
    /// `width x height`.
    fn read_back(&self, buffer: &mut [u8], width: u32, height: u32, samples: u32) -> Result<()>;

    /// Current size in texels, `(0, 0)` before the first resize.
    fn size(&self) -> (u32, u32);
}

/// Bytes needed for an RGB8 image of the given size.
pub fn rgb8_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Average accumulated radiance and encode it for display.
#[inline]
pub fn tonemap_channel(sum: f32, samples: u32) -> u8 {
    let avg = sum / samples.max(1) as f32;
    let encoded = avg.clamp(0.0, 1.0).powf(1.0 / DISPLAY_GAMMA);
    (encoded * 255.0 + 0.5) as u8
}

/// Resolve `src_width x src_height` accumulated texels into an RGB8 image.
///
/// Each output pixel averages the block of source texels it covers, so a
/// supersampled surface is downsampled with a box filter.
pub fn resolve_rgb8(
    texels: &[Texel],
    src_width: u32,
    src_height: u32,
    samples: u32,
    out: &mut [u8],
    width: u32,
    height: u32,
) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidViewport { width, height });
    }
    let expected = rgb8_len(width, height);
    if out.len() < expected {
        return Err(Error::BufferSize { expected, actual: out.len() });
    }
    let src_len = src_width as usize * src_height as usize;
    if texels.len() < src_len || src_len == 0 {
        return Err(Error::other(format!(
            "surface holds {} texels, {}x{} requested",
            texels.len(),
            src_width,
            src_height
        )));
    }

    let (sw, sh) = (src_width as usize, src_height as usize);
    let (w, h) = (width as usize, height as usize);

    for y in 0..h {
        let y0 = y * sh / h;
        let y1 = ((y + 1) * sh / h).max(y0 + 1).min(sh);
        for x in 0..w {
            let x0 = x * sw / w;
            let x1 = ((x + 1) * sw / w).max(x0 + 1).min(sw);

            let mut acc = [0.0f32; 3];
            for sy in y0..y1 {
                for t in &texels[sy * sw + x0..sy * sw + x1] {
                    acc[0] += t[0];
                    acc[1] += t[1];
                    acc[2] += t[2];
                }
            }
            let n = ((y1 - y0) * (x1 - x0)) as f32;
            let o = (y * w + x) * 3;
            for c in 0..3 {
                out[o + c] = tonemap_channel(acc[c] / n, samples);
            }
        }
    }
    Ok(())
}

/// Accumulation surface held in CPU memory.
#[derive(Debug, Clone, Default)]
pub struct SoftwareSurface {
    width: u32,
    height: u32,
    texels: Vec<Texel>,
}

impl SoftwareSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texels(&self) -> &[Texel] {
        &self.texels
    }

    pub fn texels_mut(&mut self) -> &mut [Texel] {
        &mut self.texels
    }

    pub fn texel(&self, x: u32, y: u32) -> Option<Texel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.texels.get((y * self.width + x) as usize).copied()
    }

    /// True when every texel equals `color`.
    pub fn is_filled_with(&self, color: Texel) -> bool {
        self.texels.iter().all(|t| *t == color)
    }
}

impl AccumulationSurface for SoftwareSurface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidViewport { width, height });
        }
        self.texels = vec![[0.0; 4]; width as usize * height as usize];
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn clear(&mut self, color: Texel) -> Result<()> {
        self.texels.fill(color);
        Ok(())
    }

    fn read_back(&self, buffer: &mut [u8], width: u32, height: u32, samples: u32) -> Result<()> {
        resolve_rgb8(&self.texels, self.width, self.height, samples, buffer, width, height)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
