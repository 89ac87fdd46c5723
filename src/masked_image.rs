//! An image grid paired with a hole mask.
//!
//! Both grids live in plain contiguous buffers: the image is interleaved
//! row-major (`(y * width + x) * channels + c`), the mask one byte per
//! pixel. The mask byte is `255` for a hole and `0` for a known pixel;
//! anything at or above [`MASK_THRESHOLD`] counts as a hole once the
//! grids have been resampled.

use crate::{
    surface::{ChannelKind, PixelSurface},
    Dims, Error,
};

const MASK_HOLE: u8 = 255;
const MASK_KNOWN: u8 = 0;

/// Mask bytes at or above this are holes. Host mask surfaces use the
/// opposite polarity (dark means hole); construction flips them over.
const MASK_THRESHOLD: u8 = 128;

/// Box-filter weights for the four source pixels of one destination
/// pixel during `downsample2x`. They sum to 255.
const DOWNSAMPLE_WEIGHTS: [u32; 4] = [64, 64, 64, 63];

/// Rounds a span up to an even pixel count, capturing the parity before
/// any mutation so an odd edge extends outwards exactly once.
fn align_span_by_2(span: u32) -> u32 {
    let odd = span & 1;
    span + odd
}

#[derive(Clone)]
pub(crate) struct MaskedImage {
    width: u32,
    height: u32,
    channels: Vec<ChannelKind>,
    color_channels: Vec<usize>,
    image: Vec<u8>,
    mask: Vec<u8>,
}

impl MaskedImage {
    /// Clones both surfaces into dense byte grids.
    ///
    /// Rejects mismatched bounds, a mask that is not single-channel, a
    /// channel layout without a color channel or with more than one
    /// alpha, and grids too large to address.
    pub(crate) fn new<I, M>(image: &I, mask: &M) -> Result<Self, Error>
    where
        I: PixelSurface + ?Sized,
        M: PixelSurface + ?Sized,
    {
        let dims = image.bounds();
        let mask_dims = mask.bounds();
        if dims.width != mask_dims.width || dims.height != mask_dims.height {
            return Err(Error::SizeMismatch(crate::errors::SizeMismatch {
                image: (dims.width, dims.height),
                mask: (mask_dims.width, mask_dims.height),
            }));
        }

        if mask.channel_count() != 1 {
            return Err(Error::MaskChannelMismatch(mask.channel_count()));
        }

        let channel_count = image.channel_count();
        let channels: Vec<ChannelKind> = (0..channel_count)
            .map(|c| image.channel_kind(c))
            .collect();
        let color_channels: Vec<usize> = channels
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == ChannelKind::Color)
            .map(|(c, _)| c)
            .collect();
        let alphas = channel_count - color_channels.len();
        if color_channels.is_empty() || alphas > 1 {
            return Err(Error::UnsupportedChannels(
                crate::errors::UnsupportedChannels {
                    colors: color_channels.len(),
                    alphas,
                },
            ));
        }

        let pixel_count = (dims.width as usize)
            .checked_mul(dims.height as usize)
            .ok_or(Error::TooLarge(dims.width, dims.height))?;
        let byte_count = pixel_count
            .checked_mul(channel_count)
            .ok_or(Error::TooLarge(dims.width, dims.height))?;

        let mut image_grid = vec![0u8; byte_count];
        let mut mask_grid = vec![MASK_KNOWN; pixel_count];
        let mut px = vec![0u8; channel_count];
        let mut mask_px = [0u8; 1];
        for y in 0..dims.height {
            for x in 0..dims.width {
                let i = (y * dims.width + x) as usize;
                image.read(x, y, &mut px);
                image_grid[i * channel_count..(i + 1) * channel_count].copy_from_slice(&px);

                // host polarity: dark mask bytes mark the hole
                mask.read(x, y, &mut mask_px);
                mask_grid[i] = if mask_px[0] < MASK_THRESHOLD {
                    MASK_HOLE
                } else {
                    MASK_KNOWN
                };
            }
        }

        Ok(Self {
            width: dims.width,
            height: dims.height,
            channels,
            color_channels,
            image: image_grid,
            mask: mask_grid,
        })
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn dims(&self) -> Dims {
        Dims::new(self.width, self.height)
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn color_channels(&self) -> &[usize] {
        &self.color_channels
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32
    }

    #[inline]
    pub(crate) fn mask_at(&self, x: u32, y: u32) -> bool {
        self.mask[(y * self.width + x) as usize] >= MASK_THRESHOLD
    }

    pub(crate) fn count_masked(&self) -> usize {
        self.mask.iter().filter(|&&m| m >= MASK_THRESHOLD).count()
    }

    pub(crate) fn clear_mask(&mut self) {
        for m in self.mask.iter_mut() {
            *m = MASK_KNOWN;
        }
    }

    #[inline]
    pub(crate) fn pixel_u8(&self, x: u32, y: u32, channel: usize) -> u8 {
        self.image[(y * self.width + x) as usize * self.channels.len() + channel]
    }

    /// Reads the pixel as per-channel floats in `0.0..=255.0`. The
    /// bundled surfaces are u8-native, so the scale is the identity.
    pub(crate) fn pixels_float(&self, x: u32, y: u32, px: &mut [f32]) {
        let base = (y * self.width + x) as usize * self.channels.len();
        for (c, out) in px.iter_mut().enumerate() {
            *out = f32::from(self.image[base + c]);
        }
    }

    pub(crate) fn set_pixels_float(&mut self, x: u32, y: u32, px: &[f32]) {
        let base = (y * self.width + x) as usize * self.channels.len();
        for (c, value) in px.iter().enumerate() {
            self.image[base + c] = value.max(0.0).min(255.0).round() as u8;
        }
    }

    /// Sum of squared differences over the color channels of the two
    /// pixels. Alpha never contributes.
    #[inline]
    pub(crate) fn distance_sq(&self, x: u32, y: u32, other: &Self, xo: u32, yo: u32) -> i64 {
        let base = (y * self.width + x) as usize * self.channels.len();
        let base_o = (yo * other.width + xo) as usize * other.channels.len();
        let mut sum = 0i64;
        for &c in &self.color_channels {
            let d = i64::from(self.image[base + c]) - i64::from(other.image[base_o + c]);
            sum += d * d;
        }
        sum
    }

    /// Replaces self with a half-sized version.
    ///
    /// The bounds are first aligned outwards to even width/height; each
    /// destination pixel is the weighted average of its four source
    /// pixels, reads past an odd edge clamping to the last row/column.
    /// The mask grid goes through the same filter.
    pub(crate) fn downsample2x(&mut self) {
        let new_width = align_span_by_2(self.width) / 2;
        let new_height = align_span_by_2(self.height) / 2;
        let channel_count = self.channels.len();

        let mut image = vec![0u8; new_width as usize * new_height as usize * channel_count];
        let mut mask = vec![0u8; new_width as usize * new_height as usize];
        let mut acc = vec![0u32; channel_count];

        for dy in 0..new_height {
            for dx in 0..new_width {
                for a in acc.iter_mut() {
                    *a = 0;
                }
                let mut mask_acc = 0u32;
                for (i, &(ox, oy)) in [(0, 0), (1, 0), (0, 1), (1, 1)].iter().enumerate() {
                    let sx = (2 * dx + ox).min(self.width - 1);
                    let sy = (2 * dy + oy).min(self.height - 1);
                    let base = (sy * self.width + sx) as usize * channel_count;
                    for (c, a) in acc.iter_mut().enumerate() {
                        *a += DOWNSAMPLE_WEIGHTS[i] * u32::from(self.image[base + c]);
                    }
                    mask_acc += DOWNSAMPLE_WEIGHTS[i]
                        * u32::from(self.mask[(sy * self.width + sx) as usize]);
                }

                let base = (dy * new_width + dx) as usize * channel_count;
                for (c, a) in acc.iter().enumerate() {
                    image[base + c] = (a / 255) as u8;
                }
                mask[(dy * new_width + dx) as usize] = (mask_acc / 255) as u8;
            }
        }

        self.width = new_width;
        self.height = new_height;
        self.image = image;
        self.mask = mask;
    }

    /// Bilinear resample of image and mask to exactly (width, height).
    pub(crate) fn upscale(&self, width: u32, height: u32) -> Self {
        let channel_count = self.channels.len();
        let mut image = vec![0u8; width as usize * height as usize * channel_count];
        let mut mask = vec![0u8; width as usize * height as usize];

        let x_scale = f64::from(self.width) / f64::from(width);
        let y_scale = f64::from(self.height) / f64::from(height);

        for dy in 0..height {
            let fy = ((f64::from(dy) + 0.5) * y_scale - 0.5)
                .max(0.0)
                .min(f64::from(self.height - 1));
            let y0 = fy as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let ty = fy - f64::from(y0);

            for dx in 0..width {
                let fx = ((f64::from(dx) + 0.5) * x_scale - 0.5)
                    .max(0.0)
                    .min(f64::from(self.width - 1));
                let x0 = fx as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let tx = fx - f64::from(x0);

                let w00 = (1.0 - tx) * (1.0 - ty);
                let w10 = tx * (1.0 - ty);
                let w01 = (1.0 - tx) * ty;
                let w11 = tx * ty;

                let base = (dy * width + dx) as usize * channel_count;
                for c in 0..channel_count {
                    let v = w00 * f64::from(self.pixel_u8(x0, y0, c))
                        + w10 * f64::from(self.pixel_u8(x1, y0, c))
                        + w01 * f64::from(self.pixel_u8(x0, y1, c))
                        + w11 * f64::from(self.pixel_u8(x1, y1, c));
                    image[base + c] = v.round().max(0.0).min(255.0) as u8;
                }

                let m = w00 * f64::from(self.mask[(y0 * self.width + x0) as usize])
                    + w10 * f64::from(self.mask[(y0 * self.width + x1) as usize])
                    + w01 * f64::from(self.mask[(y1 * self.width + x0) as usize])
                    + w11 * f64::from(self.mask[(y1 * self.width + x1) as usize]);
                mask[(dy * width + dx) as usize] = m.round().max(0.0).min(255.0) as u8;
            }
        }

        Self {
            width,
            height,
            channels: self.channels.clone(),
            color_channels: self.color_channels.clone(),
            image,
            mask,
        }
    }

    /// Writes the image grid back into a host surface of the same shape.
    pub(crate) fn write_to<S: PixelSurface>(&self, surface: &mut S) {
        let channel_count = self.channels.len();
        let mut px = vec![0u8; channel_count];
        for y in 0..self.height {
            for x in 0..self.width {
                let base = (y * self.width + x) as usize * channel_count;
                px.copy_from_slice(&self.image[base..base + channel_count]);
                surface.write(x, y, &px);
            }
        }
    }
}
