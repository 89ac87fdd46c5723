//! Coarse-to-fine expectation-maximization driver.
//!
//! The driver walks the pyramid from its coarsest level down, keeping a
//! synthesised target image whose mask is cleared. At each level the
//! nearest-neighbor field is minimised and the target rebuilt by voting
//! source patches into per-pixel histograms; the last EM iteration of a
//! level upscales the target to the next finer level's size.

use rand_pcg::Pcg32;

use crate::{
    img_pyramid::Pyramid,
    masked_image::MaskedImage,
    nnf::NearestNeighborField,
};

/// Votes below this total weight leave the target pixel untouched.
const MIN_VOTE_WEIGHT: f32 = 1.0;

/// CDF window of the trimmed mean, as fractions of the total weight.
const CDF_LOW: f32 = 0.4;
const CDF_HIGH: f32 = 0.6;

/// Fills the masked region of `input` and returns the synthesised image.
///
/// Degenerate inputs (no holes, or an image too small to downsample)
/// fall out naturally: the pyramid has a single level, the level loop
/// never runs, and the mask-cleared clone of the input comes back as is.
pub(crate) fn patch_image(input: MaskedImage, radius: u32, rng: &mut Pcg32) -> MaskedImage {
    let pyramid = Pyramid::new(input, radius);

    let mut target = pyramid.last().clone();
    target.clear_mask();

    let mut previous: Option<NearestNeighborField> = None;
    for level in (1..pyramid.len()).rev() {
        let source = pyramid.level(level);

        let mut nnf = NearestNeighborField::new(target.dims(), radius);
        match previous {
            None => nnf.randomize(&target, source, rng),
            Some(ref coarser) => nnf.initialize_from(coarser, &target, source, rng),
        }

        target = expectation_maximization(&mut nnf, target, level, &pyramid, rng);
        previous = Some(nnf);
    }

    target
}

/// Alternates NNF minimisation with target reconstruction at one level.
///
/// The freshly voted target becomes the field's input image on the next
/// iteration; the final iteration reconstructs into an upscaled target
/// against the next finer pyramid level.
fn expectation_maximization(
    nnf: &mut NearestNeighborField,
    mut target: MaskedImage,
    level: usize,
    pyramid: &Pyramid,
    rng: &mut Pcg32,
) -> MaskedImage {
    let iter_em = (2 * level).min(4);
    let iter_nnf = level.min(5);

    for em in 1..=iter_em {
        nnf.minimize(&target, pyramid.level(level), iter_nnf, rng);

        let upscaled = level >= 1 && em == iter_em;
        let (new_source, mut new_target) = if upscaled {
            let finer = pyramid.level(level - 1);
            (finer, target.upscale(finer.width(), finer.height()))
        } else {
            (pyramid.level(level), target.clone())
        };

        em_step(nnf, new_source, &mut new_target, upscaled);
        target = new_target;
    }

    target
}

/// One voting pass: every target pixel gathers weighted votes from all
/// patches containing it, then takes the CDF-trimmed weighted mean per
/// color channel. Alpha channels ride along from the previous target.
fn em_step(
    nnf: &NearestNeighborField,
    new_source: &MaskedImage,
    new_target: &mut MaskedImage,
    upscaled: bool,
) {
    let radius = if upscaled {
        2 * nnf.radius()
    } else {
        nnf.radius()
    } as i32;

    let field_w = nnf.width() as i32;
    let field_h = nnf.height() as i32;

    let color_channels = new_source.color_channels().to_vec();
    let mut histogram = vec![0f32; color_channels.len() * 256];
    let mut float_px = vec![0f32; new_target.channel_count()];

    for y in 0..new_target.height() as i32 {
        for x in 0..new_target.width() as i32 {
            for bin in histogram.iter_mut() {
                *bin = 0.0;
            }
            let mut wsum = 0f32;

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let xpt = x + dx;
                    let ypt = y + dy;

                    let xst: i32;
                    let yst: i32;
                    let w: f32;
                    if upscaled {
                        if xpt < 0 || xpt >= 2 * field_w || ypt < 0 || ypt >= 2 * field_h {
                            continue;
                        }
                        let entry = nnf.entry((xpt / 2) as u32, (ypt / 2) as u32);
                        xst = 2 * entry.sx + xpt % 2;
                        yst = 2 * entry.sy + ypt % 2;
                        w = nnf.weight(entry.d);
                    } else {
                        if xpt < 0 || xpt >= field_w || ypt < 0 || ypt >= field_h {
                            continue;
                        }
                        let entry = nnf.entry(xpt as u32, ypt as u32);
                        xst = entry.sx;
                        yst = entry.sy;
                        w = nnf.weight(entry.d);
                    }

                    // the source pixel this patch maps onto (x, y); the
                    // bounds stay at the field size even when upscaled
                    let xs = xst - dx;
                    let ys = yst - dy;
                    if xs < 0 || xs >= field_w || ys < 0 || ys >= field_h {
                        continue;
                    }
                    if new_source.mask_at(xs as u32, ys as u32) {
                        continue;
                    }

                    for (i, &c) in color_channels.iter().enumerate() {
                        let value = new_source.pixel_u8(x as u32, y as u32, c);
                        histogram[i * 256 + value as usize] += w;
                    }
                    wsum += w;
                }
            }

            if wsum < MIN_VOTE_WEIGHT {
                continue;
            }

            new_target.pixels_float(x as u32, y as u32, &mut float_px);
            for (i, &c) in color_channels.iter().enumerate() {
                float_px[c] = trimmed_mean(&histogram[i * 256..(i + 1) * 256], wsum);
            }
            new_target.set_pixels_float(x as u32, y as u32, &float_px);
        }
    }
}

/// Weighted mean of the histogram bins inside the `[0.4, 0.6]` quantile
/// window. The low threshold is crossed at a bin with non-zero weight,
/// so the divisor is non-zero whenever the total weight is.
fn trimmed_mean(bins: &[f32], wsum: f32) -> f32 {
    let low = CDF_LOW * wsum;
    let high = CDF_HIGH * wsum;

    let mut cdf = 0f32;
    let mut contrib = 0f32;
    let mut wcontrib = 0f32;

    for (value, &weight) in bins.iter().enumerate() {
        cdf += weight;
        if cdf < low {
            continue;
        }
        contrib += value as f32 * weight;
        wcontrib += weight;
        if cdf > high {
            break;
        }
    }

    contrib / wcontrib
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::masked_image::MaskedImage;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use rand::SeedableRng;

    #[test]
    fn trimmed_mean_of_a_single_bin_is_exact() {
        let mut bins = [0f32; 256];
        bins[77] = 12.5;
        assert!((trimmed_mean(&bins, 12.5) - 77.0).abs() < 1e-6);
    }

    #[test]
    fn trimmed_mean_drops_outlier_tails() {
        let mut bins = [0f32; 256];
        bins[0] = 1.0; // low outlier
        bins[100] = 8.0;
        bins[255] = 1.0; // high outlier
        let mean = trimmed_mean(&bins, 10.0);
        assert!((mean - 100.0).abs() < 1e-6);
    }

    #[test]
    fn unmasked_input_comes_back_unchanged() {
        let mut img = RgbaImage::new(12, 9);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x * 20) as u8, (y * 25) as u8, 7, 255]);
        }
        let mask = GrayImage::from_pixel(12, 9, Luma([255]));
        let masked = MaskedImage::new(&img, &mask).unwrap();

        let mut rng = Pcg32::seed_from_u64(1);
        let out = patch_image(masked, 2, &mut rng);

        assert_eq!((out.width(), out.height()), (12, 9));
        for y in 0..9 {
            for x in 0..12 {
                for c in 0..4 {
                    assert_eq!(out.pixel_u8(x, y, c), img.get_pixel(x, y).0[c as usize]);
                }
            }
        }
    }

    #[test]
    fn output_keeps_the_input_bounds() {
        let img = RgbaImage::from_pixel(20, 13, Rgba([90, 10, 40, 255]));
        let mut mask = GrayImage::from_pixel(20, 13, Luma([255]));
        for y in 5..9 {
            for x in 8..12 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        let masked = MaskedImage::new(&img, &mask).unwrap();

        let mut rng = Pcg32::seed_from_u64(4);
        let out = patch_image(masked, 2, &mut rng);
        assert_eq!((out.width(), out.height()), (20, 13));
    }
}
