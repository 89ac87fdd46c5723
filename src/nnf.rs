//! Randomized nearest-neighbor field between a target and a source image.
//!
//! Every target pixel tracks the best source patch found so far, as a
//! source coordinate plus an integer patch distance in `0..=DIST_MAX`.
//! `minimize` interleaves neighbour propagation with an exponentially
//! shrinking random search, scanning forward then backward so good
//! matches flow across the field within a single pass.

use rand::Rng;
use rand_pcg::Pcg32;

use crate::masked_image::MaskedImage;

/// Distance ceiling; also the "effectively unknown" marker.
pub(crate) const DIST_MAX: i32 = 65535;

/// Penalty charged per patch offset that is out of bounds or masked.
const SSD_MAX: i64 = 10 * 255 * 255;

/// How often a still-unknown entry is re-seeded with fresh randoms.
const RESAMPLE_RETRIES: u32 = 20;

#[derive(Clone, Copy)]
pub(crate) struct FieldEntry {
    pub sx: i32,
    pub sy: i32,
    pub d: i32,
}

/// Patch distance between the target patch centred at (x, y) and the
/// source patch centred at (xp, yp), normalised into `0..=DIST_MAX`.
///
/// Offsets whose sample is out of bounds or masked on either side are
/// charged the full per-pixel penalty instead of a sample difference, so
/// a patch centred deep inside the hole saturates at `DIST_MAX`.
pub(crate) fn distance(
    input: &MaskedImage,
    x: i32,
    y: i32,
    output: &MaskedImage,
    xp: i32,
    yp: i32,
    radius: u32,
) -> i32 {
    let r = radius as i32;
    let side = i64::from(2 * r + 1);
    let wsum = side * side * SSD_MAX;
    let mut sum = 0i64;

    for dy in -r..=r {
        for dx in -r..=r {
            let (xt, yt) = (x + dx, y + dy);
            let (xs, ys) = (xp + dx, yp + dy);

            let penalised = !input.contains(xt, yt)
                || input.mask_at(xt as u32, yt as u32)
                || !output.contains(xs, ys)
                || output.mask_at(xs as u32, ys as u32);

            if penalised {
                sum += SSD_MAX;
            } else {
                sum += input.distance_sq(xt as u32, yt as u32, output, xs as u32, ys as u32);
            }
        }
    }

    ((i64::from(DIST_MAX) * sum) / wsum) as i32
}

pub(crate) struct NearestNeighborField {
    width: u32,
    height: u32,
    radius: u32,
    field: Vec<FieldEntry>,
    similarity: Vec<f32>,
}

impl NearestNeighborField {
    pub(crate) fn new(target: crate::Dims, radius: u32) -> Self {
        Self {
            width: target.width,
            height: target.height,
            radius,
            field: vec![
                FieldEntry {
                    sx: 0,
                    sy: 0,
                    d: DIST_MAX
                };
                target.width as usize * target.height as usize
            ],
            similarity: build_similarity(),
        }
    }

    pub(crate) fn radius(&self) -> u32 {
        self.radius
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub(crate) fn entry(&self, x: u32, y: u32) -> FieldEntry {
        self.field[(y * self.width + x) as usize]
    }

    /// Voting weight for a patch distance.
    #[inline]
    pub(crate) fn weight(&self, d: i32) -> f32 {
        self.similarity[d as usize]
    }

    /// Seeds every entry with a uniform random source coordinate, then
    /// settles the distances, re-rolling entries that stay unknown.
    pub(crate) fn randomize(
        &mut self,
        input: &MaskedImage,
        output: &MaskedImage,
        rng: &mut Pcg32,
    ) {
        for entry in self.field.iter_mut() {
            entry.sx = rng.gen_range(0, output.width()) as i32;
            entry.sy = rng.gen_range(0, output.height()) as i32;
            entry.d = DIST_MAX;
        }
        self.settle(input, output, rng);
    }

    /// Seeds from a coarser field by scaling its coordinates up, then
    /// settles the distances the same way `randomize` does.
    pub(crate) fn initialize_from(
        &mut self,
        coarser: &Self,
        input: &MaskedImage,
        output: &MaskedImage,
        rng: &mut Pcg32,
    ) {
        let x_scale = self.width / coarser.width;
        let y_scale = self.height / coarser.height;

        for y in 0..self.height {
            for x in 0..self.width {
                let cx = (x / x_scale).min(coarser.width - 1);
                let cy = (y / y_scale).min(coarser.height - 1);
                let seed = coarser.entry(cx, cy);

                self.field[(y * self.width + x) as usize] = FieldEntry {
                    sx: seed.sx * x_scale as i32,
                    sy: seed.sy * y_scale as i32,
                    d: DIST_MAX,
                };
            }
        }
        self.settle(input, output, rng);
    }

    /// Recomputes every entry's distance; entries that come back at
    /// `DIST_MAX` get re-rolled with fresh randoms a bounded number of
    /// times.
    fn settle(&mut self, input: &MaskedImage, output: &MaskedImage, rng: &mut Pcg32) {
        for y in 0..self.height {
            for x in 0..self.width {
                let idx = (y * self.width + x) as usize;
                let mut entry = self.field[idx];
                entry.d = distance(
                    input,
                    x as i32,
                    y as i32,
                    output,
                    entry.sx,
                    entry.sy,
                    self.radius,
                );

                let mut retries = 0;
                while entry.d == DIST_MAX && retries < RESAMPLE_RETRIES {
                    entry.sx = rng.gen_range(0, output.width()) as i32;
                    entry.sy = rng.gen_range(0, output.height()) as i32;
                    entry.d = distance(
                        input,
                        x as i32,
                        y as i32,
                        output,
                        entry.sx,
                        entry.sy,
                        self.radius,
                    );
                    retries += 1;
                }

                self.field[idx] = entry;
            }
        }
    }

    /// Runs `passes` propagation/search sweeps: a forward raster scan
    /// followed by a reverse one. Updates are committed in scan order so
    /// later pixels observe earlier improvements within the same pass.
    pub(crate) fn minimize(
        &mut self,
        input: &MaskedImage,
        output: &MaskedImage,
        passes: usize,
        rng: &mut Pcg32,
    ) {
        for _ in 0..passes {
            for y in 0..self.height {
                for x in 0..self.width {
                    if self.field[(y * self.width + x) as usize].d > 0 {
                        self.minimize_link(x, y, 1, input, output, rng);
                    }
                }
            }

            for y in (0..self.height).rev() {
                for x in (0..self.width).rev() {
                    if self.field[(y * self.width + x) as usize].d != 0 {
                        self.minimize_link(x, y, -1, input, output, rng);
                    }
                }
            }
        }
    }

    fn minimize_link(
        &mut self,
        x: u32,
        y: u32,
        dir: i32,
        input: &MaskedImage,
        output: &MaskedImage,
        rng: &mut Pcg32,
    ) {
        let idx = (y * self.width + x) as usize;
        let mut best = self.field[idx];

        // horizontal propagation: shift the left/right neighbour's match
        let px = x as i32 - dir;
        if px >= 0 && px < self.width as i32 {
            let neigh = self.field[(y * self.width + px as u32) as usize];
            let (cx, cy) = (neigh.sx + dir, neigh.sy);
            if output.contains(cx, cy) {
                let d = distance(input, x as i32, y as i32, output, cx, cy, self.radius);
                if d < best.d {
                    best = FieldEntry { sx: cx, sy: cy, d };
                }
            }
        }

        // vertical propagation: the x component comes from the current
        // cell, not the vertical neighbour
        let py = y as i32 - dir;
        if py >= 0 && py < self.height as i32 {
            let neigh = self.field[(py as u32 * self.width + x) as usize];
            let (cx, cy) = (best.sx, neigh.sy + dir);
            if output.contains(cx, cy) {
                let d = distance(input, x as i32, y as i32, output, cx, cy, self.radius);
                if d < best.d {
                    best = FieldEntry { sx: cx, sy: cy, d };
                }
            }
        }

        // random search in a halving window around the current best
        let mut window = output.width() as i32;
        while window > 0 {
            let cx = (best.sx + rng.gen_range(-window, window + 1))
                .max(0)
                .min(output.width() as i32 - 1);
            let cy = (best.sy + rng.gen_range(-window, window + 1))
                .max(0)
                .min(output.height() as i32 - 1);

            let d = distance(input, x as i32, y as i32, output, cx, cy, self.radius);
            if d < best.d {
                best = FieldEntry { sx: cx, sy: cy, d };
            }
            window /= 2;
        }

        self.field[idx] = best;
    }
}

/// Monotone map from patch distance to voting weight: a flipped logistic
/// ramp pinned to 0.999 at distance zero with its half-point at 10% of
/// the distance range.
fn build_similarity() -> Vec<f32> {
    let s0 = 0.999f64;
    let t_half = 0.10f64;
    let x = (s0 - 0.5) * 2.0;
    let inv_tanh = 0.5 * ((1.0 + x) / (1.0 - x)).ln();
    let coef = inv_tanh / t_half;

    let mut similarity = Vec::with_capacity(DIST_MAX as usize + 1);
    for i in 0..=DIST_MAX as usize {
        let t = i as f64 / (f64::from(DIST_MAX) + 1.0);
        similarity.push((0.5 - 0.5 * (coef * (t - t_half)).tanh()) as f32);
    }
    similarity
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::masked_image::MaskedImage;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use rand::SeedableRng;

    fn noise_image(width: u32, height: u32) -> MaskedImage {
        let mut img = RgbaImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let v = ((x * 31 + y * 17) % 256) as u8;
            *px = Rgba([v, v / 2, 255 - v, 255]);
        }
        let mut mask = GrayImage::from_pixel(width, height, Luma([255]));
        for y in 4..8 {
            for x in 4..8 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        MaskedImage::new(&img, &mask).unwrap()
    }

    #[test]
    fn similarity_is_monotone_non_increasing() {
        let similarity = build_similarity();
        assert_eq!(similarity.len(), DIST_MAX as usize + 1);
        assert!(similarity[0] > similarity[DIST_MAX as usize]);
        for pair in similarity.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert!((similarity[0] - 0.999).abs() < 1e-3);
    }

    #[test]
    fn fully_masked_patch_saturates() {
        let source = noise_image(16, 16);
        let mut target = noise_image(16, 16);
        target.clear_mask();

        // a source patch centred in the middle of the hole only ever
        // collects penalties
        assert_eq!(distance(&target, 8, 8, &source, 5, 5, 1), DIST_MAX);
    }

    #[test]
    fn identical_patch_has_zero_distance() {
        let source = noise_image(16, 16);
        let mut target = noise_image(16, 16);
        target.clear_mask();

        assert_eq!(distance(&target, 12, 12, &source, 12, 12, 1), 0);
    }

    #[test]
    fn randomize_keeps_entries_in_source_range() {
        let source = noise_image(16, 16);
        let mut target = noise_image(16, 16);
        target.clear_mask();

        let mut rng = Pcg32::seed_from_u64(7);
        let mut nnf = NearestNeighborField::new(target.dims(), 2);
        nnf.randomize(&target, &source, &mut rng);

        for y in 0..nnf.height() {
            for x in 0..nnf.width() {
                let entry = nnf.entry(x, y);
                assert!(entry.sx >= 0 && entry.sx < 16);
                assert!(entry.sy >= 0 && entry.sy < 16);
                assert!(entry.d >= 0 && entry.d <= DIST_MAX);
            }
        }
    }

    #[test]
    fn minimize_never_increases_a_distance() {
        let source = noise_image(16, 16);
        let mut target = noise_image(16, 16);
        target.clear_mask();

        let mut rng = Pcg32::seed_from_u64(9);
        let mut nnf = NearestNeighborField::new(target.dims(), 2);
        nnf.randomize(&target, &source, &mut rng);

        for _ in 0..3 {
            let before: Vec<i32> = (0..16 * 16)
                .map(|i| nnf.field[i as usize].d)
                .collect();
            nnf.minimize(&target, &source, 1, &mut rng);
            for (i, &d) in before.iter().enumerate() {
                assert!(nnf.field[i].d <= d);
            }
        }
    }

    #[test]
    fn initialize_from_scales_coarse_matches() {
        let source = noise_image(16, 16);
        let mut target = noise_image(16, 16);
        target.clear_mask();

        let coarse_source = noise_image(8, 8);
        let mut coarse_target = noise_image(8, 8);
        coarse_target.clear_mask();

        let mut rng = Pcg32::seed_from_u64(3);
        let mut coarse = NearestNeighborField::new(coarse_target.dims(), 1);
        coarse.randomize(&coarse_target, &coarse_source, &mut rng);

        let mut fine = NearestNeighborField::new(target.dims(), 1);
        fine.initialize_from(&coarse, &target, &source, &mut rng);

        for y in 0..fine.height() {
            for x in 0..fine.width() {
                let entry = fine.entry(x, y);
                assert!(entry.sx >= 0 && entry.sx < 16);
                assert!(entry.sy >= 0 && entry.sy < 16);
            }
        }
    }
}
