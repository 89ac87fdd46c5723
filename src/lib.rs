#![warn(
    clippy::all,
    clippy::doc_markdown,
    clippy::dbg_macro,
    clippy::todo,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::mem_forget,
    clippy::use_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style
)]

//! `patch-inpaint` is a light API for mask-guided image inpainting built
//! on the PatchMatch correspondence algorithm with a multiscale
//! expectation-maximization refinement.
//!
//! Given an image and a single-channel mask marking *hole* pixels (mask
//! byte below 128), the engine synthesises plausible content for the
//! hole: it builds a pyramid of halved copies, and from the coarsest
//! level up repeatedly matches every target patch to its approximate
//! nearest neighbour in the known region, then votes the matched patches
//! back into the hole through per-pixel histograms.
//!
//! ## Usage
//!
//! The one-call form seeds the random stream from entropy:
//!
//! ```no_run
//! # let image = patch_inpaint::image::RgbaImage::new(64, 64);
//! # let mask = patch_inpaint::image::GrayImage::new(64, 64);
//! let healed = patch_inpaint::patch(&image, &mask, 2).expect("failed to patch image");
//! ```
//!
//! For reproducible output, build a [`Session`] with an explicit seed:
//!
//! ```no_run
//! # let image = patch_inpaint::image::RgbaImage::new(64, 64);
//! # let mask = patch_inpaint::image::GrayImage::new(64, 64);
//! let healed = patch_inpaint::SessionBuilder::new(&image, &mask)
//!     .radius(2)
//!     .seed(10)
//!     .build()
//!     .expect("failed to build session")
//!     .run();
//! ```
//!
//! Any [`PixelSurface`] works as input; impls are provided for the
//! `image` crate's `RgbaImage`, `RgbImage` and `GrayImage` buffers. The
//! output surface has the same type, bounds and channel layout as the
//! input image. Non-hole pixels also pass through the voting grid, so
//! they are not guaranteed to stay bit-identical.

mod em;
mod errors;
mod img_pyramid;
mod masked_image;
mod nnf;
mod surface;

use rand::SeedableRng;
use rand_pcg::Pcg32;

use masked_image::MaskedImage;

pub use image;

pub use errors::Error;
pub use surface::{ChannelKind, PixelSurface};

/// Simple dimensions struct
#[derive(Copy, Clone)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Fills the masked region of `image` and returns the synthesised
/// surface.
///
/// `mask` must be a single-channel surface with the same bounds as the
/// image; a pixel is a hole iff its mask byte is below 128. `radius` is
/// the patch half-width, so patches cover `(2 * radius + 1)^2` pixels
/// and `radius` must be at least 1.
///
/// The random stream is seeded from entropy; use [`SessionBuilder::seed`]
/// when runs need to be reproducible.
pub fn patch<S, M>(image: &S, mask: &M, radius: u32) -> Result<S, Error>
where
    S: PixelSurface + Clone,
    M: PixelSurface + ?Sized,
{
    Ok(SessionBuilder::new(image, mask).radius(radius).build()?.run())
}

/// Builds a [`Session`] by setting parameters; calling `build` checks the
/// inputs so that the later [`Session::run`] cannot fail.
pub struct SessionBuilder<'a, S, M: ?Sized> {
    image: &'a S,
    mask: &'a M,
    radius: u32,
    seed: Option<u64>,
}

impl<'a, S, M> SessionBuilder<'a, S, M>
where
    S: PixelSurface + Clone,
    M: PixelSurface + ?Sized,
{
    pub fn new(image: &'a S, mask: &'a M) -> Self {
        Self {
            image,
            mask,
            radius: 3,
            seed: None,
        }
    }

    /// Patch half-width.
    ///
    /// Default: 3
    pub fn radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    /// Seeds the pseudo-random stream so repeated runs with identical
    /// inputs produce bit-identical output. Without a seed the stream is
    /// drawn from the system's entropy source.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Creates a `Session`, or returns an error if invalid parameters or
    /// input surfaces were specified.
    pub fn build(self) -> Result<Session<'a, S>, Error> {
        if self.radius < 1 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                value: self.radius as f32,
                name: "radius",
            }));
        }

        let masked = MaskedImage::new(self.image, self.mask)?;
        let rng = match self.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_entropy(),
        };

        Ok(Session {
            image: self.image,
            masked,
            radius: self.radius,
            rng,
        })
    }
}

/// A validated inpainting run.
///
/// `run()` consumes the session, executes the multiscale EM loop to
/// completion on the calling thread, and writes the synthesised grid
/// back into a clone of the input surface.
pub struct Session<'a, S: PixelSurface + Clone> {
    image: &'a S,
    masked: MaskedImage,
    radius: u32,
    rng: Pcg32,
}

impl<'a, S: PixelSurface + Clone> Session<'a, S> {
    pub fn run(mut self) -> S {
        let result = em::patch_image(self.masked, self.radius, &mut self.rng);

        let mut output = self.image.clone();
        result.write_to(&mut output);
        output
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    #[test]
    fn zero_radius_is_rejected() {
        let img = RgbaImage::new(8, 8);
        let mask = GrayImage::from_pixel(8, 8, Luma([255]));

        let err = SessionBuilder::new(&img, &mask).radius(0).build();
        assert!(matches!(err, Err(Error::InvalidRange(_))));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let img = RgbaImage::new(8, 8);
        let mask = GrayImage::from_pixel(8, 9, Luma([255]));

        let err = SessionBuilder::new(&img, &mask).build();
        assert!(matches!(err, Err(Error::SizeMismatch(_))));
    }

    #[test]
    fn output_type_and_bounds_follow_the_input() {
        let img = RgbaImage::from_pixel(16, 11, Rgba([5, 6, 7, 255]));
        let mut mask = GrayImage::from_pixel(16, 11, Luma([255]));
        mask.put_pixel(8, 5, Luma([0]));

        let out: RgbaImage = SessionBuilder::new(&img, &mask)
            .radius(2)
            .seed(11)
            .build()
            .unwrap()
            .run();
        assert_eq!(out.dimensions(), (16, 11));
    }
}
