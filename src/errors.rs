use std::fmt;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f32,
    pub(crate) value: f32,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is below the minimum of {}",
            self.name, self.value, self.min
        )
    }
}

#[derive(Debug)]
pub struct SizeMismatch {
    pub(crate) image: (u32, u32),
    pub(crate) mask: (u32, u32),
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the mask size ({}x{}) must match the image size ({}x{})",
            self.mask.0, self.mask.1, self.image.0, self.image.1
        )
    }
}

#[derive(Debug)]
pub struct UnsupportedChannels {
    pub(crate) colors: usize,
    pub(crate) alphas: usize,
}

impl fmt::Display for UnsupportedChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the image must have at least one color channel and at most one \
             alpha channel, got {} color and {} alpha",
            self.colors, self.alphas
        )
    }
}

#[derive(Debug)]
pub enum Error {
    /// An input parameter had an invalid range specified
    InvalidRange(InvalidRange),
    /// The image and mask surfaces must share the same bounds
    SizeMismatch(SizeMismatch),
    /// The mask surface must expose exactly one channel
    MaskChannelMismatch(usize),
    /// The image's channel layout cannot be used for patch voting
    UnsupportedChannels(UnsupportedChannels),
    /// A pixel grid allocation would overflow addressable memory
    TooLarge(u32, u32),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::SizeMismatch(sm) => write!(f, "{}", sm),
            Self::MaskChannelMismatch(count) => write!(
                f,
                "the mask must have exactly 1 channel, but it has {}",
                count
            ),
            Self::UnsupportedChannels(uc) => write!(f, "{}", uc),
            Self::TooLarge(width, height) => write!(
                f,
                "a {}x{} pixel grid does not fit in addressable memory",
                width, height
            ),
        }
    }
}
