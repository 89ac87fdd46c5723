use crate::masked_image::MaskedImage;

/// Sequence of repeatedly halved copies of the input, finest first.
///
/// Construction stops before a downsample that would leave the shorter
/// side at or below the patch radius, and as soon as a level has no
/// masked pixels left (nothing remains to synthesise below it).
pub(crate) struct Pyramid {
    levels: Vec<MaskedImage>,
}

impl Pyramid {
    pub(crate) fn new(initial: MaskedImage, radius: u32) -> Self {
        let mut levels = Vec::new();
        let mut current = initial;

        loop {
            let done = current.count_masked() == 0
                || current.width().min(current.height()) / 2 <= radius;
            if done {
                levels.push(current);
                break;
            }

            let mut next = current.clone();
            next.downsample2x();
            levels.push(current);
            current = next;
        }

        Self { levels }
    }

    pub(crate) fn len(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn level(&self, level: usize) -> &MaskedImage {
        &self.levels[level]
    }

    pub(crate) fn last(&self) -> &MaskedImage {
        &self.levels[self.levels.len() - 1]
    }
}
