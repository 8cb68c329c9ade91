//! Bad pixel interpolation
//!
//! Each connected set of bad pixels is grown by one pixel, and all the bad
//! pixels of the grown domain are replaced by the mean of the valid pixels in
//! the domain bounding box.

use std::collections::VecDeque;

use crate::image::{Image, Mask};

/// Pixel neighbourhood used for dilation and labelling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Connectivity {
    /// Edge neighbours
    #[default]
    Four,
    /// Edge and corner neighbours
    Eight,
}
impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        match self {
            Connectivity::Four => &[(-1, 0), (1, 0), (0, -1), (0, 1)],
            Connectivity::Eight => &[
                (-1, -1),
                (-1, 0),
                (-1, 1),
                (0, -1),
                (0, 1),
                (1, -1),
                (1, 0),
                (1, 1),
            ],
        }
    }
    fn neighbours(
        &self,
        (row, col): (usize, usize),
        (rows, cols): (usize, usize),
    ) -> impl Iterator<Item = (usize, usize)> {
        self.offsets().iter().filter_map(move |(dr, dc)| {
            let r = row.checked_add_signed(*dr)?;
            let c = col.checked_add_signed(*dc)?;
            (r < rows && c < cols).then_some((r, c))
        })
    }
}

fn dilate(mask: &Mask, connectivity: Connectivity) -> Mask {
    let shape = mask.shape();
    Mask::from_fn(shape.0, shape.1, |r, c| {
        mask[(r, c)]
            || connectivity
                .neighbours((r, c), shape)
                .any(|n| mask[n])
    })
}

/// Connected components of the set pixels
fn label(mask: &Mask, connectivity: Connectivity) -> Vec<Vec<(usize, usize)>> {
    let shape = mask.shape();
    let mut seen = Mask::filled(shape.0, shape.1, false);
    let mut domains = vec![];
    for r in 0..shape.0 {
        for c in 0..shape.1 {
            if !mask[(r, c)] || seen[(r, c)] {
                continue;
            }
            seen[(r, c)] = true;
            let mut domain = vec![];
            let mut queue = VecDeque::from([(r, c)]);
            while let Some(pixel) = queue.pop_front() {
                domain.push(pixel);
                for n in connectivity.neighbours(pixel, shape) {
                    if mask[n] && !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }
            domains.push(domain);
        }
    }
    domains
}

/// Replaces the bad pixels of an image by the local mean of the valid ones
///
/// The mask is left unchanged. A domain without any valid pixel in its
/// bounding box is not modified.
pub fn interpolate_bad_pixels(mut image: Image, connectivity: Connectivity) -> Image {
    let Some(mask) = image.mask().cloned() else {
        return image;
    };
    let domains = label(&dilate(&mask, connectivity), connectivity);
    let mut unfilled = 0;
    for domain in &domains {
        let (r0, r1, c0, c1) = domain.iter().fold(
            (usize::MAX, 0, usize::MAX, 0),
            |(r0, r1, c0, c1), &(r, c)| (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
        );
        let (sum, n) = (r0..=r1)
            .flat_map(|r| (c0..=c1).map(move |c| (r, c)))
            .filter(|&p| !mask[p])
            .map(|p| image.data[p])
            .filter(|v| v.is_finite())
            .fold((0f64, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            unfilled += 1;
            continue;
        }
        let fill = sum / n as f64;
        domain
            .iter()
            .filter(|&&p| mask[p])
            .for_each(|&p| image.data[p] = fill);
    }
    log::debug!(
        "{}: {} interpolation domain(s)",
        image.origin(),
        domains.len()
    );
    if unfilled > 0 {
        log::warn!(
            "{}: {unfilled} domain(s) without valid pixels left as is",
            image.origin()
        );
    }
    image
}
