//! Reprojection and stacking of calibrated frames

use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    header::Card,
    image::{Grid, Image, ImageError, Mask, Origin},
    pool::WorkerPool,
    stats,
    wcs::CoordinateSolution,
};

#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("nothing to combine")]
    Empty,
    #[error("{0} has no coordinate solution to reproject from")]
    MissingWcs(Origin),
    #[error("{origin} is {found:?}, expected {expected:?}")]
    Shape {
        origin: Origin,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error(transparent)]
    Image(#[from] ImageError),
}
type Result<T> = std::result::Result<T, CombineError>;

/// Tolerance, in pixels, on the edges of the source frame
const EDGE: f64 = 1e-6;

/// Pixel-wise statistic of the stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CombineMethod {
    #[default]
    Median,
    #[strum(to_string = "mean", serialize = "average")]
    Mean,
}

/// Resamples an image onto the pixel grid of another coordinate solution
///
/// Sampling is bilinear; target pixels falling off the source frame are masked.
/// Nothing is done if there is no target solution or if it matches the image one.
pub fn reproject(
    image: Image,
    target: Option<&CoordinateSolution>,
    shape: (usize, usize),
) -> Result<Image> {
    let Some(target) = target else {
        return Ok(image);
    };
    let source = image
        .wcs
        .clone()
        .ok_or_else(|| CombineError::MissingWcs(image.origin().clone()))?;
    if &source == target && image.shape() == shape {
        return Ok(image);
    }
    log::debug!("reprojecting {}", image.origin());
    let (rows, cols) = shape;
    let mask = image.mask_or_valid();
    let (src_rows, src_cols) = image.shape();
    let inside = |v: f64, n: usize| v > -EDGE && v < n as f64 - 1. + EDGE;
    let sample = |r: usize, c: usize| -> Option<(f64, bool, Option<f64>)> {
        let (ra, dec) = target.pixel_to_sky(c as f64 + 1., r as f64 + 1.);
        let (x, y) = source.sky_to_pixel(ra, dec);
        let (x, y) = (x - 1., y - 1.);
        if !(inside(x, src_cols) && inside(y, src_rows)) {
            return None;
        }
        let x = x.clamp(0., (src_cols - 1) as f64);
        let y = y.clamp(0., (src_rows - 1) as f64);
        let (c0, r0) = (x.floor() as usize, y.floor() as usize);
        let (c1, r1) = ((c0 + 1).min(src_cols - 1), (r0 + 1).min(src_rows - 1));
        let (fx, fy) = (x - c0 as f64, y - r0 as f64);
        let corners = [
            ((r0, c0), (1. - fx) * (1. - fy)),
            ((r0, c1), fx * (1. - fy)),
            ((r1, c0), (1. - fx) * fy),
            ((r1, c1), fx * fy),
        ];
        let blend = |grid: &Grid<f64>| corners.iter().map(|(p, w)| grid[*p] * w).sum::<f64>();
        let masked = corners.iter().any(|(p, w)| *w > 0. && mask[*p]);
        Some((blend(&image.data), masked, image.uncertainty().map(blend)))
    };
    let samples: Vec<_> = (0..rows * cols)
        .map(|i| sample(i / cols, i % cols))
        .collect();
    let data = Grid::new(
        rows,
        cols,
        samples.iter().map(|s| s.map_or(f64::NAN, |s| s.0)).collect(),
    );
    let new_mask = Mask::new(
        rows,
        cols,
        samples.iter().map(|s| s.map_or(true, |s| s.1)).collect(),
    );
    let uncertainty = image.uncertainty().map(|_| {
        Grid::new(
            rows,
            cols,
            samples
                .iter()
                .map(|s| s.and_then(|s| s.2).unwrap_or(f64::NAN))
                .collect(),
        )
    });
    let mut header = image.header.clone();
    header.merge(&target.to_header());
    let mut out = Image::new(data, header);
    out.wcs = Some(target.clone());
    if let Some(path) = &image.origin().0 {
        out = out.with_origin(path);
    }
    out = out.with_mask(new_mask)?;
    if let Some(uncertainty) = uncertainty {
        out = out.with_uncertainty(uncertainty)?;
    }
    Ok(out)
}

/// Pixel-wise combination of frames of identical shape
///
/// Masked pixels are left out of the statistic; a pixel masked in every frame
/// is combined from all the frames and stays masked. The header and the
/// coordinate solution are the ones of the first frame.
pub fn stack(images: &[Image], method: CombineMethod) -> Result<Image> {
    let first = images.first().ok_or(CombineError::Empty)?;
    let shape = first.shape();
    if let Some(odd) = images.iter().find(|i| i.shape() != shape) {
        return Err(CombineError::Shape {
            origin: odd.origin().clone(),
            expected: shape,
            found: odd.shape(),
        });
    }
    let masks: Vec<Mask> = images.iter().map(Image::mask_or_valid).collect();
    let statistic = |values: &mut Vec<f64>| match method {
        CombineMethod::Median => stats::median_mut(values),
        CombineMethod::Mean => stats::mean(values),
    };
    let with_uncertainty = images.iter().all(|i| i.uncertainty().is_some());
    let n = shape.0 * shape.1;
    let mut data = Vec::with_capacity(n);
    let mut mask = Vec::with_capacity(n);
    let mut sigma = Vec::with_capacity(n);
    let mut values = Vec::with_capacity(images.len());
    for i in 0..n {
        let valid: Vec<usize> = (0..images.len())
            .filter(|&k| !masks[k].values()[i] && images[k].data.values()[i].is_finite())
            .collect();
        let all_masked = valid.is_empty();
        let used: Vec<usize> = if all_masked {
            (0..images.len())
                .filter(|&k| images[k].data.values()[i].is_finite())
                .collect()
        } else {
            valid
        };
        values.clear();
        values.extend(used.iter().map(|&k| images[k].data.values()[i]));
        data.push(statistic(&mut values).unwrap_or(f64::NAN));
        mask.push(all_masked);
        if with_uncertainty {
            let var: f64 = used
                .iter()
                .filter_map(|&k| images[k].uncertainty().map(|u| u.values()[i].powi(2)))
                .sum();
            let m = used.len().max(1) as f64;
            let scale = match method {
                CombineMethod::Median => std::f64::consts::FRAC_PI_2.sqrt(),
                CombineMethod::Mean => 1.,
            };
            sigma.push(scale * var.sqrt() / m);
        }
    }
    let mut out = Image::new(Grid::new(shape.0, shape.1, data), first.header.clone());
    out.wcs = first.wcs.clone();
    out = out.with_mask(Mask::new(shape.0, shape.1, mask))?;
    if with_uncertainty {
        out = out.with_uncertainty(Grid::new(shape.0, shape.1, sigma))?;
    }
    Ok(out)
}

/// Reprojects all the frames onto the first one and stacks them
///
/// The coordinate solution of the first frame is attached to the result and
/// its header normalised.
pub fn combine<P: WorkerPool>(
    images: Vec<Image>,
    method: CombineMethod,
    pool: &P,
) -> Result<Image> {
    let first = images.first().ok_or(CombineError::Empty)?;
    let reference = first.wcs.clone();
    let shape = first.shape();
    let n = images.len();
    log::info!("combining {n} frame(s) with the {method}");
    let reprojected = pool
        .map(images, |image| reproject(image, reference.as_ref(), shape))
        .into_iter()
        .collect::<Result<Vec<Image>>>()?;
    let mut combined = stack(&reprojected, method)?;
    if let Some(wcs) = reference {
        combined.attach_wcs(wcs);
    }
    combined.header.set("NCOMBINE", n as i64);
    combined
        .header
        .push(Card::commentary("HISTORY", format!("{n} frames combined with the {method}")));
    combined.header = std::mem::take(&mut combined.header).normalize();
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{header::Header, pool::DummyPool};

    fn frame(values: &[f64], wcs: Option<&CoordinateSolution>) -> Image {
        let mut header = Header::new();
        header.set("OBJECT", "field");
        if let Some(wcs) = wcs {
            header.merge(&wcs.to_header());
        }
        Image::new(Grid::new(1, values.len(), values.to_vec()), header)
    }
    fn solution(crpix: f64) -> CoordinateSolution {
        CoordinateSolution::new((crpix, 1.), (150., 2.), [[1e-4, 0.], [0., 1e-4]]).unwrap()
    }

    #[test]
    fn methods_parse() {
        assert_eq!("median".parse::<CombineMethod>().unwrap(), CombineMethod::Median);
        assert_eq!("average".parse::<CombineMethod>().unwrap(), CombineMethod::Mean);
        assert_eq!(CombineMethod::Mean.to_string(), "mean");
        assert!("sum".parse::<CombineMethod>().is_err());
    }

    #[test]
    fn median_and_mean() {
        let images = [frame(&[1., 2.], None), frame(&[3., 2.], None), frame(&[8., 2.], None)];
        let median = stack(&images, CombineMethod::Median).unwrap();
        assert_eq!(median.data.values(), &[3., 2.]);
        let mean = stack(&images, CombineMethod::Mean).unwrap();
        assert_eq!(mean.data.values(), &[4., 2.]);
    }

    #[test]
    fn masked_pixels_are_left_out() {
        let masked = |values: &[f64], bad: [bool; 2]| {
            frame(values, None)
                .with_mask(Mask::new(1, 2, bad.to_vec()))
                .unwrap()
        };
        let images = [
            masked(&[100., 5.], [true, true]),
            masked(&[1., 7.], [false, true]),
        ];
        let out = stack(&images, CombineMethod::Mean).unwrap();
        assert_eq!(out.data.values(), &[1., 6.]);
        assert_eq!(out.mask().unwrap().values(), &[false, true]);
    }

    #[test]
    fn identical_solutions_are_not_resampled() {
        let wcs = solution(1.);
        let image = frame(&[1., 2., 3.], Some(&wcs));
        let out = reproject(image.clone(), Some(&wcs), (1, 3)).unwrap();
        assert_eq!(out.data, image.data);
        assert!(out.mask().is_none());
    }

    #[test]
    fn shifted_frames_are_aligned() {
        let reference = solution(1.);
        // same sky, reference pixel one column to the right
        let shifted = solution(2.);
        let image = frame(&[10., 20., 30., 40.], Some(&shifted));
        let out = reproject(image, Some(&reference), (1, 4)).unwrap();
        assert!((out.data[(0, 0)] - 20.).abs() < 1e-6);
        assert!((out.data[(0, 2)] - 40.).abs() < 1e-6);
        assert!(out.mask().unwrap()[(0, 3)]);
        assert_eq!(out.wcs.as_ref(), Some(&reference));
    }

    #[test]
    fn missing_solution_is_an_error() {
        let wcs = solution(1.);
        let images = vec![frame(&[1.], Some(&wcs)), frame(&[2.], None)];
        assert!(matches!(
            combine(images, CombineMethod::Median, &DummyPool),
            Err(CombineError::MissingWcs(_))
        ));
    }

    #[test]
    fn combined_frame_keeps_reference_solution() {
        let wcs = solution(1.);
        let images = vec![frame(&[1., 1.], Some(&wcs)), frame(&[3., 3.], Some(&wcs))];
        let out = combine(images, CombineMethod::Mean, &DummyPool).unwrap();
        assert_eq!(out.wcs, Some(wcs));
        assert_eq!(out.data.values(), &[2., 2.]);
        assert_eq!(out.header.get_f64("NCOMBINE"), Some(2.));
        assert_eq!(out.header.keys().filter(|k| *k == "OBJECT").count(), 1);
    }
}
