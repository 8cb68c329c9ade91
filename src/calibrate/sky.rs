//! Sky level estimation and removal

use std::ops::Range;

use strum_macros::{Display, EnumIter, EnumString};

use super::{CalibrationError, Result};
use crate::{image::Image, pool::WorkerPool, stats};

/// Clipping threshold in standard deviations
pub const SIGMA: f64 = 3.0;
/// Maximum number of clipping iterations
pub const MAX_ITERS: usize = 3;

/// How the sky level of a frame is matched to the reference frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum SkyMethod {
    /// `frame - (median - reference median)`
    #[default]
    Subtract,
    /// `frame / (median / reference median)`
    Divide,
}
impl SkyMethod {
    /// Scale of the reference frame itself
    pub fn identity(&self) -> f64 {
        match self {
            SkyMethod::Subtract => 0.0,
            SkyMethod::Divide => 1.0,
        }
    }
    fn apply(&self, value: f64, factor: f64) -> f64 {
        match self {
            SkyMethod::Subtract => value - factor,
            SkyMethod::Divide => value / factor,
        }
    }
}

/// Frame region the sky median is taken from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkyRegion {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}
impl Default for SkyRegion {
    fn default() -> Self {
        Self {
            rows: 200..800,
            cols: 200..800,
        }
    }
}
impl SkyRegion {
    /// Region clipped to a frame of the given shape, the whole frame if nothing is left
    pub fn clamp(&self, (rows, cols): (usize, usize)) -> (Range<usize>, Range<usize>) {
        let clip = |r: &Range<usize>, n: usize| r.start.min(n)..r.end.min(n);
        let (r, c) = (clip(&self.rows, rows), clip(&self.cols, cols));
        if r.is_empty() || c.is_empty() {
            (0..rows, 0..cols)
        } else {
            (r, c)
        }
    }
}

/// Sigma-clipped sky median of a frame
///
/// The clipping interval is derived from all the valid pixels of the frame,
/// the median from the valid pixels of the region within that interval.
pub fn sky_median(image: &Image, region: &SkyRegion) -> Result<f64> {
    let mask = image.mask();
    let valid = |row: usize, col: usize| {
        let v = image.data[(row, col)];
        (v.is_finite() && !mask.is_some_and(|m| m[(row, col)])).then_some(v)
    };
    let (rows, cols) = image.shape();
    let all: Vec<f64> = (0..rows)
        .flat_map(|r| (0..cols).filter_map(move |c| valid(r, c)))
        .collect();
    let no_sky = || CalibrationError::NoSky(image.origin().clone());
    let (lo, hi) = stats::sigma_clip_bounds(&all, SIGMA, MAX_ITERS).ok_or_else(no_sky)?;
    let (rows, cols) = region.clamp(image.shape());
    let mut sky: Vec<f64> = rows
        .flat_map(|r| cols.clone().filter_map(move |c| valid(r, c)))
        .filter(|v| *v >= lo && *v <= hi)
        .collect();
    stats::median_mut(&mut sky).ok_or_else(no_sky)
}

/// Scale factors relative to the last median
///
/// The last factor is always [SkyMethod::identity].
/// Dividing is impossible if any median is zero.
pub fn sky_scale_factors(medians: &[f64], method: SkyMethod) -> Option<Vec<f64>> {
    let reference = *medians.last()?;
    match method {
        SkyMethod::Subtract => Some(medians.iter().map(|m| m - reference).collect()),
        SkyMethod::Divide if medians.iter().any(|m| !divisible(*m)) => None,
        SkyMethod::Divide => Some(medians.iter().map(|m| m / reference).collect()),
    }
}

fn divisible(median: f64) -> bool {
    median != 0.0 && median.is_finite()
}

/// Matches the sky level of every frame to the one of the last frame
pub fn skyscale<P: WorkerPool>(
    images: Vec<Image>,
    method: SkyMethod,
    region: &SkyRegion,
    pool: &P,
) -> Result<Vec<Image>> {
    if images.is_empty() {
        return Ok(images);
    }
    let medians = pool
        .map(images.iter().collect(), |image| sky_median(image, region))
        .into_iter()
        .collect::<Result<Vec<f64>>>()?;
    log::info!("sky medians: {medians:?}");
    let factors = match sky_scale_factors(&medians, method) {
        Some(factors) => factors,
        None => {
            let zero = medians.iter().position(|m| !divisible(*m)).unwrap_or(0);
            return Err(CalibrationError::ZeroSky(images[zero].origin().clone()));
        }
    };
    Ok(pool.map(
        images.into_iter().zip(factors).collect(),
        |(mut image, factor)| {
            image
                .data
                .values_mut()
                .iter_mut()
                .for_each(|v| *v = method.apply(*v, factor));
            if method == SkyMethod::Divide {
                if let Some(sigma) = image.uncertainty_mut() {
                    sigma.values_mut().iter_mut().for_each(|s| *s /= factor);
                }
            }
            image
        },
    ))
}
