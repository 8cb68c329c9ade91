//! Calibration of science frames
//!
//! The bad pixel maps of a group are OR-ed into a single [Mask] computed once
//! and shared by every per-frame task. Each science frame is then converted to
//! electrons and flat-fielded by a [Calibrator], scaled to the sky level of the
//! last frame ([sky]) and finally cleaned of its bad pixels ([interpolate]).

use crate::{
    combine::{self, CombineMethod},
    group::ImageGroup,
    image::{Grid, Image, ImageError, Mask, Origin},
    pool::WorkerPool,
    stats,
};

pub mod interpolate;
pub mod sky;

pub use interpolate::{interpolate_bad_pixels, Connectivity};
pub use sky::{sky_scale_factors, skyscale, SkyMethod, SkyRegion};

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("keyword {key} is required to calibrate {origin}")]
    MissingKey { key: String, origin: Origin },
    #[error("no bad pixel map to build the mask from")]
    NoBadPixelMap,
    #[error("no flat field")]
    NoFlat,
    #[error("bad pixel map {origin} is {found:?}, expected {expected:?}")]
    MaskShape {
        origin: Origin,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("{what} is {found:?}, expected the {expected:?} of {origin}")]
    Shape {
        what: &'static str,
        origin: Origin,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("flat field {0} has no usable normalisation")]
    DegenerateFlat(Origin),
    #[error("no valid pixel to estimate the sky of {0}")]
    NoSky(Origin),
    #[error("the sky median of {0} is zero, cannot divide by it")]
    ZeroSky(Origin),
    #[error("failed to stack the flat fields")]
    MasterFlat(#[source] combine::CombineError),
    #[error("all of the {0} science frame(s) failed calibration")]
    NothingLeft(usize),
    #[error(transparent)]
    Image(#[from] ImageError),
}
type Result<T> = std::result::Result<T, CalibrationError>;

/// What to do with a science frame that fails calibration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartialPolicy {
    /// Any failure fails the group
    #[default]
    Strict,
    /// Failed frames are dropped with a warning
    Tolerant,
}

/// Defects of a bad pixel map: non-zero samples and masked samples
pub fn defect_mask(bad: &Image) -> Mask {
    let mut mask = bad.data.map(|v| *v != 0.0);
    if let Some(plane) = bad.mask() {
        mask.values_mut()
            .iter_mut()
            .zip(plane.values())
            .for_each(|(m, p)| *m |= *p);
    }
    mask
}

/// Logical OR of the defects of all the bad pixel maps
pub fn union_mask(bads: &[Image]) -> Result<Mask> {
    let (first, others) = bads.split_first().ok_or(CalibrationError::NoBadPixelMap)?;
    let mut mask = defect_mask(first);
    for bad in others {
        if bad.shape() != mask.shape() {
            return Err(CalibrationError::MaskShape {
                origin: bad.origin().clone(),
                expected: mask.shape(),
                found: bad.shape(),
            });
        }
        mask.values_mut()
            .iter_mut()
            .zip(defect_mask(bad).values())
            .for_each(|(m, b)| *m |= *b);
    }
    log::info!(
        "bad pixel mask: {} defect(s) from {} map(s)",
        mask.count_invalid(),
        bads.len()
    );
    Ok(mask)
}

/// Detector gain (e-/ADU) and readout noise (e-)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainReadnoise {
    pub gain: f64,
    pub readnoise: f64,
}
impl GainReadnoise {
    /// Averages the four amplifier quadrants `GAIN1..4` and `RDNOISE1..4`,
    /// falling back to single `GAIN` and `RDNOISE` keywords
    pub fn from_image(image: &Image) -> Result<Self> {
        Ok(Self {
            gain: quadrant_average(image, "GAIN")?,
            readnoise: quadrant_average(image, "RDNOISE")?,
        })
    }
}
fn quadrant_average(image: &Image, stem: &str) -> Result<f64> {
    let missing = |key: String| CalibrationError::MissingKey {
        key,
        origin: image.origin().clone(),
    };
    if !image.header.contains(&format!("{stem}1")) {
        if let Some(value) = image.header.get_f64(stem) {
            return Ok(value);
        }
    }
    let mut sum = 0f64;
    for quadrant in 1..=4 {
        let key = format!("{stem}{quadrant}");
        sum += image.header.get_f64(&key).ok_or_else(|| missing(key))?;
    }
    Ok(sum / 4.)
}

/// Frame calibration contract
///
/// The returned image must carry `mask` as its mask plane.
pub trait Calibrator: Sync {
    fn calibrate(
        &self,
        image: Image,
        mask: &Mask,
        flat: &Image,
        gain_readnoise: GainReadnoise,
    ) -> Result<Image>;
}

/// Gain correction and flat-fielding
///
/// Pixels are converted to electrons, the uncertainty is `sqrt(max(e, 0) + rn²)`
/// and both are divided by the flat normalised by its mean over valid pixels.
/// Pixels where the normalised flat is not positive are left unflattened.
#[derive(Debug, Default, Clone, Copy)]
pub struct CcdCalibrator;
impl Calibrator for CcdCalibrator {
    fn calibrate(
        &self,
        image: Image,
        mask: &Mask,
        flat: &Image,
        GainReadnoise { gain, readnoise }: GainReadnoise,
    ) -> Result<Image> {
        let expected = image.shape();
        for (what, found) in [("flat field", flat.shape()), ("bad pixel mask", mask.shape())] {
            if found != expected {
                return Err(CalibrationError::Shape {
                    what,
                    origin: image.origin().clone(),
                    expected,
                    found,
                });
            }
        }
        let flat_mean = {
            let valid: Vec<f64> = flat
                .data
                .values()
                .iter()
                .zip(mask.values())
                .filter(|(v, bad)| !**bad && v.is_finite())
                .map(|(v, _)| *v)
                .collect();
            stats::mean(&valid)
                .filter(|m| *m != 0.0 && m.is_finite())
                .ok_or_else(|| CalibrationError::DegenerateFlat(flat.origin().clone()))?
        };
        let (rows, cols) = image.shape();
        let mut data = Vec::with_capacity(rows * cols);
        let mut uncertainty = Vec::with_capacity(rows * cols);
        for (adu, f) in image.data.values().iter().zip(flat.data.values()) {
            let electrons = adu * gain;
            let sigma = (electrons.max(0.0) + readnoise * readnoise).sqrt();
            let norm = f / flat_mean;
            if norm > 0.0 && norm.is_finite() {
                data.push(electrons / norm);
                uncertainty.push(sigma / norm);
            } else {
                data.push(electrons);
                uncertainty.push(sigma);
            }
        }
        let mut image = image;
        image.data = Grid::new(rows, cols, data);
        image.header.set("BUNIT", "electron");
        image.header.set("GAIN", 1.0);
        image.header.set("RDNOISE", readnoise);
        Ok(image
            .with_uncertainty(Grid::new(rows, cols, uncertainty))?
            .with_mask(mask.clone())?)
    }
}

/// Master flat of a group, the median of the flats if there are several
pub fn master_flat(mut flats: Vec<Image>) -> Result<Image> {
    match flats.len() {
        0 => Err(CalibrationError::NoFlat),
        1 => flats.pop().ok_or(CalibrationError::NoFlat),
        n => {
            log::info!("median stacking {n} flats");
            combine::stack(&flats, CombineMethod::Median)
                .map_err(CalibrationError::MasterFlat)
        }
    }
}

/// Calibrates every science frame of a group
///
/// With [PartialPolicy::Strict], the first failure is returned.
pub fn calibrate_group<C: Calibrator, P: WorkerPool>(
    group: ImageGroup,
    calibrator: &C,
    policy: PartialPolicy,
    pool: &P,
) -> Result<Vec<Image>> {
    let ImageGroup { bad, flat, science } = group;
    let mask = union_mask(&bad)?;
    let flat = master_flat(flat)?;
    let total = science.len();
    let results = pool.map(science, |image| {
        let gain_readnoise = GainReadnoise::from_image(&image)?;
        log::debug!("{}: {gain_readnoise:?}", image.origin());
        calibrator.calibrate(image, &mask, &flat, gain_readnoise)
    });
    match policy {
        PartialPolicy::Strict => results.into_iter().collect(),
        PartialPolicy::Tolerant => {
            let calibrated: Vec<Image> = results
                .into_iter()
                .filter_map(|result| {
                    result
                        .map_err(|e| log::warn!("frame dropped: {e}"))
                        .ok()
                })
                .collect();
            if calibrated.is_empty() {
                Err(CalibrationError::NothingLeft(total))
            } else {
                Ok(calibrated)
            }
        }
    }
}
