//! Reading and sorting of the candidate frames into per-band groups

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
};

use itertools::Itertools;

use crate::{
    classify::{classifier, detect_instrument, Band, Category, ClassifyError, Instrument},
    image::{Image, ImageError, ImageIo, Origin},
    pool::WorkerPool,
};

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("path {0:?} does not seem to exist")]
    MissingFile(PathBuf),
    #[error("failed to read image")]
    Read(#[from] ImageError),
    #[error("failed to classify {origin}")]
    Classify {
        origin: Origin,
        #[source]
        source: ClassifyError,
    },
    #[error("cannot mix images from different instruments: {0:?}")]
    MixedInstruments(Vec<Instrument>),
    #[error("none of the images comes from a known instrument")]
    NoInstrument,
    #[error("{origin} was selected as {expected:?} but is classified as {found:?}")]
    CategoryMismatch {
        origin: Origin,
        expected: Category,
        found: Category,
    },
    #[error("not enough data for band {band}: {shortfall}")]
    InsufficientData { band: Band, shortfall: Shortfall },
    #[error("image dimension mismatch: {origin} is {found:?}, expected {expected:?}")]
    DimensionMismatch {
        origin: Origin,
        expected: (usize, usize),
        found: (usize, usize),
    },
}
type Result<T> = std::result::Result<T, GroupError>;

/// Candidate file paths for each frame role
#[derive(Debug, Clone, Default)]
pub struct CandidatePaths {
    pub bad: Vec<PathBuf>,
    pub flat: Vec<PathBuf>,
    pub science: Vec<PathBuf>,
}
impl CandidatePaths {
    pub fn new<B, F, S>(bad: B, flat: F, science: S) -> Self
    where
        B: IntoIterator,
        B::Item: Into<PathBuf>,
        F: IntoIterator,
        F::Item: Into<PathBuf>,
        S: IntoIterator,
        S::Item: Into<PathBuf>,
    {
        Self {
            bad: bad.into_iter().map(Into::into).collect(),
            flat: flat.into_iter().map(Into::into).collect(),
            science: science.into_iter().map(Into::into).collect(),
        }
    }
}

/// Bad pixel maps, flat fields and science frames of one band
#[derive(Debug, Clone, Default)]
pub struct ImageGroup {
    pub bad: Vec<Image>,
    pub flat: Vec<Image>,
    pub science: Vec<Image>,
}
impl ImageGroup {
    fn shortfall(&self) -> Option<Shortfall> {
        let shortfall = Shortfall {
            bad: self.bad.len(),
            flat: self.flat.len(),
            science: self.science.len(),
        };
        (shortfall.bad == 0 || shortfall.flat == 0 || shortfall.science == 0).then_some(shortfall)
    }
    /// Checks that all the frames have the same shape, returning that shape
    pub fn check_dimensions(&self) -> Result<(usize, usize)> {
        let mut images = self.bad.iter().chain(&self.flat).chain(&self.science);
        let Some(first) = images.next() else {
            return Ok((0, 0));
        };
        let expected = first.shape();
        images
            .find(|image| image.shape() != expected)
            .map_or(Ok(expected), |image| {
                Err(GroupError::DimensionMismatch {
                    origin: image.origin().clone(),
                    expected,
                    found: image.shape(),
                })
            })
    }
}

/// Frame counts of a band that was left out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Shortfall {
    pub bad: usize,
    pub flat: usize,
    pub science: usize,
}
impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bad pixel map(s), {} flat(s), {} science frame(s)",
            self.bad, self.flat, self.science
        )
    }
}

/// Result of the grouping
#[derive(Debug)]
pub struct Grouping {
    pub instrument: Instrument,
    pub groups: BTreeMap<Band, ImageGroup>,
    pub excluded: BTreeMap<Band, Shortfall>,
}
impl Grouping {
    /// Removes and returns the group of a band
    pub fn take(&mut self, band: Band) -> Result<ImageGroup> {
        self.groups
            .remove(&band)
            .ok_or_else(|| GroupError::InsufficientData {
                band,
                shortfall: self.excluded.get(&band).copied().unwrap_or_default(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    Bad,
    Flat,
    Science,
}

/// Reads all the candidate frames and sorts them by band
///
/// Every path is checked before any image is read.
/// Frames from an unknown instrument are dropped with a warning.
pub fn read_and_group<P: WorkerPool>(
    paths: &CandidatePaths,
    io: &dyn ImageIo,
    pool: &P,
) -> Result<Grouping> {
    let tagged: Vec<(Role, PathBuf)> = paths
        .bad
        .iter()
        .map(|p| (Role::Bad, p.clone()))
        .chain(paths.flat.iter().map(|p| (Role::Flat, p.clone())))
        .chain(paths.science.iter().map(|p| (Role::Science, p.clone())))
        .collect();
    if let Some((_, path)) = tagged.iter().find(|(_, path)| !path.is_file()) {
        return Err(GroupError::MissingFile(path.clone()));
    }
    log::info!(
        "reading {} bad pixel map(s), {} flat(s), {} science frame(s)",
        paths.bad.len(),
        paths.flat.len(),
        paths.science.len()
    );
    let images = pool
        .map(tagged, |(role, path)| {
            io.read(&path).map(|image| (role, image.with_origin(&path)))
        })
        .into_iter()
        .collect::<std::result::Result<Vec<_>, ImageError>>()?;
    group(images.into_iter())
}

/// Sorts frames, already read, by band
fn group<I: Iterator<Item = (Role, Image)>>(images: I) -> Result<Grouping> {
    let images: Vec<(Role, Instrument, Image)> = images
        .filter_map(|(role, image)| match detect_instrument(&image.header) {
            Instrument::Unknown => {
                log::warn!("{}: unknown instrument, image ignored", image.origin());
                None
            }
            instrument => Some((role, instrument, image)),
        })
        .collect();

    let instruments: BTreeSet<Instrument> = images.iter().map(|(_, i, _)| *i).collect();
    let instrument = match instruments.len() {
        0 => return Err(GroupError::NoInstrument),
        1 => *instruments.iter().next().ok_or(GroupError::NoInstrument)?,
        _ => return Err(GroupError::MixedInstruments(instruments.into_iter().collect())),
    };
    log::info!("instrument: {instrument}");
    let rules = classifier(instrument).ok_or(GroupError::NoInstrument)?;

    let mut bad = vec![];
    let mut by_band: BTreeMap<Band, ImageGroup> = Band::of(instrument)
        .map(|band| (band, ImageGroup::default()))
        .collect();
    for (role, _, image) in images {
        if role == Role::Bad {
            bad.push(image);
            continue;
        }
        let band = rules.band(&image.header).map_err(|source| GroupError::Classify {
            origin: image.origin().clone(),
            source,
        })?;
        let Some(group) = by_band.get_mut(&band) else {
            return Err(GroupError::Classify {
                origin: image.origin().clone(),
                source: ClassifyError::UnknownFilter {
                    filter: band.filter_name().to_string(),
                    instrument,
                },
            });
        };
        let (expected, frames) = match role {
            Role::Flat => (Category::Flat, &mut group.flat),
            _ => (Category::Science, &mut group.science),
        };
        let found = rules.category(&image.header);
        if found != expected {
            return Err(GroupError::CategoryMismatch {
                origin: image.origin().clone(),
                expected,
                found,
            });
        }
        frames.push(image);
    }

    let mut grouping = Grouping {
        instrument,
        groups: BTreeMap::new(),
        excluded: BTreeMap::new(),
    };
    for (band, mut group) in by_band {
        group.bad = bad.clone();
        match group.shortfall() {
            Some(shortfall) => {
                if shortfall.science > 0 || shortfall.flat > 0 {
                    log::warn!("insufficient data for band {band}: {shortfall}");
                }
                grouping.excluded.insert(band, shortfall);
            }
            None => {
                log::info!(
                    "band {band}: {}",
                    group.science.iter().map(|i| i.origin().to_string()).join(", ")
                );
                grouping.groups.insert(band, group);
            }
        }
    }
    Ok(grouping)
}
