//! Image entity
//!
//! An [Image] owns the pixel grid of one exposure, the co-sized validity mask
//! (`true` marks a bad pixel), an optional uncertainty plane, the header and the
//! coordinate solution derived from it.

use std::{
    fmt,
    ops::{Index, IndexMut},
    path::{Path, PathBuf},
};

use crate::{header::Header, wcs::CoordinateSolution};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("{plane} is {found:?} but the pixel grid is {expected:?} ({origin})")]
    Dimensions {
        plane: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
        origin: Origin,
    },
    #[error("keyword {key} is missing or not {kind} in {origin}")]
    MissingKey {
        key: String,
        kind: &'static str,
        origin: Origin,
    },
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
type Result<T> = std::result::Result<T, ImageError>;

/// Row-major 2-D buffer indexed by `(row, column)`
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    values: Vec<T>,
}
impl<T> Grid<T> {
    pub fn new(rows: usize, cols: usize, values: Vec<T>) -> Self {
        assert_eq!(
            values.len(),
            rows * cols,
            "grid values length must equal rows * cols"
        );
        Self { rows, cols, values }
    }
    pub fn from_fn<F: FnMut(usize, usize) -> T>(rows: usize, cols: usize, mut f: F) -> Self {
        let values = (0..rows * cols).map(|i| f(i / cols, i % cols)).collect();
        Self { rows, cols, values }
    }
    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn values(&self) -> &[T] {
        &self.values
    }
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }
    pub fn into_values(self) -> Vec<T> {
        self.values
    }
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        (row < self.rows && col < self.cols).then(|| &self.values[row * self.cols + col])
    }
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Grid<U> {
        Grid {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(f).collect(),
        }
    }
}
impl<T: Clone> Grid<T> {
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            values: vec![value; rows * cols],
        }
    }
}
impl<T> Index<(usize, usize)> for Grid<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &Self::Output {
        &self.values[row * self.cols + col]
    }
}
impl<T> IndexMut<(usize, usize)> for Grid<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut Self::Output {
        &mut self.values[row * self.cols + col]
    }
}

/// Bad pixel mask, `true` is invalid
pub type Mask = Grid<bool>;
impl Mask {
    pub fn count_invalid(&self) -> usize {
        self.values().iter().filter(|&&bad| bad).count()
    }
}

/// Where an image came from, for diagnostics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Origin(pub Option<PathBuf>);
impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) => write!(f, "{}", path.display()),
            None => write!(f, "<memory>"),
        }
    }
}

/// One exposure
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Grid<f64>,
    mask: Option<Mask>,
    uncertainty: Option<Grid<f64>>,
    pub header: Header,
    pub wcs: Option<CoordinateSolution>,
    origin: Origin,
}
impl Image {
    /// Creates an image, deriving the coordinate solution from the header if it has one
    pub fn new(data: Grid<f64>, header: Header) -> Self {
        let wcs = CoordinateSolution::from_header(&header).ok();
        Self {
            data,
            mask: None,
            uncertainty: None,
            header,
            wcs,
            origin: Origin::default(),
        }
    }
    pub fn with_mask(self, mask: Mask) -> Result<Self> {
        self.check_shape("mask", mask.shape())?;
        Ok(Self {
            mask: Some(mask),
            ..self
        })
    }
    pub fn with_uncertainty(self, uncertainty: Grid<f64>) -> Result<Self> {
        self.check_shape("uncertainty", uncertainty.shape())?;
        Ok(Self {
            uncertainty: Some(uncertainty),
            ..self
        })
    }
    pub fn with_origin<P: AsRef<Path>>(self, path: P) -> Self {
        Self {
            origin: Origin(Some(path.as_ref().to_path_buf())),
            ..self
        }
    }
    fn check_shape(&self, plane: &'static str, found: (usize, usize)) -> Result<()> {
        if found != self.data.shape() {
            return Err(ImageError::Dimensions {
                plane,
                expected: self.data.shape(),
                found,
                origin: self.origin.clone(),
            });
        }
        Ok(())
    }
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }
    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }
    pub fn uncertainty(&self) -> Option<&Grid<f64>> {
        self.uncertainty.as_ref()
    }
    pub fn uncertainty_mut(&mut self) -> Option<&mut Grid<f64>> {
        self.uncertainty.as_mut()
    }
    pub fn origin(&self) -> &Origin {
        &self.origin
    }
    /// Mask plane or an all valid mask
    pub fn mask_or_valid(&self) -> Mask {
        self.mask
            .clone()
            .unwrap_or_else(|| Mask::filled(self.data.rows(), self.data.cols(), false))
    }
    /// Drops the mask and uncertainty planes
    pub fn primary_only(&self) -> Self {
        Self {
            data: self.data.clone(),
            mask: None,
            uncertainty: None,
            header: self.header.clone(),
            wcs: self.wcs.clone(),
            origin: self.origin.clone(),
        }
    }
    /// Numeric header value that the pipeline cannot do without
    pub fn required_f64(&self, key: &str) -> Result<f64> {
        self.header
            .get_f64(key)
            .ok_or_else(|| ImageError::MissingKey {
                key: key.to_string(),
                kind: "numeric",
                origin: self.origin.clone(),
            })
    }
    /// String header value that the pipeline cannot do without
    pub fn required_str(&self, key: &str) -> Result<&str> {
        self.header
            .get_str(key)
            .ok_or_else(|| ImageError::MissingKey {
                key: key.to_string(),
                kind: "a string",
                origin: self.origin.clone(),
            })
    }
    /// Replaces the coordinate solution and the matching header keywords
    pub fn attach_wcs(&mut self, wcs: CoordinateSolution) {
        self.header.merge(&wcs.to_header());
        self.wcs = Some(wcs);
    }
}

/// On-disk image format collaborator
pub trait ImageIo: Send + Sync {
    fn read(&self, path: &Path) -> Result<Image>;
    fn write(&self, path: &Path, image: &Image, overwrite: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_indexing() {
        let grid = Grid::from_fn(3, 4, |r, c| (r * 10 + c) as f64);
        assert_eq!(grid.shape(), (3, 4));
        assert_eq!(grid[(2, 3)], 23.0);
        assert_eq!(grid.get(3, 0), None);
    }

    #[test]
    fn mask_must_match_data() {
        let image = Image::new(Grid::filled(4, 4, 0f64), Header::new()).with_origin("a.fits");
        let err = image.with_mask(Mask::filled(4, 5, false)).unwrap_err();
        assert!(matches!(
            err,
            ImageError::Dimensions {
                plane: "mask",
                expected: (4, 4),
                found: (4, 5),
                ..
            }
        ));
        assert!(err.to_string().contains("a.fits"));
    }

    #[test]
    fn missing_keys_name_the_image() {
        let mut header = Header::new();
        header.set("GAIN1", 4.2);
        let image = Image::new(Grid::filled(1, 1, 0f64), header).with_origin("NCA.fits");
        assert_eq!(image.required_f64("GAIN1").unwrap(), 4.2);
        let err = image.required_f64("GAIN2").unwrap_err();
        assert_eq!(
            err.to_string(),
            "keyword GAIN2 is missing or not numeric in NCA.fits"
        );
    }

    #[test]
    fn wcs_from_header() {
        let mut header = Header::new();
        for (key, value) in [
            ("CRPIX1", 1.0),
            ("CRPIX2", 1.0),
            ("CRVAL1", 10.0),
            ("CRVAL2", 20.0),
            ("CD1_1", 1e-4),
            ("CD2_2", 1e-4),
        ] {
            header.set(key, value);
        }
        let image = Image::new(Grid::filled(2, 2, 0f64), header);
        assert!(image.wcs.is_some());
    }
}
