//! Coordinate solution
//!
//! Gnomonic (tangent plane) mapping between pixel and sky coordinates,
//! built from the `CRPIX`, `CRVAL` and `CD` (or `CDELT`/`PC`) header keywords.
//! Pixel coordinates follow the header convention: 1-based, x along columns.

use nalgebra::{Matrix2, Vector2};

use crate::header::Header;

#[derive(Debug, thiserror::Error)]
pub enum WcsError {
    #[error("coordinate keyword {0} is missing")]
    MissingKey(String),
    #[error("the pixel to sky matrix is singular")]
    Singular,
}
type Result<T> = std::result::Result<T, WcsError>;

/// Pixel to sky mapping
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateSolution {
    /// reference pixel (CRPIX1, CRPIX2)
    pub crpix: Vector2<f64>,
    /// sky coordinates of the reference pixel in degrees (CRVAL1, CRVAL2)
    pub crval: Vector2<f64>,
    /// pixel offsets to intermediate coordinates in degrees
    pub cd: Matrix2<f64>,
    pub ctype: (String, String),
}
impl CoordinateSolution {
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Result<Self> {
        let cd = Matrix2::new(cd[0][0], cd[0][1], cd[1][0], cd[1][1]);
        if cd.determinant().abs() < f64::EPSILON * f64::EPSILON {
            return Err(WcsError::Singular);
        }
        Ok(Self {
            crpix: Vector2::new(crpix.0, crpix.1),
            crval: Vector2::new(crval.0, crval.1),
            cd,
            ctype: ("RA---TAN".to_string(), "DEC--TAN".to_string()),
        })
    }
    /// Builds the solution from header keywords
    pub fn from_header(header: &Header) -> Result<Self> {
        let get = |key: &str| {
            header
                .get_f64(key)
                .ok_or_else(|| WcsError::MissingKey(key.to_string()))
        };
        let crpix = (get("CRPIX1")?, get("CRPIX2")?);
        let crval = (get("CRVAL1")?, get("CRVAL2")?);
        let cd = if header.contains("CD1_1") {
            [
                [get("CD1_1")?, header.get_f64("CD1_2").unwrap_or(0f64)],
                [header.get_f64("CD2_1").unwrap_or(0f64), get("CD2_2")?],
            ]
        } else {
            let (cdelt1, cdelt2) = (get("CDELT1")?, get("CDELT2")?);
            let pc = |key: &str, default: f64| header.get_f64(key).unwrap_or(default);
            [
                [cdelt1 * pc("PC1_1", 1f64), cdelt1 * pc("PC1_2", 0f64)],
                [cdelt2 * pc("PC2_1", 0f64), cdelt2 * pc("PC2_2", 1f64)],
            ]
        };
        let mut solution = Self::new(crpix, crval, cd)?;
        if let (Some(c1), Some(c2)) = (header.get_str("CTYPE1"), header.get_str("CTYPE2")) {
            solution.ctype = (c1.to_string(), c2.to_string());
        }
        Ok(solution)
    }
    /// Header keywords describing the solution
    pub fn to_header(&self) -> Header {
        let mut header = Header::new();
        header.set("CTYPE1", self.ctype.0.as_str());
        header.set("CTYPE2", self.ctype.1.as_str());
        header.set("CRPIX1", self.crpix[0]);
        header.set("CRPIX2", self.crpix[1]);
        header.set("CRVAL1", self.crval[0]);
        header.set("CRVAL2", self.crval[1]);
        header.set("CD1_1", self.cd[(0, 0)]);
        header.set("CD1_2", self.cd[(0, 1)]);
        header.set("CD2_1", self.cd[(1, 0)]);
        header.set("CD2_2", self.cd[(1, 1)]);
        header
    }
    /// Sky coordinates (RA, Dec) in degrees of a pixel
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let xi_eta = self.cd * (Vector2::new(x, y) - self.crpix);
        let (xi, eta) = (xi_eta[0].to_radians(), xi_eta[1].to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;
        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2(xi.hypot(denom));
        (ra.to_degrees().rem_euclid(360f64), dec.to_degrees())
    }
    /// Pixel coordinates of a sky position (RA, Dec) in degrees
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (ra, dec) = (ra.to_radians(), dec.to_radians());
        let (ra0, dec0) = (self.crval[0].to_radians(), self.crval[1].to_radians());
        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = (ra - ra0).sin_cos();
        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();
        // `new` rejects singular matrices
        let inverse = self.cd.try_inverse().unwrap_or_else(Matrix2::zeros);
        let p = inverse * Vector2::new(xi, eta) + self.crpix;
        (p[0], p[1])
    }
    /// Pixel scale in arcsec
    pub fn pixel_scale(&self) -> f64 {
        let sx = self.cd.column(0).norm();
        let sy = self.cd.column(1).norm();
        0.5 * (sx + sy) * 3600f64
    }
}
