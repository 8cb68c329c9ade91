//! Reduction driver
//!
//! [reduce_image] chains the stages of one band: grouping, calibration, sky
//! scaling, bad pixel interpolation and combination. [reduce_and_refine] then
//! hands the combined frame to a [Refiner] and [write_output] persists the
//! result next to its sidecar files.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    calibrate::{
        calibrate_group, interpolate_bad_pixels, skyscale, CcdCalibrator, Connectivity,
        PartialPolicy, SkyMethod, SkyRegion,
    },
    classify::Band,
    combine::{combine, CombineMethod},
    error::{Error, Result},
    group::{read_and_group, CandidatePaths, ImageGroup},
    image::{Image, ImageIo},
    pool::WorkerPool,
    refine::{Refined, Refiner},
};

/// Suffix of the solver header fragment sidecar
pub const HEADER_SUFFIX: &str = "_scamp.head";
/// Suffix of the extractor catalog sidecar
pub const CATALOG_SUFFIX: &str = "_sextractor.fits";
/// Suffix of the reference catalog sidecar
pub const REFERENCE_SUFFIX: &str = "_reference.cat";

/// Parses a user supplied option value
pub fn parse_option<T: FromStr>(what: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::Option {
        what,
        value: value.to_string(),
    })
}

/// Reduction options
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOptions {
    band: Band,
    combine_method: CombineMethod,
    sky_method: SkyMethod,
    sky_region: SkyRegion,
    connectivity: Connectivity,
    policy: PartialPolicy,
}
impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            band: Band::J,
            combine_method: CombineMethod::default(),
            sky_method: SkyMethod::default(),
            sky_region: SkyRegion::default(),
            connectivity: Connectivity::default(),
            policy: PartialPolicy::default(),
        }
    }
}
impl ReduceOptions {
    pub fn band(self, band: Band) -> Self {
        Self { band, ..self }
    }
    pub fn combine_method(self, combine_method: CombineMethod) -> Self {
        Self {
            combine_method,
            ..self
        }
    }
    pub fn sky_method(self, sky_method: SkyMethod) -> Self {
        Self { sky_method, ..self }
    }
    pub fn sky_region(self, sky_region: SkyRegion) -> Self {
        Self { sky_region, ..self }
    }
    pub fn connectivity(self, connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            ..self
        }
    }
    /// Drops the frames that fail calibration instead of failing the band
    pub fn tolerant(self) -> Self {
        Self {
            policy: PartialPolicy::Tolerant,
            ..self
        }
    }
    /// Options from user strings, e.g. `("J", "median", "subtract")`
    pub fn parse(band: &str, combine_method: &str, sky_method: &str) -> Result<Self> {
        Ok(Self::default()
            .band(parse_option("band", band)?)
            .combine_method(parse_option("combine method", combine_method)?)
            .sky_method(parse_option("sky method", sky_method)?))
    }
    pub fn selected_band(&self) -> Band {
        self.band
    }
}

/// Reduces the frames of one band into a single combined frame
pub fn reduce_image<P: WorkerPool>(
    paths: &CandidatePaths,
    options: &ReduceOptions,
    io: &dyn ImageIo,
    pool: &P,
) -> Result<Image> {
    let mut grouping = read_and_group(paths, io, pool)?;
    let group = grouping.take(options.band)?;
    reduce_group(group, options, pool)
}

/// Reduces an already formed group
pub fn reduce_group<P: WorkerPool>(
    group: ImageGroup,
    options: &ReduceOptions,
    pool: &P,
) -> Result<Image> {
    let shape = group.check_dimensions()?;
    log::info!(
        "reducing {} frame(s) of {shape:?} pixels in band {}",
        group.science.len(),
        options.band
    );
    let calibrated = calibrate_group(group, &CcdCalibrator, options.policy, pool)?;
    let scaled = skyscale(calibrated, options.sky_method, &options.sky_region, pool)?;
    let cleaned = pool.map(scaled, |image| {
        interpolate_bad_pixels(image, options.connectivity)
    });
    Ok(combine(cleaned, options.combine_method, pool)?)
}

/// Reduces the frames of one band and refines the coordinate solution of the result
pub fn reduce_and_refine<P: WorkerPool>(
    paths: &CandidatePaths,
    options: &ReduceOptions,
    refiner: &Refiner,
    pool: &P,
) -> Result<Refined> {
    let image = reduce_image(paths, options, refiner.io(), pool)?;
    Ok(refiner.refine(image)?)
}

/// Refines already reduced frames, writing each to the matching output
pub fn refine_only<I, O>(inputs: &[I], outputs: &[O], refiner: &Refiner) -> Result<()>
where
    I: AsRef<Path>,
    O: AsRef<Path>,
{
    if inputs.len() != outputs.len() {
        return Err(Error::Mismatch {
            inputs: inputs.len(),
            outputs: outputs.len(),
        });
    }
    for (input, output) in inputs.iter().zip(outputs) {
        let input = input.as_ref();
        let image = refiner.io().read(input)?.with_origin(input);
        let refined = refiner.refine(image)?;
        write_output(output.as_ref(), &refined, refiner.io())?;
    }
    Ok(())
}

/// `out.fits` with `_scamp.head` gives `out_scamp.head`
pub fn sidecar_path(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{stem}{suffix}"))
}

/// Writes the refined frame and its sidecars
///
/// Failing to write a sidecar is an error, failing to write the frame is only logged.
pub fn write_output(output: &Path, refined: &Refined, io: &dyn ImageIo) -> Result<()> {
    if let Err(e) = io.write(output, &refined.image, true) {
        log::error!("{e}: {:?}", std::error::Error::source(&e));
    }
    for (suffix, bytes) in [
        (HEADER_SUFFIX, refined.header.as_bytes()),
        (CATALOG_SUFFIX, refined.catalog.as_slice()),
        (REFERENCE_SUFFIX, refined.reference_catalog.as_slice()),
    ] {
        let path = sidecar_path(output, suffix);
        fs::write(&path, bytes).map_err(|source| Error::Write { path, source })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{header::Header, image::Grid};

    #[test]
    fn default_options() {
        let options = ReduceOptions::default();
        assert_eq!(options.selected_band(), Band::J);
        assert_eq!(options.combine_method, CombineMethod::Median);
        assert_eq!(options.sky_method, SkyMethod::Subtract);
        assert_eq!(options.policy, PartialPolicy::Strict);
        assert_eq!(ReduceOptions::parse("J", "median", "subtract").unwrap(), options);
    }

    #[test]
    fn unknown_option_values() {
        let options = ReduceOptions::parse("Ks", "average", "divide").unwrap();
        assert_eq!(options.selected_band(), Band::Ks);
        assert_eq!(options.combine_method, CombineMethod::Mean);
        assert!(matches!(
            ReduceOptions::parse("J", "median", "multiply"),
            Err(Error::Option {
                what: "sky method",
                ..
            })
        ));
        assert!(matches!(
            ReduceOptions::parse("Y", "median", "subtract"),
            Err(Error::Option { what: "band", .. })
        ));
    }

    #[test]
    fn sidecar_names() {
        let out = Path::new("/data/reduced/field.fits");
        assert_eq!(
            sidecar_path(out, HEADER_SUFFIX),
            Path::new("/data/reduced/field_scamp.head")
        );
        assert_eq!(
            sidecar_path(Path::new("field"), REFERENCE_SUFFIX),
            Path::new("field_reference.cat")
        );
    }

    struct FailingIo;
    impl ImageIo for FailingIo {
        fn read(&self, path: &Path) -> std::result::Result<Image, crate::image::ImageError> {
            Err(crate::image::ImageError::Read {
                path: path.to_path_buf(),
                source: "unsupported".into(),
            })
        }
        fn write(
            &self,
            path: &Path,
            _image: &Image,
            _overwrite: bool,
        ) -> std::result::Result<(), crate::image::ImageError> {
            Err(crate::image::ImageError::Write {
                path: path.to_path_buf(),
                source: "disk full".into(),
            })
        }
    }

    #[test]
    fn image_write_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let refined = Refined {
            image: Image::new(Grid::filled(2, 2, 0f64), Header::new()),
            header: "CRVAL1  = 1.0\nEND".to_string(),
            catalog: b"catalog".to_vec(),
            reference_catalog: b"reference".to_vec(),
        };
        let output = dir.path().join("out.fits");
        write_output(&output, &refined, &FailingIo).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("out_scamp.head")).unwrap(),
            refined.header
        );
        assert_eq!(fs::read(dir.path().join("out_sextractor.fits")).unwrap(), b"catalog");
        assert_eq!(fs::read(dir.path().join("out_reference.cat")).unwrap(), b"reference");

        let missing = dir.path().join("nowhere").join("out.fits");
        assert!(matches!(
            write_output(&missing, &refined, &FailingIo),
            Err(Error::Write { .. })
        ));
    }
}
