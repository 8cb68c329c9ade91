use std::{io, path::PathBuf};

use crate::{
    astromatic::ConfigError, calibrate::CalibrationError, classify::ClassifyError,
    combine::CombineError, group::GroupError, header::HeaderError, image::ImageError,
    pool::PoolError, process::RunError, refine::RefineError, wcs::WcsError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `header` module")]
    Header(#[from] HeaderError),
    #[error("Error in the `wcs` module")]
    Wcs(#[from] WcsError),
    #[error("Error in the `image` module")]
    Image(#[from] ImageError),
    #[error("Error in the `classify` module")]
    Classify(#[from] ClassifyError),
    #[error("Error in the `group` module")]
    Group(#[from] GroupError),
    #[error("Error in the `calibrate` module")]
    Calibration(#[from] CalibrationError),
    #[error("Error in the `combine` module")]
    Combine(#[from] CombineError),
    #[error("Error in the `astromatic` module")]
    Config(#[from] ConfigError),
    #[error("Error in the `process` module")]
    Run(#[from] RunError),
    #[error("Error in the `refine` module")]
    Refine(#[from] RefineError),
    #[error("Error in the `pool` module")]
    Pool(#[from] PoolError),
    #[error("{inputs} input image(s) for {outputs} output path(s)")]
    Mismatch { inputs: usize, outputs: usize },
    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{value:?} is not a valid {what}")]
    Option { what: &'static str, value: String },
}
pub type Result<T> = std::result::Result<T, Error>;
