//! Infrared and optical image reduction
//!
//! Frames from the NOTCam and ALFOSC cameras are sorted by band, calibrated
//! with the bad pixel maps and flat fields of the band, matched in sky level,
//! cleaned of their bad pixels and combined. The combined frame coordinate
//! solution is then refined with the SExtractor and SCAMP programs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ir_reduce::{
//!     reduce_and_refine, AstromaticConfig, CandidatePaths, ImageIo, ReduceOptions, Refiner,
//!     SystemRunner, ThreadPool,
//! };
//!
//! # fn run(io: Arc<dyn ImageIo>) -> ir_reduce::Result<()> {
//! let paths = CandidatePaths::new(["bad.fits"], ["flat.fits"], ["sci1.fits", "sci2.fits"]);
//! let refiner = Refiner::new(AstromaticConfig::default(), Arc::new(SystemRunner), io);
//! let pool = ThreadPool::new()?;
//! let refined = reduce_and_refine(&paths, &ReduceOptions::default(), &refiner, &pool)?;
//! ir_reduce::write_output("reduced.fits".as_ref(), &refined, refiner.io())?;
//! # Ok(())
//! # }
//! ```

pub mod astromatic;
pub mod calibrate;
pub mod classify;
pub mod combine;
mod error;
pub mod group;
pub mod header;
pub mod image;
pub mod pipeline;
pub mod pool;
pub mod process;
pub mod refine;
pub mod stats;
pub mod wcs;

pub use astromatic::{AstromaticConfig, ValidatedConfig};
pub use calibrate::{Connectivity, PartialPolicy, SkyMethod, SkyRegion};
pub use classify::{classify, Band, Category, Instrument};
pub use combine::CombineMethod;
pub use error::{Error, Result};
pub use group::{read_and_group, CandidatePaths, ImageGroup};
pub use header::Header;
pub use image::{Grid, Image, ImageIo, Mask};
pub use pipeline::{
    reduce_and_refine, reduce_group, reduce_image, refine_only, write_output, ReduceOptions,
};
pub use pool::{DummyPool, ThreadPool, WorkerPool};
pub use process::{ProcessRunner, SystemRunner};
pub use refine::{Refined, Refiner};
pub use wcs::CoordinateSolution;
