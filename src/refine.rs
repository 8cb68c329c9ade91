//! Astrometric refinement
//!
//! A [Refiner] writes the combined frame into a working directory, runs the
//! source extractor on it, then the astrometric solver on the extracted
//! catalog, and merges the header fragment written by the solver back into the
//! frame. Each call gets its own temporary working directory, removed when the
//! call returns, unless the configuration names a persistent one.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    astromatic::{AstromaticConfig, ConfigError, ValidatedConfig},
    header::{Header, HeaderError},
    image::{Image, ImageError, ImageIo},
    process::{Invocation, ProcessRunner, RunError},
    wcs::{CoordinateSolution, WcsError},
};

/// Name of the frame handed to the source extractor
pub const INPUT_NAME: &str = "sextractorInput.fits";
/// Pattern of the reference catalog written by the solver
pub const REFERENCE_PATTERN: &str = "*.cat";
/// Prefix of the distortion keywords left out of the merge
pub const DISTORTION_PREFIX: &str = "PV";

/// Failure of one external step
#[derive(Debug, thiserror::Error)]
pub enum StepFailure {
    #[error("{program} exited with {code:?}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error(transparent)]
    Run(#[from] RunError),
}
impl StepFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StepFailure::Run(RunError::Timeout { .. }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    #[error("invalid astromatic configuration")]
    ConfigInvalid(#[from] ConfigError),
    #[error("source extraction failed")]
    ExtractionFailed(#[source] StepFailure),
    #[error("astrometric solution failed")]
    SolvingFailed(#[source] StepFailure),
    #[error("failed to read {path:?}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("expected one reference catalog in {dir:?}, found {matches}")]
    ReferenceCatalog { dir: PathBuf, matches: usize },
    #[error("failed to parse the solver header")]
    Header(#[from] HeaderError),
    #[error("no coordinate solution in the refined header")]
    Wcs(#[from] WcsError),
    #[error("failed to prepare the working directory {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}
type Result<T> = std::result::Result<T, RefineError>;

/// Refined frame and the raw outputs of the external tools
#[derive(Debug, Clone)]
pub struct Refined {
    pub image: Image,
    /// Header fragment written by the solver, as is
    pub header: String,
    /// Source extractor catalog
    pub catalog: Vec<u8>,
    /// Reference catalog used by the solver
    pub reference_catalog: Vec<u8>,
}

/// Astrometric refinement runner
#[derive(Clone)]
pub struct Refiner {
    config: AstromaticConfig,
    runner: Arc<dyn ProcessRunner>,
    io: Arc<dyn ImageIo>,
}
impl Refiner {
    pub fn new(
        config: AstromaticConfig,
        runner: Arc<dyn ProcessRunner>,
        io: Arc<dyn ImageIo>,
    ) -> Self {
        Self { config, runner, io }
    }
    /// Same runners with another configuration
    pub fn config(self, config: AstromaticConfig) -> Self {
        Self { config, ..self }
    }
    pub fn io(&self) -> &dyn ImageIo {
        self.io.as_ref()
    }

    /// Refines the coordinate solution of a frame
    ///
    /// Nothing is run if the configuration is not valid.
    pub fn refine(&self, image: Image) -> Result<Refined> {
        let config = self.config.validate()?;
        let temp_dir;
        let working_dir: &Path = match &config.working_dir {
            Some(dir) => dir.as_path(),
            None => {
                temp_dir = tempfile::Builder::new()
                    .prefix("ir-reduce-")
                    .tempdir()
                    .map_err(|source| RefineError::Io {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                temp_dir.path()
            }
        };
        log::info!("refining {} in {:?}", image.origin(), working_dir);
        prepare(&config, working_dir)?;
        let input = working_dir.join(INPUT_NAME);
        self.io.write(&input, &image.primary_only(), true)?;

        let mut args = vec![
            input.to_string_lossy().into_owned(),
            "-c".to_string(),
            config.sex_config.to_string_lossy().into_owned(),
            "-STARNNW_NAME".to_string(),
            config.nnw_file.to_string_lossy().into_owned(),
        ];
        args.extend(config.sextractor_args.iter().cloned());
        self.step(&config.sextractor, args, working_dir, &config)
            .map_err(RefineError::ExtractionFailed)?;

        let mut args = vec![
            config.catalog_name.clone(),
            "-c".to_string(),
            config.scamp_config.to_string_lossy().into_owned(),
        ];
        args.extend(config.scamp_args.iter().cloned());
        self.step(&config.scamp, args, working_dir, &config)
            .map_err(RefineError::SolvingFailed)?;

        let header = read_artifact(&working_dir.join(&config.header_name), |p| {
            fs::read_to_string(p)
        })?;
        let catalog = read_artifact(&working_dir.join(&config.catalog_name), |p| fs::read(p))?;
        let reference_catalog = read_artifact(&reference_catalog(working_dir)?, |p| fs::read(p))?;

        let image = merge(image, &header)?;
        log::info!(
            "{}: refined solution at {:?}",
            image.origin(),
            image.wcs.as_ref().map(|wcs| wcs.crval)
        );
        Ok(Refined {
            image,
            header,
            catalog,
            reference_catalog,
        })
    }

    fn step(
        &self,
        program: &str,
        args: Vec<String>,
        working_dir: &Path,
        config: &ValidatedConfig,
    ) -> std::result::Result<(), StepFailure> {
        let invocation = Invocation {
            program: program.to_string(),
            args,
            cwd: working_dir.to_path_buf(),
            timeout: config.timeout,
        };
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(StepFailure::Exit {
                program: invocation.to_string(),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

/// Copies the extractor parameters and filter into the working directory
fn prepare(config: &ValidatedConfig, working_dir: &Path) -> Result<()> {
    let io_err = |path: PathBuf| move |source: io::Error| RefineError::Io { path, source };
    if let Some(name) = config.param_file.file_name() {
        let to = working_dir.join(name);
        if to != config.param_file {
            fs::copy(&config.param_file, &to).map_err(io_err(to))?;
        }
    }
    let to = working_dir.join(&config.conv_name);
    match &config.conv_file {
        Some(from) if from != &to => {
            fs::copy(from, &to).map_err(io_err(to))?;
        }
        Some(_) => (),
        None => {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&to)
                .map_err(io_err(to))?;
        }
    }
    Ok(())
}

fn read_artifact<T, F>(path: &Path, read: F) -> Result<T>
where
    F: Fn(&Path) -> io::Result<T>,
{
    read(path).map_err(|source| RefineError::Artifact {
        path: path.to_path_buf(),
        source,
    })
}

/// The single file matching [REFERENCE_PATTERN]
fn reference_catalog(working_dir: &Path) -> Result<PathBuf> {
    let pattern = format!(
        "{}/{REFERENCE_PATTERN}",
        glob::Pattern::escape(&working_dir.to_string_lossy())
    );
    let matches: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|p| p.ok()).collect();
    match &matches[..] {
        [path] => Ok(path.clone()),
        _ => Err(RefineError::ReferenceCatalog {
            dir: working_dir.to_path_buf(),
            matches: matches.len(),
        }),
    }
}

/// Merges the solver header, distortion terms left out, and rebuilds the solution
pub fn merge(mut image: Image, header_text: &str) -> Result<Image> {
    let mut fragment = Header::parse(header_text)?;
    fragment.retain(|card| !card.key.starts_with(DISTORTION_PREFIX));
    image.header.merge(&fragment);
    image.wcs = Some(CoordinateSolution::from_header(&image.header)?);
    Ok(image)
}
