//! Source extractor and astrometric solver configuration
//!
//! [AstromaticConfig] gathers the configuration files and the command line
//! overrides of the two external tools. It is built with consuming setters and
//! must be [validated](AstromaticConfig::validate) before any run: the extractor
//! settings must write a `FITS_LDAC` catalog under the name the refiner reads
//! back, with the expected header suffix.
//!
//! The default configuration files are looked up in the directory given by the
//! `IR_REDUCE_CONFIG_DIR` environment variable, or the current directory.

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;

/// Environment variable with the directory of the default configuration files
pub const CONFIG_DIR_VAR: &str = "IR_REDUCE_CONFIG_DIR";
/// Catalog type consumed by the solver
pub const CATALOG_TYPE: &str = "FITS_LDAC";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path:?}: CATALOG_NAME is {found:?}, expected {expected:?}")]
    CatalogName {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("{path:?}: CATALOG_TYPE is {found:?}, expected \"FITS_LDAC\"")]
    CatalogType { path: PathBuf, found: String },
    #[error("{path:?}: HEADER_SUFFIX is {found:?}, expected {expected:?}")]
    HeaderSuffix {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("{path:?} does not set {key}")]
    MissingKey { key: &'static str, path: PathBuf },
    #[error("{what} {path:?} not found")]
    MissingFile {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("override {0:?} is not of the form KEY=VALUE")]
    Override(String),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}
type Result<T> = std::result::Result<T, ConfigError>;

/// Parses `KEY VALUE` configuration text
///
/// Anything after `#` is ignored, as are blank lines. Lines that do not split
/// into exactly two tokens are skipped with a warning.
pub fn parse_key_val_config(text: &str) -> Result<BTreeMap<String, String>> {
    let comment = Regex::new(r"#.*")?;
    let spaces = Regex::new(r"\s+")?;
    let mut entries = BTreeMap::new();
    for line in text.lines() {
        let line = comment.replace(line, "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match spaces.split(line).collect::<Vec<_>>()[..] {
            [key, value] => {
                entries.insert(key.to_string(), value.to_string());
            }
            _ => log::warn!("Got ambiguous line: {line:?}"),
        }
    }
    Ok(entries)
}

/// Expands `KEY=VALUE` overrides into `-KEY VALUE` arguments, skipping empty entries
pub fn split_overrides<S: AsRef<str>>(overrides: &[S]) -> Result<Vec<String>> {
    let mut args = vec![];
    for entry in overrides.iter().map(AsRef::as_ref).filter(|e| !e.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.push(format!("-{key}"));
                args.push(value.to_string());
            }
            _ => return Err(ConfigError::Override(entry.to_string())),
        }
    }
    Ok(args)
}

/// External tools configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AstromaticConfig {
    sextractor: String,
    scamp: String,
    param_file: PathBuf,
    sex_config: PathBuf,
    nnw_file: PathBuf,
    conv_file: PathBuf,
    scamp_config: PathBuf,
    working_dir: Option<PathBuf>,
    catalog_name: String,
    header_suffix: String,
    sextractor_overrides: Vec<String>,
    scamp_overrides: Vec<String>,
    timeout: Duration,
}
impl Default for AstromaticConfig {
    fn default() -> Self {
        let dir = env::var(CONFIG_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::in_dir(dir)
    }
}
impl AstromaticConfig {
    /// Default configuration with the files `default.param`, `sex.config`,
    /// `default.nnw`, `default.conv` and `scamp.config` in `dir`
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            sextractor: "sex".to_string(),
            scamp: "scamp".to_string(),
            param_file: dir.join("default.param"),
            sex_config: dir.join("sex.config"),
            nnw_file: dir.join("default.nnw"),
            conv_file: dir.join("default.conv"),
            scamp_config: dir.join("scamp.config"),
            working_dir: None,
            catalog_name: "sexout.fits".to_string(),
            header_suffix: ".head".to_string(),
            sextractor_overrides: vec![],
            scamp_overrides: vec![],
            timeout: Duration::from_secs(30),
        }
    }
    /// Source extractor executable
    pub fn sextractor<S: Into<String>>(self, program: S) -> Self {
        Self {
            sextractor: program.into(),
            ..self
        }
    }
    /// Astrometric solver executable
    pub fn scamp<S: Into<String>>(self, program: S) -> Self {
        Self {
            scamp: program.into(),
            ..self
        }
    }
    pub fn param_file<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            param_file: path.into(),
            ..self
        }
    }
    pub fn sex_config<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            sex_config: path.into(),
            ..self
        }
    }
    pub fn nnw_file<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            nnw_file: path.into(),
            ..self
        }
    }
    /// Convolution filter, an empty one is used if the file does not exist
    pub fn conv_file<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            conv_file: path.into(),
            ..self
        }
    }
    pub fn scamp_config<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            scamp_config: path.into(),
            ..self
        }
    }
    /// Persistent working directory, a temporary one is used otherwise
    pub fn working_dir<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            working_dir: Some(path.into()),
            ..self
        }
    }
    /// Catalog file name the extractor settings must declare
    pub fn catalog_name<S: Into<String>>(self, name: S) -> Self {
        Self {
            catalog_name: name.into(),
            ..self
        }
    }
    pub fn header_suffix<S: Into<String>>(self, suffix: S) -> Self {
        Self {
            header_suffix: suffix.into(),
            ..self
        }
    }
    pub fn sextractor_overrides<I, S>(self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sextractor_overrides: overrides.into_iter().map(Into::into).collect(),
            ..self
        }
    }
    pub fn scamp_overrides<I, S>(self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scamp_overrides: overrides.into_iter().map(Into::into).collect(),
            ..self
        }
    }
    /// Time limit of each external run
    pub fn timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Checks the configuration, resolving every file to an absolute path
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let sex_config = existing("source extractor settings", &self.sex_config)?;
        let text = fs::read_to_string(&sex_config).map_err(|source| ConfigError::MissingFile {
            what: "source extractor settings",
            path: sex_config.clone(),
            source,
        })?;
        let settings = parse_key_val_config(&text)?;
        let get = |key: &'static str| {
            settings
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingKey {
                    key,
                    path: sex_config.clone(),
                })
        };
        let found = get("CATALOG_NAME")?;
        if found != self.catalog_name {
            return Err(ConfigError::CatalogName {
                path: sex_config,
                expected: self.catalog_name.clone(),
                found,
            });
        }
        let found = get("CATALOG_TYPE")?;
        if found != CATALOG_TYPE {
            return Err(ConfigError::CatalogType {
                path: sex_config,
                found,
            });
        }
        let found = get("HEADER_SUFFIX")?;
        if found != self.header_suffix {
            return Err(ConfigError::HeaderSuffix {
                path: sex_config,
                expected: self.header_suffix.clone(),
                found,
            });
        }
        let conv_file = match fs::canonicalize(&self.conv_file) {
            Ok(path) => Some(path),
            Err(_) => {
                log::debug!(
                    "{:?} not found, an empty filter will be used",
                    self.conv_file
                );
                None
            }
        };
        let conv_name = self
            .conv_file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("default.conv"));
        Ok(ValidatedConfig {
            sextractor: self.sextractor.clone(),
            scamp: self.scamp.clone(),
            param_file: existing("source extractor parameters", &self.param_file)?,
            nnw_file: existing("neural network weights", &self.nnw_file)?,
            conv_file,
            conv_name,
            scamp_config: existing("solver settings", &self.scamp_config)?,
            working_dir: self
                .working_dir
                .as_ref()
                .map(|dir| existing("working directory", dir))
                .transpose()?,
            header_name: header_name(&self.catalog_name, &self.header_suffix),
            catalog_name: self.catalog_name.clone(),
            sextractor_args: split_overrides(&self.sextractor_overrides)?,
            scamp_args: split_overrides(&self.scamp_overrides)?,
            timeout: self.timeout,
            sex_config,
            settings,
        })
    }
}

fn existing(what: &'static str, path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|source| ConfigError::MissingFile {
        what,
        path: path.to_path_buf(),
        source,
    })
}

/// `sexout.fits` with `.head` gives `sexout.head`
fn header_name(catalog: &str, suffix: &str) -> String {
    let stem = Path::new(catalog)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(catalog);
    format!("{stem}{suffix}")
}

/// Configuration that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub sextractor: String,
    pub scamp: String,
    pub param_file: PathBuf,
    pub sex_config: PathBuf,
    pub nnw_file: PathBuf,
    /// `None` if the filter file does not exist
    pub conv_file: Option<PathBuf>,
    /// File name of the filter in the working directory
    pub conv_name: PathBuf,
    pub scamp_config: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub catalog_name: String,
    /// Header fragment written by the solver next to the catalog
    pub header_name: String,
    /// Expanded extractor overrides
    pub sextractor_args: Vec<String>,
    /// Expanded solver overrides
    pub scamp_args: Vec<String>,
    pub timeout: Duration,
    /// Parsed extractor settings
    pub settings: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SEX_CONFIG: &str = "# extractor settings
CATALOG_NAME     sexout.fits    # catalog written by the extractor
CATALOG_TYPE     FITS_LDAC
HEADER_SUFFIX    .head

PARAMETERS_NAME  default.param
DETECT_THRESH    1.5
";

    fn config_dir(sex_config: &str) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sex.config"), sex_config).unwrap();
        for file in ["default.param", "default.nnw", "scamp.config"] {
            fs::write(dir.path().join(file), "").unwrap();
        }
        dir
    }

    #[test]
    fn parse_config_text() {
        let cfg = parse_key_val_config(SEX_CONFIG).unwrap();
        assert_eq!(cfg["CATALOG_NAME"], "sexout.fits");
        assert_eq!(cfg["DETECT_THRESH"], "1.5");
        assert_eq!(cfg.len(), 5);
        let cfg = parse_key_val_config("A 1 2\nB\t2\n   # C 3\n").unwrap();
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg["B"], "2");
    }

    #[test]
    fn overrides_expand_to_flags() {
        assert_eq!(
            split_overrides(&["A=B", "", "C=D"]).unwrap(),
            vec!["-A", "B", "-C", "D"]
        );
        assert!(split_overrides::<&str>(&[]).unwrap().is_empty());
        assert!(matches!(
            split_overrides(&["DETECT_THRESH"]),
            Err(ConfigError::Override(_))
        ));
    }

    #[test]
    fn valid_config() {
        let dir = config_dir(SEX_CONFIG);
        let config = AstromaticConfig::in_dir(dir.path())
            .sextractor_overrides(["DETECT_THRESH=3"])
            .validate()
            .unwrap();
        assert!(config.param_file.is_absolute());
        assert_eq!(config.conv_file, None);
        assert_eq!(config.conv_name, PathBuf::from("default.conv"));
        assert_eq!(config.header_name, "sexout.head");
        assert_eq!(config.sextractor_args, vec!["-DETECT_THRESH", "3"]);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn each_catalog_setting_is_checked() {
        let cases = [
            ("sexout.fits", "other.fits"),
            ("FITS_LDAC", "ASCII_HEAD"),
            (".head", ".ahead"),
        ];
        for (i, (from, to)) in cases.into_iter().enumerate() {
            let dir = config_dir(&SEX_CONFIG.replace(from, to));
            let err = AstromaticConfig::in_dir(dir.path()).validate().unwrap_err();
            match i {
                0 => assert!(matches!(err, ConfigError::CatalogName { .. })),
                1 => assert!(matches!(err, ConfigError::CatalogType { .. })),
                _ => assert!(matches!(err, ConfigError::HeaderSuffix { .. })),
            }
        }
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = config_dir(SEX_CONFIG);
        fs::remove_file(dir.path().join("default.nnw")).unwrap();
        let err = AstromaticConfig::in_dir(dir.path()).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingFile {
                what: "neural network weights",
                ..
            }
        ));
        let err = AstromaticConfig::in_dir(dir.path().join("nowhere"))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
        let dir = config_dir("CATALOG_NAME sexout.fits\n");
        assert!(matches!(
            AstromaticConfig::in_dir(dir.path()).validate(),
            Err(ConfigError::MissingKey {
                key: "CATALOG_TYPE",
                ..
            })
        ));
    }
}
