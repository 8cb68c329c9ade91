#![allow(dead_code)]

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use ir_reduce::{
    image::ImageError,
    process::{Invocation, ProcessOutput, ProcessRunner, RunError},
    Grid, Header, Image, ImageIo, Mask,
};
use tempfile::TempDir;

pub const SHAPE: (usize, usize) = (24, 24);

pub const SCAMP_HEAD: &str = "EQUINOX =        2000.00000000 / Mean equinox
RADESYS = 'ICRS    '           / Astrometric system
CTYPE1  = 'RA---TAN'           / WCS projection type for this axis
CTYPE2  = 'DEC--TAN'           / WCS projection type for this axis
CRVAL1  =        321.451023590 / World coordinate on this axis
CRVAL2  =         12.301542031 / World coordinate on this axis
CRPIX1  =        512.000000000 / Reference pixel on this axis
CRPIX2  =        512.000000000 / Reference pixel on this axis
CD1_1   =  -6.276633571112E-05 / Linear projection matrix
CD1_2   =   1.390127000000E-07 / Linear projection matrix
CD2_1   =   1.204329900000E-07 / Linear projection matrix
CD2_2   =   6.278382110000E-05 / Linear projection matrix
PV1_0   =                    0 / Projection distortion parameter
PV1_1   =                    1 / Projection distortion parameter
PV2_0   =                    0 / Projection distortion parameter
PV2_1   =                    1 / Projection distortion parameter
HISTORY   Astrometric solution by SCAMP
END";

/// Images kept in memory, the paths exist on disk as empty files
#[derive(Default)]
pub struct MemoryIo {
    images: Mutex<HashMap<PathBuf, Image>>,
}
impl MemoryIo {
    pub fn insert(&self, dir: &Path, name: &str, image: Image) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        self.images.lock().unwrap().insert(path.clone(), image);
        path
    }
    pub fn get(&self, path: &Path) -> Option<Image> {
        self.images.lock().unwrap().get(path).cloned()
    }
}
impl ImageIo for MemoryIo {
    fn read(&self, path: &Path) -> Result<Image, ImageError> {
        self.get(path).ok_or_else(|| ImageError::Read {
            path: path.to_path_buf(),
            source: "not in memory".into(),
        })
    }
    fn write(&self, path: &Path, image: &Image, _overwrite: bool) -> Result<(), ImageError> {
        self.images
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), image.clone());
        Ok(())
    }
}

/// Succeeds with fixed artifacts
#[derive(Default)]
pub struct StubRunner {
    pub calls: Mutex<Vec<Invocation>>,
}
impl ProcessRunner for StubRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let dir = &invocation.cwd;
        match invocation.program.as_str() {
            "sex" => fs::write(dir.join("sexout.fits"), b"LDAC catalog").unwrap(),
            _ => {
                fs::write(dir.join("sexout.head"), SCAMP_HEAD).unwrap();
                fs::write(dir.join("gaia.cat"), b"reference catalog").unwrap();
            }
        }
        Ok(ProcessOutput {
            code: Some(0),
            stdout: format!("{} done", invocation.program),
            stderr: String::new(),
        })
    }
}

/// Directory with a valid set of astromatic configuration files
pub fn config_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("sex.config"),
        "CATALOG_NAME     sexout.fits\nCATALOG_TYPE     FITS_LDAC\nHEADER_SUFFIX    .head\n",
    )
    .unwrap();
    for file in ["default.param", "default.nnw", "scamp.config"] {
        fs::write(dir.path().join(file), "").unwrap();
    }
    dir
}

fn notcam(cards: &[(&str, &str)]) -> Header {
    let mut header = Header::new();
    header.set("INSTRUME", "NOTCAM");
    cards.iter().for_each(|(k, v)| header.set(*k, *v));
    header
}

pub fn bad_pixel_map(defects: &[(usize, usize)]) -> Image {
    let mut data = Grid::filled(SHAPE.0, SHAPE.1, 0f64);
    defects.iter().for_each(|p| data[*p] = 1.0);
    Image::new(
        data,
        notcam(&[("IMAGECAT", "CALIB"), ("IMAGETYP", "BAD_PIXEL")]),
    )
}

pub fn flat(band: &str) -> Image {
    let data = Grid::from_fn(SHAPE.0, SHAPE.1, |r, _| if r % 2 == 0 { 0.9 } else { 1.1 });
    Image::new(
        data,
        notcam(&[
            ("IMAGECAT", "CALIB"),
            ("IMAGETYP", "DOME_FLAT"),
            ("NCFLTNM2", band),
        ]),
    )
}

pub fn science(band: &str, sky: f64) -> Image {
    let data = Grid::from_fn(SHAPE.0, SHAPE.1, |r, c| {
        let v = sky + ((r * 7 + c * 3) % 5) as f64;
        if r % 2 == 0 {
            0.9 * v
        } else {
            1.1 * v
        }
    });
    let mut header = notcam(&[
        ("IMAGECAT", "SCIENCE"),
        ("IMAGETYP", "OBJECT"),
        ("NCFLTNM2", band),
        ("OBJECT", "M 82"),
    ]);
    for quadrant in 1..=4 {
        header.set(format!("GAIN{quadrant}"), 1.0);
        header.set(format!("RDNOISE{quadrant}"), 6.0);
    }
    Image::new(data, header)
}

pub fn union(masks: &[Mask]) -> Mask {
    Mask::from_fn(SHAPE.0, SHAPE.1, |r, c| masks.iter().any(|m| m[(r, c)]))
}
