//! Frame classification
//!
//! The instrument is read from the `INSTRUME` keyword and selects the rules used
//! to derive the frame [Category] and the photometric [Band].

use std::fmt;

use strum::IntoEnumIterator;
use strum_macros::{EnumIter, EnumString};

use crate::header::Header;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("keyword {key} is missing, cannot determine the {instrument} band")]
    MissingKey {
        key: &'static str,
        instrument: Instrument,
    },
    #[error("filter {filter:?} is not a {instrument} band")]
    UnknownFilter {
        filter: String,
        instrument: Instrument,
    },
    #[error("ambiguous optical path, expected exactly one filter in the beam, found {found:?}")]
    AmbiguousFilter { found: Vec<String> },
    #[error("instrument cannot be determined")]
    UnknownInstrument,
}
type Result<T> = std::result::Result<T, ClassifyError>;

const INSTRUMENT_KEY: &str = "INSTRUME";
const IMAGE_CATEGORY: &str = "IMAGECAT";
const IMAGE_TYPE: &str = "IMAGETYP";

/// Camera that recorded a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instrument {
    NotCam,
    Alfosc,
    Unknown,
}
impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::NotCam => write!(f, "NOTCAM"),
            Instrument::Alfosc => write!(f, "ALFOSC"),
            Instrument::Unknown => write!(f, "unknown instrument"),
        }
    }
}

/// Frame category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Science,
    BadPixel,
    Flat,
    Bias,
    Technical,
    Unknown,
}

/// Photometric band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumString)]
pub enum Band {
    // NOTCAM
    H,
    J,
    Ks,
    // ALFOSC
    #[strum(serialize = "ubes")]
    UBes,
    #[strum(serialize = "bbes")]
    BBes,
    #[strum(serialize = "iint")]
    IInt,
    #[strum(serialize = "rbes")]
    RBes,
    #[strum(serialize = "vbes")]
    VBes,
    #[strum(serialize = "gsdss")]
    GSdss,
    #[strum(serialize = "isdss")]
    ISdss,
    #[strum(serialize = "rsdss")]
    RSdss,
    #[strum(serialize = "zsdss")]
    ZSdss,
    #[strum(serialize = "usdss")]
    USdss,
    #[strum(serialize = "grism")]
    Grism4,
}
impl Band {
    /// Filter name as written in the header
    pub fn filter_name(&self) -> &'static str {
        use Band::*;
        match self {
            H => "H",
            J => "J",
            Ks => "Ks",
            UBes => "U_Bes 362_60",
            BBes => "B_Bes 440_100",
            IInt => "i_int 797_157",
            RBes => "R_Bes 650_130",
            VBes => "V_Bes 530_80",
            GSdss => "g'_SDSS 480_145",
            ISdss => "i'_SDSS 771_171",
            RSdss => "r'_SDSS  618_148",
            ZSdss => "z'_SDSS  832_LP",
            USdss => "u'_SDSS  353_55",
            Grism4 => "Grism_#4",
        }
    }
    /// Reverse lookup from a header filter name
    pub fn lookup(filter_name: &str) -> Option<Self> {
        Band::iter().find(|band| band.filter_name() == filter_name)
    }
    pub fn instrument(&self) -> Instrument {
        use Band::*;
        match self {
            H | J | Ks => Instrument::NotCam,
            _ => Instrument::Alfosc,
        }
    }
    /// Bands of a given instrument
    pub fn of(instrument: Instrument) -> impl Iterator<Item = Band> {
        Band::iter().filter(move |band| band.instrument() == instrument)
    }
}
impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.filter_name())
    }
}

/// Instrument of a frame, [Instrument::Unknown] when `INSTRUME` is absent or not recognized
pub fn detect_instrument(header: &Header) -> Instrument {
    match header.get_str(INSTRUMENT_KEY) {
        Some("NOTCAM") => Instrument::NotCam,
        Some("ALFOSC_FASU") => Instrument::Alfosc,
        _ => Instrument::Unknown,
    }
}

/// Instrument specific classification rules
pub trait InstrumentClassifier: Sync {
    fn category(&self, header: &Header) -> Category;
    fn band(&self, header: &Header) -> Result<Band>;
}

/// Near-infrared camera: one filter keyword holding the band name
pub struct NotCam;
impl NotCam {
    const FILTER: &'static str = "NCFLTNM2";
}
impl InstrumentClassifier for NotCam {
    fn category(&self, header: &Header) -> Category {
        let (Some(cat), Some(img_type)) =
            (header.get_str(IMAGE_CATEGORY), header.get_str(IMAGE_TYPE))
        else {
            log::warn!("could not determine image category");
            return Category::Unknown;
        };
        if img_type == "BAD_PIXEL" {
            Category::BadPixel
        } else if cat == "SCIENCE" {
            Category::Science
        } else if cat == "CALIB" && img_type.contains("FLAT") {
            Category::Flat
        } else {
            log::warn!("could not determine image category ({cat}, {img_type})");
            Category::Unknown
        }
    }
    fn band(&self, header: &Header) -> Result<Band> {
        let filter = header
            .get_str(Self::FILTER)
            .ok_or(ClassifyError::MissingKey {
                key: Self::FILTER,
                instrument: Instrument::NotCam,
            })?;
        Band::of(Instrument::NotCam)
            .find(|band| band.filter_name() == filter)
            .ok_or_else(|| ClassifyError::UnknownFilter {
                filter: filter.to_string(),
                instrument: Instrument::NotCam,
            })
    }
}

/// Optical spectrograph/imager: filter wheels plus a grism wheel,
/// exactly one of them is expected in the beam
pub struct Alfosc;
impl Alfosc {
    const SLOTS: [&'static str; 3] = ["ALFLTNM", "FAFLTNM", "ALGRNM"];
    const OPEN: &'static str = "Open";
}
impl InstrumentClassifier for Alfosc {
    fn category(&self, header: &Header) -> Category {
        let (Some(cat), Some(img_type)) =
            (header.get_str(IMAGE_CATEGORY), header.get_str(IMAGE_TYPE))
        else {
            log::warn!("could not determine image category");
            return Category::Unknown;
        };
        if img_type == "BAD_PIXEL" {
            Category::BadPixel
        } else if cat.trim().is_empty() && header.get_str("OBS_TYPE") == Some("IMAGING") {
            Category::Science
        } else if cat == "CALIB" && img_type.contains("FLAT") {
            Category::Flat
        } else if cat == "CALIB" && img_type.contains("BIAS") {
            Category::Bias
        } else if cat == "TECHNICAL" {
            Category::Technical
        } else {
            log::warn!("could not determine image category ({cat}, {img_type})");
            Category::Unknown
        }
    }
    fn band(&self, header: &Header) -> Result<Band> {
        let slots = Self::SLOTS
            .iter()
            .map(|&key| {
                header.get_str(key).ok_or(ClassifyError::MissingKey {
                    key,
                    instrument: Instrument::Alfosc,
                })
            })
            .collect::<Result<Vec<&str>>>()?;
        let in_beam: Vec<&str> = slots
            .iter()
            .copied()
            .filter(|name| !name.contains(Self::OPEN))
            .collect();
        let [filter] = in_beam.as_slice() else {
            return Err(ClassifyError::AmbiguousFilter {
                found: slots.iter().map(|s| s.to_string()).collect(),
            });
        };
        Band::lookup(filter)
            .filter(|band| band.instrument() == Instrument::Alfosc)
            .ok_or_else(|| ClassifyError::UnknownFilter {
                filter: filter.to_string(),
                instrument: Instrument::Alfosc,
            })
    }
}

/// Classification rules of an instrument
pub fn classifier(instrument: Instrument) -> Option<&'static dyn InstrumentClassifier> {
    match instrument {
        Instrument::NotCam => Some(&NotCam),
        Instrument::Alfosc => Some(&Alfosc),
        Instrument::Unknown => None,
    }
}

/// Instrument, category and band of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub instrument: Instrument,
    pub category: Category,
    pub band: Band,
}

/// Classifies a frame
///
/// Fails with [ClassifyError::UnknownInstrument] when no rules apply.
pub fn classify(header: &Header) -> Result<Classification> {
    let instrument = detect_instrument(header);
    let rules = classifier(instrument).ok_or(ClassifyError::UnknownInstrument)?;
    Ok(Classification {
        instrument,
        category: rules.category(header),
        band: rules.band(header)?,
    })
}
