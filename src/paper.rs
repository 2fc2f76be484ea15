//! Paper specification and its conversion to pixel dimensions
//!
//! Sizes are expressed at 96 DPI, the resolution the browser uses for CSS
//! pixels when printing.

use crate::ExportError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Pixels per inch when printing.
pub const DPI: f64 = 96.0;

/// Pattern accepted for explicit paper dimensions, e.g. `21cm` or `8.5in`.
pub const PAPER_DIMENSION_PATTERN: &str = r"^(\d+(\.\d+)?)(cm|mm|in|px)$";

/// Predefined paper formats, with the browser's print preset sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperFormat {
    Letter,
    Legal,
    Tabloid,
    Ledger,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
}

impl PaperFormat {
    pub const ALL: [PaperFormat; 11] = [
        PaperFormat::Letter,
        PaperFormat::Legal,
        PaperFormat::Tabloid,
        PaperFormat::Ledger,
        PaperFormat::A0,
        PaperFormat::A1,
        PaperFormat::A2,
        PaperFormat::A3,
        PaperFormat::A4,
        PaperFormat::A5,
        PaperFormat::A6,
    ];

    /// Portrait `(width, height)` in inches.
    pub fn size_in_inches(self) -> (f64, f64) {
        match self {
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Legal => (8.5, 14.0),
            PaperFormat::Tabloid => (11.0, 17.0),
            PaperFormat::Ledger => (17.0, 11.0),
            PaperFormat::A0 => (33.1, 46.8),
            PaperFormat::A1 => (23.4, 33.1),
            PaperFormat::A2 => (16.5, 23.4),
            PaperFormat::A3 => (11.7, 16.5),
            PaperFormat::A4 => (8.27, 11.7),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::A6 => (4.13, 5.83),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PaperFormat::Letter => "letter",
            PaperFormat::Legal => "legal",
            PaperFormat::Tabloid => "tabloid",
            PaperFormat::Ledger => "ledger",
            PaperFormat::A0 => "a0",
            PaperFormat::A1 => "a1",
            PaperFormat::A2 => "a2",
            PaperFormat::A3 => "a3",
            PaperFormat::A4 => "a4",
            PaperFormat::A5 => "a5",
            PaperFormat::A6 => "a6",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name().eq_ignore_ascii_case(name))
    }
}

/// Units accepted in dimension strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionUnit {
    Centimeter,
    Millimeter,
    Inch,
    Pixel,
}

impl DimensionUnit {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "cm" => Some(DimensionUnit::Centimeter),
            "mm" => Some(DimensionUnit::Millimeter),
            "in" => Some(DimensionUnit::Inch),
            "px" => Some(DimensionUnit::Pixel),
            _ => None,
        }
    }

    pub fn pixels_per_unit(self) -> f64 {
        match self {
            DimensionUnit::Centimeter => 37.8,
            DimensionUnit::Millimeter => 3.78,
            DimensionUnit::Inch => DPI,
            DimensionUnit::Pixel => 1.0,
        }
    }
}

/// Paper description from an export payload.
///
/// Either `format` (optionally `landscape`) or both `width` and `height`.
/// When both shapes are present the format wins.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<PaperFormat>,
    #[serde(default)]
    pub landscape: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

impl PaperSpec {
    pub fn format(format: PaperFormat) -> Self {
        Self {
            format: Some(format),
            ..Default::default()
        }
    }

    pub fn landscape(format: PaperFormat) -> Self {
        Self {
            format: Some(format),
            landscape: true,
            ..Default::default()
        }
    }

    pub fn size(width: impl Into<String>, height: impl Into<String>) -> Self {
        Self {
            width: Some(width.into()),
            height: Some(height.into()),
            ..Default::default()
        }
    }
}

/// Page size in whole CSS pixels. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn width_in_inches(&self) -> f64 {
        f64::from(self.width) / DPI
    }

    pub fn height_in_inches(&self) -> f64 {
        f64::from(self.height) / DPI
    }
}

static DIMENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(PAPER_DIMENSION_PATTERN).expect("BUG: invalid PAPER_DIMENSION_PATTERN literal")
});

/// Split a dimension string into its number and unit.
pub fn parse_dimension(value: &str) -> Result<(f64, DimensionUnit), ExportError> {
    let invalid = || {
        ExportError::InvalidDimension(format!(
            "{value:?} does not match the pattern {PAPER_DIMENSION_PATTERN}"
        ))
    };

    let captures = DIMENSION_RE.captures(value).ok_or_else(invalid)?;
    let number = captures
        .get(1)
        .and_then(|number| number.as_str().parse::<f64>().ok())
        .ok_or_else(invalid)?;
    let unit = captures
        .get(3)
        .and_then(|unit| DimensionUnit::from_suffix(unit.as_str()))
        .ok_or_else(invalid)?;

    Ok((number, unit))
}

pub fn to_pixels(value: &str) -> Result<f64, ExportError> {
    let (number, unit) = parse_dimension(value)?;
    Ok(number * unit.pixels_per_unit())
}

fn format_to_pixels(format: PaperFormat, landscape: bool) -> (f64, f64) {
    let (width, height) = format.size_in_inches();
    if landscape {
        (height * DPI, width * DPI)
    } else {
        (width * DPI, height * DPI)
    }
}

fn round_positive(value: f64, what: &str) -> Result<u32, ExportError> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < 1.0 || rounded > f64::from(u32::MAX) {
        return Err(ExportError::InvalidDimension(format!(
            "{what} of {value}px does not round to a positive pixel count"
        )));
    }
    Ok(rounded as u32)
}

/// Resolve a paper specification into rounded pixel dimensions.
///
/// Priority: a `format` (swapped when `landscape`), then an explicit
/// `width`/`height` pair, then unlandscaped letter.
pub fn resolve_dimensions(paper: Option<&PaperSpec>) -> Result<Dimensions, ExportError> {
    let (width, height) = match paper {
        Some(PaperSpec {
            format: Some(format),
            landscape,
            ..
        }) => format_to_pixels(*format, *landscape),
        Some(PaperSpec {
            width: Some(width),
            height: Some(height),
            ..
        }) => (to_pixels(width)?, to_pixels(height)?),
        _ => format_to_pixels(PaperFormat::Letter, false),
    };

    Ok(Dimensions {
        width: round_positive(width, "width")?,
        height: round_positive(height, "height")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(paper: PaperSpec) -> Dimensions {
        resolve_dimensions(Some(&paper)).unwrap()
    }

    #[test]
    fn test_format_portrait_and_landscape() {
        assert_eq!(
            resolve(PaperSpec::format(PaperFormat::A4)),
            Dimensions { width: 794, height: 1123 }
        );
        assert_eq!(
            resolve(PaperSpec::landscape(PaperFormat::A4)),
            Dimensions { width: 1123, height: 794 }
        );
    }

    #[test]
    fn test_format_takes_priority_over_size() {
        let paper = PaperSpec {
            format: Some(PaperFormat::A4),
            width: Some("1px".to_string()),
            height: Some("1px".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve(paper), Dimensions { width: 794, height: 1123 });
    }

    #[test]
    fn test_landscape_ignored_for_explicit_size() {
        let paper = PaperSpec {
            landscape: true,
            ..PaperSpec::size("2px", "1px")
        };
        assert_eq!(resolve(paper), Dimensions { width: 2, height: 1 });
    }

    #[test]
    fn test_units() {
        assert_eq!(resolve(PaperSpec::size("2cm", "1cm")), Dimensions { width: 76, height: 38 });
        assert_eq!(resolve(PaperSpec::size("2in", "1in")), Dimensions { width: 192, height: 96 });
        assert_eq!(resolve(PaperSpec::size("20mm", "10mm")), Dimensions { width: 76, height: 38 });
        assert_eq!(
            resolve(PaperSpec::size("1920px", "1080px")),
            Dimensions { width: 1920, height: 1080 }
        );
        assert_eq!(resolve(PaperSpec::size("8.5in", "11in")), Dimensions { width: 816, height: 1056 });
    }

    #[test]
    fn test_defaults_to_letter() {
        let letter = Dimensions { width: 816, height: 1056 };
        assert_eq!(resolve_dimensions(None).unwrap(), letter);
        assert_eq!(resolve(PaperSpec::default()), letter);
        // Only one side given: falls back as well.
        let paper = PaperSpec {
            width: Some("2cm".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve(paper), letter);
    }

    #[test]
    fn test_malformed_dimension() {
        for value in ["1xyz", "cm", "1.cm", ".5cm", "-1cm", "1 cm", "1e3px", ""] {
            let result = resolve_dimensions(Some(&PaperSpec::size(value, "1cm")));
            assert!(
                matches!(result, Err(ExportError::InvalidDimension(_))),
                "{value:?} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn test_parse_dimension_reads_number_and_unit() {
        assert_eq!(parse_dimension("21cm").unwrap(), (21.0, DimensionUnit::Centimeter));
        assert_eq!(parse_dimension("8.5in").unwrap(), (8.5, DimensionUnit::Inch));
        assert_eq!(parse_dimension("210mm").unwrap(), (210.0, DimensionUnit::Millimeter));
        assert_eq!(parse_dimension("0.5px").unwrap(), (0.5, DimensionUnit::Pixel));
        assert!(parse_dimension("21cmm").is_err());
        assert!(parse_dimension("21pt").is_err());
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = resolve_dimensions(Some(&PaperSpec::size("0px", "10px")));
        assert!(matches!(result, Err(ExportError::InvalidDimension(_))));
    }

    #[test]
    fn test_format_names() {
        assert_eq!(PaperFormat::from_name("A4"), Some(PaperFormat::A4));
        assert_eq!(PaperFormat::from_name("ledger"), Some(PaperFormat::Ledger));
        assert_eq!(PaperFormat::from_name("unexisting"), None);
        let parsed: PaperFormat = serde_json::from_str("\"tabloid\"").unwrap();
        assert_eq!(parsed, PaperFormat::Tabloid);
    }

    #[test]
    fn test_inches_for_print() {
        let dimensions = Dimensions { width: 192, height: 96 };
        assert_eq!(dimensions.width_in_inches(), 2.0);
        assert_eq!(dimensions.height_in_inches(), 1.0);
    }
}
