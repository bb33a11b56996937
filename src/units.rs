//! CSS-style length parsing and conversion to pixels (96 dpi)

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static LENGTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([A-Za-z]{2})?\s*$")
        .expect("length pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Px,
    Cm,
    Mm,
    In,
    Pt,
    Pc,
}

impl LengthUnit {
    pub fn pixels_per_unit(self) -> f64 {
        match self {
            LengthUnit::Px => 1.0,
            LengthUnit::In => 96.0,
            LengthUnit::Cm => 96.0 / 2.54,
            LengthUnit::Mm => 96.0 / 25.4,
            LengthUnit::Pt => 96.0 / 72.0,
            LengthUnit::Pc => 16.0,
        }
    }
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "px" => Ok(LengthUnit::Px),
            "cm" => Ok(LengthUnit::Cm),
            "mm" => Ok(LengthUnit::Mm),
            "in" => Ok(LengthUnit::In),
            "pt" => Ok(LengthUnit::Pt),
            "pc" => Ok(LengthUnit::Pc),
            other => Err(format!("unknown length unit: {}", other)),
        }
    }
}

/// Split `"72pt"` into `(72.0, Pt)`. A bare number is in pixels.
pub fn parse_length(text: &str) -> Option<(f64, LengthUnit)> {
    let caps = LENGTH_PATTERN.captures(text)?;
    let magnitude: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = match caps.get(2) {
        Some(unit) => unit.as_str().parse().ok()?,
        None => LengthUnit::Px,
    };
    Some((magnitude, unit))
}

/// Rounded pixel value of a length, or `None` when it is not a usable dimension
pub fn to_pixels(text: &str) -> Option<u32> {
    let (magnitude, unit) = parse_length(text)?;
    let pixels = (magnitude * unit.pixels_per_unit()).round();
    if !pixels.is_finite() || pixels < 0.0 || pixels > u32::MAX as f64 {
        return None;
    }
    Some(pixels as u32)
}
