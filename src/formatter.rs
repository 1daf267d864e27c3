//! Numeric formatting under the `##(.n){BB,MM,KK,%,bps,∅}` grammar.
//!
//! The mask is parsed once (at config-validation time, so a malformed
//! `yScaling` is rejected before any rendering happens) and then applied
//! many times during deck assembly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^##(?:\.([0-3]))?(BB|MM|KK|%|bps)?$").unwrap());

/// Unit operation applied before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Billions,
    Millions,
    Thousands,
    Percent,
    BasisPoints,
    None,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Unit::Billions => "B",
            Unit::Millions => "M",
            Unit::Thousands => "K",
            Unit::Percent => "%",
            Unit::BasisPoints => "bps",
            Unit::None => "",
        }
    }

    fn apply(self, value: f64) -> f64 {
        match self {
            Unit::Billions => value / 1e9,
            Unit::Millions => value / 1e6,
            Unit::Thousands => value / 1e3,
            Unit::Percent => value * 100.0,
            Unit::BasisPoints => value * 10_000.0,
            Unit::None => value,
        }
    }
}

/// A parsed `##(.n)<unit>` mask, e.g. `##.2MM` or `##.0bps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    pub precision: u8,
    pub unit: Unit,
}

impl Mask {
    pub const DEFAULT: Mask = Mask {
        precision: 0,
        unit: Unit::None,
    };

    /// Parses a mask string, failing if it doesn't match the grammar.
    pub fn parse(s: &str) -> Result<Mask, String> {
        let caps = MASK_RE
            .captures(s)
            .ok_or_else(|| format!("malformed yScaling mask: {s:?}"))?;
        let precision = caps
            .get(1)
            .map(|m| m.as_str().parse::<u8>().unwrap())
            .unwrap_or(0);
        let unit = match caps.get(2).map(|m| m.as_str()) {
            Some("BB") => Unit::Billions,
            Some("MM") => Unit::Millions,
            Some("KK") => Unit::Thousands,
            Some("%") => Unit::Percent,
            Some("bps") => Unit::BasisPoints,
            None => Unit::None,
            Some(other) => return Err(format!("unrecognized mask unit: {other:?}")),
        };
        Ok(Mask { precision, unit })
    }

    /// Formats a finite numeric value, or passes `None`/non-finite values
    /// through as `"N/A"`.
    pub fn format(&self, value: Option<f64>) -> String {
        match value {
            None => "N/A".to_string(),
            Some(v) if !v.is_finite() => "N/A".to_string(),
            Some(v) => {
                let scaled = self.unit.apply(v);
                let rounded = round_to(scaled, self.precision);
                format!("{:.*}{}", self.precision as usize, rounded, self.unit.suffix())
            }
        }
    }

    /// Reconstructs a canonical mask string, used for round-trip tests and
    /// for echoing a validated mask back in error messages.
    pub fn to_mask_string(&self) -> String {
        let precision = if self.precision > 0 {
            format!(".{}", self.precision)
        } else {
            String::new()
        };
        format!("##{precision}{}", self.unit_token())
    }

    fn unit_token(&self) -> &'static str {
        match self.unit {
            Unit::Billions => "BB",
            Unit::Millions => "MM",
            Unit::Thousands => "KK",
            Unit::Percent => "%",
            Unit::BasisPoints => "bps",
            Unit::None => "",
        }
    }
}

/// Renders a metric's comparison value (WOW/MOM/YOY) under its
/// `comparisonMethod`, independent of the metric's own display mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonMethod {
    Percent,
    Bps,
}

impl ComparisonMethod {
    pub fn format(&self, value: Option<f64>) -> String {
        let mask = match self {
            ComparisonMethod::Percent => Mask {
                precision: 2,
                unit: Unit::Percent,
            },
            ComparisonMethod::Bps => Mask {
                precision: 0,
                unit: Unit::BasisPoints,
            },
        };
        mask.format(value)
    }
}

fn round_to(value: f64, precision: u8) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_documented_masks() {
        assert_eq!(Mask::parse("##").unwrap().unit, Unit::None);
        assert_eq!(Mask::parse("##.2MM").unwrap().precision, 2);
        assert_eq!(Mask::parse("##.0bps").unwrap().unit, Unit::BasisPoints);
        assert!(Mask::parse("###").is_err());
        assert!(Mask::parse("##.9MM").is_err());
    }

    #[test]
    fn formats_na_passthrough() {
        let mask = Mask::parse("##.2MM").unwrap();
        assert_eq!(mask.format(None), "N/A");
        assert_eq!(mask.format(Some(f64::NAN)), "N/A");
    }

    #[test]
    fn formats_millions_with_precision() {
        let mask = Mask::parse("##.2MM").unwrap();
        assert_eq!(mask.format(Some(1_234_000.0)), "1.23M");
    }

    #[test]
    fn bps_comparison_is_integer() {
        assert_eq!(ComparisonMethod::Bps.format(Some(1.0)), "10000bps");
    }

    #[test]
    fn percent_comparison_has_two_decimals() {
        assert_eq!(ComparisonMethod::Percent.format(Some(0.0512)), "5.12%");
    }

    #[test]
    fn round_trip_parse_format_parse_is_idempotent_modulo_precision() {
        for mask_str in ["##", "##.0MM", "##.1BB", "##.2%", "##.3bps", "##KK"] {
            let mask = Mask::parse(mask_str).unwrap();
            let reconstructed = Mask::parse(&mask.to_mask_string()).unwrap();
            assert_eq!(mask, reconstructed);
        }
    }
}
