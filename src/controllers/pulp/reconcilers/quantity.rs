use std::num::ParseIntError;
use std::sync::OnceLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

// a quantity is compared in billionths of its base unit so that `m` with decimals stays exact
const NANO: i128 = 1_000_000_000;
const MAX_DECIMALS: u32 = 9;

fn suffix_factor(suffix: &str) -> Option<i128> {
    let factor = match suffix {
        "" => NANO,
        "m" => NANO / 1000,
        "k" => NANO * 1000,
        "M" => NANO * 1000_i128.pow(2),
        "G" => NANO * 1000_i128.pow(3),
        "T" => NANO * 1000_i128.pow(4),
        "P" => NANO * 1000_i128.pow(5),
        "E" => NANO * 1000_i128.pow(6),
        "Ki" => NANO * 1024,
        "Mi" => NANO * 1024_i128.pow(2),
        "Gi" => NANO * 1024_i128.pow(3),
        "Ti" => NANO * 1024_i128.pow(4),
        "Pi" => NANO * 1024_i128.pow(5),
        "Ei" => NANO * 1024_i128.pow(6),
        _ => return None,
    };
    Some(factor)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),
    #[error("Invalid quantity format")]
    InvalidFormat,
    #[error("Invalid quantity unit")]
    InvalidUnit,
    #[error("Quantity out of range")]
    Overflow,
}

/// Numeric reading of resource quantities, so that `0.5` and `500m` compare equal
pub trait QuantityParser {
    /// The quantity in billionths of its base unit.
    ///
    /// # Errors
    ///
    /// Fails on an unknown suffix, a malformed number, more than nine decimals or a value too
    /// large to represent.
    fn to_nano_units(&self) -> Result<i128, ParseError>;
}

impl QuantityParser for Quantity {
    fn to_nano_units(&self) -> Result<i128, ParseError> {
        parse_nano_units(&self.0)
    }
}

pub(crate) fn parse_nano_units(raw: &str) -> Result<i128, ParseError> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| {
        Regex::new(r"^([+-]?)([0-9]*)(?:\.([0-9]*))?([[:alpha:]]{0,2})$").unwrap()
    });
    let cap = regex.captures(raw.trim()).ok_or(ParseError::InvalidFormat)?;

    let negative = &cap[1] == "-";
    let whole = &cap[2];
    let fraction = cap.get(3).map_or("", |m| m.as_str());
    if whole.is_empty() && fraction.is_empty() {
        return Err(ParseError::InvalidFormat);
    }
    let decimals = u32::try_from(fraction.len()).map_err(|_| ParseError::Overflow)?;
    if decimals > MAX_DECIMALS {
        return Err(ParseError::Overflow);
    }
    let factor = suffix_factor(&cap[4]).ok_or(ParseError::InvalidUnit)?;

    let mantissa = format!("{whole}{fraction}").parse::<i128>()?;
    let value = mantissa
        .checked_mul(factor)
        .ok_or(ParseError::Overflow)?
        / 10_i128.pow(decimals);
    Ok(if negative { -value } else { value })
}

/// Whether two quantity strings denote the same amount
pub fn same_quantity(a: &str, b: &str) -> Option<bool> {
    match (parse_nano_units(a), parse_nano_units(b)) {
        (Ok(a), Ok(b)) => Some(a == b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_integers_parse() {
        assert_eq!(Quantity("2".into()).to_nano_units().unwrap(), 2 * NANO);
    }

    #[test]
    fn decimals_and_milli_agree() {
        assert_eq!(same_quantity("0.5", "500m"), Some(true));
        assert_eq!(same_quantity("1", "1000m"), Some(true));
        assert_eq!(same_quantity("1", "500m"), Some(false));
        assert_eq!(same_quantity(".25", "250m"), Some(true));
    }

    #[test]
    fn binary_and_decimal_suffixes() {
        assert_eq!(same_quantity("1024Mi", "1Gi"), Some(true));
        assert_eq!(same_quantity("1G", "1000M"), Some(true));
        assert_eq!(same_quantity("1Gi", "1G"), Some(false));
        assert_eq!(
            Quantity("1Mi".into()).to_nano_units().unwrap(),
            1_048_576 * NANO
        );
    }

    #[test]
    fn invalid_unit_fails() {
        assert!(matches!(
            Quantity("12345r".into()).to_nano_units(),
            Err(ParseError::InvalidUnit)
        ));
        assert!(Quantity("1.2.3".into()).to_nano_units().is_err());
        assert!(Quantity(".".into()).to_nano_units().is_err());
        assert_eq!(same_quantity("fast", "fast"), None);
    }
}
