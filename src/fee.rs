use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Fee amount with 2 decimal places, stored in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Fee(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeeParseError {
    #[error("empty fee")]
    Empty,
    #[error("invalid fee '{0}'")]
    Invalid(String),
    #[error("fee '{0}' has more than 2 decimal places")]
    TooPrecise(String),
}

impl Fee {
    const SCALE: u64 = 100;

    pub const fn from_minor(value: u64) -> Self {
        Fee(value)
    }

    /// Build a fee from whole currency units.
    ///
    /// # Panics
    /// If `value` has no minor-unit representation in a `u64`. Use
    /// [`checked_from_major`](Self::checked_from_major) for untrusted input.
    pub const fn from_major(value: u64) -> Self {
        match Self::checked_from_major(value) {
            Some(fee) => fee,
            None => panic!("fee overflows minor units"),
        }
    }

    pub const fn checked_from_major(value: u64) -> Option<Self> {
        match value.checked_mul(Self::SCALE) {
            Some(minor) => Some(Fee(minor)),
            None => None,
        }
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Fee {
    type Err = FeeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FeeParseError::Empty);
        }
        let invalid = || FeeParseError::Invalid(s.to_string());

        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 {
            return Err(FeeParseError::TooPrecise(s.to_string()));
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        // "1.5" means 150 minor units
        let frac: u64 = format!("{frac:0<2}").parse().map_err(|_| invalid())?;

        Self::checked_from_major(whole)
            .and_then(|w| w.0.checked_add(frac))
            .map(Fee)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional() {
        assert_eq!("150".parse::<Fee>(), Ok(Fee::from_minor(15_000)));
        assert_eq!("150.5".parse::<Fee>(), Ok(Fee::from_minor(15_050)));
        assert_eq!("0.07".parse::<Fee>(), Ok(Fee::from_minor(7)));
        assert_eq!(" 12.34 ".parse::<Fee>(), Ok(Fee::from_minor(1_234)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<Fee>(), Err(FeeParseError::Empty));
        assert!(matches!("abc".parse::<Fee>(), Err(FeeParseError::Invalid(_))));
        assert!(matches!("-5".parse::<Fee>(), Err(FeeParseError::Invalid(_))));
        assert!(matches!(".50".parse::<Fee>(), Err(FeeParseError::Invalid(_))));
        assert!(matches!("1.2.3".parse::<Fee>(), Err(FeeParseError::Invalid(_))));
    }

    #[test]
    fn rejects_sub_cent_precision() {
        assert!(matches!(
            "1.234".parse::<Fee>(),
            Err(FeeParseError::TooPrecise(_))
        ));
    }

    #[test]
    fn rejects_overflow() {
        assert!(matches!(
            "999999999999999999".parse::<Fee>(),
            Err(FeeParseError::Invalid(_))
        ));
    }

    #[test]
    fn display_pads_minor_units() {
        assert_eq!(Fee::from_minor(15_000).to_string(), "150.00");
        assert_eq!(Fee::from_minor(7).to_string(), "0.07");
        assert_eq!(Fee::default().to_string(), "0.00");
    }

    #[test]
    fn from_major_scales() {
        assert_eq!(Fee::from_major(3), Fee::from_minor(300));
        assert!(Fee::default().is_zero());
        assert!(Fee::from_minor(1) > Fee::default());
    }

    #[test]
    fn checked_from_major_reports_overflow() {
        assert_eq!(Fee::checked_from_major(5), Some(Fee::from_minor(500)));
        assert_eq!(Fee::checked_from_major(u64::MAX / 100 + 1), None);
    }

    #[test]
    #[should_panic(expected = "fee overflows minor units")]
    fn from_major_panics_on_overflow() {
        let _ = Fee::from_major(std::hint::black_box(u64::MAX));
    }
}
