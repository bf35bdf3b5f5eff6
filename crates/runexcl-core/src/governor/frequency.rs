//! Target frequency requested on the command line.
//!
//! ```text
//! frequency := "max" | "min" | "nonlinear" | number unit?
//! unit      := "Hz" | "k" | "kHz" | "M" | "MHz" | "G" | "GHz"
//! ```
//!
//! A bare number up to `1` is a fraction of the policy's maximum, anything
//! larger is in Hz.

use std::str::FromStr;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    combinator::{all_consuming, opt, value},
    number::complete::double,
};
use runexcl_common::error::RunexclError;

/// Frequency to run the partition's CPUs at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frequency {
    /// `scaling_max_freq` of each policy.
    Max,
    /// `scaling_min_freq` of each policy.
    Min,
    /// Lowest frequency with non-linear power savings (AMD P-State only).
    LowestNonlinear,
    /// Fraction in `(0, 1]` of `scaling_max_freq`.
    Fraction(f64),
    /// Absolute frequency.
    Hertz(u64),
}

impl Frequency {
    /// Resolves the request against one policy's limits, in kHz, clamped to
    /// `[min_khz, max_khz]`. A missing non-linear frequency resolves to the
    /// minimum.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn target_khz(self, min_khz: u64, max_khz: u64, nonlinear_khz: Option<u64>) -> u64 {
        let khz = match self {
            Self::Max => max_khz,
            Self::Min => min_khz,
            Self::LowestNonlinear => nonlinear_khz.unwrap_or(min_khz),
            Self::Fraction(fraction) => (max_khz as f64 * fraction) as u64,
            Self::Hertz(hz) => hz / 1000,
        };
        khz.clamp(min_khz, max_khz.max(min_khz))
    }
}

fn unit(input: &str) -> IResult<&str, f64> {
    alt((
        value(1e9, alt((tag("GHz"), tag("G")))),
        value(1e6, alt((tag("MHz"), tag("M")))),
        value(1e3, alt((tag("kHz"), tag("k")))),
        value(1.0, tag("Hz")),
    ))
    .parse(input)
}

fn quantity(input: &str) -> IResult<&str, (f64, Option<f64>)> {
    all_consuming((double, opt(unit))).parse(input)
}

impl FromStr for Frequency {
    type Err = RunexclError;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RunexclError::Config {
            message: format!("invalid CPU frequency \"{s}\": {reason}"),
        };
        match s {
            "max" => return Ok(Self::Max),
            "min" => return Ok(Self::Min),
            "nonlinear" => return Ok(Self::LowestNonlinear),
            _ => {}
        }

        let (_, (number, scale)) = quantity(s).map_err(|_| invalid("expected a number with an optional unit"))?;
        if !number.is_finite() || number <= 0.0 {
            return Err(invalid("must be positive"));
        }
        match scale {
            None if number <= 1.0 => Ok(Self::Fraction(number)),
            None => Ok(Self::Hertz(number as u64)),
            Some(scale) => Ok(Self::Hertz((number * scale) as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Frequency {
        s.parse().expect("valid frequency")
    }

    #[test]
    fn keywords() {
        assert_eq!(parse("max"), Frequency::Max);
        assert_eq!(parse("min"), Frequency::Min);
        assert_eq!(parse("nonlinear"), Frequency::LowestNonlinear);
    }

    #[test]
    fn units_scale_to_hertz() {
        assert_eq!(parse("2GHz"), Frequency::Hertz(2_000_000_000));
        assert_eq!(parse("1.5G"), Frequency::Hertz(1_500_000_000));
        assert_eq!(parse("800MHz"), Frequency::Hertz(800_000_000));
        assert_eq!(parse("800M"), Frequency::Hertz(800_000_000));
        assert_eq!(parse("400000k"), Frequency::Hertz(400_000_000));
        assert_eq!(parse("400000kHz"), Frequency::Hertz(400_000_000));
        assert_eq!(parse("2000000000Hz"), Frequency::Hertz(2_000_000_000));
        assert_eq!(parse("2000000000"), Frequency::Hertz(2_000_000_000));
    }

    #[test]
    fn small_bare_number_is_fraction() {
        assert_eq!(parse("0.5"), Frequency::Fraction(0.5));
        assert_eq!(parse("1"), Frequency::Fraction(1.0));
    }

    #[test]
    fn rejects_bad_input() {
        for input in ["", "fast", "0", "-1", "2 GHz", "3THz", "1.5GHzz"] {
            assert!(input.parse::<Frequency>().is_err(), "{input:?} accepted");
        }
    }

    #[test]
    fn target_is_clamped_to_policy_limits() {
        let (min, max) = (400_000, 3_000_000);
        assert_eq!(Frequency::Max.target_khz(min, max, None), max);
        assert_eq!(Frequency::Min.target_khz(min, max, None), min);
        assert_eq!(Frequency::Fraction(0.5).target_khz(min, max, None), 1_500_000);
        assert_eq!(Frequency::Fraction(0.01).target_khz(min, max, None), min);
        assert_eq!(Frequency::Hertz(2_000_000_000).target_khz(min, max, None), 2_000_000);
        assert_eq!(Frequency::Hertz(5_000_000_000).target_khz(min, max, None), max);
        assert_eq!(
            Frequency::LowestNonlinear.target_khz(min, max, Some(1_200_000)),
            1_200_000
        );
        assert_eq!(Frequency::LowestNonlinear.target_khz(min, max, None), min);
    }
}
