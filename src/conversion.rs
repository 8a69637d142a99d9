//! Timestamp arithmetic.
//!
//! Helpers for rational time bases, exact rescaling and conversion to
//! [`Duration`]. All rescaling goes through 128-bit integers so that the same
//! inputs always map to the same outputs.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::Duration,
};

/// A rational number, used for time bases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator.
    pub numerator: i32,
    /// Denominator.
    pub denominator: i32,
}

impl Rational {
    /// Create a rational, reduced to lowest terms.
    pub fn new(numerator: i32, denominator: i32) -> Self {
        let divisor = gcd(numerator.unsigned_abs() as u64, denominator.unsigned_abs() as u64);
        if divisor <= 1 {
            return Self {
                numerator,
                denominator,
            };
        }
        Self {
            numerator: numerator / divisor as i32,
            denominator: denominator / divisor as i32,
        }
    }

    /// Whether both terms are positive.
    pub fn is_valid(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }

    /// Value as a float. Returns 0.0 for a zero denominator.
    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }

    /// Swap numerator and denominator.
    pub fn invert(&self) -> Self {
        Self {
            numerator: self.denominator,
            denominator: self.numerator,
        }
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for Rational {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (numerator, denominator) = value
            .split_once('/')
            .ok_or_else(|| format!("expected N/D, got {value:?}"))?;
        let numerator = numerator
            .parse::<i32>()
            .map_err(|error| format!("bad numerator in {value:?}: {error}"))?;
        let denominator = denominator
            .parse::<i32>()
            .map_err(|error| format!("bad denominator in {value:?}: {error}"))?;
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

/// Greatest common divisor.
pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let remainder = a % b;
        a = b;
        b = remainder;
    }
    a
}

/// Rescale `value` by `multiplier / divisor`, rounding toward negative
/// infinity.
pub(crate) fn rescale_floor(value: i64, multiplier: i64, divisor: i64) -> i64 {
    if divisor == 0 {
        return 0;
    }
    let product = value as i128 * multiplier as i128;
    product.div_euclid(divisor as i128) as i64
}

/// Convert stream ticks to seconds.
pub(crate) fn ticks_to_seconds(ticks: i64, time_base: Rational) -> f64 {
    ticks as f64 * time_base.numerator as f64 / time_base.denominator.max(1) as f64
}

/// Convert stream ticks to a [`Duration`]. Negative values clamp to zero.
pub(crate) fn ticks_to_duration(ticks: i64, time_base: Rational) -> Duration {
    Duration::from_secs_f64(ticks_to_seconds(ticks, time_base).max(0.0))
}

/// The constant-rate frame number `frame` expressed in stream ticks,
/// relative to the first presentation timestamp.
///
/// `frame * rate.denominator * tb.denominator / (rate.numerator * tb.numerator)`,
/// floored.
pub(crate) fn cfr_frame_to_ticks(frame: u32, rate: Rational, time_base: Rational) -> i64 {
    let multiplier = rate.denominator as i64 * time_base.denominator as i64;
    let divisor = rate.numerator as i64 * time_base.numerator as i64;
    rescale_floor(frame as i64, multiplier, divisor)
}

/// Average frame rate of `frames` pictures spanning `span` ticks.
pub(crate) fn frame_rate_from_span(frames: u64, span: i64, time_base: Rational) -> Option<Rational> {
    if frames == 0 || span <= 0 || !time_base.is_valid() {
        return None;
    }
    let numerator = frames as u128 * time_base.denominator as u128;
    let denominator = span as u128 * time_base.numerator as u128;
    let divisor = gcd_u128(numerator, denominator);
    let (mut numerator, mut denominator) = (numerator / divisor, denominator / divisor);
    while numerator > i32::MAX as u128 || denominator > i32::MAX as u128 {
        numerator >>= 1;
        denominator >>= 1;
    }
    if numerator == 0 || denominator == 0 {
        return None;
    }
    Some(Rational::new(numerator as i32, denominator as i32))
}

fn gcd_u128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let remainder = a % b;
        a = b;
        b = remainder;
    }
    a.max(1)
}
