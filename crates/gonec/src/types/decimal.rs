//! Arbitrary-precision fixed-point decimal.
//!
//! A value is `mantissa / 10^scale` with a non-negative scale. Ints promote
//! into this type on arithmetic overflow. Division produces up to
//! [`DIV_PRECISION`] fractional digits; results are normalized by stripping
//! trailing zeros so equal values compare and print identically.

use std::{cmp::Ordering, fmt, str::FromStr};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::{RunResult, RuntimeError};

/// Fractional digits produced by division.
pub const DIV_PRECISION: u32 = 16;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Decimal {
    mant: BigInt,
    scale: u32,
}

fn pow10(exp: u32) -> BigInt {
    BigInt::from(10u32).pow(exp)
}

impl Decimal {
    #[must_use]
    pub fn new(mant: BigInt, scale: u32) -> Self {
        Self { mant, scale }.normalized()
    }

    #[must_use]
    pub fn zero() -> Self {
        Self {
            mant: BigInt::zero(),
            scale: 0,
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.mant.is_zero()
    }

    /// Strips trailing zeros from the fractional part.
    #[must_use]
    fn normalized(mut self) -> Self {
        let ten = BigInt::from(10u32);
        while self.scale > 0 && (&self.mant % &ten).is_zero() {
            self.mant /= &ten;
            self.scale -= 1;
        }
        self
    }

    /// Rescales both operands to a common scale.
    fn aligned(&self, other: &Self) -> (BigInt, BigInt, u32) {
        let scale = self.scale.max(other.scale);
        let a = &self.mant * pow10(scale - self.scale);
        let b = &other.mant * pow10(scale - other.scale);
        (a, b, scale)
    }

    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let (a, b, scale) = self.aligned(other);
        Self::new(a + b, scale)
    }

    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        let (a, b, scale) = self.aligned(other);
        Self::new(a - b, scale)
    }

    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self::new(&self.mant * &other.mant, self.scale + other.scale)
    }

    /// Division at [`DIV_PRECISION`] fractional digits, rounding half away
    /// from zero on the last digit.
    pub fn div(&self, other: &Self) -> RunResult<Self> {
        if other.is_zero() {
            return Err(RuntimeError::new(
                crate::error::ErrKind::IncorrectOperation,
                "Деление на ноль",
            ));
        }
        let (a, b, _) = self.aligned(other);
        // One extra digit for rounding.
        let scaled = a * pow10(DIV_PRECISION + 1);
        let q = &scaled / &b;
        let rounded = round_last_digit(q);
        Ok(Self::new(rounded, DIV_PRECISION))
    }

    /// Remainder with the sign of the dividend, matching integer `%`.
    pub fn rem(&self, other: &Self) -> RunResult<Self> {
        if other.is_zero() {
            return Err(RuntimeError::new(
                crate::error::ErrKind::IncorrectOperation,
                "Деление на ноль",
            ));
        }
        let (a, b, scale) = self.aligned(other);
        let (_, r) = a.div_rem(&b);
        Ok(Self::new(r, scale))
    }

    /// Integer power; a negative exponent divides one by the positive power.
    pub fn powi(&self, exp: i64) -> RunResult<Self> {
        let positive = {
            let e = u32::try_from(exp.unsigned_abs())
                .map_err(|_| RuntimeError::incorrect_operation())?;
            Self::new((&self.mant).pow(e), self.scale.saturating_mul(e))
        };
        if exp >= 0 {
            Ok(positive)
        } else {
            Self::from(1i64).div(&positive)
        }
    }

    #[must_use]
    pub fn neg(&self) -> Self {
        Self {
            mant: -&self.mant,
            scale: self.scale,
        }
    }

    /// Truncation toward zero, when the integral part fits in i64.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        (&self.mant / pow10(self.scale)).to_i64()
    }

    #[must_use]
    pub fn to_f64(&self) -> f64 {
        let int = self.mant.to_f64().unwrap_or(f64::NAN);
        int / 10f64.powi(i32::try_from(self.scale).unwrap_or(i32::MAX))
    }
}

/// Rounds away the extra digit produced by [`Decimal::div`].
fn round_last_digit(q: BigInt) -> BigInt {
    let ten = BigInt::from(10u32);
    let (head, last) = q.div_rem(&ten);
    if last.abs() >= BigInt::from(5u32) {
        if q.is_negative() { head - 1 } else { head + 1 }
    } else {
        head
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Self {
            mant: BigInt::from(v),
            scale: 0,
        }
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mant);
        }
        let sign = if self.mant.is_negative() { "-" } else { "" };
        let digits = self.mant.abs().to_string();
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{sign}{int}.{frac}")
        } else {
            write!(f, "{sign}0.{digits:0>scale$}")
        }
    }
}

impl FromStr for Decimal {
    type Err = RuntimeError;

    /// Parses `[-]digits[.digits][(e|E)[+-]digits]`.
    fn from_str(s: &str) -> RunResult<Self> {
        let s = s.trim();
        let bad = || RuntimeError::not_converted();
        let (body, exp) = match s.find(['e', 'E']) {
            Some(i) => {
                let exp: i32 = s[i + 1..].parse().map_err(|_| bad())?;
                (&s[..i], exp)
            }
            None => (s, 0),
        };
        let (int_part, frac_part) = match body.find('.') {
            Some(i) => (&body[..i], &body[i + 1..]),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        if frac_part.contains(['+', '-']) {
            return Err(bad());
        }
        let mant: BigInt = digits.parse().map_err(|_| bad())?;
        let scale = i64::try_from(frac_part.len()).map_err(|_| bad())? - i64::from(exp);
        if scale >= 0 {
            Ok(Self::new(mant, u32::try_from(scale).map_err(|_| bad())?))
        } else {
            let shift = u32::try_from(-scale).map_err(|_| bad())?;
            Ok(Self::new(mant * pow10(shift), 0))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(dec("1.50").to_string(), "1.5");
        assert_eq!(dec("-0.07").to_string(), "-0.07");
        assert_eq!(dec("3e2").to_string(), "300");
        assert_eq!(dec("2.5e-1").to_string(), "0.25");
        assert!("abc".parse::<Decimal>().is_err());
    }

    #[test]
    fn arithmetic() {
        assert_eq!(dec("0.1").add(&dec("0.2")), dec("0.3"));
        assert_eq!(dec("1").sub(&dec("2.5")), dec("-1.5"));
        assert_eq!(dec("1.5").mul(&dec("2")), dec("3"));
        assert_eq!(dec("1").div(&dec("4")).unwrap(), dec("0.25"));
        assert_eq!(dec("7").rem(&dec("3")).unwrap(), dec("1"));
    }

    #[test]
    fn division_precision_and_rounding() {
        let third = dec("1").div(&dec("3")).unwrap();
        assert_eq!(third.to_string(), "0.3333333333333333");
        let two_thirds = dec("2").div(&dec("3")).unwrap();
        assert_eq!(two_thirds.to_string(), "0.6666666666666667");
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(dec("1").div(&Decimal::zero()).is_err());
    }

    #[test]
    fn ordering_aligns_scales() {
        assert!(dec("1.25") > dec("1.2"));
        assert_eq!(dec("1.0"), dec("1"));
        assert!(dec("-3") < dec("0.5"));
    }

    #[test]
    fn negative_power() {
        assert_eq!(dec("2").powi(-2).unwrap(), dec("0.25"));
        assert_eq!(dec("1.5").powi(2).unwrap(), dec("2.25"));
    }

    #[test]
    fn truncation() {
        assert_eq!(dec("12.9").to_i64(), Some(12));
        assert_eq!(dec("-12.9").to_i64(), Some(-12));
    }
}
