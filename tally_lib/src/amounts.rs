use crate::errors::TlyError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Highest number of fractional digits an amount can carry.
pub const MAX_PRECISION: u8 = 6;

fn pow10(p: u8) -> i64 {
    10i64.pow(u32::from(p))
}

fn pow10_wide(p: u8) -> i128 {
    10i128.pow(u32::from(p))
}

/// A signed fixed-point decimal with a per-value precision.
///
/// The value represented is `base * 10^-precision`.  Binary operations
/// promote to the greater precision of the two operands, so the precision of
/// a value never silently decreases.  All rounding (construction from
/// floating point, multiplication, division, precision conversion) is
/// round-half-to-nearest-even.
///
/// The storeable form is the string `"base/precision"`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Amount {
    base: i64,
    precision: u8,
}

/// Round-half-even division of n by a positive divisor.
fn div_round_half_even(n: i128, d: i128) -> i128 {
    debug_assert!(d > 0);
    let q = n.div_euclid(d);
    let r = n.rem_euclid(d);
    match (2 * r).cmp(&d) {
        std::cmp::Ordering::Less => q,
        std::cmp::Ordering::Greater => q + 1,
        std::cmp::Ordering::Equal => {
            if q % 2 == 0 {
                q
            } else {
                q + 1
            }
        }
    }
}

impl Amount {
    pub fn new(base: i64, precision: u8) -> Self {
        assert!(precision <= MAX_PRECISION);
        Amount { base, precision }
    }

    pub fn zero() -> Self {
        Amount::default()
    }

    /// Whole units at the given precision (`from_int(3, 2)` is 3.00).
    pub fn from_int(units: i64, precision: u8) -> Self {
        assert!(precision <= MAX_PRECISION);
        Amount {
            base: units * pow10(precision),
            precision,
        }
    }

    pub fn from_decimal(d: Decimal, precision: u8) -> Self {
        assert!(precision <= MAX_PRECISION);
        let r = d.round_dp_with_strategy(
            u32::from(precision),
            RoundingStrategy::MidpointNearestEven,
        );
        let shift = u32::from(precision) - r.scale();
        let base = r.mantissa() * 10i128.pow(shift);
        Amount {
            base: base as i64,
            precision,
        }
    }

    /// Conversion from floating point, rounding half-to-even at the requested
    /// precision.  Non-finite inputs yield zero.
    pub fn from_f64(value: f64, precision: u8) -> Self {
        match Decimal::from_f64_retain(value) {
            Some(d) => Amount::from_decimal(d, precision),
            None => Amount {
                base: 0,
                precision,
            },
        }
    }

    pub fn base(&self) -> i64 {
        self.base
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn is_zero(&self) -> bool {
        self.base == 0
    }

    pub fn is_negative(&self) -> bool {
        self.base < 0
    }

    pub fn is_positive(&self) -> bool {
        self.base > 0
    }

    pub fn abs(&self) -> Amount {
        Amount {
            base: self.base.abs(),
            precision: self.precision,
        }
    }

    /// The base amount this value would have at `precision`, rounding if the
    /// target is narrower.
    fn base_at(&self, precision: u8) -> i128 {
        if precision >= self.precision {
            i128::from(self.base) * pow10_wide(precision - self.precision)
        } else {
            div_round_half_even(
                i128::from(self.base),
                pow10_wide(self.precision - precision),
            )
        }
    }

    pub fn to_precision(&self, precision: u8) -> Amount {
        assert!(precision <= MAX_PRECISION);
        Amount {
            base: self.base_at(precision) as i64,
            precision,
        }
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(
            i128::from(self.base),
            u32::from(self.precision),
        )
    }

    pub fn to_f64(&self) -> f64 {
        self.base as f64 / pow10(self.precision) as f64
    }

    /// Multiply by an arbitrary decimal ratio, keeping this value's
    /// precision.  Used for proportional cost-basis adjustments.
    pub fn mul_decimal(&self, ratio: Decimal) -> Amount {
        Amount::from_decimal(self.to_decimal() * ratio, self.precision)
    }

    /// Multiply by an exchange rate.  This is the only place floating point
    /// meets stored amounts; the result is rounded half-to-even at this
    /// value's precision.
    pub fn mul_f64(&self, rate: f64) -> Amount {
        match Decimal::from_f64_retain(rate) {
            Some(d) => self.mul_decimal(d),
            None => Amount {
                base: 0,
                precision: self.precision,
            },
        }
    }

    /// `self * new / old`, exact in integers with a single final rounding.
    pub fn mul_fraction(&self, new: i32, old: i32) -> Amount {
        if old == 0 {
            return Amount {
                base: 0,
                precision: self.precision,
            };
        }
        let scaled = i128::from(self.base) * i128::from(new);
        let base = if old > 0 {
            div_round_half_even(scaled, i128::from(old))
        } else {
            -div_round_half_even(-scaled, i128::from(-old))
        };
        Amount {
            base: base as i64,
            precision: self.precision,
        }
    }

    pub fn to_storeable(&self) -> String {
        format!("{}/{}", self.base, self.precision)
    }

    pub fn from_storeable(s: &str) -> crate::errors::Result<Amount> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Amount::zero());
        }
        match s.split_once('/') {
            Some((base, precision)) => {
                let base = base.parse::<i64>().map_err(|e| {
                    TlyError::Io(format!("bad amount base {base:?}: {e}"))
                })?;
                let precision = precision.parse::<u8>().map_err(|e| {
                    TlyError::Io(format!(
                        "bad amount precision {precision:?}: {e}"
                    ))
                })?;
                if precision > MAX_PRECISION {
                    return Err(TlyError::Io(format!(
                        "amount precision {precision} out of range"
                    )));
                }
                Ok(Amount { base, precision })
            }
            None => {
                let units = s.parse::<i64>().map_err(|e| {
                    TlyError::Io(format!("bad amount {s:?}: {e}"))
                })?;
                Ok(Amount::from_int(units, 0))
            }
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = self.precision as usize;
        if p == 0 {
            return write!(f, "{}", self.base);
        }
        let sign = if self.base < 0 { "-" } else { "" };
        let abs = self.base.unsigned_abs();
        let pow = pow10(self.precision) as u64;
        write!(f, "{}{}.{:0width$}", sign, abs / pow, abs % pow, width = p)
    }
}

impl std::str::FromStr for Amount {
    type Err = TlyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (digits, frac) = match s.split_once('.') {
            Some((int, frac)) => (format!("{int}{frac}"), frac.len()),
            None => (s.to_string(), 0),
        };
        if frac > MAX_PRECISION as usize {
            return Err(TlyError::validation(format!(
                "too many fractional digits in {s:?}"
            )));
        }
        let base = digits.parse::<i64>().map_err(|e| {
            TlyError::validation(format!("cannot parse amount {s:?}: {e}"))
        })?;
        Ok(Amount {
            base,
            precision: frac as u8,
        })
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        let p = self.precision.max(other.precision);
        self.base_at(p) == other.base_at(p)
    }
}

impl Eq for Amount {}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let p = self.precision.max(other.precision);
        self.base_at(p).cmp(&other.base_at(p))
    }
}

impl core::ops::Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount {
            base: -self.base,
            precision: self.precision,
        }
    }
}

impl core::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        let p = self.precision.max(rhs.precision);
        Amount {
            base: (self.base_at(p) + rhs.base_at(p)) as i64,
            precision: p,
        }
    }
}

impl core::ops::Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        let p = self.precision.max(rhs.precision);
        Amount {
            base: (self.base_at(p) - rhs.base_at(p)) as i64,
            precision: p,
        }
    }
}

impl core::ops::Mul for Amount {
    type Output = Amount;

    fn mul(self, rhs: Amount) -> Amount {
        let p = self.precision.max(rhs.precision);
        let product = self.base_at(p) * rhs.base_at(p);
        Amount {
            base: div_round_half_even(product, pow10_wide(p)) as i64,
            precision: p,
        }
    }
}

impl core::ops::Div for Amount {
    type Output = Amount;

    fn div(self, rhs: Amount) -> Amount {
        let p = self.precision.max(rhs.precision);
        let den = rhs.base_at(p);
        if den == 0 {
            return Amount { base: 0, precision: p };
        }
        let num = self.base_at(p) * pow10_wide(p);
        let base = if den > 0 {
            div_round_half_even(num, den)
        } else {
            -div_round_half_even(-num, -den)
        };
        Amount {
            base: base as i64,
            precision: p,
        }
    }
}

impl core::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        *self = *self + rhs;
    }
}

impl core::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        *self = *self - rhs;
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_storeable())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_storeable(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    fn a(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_promotion() {
        assert_eq!((a("1.5") + a("0.25")).precision(), 2);
        assert_eq!(a("1.5") + a("0.25"), a("1.75"));
        assert_eq!(a("1.50"), a("1.5"));
        assert!(a("1.51") > a("1.5"));
        assert_eq!(a("2") - a("0.5"), a("1.5"));
    }

    #[test]
    fn test_mul_div() {
        assert_eq!(a("10.00") * a("50.00"), a("500.00"));
        assert_eq!(a("1050.00") / a("15.0000"), a("70.0000"));
        assert_eq!(a("1.00") / Amount::zero(), Amount::zero());
        assert_eq!(a("100.00").mul_fraction(2, 1), a("200.00"));
        assert_eq!(a("5.00").mul_fraction(1, 2), a("2.50"));
    }

    #[test]
    fn test_half_even() {
        // .5 cases round to the even neighbour
        assert_eq!(Amount::from_f64(0.125, 2), a("0.12"));
        assert_eq!(Amount::from_f64(0.135, 2), a("0.14"));
        assert_eq!(Amount::from_f64(-0.125, 2), a("-0.12"));
        assert_eq!(a("0.25").to_precision(1), a("0.2"));
        assert_eq!(a("0.35").to_precision(1), a("0.4"));
    }

    #[test]
    fn test_round_trip() {
        for s in ["0", "-1", "12.34", "-12.34", "0.000001", "1000000.50"] {
            let x = a(s);
            assert_eq!(x.to_string().parse::<Amount>().unwrap(), x);
            assert_eq!(Amount::from_storeable(&x.to_storeable()).unwrap(), x);
        }
        assert_eq!(a("-0.05").to_string(), "-0.05");
        assert_eq!(a("1234.5").to_storeable(), "12345/1");
        assert_eq!(Amount::from_storeable("42").unwrap(), a("42"));
    }

    #[test]
    fn test_decimal_bridge() {
        assert_eq!(a("12.34").to_decimal(), dec!(12.34));
        assert_eq!(Amount::from_decimal(dec!(12.345), 2), a("12.34"));
        assert_eq!(a("100.00").mul_decimal(dec!(0.75)), a("75.00"));
        assert_eq!(a("100.00").mul_f64(1.25), a("125.00"));
    }
}
