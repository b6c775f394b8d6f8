use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Signed fixed-point scalar in Q-format.
///
/// `TOTAL` is the word width and `INT` the integer bits including sign, so the
/// value is `raw / 2^(TOTAL - INT)`. Every constructor and every arithmetic
/// result rounds to nearest (ties toward +inf) and then saturates to the
/// representable range. Values never wrap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fixed<const TOTAL: u32, const INT: u32> {
    raw: i64,
}

impl<const TOTAL: u32, const INT: u32> Fixed<TOTAL, INT> {
    /// Post-monomorphization check on the format parameters.
    const VALID: () = assert!(
        TOTAL >= 2 && TOTAL <= 63 && INT >= 1 && INT <= TOTAL,
        "unsupported Q-format"
    );

    pub const FRAC_BITS: u32 = TOTAL - INT;

    const RAW_MAX: i64 = (1i64 << (TOTAL - 1)) - 1;
    const RAW_MIN: i64 = -(1i64 << (TOTAL - 1));

    pub const MIN: Self = Self { raw: Self::RAW_MIN };
    pub const MAX: Self = Self { raw: Self::RAW_MAX };
    pub const ZERO: Self = Self { raw: 0 };

    /// Builds a value from its raw two's-complement word, saturating.
    pub fn from_raw(raw: i64) -> Self {
        Self::saturate(raw as i128)
    }

    pub fn raw(self) -> i64 {
        self.raw
    }

    /// 1.0, or the largest value below it when the format has no room for it.
    pub fn one() -> Self {
        Self::from_f64(1.0)
    }

    /// Weight of the least significant bit.
    pub fn lsb() -> f64 {
        Self::scale().recip()
    }

    fn scale() -> f64 {
        2f64.powi(Self::FRAC_BITS as i32)
    }

    /// Quantizes a float: round-to-nearest, then saturate. NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        let () = Self::VALID;
        if value.is_nan() {
            return Self::ZERO;
        }
        // `scaled + 0.5` can itself round up to the next integer; the
        // fractional part `scaled - floor` is exact
        let scaled = value * Self::scale();
        let floor = scaled.floor();
        let rounded = if scaled - floor >= 0.5 { floor + 1.0 } else { floor };
        if rounded >= Self::RAW_MAX as f64 {
            Self::MAX
        } else if rounded <= Self::RAW_MIN as f64 {
            Self::MIN
        } else {
            Self { raw: rounded as i64 }
        }
    }

    pub fn to_f64(self) -> f64 {
        self.raw as f64 / Self::scale()
    }

    /// Requantizes a wide raw value carrying `frac_bits` fractional bits.
    pub(crate) fn from_wide(raw: i128, frac_bits: u32) -> Self {
        let () = Self::VALID;
        let own = Self::FRAC_BITS;
        let aligned = match frac_bits.cmp(&own) {
            Ordering::Greater => {
                let shift = frac_bits - own;
                // arithmetic shift floors, so adding half an LSB first rounds ties up
                (raw + (1i128 << (shift - 1))) >> shift
            }
            Ordering::Less => raw << (own - frac_bits),
            Ordering::Equal => raw,
        };
        Self::saturate(aligned)
    }

    fn saturate(raw: i128) -> Self {
        let raw = raw.clamp(Self::RAW_MIN as i128, Self::RAW_MAX as i128);
        Self { raw: raw as i64 }
    }

    /// Narrows or widens into another Q-format with the same round/saturate rule.
    pub fn convert<const T2: u32, const I2: u32>(self) -> Fixed<T2, I2> {
        Fixed::<T2, I2>::from_wide(self.raw as i128, Self::FRAC_BITS)
    }

    /// Exact sum of two values of arbitrary formats, quantized into `Self`.
    pub fn exact_sum<const TA: u32, const IA: u32, const TB: u32, const IB: u32>(
        a: Fixed<TA, IA>,
        b: Fixed<TB, IB>,
    ) -> Self {
        let fa = Fixed::<TA, IA>::FRAC_BITS;
        let fb = Fixed::<TB, IB>::FRAC_BITS;
        let common = fa.max(fb);
        let wide = ((a.raw as i128) << (common - fa)) + ((b.raw as i128) << (common - fb));
        Self::from_wide(wide, common)
    }

    /// Multiply-accumulate: adds the full-precision product `a * b` to `self`
    /// and quantizes the sum back into this format.
    pub fn mac<const TA: u32, const IA: u32, const TB: u32, const IB: u32>(
        self,
        a: Fixed<TA, IA>,
        b: Fixed<TB, IB>,
    ) -> Self {
        let product_frac = Fixed::<TA, IA>::FRAC_BITS + Fixed::<TB, IB>::FRAC_BITS;
        let product = a.raw as i128 * b.raw as i128;
        let common = product_frac.max(Self::FRAC_BITS);
        let wide = ((self.raw as i128) << (common - Self::FRAC_BITS))
            + (product << (common - product_frac));
        Self::from_wide(wide, common)
    }

    pub fn is_saturated(self) -> bool {
        self == Self::MAX || self == Self::MIN
    }
}

impl<const TOTAL: u32, const INT: u32> Add for Fixed<TOTAL, INT> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::saturate(self.raw as i128 + rhs.raw as i128)
    }
}

impl<const TOTAL: u32, const INT: u32> Sub for Fixed<TOTAL, INT> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::saturate(self.raw as i128 - rhs.raw as i128)
    }
}

impl<const TOTAL: u32, const INT: u32> Neg for Fixed<TOTAL, INT> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::saturate(-(self.raw as i128))
    }
}

impl<const TOTAL: u32, const INT: u32> Mul for Fixed<TOTAL, INT> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::from_wide(self.raw as i128 * rhs.raw as i128, 2 * Self::FRAC_BITS)
    }
}

impl<const TOTAL: u32, const INT: u32> PartialOrd for Fixed<TOTAL, INT> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const TOTAL: u32, const INT: u32> Ord for Fixed<TOTAL, INT> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<const TOTAL: u32, const INT: u32> From<Fixed<TOTAL, INT>> for f64 {
    fn from(value: Fixed<TOTAL, INT>) -> f64 {
        value.to_f64()
    }
}

impl<const TOTAL: u32, const INT: u32> fmt::Display for Fixed<TOTAL, INT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_f64(), f)
    }
}

impl<const TOTAL: u32, const INT: u32> fmt::Debug for Fixed<TOTAL, INT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}.{}({})", INT, Self::FRAC_BITS, self.to_f64())
    }
}

// Serialized as the represented real value.
impl<const TOTAL: u32, const INT: u32> Serialize for Fixed<TOTAL, INT> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de, const TOTAL: u32, const INT: u32> Deserialize<'de> for Fixed<TOTAL, INT> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Self::from_f64)
    }
}
