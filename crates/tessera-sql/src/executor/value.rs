//! Runtime values.
//!
//! `Value` is a closed set of variants. Values are never coerced: an
//! `Integer` never compares equal to a `Decimal`, and comparing across types
//! is rejected when a predicate is bound. For index keys there is still a
//! total order across types: `Null < Integer < Decimal < Text`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit signed integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Fixed-point decimal.
    Decimal,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Text => write!(f, "TEXT"),
            DataType::Decimal => write!(f, "DECIMAL"),
        }
    }
}

/// Maximum number of fractional digits in a [`Decimal`].
pub const MAX_DECIMAL_SCALE: u8 = 18;

/// A fixed-point decimal: `mantissa / 10^scale`.
///
/// Always normalised (no trailing fractional zeros), so equal numbers have
/// equal representations and derived `Eq`/`Hash` agree with numeric
/// equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: i128,
    scale: u8,
}

impl Decimal {
    /// Creates a decimal, or `None` if `scale` exceeds [`MAX_DECIMAL_SCALE`].
    pub fn new(mantissa: i128, scale: u8) -> Option<Self> {
        if scale > MAX_DECIMAL_SCALE {
            return None;
        }
        let mut d = Self { mantissa, scale };
        while d.scale > 0 && d.mantissa % 10 == 0 {
            d.mantissa /= 10;
            d.scale -= 1;
        }
        Some(d)
    }

    /// Creates a decimal with no fractional part.
    pub fn from_integer(value: i64) -> Self {
        Self {
            mantissa: value as i128,
            scale: 0,
        }
    }

    /// Returns the unscaled value.
    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Returns the number of fractional digits.
    pub fn scale(&self) -> u8 {
        self.scale
    }

    fn split(&self) -> (i128, i128) {
        let divisor = 10i128.pow(self.scale as u32);
        (self.mantissa / divisor, self.mantissa % divisor)
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        // Integer parts first, then fractions aligned to a common scale.
        // Truncating division keeps both parts' signs equal to the number's.
        let (a_int, a_frac) = self.split();
        let (b_int, b_frac) = other.split();
        let scale = self.scale.max(other.scale);
        let a_frac = a_frac * 10i128.pow((scale - self.scale) as u32);
        let b_frac = b_frac * 10i128.pow((scale - other.scale) as u32);
        a_int.cmp(&b_int).then(a_frac.cmp(&b_frac))
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Decimal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid decimal literal: {s:?}");
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let scale = u8::try_from(frac_part.len()).map_err(|_| invalid())?;
        let joined = format!("{int_part}{frac_part}");
        let mut mantissa: i128 = if joined.is_empty() {
            0
        } else {
            joined.parse().map_err(|_| invalid())?
        };
        if negative {
            mantissa = -mantissa;
        }
        Decimal::new(mantissa, scale).ok_or_else(invalid)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let (int_part, frac_part) = self.split();
        let sign = if self.mantissa < 0 && int_part == 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0>width$}",
            sign,
            int_part,
            frac_part.abs(),
            width = self.scale as usize
        )
    }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// NULL value.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Fixed-point decimal.
    Decimal(Decimal),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Creates an integer value.
    pub fn integer(v: i64) -> Self {
        Value::Integer(v)
    }

    /// Creates a text value.
    pub fn text(v: impl Into<String>) -> Self {
        Value::Text(v.into())
    }

    /// Parses a decimal value, e.g. `"19.99"`.
    pub fn decimal(literal: &str) -> Result<Self, String> {
        literal.parse().map(Value::Decimal)
    }

    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the data type, or `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Integer),
            Value::Decimal(_) => Some(DataType::Decimal),
            Value::Text(_) => Some(DataType::Text),
        }
    }

    /// Returns true if the value may be stored in a column of `data_type`.
    pub fn fits(&self, data_type: DataType) -> bool {
        self.data_type().map_or(true, |t| t == data_type)
    }

    /// Returns the integer, if this is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQL comparison: `None` if either side is NULL or the types differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Decimal(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}
