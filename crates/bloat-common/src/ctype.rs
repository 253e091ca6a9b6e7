//! C scalar types the mutator understands, with their representable ranges.
//!
//! The ranges are the ones the search was tuned against; they are fixed
//! constants rather than `limits.h` lookups because the mutated literals are
//! spliced into source text, not evaluated.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum value of a C `int`.
pub const INT_MIN: i64 = -2_147_483_648;
/// Maximum value of a C `int`.
pub const INT_MAX: i64 = 2_147_483_647;
/// Minimum value of a C `short`.
pub const SHORT_MIN: i64 = -32_768;
/// Maximum value of a C `short`.
pub const SHORT_MAX: i64 = 32_767;
/// Minimum value of a C `long` (LP64).
pub const LONG_MIN: i64 = i64::MIN;
/// Maximum value of a C `long` (LP64).
pub const LONG_MAX: i64 = i64::MAX;
/// Lower bound used for `float` literals. Deliberately asymmetric with
/// [`FLOAT_MAX`]: a tiny negative value, not `-FLT_MAX`.
pub const FLOAT_MIN: f64 = -1.17549e-38;
/// Upper bound used for `float` literals.
pub const FLOAT_MAX: f64 = 3.40282e38;
/// Lower bound used for `double` literals (smallest positive normal).
pub const DOUBLE_MIN: f64 = 2.22507e-308;
/// Upper bound used for `double` literals.
pub const DOUBLE_MAX: f64 = 1.79769e308;

/// Characters drawn from when mutating `char` values and strings:
/// ASCII letters, digits, and punctuation, excluding characters that
/// would break a C literal (`"`, `'`, `\`).
pub const CHARACTERS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789\
     !#$%&()*+,-./:;<=>?@[]^_`{|}~";

/// The fixed set of C scalar types whose literals can be mutated.
///
/// An input whose declaration keyword is not one of these never becomes
/// mutable; the parameterizer records it as untyped and the whole template
/// is rejected at load time (an unknown type is a construction-time error,
/// not a mutation-time surprise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CType {
    /// `int`
    Int,
    /// `short`
    Short,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `char`
    Char,
}

impl CType {
    /// Map a declaration keyword to a type, if it is one of the mutable set.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "int" => Some(CType::Int),
            "short" => Some(CType::Short),
            "long" => Some(CType::Long),
            "float" => Some(CType::Float),
            "double" => Some(CType::Double),
            "char" => Some(CType::Char),
            _ => None,
        }
    }

    /// Integer range for the type, or `None` for floating and char types.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            CType::Int => Some((INT_MIN, INT_MAX)),
            CType::Short => Some((SHORT_MIN, SHORT_MAX)),
            CType::Long => Some((LONG_MIN, LONG_MAX)),
            _ => None,
        }
    }

    /// Floating range for the type, or `None` for integer and char types.
    pub fn float_range(self) -> Option<(f64, f64)> {
        match self {
            CType::Float => Some((FLOAT_MIN, FLOAT_MAX)),
            CType::Double => Some((DOUBLE_MIN, DOUBLE_MAX)),
            _ => None,
        }
    }

    /// Whether the type is one of the integer types.
    pub fn is_integer(self) -> bool {
        matches!(self, CType::Int | CType::Short | CType::Long)
    }

    /// Whether the type is one of the floating types.
    pub fn is_float(self) -> bool {
        matches!(self, CType::Float | CType::Double)
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CType::Int => "int",
            CType::Short => "short",
            CType::Long => "long",
            CType::Float => "float",
            CType::Double => "double",
            CType::Char => "char",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_round_trip() {
        for kw in ["int", "short", "long", "float", "double", "char"] {
            let ty = CType::from_keyword(kw).unwrap();
            assert_eq!(ty.to_string(), kw);
        }
        assert_eq!(CType::from_keyword("unsigned"), None);
        assert_eq!(CType::from_keyword("struct"), None);
    }

    #[test]
    fn test_ranges_partition() {
        for ty in [CType::Int, CType::Short, CType::Long] {
            assert!(ty.is_integer());
            let (lo, hi) = ty.int_range().unwrap();
            assert!(lo < hi);
            assert!(ty.float_range().is_none());
        }
        for ty in [CType::Float, CType::Double] {
            assert!(ty.is_float());
            let (lo, hi) = ty.float_range().unwrap();
            assert!(lo < hi);
            assert!(ty.int_range().is_none());
        }
        assert!(CType::Char.int_range().is_none());
        assert!(CType::Char.float_range().is_none());
    }

    #[test]
    fn test_float_range_is_asymmetric() {
        // The float range is not +/-FLT_MAX: its lower bound is a tiny
        // negative value, so draws are heavily skewed positive.
        assert!(FLOAT_MIN < 0.0 && FLOAT_MIN > -1e-37);
        assert!(FLOAT_MAX > 3e38);
    }

    #[test]
    fn test_characters_are_literal_safe() {
        assert!(!CHARACTERS.contains('"'));
        assert!(!CHARACTERS.contains('\''));
        assert!(!CHARACTERS.contains('\\'));
    }
}
