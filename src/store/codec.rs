//! Value conversion between input types.
//!
//! # Responsibilities
//! - Coerce a submitted value into the input type a variable expects
//! - Parse integers from strings (decimal, or `0x`/`0o`/`0b` prefixed)
//!
//! # Design Decisions
//! - Range checks are not done here; the caller applies the variable's
//!   declared min/max after conversion
//! - The converted value owns any temporary buffer, so there is no separate
//!   cleanup step

use thiserror::Error;

use crate::store::value::{InputType, Value, VarType};

/// Conversion failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("cannot convert NULL or empty string to integer")]
    NullString,

    #[error("cannot convert string to integer: '{0}'")]
    NotANumber(String),

    #[error("integer out of 32-bit range: '{0}'")]
    Overflow(String),

    #[error("got a value of type {from}, but expected {to}")]
    Unsupported { from: VarType, to: InputType },
}

/// Convert `value` to the representation of `target`.
pub fn convert(value: Value, target: InputType) -> Result<Value, ConversionError> {
    match (target, value) {
        (InputType::Int, Value::Int(v)) => Ok(Value::Int(v)),
        (InputType::Int, Value::String(None)) => Err(ConversionError::NullString),
        (InputType::Int, Value::String(Some(s))) | (InputType::Int, Value::Str(s)) => {
            parse_int(&s).map(Value::Int)
        }

        (InputType::String, Value::Int(v)) => Ok(Value::String(Some(v.to_string()))),
        (InputType::String, v @ Value::String(_)) => Ok(v),
        (InputType::String, Value::Str(s)) => Ok(Value::String(Some(s))),

        (InputType::Str, Value::Int(v)) => Ok(Value::Str(v.to_string())),
        (InputType::Str, Value::String(s)) => Ok(Value::Str(s.unwrap_or_default())),
        (InputType::Str, v @ Value::Str(_)) => Ok(v),

        (to, v) => Err(ConversionError::Unsupported {
            from: v.var_type(),
            to,
        }),
    }
}

/// Parse a whole string as a 32-bit integer.
pub fn parse_int(text: &str) -> Result<i32, ConversionError> {
    if text.is_empty() {
        return Err(ConversionError::NullString);
    }
    let (negative, unsigned) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, digits) = if let Some(d) = strip_prefix_ci(unsigned, "0x") {
        (16, d)
    } else if let Some(d) = strip_prefix_ci(unsigned, "0o") {
        (8, d)
    } else if let Some(d) = strip_prefix_ci(unsigned, "0b") {
        (2, d)
    } else {
        (10, unsigned)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(ConversionError::NotANumber(text.to_string()));
    }
    let magnitude = i64::from_str_radix(digits, radix)
        .map_err(|_| ConversionError::Overflow(text.to_string()))?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).map_err(|_| ConversionError::Overflow(text.to_string()))
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_string_to_int() {
        assert_eq!(convert(Value::string("42"), InputType::Int), Ok(Value::Int(42)));
        assert_eq!(convert(Value::str("-7"), InputType::Int), Ok(Value::Int(-7)));
        assert_eq!(convert(Value::string("0x1F"), InputType::Int), Ok(Value::Int(31)));
        assert_eq!(
            convert(Value::string("12abc"), InputType::Int),
            Err(ConversionError::NotANumber("12abc".into()))
        );
        assert_eq!(
            convert(Value::String(None), InputType::Int),
            Err(ConversionError::NullString)
        );
        assert_eq!(convert(Value::str(""), InputType::Int), Err(ConversionError::NullString));
        assert_eq!(
            convert(Value::string("4294967296"), InputType::Int),
            Err(ConversionError::Overflow("4294967296".into()))
        );
    }

    #[test]
    fn test_int_to_strings() {
        assert_eq!(convert(Value::Int(5), InputType::String), Ok(Value::string("5")));
        assert_eq!(convert(Value::Int(-5), InputType::Str), Ok(Value::str("-5")));
    }

    #[test]
    fn test_between_string_kinds() {
        assert_eq!(convert(Value::str("a b"), InputType::String), Ok(Value::string("a b")));
        assert_eq!(convert(Value::String(None), InputType::Str), Ok(Value::str("")));
        assert_eq!(convert(Value::string("x"), InputType::String), Ok(Value::string("x")));
    }

    #[test]
    fn test_pointer_is_not_convertible() {
        let err = convert(Value::Pointer(None), InputType::Int).unwrap_err();
        assert_eq!(
            err,
            ConversionError::Unsupported {
                from: VarType::Pointer,
                to: InputType::Int
            }
        );
    }

    proptest! {
        #[test]
        fn prop_int_string_roundtrip(n in any::<i32>()) {
            let s = convert(Value::Int(n), InputType::String).unwrap();
            prop_assert_eq!(convert(s, InputType::Int).unwrap(), Value::Int(n));
        }

        #[test]
        fn prop_decimal_strings_survive(n in any::<i32>()) {
            let text = n.to_string();
            let i = convert(Value::string(text.clone()), InputType::Int).unwrap();
            prop_assert_eq!(convert(i, InputType::String).unwrap(), Value::string(text));
        }

        #[test]
        fn prop_non_numeric_rejected(s in "[a-z ]{1,12}") {
            prop_assert!(convert(Value::string(s), InputType::Int).is_err());
        }
    }
}
