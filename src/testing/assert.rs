//! Assertions for use inside test functions
//!
//! Each helper performs one comparison and returns `Error::Assertion` on
//! mismatch, so a test body can bail out with `?`. The engine records the
//! failure as a FAIL result. A custom message replaces the default text.

use std::fmt::{Debug, Display};
use std::ops::Sub;

use crate::common::{Error, Result};

fn fail(message: Option<&str>, default: impl FnOnce() -> String) -> Error {
    Error::Assertion(message.map(str::to_string).unwrap_or_else(default))
}

pub fn assert_true(condition: bool, message: Option<&str>) -> Result<()> {
    if !condition {
        return Err(fail(message, || "Assertion failed: expected true".to_string()));
    }
    Ok(())
}

pub fn assert_false(condition: bool, message: Option<&str>) -> Result<()> {
    if condition {
        return Err(fail(message, || "Assertion failed: expected false".to_string()));
    }
    Ok(())
}

/// Both sides share one type, so no implicit conversion takes place
pub fn assert_equal<T: PartialEq + Debug>(actual: T, expected: T, message: Option<&str>) -> Result<()> {
    if actual != expected {
        return Err(fail(message, || {
            format!("Assertion failed: expected {expected:?} but got {actual:?}")
        }));
    }
    Ok(())
}

pub fn assert_not_equal<T: PartialEq + Debug>(
    actual: T,
    not_expected: T,
    message: Option<&str>,
) -> Result<()> {
    if actual == not_expected {
        return Err(fail(message, || {
            format!("Assertion failed: expected not to equal {not_expected:?}")
        }));
    }
    Ok(())
}

/// Inclusive on both bounds
pub fn assert_in_range<T: PartialOrd + Display>(
    value: T,
    min: T,
    max: T,
    message: Option<&str>,
) -> Result<()> {
    if value < min || value > max {
        return Err(fail(message, || {
            format!("Assertion failed: {value} not in range [{min}, {max}]")
        }));
    }
    Ok(())
}

/// `|actual - expected| <= tolerance`
pub fn assert_approx_equal<T>(actual: T, expected: T, tolerance: T, message: Option<&str>) -> Result<()>
where
    T: PartialOrd + Sub<Output = T> + Display + Copy,
{
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    if diff > tolerance {
        return Err(fail(message, || {
            format!("Assertion failed: {actual} not within ±{tolerance} of {expected} (diff: {diff})")
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_bounds_are_inclusive() {
        assert!(assert_in_range(5, 0, 10, None).is_ok());
        assert!(assert_in_range(0, 0, 10, None).is_ok());
        assert!(assert_in_range(10, 0, 10, None).is_ok());
    }

    #[test]
    fn test_in_range_failure_names_value_and_bounds() {
        let err = assert_in_range(15, 0, 10, None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("15"));
        assert!(message.contains("[0, 10]"));
        assert!(err.is_assertion());
    }

    #[test]
    fn test_equal_messages() {
        assert!(assert_equal(1, 1, None).is_ok());
        let err = assert_equal("high", "low", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Assertion failed: expected \"low\" but got \"high\""
        );

        let err = assert_not_equal(3u8, 3u8, None).unwrap_err();
        assert_eq!(err.to_string(), "Assertion failed: expected not to equal 3");
    }

    #[test]
    fn test_custom_message_replaces_default() {
        let err = assert_true(false, Some("DIO 8 should read 1")).unwrap_err();
        assert_eq!(err.to_string(), "DIO 8 should read 1");
        assert!(assert_false(false, Some("unused")).is_ok());
        assert!(assert_false(true, None).is_err());
    }

    #[test]
    fn test_approx_equal() {
        assert!(assert_approx_equal(3.3, 3.25, 0.1, None).is_ok());
        assert!(assert_approx_equal(3.25, 3.3, 0.1, None).is_ok());
        let err = assert_approx_equal(5.0, 3.3, 0.1, None).unwrap_err();
        assert!(err.to_string().contains("±0.1"));
    }
}
