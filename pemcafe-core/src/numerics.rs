//! Guarded arithmetic used by the state-transition engine.
//!
//! Every helper returns `0.0` instead of a non-finite value. A near-zero denominator,
//! a negative base raised to a fractional power or an overflowing exponential are
//! treated as "no flux" for that period rather than as a failure.

use crate::FloatValue;

/// Denominators with a magnitude below this are treated as zero.
pub const NEAR_ZERO: FloatValue = 1e-10;

/// Test whether a value is within [`NEAR_ZERO`] of zero
pub fn is_near_zero(value: FloatValue) -> bool {
    value.abs() < NEAR_ZERO
}

/// `numerator / denominator`, or 0 when the denominator is near zero.
pub fn safe_div(numerator: FloatValue, denominator: FloatValue) -> FloatValue {
    if is_near_zero(denominator) {
        return 0.0;
    }
    finite_or_zero(numerator / denominator)
}

/// `base^exponent`, or 0 when the result is undefined or overflows.
pub fn safe_powf(base: FloatValue, exponent: FloatValue) -> FloatValue {
    finite_or_zero(base.powf(exponent))
}

/// `e^x`, or 0 on overflow.
pub fn safe_exp(x: FloatValue) -> FloatValue {
    finite_or_zero(x.exp())
}

fn finite_or_zero(value: FloatValue) -> FloatValue {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
