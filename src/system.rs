use crate::error::EvalError;

/// A whitelisted function. Arguments arrive already evaluated, in source order.
pub type Builtin = fn(&[f64]) -> Result<f64, EvalError>;

/// The only functions a formula may call. Names are matched case-sensitively.
pub const FUNCTIONS: &[(&str, Builtin)] = &[("ROUND", round), ("MAX", max), ("MIN", min)];

pub fn lookup(name: &str) -> Option<Builtin> {
    FUNCTIONS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, builtin)| *builtin)
}

/// `ROUND(x)` or `ROUND(x, ndigits)`, rounding half to even.
pub fn round(input: &[f64]) -> Result<f64, EvalError> {
    let (value, digits) = match input {
        [value] => (*value, 0.0),
        [value, digits] => (*value, *digits),
        _ => {
            return Err(EvalError::arguments(
                "ROUND",
                format!("expected 1 or 2 arguments, got {}", input.len()),
            ));
        }
    };
    if digits.fract() != 0.0 {
        return Err(EvalError::arguments(
            "ROUND",
            format!("ndigits must be a whole number, got {digits}"),
        ));
    }

    // Saturating cast; anything past ±i32::MAX behaves like the extremes below.
    let digits = digits as i32;
    if !value.is_finite() {
        return Ok(value);
    }
    if digits >= 0 {
        // Every f64 is exact within this many decimals.
        if digits > MAX_EXACT_DECIMALS {
            return Ok(value);
        }
        // Formatting rounds the exact binary value half to even, so 2.675 (stored just below
        // it) becomes 2.67.
        format!("{:.*}", digits as usize, value)
            .parse::<f64>()
            .map_err(|e| EvalError::arguments("ROUND", e.to_string()))
    } else {
        let divisor = 10f64.powi(digits.saturating_neg());
        if !divisor.is_finite() {
            return Ok(0.0 * value.signum());
        }
        Ok((value / divisor).round_ties_even() * divisor)
    }
}

const MAX_EXACT_DECIMALS: i32 = 1074;

pub fn max(input: &[f64]) -> Result<f64, EvalError> {
    let mut max = None;

    for &number in input {
        max = Some(match max {
            Some(current_max) if current_max >= number => current_max,
            _ => number,
        });
    }

    max.ok_or_else(|| EvalError::arguments("MAX", "requires at least one argument"))
}

pub fn min(input: &[f64]) -> Result<f64, EvalError> {
    let mut min = None;

    for &number in input {
        min = Some(match min {
            Some(current_min) if current_min <= number => current_min,
            _ => number,
        });
    }

    min.ok_or_else(|| EvalError::arguments("MIN", "requires at least one argument"))
}
