//! ## Validators
//!
//! Standard validators for command declarations. Each takes the value being written and
//! the command's allowed values, and returns the value to send or `InvalidValue`.
//!

use crate::coder::{Value, Values};
use crate::error::{Error, Result};

fn number(value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::InvalidValue(format!("{value} is not a number")))
}

fn bounds(values: &Values) -> Result<(f64, f64)> {
    values.bounds().ok_or_else(|| {
        Error::InvalidValue(format!("{values:?} does not describe a numeric range"))
    })
}

/// Keep integer values integral when clamped onto an integral bound.
fn like(value: &Value, bound: f64) -> Value {
    match value {
        Value::Int(_) if bound.fract() == 0.0 => Value::Int(bound as i64),
        _ => Value::Float(bound),
    }
}

/// ### Strict Range
///
/// Accept a number inside the inclusive bounds, reject anything else.
///
pub fn strict_range(value: Value, values: &Values) -> Result<Value> {
    let v = number(&value)?;
    let (min, max) = bounds(values)?;
    if min <= v && v <= max {
        Ok(value)
    } else {
        Err(Error::InvalidValue(format!(
            "value of {value} is not in range [{min}, {max}]"
        )))
    }
}

/// ### Truncated Range
///
/// Clamp a number into the inclusive bounds.
///
pub fn truncated_range(value: Value, values: &Values) -> Result<Value> {
    let v = number(&value)?;
    let (min, max) = bounds(values)?;
    if v < min {
        Ok(like(&value, min))
    } else if v > max {
        Ok(like(&value, max))
    } else {
        Ok(value)
    }
}

/// ### Strict Discrete Set
///
/// Accept only members of the allowed values (sequence items or mapping names).
///
pub fn strict_discrete_set(value: Value, values: &Values) -> Result<Value> {
    if values.contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidValue(format!(
            "value of {value} is not in the discrete set {values:?}"
        )))
    }
}

/// ### Truncated Discrete Set
///
/// Round a number up to the next member of a numeric set, or down to the largest member
/// when it exceeds them all.
///
pub fn truncated_discrete_set(value: Value, values: &Values) -> Result<Value> {
    let v = number(&value)?;
    let mut members: Vec<&Value> = match values {
        Values::Sequence(items) => items.iter().collect(),
        Values::Mapping(pairs) => pairs.iter().map(|(name, _)| name).collect(),
        other => {
            return Err(Error::InvalidValue(format!(
                "{other:?} is not a discrete set"
            )))
        }
    };
    if members.iter().any(|m| m.as_f64().is_none()) {
        return Err(Error::InvalidValue(format!("{values:?} is not numeric")));
    }
    members.sort_by(|a, b| a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(std::cmp::Ordering::Equal));

    members
        .iter()
        .find(|m| m.as_f64().is_some_and(|m| m >= v))
        .or(members.last())
        .map(|m| (*m).clone())
        .ok_or_else(|| Error::InvalidValue("empty discrete set".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_range_is_inclusive() {
        let values = Values::range(1.0, 20.0);
        assert_eq!(strict_range(Value::Int(1), &values).unwrap(), Value::Int(1));
        assert_eq!(strict_range(Value::Float(20.0), &values).unwrap(), Value::Float(20.0));
        assert!(matches!(
            strict_range(Value::Float(20.5), &values),
            Err(Error::InvalidValue(_))
        ));
        assert!(matches!(
            strict_range(Value::from("fast"), &values),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn truncated_range_clamps() {
        let values = Values::sequence([0, 10]);
        assert_eq!(truncated_range(Value::Int(-3), &values).unwrap(), Value::Int(0));
        assert_eq!(truncated_range(Value::Float(12.5), &values).unwrap(), Value::Float(10.0));
        assert_eq!(truncated_range(Value::Float(2.5), &values).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn discrete_set_accepts_mapping_names() {
        let values = Values::mapping([("TRIG_BYPASS", 0), ("TRIG_FALLING", 1)]);
        assert!(strict_discrete_set(Value::from("TRIG_FALLING"), &values).is_ok());
        assert!(matches!(
            strict_discrete_set(Value::from("TRIG_RISING"), &values),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn truncated_discrete_set_rounds_up() {
        let values = Values::sequence([100, 10, 1000]);
        assert_eq!(truncated_discrete_set(Value::Int(11), &values).unwrap(), Value::Int(100));
        assert_eq!(truncated_discrete_set(Value::Int(5000), &values).unwrap(), Value::Int(1000));
        assert_eq!(truncated_discrete_set(Value::Int(3), &values).unwrap(), Value::Int(10));
    }
}
