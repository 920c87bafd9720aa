use chrono::{TimeZone, Utc};

use crate::error::{Error, Reason, Result};
use crate::ir::Value;

/// Applies a named value transformer, as referenced by a mapping entry's
/// `native_value`/`ocsf_value` key. `None` is the common case (no
/// transformation) and returns `value` unchanged.
pub fn run_transformer(name: Option<&str>, value: &Value) -> Result<Value> {
    let Some(name) = name else {
        return Ok(value.clone());
    };
    match name {
        "to_int" => to_int(value),
        "to_float" => to_float(value),
        "to_str" => Ok(Value::Str(value.to_string())),
        "lowercase" => with_str(value, |s| s.to_lowercase()),
        "uppercase" => with_str(value, |s| s.to_uppercase()),
        "basename" => with_str(value, |s| {
            s.rsplit(['/', '\\']).next().unwrap_or(s).to_string()
        }),
        "epoch_seconds" => epoch_to_timestamp(value, 1),
        "epoch_millis" => epoch_to_timestamp(value, 1_000),
        other => Err(Error::new(Reason::InvalidMapping {
            message: format!("unknown value transformer `{other}`"),
        })),
    }
}

fn with_str(value: &Value, f: impl FnOnce(&str) -> String) -> Result<Value> {
    match value {
        Value::Str(s) => Ok(Value::Str(f(s))),
        Value::Null => Ok(Value::Null),
        other => Err(Error::new(Reason::InvalidComparison {
            message: format!("transformer expected a string, got {}", other.type_name()),
        })),
    }
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Int(_) => Ok(value.clone()),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Str(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::new(Reason::InvalidComparison {
                message: format!("cannot convert `{s}` to int"),
            })),
        Value::Null => Ok(Value::Null),
        other => Err(Error::new(Reason::InvalidComparison {
            message: format!("cannot convert {} to int", other.type_name()),
        })),
    }
}

fn to_float(value: &Value) -> Result<Value> {
    match value {
        Value::Float(_) => Ok(value.clone()),
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Str(s) => s
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::new(Reason::InvalidComparison {
                message: format!("cannot convert `{s}` to float"),
            })),
        Value::Null => Ok(Value::Null),
        other => Err(Error::new(Reason::InvalidComparison {
            message: format!("cannot convert {} to float", other.type_name()),
        })),
    }
}

fn epoch_to_timestamp(value: &Value, unit_per_second: i64) -> Result<Value> {
    let seconds = match value {
        Value::Int(i) => *i / unit_per_second,
        Value::Float(f) => (*f as i64) / unit_per_second,
        Value::Null => return Ok(Value::Null),
        other => {
            return Err(Error::new(Reason::InvalidComparison {
                message: format!("cannot convert {} to a timestamp", other.type_name()),
            }))
        }
    };
    Utc.timestamp_opt(seconds, 0)
        .single()
        .map(Value::Timestamp)
        .ok_or_else(|| {
            Error::new(Reason::InvalidComparison {
                message: format!("epoch value {seconds} is out of range"),
            })
        })
}
