//! Shared argument conversions for control functions

use serde_json::Value;

use crate::errors::MethodError;

/// Flattens a (possibly nested) numeric array into row-major order.
///
/// Booleans count as `1.0`/`0.0`.
pub fn flatten_numbers(value: &Value, index: usize) -> Result<Vec<f64>, MethodError> {
    let mut numbers = Vec::new();
    collect_numbers(value, index, &mut numbers)?;
    Ok(numbers)
}

fn collect_numbers(value: &Value, index: usize, out: &mut Vec<f64>) -> Result<(), MethodError> {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_numbers(item, index, out)?;
            }
            Ok(())
        }
        Value::Number(number) => {
            let number = number
                .as_f64()
                .ok_or_else(|| MethodError::invalid_argument(index, "number out of range"))?;
            out.push(number);
            Ok(())
        }
        Value::Bool(flag) => {
            out.push(if *flag { 1.0 } else { 0.0 });
            Ok(())
        }
        _ => Err(MethodError::invalid_argument(
            index,
            "expected only numbers in array",
        )),
    }
}

/// Pads with zeros or truncates `values` to exactly `len` entries.
pub fn fit_length(mut values: Vec<f64>, len: usize) -> Vec<f64> {
    values.resize(len, 0.0);
    values
}
