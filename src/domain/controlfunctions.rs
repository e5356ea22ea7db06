//! The `controlfunctions` control module
//!
//! `keras_*` functions serve the stream transport, `control_*` functions the
//! HTTP transport; the configured prefix decides which set a registry gets.

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::utils::{fit_length, flatten_numbers};
use crate::errors::MethodError;
use crate::rpc::registry::{arg, method_fn, Arity, Method};

pub const MODULE_NAME: &str = "controlfunctions";

const SECONDS_PER_DAY: f64 = 86_400.0;
const FLOWRATE_ARG_COUNT: usize = 13;
/// Upper bound on the zero-padded log vector a controller may ask for.
pub const MAX_LOG_VALUES: usize = 256;

pub fn functions() -> Vec<(&'static str, Arc<dyn Method>)> {
    vec![
        ("keras_test_numpy", method_fn(Arity::Exact(1), keras_test_numpy)),
        ("control_flowrate", control_flowrate()),
    ]
}

#[derive(Debug, Deserialize)]
struct FeatureBatch {
    feature: Value,
    rows: usize,
    cols: usize,
}

/// Reshapes `feature` into `rows x cols` and predicts one value per row.
///
/// The prediction stands in for a model: it is the last column of each row.
/// Returns `[predictions, rows]`.
pub fn keras_test_numpy(params: &[Value]) -> Result<Value, MethodError> {
    let batch: FeatureBatch = arg(params, 0)?;
    let values = flatten_numbers(&batch.feature, 0)?;

    let expected = batch.rows.checked_mul(batch.cols);
    if batch.cols == 0 || expected != Some(values.len()) {
        return Err(MethodError::failed(format!(
            "cannot reshape array of size {} into shape ({}, {})",
            values.len(),
            batch.rows,
            batch.cols
        )));
    }

    let predictions: Vec<f64> = values
        .chunks_exact(batch.cols)
        .map(|row| row[batch.cols - 1])
        .collect();
    let count = predictions.len();
    Ok(json!([predictions, count]))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FlowrateParameters {
    on_delta: f64,
    off_delta: f64,
    flowrate: f64,
}

impl Default for FlowrateParameters {
    fn default() -> Self {
        Self {
            on_delta: 6.0,
            off_delta: 2.0,
            flowrate: 40.0,
        }
    }
}

#[derive(Debug, Default)]
struct FlowrateState {
    pump_on: bool,
    last_day: Option<i64>,
}

/// Hysteresis pump controller using the plugin-controller callback signature:
/// `(simulationTime, status, sensors, sensorsUsed, properties, propertiesStr,
/// preRun, controlSignalsUsed, numLogValues, stage, fixedTimestep,
/// verboseLevel, parameters)`.
///
/// `sensors[0]` is the collector and `sensors[1]` the tank temperature.
/// Returns `[control_signals, log_values, timepoints]`.
pub fn control_flowrate() -> Arc<dyn Method> {
    let state = Mutex::new(FlowrateState::default());

    method_fn(Arity::Exact(FLOWRATE_ARG_COUNT), move |params| {
        let simulation_time: f64 = arg(params, 0)?;
        let sensors = flatten_numbers(&arg::<Value>(params, 2)?, 2)?;
        let num_log_values: usize = arg(params, 8)?;
        if num_log_values > MAX_LOG_VALUES {
            return Err(MethodError::invalid_argument(
                8,
                format!("numLogValues {num_log_values} exceeds the maximum of {MAX_LOG_VALUES}"),
            ));
        }
        let parameters: FlowrateParameters =
            arg::<Option<FlowrateParameters>>(params, 12)?.unwrap_or_default();

        let &[collector, tank, ..] = sensors.as_slice() else {
            return Err(MethodError::invalid_argument(
                2,
                "expected collector and tank temperatures",
            ));
        };

        let mut state = state
            .lock()
            .map_err(|_| MethodError::failed("flowrate controller state poisoned"))?;

        let day = (simulation_time / SECONDS_PER_DAY).floor() as i64;
        if state.last_day != Some(day) {
            debug!(day, "flowrate controller entered new simulation day");
            state.last_day = Some(day);
        }

        let difference = collector - tank;
        if difference > parameters.on_delta {
            state.pump_on = true;
        } else if difference < parameters.off_delta {
            state.pump_on = false;
        }

        let flowrate = if state.pump_on {
            parameters.flowrate
        } else {
            0.0
        };
        let pump = if state.pump_on { 1.0 } else { 0.0 };
        let log_values = fit_length(vec![difference, pump], num_log_values);
        let timepoints: Vec<i64> = Vec::new();

        Ok(json!([[flowrate], log_values, timepoints]))
    })
}
