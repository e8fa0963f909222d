//! Engine-backed bisection probes.
//!
//! Each probe runs one full simulation with the candidate parameter value,
//! cleans the result, extracts the task's metric, and deletes the probe's
//! artifacts immediately so a long search cannot accumulate disk usage.
//! Probes within one task are strictly serial.

use std::path::Path;

use serde_json::Value;

use crate::engine::{EngineSession, format_parameter_value};
use crate::jobs::Params;
use crate::metrics::{
    Series, doubling_time, final_value, read_series, startup_inventory, turning_point_time,
};
use crate::runner::clean_result_csv;

use super::bisection::bisection_search;
use super::task::OptimizationTask;

fn evaluate_bisection_metric(metric_name: &str, series: &Series) -> Option<f64> {
    match metric_name {
        "Self_Sufficiency_Time" => Some(turning_point_time(series)),
        "Doubling_Time" => Some(doubling_time(series)),
        "Startup_Inventory" => Some(startup_inventory(series)),
        "Final_Value" => Some(final_value(series)),
        _ => None,
    }
}

/// Human-readable unit suffix for a threshold given in hours, using 24 h
/// days and 365-day years.
fn threshold_unit(value: f64) -> String {
    if value >= 365.0 * 24.0 / 2.0 {
        format!("{:.2} year", value / (365.0 * 24.0))
    } else if value >= 24.0 {
        format!("{:.2} day", value / 24.0)
    } else {
        format!("{value} h")
    }
}

fn json_metric(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map_or_else(|| Value::String(value.to_string()), Value::Number)
}

/// Run one job's bisection task against an open engine session.
///
/// The session must already have the package loaded and simulation options
/// set. One independent search runs per configured threshold; the returned
/// maps carry the optimal parameter per threshold and the metric value it
/// achieved, keyed with a unit suffix when the thresholds came as a list.
/// A search that never finds a feasible value reports infinity instead of
/// raising.
pub fn run_bisection_for_job(
    session: &mut dyn EngineSession,
    model_name: &str,
    stop_time: f64,
    task_name: &str,
    task: &OptimizationTask,
    base_params: &Params,
    temp_dir: &Path,
    job_prefix: &str,
) -> (Params, Params) {
    let mut optimal_params = Params::new();
    let mut optimal_values = Params::new();

    for &threshold in &task.metric_max_values {
        tracing::info!(
            parameter = %task.parameter_to_optimize,
            search_range = ?task.search_range,
            target_metric = %task.metric_name,
            target_value = %format!("< {threshold}"),
            "starting bisection search"
        );
        let limit = stop_time.min(threshold);

        let outcome = bisection_search(
            task.search_range,
            task.tolerance,
            task.max_iterations,
            limit,
            |iteration, mid| {
                tracing::info!(
                    job_prefix,
                    iteration = iteration + 1,
                    max_iterations = task.max_iterations,
                    parameter = %task.parameter_to_optimize,
                    value = %format!("{mid:.4}"),
                    "bisection search iteration"
                );

                let mut job_params = base_params.clone();
                job_params.insert(
                    task.parameter_to_optimize.clone(),
                    json_metric(mid),
                );
                let settings: Vec<String> = job_params
                    .iter()
                    .map(|(name, value)| format_parameter_value(name, value))
                    .collect();
                session.set_parameters(&settings);

                let iter_workspace = temp_dir
                    .join(job_prefix)
                    .join(format!("iter{iteration}_{mid}"));
                if let Err(e) = std::fs::create_dir_all(&iter_workspace) {
                    tracing::error!(error = %e, "failed to create probe workspace");
                    return None;
                }
                let result_path =
                    iter_workspace.join(format!("iter{iteration}_simulation_results.csv"));

                let metric = (|| {
                    if let Err(e) = session.simulate(model_name, &result_path) {
                        tracing::error!(error = %e, "probe simulation failed");
                        return None;
                    }
                    if let Err(e) = clean_result_csv(&result_path) {
                        tracing::warn!(error = %e, "failed to clean probe result file");
                    }
                    let series = match read_series(&result_path, &task.source_column) {
                        Ok(series) => series,
                        Err(e) => {
                            tracing::error!(error = %e, "probe analysis failed");
                            return None;
                        }
                    };
                    match evaluate_bisection_metric(&task.metric_name, &series) {
                        Some(value) => {
                            tracing::info!(
                                metric = %task.metric_name,
                                metric_value = value,
                                "bisection probe analysis successful"
                            );
                            Some(value)
                        }
                        None => {
                            tracing::error!(
                                metric = %task.metric_name,
                                "unsupported metric for bisection search"
                            );
                            None
                        }
                    }
                })();

                // Probe artifacts are deleted right away to bound disk
                // usage over a long search.
                if let Err(e) = std::fs::remove_dir_all(&iter_workspace) {
                    tracing::warn!(error = %e, "failed to remove probe workspace");
                }
                metric
            },
        );

        if outcome.found_feasible() {
            tracing::info!(
                job_prefix,
                target_value = %format!("< {threshold}"),
                optimal_parameter = %format!("{:.4}", outcome.optimal_parameter),
                "bisection search finished"
            );
        } else {
            tracing::warn!(
                job_prefix,
                target_value = %format!("< {threshold}"),
                "bisection search did not find a successful parameter"
            );
        }

        let value_key_base = format!("{}_for_{}", task.metric_name, task_name);
        let (param_key, value_key) = if task.thresholds_are_list {
            let unit = threshold_unit(threshold);
            (
                format!("{task_name}({unit})"),
                format!("{value_key_base}({unit})"),
            )
        } else {
            (task_name.to_string(), value_key_base)
        };
        optimal_params.insert(param_key, json_metric(outcome.optimal_parameter));
        optimal_values.insert(value_key, json_metric(outcome.optimal_metric));
    }

    (optimal_params, optimal_values)
}
