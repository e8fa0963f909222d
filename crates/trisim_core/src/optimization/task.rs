//! Optimization task discovery from the run configuration.

use serde_json::Value;

use crate::config::{MetricDefinition, RunConfig};

/// One bisection optimization task, read once per sensitivity-analysis
/// run. A list of `metric_max_value` thresholds drives one independent
/// search per threshold.
#[derive(Debug, Clone)]
pub struct OptimizationTask {
    pub parameter_to_optimize: String,
    pub search_range: (f64, f64),
    pub tolerance: f64,
    pub max_iterations: usize,
    pub metric_name: String,
    pub source_column: String,
    pub metric_max_values: Vec<f64>,
    /// Whether the thresholds came from a list (keys then carry a
    /// human-readable unit suffix).
    pub thresholds_are_list: bool,
}

impl OptimizationTask {
    /// Build a task from its metric definition. Returns `None` when the
    /// definition is not a complete bisection-search task.
    pub fn from_definition(definition: &MetricDefinition, stop_time: f64) -> Option<Self> {
        if definition.method != "bisection_search" {
            return None;
        }
        let parameter_to_optimize = definition.parameter_to_optimize.clone()?;
        let [low, high] = definition.search_range?;
        let tolerance = definition.tolerance?;
        let max_iterations = definition.max_iterations?;

        let (metric_max_values, thresholds_are_list) = match &definition.metric_max_value {
            Some(Value::Array(items)) => (
                items.iter().filter_map(Value::as_f64).collect(),
                true,
            ),
            Some(value) => (value.as_f64().into_iter().collect(), false),
            None => (vec![stop_time], false),
        };

        Some(Self {
            parameter_to_optimize,
            search_range: (low, high),
            tolerance,
            max_iterations,
            metric_name: definition
                .metric_name
                .clone()
                .unwrap_or_else(|| "Self_Sufficiency_Time".to_string()),
            source_column: definition
                .source_column
                .clone()
                .unwrap_or_else(|| "sds.inventory".to_string()),
            metric_max_values,
            thresholds_are_list,
        })
    }
}

/// Identify all valid optimization tasks: dependent variables prefixed
/// `Required_` whose metric definition is a complete bisection-search
/// configuration.
pub fn find_optimization_tasks(config: &RunConfig) -> Vec<(String, OptimizationTask)> {
    let Some(sensitivity) = &config.sensitivity_analysis else {
        return Vec::new();
    };
    let Some(case) = &sensitivity.analysis_case else {
        return Vec::new();
    };

    let mut tasks = Vec::new();
    for variable in &case.dependent_variables {
        if !variable.starts_with("Required_") {
            continue;
        }
        if tasks.iter().any(|(name, _)| name == variable) {
            continue;
        }
        let Some(definition) = sensitivity.metrics_definition.get(variable) else {
            continue;
        };
        if let Some(task) =
            OptimizationTask::from_definition(definition, config.simulation.stop_time)
        {
            tasks.push((variable.clone(), task));
        }
    }
    tasks
}
