//! Scalar metrics extracted from simulation time series.
//!
//! All metrics operate on one variable column paired with the `time`
//! column of a cleaned result CSV. Time-based metrics return NaN when the
//! series has no clear feature (no turning point, never doubles); callers
//! treat NaN as "constraint not met".

use std::path::Path;

use serde_json::Value;

use crate::config::MetricDefinition;
use crate::error::StoreError;
use crate::jobs::Params;

/// A variable column aligned with its time column.
#[derive(Debug, Clone)]
pub struct Series {
    pub time: Vec<f64>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Load one variable column (plus `time`) from a result CSV.
pub fn read_series(path: &Path, column: &str) -> Result<Series, StoreError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let time_idx = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("time"))
        .ok_or_else(|| StoreError::MissingColumn {
            file: path.to_path_buf(),
            column: "time".to_string(),
        })?;
    let value_idx = headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| StoreError::MissingColumn {
            file: path.to_path_buf(),
            column: column.to_string(),
        })?;

    let mut series = Series {
        time: Vec::new(),
        values: Vec::new(),
    };
    for record in reader.records() {
        let record = record?;
        let time: f64 = record
            .get(time_idx)
            .and_then(|f| f.trim().parse().ok())
            .unwrap_or(f64::NAN);
        let value: f64 = record
            .get(value_idx)
            .and_then(|f| f.trim().parse().ok())
            .unwrap_or(f64::NAN);
        if time.is_nan() {
            continue;
        }
        series.time.push(time);
        series.values.push(value);
    }
    Ok(series)
}

fn argmin(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if v >= current => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Value at the final timestep.
pub fn final_value(series: &Series) -> f64 {
    series.values.last().copied().unwrap_or(f64::NAN)
}

/// Inventory consumed before the minimum: initial value minus minimum.
pub fn startup_inventory(series: &Series) -> f64 {
    let Some(&initial) = series.values.first() else {
        return f64::NAN;
    };
    let minimum = series
        .values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::INFINITY, f64::min);
    initial - minimum
}

/// Time of the series' turning point (minimum).
///
/// The series is smoothed with a centered rolling mean (window 0.1% of the
/// length) to find the trend minimum. If that minimum falls within the
/// last 30% of the series the trend is considered monotonic and NaN is
/// returned; otherwise the time of the absolute minimum in the original
/// data is returned.
pub fn turning_point_time(series: &Series) -> f64 {
    let n = series.values.len();
    if n == 0 {
        return f64::NAN;
    }

    let window = ((n as f64) * 0.001).max(1.0) as usize;
    let half = window / 2;
    let mut smoothed = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + (window - half)).min(n);
        let slice = &series.values[lo..hi];
        let (sum, count) = slice
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        smoothed.push(if count > 0 { sum / count as f64 } else { f64::NAN });
    }

    let Some(smooth_min_pos) = argmin(&smoothed) else {
        return f64::NAN;
    };
    let tail_threshold = ((n as f64) * 0.3) as usize;
    if smooth_min_pos >= n - tail_threshold {
        return f64::NAN;
    }
    match argmin(&series.values) {
        Some(min_pos) => series.time[min_pos],
        None => f64::NAN,
    }
}

/// Time until the series doubles its initial value, measured after the
/// minimum. NaN if it never doubles.
pub fn doubling_time(series: &Series) -> f64 {
    let Some(&initial) = series.values.first() else {
        return f64::NAN;
    };
    let doubled = 2.0 * initial;
    let Some(min_pos) = argmin(&series.values) else {
        return f64::NAN;
    };
    for i in min_pos..series.values.len() {
        if series.values[i] >= doubled {
            return series.time[i];
        }
    }
    f64::NAN
}

/// Metric calculation methods addressable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricMethod {
    FinalValue,
    StartupInventory,
    TurningPointTime,
    DoublingTime,
}

impl MetricMethod {
    /// Resolve a configured method name; `None` for methods this module
    /// does not compute directly (e.g. `bisection_search`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "final_value" => Some(Self::FinalValue),
            "calculate_startup_inventory" => Some(Self::StartupInventory),
            "time_of_turning_point" => Some(Self::TurningPointTime),
            "calculate_doubling_time" => Some(Self::DoublingTime),
            _ => None,
        }
    }

    pub fn evaluate(self, series: &Series) -> f64 {
        match self {
            Self::FinalValue => final_value(series),
            Self::StartupInventory => startup_inventory(series),
            Self::TurningPointTime => turning_point_time(series),
            Self::DoublingTime => doubling_time(series),
        }
    }
}

/// Compute every directly-computable metric for one job's result file.
/// Optimization-driven metrics (`bisection_search`) are skipped here; the
/// sweep merges those separately. A metric whose source column is missing
/// is skipped with a warning rather than failing the job.
pub fn calculate_job_metrics(
    result_path: &Path,
    metrics_definition: &std::collections::BTreeMap<String, MetricDefinition>,
) -> Params {
    let mut results = Params::new();
    for (metric_name, definition) in metrics_definition {
        if definition.method == "bisection_search" {
            continue;
        }
        let Some(method) = MetricMethod::from_name(&definition.method) else {
            tracing::warn!(
                metric = %metric_name,
                method = %definition.method,
                "unknown metric calculation method, skipping"
            );
            continue;
        };
        let Some(source_column) = definition.source_column.as_deref() else {
            tracing::warn!(metric = %metric_name, "metric has no source_column, skipping");
            continue;
        };
        match read_series(result_path, source_column) {
            Ok(series) => {
                let value = method.evaluate(&series);
                let json = serde_json::Number::from_f64(value)
                    .map_or(Value::Null, Value::Number);
                results.insert(metric_name.clone(), json);
            }
            Err(e) => {
                tracing::warn!(metric = %metric_name, error = %e, "failed to read metric source");
            }
        }
    }
    results
}
