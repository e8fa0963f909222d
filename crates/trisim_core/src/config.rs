//! Run configuration: typed view of the JSON configuration file.
//!
//! Missing required keys surface as fatal [`ConfigError`]s naming the
//! offending key, before any simulation work begins. Parameter maps keep
//! their insertion order so sweep expansion stays deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::handler::HandlerConfig;
use crate::intercept::InterceptMode;
use crate::jobs::Params;

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub paths: PathsConfig,
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub simulation_parameters: Params,
    #[serde(default)]
    pub co_simulation: Option<CoSimulationConfig>,
    #[serde(default)]
    pub sensitivity_analysis: Option<SensitivityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub package_path: PathBuf,
    pub results_dir: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSettings {
    pub model_name: String,
    pub stop_time: f64,
    pub step_size: f64,
    #[serde(rename = "variableFilter")]
    pub variable_filter: String,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Keep per-job scratch directories instead of deleting them right
    /// after their results are ingested.
    #[serde(default)]
    pub keep_temp_files: bool,
    /// Also write the legacy wide CSV export with `&param=value` column
    /// suffixes next to the columnar store.
    #[serde(default)]
    pub legacy_wide_export: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoSimulationConfig {
    #[serde(default)]
    pub mode: InterceptMode,
    pub handlers: Vec<HandlerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensitivityConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub metrics_definition: BTreeMap<String, MetricDefinition>,
    #[serde(default)]
    pub analysis_case: Option<AnalysisCase>,
}

/// How one summary metric is computed, or, for `bisection_search`,
/// the parameters of an optimization task.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricDefinition {
    pub method: String,
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub parameter_to_optimize: Option<String>,
    #[serde(default)]
    pub search_range: Option<[f64; 2]>,
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub metric_name: Option<String>,
    /// Target threshold(s) for optimization; a list runs one independent
    /// search per threshold.
    #[serde(default)]
    pub metric_max_value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisCase {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub independent_variable: Option<String>,
    #[serde(default)]
    pub independent_variable_sampling: Option<Value>,
    #[serde(default)]
    pub dependent_variables: Vec<String>,
    /// Defaults used to reconstruct baseline jobs so a reference curve is
    /// always present in the sweep.
    #[serde(default)]
    pub default_simulation_values: Option<Params>,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.package_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey("paths.package_path"));
        }
        if self.paths.results_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey("paths.results_dir"));
        }
        if self.simulation.model_name.is_empty() {
            return Err(ConfigError::MissingKey("simulation.model_name"));
        }
        if self.simulation.variable_filter.is_empty() {
            return Err(ConfigError::MissingKey("simulation.variableFilter"));
        }
        if !(self.simulation.stop_time > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "simulation.stop_time",
                reason: format!("must be positive, got {}", self.simulation.stop_time),
            });
        }
        if !(self.simulation.step_size > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "simulation.step_size",
                reason: format!("must be positive, got {}", self.simulation.step_size),
            });
        }
        if let Some(co_sim) = &self.co_simulation {
            if co_sim.handlers.is_empty() {
                return Err(ConfigError::MissingKey("co_simulation.handlers"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "paths": {
                "package_path": "models/Cycle.mo",
                "results_dir": "results"
            },
            "simulation": {
                "model_name": "Cycle.System",
                "stop_time": 8760.0,
                "step_size": 1.0,
                "variableFilter": "time|sds\\.inventory"
            }
        })
    }

    #[test]
    fn test_minimal_config_parses() {
        let config: RunConfig = serde_json::from_value(minimal_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.paths.temp_dir, PathBuf::from("temp"));
        assert!(!config.simulation.concurrent);
        assert!(config.co_simulation.is_none());
    }

    #[test]
    fn test_nonpositive_stop_time_names_key() {
        let mut json = minimal_json();
        json["simulation"]["stop_time"] = serde_json::json!(0.0);
        let config: RunConfig = serde_json::from_value(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("simulation.stop_time"));
    }

    #[test]
    fn test_empty_handlers_rejected() {
        let mut json = minimal_json();
        json["co_simulation"] = serde_json::json!({ "mode": "interceptor", "handlers": [] });
        let config: RunConfig = serde_json::from_value(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("co_simulation.handlers"));
    }

    #[test]
    fn test_optimization_metric_definition_parses() {
        let mut json = minimal_json();
        json["sensitivity_analysis"] = serde_json::json!({
            "enabled": true,
            "metrics_definition": {
                "Required_TBR": {
                    "method": "bisection_search",
                    "parameter_to_optimize": "blanket.TBR",
                    "search_range": [1.0, 1.5],
                    "tolerance": 0.001,
                    "max_iterations": 10,
                    "metric_name": "Self_Sufficiency_Time",
                    "source_column": "sds.inventory",
                    "metric_max_value": [8760.0, 17520.0]
                }
            },
            "analysis_case": {
                "independent_variable": "i_iss.T",
                "dependent_variables": ["Required_TBR"]
            }
        });
        let config: RunConfig = serde_json::from_value(json).unwrap();
        let sa = config.sensitivity_analysis.as_ref().unwrap();
        let def = sa.metrics_definition.get("Required_TBR").unwrap();
        assert_eq!(def.search_range, Some([1.0, 1.5]));
        assert!(def.metric_max_value.as_ref().unwrap().is_array());
    }
}
