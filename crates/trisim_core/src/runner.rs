//! Per-job execution.
//!
//! The co-simulation runner executes one job end-to-end in an isolated
//! scratch workspace: a stage-1 run of the unmodified model captures the
//! primary inputs feeding each handler, the handlers produce override CSVs
//! plus column mappings, the model is intercepted, and a stage-2 run of
//! the intercepted model yields the final result. A failed job returns
//! nothing and the sweep continues; scratch cleanup is the sweep's job
//! once results are ingested.

use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::engine::{Engine, EngineSession, SimulationOptions, format_parameter_value};
use crate::error::{StoreError, SweepError};
use crate::handler::{HandlerConfig, HandlerRegistry, OutputPlaceholder};
use crate::intercept::{
    InterceptMode, InterceptionConfig, final_model_name, integrate_interception,
};
use crate::jobs::Params;
use crate::workspace::{JobWorkspace, get_unique_filename};

/// Clean a simulation result CSV in place: drop rows with missing time,
/// and for duplicated time values keep only the last occurrence (the
/// engine emits duplicate timestamps at event points).
pub fn clean_result_csv(path: &Path) -> Result<(), StoreError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let time_idx = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("time"))
        .ok_or_else(|| StoreError::MissingColumn {
            file: path.to_path_buf(),
            column: "time".to_string(),
        })?;

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let time = record
            .get(time_idx)
            .and_then(|f| f.trim().parse::<f64>().ok());
        match time {
            Some(t) if !t.is_nan() => rows.push(record),
            _ => {}
        }
    }
    drop(reader);

    // Keep the last occurrence of each time value, preserving row order.
    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());
    for record in rows.into_iter().rev() {
        let time_bits = record
            .get(time_idx)
            .and_then(|f| f.trim().parse::<f64>().ok())
            .map(f64::to_bits)
            .unwrap_or(0);
        if seen.insert(time_bits) {
            kept.push(record);
        }
    }
    kept.reverse();

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&headers)?;
    for record in &kept {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Build the stage-1 variable filter covering exactly the input ports of
/// every handler's target submodel (plus time), with regex-escaped names
/// and index patterns for vector ports.
pub(crate) fn input_variable_filter(
    session: &mut dyn EngineSession,
    handlers: &[HandlerConfig],
) -> Result<String, SweepError> {
    let mut input_vars = Vec::new();
    for handler in handlers {
        tracing::info!(
            submodel = %handler.submodel_name,
            "identifying input ports for submodel"
        );
        let ports = session.input_ports(&handler.submodel_name)?;
        if ports.is_empty() {
            tracing::warn!(
                submodel = %handler.submodel_name,
                "no input ports found in submodel"
            );
            continue;
        }
        tracing::info!(
            instance = %handler.instance_name,
            input_ports = ?ports.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "found input ports for instance"
        );
        for port in ports {
            let mut full = format!("{}.{}", handler.instance_name, port.name).replace('.', "\\.");
            if port.dim > 1 {
                full.push_str(&format!("\\[[1-{}]\\]", port.dim));
            }
            input_vars.push(full);
        }
    }
    Ok(format!("time|{}", input_vars.join("|")))
}

/// Derive an output placeholder from the submodel's declared output
/// ports, assigning consecutive CSV data columns starting at 2 after the
/// leading time column.
pub(crate) fn derive_placeholder(
    session: &mut dyn EngineSession,
    submodel_name: &str,
) -> Result<OutputPlaceholder, SweepError> {
    let ports = session.output_ports(submodel_name)?;
    let mut placeholder = OutputPlaceholder::new();
    let mut next_column = 2usize;
    for port in ports {
        let mut columns = vec!["1".to_string()];
        columns.extend((next_column..next_column + port.dim).map(|c| c.to_string()));
        next_column += port.dim;
        placeholder.insert(port.name, format!("{{{}}}", columns.join(",")));
    }
    Ok(placeholder)
}

/// What a successful co-simulation job leaves behind: the stage-2 result
/// and how to load the intercepted model again (for per-job optimization
/// probes).
#[derive(Debug, Clone)]
pub struct CoSimOutcome {
    pub result_path: PathBuf,
    /// Model files to load, in order, to reconstruct the stage-2 model.
    pub stage2_files: Vec<PathBuf>,
    pub final_model_name: String,
}

/// Executes one co-simulation job end-to-end in its own scratch
/// workspace.
pub struct CoSimulationRunner<'a> {
    pub config: &'a RunConfig,
    pub engine: &'a dyn Engine,
    pub handlers: &'a HandlerRegistry,
}

impl CoSimulationRunner<'_> {
    /// Run one job. Returns the stage-2 outcome, or `None` on any
    /// failure (logged with context); callers must treat `None` as "this
    /// job failed" and continue with remaining jobs.
    pub fn run(&self, job_params: &Params, job_id: usize) -> Option<CoSimOutcome> {
        let temp_dir = &self.config.paths.temp_dir;
        let workspace = match JobWorkspace::create(temp_dir, job_id) {
            Ok(workspace) => workspace,
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to create job workspace");
                return None;
            }
        };
        match self.try_run(&workspace, job_params, job_id) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(
                    job_id,
                    params = %serde_json::Value::Object(job_params.clone()),
                    error = %e,
                    "co-simulation workflow failed"
                );
                if !self.config.simulation.keep_temp_files {
                    workspace.remove();
                }
                None
            }
        }
    }

    fn try_run(
        &self,
        workspace: &JobWorkspace,
        job_params: &Params,
        job_id: usize,
    ) -> Result<CoSimOutcome, SweepError> {
        let sim = &self.config.simulation;
        let co_sim = self
            .config
            .co_simulation
            .as_ref()
            .ok_or(SweepError::Config(crate::error::ConfigError::MissingKey(
                "co_simulation",
            )))?;

        // Isolate the model package so concurrent jobs cannot interfere
        // through shared engine state or shared files.
        let isolated_package = workspace.isolate_package(&self.config.paths.package_path)?;

        // Relocate handler-referenced asset directories into the
        // workspace, rewriting their paths.
        let mut handlers = co_sim.handlers.clone();
        for handler in &mut handlers {
            let keys: Vec<String> = handler.params.keys().cloned().collect();
            for key in keys {
                if !key.ends_with("_path") {
                    continue;
                }
                let Some(original) = handler.params.get(&key).and_then(|v| v.as_str()) else {
                    continue;
                };
                if let Some(relocated) = workspace.relocate_asset(Path::new(original))? {
                    tracing::info!(
                        job_id,
                        parameter_key = %key,
                        new_path = %relocated.display(),
                        "updated asset parameter path"
                    );
                    handler.params.insert(
                        key,
                        serde_json::Value::String(relocated.display().to_string()),
                    );
                }
            }
        }

        let param_settings: Vec<String> = job_params
            .iter()
            .map(|(name, value)| format_parameter_value(name, value))
            .collect();

        // Stage 1: run the unmodified model, capturing only the inputs
        // that feed the handlers.
        let mut stage1 = self.engine.open_session(workspace.path())?;
        let stage1_result = (|| -> Result<PathBuf, SweepError> {
            stage1.load(&isolated_package)?;
            let filter = input_variable_filter(stage1.as_mut(), &handlers)?;
            stage1.set_simulation_options(SimulationOptions {
                stop_time: sim.stop_time,
                step_size: sim.step_size,
                tolerance: None,
                variable_filter: Some(filter),
            });
            if !param_settings.is_empty() {
                tracing::info!(job_id, settings = ?param_settings, "applying parameters for job");
                stage1.set_parameters(&param_settings);
            }
            let primary = get_unique_filename(workspace.path(), "primary_inputs.csv");
            stage1.simulate(&sim.model_name, &primary)?;
            clean_result_csv(&primary)?;
            Ok(primary)
        })();

        let primary_csv = match stage1_result {
            Ok(path) => path,
            Err(e) => {
                stage1.terminate();
                return Err(e);
            }
        };

        // Handlers: compute the override series for each intercepted
        // submodel from the stage-1 inputs.
        let mut interception_configs = Vec::new();
        let handler_result = (|| -> Result<(), SweepError> {
            for handler in &handlers {
                let implementation = self.handlers.resolve(handler)?;
                let output_csv = get_unique_filename(
                    workspace.path(),
                    &format!("{}_outputs.csv", handler.instance_name),
                );
                let returned =
                    implementation.run(&primary_csv, &output_csv, &handler.params)?;
                if !output_csv.exists() {
                    return Err(SweepError::Handler(
                        crate::error::HandlerError::OutputMissing(output_csv),
                    ));
                }

                let placeholder = if let Some(explicit) = &handler.output_placeholder {
                    explicit.clone()
                } else if !returned.is_empty() {
                    returned
                } else {
                    tracing::info!(
                        job_id,
                        submodel = %handler.submodel_name,
                        "no output placeholder configured or returned, deriving from output ports"
                    );
                    derive_placeholder(stage1.as_mut(), &handler.submodel_name)?
                };

                interception_configs.push(InterceptionConfig {
                    submodel_name: handler.submodel_name.clone(),
                    instance_name: handler.instance_name.clone(),
                    csv_uri: output_csv
                        .canonicalize()
                        .unwrap_or(output_csv)
                        .display()
                        .to_string()
                        .replace('\\', "/"),
                    output_placeholder: placeholder,
                    mode: co_sim.mode,
                });
            }
            Ok(())
        })();

        if let Err(e) = handler_result {
            stage1.terminate();
            return Err(e);
        }

        // Interception: rewire the model graph around the handler CSVs.
        let interception = integrate_interception(
            stage1.as_mut(),
            &isolated_package,
            &sim.model_name,
            &interception_configs,
        );
        stage1.terminate();
        let interception = interception?;

        // Stage 2: run the intercepted model with the user's full
        // variable filter.
        tracing::info!(job_id, "proceeding with final simulation");
        let stage2_files: Vec<PathBuf> = match co_sim.mode {
            InterceptMode::Replacement => vec![isolated_package.clone()],
            InterceptMode::Interceptor => {
                if interception.interceptor_model_paths.is_empty() {
                    // Single-file package: the intercepted variant embeds
                    // everything.
                    vec![interception.system_model_path.clone()]
                } else {
                    let mut files = vec![isolated_package.clone()];
                    files.extend(interception.interceptor_model_paths.iter().cloned());
                    files.push(interception.system_model_path.clone());
                    files
                }
            }
        };
        let final_name = final_model_name(&sim.model_name, co_sim.mode);

        let mut stage2 = self.engine.open_session(workspace.path())?;
        let stage2_result = (|| -> Result<PathBuf, SweepError> {
            for file in &stage2_files {
                stage2.load(file)?;
            }
            stage2.set_simulation_options(SimulationOptions {
                stop_time: sim.stop_time,
                step_size: sim.step_size,
                tolerance: None,
                variable_filter: Some(sim.variable_filter.clone()),
            });
            if !param_settings.is_empty() {
                stage2.set_parameters(&param_settings);
            }
            let result_path = get_unique_filename(workspace.path(), "co_simulation_results.csv");
            stage2.simulate(&final_name, &result_path)?;
            clean_result_csv(&result_path)?;
            Ok(result_path)
        })();
        stage2.terminate();

        let result_path = stage2_result?;
        tracing::info!(
            job_id,
            result_path = %result_path.display(),
            "co-simulation job finished"
        );
        Ok(CoSimOutcome {
            result_path,
            stage2_files,
            final_model_name: final_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_result_csv_drops_nan_and_duplicate_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("res.csv");
        std::fs::write(
            &path,
            "time,x\n0,1\n1,2\n1,3\n,9\n2,4\n",
        )
        .unwrap();
        clean_result_csv(&path).unwrap();
        let cleaned = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = cleaned.lines().collect();
        assert_eq!(lines, vec!["time,x", "0,1", "1,3", "2,4"]);
    }

    #[test]
    fn test_clean_result_csv_missing_time_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("res.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(clean_result_csv(&path).is_err());
    }
}
