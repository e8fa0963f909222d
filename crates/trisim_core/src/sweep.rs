//! Sweep orchestration.
//!
//! Drives N generated jobs through the per-job runners under one of two
//! execution strategies: sequential (one engine session reused across
//! jobs) or concurrent (the model is compiled once to a standalone
//! executable, then worker threads each supervise one external simulation
//! process per job). Co-simulation jobs always run through the isolated
//! [`CoSimulationRunner`] regardless of strategy.
//!
//! Workers never write to the result store; each sends a
//! `job_id`-correlated outcome message over a channel and the
//! orchestrating thread is the sole writer, ingesting in completion order
//! and deleting the job's scratch directory right after ingestion so very
//! large sweeps stay disk-bounded.

use std::collections::BTreeMap;
use std::path::PathBuf;
#[cfg(feature = "parallel")]
use std::process::Command;

use crate::config::{MetricDefinition, RunConfig};
#[cfg(feature = "parallel")]
use crate::engine::{BuildArtifacts, format_override};
use crate::engine::{Engine, SimulationOptions, format_parameter_value};
use crate::error::SweepError;
use crate::handler::HandlerRegistry;
use crate::jobs::{Params, generate_simulation_jobs, job_identity};
use crate::metrics::calculate_job_metrics;
use crate::optimization::{OptimizationTask, find_optimization_tasks, run_bisection_for_job};
use crate::runner::{CoSimulationRunner, clean_result_csv};
use crate::store::ResultStore;
#[cfg(feature = "parallel")]
use crate::workspace::copy_build_artifacts;
use crate::workspace::{JobWorkspace, get_unique_filename};

/// Sweep-level outcome: how many of the generated jobs produced a result.
#[derive(Debug, Clone, Copy)]
pub struct SweepSummary {
    pub total_jobs: usize,
    pub succeeded: usize,
}

/// One completed job's message from a worker to the orchestrator.
struct JobOutcome {
    job_id: usize,
    params: Params,
    result: Option<PathBuf>,
    /// Per-job summary extras: extracted metrics and optimization outputs.
    extras: Params,
    /// Scratch directory to delete once the result is ingested.
    workspace: Option<PathBuf>,
}

pub struct SweepOrchestrator<'a> {
    config: &'a RunConfig,
    engine: &'a dyn Engine,
    handlers: &'a HandlerRegistry,
}

impl<'a> SweepOrchestrator<'a> {
    pub fn new(
        config: &'a RunConfig,
        engine: &'a dyn Engine,
        handlers: &'a HandlerRegistry,
    ) -> Self {
        Self {
            config,
            engine,
            handlers,
        }
    }

    /// Run the full sweep into the columnar store.
    pub fn run(&self) -> Result<SweepSummary, SweepError> {
        let generated = generate_simulation_jobs(&self.config.simulation_parameters)?;
        let jobs = self.augment_with_baseline_jobs(generated)?;
        let total = jobs.len();

        std::fs::create_dir_all(&self.config.paths.temp_dir)?;
        let mut store = ResultStore::create(&self.config.paths.results_dir)?;

        let tasks = find_optimization_tasks(self.config);
        let metrics_defs = self
            .config
            .sensitivity_analysis
            .as_ref()
            .filter(|s| s.enabled)
            .map(|s| &s.metrics_definition)
            .filter(|d| !d.is_empty());
        let summary_enabled = metrics_defs.is_some() || !tasks.is_empty();
        let keep_temp = self.config.simulation.keep_temp_files;

        let mut completed = 0usize;
        let mut succeeded = 0usize;

        if self.config.co_simulation.is_some() {
            let run_job =
                |job_id: usize, params: &Params| self.co_sim_outcome(job_id, params, &tasks, metrics_defs);

            #[cfg(feature = "parallel")]
            {
                if self.config.simulation.concurrent {
                    let workers = self.worker_count(total);
                    tracing::info!(
                        max_workers = workers,
                        job_count = total,
                        "starting co-simulation in concurrent mode"
                    );
                    run_concurrently(&jobs, workers, &run_job, |outcome| {
                        ingest_outcome(
                            &mut store,
                            outcome,
                            total,
                            &mut completed,
                            &mut succeeded,
                            summary_enabled,
                            keep_temp,
                        )
                    })?;
                } else {
                    tracing::info!("starting co-simulation in sequential mode");
                    for (i, params) in jobs.iter().enumerate() {
                        let outcome = run_job(i + 1, params);
                        ingest_outcome(
                            &mut store,
                            outcome,
                            total,
                            &mut completed,
                            &mut succeeded,
                            summary_enabled,
                            keep_temp,
                        )?;
                    }
                }
            }
            #[cfg(not(feature = "parallel"))]
            {
                if self.config.simulation.concurrent {
                    tracing::warn!("parallel feature disabled, running sequentially");
                }
                for (i, params) in jobs.iter().enumerate() {
                    let outcome = run_job(i + 1, params);
                    ingest_outcome(
                        &mut store,
                        outcome,
                        total,
                        &mut completed,
                        &mut succeeded,
                        summary_enabled,
                        keep_temp,
                    )?;
                }
            }
        } else {
            #[cfg(feature = "parallel")]
            let concurrent = self.config.simulation.concurrent;
            #[cfg(not(feature = "parallel"))]
            let concurrent = {
                if self.config.simulation.concurrent {
                    tracing::warn!("parallel feature disabled, running sequentially");
                }
                false
            };

            if concurrent {
                #[cfg(feature = "parallel")]
                {
                    // Build once, run many: the compile cost is paid a
                    // single time, then every worker invokes the
                    // standalone executable with its own overrides.
                    let artifacts = self.build_model_once()?;
                    let workers = self.worker_count(total);
                    tracing::info!(
                        max_workers = workers,
                        job_count = total,
                        "starting standard simulation in concurrent mode"
                    );
                    let run_job = |job_id: usize, params: &Params| {
                        self.standard_fast_outcome(&artifacts, job_id, params, &tasks, metrics_defs)
                    };
                    run_concurrently(&jobs, workers, &run_job, |outcome| {
                        ingest_outcome(
                            &mut store,
                            outcome,
                            total,
                            &mut completed,
                            &mut succeeded,
                            summary_enabled,
                            keep_temp,
                        )
                    })?;
                }
            } else {
                tracing::info!("starting standard simulation in sequential mode");
                self.run_standard_sequential(&jobs, &tasks, metrics_defs, |outcome| {
                    ingest_outcome(
                        &mut store,
                        outcome,
                        total,
                        &mut completed,
                        &mut succeeded,
                        summary_enabled,
                        keep_temp,
                    )
                })?;
            }
        }

        store.flush()?;
        if self.config.simulation.legacy_wide_export {
            let name = if total == 1 {
                "simulation_result.csv"
            } else {
                "sweep_results.csv"
            };
            let out = get_unique_filename(&self.config.paths.results_dir, name);
            store.export_wide(&out)?;
            tracing::info!(file_path = %out.display(), "legacy wide export saved");
        }

        tracing::info!(succeeded, total, "{succeeded} of {total} jobs produced results");
        Ok(SweepSummary {
            total_jobs: total,
            succeeded,
        })
    }

    /// Append baseline jobs reconstructed from the analysis case's default
    /// simulation values plus the independent-variable sampling, so a
    /// reference curve is always present. Duplicates of existing jobs are
    /// dropped.
    fn augment_with_baseline_jobs(&self, jobs: Vec<Params>) -> Result<Vec<Params>, SweepError> {
        let Some(case) = self
            .config
            .sensitivity_analysis
            .as_ref()
            .and_then(|s| s.analysis_case.as_ref())
        else {
            return Ok(jobs);
        };
        let Some(defaults) = &case.default_simulation_values else {
            return Ok(jobs);
        };
        let (Some(variable), Some(sampling)) = (
            &case.independent_variable,
            &case.independent_variable_sampling,
        ) else {
            return Ok(jobs);
        };

        tracing::info!("found default simulation values, generating baseline jobs");
        let mut baseline_params = defaults.clone();
        baseline_params.insert(variable.clone(), sampling.clone());
        let baseline_jobs = generate_simulation_jobs(&baseline_params)?;

        let mut seen: std::collections::HashSet<String> =
            jobs.iter().map(job_identity).collect();
        let before = jobs.len();
        let mut combined = jobs;
        for job in baseline_jobs {
            if seen.insert(job_identity(&job)) {
                combined.push(job);
            }
        }
        tracing::info!(
            original_jobs = before,
            unique_jobs = combined.len(),
            "merged baseline jobs after deduplication"
        );
        Ok(combined)
    }

    fn worker_count(&self, job_count: usize) -> usize {
        let auto = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        self.config
            .simulation
            .max_workers
            .unwrap_or(auto)
            .min(job_count)
            .max(1)
    }

    /// Compile the model once for the concurrent fast path.
    #[cfg(feature = "parallel")]
    fn build_model_once(&self) -> Result<BuildArtifacts, SweepError> {
        let build_dir = self.config.paths.temp_dir.join("build");
        std::fs::create_dir_all(&build_dir)?;
        tracing::info!(build_dir = %build_dir.display(), "building model");
        let mut session = self.engine.open_session(&build_dir)?;
        let result = (|| {
            session.load(&self.config.paths.package_path)?;
            session.build(&self.config.simulation.model_name)
        })();
        session.terminate();
        let artifacts = result?;
        tracing::info!(
            executable = %artifacts.executable.display(),
            "model built successfully"
        );
        Ok(artifacts)
    }

    /// One standard job through the pre-compiled executable, isolated in
    /// its own workspace so concurrent runs cannot contend on files.
    #[cfg(feature = "parallel")]
    fn run_fast_subprocess_job(
        &self,
        artifacts: &BuildArtifacts,
        job_id: usize,
        job_params: &Params,
    ) -> Option<PathBuf> {
        let sim = &self.config.simulation;
        let workspace = match JobWorkspace::create(&self.config.paths.temp_dir, job_id) {
            Ok(workspace) => workspace,
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to create job workspace");
                return None;
            }
        };
        let exe = match copy_build_artifacts(&artifacts.executable, workspace.path()) {
            Ok(exe) => exe,
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to copy build artifacts");
                return None;
            }
        };

        let mut override_pairs: Vec<String> = job_params
            .iter()
            .map(|(name, value)| format_override(name, value))
            .collect();
        override_pairs.push(format!("stopTime={}", sim.stop_time));
        override_pairs.push(format!("stepSize={}", sim.step_size));
        override_pairs.push("outputFormat=csv".to_string());
        if !sim.variable_filter.is_empty() {
            override_pairs.push(format!("variableFilter={}", sim.variable_filter));
        }

        let result_path = workspace.path().join(format!("job_{job_id}_res.csv"));
        let output = Command::new(&exe)
            .arg("-override")
            .arg(override_pairs.join(","))
            .arg("-r")
            .arg(&result_path)
            .current_dir(workspace.path())
            .output();
        match output {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                tracing::error!(
                    job_id,
                    status = ?out.status.code(),
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "simulation executable failed"
                );
                return None;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to spawn simulation executable");
                return None;
            }
        }
        if !result_path.exists() {
            tracing::error!(job_id, "simulation produced no result file");
            return None;
        }
        if let Err(e) = clean_result_csv(&result_path) {
            tracing::warn!(job_id, error = %e, "failed to clean result file");
        }
        Some(result_path)
    }

    /// Run every configured optimization task for one finished job.
    /// Probes run against `model_files`/`model_name` in a fresh engine
    /// session per task; failures are logged and the remaining tasks
    /// continue.
    fn run_job_optimizations(
        &self,
        job_id: usize,
        job_params: &Params,
        tasks: &[(String, OptimizationTask)],
        model_files: &[PathBuf],
        model_name: &str,
    ) -> Params {
        let mut extras = Params::new();
        if tasks.is_empty() {
            return extras;
        }
        let sim = &self.config.simulation;
        let opt_dir = self
            .config
            .paths
            .temp_dir
            .join(format!("job_{job_id}_optimize"));

        for (task_name, task) in tasks {
            tracing::info!(job_id, task = %task_name, "starting optimization for metric");
            let mut session = match self.engine.open_session(&opt_dir) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(job_id, task = %task_name, error = %e, "failed to open optimization session");
                    continue;
                }
            };
            let setup = (|| -> Result<(), crate::error::EngineError> {
                for file in model_files {
                    session.load(file)?;
                }
                Ok(())
            })();
            match setup {
                Ok(()) => {
                    session.set_simulation_options(SimulationOptions {
                        stop_time: sim.stop_time,
                        step_size: sim.step_size,
                        tolerance: Some(1e-6),
                        variable_filter: Some(sim.variable_filter.clone()),
                    });
                    let prefix = format!("job_{job_id}_{task_name}");
                    let (optimal_params, optimal_values) = run_bisection_for_job(
                        session.as_mut(),
                        model_name,
                        sim.stop_time,
                        task_name,
                        task,
                        job_params,
                        &self.config.paths.temp_dir,
                        &prefix,
                    );
                    tracing::info!(
                        job_id,
                        task = %task_name,
                        optimal = %serde_json::Value::Object(optimal_params.clone()),
                        "optimization complete"
                    );
                    extras.extend(optimal_params);
                    extras.extend(optimal_values);
                }
                Err(e) => {
                    tracing::error!(job_id, task = %task_name, error = %e, "optimization setup failed");
                }
            }
            session.terminate();
        }

        if opt_dir.exists() {
            let _ = std::fs::remove_dir_all(&opt_dir);
        }
        extras
    }

    fn job_workspace_path(&self, job_id: usize) -> PathBuf {
        self.config.paths.temp_dir.join(format!("job_{job_id}"))
    }

    fn co_sim_outcome(
        &self,
        job_id: usize,
        params: &Params,
        tasks: &[(String, OptimizationTask)],
        metrics_defs: Option<&BTreeMap<String, MetricDefinition>>,
    ) -> JobOutcome {
        let runner = CoSimulationRunner {
            config: self.config,
            engine: self.engine,
            handlers: self.handlers,
        };
        let mut extras = Params::new();
        let (result, workspace) = match runner.run(params, job_id) {
            Some(outcome) => {
                if let Some(defs) = metrics_defs {
                    extras.extend(calculate_job_metrics(&outcome.result_path, defs));
                }
                extras.extend(self.run_job_optimizations(
                    job_id,
                    params,
                    tasks,
                    &outcome.stage2_files,
                    &outcome.final_model_name,
                ));
                (Some(outcome.result_path), Some(self.job_workspace_path(job_id)))
            }
            None => (None, None),
        };
        JobOutcome {
            job_id,
            params: params.clone(),
            result,
            extras,
            workspace,
        }
    }

    #[cfg(feature = "parallel")]
    fn standard_fast_outcome(
        &self,
        artifacts: &BuildArtifacts,
        job_id: usize,
        params: &Params,
        tasks: &[(String, OptimizationTask)],
        metrics_defs: Option<&BTreeMap<String, MetricDefinition>>,
    ) -> JobOutcome {
        let result = self.run_fast_subprocess_job(artifacts, job_id, params);
        let mut extras = Params::new();
        if let Some(path) = &result {
            if let Some(defs) = metrics_defs {
                extras.extend(calculate_job_metrics(path, defs));
            }
            extras.extend(self.run_job_optimizations(
                job_id,
                params,
                tasks,
                std::slice::from_ref(&self.config.paths.package_path),
                &self.config.simulation.model_name,
            ));
        }
        JobOutcome {
            job_id,
            params: params.clone(),
            result,
            extras,
            workspace: Some(self.job_workspace_path(job_id)),
        }
    }

    /// Sequential strategy for standard jobs: one engine session is loaded
    /// once and reused across every job, paying session setup a single
    /// time.
    fn run_standard_sequential(
        &self,
        jobs: &[Params],
        tasks: &[(String, OptimizationTask)],
        metrics_defs: Option<&BTreeMap<String, MetricDefinition>>,
        mut ingest: impl FnMut(JobOutcome) -> Result<(), SweepError>,
    ) -> Result<(), SweepError> {
        let sim = &self.config.simulation;
        let session_dir = self.config.paths.temp_dir.join("session");
        let mut session = self.engine.open_session(&session_dir)?;

        if let Err(e) = session.load(&self.config.paths.package_path) {
            session.terminate();
            return Err(e.into());
        }
        session.set_simulation_options(SimulationOptions {
            stop_time: sim.stop_time,
            step_size: sim.step_size,
            tolerance: Some(1e-6),
            variable_filter: Some(sim.variable_filter.clone()),
        });

        let mut loop_result = Ok(());
        for (i, params) in jobs.iter().enumerate() {
            let job_id = i + 1;
            tracing::info!(
                job_index = %format!("{job_id}/{}", jobs.len()),
                params = %serde_json::Value::Object(params.clone()),
                "running sequential job"
            );
            let settings: Vec<String> = params
                .iter()
                .map(|(name, value)| format_parameter_value(name, value))
                .collect();
            if !settings.is_empty() {
                session.set_parameters(&settings);
            }

            let result = match JobWorkspace::create(&self.config.paths.temp_dir, job_id) {
                Ok(workspace) => {
                    let path = workspace
                        .path()
                        .join(format!("job_{job_id}_simulation_results.csv"));
                    match session.simulate(&sim.model_name, &path) {
                        Ok(()) => {
                            if let Err(e) = clean_result_csv(&path) {
                                tracing::warn!(job_id, error = %e, "failed to clean result file");
                            }
                            Some(path)
                        }
                        Err(e) => {
                            tracing::error!(job_id, error = %e, "sequential job failed");
                            None
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(job_id, error = %e, "failed to create job workspace");
                    None
                }
            };

            let mut extras = Params::new();
            if let Some(path) = &result {
                if let Some(defs) = metrics_defs {
                    extras.extend(calculate_job_metrics(path, defs));
                }
                extras.extend(self.run_job_optimizations(
                    job_id,
                    params,
                    tasks,
                    std::slice::from_ref(&self.config.paths.package_path),
                    &sim.model_name,
                ));
            }

            if let Err(e) = ingest(JobOutcome {
                job_id,
                params: params.clone(),
                result,
                extras,
                workspace: Some(self.job_workspace_path(job_id)),
            }) {
                loop_result = Err(e);
                break;
            }
        }
        session.terminate();
        loop_result
    }
}

/// Ingest one completed job into the store. The orchestrating thread is
/// the only caller; workers never touch the store.
fn ingest_outcome(
    store: &mut ResultStore,
    outcome: JobOutcome,
    total: usize,
    completed: &mut usize,
    succeeded: &mut usize,
    summary_enabled: bool,
    keep_temp: bool,
) -> Result<(), SweepError> {
    store.append_job(outcome.job_id, &outcome.params)?;

    if let Some(path) = &outcome.result {
        match store.ingest_result(outcome.job_id, path) {
            Ok(rows) => {
                tracing::debug!(job_id = outcome.job_id, rows, "ingested job time series");
                *succeeded += 1;
            }
            Err(e) => {
                tracing::error!(
                    job_id = outcome.job_id,
                    error = %e,
                    "failed to ingest job result, marking job failed"
                );
            }
        }
    }

    if summary_enabled {
        let mut row = outcome.params.clone();
        row.extend(outcome.extras);
        store.append_summary(outcome.job_id, &row)?;
    }

    if !keep_temp {
        if let Some(workspace) = &outcome.workspace {
            if workspace.exists() {
                if let Err(e) = std::fs::remove_dir_all(workspace) {
                    tracing::warn!(
                        workspace = %workspace.display(),
                        error = %e,
                        "failed to remove job workspace"
                    );
                }
            }
        }
    }

    *completed += 1;
    tracing::info!(job_id = outcome.job_id, "Job {} of {}", *completed, total);
    Ok(())
}

/// Fan jobs out over a fixed-size worker pool. Workers send completed
/// outcomes over a channel; this thread consumes them in completion order
/// and is the sole store writer.
#[cfg(feature = "parallel")]
fn run_concurrently<F>(
    jobs: &[Params],
    workers: usize,
    run: &F,
    mut ingest: impl FnMut(JobOutcome) -> Result<(), SweepError>,
) -> Result<(), SweepError>
where
    F: Fn(usize, &Params) -> JobOutcome + Send + Sync,
{
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| SweepError::Io(std::io::Error::other(e.to_string())))?;
    let (tx, rx) = std::sync::mpsc::channel::<JobOutcome>();

    std::thread::scope(|scope| {
        scope.spawn(move || {
            pool.install(|| {
                jobs.par_iter().enumerate().for_each_with(tx, |tx, (i, params)| {
                    let _ = tx.send(run(i + 1, params));
                });
            });
        });
        for outcome in rx {
            ingest(outcome)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BuildArtifacts, EngineSession, Port};
    use crate::error::EngineError;
    use serde_json::json;
    use std::path::Path;

    struct NoopEngine;

    impl Engine for NoopEngine {
        fn open_session(
            &self,
            _work_dir: &Path,
        ) -> Result<Box<dyn EngineSession>, EngineError> {
            Ok(Box::new(NoopSession))
        }
    }

    struct NoopSession;

    impl EngineSession for NoopSession {
        fn load(&mut self, _package: &Path) -> Result<(), EngineError> {
            Ok(())
        }
        fn output_ports(&mut self, _model: &str) -> Result<Vec<Port>, EngineError> {
            Ok(Vec::new())
        }
        fn input_ports(&mut self, _model: &str) -> Result<Vec<Port>, EngineError> {
            Ok(Vec::new())
        }
        fn set_parameters(&mut self, _overrides: &[String]) {}
        fn set_simulation_options(&mut self, _options: SimulationOptions) {}
        fn simulate(&mut self, _model: &str, result_file: &Path) -> Result<(), EngineError> {
            std::fs::write(result_file, "time,x\n0,1\n")?;
            Ok(())
        }
        fn build(&mut self, model: &str) -> Result<BuildArtifacts, EngineError> {
            Err(EngineError::BuildFailed {
                model: model.to_string(),
                output: String::new(),
            })
        }
        fn terminate(&mut self) {}
    }

    fn config_json(dir: &Path) -> RunConfig {
        serde_json::from_value(json!({
            "paths": {
                "package_path": dir.join("Cycle.mo").to_str().unwrap(),
                "results_dir": dir.join("results").to_str().unwrap(),
                "temp_dir": dir.join("temp").to_str().unwrap()
            },
            "simulation": {
                "model_name": "Cycle.System",
                "stop_time": 10.0,
                "step_size": 1.0,
                "variableFilter": "time|x"
            },
            "sensitivity_analysis": {
                "enabled": true,
                "analysis_case": {
                    "independent_variable": "tbr",
                    "independent_variable_sampling": "1.0:1.2:0.1",
                    "dependent_variables": [],
                    "default_simulation_values": { "flow": 2.0 }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_baseline_jobs_appended_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_json(dir.path());
        config.simulation_parameters.insert("tbr".to_string(), json!("1.0:1.2:0.1"));
        config.simulation_parameters.insert("flow".to_string(), json!(2.0));

        let engine = NoopEngine;
        let handlers = HandlerRegistry::new();
        let orchestrator = SweepOrchestrator::new(&config, &engine, &handlers);

        let jobs = generate_simulation_jobs(&config.simulation_parameters).unwrap();
        assert_eq!(jobs.len(), 3);
        // Baseline jobs regenerate the same default-valued sweep, so
        // deduplication leaves the job list unchanged.
        let augmented = orchestrator.augment_with_baseline_jobs(jobs).unwrap();
        assert_eq!(augmented.len(), 3);
    }

    #[test]
    fn test_baseline_jobs_added_when_sweep_differs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_json(dir.path());
        // Main sweep runs with flow=5, baseline regenerates with flow=2.
        config.simulation_parameters.insert("tbr".to_string(), json!("1.0:1.2:0.1"));
        config.simulation_parameters.insert("flow".to_string(), json!(5.0));

        let engine = NoopEngine;
        let handlers = HandlerRegistry::new();
        let orchestrator = SweepOrchestrator::new(&config, &engine, &handlers);

        let jobs = generate_simulation_jobs(&config.simulation_parameters).unwrap();
        let augmented = orchestrator.augment_with_baseline_jobs(jobs).unwrap();
        assert_eq!(augmented.len(), 6);
    }

    #[test]
    fn test_worker_count_never_exceeds_job_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_json(dir.path());
        config.simulation.max_workers = Some(64);
        let engine = NoopEngine;
        let handlers = HandlerRegistry::new();
        let orchestrator = SweepOrchestrator::new(&config, &engine, &handlers);
        assert_eq!(orchestrator.worker_count(3), 3);
        assert_eq!(orchestrator.worker_count(100), 64);
        // At least one worker even for an empty job list.
        assert_eq!(orchestrator.worker_count(0), 1);
    }
}
