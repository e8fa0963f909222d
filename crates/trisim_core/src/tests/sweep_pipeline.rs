//! End-to-end sweep tests: job expansion through execution into the
//! columnar store, including failure isolation and per-job optimization.

use std::path::Path;

use serde_json::json;

use crate::config::RunConfig;
use crate::handler::HandlerRegistry;
use crate::sweep::SweepOrchestrator;

use super::support::MockEngine;

fn base_config(dir: &Path) -> serde_json::Value {
    json!({
        "paths": {
            "package_path": dir.join("Cycle.mo").to_str().unwrap(),
            "results_dir": dir.join("results").to_str().unwrap(),
            "temp_dir": dir.join("temp").to_str().unwrap()
        },
        "simulation": {
            "model_name": "Cycle.System",
            "stop_time": 10.0,
            "step_size": 1.0,
            "variableFilter": "time|sds\\.inventory"
        },
        "simulation_parameters": {
            "blanket.TBR": "1:3:1"
        }
    })
}

fn write_package(dir: &Path) {
    std::fs::write(
        dir.join("Cycle.mo"),
        "package Cycle\n  model System\n  end System;\nend Cycle;",
    )
    .unwrap();
}

#[test]
fn test_sequential_sweep_streams_all_jobs_into_store() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());
    let mut config_json = base_config(dir.path());
    config_json["simulation"]["legacy_wide_export"] = json!(true);
    let config: RunConfig = serde_json::from_value(config_json).unwrap();

    let engine = MockEngine::new();
    let handlers = HandlerRegistry::new();
    let summary = SweepOrchestrator::new(&config, &engine, &handlers)
        .run()
        .unwrap();
    assert_eq!(summary.total_jobs, 3);
    assert_eq!(summary.succeeded, 3);

    let results_dir = dir.path().join("results");
    let jobs = std::fs::read_to_string(results_dir.join("jobs.csv")).unwrap();
    assert_eq!(jobs.lines().next(), Some("job_id,blanket.TBR"));
    assert_eq!(jobs.lines().count(), 4);

    // 11 timesteps per job (0..=10), tagged by job_id.
    let results = std::fs::read_to_string(results_dir.join("results.csv")).unwrap();
    assert_eq!(results.lines().next(), Some("job_id,time,sds.inventory"));
    assert_eq!(results.lines().count(), 1 + 3 * 11);

    // Legacy wide export with parameter-suffixed columns.
    let wide = std::fs::read_to_string(results_dir.join("sweep_results.csv")).unwrap();
    let header = wide.lines().next().unwrap();
    assert!(header.contains("sds.inventory&blanket.TBR=1.0"));
    assert!(header.contains("sds.inventory&blanket.TBR=3.0"));

    // Scratch directories are deleted after ingestion.
    assert!(!dir.path().join("temp").join("job_1").exists());
    assert!(!dir.path().join("temp").join("job_3").exists());
}

#[test]
fn test_one_failing_job_does_not_stop_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());
    let mut config_json = base_config(dir.path());
    config_json["sensitivity_analysis"] = json!({
        "enabled": true,
        "metrics_definition": {
            "Final_Inventory": {
                "method": "final_value",
                "source_column": "sds.inventory"
            }
        },
        "analysis_case": {
            "dependent_variables": ["Final_Inventory"]
        }
    });
    let config: RunConfig = serde_json::from_value(config_json).unwrap();

    // The middle job (blanket.TBR=2.0) fails inside the engine.
    let engine = MockEngine::new().failing_on("blanket.TBR=2");
    let handlers = HandlerRegistry::new();
    let summary = SweepOrchestrator::new(&config, &engine, &handlers)
        .run()
        .unwrap();
    assert_eq!(summary.total_jobs, 3);
    assert_eq!(summary.succeeded, 2);

    let results_dir = dir.path().join("results");
    // Every job has a jobs row; only the two surviving jobs have time
    // series rows.
    let jobs = std::fs::read_to_string(results_dir.join("jobs.csv")).unwrap();
    assert_eq!(jobs.lines().count(), 4);
    let results = std::fs::read_to_string(results_dir.join("results.csv")).unwrap();
    assert_eq!(results.lines().count(), 1 + 2 * 11);
    assert!(!results.contains("\n2,"));

    // The summary carries the extracted metric for surviving jobs; the
    // failed job's metric cell is empty, never a partial value.
    let summary_csv = std::fs::read_to_string(results_dir.join("summary.csv")).unwrap();
    let lines: Vec<&str> = summary_csv.lines().collect();
    assert_eq!(lines[0], "job_id,blanket.TBR,Final_Inventory");
    assert_eq!(lines[1], "1,1.0,20.0");
    assert_eq!(lines[2], "2,2.0,");
    assert_eq!(lines[3], "3,3.0,40.0");
}

#[test]
fn test_optimization_outputs_merge_into_summary() {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path());
    let mut config_json = base_config(dir.path());
    // Single job, plus a bisection task. The mock inventory rises from
    // t=0, so the turning point is found immediately at t=0 and every
    // probe is feasible: the search walks down to the low end of the
    // bracket.
    config_json["simulation_parameters"] = json!({ "blanket.TBR": 1.1 });
    config_json["sensitivity_analysis"] = json!({
        "enabled": true,
        "metrics_definition": {
            "Required_TBR": {
                "method": "bisection_search",
                "parameter_to_optimize": "blanket.TBR",
                "search_range": [1.0, 2.0],
                "tolerance": 0.5,
                "max_iterations": 5,
                "metric_name": "Self_Sufficiency_Time",
                "source_column": "sds.inventory"
            }
        },
        "analysis_case": {
            "dependent_variables": ["Required_TBR"]
        }
    });
    let config: RunConfig = serde_json::from_value(config_json).unwrap();

    let engine = MockEngine::new();
    let handlers = HandlerRegistry::new();
    let summary = SweepOrchestrator::new(&config, &engine, &handlers)
        .run()
        .unwrap();
    assert_eq!(summary.succeeded, 1);

    let summary_csv =
        std::fs::read_to_string(dir.path().join("results").join("summary.csv")).unwrap();
    let lines: Vec<&str> = summary_csv.lines().collect();
    assert_eq!(
        lines[0],
        "job_id,blanket.TBR,Required_TBR,Self_Sufficiency_Time_for_Required_TBR"
    );
    // Midpoints 1.5 then 1.25 are feasible, then the bracket is narrower
    // than the tolerance.
    assert_eq!(lines[1], "1,1.1,1.25,0.0");
}

#[cfg(feature = "parallel")]
#[test]
fn test_concurrent_co_simulation_isolates_jobs() {
    use std::sync::Arc;

    use crate::engine::Port;
    use crate::handler::{Handler, OutputPlaceholder};
    use crate::jobs::Params;

    struct PassThroughHandler;

    impl Handler for PassThroughHandler {
        fn run(
            &self,
            _input_csv: &Path,
            output_csv: &Path,
            _params: &Params,
        ) -> Result<OutputPlaceholder, crate::error::HandlerError> {
            std::fs::write(output_csv, "time,y1,y2\n0,1,1\n")?;
            let mut placeholder = OutputPlaceholder::new();
            placeholder.insert("to_sds".to_string(), "{1,2,3}".to_string());
            Ok(placeholder)
        }
    }

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("Cycle.mo"),
        "package Cycle\n  model I_ISS\n    Modelica.Blocks.Interfaces.RealInput from_plasma;\n    Modelica.Blocks.Interfaces.RealOutput to_sds[2];\n  equation\n    to_sds = {from_plasma, from_plasma};\n  end I_ISS;\n\n  model System\n    Cycle.I_ISS i_iss;\n  equation\n    connect(i_iss.to_sds, sds.inflow);\n  end System;\nend Cycle;",
    )
    .unwrap();
    let mut config_json = base_config(dir.path());
    config_json["simulation"]["concurrent"] = json!(true);
    config_json["simulation"]["max_workers"] = json!(2);
    config_json["co_simulation"] = json!({
        "mode": "interceptor",
        "handlers": [{
            "handler_name": "pass",
            "submodel_name": "Cycle.I_ISS",
            "instance_name": "i_iss"
        }]
    });
    let config: RunConfig = serde_json::from_value(config_json).unwrap();

    let engine = MockEngine::new().with_model(
        "Cycle.I_ISS",
        vec![Port {
            name: "from_plasma".to_string(),
            dim: 1,
        }],
        vec![Port {
            name: "to_sds".to_string(),
            dim: 2,
        }],
    );
    let mut handlers = HandlerRegistry::new();
    handlers.register("pass", Arc::new(PassThroughHandler));

    let summary = SweepOrchestrator::new(&config, &engine, &handlers)
        .run()
        .unwrap();
    assert_eq!(summary.total_jobs, 3);
    assert_eq!(summary.succeeded, 3);

    // Every job's rows landed in the store, keyed by its own job_id,
    // regardless of completion order.
    let results =
        std::fs::read_to_string(dir.path().join("results").join("results.csv")).unwrap();
    for job_id in 1..=3 {
        assert!(results.lines().any(|l| l.starts_with(&format!("{job_id},"))));
    }
}
