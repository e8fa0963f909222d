//! Simulation job expansion.
//!
//! A job is a flat mapping of concrete parameter name to concrete value,
//! describing one simulation run. Jobs are generated either from a CSV job
//! table (`"file"` key) or as the Cartesian product of swept parameter
//! values, and are never mutated after generation; a job's identity is the
//! sequential `job_id` assigned at dispatch time.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::JobError;
use crate::params::{parse_literal, parse_parameter_value, split_top_level};

/// One job's parameter assignment. Insertion order is preserved so job
/// generation stays deterministic and reproducible.
pub type Params = serde_json::Map<String, Value>;

/// Expand aggregate array strings (`"{v1, v2, ...}"`) into indexed
/// sub-parameters `name[1]`, `name[2]`, ... (1-based).
///
/// Elements are parsed as literals (numbers, quoted strings, nested lists);
/// a parse failure keeps the parameter as a single literal value and logs a
/// warning instead of failing the whole expansion.
pub fn expand_array_parameters(simulation_params: &Params) -> Params {
    let mut expanded = Params::new();
    for (name, value) in simulation_params {
        let Some(text) = value.as_str() else {
            expanded.insert(name.clone(), value.clone());
            continue;
        };
        if !(text.starts_with('{') && text.ends_with('}')) {
            expanded.insert(name.clone(), value.clone());
            continue;
        }

        let inner = &text[1..text.len() - 1];
        let parsed: Option<Vec<Value>> = split_top_level(inner, ',')
            .iter()
            .map(|part| parse_literal(part))
            .collect();

        match parsed {
            Some(elements) if !elements.is_empty() => {
                for (i, element) in elements.into_iter().enumerate() {
                    expanded.insert(format!("{name}[{}]", i + 1), element);
                }
            }
            _ => {
                tracing::warn!(
                    parameter = %name,
                    value = %text,
                    "could not parse array-like string, keeping as a single literal value"
                );
                expanded.insert(name.clone(), value.clone());
            }
        }
    }
    expanded
}

fn resolve_job_table_path(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if Path::new(trimmed).is_absolute() {
        PathBuf::from(trimmed)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(trimmed)
    }
}

/// Load one job per CSV row; the header row names the parameters.
fn load_jobs_from_csv(file_path: &str) -> Result<Vec<Params>, JobError> {
    let abs_path = resolve_job_table_path(file_path);
    if !abs_path.exists() {
        return Err(JobError::MissingJobTable(abs_path));
    }

    let mut reader = csv::Reader::from_path(&abs_path).map_err(|source| JobError::Csv {
        path: abs_path.clone(),
        source,
    })?;
    let headers = reader
        .headers()
        .map_err(|source| JobError::Csv {
            path: abs_path.clone(),
            source,
        })?
        .clone();

    let mut jobs = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| JobError::Csv {
            path: abs_path.clone(),
            source,
        })?;
        let mut job = Params::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            let field = field.trim();
            let value = parse_literal(field)
                .unwrap_or_else(|| Value::String(field.to_string()));
            job.insert(header.trim().to_string(), value);
        }
        jobs.push(job);
    }

    tracing::info!(
        num_jobs = jobs.len(),
        file_path = %abs_path.display(),
        "loaded jobs from CSV job table"
    );
    Ok(jobs)
}

/// Expand a map of parameter specs into the full list of simulation jobs.
///
/// If the map contains a `"file"` key, one job is loaded per CSV row and
/// every other top-level key is merged into each job as a constant
/// override; no Cartesian expansion happens on that path. Otherwise
/// aggregate arrays are expanded, each parameter is classified as swept
/// (more than one parsed value) or single, and the Cartesian product of
/// the sweep axes is returned with all single values merged into every
/// combination. Generation order follows parameter insertion order so
/// `job_id` assignment is reproducible.
pub fn generate_simulation_jobs(simulation_params: &Params) -> Result<Vec<Params>, JobError> {
    tracing::info!(
        num_parameters = simulation_params.len(),
        "generating simulation jobs"
    );

    if let Some(Value::String(file_value)) = simulation_params.get("file") {
        let mut csv_jobs = load_jobs_from_csv(file_value)?;
        for job in &mut csv_jobs {
            for (name, value) in simulation_params {
                if name != "file" {
                    job.insert(name.clone(), value.clone());
                }
            }
        }
        return Ok(csv_jobs);
    }

    let processed = expand_array_parameters(simulation_params);

    let mut sweep_params: Vec<(String, Vec<Value>)> = Vec::new();
    let mut single_value_params = Params::new();

    for (name, value) in &processed {
        let parsed = parse_parameter_value(value);
        if parsed.len() > 1 {
            sweep_params.push((name.clone(), parsed));
        } else {
            single_value_params.insert(
                name.clone(),
                parsed.into_iter().next().unwrap_or(Value::Null),
            );
        }
    }

    if sweep_params.is_empty() {
        return Ok(vec![single_value_params]);
    }

    // Odometer over the sweep axes, last axis fastest, matching the order
    // the axes appear in the configuration.
    let mut jobs = Vec::new();
    let mut indices = vec![0usize; sweep_params.len()];
    loop {
        let mut job = single_value_params.clone();
        for (axis, &idx) in sweep_params.iter().zip(indices.iter()) {
            job.insert(axis.0.clone(), axis.1[idx].clone());
        }
        jobs.push(job);

        let mut pos = sweep_params.len();
        loop {
            if pos == 0 {
                return Ok(jobs);
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < sweep_params[pos].1.len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

/// Stable identity key for a job's full parameter assignment, used to
/// deduplicate baseline jobs against the main sweep.
pub fn job_identity(job: &Params) -> String {
    let mut pairs: Vec<(&String, &Value)> = job.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(entries: &[(&str, Value)]) -> Params {
        let mut map = Params::new();
        for (k, v) in entries {
            map.insert((*k).to_string(), v.clone());
        }
        map
    }

    #[test]
    fn test_expand_array_parameters() {
        let input = params(&[("p", json!("{1, 2.5, 'x'}"))]);
        let expanded = expand_array_parameters(&input);
        assert_eq!(expanded.get("p[1]"), Some(&json!(1)));
        assert_eq!(expanded.get("p[2]"), Some(&json!(2.5)));
        assert_eq!(expanded.get("p[3]"), Some(&json!("x")));
        assert!(!expanded.contains_key("p"));
    }

    #[test]
    fn test_expand_array_nested_list_element() {
        let input = params(&[("p", json!("{1, [1,2,3], '1:2:1'}"))]);
        let expanded = expand_array_parameters(&input);
        assert_eq!(expanded.get("p[2]"), Some(&json!([1, 2, 3])));
        assert_eq!(expanded.get("p[3]"), Some(&json!("1:2:1")));
    }

    #[test]
    fn test_expand_array_parse_failure_keeps_literal() {
        let input = params(&[("p", json!("{1, oops}"))]);
        let expanded = expand_array_parameters(&input);
        assert_eq!(expanded.get("p"), Some(&json!("{1, oops}")));
    }

    #[test]
    fn test_cartesian_completeness() {
        let input = params(&[
            ("a", json!("0:2:1")),     // 3 values
            ("b", json!([10.0, 20.0])), // 2 values
            ("c", json!(7.5)),
        ]);
        let jobs = generate_simulation_jobs(&input).unwrap();
        assert_eq!(jobs.len(), 6);
        for job in &jobs {
            assert_eq!(job.get("c"), Some(&json!(7.5)));
        }
        // First axis varies slowest, matching insertion order.
        assert_eq!(jobs[0].get("a"), Some(&json!(0.0)));
        assert_eq!(jobs[0].get("b"), Some(&json!(10.0)));
        assert_eq!(jobs[1].get("b"), Some(&json!(20.0)));
        assert_eq!(jobs[2].get("a"), Some(&json!(1.0)));
    }

    #[test]
    fn test_no_sweep_yields_single_job() {
        let input = params(&[("a", json!(1.0)), ("b", json!("fixed"))]);
        let jobs = generate_simulation_jobs(&input).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].get("a"), Some(&json!(1.0)));
        assert_eq!(jobs[0].get("b"), Some(&json!("fixed")));
    }

    #[test]
    fn test_empty_params_yield_one_empty_job() {
        let jobs = generate_simulation_jobs(&Params::new()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].is_empty());
    }

    #[test]
    fn test_jobs_from_csv_table_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("jobs.csv");
        std::fs::write(&table, "tbr,flow\n1.05,2\n1.10,3\n").unwrap();

        let input = params(&[
            ("file", json!(table.to_str().unwrap())),
            ("stop_early", json!(true)),
        ]);
        let jobs = generate_simulation_jobs(&input).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].get("tbr"), Some(&json!(1.05)));
        assert_eq!(jobs[1].get("flow"), Some(&json!(3)));
        // Constant overrides are applied to every loaded job.
        for job in &jobs {
            assert_eq!(job.get("stop_early"), Some(&json!(true)));
            assert!(!job.contains_key("file"));
        }
    }

    #[test]
    fn test_missing_job_table_is_an_error() {
        let input = params(&[("file", json!("/no/such/table.csv"))]);
        assert!(generate_simulation_jobs(&input).is_err());
    }

    #[test]
    fn test_job_identity_ignores_insertion_order() {
        let a = params(&[("x", json!(1)), ("y", json!(2))]);
        let b = params(&[("y", json!(2)), ("x", json!(1))]);
        assert_eq!(job_identity(&a), job_identity(&b));
    }
}
