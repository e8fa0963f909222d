//! Replacement-mode model rewriting.
//!
//! The submodel keeps its full port interface, but its equations are
//! discarded and regenerated to source every overridden output from the
//! handler's CSV. The original file (or the whole single-file package) is
//! backed up with a `.bak` extension before being overwritten in place, so
//! no connection rewiring is needed.
//!
//! Where the column mapping carries the pass-through sentinel `1`, the
//! regenerated equation yields `0.0` rather than the original signal. This
//! asymmetry with interceptor mode is observed upstream behavior and is
//! kept as-is.

use std::path::Path;

use crate::error::InterceptError;

use super::model;
use super::{Interception, InterceptionConfig, ReplacedModel};

#[derive(Debug, Clone)]
pub(crate) struct ReplacementPort {
    pub name: String,
    pub dim: usize,
    pub columns: Vec<i64>,
}

/// Parse the configured output placeholder (`port -> "{1,2,3}"`) into
/// replacement ports. The first column is the time column, so the port
/// dimension is one less than the mapping length. Malformed specs are
/// logged and skipped.
pub(crate) fn placeholder_ports(config: &InterceptionConfig) -> Vec<ReplacementPort> {
    let mut ports = Vec::new();
    for (port_name, spec) in &config.output_placeholder {
        let trimmed = spec.trim();
        let parsed: Option<Vec<i64>> = trimmed
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .map(|inner| {
                inner
                    .split(',')
                    .map(|c| c.trim().parse::<i64>())
                    .collect::<Result<Vec<i64>, _>>()
                    .ok()
            })
            .unwrap_or(None);
        match parsed {
            Some(columns) if columns.len() >= 2 => {
                ports.push(ReplacementPort {
                    name: port_name.clone(),
                    dim: columns.len() - 1,
                    columns,
                });
            }
            _ => {
                tracing::warn!(
                    submodel = %config.submodel_name,
                    port = %port_name,
                    spec = %spec,
                    "unexpected column spec format, skipping port"
                );
            }
        }
    }
    ports
}

fn columns_literal(columns: &[i64]) -> String {
    let elements: Vec<String> = columns.iter().map(i64::to_string).collect();
    format!("{{{}}}", elements.join(", "))
}

/// Regenerate a submodel body: same ports, no original equations, one
/// time-series table per overridden output.
pub(crate) fn generate_replaced_model_code(
    original_model_code: &str,
    model_name: &str,
    ports: &[ReplacementPort],
    csv_file: &str,
    within: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(clause) = within {
        parts.push(clause.to_string());
    }
    parts.push(format!("model {model_name}"));
    parts.push(String::new());

    for declaration in model::port_declarations(original_model_code) {
        for line in declaration.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with("  ") {
                parts.push(line.trim_end().to_string());
            } else {
                parts.push(format!("  {}", line.trim()));
            }
        }
    }
    parts.push(String::new());

    parts.push("protected".to_string());
    parts.push(format!(
        "  parameter String fileName = \"{csv_file}\" \"Path to the CSV file\";"
    ));

    for port in ports {
        let columns = columns_literal(&port.columns);
        parts.push(String::new());
        parts.push(format!(
            "  Modelica.Blocks.Sources.CombiTimeTable table_{}(",
            port.name
        ));
        parts.push(format!("    tableName=\"csv_data_{}\",", port.name));
        parts.push("    fileName=fileName,".to_string());
        parts.push(format!("    columns={columns},"));
        parts.push("    tableOnFile=true".to_string());
        parts.push("  );".to_string());
    }
    for port in ports {
        parts.push(format!(
            "  parameter Integer columns_{}[{}] = {};",
            port.name,
            port.dim + 1,
            columns_literal(&port.columns)
        ));
    }
    parts.push(String::new());

    parts.push("equation".to_string());
    for port in ports {
        if port.dim > 1 {
            parts.push(format!("  for i in 1:{} loop", port.dim));
            parts.push(format!(
                "    {name}[i] = if columns_{name}[i+1] == 1 then 0.0 else table_{name}.y[i];",
                name = port.name
            ));
            parts.push("  end for;".to_string());
        } else {
            parts.push(format!(
                "  {name} = if columns_{name}[2] == 1 then 0.0 else table_{name}.y[1];",
                name = port.name
            ));
        }
    }
    parts.push(String::new());

    if let Some(annotation) = model::final_annotation(original_model_code) {
        parts.push(format!("  {annotation}"));
        parts.push(String::new());
    }

    parts.push(format!("end {model_name};"));
    parts.join("\n")
}

fn backup_path_for(path: &Path) -> std::path::PathBuf {
    path.with_extension("bak")
}

/// Replace one submodel file in place, backing the original up first.
fn replace_submodel_file(
    submodel_path: &Path,
    submodel_name: &str,
    ports: &[ReplacementPort],
    csv_file: &str,
) -> Result<ReplacedModel, InterceptError> {
    tracing::info!(
        submodel_path = %submodel_path.display(),
        csv_file = %csv_file,
        "replacing submodel equations with CSV data source"
    );

    let backup_path = backup_path_for(submodel_path);
    std::fs::copy(submodel_path, &backup_path)?;
    tracing::info!(backup_path = %backup_path.display(), "created backup");

    let original_code = std::fs::read_to_string(submodel_path)?;
    let model_name = model::model_name(&original_code)
        .ok_or_else(|| InterceptError::ModelBlockNotFound(submodel_name.to_string()))?;
    let within = model::within_clause(&original_code);

    let new_code = generate_replaced_model_code(
        &original_code,
        &model_name,
        ports,
        csv_file,
        within.as_deref(),
    );
    std::fs::write(submodel_path, new_code)?;

    Ok(ReplacedModel {
        submodel_name: submodel_name.to_string(),
        backup_path,
        modified_path: submodel_path.to_path_buf(),
    })
}

/// Multi-file package: each submodel lives in its own `<Name>.mo` file.
pub(crate) fn integrate_multi_file(
    package_dir: &Path,
    configs: &[InterceptionConfig],
) -> Result<Interception, InterceptError> {
    let mut replaced = Vec::new();
    for config in configs {
        let ports = placeholder_ports(config);
        let short_name = config
            .submodel_name
            .rsplit('.')
            .next()
            .unwrap_or(&config.submodel_name);
        let submodel_file = package_dir.join(format!("{short_name}.mo"));
        if !submodel_file.exists() {
            return Err(InterceptError::MissingSubmodelFile {
                submodel: config.submodel_name.clone(),
                expected: submodel_file,
            });
        }
        replaced.push(replace_submodel_file(
            &submodel_file,
            &config.submodel_name,
            &ports,
            &config.csv_uri,
        )?);
    }

    tracing::info!(num_replaced = replaced.len(), "direct replacement completed");
    Ok(Interception {
        interceptor_model_paths: Vec::new(),
        system_model_path: package_dir.to_path_buf(),
        replaced_models: replaced,
    })
}

/// Single-file package: every submodel block is rewritten inside the one
/// package file, after a single whole-file backup.
pub(crate) fn integrate_single_file(
    package_path: &Path,
    configs: &[InterceptionConfig],
) -> Result<Interception, InterceptError> {
    tracing::info!(
        package_path = %package_path.display(),
        "processing single-file package for direct replacement"
    );
    let original_package_code = std::fs::read_to_string(package_path)?;
    let backup_path = backup_path_for(package_path);
    std::fs::copy(package_path, &backup_path)?;
    tracing::info!(backup_path = %backup_path.display(), "created backup");

    let mut modified = original_package_code;
    let mut replaced = Vec::new();

    for config in configs {
        let ports = placeholder_ports(config);
        let short_name = config
            .submodel_name
            .rsplit('.')
            .next()
            .unwrap_or(&config.submodel_name);
        let range = model::find_model_block(&modified, short_name)
            .ok_or_else(|| InterceptError::ModelBlockNotFound(short_name.to_string()))?;
        let original_block = modified[range.clone()].to_string();
        let new_block = generate_replaced_model_code(
            &original_block,
            short_name,
            &ports,
            &config.csv_uri,
            None,
        );
        modified.replace_range(range, &new_block);
        replaced.push(ReplacedModel {
            submodel_name: config.submodel_name.clone(),
            backup_path: backup_path.clone(),
            modified_path: package_path.to_path_buf(),
        });
    }

    std::fs::write(package_path, modified)?;
    tracing::info!(
        num_replaced = replaced.len(),
        "single-file direct replacement completed"
    );

    Ok(Interception {
        interceptor_model_paths: Vec::new(),
        system_model_path: package_path.to_path_buf(),
        replaced_models: replaced,
    })
}
