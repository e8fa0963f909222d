//! Interceptor-mode model rewriting.
//!
//! For each intercepted submodel a wrapper model is synthesized that
//! mirrors the submodel's output ports: a `physical_*` input receives the
//! original signal, a `final_*` output feeds the rest of the system, and a
//! per-port time-series table bound to the handler's CSV supplies override
//! data. The system model's `connect` statements are rewired through the
//! wrapper, and the rewritten system is emitted as a new `_Intercepted`
//! variant; the original model text is never modified.

use std::path::Path;

use crate::engine::EngineSession;
use crate::error::InterceptError;

use super::model;
use super::{Interception, InterceptionConfig};

/// An output port scheduled for override, with its configured column
/// mapping string (`"{time_col, col1, ...}"`; column `1` = pass-through).
#[derive(Debug, Clone)]
pub(crate) struct ResolvedPort {
    pub name: String,
    pub dim: usize,
    pub column_mapping: String,
}

/// Discover the output ports of every intercepted submodel. A submodel
/// with zero discoverable output ports aborts the whole batch.
pub(crate) fn resolve_output_ports(
    session: &mut dyn EngineSession,
    configs: &[InterceptionConfig],
) -> Result<Vec<Vec<ResolvedPort>>, InterceptError> {
    let mut resolved = Vec::with_capacity(configs.len());
    for config in configs {
        tracing::info!(submodel = %config.submodel_name, "identifying output ports");
        let ports = session.output_ports(&config.submodel_name)?;
        if ports.is_empty() {
            return Err(InterceptError::NoOutputPorts(config.submodel_name.clone()));
        }
        tracing::info!(
            submodel = %config.submodel_name,
            ports = ?ports.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "identified output ports"
        );
        resolved.push(
            ports
                .into_iter()
                .map(|port| ResolvedPort {
                    column_mapping: config
                        .output_placeholder
                        .get(&port.name)
                        .cloned()
                        .unwrap_or_default(),
                    name: port.name,
                    dim: port.dim,
                })
                .collect(),
        );
    }
    Ok(resolved)
}

pub(crate) fn interceptor_model_name(submodel_name: &str) -> String {
    let short = submodel_name.rsplit('.').next().unwrap_or(submodel_name);
    format!("{short}_Interceptor")
}

/// Generate the Modelica source of one interceptor wrapper model.
pub(crate) fn generate_interceptor(
    submodel_name: &str,
    ports: &[ResolvedPort],
    csv_file: &str,
    add_within_clause: bool,
) -> (String, String) {
    let package_name = submodel_name.split('.').next().unwrap_or(submodel_name);
    let original_short = submodel_name.rsplit('.').next().unwrap_or(submodel_name);
    let interceptor_name = interceptor_model_name(submodel_name);

    let mut inputs = String::new();
    let mut outputs = String::new();
    let mut parameters = format!(
        "  parameter String fileName = \"{csv_file}\" \"Path to the CSV file\";\n"
    );
    let mut tables = String::new();
    let mut equations = String::new();

    for port in ports {
        let dim_suffix = if port.dim > 1 {
            format!("[{}]", port.dim)
        } else {
            String::new()
        };
        inputs.push_str(&format!(
            "  Modelica.Blocks.Interfaces.RealInput physical_{}{dim_suffix} \"Received from {original_short}\";\n",
            port.name
        ));
        outputs.push_str(&format!(
            "  Modelica.Blocks.Interfaces.RealOutput final_{}{dim_suffix} \"Final output\";\n",
            port.name
        ));
        parameters.push_str(&format!(
            "  parameter Integer columns_{}[{}] = {} \"Column mapping for {}: {{time, y1, y2, ...}}. Use 1 for pass-through\";\n",
            port.name,
            port.dim + 1,
            port.column_mapping,
            port.name
        ));
        tables.push_str(&format!(
            "  Modelica.Blocks.Sources.CombiTimeTable table_{name}(\n    tableName=\"csv_data_{name}\",\n    fileName=fileName,\n    columns=columns_{name},\n    tableOnFile = true\n  ) annotation(HideResult=true);\n",
            name = port.name
        ));
        if port.dim > 1 {
            equations.push_str(&format!(
                "  for i in 1:{dim} loop\n    final_{name}[i] = if columns_{name}[i+1] <> 1 then table_{name}.y[i] else physical_{name}[i];\n  end for;\n",
                dim = port.dim,
                name = port.name
            ));
        } else {
            equations.push_str(&format!(
                "  final_{name} = if columns_{name}[2] <> 1 then table_{name}.y[1] else physical_{name};\n",
                name = port.name
            ));
        }
    }

    let within = if add_within_clause {
        format!("within {package_name};\n\n")
    } else {
        String::new()
    };

    let code = format!(
        "{within}model {interceptor_name}\n{inputs}\n{outputs}\nprotected\n{parameters}\n{tables}\nequation\n{equations}\n  annotation(\n    Icon(graphics = {{\n      Rectangle(fillColor = {{255, 255, 180}}, extent = {{{{-100, 100}}, {{100, -100}}}}),\n      Text(extent = {{{{-80, 40}}, {{80, -40}}}}, textString = \"{original_short}\\nInterceptor\")\n    }}));\nend {interceptor_name};\n"
    );
    (interceptor_name, code)
}

/// Rewire the system model code through the interceptor instances and
/// declare one interceptor instance per config. Returns the modified code.
fn rewire_system_code(
    system_code: &str,
    system_short_name: &str,
    configs: &[InterceptionConfig],
    resolved_ports: &[Vec<ResolvedPort>],
) -> String {
    let mut modified = system_code.to_string();
    let mut declarations = String::new();

    for (config, ports) in configs.iter().zip(resolved_ports) {
        let instance = &config.instance_name;
        let package_name = config
            .submodel_name
            .split('.')
            .next()
            .unwrap_or(&config.submodel_name);
        let interceptor_name = interceptor_model_name(&config.submodel_name);
        let interceptor_instance = format!("{instance}_interceptor");

        for port in ports {
            let (rewired, count) =
                model::reroute_connections(&modified, instance, &port.name, &interceptor_instance);
            modified = rewired;
            if count > 0 {
                tracing::info!(
                    port = %port.name,
                    instance = %instance,
                    rewired = count,
                    "rewired port through interceptor"
                );
            } else {
                tracing::warn!(
                    port = %port.name,
                    instance = %instance,
                    "could not find a connection for port"
                );
            }
        }

        declarations.push_str(&format!(
            "  {package_name}.{interceptor_name} {interceptor_instance};\n"
        ));
    }

    model::insert_declarations(&modified, &declarations, system_short_name)
}

/// Single-file package: embed the interceptors and the `_Intercepted`
/// system variant in a new `*_intercepted.mo` file next to the original.
pub(crate) fn integrate_single_file(
    session: &mut dyn EngineSession,
    package_path: &Path,
    model_name: &str,
    configs: &[InterceptionConfig],
) -> Result<Interception, InterceptError> {
    tracing::info!(
        package_path = %package_path.display(),
        num_interception_tasks = configs.len(),
        "starting model interception for single-file package"
    );
    let original_package_code = std::fs::read_to_string(package_path)?;
    session.load(package_path)?;
    let resolved_ports = resolve_output_ports(session, configs)?;

    let mut interceptor_codes = Vec::new();
    for (config, ports) in configs.iter().zip(&resolved_ports) {
        let (_, code) =
            generate_interceptor(&config.submodel_name, ports, &config.csv_uri, false);
        interceptor_codes.push(code);
    }

    let model_short_name = model_name.rsplit('.').next().unwrap_or(model_name);
    let block_range = model::find_model_block(&original_package_code, model_short_name)
        .ok_or_else(|| InterceptError::ModelBlockNotFound(model_short_name.to_string()))?;
    let original_system_code = &original_package_code[block_range];

    let modified_system =
        rewire_system_code(original_system_code, model_short_name, configs, &resolved_ports);
    let intercepted_name = format!("{model_short_name}_Intercepted");
    let intercepted_block =
        model::rename_model_block(&modified_system, model_short_name, &intercepted_name);

    // Append the new models before the package end; the original system
    // model block stays byte-identical.
    let package_name = model_name.split('.').next().unwrap_or(model_name);
    let package_end = format!("end {package_name};");
    let mut additions = interceptor_codes.join("\n\n");
    additions.push_str("\n\n");
    additions.push_str(&intercepted_block);
    let final_package_code = original_package_code.replace(
        &package_end,
        &format!("{additions}\n\n{package_end}"),
    );

    let file_name = package_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("package.mo")
        .replace(".mo", "_intercepted.mo");
    let modified_path = package_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(file_name);
    std::fs::write(&modified_path, final_package_code)?;

    tracing::info!(
        original_model = %model_short_name,
        new_model = %intercepted_name,
        file_path = %modified_path.display(),
        "created intercepted system model, original preserved"
    );

    Ok(Interception {
        interceptor_model_paths: Vec::new(),
        system_model_path: modified_path,
        replaced_models: Vec::new(),
    })
}

/// Multi-file package: one `.mo` file per interceptor plus a rewritten
/// `<System>_Intercepted.mo`; every original file is left untouched.
pub(crate) fn integrate_multi_file(
    session: &mut dyn EngineSession,
    package_file: &Path,
    model_name: &str,
    configs: &[InterceptionConfig],
) -> Result<Interception, InterceptError> {
    tracing::info!(
        num_interception_tasks = configs.len(),
        "starting model interception for multi-file package"
    );
    session.load(package_file)?;
    let resolved_ports = resolve_output_ports(session, configs)?;

    let package_dir = package_file.parent().unwrap_or_else(|| Path::new("."));
    let model_short_name = model_name.rsplit('.').next().unwrap_or(model_name);
    let system_model_path = package_dir.join(format!("{model_short_name}.mo"));
    if !system_model_path.exists() {
        return Err(InterceptError::MissingSubmodelFile {
            submodel: model_name.to_string(),
            expected: system_model_path,
        });
    }

    let mut interceptor_files = Vec::new();
    for (config, ports) in configs.iter().zip(&resolved_ports) {
        let (interceptor_name, code) =
            generate_interceptor(&config.submodel_name, ports, &config.csv_uri, true);
        let path = package_dir.join(format!("{interceptor_name}.mo"));
        std::fs::write(&path, code)?;
        tracing::info!(file_path = %path.display(), "generated interceptor model file");
        interceptor_files.push(path);
    }

    let system_code = std::fs::read_to_string(&system_model_path)?;
    let modified_system =
        rewire_system_code(&system_code, model_short_name, configs, &resolved_ports);
    let intercepted_name = format!("{model_short_name}_Intercepted");
    let final_system =
        model::rename_model_block(&modified_system, model_short_name, &intercepted_name);

    let modified_path = package_dir.join(format!("{intercepted_name}.mo"));
    std::fs::write(&modified_path, final_system)?;
    tracing::info!(
        file_path = %modified_path.display(),
        "generated modified system model file"
    );

    Ok(Interception {
        interceptor_model_paths: interceptor_files,
        system_model_path: modified_path,
        replaced_models: Vec::new(),
    })
}
