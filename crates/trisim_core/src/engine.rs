//! Simulation engine boundary.
//!
//! The engine is an external collaborator exposing load / inspect /
//! simulate / build operations. [`EngineSession`] is the seam the rest of
//! the crate programs against; [`OmcSession`] drives the OpenModelica
//! compiler by emitting `.mos` scripts into a scratch directory and running
//! the `omc` binary per call, replaying session state (loaded files,
//! pending overrides) into every script.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;

use crate::error::EngineError;
use crate::params::split_top_level;

/// A declared signal port of a model, with its vector dimension (1 = scalar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub dim: usize,
}

/// Simulation options applied to every subsequent `simulate` call.
#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    pub stop_time: f64,
    pub step_size: f64,
    pub tolerance: Option<f64>,
    pub variable_filter: Option<String>,
}

/// Paths produced by a one-off model build, reused across many runs.
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    pub executable: PathBuf,
    pub init_file: PathBuf,
}

/// Factory for engine sessions. Shared across worker threads; each session
/// belongs to exactly one job or sweep loop.
pub trait Engine: Send + Sync {
    fn open_session(&self, work_dir: &Path) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One conversation with the simulation engine.
///
/// `terminate` is idempotent and must be called on every exit path,
/// including failures.
pub trait EngineSession {
    fn load(&mut self, package: &Path) -> Result<(), EngineError>;
    fn output_ports(&mut self, model: &str) -> Result<Vec<Port>, EngineError>;
    fn input_ports(&mut self, model: &str) -> Result<Vec<Port>, EngineError>;
    fn set_parameters(&mut self, overrides: &[String]);
    fn set_simulation_options(&mut self, options: SimulationOptions);
    fn simulate(&mut self, model: &str, result_file: &Path) -> Result<(), EngineError>;
    fn build(&mut self, model: &str) -> Result<BuildArtifacts, EngineError>;
    fn terminate(&mut self);
}

/// Format a parameter override the way the engine expects it:
/// `name=value` for scalars, `name={v1,v2,...}` for arrays,
/// `name="value"` for strings, `name=true/false` for booleans.
pub fn format_parameter_value(name: &str, value: &Value) -> String {
    fn element(value: &Value) -> String {
        match value {
            Value::String(s) => {
                if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
                    s.clone()
                } else {
                    format!("\"{s}\"")
                }
            }
            Value::Bool(b) => b.to_string(),
            other => scalar(other),
        }
    }
    match value {
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(element).collect();
            format!("{name}={{{}}}", elements.join(","))
        }
        Value::Bool(b) => format!("{name}={b}"),
        Value::String(s) => format!("{name}=\"{s}\""),
        other => format!("{name}={}", scalar(other)),
    }
}

/// Format an override pair for the compiled model executable's `-override`
/// flag, which takes unquoted scalars.
pub fn format_override(name: &str, value: &Value) -> String {
    match value {
        Value::String(s) => format!("{name}={s}"),
        Value::Bool(b) => format!("{name}={b}"),
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(scalar).collect();
            format!("{name}={{{}}}", elements.join(","))
        }
        other => format!("{name}={}", scalar(other)),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a value string coming back from the engine into a typed value.
/// Handles arrays `{v1,v2,...}` (recursively), booleans, quoted strings,
/// and numbers; anything else stays a string.
pub fn parse_engine_value(value_str: &str) -> Value {
    let s = value_str.trim();
    if s.starts_with('{') && s.ends_with('}') {
        let inner = &s[1..s.len() - 1];
        if inner.trim().is_empty() {
            return Value::Array(Vec::new());
        }
        return Value::Array(
            split_top_level(inner, ',')
                .iter()
                .map(|e| parse_engine_value(e))
                .collect(),
        );
    }
    match s {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if s.starts_with('"') && s.ends_with('"') && s.len() >= 2 {
        return Value::String(s[1..s.len() - 1].to_string());
    }
    if let Ok(x) = s.parse::<f64>() {
        return serde_json::Number::from_f64(x).map_or_else(
            || Value::String(s.to_string()),
            Value::Number,
        );
    }
    Value::String(s.to_string())
}

/// OpenModelica engine: spawns one `omc` process per scripted operation.
pub struct OmcEngine {
    omc_bin: PathBuf,
}

impl OmcEngine {
    pub fn new(omc_bin: impl Into<PathBuf>) -> Self {
        Self {
            omc_bin: omc_bin.into(),
        }
    }
}

impl Default for OmcEngine {
    fn default() -> Self {
        Self::new("omc")
    }
}

impl Engine for OmcEngine {
    fn open_session(&self, work_dir: &Path) -> Result<Box<dyn EngineSession>, EngineError> {
        std::fs::create_dir_all(work_dir)?;
        Ok(Box::new(OmcSession {
            omc_bin: self.omc_bin.clone(),
            work_dir: work_dir.to_path_buf(),
            loaded_files: Vec::new(),
            overrides: Vec::new(),
            options: SimulationOptions::default(),
            script_counter: 0,
            terminated: false,
        }))
    }
}

/// Escape a string for inclusion in a `.mos` string literal.
fn mos_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub struct OmcSession {
    omc_bin: PathBuf,
    work_dir: PathBuf,
    loaded_files: Vec<PathBuf>,
    /// Pending `name=value` overrides, latest setting per name wins.
    overrides: Vec<(String, String)>,
    options: SimulationOptions,
    script_counter: usize,
    terminated: bool,
}

impl OmcSession {
    fn run_script(&mut self, body: &str) -> Result<String, EngineError> {
        self.script_counter += 1;
        let script_path = self
            .work_dir
            .join(format!("session_{}.mos", self.script_counter));

        let mut script = String::new();
        script.push_str(&format!("cd(\"{}\");\n", mos_string(&posix(&self.work_dir))));
        for file in &self.loaded_files {
            script.push_str(&format!("loadFile(\"{}\");\n", mos_string(&posix(file))));
        }
        script.push_str(body);
        script.push('\n');
        script.push_str("getErrorString();\n");
        std::fs::write(&script_path, &script)?;

        let output = Command::new(&self.omc_bin)
            .arg(&script_path)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| EngineError::CommandFailed {
                program: self.omc_bin.display().to_string(),
                status: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                program: self.omc_bin.display().to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn components(&mut self, model: &str) -> Result<String, EngineError> {
        self.run_script(&format!("getComponents({model});"))
    }

    fn ports_of_type(&mut self, model: &str, port_type: &str) -> Result<Vec<Port>, EngineError> {
        let output = self.components(model)?;
        Ok(parse_component_ports(&output, port_type))
    }

    fn override_string(&self, job_overrides: &[String]) -> String {
        let mut pairs: Vec<String> = self
            .overrides
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        pairs.extend(job_overrides.iter().cloned());
        pairs.join(",")
    }
}

impl EngineSession for OmcSession {
    fn load(&mut self, package: &Path) -> Result<(), EngineError> {
        let output = self.run_script(&format!("loadFile(\"{}\");", mos_string(&posix(package))))?;
        if output.contains("false") && !output.contains("true") {
            return Err(EngineError::LoadFailed(package.to_path_buf()));
        }
        self.loaded_files.push(package.to_path_buf());
        tracing::debug!(package = %package.display(), "loaded package into omc session");
        Ok(())
    }

    fn output_ports(&mut self, model: &str) -> Result<Vec<Port>, EngineError> {
        self.ports_of_type(model, "Modelica.Blocks.Interfaces.RealOutput")
    }

    fn input_ports(&mut self, model: &str) -> Result<Vec<Port>, EngineError> {
        self.ports_of_type(model, "Modelica.Blocks.Interfaces.RealInput")
    }

    fn set_parameters(&mut self, overrides: &[String]) {
        for entry in overrides {
            let (name, value) = entry
                .split_once('=')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                .unwrap_or_else(|| (entry.trim().to_string(), String::new()));
            if let Some(existing) = self.overrides.iter_mut().find(|(n, _)| *n == name) {
                existing.1 = value;
            } else {
                self.overrides.push((name, value));
            }
        }
    }

    fn set_simulation_options(&mut self, options: SimulationOptions) {
        self.options = options;
    }

    fn simulate(&mut self, model: &str, result_file: &Path) -> Result<(), EngineError> {
        let intervals = if self.options.step_size > 0.0 {
            (self.options.stop_time / self.options.step_size).round().max(1.0) as usize
        } else {
            500
        };

        let mut call = format!(
            "simulate({model}, stopTime={}, numberOfIntervals={intervals}, outputFormat=\"csv\"",
            self.options.stop_time
        );
        if let Some(tolerance) = self.options.tolerance {
            call.push_str(&format!(", tolerance={tolerance}"));
        }
        if let Some(filter) = &self.options.variable_filter {
            call.push_str(&format!(", variableFilter=\"{}\"", mos_string(filter)));
        }
        let override_str = self.override_string(&[]);
        if !override_str.is_empty() {
            call.push_str(&format!(
                ", simflags=\"-override {}\"",
                mos_string(&override_str)
            ));
        }
        call.push_str(");");

        let output = self.run_script(&call)?;

        let produced = self.work_dir.join(format!("{model}_res.csv"));
        if !produced.exists() {
            return Err(EngineError::Expression {
                expr: call,
                output: tail(&output, 500),
            });
        }
        if let Some(parent) = result_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&produced, result_file)
            .or_else(|_| std::fs::copy(&produced, result_file).map(|_| ()))?;
        if !result_file.exists() {
            return Err(EngineError::NoResultFile(result_file.to_path_buf()));
        }
        Ok(())
    }

    fn build(&mut self, model: &str) -> Result<BuildArtifacts, EngineError> {
        let output = self.run_script(&format!("buildModel({model});"))?;

        let executable = self.work_dir.join(exe_name(model));
        let init_file = self.work_dir.join(format!("{model}_init.xml"));
        if !executable.exists() || !init_file.exists() {
            return Err(EngineError::BuildFailed {
                model: model.to_string(),
                output: tail(&output, 500),
            });
        }
        Ok(BuildArtifacts {
            executable,
            init_file,
        })
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            tracing::debug!(work_dir = %self.work_dir.display(), "omc session terminated");
        }
    }
}

impl Drop for OmcSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Name of the built model executable, platform-dependent.
pub fn exe_name(model: &str) -> String {
    if cfg!(windows) {
        format!("{model}.exe")
    } else {
        model.to_string()
    }
}

fn posix(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Parse `getComponents` output, collecting ports of the given interface
/// type. Each component record looks like
/// `{Modelica.Blocks.Interfaces.RealOutput, to_sds, "comment", ..., {5}}`;
/// the trailing braces group carries the declared dimensions.
fn parse_component_ports(output: &str, port_type: &str) -> Vec<Port> {
    let trimmed = output.trim();
    let Some(start) = trimmed.find('{') else {
        return Vec::new();
    };
    let Some(end) = trimmed.rfind('}') else {
        return Vec::new();
    };
    if start + 1 > end {
        return Vec::new();
    }
    let body = &trimmed[start + 1..end];

    let mut ports = Vec::new();
    for record in split_top_level(body, ',') {
        let record = record.trim();
        if !(record.starts_with('{') && record.ends_with('}')) {
            continue;
        }
        let fields = split_top_level(&record[1..record.len() - 1], ',');
        if fields.len() < 2 || fields[0].trim() != port_type {
            continue;
        }
        let name = fields[1].trim().to_string();
        let dim = fields
            .last()
            .map(|f| f.trim())
            .filter(|f| f.starts_with('{') && f.ends_with('}'))
            .and_then(|f| f[1..f.len() - 1].trim().parse::<usize>().ok())
            .unwrap_or(1);
        ports.push(Port { name, dim });
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_scalar_override() {
        assert_eq!(
            format_parameter_value("blanket.TBR", &json!(1.15)),
            "blanket.TBR=1.15"
        );
    }

    #[test]
    fn test_format_array_override() {
        assert_eq!(
            format_parameter_value("pulse", &json!([1.0, 0.0, 1.0])),
            "pulse={1.0,0.0,1.0}"
        );
    }

    #[test]
    fn test_format_string_and_bool_overrides() {
        assert_eq!(
            format_parameter_value("table", &json!("data.csv")),
            "table=\"data.csv\""
        );
        assert_eq!(format_parameter_value("enabled", &json!(true)), "enabled=true");
    }

    #[test]
    fn test_format_array_quotes_string_elements() {
        assert_eq!(
            format_parameter_value("names", &json!(["a", "b"])),
            "names={\"a\",\"b\"}"
        );
    }

    #[test]
    fn test_parse_engine_value_round_trip() {
        assert_eq!(parse_engine_value("1.5"), json!(1.5));
        assert_eq!(parse_engine_value("true"), json!(true));
        assert_eq!(parse_engine_value("\"abc\""), json!("abc"));
        assert_eq!(parse_engine_value("{1,2,3}"), json!([1.0, 2.0, 3.0]));
        assert_eq!(
            parse_engine_value("{{1,2},{3,4}}"),
            json!([[1.0, 2.0], [3.0, 4.0]])
        );
        assert_eq!(parse_engine_value("{}"), json!([]));
    }

    #[test]
    fn test_parse_component_ports() {
        let output = r#"{{Modelica.Blocks.Interfaces.RealOutput, to_sds, "flow", "public", false, false, false, false, "unspecified", "none", "unspecified", {5}}, {Modelica.Blocks.Interfaces.RealInput, from_plasma, "", "public", false, false, false, false, "unspecified", "none", "unspecified", {}}}"#;
        let outputs = parse_component_ports(output, "Modelica.Blocks.Interfaces.RealOutput");
        assert_eq!(
            outputs,
            vec![Port {
                name: "to_sds".to_string(),
                dim: 5
            }]
        );
        let inputs = parse_component_ports(output, "Modelica.Blocks.Interfaces.RealInput");
        assert_eq!(
            inputs,
            vec![Port {
                name: "from_plasma".to_string(),
                dim: 1
            }]
        );
    }

    #[test]
    fn test_override_string_latest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = OmcSession {
            omc_bin: PathBuf::from("omc"),
            work_dir: dir.path().to_path_buf(),
            loaded_files: Vec::new(),
            overrides: Vec::new(),
            options: SimulationOptions::default(),
            script_counter: 0,
            terminated: false,
        };
        session.set_parameters(&["a=1".to_string(), "b=2".to_string()]);
        session.set_parameters(&["a=3".to_string()]);
        assert_eq!(session.override_string(&[]), "a=3,b=2");
    }
}
