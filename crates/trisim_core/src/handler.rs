//! External physical-process handlers for co-simulation.
//!
//! A handler consumes the stage-1 primary-inputs CSV and produces an
//! output CSV plus a column-mapping placeholder describing which of the
//! target submodel's output columns it supplied. Handlers are resolved
//! through a name-keyed registry or as external commands, never by
//! reflective code loading.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::HandlerError;
use crate::jobs::Params;

/// Port name -> column mapping string (`"{time_col, col1, ...}"`).
pub type OutputPlaceholder = BTreeMap<String, String>;

/// A physical-process handler invoked between the two simulation stages.
///
/// Implementations must write a CSV to `output_csv` and must not assume
/// anything about `input_csv` beyond it being a CSV with a `time` column
/// and the declared input ports as columns.
pub trait Handler: Send + Sync {
    fn run(
        &self,
        input_csv: &Path,
        output_csv: &Path,
        params: &Params,
    ) -> Result<OutputPlaceholder, HandlerError>;
}

/// Configuration of one handler attachment point.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    /// Key of a handler registered in the [`HandlerRegistry`].
    #[serde(default)]
    pub handler_name: Option<String>,
    /// External executable implementing the handler contract.
    #[serde(default)]
    pub handler_command: Option<PathBuf>,
    pub submodel_name: String,
    pub instance_name: String,
    #[serde(default)]
    pub params: Params,
    /// Explicit column mapping; when absent it is derived from the
    /// submodel's declared output ports.
    #[serde(default)]
    pub output_placeholder: Option<OutputPlaceholder>,
}

/// Name-keyed handler registry. Built-in handlers are registered by the
/// embedding application; external commands need no registration.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolve a handler config to a runnable handler.
    pub fn resolve(&self, config: &HandlerConfig) -> Result<Arc<dyn Handler>, HandlerError> {
        if let Some(name) = &config.handler_name {
            return self
                .handlers
                .get(name)
                .cloned()
                .ok_or_else(|| HandlerError::UnknownHandler(name.clone()));
        }
        if let Some(command) = &config.handler_command {
            return Ok(Arc::new(CommandHandler::new(command.clone())));
        }
        Err(HandlerError::Unresolvable {
            instance: config.instance_name.clone(),
        })
    }
}

/// Handler backed by an external executable.
///
/// The command is invoked as
/// `program --input <csv> --output <csv> [--param k=v ...]` and must print
/// its output placeholder as a JSON object on stdout.
pub struct CommandHandler {
    program: PathBuf,
}

impl CommandHandler {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl Handler for CommandHandler {
    fn run(
        &self,
        input_csv: &Path,
        output_csv: &Path,
        params: &Params,
    ) -> Result<OutputPlaceholder, HandlerError> {
        let program = self.program.display().to_string();
        let mut command = Command::new(&self.program);
        command
            .arg("--input")
            .arg(input_csv)
            .arg("--output")
            .arg(output_csv);
        for (name, value) in params {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            command.arg("--param").arg(format!("{name}={rendered}"));
        }

        tracing::info!(program = %program, "invoking co-simulation handler");
        let output = command.output().map_err(|source| HandlerError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(HandlerError::Failed {
                program,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if !output_csv.exists() {
            return Err(HandlerError::OutputMissing(output_csv.to_path_buf()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let placeholder: OutputPlaceholder =
            serde_json::from_str(stdout.trim()).map_err(HandlerError::BadPlaceholder)?;
        Ok(placeholder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    impl Handler for NullHandler {
        fn run(
            &self,
            _input_csv: &Path,
            output_csv: &Path,
            _params: &Params,
        ) -> Result<OutputPlaceholder, HandlerError> {
            std::fs::write(output_csv, "time,y\n0,0\n")?;
            let mut placeholder = OutputPlaceholder::new();
            placeholder.insert("to_sds".to_string(), "{1,2}".to_string());
            Ok(placeholder)
        }
    }

    fn config(name: Option<&str>, command: Option<&str>) -> HandlerConfig {
        HandlerConfig {
            handler_name: name.map(str::to_string),
            handler_command: command.map(PathBuf::from),
            submodel_name: "Cycle.I_ISS".to_string(),
            instance_name: "i_iss".to_string(),
            params: Params::new(),
            output_placeholder: None,
        }
    }

    #[test]
    fn test_registry_resolves_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("i_iss", Arc::new(NullHandler));
        assert!(registry.resolve(&config(Some("i_iss"), None)).is_ok());
    }

    #[test]
    fn test_registry_rejects_unknown_name() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.resolve(&config(Some("missing"), None)),
            Err(HandlerError::UnknownHandler(_))
        ));
    }

    #[test]
    fn test_registry_requires_name_or_command() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.resolve(&config(None, None)),
            Err(HandlerError::Unresolvable { .. })
        ));
    }

    #[test]
    fn test_registry_builds_command_handler() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve(&config(None, Some("/usr/bin/true"))).is_ok());
    }
}
