use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::intercept::InterceptMode;

/// Fatal configuration problems, surfaced before any simulation work begins.
#[derive(Debug)]
pub enum ConfigError {
    /// A required key is absent from the run configuration.
    MissingKey(&'static str),
    /// A key is present but its value cannot be used.
    InvalidValue { key: &'static str, reason: String },
    Io { path: PathBuf, source: io::Error },
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingKey(key) => {
                write!(f, "missing required configuration key '{key}'")
            }
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "invalid value for configuration key '{key}': {reason}")
            }
            ConfigError::Io { path, source } => {
                write!(f, "failed to read configuration {}: {source}", path.display())
            }
            ConfigError::Parse(e) => write!(f, "failed to parse configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Errors from job generation (CSV job tables).
#[derive(Debug)]
pub enum JobError {
    MissingJobTable(PathBuf),
    Csv { path: PathBuf, source: csv::Error },
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::MissingJobTable(path) => {
                write!(f, "job table CSV does not exist: {}", path.display())
            }
            JobError::Csv { path, source } => {
                write!(f, "failed to read job table {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobError::Csv { source, .. } => Some(source),
            JobError::MissingJobTable(_) => None,
        }
    }
}

/// Errors from the external simulation engine boundary.
#[derive(Debug)]
pub enum EngineError {
    Io(io::Error),
    /// The engine refused to load a model package.
    LoadFailed(PathBuf),
    /// The engine process could not be started or exited abnormally.
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    /// A scripted engine expression was rejected.
    Expression { expr: String, output: String },
    /// Simulation finished without producing the expected result file.
    NoResultFile(PathBuf),
    BuildFailed { model: String, output: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io(e) => write!(f, "engine I/O error: {e}"),
            EngineError::LoadFailed(path) => {
                write!(f, "engine failed to load package {}", path.display())
            }
            EngineError::CommandFailed {
                program,
                status,
                stderr,
            } => match status {
                Some(code) => write!(f, "{program} exited with status {code}: {stderr}"),
                None => write!(f, "{program} terminated by signal: {stderr}"),
            },
            EngineError::Expression { expr, output } => {
                write!(f, "engine rejected expression '{expr}': {output}")
            }
            EngineError::NoResultFile(path) => {
                write!(f, "simulation produced no result file at {}", path.display())
            }
            EngineError::BuildFailed { model, output } => {
                write!(f, "failed to build model '{model}': {output}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Io(e)
    }
}

/// Fatal structural errors during model interception. Any of these aborts
/// the whole interception batch; partial interception is never accepted.
#[derive(Debug)]
pub enum InterceptError {
    EmptyBatch,
    MixedModes {
        expected: InterceptMode,
        found: InterceptMode,
        submodel: String,
    },
    /// A submodel scheduled for interception declares no output ports.
    NoOutputPorts(String),
    /// The system model block could not be located in the package source.
    ModelBlockNotFound(String),
    InvalidPackagePath(PathBuf),
    MissingSubmodelFile {
        submodel: String,
        expected: PathBuf,
    },
    Engine(EngineError),
    Io(io::Error),
}

impl fmt::Display for InterceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptError::EmptyBatch => write!(f, "interception batch is empty"),
            InterceptError::MixedModes {
                expected,
                found,
                submodel,
            } => write!(
                f,
                "mixed interception modes are not supported: expected '{expected}', \
                 found '{found}' for submodel '{submodel}'"
            ),
            InterceptError::NoOutputPorts(model) => {
                write!(f, "no output ports found in model '{model}'")
            }
            InterceptError::ModelBlockNotFound(model) => {
                write!(f, "could not find model block '{model}' in package source")
            }
            InterceptError::InvalidPackagePath(path) => {
                write!(f, "invalid package path: {}", path.display())
            }
            InterceptError::MissingSubmodelFile { submodel, expected } => write!(
                f,
                "submodel file for '{submodel}' not found at {}",
                expected.display()
            ),
            InterceptError::Engine(e) => write!(f, "{e}"),
            InterceptError::Io(e) => write!(f, "interception I/O error: {e}"),
        }
    }
}

impl std::error::Error for InterceptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InterceptError::Engine(e) => Some(e),
            InterceptError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for InterceptError {
    fn from(e: EngineError) -> Self {
        InterceptError::Engine(e)
    }
}

impl From<io::Error> for InterceptError {
    fn from(e: io::Error) -> Self {
        InterceptError::Io(e)
    }
}

/// Errors from external co-simulation handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// No handler with the configured name is registered.
    UnknownHandler(String),
    /// The handler config names neither a registered handler nor a command.
    Unresolvable { instance: String },
    Spawn { program: String, source: io::Error },
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    /// The handler returned without writing its output CSV.
    OutputMissing(PathBuf),
    BadPlaceholder(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::UnknownHandler(name) => {
                write!(f, "no handler registered under name '{name}'")
            }
            HandlerError::Unresolvable { instance } => write!(
                f,
                "handler config for instance '{instance}' must set either \
                 'handler_name' or 'handler_command'"
            ),
            HandlerError::Spawn { program, source } => {
                write!(f, "failed to spawn handler '{program}': {source}")
            }
            HandlerError::Failed {
                program,
                status,
                stderr,
            } => match status {
                Some(code) => {
                    write!(f, "handler '{program}' exited with status {code}: {stderr}")
                }
                None => write!(f, "handler '{program}' terminated by signal: {stderr}"),
            },
            HandlerError::OutputMissing(path) => {
                write!(f, "handler output CSV missing at {}", path.display())
            }
            HandlerError::BadPlaceholder(e) => {
                write!(f, "failed to parse handler output placeholder: {e}")
            }
            HandlerError::Io(e) => write!(f, "handler I/O error: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandlerError::Spawn { source, .. } => Some(source),
            HandlerError::BadPlaceholder(e) => Some(e),
            HandlerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HandlerError {
    fn from(e: io::Error) -> Self {
        HandlerError::Io(e)
    }
}

/// Errors from the columnar result store.
#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Csv(csv::Error),
    MissingColumn { file: PathBuf, column: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
            StoreError::Csv(e) => write!(f, "store CSV error: {e}"),
            StoreError::MissingColumn { file, column } => {
                write!(f, "column '{column}' not found in {}", file.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Csv(e) => Some(e),
            StoreError::MissingColumn { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<csv::Error> for StoreError {
    fn from(e: csv::Error) -> Self {
        StoreError::Csv(e)
    }
}

/// Top-level sweep orchestration error.
#[derive(Debug)]
pub enum SweepError {
    Config(ConfigError),
    Jobs(JobError),
    Engine(EngineError),
    Intercept(InterceptError),
    Handler(HandlerError),
    Store(StoreError),
    Io(io::Error),
}

impl fmt::Display for SweepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepError::Config(e) => write!(f, "{e}"),
            SweepError::Jobs(e) => write!(f, "{e}"),
            SweepError::Engine(e) => write!(f, "{e}"),
            SweepError::Intercept(e) => write!(f, "{e}"),
            SweepError::Handler(e) => write!(f, "{e}"),
            SweepError::Store(e) => write!(f, "{e}"),
            SweepError::Io(e) => write!(f, "sweep I/O error: {e}"),
        }
    }
}

impl std::error::Error for SweepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SweepError::Config(e) => Some(e),
            SweepError::Jobs(e) => Some(e),
            SweepError::Engine(e) => Some(e),
            SweepError::Intercept(e) => Some(e),
            SweepError::Handler(e) => Some(e),
            SweepError::Store(e) => Some(e),
            SweepError::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for SweepError {
    fn from(e: ConfigError) -> Self {
        SweepError::Config(e)
    }
}

impl From<JobError> for SweepError {
    fn from(e: JobError) -> Self {
        SweepError::Jobs(e)
    }
}

impl From<EngineError> for SweepError {
    fn from(e: EngineError) -> Self {
        SweepError::Engine(e)
    }
}

impl From<InterceptError> for SweepError {
    fn from(e: InterceptError) -> Self {
        SweepError::Intercept(e)
    }
}

impl From<HandlerError> for SweepError {
    fn from(e: HandlerError) -> Self {
        SweepError::Handler(e)
    }
}

impl From<StoreError> for SweepError {
    fn from(e: StoreError) -> Self {
        SweepError::Store(e)
    }
}

impl From<io::Error> for SweepError {
    fn from(e: io::Error) -> Self {
        SweepError::Io(e)
    }
}
