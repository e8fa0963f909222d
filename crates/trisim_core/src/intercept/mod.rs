//! Model interception: rewiring a simulation model so selected output
//! signals are sourced from externally computed CSV data.
//!
//! Two modes exist and must be uniform across a batch:
//!
//! - `interceptor` - a wrapper model is inserted between the submodel and
//!   the rest of the system; the original model text survives unchanged
//!   and a new `_Intercepted` system variant is emitted.
//! - `replacement` - the submodel's equations are regenerated in place
//!   (after a `.bak` backup) to read from the CSV; no rewiring happens
//!   since the port interface is unchanged.

mod interceptor;
mod model;
mod replacement;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::EngineSession;
use crate::error::InterceptError;

/// How an intercepted submodel's outputs are overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterceptMode {
    Interceptor,
    Replacement,
}

impl Default for InterceptMode {
    fn default() -> Self {
        InterceptMode::Interceptor
    }
}

impl fmt::Display for InterceptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptMode::Interceptor => write!(f, "interceptor"),
            InterceptMode::Replacement => write!(f, "replacement"),
        }
    }
}

/// One interception task: which submodel instance to override, from which
/// CSV, and the per-port column mapping supplied by the handler.
#[derive(Debug, Clone)]
pub struct InterceptionConfig {
    pub submodel_name: String,
    pub instance_name: String,
    pub csv_uri: String,
    /// Port name -> column mapping string, e.g. `"{1,2,3}"`. Column `1` is
    /// the pass-through sentinel.
    pub output_placeholder: BTreeMap<String, String>,
    pub mode: InterceptMode,
}

/// A submodel rewritten in replacement mode.
#[derive(Debug, Clone)]
pub struct ReplacedModel {
    pub submodel_name: String,
    pub backup_path: PathBuf,
    pub modified_path: PathBuf,
}

/// Paths produced by an interception batch: everything newly generated,
/// plus the file to load for the subsequent simulation stage.
#[derive(Debug, Clone)]
pub struct Interception {
    pub interceptor_model_paths: Vec<PathBuf>,
    pub system_model_path: PathBuf,
    pub replaced_models: Vec<ReplacedModel>,
}

/// The model name to simulate after interception. Interceptor mode routes
/// through the `_Intercepted` system variant; replacement mode keeps the
/// original name since submodels were rewritten behind the same interface.
pub fn final_model_name(model_name: &str, mode: InterceptMode) -> String {
    match mode {
        InterceptMode::Replacement => model_name.to_string(),
        InterceptMode::Interceptor => match model_name.rsplit_once('.') {
            Some((package, short)) => format!("{package}.{short}_Intercepted"),
            None => format!("{model_name}_Intercepted"),
        },
    }
}

/// Validate that every config in the batch shares one mode. Runs before
/// any engine or filesystem work so a mismatch leaves everything untouched.
fn validate_modes(configs: &[InterceptionConfig]) -> Result<InterceptMode, InterceptError> {
    let first = configs.first().ok_or(InterceptError::EmptyBatch)?;
    for config in configs {
        if config.mode != first.mode {
            return Err(InterceptError::MixedModes {
                expected: first.mode,
                found: config.mode,
                submodel: config.submodel_name.clone(),
            });
        }
    }
    Ok(first.mode)
}

fn is_package_file(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some("package.mo")
}

/// Apply an interception batch to the model package.
///
/// A structural failure (mixed modes, missing model file, zero output
/// ports) aborts the whole batch; partial interception is never accepted.
pub fn integrate_interception(
    session: &mut dyn EngineSession,
    package_path: &Path,
    model_name: &str,
    configs: &[InterceptionConfig],
) -> Result<Interception, InterceptError> {
    let mode = validate_modes(configs)?;
    tracing::info!(
        %mode,
        num_submodels = configs.len(),
        "integrating CSV data replacement"
    );

    match mode {
        InterceptMode::Replacement => {
            if package_path.is_file() && !is_package_file(package_path) {
                replacement::integrate_single_file(package_path, configs)
            } else if package_path.is_dir() {
                replacement::integrate_multi_file(package_path, configs)
            } else if package_path.is_file() {
                let dir = package_path.parent().unwrap_or_else(|| Path::new("."));
                replacement::integrate_multi_file(dir, configs)
            } else {
                Err(InterceptError::InvalidPackagePath(package_path.to_path_buf()))
            }
        }
        InterceptMode::Interceptor => {
            if package_path.is_dir() {
                let package_file = package_path.join("package.mo");
                if !package_file.exists() {
                    return Err(InterceptError::InvalidPackagePath(package_file));
                }
                interceptor::integrate_multi_file(session, &package_file, model_name, configs)
            } else if package_path.is_file() && is_package_file(package_path) {
                interceptor::integrate_multi_file(session, package_path, model_name, configs)
            } else if package_path.is_file() {
                interceptor::integrate_single_file(session, package_path, model_name, configs)
            } else {
                Err(InterceptError::InvalidPackagePath(package_path.to_path_buf()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(submodel: &str, mode: InterceptMode) -> InterceptionConfig {
        InterceptionConfig {
            submodel_name: submodel.to_string(),
            instance_name: "i_iss".to_string(),
            csv_uri: "i_iss_outputs.csv".to_string(),
            output_placeholder: BTreeMap::new(),
            mode,
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            validate_modes(&[]),
            Err(InterceptError::EmptyBatch)
        ));
    }

    #[test]
    fn test_mixed_modes_rejected() {
        let configs = vec![
            config("Cycle.I_ISS", InterceptMode::Interceptor),
            config("Cycle.Div", InterceptMode::Replacement),
        ];
        assert!(matches!(
            validate_modes(&configs),
            Err(InterceptError::MixedModes { .. })
        ));
    }

    #[test]
    fn test_final_model_name() {
        assert_eq!(
            final_model_name("Cycle.System", InterceptMode::Interceptor),
            "Cycle.System_Intercepted"
        );
        assert_eq!(
            final_model_name("Cycle.System", InterceptMode::Replacement),
            "Cycle.System"
        );
        assert_eq!(
            final_model_name("System", InterceptMode::Interceptor),
            "System_Intercepted"
        );
    }
}
