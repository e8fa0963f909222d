//! Mock engine implementation shared by the integration tests.

use std::collections::HashMap;
use std::path::Path;

use crate::engine::{BuildArtifacts, Engine, EngineSession, Port, SimulationOptions};
use crate::error::EngineError;

#[derive(Debug, Default, Clone)]
pub struct ModelPorts {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

/// In-process engine stand-in. Simulations write a synthetic
/// `time,sds.inventory` series whose values depend on the `blanket.TBR`
/// override, so jobs are distinguishable in the store.
#[derive(Default)]
pub struct MockEngine {
    pub ports: HashMap<String, ModelPorts>,
    /// Simulation fails when any pending override contains this marker.
    pub fail_marker: Option<String>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: &str, inputs: Vec<Port>, outputs: Vec<Port>) -> Self {
        self.ports
            .insert(model.to_string(), ModelPorts { inputs, outputs });
        self
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }
}

impl Engine for MockEngine {
    fn open_session(&self, work_dir: &Path) -> Result<Box<dyn EngineSession>, EngineError> {
        std::fs::create_dir_all(work_dir)?;
        Ok(Box::new(MockSession {
            ports: self.ports.clone(),
            fail_marker: self.fail_marker.clone(),
            overrides: Vec::new(),
            options: SimulationOptions::default(),
        }))
    }
}

pub struct MockSession {
    ports: HashMap<String, ModelPorts>,
    fail_marker: Option<String>,
    overrides: Vec<(String, String)>,
    options: SimulationOptions,
}

impl MockSession {
    fn override_value(&self, name: &str) -> Option<f64> {
        self.overrides
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.parse().ok())
    }
}

impl EngineSession for MockSession {
    fn load(&mut self, _package: &Path) -> Result<(), EngineError> {
        Ok(())
    }

    fn output_ports(&mut self, model: &str) -> Result<Vec<Port>, EngineError> {
        Ok(self
            .ports
            .get(model)
            .map(|p| p.outputs.clone())
            .unwrap_or_default())
    }

    fn input_ports(&mut self, model: &str) -> Result<Vec<Port>, EngineError> {
        Ok(self
            .ports
            .get(model)
            .map(|p| p.inputs.clone())
            .unwrap_or_default())
    }

    fn set_parameters(&mut self, overrides: &[String]) {
        for entry in overrides {
            let (name, value) = entry
                .split_once('=')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                .unwrap_or_else(|| (entry.clone(), String::new()));
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
        if let Some(marker) = &self.fail_marker {
            if self
                .overrides
                .iter()
                .any(|(n, v)| format!("{n}={v}").contains(marker.as_str()))
            {
                return Err(EngineError::Expression {
                    expr: format!("simulate({model})"),
                    output: "injected failure".to_string(),
                });
            }
        }

        let tbr = self.override_value("blanket.TBR").unwrap_or(1.0);
        let stop = if self.options.stop_time > 0.0 {
            self.options.stop_time
        } else {
            10.0
        };
        let step = if self.options.step_size > 0.0 {
            self.options.step_size
        } else {
            1.0
        };

        let mut csv = String::from("time,sds.inventory\n");
        let mut t = 0.0;
        while t <= stop + step / 2.0 {
            csv.push_str(&format!("{t},{}\n", tbr * 10.0 + t));
            t += step;
        }
        if let Some(parent) = result_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(result_file, csv)?;
        Ok(())
    }

    fn build(&mut self, model: &str) -> Result<BuildArtifacts, EngineError> {
        Err(EngineError::BuildFailed {
            model: model.to_string(),
            output: "mock engine does not build executables".to_string(),
        })
    }

    fn terminate(&mut self) {}
}
