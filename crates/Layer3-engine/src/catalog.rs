//! Definition catalog - the tasks and debug configurations the engine can run

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tether_foundation::{DebugConfiguration, Error, JsonStore, Result, TaskDefinition};
use tracing::debug;

/// Catalog file inside the project store
pub const CATALOG_FILE: &str = "tasks.json";

/// Named tasks and debug configurations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    #[serde(default)]
    pub configurations: Vec<DebugConfiguration>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_configuration(mut self, configuration: DebugConfiguration) -> Self {
        self.configurations.push(configuration);
        self
    }

    /// `<root>/.tether/tasks.json`; empty when the file is missing
    pub fn load_project(root: &Path) -> Result<Self> {
        let catalog = JsonStore::project(root)
            .load_optional::<Catalog>(CATALOG_FILE)?
            .unwrap_or_default();
        catalog.validate()?;
        debug!(
            tasks = catalog.tasks.len(),
            configurations = catalog.configurations.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn save_project(&self, root: &Path) -> Result<()> {
        JsonStore::project(root).save(CATALOG_FILE, self)
    }

    /// Labels and names must be unique and non-empty
    pub fn validate(&self) -> Result<()> {
        let mut labels = HashSet::new();
        for task in &self.tasks {
            if task.label.trim().is_empty() {
                return Err(Error::Config("Task with an empty label".to_string()));
            }
            if !labels.insert(task.label.as_str()) {
                return Err(Error::Config(format!("Duplicate task label '{}'", task.label)));
            }
        }

        let mut names = HashSet::new();
        for configuration in &self.configurations {
            if !names.insert(configuration.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate debug configuration '{}'",
                    configuration.name
                )));
            }
        }
        Ok(())
    }

    pub fn task(&self, label: &str) -> Result<&TaskDefinition> {
        self.tasks
            .iter()
            .find(|t| t.label == label)
            .ok_or_else(|| Error::NotFound(format!("Task '{}'", label)))
    }

    pub fn configuration(&self, name: &str) -> Result<&DebugConfiguration> {
        self.configurations
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("Debug configuration '{}'", name)))
    }
}
