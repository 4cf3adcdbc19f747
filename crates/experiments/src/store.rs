//! Experiment persistence — JSON documents holding active experiments,
//! the completed history, and the analysis index.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use revpilot_core::OptimizerResult;

use crate::manager::ExperimentManager;
use crate::types::{Analysis, Experiment};

/// Serialized form of an [`ExperimentManager`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExperimentStore {
    pub active: BTreeMap<Uuid, Experiment>,
    pub completed: Vec<Experiment>,
    pub analyses: BTreeMap<Uuid, Analysis>,
}

impl ExperimentManager {
    /// Capture all experiment state as a store document.
    pub fn snapshot(&self) -> ExperimentStore {
        ExperimentStore {
            active: self
                .active_experiments()
                .into_iter()
                .map(|e| (e.id, e))
                .collect(),
            completed: self.completed_experiments(),
            analyses: self
                .analyses()
                .into_iter()
                .collect(),
        }
    }

    /// Replace all experiment state from a store document.
    pub fn restore(&self, store: ExperimentStore) {
        self.replace_state(store.active, store.completed, store.analyses);
    }

    /// Save all experiments to a JSON file, creating parent directories as
    /// needed.
    pub fn save(&self, path: &Path) -> OptimizerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, document)?;
        info!(path = %path.display(), "experiments saved");
        Ok(())
    }

    /// Load experiments from a JSON file, replacing the current contents.
    pub fn load(&self, path: &Path) -> OptimizerResult<()> {
        let document = fs::read_to_string(path)?;
        let store: ExperimentStore = serde_json::from_str(&document)?;
        self.restore(store);
        info!(path = %path.display(), "experiments loaded");
        Ok(())
    }
}
