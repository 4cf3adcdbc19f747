//! Model persistence — JSON snapshots that round-trip the value store,
//! learning parameters, exploration-policy state, and both audit histories.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use revpilot_core::{ActionKey, OptimizerResult, StateKey};

use crate::engine::{ActionRecord, DecisionEngine, LearningParams, RewardRecord};
use crate::policy::ExplorationStrategy;

/// One state's slice of the value store. Structural keys cannot serve as
/// JSON object keys, so the table is persisted as an entry list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEntry {
    pub state: StateKey,
    pub actions: Vec<(ActionKey, f64)>,
}

/// Serialized form of a [`DecisionEngine`]: everything needed to resume
/// identical behavior after reload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub values: Vec<ValueEntry>,
    pub params: LearningParams,
    pub exploration: ExplorationStrategy,
    pub action_log: Vec<ActionRecord>,
    pub reward_log: Vec<RewardRecord>,
}

impl DecisionEngine {
    /// Capture the current model as a snapshot document.
    pub fn snapshot(&self) -> ModelSnapshot {
        let values = self
            .values
            .read()
            .iter()
            .map(|(state, actions)| ValueEntry {
                state: state.clone(),
                actions: actions.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            })
            .collect();
        ModelSnapshot {
            values,
            params: self.params.read().clone(),
            exploration: self.strategy.read().clone(),
            action_log: self.action_log.read().clone(),
            reward_log: self.reward_log.read().clone(),
        }
    }

    /// Replace the model from a snapshot document.
    pub fn restore(&self, snapshot: ModelSnapshot) {
        let mut values = self.values.write();
        values.clear();
        for entry in snapshot.values {
            values.insert(entry.state, entry.actions.into_iter().collect());
        }
        drop(values);

        *self.params.write() = snapshot.params;
        *self.strategy.write() = snapshot.exploration;
        *self.action_log.write() = snapshot.action_log;
        *self.reward_log.write() = snapshot.reward_log;
    }

    /// Save the model to a JSON file, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> OptimizerResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, document)?;
        info!(path = %path.display(), "model saved");
        Ok(())
    }

    /// Load the model from a JSON file, replacing the current contents.
    pub fn load(&self, path: &Path) -> OptimizerResult<()> {
        let document = fs::read_to_string(path)?;
        let snapshot: ModelSnapshot = serde_json::from_str(&document)?;
        self.restore(snapshot);
        info!(path = %path.display(), "model loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use revpilot_core::config::EngineConfig;
    use revpilot_core::{Action, ActionValue, Telemetry};

    use super::*;

    fn trained_engine() -> DecisionEngine {
        let mut config = EngineConfig::default();
        config.learning_rate = 0.2;
        let engine = DecisionEngine::new(config);
        engine.update_state(Telemetry::default_state());

        let mut action = Action::new();
        action.set("pricing", ActionValue::Number(75.0));
        let mut components = BTreeMap::new();
        components.insert("revenue".to_string(), 0.8);
        components.insert("profit".to_string(), 0.4);

        engine.select_action(None);
        engine.receive_reward(&action, &components);
        engine.receive_reward(&action, &components);
        engine
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");

        let engine = trained_engine();
        engine.save(&path).unwrap();

        let restored = DecisionEngine::new(EngineConfig::default());
        restored.load(&path).unwrap();

        let before = engine.performance_metrics();
        let after = restored.performance_metrics();
        assert_eq!(before.total_actions, after.total_actions);
        assert_eq!(before.total_rewards, after.total_rewards);
        assert_eq!(before.value_store_size, after.value_store_size);
        assert!((before.average_reward - after.average_reward).abs() < 1e-12);
        assert!((before.exploration_rate - after.exploration_rate).abs() < 1e-12);

        let top_before = engine.policy_insights().top_actions;
        let top_after = restored.policy_insights().top_actions;
        assert_eq!(top_before.len(), top_after.len());
        assert_eq!(top_before[0].action, top_after[0].action);
        assert!((top_before[0].average_value - top_after[0].average_value).abs() < 1e-12);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DecisionEngine::new(EngineConfig::default());
        assert!(engine.load(&dir.path().join("absent.json")).is_err());
    }
}
