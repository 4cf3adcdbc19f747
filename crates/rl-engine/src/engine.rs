//! Tabular decision engine — owns the business state, selects actions under
//! the exploration policy, and folds experiment rewards back into the value
//! store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use revpilot_core::config::{AttributionMode, EngineConfig};
use revpilot_core::{Action, ActionKey, ActionValue, StateKey, Telemetry};

use crate::policy::ExplorationStrategy;

/// Decision variables whose spend is capped by the budget constraint.
const SPEND_VARIABLE: &str = "ad_spend";

/// Categorical variables broken out in the policy-insight preference report.
const PREFERENCE_VARIABLES: [&str; 3] = ["content_type", "seo_tactic", "affiliate_action"];

/// Audit entry for one selected action, including the state key it was
/// chosen under (used by decision-state reward attribution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub state_key: StateKey,
    pub action: Action,
}

/// Audit entry for one received reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRecord {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub components: BTreeMap<String, f64>,
    pub reward: f64,
}

/// Mutable learning parameters, replaced wholesale on model load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningParams {
    pub learning_rate: f64,
    pub discount_factor: f64,
}

/// Read-only aggregate over the audit history and value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_actions: u64,
    pub total_rewards: u64,
    pub average_reward: f64,
    pub recent_average_reward: f64,
    pub exploration_rate: f64,
    pub value_store_size: usize,
}

/// One entry of the top-action ranking in [`PolicyInsights`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedAction {
    pub action: Action,
    pub average_value: f64,
}

/// Read-only view of what the policy has learned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInsights {
    pub top_actions: Vec<RankedAction>,
    pub state_coverage: usize,
    /// Per categorical variable: average observed reward per chosen value.
    pub action_preferences: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Reinforcement-learning decision engine over discretized business state.
///
/// All mutable collections sit behind their own lock so the background
/// optimization loop and caller threads can share one engine via `Arc`.
pub struct DecisionEngine {
    config: EngineConfig,
    pub(crate) params: RwLock<LearningParams>,
    pub(crate) state: RwLock<Option<Telemetry>>,
    pub(crate) strategy: RwLock<ExplorationStrategy>,
    pub(crate) values: RwLock<HashMap<StateKey, HashMap<ActionKey, f64>>>,
    pub(crate) action_log: RwLock<Vec<ActionRecord>>,
    pub(crate) reward_log: RwLock<Vec<RewardRecord>>,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let strategy = ExplorationStrategy::from_config(&config.exploration);
        let params = LearningParams {
            learning_rate: config.learning_rate,
            discount_factor: config.discount_factor,
        };
        tracing::info!(?strategy, "decision engine initialized");
        Self {
            config,
            params: RwLock::new(params),
            state: RwLock::new(None),
            strategy: RwLock::new(strategy),
            values: RwLock::new(HashMap::new()),
            action_log: RwLock::new(Vec::new()),
            reward_log: RwLock::new(Vec::new()),
        }
    }

    /// Deep-merge a telemetry snapshot into the current state, creating the
    /// default state on first use. Empty snapshots are ignored.
    pub fn update_state(&self, snapshot: Telemetry) {
        if snapshot.is_empty() {
            return;
        }
        let mut guard = self.state.write();
        guard
            .get_or_insert_with(Telemetry::default_state)
            .merge(snapshot);
        debug!("state updated from snapshot");
    }

    /// Select the next action for the given state (or the internal state,
    /// initializing it to the defaults if none exists yet).
    ///
    /// Never fails: with no prior data the result is a uniformly random
    /// action per decision variable, constrained afterwards.
    pub fn select_action(&self, state: Option<&Telemetry>) -> Action {
        let state_key = match state {
            Some(state) => StateKey::of(state),
            None => {
                let mut guard = self.state.write();
                let state = guard.get_or_insert_with(|| {
                    warn!("no state available, initializing default state");
                    Telemetry::default_state()
                });
                StateKey::of(state)
            }
        };

        let mut rng = rand::thread_rng();
        let mut strategy = self.strategy.write();

        // UCB and Thompson sampling never report an explore decision, so
        // they resolve to the same greedy lookup as the exploit branch.
        let mut action = if strategy.should_explore(&mut rng) {
            debug!("exploring with a random action");
            self.random_action(&mut rng)
        } else {
            debug!("exploiting the best known action");
            self.best_action(&state_key, &mut rng)
        };
        strategy.decay();
        drop(strategy);

        self.apply_constraints(&mut action);

        self.action_log.write().push(ActionRecord {
            timestamp: Utc::now(),
            state_key,
            action: action.clone(),
        });
        action
    }

    /// Fold a reward back into the value store and audit history.
    ///
    /// The scalar reward is the weighted sum of the named components minus
    /// any `penalties` component. Returns the computed reward.
    pub fn receive_reward(&self, action: &Action, components: &BTreeMap<String, f64>) -> f64 {
        let reward = self.weighted_reward(components);

        self.reward_log.write().push(RewardRecord {
            timestamp: Utc::now(),
            action: action.clone(),
            components: components.clone(),
            reward,
        });

        if let Some(state_key) = self.attribution_key(action) {
            let learning_rate = self.params.read().learning_rate;
            let mut values = self.values.write();
            let slot = values
                .entry(state_key)
                .or_default()
                .entry(ActionKey::of(action))
                .or_insert(0.0);
            *slot += learning_rate * (reward - *slot);
            debug!(value = *slot, reward, "updated state-action value");
        }

        reward
    }

    /// Read-only performance aggregates.
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        let rewards: Vec<f64> = self.reward_log.read().iter().map(|r| r.reward).collect();
        let average = if rewards.is_empty() {
            0.0
        } else {
            rewards.iter().sum::<f64>() / rewards.len() as f64
        };
        let recent: &[f64] = if rewards.len() > 10 {
            &rewards[rewards.len() - 10..]
        } else {
            &rewards
        };
        let recent_average = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f64>() / recent.len() as f64
        };

        PerformanceMetrics {
            total_actions: self.action_log.read().len() as u64,
            total_rewards: rewards.len() as u64,
            average_reward: average,
            recent_average_reward: recent_average,
            exploration_rate: self.strategy.read().exploration_rate(),
            value_store_size: self.values.read().len(),
        }
    }

    /// Read-only view of the learned policy: top actions by average value
    /// across states and per-variable preference breakdown.
    pub fn policy_insights(&self) -> PolicyInsights {
        let values = self.values.read();

        let mut by_action: HashMap<ActionKey, Vec<f64>> = HashMap::new();
        for actions in values.values() {
            for (action_key, value) in actions {
                by_action.entry(action_key.clone()).or_default().push(*value);
            }
        }

        let mut ranked: Vec<RankedAction> = by_action
            .into_iter()
            .map(|(action_key, values)| RankedAction {
                action: action_key.to_action(),
                average_value: values.iter().sum::<f64>() / values.len() as f64,
            })
            .collect();
        ranked.sort_by(|a, b| b.average_value.total_cmp(&a.average_value));
        ranked.truncate(5);

        PolicyInsights {
            top_actions: ranked,
            state_coverage: values.len(),
            action_preferences: self.action_preferences(),
        }
    }

    fn random_action(&self, rng: &mut impl Rng) -> Action {
        self.config
            .action_space
            .iter()
            .map(|(variable, domain)| (variable.clone(), domain.sample(rng)))
            .collect()
    }

    /// Highest-valued action recorded for this state key, or a random action
    /// when the key is unseen or empty.
    fn best_action(&self, state_key: &StateKey, rng: &mut impl Rng) -> Action {
        let values = self.values.read();
        let best = values.get(state_key).and_then(|actions| {
            actions
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(action_key, _)| action_key.to_action())
        });
        match best {
            Some(action) => action,
            None => {
                drop(values);
                self.random_action(rng)
            }
        }
    }

    /// Clamp spend-like variables to the configured budget.
    fn apply_constraints(&self, action: &mut Action) {
        if let Some(ActionValue::Number(spend)) = action.get_mut(SPEND_VARIABLE) {
            *spend = spend.min(self.config.constraints.max_budget);
        }
    }

    fn weighted_reward(&self, components: &BTreeMap<String, f64>) -> f64 {
        let mut reward = 0.0;
        for (name, weight) in &self.config.reward_weights {
            if let Some(value) = components.get(name) {
                reward += value * weight;
            }
        }
        if let Some(penalties) = components.get("penalties") {
            reward -= penalties;
        }
        reward
    }

    /// State key the reward update should land on, per the configured
    /// attribution mode. `None` when no state exists yet.
    fn attribution_key(&self, action: &Action) -> Option<StateKey> {
        match self.config.reward_attribution {
            AttributionMode::ReceiptState => self.state.read().as_ref().map(StateKey::of),
            AttributionMode::DecisionState => {
                let log = self.action_log.read();
                log.iter()
                    .rev()
                    .find(|record| record.action == *action)
                    .map(|record| record.state_key.clone())
                    .or_else(|| self.state.read().as_ref().map(StateKey::of))
            }
        }
    }

    fn action_preferences(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let action_log = self.action_log.read();
        let reward_log = self.reward_log.read();

        let mut preferences = BTreeMap::new();
        for variable in PREFERENCE_VARIABLES {
            let mut totals: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            for record in action_log.iter() {
                let Some(ActionValue::Choice(choice)) = record.action.get(variable) else {
                    continue;
                };
                // First reward at or after the action stands in for its
                // outcome; precise attribution happens in the value store.
                if let Some(reward) = reward_log
                    .iter()
                    .find(|r| r.timestamp >= record.timestamp)
                    .map(|r| r.reward)
                {
                    let slot = totals.entry(choice.clone()).or_insert((0.0, 0));
                    slot.0 += reward;
                    slot.1 += 1;
                }
            }
            let averages: BTreeMap<String, f64> = totals
                .into_iter()
                .map(|(choice, (total, count))| (choice, total / count as f64))
                .collect();
            preferences.insert(variable.to_string(), averages);
        }
        preferences
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revpilot_core::config::{ExplorationConfig, StrategyKind};

    fn engine_with(mutate: impl FnOnce(&mut EngineConfig)) -> DecisionEngine {
        let mut config = EngineConfig::default();
        mutate(&mut config);
        DecisionEngine::new(config)
    }

    fn greedy_exploration() -> ExplorationConfig {
        ExplorationConfig {
            strategy: StrategyKind::EpsilonGreedy,
            initial_epsilon: 0.0,
            min_epsilon: 0.0,
            decay_rate: 0.0,
            ..ExplorationConfig::default()
        }
    }

    fn pricing_action(price: f64) -> Action {
        let mut action = Action::new();
        action.set("pricing", ActionValue::Number(price));
        action
    }

    fn revenue_components(value: f64) -> BTreeMap<String, f64> {
        let mut components = BTreeMap::new();
        components.insert("revenue".to_string(), value);
        components
    }

    #[test]
    fn test_select_action_covers_action_space() {
        let engine = engine_with(|_| {});
        let action = engine.select_action(None);
        for variable in [
            "content_type",
            "pricing",
            "ad_spend",
            "seo_tactic",
            "affiliate_action",
        ] {
            assert!(action.contains(variable), "missing {variable}");
        }
    }

    #[test]
    fn test_constraint_clamps_ad_spend() {
        let engine = engine_with(|config| {
            config.constraints.max_budget = 100.0;
            config.exploration.initial_epsilon = 1.0;
            config.exploration.min_epsilon = 1.0;
        });
        for _ in 0..50 {
            let action = engine.select_action(None);
            let spend = action.get("ad_spend").and_then(ActionValue::as_number);
            assert!(spend.unwrap() <= 100.0);
        }
    }

    #[test]
    fn test_reward_is_weighted_sum() {
        let engine = engine_with(|_| {});
        let mut components = BTreeMap::new();
        components.insert("revenue".to_string(), 0.5);
        components.insert("profit".to_string(), 0.2);
        let reward = engine.receive_reward(&pricing_action(49.0), &components);
        assert!((reward - 0.36).abs() < 1e-12);
    }

    #[test]
    fn test_penalties_subtract_from_reward() {
        let engine = engine_with(|_| {});
        let mut components = revenue_components(1.0);
        components.insert("penalties".to_string(), 0.1);
        let reward = engine.receive_reward(&pricing_action(49.0), &components);
        assert!((reward - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unweighted_components_are_ignored() {
        let engine = engine_with(|_| {});
        let mut components = BTreeMap::new();
        components.insert("sentiment".to_string(), 10.0);
        let reward = engine.receive_reward(&pricing_action(49.0), &components);
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn test_reward_without_state_skips_value_update() {
        let engine = engine_with(|_| {});
        engine.receive_reward(&pricing_action(49.0), &revenue_components(1.0));
        assert_eq!(engine.performance_metrics().value_store_size, 0);
        assert_eq!(engine.performance_metrics().total_rewards, 1);
    }

    #[test]
    fn test_first_update_stores_learning_rate_times_reward() {
        let engine = engine_with(|config| {
            config.learning_rate = 0.1;
        });
        engine.update_state(Telemetry::default_state());

        // Components {revenue: 1.0} weigh to 0.6; first update from zero
        // stores learning_rate * reward.
        let action = pricing_action(50.0);
        let reward = engine.receive_reward(&action, &revenue_components(1.0));
        assert!((reward - 0.6).abs() < 1e-12);

        let insights = engine.policy_insights();
        assert_eq!(insights.state_coverage, 1);
        assert!((insights.top_actions[0].average_value - 0.06).abs() < 1e-12);

        // Second update moves the stored value toward the reward.
        engine.receive_reward(&action, &revenue_components(1.0));
        let insights = engine.policy_insights();
        let expected = 0.06 + 0.1 * (0.6 - 0.06);
        assert!((insights.top_actions[0].average_value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_exploit_returns_highest_valued_action() {
        let engine = engine_with(|config| {
            config.learning_rate = 0.5;
            config.exploration = greedy_exploration();
        });
        engine.update_state(Telemetry::default_state());

        let strong = pricing_action(80.0);
        let weak = pricing_action(20.0);
        for _ in 0..5 {
            engine.receive_reward(&strong, &revenue_components(1.0));
        }
        engine.receive_reward(&weak, &revenue_components(0.01));

        for _ in 0..10 {
            assert_eq!(engine.select_action(None), strong);
        }
    }

    #[test]
    fn test_decision_state_attribution_survives_drift() {
        let engine = engine_with(|config| {
            config.reward_attribution = AttributionMode::DecisionState;
            config.exploration = greedy_exploration();
        });

        let mut snapshot = Telemetry::group();
        let mut traffic = Telemetry::group();
        traffic.set("organic", Telemetry::Number(100.0));
        snapshot.set("traffic", traffic);
        engine.update_state(snapshot.clone());

        // Chosen under the organic=100 state and logged with that key.
        let action = engine.select_action(None);

        // State drifts before the reward lands.
        let mut drift = Telemetry::group();
        let mut traffic = Telemetry::group();
        traffic.set("organic", Telemetry::Number(900.0));
        drift.set("traffic", traffic);
        engine.update_state(drift);

        engine.receive_reward(&action, &revenue_components(1.0));

        // Back at the decision-time state, the exploit branch finds the
        // credited action again.
        engine.update_state(snapshot);
        assert_eq!(engine.select_action(None), action);
    }

    #[test]
    fn test_performance_metrics_track_histories() {
        let engine = engine_with(|_| {});
        engine.update_state(Telemetry::default_state());
        for i in 0..12 {
            engine.receive_reward(&pricing_action(10.0), &revenue_components(i as f64 / 12.0));
        }
        engine.select_action(None);

        let metrics = engine.performance_metrics();
        assert_eq!(metrics.total_actions, 1);
        assert_eq!(metrics.total_rewards, 12);
        assert!(metrics.average_reward > 0.0);
        // Recent average covers the last 10 rewards only.
        assert!(metrics.recent_average_reward > metrics.average_reward);
        assert_eq!(metrics.value_store_size, 1);
    }

    #[test]
    fn test_action_preferences_average_rewards() {
        let engine = engine_with(|config| {
            config.exploration.initial_epsilon = 1.0;
            config.exploration.min_epsilon = 1.0;
        });
        engine.update_state(Telemetry::default_state());
        let action = engine.select_action(None);
        engine.receive_reward(&action, &revenue_components(1.0));

        let insights = engine.policy_insights();
        let choice = match action.get("content_type").unwrap() {
            ActionValue::Choice(c) => c.clone(),
            other => panic!("expected choice, got {other:?}"),
        };
        let prefs = &insights.action_preferences["content_type"];
        assert!((prefs[&choice] - 0.6).abs() < 1e-12);
    }
}
