use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::{default_action_space, ActionSpace};

/// Root application configuration. Loaded from environment variables with
/// the prefix `REVPILOT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub experiments: ExperimentsConfig,
    #[serde(default)]
    pub optimizer: LoopConfig,
}

// ─── RL Engine ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_discount_factor")]
    pub discount_factor: f64,
    #[serde(default)]
    pub exploration: ExplorationConfig,
    #[serde(default)]
    pub constraints: ConstraintConfig,
    #[serde(default = "default_reward_weights")]
    pub reward_weights: BTreeMap<String, f64>,
    #[serde(default = "default_action_space")]
    pub action_space: ActionSpace,
    #[serde(default)]
    pub reward_attribution: AttributionMode,
}

/// Which state key a reward update is attributed to.
///
/// `ReceiptState` (the default) uses the engine state at the moment the
/// reward arrives; if state has drifted since the action was chosen the
/// update lands on a different key. `DecisionState` replays the state key
/// recorded with the action's audit entry instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMode {
    #[default]
    ReceiptState,
    DecisionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    EpsilonGreedy,
    Ucb,
    ThompsonSampling,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorationConfig {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_initial_epsilon")]
    pub initial_epsilon: f64,
    #[serde(default = "default_min_epsilon")]
    pub min_epsilon: f64,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_prior_alpha")]
    pub prior_alpha: f64,
    #[serde(default = "default_prior_beta")]
    pub prior_beta: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintConfig {
    #[serde(default = "default_max_budget")]
    pub max_budget: f64,
    #[serde(default = "default_min_profit_margin")]
    pub min_profit_margin: f64,
    #[serde(default = "default_max_risk_level")]
    pub max_risk_level: f64,
}

fn default_learning_rate() -> f64 {
    0.01
}
fn default_discount_factor() -> f64 {
    0.95
}
fn default_initial_epsilon() -> f64 {
    0.3
}
fn default_min_epsilon() -> f64 {
    0.05
}
fn default_decay_rate() -> f64 {
    0.001
}
fn default_confidence_level() -> f64 {
    2.0
}
fn default_prior_alpha() -> f64 {
    1.0
}
fn default_prior_beta() -> f64 {
    1.0
}
fn default_max_budget() -> f64 {
    10_000.0
}
fn default_min_profit_margin() -> f64 {
    0.2
}
fn default_max_risk_level() -> f64 {
    0.5
}
fn default_reward_weights() -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::new();
    weights.insert("revenue".to_string(), 0.6);
    weights.insert("profit".to_string(), 0.3);
    weights.insert("growth".to_string(), 0.1);
    weights
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            discount_factor: default_discount_factor(),
            exploration: ExplorationConfig::default(),
            constraints: ConstraintConfig::default(),
            reward_weights: default_reward_weights(),
            action_space: default_action_space(),
            reward_attribution: AttributionMode::default(),
        }
    }
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            initial_epsilon: default_initial_epsilon(),
            min_epsilon: default_min_epsilon(),
            decay_rate: default_decay_rate(),
            confidence_level: default_confidence_level(),
            prior_alpha: default_prior_alpha(),
            prior_beta: default_prior_beta(),
        }
    }
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            max_budget: default_max_budget(),
            min_profit_margin: default_min_profit_margin(),
            max_risk_level: default_max_risk_level(),
        }
    }
}

// ─── Experiments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentsConfig {
    #[serde(default)]
    pub duration: DurationConfig,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_paired_enabled")]
    pub paired_enabled: bool,
    #[serde(default)]
    pub multivariate: MultivariateConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub metrics: MetricSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DurationConfig {
    #[serde(default = "default_min_hours")]
    pub min_hours: i64,
    #[serde(default = "default_max_hours")]
    pub max_hours: i64,
    #[serde(default = "default_hours")]
    pub default_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultivariateConfig {
    #[serde(default = "default_multivariate_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_variants")]
    pub max_variants: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    #[serde(default = "default_bandit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_arm_count")]
    pub arm_count: usize,
}

/// Metrics an experiment tracks: one primary (the winner is decided on it)
/// plus secondaries recorded alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSet {
    #[serde(default = "default_primary_metric")]
    pub primary: String,
    #[serde(default = "default_secondary_metrics")]
    pub secondary: Vec<String>,
}

fn default_min_sample_size() -> u64 {
    100
}
fn default_max_concurrent() -> usize {
    5
}
fn default_paired_enabled() -> bool {
    true
}
fn default_multivariate_enabled() -> bool {
    true
}
fn default_max_variants() -> usize {
    4
}
fn default_bandit_enabled() -> bool {
    true
}
fn default_arm_count() -> usize {
    3
}
fn default_min_hours() -> i64 {
    24
}
fn default_max_hours() -> i64 {
    168
}
fn default_hours() -> i64 {
    72
}
fn default_primary_metric() -> String {
    "revenue".to_string()
}
fn default_secondary_metrics() -> Vec<String> {
    vec![
        "conversion_rate".to_string(),
        "profit_margin".to_string(),
        "customer_acquisition_cost".to_string(),
    ]
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            duration: DurationConfig::default(),
            min_sample_size: default_min_sample_size(),
            max_concurrent: default_max_concurrent(),
            paired_enabled: default_paired_enabled(),
            multivariate: MultivariateConfig::default(),
            bandit: BanditConfig::default(),
            metrics: MetricSet::default(),
        }
    }
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            min_hours: default_min_hours(),
            max_hours: default_max_hours(),
            default_hours: default_hours(),
        }
    }
}

impl Default for MultivariateConfig {
    fn default() -> Self {
        Self {
            enabled: default_multivariate_enabled(),
            max_variants: default_max_variants(),
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            enabled: default_bandit_enabled(),
            arm_count: default_arm_count(),
        }
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self {
            primary: default_primary_metric(),
            secondary: default_secondary_metrics(),
        }
    }
}

// ─── Optimization loop ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_optimization_interval_secs")]
    pub optimization_interval_secs: u64,
    #[serde(default = "default_state_update_interval_secs")]
    pub state_update_interval_secs: u64,
    #[serde(default = "default_experiment_check_interval_secs")]
    pub experiment_check_interval_secs: u64,
    #[serde(default = "default_model_save_interval_secs")]
    pub model_save_interval_secs: u64,
    #[serde(default = "default_model_save_path")]
    pub model_save_path: String,
    #[serde(default = "default_experiment_save_path")]
    pub experiment_save_path: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_optimization_interval_secs() -> u64 {
    3600
}
fn default_state_update_interval_secs() -> u64 {
    900
}
fn default_experiment_check_interval_secs() -> u64 {
    1800
}
fn default_model_save_interval_secs() -> u64 {
    86_400
}
fn default_model_save_path() -> String {
    "models/revpilot".to_string()
}
fn default_experiment_save_path() -> String {
    "data/experiments".to_string()
}
fn default_max_iterations() -> u64 {
    1000
}
fn default_error_backoff_secs() -> u64 {
    60
}
fn default_stop_timeout_secs() -> u64 {
    30
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            optimization_interval_secs: default_optimization_interval_secs(),
            state_update_interval_secs: default_state_update_interval_secs(),
            experiment_check_interval_secs: default_experiment_check_interval_secs(),
            model_save_interval_secs: default_model_save_interval_secs(),
            model_save_path: default_model_save_path(),
            experiment_save_path: default_experiment_save_path(),
            max_iterations: default_max_iterations(),
            error_backoff_secs: default_error_backoff_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            experiments: ExperimentsConfig::default(),
            optimizer: LoopConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("REVPILOT")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
