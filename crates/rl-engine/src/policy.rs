//! Exploration strategies for action selection.

use rand::Rng;
use serde::{Deserialize, Serialize};

use revpilot_core::config::{ExplorationConfig, StrategyKind};

/// Exploration strategy, carried as a sum type so each variant keeps its own
/// parameters.
///
/// Only epsilon-greedy is differentiated today. `Ucb` and `ThompsonSampling`
/// are accepted and persisted, but both currently resolve to the same greedy
/// best-known-action lookup as the exploit branch; the variants exist so a
/// real implementation is a local change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ExplorationStrategy {
    EpsilonGreedy {
        epsilon: f64,
        min_epsilon: f64,
        decay_rate: f64,
    },
    Ucb {
        confidence_level: f64,
    },
    ThompsonSampling {
        prior_alpha: f64,
        prior_beta: f64,
    },
}

impl ExplorationStrategy {
    pub fn from_config(config: &ExplorationConfig) -> Self {
        match config.strategy {
            StrategyKind::EpsilonGreedy => ExplorationStrategy::EpsilonGreedy {
                epsilon: config.initial_epsilon,
                min_epsilon: config.min_epsilon,
                decay_rate: config.decay_rate,
            },
            StrategyKind::Ucb => ExplorationStrategy::Ucb {
                confidence_level: config.confidence_level,
            },
            StrategyKind::ThompsonSampling => ExplorationStrategy::ThompsonSampling {
                prior_alpha: config.prior_alpha,
                prior_beta: config.prior_beta,
            },
        }
    }

    /// Whether this selection should explore with a random action.
    ///
    /// Always false for the non-differentiated strategies, which therefore
    /// fall through to the greedy lookup.
    pub fn should_explore(&self, rng: &mut impl Rng) -> bool {
        match self {
            ExplorationStrategy::EpsilonGreedy { epsilon, .. } => rng.gen::<f64>() < *epsilon,
            ExplorationStrategy::Ucb { .. } | ExplorationStrategy::ThompsonSampling { .. } => false,
        }
    }

    /// Decay epsilon toward its floor. No-op for other strategies.
    pub fn decay(&mut self) {
        if let ExplorationStrategy::EpsilonGreedy {
            epsilon,
            min_epsilon,
            decay_rate,
        } = self
        {
            *epsilon = min_epsilon.max(*epsilon * (1.0 - *decay_rate));
        }
    }

    /// Current exploration rate, 0.0 for strategies without one.
    pub fn exploration_rate(&self) -> f64 {
        match self {
            ExplorationStrategy::EpsilonGreedy { epsilon, .. } => *epsilon,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epsilon_greedy(epsilon: f64, min_epsilon: f64, decay_rate: f64) -> ExplorationStrategy {
        ExplorationStrategy::EpsilonGreedy {
            epsilon,
            min_epsilon,
            decay_rate,
        }
    }

    #[test]
    fn test_decay_follows_geometric_law() {
        let mut strategy = epsilon_greedy(0.3, 0.05, 0.001);
        for n in 1..=50u32 {
            strategy.decay();
            let expected = 0.05f64.max(0.3 * (1.0 - 0.001f64).powi(n as i32));
            assert!(
                (strategy.exploration_rate() - expected).abs() < 1e-12,
                "after {n} decays"
            );
        }
    }

    #[test]
    fn test_decay_respects_floor() {
        let mut strategy = epsilon_greedy(0.3, 0.05, 0.5);
        for _ in 0..100 {
            strategy.decay();
            assert!(strategy.exploration_rate() >= 0.05);
            assert!(strategy.exploration_rate() <= 0.3);
        }
        assert_eq!(strategy.exploration_rate(), 0.05);
    }

    #[test]
    fn test_extreme_epsilon_forces_branch() {
        let mut rng = rand::thread_rng();
        let always = epsilon_greedy(1.1, 0.05, 0.0);
        let never = epsilon_greedy(0.0, 0.0, 0.0);
        for _ in 0..50 {
            assert!(always.should_explore(&mut rng));
            assert!(!never.should_explore(&mut rng));
        }
    }

    #[test]
    fn test_undifferentiated_strategies_never_explore() {
        let mut rng = rand::thread_rng();
        let ucb = ExplorationStrategy::Ucb {
            confidence_level: 2.0,
        };
        let thompson = ExplorationStrategy::ThompsonSampling {
            prior_alpha: 1.0,
            prior_beta: 1.0,
        };
        for _ in 0..50 {
            assert!(!ucb.should_explore(&mut rng));
            assert!(!thompson.should_explore(&mut rng));
        }
    }

    #[test]
    fn test_strategy_serialization_tags() {
        let strategy = epsilon_greedy(0.3, 0.05, 0.001);
        let json = serde_json::to_string(&strategy).unwrap();
        assert!(json.contains("\"type\":\"epsilon_greedy\""));
        let back: ExplorationStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
    }
}
