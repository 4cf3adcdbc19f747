//! Read-only status and insight surfaces for operators and dashboards.
//! Safe to call at any time; never mutates.

use chrono::{DateTime, Utc};
use serde::Serialize;

use revpilot_core::Action;
use revpilot_experiments::ExperimentInsights;
use revpilot_rl_engine::PerformanceMetrics;

use crate::optimizer::RevenueOptimizer;

/// Snapshot of the optimization process.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStatus {
    pub running: bool,
    pub last_state_update: Option<DateTime<Utc>>,
    pub last_experiment_check: Option<DateTime<Utc>>,
    pub last_model_save: Option<DateTime<Utc>>,
    pub active_experiments: usize,
    pub completed_experiments: usize,
    pub engine_performance: PerformanceMetrics,
    pub experiment_insights: ExperimentInsights,
}

/// One action surfaced in the merged leaderboard: learned by the policy,
/// proven by experiments, or both.
#[derive(Debug, Clone, Serialize)]
pub struct TopActionInsight {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wins: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_lift: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTopic {
    ImplementAction,
    ExperimentStrategy,
    General,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRecommendation {
    pub topic: RecommendationTopic,
    pub priority: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Action::is_empty")]
    pub action: Action,
}

/// Merged view of what the whole stack has learned about revenue.
#[derive(Debug, Clone, Serialize)]
pub struct RevenueInsights {
    pub top_actions: Vec<TopActionInsight>,
    pub experiment_success_rate: f64,
    pub average_lift: f64,
    pub recommendations: Vec<OptimizationRecommendation>,
}

impl RevenueOptimizer {
    /// Current process status: running flag, schedule stamps, counts, and
    /// the read-only aggregates of both subsystems.
    pub fn status(&self) -> OptimizerStatus {
        let timers = *self.timers.read();
        OptimizerStatus {
            running: self.is_running(),
            last_state_update: timers.last_state_update,
            last_experiment_check: timers.last_experiment_check,
            last_model_save: timers.last_model_save,
            active_experiments: self.experiments().active_count(),
            completed_experiments: self.experiments().completed_count(),
            engine_performance: self.engine().performance_metrics(),
            experiment_insights: self.experiments().insights(),
        }
    }

    /// Merged revenue insights: top actions from both the learned policy
    /// and experiment winners, plus generated recommendations.
    pub fn revenue_insights(&self) -> RevenueInsights {
        let policy = self.engine().policy_insights();
        let experiments = self.experiments().insights();

        let mut top_actions: Vec<TopActionInsight> = policy
            .top_actions
            .iter()
            .map(|ranked| TopActionInsight {
                action: ranked.action.clone(),
                average_value: Some(ranked.average_value),
                wins: None,
                average_lift: None,
            })
            .collect();
        for winner in &experiments.top_actions {
            top_actions.push(TopActionInsight {
                action: winner.action.clone(),
                average_value: None,
                wins: Some(winner.wins),
                average_lift: Some(winner.average_lift),
            });
        }

        RevenueInsights {
            top_actions,
            experiment_success_rate: experiments.success_rate,
            average_lift: experiments.average_lift,
            recommendations: self.generate_recommendations(&policy.top_actions),
        }
    }

    fn generate_recommendations(
        &self,
        policy_top: &[revpilot_rl_engine::RankedAction],
    ) -> Vec<OptimizationRecommendation> {
        let mut recommendations = Vec::new();

        for (i, ranked) in policy_top.iter().take(3).enumerate() {
            recommendations.push(OptimizationRecommendation {
                topic: RecommendationTopic::ImplementAction,
                priority: i as u32 + 1,
                message: format!(
                    "Implement high-performing action with estimated value {:.2}",
                    ranked.average_value
                ),
                action: ranked.action.clone(),
            });
        }

        if let Some((kind, rate)) = self.best_experiment_kind() {
            recommendations.push(OptimizationRecommendation {
                topic: RecommendationTopic::ExperimentStrategy,
                priority: 4,
                message: format!(
                    "Focus on {kind} experiments which have shown a {:.0}% success rate",
                    rate * 100.0
                ),
                action: Action::new(),
            });
        }

        if recommendations.is_empty() {
            recommendations.push(OptimizationRecommendation {
                topic: RecommendationTopic::General,
                priority: 1,
                message: "Continue collecting data through diverse experiments to build a \
                          stronger optimization model"
                    .to_string(),
                action: Action::new(),
            });
        }

        recommendations
    }

    /// Completed-experiment kind with the best non-control win rate.
    fn best_experiment_kind(&self) -> Option<(String, f64)> {
        use std::collections::BTreeMap;

        let mut per_kind: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for experiment in self.experiments().completed_experiments() {
            let slot = per_kind
                .entry(experiment.kind.label().to_string())
                .or_insert((0, 0));
            slot.0 += 1;
            let won = experiment
                .analysis
                .as_ref()
                .and_then(|a| a.winner.as_deref())
                .and_then(|winner| experiment.variant(winner))
                .map(|v| !v.is_control())
                .unwrap_or(false);
            if won {
                slot.1 += 1;
            }
        }

        per_kind
            .into_iter()
            .map(|(kind, (count, wins))| (kind, wins as f64 / count as f64))
            .filter(|(_, rate)| *rate > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use revpilot_core::config::AppConfig;
    use revpilot_core::ActionValue;
    use revpilot_experiments::ExperimentKind;

    use super::*;

    fn optimizer() -> Arc<RevenueOptimizer> {
        Arc::new(RevenueOptimizer::new(AppConfig::default()))
    }

    fn revenue(value: f64) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("revenue".to_string(), value);
        metrics
    }

    #[test]
    fn test_status_starts_neutral() {
        let optimizer = optimizer();
        let status = optimizer.status();
        assert!(!status.running);
        assert!(status.last_state_update.is_none());
        assert_eq!(status.active_experiments, 0);
        assert_eq!(status.completed_experiments, 0);
        assert_eq!(status.engine_performance.total_actions, 0);
    }

    #[test]
    fn test_empty_insights_fall_back_to_general_recommendation() {
        let optimizer = optimizer();
        let insights = optimizer.revenue_insights();
        assert!(insights.top_actions.is_empty());
        assert_eq!(insights.recommendations.len(), 1);
        assert_eq!(
            insights.recommendations[0].topic,
            RecommendationTopic::General
        );
    }

    #[test]
    fn test_insights_merge_policy_and_experiment_winners() {
        let optimizer = optimizer();

        // Teach the policy one action.
        let mut taught = revpilot_core::Action::new();
        taught.set("pricing", ActionValue::Number(60.0));
        optimizer
            .engine()
            .update_state(revpilot_core::Telemetry::default_state());
        optimizer.engine().receive_reward(&taught, &revenue(1.0));

        // Win one paired experiment with a different action.
        let mut winning = revpilot_core::Action::new();
        winning.set("content_type", ActionValue::Choice("video".into()));
        let manager = optimizer.experiments();
        let experiment =
            manager.design_experiment(ExperimentKind::Paired, winning.clone(), &BTreeMap::new());
        let experiment = manager.start_experiment(experiment);
        manager.record_data(experiment.id, "control", &revenue(100.0));
        manager.record_data(experiment.id, "variant_1", &revenue(140.0));
        manager.complete_experiment(experiment.id);

        let insights = optimizer.revenue_insights();
        assert_eq!(insights.top_actions.len(), 2);
        assert!(insights
            .top_actions
            .iter()
            .any(|t| t.average_value.is_some() && t.action == taught));
        assert!(insights
            .top_actions
            .iter()
            .any(|t| t.wins == Some(1) && t.action == winning));
        assert_eq!(insights.experiment_success_rate, 1.0);

        let topics: Vec<_> = insights.recommendations.iter().map(|r| r.topic).collect();
        assert!(topics.contains(&RecommendationTopic::ImplementAction));
        assert!(topics.contains(&RecommendationTopic::ExperimentStrategy));
    }
}
