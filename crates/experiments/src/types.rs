//! Experiment domain types — variants, results, analyses, recommendations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use revpilot_core::config::MetricSet;
use revpilot_core::Action;

/// How an experiment splits and routes its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    /// Control plus one variant at a fixed 50/50 split.
    Paired,
    /// Control plus per-variable modifications at fixed equal splits.
    Multivariate,
    /// Control arm plus jittered arms under adaptive allocation.
    Bandit,
}

impl ExperimentKind {
    pub fn label(&self) -> &'static str {
        match self {
            ExperimentKind::Paired => "paired",
            ExperimentKind::Multivariate => "multivariate",
            ExperimentKind::Bandit => "bandit",
        }
    }
}

/// Lifecycle status. The only legal path is Designed → Running → Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    #[default]
    Designed,
    Running,
    Completed,
}

/// One treatment arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    /// Empty action denotes the control/baseline arm.
    pub action: Action,
    /// Fraction of traffic routed to this variant. Across an experiment the
    /// allocations sum to 1.0 (within floating tolerance).
    pub allocation: f64,
    /// Observed primary-metric rewards, kept for bandit arms only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewards: Vec<f64>,
}

impl Variant {
    pub fn is_control(&self) -> bool {
        self.id == "control" || self.id == "arm_0"
    }
}

/// Running per-variant aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantResults {
    pub observations: u64,
    /// Running mean per metric name.
    pub metrics: BTreeMap<String, f64>,
}

/// Aggregated results for a running or completed experiment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub observations: u64,
    pub variants: BTreeMap<String, VariantResults>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ImplementWinner,
    MaintainControl,
    ContinueTesting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
    #[serde(default)]
    pub action: Action,
}

/// Completion analysis: produced once when an experiment completes and
/// never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub winner: Option<String>,
    /// Lift of each non-control variant relative to control on the primary
    /// metric.
    pub lift: BTreeMap<String, f64>,
    pub recommendations: Vec<Recommendation>,
}

/// A designed, running, or completed experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub kind: ExperimentKind,
    pub status: ExperimentStatus,
    pub planned_start: DateTime<Utc>,
    pub planned_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    /// The proposed action this experiment was designed around.
    pub action: Action,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub variants: Vec<Variant>,
    pub metrics: MetricSet,
    pub sample_size_target: u64,
    pub results: Option<ExperimentResults>,
    pub analysis: Option<Analysis>,
}

impl Experiment {
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control())
    }
}

/// Outcome of a status lookup by experiment id.
#[derive(Debug, Clone)]
pub enum ExperimentLookup {
    Active(Box<Experiment>),
    Completed(Box<Experiment>),
    NotFound,
}

/// One ranked entry of the winning-action leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinningAction {
    pub action: Action,
    pub wins: u64,
    pub average_lift: f64,
}

/// Aggregate view across all experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentInsights {
    pub total_experiments: usize,
    pub active_experiments: usize,
    pub completed_experiments: usize,
    /// Fraction of completed experiments whose winner was not the control.
    pub success_rate: f64,
    /// Mean lift across every completed variant-vs-control comparison.
    pub average_lift: f64,
    pub kind_counts: BTreeMap<String, u64>,
    pub top_actions: Vec<WinningAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_detection() {
        let control = Variant {
            id: "control".into(),
            name: "Control".into(),
            action: Action::new(),
            allocation: 0.5,
            rewards: Vec::new(),
        };
        let arm = Variant {
            id: "arm_0".into(),
            name: "Control Arm".into(),
            action: Action::new(),
            allocation: 0.33,
            rewards: Vec::new(),
        };
        let variant = Variant {
            id: "variant_1".into(),
            name: "Variant 1".into(),
            action: Action::new(),
            allocation: 0.5,
            rewards: Vec::new(),
        };
        assert!(control.is_control());
        assert!(arm.is_control());
        assert!(!variant.is_control());
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(ExperimentKind::Paired.label(), "paired");
        assert_eq!(ExperimentKind::Multivariate.label(), "multivariate");
        assert_eq!(ExperimentKind::Bandit.label(), "bandit");
    }
}
