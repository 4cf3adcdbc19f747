//! Experiment lifecycle manager — designs experiments around proposed
//! actions, executes them, adapts bandit traffic allocations via Thompson
//! sampling, and analyzes completed runs.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use revpilot_core::config::ExperimentsConfig;
use revpilot_core::{Action, ActionKey, ActionValue};

use crate::sampling::thompson_score;
use crate::types::{
    Analysis, Experiment, ExperimentInsights, ExperimentKind, ExperimentLookup, ExperimentResults,
    ExperimentStatus, Recommendation, RecommendationKind, Variant, VariantResults, WinningAction,
};

/// Number of Beta draws summed per arm when reallocating bandit traffic.
const THOMPSON_DRAWS: u32 = 1000;

/// Manages the design, execution, and evaluation of experiments.
///
/// Experiments move from the active map to the completed list exactly once;
/// completion is a logical move, never a deletion.
pub struct ExperimentManager {
    config: ExperimentsConfig,
    active: DashMap<Uuid, Experiment>,
    completed: RwLock<Vec<Experiment>>,
    analyses: DashMap<Uuid, Analysis>,
}

impl ExperimentManager {
    pub fn new(config: ExperimentsConfig) -> Self {
        info!(
            max_concurrent = config.max_concurrent,
            min_sample_size = config.min_sample_size,
            "experiment manager initialized"
        );
        Self {
            config,
            active: DashMap::new(),
            completed: RwLock::new(Vec::new()),
            analyses: DashMap::new(),
        }
    }

    /// Design an experiment around a proposed action.
    ///
    /// A kind disabled by configuration falls back to a paired test. The
    /// duration comes from configuration, shortened for high-urgency context
    /// and stretched for low-urgency context.
    pub fn design_experiment(
        &self,
        kind: ExperimentKind,
        action: Action,
        context: &BTreeMap<String, String>,
    ) -> Experiment {
        let kind = if self.kind_enabled(kind) {
            kind
        } else {
            warn!(
                requested = kind.label(),
                "experiment kind disabled, falling back to paired test"
            );
            ExperimentKind::Paired
        };

        let duration_hours = match context.get("urgency").map(String::as_str) {
            Some("high") => self.config.duration.min_hours,
            Some("low") => self.config.duration.max_hours,
            _ => self.config.duration.default_hours,
        };

        let now = Utc::now();
        let experiment = Experiment {
            id: Uuid::new_v4(),
            kind,
            status: ExperimentStatus::Designed,
            planned_start: now,
            planned_end: now + Duration::hours(duration_hours),
            actual_start: None,
            actual_end: None,
            variants: self.generate_variants(kind, &action),
            action,
            context: context.clone(),
            metrics: self.config.metrics.clone(),
            // Placeholder for a power-analysis computation.
            sample_size_target: self.config.min_sample_size,
            results: None,
            analysis: None,
        };

        info!(
            experiment_id = %experiment.id,
            kind = kind.label(),
            duration_hours,
            "experiment designed"
        );
        experiment
    }

    /// Start a designed experiment.
    ///
    /// Refused (returned unmodified) when the concurrency cap is reached.
    /// Otherwise the experiment is marked running, stamped, given a zeroed
    /// results structure, and tracked as active.
    pub fn start_experiment(&self, mut experiment: Experiment) -> Experiment {
        if self.active.len() >= self.config.max_concurrent {
            warn!(
                experiment_id = %experiment.id,
                cap = self.config.max_concurrent,
                "concurrent experiment cap reached, not starting"
            );
            return experiment;
        }

        experiment.status = ExperimentStatus::Running;
        experiment.actual_start = Some(Utc::now());

        let mut results = ExperimentResults::default();
        for variant in &experiment.variants {
            let mut metrics = BTreeMap::new();
            metrics.insert(experiment.metrics.primary.clone(), 0.0);
            for secondary in &experiment.metrics.secondary {
                metrics.insert(secondary.clone(), 0.0);
            }
            results.variants.insert(
                variant.id.clone(),
                VariantResults {
                    observations: 0,
                    metrics,
                },
            );
        }
        experiment.results = Some(results);

        self.active.insert(experiment.id, experiment.clone());
        info!(experiment_id = %experiment.id, "experiment started");
        experiment
    }

    /// Record one observation for a variant.
    ///
    /// Returns false (and mutates nothing) for unknown experiments or
    /// variants. Tracked metrics update as running means; bandit arms also
    /// append the primary metric to their reward history.
    pub fn record_data(
        &self,
        experiment_id: Uuid,
        variant_id: &str,
        metrics: &BTreeMap<String, f64>,
    ) -> bool {
        let Some(mut entry) = self.active.get_mut(&experiment_id) else {
            warn!(%experiment_id, "experiment not active, dropping observation");
            return false;
        };
        let experiment = entry.value_mut();
        let primary = experiment.metrics.primary.clone();

        let Some(results) = experiment.results.as_mut() else {
            warn!(%experiment_id, "experiment has no results structure");
            return false;
        };
        let Some(variant_results) = results.variants.get_mut(variant_id) else {
            warn!(%experiment_id, variant_id, "unknown variant, dropping observation");
            return false;
        };

        results.observations += 1;
        variant_results.observations += 1;
        let count = variant_results.observations as f64;
        for (metric, value) in metrics {
            if let Some(average) = variant_results.metrics.get_mut(metric) {
                *average += (value - *average) / count;
            }
        }

        if experiment.kind == ExperimentKind::Bandit {
            if let Some(reward) = metrics.get(&primary) {
                if let Some(variant) = experiment.variants.iter_mut().find(|v| v.id == variant_id)
                {
                    variant.rewards.push(*reward);
                }
            }
        }

        debug!(%experiment_id, variant_id, "observation recorded");
        true
    }

    /// Recompute a bandit experiment's traffic allocations via Thompson
    /// sampling. No-op returning false for non-bandit experiments.
    ///
    /// Each arm's reward history is normalized to [0, 1] by its own range,
    /// summed into Beta(successes+1, failures+1) shape parameters, and
    /// scored by [`THOMPSON_DRAWS`] sampled draws; arms without history get
    /// a uniform fallback score. Allocations are the normalized scores, so
    /// they always sum to 1.
    pub fn update_allocations(&self, experiment_id: Uuid) -> bool {
        let Some(mut entry) = self.active.get_mut(&experiment_id) else {
            warn!(%experiment_id, "experiment not active, cannot update allocations");
            return false;
        };
        let experiment = entry.value_mut();
        if experiment.kind != ExperimentKind::Bandit {
            return false;
        }

        let mut rng = rand::thread_rng();
        let uniform_score = THOMPSON_DRAWS as f64 / experiment.variants.len() as f64;
        let scores: Vec<f64> = experiment
            .variants
            .iter()
            .map(|variant| {
                if variant.rewards.is_empty() {
                    return uniform_score;
                }
                let min = variant.rewards.iter().copied().fold(f64::INFINITY, f64::min);
                let max = variant
                    .rewards
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                let range = (max - min).max(1e-6);
                let successes: f64 = variant.rewards.iter().map(|r| (r - min) / range).sum();
                let failures = variant.rewards.len() as f64 - successes;
                thompson_score(&mut rng, successes + 1.0, failures + 1.0, THOMPSON_DRAWS)
            })
            .collect();

        let total: f64 = scores.iter().sum();
        if total <= 0.0 {
            let even = 1.0 / experiment.variants.len() as f64;
            for variant in &mut experiment.variants {
                variant.allocation = even;
            }
        } else {
            for (variant, score) in experiment.variants.iter_mut().zip(&scores) {
                variant.allocation = score / total;
            }
        }

        info!(%experiment_id, "bandit allocations updated");
        true
    }

    /// Whether an experiment is due for completion: the planned end time
    /// has passed, or the sample target is met with no starved variant.
    pub fn check_completion(&self, experiment_id: Uuid) -> bool {
        let Some(entry) = self.active.get(&experiment_id) else {
            warn!(%experiment_id, "experiment not active, cannot check completion");
            return false;
        };
        let experiment = entry.value();

        if Utc::now() >= experiment.planned_end {
            return true;
        }

        if let Some(results) = &experiment.results {
            if results.observations >= experiment.sample_size_target {
                let min_observations = results
                    .variants
                    .values()
                    .map(|v| v.observations)
                    .min()
                    .unwrap_or(0);
                let per_variant_floor =
                    experiment.sample_size_target as f64 / experiment.variants.len() as f64;
                if min_observations as f64 >= per_variant_floor {
                    return true;
                }
            }
        }
        false
    }

    /// Complete an experiment: stamp it, analyze its results, and move it
    /// from active to completed storage. Irreversible.
    pub fn complete_experiment(&self, experiment_id: Uuid) -> Option<Experiment> {
        let Some((_, mut experiment)) = self.active.remove(&experiment_id) else {
            warn!(%experiment_id, "experiment not active, cannot complete");
            return None;
        };

        experiment.status = ExperimentStatus::Completed;
        experiment.actual_end = Some(Utc::now());
        let analysis = self.analyze(&experiment);
        experiment.analysis = Some(analysis.clone());

        self.analyses.insert(experiment_id, analysis);
        self.completed.write().push(experiment.clone());

        info!(
            %experiment_id,
            winner = experiment
                .analysis
                .as_ref()
                .and_then(|a| a.winner.as_deref())
                .unwrap_or("none"),
            "experiment completed"
        );
        Some(experiment)
    }

    fn analyze(&self, experiment: &Experiment) -> Analysis {
        let mut analysis = Analysis::default();
        let primary = &experiment.metrics.primary;

        let Some(results) = &experiment.results else {
            warn!(experiment_id = %experiment.id, "no results to analyze");
            return analysis;
        };
        let Some(control) = experiment.control() else {
            warn!(experiment_id = %experiment.id, "no control variant found");
            return analysis;
        };

        let control_value = results
            .variants
            .get(&control.id)
            .and_then(|v| v.metrics.get(primary))
            .copied()
            .unwrap_or(0.0);

        let mut best_id = control.id.clone();
        let mut best_value = control_value;
        for (variant_id, variant_results) in &results.variants {
            if *variant_id == control.id {
                continue;
            }
            let value = variant_results.metrics.get(primary).copied().unwrap_or(0.0);
            let lift = if control_value > 0.0 {
                (value - control_value) / control_value
            } else {
                0.0
            };
            analysis.lift.insert(variant_id.clone(), lift);
            if value > best_value {
                best_id = variant_id.clone();
                best_value = value;
            }
        }

        analysis.winner = Some(best_id.clone());

        if best_id != control.id {
            if let Some(winner) = experiment.variant(&best_id) {
                let lift = analysis.lift.get(&best_id).copied().unwrap_or(0.0);
                analysis.recommendations.push(Recommendation {
                    kind: RecommendationKind::ImplementWinner,
                    message: format!(
                        "Implement the winning variant ({}) with a lift of {:.1}%",
                        winner.name,
                        lift * 100.0
                    ),
                    action: winner.action.clone(),
                });
            }
        } else {
            analysis.recommendations.push(Recommendation {
                kind: RecommendationKind::MaintainControl,
                message: "Maintain the current approach; no variant outperformed the control."
                    .to_string(),
                action: Action::new(),
            });
        }

        if results.observations < experiment.sample_size_target {
            analysis.recommendations.push(Recommendation {
                kind: RecommendationKind::ContinueTesting,
                message: format!(
                    "Continue testing to reach the target sample size of {} (currently {})",
                    experiment.sample_size_target, results.observations
                ),
                action: Action::new(),
            });
        }

        analysis
    }

    // ─── Read accessors ─────────────────────────────────────────────────────

    pub fn status(&self, experiment_id: Uuid) -> ExperimentLookup {
        if let Some(entry) = self.active.get(&experiment_id) {
            return ExperimentLookup::Active(Box::new(entry.value().clone()));
        }
        if let Some(experiment) = self
            .completed
            .read()
            .iter()
            .find(|e| e.id == experiment_id)
        {
            return ExperimentLookup::Completed(Box::new(experiment.clone()));
        }
        ExperimentLookup::NotFound
    }

    pub fn active_experiments(&self) -> Vec<Experiment> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn completed_experiments(&self) -> Vec<Experiment> {
        self.completed.read().clone()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().len()
    }

    /// Aggregate insight over every experiment run so far.
    pub fn insights(&self) -> ExperimentInsights {
        let completed = self.completed.read();

        let mut successes = 0usize;
        let mut total_lift = 0.0;
        let mut lift_count = 0usize;
        let mut kind_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_action: HashMap<ActionKey, WinningAction> = HashMap::new();

        for experiment in completed.iter() {
            *kind_counts
                .entry(experiment.kind.label().to_string())
                .or_insert(0) += 1;

            let Some(analysis) = &experiment.analysis else {
                continue;
            };
            for lift in analysis.lift.values() {
                total_lift += lift;
                lift_count += 1;
            }

            let Some(winner_id) = &analysis.winner else {
                continue;
            };
            let Some(winner) = experiment.variant(winner_id) else {
                continue;
            };
            if !winner.is_control() {
                successes += 1;
            }

            let entry = by_action
                .entry(ActionKey::of(&winner.action))
                .or_insert_with(|| WinningAction {
                    action: winner.action.clone(),
                    wins: 0,
                    average_lift: 0.0,
                });
            entry.wins += 1;
            // average_lift accumulates the total here; divided below.
            entry.average_lift += analysis.lift.get(winner_id).copied().unwrap_or(0.0);
        }

        for entry in self.active.iter() {
            *kind_counts
                .entry(entry.value().kind.label().to_string())
                .or_insert(0) += 1;
        }

        let mut top_actions: Vec<WinningAction> = by_action
            .into_values()
            .map(|mut entry| {
                entry.average_lift /= entry.wins as f64;
                entry
            })
            .collect();
        top_actions.sort_by(|a, b| {
            b.wins
                .cmp(&a.wins)
                .then(b.average_lift.total_cmp(&a.average_lift))
        });
        top_actions.truncate(5);

        ExperimentInsights {
            total_experiments: self.active.len() + completed.len(),
            active_experiments: self.active.len(),
            completed_experiments: completed.len(),
            success_rate: if completed.is_empty() {
                0.0
            } else {
                successes as f64 / completed.len() as f64
            },
            average_lift: if lift_count == 0 {
                0.0
            } else {
                total_lift / lift_count as f64
            },
            kind_counts,
            top_actions,
        }
    }

    // ─── Internal ───────────────────────────────────────────────────────────

    pub(crate) fn analyses(&self) -> Vec<(Uuid, Analysis)> {
        self.analyses
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub(crate) fn replace_state(
        &self,
        active: BTreeMap<Uuid, Experiment>,
        completed: Vec<Experiment>,
        analyses: BTreeMap<Uuid, Analysis>,
    ) {
        self.active.clear();
        for (id, experiment) in active {
            self.active.insert(id, experiment);
        }
        *self.completed.write() = completed;
        self.analyses.clear();
        for (id, analysis) in analyses {
            self.analyses.insert(id, analysis);
        }
    }

    fn kind_enabled(&self, kind: ExperimentKind) -> bool {
        match kind {
            ExperimentKind::Paired => self.config.paired_enabled,
            ExperimentKind::Multivariate => self.config.multivariate.enabled,
            ExperimentKind::Bandit => self.config.bandit.enabled,
        }
    }

    fn generate_variants(&self, kind: ExperimentKind, action: &Action) -> Vec<Variant> {
        match kind {
            ExperimentKind::Paired => vec![
                Variant {
                    id: "control".to_string(),
                    name: "Control".to_string(),
                    action: Action::new(),
                    allocation: 0.5,
                    rewards: Vec::new(),
                },
                Variant {
                    id: "variant_1".to_string(),
                    name: "Variant 1".to_string(),
                    action: action.clone(),
                    allocation: 0.5,
                    rewards: Vec::new(),
                },
            ],
            ExperimentKind::Multivariate => {
                let max_variants = self.config.multivariate.max_variants;
                let allocation = 1.0 / (max_variants as f64 + 1.0);
                let mut variants = vec![Variant {
                    id: "control".to_string(),
                    name: "Control".to_string(),
                    action: Action::new(),
                    allocation,
                    rewards: Vec::new(),
                }];

                let variables: Vec<String> = action.iter().map(|(k, _)| k.clone()).collect();
                for (i, variable) in variables.iter().take(max_variants).enumerate() {
                    let mut variant_action = action.clone();
                    if let Some(ActionValue::Number(value)) = variant_action.get_mut(variable) {
                        // Alternating ±10% steps: +10%, -10%, +20%, -20%, ...
                        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                        let magnitude = (i / 2 + 1) as f64;
                        *value *= 1.0 + 0.1 * sign * magnitude;
                    }
                    variants.push(Variant {
                        id: format!("variant_{}", i + 1),
                        name: format!("Variant {}", i + 1),
                        action: variant_action,
                        allocation,
                        rewards: Vec::new(),
                    });
                }
                variants
            }
            ExperimentKind::Bandit => {
                let arm_count = self.config.bandit.arm_count.max(1);
                let allocation = 1.0 / arm_count as f64;
                let mut rng = rand::thread_rng();

                let mut variants = vec![Variant {
                    id: "arm_0".to_string(),
                    name: "Control Arm".to_string(),
                    action: Action::new(),
                    allocation,
                    rewards: Vec::new(),
                }];
                for i in 1..arm_count {
                    let mut arm_action = action.clone();
                    let variables: Vec<String> = arm_action.iter().map(|(k, _)| k.clone()).collect();
                    for variable in variables {
                        if let Some(ActionValue::Number(value)) = arm_action.get_mut(&variable) {
                            // Independent random jitter of ±20% per variable.
                            let adjustment = 1.0 + (rng.gen::<f64>() * 0.4 - 0.2);
                            *value *= adjustment;
                        }
                    }
                    variants.push(Variant {
                        id: format!("arm_{i}"),
                        name: format!("Arm {i}"),
                        action: arm_action,
                        allocation,
                        rewards: Vec::new(),
                    });
                }
                variants
            }
        }
    }
}
