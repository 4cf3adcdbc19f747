//! The optimization control loop — a single background task tying state
//! ingestion, action selection, experimentation, dispatch, and reward
//! feedback into a closed cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use revpilot_core::config::{AppConfig, LoopConfig};
use revpilot_core::{Action, Telemetry};
use revpilot_experiments::{Experiment, ExperimentKind, ExperimentManager};
use revpilot_rl_engine::DecisionEngine;

use crate::collaborators::{ActionHandler, TelemetrySource};

struct RegisteredHandler {
    handler: Arc<dyn ActionHandler>,
    trigger_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LoopTimers {
    pub(crate) last_state_update: Option<DateTime<Utc>>,
    pub(crate) last_experiment_check: Option<DateTime<Utc>>,
    pub(crate) last_model_save: Option<DateTime<Utc>>,
}

/// Outcome of a manual optimization trigger.
#[derive(Debug, Clone, Serialize)]
pub struct ManualRun {
    pub experiment_id: Uuid,
    pub kind: ExperimentKind,
    pub action: Action,
}

/// Classify an action into the experiment kind used to test it: several
/// modified variables call for a multivariate test, spend-sensitive
/// variables for a bandit, anything else for a paired test.
pub fn classify_action(action: &Action) -> ExperimentKind {
    if action.len() > 1 {
        ExperimentKind::Multivariate
    } else if action.contains("pricing") || action.contains("ad_spend") {
        ExperimentKind::Bandit
    } else {
        ExperimentKind::Paired
    }
}

/// Coordinates the decision engine and the experiment manager on a fixed
/// cadence, from one supervised background task.
///
/// All shared collections sit behind locks, so status queries, manual
/// triggers, and registration calls are safe while the loop runs;
/// collaborators should still be registered before [`RevenueOptimizer::start`]
/// so the first cycle sees them.
pub struct RevenueOptimizer {
    pub(crate) config: LoopConfig,
    engine: Arc<DecisionEngine>,
    experiments: Arc<ExperimentManager>,
    sources: DashMap<String, Arc<dyn TelemetrySource>>,
    handlers: DashMap<String, RegisteredHandler>,
    running: AtomicBool,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) timers: RwLock<LoopTimers>,
}

impl RevenueOptimizer {
    pub fn new(config: AppConfig) -> Self {
        info!("revenue optimizer initialized");
        Self {
            config: config.optimizer,
            engine: Arc::new(DecisionEngine::new(config.engine)),
            experiments: Arc::new(ExperimentManager::new(config.experiments)),
            sources: DashMap::new(),
            handlers: DashMap::new(),
            running: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
            task: Mutex::new(None),
            timers: RwLock::new(LoopTimers::default()),
        }
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn experiments(&self) -> &Arc<ExperimentManager> {
        &self.experiments
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a telemetry source under a unique name. Re-registering a
    /// name replaces the previous source with a warning.
    pub fn register_telemetry_source(&self, name: impl Into<String>, source: Arc<dyn TelemetrySource>) {
        let name = name.into();
        if self.sources.insert(name.clone(), source).is_some() {
            warn!(name = %name, "telemetry source already registered, overwriting");
        } else {
            info!(name = %name, "telemetry source registered");
        }
    }

    /// Register an action handler under a unique name, tied to the decision
    /// variables that trigger it. Re-registering a name replaces the
    /// previous handler with a warning.
    pub fn register_action_handler(
        &self,
        name: impl Into<String>,
        trigger_keys: Vec<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        let name = name.into();
        let registered = RegisteredHandler {
            handler,
            trigger_keys,
        };
        if self.handlers.insert(name.clone(), registered).is_some() {
            warn!(name = %name, "action handler already registered, overwriting");
        } else {
            info!(name = %name, "action handler registered");
        }
    }

    /// Start the background optimization loop. No-op with a warning if it
    /// is already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("revenue optimizer is already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(stop_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(stop_rx).await });
        *self.task.lock() = Some(handle);

        info!("revenue optimizer started");
    }

    /// Signal the loop to stop and wait for it, bounded by the configured
    /// timeout. A loop that fails to exit in time is reported, not killed.
    pub async fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            warn!("revenue optimizer is not running");
            return;
        }

        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(true);
        }
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(
                Duration::from_secs(self.config.stop_timeout_secs),
                handle,
            )
            .await
            {
                Ok(Ok(())) => info!("revenue optimizer stopped"),
                Ok(Err(e)) => error!(error = %e, "optimization task failed"),
                Err(_) => warn!("optimization task did not stop within the timeout"),
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run optimization steps 1-4 synchronously for an operator-supplied
    /// action, bypassing the schedule. Does not touch the loop's interval
    /// timers.
    pub fn trigger_manual(&self, action: Action) -> anyhow::Result<ManualRun> {
        let snapshot = self.collect_telemetry();
        if !snapshot.is_empty() {
            self.engine.update_state(snapshot);
        }

        let kind = classify_action(&action);
        let designed = self
            .experiments
            .design_experiment(kind, action.clone(), &BTreeMap::new());
        let experiment = self.experiments.start_experiment(designed);
        self.dispatch_action(&action, experiment.id);

        info!(experiment_id = %experiment.id, kind = kind.label(), "manual optimization executed");
        Ok(ManualRun {
            experiment_id: experiment.id,
            kind: experiment.kind,
            action,
        })
    }

    // ─── Background loop ────────────────────────────────────────────────────

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        info!(
            max_iterations = self.config.max_iterations,
            interval_secs = self.config.optimization_interval_secs,
            "optimization loop entered"
        );

        let mut iteration: u64 = 0;
        while iteration < self.config.max_iterations {
            if *stop_rx.borrow() {
                break;
            }

            match self.run_cycle() {
                Ok(experiment_id) => {
                    metrics::counter!("optimizer.cycles").increment(1);
                    debug!(iteration, %experiment_id, "optimization cycle finished");
                }
                Err(e) => {
                    metrics::counter!("optimizer.cycle_errors").increment(1);
                    error!(error = %e, "optimization cycle failed, backing off");
                    let backoff = Duration::from_secs(self.config.error_backoff_secs);
                    if sleep_interruptible(&mut stop_rx, backoff).await {
                        break;
                    }
                    continue;
                }
            }

            iteration += 1;
            let interval = Duration::from_secs(self.config.optimization_interval_secs);
            if sleep_interruptible(&mut stop_rx, interval).await {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(iteration, "optimization loop exited");
    }

    /// One optimization cycle: refresh state, pick an action, wrap it in an
    /// experiment, dispatch it, sweep experiments, persist.
    fn run_cycle(&self) -> anyhow::Result<Uuid> {
        self.refresh_state_if_due();

        let action = self.engine.select_action(None);
        let kind = classify_action(&action);
        let designed = self
            .experiments
            .design_experiment(kind, action.clone(), &BTreeMap::new());
        let experiment = self.experiments.start_experiment(designed);

        self.dispatch_action(&action, experiment.id);
        self.sweep_experiments_if_due();
        self.save_if_due();

        Ok(experiment.id)
    }

    /// Poll every registered telemetry source, nesting each non-empty
    /// snapshot under the source's name. Failures are logged and skipped.
    fn collect_telemetry(&self) -> Telemetry {
        let mut merged = Telemetry::group();
        for entry in self.sources.iter() {
            match entry.value().collect() {
                Ok(snapshot) if !snapshot.is_empty() => {
                    merged.set(entry.key().clone(), snapshot);
                }
                Ok(_) => debug!(source = %entry.key(), "telemetry source returned no data"),
                Err(e) => {
                    metrics::counter!("optimizer.source_errors").increment(1);
                    error!(source = %entry.key(), error = %e, "telemetry source failed");
                }
            }
        }
        merged
    }

    fn refresh_state_if_due(&self) {
        let now = Utc::now();
        if !is_due(
            self.timers.read().last_state_update,
            self.config.state_update_interval_secs,
            now,
        ) {
            return;
        }

        let snapshot = self.collect_telemetry();
        if snapshot.is_empty() {
            return;
        }
        self.engine.update_state(snapshot);
        self.timers.write().last_state_update = Some(now);
        info!("state refreshed from telemetry sources");
    }

    /// Invoke every handler whose trigger keys appear in the action, once
    /// per matching key. Handler failures are logged and skipped.
    fn dispatch_action(&self, action: &Action, experiment_id: Uuid) {
        for entry in self.handlers.iter() {
            let registered = entry.value();
            for key in &registered.trigger_keys {
                if !action.contains(key) {
                    continue;
                }
                match registered.handler.execute(action, experiment_id) {
                    Ok(report) => {
                        debug!(
                            handler = %entry.key(),
                            trigger = %key,
                            detail = %report.detail,
                            "action dispatched"
                        );
                    }
                    Err(e) => {
                        metrics::counter!("optimizer.handler_errors").increment(1);
                        error!(handler = %entry.key(), error = %e, "action handler failed");
                    }
                }
            }
        }
    }

    /// Complete due experiments (feeding their outcome back as reward) and
    /// refresh allocations of still-running bandits.
    fn sweep_experiments_if_due(&self) {
        let now = Utc::now();
        if !is_due(
            self.timers.read().last_experiment_check,
            self.config.experiment_check_interval_secs,
            now,
        ) {
            return;
        }

        for experiment in self.experiments.active_experiments() {
            if self.experiments.check_completion(experiment.id) {
                if let Some(completed) = self.experiments.complete_experiment(experiment.id) {
                    metrics::counter!("optimizer.experiments_completed").increment(1);
                    self.feed_reward(&completed);
                }
            } else if experiment.kind == ExperimentKind::Bandit {
                self.experiments.update_allocations(experiment.id);
            }
        }

        self.timers.write().last_experiment_check = Some(now);
        debug!("experiment sweep finished");
    }

    /// Turn a completed experiment's winner into reward components and feed
    /// them to the decision engine.
    fn feed_reward(&self, experiment: &Experiment) {
        let Some(analysis) = &experiment.analysis else {
            warn!(experiment_id = %experiment.id, "completed experiment has no analysis");
            return;
        };
        let Some(winner_id) = &analysis.winner else {
            warn!(experiment_id = %experiment.id, "completed experiment has no winner");
            return;
        };
        let (Some(winner), Some(control), Some(results)) = (
            experiment.variant(winner_id),
            experiment.control(),
            experiment.results.as_ref(),
        ) else {
            warn!(experiment_id = %experiment.id, "experiment is missing variants or results");
            return;
        };
        let (Some(winner_results), Some(control_results)) = (
            results.variants.get(winner_id),
            results.variants.get(&control.id),
        ) else {
            return;
        };

        let pairs = [
            ("revenue", experiment.metrics.primary.clone()),
            ("profit", "profit_margin".to_string()),
            ("growth", "conversion_rate".to_string()),
        ];
        let mut components = BTreeMap::new();
        for (component, metric) in pairs {
            if let (Some(winner_value), Some(control_value)) = (
                winner_results.metrics.get(&metric),
                control_results.metrics.get(&metric),
            ) {
                components.insert(
                    component.to_string(),
                    lift_reward(*winner_value, *control_value),
                );
            }
        }

        let reward = self.engine.receive_reward(&winner.action, &components);
        info!(
            experiment_id = %experiment.id,
            winner = %winner_id,
            reward,
            "experiment outcome fed back to the engine"
        );
    }

    /// Persist engine and experiment state to timestamped files. Failures
    /// are logged and never stop the loop.
    fn save_if_due(&self) {
        let now = Utc::now();
        if !is_due(
            self.timers.read().last_model_save,
            self.config.model_save_interval_secs,
            now,
        ) {
            return;
        }

        let stamp = now.format("%Y%m%d_%H%M%S");
        let model_path =
            PathBuf::from(&self.config.model_save_path).join(format!("model_{stamp}.json"));
        if let Err(e) = self.engine.save(&model_path) {
            error!(error = %e, "failed to save model");
        }
        let experiment_path = PathBuf::from(&self.config.experiment_save_path)
            .join(format!("experiments_{stamp}.json"));
        if let Err(e) = self.experiments.save(&experiment_path) {
            error!(error = %e, "failed to save experiments");
        }

        self.timers.write().last_model_save = Some(now);
    }
}

fn is_due(last: Option<DateTime<Utc>>, interval_secs: u64, now: DateTime<Utc>) -> bool {
    last.map_or(true, |t| (now - t).num_seconds() >= interval_secs as i64)
}

fn lift_reward(winner: f64, control: f64) -> f64 {
    if winner <= control {
        return 0.0;
    }
    ((winner - control) / control.max(0.01)).min(1.0)
}

/// Sleep that wakes early when the stop signal flips. Returns true when the
/// loop should exit.
async fn sleep_interruptible(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}
