//! Integration test for the full optimization cycle: telemetry feeds state,
//! a manual action becomes an experiment, observations complete it, and the
//! outcome flows back into the decision engine as reward.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use revpilot_core::config::AppConfig;
use revpilot_core::{Action, ActionValue, Telemetry};
use revpilot_experiments::ExperimentKind;
use revpilot_optimizer::{RecordingHandler, RevenueOptimizer, StaticSource};

fn analytics_snapshot() -> Telemetry {
    let mut traffic = Telemetry::group();
    traffic.set("organic", Telemetry::Number(1800.0));
    traffic.set("paid", Telemetry::Number(420.0));
    let mut snapshot = Telemetry::group();
    snapshot.set("traffic", traffic);
    snapshot.set("revenue_total", Telemetry::Number(9_640.0));
    snapshot
}

fn quick_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.optimizer.optimization_interval_secs = 0;
    config.optimizer.state_update_interval_secs = 0;
    config.optimizer.experiment_check_interval_secs = 0;
    config.optimizer.max_iterations = 3;
    config.optimizer.stop_timeout_secs = 5;
    config.experiments.min_sample_size = 2;
    // The first cycle always persists, so point snapshots at scratch space
    // instead of the working directory.
    let scratch = std::env::temp_dir().join(format!("revpilot-itest-{}", std::process::id()));
    config.optimizer.model_save_path = scratch.join("models").to_string_lossy().into_owned();
    config.optimizer.experiment_save_path =
        scratch.join("experiments").to_string_lossy().into_owned();
    config
}

fn register_collaborators(optimizer: &RevenueOptimizer) -> Arc<RecordingHandler> {
    optimizer.register_telemetry_source(
        "analytics",
        Arc::new(StaticSource::new(analytics_snapshot())),
    );
    let handler = Arc::new(RecordingHandler::new("execution"));
    optimizer.register_action_handler(
        "execution",
        vec![
            "content_type".to_string(),
            "pricing".to_string(),
            "ad_spend".to_string(),
            "seo_tactic".to_string(),
            "affiliate_action".to_string(),
        ],
        handler.clone(),
    );
    handler
}

async fn wait_until_stopped(optimizer: &RevenueOptimizer) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while optimizer.is_running() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!optimizer.is_running(), "loop did not exit in time");
}

#[tokio::test]
async fn test_closed_loop_completes_experiment_and_learns() {
    let optimizer = Arc::new(RevenueOptimizer::new(quick_config()));
    let handler = register_collaborators(&optimizer);

    // An operator proposes a price change; it becomes a bandit experiment
    // and is dispatched to the execution handler.
    let mut action = Action::new();
    action.set("pricing", ActionValue::Number(79.99));
    let run = optimizer.trigger_manual(action).unwrap();
    assert_eq!(run.kind, ExperimentKind::Bandit);
    assert_eq!(handler.call_count(), 1);

    // Observations arrive: every arm gets one, the jittered arms outperform.
    let manager = optimizer.experiments();
    let experiment = manager.active_experiments().pop().unwrap();
    for variant in &experiment.variants {
        let mut metrics = BTreeMap::new();
        let value = if variant.is_control() { 100.0 } else { 130.0 };
        metrics.insert("revenue".to_string(), value);
        assert!(manager.record_data(experiment.id, &variant.id, &metrics));
    }

    // The background loop's experiment sweep completes the experiment and
    // feeds the winner back as reward.
    optimizer.start();
    wait_until_stopped(&optimizer).await;

    assert!(manager.completed_count() >= 1);
    let completed = manager
        .completed_experiments()
        .into_iter()
        .find(|e| e.id == run.experiment_id)
        .expect("manual experiment completed");
    let analysis = completed.analysis.expect("analysis computed");
    let winner = analysis.winner.expect("winner chosen");
    assert_ne!(winner, "arm_0");

    let engine_metrics = optimizer.engine().performance_metrics();
    assert!(engine_metrics.total_rewards >= 1);
    assert!(engine_metrics.average_reward > 0.0);

    // Loop cycles also dispatched their own actions.
    assert!(handler.call_count() > 1);

    let status = optimizer.status();
    assert!(!status.running);
    assert!(status.last_state_update.is_some());
    assert!(status.last_experiment_check.is_some());
    assert!(status.completed_experiments >= 1);
}

#[tokio::test]
async fn test_loop_persists_state_to_timestamped_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = quick_config();
    config.optimizer.max_iterations = 1;
    config.optimizer.model_save_interval_secs = 0;
    config.optimizer.model_save_path = dir
        .path()
        .join("models")
        .to_string_lossy()
        .into_owned();
    config.optimizer.experiment_save_path = dir
        .path()
        .join("experiments")
        .to_string_lossy()
        .into_owned();

    let optimizer = Arc::new(RevenueOptimizer::new(config));
    register_collaborators(&optimizer);

    optimizer.start();
    wait_until_stopped(&optimizer).await;

    let model_files: Vec<_> = std::fs::read_dir(dir.path().join("models"))
        .unwrap()
        .collect();
    let experiment_files: Vec<_> = std::fs::read_dir(dir.path().join("experiments"))
        .unwrap()
        .collect();
    assert_eq!(model_files.len(), 1);
    assert_eq!(experiment_files.len(), 1);

    let name = model_files[0].as_ref().unwrap().file_name();
    let name = name.to_string_lossy();
    assert!(name.starts_with("model_") && name.ends_with(".json"));

    assert!(optimizer.status().last_model_save.is_some());
}
