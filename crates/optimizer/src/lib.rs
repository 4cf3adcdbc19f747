//! The optimization control loop — pulls telemetry into the decision
//! engine, wraps chosen actions in experiments, dispatches them to action
//! handlers, and feeds completed-experiment outcomes back as reward.

pub mod collaborators;
pub mod insights;
pub mod optimizer;

pub use collaborators::{ActionHandler, HandlerReport, RecordingHandler, StaticSource, TelemetrySource};
pub use insights::{OptimizerStatus, RevenueInsights};
pub use optimizer::{classify_action, ManualRun, RevenueOptimizer};
