//! Reinforcement-learning decision engine — tabular value store over
//! discretized business state, epsilon-greedy exploration with decay,
//! reward credit assignment, and model persistence.

pub mod engine;
pub mod persistence;
pub mod policy;

pub use engine::{DecisionEngine, PerformanceMetrics, PolicyInsights, RankedAction};
pub use persistence::ModelSnapshot;
pub use policy::ExplorationStrategy;
