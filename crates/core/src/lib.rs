//! Shared domain types for the RevPilot optimization stack — telemetry
//! trees, decision actions and domains, structural table keys, configuration,
//! and the error taxonomy.

pub mod action;
pub mod config;
pub mod error;
pub mod key;
pub mod telemetry;

pub use action::{Action, ActionDomain, ActionSpace, ActionValue};
pub use error::{OptimizerError, OptimizerResult};
pub use key::{ActionKey, StateKey};
pub use telemetry::Telemetry;
