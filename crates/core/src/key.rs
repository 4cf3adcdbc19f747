//! Structural table keys for the value store.
//!
//! States and actions are bucketed into a finite table by a canonical,
//! order-independent key derived from their sorted contents. Floats are
//! discretized to two decimal places (stored as integer hundredths) so that
//! structurally equal snapshots always map to the same key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionValue};
use crate::telemetry::Telemetry;

/// Scale factor for float discretization: two decimal places.
const DISCRETIZE_SCALE: f64 = 100.0;

fn discretize(value: f64) -> i64 {
    (value * DISCRETIZE_SCALE).round() as i64
}

fn undiscretize(value: i64) -> f64 {
    value as f64 / DISCRETIZE_SCALE
}

/// One node of a structural key: a discretized number, a text value, or a
/// sorted group of named children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyAtom {
    Int(i64),
    Text(String),
    Group(BTreeMap<String, KeyAtom>),
}

impl KeyAtom {
    fn of_telemetry(value: &Telemetry) -> KeyAtom {
        match value {
            Telemetry::Number(v) => KeyAtom::Int(discretize(*v)),
            Telemetry::Text(s) => KeyAtom::Text(s.clone()),
            Telemetry::Group(entries) => KeyAtom::Group(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), KeyAtom::of_telemetry(v)))
                    .collect(),
            ),
        }
    }
}

/// Canonical key of a discretized state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey(KeyAtom);

impl StateKey {
    pub fn of(state: &Telemetry) -> Self {
        StateKey(KeyAtom::of_telemetry(state))
    }
}

/// Canonical key of an action.
///
/// Numeric assignments are discretized with the same two-decimal scale as
/// state keys, which is lossless for actions drawn from the quantized
/// domains, so the original action can be recovered with
/// [`ActionKey::to_action`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionKey(BTreeMap<String, KeyAtom>);

impl ActionKey {
    pub fn of(action: &Action) -> Self {
        ActionKey(
            action
                .iter()
                .map(|(variable, value)| {
                    let atom = match value {
                        ActionValue::Number(v) => KeyAtom::Int(discretize(*v)),
                        ActionValue::Choice(c) => KeyAtom::Text(c.clone()),
                    };
                    (variable.clone(), atom)
                })
                .collect(),
        )
    }

    /// Reconstruct the action this key was derived from.
    pub fn to_action(&self) -> Action {
        self.0
            .iter()
            .map(|(variable, atom)| {
                let value = match atom {
                    KeyAtom::Int(v) => ActionValue::Number(undiscretize(*v)),
                    KeyAtom::Text(c) => ActionValue::Choice(c.clone()),
                    // Actions are flat; a nested group cannot appear here.
                    KeyAtom::Group(_) => ActionValue::Number(0.0),
                };
                (variable.clone(), value)
            })
            .collect()
    }
}
