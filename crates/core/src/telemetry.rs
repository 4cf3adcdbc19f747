//! Business telemetry tree — the engine's view of traffic, conversion,
//! revenue, cost, and market signals, merged from collaborator snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single telemetry value: a scalar or a nested group of named values.
///
/// Snapshots arriving from data sources are merged into the engine state
/// with [`Telemetry::merge`]: groups merge key-wise, scalars are replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Telemetry {
    Number(f64),
    Text(String),
    Group(BTreeMap<String, Telemetry>),
}

impl Telemetry {
    /// An empty group, the neutral element for [`Telemetry::merge`].
    pub fn group() -> Self {
        Telemetry::Group(BTreeMap::new())
    }

    pub fn number(value: f64) -> Self {
        Telemetry::Number(value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Telemetry::Text(value.into())
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Telemetry::Group(_))
    }

    /// True for a group with no entries. Scalars are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Telemetry::Group(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Look up a direct child of a group by name.
    pub fn get(&self, key: &str) -> Option<&Telemetry> {
        match self {
            Telemetry::Group(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Insert or replace a direct child. No-op on scalar values.
    pub fn set(&mut self, key: impl Into<String>, value: Telemetry) {
        if let Telemetry::Group(entries) = self {
            entries.insert(key.into(), value);
        }
    }

    /// Recursively merge `incoming` into `self`.
    ///
    /// Nested groups merge key-by-key; every other pairing replaces the
    /// existing value with the incoming one.
    pub fn merge(&mut self, incoming: Telemetry) {
        match (self, incoming) {
            (Telemetry::Group(existing), Telemetry::Group(updates)) => {
                for (key, value) in updates {
                    match existing.get_mut(&key) {
                        Some(slot) if slot.is_group() && value.is_group() => {
                            slot.merge(value);
                        }
                        _ => {
                            existing.insert(key, value);
                        }
                    }
                }
            }
            (slot, value) => *slot = value,
        }
    }

    /// The default business state: zeroed traffic/conversion/revenue/cost
    /// groups and neutral market conditions.
    pub fn default_state() -> Self {
        let mut traffic = BTreeMap::new();
        for channel in ["organic", "paid", "social", "referral", "direct"] {
            traffic.insert(channel.to_string(), Telemetry::Number(0.0));
        }

        let mut conversion_rates = BTreeMap::new();
        conversion_rates.insert("overall".to_string(), Telemetry::Number(0.0));
        conversion_rates.insert("by_channel".to_string(), Telemetry::group());

        let mut revenue = BTreeMap::new();
        revenue.insert("total".to_string(), Telemetry::Number(0.0));
        revenue.insert("by_channel".to_string(), Telemetry::group());
        revenue.insert("by_product".to_string(), Telemetry::group());

        let mut costs = BTreeMap::new();
        costs.insert("total".to_string(), Telemetry::Number(0.0));
        costs.insert("fixed".to_string(), Telemetry::Number(0.0));
        costs.insert("variable".to_string(), Telemetry::Number(0.0));
        costs.insert("by_channel".to_string(), Telemetry::group());

        let mut market = BTreeMap::new();
        market.insert("competition_level".to_string(), Telemetry::Number(0.5));
        market.insert("seasonality".to_string(), Telemetry::Number(0.5));
        market.insert("trend".to_string(), Telemetry::Number(0.0));

        let mut state = BTreeMap::new();
        state.insert("traffic".to_string(), Telemetry::Group(traffic));
        state.insert(
            "conversion_rates".to_string(),
            Telemetry::Group(conversion_rates),
        );
        state.insert("revenue".to_string(), Telemetry::Group(revenue));
        state.insert("costs".to_string(), Telemetry::Group(costs));
        state.insert("market_conditions".to_string(), Telemetry::Group(market));
        Telemetry::Group(state)
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry::group()
    }
}

impl FromIterator<(String, Telemetry)> for Telemetry {
    fn from_iter<I: IntoIterator<Item = (String, Telemetry)>>(iter: I) -> Self {
        Telemetry::Group(iter.into_iter().collect())
    }
}
