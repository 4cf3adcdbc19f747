//! Decision actions and their domains — sparse assignments of decision
//! variables (pricing, ad spend, content type, ...) drawn from configured
//! categorical lists or quantized numeric ranges.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A value assigned to one decision variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Number(f64),
    Choice(String),
}

impl ActionValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ActionValue::Number(v) => Some(*v),
            ActionValue::Choice(_) => None,
        }
    }
}

/// A proposed change to one or more decision variables.
///
/// The empty action stands for "keep the current setup" and is used as the
/// control arm of experiments. Actions are immutable once an experiment has
/// been designed around them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(pub BTreeMap<String, ActionValue>);

impl Action {
    pub fn new() -> Self {
        Action(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.0.contains_key(variable)
    }

    pub fn get(&self, variable: &str) -> Option<&ActionValue> {
        self.0.get(variable)
    }

    pub fn get_mut(&mut self, variable: &str) -> Option<&mut ActionValue> {
        self.0.get_mut(variable)
    }

    pub fn set(&mut self, variable: impl Into<String>, value: ActionValue) {
        self.0.insert(variable.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ActionValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ActionValue)> for Action {
    fn from_iter<I: IntoIterator<Item = (String, ActionValue)>>(iter: I) -> Self {
        Action(iter.into_iter().collect())
    }
}

/// The domain one decision variable draws its values from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionDomain {
    Categorical(Vec<String>),
    Numeric { min: f64, max: f64, step: f64 },
}

impl ActionDomain {
    /// Draw a uniformly random value from this domain.
    ///
    /// Numeric domains are quantized to their step, endpoints included.
    pub fn sample(&self, rng: &mut impl Rng) -> ActionValue {
        match self {
            ActionDomain::Categorical(choices) => match choices.choose(rng) {
                Some(choice) => ActionValue::Choice(choice.clone()),
                None => ActionValue::Choice(String::new()),
            },
            ActionDomain::Numeric { min, max, step } => {
                let steps = if *step > 0.0 {
                    ((max - min) / step).floor().max(0.0) as u64
                } else {
                    0
                };
                let picked = rng.gen_range(0..=steps);
                ActionValue::Number(min + picked as f64 * step)
            }
        }
    }
}

/// The full action space: decision-variable name to domain.
pub type ActionSpace = BTreeMap<String, ActionDomain>;

/// The default action space for a content/commerce business: content type,
/// pricing, ad spend, SEO tactic, affiliate action.
pub fn default_action_space() -> ActionSpace {
    let mut space = ActionSpace::new();
    space.insert(
        "content_type".to_string(),
        ActionDomain::Categorical(
            ["blog", "video", "infographic", "ebook", "case_study"]
                .map(String::from)
                .to_vec(),
        ),
    );
    space.insert(
        "pricing".to_string(),
        ActionDomain::Numeric {
            min: 0.0,
            max: 1000.0,
            step: 5.0,
        },
    );
    space.insert(
        "ad_spend".to_string(),
        ActionDomain::Numeric {
            min: 0.0,
            max: 5000.0,
            step: 50.0,
        },
    );
    space.insert(
        "seo_tactic".to_string(),
        ActionDomain::Categorical(
            [
                "keyword_optimization",
                "backlink_building",
                "content_refresh",
                "technical_seo",
            ]
            .map(String::from)
            .to_vec(),
        ),
    );
    space.insert(
        "affiliate_action".to_string(),
        ActionDomain::Categorical(
            ["add", "remove", "replace", "adjust_commission"]
                .map(String::from)
                .to_vec(),
        ),
    );
    space
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_sample_is_quantized_and_bounded() {
        let domain = ActionDomain::Numeric {
            min: 10.0,
            max: 100.0,
            step: 5.0,
        };
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let value = match domain.sample(&mut rng) {
                ActionValue::Number(v) => v,
                other => panic!("expected number, got {other:?}"),
            };
            assert!((10.0..=100.0).contains(&value));
            let offset = (value - 10.0) / 5.0;
            assert!((offset - offset.round()).abs() < 1e-9, "off-grid {value}");
        }
    }

    #[test]
    fn test_categorical_sample_from_list() {
        let domain = ActionDomain::Categorical(vec!["a".into(), "b".into()]);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            match domain.sample(&mut rng) {
                ActionValue::Choice(c) => assert!(c == "a" || c == "b"),
                other => panic!("expected choice, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_default_space_covers_all_variables() {
        let space = default_action_space();
        for variable in [
            "content_type",
            "pricing",
            "ad_spend",
            "seo_tactic",
            "affiliate_action",
        ] {
            assert!(space.contains_key(variable), "missing {variable}");
        }
    }
}
