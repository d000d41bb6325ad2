use itertools::Itertools;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequirementOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl RequirementOperator {
    pub fn as_str(&self) -> &str {
        match self {
            RequirementOperator::In => "in",
            RequirementOperator::NotIn => "notin",
            RequirementOperator::Exists => "exists",
            RequirementOperator::DoesNotExist => "doesnotexist",
        }
    }

    /// Accepts the Kubernetes spelling (`NotIn`) as well as the lowercase selector form (`notin`).
    pub fn parse(operator: &str) -> Option<Self> {
        match operator.to_ascii_lowercase().as_str() {
            "in" => Some(RequirementOperator::In),
            "notin" => Some(RequirementOperator::NotIn),
            "exists" => Some(RequirementOperator::Exists),
            "doesnotexist" => Some(RequirementOperator::DoesNotExist),
            _ => None,
        }
    }
}

/// LabelSelectorRequirement is a selector that contains values, a key, and an operator that
/// relates the key and values.
/// Valid operators are In, NotIn, Exists and DoesNotExist.
///
/// The operator is kept as a plain string so that a single malformed requirement
/// only invalidates its own selector instead of the whole `ResumeProfile`.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    pub values: Option<Vec<String>>,
}

impl LabelSelectorRequirement {
    pub fn to_label_selector(&self) -> String {
        let mut selector = String::new();

        match RequirementOperator::parse(&self.operator) {
            Some(RequirementOperator::Exists) => {
                selector.push_str(&self.key);
            }
            Some(RequirementOperator::DoesNotExist) => {
                selector.push('!');
                selector.push_str(&self.key);
            }
            _ => {
                selector.push_str(&self.key);
                selector.push(' ');
                selector.push_str(&self.operator.to_ascii_lowercase());
                if let Some(values) = &self.values {
                    selector.push_str(" (");
                    selector.push_str(&values.join(","));
                    selector.push(')');
                }
            }
        }

        selector
    }
}

/// PodSelector mirrors a Kubernetes `LabelSelector`.
/// All of `matchLabels` and `matchExpressions` are ANDed; an empty selector matches every pod.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    pub match_labels: Option<BTreeMap<String, String>>,
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

impl PodSelector {
    pub fn to_label_selector(&self) -> String {
        let labels = self
            .match_labels
            .iter()
            .flatten()
            .map(|(key, value)| format!("{key}={value}"));
        let expressions = self
            .match_expressions
            .iter()
            .flatten()
            .map(LabelSelectorRequirement::to_label_selector);
        labels.chain(expressions).join(",")
    }
}

/// `ResumeProfile` lists the pods of a namespace that stay active while the rest of it is paused.
/// A namespace opts in by referencing the profile name from its profile annotation.
/// A pod matches the profile when any one of the `podSelector` entries matches its labels.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    kind = "ResumeProfile",
    group = "pause.infra.doodle.com",
    version = "v1beta1",
    namespaced
)]
#[kube(shortname = "rp")]
#[serde(rename_all = "camelCase")]
pub struct ResumeProfileSpec {
    pub pod_selector: Vec<PodSelector>,
}
