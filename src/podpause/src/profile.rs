use crate::model::{LabelSelectorRequirement, PodSelector, RequirementOperator, ResumeProfile};

use kube::ResourceExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$").expect("valid name pattern"));
static DNS_SUBDOMAIN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("valid subdomain pattern")
});

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
    #[error("operator {operator} on key {key:?} requires values")]
    MissingValues { key: String, operator: String },
    #[error("operator {operator} on key {key:?} does not accept values")]
    UnexpectedValues { key: String, operator: String },
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let prefix_ok = prefix.map_or(true, |prefix| {
        !prefix.is_empty() && prefix.len() <= 253 && DNS_SUBDOMAIN_PATTERN.is_match(prefix)
    });
    if !prefix_ok || name.is_empty() || name.len() > 63 || !NAME_PATTERN.is_match(name) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), SelectorError> {
    if value.is_empty() || (value.len() <= 63 && NAME_PATTERN.is_match(value)) {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: RequirementOperator,
    values: Vec<String>,
}

impl Requirement {
    fn compile(requirement: &LabelSelectorRequirement) -> Result<Self, SelectorError> {
        validate_key(&requirement.key)?;
        let operator = RequirementOperator::parse(&requirement.operator)
            .ok_or_else(|| SelectorError::UnknownOperator(requirement.operator.clone()))?;
        let values = requirement.values.clone().unwrap_or_default();
        match operator {
            RequirementOperator::In | RequirementOperator::NotIn if values.is_empty() => {
                return Err(SelectorError::MissingValues {
                    key: requirement.key.clone(),
                    operator: operator.as_str().to_string(),
                })
            }
            RequirementOperator::Exists | RequirementOperator::DoesNotExist if !values.is_empty() => {
                return Err(SelectorError::UnexpectedValues {
                    key: requirement.key.clone(),
                    operator: operator.as_str().to_string(),
                })
            }
            _ => {}
        }
        for value in &values {
            validate_value(&requirement.key, value)?;
        }
        Ok(Self {
            key: requirement.key.clone(),
            operator,
            values,
        })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            RequirementOperator::In => value.is_some_and(|value| self.values.contains(value)),
            RequirementOperator::NotIn => value.map_or(true, |value| !self.values.contains(value)),
            RequirementOperator::Exists => value.is_some(),
            RequirementOperator::DoesNotExist => value.is_none(),
        }
    }
}

/// A validated label selector. Without requirements it matches everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn compile(selector: &PodSelector) -> Result<Self, SelectorError> {
        let mut requirements = Vec::new();
        for (key, value) in selector.match_labels.iter().flatten() {
            validate_key(key)?;
            validate_value(key, value)?;
            requirements.push(Requirement {
                key: key.clone(),
                operator: RequirementOperator::In,
                values: vec![value.clone()],
            });
        }
        for requirement in selector.match_expressions.iter().flatten() {
            requirements.push(Requirement::compile(requirement)?);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|requirement| requirement.matches(labels))
    }
}

/// The valid selectors of a `ResumeProfile`, ORed together.
#[derive(Clone, Debug)]
pub struct CompiledProfile {
    pub name: String,
    selectors: Vec<Selector>,
}

impl CompiledProfile {
    /// Malformed selectors are logged and left out; they never fail the whole profile.
    pub fn compile(profile: &ResumeProfile) -> Self {
        let name = profile.name_any();
        let selectors = profile
            .spec
            .pod_selector
            .iter()
            .filter_map(|selector| match Selector::compile(selector) {
                Ok(selector) => Some(selector),
                Err(err) => {
                    warn!(
                        "Skipping selector `{}` of ResumeProfile {}/{}: {}",
                        selector.to_label_selector(),
                        profile.namespace().unwrap_or_default(),
                        name,
                        err,
                    );
                    None
                }
            })
            .collect();
        Self { name, selectors }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.selectors.iter().any(|selector| selector.matches(labels))
    }
}
