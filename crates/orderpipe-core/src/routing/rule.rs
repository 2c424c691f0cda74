//! Compiled routing rules.

use super::pattern::{compile_event_pattern, Predicate};
use crate::config::RuleConfig;
use crate::RuleError;
use serde_json::Value;
use std::collections::HashSet;

/// A compiled rule: one predicate over the event's JSON view and one target sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Unique rule name
    pub name: String,
    /// Human readable description
    pub description: Option<String>,
    /// Predicate over the whole event (source, detailType, detail)
    pub pattern: Predicate,
    /// Target sink id
    pub target: String,
}

impl Rule {
    /// Build a rule from a source prefix and a predicate over `detail`.
    pub fn new(
        name: impl Into<String>,
        source_prefix: impl Into<String>,
        detail: Predicate,
        target: impl Into<String>,
    ) -> Self {
        let source = Predicate::Prefix {
            path: "source".to_string(),
            value: source_prefix.into(),
        };
        Self {
            name: name.into(),
            description: None,
            pattern: Predicate::all(vec![source, detail.rooted_at("detail")]),
            target: target.into(),
        }
    }

    /// Compile a rule from configuration.
    pub fn from_config(config: &RuleConfig) -> Result<Self, RuleError> {
        let invalid = |message: &str| RuleError::InvalidRule {
            rule: config.name.clone(),
            message: message.to_string(),
        };

        if config.name.trim().is_empty() {
            return Err(invalid("rule name is required"));
        }
        if config.target.trim().is_empty() {
            return Err(invalid("target sink is required"));
        }

        let mut rule = match &config.event_pattern {
            Some(pattern) => {
                if !config.source_prefix.is_empty() || config.detail.is_some() {
                    return Err(invalid(
                        "use either event_pattern or source_prefix/detail, not both",
                    ));
                }
                Rule {
                    name: config.name.clone(),
                    description: None,
                    pattern: compile_event_pattern(&config.name, pattern)?,
                    target: config.target.clone(),
                }
            }
            None => Rule::new(
                config.name.clone(),
                config.source_prefix.clone(),
                config.detail.clone().unwrap_or(Predicate::Always),
                config.target.clone(),
            ),
        };

        rule.pattern.validate().map_err(|m| invalid(m.as_str()))?;
        rule.description = config.description.clone();
        Ok(rule)
    }

    /// Whether the rule matches an event's JSON view.
    pub fn matches(&self, event: &Value) -> bool {
        self.pattern.evaluate(event)
    }
}

/// Immutable set of rules, evaluated independently of each other.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Create a rule set, rejecting duplicate names.
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        let mut names = HashSet::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule(rule.name.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Compile every configured rule.
    pub fn compile(configs: &[RuleConfig]) -> Result<Self, RuleError> {
        let rules = configs
            .iter()
            .map(Rule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    /// Check that every rule targets a known sink.
    pub fn check_targets(&self, sink_ids: &HashSet<&str>) -> Result<(), RuleError> {
        for rule in &self.rules {
            if !sink_ids.contains(rule.target.as_str()) {
                return Err(RuleError::UnknownSink {
                    rule: rule.name.clone(),
                    sink: rule.target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Rules in configuration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule is configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
