//! Relay filters with three-way match semantics.
//!
//! A filter looks at a candidate [`RelayMessage`] and answers `NoMatch`,
//! `Match` (optionally with a rewritten message) or `Block`. Pattern filters
//! come from configuration; log classifiers are built in.

use std::collections::HashMap;
use std::sync::Arc;

use fancy_regex::Regex;
use tracing::warn;

use crate::bridge::message::RelayMessage;
use crate::common::error::{ConfigError, FilterError};
use crate::config::types::FilterConfig;
use crate::minecraft::classify::LogClassifier;

/// Result of running one filter.
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    NoMatch,
    /// Matched; carries the replacement message if the filter rewrote it.
    Match(Option<RelayMessage>),
    Block,
}

/// What a pattern filter does when one of its patterns matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternAction {
    Block,
    Match,
}

impl PatternAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "block" | "drop" => Some(PatternAction::Block),
            "match" | "allow" | "pass" => Some(PatternAction::Match),
            _ => None,
        }
    }
}

/// A compiled regex pattern with its original string for debugging.
#[derive(Debug, Clone)]
struct CompiledPattern {
    original: String,
    regex: Regex,
}

/// Regex filter over the message text.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    name: String,
    action: PatternAction,
    patterns: Vec<CompiledPattern>,
}

impl PatternFilter {
    /// Invalid regex patterns are logged and skipped.
    pub fn new(name: impl Into<String>, action: PatternAction, patterns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            action,
            patterns: compile_patterns(patterns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classify(&self, message: &RelayMessage) -> Result<FilterOutcome, FilterError> {
        let Some(text) = message.text.as_deref() else {
            return Ok(FilterOutcome::NoMatch);
        };

        for pattern in &self.patterns {
            let matched = pattern
                .regex
                .is_match(text)
                .map_err(|e| FilterError::Regex {
                    pattern: pattern.original.clone(),
                    message: e.to_string(),
                })?;
            if matched {
                return Ok(match self.action {
                    PatternAction::Block => FilterOutcome::Block,
                    PatternAction::Match => FilterOutcome::Match(None),
                });
            }
        }

        Ok(FilterOutcome::NoMatch)
    }
}

/// Closed set of filters a relay target can carry.
#[derive(Debug, Clone)]
pub enum RelayFilter {
    Pattern(Arc<PatternFilter>),
    Log(LogClassifier),
}

impl RelayFilter {
    pub fn name(&self) -> &str {
        match self {
            RelayFilter::Pattern(filter) => filter.name(),
            RelayFilter::Log(classifier) => classifier.name(),
        }
    }

    pub fn classify(&self, message: &RelayMessage) -> Result<FilterOutcome, FilterError> {
        match self {
            RelayFilter::Pattern(filter) => filter.classify(message),
            RelayFilter::Log(classifier) => classifier.classify(message),
        }
    }
}

/// Named filters available to relay rules.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    named: HashMap<String, RelayFilter>,
}

impl FilterRegistry {
    /// Built-in log classifiers only.
    pub fn builtin() -> Self {
        let named = LogClassifier::ALL
            .iter()
            .map(|classifier| (classifier.name().to_string(), RelayFilter::Log(*classifier)))
            .collect();
        Self { named }
    }

    /// Built-ins plus the pattern filters defined in configuration.
    ///
    /// A configured filter may not shadow a built-in name.
    pub fn from_config(filters: &HashMap<String, FilterConfig>) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin();
        for (name, config) in filters {
            if registry.named.contains_key(name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("filters.{}", name),
                    message: "name is reserved for a built-in filter".to_string(),
                });
            }
            let action = match config.action.as_deref() {
                None => PatternAction::Block,
                Some(value) => PatternAction::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                    field: format!("filters.{}.action", name),
                    message: format!("'{}' is not one of: block, match", value),
                })?,
            };
            let filter = PatternFilter::new(name.clone(), action, config.patterns.clone());
            registry
                .named
                .insert(name.clone(), RelayFilter::Pattern(Arc::new(filter)));
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&RelayFilter> {
        self.named.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Resolve an ordered list of filter names into a chain.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<RelayFilter>, ConfigError> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownFilter { name: name.clone() })
            })
            .collect()
    }
}

/// Compile a list of regex pattern strings, skipping invalid ones.
fn compile_patterns(patterns: Vec<String>) -> Vec<CompiledPattern> {
    patterns
        .into_iter()
        .filter_map(|pattern| match Regex::new(&pattern) {
            Ok(regex) => Some(CompiledPattern {
                original: pattern,
                regex,
            }),
            Err(e) => {
                warn!("Invalid filter regex pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}
