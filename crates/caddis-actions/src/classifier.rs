//! Failure classification registry
//!
//! Each executor type registers, at process startup, an ordered list of
//! matchers mapping failure kinds to an `ErrorType` and code. Lookup checks
//! exact matchers first, then walks ancestor matchers in registration order,
//! mimicking catch-block ordering from subclass to superclass. A deployment
//! override table can reshape the result without touching executor code.
//!
//! The registry is built once through `ErrorRegistryBuilder` and sealed;
//! after `build()` it is immutable and shared by reference.

use crate::error::{ErrorType, ExecutorError, ExecutorFault, Failure, FailureKind};
use std::collections::HashMap;
use thiserror::Error;

/// How a registered entry matches a failure kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// Kind must match exactly
    Exact(FailureKind),
    /// Kind must equal the prefix or sit below it in the dotted hierarchy
    Ancestor(FailureKind),
}

impl MatchRule {
    fn matches(&self, kind: &FailureKind) -> bool {
        match self {
            MatchRule::Exact(k) => k == kind,
            MatchRule::Ancestor(prefix) => kind.is_descendant_of(prefix),
        }
    }
}

/// One registered (matcher → classification) entry
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub rule: MatchRule,
    pub error_type: ErrorType,
    pub code: String,
}

/// Error type for registry construction
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An override rule string did not parse
    #[error("invalid override rule: {0}")]
    InvalidOverrideRule(String),
}

/// Deployment override: `executor_glob=kind[TYPE|code]`
///
/// Applied after base classification; matches raw failures whose action
/// type matches the glob and whose kind equals or descends from `kind`.
#[derive(Debug, Clone)]
pub struct OverrideRule {
    pub type_pattern: glob::Pattern,
    pub kind: FailureKind,
    pub error_type: ErrorType,
    pub code: String,
}

impl OverrideRule {
    /// Parse a rule of the form `shell*=io.connection[TRANSIENT|E404]`
    pub fn parse(rule: &str) -> std::result::Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidOverrideRule(rule.to_string());

        let (pattern, rest) = rule.split_once('=').ok_or_else(invalid)?;
        let (kind, bracketed) = rest.split_once('[').ok_or_else(invalid)?;
        let body = bracketed.strip_suffix(']').ok_or_else(invalid)?;
        let (error_type, code) = body.split_once('|').ok_or_else(invalid)?;

        let error_type = match error_type {
            "TRANSIENT" => ErrorType::Transient,
            "NON_TRANSIENT" => ErrorType::NonTransient,
            "ERROR" => ErrorType::Error,
            "FAILED" => ErrorType::Failed,
            _ => return Err(invalid()),
        };
        if kind.is_empty() || code.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            type_pattern: glob::Pattern::new(pattern.trim()).map_err(|_| invalid())?,
            kind: FailureKind::new(kind.trim()),
            error_type,
            code: code.to_string(),
        })
    }

    fn matches(&self, action_type: &str, kind: &FailureKind) -> bool {
        self.type_pattern.matches(action_type) && kind.is_descendant_of(&self.kind)
    }
}

/// Builder phase of the registry; sealed by `build()`
#[derive(Debug, Default)]
pub struct ErrorRegistryBuilder {
    by_type: HashMap<String, Vec<ErrorInfo>>,
    overrides: Vec<OverrideRule>,
}

impl ErrorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matcher for an action type; order matters
    pub fn register(
        &mut self,
        action_type: impl Into<String>,
        rule: MatchRule,
        error_type: ErrorType,
        code: impl Into<String>,
    ) -> &mut Self {
        self.by_type
            .entry(action_type.into())
            .or_default()
            .push(ErrorInfo {
                rule,
                error_type,
                code: code.into(),
            });
        self
    }

    /// Add a deployment override rule
    pub fn add_override(&mut self, rule: OverrideRule) -> &mut Self {
        self.overrides.push(rule);
        self
    }

    /// Parse and add override rules from configuration strings
    pub fn parse_overrides<'a, I>(&mut self, rules: I) -> std::result::Result<&mut Self, RegistryError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for rule in rules {
            let parsed = OverrideRule::parse(rule)?;
            self.overrides.push(parsed);
        }
        Ok(self)
    }

    /// Seal the registry
    pub fn build(self) -> ErrorRegistry {
        ErrorRegistry {
            by_type: self.by_type,
            overrides: self.overrides,
        }
    }
}

/// Sealed, shared failure classifier
#[derive(Debug, Default)]
pub struct ErrorRegistry {
    by_type: HashMap<String, Vec<ErrorInfo>>,
    overrides: Vec<OverrideRule>,
}

impl ErrorRegistry {
    /// Classify a raw failure for an action type
    ///
    /// Exact matchers win first (in registration order), then ancestor
    /// matchers in registration order. Unregistered kinds classify as
    /// `ERROR` with the kind's simple name as the code. Override rules
    /// apply last.
    pub fn classify(&self, action_type: &str, failure: &Failure) -> ExecutorError {
        let entries = self.by_type.get(action_type).map(Vec::as_slice).unwrap_or(&[]);

        let base = entries
            .iter()
            .find(|e| matches!(e.rule, MatchRule::Exact(_)) && e.rule.matches(&failure.kind))
            .or_else(|| {
                entries
                    .iter()
                    .find(|e| matches!(e.rule, MatchRule::Ancestor(_)) && e.rule.matches(&failure.kind))
            });

        let mut classified = match base {
            Some(info) => ExecutorError::new(info.error_type, &info.code, &failure.message),
            None => ExecutorError::error(failure.kind.simple_name(), &failure.message),
        };

        if let Some(rule) = self
            .overrides
            .iter()
            .find(|r| r.matches(action_type, &failure.kind))
        {
            classified.error_type = rule.error_type;
            classified.code = rule.code.clone();
        }

        classified
    }

    /// Resolve a hook fault into a classified error
    ///
    /// Typed faults pass through untouched; raw failures go through
    /// `classify`.
    pub fn resolve(&self, action_type: &str, fault: ExecutorFault) -> ExecutorError {
        match fault {
            ExecutorFault::Typed(err) => err,
            ExecutorFault::Raw(failure) => self.classify(action_type, &failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ErrorRegistry {
        let mut builder = ErrorRegistryBuilder::new();
        builder
            .register(
                "shell",
                MatchRule::Exact("io.timeout".into()),
                ErrorType::Transient,
                "E100",
            )
            .register(
                "shell",
                MatchRule::Ancestor("io.connection".into()),
                ErrorType::Transient,
                "E101",
            )
            .register(
                "shell",
                MatchRule::Ancestor("io".into()),
                ErrorType::NonTransient,
                "E102",
            );
        builder.build()
    }

    #[test]
    fn test_exact_match_wins() {
        let reg = registry();
        let err = reg.classify("shell", &Failure::new("io.timeout", "slow"));
        assert_eq!(err.code, "E100");
        assert_eq!(err.error_type, ErrorType::Transient);
    }

    #[test]
    fn test_ancestor_match_in_registration_order() {
        let reg = registry();

        // io.connection.reset hits the io.connection matcher before io
        let err = reg.classify("shell", &Failure::new("io.connection.reset", "reset"));
        assert_eq!(err.code, "E101");

        // io.not_found falls through to the io matcher
        let err = reg.classify("shell", &Failure::new("io.not_found", "missing"));
        assert_eq!(err.code, "E102");
        assert_eq!(err.error_type, ErrorType::NonTransient);
    }

    #[test]
    fn test_unregistered_defaults_to_error() {
        let reg = registry();
        let err = reg.classify("shell", &Failure::new("query.syntax", "bad sql"));
        assert_eq!(err.error_type, ErrorType::Error);
        assert_eq!(err.code, "syntax");

        // Unknown action type too
        let err = reg.classify("nosuch", &Failure::new("x.y", "eh"));
        assert_eq!(err.error_type, ErrorType::Error);
        assert_eq!(err.code, "y");
    }

    #[test]
    fn test_override_rule_parse() {
        let rule = OverrideRule::parse("shell*=io.connection[TRANSIENT|E404]").unwrap();
        assert!(rule.type_pattern.matches("shell"));
        assert!(rule.type_pattern.matches("shell-ssh"));
        assert_eq!(rule.error_type, ErrorType::Transient);
        assert_eq!(rule.code, "E404");

        assert!(OverrideRule::parse("missing-equals").is_err());
        assert!(OverrideRule::parse("a=b[BOGUS|c]").is_err());
        assert!(OverrideRule::parse("a=b[ERROR]").is_err());
    }

    #[test]
    fn test_override_reclassifies_unregistered() {
        let mut builder = ErrorRegistryBuilder::new();
        builder
            .parse_overrides(["shell*=err[ERROR|E999]"])
            .unwrap();
        let reg = builder.build();

        // Unregistered kind under the err hierarchy gets the override
        let err = reg.classify("shell", &Failure::new("err.weird.thing", "?"));
        assert_eq!(err.code, "E999");
        assert_eq!(err.error_type, ErrorType::Error);

        // Non-matching action type keeps the default classification
        let err = reg.classify("query", &Failure::new("err.weird.thing", "?"));
        assert_eq!(err.code, "thing");
    }

    #[test]
    fn test_override_beats_base_registration() {
        let mut builder = ErrorRegistryBuilder::new();
        builder.register(
            "shell",
            MatchRule::Exact("io.timeout".into()),
            ErrorType::Transient,
            "E100",
        );
        builder.parse_overrides(["shell=io.timeout[FAILED|E666]"]).unwrap();
        let reg = builder.build();

        let err = reg.classify("shell", &Failure::new("io.timeout", "slow"));
        assert_eq!(err.error_type, ErrorType::Failed);
        assert_eq!(err.code, "E666");
    }

    #[test]
    fn test_resolve_passes_typed_through() {
        let reg = registry();
        let typed = ExecutorError::failed("E1", "boom");
        let resolved = reg.resolve("shell", typed.clone().into());
        assert_eq!(resolved, typed);

        let resolved = reg.resolve("shell", Failure::new("io.timeout", "slow").into());
        assert_eq!(resolved.code, "E100");
    }
}
